//! Segment index and composition timing boxes.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Read;

use bitreader::BitReader;

use crate::boxes::BoxType;
use crate::properties::FreeSpaceBox;
use crate::writer::BoxWriter;
use crate::{
    be_u16, be_u32, be_u64, check_parser_state, read_fullbox_extra, BMFFBox, BoxIter, Error,
    Result, ToU64, TryVec,
};

const SIDX_REFERENCE_SIZE: u64 = 12;

/// One 12-byte segment reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentReference {
    /// True when the reference points at another `sidx` box rather
    /// than media.
    pub reference_type: bool,
    /// 31-bit distance to the end of the referenced material.
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    /// 3-bit SAP type.
    pub sap_type: u8,
    /// 28-bit SAP delta time.
    pub sap_delta_time: u32,
}

impl SegmentReference {
    fn check_ranges(&self) -> Result<()> {
        if self.referenced_size > (1 << 31) - 1 {
            return Err(Error::InvalidData("sidx referenced_size exceeds 31 bits"));
        }
        if self.sap_type > 7 {
            return Err(Error::InvalidData("sidx SAP_type exceeds 3 bits"));
        }
        if self.sap_delta_time > (1 << 28) - 1 {
            return Err(Error::InvalidData("sidx SAP_delta_time exceeds 28 bits"));
        }
        Ok(())
    }
}

/// Segment index box 'sidx'.
///
/// The version is chosen while writing: 0 when both 64-bit fields fit
/// in 32 bits, 1 otherwise. `space_reserve` asks for room for that
/// many reference slots in total; the unused slots become a trailing
/// `free` box after the `sidx`, and the written `first_offset` is
/// shifted past it so the offset still lands on the referenced
/// material. The reserve is a writing aid only, parsing always yields
/// `space_reserve` 0.
/// See ISO 14496-12:2015 § 8.16.3
#[derive(Debug, Default, PartialEq)]
pub struct SegmentIndexBox {
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: TryVec<SegmentReference>,
    pub space_reserve: u32,
}

impl SegmentIndexBox {
    /// Parse a standalone 'sidx' box. Bytes past the box, such as the
    /// `free` box a reserve leaves behind, are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        let mut iter = BoxIter::new(&mut reader);
        let mut b = iter.next_box()?.ok_or(Error::UnexpectedEOF)?;
        if b.head.name != BoxType::SegmentIndexBox {
            return Err(Error::InvalidData("expected sidx box"));
        }
        let sidx = Self::parse(&mut b)?;
        check_parser_state(&b.head, &b.content)?;
        Ok(sidx)
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let (version, _flags) = read_fullbox_extra(src)?;
        let reference_id = be_u32(src)?;
        let timescale = be_u32(src)?;
        let (earliest_presentation_time, first_offset) = match version {
            0 => (be_u32(src)?.into(), be_u32(src)?.into()),
            1 => (be_u64(src)?, be_u64(src)?),
            _ => return Err(Error::Unsupported("sidx version")),
        };
        let _reserved = be_u16(src)?;
        let reference_count = be_u16(src)?;
        let mut references = TryVec::with_capacity(reference_count.into())?;
        for _ in 0..reference_count {
            let mut head = [0; 4];
            src.read_exact(&mut head)?;
            let mut head = BitReader::new(&head);
            let reference_type = head.read_bool()?;
            let referenced_size = head.read_u32(31)?;
            let subsegment_duration = be_u32(src)?;
            let mut tail = [0; 4];
            src.read_exact(&mut tail)?;
            let mut tail = BitReader::new(&tail);
            references.push(SegmentReference {
                reference_type,
                referenced_size,
                subsegment_duration,
                starts_with_sap: tail.read_bool()?,
                sap_type: tail.read_u8(3)?,
                sap_delta_time: tail.read_u32(28)?,
            })?;
        }
        Ok(Self {
            reference_id,
            timescale,
            earliest_presentation_time,
            first_offset,
            references,
            space_reserve: 0,
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let reference_count = u16::try_from(self.references.len())
            .map_err(|_| Error::InvalidData("too many sidx references"))?;
        let reserve_slots = u64::from(self.space_reserve).saturating_sub(self.references.len().to_u64());
        let reserve_bytes = reserve_slots * SIDX_REFERENCE_SIZE;
        let first_offset = self
            .first_offset
            .checked_add(reserve_bytes)
            .ok_or(Error::InvalidData("sidx first_offset overflow"))?;
        let version = if self.earliest_presentation_time > u32::MAX.into() || first_offset > u32::MAX.into() {
            1
        } else {
            0
        };

        let mark = w.open_full_box(BoxType::SegmentIndexBox, version, 0)?;
        w.write_u32(self.reference_id)?;
        w.write_u32(self.timescale)?;
        if version == 0 {
            w.write_u32(self.earliest_presentation_time as u32)?;
            w.write_u32(first_offset as u32)?;
        } else {
            w.write_u64(self.earliest_presentation_time)?;
            w.write_u64(first_offset)?;
        }
        w.write_u16(0)?; // reserved
        w.write_u16(reference_count)?;
        for r in &self.references {
            r.check_ranges()?;
            w.write_bits(u64::from(r.reference_type), 1)?;
            w.write_bits(r.referenced_size.into(), 31)?;
            w.write_u32(r.subsegment_duration)?;
            w.write_bits(u64::from(r.starts_with_sap), 1)?;
            w.write_bits(r.sap_type.into(), 3)?;
            w.write_bits(r.sap_delta_time.into(), 28)?;
        }
        w.close_box(mark)?;

        if reserve_bytes > 0 {
            FreeSpaceBox::new(reserve_bytes - 8).write(w)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<TryVec<u8>> {
        let mut w = BoxWriter::new();
        self.write(&mut w)?;
        Ok(w.into_vec())
    }
}

/// Composition to decode box 'cslg'.
///
/// All five fields are signed 64-bit in the model. The version is a
/// function of the values: 0 while every field fits in 32 bits, 1
/// as soon as one does not. There is no stored version to keep in
/// sync with the data.
/// See ISO 14496-12:2015 § 8.6.1.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompositionToDecodeBox {
    pub composition_to_dts_shift: i64,
    pub least_decode_to_display_delta: i64,
    pub greatest_decode_to_display_delta: i64,
    pub composition_start_time: i64,
    pub composition_end_time: i64,
}

impl CompositionToDecodeBox {
    fn fields(&self) -> [i64; 5] {
        [
            self.composition_to_dts_shift,
            self.least_decode_to_display_delta,
            self.greatest_decode_to_display_delta,
            self.composition_start_time,
            self.composition_end_time,
        ]
    }

    /// The version this box will be written with.
    pub fn version(&self) -> u8 {
        if self.fields().iter().all(|&v| i32::try_from(v).is_ok()) {
            0
        } else {
            1
        }
    }

    /// Parse a standalone 'cslg' box.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        let mut iter = BoxIter::new(&mut reader);
        let mut b = iter.next_box()?.ok_or(Error::UnexpectedEOF)?;
        if b.head.name != BoxType::CompositionToDecodeBox {
            return Err(Error::InvalidData("expected cslg box"));
        }
        let cslg = Self::parse(&mut b)?;
        check_parser_state(&b.head, &b.content)?;
        Ok(cslg)
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let (version, _flags) = read_fullbox_extra(src)?;
        let mut fields = [0i64; 5];
        for field in &mut fields {
            *field = match version {
                0 => i64::from(be_u32(src)? as i32),
                1 => be_u64(src)? as i64,
                _ => return Err(Error::Unsupported("cslg version")),
            };
        }
        let [composition_to_dts_shift, least_decode_to_display_delta, greatest_decode_to_display_delta, composition_start_time, composition_end_time] =
            fields;
        Ok(Self {
            composition_to_dts_shift,
            least_decode_to_display_delta,
            greatest_decode_to_display_delta,
            composition_start_time,
            composition_end_time,
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let version = self.version();
        let mark = w.open_full_box(BoxType::CompositionToDecodeBox, version, 0)?;
        for v in self.fields() {
            if version == 0 {
                w.write_u32(v as i32 as u32)?;
            } else {
                w.write_u64(v as u64)?;
            }
        }
        w.close_box(mark)
    }

    pub fn to_bytes(&self) -> Result<TryVec<u8>> {
        let mut w = BoxWriter::new();
        self.write(&mut w)?;
        Ok(w.into_vec())
    }
}
