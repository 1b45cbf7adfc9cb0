//! Entity grouping and sample group description boxes.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Read;

use byteorder::ReadBytesExt;
use log::warn;

use crate::boxes::{BoxType, FourCC};
use crate::writer::BoxWriter;
use crate::{
    be_i16, be_u16, be_u32, check_parser_state, read_buf, read_fullbox_extra, BMFFBox, BoxIter,
    Error, Result, ToU64, TryVec,
};

/// One entity group: a grouping type (the box's own tag), a group id
/// and the entities that belong to the group.
/// See ISO 14496-12:2015 § 8.18.2
#[derive(Debug, PartialEq)]
pub struct EntityToGroupBox {
    pub grouping_type: FourCC,
    pub group_id: u32,
    pub entity_ids: TryVec<u32>,
}

impl EntityToGroupBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let (version, _flags) = read_fullbox_extra(src)?;
        if version != 0 {
            return Err(Error::Unsupported("entity group version"));
        }
        let grouping_type = FourCC::from(src.head.name);
        let group_id = be_u32(src)?;
        let num_entities = be_u32(src)?;
        if u64::from(num_entities) * 4 > src.bytes_left() {
            return Err(Error::InvalidData("entity count exceeds box size"));
        }
        let mut entity_ids = TryVec::with_capacity(num_entities.try_into()?)?;
        for _ in 0..num_entities {
            entity_ids.push(be_u32(src)?)?;
        }
        Ok(Self { grouping_type, group_id, entity_ids })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let num_entities = u32::try_from(self.entity_ids.len())
            .map_err(|_| Error::InvalidData("too many entities in group"))?;
        let mark = w.open_full_box(BoxType::from(self.grouping_type), 0, 0)?;
        w.write_u32(self.group_id)?;
        w.write_u32(num_entities)?;
        for &id in &self.entity_ids {
            w.write_u32(id)?;
        }
        w.close_box(mark)
    }
}

/// Groups list box 'grpl', a plain container of entity groups.
/// See ISO 14496-12:2015 § 8.18.1
#[derive(Debug, Default, PartialEq)]
pub struct GroupsListBox {
    groups: TryVec<EntityToGroupBox>,
}

impl GroupsListBox {
    pub fn groups(&self) -> &[EntityToGroupBox] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn add(&mut self, group: EntityToGroupBox) -> Result<()> {
        self.groups.push(group)?;
        Ok(())
    }

    /// Groups of one grouping type, e.g. all "altr" groups.
    pub fn groups_of_type(&self, grouping_type: FourCC) -> impl Iterator<Item = &EntityToGroupBox> {
        self.groups.iter().filter(move |g| g.grouping_type == grouping_type)
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let mut groups = TryVec::new();
        let mut iter = src.box_iter();
        while let Some(mut b) = iter.next_box()? {
            groups.push(EntityToGroupBox::parse(&mut b)?)?;
            check_parser_state(&b.head, &b.content)?;
        }
        Ok(Self { groups })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::GroupsListBox)?;
        for group in &self.groups {
            group.write(w)?;
        }
        w.close_box(mark)
    }
}

/// 'refs' sample group entry: a sample id plus the ids of samples it
/// directly references.
#[derive(Debug, PartialEq)]
pub struct DirectReferenceSamplesList {
    pub sample_id: u32,
    pub direct_reference_sample_ids: TryVec<u32>,
}

/// 'eqiv' sample group entry: timing relation between a track sample
/// and an equivalent image item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualEquivalenceEntry {
    pub time_offset: i16,
    pub timescale_multiplier: u16,
}

/// 'stmi' sample group entry: metadata items describing a sample,
/// qualified by the handler of the meta box they live in.
#[derive(Debug, PartialEq)]
pub struct SampleToMetadataItemEntry {
    pub meta_box_handler_type: FourCC,
    pub item_ids: TryVec<u32>,
}

/// One decoded `sgpd` entry. The grouping type selects the payload
/// shape; all entries of one box share it.
#[derive(Debug, PartialEq)]
pub enum SampleGroupEntry {
    DirectReferenceSamples(DirectReferenceSamplesList),
    VisualEquivalence(VisualEquivalenceEntry),
    SampleToMetadataItem(SampleToMetadataItemEntry),
}

impl SampleGroupEntry {
    pub fn grouping_type(&self) -> FourCC {
        match self {
            Self::DirectReferenceSamples(_) => FourCC::from(*b"refs"),
            Self::VisualEquivalence(_) => FourCC::from(*b"eqiv"),
            Self::SampleToMetadataItem(_) => FourCC::from(*b"stmi"),
        }
    }

    /// Encoded entry length in bytes. Matches what [`Self::write_entry`]
    /// produces; `sgpd` length prefixes are derived from it.
    pub fn size(&self) -> u64 {
        match self {
            Self::DirectReferenceSamples(e) => 4 + 1 + 4 * e.direct_reference_sample_ids.len().to_u64(),
            Self::VisualEquivalence(_) => 4,
            Self::SampleToMetadataItem(e) => 4 + 4 * e.item_ids.len().to_u64(),
        }
    }

    /// Grouping types whose payload marks its own end; only these can
    /// be framed without length prefixes.
    fn is_self_delimiting(grouping_type: FourCC) -> bool {
        grouping_type == b"refs" || grouping_type == b"eqiv"
    }

    /// Decode one entry straight off the stream when no length fields
    /// are present. `stmi` payloads and foreign types run to an entry
    /// boundary the stream does not mark, so they cannot be read here.
    fn parse_unsized<T: Read>(grouping_type: FourCC, src: &mut BMFFBox<'_, T>) -> Result<Self> {
        if grouping_type == b"refs" {
            let sample_id = be_u32(src)?;
            let count = src.read_u8()?;
            let mut direct_reference_sample_ids = TryVec::with_capacity(count.into())?;
            for _ in 0..count {
                direct_reference_sample_ids.push(be_u32(src)?)?;
            }
            Ok(Self::DirectReferenceSamples(DirectReferenceSamplesList {
                sample_id,
                direct_reference_sample_ids,
            }))
        } else if grouping_type == b"eqiv" {
            let time_offset = be_i16(src)?;
            let timescale_multiplier = be_u16(src)?;
            Ok(Self::VisualEquivalence(VisualEquivalenceEntry {
                time_offset,
                timescale_multiplier,
            }))
        } else {
            Err(Error::Unsupported("sgpd entry without a length prefix"))
        }
    }

    /// Decode one entry payload. `Ok(None)` means the grouping type is
    /// not understood and the caller should skip the entry.
    fn parse(grouping_type: FourCC, data: &[u8]) -> Result<Option<Self>> {
        let mut r = data;
        if grouping_type == b"refs" {
            let sample_id = be_u32(&mut r)?;
            let count = r.read_u8()?;
            let mut direct_reference_sample_ids = TryVec::with_capacity(count.into())?;
            for _ in 0..count {
                direct_reference_sample_ids.push(be_u32(&mut r)?)?;
            }
            if !r.is_empty() {
                return Err(Error::InvalidData("invalid refs entry length"));
            }
            Ok(Some(Self::DirectReferenceSamples(DirectReferenceSamplesList {
                sample_id,
                direct_reference_sample_ids,
            })))
        } else if grouping_type == b"eqiv" {
            let time_offset = be_i16(&mut r)?;
            let timescale_multiplier = be_u16(&mut r)?;
            if !r.is_empty() {
                return Err(Error::InvalidData("invalid eqiv entry length"));
            }
            Ok(Some(Self::VisualEquivalence(VisualEquivalenceEntry {
                time_offset,
                timescale_multiplier,
            })))
        } else if grouping_type == b"stmi" {
            if data.len() < 4 || (data.len() - 4) % 4 != 0 {
                return Err(Error::InvalidData("invalid stmi entry length"));
            }
            let meta_box_handler_type = FourCC::from(be_u32(&mut r)?);
            let mut item_ids = TryVec::new();
            while !r.is_empty() {
                item_ids.push(be_u32(&mut r)?)?;
            }
            Ok(Some(Self::SampleToMetadataItem(SampleToMetadataItemEntry {
                meta_box_handler_type,
                item_ids,
            })))
        } else {
            Ok(None)
        }
    }

    fn write_entry(&self, w: &mut BoxWriter) -> Result<()> {
        match self {
            Self::DirectReferenceSamples(e) => {
                let count = u8::try_from(e.direct_reference_sample_ids.len())
                    .map_err(|_| Error::InvalidData("too many direct reference samples"))?;
                w.write_u32(e.sample_id)?;
                w.write_u8(count)?;
                for &id in &e.direct_reference_sample_ids {
                    w.write_u32(id)?;
                }
            },
            Self::VisualEquivalence(e) => {
                w.write_u16(e.time_offset as u16)?;
                w.write_u16(e.timescale_multiplier)?;
            },
            Self::SampleToMetadataItem(e) => {
                w.write_fourcc(e.meta_box_handler_type)?;
                for &id in &e.item_ids {
                    w.write_u32(id)?;
                }
            },
        }
        Ok(())
    }
}

/// Sample group description box 'sgpd'.
///
/// Versions 1 and 2 are handled. Version 1 frames entries with a
/// default length or per-entry length prefixes; version 2 replaces
/// them with a default sample description index, leaving each entry to
/// delimit itself, so only grouping types with self-delimiting
/// payloads can take that form. Under version 1, entries whose
/// grouping type is not understood are skipped with a warning, so a
/// box parsed from foreign input may hold fewer entries than its entry
/// count claimed.
/// See ISO 14496-12:2015 § 8.9.3
#[derive(Debug, PartialEq)]
pub struct SampleGroupDescriptionBox {
    grouping_type: FourCC,
    default_length: u32,
    default_sample_description_index: u32,
    entries: TryVec<SampleGroupEntry>,
}

impl SampleGroupDescriptionBox {
    pub fn new(grouping_type: FourCC) -> Self {
        Self {
            grouping_type,
            default_length: 0,
            default_sample_description_index: 0,
            entries: TryVec::new(),
        }
    }

    pub fn grouping_type(&self) -> FourCC {
        self.grouping_type
    }

    pub fn entries(&self) -> &[SampleGroupEntry] {
        &self.entries
    }

    pub fn default_length(&self) -> u32 {
        self.default_length
    }

    /// A non-zero default length replaces per-entry length prefixes.
    /// Every entry must then encode to exactly this many bytes.
    pub fn set_default_length(&mut self, default_length: u32) {
        self.default_length = default_length;
    }

    pub fn default_sample_description_index(&self) -> u32 {
        self.default_sample_description_index
    }

    /// A non-zero index marks one entry (1-based) as the default
    /// description and moves the box to version 2 on write, which has
    /// no length fields at all.
    pub fn set_default_sample_description_index(&mut self, index: u32) {
        self.default_sample_description_index = index;
    }

    pub fn add_entry(&mut self, entry: SampleGroupEntry) -> Result<()> {
        if entry.grouping_type() != self.grouping_type {
            return Err(Error::InvalidData("entry grouping type mismatch"));
        }
        self.entries.push(entry)?;
        Ok(())
    }

    /// Parse a standalone 'sgpd' box.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        let mut iter = BoxIter::new(&mut reader);
        let mut b = iter.next_box()?.ok_or(Error::UnexpectedEOF)?;
        if b.head.name != BoxType::SampleGroupDescriptionBox {
            return Err(Error::InvalidData("expected sgpd box"));
        }
        let sgpd = Self::parse(&mut b)?;
        check_parser_state(&b.head, &b.content)?;
        Ok(sgpd)
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let (version, _flags) = read_fullbox_extra(src)?;
        if version != 1 && version != 2 {
            return Err(Error::Unsupported("sgpd version"));
        }
        let grouping_type = FourCC::from(be_u32(src)?);
        let default_length = if version == 1 { be_u32(src)? } else { 0 };
        let default_sample_description_index = if version == 2 { be_u32(src)? } else { 0 };
        let entry_count = be_u32(src)?;

        let mut entries = TryVec::new();
        for _ in 0..entry_count {
            if version == 2 {
                entries.push(SampleGroupEntry::parse_unsized(grouping_type, src)?)?;
                continue;
            }
            let description_length = if default_length == 0 {
                be_u32(src)?
            } else {
                default_length
            };
            if u64::from(description_length) > src.bytes_left() {
                return Err(Error::InvalidData("sgpd entry length exceeds box size"));
            }
            let data = read_buf(src, description_length.into())?;
            match SampleGroupEntry::parse(grouping_type, &data)? {
                Some(entry) => entries.push(entry)?,
                None => warn!("sgpd: skipping entry of unknown grouping type {grouping_type:?}"),
            }
        }
        Ok(Self { grouping_type, default_length, default_sample_description_index, entries })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::InvalidData("sgpd with no entries"));
        }
        let entry_count = u32::try_from(self.entries.len())
            .map_err(|_| Error::InvalidData("too many sgpd entries"))?;
        let version = if self.default_sample_description_index != 0 { 2 } else { 1 };
        if version == 2 {
            if self.default_length != 0 {
                return Err(Error::InvalidData(
                    "sgpd cannot carry both a default length and a description index",
                ));
            }
            if !SampleGroupEntry::is_self_delimiting(self.grouping_type) {
                return Err(Error::InvalidData("sgpd entries need length prefixes"));
            }
        }
        let mark = w.open_full_box(BoxType::SampleGroupDescriptionBox, version, 0)?;
        w.write_fourcc(self.grouping_type)?;
        if version == 1 {
            w.write_u32(self.default_length)?;
        } else {
            w.write_u32(self.default_sample_description_index)?;
        }
        w.write_u32(entry_count)?;
        for entry in &self.entries {
            if version == 1 {
                let size = entry.size();
                if self.default_length == 0 {
                    w.write_u32(u32::try_from(size)?)?;
                } else if size != u64::from(self.default_length) {
                    return Err(Error::InvalidData("entry length differs from sgpd default length"));
                }
            }
            entry.write_entry(w)?;
        }
        w.close_box(mark)
    }

    pub fn to_bytes(&self) -> Result<TryVec<u8>> {
        let mut w = BoxWriter::new();
        self.write(&mut w)?;
        Ok(w.into_vec())
    }
}
