//! The meta box and its item subsystem: infos, locations, references,
//! protection, inline data and payload resolution.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::{Read, Seek, SeekFrom};

use bitreader::BitReader;
use byteorder::ReadBytesExt;
use enough::{Stop, Unstoppable};
use fallible_collections::TryClone;
use log::warn;

use crate::boxes::{BoxType, FourCC};
use crate::groups::{EntityToGroupBox, GroupsListBox};
use crate::properties::{ItemPropertiesBox, ItemProperty};
use crate::writer::BoxWriter;
use crate::{
    be_u16, be_u32, be_u64, check_parser_state, read_buf, read_fullbox_extra,
    read_fullbox_version_no_flags, read_zero_terminated, skip, skip_box_content, skip_box_remain,
    BMFFBox, BoxIter, DecodeConfig, Error, ParseOptions, ResourceTracker, Result, ToU64,
    TryString, TryVec,
};

/// Items may be assembled from other items ('iloc' construction method
/// 2), which recurses. Bound the nesting so a hostile file cannot blow
/// the stack.
const MAX_CONSTRUCTION_DEPTH: usize = 16;

/// Handler box 'hdlr'. Only the handler type and name survive in the
/// model; the pre-defined and reserved fields are written as zero.
/// See ISO 14496-12:2015 § 8.4.3
#[derive(Debug, PartialEq)]
pub struct HandlerBox {
    pub handler_type: FourCC,
    pub name: TryString,
}

impl Default for HandlerBox {
    fn default() -> Self {
        Self { handler_type: FourCC::from(*b"pict"), name: TryVec::new() }
    }
}

impl HandlerBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("hdlr version"));
        }
        let _pre_defined = be_u32(src)?;
        let handler_type = FourCC::from(be_u32(src)?);
        skip(src, 12)?;
        let name = read_zero_terminated(src)?;
        // Some muxers pad after the name.
        skip_box_remain(src)?;
        Ok(Self { handler_type, name })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::HandlerBox, 0, 0)?;
        w.write_u32(0)?; // pre_defined
        w.write_fourcc(self.handler_type)?;
        w.write_bytes(&[0; 12])?;
        w.write_zero_terminated(&self.name)?;
        w.close_box(mark)
    }
}

fn read_pitm<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<u32> {
    let version = read_fullbox_version_no_flags(src, options)?;
    match version {
        0 => Ok(be_u16(src)?.into()),
        1 => Ok(be_u32(src)?),
        _ => Err(Error::Unsupported("unhandled pitm version")),
    }
}

fn write_pitm(w: &mut BoxWriter, item_id: u32) -> Result<()> {
    let version = if item_id > u16::MAX.into() { 1 } else { 0 };
    let mark = w.open_full_box(BoxType::PrimaryItemBox, version, 0)?;
    if version == 0 {
        w.write_u16(item_id as u16)?;
    } else {
        w.write_u32(item_id)?;
    }
    w.close_box(mark)
}

/// File delivery metadata attached to a version 1 'infe' entry under
/// the "fdel" extension type.
#[derive(Debug, Default, PartialEq)]
pub struct FdItemInfoExtension {
    pub content_location: TryString,
    pub content_md5: TryString,
    pub content_length: u64,
    pub transfer_length: u64,
    pub group_ids: TryVec<u32>,
}

impl FdItemInfoExtension {
    fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let content_location = read_zero_terminated(src)?;
        let content_md5 = read_zero_terminated(src)?;
        let content_length = be_u64(src)?;
        let transfer_length = be_u64(src)?;
        let entry_count = src.read_u8()?;
        let mut group_ids = TryVec::with_capacity(entry_count.into())?;
        for _ in 0..entry_count {
            group_ids.push(be_u32(src)?)?;
        }
        Ok(Self { content_location, content_md5, content_length, transfer_length, group_ids })
    }

    fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let entry_count = u8::try_from(self.group_ids.len())
            .map_err(|_| Error::InvalidData("too many fd group ids"))?;
        w.write_zero_terminated(&self.content_location)?;
        w.write_zero_terminated(&self.content_md5)?;
        w.write_u64(self.content_length)?;
        w.write_u64(self.transfer_length)?;
        w.write_u8(entry_count)?;
        for &id in &self.group_ids {
            w.write_u32(id)?;
        }
        Ok(())
    }
}

/// Item info entry 'infe'.
///
/// The entry version is not stored: writing picks the lowest version
/// that can carry the data. Entries with an item type become version 2
/// (or 3 for 32-bit ids); entries without one are written as legacy
/// version 0, or 1 when an [`FdItemInfoExtension`] is attached. Flag
/// bit 0 marks the item hidden.
/// See ISO 14496-12:2015 § 8.11.6
#[derive(Debug, Default, PartialEq)]
pub struct ItemInfoEntry {
    pub item_id: u32,
    pub item_protection_index: u16,
    /// `None` for legacy version 0/1 entries, which carry no item type.
    pub item_type: Option<FourCC>,
    pub item_name: TryString,
    /// Only meaningful with item type "mime".
    pub content_type: TryString,
    pub content_encoding: TryString,
    /// Only meaningful with item type "uri ".
    pub item_uri_type: TryString,
    pub extension: Option<FdItemInfoExtension>,
    pub hidden: bool,
}

impl ItemInfoEntry {
    pub fn new(item_id: u32, item_type: FourCC) -> Self {
        Self { item_id, item_type: Some(item_type), ..Self::default() }
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let (version, flags) = read_fullbox_extra(src)?;
        let mut entry = Self { hidden: flags & 1 == 1, ..Self::default() };
        match version {
            0 | 1 => {
                entry.item_id = be_u16(src)?.into();
                entry.item_protection_index = be_u16(src)?;
                entry.item_name = read_zero_terminated(src)?;
                entry.content_type = read_zero_terminated(src)?;
                entry.content_encoding = read_zero_terminated(src)?;
                if version == 1 && src.bytes_left() > 0 {
                    let extension_type = FourCC::from(be_u32(src)?);
                    if extension_type == b"fdel" {
                        entry.extension = Some(FdItemInfoExtension::parse(src)?);
                    } else {
                        warn!("infe: skipping unknown extension type {extension_type:?}");
                        skip_box_remain(src)?;
                    }
                }
            },
            2 | 3 => {
                entry.item_id = if version == 2 { be_u16(src)?.into() } else { be_u32(src)? };
                entry.item_protection_index = be_u16(src)?;
                let item_type = FourCC::from(be_u32(src)?);
                entry.item_name = read_zero_terminated(src)?;
                if item_type == b"mime" {
                    entry.content_type = read_zero_terminated(src)?;
                    if src.bytes_left() > 0 {
                        entry.content_encoding = read_zero_terminated(src)?;
                    }
                } else if item_type == b"uri " {
                    entry.item_uri_type = read_zero_terminated(src)?;
                }
                entry.item_type = Some(item_type);
            },
            _ => return Err(Error::Unsupported("infe version")),
        }
        Ok(entry)
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let flags = u32::from(self.hidden);
        match self.item_type {
            None => {
                let id = u16::try_from(self.item_id)
                    .map_err(|_| Error::InvalidData("item ids above 65535 need a typed entry"))?;
                let version = if self.extension.is_some() { 1 } else { 0 };
                let mark = w.open_full_box(BoxType::ItemInfoEntry, version, flags)?;
                w.write_u16(id)?;
                w.write_u16(self.item_protection_index)?;
                w.write_zero_terminated(&self.item_name)?;
                w.write_zero_terminated(&self.content_type)?;
                w.write_zero_terminated(&self.content_encoding)?;
                if let Some(extension) = &self.extension {
                    w.write_fourcc(FourCC::from(*b"fdel"))?;
                    extension.write(w)?;
                }
                w.close_box(mark)
            },
            Some(item_type) => {
                if self.extension.is_some() {
                    return Err(Error::InvalidData("fd item extension needs a version 1 entry"));
                }
                if item_type != b"mime"
                    && (!self.content_type.is_empty() || !self.content_encoding.is_empty())
                {
                    return Err(Error::InvalidData("content type fields need item type 'mime'"));
                }
                if item_type != b"uri " && !self.item_uri_type.is_empty() {
                    return Err(Error::InvalidData("item uri type needs item type 'uri '"));
                }
                let version = if self.item_id > u16::MAX.into() { 3 } else { 2 };
                let mark = w.open_full_box(BoxType::ItemInfoEntry, version, flags)?;
                if version == 2 {
                    w.write_u16(self.item_id as u16)?;
                } else {
                    w.write_u32(self.item_id)?;
                }
                w.write_u16(self.item_protection_index)?;
                w.write_fourcc(item_type)?;
                w.write_zero_terminated(&self.item_name)?;
                if item_type == b"mime" {
                    w.write_zero_terminated(&self.content_type)?;
                    if !self.content_encoding.is_empty() {
                        w.write_zero_terminated(&self.content_encoding)?;
                    }
                } else if item_type == b"uri " {
                    w.write_zero_terminated(&self.item_uri_type)?;
                }
                w.close_box(mark)
            },
        }
    }
}

/// Item info box 'iinf'.
/// See ISO 14496-12:2015 § 8.11.6
#[derive(Debug, Default, PartialEq)]
pub struct ItemInfoBox {
    entries: TryVec<ItemInfoEntry>,
}

impl ItemInfoBox {
    pub fn entries(&self) -> &[ItemInfoEntry] {
        &self.entries
    }

    pub fn entry_by_id(&self, item_id: u32) -> Option<&ItemInfoEntry> {
        self.entries.iter().find(|e| e.item_id == item_id)
    }

    pub(crate) fn entry_by_id_mut(&mut self, item_id: u32) -> Option<&mut ItemInfoEntry> {
        self.entries.iter_mut().find(|e| e.item_id == item_id)
    }

    pub fn item_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|e| e.item_id)
    }

    pub fn add_entry(&mut self, entry: ItemInfoEntry) -> Result<()> {
        if self.entry_by_id(entry.item_id).is_some() {
            return Err(Error::InvalidData("duplicate item id in iinf"));
        }
        self.entries.push(entry)?;
        Ok(())
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        let entry_count = match version {
            0 => be_u16(src)?.into(),
            1 => be_u32(src)?,
            _ => return Err(Error::Unsupported("iinf version")),
        };
        // The smallest infe is well over 4 bytes, so this bounds the
        // allocation without being exact.
        if u64::from(entry_count) > src.bytes_left().saturating_add(3) / 4 {
            return Err(Error::InvalidData("iinf entry count exceeds box size"));
        }
        let mut entries = TryVec::with_capacity(entry_count.try_into()?)?;
        let mut iter = src.box_iter();
        for _ in 0..entry_count {
            let mut b = iter
                .next_box()?
                .ok_or(Error::InvalidData("iinf entry count exceeds box content"))?;
            if b.head.name != BoxType::ItemInfoEntry {
                return Err(Error::InvalidData("iinf box should contain only infe boxes"));
            }
            entries.push(ItemInfoEntry::parse(&mut b)?)?;
            check_parser_state(&b.head, &b.content)?;
        }
        Ok(Self { entries })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark;
        if self.entries.len() > usize::from(u16::MAX) {
            let entry_count = u32::try_from(self.entries.len())
                .map_err(|_| Error::InvalidData("too many iinf entries"))?;
            mark = w.open_full_box(BoxType::ItemInfoBox, 1, 0)?;
            w.write_u32(entry_count)?;
        } else {
            mark = w.open_full_box(BoxType::ItemInfoBox, 0, 0)?;
            w.write_u16(self.entries.len() as u16)?;
        }
        for entry in &self.entries {
            entry.write(w)?;
        }
        w.close_box(mark)
    }
}

/// Width of one 'iloc' offset, length, base offset or index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlocFieldSize {
    Zero,
    Four,
    Eight,
}

impl IlocFieldSize {
    const fn to_bits(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::Four => 32,
            Self::Eight => 64,
        }
    }
}

impl TryFrom<u8> for IlocFieldSize {
    type Error = Error;

    fn try_from(size: u8) -> Result<Self> {
        match size {
            0 => Ok(Self::Zero),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            _ => Err(Error::InvalidData("value must be in the set {0, 4, 8}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IlocVersion {
    Zero,
    One,
    Two,
}

impl TryFrom<u8> for IlocVersion {
    type Error = Error;

    fn try_from(version: u8) -> Result<Self> {
        match version {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(Error::Unsupported("unsupported version in 'iloc' box")),
        }
    }
}

impl From<IlocVersion> for u8 {
    fn from(version: IlocVersion) -> Self {
        match version {
            IlocVersion::Zero => 0,
            IlocVersion::One => 1,
            IlocVersion::Two => 2,
        }
    }
}

/// Where an item's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstructionMethod {
    /// Offsets into the enclosing stream.
    #[default]
    File,
    /// Offsets into the meta box's own 'idat' payload.
    Idat,
    /// Offsets into the payload of other items, found through "iloc"
    /// typed references.
    Item,
}

impl ConstructionMethod {
    const fn code(self) -> u8 {
        match self {
            Self::File => 0,
            Self::Idat => 1,
            Self::Item => 2,
        }
    }
}

/// One extent of an item. For [`ConstructionMethod::Item`] a `length`
/// of 0 takes the whole referenced item; `index` is only meaningful
/// for that method and needs a non-zero index size to be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemLocationExtent {
    pub index: u64,
    pub offset: u64,
    pub length: u64,
}

/// Location of one item's payload.
#[derive(Debug, PartialEq, Default)]
pub struct ItemLocation {
    pub item_id: u32,
    pub construction_method: ConstructionMethod,
    /// 1-based index into the 'dref' box, 0 for this stream.
    pub data_reference_index: u16,
    pub base_offset: u64,
    pub extents: TryVec<ItemLocationExtent>,
}

/// Item location box 'iloc'.
///
/// Offsets, lengths, base offsets and extent indexes are encoded at a
/// box-wide width of 0, 4 or 8 bytes each. The box version is derived
/// while writing: 0 when every location uses the file method and ids
/// fit in 16 bits, 1 when a construction method or extent index needs
/// encoding, 2 when an id or the item count needs 32 bits.
/// See ISO 14496-12:2015 § 8.11.3
#[derive(Debug, PartialEq)]
pub struct ItemLocationBox {
    offset_size: IlocFieldSize,
    length_size: IlocFieldSize,
    base_offset_size: IlocFieldSize,
    index_size: IlocFieldSize,
    locations: TryVec<ItemLocation>,
}

impl Default for ItemLocationBox {
    fn default() -> Self {
        Self {
            offset_size: IlocFieldSize::Four,
            length_size: IlocFieldSize::Four,
            base_offset_size: IlocFieldSize::Four,
            index_size: IlocFieldSize::Zero,
            locations: TryVec::new(),
        }
    }
}

impl ItemLocationBox {
    pub fn locations(&self) -> &[ItemLocation] {
        &self.locations
    }

    pub fn location(&self, item_id: u32) -> Option<&ItemLocation> {
        self.locations.iter().find(|l| l.item_id == item_id)
    }

    pub(crate) fn location_mut(&mut self, item_id: u32) -> Option<&mut ItemLocation> {
        self.locations.iter_mut().find(|l| l.item_id == item_id)
    }

    pub fn index_size(&self) -> IlocFieldSize {
        self.index_size
    }

    /// Set the field widths, each one of 0, 4 or 8 bytes.
    pub fn set_sizes(&mut self, offset: u8, length: u8, base_offset: u8, index: u8) -> Result<()> {
        self.offset_size = offset.try_into()?;
        self.length_size = length.try_into()?;
        self.base_offset_size = base_offset.try_into()?;
        self.index_size = index.try_into()?;
        Ok(())
    }

    pub fn add_location(&mut self, location: ItemLocation) -> Result<()> {
        if self.location(location.item_id).is_some() {
            return Err(Error::InvalidData("duplicate item_ID in iloc"));
        }
        self.locations.push(location)?;
        Ok(())
    }

    fn version(&self) -> IlocVersion {
        let needs_32 = self.locations.len() > usize::from(u16::MAX)
            || self.locations.iter().any(|l| l.item_id > u16::MAX.into());
        if needs_32 {
            IlocVersion::Two
        } else if self.index_size != IlocFieldSize::Zero
            || self
                .locations
                .iter()
                .any(|l| l.construction_method != ConstructionMethod::File)
        {
            IlocVersion::One
        } else {
            IlocVersion::Zero
        }
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version: IlocVersion = read_fullbox_version_no_flags(src, options)?.try_into()?;
        let iloc = src.read_into_try_vec()?;
        let mut iloc = BitReader::new(&iloc);

        let offset_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;
        let length_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;
        let base_offset_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;

        let index_size = match version {
            IlocVersion::One | IlocVersion::Two => iloc.read_u8(4)?.try_into()?,
            IlocVersion::Zero => {
                let _reserved = iloc.read_u8(4)?;
                IlocFieldSize::Zero
            },
        };

        let item_count = match version {
            IlocVersion::Zero | IlocVersion::One => iloc.read_u32(16)?,
            IlocVersion::Two => iloc.read_u32(32)?,
        };

        let mut locations = TryVec::new();
        for _ in 0..item_count {
            let item_id = match version {
                IlocVersion::Zero | IlocVersion::One => iloc.read_u32(16)?,
                IlocVersion::Two => iloc.read_u32(32)?,
            };
            if locations.iter().any(|l: &ItemLocation| l.item_id == item_id) {
                return Err(Error::InvalidData(
                    "duplicate item_ID in iloc per ISO 14496-12:2015 § 8.11.3.1",
                ));
            }

            let construction_method = match version {
                IlocVersion::Zero => ConstructionMethod::File,
                IlocVersion::One | IlocVersion::Two => {
                    let _reserved = iloc.read_u16(12)?;
                    match iloc.read_u8(4)? {
                        0 => ConstructionMethod::File,
                        1 => ConstructionMethod::Idat,
                        2 => ConstructionMethod::Item,
                        _ => return Err(Error::Unsupported("construction method")),
                    }
                },
            };

            let data_reference_index = iloc.read_u16(16)?;
            let base_offset = iloc.read_u64(base_offset_size.to_bits())?;
            let extent_count = iloc.read_u16(16)?;
            let mut extents = TryVec::with_capacity(extent_count.into())?;
            for _ in 0..extent_count {
                let index = match version {
                    IlocVersion::Zero => 0,
                    IlocVersion::One | IlocVersion::Two => iloc.read_u64(index_size.to_bits())?,
                };
                let offset = iloc.read_u64(offset_size.to_bits())?;
                let length = iloc.read_u64(length_size.to_bits())?;
                extents.push(ItemLocationExtent { index, offset, length })?;
            }

            locations.push(ItemLocation {
                item_id,
                construction_method,
                data_reference_index,
                base_offset,
                extents,
            })?;
        }

        if iloc.remaining() != 0 {
            return Err(Error::InvalidData("invalid iloc size"));
        }

        Ok(Self { offset_size, length_size, base_offset_size, index_size, locations })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let version = self.version();
        let mark = w.open_full_box(BoxType::ItemLocationBox, version.into(), 0)?;
        w.write_bits(u64::from(self.offset_size.to_bits() / 8), 4)?;
        w.write_bits(u64::from(self.length_size.to_bits() / 8), 4)?;
        w.write_bits(u64::from(self.base_offset_size.to_bits() / 8), 4)?;
        match version {
            IlocVersion::Zero => w.write_bits(0, 4)?, // reserved
            IlocVersion::One | IlocVersion::Two => {
                w.write_bits(u64::from(self.index_size.to_bits() / 8), 4)?;
            },
        }
        match version {
            IlocVersion::Zero | IlocVersion::One => w.write_u16(u16::try_from(self.locations.len())?)?,
            IlocVersion::Two => w.write_u32(u32::try_from(self.locations.len())?)?,
        }

        for loc in &self.locations {
            match version {
                IlocVersion::Zero | IlocVersion::One => w.write_u16(u16::try_from(loc.item_id)?)?,
                IlocVersion::Two => w.write_u32(loc.item_id)?,
            }
            if version != IlocVersion::Zero {
                w.write_bits(0, 12)?; // reserved
                w.write_bits(loc.construction_method.code().into(), 4)?;
            }
            w.write_u16(loc.data_reference_index)?;
            write_sized(w, self.base_offset_size, loc.base_offset, "iloc base_offset does not fit its configured size")?;
            let extent_count = u16::try_from(loc.extents.len())
                .map_err(|_| Error::InvalidData("too many extents for one item"))?;
            w.write_u16(extent_count)?;
            for extent in &loc.extents {
                if version != IlocVersion::Zero && self.index_size != IlocFieldSize::Zero {
                    write_sized(w, self.index_size, extent.index, "iloc extent_index does not fit its configured size")?;
                } else if extent.index != 0 {
                    return Err(Error::InvalidData("iloc extent_index needs a non-zero index_size"));
                }
                write_sized(w, self.offset_size, extent.offset, "iloc extent_offset does not fit its configured size")?;
                write_sized(w, self.length_size, extent.length, "iloc extent_length does not fit its configured size")?;
            }
        }
        w.close_box(mark)
    }
}

fn write_sized(w: &mut BoxWriter, size: IlocFieldSize, value: u64, too_wide: &'static str) -> Result<()> {
    match size {
        IlocFieldSize::Zero => {
            if value != 0 {
                return Err(Error::InvalidData(too_wide));
            }
            Ok(())
        },
        IlocFieldSize::Four => {
            if value > u32::MAX.into() {
                return Err(Error::InvalidData(too_wide));
            }
            w.write_u32(value as u32)
        },
        IlocFieldSize::Eight => w.write_u64(value),
    }
}

/// References of one type from one item to others, e.g. "thmb" from a
/// thumbnail to its master image.
#[derive(Debug, PartialEq)]
pub struct SingleItemTypeReferenceBox {
    pub reference_type: FourCC,
    pub from_item_id: u32,
    pub to_item_ids: TryVec<u32>,
}

/// Item reference box 'iref'. References with the same type and from
/// item merge into one record, preserving to-id order. The version is
/// derived while writing: 1 as soon as any id needs more than 16 bits.
/// See ISO 14496-12:2015 § 8.11.12
#[derive(Debug, Default, PartialEq)]
pub struct ItemReferenceBox {
    references: TryVec<SingleItemTypeReferenceBox>,
}

impl ItemReferenceBox {
    pub fn references(&self) -> &[SingleItemTypeReferenceBox] {
        &self.references
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn add(&mut self, reference_type: FourCC, from_item_id: u32, to_item_id: u32) -> Result<()> {
        self.record_mut(reference_type, from_item_id)?.to_item_ids.push(to_item_id)?;
        Ok(())
    }

    /// Ids referenced from `from_item_id` under `reference_type`, in
    /// declared order. Empty when there is no such record.
    pub fn to_item_ids(&self, reference_type: FourCC, from_item_id: u32) -> &[u32] {
        self.references
            .iter()
            .find(|r| r.reference_type == reference_type && r.from_item_id == from_item_id)
            .map_or(&[], |r| &r.to_item_ids)
    }

    pub fn references_from(&self, item_id: u32) -> impl Iterator<Item = &SingleItemTypeReferenceBox> {
        self.references.iter().filter(move |r| r.from_item_id == item_id)
    }

    fn record_mut(
        &mut self,
        reference_type: FourCC,
        from_item_id: u32,
    ) -> Result<&mut SingleItemTypeReferenceBox> {
        if let Some(pos) = self
            .references
            .iter()
            .position(|r| r.reference_type == reference_type && r.from_item_id == from_item_id)
        {
            Ok(&mut self.references[pos])
        } else {
            self.references.push(SingleItemTypeReferenceBox {
                reference_type,
                from_item_id,
                to_item_ids: TryVec::new(),
            })?;
            let last = self.references.len() - 1;
            Ok(&mut self.references[last])
        }
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version > 1 {
            return Err(Error::Unsupported("iref version"));
        }
        let mut iref = Self::default();
        let mut iter = src.box_iter();
        while let Some(mut b) = iter.next_box()? {
            let reference_type = FourCC::from(b.head.name);
            let from_item_id = if version == 0 { be_u16(&mut b)?.into() } else { be_u32(&mut b)? };
            let reference_count = be_u16(&mut b)?;
            let record = iref.record_mut(reference_type, from_item_id)?;
            for _ in 0..reference_count {
                let to_item_id = if version == 0 { be_u16(&mut b)?.into() } else { be_u32(&mut b)? };
                record.to_item_ids.push(to_item_id)?;
            }
            check_parser_state(&b.head, &b.content)?;
        }
        Ok(iref)
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let wide = self.references.iter().any(|r| {
            r.from_item_id > u16::MAX.into() || r.to_item_ids.iter().any(|&id| id > u16::MAX.into())
        });
        let version = u8::from(wide);
        let mark = w.open_full_box(BoxType::ItemReferenceBox, version, 0)?;
        for record in &self.references {
            let child = w.open_box(BoxType::from(record.reference_type))?;
            if version == 0 {
                w.write_u16(record.from_item_id as u16)?;
            } else {
                w.write_u32(record.from_item_id)?;
            }
            let reference_count = u16::try_from(record.to_item_ids.len())
                .map_err(|_| Error::InvalidData("too many references in one record"))?;
            w.write_u16(reference_count)?;
            for &to_item_id in &record.to_item_ids {
                if version == 0 {
                    w.write_u16(to_item_id as u16)?;
                } else {
                    w.write_u32(to_item_id)?;
                }
            }
            w.close_box(child)?;
        }
        w.close_box(mark)
    }
}

/// Item data box 'idat': payload bytes stored inside the meta box
/// itself, addressed by [`ConstructionMethod::Idat`] extents.
/// See ISO 14496-12:2015 § 8.11.11
#[derive(Debug, Default, PartialEq)]
pub struct ItemDataBox {
    data: TryVec<u8>,
}

impl ItemDataBox {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append `data` and return the offset it starts at.
    pub fn add_data(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.data.len().to_u64();
        self.data.extend_from_slice(data)?;
        Ok(offset)
    }

    /// Bounds-checked view of `length` bytes at `offset`.
    pub fn get(&self, offset: u64, length: u64) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(length).ok()?)?;
        self.data.get(start..end)
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        Ok(Self { data: src.read_into_try_vec()? })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::ItemDataBox)?;
        w.write_bytes(&self.data)?;
        w.close_box(mark)
    }
}

/// One protection scheme, kept as the raw 'sinf' payload.
#[derive(Debug, Default, PartialEq)]
pub struct ProtectionSchemeInfoBox {
    pub data: TryVec<u8>,
}

/// Item protection box 'ipro'. Scheme contents are opaque to this
/// crate; 'infe' protection indexes are 1-based into this list.
/// See ISO 14496-12:2015 § 8.11.5
#[derive(Debug, Default, PartialEq)]
pub struct ItemProtectionBox {
    schemes: TryVec<ProtectionSchemeInfoBox>,
}

impl ItemProtectionBox {
    pub fn schemes(&self) -> &[ProtectionSchemeInfoBox] {
        &self.schemes
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }

    /// Add a scheme and return its 1-based protection index.
    pub fn add(&mut self, scheme: ProtectionSchemeInfoBox) -> Result<u16> {
        if self.schemes.len() >= usize::from(u16::MAX) {
            return Err(Error::InvalidData("too many protection schemes"));
        }
        self.schemes.push(scheme)?;
        Ok(self.schemes.len() as u16)
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("ipro version"));
        }
        let protection_count = be_u16(src)?;
        let mut schemes = TryVec::new();
        let mut iter = src.box_iter();
        for _ in 0..protection_count {
            let mut b = iter
                .next_box()?
                .ok_or(Error::InvalidData("ipro protection count exceeds box content"))?;
            if b.head.name != BoxType::ProtectionSchemeInfoBox {
                return Err(Error::InvalidData("ipro should contain only sinf boxes"));
            }
            schemes.push(ProtectionSchemeInfoBox { data: b.read_into_try_vec()? })?;
            check_parser_state(&b.head, &b.content)?;
        }
        Ok(Self { schemes })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let protection_count = u16::try_from(self.schemes.len())
            .map_err(|_| Error::InvalidData("too many protection schemes"))?;
        let mark = w.open_full_box(BoxType::ItemProtectionBox, 0, 0)?;
        w.write_u16(protection_count)?;
        for scheme in &self.schemes {
            let child = w.open_box(BoxType::ProtectionSchemeInfoBox)?;
            w.write_bytes(&scheme.data)?;
            w.close_box(child)?;
        }
        w.close_box(mark)
    }
}

/// One 'dref' entry. Flag bit 0 means the data is in this stream and
/// no location string is present.
/// See ISO 14496-12:2015 § 8.7.2
#[derive(Debug, PartialEq)]
pub enum DataEntryBox {
    Url { flags: u32, location: TryString },
    Urn { flags: u32, name: TryString, location: TryString },
}

impl DataEntryBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let (version, flags) = read_fullbox_extra(src)?;
        if version != 0 {
            return Err(Error::Unsupported("data entry version"));
        }
        match src.head.name {
            BoxType::DataEntryUrlBox => {
                let location = if flags & 1 == 1 { TryVec::new() } else { read_zero_terminated(src)? };
                Ok(Self::Url { flags, location })
            },
            BoxType::DataEntryUrnBox => {
                let name = read_zero_terminated(src)?;
                let location = if src.bytes_left() > 0 { read_zero_terminated(src)? } else { TryVec::new() };
                Ok(Self::Urn { flags, name, location })
            },
            _ => Err(Error::InvalidData("dref should contain only url and urn boxes")),
        }
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        match self {
            Self::Url { flags, location } => {
                let mark = w.open_full_box(BoxType::DataEntryUrlBox, 0, *flags)?;
                if flags & 1 == 0 {
                    w.write_zero_terminated(location)?;
                }
                w.close_box(mark)
            },
            Self::Urn { flags, name, location } => {
                let mark = w.open_full_box(BoxType::DataEntryUrnBox, 0, *flags)?;
                w.write_zero_terminated(name)?;
                if !location.is_empty() {
                    w.write_zero_terminated(location)?;
                }
                w.close_box(mark)
            },
        }
    }
}

/// Data reference box 'dref'.
#[derive(Debug, Default, PartialEq)]
pub struct DataReferenceBox {
    pub entries: TryVec<DataEntryBox>,
}

impl DataReferenceBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("dref version"));
        }
        let entry_count = be_u32(src)?;
        if u64::from(entry_count) * 12 > src.bytes_left() {
            return Err(Error::InvalidData("dref entry count exceeds box size"));
        }
        let mut entries = TryVec::with_capacity(entry_count.try_into()?)?;
        let mut iter = src.box_iter();
        for _ in 0..entry_count {
            let mut b = iter
                .next_box()?
                .ok_or(Error::InvalidData("dref entry count exceeds box content"))?;
            entries.push(DataEntryBox::parse(&mut b)?)?;
            check_parser_state(&b.head, &b.content)?;
        }
        Ok(Self { entries })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let entry_count = u32::try_from(self.entries.len())
            .map_err(|_| Error::InvalidData("too many dref entries"))?;
        let mark = w.open_full_box(BoxType::DataReferenceBox, 0, 0)?;
        w.write_u32(entry_count)?;
        for entry in &self.entries {
            entry.write(w)?;
        }
        w.close_box(mark)
    }
}

/// Data information box 'dinf'.
#[derive(Debug, Default, PartialEq)]
pub struct DataInformationBox {
    pub data_reference: DataReferenceBox,
}

impl DataInformationBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let mut data_reference = None;
        let mut iter = src.box_iter();
        while let Some(mut b) = iter.next_box()? {
            match b.head.name {
                BoxType::DataReferenceBox => {
                    if data_reference.is_some() {
                        return Err(Error::InvalidData("duplicate dref box"));
                    }
                    data_reference = Some(DataReferenceBox::parse(&mut b, options)?);
                },
                _ => skip_box_content(&mut b)?,
            }
            check_parser_state(&b.head, &b.content)?;
        }
        Ok(Self { data_reference: data_reference.unwrap_or_default() })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::DataInformationBox)?;
        self.data_reference.write(w)?;
        w.close_box(mark)
    }
}

/// Meta box 'meta': the container tying the item subsystem together.
///
/// Parsing accepts child boxes in any order; writing emits them in the
/// order hdlr, pitm, iloc, ipro, iinf, iref, idat, iprp, grpl, with
/// the optional ones left out while empty.
///
/// ```
/// use zenbmff::{FourCC, MetaBox};
///
/// let mut meta = MetaBox::default();
/// meta.add_idat_item(1, FourCC::from(*b"mime"), b"doc", b"hello")?;
/// meta.set_primary_item(1);
/// let bytes = meta.to_bytes()?;
/// let reparsed = MetaBox::from_bytes(&bytes)?;
/// assert_eq!(reparsed.primary_item_id(), Some(1));
/// # Ok::<(), zenbmff::Error>(())
/// ```
/// See ISO 14496-12:2015 § 8.11.1
#[derive(Debug, Default, PartialEq)]
pub struct MetaBox {
    handler: HandlerBox,
    primary_item: Option<u32>,
    item_locations: ItemLocationBox,
    item_protections: ItemProtectionBox,
    item_infos: ItemInfoBox,
    item_references: ItemReferenceBox,
    item_data: ItemDataBox,
    item_properties: ItemPropertiesBox,
    groups_list: GroupsListBox,
    data_information: DataInformationBox,
}

impl MetaBox {
    /// Parse the single meta box out of a stream of top-level boxes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_bytes_with_config(data, &DecodeConfig::default(), &Unstoppable)
    }

    /// Parse with resource limits and a cancellation hook.
    pub fn from_bytes_with_config(data: &[u8], config: &DecodeConfig, stop: &dyn Stop) -> Result<Self> {
        let options = ParseOptions { lenient: config.lenient };
        let mut tracker = ResourceTracker::new(config);
        let mut reader = data;
        let mut iter = BoxIter::new(&mut reader);

        let mut meta = None;
        while let Some(mut b) = iter.next_box()? {
            stop.check()?;
            match b.head.name {
                BoxType::MetadataBox => {
                    if meta.is_some() {
                        return Err(Error::InvalidData(
                            "There should be zero or one meta boxes per ISO 14496-12:2015 § 8.11.1.1",
                        ));
                    }
                    meta = Some(Self::parse(&mut b, &options, &mut tracker)?);
                },
                _ => skip_box_content(&mut b)?,
            }
            check_parser_state(&b.head, &b.content)?;
        }

        let meta = meta.ok_or(Error::InvalidData("missing meta box"))?;
        let items = meta.item_infos.entries().len().max(meta.item_locations.locations().len());
        tracker.validate_item_count(u32::try_from(items)?)?;
        Ok(meta)
    }

    pub(crate) fn parse<T: Read>(
        src: &mut BMFFBox<'_, T>,
        options: &ParseOptions,
        tracker: &mut ResourceTracker<'_>,
    ) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("meta version"));
        }

        let mut handler = None;
        let mut primary_item = None;
        let mut item_locations = None;
        let mut item_protections = None;
        let mut item_infos = None;
        let mut item_references = None;
        let mut item_data = None;
        let mut item_properties = None;
        let mut groups_list = None;
        let mut data_information = None;

        let mut iter = src.box_iter();
        while let Some(mut b) = iter.next_box()? {
            match b.head.name {
                BoxType::HandlerBox => {
                    if handler.is_some() {
                        return Err(Error::InvalidData("duplicate hdlr box"));
                    }
                    handler = Some(HandlerBox::parse(&mut b, options)?);
                },
                BoxType::PrimaryItemBox => {
                    if primary_item.is_some() {
                        return Err(Error::InvalidData(
                            "There should be zero or one pitm boxes per ISO 14496-12:2015 § 8.11.4.1",
                        ));
                    }
                    primary_item = Some(read_pitm(&mut b, options)?);
                },
                BoxType::ItemLocationBox => {
                    if item_locations.is_some() {
                        return Err(Error::InvalidData("duplicate iloc box"));
                    }
                    item_locations = Some(ItemLocationBox::parse(&mut b, options)?);
                },
                BoxType::ItemProtectionBox => {
                    if item_protections.is_some() {
                        return Err(Error::InvalidData("duplicate ipro box"));
                    }
                    item_protections = Some(ItemProtectionBox::parse(&mut b, options)?);
                },
                BoxType::ItemInfoBox => {
                    if item_infos.is_some() {
                        return Err(Error::InvalidData("duplicate iinf box"));
                    }
                    item_infos = Some(ItemInfoBox::parse(&mut b, options)?);
                },
                BoxType::ItemReferenceBox => {
                    if item_references.is_some() {
                        return Err(Error::InvalidData("duplicate iref box"));
                    }
                    item_references = Some(ItemReferenceBox::parse(&mut b, options)?);
                },
                BoxType::ItemDataBox => {
                    if item_data.is_some() {
                        return Err(Error::InvalidData("duplicate idat box"));
                    }
                    let size = b.bytes_left();
                    tracker.reserve(size)?;
                    item_data = Some(ItemDataBox::parse(&mut b)?);
                    tracker.release(size);
                },
                BoxType::ItemPropertiesBox => {
                    if item_properties.is_some() {
                        return Err(Error::InvalidData("duplicate iprp box"));
                    }
                    item_properties = Some(ItemPropertiesBox::parse(&mut b, options)?);
                },
                BoxType::GroupsListBox => {
                    if groups_list.is_some() {
                        return Err(Error::InvalidData("duplicate grpl box"));
                    }
                    groups_list = Some(GroupsListBox::parse(&mut b)?);
                },
                BoxType::DataInformationBox => {
                    if data_information.is_some() {
                        return Err(Error::InvalidData("duplicate dinf box"));
                    }
                    data_information = Some(DataInformationBox::parse(&mut b, options)?);
                },
                _ => skip_box_content(&mut b)?,
            }
            check_parser_state(&b.head, &b.content)?;
        }

        Ok(Self {
            handler: handler.unwrap_or_default(),
            primary_item,
            item_locations: item_locations.unwrap_or_default(),
            item_protections: item_protections.unwrap_or_default(),
            item_infos: item_infos.unwrap_or_default(),
            item_references: item_references.unwrap_or_default(),
            item_data: item_data.unwrap_or_default(),
            item_properties: item_properties.unwrap_or_default(),
            groups_list: groups_list.unwrap_or_default(),
            data_information: data_information.unwrap_or_default(),
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::MetadataBox, 0, 0)?;
        self.handler.write(w)?;
        if let Some(item_id) = self.primary_item {
            write_pitm(w, item_id)?;
        }
        self.item_locations.write(w)?;
        if !self.item_protections.is_empty() {
            self.item_protections.write(w)?;
        }
        self.item_infos.write(w)?;
        self.item_references.write(w)?;
        if !self.item_data.is_empty() {
            self.item_data.write(w)?;
        }
        self.item_properties.write(w)?;
        if !self.groups_list.is_empty() {
            self.groups_list.write(w)?;
        }
        // dinf is read-only here: nothing in the writing path refers to
        // external data.
        w.close_box(mark)
    }

    /// Serialize the whole meta box.
    pub fn to_bytes(&self) -> Result<TryVec<u8>> {
        let mut w = BoxWriter::new();
        self.write(&mut w)?;
        Ok(w.into_vec())
    }

    pub fn handler(&self) -> &HandlerBox {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut HandlerBox {
        &mut self.handler
    }

    pub fn primary_item_id(&self) -> Option<u32> {
        self.primary_item
    }

    pub fn set_primary_item(&mut self, item_id: u32) {
        self.primary_item = Some(item_id);
    }

    pub fn item_locations(&self) -> &ItemLocationBox {
        &self.item_locations
    }

    pub fn item_locations_mut(&mut self) -> &mut ItemLocationBox {
        &mut self.item_locations
    }

    pub fn item_protections(&self) -> &ItemProtectionBox {
        &self.item_protections
    }

    pub fn item_protections_mut(&mut self) -> &mut ItemProtectionBox {
        &mut self.item_protections
    }

    pub fn item_infos(&self) -> &ItemInfoBox {
        &self.item_infos
    }

    pub fn item_infos_mut(&mut self) -> &mut ItemInfoBox {
        &mut self.item_infos
    }

    pub fn item_references(&self) -> &ItemReferenceBox {
        &self.item_references
    }

    pub fn item_data(&self) -> &ItemDataBox {
        &self.item_data
    }

    pub fn item_properties(&self) -> &ItemPropertiesBox {
        &self.item_properties
    }

    pub fn item_properties_mut(&mut self) -> &mut ItemPropertiesBox {
        &mut self.item_properties
    }

    pub fn groups_list(&self) -> &GroupsListBox {
        &self.groups_list
    }

    pub fn data_information(&self) -> &DataInformationBox {
        &self.data_information
    }

    /// Item type of `item_id`, `None` when the item is unknown or its
    /// entry predates typed entries.
    pub fn item_type(&self, item_id: u32) -> Option<FourCC> {
        self.item_infos.entry_by_id(item_id)?.item_type
    }

    /// Register an item without a location.
    pub fn add_item(&mut self, item_id: u32, item_type: FourCC, item_name: &[u8]) -> Result<()> {
        let mut entry = ItemInfoEntry::new(item_id, item_type);
        entry.item_name.extend_from_slice(item_name)?;
        self.item_infos.add_entry(entry)
    }

    /// Register an item whose payload is stored in the meta box's own
    /// 'idat' box.
    pub fn add_idat_item(
        &mut self,
        item_id: u32,
        item_type: FourCC,
        item_name: &[u8],
        data: &[u8],
    ) -> Result<()> {
        self.add_item(item_id, item_type, item_name)?;
        let offset = self.item_data.add_data(data)?;
        let mut extents = TryVec::new();
        extents.push(ItemLocationExtent { index: 0, offset, length: data.len().to_u64() })?;
        self.item_locations.add_location(ItemLocation {
            item_id,
            construction_method: ConstructionMethod::Idat,
            data_reference_index: 0,
            base_offset: 0,
            extents,
        })
    }

    /// Append a stream extent to `item_id`, creating a file-method
    /// location on first use.
    pub fn add_item_extent(&mut self, item_id: u32, offset: u64, length: u64) -> Result<()> {
        let extent = ItemLocationExtent { index: 0, offset, length };
        if let Some(location) = self.item_locations.location_mut(item_id) {
            location.extents.push(extent)?;
            return Ok(());
        }
        let mut extents = TryVec::new();
        extents.push(extent)?;
        self.item_locations.add_location(ItemLocation {
            item_id,
            construction_method: ConstructionMethod::File,
            data_reference_index: 0,
            base_offset: 0,
            extents,
        })
    }

    /// Set the base offset all of `item_id`'s extents are relative to,
    /// creating a file-method location on first use.
    pub fn set_item_base_offset(&mut self, item_id: u32, base_offset: u64) -> Result<()> {
        if let Some(location) = self.item_locations.location_mut(item_id) {
            location.base_offset = base_offset;
            return Ok(());
        }
        self.item_locations.add_location(ItemLocation {
            item_id,
            construction_method: ConstructionMethod::File,
            data_reference_index: 0,
            base_offset,
            extents: TryVec::new(),
        })
    }

    pub fn add_item_reference(
        &mut self,
        reference_type: FourCC,
        from_item_id: u32,
        to_item_id: u32,
    ) -> Result<()> {
        self.item_references.add(reference_type, from_item_id, to_item_id)
    }

    pub fn add_entity_group(
        &mut self,
        grouping_type: FourCC,
        group_id: u32,
        entity_ids: &[u32],
    ) -> Result<()> {
        let mut ids = TryVec::new();
        ids.extend_from_slice(entity_ids)?;
        self.groups_list.add(EntityToGroupBox { grouping_type, group_id, entity_ids: ids })
    }

    pub fn set_item_hidden(&mut self, item_id: u32, hidden: bool) -> Result<()> {
        let entry = self
            .item_infos
            .entry_by_id_mut(item_id)
            .ok_or(Error::InvalidData("unknown item id"))?;
        entry.hidden = hidden;
        Ok(())
    }

    /// Add a property and associate it with `item_ids`. Returns the
    /// property's 1-based container index.
    pub fn add_property(
        &mut self,
        property: ItemProperty,
        item_ids: &[u32],
        essential: bool,
    ) -> Result<u16> {
        self.item_properties.add_property(property, item_ids, essential)
    }

    /// Associate an existing property index with more items.
    pub fn associate_property(&mut self, index: u16, item_ids: &[u32], essential: bool) -> Result<()> {
        self.item_properties.associate_property(index, item_ids, essential)
    }

    /// Total payload length of `item_id` in bytes, without reading any
    /// payload. `stream_size` bounds file-method extents, so pass the
    /// length of the stream the offsets refer to.
    pub fn item_length(&self, item_id: u32, stream_size: u64) -> Result<u64> {
        self.item_length_impl(item_id, stream_size, &TryVec::new())
    }

    /// Read the full payload of `item_id`, concatenating its extents in
    /// declared order.
    pub fn read_item<S: Read + Seek>(&self, stream: &mut S, item_id: u32) -> Result<TryVec<u8>> {
        let mut out = TryVec::new();
        self.read_item_into(stream, item_id, &mut out)?;
        Ok(out)
    }

    /// Like [`Self::read_item`] but appends to `out`.
    pub fn read_item_into<S: Read + Seek>(
        &self,
        stream: &mut S,
        item_id: u32,
        out: &mut TryVec<u8>,
    ) -> Result<()> {
        let stream_size = stream.seek(SeekFrom::End(0))?;
        self.read_item_impl(stream, item_id, stream_size, &TryVec::new(), out)
    }

    /// Cycle and depth gate for item-constructed payloads. Returns the
    /// visited set for the next recursion level, holding ancestors
    /// only, so sibling extents may reference the same item.
    fn enter_item(&self, item_id: u32, visited: &TryVec<u32>) -> Result<TryVec<u32>> {
        if visited.contains(&item_id) {
            return Err(Error::InvalidData("circular item reference"));
        }
        if visited.len() >= MAX_CONSTRUCTION_DEPTH {
            return Err(Error::ResourceLimitExceeded("item construction depth limit exceeded"));
        }
        let mut visited = visited.try_clone()?;
        visited.push(item_id)?;
        Ok(visited)
    }

    fn location(&self, item_id: u32) -> Result<&ItemLocation> {
        self.item_locations
            .location(item_id)
            .ok_or(Error::InvalidData("item has no location"))
    }

    /// Resolved (start, length) of a file-method extent, checked
    /// against the stream bounds.
    fn file_extent(
        &self,
        loc: &ItemLocation,
        extent: &ItemLocationExtent,
        stream_size: u64,
    ) -> Result<(u64, u64)> {
        if loc.data_reference_index != 0 {
            return Err(Error::Unsupported("external data references"));
        }
        let start = loc
            .base_offset
            .checked_add(extent.offset)
            .ok_or(Error::InvalidData("arithmetic overflow in item location"))?;
        let end = start
            .checked_add(extent.length)
            .ok_or(Error::InvalidData("arithmetic overflow in item location"))?;
        if end > stream_size {
            return Err(Error::InvalidData("extent outside stream"));
        }
        Ok((start, extent.length))
    }

    /// Resolved (start, length) of an idat-method extent.
    fn idat_extent(&self, loc: &ItemLocation, extent: &ItemLocationExtent) -> Result<(u64, u64)> {
        let idat_len = self.item_data.data().len().to_u64();
        let start = loc
            .base_offset
            .checked_add(extent.offset)
            .ok_or(Error::InvalidData("arithmetic overflow in item location"))?;
        let end = start
            .checked_add(extent.length)
            .ok_or(Error::InvalidData("arithmetic overflow in item location"))?;
        if end > idat_len {
            return Err(Error::InvalidData("extent outside idat"));
        }
        Ok((start, extent.length))
    }

    /// The sub-item an item-method extent draws from. With index size 0
    /// every extent draws from the first "iloc" reference; otherwise
    /// the extent's 1-based index picks one.
    fn extent_source_item(&self, loc: &ItemLocation, extent: &ItemLocationExtent) -> Result<u32> {
        let to_ids = self.item_references.to_item_ids(FourCC::from(*b"iloc"), loc.item_id);
        if to_ids.is_empty() {
            return Err(Error::InvalidData("item offset construction needs 'iloc' references"));
        }
        let source_index = if self.item_locations.index_size() == IlocFieldSize::Zero {
            1
        } else {
            extent.index
        };
        let slot = source_index
            .checked_sub(1)
            .ok_or(Error::InvalidData("invalid extent index"))?;
        to_ids
            .get(usize::try_from(slot)?)
            .copied()
            .ok_or(Error::InvalidData("extent references a missing item"))
    }

    /// Length an item-method extent cuts out of a source of
    /// `source_length` bytes. Length 0 takes the whole source; the
    /// base offset plays no part in item-method arithmetic.
    fn cut_length(&self, extent: &ItemLocationExtent, source_length: u64) -> Result<u64> {
        if extent.length == 0 {
            return Ok(source_length);
        }
        let end = extent
            .offset
            .checked_add(extent.length)
            .ok_or(Error::InvalidData("arithmetic overflow in item location"))?;
        if end > source_length {
            return Err(Error::InvalidData("extent outside referenced item"));
        }
        Ok(extent.length)
    }

    fn item_length_impl(&self, item_id: u32, stream_size: u64, visited: &TryVec<u32>) -> Result<u64> {
        let visited = self.enter_item(item_id, visited)?;
        let loc = self.location(item_id)?;
        if loc.extents.is_empty() {
            return Err(Error::InvalidData("item has no extents"));
        }
        let mut total: u64 = 0;
        for extent in &loc.extents {
            let length = match loc.construction_method {
                ConstructionMethod::File => self.file_extent(loc, extent, stream_size)?.1,
                ConstructionMethod::Idat => self.idat_extent(loc, extent)?.1,
                ConstructionMethod::Item => {
                    let sub_item_id = self.extent_source_item(loc, extent)?;
                    let sub_length = self.item_length_impl(sub_item_id, stream_size, &visited)?;
                    self.cut_length(extent, sub_length)?
                },
            };
            total = total
                .checked_add(length)
                .ok_or(Error::InvalidData("item length overflow"))?;
        }
        Ok(total)
    }

    fn read_item_impl<S: Read + Seek>(
        &self,
        stream: &mut S,
        item_id: u32,
        stream_size: u64,
        visited: &TryVec<u32>,
        out: &mut TryVec<u8>,
    ) -> Result<()> {
        let visited = self.enter_item(item_id, visited)?;
        let loc = self.location(item_id)?;
        if loc.extents.is_empty() {
            return Err(Error::InvalidData("item has no extents"));
        }
        for extent in &loc.extents {
            match loc.construction_method {
                ConstructionMethod::File => {
                    let (start, length) = self.file_extent(loc, extent, stream_size)?;
                    stream.seek(SeekFrom::Start(start))?;
                    let chunk = read_buf(stream, length)?;
                    out.extend_from_slice(&chunk)?;
                },
                ConstructionMethod::Idat => {
                    let (start, length) = self.idat_extent(loc, extent)?;
                    let data = self
                        .item_data
                        .get(start, length)
                        .ok_or(Error::InvalidData("extent outside idat"))?;
                    out.extend_from_slice(data)?;
                },
                ConstructionMethod::Item => {
                    let sub_item_id = self.extent_source_item(loc, extent)?;
                    let mut sub = TryVec::new();
                    self.read_item_impl(stream, sub_item_id, stream_size, &visited, &mut sub)?;
                    if extent.length == 0 {
                        out.extend_from_slice(&sub)?;
                        continue;
                    }
                    let start = usize::try_from(extent.offset)?;
                    let end = start
                        .checked_add(usize::try_from(extent.length)?)
                        .ok_or(Error::InvalidData("arithmetic overflow in item location"))?;
                    let cut = sub
                        .get(start..end)
                        .ok_or(Error::InvalidData("extent outside referenced item"))?;
                    out.extend_from_slice(cut)?;
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::ImageSpatialExtentsProperty;
    use std::io::Cursor;

    fn parse_one<T, F>(bytes: &[u8], f: F) -> Result<T>
    where
        F: FnOnce(&mut BMFFBox<'_, &[u8]>, &ParseOptions) -> Result<T>,
    {
        let mut reader = bytes;
        let mut iter = BoxIter::new(&mut reader);
        let mut b = iter.next_box()?.ok_or(Error::UnexpectedEOF)?;
        let v = f(&mut b, &ParseOptions::default())?;
        check_parser_state(&b.head, &b.content)?;
        Ok(v)
    }

    fn written(f: impl FnOnce(&mut BoxWriter) -> Result<()>) -> TryVec<u8> {
        let mut w = BoxWriter::new();
        f(&mut w).unwrap();
        w.into_vec()
    }

    fn string(bytes: &[u8]) -> TryString {
        let mut s = TryVec::new();
        s.extend_from_slice(bytes).unwrap();
        s
    }

    #[test]
    fn iloc_version_0_layout() {
        let mut iloc = ItemLocationBox::default();
        let mut extents = TryVec::new();
        extents.push(ItemLocationExtent { index: 0, offset: 0, length: 50 }).unwrap();
        iloc.add_location(ItemLocation {
            item_id: 5,
            construction_method: ConstructionMethod::File,
            data_reference_index: 0,
            base_offset: 100,
            extents,
        })
        .unwrap();

        let bytes = written(|w| iloc.write(w));
        // 16 fixed bytes plus an 18-byte item record at the default
        // 4/4/4/0 field widths.
        assert_eq!(bytes.len(), 34);
        assert_eq!(bytes[8], 0); // version
        let reparsed = parse_one(&bytes, |b, o| ItemLocationBox::parse(b, o)).unwrap();
        assert_eq!(reparsed, iloc);
        let location = reparsed.location(5).unwrap();
        assert_eq!(location.base_offset, 100);
        assert_eq!(location.extents[0], ItemLocationExtent { index: 0, offset: 0, length: 50 });
    }

    #[test]
    fn iloc_construction_method_promotes_version_1() {
        let mut iloc = ItemLocationBox::default();
        let mut extents = TryVec::new();
        extents.push(ItemLocationExtent { index: 0, offset: 0, length: 5 }).unwrap();
        iloc.add_location(ItemLocation {
            item_id: 9,
            construction_method: ConstructionMethod::Idat,
            data_reference_index: 0,
            base_offset: 0,
            extents,
        })
        .unwrap();

        let bytes = written(|w| iloc.write(w));
        assert_eq!(bytes[8], 1);
        let reparsed = parse_one(&bytes, |b, o| ItemLocationBox::parse(b, o)).unwrap();
        assert_eq!(reparsed.location(9).unwrap().construction_method, ConstructionMethod::Idat);
        assert_eq!(reparsed, iloc);
    }

    #[test]
    fn iloc_large_item_id_promotes_version_2() {
        let mut iloc = ItemLocationBox::default();
        iloc.add_location(ItemLocation { item_id: 70_000, ..ItemLocation::default() }).unwrap();
        let bytes = written(|w| iloc.write(w));
        assert_eq!(bytes[8], 2);
        assert_eq!(parse_one(&bytes, |b, o| ItemLocationBox::parse(b, o)).unwrap(), iloc);
    }

    #[test]
    fn iloc_checks_field_widths_on_write() {
        let mut iloc = ItemLocationBox::default();
        iloc.add_location(ItemLocation {
            item_id: 1,
            base_offset: u64::from(u32::MAX) + 1,
            ..ItemLocation::default()
        })
        .unwrap();
        let mut w = BoxWriter::new();
        assert!(matches!(iloc.write(&mut w), Err(Error::InvalidData(_))));

        iloc.set_sizes(4, 4, 8, 0).unwrap();
        let bytes = written(|w| iloc.write(w));
        assert_eq!(parse_one(&bytes, |b, o| ItemLocationBox::parse(b, o)).unwrap(), iloc);
    }

    #[test]
    fn iloc_rejects_trailing_bytes() {
        let bytes = b"\x00\x00\x00\x11iloc\x00\x00\x00\x00\x44\x00\x00\x00\x00";
        assert!(matches!(
            parse_one(bytes, |b, o| ItemLocationBox::parse(b, o)),
            Err(Error::InvalidData("invalid iloc size"))
        ));
    }

    #[test]
    fn iloc_rejects_bad_field_size_code() {
        let bytes = b"\x00\x00\x00\x10iloc\x00\x00\x00\x00\x34\x40\x00\x00";
        assert!(matches!(
            parse_one(bytes, |b, o| ItemLocationBox::parse(b, o)),
            Err(Error::InvalidData("value must be in the set {0, 4, 8}"))
        ));
    }

    #[test]
    fn infe_typed_entries_round_trip() {
        let mut entry = ItemInfoEntry::new(1, FourCC::from(*b"hvc1"));
        entry.item_name = string(b"image");
        entry.hidden = true;
        let bytes = written(|w| entry.write(w));
        assert_eq!(bytes[8], 2); // version
        assert_eq!(bytes[11], 1); // hidden flag
        let reparsed = parse_one(&bytes, |b, _| ItemInfoEntry::parse(b)).unwrap();
        assert_eq!(reparsed, entry);

        let mut mime = ItemInfoEntry::new(70_000, FourCC::from(*b"mime"));
        mime.content_type = string(b"text/plain");
        mime.content_encoding = string(b"gzip");
        let bytes = written(|w| mime.write(w));
        assert_eq!(bytes[8], 3);
        assert_eq!(parse_one(&bytes, |b, _| ItemInfoEntry::parse(b)).unwrap(), mime);

        let mut uri = ItemInfoEntry::new(2, FourCC::from(*b"uri "));
        uri.item_uri_type = string(b"urn:example:kind");
        let bytes = written(|w| uri.write(w));
        assert_eq!(parse_one(&bytes, |b, _| ItemInfoEntry::parse(b)).unwrap(), uri);
    }

    #[test]
    fn infe_untyped_entry_round_trip() {
        let entry = ItemInfoEntry {
            item_id: 3,
            item_name: string(b"legacy"),
            content_type: string(b"text/xml"),
            ..ItemInfoEntry::default()
        };
        let bytes = written(|w| entry.write(w));
        assert_eq!(bytes[8], 0); // no type and no extension stays version 0
        assert_eq!(parse_one(&bytes, |b, _| ItemInfoEntry::parse(b)).unwrap(), entry);
    }

    #[test]
    fn infe_legacy_extension_round_trip() {
        let mut entry = ItemInfoEntry {
            item_id: 5,
            item_name: string(b"delivered"),
            content_type: string(b"application/octet-stream"),
            ..ItemInfoEntry::default()
        };
        let mut group_ids = TryVec::new();
        group_ids.extend_from_slice(&[7, 8]).unwrap();
        entry.extension = Some(FdItemInfoExtension {
            content_location: string(b"http://example.com/f"),
            content_md5: string(b"d41d8cd98f00b204e9800998ecf8427e"),
            content_length: 1024,
            transfer_length: 900,
            group_ids,
        });

        let bytes = written(|w| entry.write(w));
        assert_eq!(bytes[8], 1);
        assert_eq!(parse_one(&bytes, |b, _| ItemInfoEntry::parse(b)).unwrap(), entry);
    }

    #[test]
    fn iinf_reads_exactly_the_declared_count() {
        let mut iinf = ItemInfoBox::default();
        iinf.add_entry(ItemInfoEntry::new(1, FourCC::from(*b"hvc1"))).unwrap();
        iinf.add_entry(ItemInfoEntry::new(2, FourCC::from(*b"Exif"))).unwrap();
        let bytes = written(|w| iinf.write(w));
        let reparsed = parse_one(&bytes, |b, o| ItemInfoBox::parse(b, o)).unwrap();
        assert_eq!(reparsed, iinf);
        assert_eq!(reparsed.entry_by_id(2).unwrap().item_type, Some(FourCC::from(*b"Exif")));

        assert!(matches!(
            iinf.add_entry(ItemInfoEntry::new(1, FourCC::from(*b"av01"))),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn iinf_entry_count_sanity() {
        // Claims 100 entries in a 2-byte body.
        let bytes = b"\x00\x00\x00\x10iinf\x00\x00\x00\x00\x00\x64\xff\xff";
        assert!(matches!(
            parse_one(bytes, |b, o| ItemInfoBox::parse(b, o)),
            Err(Error::InvalidData("iinf entry count exceeds box size"))
        ));
    }

    #[test]
    fn iref_merges_and_derives_version() {
        let mut iref = ItemReferenceBox::default();
        iref.add(FourCC::from(*b"dimg"), 1, 2).unwrap();
        iref.add(FourCC::from(*b"dimg"), 1, 3).unwrap();
        iref.add(FourCC::from(*b"cdsc"), 4, 1).unwrap();
        assert_eq!(iref.references().len(), 2);
        assert_eq!(iref.to_item_ids(FourCC::from(*b"dimg"), 1), &[2, 3]);

        let bytes = written(|w| iref.write(w));
        assert_eq!(bytes[8], 0);
        assert_eq!(parse_one(&bytes, |b, o| ItemReferenceBox::parse(b, o)).unwrap(), iref);

        iref.add(FourCC::from(*b"base"), 1, 100_000).unwrap();
        let bytes = written(|w| iref.write(w));
        assert_eq!(bytes[8], 1);
        assert_eq!(parse_one(&bytes, |b, o| ItemReferenceBox::parse(b, o)).unwrap(), iref);
    }

    #[test]
    fn ipro_round_trip() {
        let mut ipro = ItemProtectionBox::default();
        let mut data = TryVec::new();
        data.extend_from_slice(&[1, 2, 3, 4]).unwrap();
        let index = ipro.add(ProtectionSchemeInfoBox { data }).unwrap();
        assert_eq!(index, 1);

        let bytes = written(|w| ipro.write(w));
        assert_eq!(parse_one(&bytes, |b, o| ItemProtectionBox::parse(b, o)).unwrap(), ipro);
    }

    #[test]
    fn dref_url_and_urn_round_trip() {
        let mut dref = DataReferenceBox::default();
        dref.entries.push(DataEntryBox::Url { flags: 1, location: TryVec::new() }).unwrap();
        dref.entries
            .push(DataEntryBox::Url { flags: 0, location: string(b"http://example.com/a") })
            .unwrap();
        dref.entries
            .push(DataEntryBox::Urn { flags: 0, name: string(b"urn:x"), location: string(b"b") })
            .unwrap();
        let bytes = written(|w| dref.write(w));
        assert_eq!(parse_one(&bytes, |b, o| DataReferenceBox::parse(b, o)).unwrap(), dref);
    }

    #[test]
    fn meta_round_trip_with_all_parts() {
        let mut meta = MetaBox::default();
        meta.handler_mut().name = string(b"handler");
        meta.add_idat_item(1, FourCC::from(*b"hvc1"), b"master", b"payload-1").unwrap();
        meta.add_item(2, FourCC::from(*b"hvc1"), b"thumb").unwrap();
        meta.add_item_extent(2, 100, 20).unwrap();
        meta.set_item_base_offset(2, 4000).unwrap();
        meta.set_primary_item(1);
        meta.add_item_reference(FourCC::from(*b"thmb"), 2, 1).unwrap();
        meta.add_entity_group(FourCC::from(*b"altr"), 50, &[1, 2]).unwrap();
        meta.set_item_hidden(2, true).unwrap();
        meta.add_property(
            ItemProperty::ImageSpatialExtents(ImageSpatialExtentsProperty { width: 320, height: 240 }),
            &[1, 2],
            false,
        )
        .unwrap();

        let bytes = meta.to_bytes().unwrap();
        let reparsed = MetaBox::from_bytes(&bytes).unwrap();
        assert_eq!(reparsed, meta);
        assert_eq!(reparsed.primary_item_id(), Some(1));
        assert_eq!(reparsed.item_type(1), Some(FourCC::from(*b"hvc1")));
        assert!(reparsed.item_infos().entry_by_id(2).unwrap().hidden);
        assert_eq!(
            reparsed.item_properties().find_property_index(BoxType::ImageSpatialExtentsProperty, 2),
            1
        );
    }

    #[test]
    fn meta_writes_children_in_canonical_order() {
        let mut meta = MetaBox::default();
        meta.add_idat_item(1, FourCC::from(*b"hvc1"), b"", b"x").unwrap();
        meta.set_primary_item(1);
        let bytes = meta.to_bytes().unwrap();

        let mut names = TryVec::new();
        let mut payload = &bytes[12..]; // past header and version/flags
        let mut iter = BoxIter::new(&mut payload);
        while let Some(mut b) = iter.next_box().unwrap() {
            names.push(b.head.name).unwrap();
            skip_box_remain(&mut b).unwrap();
        }
        assert_eq!(
            names.as_slice(),
            &[
                BoxType::HandlerBox,
                BoxType::PrimaryItemBox,
                BoxType::ItemLocationBox,
                BoxType::ItemInfoBox,
                BoxType::ItemReferenceBox,
                BoxType::ItemDataBox,
                BoxType::ItemPropertiesBox,
            ]
        );
    }

    #[test]
    fn meta_must_be_unique_in_stream() {
        let meta = MetaBox::default();
        let mut bytes = meta.to_bytes().unwrap();
        let copy = bytes.try_clone().unwrap();
        bytes.extend_from_slice(&copy).unwrap();
        assert!(matches!(MetaBox::from_bytes(&bytes), Err(Error::InvalidData(_))));

        assert!(matches!(MetaBox::from_bytes(b""), Err(Error::InvalidData("missing meta box"))));
    }

    #[test]
    fn pitm_version_follows_item_id() {
        let mut meta = MetaBox::default();
        meta.set_primary_item(70_000);
        let bytes = meta.to_bytes().unwrap();
        let reparsed = MetaBox::from_bytes(&bytes).unwrap();
        assert_eq!(reparsed.primary_item_id(), Some(70_000));
    }

    #[test]
    fn read_item_from_stream_extents() {
        let mut meta = MetaBox::default();
        meta.add_item(1, FourCC::from(*b"hvc1"), b"").unwrap();
        meta.add_item_extent(1, 4, 5).unwrap();
        meta.add_item_extent(1, 12, 3).unwrap();

        let stream_data = b"0123456789abcdefgh";
        let mut stream = Cursor::new(&stream_data[..]);
        assert_eq!(meta.item_length(1, stream_data.len() as u64).unwrap(), 8);
        let payload = meta.read_item(&mut stream, 1).unwrap();
        assert_eq!(payload.as_slice(), b"45678cde");
    }

    #[test]
    fn zero_length_stream_extent_contributes_nothing() {
        let mut meta = MetaBox::default();
        meta.add_item(1, FourCC::from(*b"hvc1"), b"").unwrap();
        meta.add_item_extent(1, 10, 0).unwrap();
        meta.add_item_extent(1, 4, 5).unwrap();

        let stream_data = b"0123456789abcdef";
        let mut stream = Cursor::new(&stream_data[..]);
        assert_eq!(meta.item_length(1, stream_data.len() as u64).unwrap(), 5);
        let payload = meta.read_item(&mut stream, 1).unwrap();
        assert_eq!(payload.as_slice(), b"45678");
    }

    #[test]
    fn read_item_rejects_extents_past_stream_end() {
        let mut meta = MetaBox::default();
        meta.add_item(1, FourCC::from(*b"hvc1"), b"").unwrap();
        meta.add_item_extent(1, 4, 100).unwrap();

        let mut stream = Cursor::new(&b"0123456789"[..]);
        assert!(matches!(
            meta.read_item(&mut stream, 1),
            Err(Error::InvalidData("extent outside stream"))
        ));
    }

    #[test]
    fn read_item_from_idat() {
        let mut meta = MetaBox::default();
        meta.add_idat_item(1, FourCC::from(*b"mime"), b"a", b"first").unwrap();
        meta.add_idat_item(2, FourCC::from(*b"mime"), b"b", b"second").unwrap();

        let mut stream = Cursor::new(&b""[..]);
        assert_eq!(meta.read_item(&mut stream, 1).unwrap().as_slice(), b"first");
        assert_eq!(meta.read_item(&mut stream, 2).unwrap().as_slice(), b"second");
        assert_eq!(meta.item_length(2, 0).unwrap(), 6);
    }

    #[test]
    fn read_item_built_from_other_items() {
        let mut meta = MetaBox::default();
        meta.add_idat_item(1, FourCC::from(*b"mime"), b"src", b"0123456789").unwrap();
        meta.add_item(2, FourCC::from(*b"mime"), b"cut").unwrap();
        let mut extents = TryVec::new();
        // Bytes 2..7 of item 1, then all of item 1 again.
        extents.push(ItemLocationExtent { index: 0, offset: 2, length: 5 }).unwrap();
        extents.push(ItemLocationExtent { index: 0, offset: 0, length: 0 }).unwrap();
        meta.item_locations_mut()
            .add_location(ItemLocation {
                item_id: 2,
                construction_method: ConstructionMethod::Item,
                data_reference_index: 0,
                base_offset: 0,
                extents,
            })
            .unwrap();
        meta.add_item_reference(FourCC::from(*b"iloc"), 2, 1).unwrap();

        let mut stream = Cursor::new(&b""[..]);
        assert_eq!(meta.item_length(2, 0).unwrap(), 15);
        assert_eq!(meta.read_item(&mut stream, 2).unwrap().as_slice(), b"234560123456789");
    }

    #[test]
    fn read_item_detects_reference_cycles() {
        let mut meta = MetaBox::default();
        for id in [1, 2] {
            meta.add_item(id, FourCC::from(*b"mime"), b"").unwrap();
            let mut extents = TryVec::new();
            extents.push(ItemLocationExtent { index: 0, offset: 0, length: 0 }).unwrap();
            meta.item_locations_mut()
                .add_location(ItemLocation {
                    item_id: id,
                    construction_method: ConstructionMethod::Item,
                    data_reference_index: 0,
                    base_offset: 0,
                    extents,
                })
                .unwrap();
        }
        meta.add_item_reference(FourCC::from(*b"iloc"), 1, 2).unwrap();
        meta.add_item_reference(FourCC::from(*b"iloc"), 2, 1).unwrap();

        let mut stream = Cursor::new(&b""[..]);
        assert!(matches!(
            meta.read_item(&mut stream, 1),
            Err(Error::InvalidData("circular item reference"))
        ));
        assert!(matches!(
            meta.item_length(1, 0),
            Err(Error::InvalidData("circular item reference"))
        ));
    }

    #[test]
    fn unknown_item_has_no_length() {
        let meta = MetaBox::default();
        assert!(matches!(
            meta.item_length(42, 0),
            Err(Error::InvalidData("item has no location"))
        ));
    }

    #[test]
    fn item_count_limit_is_enforced() {
        let mut meta = MetaBox::default();
        for id in 1..=10 {
            meta.add_item(id, FourCC::from(*b"mime"), b"").unwrap();
        }
        let bytes = meta.to_bytes().unwrap();

        let config = DecodeConfig::default().with_max_items(5);
        assert!(matches!(
            MetaBox::from_bytes_with_config(&bytes, &config, &Unstoppable),
            Err(Error::ResourceLimitExceeded(_))
        ));
        assert!(MetaBox::from_bytes(&bytes).is_ok());
    }

    #[test]
    fn idat_allocation_counts_against_memory_limit() {
        let mut meta = MetaBox::default();
        meta.add_idat_item(1, FourCC::from(*b"mime"), b"", &[0xaa; 4096]).unwrap();
        let bytes = meta.to_bytes().unwrap();

        let config = DecodeConfig::default().with_peak_memory_limit(1024);
        assert!(matches!(
            MetaBox::from_bytes_with_config(&bytes, &config, &Unstoppable),
            Err(Error::ResourceLimitExceeded(_))
        ));
    }
}
