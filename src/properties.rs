//! Item property boxes and their association tables.
//!
//! Properties live in an `ipco` container and are attached to items
//! through `ipma` association entries holding a 1-based index into the
//! container. The `iprp` box aggregates both.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Read;

use arrayvec::ArrayVec;
use bitreader::BitReader;
use byteorder::ReadBytesExt;

use crate::boxes::{BoxType, FourCC};
use crate::writer::BoxWriter;
use crate::{
    be_u16, be_u32, be_u64, check_parser_state, read_fullbox_extra, read_fullbox_version_no_flags,
    read_zero_terminated, skip_box_remain, BMFFBox, Error, ParseOptions, Result, TryString, TryVec,
};

/// 32-bit numerator/denominator pair. Stored as read, never reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction32 {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for Fraction32 {
    fn default() -> Self {
        Self { numerator: 0, denominator: 1 }
    }
}

/// 16-bit numerator/denominator pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction16 {
    pub numerator: u16,
    pub denominator: u16,
}

impl Default for Fraction16 {
    fn default() -> Self {
        Self { numerator: 0, denominator: 1 }
    }
}

/// Image spatial extents 'ispe'.
/// See ISO 23008-12:2017 § 6.5.3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpatialExtentsProperty {
    pub width: u32,
    pub height: u32,
}

impl ImageSpatialExtentsProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let _version = read_fullbox_version_no_flags(src, options)?;
        // Version is always 0 for ispe
        let width = be_u32(src)?;
        let height = be_u32(src)?;
        Ok(Self { width, height })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::ImageSpatialExtentsProperty, 0, 0)?;
        w.write_u32(self.width)?;
        w.write_u32(self.height)?;
        w.close_box(mark)
    }
}

/// Pixel information 'pixi': bit depth of each channel.
/// See ISO 23008-12:2017 § 6.5.6
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixelInformationProperty {
    pub bits_per_channel: ArrayVec<u8, 16>,
}

impl PixelInformationProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("pixi version"));
        }

        let num_channels = usize::from(src.read_u8()?);
        let mut bits_per_channel = ArrayVec::new();
        if num_channels > bits_per_channel.capacity() {
            return Err(Error::Unsupported("pixi channel count"));
        }
        bits_per_channel.extend((0..num_channels).map(|_| 0));
        src.read_exact(&mut bits_per_channel)
            .map_err(|_| Error::InvalidData("invalid num_channels"))?;

        Ok(Self { bits_per_channel })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::PixelInformationProperty, 0, 0)?;
        w.write_u8(self.bits_per_channel.len() as u8)?;
        w.write_bytes(&self.bits_per_channel)?;
        w.close_box(mark)
    }
}

/// Auxiliary type 'auxC': a zero-terminated URN plus opaque subtype bytes.
/// See ISO 23008-12:2017 § 6.5.8
#[derive(Debug, PartialEq, Default)]
pub struct AuxiliaryTypeProperty {
    pub aux_type: TryString,
    pub aux_subtype: TryVec<u8>,
}

impl AuxiliaryTypeProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("auxC version"));
        }
        let aux_type = read_zero_terminated(src)?;
        let aux_subtype = src.read_into_try_vec()?;
        Ok(Self { aux_type, aux_subtype })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::AuxiliaryTypeProperty, 0, 0)?;
        w.write_zero_terminated(&self.aux_type)?;
        w.write_bytes(&self.aux_subtype)?;
        w.close_box(mark)
    }
}

/// Image rotation 'irot' in anti-clockwise degrees: 0, 90, 180 or 270.
/// See ISO 23008-12:2017 § 6.5.10
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageRotation {
    pub angle: u16,
}

impl ImageRotation {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        // High six bits are reserved, written as 0 and ignored on read.
        let angle = u16::from(src.read_u8()? & 3) * 90;
        Ok(Self { angle })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::ImageRotationProperty)?;
        w.write_u8(((self.angle / 90) % 4) as u8)?;
        w.close_box(mark)
    }
}

/// Image mirror 'imir'. Axis 0 mirrors over a vertical axis
/// (left/right swap), 1 over a horizontal axis (top/bottom swap).
/// See ISO 23008-12:2017 § 6.5.12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageMirror {
    pub axis: u8,
}

impl ImageMirror {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let axis = src.read_u8()? & 1;
        Ok(Self { axis })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::ImageMirrorProperty)?;
        w.write_u8(self.axis & 1)?;
        w.close_box(mark)
    }
}

/// Image scaling 'iscl': target width/height as 16-bit fractions.
/// See ISO 23008-12 § 6.5.13
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageScalingProperty {
    pub target_width: Fraction16,
    pub target_height: Fraction16,
}

impl ImageScalingProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("iscl version"));
        }
        Ok(Self {
            target_width: Fraction16 { numerator: be_u16(src)?, denominator: be_u16(src)? },
            target_height: Fraction16 { numerator: be_u16(src)?, denominator: be_u16(src)? },
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::ImageScalingProperty, 0, 0)?;
        w.write_u16(self.target_width.numerator)?;
        w.write_u16(self.target_width.denominator)?;
        w.write_u16(self.target_height.numerator)?;
        w.write_u16(self.target_height.denominator)?;
        w.close_box(mark)
    }
}

/// Clean aperture 'clap': four 32-bit fractions.
/// See ISO 14496-12:2015 § 12.1.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanApertureBox {
    pub width: Fraction32,
    pub height: Fraction32,
    pub horiz_offset: Fraction32,
    pub vert_offset: Fraction32,
}

impl CleanApertureBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let read_fraction = |src: &mut BMFFBox<'_, T>| -> Result<Fraction32> {
            Ok(Fraction32 { numerator: be_u32(src)?, denominator: be_u32(src)? })
        };
        Ok(Self {
            width: read_fraction(src)?,
            height: read_fraction(src)?,
            horiz_offset: read_fraction(src)?,
            vert_offset: read_fraction(src)?,
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::CleanApertureBox)?;
        for f in [self.width, self.height, self.horiz_offset, self.vert_offset] {
            w.write_u32(f.numerator)?;
            w.write_u32(f.denominator)?;
        }
        w.close_box(mark)
    }
}

/// Pixel aspect ratio 'pasp'.
/// See ISO 14496-12:2015 § 12.1.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelAspectRatioBox {
    pub h_spacing: u32,
    pub v_spacing: u32,
}

impl PixelAspectRatioBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        Ok(Self { h_spacing: be_u32(src)?, v_spacing: be_u32(src)? })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::PixelAspectRatioBox)?;
        w.write_u32(self.h_spacing)?;
        w.write_u32(self.v_spacing)?;
        w.close_box(mark)
    }
}

/// Colour information 'colr'. The payload shape is selected by the
/// 4-byte colour type: "nclx" carries CICP values, "rICC" and "prof"
/// carry a raw ICC profile. The two shapes are mutually exclusive.
/// See ISO 14496-12:2015 § 12.1.5
#[derive(Debug, PartialEq)]
pub enum ColourInformationBox {
    Nclx {
        colour_primaries: u16,
        transfer_characteristics: u16,
        matrix_coefficients: u16,
        full_range: bool,
    },
    Icc {
        /// Either "rICC" or "prof".
        colour_type: FourCC,
        profile: TryVec<u8>,
    },
}

impl ColourInformationBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let colour_type = FourCC::from(be_u32(src)?);
        if colour_type == b"nclx" {
            let colour_primaries = be_u16(src)?;
            let transfer_characteristics = be_u16(src)?;
            let matrix_coefficients = be_u16(src)?;
            // 1-bit flag, 7 reserved bits
            let full_range = src.read_u8()? & 0x80 != 0;
            Ok(Self::Nclx { colour_primaries, transfer_characteristics, matrix_coefficients, full_range })
        } else if colour_type == b"rICC" || colour_type == b"prof" {
            let profile = src.read_into_try_vec()?;
            Ok(Self::Icc { colour_type, profile })
        } else {
            Err(Error::Unsupported("colr colour type"))
        }
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::ColourInformationBox)?;
        match self {
            Self::Nclx { colour_primaries, transfer_characteristics, matrix_coefficients, full_range } => {
                w.write_fourcc(FourCC::from(*b"nclx"))?;
                w.write_u16(*colour_primaries)?;
                w.write_u16(*transfer_characteristics)?;
                w.write_u16(*matrix_coefficients)?;
                w.write_u8(if *full_range { 0x80 } else { 0 })?;
            },
            Self::Icc { colour_type, profile } => {
                w.write_fourcc(*colour_type)?;
                w.write_bytes(profile)?;
            },
        }
        w.close_box(mark)
    }
}

/// Accessibility text 'altt'.
/// See ISO 23008-12 § 6.5.19
#[derive(Debug, PartialEq, Default)]
pub struct AccessibilityTextProperty {
    pub alt_text: TryString,
    pub alt_lang: TryString,
}

impl AccessibilityTextProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("altt version"));
        }
        Ok(Self {
            alt_text: read_zero_terminated(src)?,
            alt_lang: read_zero_terminated(src)?,
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::AccessibilityTextProperty, 0, 0)?;
        w.write_zero_terminated(&self.alt_text)?;
        w.write_zero_terminated(&self.alt_lang)?;
        w.close_box(mark)
    }
}

/// Required reference types 'rref': reference types a reader must
/// understand to display the item.
/// See ISO 23008-12 § 6.5.15
#[derive(Debug, PartialEq, Default)]
pub struct RequiredReferenceTypesProperty {
    pub reference_types: TryVec<FourCC>,
}

impl RequiredReferenceTypesProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("rref version"));
        }
        let count = src.read_u8()?;
        let mut reference_types = TryVec::new();
        for _ in 0..count {
            reference_types.push(FourCC::from(be_u32(src)?))?;
        }
        Ok(Self { reference_types })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let count = u8::try_from(self.reference_types.len())
            .map_err(|_| Error::InvalidData("too many required reference types"))?;
        let mark = w.open_full_box(BoxType::RequiredReferenceTypesProperty, 0, 0)?;
        w.write_u8(count)?;
        for cc in &self.reference_types {
            w.write_fourcc(*cc)?;
        }
        w.close_box(mark)
    }
}

/// User description 'udes': language, name, description and tags.
/// See ISO 23008-12 § 6.5.20
#[derive(Debug, PartialEq, Default)]
pub struct UserDescriptionProperty {
    pub lang: TryString,
    pub name: TryString,
    pub description: TryString,
    pub tags: TryString,
}

impl UserDescriptionProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("udes version"));
        }
        Ok(Self {
            lang: read_zero_terminated(src)?,
            name: read_zero_terminated(src)?,
            description: read_zero_terminated(src)?,
            tags: read_zero_terminated(src)?,
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::UserDescriptionBox, 0, 0)?;
        w.write_zero_terminated(&self.lang)?;
        w.write_zero_terminated(&self.name)?;
        w.write_zero_terminated(&self.description)?;
        w.write_zero_terminated(&self.tags)?;
        w.close_box(mark)
    }
}

/// Creation time 'crtt' in microseconds since the TAI epoch.
/// See ISO 23008-12 § 6.5.21
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreationTimeProperty {
    pub creation_time: u64,
}

impl CreationTimeProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("crtt version"));
        }
        Ok(Self { creation_time: be_u64(src)? })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::CreationTimeProperty, 0, 0)?;
        w.write_u64(self.creation_time)?;
        w.close_box(mark)
    }
}

/// Modification time 'mdft' in microseconds since the TAI epoch.
/// See ISO 23008-12 § 6.5.22
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModificationTimeProperty {
    pub modification_time: u64,
}

impl ModificationTimeProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("mdft version"));
        }
        Ok(Self { modification_time: be_u64(src)? })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::ModificationTimeProperty, 0, 0)?;
        w.write_u64(self.modification_time)?;
        w.close_box(mark)
    }
}

/// Relative location 'rloc': offsets of a sub-picture item within its
/// reconstructed image.
/// See ISO 23008-12 § 6.5.9
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelativeLocationProperty {
    pub horizontal_offset: u32,
    pub vertical_offset: u32,
}

impl RelativeLocationProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let version = read_fullbox_version_no_flags(src, options)?;
        if version != 0 {
            return Err(Error::Unsupported("rloc version"));
        }
        Ok(Self {
            horizontal_offset: be_u32(src)?,
            vertical_offset: be_u32(src)?,
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::RelativeLocationProperty, 0, 0)?;
        w.write_u32(self.horizontal_offset)?;
        w.write_u32(self.vertical_offset)?;
        w.close_box(mark)
    }
}

/// AVC/HEVC decoder configuration ('avcC'/'hvcC'). The configuration
/// record is carried verbatim; NAL-level reformatting is out of scope.
#[derive(Debug, PartialEq)]
pub struct DecoderConfigurationBox {
    /// Either `AVCConfigurationBox` or `HEVCConfigurationBox`.
    pub name: BoxType,
    pub record: TryVec<u8>,
}

impl DecoderConfigurationBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let name = src.head.name;
        let record = src.read_into_try_vec()?;
        Ok(Self { name, record })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(self.name)?;
        w.write_bytes(&self.record)?;
        w.close_box(mark)
    }
}

/// JPEG configuration 'jpgC': the JPEG prefix stream, carried verbatim.
#[derive(Debug, PartialEq, Default)]
pub struct JpegConfigurationBox {
    pub prefix: TryVec<u8>,
}

impl JpegConfigurationBox {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        Ok(Self { prefix: src.read_into_try_vec()? })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::JpegConfigurationBox)?;
        w.write_bytes(&self.prefix)?;
        w.close_box(mark)
    }
}

/// Free space box, 'free' or 'skip'. Only the payload length is kept;
/// content is written back as zeros.
/// See ISO 14496-12:2015 § 8.1.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpaceBox {
    /// Either `FreeSpaceBox` or `SkipBox`; both share this payload.
    pub name: BoxType,
    pub length: u64,
}

impl FreeSpaceBox {
    pub fn new(length: u64) -> Self {
        Self { name: BoxType::FreeSpaceBox, length }
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let name = src.head.name;
        let length = src.bytes_left();
        skip_box_remain(src)?;
        Ok(Self { name, length })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        const ZEROS: [u8; 64] = [0; 64];
        let mark = w.open_box(self.name)?;
        let mut left = self.length;
        while left > 0 {
            let n = left.min(ZEROS.len() as u64) as usize;
            w.write_bytes(&ZEROS[..n])?;
            left -= n as u64;
        }
        w.close_box(mark)
    }
}

/// Verbatim copy of a box this crate has no codec for.
///
/// The complete serialized form, header included, is kept so that
/// re-emission reproduces the original bytes exactly. This is what
/// keeps one unrecognized extension box from invalidating an otherwise
/// sound file.
#[derive(Debug, PartialEq)]
pub struct RawBox {
    name: BoxType,
    data: TryVec<u8>,
}

impl RawBox {
    pub fn name(&self) -> BoxType {
        self.name
    }

    /// Full serialized bytes of the box, header included.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let head = src.head;
        if head.size == u64::MAX {
            return Err(Error::InvalidData("unsized box inside a container"));
        }
        let payload = src.read_into_try_vec()?;

        // Rebuild the header in the same form it was read in, so the
        // stored bytes match the input exactly.
        let mut data = TryVec::new();
        match head.offset {
            8 => {
                data.extend_from_slice(&u32::try_from(head.size)?.to_be_bytes())?;
                data.extend_from_slice(&u32::from(head.name).to_be_bytes())?;
            },
            16 => {
                data.extend_from_slice(&1u32.to_be_bytes())?;
                data.extend_from_slice(&u32::from(head.name).to_be_bytes())?;
                data.extend_from_slice(&head.size.to_be_bytes())?;
            },
            24 | 32 => {
                let uuid = head.uuid.ok_or(Error::InvalidData("uuid box without user type"))?;
                if head.offset == 24 {
                    data.extend_from_slice(&u32::try_from(head.size)?.to_be_bytes())?;
                    data.extend_from_slice(&u32::from(head.name).to_be_bytes())?;
                } else {
                    data.extend_from_slice(&1u32.to_be_bytes())?;
                    data.extend_from_slice(&u32::from(head.name).to_be_bytes())?;
                    data.extend_from_slice(&head.size.to_be_bytes())?;
                }
                data.extend_from_slice(&uuid)?;
            },
            _ => return Err(Error::InvalidData("bad box header offset")),
        }
        data.extend_from_slice(&payload)?;

        Ok(Self { name: head.name, data })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        w.write_bytes(&self.data)
    }
}

/// One property from an `ipco` container.
///
/// Recognized tags decode to their concrete type; anything else falls
/// back to [`RawBox`] so the container parse never fails on an unknown
/// tag and unknown boxes survive a rewrite byte-for-byte.
#[derive(Debug, PartialEq)]
pub enum ItemProperty {
    AccessibilityText(AccessibilityTextProperty),
    AuxiliaryType(AuxiliaryTypeProperty),
    CleanAperture(CleanApertureBox),
    ColourInformation(ColourInformationBox),
    CreationTime(CreationTimeProperty),
    DecoderConfiguration(DecoderConfigurationBox),
    FreeSpace(FreeSpaceBox),
    ImageMirror(ImageMirror),
    ImageRotation(ImageRotation),
    ImageScaling(ImageScalingProperty),
    ImageSpatialExtents(ImageSpatialExtentsProperty),
    JpegConfiguration(JpegConfigurationBox),
    ModificationTime(ModificationTimeProperty),
    PixelAspectRatio(PixelAspectRatioBox),
    PixelInformation(PixelInformationProperty),
    RelativeLocation(RelativeLocationProperty),
    RequiredReferenceTypes(RequiredReferenceTypesProperty),
    UserDescription(UserDescriptionProperty),
    Raw(RawBox),
}

impl ItemProperty {
    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        Ok(match src.head.name {
            BoxType::AccessibilityTextProperty => {
                Self::AccessibilityText(AccessibilityTextProperty::parse(src, options)?)
            },
            BoxType::AuxiliaryTypeProperty => Self::AuxiliaryType(AuxiliaryTypeProperty::parse(src, options)?),
            BoxType::AVCConfigurationBox | BoxType::HEVCConfigurationBox => {
                Self::DecoderConfiguration(DecoderConfigurationBox::parse(src)?)
            },
            BoxType::CleanApertureBox => Self::CleanAperture(CleanApertureBox::parse(src)?),
            BoxType::ColourInformationBox => Self::ColourInformation(ColourInformationBox::parse(src)?),
            BoxType::CreationTimeProperty => Self::CreationTime(CreationTimeProperty::parse(src, options)?),
            BoxType::FreeSpaceBox | BoxType::SkipBox => Self::FreeSpace(FreeSpaceBox::parse(src)?),
            BoxType::ImageMirrorProperty => Self::ImageMirror(ImageMirror::parse(src)?),
            BoxType::ImageRotationProperty => Self::ImageRotation(ImageRotation::parse(src)?),
            BoxType::ImageScalingProperty => Self::ImageScaling(ImageScalingProperty::parse(src, options)?),
            BoxType::ImageSpatialExtentsProperty => {
                Self::ImageSpatialExtents(ImageSpatialExtentsProperty::parse(src, options)?)
            },
            BoxType::JpegConfigurationBox => Self::JpegConfiguration(JpegConfigurationBox::parse(src)?),
            BoxType::ModificationTimeProperty => {
                Self::ModificationTime(ModificationTimeProperty::parse(src, options)?)
            },
            BoxType::PixelAspectRatioBox => Self::PixelAspectRatio(PixelAspectRatioBox::parse(src)?),
            BoxType::PixelInformationProperty => {
                Self::PixelInformation(PixelInformationProperty::parse(src, options)?)
            },
            BoxType::RelativeLocationProperty => {
                Self::RelativeLocation(RelativeLocationProperty::parse(src, options)?)
            },
            BoxType::RequiredReferenceTypesProperty => {
                Self::RequiredReferenceTypes(RequiredReferenceTypesProperty::parse(src, options)?)
            },
            BoxType::UserDescriptionBox => Self::UserDescription(UserDescriptionProperty::parse(src, options)?),
            _ => Self::Raw(RawBox::parse(src)?),
        })
    }

    /// Tag this property serializes under.
    pub fn box_type(&self) -> BoxType {
        match self {
            Self::AccessibilityText(_) => BoxType::AccessibilityTextProperty,
            Self::AuxiliaryType(_) => BoxType::AuxiliaryTypeProperty,
            Self::CleanAperture(_) => BoxType::CleanApertureBox,
            Self::ColourInformation(_) => BoxType::ColourInformationBox,
            Self::CreationTime(_) => BoxType::CreationTimeProperty,
            Self::DecoderConfiguration(c) => c.name,
            Self::FreeSpace(b) => b.name,
            Self::ImageMirror(_) => BoxType::ImageMirrorProperty,
            Self::ImageRotation(_) => BoxType::ImageRotationProperty,
            Self::ImageScaling(_) => BoxType::ImageScalingProperty,
            Self::ImageSpatialExtents(_) => BoxType::ImageSpatialExtentsProperty,
            Self::JpegConfiguration(_) => BoxType::JpegConfigurationBox,
            Self::ModificationTime(_) => BoxType::ModificationTimeProperty,
            Self::PixelAspectRatio(_) => BoxType::PixelAspectRatioBox,
            Self::PixelInformation(_) => BoxType::PixelInformationProperty,
            Self::RelativeLocation(_) => BoxType::RelativeLocationProperty,
            Self::RequiredReferenceTypes(_) => BoxType::RequiredReferenceTypesProperty,
            Self::UserDescription(_) => BoxType::UserDescriptionBox,
            Self::Raw(r) => r.name(),
        }
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        match self {
            Self::AccessibilityText(p) => p.write(w),
            Self::AuxiliaryType(p) => p.write(w),
            Self::CleanAperture(p) => p.write(w),
            Self::ColourInformation(p) => p.write(w),
            Self::CreationTime(p) => p.write(w),
            Self::DecoderConfiguration(p) => p.write(w),
            Self::FreeSpace(p) => p.write(w),
            Self::ImageMirror(p) => p.write(w),
            Self::ImageRotation(p) => p.write(w),
            Self::ImageScaling(p) => p.write(w),
            Self::ImageSpatialExtents(p) => p.write(w),
            Self::JpegConfiguration(p) => p.write(w),
            Self::ModificationTime(p) => p.write(w),
            Self::PixelAspectRatio(p) => p.write(w),
            Self::PixelInformation(p) => p.write(w),
            Self::RelativeLocation(p) => p.write(w),
            Self::RequiredReferenceTypes(p) => p.write(w),
            Self::UserDescription(p) => p.write(w),
            Self::Raw(p) => p.write(w),
        }
    }
}

/// Item property container 'ipco': an ordered sequence of heterogeneous
/// property boxes. Associations refer to entries by 1-based index, so
/// every child occupies a slot even when it is a raw fallback.
/// See ISO 23008-12:2017 § 9.3.1
#[derive(Debug, Default, PartialEq)]
pub struct ItemPropertyContainer {
    properties: TryVec<ItemProperty>,
}

impl ItemPropertyContainer {
    pub fn properties(&self) -> &[ItemProperty] {
        &self.properties
    }

    /// Look up a property by its 1-based wire index. Index 0 means
    /// "no property" and always returns `None`.
    pub fn property_by_index(&self, index: u16) -> Option<&ItemProperty> {
        match index {
            0 => None,
            i => self.properties.get(usize::from(i) - 1),
        }
    }

    /// Append a property and return its 1-based index.
    pub fn add_property(&mut self, property: ItemProperty) -> Result<u16> {
        // The widest association encoding carries 15-bit indexes.
        if self.properties.len() >= (1 << PROPERTY_INDEX_WIDTH_LARGE) - 1 {
            return Err(Error::InvalidData("property container full"));
        }
        self.properties.push(property)?;
        Ok(self.properties.len() as u16)
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let mut properties = TryVec::new();
        let mut iter = src.box_iter();
        while let Some(mut b) = iter.next_box()? {
            let prop = ItemProperty::parse(&mut b, options)?;
            check_parser_state(&b.head, &b.content)?;
            properties.push(prop)?;
        }
        Ok(Self { properties })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::ItemPropertyContainerBox)?;
        for prop in &self.properties {
            prop.write(w)?;
        }
        w.close_box(mark)
    }
}

const PROPERTY_INDEX_WIDTH_LARGE: u8 = 15;
const PROPERTY_INDEX_WIDTH_SMALL: u8 = 7;

/// One (index, essential) pair attached to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAssociation {
    /// 1-based index into the `ipco` container; 0 means no property.
    pub index: u16,
    pub essential: bool,
}

#[derive(Debug, PartialEq)]
struct AssociationEntry {
    item_id: u32,
    associations: TryVec<PropertyAssociation>,
}

/// Item property association 'ipma'.
///
/// Association entries are encoded with a box-wide item id width
/// (16 or 32 bit, chosen by version) and a box-wide index width
/// (7 or 15 bit, chosen by flag bit 0).
/// [`ItemPropertyAssociation::add_entry`] widens both the moment a
/// value requires it. The upgrade is one-way: narrowing again would
/// require proving no earlier entry still needs the width.
/// See ISO 23008-12:2017 § 9.3.2
#[derive(Debug, Default, PartialEq)]
pub struct ItemPropertyAssociation {
    version: u8,
    flags: u32,
    entries: TryVec<AssociationEntry>,
}

impl ItemPropertyAssociation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Associate `index` with `item_id`, widening the encoding when the
    /// id needs 32 bits or the index needs 15.
    pub fn add_entry(&mut self, item_id: u32, index: u16, essential: bool) -> Result<()> {
        if index >= 1 << PROPERTY_INDEX_WIDTH_LARGE {
            return Err(Error::InvalidData("property index does not fit in 15 bits"));
        }
        let slot = self.position_or_insert(item_id)?;
        self.entries[slot].associations.push(PropertyAssociation { index, essential })?;

        if self.version == 0 && item_id > u16::MAX.into() {
            self.version = 1;
        }
        if self.flags & 1 == 0 && index >= 1 << PROPERTY_INDEX_WIDTH_SMALL {
            self.flags |= 1;
        }
        Ok(())
    }

    /// Associations for `item_id`, empty if the item has none.
    pub fn association_entries(&self, item_id: u32) -> &[PropertyAssociation] {
        self.entries
            .iter()
            .find(|e| e.item_id == item_id)
            .map_or(&[], |e| &e.associations)
    }

    /// Item ids with at least one association, in encoding order.
    pub fn item_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|e| e.item_id)
    }

    /// Entries are kept sorted by item id; duplicate ids in the input
    /// merge into one entry.
    fn position_or_insert(&mut self, item_id: u32) -> Result<usize> {
        match self.entries.binary_search_by_key(&item_id, |e| e.item_id) {
            Ok(slot) => Ok(slot),
            Err(slot) => {
                self.entries.push(AssociationEntry { item_id, associations: TryVec::new() })?;
                self.entries[slot..].rotate_right(1);
                Ok(slot)
            },
        }
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Self> {
        let (version, flags) = read_fullbox_extra(src)?;
        if version > 1 {
            return Err(Error::Unsupported("ipma version"));
        }
        let mut ipma = Self { version, flags, entries: TryVec::new() };

        let entry_count = be_u32(src)?;
        for _ in 0..entry_count {
            let item_id = if version == 0 {
                be_u16(src)?.into()
            } else {
                be_u32(src)?
            };
            let slot = ipma.position_or_insert(item_id)?;
            let association_count = src.read_u8()?;
            for _ in 0..association_count {
                let num_association_bytes = if flags & 1 == 1 { 2 } else { 1 };
                let association = &mut [0; 2][..num_association_bytes];
                src.read_exact(association)?;
                let mut association = BitReader::new(association);
                let essential = association.read_bool()?;
                let index = association.read_u16(association.remaining().try_into()?)?;
                ipma.entries[slot].associations.push(PropertyAssociation { index, essential })?;
            }
        }
        Ok(ipma)
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::ItemPropertyAssociationBox, self.version, self.flags)?;
        w.write_u32(self.entries.len() as u32)?;
        let index_width = if self.flags & 1 == 1 {
            PROPERTY_INDEX_WIDTH_LARGE
        } else {
            PROPERTY_INDEX_WIDTH_SMALL
        };
        for entry in &self.entries {
            if self.version < 1 {
                let id = u16::try_from(entry.item_id)
                    .map_err(|_| Error::InvalidData("item id does not fit in 16 bits"))?;
                w.write_u16(id)?;
            } else {
                w.write_u32(entry.item_id)?;
            }
            let count = u8::try_from(entry.associations.len())
                .map_err(|_| Error::InvalidData("too many property associations for one item"))?;
            w.write_u8(count)?;
            for assoc in &entry.associations {
                w.write_bits(u64::from(assoc.essential), 1)?;
                w.write_bits(u64::from(assoc.index), index_width)?;
            }
        }
        w.close_box(mark)
    }
}

/// Tag, 1-based index and essential flag of one associated property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyInfo {
    pub box_type: BoxType,
    pub index: u16,
    pub essential: bool,
}

/// Item properties box 'iprp': an `ipco` container followed by one or
/// more `ipma` association boxes.
/// See ISO 23008-12:2017 § 9.3
#[derive(Debug, Default, PartialEq)]
pub struct ItemPropertiesBox {
    container: ItemPropertyContainer,
    associations: TryVec<ItemPropertyAssociation>,
}

impl ItemPropertiesBox {
    pub fn container(&self) -> &ItemPropertyContainer {
        &self.container
    }

    pub fn associations(&self) -> &[ItemPropertyAssociation] {
        &self.associations
    }

    /// Look up a property by its 1-based wire index.
    pub fn property_by_index(&self, index: u16) -> Option<&ItemProperty> {
        self.container.property_by_index(index)
    }

    /// Index of the first property of `box_type` associated with
    /// `item_id`, or 0 when the item has no such property. 0 is the
    /// wire encoding for "no property".
    pub fn find_property_index(&self, box_type: BoxType, item_id: u32) -> u16 {
        for ipma in &self.associations {
            for assoc in ipma.association_entries(item_id) {
                if let Some(prop) = self.container.property_by_index(assoc.index) {
                    if prop.box_type() == box_type {
                        return assoc.index;
                    }
                }
            }
        }
        0
    }

    /// All properties associated with `item_id`, skipping free-space
    /// placeholders and dangling indexes.
    pub fn item_properties(&self, item_id: u32) -> Result<TryVec<PropertyInfo>> {
        let mut infos = TryVec::new();
        for ipma in &self.associations {
            for assoc in ipma.association_entries(item_id) {
                let Some(prop) = self.container.property_by_index(assoc.index) else {
                    continue;
                };
                if matches!(prop, ItemProperty::FreeSpace(_)) {
                    continue;
                }
                infos.push(PropertyInfo {
                    box_type: prop.box_type(),
                    index: assoc.index,
                    essential: assoc.essential,
                })?;
            }
        }
        Ok(infos)
    }

    /// Serialize the property at a 1-based index back into box form.
    pub fn property_data(&self, index: u16) -> Result<TryVec<u8>> {
        let prop = self
            .container
            .property_by_index(index)
            .ok_or(Error::InvalidData("no property at index"))?;
        let mut w = BoxWriter::new();
        prop.write(&mut w)?;
        Ok(w.into_vec())
    }

    /// Add a property to the container and associate it with each id in
    /// `item_ids`. Returns the new property's 1-based index.
    pub fn add_property(&mut self, property: ItemProperty, item_ids: &[u32], essential: bool) -> Result<u16> {
        let index = self.container.add_property(property)?;
        self.associate_property(index, item_ids, essential)?;
        Ok(index)
    }

    /// Associate an existing property index with each id in `item_ids`.
    pub fn associate_property(&mut self, index: u16, item_ids: &[u32], essential: bool) -> Result<()> {
        if self.associations.is_empty() {
            self.associations.push(ItemPropertyAssociation::new())?;
        }
        if self.associations.len() > 1 {
            // Mutation through several ipma boxes would need a policy for
            // choosing which box receives the entry.
            return Err(Error::Unsupported("several ipma boxes"));
        }
        for &item_id in item_ids {
            self.associations[0].add_entry(item_id, index, essential)?;
        }
        Ok(())
    }

    pub(crate) fn parse<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<Self> {
        let mut container = None;
        let mut associations = TryVec::new();

        let mut iter = src.box_iter();
        while let Some(mut b) = iter.next_box()? {
            match b.head.name {
                BoxType::ItemPropertyContainerBox if container.is_none() => {
                    container = Some(ItemPropertyContainer::parse(&mut b, options)?);
                },
                BoxType::ItemPropertyAssociationBox if container.is_some() => {
                    associations.push(ItemPropertyAssociation::parse(&mut b)?)?;
                },
                _ => {
                    return Err(Error::InvalidData(
                        "iprp must contain one ipco box followed by ipma boxes",
                    ));
                },
            }
            check_parser_state(&b.head, &b.content)?;
        }

        Ok(Self {
            container: container.ok_or(Error::InvalidData("iprp missing ipco"))?,
            associations,
        })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::ItemPropertiesBox)?;
        self.container.write(w)?;
        for ipma in &self.associations {
            ipma.write(w)?;
        }
        w.close_box(mark)
    }
}
