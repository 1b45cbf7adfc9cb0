#![deny(unsafe_code)]
//! Reading and writing of ISO Base Media File Format (ISOBMFF/HEIF)
//! box structures.
//!
//! Boxes are plain structs with byte-exact `parse` and `write` codecs.
//! The item subsystem is aggregated under [`MetaBox`], which also
//! resolves item payloads across all three construction methods.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::ReadBytesExt;
use fallible_collections::TryReserveError;
use log::debug;

use std::io::{Read, Take};

mod boxes;
mod groups;
mod meta;
mod properties;
mod segments;
mod writer;

pub use crate::boxes::{BoxType, FourCC};
pub use crate::groups::{
    DirectReferenceSamplesList, EntityToGroupBox, GroupsListBox, SampleGroupDescriptionBox,
    SampleGroupEntry, SampleToMetadataItemEntry, VisualEquivalenceEntry,
};
pub use crate::meta::{
    ConstructionMethod, DataEntryBox, DataInformationBox, DataReferenceBox, FdItemInfoExtension,
    HandlerBox, IlocFieldSize, ItemDataBox, ItemInfoBox, ItemInfoEntry, ItemLocation,
    ItemLocationBox, ItemLocationExtent, ItemProtectionBox, ItemReferenceBox, MetaBox,
    ProtectionSchemeInfoBox, SingleItemTypeReferenceBox,
};
pub use crate::properties::{
    AccessibilityTextProperty, AuxiliaryTypeProperty, CleanApertureBox, ColourInformationBox,
    CreationTimeProperty, DecoderConfigurationBox, Fraction16, Fraction32, FreeSpaceBox,
    ImageMirror, ImageRotation, ImageScalingProperty, ImageSpatialExtentsProperty, ItemProperty,
    ItemPropertiesBox, ItemPropertyAssociation, ItemPropertyContainer, JpegConfigurationBox,
    ModificationTimeProperty, PixelAspectRatioBox, PixelInformationProperty, PropertyAssociation,
    PropertyInfo, RawBox, RelativeLocationProperty, RequiredReferenceTypesProperty,
    UserDescriptionProperty,
};
pub use crate::segments::{CompositionToDecodeBox, SegmentIndexBox, SegmentReference};
pub use crate::writer::{BoxMark, BoxWriter};

pub use enough::{Stop, StopReason, Unstoppable};

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self.try_into().ok().unwrap()
    }
}

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;
type TryString = fallible_collections::TryVec<u8>;

// To ensure we don't use stdlib allocating types by accident
#[allow(dead_code)]
struct Vec;
#[allow(dead_code)]
struct Box;
#[allow(dead_code)]
struct HashMap;
#[allow(dead_code)]
struct String;

/// Describes parser failures.
///
/// This enum wraps the standard `io::Error` type, unified with
/// our own parser error states and those of crates we use.
#[derive(Debug)]
pub enum Error {
    /// Parse error caused by corrupt or malformed data.
    InvalidData(&'static str),
    /// Parse error caused by limited parser support rather than invalid data.
    Unsupported(&'static str),
    /// Reflect `std::io::ErrorKind::UnexpectedEof` for short data.
    UnexpectedEOF,
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
    /// Resource limit exceeded during parsing
    ResourceLimitExceeded(&'static str),
    /// Operation was stopped/cancelled
    Stopped(enough::StopReason),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InvalidData(s) | Self::Unsupported(s) | Self::ResourceLimitExceeded(s) => s,
            Self::UnexpectedEOF => "EOF",
            Self::Io(err) => return err.fmt(f),
            Self::OutOfMemory => "OOM",
            Self::Stopped(reason) => return write!(f, "Stopped: {}", reason),
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<bitreader::BitReaderError> for Error {
    #[cold]
    #[cfg_attr(debug_assertions, track_caller)]
    fn from(err: bitreader::BitReaderError) -> Self {
        log::warn!("bitreader: {err}");
        debug_assert!(!matches!(err, bitreader::BitReaderError::TooManyBitsForType { .. })); // bug
        Self::InvalidData("truncated bits")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEOF,
            _ => Self::Io(err),
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::Unsupported("integer conversion failed")
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::InvalidData(_) => std::io::ErrorKind::InvalidData,
            Error::UnexpectedEOF => std::io::ErrorKind::UnexpectedEof,
            Error::Io(io_err) => return io_err,
            _ => std::io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<enough::StopReason> for Error {
    fn from(reason: enough::StopReason) -> Self {
        Self::Stopped(reason)
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Basic ISO box structure.
///
/// ISOBMFF files are a sequence of possibly-nested 'box' structures.
/// Each box begins with a header describing the length of the box's
/// data and a four-byte box type which identifies the type of the box.
/// Together these are enough to interpret the contents of that section
/// of the file.
///
/// See ISO 14496-12:2015 § 4.2
#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    /// Box type.
    name: BoxType,
    /// Size of the box in bytes.
    size: u64,
    /// Offset to the start of the contained data (or header size).
    offset: u64,
    /// Uuid for extended type.
    uuid: Option<[u8; 16]>,
}

impl BoxHeader {
    /// 4-byte size + 4-byte type
    const MIN_SIZE: u64 = 8;
    /// 4-byte size + 4-byte type + 16-byte size
    const MIN_LARGE_SIZE: u64 = 16;
}

/// Options for parsing slightly out-of-spec streams.
#[derive(Debug, Clone, Copy)]
#[derive(Default)]
pub struct ParseOptions {
    /// Enable lenient parsing mode
    ///
    /// When true, non-critical validation errors (like non-zero flags in boxes
    /// that expect zero flags) will be ignored instead of returning errors.
    /// This allows parsing of slightly malformed but otherwise valid files.
    ///
    /// Default: false (strict validation)
    pub lenient: bool,
}

/// Configuration for parsing with resource limits and validation options
///
/// Provides fine-grained control over resource consumption during parsing,
/// allowing defensive parsing against malicious or malformed files.
///
/// Resource limits are checked **before** allocations occur, preventing out-of-memory
/// conditions from malicious files that claim unrealistic sizes or counts.
///
/// # Examples
///
/// ```rust
/// use zenbmff::DecodeConfig;
///
/// // Default limits (suitable for most apps)
/// let config = DecodeConfig::default();
///
/// // Strict limits for untrusted input
/// let config = DecodeConfig::default()
///     .with_peak_memory_limit(100_000_000) // 100MB
///     .with_max_items(1_000);
///
/// // No limits
/// let config = DecodeConfig::unlimited();
/// ```
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Maximum peak heap memory usage in bytes.
    /// Default: 1GB (1,000,000,000 bytes)
    pub peak_memory_limit: Option<u64>,

    /// Maximum number of items declared in a meta box.
    /// Default: 100,000 items
    pub max_items: Option<u32>,

    /// Enable lenient parsing mode.
    /// Default: false (strict validation)
    pub lenient: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            peak_memory_limit: Some(1_000_000_000),
            max_items: Some(100_000),
            lenient: false,
        }
    }
}

impl DecodeConfig {
    /// Create a configuration with no resource limits.
    pub fn unlimited() -> Self {
        Self {
            peak_memory_limit: None,
            max_items: None,
            lenient: false,
        }
    }

    /// Set the peak memory limit in bytes
    pub fn with_peak_memory_limit(mut self, bytes: u64) -> Self {
        self.peak_memory_limit = Some(bytes);
        self
    }

    /// Set the maximum item count
    pub fn with_max_items(mut self, items: u32) -> Self {
        self.max_items = Some(items);
        self
    }

    /// Enable lenient parsing mode
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

struct ResourceTracker<'a> {
    config: &'a DecodeConfig,
    current_memory: u64,
    peak_memory: u64,
}

impl<'a> ResourceTracker<'a> {
    fn new(config: &'a DecodeConfig) -> Self {
        Self {
            config,
            current_memory: 0,
            peak_memory: 0,
        }
    }

    fn reserve(&mut self, bytes: u64) -> Result<()> {
        self.current_memory = self.current_memory.saturating_add(bytes);
        self.peak_memory = self.peak_memory.max(self.current_memory);

        if let Some(limit) = self.config.peak_memory_limit {
            if self.peak_memory > limit {
                return Err(Error::ResourceLimitExceeded("peak memory limit exceeded"));
            }
        }

        Ok(())
    }

    fn release(&mut self, bytes: u64) {
        self.current_memory = self.current_memory.saturating_sub(bytes);
    }

    fn validate_item_count(&self, count: u32) -> Result<()> {
        if let Some(limit) = self.config.max_items {
            if count > limit {
                return Err(Error::ResourceLimitExceeded("item count limit exceeded"));
            }
        }

        Ok(())
    }
}

/// File type box 'ftyp'.
/// See ISO 14496-12:2015 § 4.3
#[derive(Debug, Default, PartialEq)]
pub struct FileTypeBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: TryVec<FourCC>,
}

/// Track type box 'ttyp': the brand payload of 'ftyp' carried in a
/// full box, declared per track.
#[derive(Debug, Default, PartialEq)]
pub struct TrackTypeBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: TryVec<FourCC>,
}

/// Brand payload shared by 'ftyp' and 'ttyp'. Only the headers differ.
fn read_brands<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<(FourCC, u32, TryVec<FourCC>)> {
    let major_brand = be_u32(src)?.into();
    let minor_version = be_u32(src)?;
    let bytes_left = src.bytes_left();
    if bytes_left % 4 != 0 {
        return Err(Error::InvalidData("invalid brand list size"));
    }
    let brand_count = bytes_left / 4;
    let mut compatible_brands = TryVec::with_capacity(brand_count.try_into()?)?;
    for _ in 0..brand_count {
        compatible_brands.push(be_u32(src)?.into())?;
    }
    Ok((major_brand, minor_version, compatible_brands))
}

fn write_brands(
    w: &mut BoxWriter,
    major_brand: FourCC,
    minor_version: u32,
    compatible_brands: &[FourCC],
) -> Result<()> {
    w.write_fourcc(major_brand)?;
    w.write_u32(minor_version)?;
    for &brand in compatible_brands {
        w.write_fourcc(brand)?;
    }
    Ok(())
}

impl FileTypeBox {
    /// Parse a standalone 'ftyp' box.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        let mut iter = BoxIter::new(&mut reader);
        let mut b = iter.next_box()?.ok_or(Error::UnexpectedEOF)?;
        if b.head.name != BoxType::FileTypeBox {
            return Err(Error::InvalidData("expected ftyp box"));
        }
        let (major_brand, minor_version, compatible_brands) = read_brands(&mut b)?;
        check_parser_state(&b.head, &b.content)?;
        Ok(Self { major_brand, minor_version, compatible_brands })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_box(BoxType::FileTypeBox)?;
        write_brands(w, self.major_brand, self.minor_version, &self.compatible_brands)?;
        w.close_box(mark)
    }

    pub fn to_bytes(&self) -> Result<TryVec<u8>> {
        let mut w = BoxWriter::new();
        self.write(&mut w)?;
        Ok(w.into_vec())
    }

    /// True when `brand` is the major brand or listed as compatible.
    pub fn has_brand(&self, brand: FourCC) -> bool {
        self.major_brand == brand || self.compatible_brands.contains(&brand)
    }
}

impl TrackTypeBox {
    /// Parse a standalone 'ttyp' box.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = data;
        let mut iter = BoxIter::new(&mut reader);
        let mut b = iter.next_box()?.ok_or(Error::UnexpectedEOF)?;
        if b.head.name != BoxType::TrackTypeBox {
            return Err(Error::InvalidData("expected ttyp box"));
        }
        let version = read_fullbox_version_no_flags(&mut b, &ParseOptions::default())?;
        if version != 0 {
            return Err(Error::Unsupported("ttyp version"));
        }
        let (major_brand, minor_version, compatible_brands) = read_brands(&mut b)?;
        check_parser_state(&b.head, &b.content)?;
        Ok(Self { major_brand, minor_version, compatible_brands })
    }

    pub fn write(&self, w: &mut BoxWriter) -> Result<()> {
        let mark = w.open_full_box(BoxType::TrackTypeBox, 0, 0)?;
        write_brands(w, self.major_brand, self.minor_version, &self.compatible_brands)?;
        w.close_box(mark)
    }

    pub fn to_bytes(&self) -> Result<TryVec<u8>> {
        let mut w = BoxWriter::new();
        self.write(&mut w)?;
        Ok(w.into_vec())
    }

    /// True when `brand` is the major brand or listed as compatible.
    pub fn has_brand(&self, brand: FourCC) -> bool {
        self.major_brand == brand || self.compatible_brands.contains(&brand)
    }
}

#[test]
fn ftyp_round_trip() {
    let ftyp = FileTypeBox {
        major_brand: FourCC::from(*b"mif1"),
        minor_version: 0,
        compatible_brands: {
            let mut brands = TryVec::new();
            brands.push(FourCC::from(*b"mif1")).unwrap();
            brands.push(FourCC::from(*b"heic")).unwrap();
            brands
        },
    };
    let bytes = ftyp.to_bytes().unwrap();
    assert_eq!(bytes.len(), 24);
    let reparsed = FileTypeBox::from_bytes(&bytes).unwrap();
    assert_eq!(reparsed, ftyp);
    assert!(reparsed.has_brand(FourCC::from(*b"heic")));
    assert!(!reparsed.has_brand(FourCC::from(*b"avif")));
}

#[test]
fn ftyp_brand_list_must_be_whole_brands() {
    // 21-byte box leaves a 13-byte payload, not a multiple of 4.
    let bytes = b"\x00\x00\x00\x15ftypmif1\x00\x00\x00\x00hei";
    assert!(matches!(
        FileTypeBox::from_bytes(bytes),
        Err(Error::InvalidData("invalid brand list size"))
    ));
}

#[test]
fn ttyp_round_trip() {
    let ttyp = TrackTypeBox {
        major_brand: FourCC::from(*b"msf1"),
        minor_version: 0,
        compatible_brands: {
            let mut brands = TryVec::new();
            brands.push(FourCC::from(*b"msf1")).unwrap();
            brands
        },
    };
    let bytes = ttyp.to_bytes().unwrap();
    // Full box header adds 4 bytes over the equivalent ftyp.
    assert_eq!(bytes.len(), 24);
    let reparsed = TrackTypeBox::from_bytes(&bytes).unwrap();
    assert_eq!(reparsed, ttyp);
}

/// See ISO 14496-12:2015 § 4.2
struct BMFFBox<'a, T> {
    head: BoxHeader,
    content: Take<&'a mut T>,
}

impl<T: Read> BMFFBox<'_, T> {
    fn read_into_try_vec(&mut self) -> std::io::Result<TryVec<u8>> {
        let limit = self.content.limit();
        // For size=0 boxes, size is set to u64::MAX, but after subtracting offset
        // (8 or 16 bytes), the limit will be slightly less. Check for values very
        // close to u64::MAX to detect these cases.
        let mut vec = if limit >= u64::MAX - BoxHeader::MIN_LARGE_SIZE {
            // Unknown size (size=0 box), read without pre-allocation
            std::vec::Vec::new()
        } else {
            let mut v = std::vec::Vec::new();
            v.try_reserve_exact(limit as usize)
                .map_err(|_| std::io::ErrorKind::OutOfMemory)?;
            v
        };
        self.content.read_to_end(&mut vec)?; // The default impl
        Ok(vec.into())
    }
}

#[test]
fn box_read_to_end() {
    let tmp = &mut b"1234567890".as_slice();
    let mut src = BMFFBox {
        head: BoxHeader { name: BoxType::FileTypeBox, size: 5, offset: 0, uuid: None },
        content: <_ as Read>::take(tmp, 5),
    };
    let buf = src.read_into_try_vec().unwrap();
    assert_eq!(buf.len(), 5);
    assert_eq!(buf, b"12345".as_ref());
}

#[test]
fn box_read_to_end_oom() {
    let tmp = &mut b"1234567890".as_slice();
    let mut src = BMFFBox {
        head: BoxHeader { name: BoxType::FileTypeBox, size: 5, offset: 0, uuid: None },
        // Use a very large value to trigger OOM, but not near u64::MAX (which indicates size=0 boxes)
        content: <_ as Read>::take(tmp, u64::MAX / 2),
    };
    assert!(src.read_into_try_vec().is_err());
}

struct BoxIter<'a, T> {
    src: &'a mut T,
}

impl<T: Read> BoxIter<'_, T> {
    fn new(src: &mut T) -> BoxIter<'_, T> {
        BoxIter { src }
    }

    fn next_box(&mut self) -> Result<Option<BMFFBox<'_, T>>> {
        let r = read_box_header(self.src);
        match r {
            Ok(h) => Ok(Some(BMFFBox {
                head: h,
                content: self.src.take(h.size - h.offset),
            })),
            Err(Error::UnexpectedEOF) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T: Read> Read for BMFFBox<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.content.read(buf)
    }
}

impl<T: Read> BMFFBox<'_, T> {
    fn bytes_left(&self) -> u64 {
        self.content.limit()
    }

    const fn get_header(&self) -> &BoxHeader {
        &self.head
    }

    fn box_iter(&mut self) -> BoxIter<'_, Self> {
        BoxIter::new(self)
    }
}

impl<T> Drop for BMFFBox<'_, T> {
    fn drop(&mut self) {
        if self.content.limit() > 0 {
            let name: FourCC = From::from(self.head.name);
            debug!("Dropping {} bytes in '{}'", self.content.limit(), name);
        }
    }
}

/// Read and parse a box header.
///
/// Call this first to determine the type of a particular box and its
/// length. Used internally for dispatching to specific parsers for the
/// internal content, or to get the length to skip unknown or
/// uninteresting boxes.
///
/// See ISO 14496-12:2015 § 4.2
fn read_box_header<T: ReadBytesExt>(src: &mut T) -> Result<BoxHeader> {
    let size32 = be_u32(src)?;
    let name = BoxType::from(be_u32(src)?);
    let size = match size32 {
        // valid only for top-level box and indicates it's the last box in the file.  usually mdat.
        0 => {
            // Size=0 means box extends to EOF (ISOBMFF spec allows this for last box)
            u64::MAX
        },
        1 => {
            let size64 = be_u64(src)?;
            if size64 < BoxHeader::MIN_LARGE_SIZE {
                return Err(Error::InvalidData("malformed wide size"));
            }
            size64
        },
        _ => {
            if u64::from(size32) < BoxHeader::MIN_SIZE {
                return Err(Error::InvalidData("malformed size"));
            }
            u64::from(size32)
        },
    };
    let mut offset = match size32 {
        1 => BoxHeader::MIN_LARGE_SIZE,
        _ => BoxHeader::MIN_SIZE,
    };
    let uuid = if name == BoxType::UuidBox {
        if size >= offset + 16 {
            let mut buffer = [0u8; 16];
            let count = src.read(&mut buffer)?;
            offset += count.to_u64();
            if count == 16 {
                Some(buffer)
            } else {
                debug!("malformed uuid (short read), skipping");
                None
            }
        } else {
            debug!("malformed uuid, skipping");
            None
        }
    } else {
        None
    };
    assert!(offset <= size);
    Ok(BoxHeader { name, size, offset, uuid })
}

/// Parse the extra header fields for a full box.
fn read_fullbox_extra<T: ReadBytesExt>(src: &mut T) -> Result<(u8, u32)> {
    let version = src.read_u8()?;
    let flags_a = src.read_u8()?;
    let flags_b = src.read_u8()?;
    let flags_c = src.read_u8()?;
    Ok((
        version,
        u32::from(flags_a) << 16 | u32::from(flags_b) << 8 | u32::from(flags_c),
    ))
}

// Parse the extra fields for a full box whose flag fields must be zero.
fn read_fullbox_version_no_flags<T: ReadBytesExt>(src: &mut T, options: &ParseOptions) -> Result<u8> {
    let (version, flags) = read_fullbox_extra(src)?;

    if flags != 0 && !options.lenient {
        return Err(Error::Unsupported("expected flags to be 0"));
    }

    Ok(version)
}

/// Skip over the entire contents of a box.
fn skip_box_content<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    // Skip the contents of unknown chunks.
    let to_skip = {
        let header = src.get_header();
        debug!("{header:?} (skipped)");
        header
            .size
            .checked_sub(header.offset)
            .ok_or(Error::InvalidData("header offset > size"))?
    };
    assert_eq!(to_skip, src.bytes_left());
    skip(src, to_skip)
}

/// Skip over the remain data of a box.
fn skip_box_remain<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    let remain = {
        let header = src.get_header();
        let len = src.bytes_left();
        debug!("remain {len} (skipped) in {header:?}");
        len
    };
    skip(src, remain)
}

#[cfg_attr(debug_assertions, track_caller)]
fn check_parser_state<T>(header: &BoxHeader, left: &Take<T>) -> Result<(), Error> {
    let limit = left.limit();
    // Allow fully consumed boxes, or size=0 boxes (where original size was u64::MAX)
    if limit == 0 || header.size == u64::MAX {
        Ok(())
    } else {
        debug_assert_eq!(0, limit, "bad parser state bytes left");
        Err(Error::InvalidData("unread box content or bad parser sync"))
    }
}

/// Skip a number of bytes that we don't care to parse.
fn skip<T: Read>(src: &mut T, bytes: u64) -> Result<()> {
    std::io::copy(&mut src.take(bytes), &mut std::io::sink())?;
    Ok(())
}

/// Read exactly `size` bytes into a new buffer.
fn read_buf<T: Read>(src: &mut T, size: u64) -> Result<TryVec<u8>> {
    let mut vec = std::vec::Vec::new();
    vec.try_reserve_exact(size.try_into()?)
        .map_err(|_| Error::OutOfMemory)?;
    let read = src.take(size).read_to_end(&mut vec)?;
    if read.to_u64() != size {
        return Err(Error::UnexpectedEOF);
    }
    Ok(vec.into())
}

/// Read a zero-terminated string, stopping at the end of the box when
/// no terminator is present.
fn read_zero_terminated<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<TryString> {
    let mut out = TryVec::new();
    while src.bytes_left() > 0 {
        let byte = src.read_u8()?;
        if byte == 0 {
            break;
        }
        out.push(byte)?;
    }
    Ok(out)
}

fn be_u16<T: ReadBytesExt>(src: &mut T) -> Result<u16> {
    src.read_u16::<byteorder::BigEndian>().map_err(From::from)
}

fn be_i16<T: ReadBytesExt>(src: &mut T) -> Result<i16> {
    src.read_i16::<byteorder::BigEndian>().map_err(From::from)
}

fn be_u32<T: ReadBytesExt>(src: &mut T) -> Result<u32> {
    src.read_u32::<byteorder::BigEndian>().map_err(From::from)
}

fn be_u64<T: ReadBytesExt>(src: &mut T) -> Result<u64> {
    src.read_u64::<byteorder::BigEndian>().map_err(From::from)
}

#[test]
fn header_sizes() {
    let mut compact = b"\x00\x00\x00\x08free".as_slice();
    let h = read_box_header(&mut compact).unwrap();
    assert_eq!(h.name, BoxType::FreeSpaceBox);
    assert_eq!(h.size, 8);
    assert_eq!(h.offset, 8);

    let mut large = b"\x00\x00\x00\x01mdat\x00\x00\x00\x00\x00\x00\x00\x18".as_slice();
    let h = read_box_header(&mut large).unwrap();
    assert_eq!(h.size, 24);
    assert_eq!(h.offset, 16);

    let mut to_eof = b"\x00\x00\x00\x00mdat".as_slice();
    let h = read_box_header(&mut to_eof).unwrap();
    assert_eq!(h.size, u64::MAX);

    let mut undersized = b"\x00\x00\x00\x05free".as_slice();
    assert!(matches!(
        read_box_header(&mut undersized),
        Err(Error::InvalidData("malformed size"))
    ));
}

#[test]
fn unterminated_string_stops_at_box_end() {
    let bytes = b"\x00\x00\x00\x0cfreeabcd";
    let mut reader = bytes.as_slice();
    let mut iter = BoxIter::new(&mut reader);
    let mut b = iter.next_box().unwrap().unwrap();
    let s = read_zero_terminated(&mut b).unwrap();
    assert_eq!(s, b"abcd".as_ref());
    assert_eq!(b.bytes_left(), 0);
}

#[test]
fn read_buf_requires_full_read() {
    let mut short = b"abc".as_slice();
    assert!(matches!(read_buf(&mut short, 4), Err(Error::UnexpectedEOF)));
    let mut exact = b"abcd".as_slice();
    assert_eq!(read_buf(&mut exact, 4).unwrap(), b"abcd".as_ref());
}
