//! Serialization cursor for box output.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::boxes::{BoxType, FourCC};
use crate::{Error, Result, TryVec};

/// In-memory write cursor used by every box serializer.
///
/// Multi-byte integers are big-endian; `write_bits` packs MSB-first
/// within each byte, mirroring the read side. Box sizes are not known
/// until the payload is written, so [`BoxWriter::open_box`] reserves
/// the size field and [`BoxWriter::close_box`] patches it in place.
/// Getting that patch wrong corrupts every sibling box that follows,
/// which is why the open/close pairing is enforced with a mark token.
#[derive(Default)]
pub struct BoxWriter {
    buf: TryVec<u8>,
    bit_acc: u8,
    bits_pending: u8,
}

/// Token returned by `open_box`; hand it back to `close_box` to patch
/// the size field of the box it opened.
#[must_use]
pub struct BoxMark {
    start: usize,
    large: bool,
}

impl BoxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> TryVec<u8> {
        debug_assert_eq!(self.bits_pending, 0, "unflushed bits at end of write");
        self.buf
    }

    /// True when no partial byte is pending from `write_bits`.
    pub fn byte_aligned(&self) -> bool {
        self.bits_pending == 0
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        debug_assert!(self.byte_aligned());
        self.buf.push(value)?;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        debug_assert!(self.byte_aligned());
        self.buf.extend_from_slice(&value.to_be_bytes())?;
        Ok(())
    }

    pub fn write_u24(&mut self, value: u32) -> Result<()> {
        debug_assert!(self.byte_aligned());
        debug_assert!(value < 1 << 24);
        self.buf.extend_from_slice(&value.to_be_bytes()[1..])?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        debug_assert!(self.byte_aligned());
        self.buf.extend_from_slice(&value.to_be_bytes())?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        debug_assert!(self.byte_aligned());
        self.buf.extend_from_slice(&value.to_be_bytes())?;
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        debug_assert!(self.byte_aligned());
        self.buf.extend_from_slice(data)?;
        Ok(())
    }

    pub fn write_fourcc(&mut self, cc: FourCC) -> Result<()> {
        self.write_bytes(&cc.value)
    }

    /// Write `s` followed by a single NUL. The read side stops at the
    /// first NUL, so `s` must not contain one.
    pub fn write_zero_terminated(&mut self, s: &[u8]) -> Result<()> {
        debug_assert!(!s.contains(&0));
        self.write_bytes(s)?;
        self.buf.push(0)?;
        Ok(())
    }

    /// Write the low `bits` bits of `value`, MSB first. Whole bytes are
    /// flushed to the buffer as they fill; callers must end each bit-packed
    /// field group on a byte boundary before using the byte-level writers.
    pub fn write_bits(&mut self, value: u64, bits: u8) -> Result<()> {
        debug_assert!(bits >= 1 && bits <= 64);
        debug_assert!(bits == 64 || value <= (1u64 << bits) - 1);
        let mut left = bits;
        while left > 0 {
            let take = (8 - self.bits_pending).min(left);
            let shift = left - take;
            let mask = ((1u16 << take) - 1) as u8;
            let chunk = ((value >> shift) as u8) & mask;
            left -= take;
            // A whole byte is only ever taken when the accumulator is
            // empty; an eight-bit shift on it would overflow.
            if take == 8 {
                self.buf.push(chunk)?;
                continue;
            }
            self.bit_acc = (self.bit_acc << take) | chunk;
            self.bits_pending += take;
            if self.bits_pending == 8 {
                let byte = self.bit_acc;
                self.bit_acc = 0;
                self.bits_pending = 0;
                self.buf.push(byte)?;
            }
        }
        Ok(())
    }

    /// Start a box with a compact (32-bit) size field, returning a mark
    /// for the later size patch.
    pub fn open_box(&mut self, name: BoxType) -> Result<BoxMark> {
        let start = self.buf.len();
        self.write_u32(0)?; // patched by close_box
        self.write_fourcc(FourCC::from(name))?;
        Ok(BoxMark { start, large: false })
    }

    /// Start a box using the extended 64-bit size convention
    /// (compact size field written as 1).
    pub fn open_large_box(&mut self, name: BoxType) -> Result<BoxMark> {
        let start = self.buf.len();
        self.write_u32(1)?;
        self.write_fourcc(FourCC::from(name))?;
        self.write_u64(0)?; // patched by close_box
        Ok(BoxMark { start, large: true })
    }

    /// Start a `uuid` box carrying the given 16-byte user type.
    pub fn open_uuid_box(&mut self, user_type: &[u8; 16]) -> Result<BoxMark> {
        let mark = self.open_box(BoxType::UuidBox)?;
        self.write_bytes(user_type)?;
        Ok(mark)
    }

    /// Start a full box: box header plus one version byte and 24-bit flags.
    pub fn open_full_box(&mut self, name: BoxType, version: u8, flags: u32) -> Result<BoxMark> {
        let mark = self.open_box(name)?;
        self.write_u8(version)?;
        self.write_u24(flags)?;
        Ok(mark)
    }

    /// Patch the size field of the box opened at `mark` to cover all
    /// bytes written since, header included.
    pub fn close_box(&mut self, mark: BoxMark) -> Result<()> {
        debug_assert!(self.byte_aligned());
        let size = (self.buf.len() - mark.start) as u64;
        if mark.large {
            self.buf[mark.start + 8..mark.start + 16].copy_from_slice(&size.to_be_bytes());
        } else {
            let size = u32::try_from(size)
                .map_err(|_| Error::InvalidData("box size exceeds 4 GiB but largesize is not used"))?;
            self.buf[mark.start..mark.start + 4].copy_from_slice(&size.to_be_bytes());
        }
        Ok(())
    }
}
