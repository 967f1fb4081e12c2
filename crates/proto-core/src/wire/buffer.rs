use byteorder::{ByteOrder, LittleEndian};

use crate::error::WireError;

const INITIAL_BIT_POS: u8 = 8;

/// Which side owns `bitpos`/`curbitval`. Switching sides settles the other
/// side first: pending written bits are flushed, a partly read byte is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitMode {
    Idle,
    Reading,
    Writing,
}

/// Growable byte buffer with independent read and write cursors plus an
/// MSB-first bit packer.
///
/// `rpos <= wpos <= storage.len()` always holds. Byte-level appends flush any
/// pending bits first; byte-level reads drop any partially consumed bit byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBuffer {
    storage: Vec<u8>,
    rpos: usize,
    wpos: usize,
    bitpos: u8,
    curbitval: u8,
    bit_mode: BitMode,
}

impl Default for WireBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<u8>> for WireBuffer {
    fn from(storage: Vec<u8>) -> Self {
        let wpos = storage.len();
        Self {
            storage,
            rpos: 0,
            wpos,
            bitpos: INITIAL_BIT_POS,
            curbitval: 0,
            bit_mode: BitMode::Idle,
        }
    }
}

macro_rules! fixed_width {
    ($($append:ident, $read:ident, $ty:ty, $len:expr, $write_fn:ident, $read_fn:ident;)*) => {
        $(
            pub fn $append(&mut self, value: $ty) -> &mut Self {
                let mut bytes = [0u8; $len];
                LittleEndian::$write_fn(&mut bytes, value);
                self.append(&bytes)
            }

            pub fn $read(&mut self) -> Result<$ty, WireError> {
                Ok(LittleEndian::$read_fn(self.read_bytes($len)?))
            }
        )*
    };
}

impl WireBuffer {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            rpos: 0,
            wpos: 0,
            bitpos: INITIAL_BIT_POS,
            curbitval: 0,
            bit_mode: BitMode::Idle,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.wpos
    }

    pub fn is_empty(&self) -> bool {
        self.wpos == 0
    }

    pub fn rpos(&self) -> usize {
        self.rpos
    }

    pub fn set_rpos(&mut self, pos: usize) -> Result<(), WireError> {
        if pos > self.wpos {
            return Err(WireError::OutOfBounds {
                pos,
                requested: 0,
                size: self.wpos,
            });
        }
        self.rpos = pos;
        Ok(())
    }

    pub fn wpos(&self) -> usize {
        self.wpos
    }

    pub fn set_wpos(&mut self, pos: usize) -> Result<(), WireError> {
        if pos > self.storage.len() || pos < self.rpos {
            return Err(WireError::OutOfBounds {
                pos,
                requested: 0,
                size: self.storage.len(),
            });
        }
        self.wpos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.wpos - self.rpos
    }

    pub fn contents(&self) -> &[u8] {
        &self.storage[..self.wpos]
    }

    pub fn unread(&self) -> &[u8] {
        &self.storage[self.rpos..self.wpos]
    }

    pub fn into_inner(mut self) -> Vec<u8> {
        self.storage.truncate(self.wpos);
        self.storage
    }

    pub fn clear(&mut self) {
        self.storage.clear();
        self.rpos = 0;
        self.wpos = 0;
        self.bitpos = INITIAL_BIT_POS;
        self.curbitval = 0;
        self.bit_mode = BitMode::Idle;
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        let end = self.wpos + bytes.len();
        if self.storage.len() < end {
            self.storage.resize(end, 0);
        }
        self.storage[self.wpos..end].copy_from_slice(bytes);
        self.wpos = end;
    }

    fn read_raw(&mut self, len: usize) -> Result<&[u8], WireError> {
        let start = self.rpos;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.wpos)
            .ok_or(WireError::OutOfBounds {
                pos: start,
                requested: len,
                size: self.wpos,
            })?;
        self.rpos = end;
        Ok(&self.storage[start..end])
    }

    pub fn append(&mut self, bytes: &[u8]) -> &mut Self {
        self.flush_bits();
        self.write_raw(bytes);
        self
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], WireError> {
        self.reset_bit_pos();
        self.read_raw(len)
    }

    pub fn read_skip(&mut self, len: usize) -> Result<(), WireError> {
        self.read_bytes(len).map(|_| ())
    }

    /// Overwrites already-written bytes without moving either cursor.
    pub fn put(&mut self, pos: usize, bytes: &[u8]) -> Result<(), WireError> {
        let end = pos
            .checked_add(bytes.len())
            .filter(|end| *end <= self.wpos)
            .ok_or(WireError::OutOfBounds {
                pos,
                requested: bytes.len(),
                size: self.wpos,
            })?;
        self.storage[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn put_u32(&mut self, pos: usize, value: u32) -> Result<(), WireError> {
        self.put(pos, &value.to_le_bytes())
    }

    pub fn append_u8(&mut self, value: u8) -> &mut Self {
        self.append(&[value])
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn append_i8(&mut self, value: i8) -> &mut Self {
        self.append(&value.to_le_bytes())
    }

    pub fn read_i8(&mut self) -> Result<i8, WireError> {
        Ok(self.read_u8()? as i8)
    }

    fixed_width! {
        append_u16, read_u16, u16, 2, write_u16, read_u16;
        append_i16, read_i16, i16, 2, write_i16, read_i16;
        append_u32, read_u32, u32, 4, write_u32, read_u32;
        append_i32, read_i32, i32, 4, write_i32, read_i32;
        append_u64, read_u64, u64, 8, write_u64, read_u64;
        append_i64, read_i64, i64, 8, write_i64, read_i64;
        append_f32, read_f32_unchecked, f32, 4, write_f32, read_f32;
        append_f64, read_f64_unchecked, f64, 8, write_f64, read_f64;
    }

    /// Reads an `f32`, rejecting NaN and infinities.
    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        let pos = self.rpos;
        let value = self.read_f32_unchecked()?;
        if !value.is_finite() {
            return Err(WireError::NonFinite { pos });
        }
        Ok(value)
    }

    pub fn read_f64(&mut self) -> Result<f64, WireError> {
        let pos = self.rpos;
        let value = self.read_f64_unchecked()?;
        if !value.is_finite() {
            return Err(WireError::NonFinite { pos });
        }
        Ok(value)
    }

    // Strings

    pub fn append_string(&mut self, value: &str) -> &mut Self {
        self.append(value.as_bytes())
    }

    pub fn append_cstring(&mut self, value: &str) -> &mut Self {
        self.append(value.as_bytes());
        self.write_raw(&[0]);
        self
    }

    pub fn read_string(&mut self, len: usize) -> Result<String, WireError> {
        let pos = self.rpos;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidString { pos })
    }

    pub fn read_cstring(&mut self) -> Result<String, WireError> {
        self.reset_bit_pos();
        let pos = self.rpos;
        let len = self.storage[pos..self.wpos]
            .iter()
            .position(|b| *b == 0)
            .ok_or(WireError::Unterminated { pos })?;
        let value = self.read_string(len)?;
        self.read_raw(1)?;
        Ok(value)
    }

    pub fn append_u8_string(&mut self, value: &str) -> Result<&mut Self, WireError> {
        let len = u8::try_from(value.len()).map_err(|_| WireError::TooLong {
            what: "u8-prefixed string",
            len: value.len(),
        })?;
        Ok(self.append_u8(len).append_string(value))
    }

    pub fn read_u8_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u8()? as usize;
        self.read_string(len)
    }

    pub fn append_u16_string(&mut self, value: &str) -> Result<&mut Self, WireError> {
        let len = u16::try_from(value.len()).map_err(|_| WireError::TooLong {
            what: "u16-prefixed string",
            len: value.len(),
        })?;
        Ok(self.append_u16(len).append_string(value))
    }

    pub fn read_u16_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        self.read_string(len)
    }

    // Bit packing

    pub fn write_bit(&mut self, bit: bool) -> bool {
        if self.bit_mode != BitMode::Writing {
            self.bitpos = INITIAL_BIT_POS;
            self.curbitval = 0;
            self.bit_mode = BitMode::Writing;
        }
        self.bitpos -= 1;
        if bit {
            self.curbitval |= 1 << self.bitpos;
        }

        if self.bitpos == 0 {
            self.flush_bits();
        }

        bit
    }

    /// Writes the low `count` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u32, count: u32) -> &mut Self {
        for i in (0..count.min(32)).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
        self
    }

    pub fn flush_bits(&mut self) {
        if !self.has_pending_bits() {
            return;
        }

        let value = self.curbitval;
        self.write_raw(&[value]);
        self.bitpos = INITIAL_BIT_POS;
        self.curbitval = 0;
        self.bit_mode = BitMode::Idle;
    }

    pub fn has_pending_bits(&self) -> bool {
        self.bit_mode == BitMode::Writing && self.bitpos != INITIAL_BIT_POS
    }

    pub fn read_bit(&mut self) -> Result<bool, WireError> {
        if self.bit_mode != BitMode::Reading {
            self.flush_bits();
            self.bitpos = INITIAL_BIT_POS;
            self.curbitval = 0;
            self.bit_mode = BitMode::Reading;
        }
        let next = self.bitpos + 1;
        if next > 7 {
            self.curbitval = self.read_raw(1)?[0];
            self.bitpos = 0;
        } else {
            self.bitpos = next;
        }

        Ok((self.curbitval >> (7 - self.bitpos)) & 1 != 0)
    }

    pub fn read_bits(&mut self, count: u32) -> Result<u32, WireError> {
        let mut value = 0u32;
        for i in (0..count.min(32)).rev() {
            if self.read_bit()? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    /// Drops the rest of a partly read bit byte. Pending written bits are
    /// left alone.
    pub fn reset_bit_pos(&mut self) {
        if self.bit_mode != BitMode::Reading {
            return;
        }
        self.bitpos = INITIAL_BIT_POS;
        self.curbitval = 0;
        self.bit_mode = BitMode::Idle;
    }

    /// Absolute bit offset of the next bit `write_bit` would produce.
    pub fn bit_wpos(&self) -> usize {
        if self.bit_mode == BitMode::Writing {
            self.wpos * 8 + (INITIAL_BIT_POS - self.bitpos) as usize
        } else {
            self.wpos * 8
        }
    }

    /// Overwrites `count` already-flushed bits starting at bit offset `pos`.
    pub fn put_bits(&mut self, pos: usize, value: u32, count: u32) -> Result<(), WireError> {
        let count = count.min(32) as usize;
        pos.checked_add(count)
            .map(|end| end.div_ceil(8))
            .filter(|end_byte| *end_byte <= self.wpos)
            .ok_or(WireError::OutOfBounds {
                pos: pos / 8,
                requested: count.div_ceil(8),
                size: self.wpos,
            })?;

        for i in 0..count {
            let byte = (pos + i) / 8;
            let bit = (pos + i) % 8;
            if (value >> (count - i - 1)) & 1 != 0 {
                self.storage[byte] |= 1 << (7 - bit);
            } else {
                self.storage[byte] &= !(1 << (7 - bit));
            }
        }
        Ok(())
    }

    // Obfuscated GUID fields

    /// Writes `b ^ 1`, or nothing when `b` is zero.
    pub fn write_byte_seq(&mut self, b: u8) -> &mut Self {
        if b != 0 {
            self.append_u8(b ^ 1);
        }
        self
    }

    /// Counterpart of `write_byte_seq`: only consumes a byte when the mask
    /// left `b` non-zero.
    pub fn read_byte_seq(&mut self, b: u8) -> Result<u8, WireError> {
        if b == 0 {
            return Ok(0);
        }
        Ok(b ^ self.read_u8()?)
    }

    /// One mask bit per GUID byte, in the message's own byte order.
    /// Indices are taken modulo 8.
    pub fn write_guid_mask(&mut self, guid: u64, order: &[usize]) -> &mut Self {
        let bytes = guid.to_le_bytes();
        for &index in order {
            self.write_bit(bytes[index & 7] != 0);
        }
        self
    }

    pub fn write_guid_bytes(&mut self, guid: u64, order: &[usize]) -> &mut Self {
        let bytes = guid.to_le_bytes();
        for &index in order {
            self.write_byte_seq(bytes[index & 7]);
        }
        self
    }

    pub fn read_guid_mask(&mut self, guid: &mut [u8; 8], order: &[usize]) -> Result<(), WireError> {
        for &index in order {
            guid[index & 7] = u8::from(self.read_bit()?);
        }
        Ok(())
    }

    pub fn read_guid_bytes(&mut self, guid: &mut [u8; 8], order: &[usize]) -> Result<(), WireError> {
        for &index in order {
            guid[index & 7] = self.read_byte_seq(guid[index & 7])?;
        }
        Ok(())
    }

    // Compact encodings

    pub fn append_packed_time(&mut self, time: PackedTime) -> &mut Self {
        self.append_u32(time.pack())
    }

    pub fn read_packed_time(&mut self) -> Result<PackedTime, WireError> {
        Ok(PackedTime::unpack(self.read_u32()?))
    }

    /// Quarter-unit fixed point: 11 bits x, 11 bits y, 10 bits z.
    pub fn append_pack_xyz(&mut self, x: f32, y: f32, z: f32) -> &mut Self {
        let mut packed = 0u32;
        packed |= ((x / 0.25) as i32 & 0x7FF) as u32;
        packed |= (((y / 0.25) as i32 & 0x7FF) as u32) << 11;
        packed |= (((z / 0.25) as i32 & 0x3FF) as u32) << 22;
        self.append_u32(packed)
    }
}

/// Calendar time packed into one `u32` the way the game client stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedTime {
    pub minute: u8,
    pub hour: u8,
    /// 0 = Sunday.
    pub weekday: u8,
    /// 1-based.
    pub day: u8,
    /// 0-based.
    pub month: u8,
    pub year: u16,
}

impl PackedTime {
    pub fn pack(&self) -> u32 {
        let year = u32::from(self.year.saturating_sub(2000)) & 0x1F;
        let day = u32::from(self.day.saturating_sub(1)) & 0x3F;
        (year << 24)
            | ((u32::from(self.month) & 0xF) << 20)
            | (day << 14)
            | ((u32::from(self.weekday) & 0x7) << 11)
            | ((u32::from(self.hour) & 0x1F) << 6)
            | (u32::from(self.minute) & 0x3F)
    }

    pub fn unpack(packed: u32) -> Self {
        Self {
            minute: (packed & 0x3F) as u8,
            hour: ((packed >> 6) & 0x1F) as u8,
            weekday: ((packed >> 11) & 0x7) as u8,
            day: (((packed >> 14) & 0x3F) + 1) as u8,
            month: ((packed >> 20) & 0xF) as u8,
            year: (((packed >> 24) & 0x1F) + 2000) as u16,
        }
    }
}
