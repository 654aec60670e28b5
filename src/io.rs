//! Primitive byte codec.
//!
//! [`ByteWriter`] is an append-only buffer and [`ByteReader`] a cursor over a
//! borrowed byte slice. Both are purely mechanical: they know about byte order,
//! varints and length prefixes, never about records or values.
//!
//! ## Encodings
//!
//! - Fixed-width integers and floats are little-endian.
//! - Unsigned varints carry 7 bits per byte, least significant group first,
//!   with the high bit set on every byte except the last.
//! - Signed varints are zigzag-mapped first (`n >= 0 -> 2n`, `n < 0 -> -2n - 1`)
//!   so small negative numbers stay short.
//! - Strings and blobs are a varint length followed by the raw bytes.

use crate::error::{Result, format_error};

/// Longest possible encoding of a `u64` varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Maps a signed integer onto an unsigned one so that small magnitudes stay small.
#[inline]
pub const fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub const fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Number of bytes [`ByteWriter::write_varint`] emits for `value`.
#[inline]
pub const fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Growable output buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Creates an empty writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrows the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer and returns the buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Appends raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Appends one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Appends a `bool` as a single `0`/`1` byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Appends a fixed-width little-endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Appends a fixed-width little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Appends a fixed-width little-endian `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Appends a fixed-width little-endian `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.write_raw(&value.to_bits().to_le_bytes());
    }

    /// Appends a fixed-width little-endian `f64`.
    pub fn write_f64(&mut self, value: f64) {
        self.write_raw(&value.to_bits().to_le_bytes());
    }

    /// Appends an unsigned varint.
    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Appends a zigzag-mapped signed varint.
    pub fn write_varint_signed(&mut self, value: i64) {
        self.write_varint(zigzag_encode(value));
    }

    /// Appends a varint length prefix followed by `bytes`.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.write_raw(bytes);
    }

    /// Appends a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_blob(value.as_bytes());
    }

    /// Overwrites previously written bytes starting at `offset`.
    ///
    /// This is the in-memory counterpart of the container's seek-back patch.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| format_error(format!("patch at {offset} outside buffer")))?;
        self.buf[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Returns true if the cursor reached the end.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Moves the cursor to an absolute position.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.bytes.len() {
            return Err(format_error(format!(
                "seek to {pos} beyond buffer of {} bytes",
                self.bytes.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Reads exactly `len` bytes, borrowing them from the underlying slice.
    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                format_error(format!(
                    "unexpected end of buffer: wanted {len} bytes at offset {}",
                    self.pos
                ))
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a `bool` written by [`ByteWriter::write_bool`].
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(format_error(format!("invalid bool byte {other}"))),
        }
    }

    /// Reads a fixed-width little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Reads a fixed-width little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a fixed-width little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads a fixed-width little-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_array().map(|b| f32::from_bits(u32::from_le_bytes(b)))
    }

    /// Reads a fixed-width little-endian `f64`.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.read_array().map(|b| f64::from_bits(u64::from_le_bytes(b)))
    }

    /// Reads an unsigned varint that must fit in `bits` bits.
    ///
    /// A varint whose continuation runs past `bits`, or whose final group
    /// carries bits above the limit, is a format error.
    pub fn read_varint_bits(&mut self, bits: u32) -> Result<u64> {
        let start = self.pos;
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_u8().map_err(|_| {
                format_error(format!("truncated varint at offset {start}"))
            })?;
            let group = u64::from(byte & 0x7F);
            if shift >= bits || (bits - shift < 7 && group >> (bits - shift) != 0) {
                return Err(format_error(format!(
                    "varint at offset {start} overflows {bits} bits"
                )));
            }
            value |= group << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Reads an unsigned 64-bit varint.
    pub fn read_varint(&mut self) -> Result<u64> {
        self.read_varint_bits(64)
    }

    /// Reads an unsigned 32-bit varint.
    pub fn read_varint_u32(&mut self) -> Result<u32> {
        // Width was checked by read_varint_bits.
        self.read_varint_bits(32).map(|v| v as u32)
    }

    /// Reads a zigzag-mapped signed varint.
    pub fn read_varint_signed(&mut self) -> Result<i64> {
        self.read_varint().map(zigzag_decode)
    }

    /// Reads a varint length and converts it to `usize`, checking it against
    /// the bytes actually left so hostile lengths fail before allocating.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| format_error(format!("length {len} does not fit in usize")))?;
        if len > self.remaining() {
            return Err(format_error(format!(
                "length {len} exceeds {} remaining bytes",
                self.remaining()
            )));
        }
        Ok(len)
    }

    /// Reads a length-prefixed blob.
    pub fn read_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.read_exact(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let bytes = self.read_blob()?;
        std::str::from_utf8(bytes).map_err(|e| format_error(format!("invalid UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varint_boundaries() {
        for (value, len) in [
            (0u64, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (u64::MAX, MAX_VARINT_LEN),
        ] {
            let mut w = ByteWriter::new();
            w.write_varint(value);
            assert_eq!(w.len(), len, "length of {value}");
            assert_eq!(varint_len(value), len);
            let mut r = ByteReader::new(w.as_slice());
            assert_eq!(r.read_varint().unwrap(), value);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn zigzag_small_negatives_stay_short() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_encode(i64::MIN), u64::MAX);
        let mut w = ByteWriter::new();
        w.write_varint_signed(-64);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn truncated_varint_is_a_format_error() {
        let mut r = ByteReader::new(&[0x80, 0x80]);
        assert!(r.read_varint().unwrap_err().is_format());
    }

    #[test]
    fn overlong_varint_is_a_format_error() {
        let mut r = ByteReader::new(&[0xFF; 11]);
        assert!(r.read_varint().is_err());

        // Five bytes whose last group carries bits above 32.
        let mut r = ByteReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);
        assert!(r.read_varint_u32().is_err());
        let mut r = ByteReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(r.read_varint_u32().unwrap(), u32::MAX);
    }

    #[test]
    fn hostile_length_is_rejected() {
        let mut w = ByteWriter::new();
        w.write_varint(1 << 40);
        w.write_raw(b"abc");
        let mut r = ByteReader::new(w.as_slice());
        assert!(r.read_blob().is_err());
    }

    #[test]
    fn patch_overwrites_in_place() {
        let mut w = ByteWriter::new();
        w.write_u32(0);
        w.write_u8(9);
        w.patch(0, &7u32.to_le_bytes()).unwrap();
        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u32().unwrap(), 7);
        assert_eq!(r.read_u8().unwrap(), 9);
        assert!(w.patch(3, &[0, 0, 0]).is_err());
    }

    proptest! {
        #[test]
        fn unsigned_varint_round_trip(value in any::<u64>()) {
            let mut w = ByteWriter::new();
            w.write_varint(value);
            prop_assert_eq!(w.len(), varint_len(value));
            let mut r = ByteReader::new(w.as_slice());
            prop_assert_eq!(r.read_varint().unwrap(), value);
        }

        #[test]
        fn u32_varint_round_trip(value in any::<u32>()) {
            let mut w = ByteWriter::new();
            w.write_varint(u64::from(value));
            let mut r = ByteReader::new(w.as_slice());
            prop_assert_eq!(r.read_varint_u32().unwrap(), value);
        }

        #[test]
        fn signed_varint_round_trip(value in any::<i64>()) {
            let mut w = ByteWriter::new();
            w.write_varint_signed(value);
            let mut r = ByteReader::new(w.as_slice());
            prop_assert_eq!(r.read_varint_signed().unwrap(), value);
        }

        #[test]
        fn length_is_monotonic_in_magnitude(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a.unsigned_abs() != b.unsigned_abs());
            let (small, large) = if a.unsigned_abs() < b.unsigned_abs() { (a, b) } else { (b, a) };
            prop_assert!(
                varint_len(zigzag_encode(small)) <= varint_len(zigzag_encode(large)),
                "{} vs {}", small, large
            );
            prop_assert!(varint_len(small.unsigned_abs()) <= varint_len(large.unsigned_abs()));
        }

        #[test]
        fn strings_round_trip(value in ".*") {
            let mut w = ByteWriter::new();
            w.write_str(&value);
            let mut r = ByteReader::new(w.as_slice());
            prop_assert_eq!(r.read_str().unwrap(), value.as_str());
        }
    }
}
