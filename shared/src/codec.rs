//! Little-endian binary codec used by every peer and signaling message
//!
//! [`ByteWriter`] grows a buffer by doubling its capacity and never moves bytes
//! already written. [`ByteReader`] walks a borrowed buffer with a cursor and
//! mirrors every write operation.
//!
//! Reads past the end of the buffer fail with [`CodecError::UnexpectedEof`],
//! and strings that are not UTF-8 fail with [`CodecError::InvalidUtf8`].
//! Either way the cursor stays where it was, so a caller can log and drop the
//! message without touching partially decoded state.

use crate::error::CodecError;

const INITIAL_CAPACITY: usize = 64;

/// Growable little-endian writer
#[derive(Debug, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
    len: usize,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            len: 0,
        }
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current backing capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Doubles the backing buffer until `extra` more bytes fit
    fn reserve(&mut self, extra: usize) {
        let needed = self.len + extra;
        if needed <= self.buf.len() {
            return;
        }

        let mut capacity = self.buf.len().max(1);
        while capacity < needed {
            capacity *= 2;
        }
        self.buf.resize(capacity, 0);
    }

    fn put(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    /// Writes exactly `len` bytes: the UTF-8 bytes of `value` truncated to
    /// `len` (on a character boundary), then zero padding.
    pub fn write_fixed_str(&mut self, value: &str, len: usize) {
        let mut end = value.len().min(len);
        while !value.is_char_boundary(end) {
            end -= 1;
        }

        self.reserve(len);
        self.put(&value.as_bytes()[..end]);
        for _ in end..len {
            self.write_u8(0);
        }
    }

    /// Writes a u32 byte length followed by the UTF-8 bytes
    pub fn write_var_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.put(value.as_bytes());
    }

    /// Embeds raw bytes without a length prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.put(bytes);
    }

    /// The written bytes, without spare capacity
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Exact-length copy of the written bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor-based reader over a borrowed buffer
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    mark: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            mark: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(CodecError::UnexpectedEof {
                needed: len,
                remaining,
            });
        }

        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(i8::from_le_bytes(self.take_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Any non-zero byte reads as `true`
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads `len` bytes and returns the prefix up to the first zero byte
    pub fn read_fixed_str(&mut self, len: usize) -> Result<String, CodecError> {
        let start = self.pos;
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        self.utf8_or_rewind(&bytes[..end], start)
    }

    /// Reads a u32 length prefix, then exactly that many UTF-8 bytes
    pub fn read_var_str(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        let bytes = match self.take(len) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pos = start;
                return Err(e);
            }
        };
        self.utf8_or_rewind(bytes, start)
    }

    fn utf8_or_rewind(&mut self, bytes: &[u8], start: usize) -> Result<String, CodecError> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_owned()),
            Err(_) => {
                self.pos = start;
                Err(CodecError::InvalidUtf8)
            }
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.take(len)
    }

    /// Consumes and returns every unread byte
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    /// Remembers the current cursor position
    pub fn mark(&mut self) {
        self.mark = self.pos;
    }

    /// Exact bytes consumed since the last [`mark`](Self::mark)
    pub fn bytes_since_mark(&self) -> &'a [u8] {
        &self.buf[self.mark..self.pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_sequence_reads_back_in_order() {
        let mut writer = ByteWriter::new();
        writer.write_u8(7);
        writer.write_var_str("hi");
        writer.write_u16(300);

        let bytes = writer.to_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_var_str().unwrap(), "hi");
        assert_eq!(reader.read_u16().unwrap(), 300);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_primitive_roundtrip() {
        let mut writer = ByteWriter::with_capacity(1);
        writer.write_u8(u8::MAX);
        writer.write_i8(i8::MIN);
        writer.write_u16(u16::MAX);
        writer.write_i16(-12_345);
        writer.write_u32(u32::MAX);
        writer.write_i32(i32::MIN);
        writer.write_f32(-0.1);
        writer.write_f64(std::f64::consts::PI);
        writer.write_bool(true);
        writer.write_bool(false);

        let bytes = writer.to_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), u8::MAX);
        assert_eq!(reader.read_i8().unwrap(), i8::MIN);
        assert_eq!(reader.read_u16().unwrap(), u16::MAX);
        assert_eq!(reader.read_i16().unwrap(), -12_345);
        assert_eq!(reader.read_u32().unwrap(), u32::MAX);
        assert_eq!(reader.read_i32().unwrap(), i32::MIN);
        assert_eq!(reader.read_f32().unwrap().to_bits(), (-0.1f32).to_bits());
        assert_eq!(
            reader.read_f64().unwrap().to_bits(),
            std::f64::consts::PI.to_bits()
        );
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());
    }

    #[test]
    fn test_float_special_values_are_bit_exact() {
        let values = [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, -0.0, f32::MIN_POSITIVE];
        let mut writer = ByteWriter::new();
        for v in values {
            writer.write_f32(v);
        }

        let bytes = writer.to_bytes();
        let mut reader = ByteReader::new(&bytes);
        for v in values {
            assert_eq!(reader.read_f32().unwrap().to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let mut writer = ByteWriter::new();
        writer.write_u16(0x0102);
        writer.write_u32(0x0304_0506);
        assert_eq!(writer.as_bytes(), &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn test_capacity_doubles_and_preserves_bytes() {
        let mut writer = ByteWriter::with_capacity(2);
        writer.write_u8(1);
        writer.write_u8(2);
        assert_eq!(writer.capacity(), 2);

        writer.write_u32(0xAABB_CCDD);
        assert_eq!(writer.capacity(), 8);
        assert_eq!(writer.len(), 6);
        assert_eq!(&writer.as_bytes()[..2], &[1, 2]);

        writer.write_bytes(&[9; 11]);
        assert_eq!(writer.capacity(), 32);
        assert_eq!(writer.to_bytes().len(), 17);
    }

    #[test]
    fn test_fixed_str_truncates_and_pads() {
        let mut writer = ByteWriter::new();
        writer.write_fixed_str("abcdef", 4);
        writer.write_fixed_str("ab", 4);

        let bytes = writer.to_bytes();
        assert_eq!(&bytes[..4], b"abcd");
        assert_eq!(&bytes[4..], &[b'a', b'b', 0, 0]);

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_fixed_str(4).unwrap(), "abcd");
        assert_eq!(reader.read_fixed_str(4).unwrap(), "ab");
    }

    #[test]
    fn test_fixed_str_truncation_keeps_utf8_valid() {
        let mut writer = ByteWriter::new();
        // 'é' is two bytes; cutting at 2 would split it
        writer.write_fixed_str("aé", 2);
        let bytes = writer.to_bytes();
        assert_eq!(bytes, vec![b'a', 0]);
        assert_eq!(ByteReader::new(&bytes).read_fixed_str(2).unwrap(), "a");
    }

    #[test]
    fn test_fixed_str_stops_at_first_zero() {
        let bytes = [b'x', 0, b'y', b'z'];
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_fixed_str(4).unwrap(), "x");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_past_end_is_an_error_and_keeps_cursor() {
        let bytes = [1u8, 2, 3];
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 1);

        match reader.read_u32() {
            Err(CodecError::UnexpectedEof { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected eof, got {:?}", other),
        }
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
    }

    #[test]
    fn test_var_str_with_short_body_rewinds() {
        let mut writer = ByteWriter::new();
        writer.write_u32(10);
        writer.write_bytes(b"abc");
        let bytes = writer.to_bytes();

        let mut reader = ByteReader::new(&bytes);
        assert!(reader.read_var_str().is_err());
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let mut writer = ByteWriter::new();
        writer.write_u32(2);
        writer.write_bytes(&[0xff, 0xfe]);
        let bytes = writer.to_bytes();
        assert!(matches!(
            ByteReader::new(&bytes).read_var_str(),
            Err(CodecError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_invalid_utf8_leaves_cursor() {
        let mut writer = ByteWriter::new();
        writer.write_u8(9);
        writer.write_u32(2);
        writer.write_bytes(&[0xff, 0xfe]);
        writer.write_bytes(&[0xc3, 0x28, 0, 0]);
        let bytes = writer.to_bytes();

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 9);
        assert!(matches!(reader.read_var_str(), Err(CodecError::InvalidUtf8)));
        assert_eq!(reader.position(), 1);

        reader.read_bytes(6).unwrap();
        assert!(matches!(reader.read_fixed_str(4), Err(CodecError::InvalidUtf8)));
        assert_eq!(reader.position(), 7);
        assert_eq!(reader.remaining(), 4);
    }

    #[test]
    fn test_mark_recovers_consumed_range() {
        let mut writer = ByteWriter::new();
        writer.write_u8(0xEE);
        writer.write_u16(42);
        writer.write_var_str("signed");
        let bytes = writer.to_bytes();

        let mut reader = ByteReader::new(&bytes);
        reader.read_u8().unwrap();
        reader.mark();
        reader.read_u16().unwrap();
        reader.read_var_str().unwrap();
        assert_eq!(reader.bytes_since_mark(), &bytes[1..]);
    }

    #[test]
    fn test_read_remaining_consumes_tail() {
        let bytes = [1u8, 2, 3, 4];
        let mut reader = ByteReader::new(&bytes);
        reader.read_u8().unwrap();
        assert_eq!(reader.read_remaining(), &[2, 3, 4]);
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.read_remaining(), &[] as &[u8]);
    }
}
