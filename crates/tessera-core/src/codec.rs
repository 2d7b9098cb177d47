//! In-memory binary encode/decode for wire buffers.
//!
//! All integers are little-endian. Byte arrays, strings, and sequences
//! are length-prefixed with a `u32`. There is no self-describing schema:
//! both ends must agree on the layout of every message.

use crate::error::CodecError;
use crate::id::{Coord, EntityId, FieldId, PartitionId};

// ── ByteWriter ──────────────────────────────────────────────────

/// Growable output buffer.
#[derive(Clone, Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer, returning its buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a little-endian u32.
    pub fn write_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a little-endian u64.
    pub fn write_u64_le(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a little-endian i32.
    pub fn write_i32_le(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a little-endian i64.
    pub fn write_i64_le(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a little-endian f32.
    pub fn write_f32_le(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a little-endian f64.
    pub fn write_f64_le(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a length-prefixed byte array (u32 length + bytes).
    pub fn write_length_prefixed_bytes(&mut self, b: &[u8]) {
        self.write_u32_le(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    /// Write a length-prefixed UTF-8 string (u32 length + bytes).
    pub fn write_length_prefixed_str(&mut self, s: &str) {
        self.write_length_prefixed_bytes(s.as_bytes());
    }

    /// Write raw bytes with no prefix.
    pub fn write_raw(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
}

// ── ByteReader ──────────────────────────────────────────────────

/// Cursor over a received buffer.
#[derive(Clone, Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True once every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail with [`CodecError::TrailingBytes`] unless the buffer has been
    /// consumed completely.
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(CodecError::TrailingBytes { remaining }),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Read a little-endian u32.
    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian u64.
    pub fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian i32.
    pub fn read_i32_le(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian i64.
    pub fn read_i64_le(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian f32.
    pub fn read_f32_le(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian f64.
    pub fn read_f64_le(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read a length-prefixed byte array.
    pub fn read_length_prefixed_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_u32_le()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_length_prefixed_str(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_length_prefixed_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

// ── Wire ────────────────────────────────────────────────────────

/// A value with a fixed binary layout on the wire.
pub trait Wire: Sized {
    /// Append the encoded value to `w`.
    fn encode(&self, w: &mut ByteWriter);
    /// Decode one value from `r`.
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError>;
}

macro_rules! impl_wire_primitive {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Wire for $ty {
                fn encode(&self, w: &mut ByteWriter) {
                    w.$write(*self);
                }
                fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
                    r.$read()
                }
            }
        )*
    };
}

impl_wire_primitive! {
    u8 => write_u8, read_u8;
    u32 => write_u32_le, read_u32_le;
    u64 => write_u64_le, read_u64_le;
    i32 => write_i32_le, read_i32_le;
    i64 => write_i64_le, read_i64_le;
    f32 => write_f32_le, read_f32_le;
    f64 => write_f64_le, read_f64_le;
}

impl Wire for bool {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(u8::from(*self));
    }
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        match r.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(CodecError::InvalidTag {
                what: "bool",
                value: u32::from(v),
            }),
        }
    }
}

impl Wire for String {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_length_prefixed_str(self);
    }
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        r.read_length_prefixed_str()
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.len() as u32);
        for item in self {
            item.encode(w);
        }
    }
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let len = r.read_u32_le()? as usize;
        // Cap the pre-allocation by what the buffer could possibly hold.
        let mut out = Vec::with_capacity(len.min(r.remaining()));
        for _ in 0..len {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

impl Wire for Coord {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.len() as u32);
        for &x in self {
            w.write_i32_le(x);
        }
    }
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let len = r.read_u32_le()? as usize;
        let mut out = Coord::with_capacity(len.min(r.remaining()));
        for _ in 0..len {
            out.push(r.read_i32_le()?);
        }
        Ok(out)
    }
}

impl Wire for EntityId {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u64_le(self.raw());
    }
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(EntityId::from_raw(r.read_u64_le()?))
    }
}

impl Wire for PartitionId {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.0);
    }
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(PartitionId(r.read_u32_le()?))
    }
}

impl Wire for FieldId {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.0);
    }
    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(FieldId(r.read_u32_le()?))
    }
}

/// Encode a single value into a fresh buffer.
pub fn to_bytes<T: Wire>(value: &T) -> Vec<u8> {
    let mut w = ByteWriter::new();
    value.encode(&mut w);
    w.into_bytes()
}

/// Decode a single value that must occupy the whole buffer.
pub fn from_bytes<T: Wire>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut r = ByteReader::new(bytes);
    let v = T::decode(&mut r)?;
    r.finish()?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut w = ByteWriter::new();
        w.write_u32_le(0x0102_0304);
        w.write_i32_le(-1);
        assert_eq!(w.into_bytes(), vec![4, 3, 2, 1, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn truncated_buffer_reports_shortfall() {
        let mut r = ByteReader::new(&[1, 2]);
        assert_eq!(
            r.read_u32_le(),
            Err(CodecError::Truncated {
                needed: 4,
                remaining: 2
            })
        );
        assert!(!r.is_exhausted());
        assert_eq!(r.read_u8(), Ok(1));
        assert_eq!(r.read_u8(), Ok(2));
        assert!(r.is_exhausted());
    }

    #[test]
    fn from_bytes_rejects_trailing_data() {
        let mut bytes = to_bytes(&7u32);
        bytes.push(0);
        assert_eq!(
            from_bytes::<u32>(&bytes),
            Err(CodecError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn bool_rejects_unknown_byte() {
        assert!(matches!(
            from_bytes::<bool>(&[2]),
            Err(CodecError::InvalidTag { what: "bool", .. })
        ));
    }

    #[test]
    fn huge_length_prefix_does_not_allocate() {
        // Claims u32::MAX elements but carries none.
        let bytes = u32::MAX.to_le_bytes();
        assert!(matches!(
            from_bytes::<Vec<u64>>(&bytes),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn nested_values_decode_in_order() {
        let mut w = ByteWriter::new();
        Coord::from_slice(&[3, -4]).encode(&mut w);
        "halo".to_string().encode(&mut w);
        vec![1.5f64, 2.5].encode(&mut w);
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        assert_eq!(Coord::decode(&mut r).unwrap().as_slice(), &[3, -4]);
        assert_eq!(String::decode(&mut r).unwrap(), "halo");
        assert_eq!(Vec::<f64>::decode(&mut r).unwrap(), vec![1.5, 2.5]);
        assert!(r.finish().is_ok());
    }
}
