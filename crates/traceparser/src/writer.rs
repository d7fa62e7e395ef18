use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{FieldValue, Guid, PointerWidth};

/// A buffer for encoding event payloads in their wire layout.
///
/// Numbers are written little-endian and strings null-terminated, matching
/// what [`PayloadReader`](crate::reader::PayloadReader) decodes.
pub struct PayloadWriter {
    buf: BytesMut,
    pointer_width: PointerWidth,
}

impl AsRef<[u8]> for PayloadWriter {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl PayloadWriter {
    pub fn new(pointer_width: PointerWidth) -> Self {
        Self::with_capacity(64, pointer_width)
    }

    pub fn with_capacity(size: usize, pointer_width: PointerWidth) -> Self {
        PayloadWriter {
            buf: BytesMut::with_capacity(size),
            pointer_width,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Writes a single byte.
    #[inline]
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    /// Writes a known number of bytes.
    #[inline]
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    #[inline]
    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    #[inline]
    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.put_i16_le(v);
        self
    }

    #[inline]
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    #[inline]
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    #[inline]
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    #[inline]
    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.put_i64_le(v);
        self
    }

    #[inline]
    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.put_f32_le(v);
        self
    }

    #[inline]
    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.put_f64_le(v);
        self
    }

    /// Writes a Win32 BOOL (4 bytes).
    #[inline]
    pub fn bool(&mut self, b: bool) -> &mut Self {
        self.u32(b as u32)
    }

    /// Writes a GUID in its mixed-endian wire layout.
    #[inline]
    pub fn guid(&mut self, guid: &Guid) -> &mut Self {
        self.buf.put_slice(&guid.to_bytes_le());
        self
    }

    /// Writes a pointer-width integer, truncating to 32 bits for 4-byte captures.
    #[inline]
    pub fn pointer(&mut self, v: u64) -> &mut Self {
        match self.pointer_width {
            PointerWidth::Four => self.u32(v as u32),
            PointerWidth::Eight => self.u64(v),
        }
    }

    /// Writes a null-terminated UTF-16LE string.
    pub fn unicode_str<S: AsRef<str>>(&mut self, s: S) -> &mut Self {
        for unit in s.as_ref().encode_utf16() {
            self.buf.put_u16_le(unit);
        }
        self.buf.put_u16_le(0);
        self
    }

    /// Writes a null-terminated single-byte string.
    pub fn ansi_str<S: AsRef<str>>(&mut self, s: S) -> &mut Self {
        let bytes = s.as_ref().as_bytes();
        self.buf.reserve(bytes.len() + 1);
        self.buf.put_slice(bytes);
        self.buf.put_u8(0);
        self
    }

    /// Writes a decoded value back in its wire layout.
    ///
    /// Strings are written as UTF-16 when `unicode` is set, single-byte otherwise.
    pub fn value(&mut self, value: &FieldValue, unicode: bool) -> &mut Self {
        match value {
            FieldValue::Int8(v) => self.u8(*v as u8),
            FieldValue::UInt8(v) => self.u8(*v),
            FieldValue::Int16(v) => self.i16(*v),
            FieldValue::UInt16(v) => self.u16(*v),
            FieldValue::Int32(v) => self.i32(*v),
            FieldValue::UInt32(v) => self.u32(*v),
            FieldValue::Int64(v) => self.i64(*v),
            FieldValue::UInt64(v) => self.u64(*v),
            FieldValue::Float32(v) => self.f32(*v),
            FieldValue::Float64(v) => self.f64(*v),
            FieldValue::Boolean(v) => self.bool(*v),
            FieldValue::Guid(v) => self.guid(v),
            FieldValue::Pointer(v) => self.pointer(*v),
            FieldValue::String(s) if unicode => self.unicode_str(s),
            FieldValue::String(s) => self.ansi_str(s),
        }
    }
}
