use crate::types::{DecodeError, FieldType, FieldValue, Guid, PointerWidth};

/// Compute the real offset of a field whose layout offset assumes 4-byte pointers.
///
/// `pointers_before` is the number of pointer-width fields preceding the field.
pub fn host_offset(offset: usize, pointers_before: usize, width: PointerWidth) -> usize {
    offset + pointers_before * (width.bytes() - 4)
}

/// An offset-addressed reader over an event payload.
///
/// Every read is bounds-checked against the payload; nothing is ever read
/// past its end.
#[derive(Debug, Clone, Copy)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pointer_width: PointerWidth,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8], pointer_width: PointerWidth) -> Self {
        Self {
            data,
            pointer_width,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    /// Borrow `n` bytes at `offset`.
    fn slice(&self, offset: usize, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = offset.checked_add(n);
        match end {
            Some(end) if end <= self.data.len() => Ok(&self.data[offset..end]),
            _ => Err(DecodeError::OutOfBounds {
                offset,
                needed: n,
                len: self.data.len(),
            }),
        }
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    pub fn u8(&self, offset: usize) -> Result<u8, DecodeError> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn u16(&self, offset: usize) -> Result<u16, DecodeError> {
        self.array(offset).map(u16::from_le_bytes)
    }

    pub fn u32(&self, offset: usize) -> Result<u32, DecodeError> {
        self.array(offset).map(u32::from_le_bytes)
    }

    pub fn u64(&self, offset: usize) -> Result<u64, DecodeError> {
        self.array(offset).map(u64::from_le_bytes)
    }

    pub fn i32(&self, offset: usize) -> Result<i32, DecodeError> {
        self.array(offset).map(i32::from_le_bytes)
    }

    pub fn i64(&self, offset: usize) -> Result<i64, DecodeError> {
        self.array(offset).map(i64::from_le_bytes)
    }

    pub fn f64(&self, offset: usize) -> Result<f64, DecodeError> {
        self.array(offset).map(f64::from_le_bytes)
    }

    /// Read a GUID in its mixed-endian wire layout.
    pub fn guid(&self, offset: usize) -> Result<Guid, DecodeError> {
        self.array(offset).map(Guid::from_bytes_le)
    }

    /// Read a pointer-width integer, zero-extended to 64 bits.
    pub fn pointer(&self, offset: usize) -> Result<u64, DecodeError> {
        match self.pointer_width {
            PointerWidth::Four => self.u32(offset).map(u64::from),
            PointerWidth::Eight => self.u64(offset),
        }
    }

    /// Return the offset just past the null terminator of a UTF-16 string.
    pub fn skip_unicode_string(&self, offset: usize) -> Result<usize, DecodeError> {
        let mut pos = offset;
        while pos + 2 <= self.data.len() {
            if self.data[pos] == 0 && self.data[pos + 1] == 0 {
                return Ok(pos + 2);
            }
            pos += 2;
        }
        Err(DecodeError::UnterminatedString { offset })
    }

    /// Return the offset just past the null terminator of a single-byte string.
    pub fn skip_ansi_string(&self, offset: usize) -> Result<usize, DecodeError> {
        let tail = self.data.get(offset..).unwrap_or_default();
        match tail.iter().position(|&b| b == 0) {
            Some(n) => Ok(offset + n + 1),
            None => Err(DecodeError::UnterminatedString { offset }),
        }
    }

    /// Read a null-terminated UTF-16 string. Invalid code units are replaced.
    pub fn unicode_string(&self, offset: usize) -> Result<(String, usize), DecodeError> {
        let end = self.skip_unicode_string(offset)?;
        let units: Vec<u16> = self.data[offset..end - 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok((String::from_utf16_lossy(&units), end))
    }

    /// Read a null-terminated single-byte string. Invalid UTF-8 is replaced.
    pub fn ansi_string(&self, offset: usize) -> Result<(String, usize), DecodeError> {
        let end = self.skip_ansi_string(offset)?;
        let s = String::from_utf8_lossy(&self.data[offset..end - 1]).into_owned();
        Ok((s, end))
    }

    /// The offset immediately following a field of type `ty` at `offset`.
    pub fn field_end(&self, offset: usize, ty: FieldType) -> Result<usize, DecodeError> {
        match ty {
            FieldType::UnicodeString => self.skip_unicode_string(offset),
            FieldType::AnsiString => self.skip_ansi_string(offset),
            fixed => {
                let size = fixed.size(self.pointer_width).unwrap_or_default();
                self.slice(offset, size)?;
                Ok(offset + size)
            }
        }
    }

    /// Read a field of type `ty` at `offset`, returning its value and the
    /// offset immediately following it.
    pub fn read(&self, offset: usize, ty: FieldType) -> Result<(FieldValue, usize), DecodeError> {
        let value = match ty {
            FieldType::Int8 => FieldValue::Int8(self.u8(offset)? as i8),
            FieldType::UInt8 => FieldValue::UInt8(self.u8(offset)?),
            FieldType::Int16 => FieldValue::Int16(self.u16(offset)? as i16),
            FieldType::UInt16 => FieldValue::UInt16(self.u16(offset)?),
            FieldType::Int32 => FieldValue::Int32(self.i32(offset)?),
            FieldType::UInt32 => FieldValue::UInt32(self.u32(offset)?),
            FieldType::Int64 => FieldValue::Int64(self.i64(offset)?),
            FieldType::UInt64 => FieldValue::UInt64(self.u64(offset)?),
            FieldType::Float32 => FieldValue::Float32(f32::from_bits(self.u32(offset)?)),
            FieldType::Float64 => FieldValue::Float64(self.f64(offset)?),
            FieldType::Boolean => FieldValue::Boolean(self.u32(offset)? != 0),
            FieldType::Guid => FieldValue::Guid(self.guid(offset)?),
            FieldType::Pointer => FieldValue::Pointer(self.pointer(offset)?),
            FieldType::UnicodeString => {
                let (s, end) = self.unicode_string(offset)?;
                return Ok((FieldValue::String(s), end));
            }
            FieldType::AnsiString => {
                let (s, end) = self.ansi_string(offset)?;
                return Ok((FieldValue::String(s), end));
            }
        };
        let size = ty.size(self.pointer_width).unwrap_or_default();
        Ok((value, offset + size))
    }
}
