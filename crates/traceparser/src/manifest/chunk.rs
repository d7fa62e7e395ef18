use bytes::Bytes;

use crate::types::RawEventRecord;
use crate::writer::PayloadWriter;

/// Opcode carried by manifest-chunk records.
pub const MANIFEST_OPCODE: u8 = 0xFE;

/// Event id carried by manifest-chunk records (besides 0 and [`MANIFEST_OPCODE`]).
pub const MANIFEST_EVENT_ID: u16 = 0xFFFE;

/// Marker byte every chunk envelope carries.
pub const ENVELOPE_MAGIC: u8 = 0x5B;

/// Size of the envelope preceding each chunk's bytes.
pub const ENVELOPE_SIZE: usize = 8;

/// Format tag for XML schema documents.
pub const FORMAT_XML: u8 = 1;

/// Reports whether a record carries a manifest chunk.
pub fn is_manifest_record(record: &RawEventRecord) -> bool {
    const SHORT_EVENT_ID: u16 = MANIFEST_OPCODE as u16;
    record.opcode == MANIFEST_OPCODE
        && matches!(record.event_id, 0 | SHORT_EVENT_ID | MANIFEST_EVENT_ID)
}

/// Why a chunk envelope could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeError {
    TooShort(usize),
    BadMagic(u8),
    NoChunks,
    IndexOutOfRange { index: u16, total: u16 },
}

/// One fragment of a schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestChunk {
    pub format: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub total_chunks: u16,
    pub chunk_index: u16,
    /// The chunk's bytes, envelope excluded.
    pub data: Bytes,
}

impl ManifestChunk {
    /// Parse a chunk from a manifest record's payload.
    pub fn parse(payload: &Bytes) -> Result<Self, EnvelopeError> {
        if payload.len() < ENVELOPE_SIZE {
            return Err(EnvelopeError::TooShort(payload.len()));
        }
        if payload[3] != ENVELOPE_MAGIC {
            return Err(EnvelopeError::BadMagic(payload[3]));
        }
        let chunk = ManifestChunk {
            format: payload[0],
            major_version: payload[1],
            minor_version: payload[2],
            total_chunks: u16::from_le_bytes([payload[4], payload[5]]),
            chunk_index: u16::from_le_bytes([payload[6], payload[7]]),
            data: payload.slice(ENVELOPE_SIZE..),
        };
        chunk.validate()?;
        Ok(chunk)
    }

    /// Check that the chunk belongs to a non-empty set and its index is in range.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.total_chunks == 0 {
            return Err(EnvelopeError::NoChunks);
        }
        if self.chunk_index >= self.total_chunks {
            return Err(EnvelopeError::IndexOutOfRange {
                index: self.chunk_index,
                total: self.total_chunks,
            });
        }
        Ok(())
    }

    /// Whether two chunks belong to chunk sets with the same shape.
    pub fn same_set_shape(&self, other: &ManifestChunk) -> bool {
        self.format == other.format
            && self.major_version == other.major_version
            && self.minor_version == other.minor_version
            && self.total_chunks == other.total_chunks
    }
}

/// Split a schema document into envelope-wrapped chunk payloads.
///
/// Each chunk carries at most `chunk_size` document bytes. An empty document
/// still produces one (empty) chunk.
pub fn encode_manifest_chunks(document: &[u8], chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    let pieces: Vec<&[u8]> = if document.is_empty() {
        vec![document]
    } else {
        document.chunks(chunk_size).collect()
    };
    let total = pieces.len().min(u16::MAX as usize) as u16;

    pieces
        .into_iter()
        .take(total as usize)
        .enumerate()
        .map(|(index, piece)| {
            let mut w =
                PayloadWriter::with_capacity(ENVELOPE_SIZE + piece.len(), Default::default());
            w.u8(FORMAT_XML)
                .u8(1)
                .u8(0)
                .u8(ENVELOPE_MAGIC)
                .u16(total)
                .u16(index as u16)
                .bytes(piece);
            w.freeze()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKey, Guid};
    use assert_matches::assert_matches;

    fn envelope(total: u16, index: u16, data: &[u8]) -> Bytes {
        let mut v = vec![FORMAT_XML, 1, 0, ENVELOPE_MAGIC];
        v.extend_from_slice(&total.to_le_bytes());
        v.extend_from_slice(&index.to_le_bytes());
        v.extend_from_slice(data);
        Bytes::from(v)
    }

    #[test]
    fn test_parse_envelope() {
        let chunk = ManifestChunk::parse(&envelope(3, 2, b"<x/>")).unwrap();
        assert_eq!(chunk.format, FORMAT_XML);
        assert_eq!(chunk.major_version, 1);
        assert_eq!(chunk.minor_version, 0);
        assert_eq!(chunk.total_chunks, 3);
        assert_eq!(chunk.chunk_index, 2);
        assert_eq!(chunk.data.as_ref(), b"<x/>");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_matches!(
            ManifestChunk::parse(&Bytes::from_static(&[1, 1, 0])),
            Err(EnvelopeError::TooShort(3))
        );
        let mut bad_magic = envelope(1, 0, b"").to_vec();
        bad_magic[3] = 0x00;
        assert_matches!(
            ManifestChunk::parse(&Bytes::from(bad_magic)),
            Err(EnvelopeError::BadMagic(0))
        );
        assert_matches!(
            ManifestChunk::parse(&envelope(0, 0, b"")),
            Err(EnvelopeError::NoChunks)
        );
        assert_matches!(
            ManifestChunk::parse(&envelope(2, 2, b"")),
            Err(EnvelopeError::IndexOutOfRange { index: 2, total: 2 })
        );
    }

    #[test]
    fn test_is_manifest_record() {
        let provider = Guid::from_u128(1);
        let record = |opcode, id| {
            RawEventRecord::new(provider, EventKey::new(0, opcode, id), 0, Bytes::new())
        };
        assert!(is_manifest_record(&record(0xFE, 0xFFFE)));
        assert!(is_manifest_record(&record(0xFE, 0)));
        assert!(is_manifest_record(&record(0xFE, 0xFE)));
        assert!(!is_manifest_record(&record(0xFE, 7)));
        assert!(!is_manifest_record(&record(0x01, 0xFFFE)));
    }

    #[test]
    fn test_encode_chunks() {
        let doc = b"0123456789";
        let chunks = encode_manifest_chunks(doc, 4);
        assert_eq!(chunks.len(), 3);
        let parsed: Vec<_> = chunks.iter().map(|c| ManifestChunk::parse(c).unwrap()).collect();
        assert!(parsed.iter().all(|c| c.total_chunks == 3));
        assert_eq!(parsed[2].chunk_index, 2);
        assert_eq!(parsed[2].data.as_ref(), b"89");

        let empty = encode_manifest_chunks(b"", 4);
        assert_eq!(empty.len(), 1);
        assert!(ManifestChunk::parse(&empty[0]).unwrap().data.is_empty());
    }
}
