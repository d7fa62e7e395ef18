use std::collections::HashMap;

use bytes::Bytes;

use crate::config::DecoderConfig;
use crate::manifest::chunk::{EnvelopeError, ManifestChunk};
use crate::types::{Guid, RawEventRecord};

/// A complete, reassembled schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    pub provider_id: Guid,
    pub format: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub data: Vec<u8>,
}

/// Why a chunk was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRejection {
    Envelope(EnvelopeError),
    /// The chunk index was already received; the accumulator is kept.
    Duplicate { index: u16 },
    /// The chunk disagreed with the set being accumulated, which was abandoned.
    Inconsistent,
    TooManyChunks { total: u16 },
    /// The accumulated document outgrew the configured limit and was abandoned.
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Accepted { remaining: u16 },
    Complete(ManifestDocument),
    Ignored(ChunkRejection),
}

/// Per-provider state of a chunk set being accumulated.
struct Accumulator {
    first: ManifestChunk,
    chunks: Vec<Option<Bytes>>,
    remaining: u16,
    size: usize,
}

impl Accumulator {
    fn new(first: &ManifestChunk) -> Self {
        Accumulator {
            first: ManifestChunk {
                data: Bytes::new(),
                ..first.clone()
            },
            chunks: vec![None; first.total_chunks as usize],
            remaining: first.total_chunks,
            size: 0,
        }
    }

    fn into_document(self, provider_id: Guid) -> ManifestDocument {
        let mut data = Vec::with_capacity(self.size);
        for chunk in self.chunks.into_iter().flatten() {
            data.extend_from_slice(&chunk);
        }
        ManifestDocument {
            provider_id,
            format: self.first.format,
            major_version: self.first.major_version,
            minor_version: self.first.minor_version,
            data,
        }
    }
}

/// Reassembles schema documents delivered as chunks, one set per provider.
///
/// Chunks may arrive in any order and may be repeated. Once every chunk of a
/// set has arrived the document is returned and the provider's state is
/// cleared, so a later broadcast is accumulated from scratch.
pub struct ManifestReassembler {
    pending: HashMap<Guid, Accumulator>,
    max_chunks: u16,
    max_bytes: usize,
}

impl ManifestReassembler {
    pub fn new(config: &DecoderConfig) -> Self {
        ManifestReassembler {
            pending: HashMap::new(),
            max_chunks: config.max_manifest_chunks,
            max_bytes: config.max_manifest_bytes,
        }
    }

    /// Whether a chunk set is being accumulated for the provider.
    pub fn is_pending(&self, provider_id: &Guid) -> bool {
        self.pending.contains_key(provider_id)
    }

    /// Offer a manifest record's payload to the reassembler.
    pub fn offer(&mut self, record: &RawEventRecord) -> ChunkOutcome {
        match ManifestChunk::parse(&record.payload) {
            Ok(chunk) => self.add_chunk(record.provider_id, chunk),
            Err(err) => {
                log::debug!(
                    "ignoring malformed manifest chunk from provider {}: {:?}",
                    record.provider_id,
                    err
                );
                ChunkOutcome::Ignored(ChunkRejection::Envelope(err))
            }
        }
    }

    pub fn add_chunk(&mut self, provider_id: Guid, chunk: ManifestChunk) -> ChunkOutcome {
        if let Err(err) = chunk.validate() {
            log::debug!("ignoring malformed manifest chunk from provider {provider_id}: {err:?}");
            return ChunkOutcome::Ignored(ChunkRejection::Envelope(err));
        }
        if chunk.total_chunks > self.max_chunks {
            log::debug!(
                "ignoring manifest chunk set of {} chunks from provider {provider_id}",
                chunk.total_chunks
            );
            return ChunkOutcome::Ignored(ChunkRejection::TooManyChunks {
                total: chunk.total_chunks,
            });
        }

        let inconsistent = self
            .pending
            .get(&provider_id)
            .is_some_and(|acc| !acc.first.same_set_shape(&chunk));
        if inconsistent {
            self.pending.remove(&provider_id);
            log::warn!(
                "abandoning manifest chunk set from provider {provider_id}: \
                 chunk {} disagrees with the set",
                chunk.chunk_index
            );
            // Only a first chunk can start the replacement set.
            if chunk.chunk_index != 0 {
                return ChunkOutcome::Ignored(ChunkRejection::Inconsistent);
            }
        }

        let acc = self
            .pending
            .entry(provider_id)
            .or_insert_with(|| Accumulator::new(&chunk));

        let index = chunk.chunk_index;
        let slot = &mut acc.chunks[index as usize];
        if slot.is_some() {
            log::debug!("ignoring duplicate manifest chunk {index} from provider {provider_id}");
            return ChunkOutcome::Ignored(ChunkRejection::Duplicate { index });
        }

        acc.size += chunk.data.len();
        if acc.size > self.max_bytes {
            self.pending.remove(&provider_id);
            log::warn!(
                "abandoning manifest from provider {provider_id}: exceeds {} bytes",
                self.max_bytes
            );
            return ChunkOutcome::Ignored(ChunkRejection::TooLarge);
        }

        *slot = Some(chunk.data);
        acc.remaining -= 1;
        if acc.remaining > 0 {
            return ChunkOutcome::Accepted {
                remaining: acc.remaining,
            };
        }

        match self.pending.remove(&provider_id) {
            Some(acc) => ChunkOutcome::Complete(acc.into_document(provider_id)),
            None => ChunkOutcome::Ignored(ChunkRejection::Inconsistent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::chunk::{encode_manifest_chunks, ENVELOPE_MAGIC};
    use assert_matches::assert_matches;

    const PROVIDER: Guid = Guid::from_u128(0xABCD);

    fn reassembler() -> ManifestReassembler {
        ManifestReassembler::new(&DecoderConfig::default())
    }

    fn chunks(doc: &[u8], size: usize) -> Vec<ManifestChunk> {
        encode_manifest_chunks(doc, size)
            .iter()
            .map(|b| ManifestChunk::parse(b).unwrap())
            .collect()
    }

    fn feed(
        r: &mut ManifestReassembler,
        set: &[ManifestChunk],
        order: &[usize],
    ) -> Option<ManifestDocument> {
        let mut done = None;
        for &i in order {
            if let ChunkOutcome::Complete(doc) = r.add_chunk(PROVIDER, set[i].clone()) {
                done = Some(doc);
            }
        }
        done
    }

    #[test]
    fn test_in_order() {
        let set = chunks(b"<provider/> abcdef", 6);
        assert_eq!(set.len(), 3);
        let mut r = reassembler();
        assert_eq!(
            r.add_chunk(PROVIDER, set[0].clone()),
            ChunkOutcome::Accepted { remaining: 2 }
        );
        assert!(r.is_pending(&PROVIDER));
        let doc = feed(&mut r, &set, &[1, 2]).unwrap();
        assert_eq!(doc.data, b"<provider/> abcdef");
        assert_eq!(doc.provider_id, PROVIDER);
        assert_eq!(doc.format, 1);
        assert!(!r.is_pending(&PROVIDER));
    }

    #[test]
    fn test_order_independent() {
        let doc = b"the quick brown fox jumps";
        let set = chunks(doc, 9);
        let a = feed(&mut reassembler(), &set, &[0, 1, 2]).unwrap();
        let b = feed(&mut reassembler(), &set, &[2, 0, 1]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.data, doc);
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let set = chunks(b"aaaabbbbcccc", 4);
        let mut r = reassembler();
        r.add_chunk(PROVIDER, set[0].clone());
        r.add_chunk(PROVIDER, set[1].clone());
        assert_eq!(
            r.add_chunk(PROVIDER, set[1].clone()),
            ChunkOutcome::Ignored(ChunkRejection::Duplicate { index: 1 })
        );
        assert_matches!(
            r.add_chunk(PROVIDER, set[2].clone()),
            ChunkOutcome::Complete(doc) if doc.data == b"aaaabbbbcccc"
        );
    }

    #[test]
    fn test_single_chunk_completes_immediately() {
        let set = chunks(b"<x/>", 100);
        assert_matches!(
            reassembler().add_chunk(PROVIDER, set[0].clone()),
            ChunkOutcome::Complete(_)
        );
    }

    #[test]
    fn test_hand_built_chunk_out_of_range() {
        let mut r = reassembler();
        let mut chunk = chunks(b"aaaabbbb", 4)[0].clone();

        chunk.total_chunks = 0;
        assert_eq!(
            r.add_chunk(PROVIDER, chunk.clone()),
            ChunkOutcome::Ignored(ChunkRejection::Envelope(EnvelopeError::NoChunks))
        );

        chunk.total_chunks = 2;
        chunk.chunk_index = 5;
        assert_eq!(
            r.add_chunk(PROVIDER, chunk),
            ChunkOutcome::Ignored(ChunkRejection::Envelope(
                EnvelopeError::IndexOutOfRange { index: 5, total: 2 }
            ))
        );
        assert!(!r.is_pending(&PROVIDER));
    }

    #[test]
    fn test_out_of_range_chunk_keeps_pending_set() {
        let set = chunks(b"aaaabbbb", 4);
        let mut r = reassembler();
        r.add_chunk(PROVIDER, set[0].clone());

        let mut stray = set[1].clone();
        stray.chunk_index = 2;
        assert_matches!(
            r.add_chunk(PROVIDER, stray),
            ChunkOutcome::Ignored(ChunkRejection::Envelope(_))
        );
        assert_matches!(r.add_chunk(PROVIDER, set[1].clone()), ChunkOutcome::Complete(_));
    }

    #[test]
    fn test_inconsistent_chunk_abandons_set() {
        let set = chunks(b"aaaabbbbcccc", 4);
        let mut r = reassembler();
        r.add_chunk(PROVIDER, set[0].clone());

        let mut other = set[1].clone();
        other.minor_version = 9;
        assert_eq!(
            r.add_chunk(PROVIDER, other),
            ChunkOutcome::Ignored(ChunkRejection::Inconsistent)
        );
        assert!(!r.is_pending(&PROVIDER));

        // The next set starts from scratch.
        let doc = feed(&mut r, &set, &[1, 2, 0]).unwrap();
        assert_eq!(doc.data, b"aaaabbbbcccc");
    }

    #[test]
    fn test_inconsistent_first_chunk_restarts_set() {
        let old = chunks(b"aaaabbbbcccc", 4);
        let new = chunks(b"xxxxyyyy", 4);
        let mut r = reassembler();
        r.add_chunk(PROVIDER, old[1].clone());
        assert_eq!(
            r.add_chunk(PROVIDER, new[0].clone()),
            ChunkOutcome::Accepted { remaining: 1 }
        );
        let doc = feed(&mut r, &new, &[1]).unwrap();
        assert_eq!(doc.data, b"xxxxyyyy");
    }

    #[test]
    fn test_providers_are_independent() {
        let set = chunks(b"aaaabbbb", 4);
        let other = Guid::from_u128(0x1111);
        let mut r = reassembler();
        r.add_chunk(PROVIDER, set[0].clone());
        assert_eq!(
            r.add_chunk(other, set[1].clone()),
            ChunkOutcome::Accepted { remaining: 1 }
        );
        assert_matches!(r.add_chunk(PROVIDER, set[1].clone()), ChunkOutcome::Complete(_));
        assert!(r.is_pending(&other));
    }

    #[test]
    fn test_limits() {
        let config = DecoderConfig {
            max_manifest_chunks: 2,
            max_manifest_bytes: 6,
            ..Default::default()
        };
        let mut r = ManifestReassembler::new(&config);
        let set = chunks(b"aaaabbbbcccc", 4);
        assert_eq!(
            r.add_chunk(PROVIDER, set[0].clone()),
            ChunkOutcome::Ignored(ChunkRejection::TooManyChunks { total: 3 })
        );

        let set = chunks(b"aaaabbbb", 4);
        r.add_chunk(PROVIDER, set[0].clone());
        assert_eq!(
            r.add_chunk(PROVIDER, set[1].clone()),
            ChunkOutcome::Ignored(ChunkRejection::TooLarge)
        );
        assert!(!r.is_pending(&PROVIDER));
    }

    #[test]
    fn test_offer_ignores_bad_envelope() {
        let mut payload = encode_manifest_chunks(b"<x/>", 16)[0].to_vec();
        payload[3] = ENVELOPE_MAGIC.wrapping_add(1);
        let record = RawEventRecord::new(PROVIDER, Default::default(), 0, payload);
        assert_matches!(
            reassembler().offer(&record),
            ChunkOutcome::Ignored(ChunkRejection::Envelope(EnvelopeError::BadMagic(_)))
        );
    }
}
