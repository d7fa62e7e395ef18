//! Schemas that providers broadcast about themselves.
//!
//! A provider announces its schema document as a series of chunk records.
//! [`ManifestReassembler`] collects the chunks per provider and
//! [`compile_manifest`] turns the finished document into event templates.

pub mod chunk;
pub mod compiler;
pub mod reassembler;

pub use chunk::{encode_manifest_chunks, is_manifest_record, ManifestChunk};
pub use compiler::{compile_manifest, compile_xml, ProviderManifest};
pub use reassembler::{ChunkOutcome, ChunkRejection, ManifestDocument, ManifestReassembler};
