//! Event decoder for ETW-style trace records.
//!
//! Records carry a provider id, an event key (task, opcode, event id), a
//! version and an opaque payload. This crate turns payloads into named,
//! typed fields using either layouts known ahead of time or layouts that
//! providers broadcast in the trace itself.
//!
//! # Payload layout
//!
//! Fields are packed in declaration order with no alignment padding:
//!
//! | Type            | Size                                  |
//! |-----------------|---------------------------------------|
//! | Int8 / UInt8    | 1                                     |
//! | Int16 / UInt16  | 2                                     |
//! | Int32 / UInt32 / Float32 / Boolean | 4                  |
//! | Int64 / UInt64 / Float64 | 8                            |
//! | Guid            | 16                                    |
//! | Pointer         | 4 or 8, per record                    |
//! | UnicodeString   | UTF-16LE up to a 2-byte zero          |
//! | AnsiString      | bytes up to a 1-byte zero             |
//!
//! All integers are little-endian.
//!
//! # Usage
//!
//! ```no_run
//! use etw_traceparser::{
//!     static_schema, DecodedEvent, DecoderConfig, RawEventRecord, SchemaRegistry,
//! };
//!
//! let mut registry = SchemaRegistry::new(DecoderConfig::default());
//! static_schema::register_catalogue(&mut registry);
//! registry.register_all(Box::new(|event: &DecodedEvent<'_>| {
//!     println!("{}", event.to_json());
//! }));
//!
//! let records: Vec<RawEventRecord> = Vec::new(); // from the trace source
//! let stats = registry.run(records);
//! println!("decoded {} of {} records", stats.decoded, stats.dispatched);
//! ```

pub mod config;
pub mod decoded;
pub mod manifest;
pub mod reader;
pub mod registry;
pub mod schema;
pub mod static_schema;
pub mod types;
pub mod writer;

pub use config::DecoderConfig;
pub use decoded::DecodedEvent;
pub use manifest::{ManifestDocument, ProviderManifest};
pub use reader::PayloadReader;
pub use registry::{DispatchStats, EventCallback, SchemaOrigin, SchemaRegistry};
pub use schema::{EventSchema, EventTemplate, FieldDescriptor, FieldOffset, TemplateIdentity};
pub use types::{
    DecodeError, EventKey, FieldType, FieldValue, Guid, ManifestError, PointerWidth,
    RawEventRecord, Timestamp,
};
pub use writer::PayloadWriter;
