//! Compiled field-access plans for event payloads.
//!
//! An [`EventSchema`] describes one layout revision of one event type. Its
//! field offsets are computed once, when the schema is built: a field gets a
//! fixed offset if every field before it is fixed-width, otherwise its offset
//! is derived from the end of the preceding field while decoding.
//!
//! An [`EventTemplate`] groups the layout revisions of one event type together
//! with its identity (provider, event key and names).

use crate::reader::{host_offset, PayloadReader};
use crate::types::{DecodeError, EventKey, FieldType, FieldValue, Guid, PointerWidth};

/// Where a field starts within a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOffset {
    /// A fixed offset laid out against 4-byte pointers, plus the number of
    /// pointer-width fields before it.
    Fixed { offset: usize, pointers_before: usize },
    /// Immediately after the preceding field, which is only known once the
    /// preceding variable-length fields have been walked.
    AfterPrevious,
}

impl FieldOffset {
    /// The real offset for a fixed field, given the capture's pointer width.
    pub fn resolve(&self, width: PointerWidth) -> Option<usize> {
        match *self {
            Self::Fixed {
                offset,
                pointers_before,
            } => Some(host_offset(offset, pointers_before, width)),
            Self::AfterPrevious => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: FieldType,
    pub offset: FieldOffset,
}

/// The result of evaluating a schema against one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub values: Vec<FieldValue>,
    pub offsets: Vec<usize>,
    /// The offset just past the last decoded field.
    pub end: usize,
}

/// A payload whose length differs from the length expected for its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
    /// Whether `expected` is a lower bound (the record is newer than the schema).
    pub minimum: bool,
}

/// One layout revision of an event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchema {
    version: u8,
    fields: Vec<FieldDescriptor>,
    pointer_count: usize,
    /// Documented payload length (against 4-byte pointers), when it differs
    /// from the end of the last field.
    padded_len: Option<usize>,
}

impl EventSchema {
    /// Build the field-access plan for an ordered list of fields.
    pub fn compile<S: AsRef<str>>(version: u8, fields: &[(S, FieldType)]) -> Self {
        let mut out = Vec::with_capacity(fields.len());
        let mut fixed = Some(0usize);
        let mut pointers = 0usize;
        for (name, ty) in fields {
            let offset = match fixed {
                Some(offset) => FieldOffset::Fixed {
                    offset,
                    pointers_before: pointers,
                },
                None => FieldOffset::AfterPrevious,
            };
            out.push(FieldDescriptor {
                name: name.as_ref().to_string(),
                ty: *ty,
                offset,
            });

            fixed = match (fixed, ty.layout_size()) {
                (Some(offset), Some(size)) => Some(offset + size),
                _ => None,
            };
            if *ty == FieldType::Pointer {
                pointers += 1;
            }
        }

        EventSchema {
            version,
            fields: out,
            pointer_count: pointers,
            padded_len: None,
        }
    }

    /// Declare the documented payload length for this version.
    pub fn with_padded_len(mut self, len: usize) -> Self {
        self.padded_len = Some(len);
        self
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Evaluate every field against the payload in a single pass.
    pub fn decode(
        &self,
        payload: &[u8],
        width: PointerWidth,
    ) -> Result<DecodedPayload, DecodeError> {
        let reader = PayloadReader::new(payload, width);
        let mut values = Vec::with_capacity(self.fields.len());
        let mut offsets = Vec::with_capacity(self.fields.len());
        let mut cursor = 0usize;

        for field in &self.fields {
            let pos = field.offset.resolve(width).unwrap_or(cursor);
            let (value, next) = reader
                .read(pos, field.ty)
                .map_err(|e| e.in_field(&field.name))?;
            values.push(value);
            offsets.push(pos);
            cursor = next;
        }

        Ok(DecodedPayload {
            values,
            offsets,
            end: cursor,
        })
    }

    /// The payload length expected for this version, given where decoding ended.
    pub fn expected_len(&self, decoded_end: usize, width: PointerWidth) -> usize {
        match self.padded_len {
            Some(len) => host_offset(len, self.pointer_count, width),
            None => decoded_end,
        }
    }

    /// Compare a payload's length against the length expected for its version.
    ///
    /// Records newer than this schema only need to be at least as long.
    pub fn check_length(
        &self,
        record_version: u8,
        payload_len: usize,
        decoded_end: usize,
        width: PointerWidth,
    ) -> Option<LengthMismatch> {
        let expected = self.expected_len(decoded_end, width);
        let minimum = record_version > self.version;
        let ok = if minimum {
            payload_len >= expected
        } else {
            payload_len == expected
        };
        (!ok).then_some(LengthMismatch {
            expected,
            actual: payload_len,
            minimum,
        })
    }
}

/// Identity of an event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateIdentity {
    pub provider_id: Guid,
    pub provider_name: String,
    pub key: EventKey,
    pub event_name: String,
    pub task_name: String,
    pub opcode_name: String,
}

/// All known layout revisions of one event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    identity: TemplateIdentity,
    /// Sorted by version; never empty.
    versions: Vec<EventSchema>,
}

impl EventTemplate {
    /// Group layout revisions under one identity.
    ///
    /// An empty list yields a single zero-field version 0.
    pub fn new(identity: TemplateIdentity, mut versions: Vec<EventSchema>) -> Self {
        if versions.is_empty() {
            versions.push(EventSchema::compile::<&str>(0, &[]));
        }
        versions.sort_by_key(|s| s.version);
        versions.dedup_by_key(|s| s.version);
        EventTemplate { identity, versions }
    }

    pub fn identity(&self) -> &TemplateIdentity {
        &self.identity
    }

    pub fn provider_id(&self) -> Guid {
        self.identity.provider_id
    }

    pub fn key(&self) -> EventKey {
        self.identity.key
    }

    pub fn event_name(&self) -> &str {
        &self.identity.event_name
    }

    pub fn versions(&self) -> &[EventSchema] {
        &self.versions
    }

    /// Pick the newest layout not newer than `version`.
    ///
    /// Layouts are additive, so a record newer than every known layout is
    /// read with the newest one. A record older than every known layout is
    /// read with the oldest one.
    pub fn schema_for(&self, version: u8) -> &EventSchema {
        self.versions
            .iter()
            .rev()
            .find(|s| s.version <= version)
            .unwrap_or(&self.versions[0])
    }
}
