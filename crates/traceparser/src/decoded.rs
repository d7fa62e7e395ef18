use std::borrow::Cow;

use serde_json::{json, Map, Value};

use crate::schema::{DecodedPayload, EventSchema, EventTemplate, LengthMismatch};
use crate::types::{DecodeError, EventKey, FieldValue, Guid, RawEventRecord};

/// A record together with the values its schema decodes from it.
///
/// Records without a known schema are delivered with zero fields.
#[derive(Debug)]
pub struct DecodedEvent<'a> {
    record: &'a RawEventRecord,
    template: Option<&'a EventTemplate>,
    schema: Option<&'a EventSchema>,
    payload: DecodedPayload,
    length_mismatch: Option<LengthMismatch>,
}

impl<'a> DecodedEvent<'a> {
    /// A view of a record with no known schema.
    pub fn unschematized(record: &'a RawEventRecord) -> Self {
        DecodedEvent {
            record,
            template: None,
            schema: None,
            payload: DecodedPayload {
                values: Vec::new(),
                offsets: Vec::new(),
                end: 0,
            },
            length_mismatch: None,
        }
    }

    /// Decode a record with the template's layout for the record's version.
    pub fn decode(
        record: &'a RawEventRecord,
        template: &'a EventTemplate,
        validate_length: bool,
    ) -> Result<Self, DecodeError> {
        let schema = template.schema_for(record.version);
        let payload = schema.decode(&record.payload, record.pointer_width)?;
        let length_mismatch = if validate_length {
            schema.check_length(
                record.version,
                record.payload.len(),
                payload.end,
                record.pointer_width,
            )
        } else {
            None
        };

        Ok(DecodedEvent {
            record,
            template: Some(template),
            schema: Some(schema),
            payload,
            length_mismatch,
        })
    }

    pub fn record(&self) -> &'a RawEventRecord {
        self.record
    }

    pub fn template(&self) -> Option<&'a EventTemplate> {
        self.template
    }

    pub fn is_schematized(&self) -> bool {
        self.schema.is_some()
    }

    pub fn provider_id(&self) -> Guid {
        self.record.provider_id
    }

    pub fn provider_name(&self) -> &'a str {
        self.template
            .map_or("", |t| t.identity().provider_name.as_str())
    }

    pub fn key(&self) -> EventKey {
        self.record.key()
    }

    pub fn event_name(&self) -> Cow<'a, str> {
        if let Some(t) = self.template {
            return Cow::Borrowed(t.event_name());
        }
        let r = self.record;
        match (r.task_name.is_empty(), r.opcode_name.is_empty()) {
            (true, _) => Cow::Owned(format!("EventID({})", r.event_id)),
            (false, true) => Cow::Borrowed(r.task_name.as_str()),
            (false, false) => Cow::Owned(format!("{}/{}", r.task_name, r.opcode_name)),
        }
    }

    /// The record's declared version.
    pub fn version(&self) -> u8 {
        self.record.version
    }

    /// The version of the layout used to decode the record.
    pub fn schema_version(&self) -> Option<u8> {
        self.schema.map(|s| s.version())
    }

    /// Set when the payload length differs from the length expected for its version.
    pub fn length_mismatch(&self) -> Option<LengthMismatch> {
        self.length_mismatch
    }

    pub fn field_count(&self) -> usize {
        self.payload.values.len()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'a str> {
        self.schema
            .map(|s| s.fields())
            .unwrap_or_default()
            .iter()
            .map(|f| f.name.as_str())
    }

    pub fn field_name(&self, index: usize) -> Option<&'a str> {
        self.schema?.fields().get(index).map(|f| f.name.as_str())
    }

    pub fn field_at(&self, index: usize) -> Option<&FieldValue> {
        self.payload.values.get(index)
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        let index = self.schema?.field_index(name)?;
        self.payload.values.get(index)
    }

    /// The offset the named field was read from.
    pub fn field_offset(&self, name: &str) -> Option<usize> {
        let index = self.schema?.field_index(name)?;
        self.payload.offsets.get(index).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'a str, &FieldValue)> + '_ {
        self.field_names().zip(self.payload.values.iter())
    }

    /// The named integer field, or 0 when the record's version lacks it.
    pub fn u64_or_default(&self, name: &str) -> u64 {
        self.field(name).and_then(FieldValue::as_u64).unwrap_or_default()
    }

    /// The named integer field, or 0 when the record's version lacks it.
    pub fn i64_or_default(&self, name: &str) -> i64 {
        self.field(name).and_then(FieldValue::as_i64).unwrap_or_default()
    }

    /// The named string field, or "" when the record's version lacks it.
    pub fn str_or_default(&self, name: &str) -> &str {
        self.field(name).and_then(FieldValue::as_str).unwrap_or_default()
    }

    /// Render the event's identity and fields as JSON.
    pub fn to_json(&self) -> Value {
        let r = self.record;
        let fields: Map<String, Value> = self
            .fields()
            .map(|(name, value)| (name.to_string(), Value::from(value)))
            .collect();
        json!({
            "provider": r.provider_id.to_string(),
            "providerName": self.provider_name(),
            "event": self.event_name(),
            "task": r.task,
            "opcode": r.opcode,
            "eventId": r.event_id,
            "version": r.version,
            "processId": r.process_id,
            "threadId": r.thread_id,
            "timestamp": {
                "seconds": r.timestamp.seconds,
                "nanos": r.timestamp.nanos,
            },
            "fields": fields,
        })
    }
}
