use std::fmt;

use bytes::Bytes;

pub use uuid::Uuid as Guid;

// === Error types ===

/// Errors that can occur while decoding a single event payload.
///
/// All of them are local to one record: the record is dropped and decoding
/// continues with the next one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("read of {needed} bytes at offset {offset} exceeds payload length {len}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("field {field:?}: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Reports whether the payload was shorter than its schema requires.
    pub fn is_truncation(&self) -> bool {
        match self {
            Self::OutOfBounds { .. } | Self::UnterminatedString { .. } => true,
            Self::Field { source, .. } => source.is_truncation(),
        }
    }

    pub(crate) fn in_field(self, field: &str) -> Self {
        Self::Field {
            field: field.to_string(),
            source: Box::new(self),
        }
    }
}

/// Errors that can occur while compiling a provider manifest.
///
/// A failure is scoped to the provider whose document failed.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("unsupported manifest format {0}")]
    UnsupportedFormat(u8),

    #[error("manifest is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("malformed manifest XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("missing attribute {attr:?} on <{element}>")]
    MissingAttribute {
        element: &'static str,
        attr: &'static str,
    },

    #[error("invalid {what}: {value:?}")]
    InvalidValue { what: &'static str, value: String },

    #[error("unknown type {type_name:?} for field {field:?} in template {template:?}")]
    UnknownFieldType {
        template: String,
        field: String,
        type_name: String,
    },

    #[error("field {field:?} in template {template:?} is an array, which is not supported")]
    UnsupportedArray { template: String, field: String },

    #[error("manifest has no provider element")]
    MissingProvider,
}

// === Basic types ===

/// A timestamp represented as seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;

impl Timestamp {
    /// Convert a FILETIME (100ns ticks since 1601-01-01 UTC) to a Unix timestamp.
    pub fn from_filetime(ticks: i64) -> Self {
        let unix_ticks = ticks.saturating_sub(FILETIME_UNIX_OFFSET);
        let seconds = unix_ticks.div_euclid(10_000_000);
        let nanos = unix_ticks.rem_euclid(10_000_000) * 100;
        Timestamp {
            seconds,
            nanos: nanos as i32,
        }
    }
}

/// The pointer width of the process that captured an event.
///
/// This is a property of the record, not of the decoding process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerWidth {
    Four,
    #[default]
    Eight,
}

impl PointerWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    pub fn from_bytes(n: usize) -> Option<Self> {
        match n {
            4 => Some(Self::Four),
            8 => Some(Self::Eight),
            _ => None,
        }
    }
}

/// Identifies one event type within a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub task: u16,
    pub opcode: u8,
    pub event_id: u16,
}

impl EventKey {
    pub fn new(task: u16, opcode: u8, event_id: u16) -> Self {
        EventKey {
            task,
            opcode,
            event_id,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task={} opcode={} id={}",
            self.task, self.opcode, self.event_id
        )
    }
}

/// A trace record as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEventRecord {
    pub provider_id: Guid,
    pub event_id: u16,
    pub task: u16,
    pub task_name: String,
    pub opcode: u8,
    pub opcode_name: String,
    pub version: u8,
    pub timestamp: Timestamp,
    pub process_id: u32,
    pub thread_id: u32,
    pub pointer_width: PointerWidth,
    pub payload: Bytes,
}

impl RawEventRecord {
    pub fn new(provider_id: Guid, key: EventKey, version: u8, payload: impl Into<Bytes>) -> Self {
        RawEventRecord {
            provider_id,
            event_id: key.event_id,
            task: key.task,
            task_name: String::new(),
            opcode: key.opcode,
            opcode_name: String::new(),
            version,
            timestamp: Timestamp::default(),
            process_id: 0,
            thread_id: 0,
            pointer_width: PointerWidth::default(),
            payload: payload.into(),
        }
    }

    pub fn with_pointer_width(mut self, width: PointerWidth) -> Self {
        self.pointer_width = width;
        self
    }

    pub fn with_process(mut self, process_id: u32, thread_id: u32) -> Self {
        self.process_id = process_id;
        self.thread_id = thread_id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            task: self.task,
            opcode: self.opcode,
            event_id: self.event_id,
        }
    }
}

// === Field types and values ===

/// The primitive type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    /// A 4-byte Win32 BOOL.
    Boolean,
    Guid,
    /// An integer as wide as the capturing process's pointers.
    Pointer,
    /// A null-terminated UTF-16LE string.
    UnicodeString,
    /// A null-terminated single-byte string.
    AnsiString,
}

impl FieldType {
    /// The size of the field assuming 4-byte pointers, or `None` if the
    /// field is variable-length.
    pub fn layout_size(self) -> Option<usize> {
        match self {
            Self::Int8 | Self::UInt8 => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::Boolean | Self::Pointer => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 => Some(8),
            Self::Guid => Some(16),
            Self::UnicodeString | Self::AnsiString => None,
        }
    }

    /// The size of the field in a payload captured with the given pointer width.
    pub fn size(self, width: PointerWidth) -> Option<usize> {
        match self {
            Self::Pointer => Some(width.bytes()),
            other => other.layout_size(),
        }
    }

    pub fn is_variable(self) -> bool {
        self.layout_size().is_none()
    }

    /// Map a manifest `inType` name onto a field type.
    pub fn from_manifest_name(name: &str) -> Option<Self> {
        let ty = match name {
            "win:Int8" => Self::Int8,
            "win:UInt8" => Self::UInt8,
            "win:Int16" => Self::Int16,
            "win:UInt16" => Self::UInt16,
            "win:Int32" => Self::Int32,
            "win:UInt32" | "win:HexInt32" => Self::UInt32,
            "win:Int64" | "win:FILETIME" => Self::Int64,
            "win:UInt64" | "win:HexInt64" => Self::UInt64,
            "win:Float" => Self::Float32,
            "win:Double" => Self::Float64,
            "win:Boolean" => Self::Boolean,
            "win:GUID" => Self::Guid,
            "win:Pointer" => Self::Pointer,
            "win:UnicodeString" => Self::UnicodeString,
            "win:AnsiString" => Self::AnsiString,
            _ => return None,
        };
        Some(ty)
    }

    pub fn manifest_name(self) -> &'static str {
        match self {
            Self::Int8 => "win:Int8",
            Self::UInt8 => "win:UInt8",
            Self::Int16 => "win:Int16",
            Self::UInt16 => "win:UInt16",
            Self::Int32 => "win:Int32",
            Self::UInt32 => "win:UInt32",
            Self::Int64 => "win:Int64",
            Self::UInt64 => "win:UInt64",
            Self::Float32 => "win:Float",
            Self::Float64 => "win:Double",
            Self::Boolean => "win:Boolean",
            Self::Guid => "win:GUID",
            Self::Pointer => "win:Pointer",
            Self::UnicodeString => "win:UnicodeString",
            Self::AnsiString => "win:AnsiString",
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Boolean(bool),
    Guid(Guid),
    Pointer(u64),
    String(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int8(v) => Some(v as i64),
            Self::UInt8(v) => Some(v as i64),
            Self::Int16(v) => Some(v as i64),
            Self::UInt16(v) => Some(v as i64),
            Self::Int32(v) => Some(v as i64),
            Self::UInt32(v) => Some(v as i64),
            Self::Int64(v) => Some(v),
            Self::UInt64(v) => i64::try_from(v).ok(),
            Self::Pointer(v) => i64::try_from(v).ok(),
            Self::Boolean(b) => Some(b as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::UInt64(v) | Self::Pointer(v) => Some(v),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float32(v) => Some(v as f64),
            Self::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Guid> {
        match self {
            Self::Guid(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int8(v) => write!(f, "{v}"),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Guid(v) => write!(f, "{v}"),
            Self::Pointer(v) => write!(f, "0x{v:x}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<&FieldValue> for serde_json::Value {
    fn from(value: &FieldValue) -> Self {
        use serde_json::Value;
        match value {
            FieldValue::Int8(v) => Value::from(*v),
            FieldValue::UInt8(v) => Value::from(*v),
            FieldValue::Int16(v) => Value::from(*v),
            FieldValue::UInt16(v) => Value::from(*v),
            FieldValue::Int32(v) => Value::from(*v),
            FieldValue::UInt32(v) => Value::from(*v),
            FieldValue::Int64(v) => Value::from(*v),
            FieldValue::UInt64(v) => Value::from(*v),
            FieldValue::Float32(v) => Value::from(*v as f64),
            FieldValue::Float64(v) => Value::from(*v),
            FieldValue::Boolean(v) => Value::from(*v),
            FieldValue::Guid(v) => Value::from(v.to_string()),
            FieldValue::Pointer(v) => Value::from(format!("0x{v:x}")),
            FieldValue::String(v) => Value::from(v.as_str()),
        }
    }
}
