use serde::{Deserialize, Serialize};

/// Decoder settings.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// let cfg = etw_traceparser::DecoderConfig::from_json(r#"{"validateLengths": false}"#).unwrap();
/// assert!(!cfg.validate_lengths);
/// assert_eq!(cfg.max_manifest_chunks, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DecoderConfig {
    /// Compare payload lengths against the length expected for their version.
    pub validate_lengths: bool,

    /// Chunk sets announcing more chunks than this are ignored.
    pub max_manifest_chunks: u16,

    /// Accumulated manifests larger than this are abandoned.
    pub max_manifest_bytes: usize,

    /// Also deliver manifest-chunk records to catch-all subscribers.
    pub deliver_manifest_records: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            validate_lengths: true,
            max_manifest_chunks: 4096,
            max_manifest_bytes: 16 << 20,
            deliver_manifest_records: true,
        }
    }
}

impl DecoderConfig {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
