//! Maps event keys to their schemas and callbacks, and dispatches records.
//!
//! Dispatch is sequential: each record's callbacks (the key's own callback,
//! then every catch-all callback) complete before the next record is
//! processed. Hosts that decode several streams in parallel should keep one
//! registry per stream or serialize access to a shared one.
//!
//! Registrations are permanent; there is no way to unregister a callback.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DecoderConfig;
use crate::decoded::DecodedEvent;
use crate::manifest::chunk::is_manifest_record;
use crate::manifest::compiler::{compile_manifest, ProviderManifest};
use crate::manifest::reassembler::{ChunkOutcome, ManifestDocument, ManifestReassembler};
use crate::schema::EventTemplate;
use crate::types::{DecodeError, EventKey, Guid, ManifestError, RawEventRecord};

pub type EventCallback = Box<dyn FnMut(&DecodedEvent<'_>) + Send>;

pub type ManifestCallback = Box<dyn FnMut(&ProviderManifest) + Send>;

/// Where a registered template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOrigin {
    /// Registered by the host, e.g. from the static catalogue.
    Static,
    /// Learned from a provider's manifest.
    Manifest,
}

/// Counters describing what a registry has dispatched so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub decoded: u64,
    pub unschematized: u64,
    /// Records whose payload could not be decoded.
    pub dropped: u64,
    pub length_mismatches: u64,
    pub manifest_chunks: u64,
    pub manifests_learned: u64,
    pub manifests_failed: u64,
}

struct Entry {
    template: Arc<EventTemplate>,
    origin: SchemaOrigin,
    callback: Option<EventCallback>,
}

struct LearnedProvider {
    name: String,
    keys: Vec<(Guid, EventKey)>,
}

pub struct SchemaRegistry {
    config: DecoderConfig,
    entries: HashMap<(Guid, EventKey), Entry>,
    catch_all: Vec<EventCallback>,
    manifest_observers: Vec<ManifestCallback>,
    reassembler: ManifestReassembler,
    learned: HashMap<Guid, LearnedProvider>,
    stats: DispatchStats,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl SchemaRegistry {
    pub fn new(config: DecoderConfig) -> Self {
        SchemaRegistry {
            reassembler: ManifestReassembler::new(&config),
            config,
            entries: HashMap::new(),
            catch_all: Vec::new(),
            manifest_observers: Vec::new(),
            learned: HashMap::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Register a template and the callback that receives its decoded events.
    ///
    /// Replaces any template and callback previously registered for the key.
    pub fn register(&mut self, template: EventTemplate, callback: EventCallback) {
        self.insert(template, Some(callback));
    }

    /// Register a template whose events only reach catch-all subscribers.
    ///
    /// A callback already registered for the key is kept.
    pub fn register_template(&mut self, template: EventTemplate) {
        let key = (template.provider_id(), template.key());
        let callback = self.entries.remove(&key).and_then(|e| e.callback);
        self.insert(template, callback);
    }

    fn insert(&mut self, template: EventTemplate, callback: Option<EventCallback>) {
        let key = (template.provider_id(), template.key());
        log::debug!(
            "registered template {} ({}) for provider {}",
            template.event_name(),
            key.1,
            key.0
        );
        self.entries.insert(
            key,
            Entry {
                template: Arc::new(template),
                origin: SchemaOrigin::Static,
                callback,
            },
        );
    }

    /// Subscribe to every dispatched event, including events of providers
    /// whose schemas are learned later.
    pub fn register_all(&mut self, callback: EventCallback) {
        self.catch_all.push(callback);
    }

    /// Subscribe to provider manifests as they are learned.
    pub fn on_manifest(&mut self, callback: ManifestCallback) {
        self.manifest_observers.push(callback);
    }

    pub fn template(&self, provider_id: &Guid, key: &EventKey) -> Option<&EventTemplate> {
        self.entries
            .get(&(*provider_id, *key))
            .map(|e| e.template.as_ref())
    }

    pub fn origin(&self, provider_id: &Guid, key: &EventKey) -> Option<SchemaOrigin> {
        self.entries.get(&(*provider_id, *key)).map(|e| e.origin)
    }

    /// The name of a provider whose manifest has been learned.
    pub fn learned_provider_name(&self, provider_id: &Guid) -> Option<&str> {
        self.learned.get(provider_id).map(|p| p.name.as_str())
    }

    /// Decode a record and deliver it to its callbacks.
    ///
    /// A record whose payload cannot be decoded is dropped: no callback is
    /// invoked and the error is returned. Records without a schema go to the
    /// catch-all subscribers with zero fields.
    pub fn dispatch(&mut self, record: &RawEventRecord) -> Result<(), DecodeError> {
        self.stats.dispatched += 1;

        if is_manifest_record(record) {
            self.stats.manifest_chunks += 1;
            if let ChunkOutcome::Complete(doc) = self.reassembler.offer(record) {
                // Failures are logged and counted; the provider's events stay undecodable.
                let _ = self.learn_manifest(&doc);
            }
            if !self.config.deliver_manifest_records {
                return Ok(());
            }
        }

        let Some(entry) = self.entries.get_mut(&(record.provider_id, record.key())) else {
            self.stats.unschematized += 1;
            let event = DecodedEvent::unschematized(record);
            for callback in &mut self.catch_all {
                callback(&event);
            }
            return Ok(());
        };

        let template = Arc::clone(&entry.template);
        let event = match DecodedEvent::decode(record, &template, self.config.validate_lengths) {
            Ok(event) => event,
            Err(err) => {
                self.stats.dropped += 1;
                log::warn!(
                    "dropping {} event (version {}) from provider {}: {}",
                    template.event_name(),
                    record.version,
                    record.provider_id,
                    err
                );
                return Err(err);
            }
        };

        if let Some(mismatch) = event.length_mismatch() {
            self.stats.length_mismatches += 1;
            log::warn!(
                "{} event version {} has {} payload bytes, expected {}{}",
                template.event_name(),
                record.version,
                mismatch.actual,
                if mismatch.minimum { "at least " } else { "" },
                mismatch.expected
            );
        }

        self.stats.decoded += 1;
        if let Some(callback) = entry.callback.as_mut() {
            callback(&event);
        }
        for callback in &mut self.catch_all {
            callback(&event);
        }
        Ok(())
    }

    /// Dispatch every record, skipping records that fail to decode.
    pub fn run<I>(&mut self, records: I) -> DispatchStats
    where
        I: IntoIterator<Item = RawEventRecord>,
    {
        for record in records {
            // Decode failures are logged and counted by dispatch.
            let _ = self.dispatch(&record);
        }
        self.stats
    }

    /// Compile a reassembled schema document and install its templates.
    ///
    /// The provider's templates from an earlier manifest are replaced.
    /// Statically registered templates are never replaced. On failure the
    /// provider's learned templates are forgotten, so its events arrive with
    /// zero fields until a later manifest compiles.
    pub fn learn_manifest(&mut self, doc: &ManifestDocument) -> Result<(), ManifestError> {
        match compile_manifest(doc) {
            Ok(manifest) => {
                self.install(manifest);
                Ok(())
            }
            Err(err) => {
                self.stats.manifests_failed += 1;
                log::warn!(
                    "failed to compile manifest from provider {}: {}",
                    doc.provider_id,
                    err
                );
                self.forget_learned(&doc.provider_id);
                Err(err)
            }
        }
    }

    /// Remove the templates learned from a provider's manifest.
    fn forget_learned(&mut self, provider_id: &Guid) {
        let Some(previous) = self.learned.remove(provider_id) else {
            return;
        };
        for key in previous.keys {
            if self.origin(&key.0, &key.1) == Some(SchemaOrigin::Manifest) {
                self.entries.remove(&key);
            }
        }
    }

    fn install(&mut self, manifest: ProviderManifest) {
        self.forget_learned(&manifest.provider_id);

        let mut keys = Vec::with_capacity(manifest.events.len());
        for template in &manifest.events {
            let key = (template.provider_id(), template.key());
            if self.origin(&key.0, &key.1) == Some(SchemaOrigin::Static) {
                log::debug!(
                    "keeping registered template for {} over the manifest's",
                    template.event_name()
                );
                continue;
            }
            self.entries.insert(
                key,
                Entry {
                    template: Arc::new(template.clone()),
                    origin: SchemaOrigin::Manifest,
                    callback: None,
                },
            );
            keys.push(key);
        }

        self.stats.manifests_learned += 1;
        log::info!(
            provider = manifest.name.as_str(), events = keys.len();
            "learned provider manifest"
        );
        self.learned.insert(
            manifest.provider_id,
            LearnedProvider {
                name: manifest.name.clone(),
                keys,
            },
        );
        for observer in &mut self.manifest_observers {
            observer(&manifest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::chunk::{encode_manifest_chunks, MANIFEST_EVENT_ID, MANIFEST_OPCODE};
    use crate::schema::{EventSchema, TemplateIdentity};
    use crate::types::{FieldType, FieldValue, PointerWidth};
    use crate::writer::PayloadWriter;
    use std::sync::Mutex;

    const PROVIDER: Guid = Guid::from_u128(0x42);

    fn template(key: EventKey, name: &str) -> EventTemplate {
        EventTemplate::new(
            TemplateIdentity {
                provider_id: PROVIDER,
                provider_name: "P".to_string(),
                key,
                event_name: name.to_string(),
                task_name: String::new(),
                opcode_name: String::new(),
            },
            vec![EventSchema::compile(0, &[("N", FieldType::UInt32)])],
        )
    }

    fn record(key: EventKey, payload: &[u8]) -> RawEventRecord {
        RawEventRecord::new(PROVIDER, key, 0, payload.to_vec())
    }

    fn manifest_records(doc: &str, chunk_size: usize) -> Vec<RawEventRecord> {
        encode_manifest_chunks(doc.as_bytes(), chunk_size)
            .into_iter()
            .map(|payload| {
                RawEventRecord::new(
                    PROVIDER,
                    EventKey::new(0, MANIFEST_OPCODE, MANIFEST_EVENT_ID),
                    1,
                    payload,
                )
            })
            .collect()
    }

    fn doc(template_fields: &str) -> String {
        format!(
            r#"<provider name="P" guid="{PROVIDER}">
                <events><event value="9" template="T"/></events>
                <templates><template tid="T">{template_fields}</template></templates>
            </provider>"#
        )
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, tag: &'static str) -> EventCallback {
        let log = Arc::clone(log);
        Box::new(move |ev: &DecodedEvent<'_>| {
            log.lock()
                .unwrap()
                .push(format!("{tag}:{}:{}", ev.event_name(), ev.field_count()));
        })
    }

    #[test]
    fn test_specific_before_catch_all() {
        let log = Log::default();
        let mut reg = SchemaRegistry::default();
        let key = EventKey::new(1, 0, 1);
        reg.register_all(recorder(&log, "all"));
        reg.register(template(key, "E"), recorder(&log, "one"));

        reg.dispatch(&record(key, &7u32.to_le_bytes())).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["one:E:1", "all:E:1"]);
        assert_eq!(reg.stats().decoded, 1);
    }

    #[test]
    fn test_unknown_key_goes_to_catch_all_only() {
        let log = Log::default();
        let mut reg = SchemaRegistry::default();
        reg.register(template(EventKey::new(1, 0, 1), "E"), recorder(&log, "one"));
        reg.register_all(recorder(&log, "all"));

        reg.dispatch(&record(EventKey::new(5, 0, 5), &[1, 2])).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["all:EventID(5):0"]);
        assert_eq!(reg.stats().unschematized, 1);
    }

    #[test]
    fn test_decode_error_drops_record() {
        let log = Log::default();
        let mut reg = SchemaRegistry::default();
        let key = EventKey::new(1, 0, 1);
        reg.register(template(key, "E"), recorder(&log, "one"));
        reg.register_all(recorder(&log, "all"));

        let err = reg.dispatch(&record(key, &[1, 2])).unwrap_err();
        assert!(err.is_truncation());
        assert!(log.lock().unwrap().is_empty());

        // The next record still decodes.
        reg.dispatch(&record(key, &3u32.to_le_bytes())).unwrap();
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(reg.stats().dropped, 1);
    }

    #[test]
    fn test_length_mismatch_still_delivers() {
        let log = Log::default();
        let mut reg = SchemaRegistry::default();
        let key = EventKey::new(1, 0, 1);
        reg.register(template(key, "E"), recorder(&log, "one"));
        reg.dispatch(&record(key, &[1, 0, 0, 0, 9, 9])).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["one:E:1"]);
        assert_eq!(reg.stats().length_mismatches, 1);
    }

    #[test]
    fn test_register_template_keeps_callback() {
        let log = Log::default();
        let mut reg = SchemaRegistry::default();
        let key = EventKey::new(1, 0, 1);
        reg.register(template(key, "Old"), recorder(&log, "one"));
        reg.register_template(template(key, "New"));
        reg.dispatch(&record(key, &1u32.to_le_bytes())).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["one:New:1"]);
    }

    #[test]
    fn test_learns_schema_from_manifest_records() {
        let seen = Log::default();
        let learned = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SchemaRegistry::default();
        reg.register_all(recorder(&seen, "all"));
        {
            let learned = Arc::clone(&learned);
            reg.on_manifest(Box::new(move |m: &ProviderManifest| {
                learned.lock().unwrap().push(m.name.clone());
            }));
        }

        let key = EventKey::new(0, 0, 9);
        let mut payload = PayloadWriter::new(PointerWidth::Eight);
        payload.unicode_str("hi");

        // Before the manifest the event has no fields.
        reg.dispatch(&record(key, payload.as_ref())).unwrap();

        for r in manifest_records(&doc(r#"<data name="S" inType="win:UnicodeString"/>"#), 32) {
            reg.dispatch(&r).unwrap();
        }
        assert_eq!(*learned.lock().unwrap(), vec!["P"]);
        assert_eq!(reg.origin(&PROVIDER, &key), Some(SchemaOrigin::Manifest));
        assert_eq!(reg.learned_provider_name(&PROVIDER), Some("P"));

        reg.dispatch(&record(key, payload.as_ref())).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first().map(String::as_str), Some("all:EventID(9):0"));
        assert_eq!(seen.last().map(String::as_str), Some("all:EventID(9):1"));
        assert_eq!(reg.stats().manifests_learned, 1);
    }

    #[test]
    fn test_manifest_records_can_be_withheld() {
        let log = Log::default();
        let config = DecoderConfig {
            deliver_manifest_records: false,
            ..Default::default()
        };
        let mut reg = SchemaRegistry::new(config);
        reg.register_all(recorder(&log, "all"));
        for r in manifest_records(&doc(""), 16) {
            reg.dispatch(&r).unwrap();
        }
        assert!(log.lock().unwrap().is_empty());
        assert!(reg.stats().manifest_chunks > 1);
    }

    #[test]
    fn test_new_manifest_replaces_learned_schemas() {
        let mut reg = SchemaRegistry::default();
        let key = EventKey::new(0, 0, 9);
        reg.run(manifest_records(&doc(r#"<data name="A" inType="win:UInt8"/>"#), 64));
        assert_eq!(reg.template(&PROVIDER, &key).unwrap().schema_for(0).fields()[0].name, "A");

        reg.run(manifest_records(
            &format!(
                r#"<provider name="P" guid="{PROVIDER}">
                     <events><event value="10"/></events>
                   </provider>"#
            ),
            64,
        ));
        assert!(reg.template(&PROVIDER, &key).is_none());
        assert!(reg.template(&PROVIDER, &EventKey::new(0, 0, 10)).is_some());
    }

    #[test]
    fn test_failed_manifest_keeps_other_providers_decoding() {
        let log = Log::default();
        let mut reg = SchemaRegistry::default();
        let key = EventKey::new(1, 0, 1);
        reg.register(template(key, "E"), recorder(&log, "one"));

        let stats = reg.run(manifest_records(&doc(r#"<data name="X" inType="win:Bogus"/>"#), 40));
        assert_eq!(stats.manifests_failed, 1);
        assert!(reg.template(&PROVIDER, &EventKey::new(0, 0, 9)).is_none());

        reg.dispatch(&record(key, &1u32.to_le_bytes())).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["one:E:1"]);
    }

    #[test]
    fn test_failed_manifest_forgets_learned_schemas() {
        let log = Log::default();
        let mut reg = SchemaRegistry::default();
        reg.register_all(recorder(&log, "all"));
        let learned = EventKey::new(0, 0, 9);
        let fixed = EventKey::new(1, 0, 1);
        reg.register_template(template(fixed, "Static"));

        reg.run(manifest_records(&doc(r#"<data name="A" inType="win:UInt8"/>"#), 64));
        assert!(reg.template(&PROVIDER, &learned).is_some());

        let stats = reg.run(manifest_records(&doc(r#"<data name="A" inType="win:Nope"/>"#), 64));
        assert_eq!(stats.manifests_failed, 1);
        assert!(reg.template(&PROVIDER, &learned).is_none());
        assert_eq!(reg.learned_provider_name(&PROVIDER), None);
        assert_eq!(reg.origin(&PROVIDER, &fixed), Some(SchemaOrigin::Static));

        log.lock().unwrap().clear();
        reg.dispatch(&record(learned, &[7])).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["all:EventID(9):0"]);

        // A later good broadcast is learned again.
        reg.run(manifest_records(&doc(r#"<data name="A" inType="win:UInt8"/>"#), 64));
        assert!(reg.template(&PROVIDER, &learned).is_some());
    }

    #[test]
    fn test_manifest_does_not_replace_static_template() {
        let mut reg = SchemaRegistry::default();
        let key = EventKey::new(0, 0, 9);
        reg.register_template(template(key, "Static"));
        reg.run(manifest_records(&doc(r#"<data name="A" inType="win:UInt8"/>"#), 64));
        assert_eq!(reg.template(&PROVIDER, &key).unwrap().event_name(), "Static");
        assert_eq!(reg.origin(&PROVIDER, &key), Some(SchemaOrigin::Static));
    }

    #[test]
    fn test_pointer_width_is_per_record() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SchemaRegistry::default();
        let key = EventKey::new(2, 0, 2);
        let t = EventTemplate::new(
            TemplateIdentity {
                provider_id: PROVIDER,
                provider_name: "P".to_string(),
                key,
                event_name: "Ptr".to_string(),
                task_name: String::new(),
                opcode_name: String::new(),
            },
            vec![EventSchema::compile(
                0,
                &[("P", FieldType::Pointer), ("N", FieldType::UInt16)],
            )],
        );
        {
            let seen = Arc::clone(&seen);
            reg.register(
                t,
                Box::new(move |ev: &DecodedEvent<'_>| {
                    seen.lock().unwrap().push(ev.field("N").cloned());
                }),
            );
        }
        for width in [PointerWidth::Four, PointerWidth::Eight] {
            let mut w = PayloadWriter::new(width);
            w.pointer(1).u16(77);
            let r = record(key, w.as_ref()).with_pointer_width(width);
            reg.dispatch(&r).unwrap();
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(FieldValue::UInt16(77)), Some(FieldValue::UInt16(77))]
        );
    }
}
