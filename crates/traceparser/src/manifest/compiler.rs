//! Compiles a provider's XML schema document into event templates.
//!
//! The document is read in a single pass. Declarations are expected in
//! document order: the provider element, then opcodes and tasks, then events,
//! then templates. An event whose template has not been seen yet is held
//! until the template closes; events still waiting when the document ends
//! get zero fields.

use std::collections::{BTreeMap, HashMap};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::manifest::chunk::FORMAT_XML;
use crate::manifest::reassembler::ManifestDocument;
use crate::schema::{EventSchema, EventTemplate, TemplateIdentity};
use crate::types::{EventKey, FieldType, Guid, ManifestError};

/// Opcodes every manifest may reference without declaring them.
const WELL_KNOWN_OPCODES: &[(&str, u8)] = &[
    ("win:Info", 0),
    ("win:Start", 1),
    ("win:Stop", 2),
    ("win:DC_Start", 3),
    ("win:DC_Stop", 4),
    ("win:Extension", 5),
    ("win:Reply", 6),
    ("win:Resume", 7),
    ("win:Suspend", 8),
    ("win:Send", 9),
    ("win:Receive", 240),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDecl {
    pub value: u16,
    /// Events of this task are logged under this id instead of the provider's.
    pub event_guid: Option<Guid>,
}

/// The compiled form of one provider's schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderManifest {
    pub provider_id: Guid,
    pub name: String,
    pub opcodes: BTreeMap<String, u8>,
    pub tasks: BTreeMap<String, TaskDecl>,
    pub events: Vec<EventTemplate>,
}

/// Compile a reassembled document.
pub fn compile_manifest(doc: &ManifestDocument) -> Result<ProviderManifest, ManifestError> {
    if doc.format != FORMAT_XML {
        return Err(ManifestError::UnsupportedFormat(doc.format));
    }
    let text = std::str::from_utf8(&doc.data)?;
    compile_xml(doc.provider_id, text)
}

/// Compile an XML schema document.
///
/// `provider_id` is the id the document was delivered under; the document's
/// own provider guid takes precedence.
pub fn compile_xml(provider_id: Guid, text: &str) -> Result<ProviderManifest, ManifestError> {
    let mut compiler = Compiler::new(provider_id);
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event()? {
            Event::Start(e) => compiler.open(&e, false)?,
            Event::Empty(e) => compiler.open(&e, true)?,
            Event::End(e) if e.local_name().as_ref() == b"template" => compiler.close_template(),
            Event::Eof => break,
            _ => {}
        }
    }
    compiler.finish()
}

struct PendingEvent {
    identity: TemplateIdentity,
    version: u8,
}

struct Compiler {
    fallback_id: Guid,
    provider: Option<(Guid, String)>,
    opcodes: BTreeMap<String, u8>,
    tasks: BTreeMap<String, TaskDecl>,
    templates: HashMap<String, Vec<(String, FieldType)>>,
    open_template: Option<(String, Vec<(String, FieldType)>)>,
    /// Events waiting for a template, keyed by template name.
    pending: HashMap<String, Vec<PendingEvent>>,
    compiled: Vec<(TemplateIdentity, EventSchema)>,
}

impl Compiler {
    fn new(fallback_id: Guid) -> Self {
        Compiler {
            fallback_id,
            provider: None,
            opcodes: WELL_KNOWN_OPCODES
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
            tasks: BTreeMap::new(),
            templates: HashMap::new(),
            open_template: None,
            pending: HashMap::new(),
            compiled: Vec::new(),
        }
    }

    fn provider_id(&self) -> Guid {
        self.provider.as_ref().map_or(self.fallback_id, |(id, _)| *id)
    }

    fn provider_name(&self) -> &str {
        self.provider.as_ref().map_or("", |(_, name)| name.as_str())
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), ManifestError> {
        match e.local_name().as_ref() {
            b"provider" => self.provider(&Attrs::parse(e)?),
            b"opcode" => self.opcode(&Attrs::parse(e)?),
            b"task" => self.task(&Attrs::parse(e)?),
            b"event" => self.event(&Attrs::parse(e)?),
            b"template" => {
                let attrs = Attrs::parse(e)?;
                let tid = attrs.require("template", "tid")?;
                self.open_template = Some((tid.to_string(), Vec::new()));
                if empty {
                    self.close_template();
                }
                Ok(())
            }
            b"data" => self.data(&Attrs::parse(e)?),
            _ => Ok(()),
        }
    }

    fn provider(&mut self, attrs: &Attrs) -> Result<(), ManifestError> {
        if self.provider.is_some() {
            log::debug!("ignoring additional provider element in manifest");
            return Ok(());
        }
        let id = parse_guid(attrs.require("provider", "guid")?)?;
        let name = attrs.get("name").unwrap_or_default().to_string();
        if id != self.fallback_id {
            log::warn!(
                "manifest for provider {} was delivered by provider {}",
                id,
                self.fallback_id
            );
        }
        self.provider = Some((id, name));
        Ok(())
    }

    fn opcode(&mut self, attrs: &Attrs) -> Result<(), ManifestError> {
        let name = attrs.require("opcode", "name")?;
        let value = parse_number(attrs.require("opcode", "value")?, "opcode value")?;
        self.opcodes.insert(name.to_string(), value);
        Ok(())
    }

    fn task(&mut self, attrs: &Attrs) -> Result<(), ManifestError> {
        let name = attrs.require("task", "name")?;
        let value = parse_number(attrs.require("task", "value")?, "task value")?;
        let event_guid = attrs.get("eventGUID").map(parse_guid).transpose()?;
        self.tasks
            .insert(name.to_string(), TaskDecl { value, event_guid });
        Ok(())
    }

    fn event(&mut self, attrs: &Attrs) -> Result<(), ManifestError> {
        let event_id = parse_number(attrs.require("event", "value")?, "event value")?;
        let version = match attrs.get("version") {
            Some(v) => parse_number(v, "event version")?,
            None => 0,
        };

        let (task, task_name, task_guid) = match attrs.get("task") {
            Some(name) => match self.tasks.get(name) {
                Some(decl) => (decl.value, name.to_string(), decl.event_guid),
                None => {
                    log::debug!("event {event_id} references undeclared task {name:?}");
                    (0, name.to_string(), None)
                }
            },
            None => (0, String::new(), None),
        };

        let (opcode, opcode_name) = match attrs.get("opcode") {
            Some(name) => match self.opcodes.get(name) {
                Some(&value) => (value, display_opcode(name)),
                None => {
                    log::debug!("event {event_id} references undeclared opcode {name:?}");
                    (0, display_opcode(name))
                }
            },
            None => (0, "Info".to_string()),
        };

        let event_name = match attrs.get("symbol") {
            Some(symbol) => symbol.to_string(),
            None if task_name.is_empty() => format!("EventID({event_id})"),
            None if opcode == 0 => task_name.clone(),
            None => format!("{task_name}/{opcode_name}"),
        };

        let pending = PendingEvent {
            identity: TemplateIdentity {
                provider_id: task_guid.unwrap_or_else(|| self.provider_id()),
                provider_name: self.provider_name().to_string(),
                key: EventKey::new(task, opcode, event_id),
                event_name,
                task_name,
                opcode_name,
            },
            version,
        };

        match attrs.get("template") {
            Some(tid) => match self.templates.get(tid) {
                Some(fields) => {
                    let schema = EventSchema::compile(pending.version, fields);
                    self.compiled.push((pending.identity, schema));
                }
                None => self.pending.entry(tid.to_string()).or_default().push(pending),
            },
            None => {
                let schema = EventSchema::compile::<&str>(pending.version, &[]);
                self.compiled.push((pending.identity, schema));
            }
        }
        Ok(())
    }

    fn data(&mut self, attrs: &Attrs) -> Result<(), ManifestError> {
        let Some((tid, fields)) = self.open_template.as_mut() else {
            return Ok(());
        };
        let name = attrs.require("data", "name")?;
        let type_name = attrs.require("data", "inType")?;
        if attrs.get("length").is_some() || attrs.get("count").is_some() {
            return Err(ManifestError::UnsupportedArray {
                template: tid.clone(),
                field: name.to_string(),
            });
        }
        let ty = FieldType::from_manifest_name(type_name).ok_or_else(|| {
            ManifestError::UnknownFieldType {
                template: tid.clone(),
                field: name.to_string(),
                type_name: type_name.to_string(),
            }
        })?;
        fields.push((name.to_string(), ty));
        Ok(())
    }

    fn close_template(&mut self) {
        let Some((tid, fields)) = self.open_template.take() else {
            return;
        };
        for waiting in self.pending.remove(&tid).unwrap_or_default() {
            let schema = EventSchema::compile(waiting.version, &fields);
            self.compiled.push((waiting.identity, schema));
        }
        self.templates.insert(tid, fields);
    }

    fn finish(mut self) -> Result<ProviderManifest, ManifestError> {
        let (provider_id, name) = self.provider.take().ok_or(ManifestError::MissingProvider)?;

        for (tid, waiting) in self.pending.drain() {
            log::debug!(
                "template {tid:?} never declared; {} event(s) of {name} get no fields",
                waiting.len()
            );
            for event in waiting {
                let schema = EventSchema::compile::<&str>(event.version, &[]);
                self.compiled.push((event.identity, schema));
            }
        }

        // Several versions of one event become one template.
        let mut grouped: BTreeMap<(Guid, EventKey), (TemplateIdentity, Vec<EventSchema>)> =
            BTreeMap::new();
        for (identity, schema) in self.compiled {
            grouped
                .entry((identity.provider_id, identity.key))
                .or_insert_with(|| (identity, Vec::new()))
                .1
                .push(schema);
        }
        let events = grouped
            .into_values()
            .map(|(identity, versions)| EventTemplate::new(identity, versions))
            .collect();

        Ok(ProviderManifest {
            provider_id,
            name,
            opcodes: self.opcodes,
            tasks: self.tasks,
            events,
        })
    }
}

struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn parse(e: &BytesStart<'_>) -> Result<Self, ManifestError> {
        let mut out = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            out.push((key, value));
        }
        Ok(Attrs(out))
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, element: &'static str, attr: &'static str) -> Result<&str, ManifestError> {
        self.get(attr)
            .ok_or(ManifestError::MissingAttribute { element, attr })
    }
}

fn display_opcode(name: &str) -> String {
    name.strip_prefix("win:").unwrap_or(name).to_string()
}

fn parse_guid(s: &str) -> Result<Guid, ManifestError> {
    let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
    Guid::parse_str(trimmed).map_err(|_| ManifestError::InvalidValue {
        what: "guid",
        value: s.to_string(),
    })
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
fn parse_number<T: TryFrom<u64>>(s: &str, what: &'static str) -> Result<T, ManifestError> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| ManifestError::InvalidValue {
            what,
            value: s.to_string(),
        })
}
