//! Event layouts known ahead of time.
//!
//! Static layouts are declared with [`static_event!`](crate::static_event),
//! which generates a constructor returning an [`EventTemplate`] with one
//! [`EventSchema`](crate::schema::EventSchema) per declared version:
//!
//! ```
//! use etw_traceparser::{static_event, Guid};
//!
//! static_event! {
//!     /// Garbage collection ended.
//!     pub fn gc_end() {
//!         provider: (Guid::nil(), "Example-Runtime"),
//!         event: ("GC/Stop", 2),
//!         task: ("GC", 1),
//!         opcode: ("Stop", 2),
//!         versions: {
//!             0 padded 8 => ["Count": UInt32, "Depth": UInt16],
//!             1 => ["Count": UInt32, "Depth": UInt32, "ClrInstanceID": UInt16],
//!         },
//!     }
//! }
//!
//! let template = gc_end();
//! assert_eq!(template.schema_for(7).version(), 1);
//! ```
//!
//! Each version lists its complete field sequence. `padded N` records the
//! documented payload length of that version (laid out against 4-byte
//! pointers) when the capturing runtime pads its struct beyond the last field.

pub mod clr;

use crate::registry::SchemaRegistry;
use crate::schema::EventTemplate;

#[macro_export]
macro_rules! static_event {
    (@padded $schema:expr) => {
        $schema
    };
    (@padded $schema:expr, $padded:literal) => {
        $schema.with_padded_len($padded)
    };
    (
        $(#[$meta:meta])*
        $vis:vis fn $ctor:ident() {
            provider: ($provider_id:expr, $provider_name:expr),
            event: ($event_name:literal, $event_id:literal),
            task: ($task_name:literal, $task:literal),
            opcode: ($opcode_name:literal, $opcode:literal),
            versions: {
                $(
                    $version:literal $(padded $padded:literal)? => [
                        $($field:literal : $ty:ident),* $(,)?
                    ]
                ),+ $(,)?
            } $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis fn $ctor() -> $crate::schema::EventTemplate {
            $crate::schema::EventTemplate::new(
                $crate::schema::TemplateIdentity {
                    provider_id: $provider_id,
                    provider_name: ::std::string::String::from($provider_name),
                    key: $crate::types::EventKey::new($task, $opcode, $event_id),
                    event_name: ::std::string::String::from($event_name),
                    task_name: ::std::string::String::from($task_name),
                    opcode_name: ::std::string::String::from($opcode_name),
                },
                ::std::vec![
                    $(
                        $crate::static_event!(@padded
                            $crate::schema::EventSchema::compile($version, {
                                let fields: &[(&str, $crate::types::FieldType)] =
                                    &[$(($field, $crate::types::FieldType::$ty)),*];
                                fields
                            })
                            $(, $padded)?
                        )
                    ),+
                ],
            )
        }
    };
}

/// Every statically known template.
pub fn catalogue() -> Vec<EventTemplate> {
    clr::templates()
}

/// Register every statically known template without a specific callback,
/// so catch-all subscribers receive them decoded.
pub fn register_catalogue(registry: &mut SchemaRegistry) {
    for template in catalogue() {
        registry.register_template(template);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKey, FieldType, Guid};

    static_event! {
        fn sample() {
            provider: (Guid::from_u128(7), "Sample"),
            event: ("Sample/Info", 3),
            task: ("Sample", 4),
            opcode: ("Info", 0),
            versions: {
                0 => [],
                2 padded 12 => ["A": UInt32, "B": AnsiString],
            },
        }
    }

    #[test]
    fn test_macro_builds_template() {
        let t = sample();
        assert_eq!(t.provider_id(), Guid::from_u128(7));
        assert_eq!(t.key(), EventKey::new(4, 0, 3));
        assert_eq!(t.event_name(), "Sample/Info");
        assert_eq!(t.identity().task_name, "Sample");
        assert_eq!(t.versions().len(), 2);
        assert!(t.schema_for(1).fields().is_empty());

        let v2 = t.schema_for(2);
        assert_eq!(v2.fields()[1].ty, FieldType::AnsiString);
        assert_eq!(v2.expected_len(6, crate::PointerWidth::Eight), 12);
    }

    #[test]
    fn test_catalogue_keys_are_unique() {
        let mut keys: Vec<_> = catalogue()
            .iter()
            .map(|t| (t.provider_id(), t.key()))
            .collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }
}
