//! Manifest-based encoding, decoding and schema migration of messages.
//!
//! Every command and event travels with a stable string **manifest**: the payload
//! type name, optionally followed by `;` and a schema version (`PlanItemTransitioned;1`).
//! Version 0 is written without suffix.
//!
//! The [`MessageCodec`] is built once at startup from an explicit list of
//! [`ManifestSpec`]s per entity type and is read-only afterwards, so one
//! `Arc<MessageCodec>` can be shared by every entity context of the process.
//!
//! Decoding never fails hard. It classifies the outcome with [`Decoded`]:
//!
//! - a manifest nobody registered is [`Decoded::Unrecognized`],
//! - a registered manifest whose payload cannot be parsed or migrated is
//!   [`Decoded::DeserializationFailure`], keeping the raw bytes for diagnostics,
//! - a manifest registered only for another entity type is [`Decoded::ForeignEntity`],
//! - the manifests of the archival/deletion protocol are [`Decoded::StorageProtocol`].
//!
//! # Example
//!
//! ```
//! use casework_core::codec::{ManifestSpec, MessageCodec, Decoded};
//! use casework_core::message::EncodedMessage;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
//! enum GroupCommand {
//!     AddMember { user_id: String },
//! }
//!
//! let codec = MessageCodec::builder()
//!     .commands("ConsentGroup", &[ManifestSpec::new("AddMember")])
//!     .build()
//!     .unwrap();
//!
//! let command = GroupCommand::AddMember { user_id: "alice".into() };
//! let encoded = codec.encode_command("ConsentGroup", &command).unwrap();
//! assert_eq!(encoded.manifest, "AddMember");
//!
//! match codec.decode_command::<GroupCommand>("ConsentGroup", &encoded) {
//!     Decoded::Message(decoded) => assert_eq!(decoded, command),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

use crate::event::{
    EntityEvent, EventMetadata, ModelEvent, RuntimeEvent, STORAGE_PROTOCOL_MANIFESTS, StoredEvent,
};
use crate::message::EncodedMessage;
use crate::response::ModelResponse;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Separator between manifest name and version.
pub const VERSION_SEPARATOR: char = ';';

/// Upgrades a payload from one schema version to the next.
pub type Migrator = fn(Value) -> Result<Value, String>;

/// Errors while building the codec or encoding a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A manifest was registered twice for the same entity type.
    #[error("Manifest '{name}' registered twice for {entity_type}")]
    DuplicateManifest {
        /// Entity type.
        entity_type: String,
        /// Manifest name.
        name: String,
    },

    /// A versioned manifest lacks migrators for some of its older versions.
    #[error("Manifest '{name}' has version {version} but {migrators} migrators")]
    IncompleteMigrations {
        /// Manifest name.
        name: String,
        /// Current version.
        version: u32,
        /// Number of migrators supplied.
        migrators: usize,
    },

    /// The value does not serialize as a tagged enum variant.
    #[error("Cannot encode {0}: not a tagged enum variant")]
    NotTagged(String),

    /// JSON encoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Parsed manifest tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Manifest {
    /// Payload type name.
    pub name: String,
    /// Schema version.
    pub version: u32,
}

impl Manifest {
    /// Create a manifest.
    #[must_use]
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse `Name` or `Name;version`.
    ///
    /// Returns `None` for an empty name or a malformed version.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let (name, version) = match tag.split_once(VERSION_SEPARATOR) {
            Some((name, version)) => (name, version.parse().ok()?),
            None => (tag, 0),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, version))
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{VERSION_SEPARATOR}{}", self.name, self.version)
        }
    }
}

/// Registration of one manifest: name, current version and migration chain.
///
/// `migrators[i]` upgrades a payload from version `i` to `i + 1`, so a manifest
/// at version `n` carries exactly `n` migrators.
#[derive(Clone, Copy, Debug)]
pub struct ManifestSpec {
    /// Payload type name (the serde variant name).
    pub name: &'static str,
    /// Current schema version.
    pub version: u32,
    /// Ordered migration chain.
    pub migrators: &'static [Migrator],
}

impl ManifestSpec {
    /// A manifest at version 0.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            version: 0,
            migrators: &[],
        }
    }

    /// A manifest at `version` with its migration chain.
    #[must_use]
    pub const fn versioned(name: &'static str, version: u32, migrators: &'static [Migrator]) -> Self {
        Self {
            name,
            version,
            migrators,
        }
    }
}

/// Outcome of decoding a payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded<T> {
    /// Successfully decoded and migrated.
    Message(T),
    /// No registration for the manifest.
    Unrecognized {
        /// The manifest as stored.
        manifest: String,
    },
    /// Registered manifest, unusable payload.
    DeserializationFailure {
        /// The manifest as stored.
        manifest: String,
        /// Raw payload bytes.
        raw: Vec<u8>,
        /// Why decoding failed.
        reason: String,
    },
    /// The manifest belongs to another entity type.
    ForeignEntity {
        /// The manifest as stored.
        manifest: String,
        /// Entity type that owns the manifest.
        required_type: String,
    },
    /// Event of the external archival/deletion protocol.
    StorageProtocol {
        /// The manifest as stored.
        manifest: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Kind {
    Command,
    Event,
}

#[derive(Clone, Debug)]
struct Registration {
    version: u32,
    migrators: &'static [Migrator],
}

/// Builder for [`MessageCodec`].
#[derive(Debug, Default)]
pub struct MessageCodecBuilder {
    specs: Vec<(Kind, String, ManifestSpec)>,
}

impl MessageCodecBuilder {
    /// Register the command manifests of an entity type.
    #[must_use]
    pub fn commands(mut self, entity_type: &str, specs: &[ManifestSpec]) -> Self {
        self.specs
            .extend(specs.iter().map(|s| (Kind::Command, entity_type.to_string(), *s)));
        self
    }

    /// Register the event manifests of an entity type.
    #[must_use]
    pub fn events(mut self, entity_type: &str, specs: &[ManifestSpec]) -> Self {
        self.specs
            .extend(specs.iter().map(|s| (Kind::Event, entity_type.to_string(), *s)));
        self
    }

    /// Freeze the registrations.
    ///
    /// # Errors
    ///
    /// - `DuplicateManifest` if a name is registered twice for one entity type and kind
    /// - `IncompleteMigrations` if a versioned manifest lacks migrators
    pub fn build(self) -> Result<MessageCodec, CodecError> {
        let mut registry: HashMap<(Kind, String), BTreeMap<String, Registration>> = HashMap::new();
        for (kind, entity_type, spec) in self.specs {
            if spec.migrators.len() != spec.version as usize {
                return Err(CodecError::IncompleteMigrations {
                    name: spec.name.to_string(),
                    version: spec.version,
                    migrators: spec.migrators.len(),
                });
            }
            let owners = registry.entry((kind, spec.name.to_string())).or_default();
            if owners.contains_key(&entity_type) {
                return Err(CodecError::DuplicateManifest {
                    entity_type,
                    name: spec.name.to_string(),
                });
            }
            owners.insert(
                entity_type,
                Registration {
                    version: spec.version,
                    migrators: spec.migrators,
                },
            );
        }
        Ok(MessageCodec { registry })
    }
}

/// Process-wide, read-only manifest registry with encode and decode operations.
#[derive(Debug)]
pub struct MessageCodec {
    registry: HashMap<(Kind, String), BTreeMap<String, Registration>>,
}

impl MessageCodec {
    /// Start building a codec.
    #[must_use]
    pub fn builder() -> MessageCodecBuilder {
        MessageCodecBuilder::default()
    }

    /// Whether any manifest is registered for the entity type.
    #[must_use]
    pub fn knows_entity_type(&self, entity_type: &str) -> bool {
        self.registry.values().any(|owners| owners.contains_key(entity_type))
    }

    /// Encode an event of `entity_type` into its stored form.
    ///
    /// # Errors
    ///
    /// Only fails for values that do not serialize as tagged enum variants.
    pub fn encode_event<E: ModelEvent>(
        &self,
        entity_type: &str,
        event: &EntityEvent<E>,
        metadata: EventMetadata,
    ) -> Result<StoredEvent, CodecError> {
        let (name, payload) = match event {
            EntityEvent::Domain(event) => split_variant(event)?,
            EntityEvent::Runtime(event) => split_variant(event)?,
        };
        let version = self.current_version(Kind::Event, entity_type, &name);
        let payload =
            serde_json::to_vec(&payload).map_err(|e| CodecError::Serialization(e.to_string()))?;
        Ok(StoredEvent {
            manifest: Manifest::new(name, version).to_string(),
            payload,
            metadata,
        })
    }

    /// Decode a stored event for an entity of type `entity_type`.
    pub fn decode_event<E: ModelEvent>(
        &self,
        entity_type: &str,
        stored: &StoredEvent,
    ) -> Decoded<EntityEvent<E>> {
        let Some(manifest) = Manifest::parse(&stored.manifest) else {
            return Decoded::Unrecognized {
                manifest: stored.manifest.clone(),
            };
        };

        if STORAGE_PROTOCOL_MANIFESTS.contains(&manifest.name.as_str()) {
            return Decoded::StorageProtocol {
                manifest: stored.manifest.clone(),
            };
        }

        let payload = match serde_json::from_slice::<Value>(&stored.payload) {
            Ok(payload) => payload,
            Err(e) => return deserialization_failure(stored, &e.to_string()),
        };

        if RuntimeEvent::MANIFESTS.contains(&manifest.name.as_str()) {
            return match wrap_variant::<RuntimeEvent>(&manifest.name, payload) {
                Ok(event) => Decoded::Message(EntityEvent::Runtime(event)),
                Err(reason) => deserialization_failure(stored, &reason),
            };
        }

        match self.decode_registered::<E>(Kind::Event, entity_type, &manifest, payload) {
            Lookup::Found(Ok(event)) => Decoded::Message(EntityEvent::Domain(event)),
            Lookup::Found(Err(reason)) => deserialization_failure(stored, &reason),
            Lookup::Foreign(required_type) => Decoded::ForeignEntity {
                manifest: stored.manifest.clone(),
                required_type,
            },
            Lookup::Missing => Decoded::Unrecognized {
                manifest: stored.manifest.clone(),
            },
        }
    }

    /// Encode a command of `entity_type`.
    ///
    /// # Errors
    ///
    /// Only fails for values that do not serialize as tagged enum variants.
    pub fn encode_command<C: Serialize>(
        &self,
        entity_type: &str,
        command: &C,
    ) -> Result<EncodedMessage, CodecError> {
        let (name, payload) = split_variant(command)?;
        let version = self.current_version(Kind::Command, entity_type, &name);
        Ok(EncodedMessage {
            manifest: Manifest::new(name, version).to_string(),
            payload,
        })
    }

    /// Decode a command addressed to an entity of type `entity_type`.
    pub fn decode_command<C: DeserializeOwned>(
        &self,
        entity_type: &str,
        encoded: &EncodedMessage,
    ) -> Decoded<C> {
        let Some(manifest) = Manifest::parse(&encoded.manifest) else {
            return Decoded::Unrecognized {
                manifest: encoded.manifest.clone(),
            };
        };
        match self.decode_registered::<C>(Kind::Command, entity_type, &manifest, encoded.payload.clone()) {
            Lookup::Found(Ok(command)) => Decoded::Message(command),
            Lookup::Found(Err(reason)) => Decoded::DeserializationFailure {
                manifest: encoded.manifest.clone(),
                raw: serde_json::to_vec(&encoded.payload).unwrap_or_default(),
                reason,
            },
            Lookup::Foreign(required_type) => Decoded::ForeignEntity {
                manifest: encoded.manifest.clone(),
                required_type,
            },
            Lookup::Missing => Decoded::Unrecognized {
                manifest: encoded.manifest.clone(),
            },
        }
    }

    /// Encode a response.
    ///
    /// # Errors
    ///
    /// Fails only if JSON encoding fails.
    pub fn encode_response(&self, response: &ModelResponse) -> Result<EncodedMessage, CodecError> {
        let payload =
            serde_json::to_value(response).map_err(|e| CodecError::Serialization(e.to_string()))?;
        Ok(EncodedMessage {
            manifest: response.manifest().to_string(),
            payload,
        })
    }

    /// Decode a response.
    pub fn decode_response(&self, encoded: &EncodedMessage) -> Decoded<ModelResponse> {
        match serde_json::from_value::<ModelResponse>(encoded.payload.clone()) {
            Ok(response) if response.manifest() == encoded.manifest => Decoded::Message(response),
            Ok(_) => Decoded::Unrecognized {
                manifest: encoded.manifest.clone(),
            },
            Err(e) => Decoded::DeserializationFailure {
                manifest: encoded.manifest.clone(),
                raw: serde_json::to_vec(&encoded.payload).unwrap_or_default(),
                reason: e.to_string(),
            },
        }
    }

    fn current_version(&self, kind: Kind, entity_type: &str, name: &str) -> u32 {
        self.registry
            .get(&(kind, name.to_string()))
            .and_then(|owners| owners.get(entity_type))
            .map_or(0, |r| r.version)
    }

    fn decode_registered<T: DeserializeOwned>(
        &self,
        kind: Kind,
        entity_type: &str,
        manifest: &Manifest,
        payload: Value,
    ) -> Lookup<T> {
        let Some(owners) = self.registry.get(&(kind, manifest.name.clone())) else {
            return Lookup::Missing;
        };
        let Some(registration) = owners.get(entity_type) else {
            return owners
                .keys()
                .next()
                .map_or(Lookup::Missing, |owner| Lookup::Foreign(owner.clone()));
        };
        Lookup::Found(
            migrate(manifest, registration, payload)
                .and_then(|payload| wrap_variant::<T>(&manifest.name, payload)),
        )
    }
}

enum Lookup<T> {
    Found(Result<T, String>),
    Foreign(String),
    Missing,
}

fn migrate(manifest: &Manifest, registration: &Registration, mut payload: Value) -> Result<Value, String> {
    if manifest.version > registration.version {
        return Err(format!(
            "stored version {} is newer than supported version {}",
            manifest.version, registration.version
        ));
    }
    for (step, migrator) in registration
        .migrators
        .iter()
        .enumerate()
        .skip(manifest.version as usize)
    {
        payload = migrator(payload).map_err(|e| format!("migration from version {step} failed: {e}"))?;
    }
    Ok(payload)
}

fn split_variant<T: Serialize>(value: &T) -> Result<(String, Value), CodecError> {
    let value = serde_json::to_value(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
    match value {
        Value::Object(map) if map.len() == 1 => {
            let mut entries = map.into_iter();
            entries
                .next()
                .ok_or_else(|| CodecError::NotTagged("empty object".to_string()))
        }
        Value::String(name) => Ok((name, Value::Null)),
        other => Err(CodecError::NotTagged(other.to_string())),
    }
}

fn wrap_variant<T: DeserializeOwned>(name: &str, payload: Value) -> Result<T, String> {
    let mut tagged = serde_json::Map::new();
    tagged.insert(name.to_string(), payload);
    serde_json::from_value(Value::Object(tagged)).map_err(|e| e.to_string())
}

fn deserialization_failure<T>(stored: &StoredEvent, reason: &str) -> Decoded<T> {
    Decoded::DeserializationFailure {
        manifest: stored.manifest.clone(),
        raw: stored.payload.clone(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum NoteEvent {
        NoteAdded { text: String, author: String },
        NoteRemoved { index: u32 },
    }

    impl ModelEvent for NoteEvent {}

    fn add_author(mut payload: Value) -> Result<Value, String> {
        let map = payload.as_object_mut().ok_or("payload is not an object")?;
        map.insert("author".into(), json!("unknown"));
        Ok(payload)
    }

    const NOTE_EVENTS: &[ManifestSpec] = &[
        ManifestSpec::versioned("NoteAdded", 1, &[add_author]),
        ManifestSpec::new("NoteRemoved"),
    ];

    fn codec() -> MessageCodec {
        MessageCodec::builder()
            .events("Notebook", NOTE_EVENTS)
            .events("Ledger", &[ManifestSpec::new("EntryBooked")])
            .build()
            .unwrap()
    }

    fn metadata() -> EventMetadata {
        EventMetadata {
            entity_id: EntityId::new("nb-1"),
            entity_type: "Notebook".into(),
            tenant: "acme".into(),
            user_id: "alice".into(),
            timestamp: Utc::now(),
        }
    }

    fn stored(manifest: &str, payload: &Value) -> StoredEvent {
        StoredEvent {
            manifest: manifest.to_string(),
            payload: serde_json::to_vec(payload).unwrap(),
            metadata: metadata(),
        }
    }

    #[test]
    fn manifest_parsing() {
        assert_eq!(Manifest::parse("Name"), Some(Manifest::new("Name", 0)));
        assert_eq!(Manifest::parse("Name;3"), Some(Manifest::new("Name", 3)));
        assert_eq!(Manifest::parse("Name;x"), None);
        assert_eq!(Manifest::parse(";1"), None);
        assert_eq!(Manifest::new("Name", 0).to_string(), "Name");
        assert_eq!(Manifest::new("Name", 2).to_string(), "Name;2");
    }

    #[test]
    fn encoding_attaches_current_version() {
        let codec = codec();
        let event = EntityEvent::Domain(NoteEvent::NoteAdded {
            text: "hello".into(),
            author: "alice".into(),
        });
        let stored = codec.encode_event("Notebook", &event, metadata()).unwrap();
        assert_eq!(stored.manifest, "NoteAdded;1");

        match codec.decode_event::<NoteEvent>("Notebook", &stored) {
            Decoded::Message(decoded) => assert_eq!(decoded, event),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn old_payloads_are_migrated() {
        let codec = codec();
        let old = stored("NoteAdded", &json!({ "text": "legacy" }));

        match codec.decode_event::<NoteEvent>("Notebook", &old) {
            Decoded::Message(EntityEvent::Domain(NoteEvent::NoteAdded { text, author })) => {
                assert_eq!(text, "legacy");
                assert_eq!(author, "unknown");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn failed_migration_keeps_raw_bytes() {
        let codec = codec();
        let broken = stored("NoteAdded", &json!(["not", "an", "object"]));

        match codec.decode_event::<NoteEvent>("Notebook", &broken) {
            Decoded::DeserializationFailure { manifest, raw, reason } => {
                assert_eq!(manifest, "NoteAdded");
                assert_eq!(raw, broken.payload);
                assert!(reason.contains("migration"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn corrupt_bytes_are_a_deserialization_failure() {
        let codec = codec();
        let mut corrupt = stored("NoteRemoved", &json!({ "index": 1 }));
        corrupt.payload = b"{not json".to_vec();

        assert!(matches!(
            codec.decode_event::<NoteEvent>("Notebook", &corrupt),
            Decoded::DeserializationFailure { .. }
        ));
    }

    #[test]
    fn unknown_manifest_is_unrecognized() {
        let codec = codec();
        let unknown = stored("SomethingElse", &json!({}));
        assert_eq!(
            codec.decode_event::<NoteEvent>("Notebook", &unknown),
            Decoded::Unrecognized {
                manifest: "SomethingElse".into()
            }
        );
    }

    #[test]
    fn foreign_manifest_names_its_owner() {
        let codec = codec();
        let foreign = stored("EntryBooked", &json!({}));
        assert_eq!(
            codec.decode_event::<NoteEvent>("Notebook", &foreign),
            Decoded::ForeignEntity {
                manifest: "EntryBooked".into(),
                required_type: "Ledger".into()
            }
        );
    }

    #[test]
    fn storage_protocol_and_runtime_events() {
        let codec = codec();
        let archived = stored("StorageArchivingStarted", &json!({}));
        assert!(matches!(
            codec.decode_event::<NoteEvent>("Notebook", &archived),
            Decoded::StorageProtocol { .. }
        ));

        let commit = EntityEvent::<NoteEvent>::Runtime(RuntimeEvent::EntityModified {
            last_modified: Utc::now(),
        });
        let stored = codec.encode_event("Notebook", &commit, metadata()).unwrap();
        assert_eq!(stored.manifest, "EntityModified");
        assert_eq!(codec.decode_event::<NoteEvent>("Notebook", &stored), Decoded::Message(commit));
    }

    #[test]
    fn builder_rejects_bad_registrations() {
        let duplicate = MessageCodec::builder()
            .events("Notebook", &[ManifestSpec::new("NoteAdded"), ManifestSpec::new("NoteAdded")])
            .build();
        assert!(matches!(duplicate, Err(CodecError::DuplicateManifest { .. })));

        let incomplete = MessageCodec::builder()
            .events("Notebook", &[ManifestSpec::versioned("NoteAdded", 2, &[add_author])])
            .build();
        assert!(matches!(incomplete, Err(CodecError::IncompleteMigrations { .. })));
    }

    #[test]
    fn responses_round_trip_with_manifest() {
        use crate::message::MessageId;
        use crate::response::{Failure, FailureKind};

        let codec = codec();
        let response = ModelResponse::failure(
            MessageId::new(),
            EntityId::new("nb-1"),
            None,
            Failure::new(FailureKind::Validation, "nope"),
        );
        let encoded = codec.encode_response(&response).unwrap();
        assert_eq!(encoded.manifest, "ValidationFailure");
        assert_eq!(codec.decode_response(&encoded), Decoded::Message(response));
    }

    proptest::proptest! {
        #[test]
        fn manifest_tags_parse_back(name in "[A-Za-z][A-Za-z0-9]{0,24}", version in 0u32..1000) {
            let manifest = Manifest::new(name, version);
            proptest::prop_assert_eq!(Manifest::parse(&manifest.to_string()), Some(manifest));
        }
    }
}
