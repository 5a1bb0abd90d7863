//! # Casework Core
//!
//! Core types for the casework entity engine.
//!
//! The engine hosts long-lived, event-sourced **entities** (cases, consent groups)
//! that each process their commands strictly one at a time. This crate holds the
//! vocabulary shared by the runtime and every entity model:
//!
//! - [`entity`]: entity identifiers and log positions
//! - [`message`]: commands, their envelopes and acting users
//! - [`response`]: responses and the failure taxonomy
//! - [`event`]: domain events, runtime events and their stored form
//! - [`event_store`]: the append-only log abstraction
//! - [`codec`]: manifest-based encoding with schema migration
//! - [`error`]: errors raised by entity code
//! - [`environment`]: injected dependencies such as the clock
//!
//! ## Example
//!
//! ```
//! use casework_core::entity::{EntityId, SequenceNr};
//! use casework_core::message::{CommandEnvelope, UserIdentity};
//!
//! let user = UserIdentity::new("alice", "acme").with_role("caseworker");
//! let envelope = CommandEnvelope::new("case-1", user, "ping".to_string());
//!
//! assert_eq!(envelope.entity_id, EntityId::new("case-1"));
//! assert_eq!(envelope.tenant, "acme");
//! assert!(SequenceNr::INITIAL.is_initial());
//! ```

pub mod codec;
pub mod entity;
pub mod error;
pub mod event;
pub mod event_store;
pub mod message;
pub mod response;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use codec::{Decoded, ManifestSpec, MessageCodec};
pub use entity::{EntityId, SequenceNr};
pub use error::{ApplyError, CommandError};
pub use event::{EntityEvent, EventMetadata, ModelEvent, RuntimeEvent, StoredEvent};
pub use event_store::{EventStore, EventStoreError};
pub use message::{CommandEnvelope, EncodedMessage, MessageId, ModelCommand, UserIdentity};
pub use response::{Failure, FailureKind, ModelResponse, Outcome};

/// Dependencies injected into the engine.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time.
    ///
    /// Transaction timestamps and last-modified stamps are taken from the clock,
    /// so tests can pin time with a fixed implementation.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// The wall clock.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
