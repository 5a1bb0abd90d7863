//! # Casework Runtime
//!
//! Actor runtime for event-sourced entities.
//!
//! Each entity instance is a tokio task that owns its state and handles one
//! message at a time. The runtime provides:
//!
//! - **Reception**: the admission gate deciding what an instance may handle in its current phase
//! - **Recovery room**: replay of stored history (and snapshots) into state
//! - **Back office**: the command pipeline, working on a copy that only becomes
//!   live after the events are persisted
//! - **Timers and asks**: delayed commands to self, and commands to other entities
//!   with continuations
//! - **Entity system**: one router over every registered entity type
//!
//! ## Example
//!
//! ```ignore
//! use casework_runtime::{EntitySystem, RuntimeConfig};
//!
//! let system = EntitySystem::builder(store)
//!     .with_config(RuntimeConfig::from_env())
//!     .register::<Counter>(())
//!     .build()?;
//!
//! let counters = system.host::<Counter>().expect("registered");
//! let response = counters
//!     .ask(CommandEnvelope::new("counter-1", user, CounterCommand::Create { start: 1 }))
//!     .await;
//! assert!(response.is_success());
//! ```

use std::any::Any;

/// Runtime configuration
pub mod config;

/// Prometheus metrics for observability
pub mod metrics;

/// The entity contract
pub mod entity;

/// Units of work
pub mod transaction;

/// Admission gate of an entity instance
pub mod reception;

/// Replay of stored history
pub mod recovery;

/// Command pipeline
pub mod back_office;

/// Per-entity timers
pub mod timers;

/// Response correlation for asks
pub mod responder;

mod actor;

/// Hosting of entity actors
pub mod host;

/// Routing across entity types
pub mod system;

#[cfg(test)]
mod fixtures;

pub use back_office::{BackOffice, Commit, SYSTEM_USER};
pub use config::RuntimeConfig;
pub use entity::{EntityMeta, EntityState, ModelEntity};
pub use host::EntityHost;
pub use metrics::{MetricsError, MetricsServer};
pub use reception::{Admission, Arrival, Phase, Reception, Rejection};
pub use recovery::{RecoveryFailure, RecoveryOutcome, RecoveryRoom};
pub use system::{CommandRouter, EntitySystem, EntitySystemBuilder, SystemError};
pub use timers::{TimerHandle, TimerRegistry};
pub use transaction::{CommandMeta, OutgoingAsk, ResponseCallback, TimerAction, Transaction};

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::catch_unwind;

    #[test]
    fn panic_messages_are_extracted() {
        #[allow(clippy::panic)]
        let payload = catch_unwind(|| panic!("boom {}", 1)).err();
        assert_eq!(payload.as_deref().map(panic_message).as_deref(), Some("boom 1"));

        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
