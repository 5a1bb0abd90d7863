//! The entity system: every registered entity type behind one router.
//!
//! # Example
//!
//! ```ignore
//! let system = EntitySystem::builder(store)
//!     .with_config(RuntimeConfig::from_env())
//!     .register::<Case>(CaseSettings::default())
//!     .register::<ConsentGroup>(())
//!     .build()?;
//!
//! let cases = system.host::<Case>().expect("registered");
//! let response = cases.ask(envelope).await;
//! ```

use crate::config::RuntimeConfig;
use crate::entity::ModelEntity;
use crate::host::EntityHost;
use casework_core::codec::{CodecError, MessageCodec, MessageCodecBuilder};
use casework_core::environment::{Clock, SystemClock};
use casework_core::event_store::EventStore;
use casework_core::message::{CommandEnvelope, EncodedMessage};
use casework_core::response::{Failure, FailureKind, ModelResponse};
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Routes encoded commands to the entities of one type.
///
/// Implemented by every [`EntityHost`]; entities reach other entity types
/// through this seam without knowing their Rust types.
pub trait CommandRouter: Send + Sync {
    /// Entity type served.
    fn entity_type(&self) -> &'static str;

    /// Decode the command and have the target entity handle it.
    fn route(&self, envelope: CommandEnvelope<EncodedMessage>) -> BoxFuture<'static, ModelResponse>;
}

/// Errors while assembling an [`EntitySystem`].
#[derive(Error, Debug)]
pub enum SystemError {
    /// Two registrations for one entity type.
    #[error("Entity type {0} registered twice")]
    DuplicateEntityType(String),

    /// The manifest registry is inconsistent.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Collaborators shared by every host and actor.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) codec: Arc<MessageCodec>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Arc<RuntimeConfig>,
}

pub(crate) struct SystemInner {
    shared: Shared,
    routers: HashMap<&'static str, Arc<dyn CommandRouter>>,
    hosts: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

type HostFactory =
    Box<dyn FnOnce(Shared, Weak<SystemInner>) -> (Arc<dyn CommandRouter>, Arc<dyn Any + Send + Sync>)>;

struct Registration {
    entity_type: &'static str,
    factory: HostFactory,
}

/// Builder for [`EntitySystem`].
pub struct EntitySystemBuilder {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
    codec: MessageCodecBuilder,
    registrations: Vec<Registration>,
}

impl EntitySystemBuilder {
    /// Replace the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the runtime configuration.
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an entity type with its settings.
    #[must_use]
    pub fn register<E: ModelEntity>(mut self, settings: E::Settings) -> Self {
        self.codec = self
            .codec
            .commands(E::ENTITY_TYPE, E::COMMAND_MANIFESTS)
            .events(E::ENTITY_TYPE, E::EVENT_MANIFESTS);
        let settings = Arc::new(settings);
        self.registrations.push(Registration {
            entity_type: E::ENTITY_TYPE,
            factory: Box::new(move |shared, system| {
                let host = EntityHost::<E>::new(shared, settings, system);
                let router: Arc<dyn CommandRouter> = Arc::new(host.clone());
                let any: Arc<dyn Any + Send + Sync> = Arc::new(host);
                (router, any)
            }),
        });
        self
    }

    /// Build the system.
    ///
    /// # Errors
    ///
    /// - [`SystemError::DuplicateEntityType`]: an entity type was registered twice
    /// - [`SystemError::Codec`]: manifests collide or migrations are missing
    pub fn build(self) -> Result<EntitySystem, SystemError> {
        let mut seen = Vec::with_capacity(self.registrations.len());
        for registration in &self.registrations {
            if seen.contains(&registration.entity_type) {
                return Err(SystemError::DuplicateEntityType(registration.entity_type.to_string()));
            }
            seen.push(registration.entity_type);
        }

        let shared = Shared {
            store: self.store,
            codec: Arc::new(self.codec.build()?),
            clock: self.clock,
            config: Arc::new(self.config),
        };
        let registrations = self.registrations;

        let inner = Arc::new_cyclic(|weak: &Weak<SystemInner>| {
            let mut routers = HashMap::new();
            let mut hosts = HashMap::new();
            for Registration { entity_type, factory } in registrations {
                let (router, host) = factory(shared.clone(), weak.clone());
                routers.insert(entity_type, router);
                hosts.insert(entity_type, host);
            }
            SystemInner {
                shared,
                routers,
                hosts,
            }
        });

        tracing::info!(
            entity_types = ?seen,
            engine_version = %inner.shared.config.engine_version,
            "Entity system started"
        );
        Ok(EntitySystem { inner })
    }
}

/// All registered entity types, sharing one store, codec, clock and config.
#[derive(Clone)]
pub struct EntitySystem {
    inner: Arc<SystemInner>,
}

impl EntitySystem {
    /// Start building a system on `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn EventStore>) -> EntitySystemBuilder {
        EntitySystemBuilder {
            store,
            clock: Arc::new(SystemClock),
            config: RuntimeConfig::default(),
            codec: MessageCodec::builder(),
            registrations: Vec::new(),
        }
    }

    pub(crate) const fn from_inner(inner: Arc<SystemInner>) -> Self {
        Self { inner }
    }

    /// The typed host of entity type `E`, if registered.
    #[must_use]
    pub fn host<E: ModelEntity>(&self) -> Option<EntityHost<E>> {
        let host = Arc::clone(self.inner.hosts.get(E::ENTITY_TYPE)?);
        host.downcast::<EntityHost<E>>().ok().map(|host| (*host).clone())
    }

    /// Route an encoded command to an entity of `entity_type`.
    ///
    /// Unknown entity types and unknown commands yield routing failures.
    pub async fn route(&self, entity_type: &str, envelope: CommandEnvelope<EncodedMessage>) -> ModelResponse {
        let Some(router) = self.inner.routers.get(entity_type).map(Arc::clone) else {
            tracing::warn!(entity_type, message_id = %envelope.message_id, "No such entity type");
            return ModelResponse::failure(
                envelope.message_id,
                envelope.entity_id,
                None,
                Failure::new(FailureKind::Routing, format!("Unknown entity type {entity_type}")),
            );
        };
        router.route(envelope).await
    }

    /// Registered entity types.
    #[must_use]
    pub fn entity_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.inner.routers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// The shared codec.
    #[must_use]
    pub fn codec(&self) -> &MessageCodec {
        &self.inner.shared.codec
    }

    /// The shared configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.shared.config
    }

    /// The shared event store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.inner.shared.store)
    }
}

impl std::fmt::Debug for EntitySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySystem")
            .field("entity_types", &self.entity_types())
            .finish_non_exhaustive()
    }
}
