//! Response correlation for entity-to-entity asks.

use crate::entity::ModelEntity;
use crate::transaction::ResponseCallback;
use casework_core::entity::EntityId;
use casework_core::message::{MessageId, UserIdentity};
use casework_core::response::ModelResponse;
use std::collections::HashMap;
use std::fmt;

/// A command sent to another entity, waiting for its answer.
pub struct PendingAsk<E: ModelEntity> {
    /// Entity the command went to.
    pub target: EntityId,
    /// User the continuation runs as.
    pub user: UserIdentity,
    /// Runs on success.
    pub on_success: ResponseCallback<E>,
    /// Runs on failure.
    pub on_failure: ResponseCallback<E>,
}

impl<E: ModelEntity> fmt::Debug for PendingAsk<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAsk")
            .field("target", &self.target)
            .field("user", &self.user.id)
            .finish_non_exhaustive()
    }
}

/// Pending asks of one entity instance, keyed by outgoing message id.
pub struct Responders<E: ModelEntity> {
    pending: HashMap<MessageId, PendingAsk<E>>,
}

impl<E: ModelEntity> Responders<E> {
    /// No pending asks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register the continuations of an outgoing command.
    pub fn register(&mut self, message_id: MessageId, ask: PendingAsk<E>) {
        self.pending.insert(message_id, ask);
    }

    /// Match a response to its pending ask.
    ///
    /// Returns the callback to run (success or failure, depending on the
    /// response) and the user it runs as, or `None` for an unmatched response.
    pub fn take(&mut self, response: &ModelResponse) -> Option<(ResponseCallback<E>, UserIdentity)> {
        let ask = self.pending.remove(&response.message_id)?;
        let callback = if response.is_success() {
            ask.on_success
        } else {
            ask.on_failure
        };
        Some((callback, ask.user))
    }

    /// Number of pending asks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<E: ModelEntity> Default for Responders<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ModelEntity> fmt::Debug for Responders<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responders")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::fixtures::Counter;
    use casework_core::response::{Failure, FailureKind};

    fn ask(marker: i64) -> PendingAsk<Counter> {
        PendingAsk {
            target: EntityId::new("other"),
            user: UserIdentity::new("alice", "acme"),
            on_success: Box::new(move |counter, _, _| {
                counter.value = marker;
                Ok(())
            }),
            on_failure: Box::new(move |counter, _, _| {
                counter.value = -marker;
                Ok(())
            }),
        }
    }

    fn run(callback: ResponseCallback<Counter>, response: &ModelResponse) -> i64 {
        let office = crate::fixtures::back_office();
        let live = crate::entity::EntityState::<Counter>::blank(EntityId::new("counter-1"));
        let commit = office
            .handle_response(&live, response, callback, UserIdentity::new("alice", "acme"))
            .unwrap();
        commit.state.entity.value
    }

    #[test]
    fn responses_pick_the_matching_callback() {
        let mut responders = Responders::new();
        let ok_id = MessageId::new();
        let failed_id = MessageId::new();
        responders.register(ok_id, ask(7));
        responders.register(failed_id, ask(9));
        assert_eq!(responders.len(), 2);

        let ok = ModelResponse::success(ok_id, EntityId::new("other"), None, serde_json::Value::Null);
        let (callback, user) = responders.take(&ok).unwrap();
        assert_eq!(user.id, "alice");
        assert_eq!(run(callback, &ok), 7);

        let failed = ModelResponse::failure(
            failed_id,
            EntityId::new("other"),
            None,
            Failure::new(FailureKind::Validation, "no"),
        );
        let (callback, _) = responders.take(&failed).unwrap();
        assert_eq!(run(callback, &failed), -9);
        assert!(responders.is_empty());
    }

    #[test]
    fn unmatched_responses_are_reported() {
        let mut responders = Responders::<Counter>::new();
        let stray = ModelResponse::success(MessageId::new(), EntityId::new("x"), None, serde_json::Value::Null);
        assert!(responders.take(&stray).is_none());
    }
}
