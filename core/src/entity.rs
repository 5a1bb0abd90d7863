//! Entity identification and event sequencing types.
//!
//! Every business object handled by the engine (a case, a consent group, ...) is
//! addressed by an [`EntityId`]. Its durable history is a gapless, per-entity
//! sequence of events numbered by [`SequenceNr`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `EntityId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid entity ID: {0}")]
pub struct ParseEntityIdError(String);

/// Stable identifier of one entity instance.
///
/// The identifier is also the key of the entity's event stream. Identifiers are
/// not typed by entity kind: the same id used for a case and a consent group
/// refers to the same stream, which recovery detects and reports.
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty strings (use for external input)
/// - `From::from()` and `new()`: no validation (for ids generated by the engine)
///
/// # Examples
///
/// ```
/// use casework_core::entity::EntityId;
///
/// let id = EntityId::new("case-12345");
/// assert_eq!(id.as_str(), "case-12345");
///
/// let parsed: EntityId = "group-abc".parse().unwrap();
/// assert_eq!(parsed, EntityId::new("group-abc"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Create a new `EntityId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the entity ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `EntityId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = ParseEntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseEntityIdError("Entity ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Position of an event in its entity's history.
///
/// The event store assigns sequence numbers on append. The first event of an
/// entity gets number 1; `SequenceNr::INITIAL` (0) means "nothing persisted yet".
/// Numbers are gapless per entity, which makes the last applied number a valid
/// optimistic-concurrency token for the next append.
///
/// # Examples
///
/// ```
/// use casework_core::entity::SequenceNr;
///
/// let first = SequenceNr::INITIAL.next();
/// assert_eq!(first, SequenceNr::new(1));
/// assert_eq!(first.advance(3), SequenceNr::new(4));
/// ```
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SequenceNr(u64);

impl SequenceNr {
    /// Sequence number of an entity without any persisted event.
    pub const INITIAL: Self = Self(0);

    /// Create a new `SequenceNr` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The number following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The number reached after appending `count` more events.
    #[must_use]
    pub const fn advance(self, count: u64) -> Self {
        Self(self.0 + count)
    }

    /// Whether no event has been persisted yet.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SequenceNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceNr {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SequenceNr> for u64 {
    fn from(nr: SequenceNr) -> Self {
        nr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod entity_id_tests {
        use super::*;

        #[test]
        fn new_creates_entity_id() {
            let id = EntityId::new("case-123");
            assert_eq!(id.as_str(), "case-123");
        }

        #[test]
        fn from_string() {
            let id = EntityId::from("case-123");
            assert_eq!(id.as_str(), "case-123");

            let id2 = EntityId::from("case-456".to_string());
            assert_eq!(id2.into_inner(), "case-456");
        }

        #[test]
        #[allow(clippy::expect_used)]
        fn parse_from_str() {
            let id: EntityId = "case-123".parse().expect("parse should succeed");
            assert_eq!(id, EntityId::new("case-123"));
        }

        #[test]
        fn parse_blank_string_fails() {
            assert!("".parse::<EntityId>().is_err());
            assert!("   ".parse::<EntityId>().is_err());
        }

        #[test]
        fn display() {
            let id = EntityId::new("case-123");
            assert_eq!(format!("{id}"), "case-123");
        }
    }

    mod sequence_nr_tests {
        use super::*;

        #[test]
        fn initial_sequence() {
            assert_eq!(SequenceNr::INITIAL, SequenceNr::default());
            assert!(SequenceNr::INITIAL.is_initial());
            assert!(!SequenceNr::new(1).is_initial());
        }

        #[test]
        fn next_and_advance() {
            let first = SequenceNr::INITIAL.next();
            assert_eq!(first, SequenceNr::new(1));
            assert_eq!(first.advance(0), first);
            assert_eq!(first.advance(5), SequenceNr::new(6));
        }

        #[test]
        fn ordering_and_conversion() {
            assert!(SequenceNr::new(1) < SequenceNr::new(2));
            let raw: u64 = SequenceNr::from(42_u64).into();
            assert_eq!(raw, 42);
        }
    }
}
