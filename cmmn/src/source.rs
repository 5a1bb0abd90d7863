//! Where case definitions come from.
//!
//! - **`DefinitionSource`**: the boundary to whatever stores definitions
//! - **`InMemoryDefinitionSource`**: definitions registered in code, validated on insert
//! - **`DefinitionCache`**: bounded LRU cache in front of any source, keyed by
//!   definition name plus last-modified stamp, so a changed definition is read again

use crate::definition::{CaseDefinition, DefinitionError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A store of case definitions.
pub trait DefinitionSource: fmt::Debug + Send + Sync {
    /// Read a definition.
    ///
    /// # Errors
    ///
    /// `MissingDefinition` if unknown, `InvalidDefinition` if it does not validate.
    fn read(&self, name: &str) -> Result<Arc<CaseDefinition>, DefinitionError>;

    /// When the definition last changed.
    ///
    /// # Errors
    ///
    /// `MissingDefinition` if unknown.
    fn last_modified(&self, name: &str) -> Result<DateTime<Utc>, DefinitionError>;

    /// Names of all definitions.
    fn list(&self) -> Vec<String>;
}

/// Definitions held in memory.
///
/// # Example
///
/// ```
/// use casework_cmmn::definition::CaseDefinition;
/// use casework_cmmn::source::{DefinitionSource, InMemoryDefinitionSource};
///
/// let source = InMemoryDefinitionSource::new();
/// source.insert(CaseDefinition::new("empty", vec![])).unwrap();
///
/// assert_eq!(source.list(), vec!["empty".to_string()]);
/// assert!(source.read("missing").is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDefinitionSource {
    definitions: Mutex<BTreeMap<String, (DateTime<Utc>, Arc<CaseDefinition>)>>,
}

impl InMemoryDefinitionSource {
    /// An empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition, stamped now.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` if the definition does not validate; nothing is stored.
    pub fn insert(&self, definition: CaseDefinition) -> Result<(), DefinitionError> {
        self.insert_at(definition, Utc::now())
    }

    /// Add or replace a definition with an explicit last-modified stamp.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` if the definition does not validate; nothing is stored.
    pub fn insert_at(&self, definition: CaseDefinition, modified: DateTime<Utc>) -> Result<(), DefinitionError> {
        definition.validate()?;
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.name.clone(), (modified, Arc::new(definition)));
        Ok(())
    }
}

impl DefinitionSource for InMemoryDefinitionSource {
    fn read(&self, name: &str) -> Result<Arc<CaseDefinition>, DefinitionError> {
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|(_, definition)| Arc::clone(definition))
            .ok_or_else(|| DefinitionError::MissingDefinition(name.to_string()))
    }

    fn last_modified(&self, name: &str) -> Result<DateTime<Utc>, DefinitionError> {
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|(modified, _)| *modified)
            .ok_or_else(|| DefinitionError::MissingDefinition(name.to_string()))
    }

    fn list(&self) -> Vec<String> {
        self.definitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

type CacheKey = (String, DateTime<Utc>);

#[derive(Debug, Default)]
struct CacheEntries {
    entries: HashMap<CacheKey, (Arc<CaseDefinition>, u64)>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl CacheEntries {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (_, used))| *used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            tracing::debug!(definition = %key.0, "Evicting cached definition");
            self.entries.remove(&key);
        }
    }
}

/// Cache statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStats {
    /// Current size.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that went to the source.
    pub misses: u64,
}

/// Bounded least-recently-used cache in front of a [`DefinitionSource`].
#[derive(Debug)]
pub struct DefinitionCache<S> {
    source: S,
    capacity: usize,
    entries: Mutex<CacheEntries>,
}

impl<S: DefinitionSource> DefinitionCache<S> {
    /// Cache up to `capacity` definitions (at least one).
    #[must_use]
    pub fn new(source: S, capacity: usize) -> Self {
        Self {
            source,
            capacity: capacity.max(1),
            entries: Mutex::new(CacheEntries::default()),
        }
    }

    /// The wrapped source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            size: entries.entries.len(),
            capacity: self.capacity,
            hits: entries.hits,
            misses: entries.misses,
        }
    }
}

impl<S: DefinitionSource> DefinitionSource for DefinitionCache<S> {
    fn read(&self, name: &str) -> Result<Arc<CaseDefinition>, DefinitionError> {
        let key = (name.to_string(), self.source.last_modified(name)?);
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let now = entries.tick();
            if let Some((definition, used)) = entries.entries.get_mut(&key) {
                *used = now;
                let definition = Arc::clone(definition);
                entries.hits += 1;
                return Ok(definition);
            }
            entries.misses += 1;
        }

        let definition = self.source.read(name)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.entries.retain(|(cached, _), _| cached != name);
        if entries.entries.len() >= self.capacity {
            entries.evict_lru();
        }
        let now = entries.tick();
        entries.entries.insert(key, (Arc::clone(&definition), now));
        Ok(definition)
    }

    fn last_modified(&self, name: &str) -> Result<DateTime<Utc>, DefinitionError> {
        self.source.last_modified(name)
    }

    fn list(&self) -> Vec<String> {
        self.source.list()
    }
}

impl<S: DefinitionSource + ?Sized> DefinitionSource for Arc<S> {
    fn read(&self, name: &str) -> Result<Arc<CaseDefinition>, DefinitionError> {
        (**self).read(name)
    }

    fn last_modified(&self, name: &str) -> Result<DateTime<Utc>, DefinitionError> {
        (**self).last_modified(name)
    }

    fn list(&self) -> Vec<String> {
        (**self).list()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::definition::PlanItemDefinition;
    use chrono::TimeZone;

    fn stamp(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap()
    }

    fn source_with(names: &[&str]) -> Arc<InMemoryDefinitionSource> {
        let source = Arc::new(InMemoryDefinitionSource::new());
        for name in names {
            source.insert_at(CaseDefinition::new(*name, vec![]), stamp(0)).unwrap();
        }
        source
    }

    #[test]
    fn invalid_definitions_are_not_stored() {
        let source = InMemoryDefinitionSource::new();
        let broken = CaseDefinition::new("broken", vec![PlanItemDefinition::human_task("T", Some("nobody"))]);

        assert!(matches!(
            source.insert(broken),
            Err(DefinitionError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            source.read("broken"),
            Err(DefinitionError::MissingDefinition(_))
        ));
    }

    #[test]
    fn repeated_reads_hit_the_cache() {
        let cache = DefinitionCache::new(source_with(&["a"]), 2);
        let first = cache.read("a").unwrap();
        let second = cache.read("a").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let cache = DefinitionCache::new(source_with(&["a", "b", "c"]), 2);
        cache.read("a").unwrap();
        cache.read("b").unwrap();
        cache.read("a").unwrap();
        cache.read("c").unwrap();
        assert_eq!(cache.stats().size, 2);

        let misses = cache.stats().misses;
        cache.read("a").unwrap();
        assert_eq!(cache.stats().misses, misses, "a stayed cached");
        cache.read("b").unwrap();
        assert_eq!(cache.stats().misses, misses + 1, "b was evicted");
    }

    #[test]
    fn changed_definitions_are_read_again() {
        let source = source_with(&["a"]);
        let cache = DefinitionCache::new(Arc::clone(&source), 4);
        let old = cache.read("a").unwrap();

        source
            .insert_at(
                CaseDefinition::new("a", vec![PlanItemDefinition::milestone("M")]),
                stamp(5),
            )
            .unwrap();
        let new = cache.read("a").unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(new.find("M").is_some());
        assert_eq!(cache.stats().size, 1, "the stale entry is dropped");
    }

    #[test]
    fn missing_definitions_propagate() {
        let cache = DefinitionCache::new(source_with(&[]), 1);
        assert_eq!(
            cache.read("nope").unwrap_err(),
            DefinitionError::MissingDefinition("nope".into())
        );
        assert!(cache.list().is_empty());
    }
}
