//! Named-collection registry backed by a single [`Factory`] arena.

use std::collections::HashMap;

use crate::candidate::{CandidateId, Factory};
use crate::error::{Error, Result};

/// Owns the event's [`Factory`] plus the producer/consumer map from collection name to the ids it
/// contains.
///
/// A collection is published once per event by exactly one module and is immutable for the rest
/// of that event's `Process` phase: modules resolve input collections by name at `init` time
/// (recorded so `process` never does a fallible lookup), but the contents referenced are only
/// populated once the producing module has run.
#[derive(Debug, Default)]
pub struct EventStore {
    factory: Factory,
    collections: HashMap<String, Vec<CandidateId>>,
}

impl EventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the arena and drops all collections, preparing the store for the next event.
    pub fn clear(&mut self) {
        self.factory.clear();
        self.collections.clear();
    }

    /// Shared access to the candidate arena.
    #[must_use]
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Exclusive access to the candidate arena.
    pub fn factory_mut(&mut self) -> &mut Factory {
        &mut self.factory
    }

    /// Registers `name` as an empty collection, overwriting any previous contents. Called by a
    /// producing module before it starts filling the collection.
    pub fn declare(&mut self, name: &str) {
        self.collections.insert(name.to_string(), Vec::new());
    }

    /// Appends `id` to the named collection, declaring it first if necessary.
    pub fn push(&mut self, name: &str, id: CandidateId) {
        self.collections.entry(name.to_string()).or_default().push(id);
    }

    /// Replaces the named collection wholesale.
    pub fn set(&mut self, name: &str, ids: Vec<CandidateId>) {
        self.collections.insert(name.to_string(), ids);
    }

    /// Looks up a collection by name without a `module` attribution for the error, for internal
    /// callers that already know the name is valid.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[CandidateId]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    /// Looks up a collection, turning a miss into [`Error::UnknownCollection`] attributed to
    /// `module`. Intended for use at `Module::init`, where every input name is resolved once.
    pub fn resolve(&self, module: &str, name: &str) -> Result<&[CandidateId]> {
        self.collections
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownCollection {
                module: module.to_string(),
                name: name.to_string(),
            })
    }

    /// Returns `true` if `name` has been declared (even if currently empty).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_collection_is_an_error() {
        let store = EventStore::new();
        let err = store.resolve("calo", "missing").unwrap_err();
        assert!(matches!(err, Error::UnknownCollection { .. }));
    }

    #[test]
    fn push_then_resolve_round_trips() {
        let mut store = EventStore::new();
        let id = store.factory_mut().new_candidate();
        store.push("tracks", id);
        let ids = store.resolve("dummy", "tracks").unwrap();
        assert_eq!(ids, &[id]);
    }

    #[test]
    fn clear_drops_collections_and_arena() {
        let mut store = EventStore::new();
        let id = store.factory_mut().new_candidate();
        store.push("tracks", id);
        store.clear();
        assert!(!store.contains("tracks"));
        assert_eq!(store.factory().len(), 0);
    }
}
