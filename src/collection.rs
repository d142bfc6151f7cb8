//! In-Memory Indexed Store
//!
//! A per-request set of records of one kind, indexed by `id`. Each insert
//! gets an internal slot number that fixes iteration order (insertion order)
//! and is never serialized.
//!
//! ## Invariants
//!
//! - Every record id appears exactly once in `by_id`
//! - `by_id[id]` points at the slot holding that record
//! - Slots are strictly increasing in insertion order

use crate::keys::CollectionKind;
use crate::record::Record;
use crate::store::Version;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Error type for collection mutations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// Insert of an id that is already present
    DuplicateId(String),
    /// Update of an id that is not present
    MissingRecord(String),
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::DuplicateId(id) => write!(f, "Record already in collection: {}", id),
            CollectionError::MissingRecord(id) => write!(f, "Record not in collection: {}", id),
        }
    }
}

impl std::error::Error for CollectionError {}

/// Ephemeral record set for one collection kind
#[derive(Debug, Clone)]
pub struct Collection {
    kind: CollectionKind,
    rows: BTreeMap<u64, Record>,
    by_id: HashMap<String, u64>,
    next_slot: u64,
    /// Durable version observed by the last reconcile (compare-and-swap mode)
    observed_version: Option<Version>,
}

impl Collection {
    pub fn new(kind: CollectionKind) -> Self {
        Collection {
            kind,
            rows: BTreeMap::new(),
            by_id: HashMap::new(),
            next_slot: 0,
            observed_version: None,
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All records in insertion order
    pub fn find_all(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    /// Owned snapshot of all records in insertion order
    pub fn snapshot(&self) -> Vec<Record> {
        self.rows.values().cloned().collect()
    }

    pub fn find_one(&self, id: &str) -> Option<&Record> {
        self.by_id.get(id).and_then(|slot| self.rows.get(slot))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Insert a new record; ids must be unique
    pub fn insert(&mut self, record: Record) -> Result<&Record, CollectionError> {
        if self.by_id.contains_key(record.id()) {
            return Err(CollectionError::DuplicateId(record.id().to_string()));
        }

        let slot = self.next_slot;
        self.next_slot += 1;
        self.by_id.insert(record.id().to_string(), slot);
        self.rows.insert(slot, record);

        #[cfg(debug_assertions)]
        self.verify_invariants();

        Ok(&self.rows[&slot])
    }

    /// Replace an existing record in place, keeping its position
    pub fn update(&mut self, record: Record) -> Result<&Record, CollectionError> {
        let slot = *self
            .by_id
            .get(record.id())
            .ok_or_else(|| CollectionError::MissingRecord(record.id().to_string()))?;
        self.rows.insert(slot, record);

        #[cfg(debug_assertions)]
        self.verify_invariants();

        Ok(&self.rows[&slot])
    }

    /// Remove by id; absent ids are a no-op
    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let slot = self.by_id.remove(id)?;
        let removed = self.rows.remove(&slot);

        #[cfg(debug_assertions)]
        self.verify_invariants();

        removed
    }

    pub fn observed_version(&self) -> Option<Version> {
        self.observed_version
    }

    pub fn set_observed_version(&mut self, version: Option<Version>) {
        self.observed_version = version;
    }

    /// TigerStyle: Verify all invariants hold
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        debug_assert_eq!(
            self.rows.len(),
            self.by_id.len(),
            "Invariant violated: index size must match row count"
        );
        for (id, slot) in &self.by_id {
            debug_assert!(
                self.rows.get(slot).map(|r| r.id() == id).unwrap_or(false),
                "Invariant violated: index entry {} does not point at its record",
                id
            );
        }
        if let Some((last, _)) = self.rows.iter().next_back() {
            debug_assert!(
                *last < self.next_slot,
                "Invariant violated: next_slot ({}) must be > max slot ({})",
                self.next_slot,
                last
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(id: &str, fields: Value) -> Record {
        match fields {
            Value::Object(map) => Record::from_object(id, map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let mut collection = Collection::new(CollectionKind::Levels);
        collection.insert(record("a", json!({"name": "gold"}))).unwrap();

        assert_eq!(collection.len(), 1);
        assert_eq!(collection.find_one("a").unwrap().get("name"), Some(&json!("gold")));
        assert!(collection.find_one("b").is_none());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut collection = Collection::new(CollectionKind::Levels);
        collection.insert(record("a", json!({}))).unwrap();
        let err = collection.insert(record("a", json!({}))).unwrap_err();
        assert_eq!(err, CollectionError::DuplicateId("a".to_string()));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut collection = Collection::new(CollectionKind::Websites);
        for id in ["c", "a", "b"] {
            collection.insert(record(id, json!({}))).unwrap();
        }
        collection.remove("a");
        collection.insert(record("a", json!({}))).unwrap();

        let ids: Vec<&str> = collection.find_all().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_update_keeps_position() {
        let mut collection = Collection::new(CollectionKind::Levels);
        collection.insert(record("a", json!({"name": "one"}))).unwrap();
        collection.insert(record("b", json!({"name": "two"}))).unwrap();

        collection.update(record("a", json!({"name": "uno"}))).unwrap();

        let names: Vec<&Value> = collection.find_all().filter_map(|r| r.get("name")).collect();
        assert_eq!(names, vec![&json!("uno"), &json!("two")]);
    }

    #[test]
    fn test_update_missing() {
        let mut collection = Collection::new(CollectionKind::Levels);
        let err = collection.update(record("nope", json!({}))).unwrap_err();
        assert_eq!(err, CollectionError::MissingRecord("nope".to_string()));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut collection = Collection::new(CollectionKind::Levels);
        collection.insert(record("a", json!({}))).unwrap();
        assert!(collection.remove("zzz").is_none());
        assert_eq!(collection.len(), 1);
        assert!(collection.remove("a").is_some());
        assert!(collection.is_empty());
    }
}
