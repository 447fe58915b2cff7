//! # Collection Stores
//!
//! Persistence contract for named record collections, with a flat-file
//! implementation and an in-memory one for tests.
//!
//! A [`StoreFactory`] opens a fresh [`Store`] per request. The store holds the
//! whole collection in memory and rewrites it in full after every mutation.
//! Nothing coordinates two stores opened on the same collection: concurrent
//! writers race and the last one to persist wins.

use crate::error::{Error, Result};
use crate::json::to_json_pretty;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Field holding the system-assigned record identifier
pub const ID_FIELD: &str = "Id";

/// A stored entity: field name to value, including [`ID_FIELD`]
pub type Record = Map<String, Value>;

/// Read the integer id of a record, if it carries one
#[must_use]
pub fn record_id(record: &Record) -> Option<i64> {
    record.get(ID_FIELD).and_then(Value::as_i64)
}

/// Persistence contract for one collection
pub trait Store: Send {
    /// All records in insertion order
    fn get_all(&self) -> Vec<Record>;

    /// Record with the given id
    fn get(&self, id: i64) -> Option<Record>;

    /// Assign a fresh id (max + 1, or 1 when empty), append and persist
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be persisted.
    fn add(&mut self, record: Record) -> Result<Record>;

    /// Replace the record whose id matches `record`'s id
    ///
    /// Returns `false` without writing when no such record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be persisted.
    fn update(&mut self, record: Record) -> Result<bool>;

    /// Delete the record with the given id
    ///
    /// Returns `false` without writing when no such record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be persisted.
    fn remove(&mut self, id: i64) -> Result<bool>;
}

/// Opens collection stores by plural name
pub trait StoreFactory: Send + Sync {
    /// Load the named collection, empty if it was never written
    ///
    /// # Errors
    ///
    /// Returns an error if an existing store cannot be read or parsed.
    fn open(&self, collection: &str) -> Result<Box<dyn Store>>;
}

/// In-memory collection shared by the mutation helpers of both stores
#[derive(Debug, Clone, Default, PartialEq)]
struct Records(Vec<Record>);

impl Records {
    fn last_id(&self) -> i64 {
        self.0.iter().filter_map(record_id).max().unwrap_or(0)
    }

    fn next_id(&self) -> Option<i64> {
        self.last_id().checked_add(1)
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.0.iter().position(|r| record_id(r) == Some(id))
    }

    fn get(&self, id: i64) -> Option<Record> {
        self.position(id).map(|i| self.0[i].clone())
    }

    /// Append `fields` under a fresh id, or fail when ids have run out
    fn insert(&mut self, collection: &str, fields: Record) -> Result<Record> {
        let id = self.next_id().ok_or_else(|| Error::IdsExhausted {
            collection: collection.to_string(),
            last: self.last_id(),
        })?;

        let mut record = Record::new();
        record.insert(ID_FIELD.to_string(), Value::from(id));
        record.extend(fields.into_iter().filter(|(k, _)| k != ID_FIELD));
        self.0.push(record.clone());
        Ok(record)
    }

    fn replace(&mut self, record: Record) -> bool {
        let Some(index) = record_id(&record).and_then(|id| self.position(id)) else {
            return false;
        };
        self.0[index] = record;
        true
    }

    fn delete(&mut self, id: i64) -> bool {
        match self.position(id) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Collection persisted as a JSON array in `<dir>/<collection>.json`
#[derive(Debug)]
pub struct JsonFileStore {
    collection: String,
    path: PathBuf,
    records: Records,
}

impl JsonFileStore {
    /// Load a collection file, treating a missing file as empty
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on IO failure and `Error::CorruptStore` when the
    /// file is not a JSON array of objects.
    pub fn open(dir: &Path, collection: &str) -> Result<Self> {
        let path = dir.join(format!("{collection}.json"));
        let records = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Records::default(),
            Ok(bytes) => Records(parse_collection(collection, &bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Records::default(),
            Err(source) => {
                return Err(Error::Store {
                    collection: collection.to_string(),
                    source,
                })
            }
        };
        debug!(collection, records = records.0.len(), "Collection loaded");

        Ok(Self {
            collection: collection.to_string(),
            path,
            records,
        })
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full collection to a sibling file, then rename it over the
    /// store so readers only ever see complete documents.
    fn persist(&self) -> Result<()> {
        let document = to_json_pretty(&self.records.0)?;
        let staging = self.path.with_extension("json.tmp");
        let store_err = |source| Error::Store {
            collection: self.collection.clone(),
            source,
        };

        std::fs::write(&staging, document).map_err(store_err)?;
        std::fs::rename(&staging, &self.path).map_err(store_err)?;
        debug!(collection = %self.collection, records = self.records.0.len(), "Collection persisted");
        Ok(())
    }
}

fn parse_collection(collection: &str, bytes: &[u8]) -> Result<Vec<Record>> {
    let corrupt = |reason: String| Error::CorruptStore {
        collection: collection.to_string(),
        reason,
    };

    let document: Value = crate::json::parse_json(bytes).map_err(|e| corrupt(e.to_string()))?;
    let Value::Array(items) = document else {
        return Err(corrupt("expected a JSON array".to_string()));
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            other => Err(corrupt(format!("expected an object, found {other}"))),
        })
        .collect()
}

impl Store for JsonFileStore {
    fn get_all(&self) -> Vec<Record> {
        self.records.0.clone()
    }

    fn get(&self, id: i64) -> Option<Record> {
        self.records.get(id)
    }

    fn add(&mut self, record: Record) -> Result<Record> {
        let stored = self.records.insert(&self.collection, record)?;
        self.persist()?;
        Ok(stored)
    }

    fn update(&mut self, record: Record) -> Result<bool> {
        if !self.records.replace(record) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn remove(&mut self, id: i64) -> Result<bool> {
        if !self.records.delete(id) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }
}

/// Opens [`JsonFileStore`]s inside one data directory
#[derive(Debug, Clone)]
pub struct JsonFileStoreFactory {
    dir: PathBuf,
}

impl JsonFileStoreFactory {
    /// Create a factory rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl StoreFactory for JsonFileStoreFactory {
    fn open(&self, collection: &str) -> Result<Box<dyn Store>> {
        Ok(Box::new(JsonFileStore::open(&self.dir, collection)?))
    }
}

type SharedCollections = Arc<Mutex<HashMap<String, Records>>>;

/// Collection snapshot backed by process memory
///
/// Mirrors the file store: a snapshot is taken on open and written back in
/// full after each mutation.
#[derive(Debug)]
pub struct MemoryStore {
    collection: String,
    records: Records,
    shared: SharedCollections,
}

impl MemoryStore {
    fn persist(&self) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.insert(self.collection.clone(), self.records.clone());
    }
}

impl Store for MemoryStore {
    fn get_all(&self) -> Vec<Record> {
        self.records.0.clone()
    }

    fn get(&self, id: i64) -> Option<Record> {
        self.records.get(id)
    }

    fn add(&mut self, record: Record) -> Result<Record> {
        let stored = self.records.insert(&self.collection, record)?;
        self.persist();
        Ok(stored)
    }

    fn update(&mut self, record: Record) -> Result<bool> {
        let replaced = self.records.replace(record);
        if replaced {
            self.persist();
        }
        Ok(replaced)
    }

    fn remove(&mut self, id: i64) -> Result<bool> {
        let removed = self.records.delete(id);
        if removed {
            self.persist();
        }
        Ok(removed)
    }
}

/// Opens [`MemoryStore`]s over collections shared by all clones
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreFactory {
    shared: SharedCollections,
}

impl MemoryStoreFactory {
    /// Create a factory with no collections
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection, replacing whatever it held
    pub fn seed(&self, collection: &str, records: Vec<Record>) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.insert(collection.to_string(), Records(records));
    }

    /// Current contents of a collection
    #[must_use]
    pub fn snapshot(&self, collection: &str) -> Vec<Record> {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.get(collection).map(|r| r.0.clone()).unwrap_or_default()
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn open(&self, collection: &str) -> Result<Box<dyn Store>> {
        let records = {
            let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            shared.get(collection).cloned().unwrap_or_default()
        };
        Ok(Box::new(MemoryStore {
            collection: collection.to_string(),
            records,
            shared: self.shared.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn test_ids_are_sequential_from_one() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open("contacts").unwrap();

        for expected in 1..=3 {
            let stored = store.add(record(json!({"Name": "A"}))).unwrap();
            assert_eq!(record_id(&stored), Some(expected));
        }
    }

    #[test]
    fn test_next_id_follows_max_not_count() {
        let factory = MemoryStoreFactory::new();
        factory.seed(
            "contacts",
            vec![record(json!({"Id": 7, "Name": "x"})), record(json!({"Id": 2, "Name": "y"}))],
        );
        let mut store = factory.open("contacts").unwrap();
        let stored = store.add(record(json!({"Name": "z"}))).unwrap();
        assert_eq!(record_id(&stored), Some(8));
    }

    #[test]
    fn test_add_fails_when_ids_run_out() {
        let factory = MemoryStoreFactory::new();
        factory.seed("contacts", vec![record(json!({"Id": i64::MAX, "Name": "x"}))]);
        let mut store = factory.open("contacts").unwrap();

        let err = store.add(record(json!({"Name": "y"}))).unwrap_err();
        assert!(matches!(
            err,
            Error::IdsExhausted { ref collection, last: i64::MAX } if collection == "contacts"
        ));
        assert_eq!(factory.snapshot("contacts").len(), 1);
    }

    #[test]
    fn test_file_store_add_fails_when_ids_run_out() {
        let dir = tempfile::tempdir().unwrap();
        let seeded = format!(r#"[{{"Id": {}, "Name": "x"}}]"#, i64::MAX);
        std::fs::write(dir.path().join("contacts.json"), &seeded).unwrap();

        let mut store = JsonFileStore::open(dir.path(), "contacts").unwrap();
        assert!(store.add(record(json!({"Name": "y"}))).is_err());
        let on_disk = std::fs::read_to_string(dir.path().join("contacts.json")).unwrap();
        assert_eq!(on_disk, seeded);
    }

    #[test]
    fn test_add_puts_id_first_and_ignores_client_id() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open("contacts").unwrap();
        let stored = store
            .add(record(json!({"Name": "A", "Id": 99, "Phone": "1"})))
            .unwrap();
        assert_eq!(
            serde_json::to_string(&stored).unwrap(),
            r#"{"Id":1,"Name":"A","Phone":"1"}"#
        );
    }

    #[test]
    fn test_add_then_get_all_and_remove() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open("bookmarks").unwrap();
        let stored = store.add(record(json!({"Title": "t"}))).unwrap();

        let reopened = factory.open("bookmarks").unwrap();
        let all = reopened.get_all();
        assert_eq!(all.iter().filter(|r| **r == stored).count(), 1);

        let mut store = factory.open("bookmarks").unwrap();
        assert!(store.remove(1).unwrap());
        assert!(factory.open("bookmarks").unwrap().get_all().is_empty());
    }

    #[test]
    fn test_update_missing_record_is_noop() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open("contacts").unwrap();
        assert!(!store.update(record(json!({"Id": 4, "Name": "A"}))).unwrap());
        assert!(factory.snapshot("contacts").is_empty());
    }

    #[test]
    fn test_remove_missing_record() {
        let factory = MemoryStoreFactory::new();
        let mut store = factory.open("contacts").unwrap();
        assert!(!store.remove(1).unwrap());
    }

    #[test]
    fn test_collections_are_independent() {
        let factory = MemoryStoreFactory::new();
        factory.open("contacts").unwrap().add(record(json!({}))).unwrap();
        assert!(factory.snapshot("bookmarks").is_empty());
        assert_eq!(factory.snapshot("contacts").len(), 1);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path(), "contacts").unwrap();
        assert!(store.get_all().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let factory = JsonFileStoreFactory::new(dir.path());

        let mut store = factory.open("contacts").unwrap();
        store.add(record(json!({"Name": "A"}))).unwrap();
        store.add(record(json!({"Name": "B"}))).unwrap();

        let mut store = factory.open("contacts").unwrap();
        assert_eq!(store.get_all().len(), 2);
        assert!(store.update(record(json!({"Id": 2, "Name": "C"}))).unwrap());

        let store = factory.open("contacts").unwrap();
        assert_eq!(store.get(2).unwrap()["Name"], "C");
        assert!(!dir.path().join("contacts.json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("contacts.json"), r#"{"Id": 1}"#).unwrap();
        let err = JsonFileStore::open(dir.path(), "contacts").unwrap_err();
        assert!(matches!(err, Error::CorruptStore { .. }));
    }

    #[test]
    fn test_file_store_blank_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bookmarks.json"), "\n").unwrap();
        let store = JsonFileStore::open(dir.path(), "bookmarks").unwrap();
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_file_store_missing_dir_fails_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let mut store = JsonFileStore::open(&missing, "contacts").unwrap();
        let err = store.add(record(json!({"Name": "A"}))).unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }
}
