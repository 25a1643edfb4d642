use crate::error::{Result, TourDbError};
use crate::record::{Record, ID_FIELD};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard};

/// An immutable view of one collection at the moment it was read.
pub type Snapshot = Arc<Vec<Record>>;

type Collections = BTreeMap<String, Snapshot>;

const COLLECTION_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_-]{0,63}$";

/// Check that a collection name is syntactically valid.
pub fn validate_collection_name(name: &str) -> Result<()> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(COLLECTION_NAME_PATTERN).expect("collection name pattern"));
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(TourDbError::InvalidCollectionName(name.to_string()))
    }
}

/// The record store: named collections of schema-less records, optionally
/// backed by a single JSON document on disk.
///
/// Reads hand out `Arc` snapshots and never wait for a flush. Writes go
/// through a single writer lock: the next state is built, flushed, and only
/// then swapped in, so a failed flush leaves the previous state visible.
pub struct RecordStore {
    path: Option<PathBuf>,
    collections: RwLock<Collections>,
    writer: Mutex<()>,
}

impl RecordStore {
    /// Open a store backed by the JSON document at `path`.
    /// A missing file is an empty store; it is created on the first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let collections = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Collections::new()
            } else {
                parse_document(serde_json::from_str(&raw)?)?
            }
        } else {
            log::info!("Store file {} does not exist yet, starting empty", path.display());
            Collections::new()
        };

        log::info!(
            "Opened store at {} ({} collections)",
            path.display(),
            collections.len()
        );

        Ok(RecordStore {
            path: Some(path),
            collections: RwLock::new(collections),
            writer: Mutex::new(()),
        })
    }

    /// An empty store with no backing file.
    pub fn in_memory() -> Self {
        RecordStore {
            path: None,
            collections: RwLock::new(Collections::new()),
            writer: Mutex::new(()),
        }
    }

    /// An in-memory store seeded from a document of the on-disk shape.
    pub fn from_document(document: Value) -> Result<Self> {
        Ok(RecordStore {
            path: None,
            collections: RwLock::new(parse_document(document)?),
            writer: Mutex::new(()),
        })
    }

    /// Path of the backing document, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, Collections> {
        // Swaps are single assignments, so a poisoned map is still consistent.
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Snapshot of a collection. Unknown names yield an empty snapshot.
    pub fn get_collection(&self, name: &str) -> Result<Snapshot> {
        validate_collection_name(name)?;
        Ok(self.read().get(name).cloned().unwrap_or_default())
    }

    /// Find a record by id. String ids match verbatim, numeric ids by their
    /// decimal rendering.
    pub fn find_by_id(&self, name: &str, id: &str) -> Result<Option<Record>> {
        let snapshot = self.get_collection(name)?;
        Ok(snapshot.iter().find(|r| r.has_id(id)).cloned())
    }

    /// Like `find_by_id`, but a miss is a `NotFound` error.
    pub fn get(&self, name: &str, id: &str) -> Result<Record> {
        self.find_by_id(name, id)?
            .ok_or_else(|| TourDbError::NotFound {
                collection: name.to_string(),
                id: id.to_string(),
            })
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Record count per stored collection.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.read()
            .iter()
            .map(|(name, records)| (name.clone(), records.len()))
            .collect()
    }

    /// The whole store in its on-disk shape.
    pub fn export(&self) -> Value {
        to_document(&self.read())
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Replace a collection's contents wholesale.
    pub fn replace_collection(&self, name: &str, records: Vec<Record>) -> Result<()> {
        self.write(name, |_| Ok((records, ())))
    }

    /// Append a record. Assigns a UUID id and a `created_at` stamp when the
    /// record carries none. Returns the stored record.
    pub fn push(&self, name: &str, mut record: Record) -> Result<Record> {
        if record.id().is_none() {
            record.insert(ID_FIELD, Value::String(uuid::Uuid::new_v4().to_string()));
        }
        if record.defined("created_at").is_none() {
            record.insert("created_at", Value::String(timestamp_now()));
        }

        self.write(name, |current| {
            let id = record.id_string().unwrap_or_default();
            if current.iter().any(|r| r.id() == record.id()) {
                return Err(TourDbError::DuplicateId {
                    collection: name.to_string(),
                    id,
                });
            }
            let mut next = current.to_vec();
            next.push(record.clone());
            Ok((next, record))
        })
    }

    /// Merge `patch` into the record with the given id and stamp
    /// `updated_at`. The id itself can never change.
    pub fn update(&self, name: &str, id: &str, patch: Map<String, Value>) -> Result<Record> {
        self.write(name, |current| {
            let position = current
                .iter()
                .position(|r| r.has_id(id))
                .ok_or_else(|| TourDbError::NotFound {
                    collection: name.to_string(),
                    id: id.to_string(),
                })?;

            let mut updated = current[position].clone();
            if let Some(new_id) = patch.get(ID_FIELD).filter(|v| !v.is_null()) {
                if updated.id() != Some(new_id) {
                    return Err(TourDbError::Validation(format!(
                        "id of {name}/{id} cannot be changed"
                    )));
                }
            }
            updated.merge(&patch);
            updated.insert("updated_at", Value::String(timestamp_now()));

            let mut next = current.to_vec();
            next[position] = updated.clone();
            Ok((next, updated))
        })
    }

    /// Delete a record by id, returning it.
    pub fn remove(&self, name: &str, id: &str) -> Result<Record> {
        self.write(name, |current| {
            let position = current
                .iter()
                .position(|r| r.has_id(id))
                .ok_or_else(|| TourDbError::NotFound {
                    collection: name.to_string(),
                    id: id.to_string(),
                })?;
            let mut next = current.to_vec();
            let removed = next.remove(position);
            Ok((next, removed))
        })
    }

    /// Apply one write to one collection: compute the next contents from the
    /// current ones, flush the resulting document, then publish it.
    fn write<T>(
        &self,
        name: &str,
        apply: impl FnOnce(&[Record]) -> Result<(Vec<Record>, T)>,
    ) -> Result<T> {
        validate_collection_name(name)?;
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut next = self.read().clone();
        let current = next.get(name).cloned().unwrap_or_default();
        let (records, output) = apply(&current)?;
        next.insert(name.to_string(), Arc::new(records));

        self.flush(&next)?;

        *self.collections.write().unwrap_or_else(|e| e.into_inner()) = next;
        log::debug!("Wrote collection '{name}'");
        Ok(output)
    }

    /// Rewrite the backing document atomically. The temp file is removed on
    /// every error path when it drops.
    fn flush(&self, collections: &Collections) -> Result<()> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };

        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, &to_document(collections))?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| TourDbError::Io(e.error))?;

        log::debug!("Flushed store to {}", path.display());
        Ok(())
    }
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse the on-disk document: an object of collection name to record array.
fn parse_document(document: Value) -> Result<Collections> {
    let map = match document {
        Value::Object(map) => map,
        other => {
            return Err(TourDbError::Store(format!(
                "store document must be an object, got {}",
                type_name(&other)
            )))
        }
    };

    let mut collections = Collections::new();
    for (name, value) in map {
        validate_collection_name(&name)?;
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(TourDbError::Store(format!(
                    "collection '{name}' must be an array, got {}",
                    type_name(&other)
                )))
            }
        };

        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let kind = type_name(&item);
            let record = Record::from_value(item).ok_or_else(|| {
                TourDbError::Store(format!(
                    "record {index} of collection '{name}' must be an object, got {kind}"
                ))
            })?;
            records.push(record);
        }
        collections.insert(name, Arc::new(records));
    }

    Ok(collections)
}

fn to_document(collections: &Collections) -> Value {
    let map: Map<String, Value> = collections
        .iter()
        .map(|(name, records)| {
            let items = records.iter().cloned().map(Record::into_value).collect();
            (name.clone(), Value::Array(items))
        })
        .collect();
    Value::Object(map)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn setup_test_store() -> (TempDir, RecordStore) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "guides": [
                    { "id": "g1", "name": "Ana" },
                    { "id": 2, "name": "Luis" }
                ],
                "vehicles": []
            }))
            .unwrap(),
        )
        .unwrap();
        let store = RecordStore::open(&path).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_open_store() {
        let (_tmp, store) = setup_test_store();
        assert_eq!(store.collection_names(), vec!["guides", "vehicles"]);
        assert_eq!(store.get_collection("guides").unwrap().len(), 2);
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::open(tmp.path().join("nope.json")).unwrap();
        assert!(store.collection_names().is_empty());
    }

    #[test]
    fn test_unknown_collection_is_empty_not_error() {
        let (_tmp, store) = setup_test_store();
        let snapshot = store.get_collection("ratings").unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_invalid_collection_name() {
        let (_tmp, store) = setup_test_store();
        for name in ["", "../etc", "has space", "9lives"] {
            let err = store.get_collection(name).unwrap_err();
            assert!(matches!(err, TourDbError::InvalidCollectionName(_)), "{name}");
        }
        assert!(store.push("bad name", Record::new()).is_err());
    }

    #[test]
    fn test_find_by_id() {
        let (_tmp, store) = setup_test_store();
        let ana = store.find_by_id("guides", "g1").unwrap().unwrap();
        assert_eq!(ana.str_field("name"), Some("Ana"));

        let luis = store.find_by_id("guides", "2").unwrap().unwrap();
        assert_eq!(luis.str_field("name"), Some("Luis"));

        assert!(store.find_by_id("guides", "missing").unwrap().is_none());
        assert!(matches!(
            store.get("guides", "missing"),
            Err(TourDbError::NotFound { .. })
        ));
    }

    #[test]
    fn test_snapshot_is_isolated_from_writes() {
        let (_tmp, store) = setup_test_store();
        let before = store.get_collection("guides").unwrap();
        store.push("guides", record(json!({ "name": "Marta" }))).unwrap();

        assert_eq!(before.len(), 2);
        assert_eq!(store.get_collection("guides").unwrap().len(), 3);
    }

    #[test]
    fn test_push_assigns_id_and_timestamp() {
        let (_tmp, store) = setup_test_store();
        let stored = store.push("vehicles", record(json!({ "plate": "ABC-123" }))).unwrap();

        let id = stored.id_string().unwrap();
        assert!(!id.is_empty());
        assert!(stored.str_field("created_at").is_some());
        assert_eq!(store.get("vehicles", &id).unwrap(), stored);
    }

    #[test]
    fn test_push_duplicate_id_rejected() {
        let (_tmp, store) = setup_test_store();
        let err = store
            .push("guides", record(json!({ "id": "g1", "name": "Other" })))
            .unwrap_err();
        assert!(matches!(err, TourDbError::DuplicateId { .. }));
        assert_eq!(store.get_collection("guides").unwrap().len(), 2);
    }

    #[test]
    fn test_update_merges_and_keeps_id() {
        let (_tmp, store) = setup_test_store();
        let patch = json!({ "phone": "555", "name": null });
        let updated = store
            .update("guides", "g1", patch.as_object().unwrap().clone())
            .unwrap();
        assert_eq!(updated.str_field("name"), Some("Ana"));
        assert_eq!(updated.str_field("phone"), Some("555"));
        assert!(updated.str_field("updated_at").is_some());

        let patch = json!({ "id": "g9" });
        let err = store
            .update("guides", "g1", patch.as_object().unwrap().clone())
            .unwrap_err();
        assert!(matches!(err, TourDbError::Validation(_)));
        assert!(store.find_by_id("guides", "g1").unwrap().is_some());
    }

    #[test]
    fn test_remove() {
        let (_tmp, store) = setup_test_store();
        let removed = store.remove("guides", "g1").unwrap();
        assert_eq!(removed.str_field("name"), Some("Ana"));
        assert!(store.find_by_id("guides", "g1").unwrap().is_none());
        assert!(matches!(
            store.remove("guides", "g1"),
            Err(TourDbError::NotFound { .. })
        ));
    }

    #[test]
    fn test_writes_persist_across_reopen() {
        let (tmp, store) = setup_test_store();
        store
            .replace_collection("ratings", vec![record(json!({ "id": "r1", "score": 5 }))])
            .unwrap();
        drop(store);

        let reopened = RecordStore::open(tmp.path().join("db.json")).unwrap();
        let ratings = reopened.get_collection("ratings").unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].get("score"), Some(&json!(5)));
        assert_eq!(reopened.get_collection("guides").unwrap().len(), 2);
    }

    #[test]
    fn test_failed_flush_leaves_previous_state() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = RecordStore::open(blocker.join("db.json")).unwrap();
        let result = store.push("guides", record(json!({ "id": "g1" })));

        assert!(result.is_err());
        assert!(store.get_collection("guides").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_document_rejected() {
        assert!(matches!(
            RecordStore::from_document(json!([1, 2])),
            Err(TourDbError::Store(_))
        ));
        assert!(matches!(
            RecordStore::from_document(json!({ "guides": { "id": 1 } })),
            Err(TourDbError::Store(_))
        ));
        assert!(matches!(
            RecordStore::from_document(json!({ "guides": [1, 2] })),
            Err(TourDbError::Store(_))
        ));
    }

    #[test]
    fn test_counts_and_export() {
        let (_tmp, store) = setup_test_store();
        let counts = store.counts();
        assert_eq!(counts["guides"], 2);
        assert_eq!(counts["vehicles"], 0);
        assert_eq!(store.export()["guides"][0]["name"], "Ana");
    }

    #[test]
    fn test_concurrent_pushes_are_serialized() {
        let (tmp, store) = setup_test_store();
        let store = std::sync::Arc::new(store);
        let writers = 16;

        let handles: Vec<_> = (0..writers)
            .map(|n| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .push("bookings", record(json!({ "id": format!("b{n}") })))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_collection("bookings").unwrap().len(), writers);

        let reopened = RecordStore::open(tmp.path().join("db.json")).unwrap();
        let bookings = reopened.get_collection("bookings").unwrap();
        assert_eq!(bookings.len(), writers);
        for n in 0..writers {
            assert!(reopened.find_by_id("bookings", &format!("b{n}")).unwrap().is_some());
        }
    }
}
