// Join resolver - single-hop reference lookups into sibling collections

use crate::error::Result;
use crate::record::Record;
use crate::store::{validate_collection_name, RecordStore, Snapshot};
use crate::util::scalar_string;
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of resolving a reference. A dangling or missing reference is
/// `Unresolved`, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Record),
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Resolution::Resolved(r) => Some(r),
            Resolution::Unresolved => None,
        }
    }

    /// Display label taken from `field` of the resolved record, or the
    /// caller's fallback when unresolved or when the field is blank.
    pub fn label(&self, field: &str, fallback: &str) -> String {
        self.record()
            .and_then(|r| r.defined(field))
            .and_then(scalar_string)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Only scalar references can name a record. The JSON rendering keeps
/// `"7"` and `7` apart, so lookups stay exact.
fn join_key(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        scalar => Some(scalar.to_string()),
    }
}

/// Resolve `record[reference_field]` by scanning `targets` for the first
/// record with an equal id.
pub fn resolve_in(targets: &[Record], record: &Record, reference_field: &str) -> Resolution {
    let reference = match record.get(reference_field).filter(|v| join_key(v).is_some()) {
        Some(r) => r,
        None => return Resolution::Unresolved,
    };
    targets
        .iter()
        .find(|t| t.id() == Some(reference))
        .cloned()
        .map(Resolution::Resolved)
        .unwrap_or(Resolution::Unresolved)
}

/// Resolve a reference against a named collection in the store.
/// Fails only when the collection name is invalid.
pub fn resolve(
    store: &RecordStore,
    record: &Record,
    reference_field: &str,
    target_collection: &str,
) -> Result<Resolution> {
    validate_collection_name(target_collection)?;
    if record.defined(reference_field).is_none() {
        return Ok(Resolution::Unresolved);
    }
    let targets = store.get_collection(target_collection)?;
    Ok(resolve_in(&targets, record, reference_field))
}

/// An id index over one collection snapshot. Gives the same answers as
/// `resolve_in` over that snapshot.
#[derive(Debug, Clone)]
pub struct JoinIndex {
    collection: String,
    records: Snapshot,
    by_id: HashMap<String, usize>,
}

impl JoinIndex {
    pub fn build(collection: &str, records: Snapshot) -> Self {
        let mut by_id = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            if let Some(key) = record.id().and_then(join_key) {
                // First match wins, as with a linear scan.
                by_id.entry(key).or_insert(position);
            }
        }
        JoinIndex {
            collection: collection.to_string(),
            records,
            by_id,
        }
    }

    pub fn load(store: &RecordStore, collection: &str) -> Result<Self> {
        Ok(JoinIndex::build(collection, store.get_collection(collection)?))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn lookup(&self, id: &Value) -> Resolution {
        join_key(id)
            .and_then(|key| self.by_id.get(&key))
            .map(|&position| Resolution::Resolved(self.records[position].clone()))
            .unwrap_or(Resolution::Unresolved)
    }

    pub fn resolve(&self, record: &Record, reference_field: &str) -> Resolution {
        match record.defined(reference_field) {
            Some(reference) => self.lookup(reference),
            None => Resolution::Unresolved,
        }
    }
}

/// Attach a human-readable label for a reference: resolve
/// `source[reference_field]` in `collection` and write the target's
/// `label_field` (or `fallback`) into `output_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub reference_field: String,
    pub collection: String,
    pub label_field: String,
    pub output_field: String,
    pub fallback: String,
}

impl Enrichment {
    pub fn new(
        reference_field: &str,
        collection: &str,
        label_field: &str,
        output_field: &str,
        fallback: &str,
    ) -> Self {
        Enrichment {
            reference_field: reference_field.to_string(),
            collection: collection.to_string(),
            label_field: label_field.to_string(),
            output_field: output_field.to_string(),
            fallback: fallback.to_string(),
        }
    }

    pub fn apply(&self, joins: &JoinSet, source: &Record, target: &mut Record) {
        let resolution = joins
            .get(&self.collection)
            .map(|index| index.resolve(source, &self.reference_field))
            .unwrap_or(Resolution::Unresolved);
        if !resolution.is_resolved() && source.defined(&self.reference_field).is_some() {
            log::debug!(
                "Dangling reference {} -> {}",
                self.reference_field,
                self.collection
            );
        }
        target.insert(
            self.output_field.clone(),
            Value::String(resolution.label(&self.label_field, &self.fallback)),
        );
    }
}

/// Join indexes for every collection a set of enrichments touches, each
/// built from one snapshot.
#[derive(Debug, Clone, Default)]
pub struct JoinSet {
    indexes: HashMap<String, JoinIndex>,
}

impl JoinSet {
    pub fn load(store: &RecordStore, enrichments: &[Enrichment]) -> Result<Self> {
        let mut indexes = HashMap::new();
        for enrichment in enrichments {
            if !indexes.contains_key(&enrichment.collection) {
                let index = JoinIndex::load(store, &enrichment.collection)?;
                log::debug!(
                    "Indexed {} ids of '{}' for joins",
                    index.by_id.len(),
                    index.collection()
                );
                indexes.insert(enrichment.collection.clone(), index);
            }
        }
        Ok(JoinSet { indexes })
    }

    pub fn get(&self, collection: &str) -> Option<&JoinIndex> {
        self.indexes.get(collection)
    }

    /// Apply every enrichment, copying labels from `source` onto `target`.
    pub fn enrich(&self, enrichments: &[Enrichment], source: &Record, target: &mut Record) {
        for enrichment in enrichments {
            enrichment.apply(self, source, target);
        }
    }
}
