// Derived view generator - records flattened out of nested arrays on read

use crate::error::{Result, TourDbError};
use crate::join::{Enrichment, JoinSet};
use crate::record::{Record, ID_FIELD};
use crate::store::{validate_collection_name, RecordStore, Snapshot};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Which nested entries turn into derived records.
#[derive(Debug, Clone, PartialEq)]
pub enum Inclusion {
    /// Every object entry
    Always,
    /// Entries whose field holds a non-blank string (e.g. a photo URL)
    NonEmpty(String),
    /// Entries where the field is present and not null
    Present(String),
}

impl Inclusion {
    fn admits(&self, entry: &Record) -> bool {
        match self {
            Inclusion::Always => true,
            Inclusion::NonEmpty(field) => entry
                .str_field(field)
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false),
            Inclusion::Present(field) => entry.defined(field).is_some(),
        }
    }
}

/// Copy of one field into a derived record, possibly under a new name.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCopy {
    pub from: String,
    pub to: String,
}

impl FieldCopy {
    pub fn same(field: &str) -> Self {
        FieldCopy::renamed(field, field)
    }

    pub fn renamed(from: &str, to: &str) -> Self {
        FieldCopy {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// A collection synthesized on read from nested arrays in a source
/// collection, used when the physical collection is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedView {
    /// Collection this view stands in for
    pub name: String,
    pub source: String,
    pub nested_field: String,
    pub id_prefix: Option<String>,
    pub include: Inclusion,
    /// Fields copied from the nested entry
    pub nested_fields: Vec<FieldCopy>,
    /// Fields copied from the parent source record
    pub parent_fields: Vec<FieldCopy>,
    /// Labels resolved from references on the parent source record
    pub enrichments: Vec<Enrichment>,
}

impl DerivedView {
    pub fn new(name: &str, source: &str, nested_field: &str) -> Self {
        DerivedView {
            name: name.to_string(),
            source: source.to_string(),
            nested_field: nested_field.to_string(),
            id_prefix: None,
            include: Inclusion::Always,
            nested_fields: Vec::new(),
            parent_fields: Vec::new(),
            enrichments: Vec::new(),
        }
    }

    pub fn id_prefix(mut self, prefix: &str) -> Self {
        self.id_prefix = Some(prefix.to_string());
        self
    }

    pub fn include(mut self, include: Inclusion) -> Self {
        self.include = include;
        self
    }

    pub fn nested_field(mut self, copy: FieldCopy) -> Self {
        self.nested_fields.push(copy);
        self
    }

    pub fn parent_field(mut self, copy: FieldCopy) -> Self {
        self.parent_fields.push(copy);
        self
    }

    pub fn enrich(mut self, enrichment: Enrichment) -> Self {
        self.enrichments.push(enrichment);
        self
    }

    /// Generate the derived records from the store's current source
    /// collection. Nothing is written back.
    pub fn generate(&self, store: &RecordStore) -> Result<Vec<Record>> {
        validate_collection_name(&self.name)?;
        let sources = store.get_collection(&self.source)?;
        let joins = JoinSet::load(store, &self.enrichments)?;
        self.generate_from(&sources, &joins)
    }

    /// Generate from an explicit source snapshot and join set.
    ///
    /// Ids are `[{prefix}-]{parentId}-{nestedId}`. A parent or entry without
    /// an id contributes its position instead, so output stays stable for
    /// unchanged input. A nested field that is present but not an array is
    /// a `CorruptRecord` error.
    pub fn generate_from(&self, sources: &[Record], joins: &JoinSet) -> Result<Vec<Record>> {
        let mut derived = Vec::new();

        for (parent_pos, parent) in sources.iter().enumerate() {
            let parent_id = parent
                .id_string()
                .unwrap_or_else(|| parent_pos.to_string());

            let entries = match parent.defined(&self.nested_field) {
                None => continue,
                Some(Value::Array(entries)) => entries,
                Some(_) => {
                    log::warn!(
                        "{}/{parent_id}: '{}' is not an array",
                        self.source,
                        self.nested_field
                    );
                    return Err(TourDbError::CorruptRecord {
                        collection: self.source.clone(),
                        id: parent_id,
                        detail: format!("nested field '{}' is not an array", self.nested_field),
                    });
                }
            };

            for (entry_pos, entry) in entries.iter().enumerate() {
                let entry = match Record::from_value(entry.clone()) {
                    Some(e) => e,
                    None => continue,
                };
                if !self.include.admits(&entry) {
                    continue;
                }

                let entry_id = entry
                    .id_string()
                    .unwrap_or_else(|| entry_pos.to_string());
                let id = match &self.id_prefix {
                    Some(prefix) => format!("{prefix}-{parent_id}-{entry_id}"),
                    None => format!("{parent_id}-{entry_id}"),
                };

                let mut record = Record::new();
                copy_fields(&self.parent_fields, parent, &mut record);
                copy_fields(&self.nested_fields, &entry, &mut record);
                joins.enrich(&self.enrichments, parent, &mut record);
                record.insert(ID_FIELD, Value::String(id));
                derived.push(record);
            }
        }

        log::debug!(
            "Derived {} '{}' records from {} '{}' records",
            derived.len(),
            self.name,
            sources.len(),
            self.source
        );
        Ok(derived)
    }
}

fn copy_fields(copies: &[FieldCopy], from: &Record, to: &mut Record) {
    for copy in copies {
        if let Some(value) = from.defined(&copy.from) {
            to.insert(copy.to.clone(), value.clone());
        }
    }
}

/// Registry of derived views keyed by the collection they stand in for.
#[derive(Debug, Clone, Default)]
pub struct DerivedViews {
    views: HashMap<String, DerivedView>,
}

impl DerivedViews {
    pub fn new() -> Self {
        DerivedViews::default()
    }

    pub fn register(&mut self, view: DerivedView) -> Result<()> {
        validate_collection_name(&view.name)?;
        validate_collection_name(&view.source)?;
        if view.name == view.source {
            return Err(TourDbError::InvalidDescriptor(format!(
                "derived view '{}' cannot be sourced from itself",
                view.name
            )));
        }
        self.views.insert(view.name.clone(), view);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DerivedView> {
        self.views.get(name)
    }

    /// Views whose output depends on the given collection.
    pub fn affected_views(&self, collection: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .views
            .values()
            .filter(|v| {
                v.source == collection || v.enrichments.iter().any(|e| e.collection == collection)
            })
            .map(|v| v.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// The physical collection when it has records; otherwise the derived
    /// records when a view is registered for the name; otherwise empty.
    pub fn read_or_derive(&self, store: &RecordStore, name: &str) -> Result<Snapshot> {
        let physical = store.get_collection(name)?;
        if !physical.is_empty() {
            return Ok(physical);
        }
        match self.views.get(name) {
            Some(view) => {
                log::debug!("Collection '{name}' is empty, deriving from '{}'", view.source);
                Ok(Arc::new(view.generate(store)?))
            }
            None => Ok(physical),
        }
    }
}
