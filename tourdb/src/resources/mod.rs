// Dashboard resource catalog: the adapter from route parameters to the engine

pub mod params;
pub mod stats;

use crate::config::Config;
use crate::derive::{DerivedView, DerivedViews, FieldCopy, Inclusion};
use crate::error::{Result, TourDbError};
use crate::join::{Enrichment, JoinSet};
use crate::query::{self, Filter, Page, QueryDescriptor, SortDirection, SortKey};
use crate::record::Record;
use crate::store::{validate_collection_name, RecordStore, Snapshot};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

pub use params::{FilterParam, ParamKind};
pub use stats::StatsPreset;

/// A resource the dashboard exposes: its collection plus the parameters,
/// sorting, joins and statistics it supports.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub filters: Vec<FilterParam>,
    pub search_fields: Vec<String>,
    /// Fields holding timestamps; sorting on them is newest-first by default
    pub time_fields: Vec<String>,
    pub default_sort: Option<SortKey>,
    /// Labels attached to each returned record
    pub joins: Vec<Enrichment>,
    pub stats: Option<StatsPreset>,
}

impl Resource {
    pub fn new(name: &str) -> Self {
        Resource {
            name: name.to_string(),
            filters: Vec::new(),
            search_fields: Vec::new(),
            time_fields: vec!["created_at".to_string(), "updated_at".to_string()],
            default_sort: None,
            joins: Vec::new(),
            stats: None,
        }
    }

    pub fn filter(mut self, param: FilterParam) -> Self {
        self.filters.push(param);
        self
    }

    pub fn search(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn time_field(mut self, field: &str) -> Self {
        self.time_fields.push(field.to_string());
        self
    }

    pub fn sort_by(mut self, field: &str) -> Self {
        self.default_sort = Some(self.sort_key(field));
        self
    }

    pub fn join(mut self, enrichment: Enrichment) -> Self {
        self.joins.push(enrichment);
        self
    }

    pub fn stats(mut self, preset: StatsPreset) -> Self {
        self.stats = Some(preset);
        self
    }

    fn sort_key(&self, field: &str) -> SortKey {
        if self.time_fields.iter().any(|f| f == field) {
            SortKey::time(field)
        } else {
            SortKey::field(field)
        }
    }
}

/// The set of resources served, their derived views, and page limits.
#[derive(Debug, Clone)]
pub struct Catalog {
    resources: BTreeMap<String, Resource>,
    views: DerivedViews,
    default_limit: usize,
    max_limit: usize,
    recent_window_days: u32,
}

impl Catalog {
    pub fn new(config: &Config) -> Self {
        Catalog {
            resources: BTreeMap::new(),
            views: DerivedViews::new(),
            default_limit: config.default_limit,
            max_limit: config.max_limit,
            recent_window_days: config.recent_window_days,
        }
    }

    pub fn register(&mut self, resource: Resource) -> Result<()> {
        validate_collection_name(&resource.name)?;
        self.resources.insert(resource.name.clone(), resource);
        Ok(())
    }

    pub fn register_view(&mut self, view: DerivedView) -> Result<()> {
        self.views.register(view)
    }

    /// The tour-operations dashboard resources.
    pub fn dashboard(config: &Config) -> Result<Self> {
        let mut catalog = Catalog::new(config);

        catalog.register(
            Resource::new("reservations")
                .filter(FilterParam::on("status", ParamKind::Text))
                .filter(FilterParam::on("guide_id", ParamKind::Text))
                .filter(FilterParam::on("vehicle_id", ParamKind::Text))
                .filter(FilterParam::on("agency_id", ParamKind::Text))
                .filter(FilterParam::on("service_id", ParamKind::Text))
                .filter(FilterParam::new("date_from", "tour_date", ParamKind::From))
                .filter(FilterParam::new("date_to", "tour_date", ParamKind::To))
                .search(&["client_name", "client_email", "code"])
                .time_field("tour_date")
                .sort_by("tour_date")
                .join(Enrichment::new("service_id", "services", "name", "tour_name", "Tour"))
                .join(Enrichment::new("guide_id", "guides", "name", "guide_name", "Guía"))
                .join(Enrichment::new("agency_id", "agencies", "name", "agency_name", "Agencia"))
                .join(Enrichment::new("vehicle_id", "vehicles", "plate", "vehicle_plate", "Sin asignar"))
                .stats(StatsPreset::Reservations),
        )?;

        catalog.register(
            Resource::new("guides")
                .filter(FilterParam::on("status", ParamKind::Text))
                .filter(FilterParam::on("active", ParamKind::Bool))
                .filter(FilterParam::new("language", "languages", ParamKind::Contains))
                .search(&["name", "email", "phone"])
                .sort_by("name"),
        )?;

        catalog.register(
            Resource::new("vehicles")
                .filter(FilterParam::on("status", ParamKind::Text))
                .filter(FilterParam::on("type", ParamKind::Text))
                .filter(FilterParam::on("capacity", ParamKind::Number))
                .search(&["plate", "model", "brand"])
                .sort_by("plate"),
        )?;

        catalog.register(
            Resource::new("tour_photos")
                .filter(FilterParam::on("reservation_id", ParamKind::Text))
                .filter(FilterParam::on("guide_id", ParamKind::Text))
                .filter(FilterParam::on("service_id", ParamKind::Text))
                .filter(FilterParam::new("date_from", "taken_at", ParamKind::From))
                .filter(FilterParam::new("date_to", "taken_at", ParamKind::To))
                .search(&["tour_name", "guide_name", "checkpoint_name", "caption"])
                .time_field("taken_at")
                .time_field("tour_date")
                .sort_by("taken_at")
                .stats(StatsPreset::Photos),
        )?;
        catalog.register_view(tour_photos_view())?;

        catalog.register(
            Resource::new("ratings")
                .filter(FilterParam::on("guide_id", ParamKind::Text))
                .filter(FilterParam::on("reservation_id", ParamKind::Text))
                .filter(FilterParam::on("rating", ParamKind::Number))
                .search(&["comment", "client_name"])
                .sort_by("created_at")
                .join(Enrichment::new("guide_id", "guides", "name", "guide_name", "Guía"))
                .stats(StatsPreset::Ratings),
        )?;

        catalog.register(
            Resource::new("rewards")
                .filter(FilterParam::on("guide_id", ParamKind::Text))
                .filter(FilterParam::on("status", ParamKind::Text))
                .filter(FilterParam::on("type", ParamKind::Text))
                .search(&["title", "description"])
                .sort_by("created_at")
                .join(Enrichment::new("guide_id", "guides", "name", "guide_name", "Guía"))
                .stats(StatsPreset::Rewards),
        )?;

        catalog.register(
            Resource::new("files")
                .filter(FilterParam::on("category", ParamKind::Text))
                .filter(FilterParam::on("type", ParamKind::Text))
                .filter(FilterParam::on("status", ParamKind::Text))
                .filter(FilterParam::new("tag", "tags", ParamKind::Contains))
                .search(&["name", "description"])
                .time_field("uploaded_at")
                .sort_by("uploaded_at")
                .stats(StatsPreset::Files),
        )?;

        catalog.register(Resource::new("services").search(&["name", "description"]).sort_by("name"))?;
        catalog.register(Resource::new("agencies").search(&["name", "email"]).sort_by("name"))?;

        Ok(catalog)
    }

    pub fn resource(&self, name: &str) -> Result<&Resource> {
        self.resources
            .get(name)
            .ok_or_else(|| TourDbError::NotFound {
                collection: "resources".to_string(),
                id: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    pub fn views(&self) -> &DerivedViews {
        &self.views
    }

    /// Store overview: backing file, collection counts, served resources and
    /// the derived views each stored collection feeds.
    pub fn status(&self, store: &RecordStore) -> Value {
        let derived_views: BTreeMap<String, Vec<&str>> = store
            .collection_names()
            .into_iter()
            .map(|name| {
                let views = self.views.affected_views(&name);
                (name, views)
            })
            .filter(|(_, views)| !views.is_empty())
            .collect();

        json!({
            "data_file": store.path().map(|p| p.display().to_string()),
            "collections": store.counts(),
            "resources": self.names(),
            "derived_views": derived_views,
        })
    }

    /// Translate query-string parameters into a query descriptor.
    /// Parameters the resource does not declare are ignored.
    pub fn descriptor(
        &self,
        resource: &Resource,
        query: &HashMap<String, String>,
    ) -> Result<QueryDescriptor> {
        let page = match query.get(params::PAGE_PARAM) {
            Some(raw) => params::parse_positive(params::PAGE_PARAM, raw)?,
            None => 1,
        };
        let limit = match query.get(params::LIMIT_PARAM) {
            Some(raw) => params::parse_positive(params::LIMIT_PARAM, raw)?,
            None => self.default_limit,
        };
        if limit > self.max_limit {
            return Err(TourDbError::InvalidDescriptor(format!(
                "limit {limit} exceeds the maximum of {}",
                self.max_limit
            )));
        }

        let mut descriptor = QueryDescriptor::new(page, limit);

        for param in &resource.filters {
            if let Some(raw) = query.get(&param.param).filter(|v| !v.is_empty()) {
                descriptor = descriptor.filter(param.to_filter(raw)?);
            }
        }

        if let Some(needle) = query.get(params::SEARCH_PARAM).map(|s| s.trim()) {
            if !needle.is_empty() && !resource.search_fields.is_empty() {
                descriptor = descriptor.filter(Filter::Search {
                    fields: resource.search_fields.clone(),
                    needle: needle.to_string(),
                });
            }
        }

        let direction = query
            .get(params::ORDER_PARAM)
            .map(|raw| raw.parse::<SortDirection>())
            .transpose()?;
        let sort = match query.get(params::SORT_PARAM).filter(|s| !s.is_empty()) {
            Some(field) => Some(resource.sort_key(field)),
            None => resource.default_sort.clone(),
        };
        if let Some(mut key) = sort {
            if direction.is_some() {
                key.direction = direction;
            }
            descriptor = descriptor.sort(key);
        }

        Ok(descriptor)
    }

    /// All records of a resource: the stored collection, or its derived
    /// view when the collection is empty.
    pub fn records(&self, store: &RecordStore, name: &str) -> Result<Snapshot> {
        let resource = self.resource(name)?;
        self.views.read_or_derive(store, &resource.name)
    }

    /// One page of a resource, with join labels attached to the page items.
    pub fn list(
        &self,
        store: &RecordStore,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<Page> {
        let resource = self.resource(name)?;
        let descriptor = self.descriptor(resource, params)?;
        let records = self.views.read_or_derive(store, &resource.name)?;

        let mut page = query::execute(&records, &descriptor)?;
        if !resource.joins.is_empty() {
            let joins = JoinSet::load(store, &resource.joins)?;
            for item in page.items.iter_mut() {
                let source = item.clone();
                joins.enrich(&resource.joins, &source, item);
            }
        }
        Ok(page)
    }

    /// One record by id, derived records included.
    pub fn get(&self, store: &RecordStore, name: &str, id: &str) -> Result<Record> {
        let resource = self.resource(name)?;
        let records = self.views.read_or_derive(store, &resource.name)?;
        let mut record = records
            .iter()
            .find(|r| r.has_id(id))
            .cloned()
            .ok_or_else(|| TourDbError::NotFound {
                collection: resource.name.clone(),
                id: id.to_string(),
            })?;

        if !resource.joins.is_empty() {
            let joins = JoinSet::load(store, &resource.joins)?;
            let source = record.clone();
            joins.enrich(&resource.joins, &source, &mut record);
        }
        Ok(record)
    }

    /// The resource's statistics over the records matching its filters.
    pub fn stats(
        &self,
        store: &RecordStore,
        name: &str,
        params: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        let resource = self.resource(name)?;
        let preset = resource.stats.ok_or_else(|| TourDbError::NotFound {
            collection: "stats".to_string(),
            id: name.to_string(),
        })?;

        let descriptor = self.descriptor(resource, params)?;
        let records = self.views.read_or_derive(store, &resource.name)?;
        let matching: Vec<Record> = records
            .iter()
            .filter(|r| descriptor.matches(r))
            .cloned()
            .collect();

        preset.compute(&matching, now, self.recent_window_days)
    }

    /// Store a new record from a JSON request body.
    pub fn create(&self, store: &RecordStore, name: &str, body: Value) -> Result<Record> {
        let resource = self.resource(name)?;
        let record = Record::from_value(body).ok_or_else(|| {
            TourDbError::Validation("request body must be a JSON object".into())
        })?;
        store.push(&resource.name, record)
    }

    /// Merge a JSON request body into an existing record.
    pub fn update(&self, store: &RecordStore, name: &str, id: &str, body: Value) -> Result<Record> {
        let resource = self.resource(name)?;
        let patch: Map<String, Value> = match body {
            Value::Object(map) => map,
            _ => {
                return Err(TourDbError::Validation(
                    "request body must be a JSON object".into(),
                ))
            }
        };
        store.update(&resource.name, id, patch)
    }

    pub fn remove(&self, store: &RecordStore, name: &str, id: &str) -> Result<Record> {
        let resource = self.resource(name)?;
        store.remove(&resource.name, id)
    }
}

/// Photos flattened out of each reservation's checkpoints.
fn tour_photos_view() -> DerivedView {
    DerivedView::new("tour_photos", "reservations", "checkpoints")
        .id_prefix("photo")
        .include(Inclusion::NonEmpty("photo_url".into()))
        .nested_field(FieldCopy::renamed("id", "checkpoint_id"))
        .nested_field(FieldCopy::renamed("name", "checkpoint_name"))
        .nested_field(FieldCopy::same("photo_url"))
        .nested_field(FieldCopy::same("caption"))
        .nested_field(FieldCopy::renamed("completed_at", "taken_at"))
        .parent_field(FieldCopy::renamed("id", "reservation_id"))
        .parent_field(FieldCopy::same("guide_id"))
        .parent_field(FieldCopy::same("service_id"))
        .parent_field(FieldCopy::same("agency_id"))
        .parent_field(FieldCopy::same("tour_date"))
        .enrich(Enrichment::new("service_id", "services", "name", "tour_name", "Tour"))
        .enrich(Enrichment::new("guide_id", "guides", "name", "guide_name", "Guía"))
        .enrich(Enrichment::new("agency_id", "agencies", "name", "agency_name", "Agencia"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn catalog() -> Catalog {
        Catalog::dashboard(&Config::default()).unwrap()
    }

    fn test_store() -> RecordStore {
        RecordStore::from_document(json!({
            "services": [{ "id": "s1", "name": "Volcano Tour" }],
            "guides": [
                { "id": "g1", "name": "Ana", "languages": ["es", "EN"], "active": true },
                { "id": "g2", "name": "Luis", "languages": ["es"], "active": false }
            ],
            "agencies": [],
            "reservations": [
                {
                    "id": "r1", "code": "RES-001", "client_name": "Carla", "status": "confirmed",
                    "tour_date": "2024-06-01", "service_id": "s1", "guide_id": "g1", "agency_id": "a1",
                    "participants": 2, "total_price": 120,
                    "checkpoints": [
                        { "id": "c1", "name": "Crater", "photo_url": "https://cdn/c1.jpg", "completed_at": "2024-06-01T10:00:00Z" },
                        { "id": "c2", "name": "Lagoon" }
                    ]
                },
                {
                    "id": "r2", "code": "RES-002", "client_name": "Pedro", "status": "cancelled",
                    "tour_date": "2024-06-05", "guide_id": "ghost", "participants": 4
                }
            ],
            "tour_photos": []
        }))
        .unwrap()
    }

    #[test]
    fn test_dashboard_resources() {
        let catalog = catalog();
        assert_eq!(
            catalog.names(),
            vec![
                "agencies", "files", "guides", "ratings", "reservations", "rewards", "services",
                "tour_photos", "vehicles"
            ]
        );
        assert!(catalog.views().get("tour_photos").is_some());
    }

    #[test]
    fn test_status_reports_view_dependencies() {
        let status = catalog().status(&test_store());
        assert_eq!(status["data_file"], Value::Null);
        assert_eq!(status["collections"]["reservations"], 2);
        assert_eq!(
            status["derived_views"],
            json!({
                "agencies": ["tour_photos"],
                "guides": ["tour_photos"],
                "reservations": ["tour_photos"],
                "services": ["tour_photos"]
            })
        );
    }

    #[test]
    fn test_unknown_resource_is_not_found() {
        let err = catalog().list(&test_store(), "spaceships", &params(&[])).unwrap_err();
        assert!(matches!(err, TourDbError::NotFound { .. }));
    }

    #[test]
    fn test_list_reservations_sorted_and_joined() {
        let page = catalog().list(&test_store(), "reservations", &params(&[])).unwrap();

        let ids: Vec<_> = page.items.iter().filter_map(Record::id_string).collect();
        assert_eq!(ids, vec!["r2", "r1"]);

        let r1 = &page.items[1];
        assert_eq!(r1.str_field("tour_name"), Some("Volcano Tour"));
        assert_eq!(r1.str_field("guide_name"), Some("Ana"));
        assert_eq!(r1.str_field("agency_name"), Some("Agencia"));
        assert_eq!(r1.str_field("vehicle_plate"), Some("Sin asignar"));

        let r2 = &page.items[0];
        assert_eq!(r2.str_field("guide_name"), Some("Guía"));
        assert_eq!(r2.str_field("tour_name"), Some("Tour"));
    }

    #[test]
    fn test_list_params() {
        let catalog = catalog();
        let store = test_store();

        let page = catalog
            .list(&store, "reservations", &params(&[("status", "confirmed")]))
            .unwrap();
        assert_eq!(page.pagination.total, 1);

        let page = catalog
            .list(&store, "reservations", &params(&[("search", "pedro")]))
            .unwrap();
        assert_eq!(page.items[0].id_string().as_deref(), Some("r2"));

        let page = catalog
            .list(&store, "reservations", &params(&[("sort", "code"), ("order", "desc")]))
            .unwrap();
        assert_eq!(page.items[0].str_field("code"), Some("RES-002"));

        let page = catalog
            .list(&store, "reservations", &params(&[("date_to", "2024-06-02")]))
            .unwrap();
        assert_eq!(page.pagination.total, 1);

        let page = catalog
            .list(&store, "guides", &params(&[("language", "en"), ("active", "true")]))
            .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.items[0].str_field("name"), Some("Ana"));
    }

    #[test]
    fn test_order_without_sort_applies_to_default_sort() {
        let page = catalog()
            .list(&test_store(), "reservations", &params(&[("order", "asc")]))
            .unwrap();
        let ids: Vec<_> = page.items.iter().filter_map(Record::id_string).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn test_invalid_params_are_descriptor_errors() {
        let catalog = catalog();
        let store = test_store();
        for bad in [
            params(&[("page", "0")]),
            params(&[("limit", "-5")]),
            params(&[("limit", "101")]),
            params(&[("order", "up")]),
            params(&[("date_from", "someday")]),
        ] {
            let err = catalog.list(&store, "reservations", &bad).unwrap_err();
            assert!(matches!(err, TourDbError::InvalidDescriptor(_)), "{bad:?}");
        }
    }

    #[test]
    fn test_photos_fall_back_to_checkpoints() {
        let catalog = catalog();
        let store = test_store();

        let page = catalog.list(&store, "tour_photos", &params(&[])).unwrap();
        assert_eq!(page.pagination.total, 1);
        let photo = &page.items[0];
        assert_eq!(photo.id_string().as_deref(), Some("photo-r1-c1"));
        assert_eq!(photo.str_field("tour_name"), Some("Volcano Tour"));
        assert_eq!(photo.str_field("taken_at"), Some("2024-06-01T10:00:00Z"));

        let fetched = catalog.get(&store, "tour_photos", "photo-r1-c1").unwrap();
        assert_eq!(&fetched, photo);
        assert!(store.get_collection("tour_photos").unwrap().is_empty());
    }

    #[test]
    fn test_get_missing_record() {
        let err = catalog().get(&test_store(), "guides", "g404").unwrap_err();
        assert!(matches!(err, TourDbError::NotFound { .. }));
    }

    #[test]
    fn test_stats_with_filters() {
        let catalog = catalog();
        let store = test_store();
        let now = crate::util::parse_instant("2024-06-10T00:00:00Z").unwrap();

        let stats = catalog.stats(&store, "reservations", &params(&[]), now).unwrap();
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["participantTotal"], 6);

        let stats = catalog
            .stats(&store, "reservations", &params(&[("status", "confirmed")]), now)
            .unwrap();
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["revenueTotal"], 120);

        let err = catalog.stats(&store, "guides", &params(&[]), now).unwrap_err();
        assert!(matches!(err, TourDbError::NotFound { .. }));
    }

    #[test]
    fn test_create_update_remove() {
        let catalog = catalog();
        let store = test_store();

        let created = catalog
            .create(&store, "vehicles", json!({ "plate": "XYZ-9", "capacity": 12 }))
            .unwrap();
        let id = created.id_string().unwrap();

        let updated = catalog
            .update(&store, "vehicles", &id, json!({ "capacity": 14 }))
            .unwrap();
        assert_eq!(updated.get("capacity"), Some(&json!(14)));

        let page = catalog
            .list(&store, "vehicles", &params(&[("capacity", "14")]))
            .unwrap();
        assert_eq!(page.pagination.total, 1);

        catalog.remove(&store, "vehicles", &id).unwrap();
        assert!(store.get_collection("vehicles").unwrap().is_empty());

        let err = catalog.create(&store, "vehicles", json!([1, 2])).unwrap_err();
        assert!(matches!(err, TourDbError::Validation(_)));
    }
}
