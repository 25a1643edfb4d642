// Aggregation engine - grouped reductions and whole-set statistics

use crate::error::{Result, TourDbError};
use crate::record::Record;
use crate::util::{instant_of, number_value, scalar_string};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

type KeyFn = Arc<dyn Fn(&Record) -> Option<String> + Send + Sync>;

/// How a record maps to its group. Records without a key are left out.
#[derive(Clone)]
pub enum GroupKey {
    /// Field value verbatim (numbers and booleans rendered as text)
    Field(String),
    /// `YYYY-MM-DD` of a timestamp field
    DatePortion(String),
    /// `YYYY-MM` of a timestamp field
    MonthPortion(String),
    Custom(KeyFn),
}

impl GroupKey {
    pub fn custom(f: impl Fn(&Record) -> Option<String> + Send + Sync + 'static) -> Self {
        GroupKey::Custom(Arc::new(f))
    }

    pub fn key_of(&self, record: &Record) -> Option<String> {
        match self {
            GroupKey::Field(field) => record.defined(field).and_then(scalar_string),
            GroupKey::DatePortion(field) => record
                .get(field)
                .and_then(instant_of)
                .map(|t| t.format("%Y-%m-%d").to_string()),
            GroupKey::MonthPortion(field) => record
                .get(field)
                .and_then(instant_of)
                .map(|t| t.format("%Y-%m").to_string()),
            GroupKey::Custom(f) => f(record),
        }
    }

    fn field_name(&self) -> Option<&str> {
        match self {
            GroupKey::Field(f) | GroupKey::DatePortion(f) | GroupKey::MonthPortion(f) => Some(f),
            GroupKey::Custom(_) => None,
        }
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Field(field) => f.debug_tuple("Field").field(field).finish(),
            GroupKey::DatePortion(field) => f.debug_tuple("DatePortion").field(field).finish(),
            GroupKey::MonthPortion(field) => f.debug_tuple("MonthPortion").field(field).finish(),
            GroupKey::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A per-group reduction. Every group summary carries `count` regardless.
#[derive(Debug, Clone, PartialEq)]
pub enum Reducer {
    Count,
    Sum { field: String, alias: String },
    DistinctCount { field: String, alias: String },
    Average { field: String, alias: String },
}

impl Reducer {
    pub fn sum(field: &str, alias: &str) -> Self {
        Reducer::Sum {
            field: field.into(),
            alias: alias.into(),
        }
    }

    pub fn distinct(field: &str, alias: &str) -> Self {
        Reducer::DistinctCount {
            field: field.into(),
            alias: alias.into(),
        }
    }

    pub fn average(field: &str, alias: &str) -> Self {
        Reducer::Average {
            field: field.into(),
            alias: alias.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregationDescriptor {
    pub key: GroupKey,
    pub reducers: Vec<Reducer>,
}

impl AggregationDescriptor {
    pub fn new(key: GroupKey) -> Self {
        AggregationDescriptor {
            key,
            reducers: Vec::new(),
        }
    }

    pub fn reduce(mut self, reducer: Reducer) -> Self {
        self.reducers.push(reducer);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.field_name().is_some_and(str::is_empty) {
            return Err(TourDbError::InvalidDescriptor(
                "group key field must not be empty".into(),
            ));
        }
        if self.reducers.is_empty() {
            return Err(TourDbError::InvalidDescriptor(
                "aggregation needs at least one reducer".into(),
            ));
        }
        for reducer in &self.reducers {
            match reducer {
                Reducer::Count => {}
                Reducer::Sum { field, alias }
                | Reducer::DistinctCount { field, alias }
                | Reducer::Average { field, alias } => {
                    if field.is_empty() || alias.is_empty() {
                        return Err(TourDbError::InvalidDescriptor(
                            "reducer field and alias must not be empty".into(),
                        ));
                    }
                    if alias == "count" {
                        return Err(TourDbError::InvalidDescriptor(
                            "reducer alias 'count' is reserved".into(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Reduced values for one group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub count: usize,
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    sums: Vec<f64>,
    distinct: Vec<BTreeSet<String>>,
}

/// Group records by key and reduce each group. Groups only exist for keys
/// at least one record produced.
pub fn group(
    records: &[Record],
    descriptor: &AggregationDescriptor,
) -> Result<BTreeMap<String, GroupSummary>> {
    descriptor.validate()?;
    let reducers = &descriptor.reducers;

    let mut groups: BTreeMap<String, Accumulator> = BTreeMap::new();
    for record in records {
        let key = match descriptor.key.key_of(record) {
            Some(k) => k,
            None => continue,
        };
        let acc = groups.entry(key).or_insert_with(|| Accumulator {
            count: 0,
            sums: vec![0.0; reducers.len()],
            distinct: vec![BTreeSet::new(); reducers.len()],
        });
        acc.count += 1;
        for (i, reducer) in reducers.iter().enumerate() {
            match reducer {
                Reducer::Count => {}
                Reducer::Sum { field, .. } | Reducer::Average { field, .. } => {
                    acc.sums[i] += record.number_or_zero(field);
                }
                Reducer::DistinctCount { field, .. } => {
                    if let Some(v) = record.defined(field).and_then(scalar_string) {
                        acc.distinct[i].insert(v);
                    }
                }
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, acc)| {
            let mut values = BTreeMap::new();
            for (i, reducer) in reducers.iter().enumerate() {
                match reducer {
                    Reducer::Count => {}
                    Reducer::Sum { alias, .. } => {
                        values.insert(alias.clone(), number_value(acc.sums[i]));
                    }
                    Reducer::Average { alias, .. } => {
                        let avg = acc.sums[i] / acc.count as f64;
                        values.insert(alias.clone(), number_value(round2(avg)));
                    }
                    Reducer::DistinctCount { alias, .. } => {
                        values.insert(alias.clone(), Value::from(acc.distinct[i].len()));
                    }
                }
            }
            (
                key,
                GroupSummary {
                    count: acc.count,
                    values,
                },
            )
        })
        .collect())
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

/// Average of a numeric field over all records, missing values read as zero.
/// An empty set averages to zero.
pub fn average(records: &[Record], field: &str) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let sum: f64 = records.iter().map(|r| r.number_or_zero(field)).sum();
    round2(sum / records.len() as f64)
}

/// Sum of a numeric field over all records, missing values read as zero.
pub fn sum(records: &[Record], field: &str) -> f64 {
    records.iter().map(|r| r.number_or_zero(field)).sum()
}

/// Split of records into active and inactive by a status field
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSplit {
    pub field: String,
    pub active: Value,
    pub inactive: Value,
}

/// Count of records whose timestamp lies within the last `days` days
#[derive(Debug, Clone, PartialEq)]
pub struct RecentWindow {
    pub field: String,
    pub days: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsDescriptor {
    pub status: Option<StatusSplit>,
    /// (field, alias)
    pub sums: Vec<(String, String)>,
    /// (field, alias)
    pub breakdowns: Vec<(String, String)>,
    pub recent: Option<RecentWindow>,
}

impl StatsDescriptor {
    pub fn new() -> Self {
        StatsDescriptor::default()
    }

    pub fn status(mut self, field: &str, active: impl Into<Value>, inactive: impl Into<Value>) -> Self {
        self.status = Some(StatusSplit {
            field: field.into(),
            active: active.into(),
            inactive: inactive.into(),
        });
        self
    }

    pub fn sum(mut self, field: &str, alias: &str) -> Self {
        self.sums.push((field.into(), alias.into()));
        self
    }

    pub fn breakdown(mut self, field: &str, alias: &str) -> Self {
        self.breakdowns.push((field.into(), alias.into()));
        self
    }

    pub fn recent(mut self, field: &str, days: u32) -> Self {
        self.recent = Some(RecentWindow {
            field: field.into(),
            days,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fields = self
            .sums
            .iter()
            .chain(&self.breakdowns)
            .flat_map(|(f, a)| [f, a])
            .chain(self.status.as_ref().map(|s| &s.field))
            .chain(self.recent.as_ref().map(|r| &r.field));
        for field in fields {
            if field.is_empty() {
                return Err(TourDbError::InvalidDescriptor(
                    "statistics field names must not be empty".into(),
                ));
            }
        }
        if self.recent.as_ref().is_some_and(|r| r.days == 0) {
            return Err(TourDbError::InvalidDescriptor(
                "recent window must span at least one day".into(),
            ));
        }
        Ok(())
    }
}

/// Whole-set statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetStatistics {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub sums: BTreeMap<String, Value>,
    pub breakdowns: BTreeMap<String, BTreeMap<String, usize>>,
    pub recent: usize,
}

impl SetStatistics {
    pub fn sum(&self, alias: &str) -> Value {
        self.sums.get(alias).cloned().unwrap_or_else(|| Value::from(0))
    }

    pub fn breakdown(&self, alias: &str) -> BTreeMap<String, usize> {
        self.breakdowns.get(alias).cloned().unwrap_or_default()
    }
}

/// Compute whole-set statistics as of `now`.
pub fn statistics(
    records: &[Record],
    descriptor: &StatsDescriptor,
    now: DateTime<Utc>,
) -> Result<SetStatistics> {
    descriptor.validate()?;

    let (active, inactive) = match &descriptor.status {
        Some(split) => (
            records
                .iter()
                .filter(|r| r.get(&split.field) == Some(&split.active))
                .count(),
            records
                .iter()
                .filter(|r| r.get(&split.field) == Some(&split.inactive))
                .count(),
        ),
        None => (0, 0),
    };

    let sums = descriptor
        .sums
        .iter()
        .map(|(field, alias)| (alias.clone(), number_value(sum(records, field))))
        .collect();

    let mut breakdowns = BTreeMap::new();
    for (field, alias) in &descriptor.breakdowns {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for key in records.iter().filter_map(|r| r.defined(field).and_then(scalar_string)) {
            *counts.entry(key).or_insert(0) += 1;
        }
        breakdowns.insert(alias.clone(), counts);
    }

    let recent = match &descriptor.recent {
        Some(window) => {
            // A window reaching past the representable range starts at the earliest instant.
            let since = now
                .checked_sub_signed(Duration::days(i64::from(window.days)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            records
                .iter()
                .filter_map(|r| r.get(&window.field).and_then(instant_of))
                .filter(|t| *t >= since && *t <= now)
                .count()
        }
        None => 0,
    };

    Ok(SetStatistics {
        total: records.len(),
        active,
        inactive,
        sums,
        breakdowns,
        recent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::parse_instant;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn reservations() -> Vec<Record> {
        vec![
            record(json!({ "id": 1, "date": "2024-06-01T09:00:00Z", "participants": 4, "total": 200, "guide_id": "g1" })),
            record(json!({ "id": 2, "date": "2024-06-01 15:30:00", "participants": "2", "total": 90.5, "guide_id": "g2" })),
            record(json!({ "id": 3, "date": "2024-06-02", "participants": null, "total": "n/a", "guide_id": "g1" })),
            record(json!({ "id": 4, "date": "not a date", "participants": 10 })),
            record(json!({ "id": 5, "participants": 1 })),
        ]
    }

    fn daily() -> AggregationDescriptor {
        AggregationDescriptor::new(GroupKey::DatePortion("date".into()))
            .reduce(Reducer::Count)
            .reduce(Reducer::sum("participants", "participantTotal"))
            .reduce(Reducer::sum("total", "revenueTotal"))
            .reduce(Reducer::distinct("guide_id", "guides"))
    }

    #[test]
    fn test_group_by_date_portion() {
        let groups = group(&reservations(), &daily()).unwrap();

        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["2024-06-01", "2024-06-02"]);
        let first = &groups["2024-06-01"];
        assert_eq!(first.count, 2);
        assert_eq!(first.values["participantTotal"], json!(6));
        assert_eq!(first.values["revenueTotal"], json!(290.5));
        assert_eq!(first.values["guides"], json!(2));

        let second = &groups["2024-06-02"];
        assert_eq!(second.count, 1);
        assert_eq!(second.values["participantTotal"], json!(0));
        assert_eq!(second.values["revenueTotal"], json!(0));
    }

    #[test]
    fn test_group_counts_match_defined_keys() {
        let records = reservations();
        for key in [
            GroupKey::DatePortion("date".into()),
            GroupKey::Field("guide_id".into()),
            GroupKey::MonthPortion("date".into()),
        ] {
            let descriptor = AggregationDescriptor::new(key.clone()).reduce(Reducer::Count);
            let groups = group(&records, &descriptor).unwrap();
            let grouped: usize = groups.values().map(|g| g.count).sum();
            let defined = records.iter().filter(|r| key.key_of(r).is_some()).count();
            assert_eq!(grouped, defined, "{key:?}");
        }
    }

    #[test]
    fn test_group_summary_serializes_flat() {
        let groups = group(&reservations(), &daily()).unwrap();
        let value = serde_json::to_value(&groups["2024-06-02"]).unwrap();
        assert_eq!(
            value,
            json!({ "count": 1, "participantTotal": 0, "revenueTotal": 0, "guides": 1 })
        );
    }

    #[test]
    fn test_custom_key_and_average() {
        let ratings = vec![
            record(json!({ "score": 5, "guide_id": "g1" })),
            record(json!({ "score": 4, "guide_id": "g1" })),
            record(json!({ "score": 3, "guide_id": "g2" })),
        ];
        let descriptor = AggregationDescriptor::new(GroupKey::custom(|r| {
            r.str_field("guide_id").map(|g| g.to_uppercase())
        }))
        .reduce(Reducer::average("score", "average"));
        let groups = group(&ratings, &descriptor).unwrap();
        assert_eq!(groups["G1"].values["average"], json!(4.5));
        assert_eq!(groups["G2"].values["average"], json!(3));
        assert_eq!(average(&ratings, "score"), 4.0);
        assert_eq!(average(&[], "score"), 0.0);
    }

    #[test]
    fn test_invalid_aggregation_descriptors() {
        let no_reducers = AggregationDescriptor::new(GroupKey::Field("x".into()));
        assert!(matches!(group(&[], &no_reducers), Err(TourDbError::InvalidDescriptor(_))));

        let empty_key = AggregationDescriptor::new(GroupKey::Field(String::new())).reduce(Reducer::Count);
        assert!(group(&[], &empty_key).is_err());

        let reserved = AggregationDescriptor::new(GroupKey::Field("x".into()))
            .reduce(Reducer::sum("amount", "count"));
        assert!(group(&[], &reserved).is_err());
    }

    fn file_stats() -> StatsDescriptor {
        StatsDescriptor::new()
            .status("status", "active", "deleted")
            .sum("size", "total_size")
            .breakdown("category", "by_category")
            .breakdown("type", "by_type")
            .recent("uploaded_at", 7)
    }

    #[test]
    fn test_statistics_over_zero_records() {
        let now = parse_instant("2024-06-10T00:00:00Z").unwrap();
        let stats = statistics(&[], &file_stats(), now).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.inactive, 0);
        assert_eq!(stats.sum("total_size"), json!(0));
        assert!(stats.breakdown("by_category").is_empty());
        assert!(stats.breakdown("by_type").is_empty());
        assert_eq!(stats.recent, 0);
    }

    #[test]
    fn test_statistics() {
        let files = vec![
            record(json!({ "status": "active", "size": 100, "category": "profiles", "type": "image", "uploaded_at": "2024-06-09T10:00:00Z" })),
            record(json!({ "status": "active", "size": "50", "category": "profiles", "type": "pdf", "uploaded_at": "2024-06-01T10:00:00Z" })),
            record(json!({ "status": "deleted", "size": null, "category": "tours", "uploaded_at": "2024-06-11T10:00:00Z" })),
            record(json!({ "status": "archived", "category": null, "type": "image" })),
        ];
        let now = parse_instant("2024-06-10T00:00:00Z").unwrap();
        let stats = statistics(&files, &file_stats(), now).unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.sum("total_size"), json!(150));
        assert_eq!(
            stats.breakdown("by_category"),
            BTreeMap::from([("profiles".to_string(), 2), ("tours".to_string(), 1)])
        );
        assert_eq!(
            stats.breakdown("by_type"),
            BTreeMap::from([("image".to_string(), 2), ("pdf".to_string(), 1)])
        );
        // 2024-06-01 is nine days back and 2024-06-11 is in the future.
        assert_eq!(stats.recent, 1);
    }

    #[test]
    fn test_zero_day_window_is_invalid() {
        let descriptor = StatsDescriptor::new().recent("uploaded_at", 0);
        assert!(statistics(&[], &descriptor, Utc::now()).is_err());
    }

    #[test]
    fn test_oversized_window_counts_everything_past() {
        let records = vec![
            record(json!({ "uploaded_at": "1970-01-01T00:00:00Z" })),
            record(json!({ "uploaded_at": "2024-06-09T00:00:00Z" })),
            record(json!({ "uploaded_at": "2999-01-01T00:00:00Z" })),
        ];
        let now = parse_instant("2024-06-10T00:00:00Z").unwrap();
        let descriptor = StatsDescriptor::new().recent("uploaded_at", u32::MAX);
        let stats = statistics(&records, &descriptor, now).unwrap();
        assert_eq!(stats.recent, 2);
    }
}
