// Query pipeline: filter, stable sort and paginate a collection snapshot

use crate::error::{Result, TourDbError};
use crate::record::Record;
use crate::util::instant_of;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

/// A single filter predicate over a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the value exactly. No coercion between kinds.
    Equals { field: String, value: Value },
    /// Case-insensitive containment: substring for strings, element match
    /// for arrays of strings.
    Contains { field: String, needle: String },
    /// Substring match against any of several string fields.
    Search { fields: Vec<String>, needle: String },
    /// Field parses as an instant within the inclusive bounds.
    Range {
        field: String,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Equals { field, value } => record.get(field) == Some(value),
            Filter::Contains { field, needle } => {
                let needle = needle.to_lowercase();
                match record.get(field) {
                    Some(Value::String(s)) => s.to_lowercase().contains(&needle),
                    Some(Value::Array(items)) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|item| item.to_lowercase() == needle),
                    _ => false,
                }
            }
            Filter::Search { fields, needle } => {
                let needle = needle.to_lowercase();
                fields.iter().any(|field| {
                    record
                        .str_field(field)
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            }
            Filter::Range { field, from, to } => {
                match record.get(field).and_then(instant_of) {
                    Some(instant) => {
                        from.map_or(true, |f| instant >= f) && to.map_or(true, |t| instant <= t)
                    }
                    None => false,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = TourDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(TourDbError::InvalidDescriptor(format!(
                "sort direction must be 'asc' or 'desc', got '{other}'"
            ))),
        }
    }
}

/// Sort key. Temporal keys compare by parsed instant and default to
/// newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: Option<SortDirection>,
    pub temporal: bool,
}

impl SortKey {
    pub fn field(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            direction: None,
            temporal: false,
        }
    }

    pub fn time(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            direction: None,
            temporal: true,
        }
    }

    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn effective_direction(&self) -> SortDirection {
        match (self.direction, self.temporal) {
            (Some(d), _) => d,
            (None, true) => SortDirection::Desc,
            (None, false) => SortDirection::Asc,
        }
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let direction = self.effective_direction();
        if self.temporal {
            // Unparseable timestamps sort with the absent ones.
            let a = a.get(&self.field).and_then(instant_of);
            let b = b.get(&self.field).and_then(instant_of);
            absent_last(a, b, |x, y| x.cmp(y), direction)
        } else {
            absent_last(
                a.defined(&self.field),
                b.defined(&self.field),
                |x: &&Value, y: &&Value| compare_values(x, y),
                direction,
            )
        }
    }
}

/// Present values come before absent ones whatever the direction.
fn absent_last<T>(
    a: Option<T>,
    b: Option<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
    direction: SortDirection,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => match direction {
            SortDirection::Asc => cmp(&x, &y),
            SortDirection::Desc => cmp(&x, &y).reverse(),
        },
    }
}

/// Total order over JSON values: date-like strings compare as instants and
/// rank ahead of other strings, which compare lexically.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => match (instant_of(a), instant_of(b)) {
            (Some(t), Some(u)) => t.cmp(&u),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Filter, sort and pagination parameters for one read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    filters: Vec<Filter>,
    sort: Option<SortKey>,
    page: usize,
    limit: usize,
}

impl QueryDescriptor {
    /// A descriptor with no filters and no sort. `page` is 1-based.
    pub fn new(page: usize, limit: usize) -> Self {
        QueryDescriptor {
            filters: Vec::new(),
            sort: None,
            page,
            limit,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn sort_key(&self) -> Option<&SortKey> {
        self.sort.as_ref()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(TourDbError::InvalidDescriptor(
                "page must be a positive integer".into(),
            ));
        }
        if self.limit == 0 {
            return Err(TourDbError::InvalidDescriptor(
                "limit must be a positive integer".into(),
            ));
        }
        for filter in &self.filters {
            let empty_field = match filter {
                Filter::Equals { field, .. }
                | Filter::Contains { field, .. }
                | Filter::Range { field, .. } => field.is_empty(),
                Filter::Search { fields, .. } => {
                    fields.is_empty() || fields.iter().any(String::is_empty)
                }
            };
            if empty_field {
                return Err(TourDbError::InvalidDescriptor(
                    "filter field names must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    fn compute(page: usize, limit: usize, total: usize) -> Self {
        let total_pages = total.div_ceil(limit);
        Pagination {
            page,
            limit,
            total,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub items: Vec<Record>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

/// Run a query over a snapshot. Stored order is never mutated; sorting is
/// stable so ties keep their original relative order.
pub fn execute(records: &[Record], query: &QueryDescriptor) -> Result<Page> {
    query.validate()?;

    let mut matched: Vec<&Record> = records.iter().filter(|r| query.matches(r)).collect();
    if let Some(key) = &query.sort {
        matched.sort_by(|a, b| key.compare(a, b));
    }

    let total = matched.len();
    let start = (query.page - 1).saturating_mul(query.limit);
    let items = if start >= total {
        Vec::new()
    } else {
        let end = start.saturating_add(query.limit).min(total);
        matched[start..end].iter().map(|r| (*r).clone()).collect()
    };

    log::debug!(
        "Query matched {total} of {} records, returning {} (page {})",
        records.len(),
        items.len(),
        query.page
    );

    Ok(Page {
        items,
        pagination: Pagination::compute(query.page, query.limit, total),
    })
}
