// Query-string parameters to query descriptors

use crate::error::{Result, TourDbError};
use crate::query::Filter;
use crate::util::parse_instant;
use serde_json::Value;

pub const PAGE_PARAM: &str = "page";
pub const LIMIT_PARAM: &str = "limit";
pub const SORT_PARAM: &str = "sort";
pub const ORDER_PARAM: &str = "order";
pub const SEARCH_PARAM: &str = "search";

/// How a declared query parameter becomes a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Exact string equality
    Text,
    /// Exact numeric equality
    Number,
    /// `true` / `false`
    Bool,
    /// Case-insensitive containment
    Contains,
    /// Lower instant bound, inclusive
    From,
    /// Upper instant bound, inclusive
    To,
}

/// A query parameter a resource accepts, bound to the record field it filters.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParam {
    pub param: String,
    pub field: String,
    pub kind: ParamKind,
}

impl FilterParam {
    pub fn new(param: &str, field: &str, kind: ParamKind) -> Self {
        FilterParam {
            param: param.to_string(),
            field: field.to_string(),
            kind,
        }
    }

    /// Parameter and field share a name.
    pub fn on(field: &str, kind: ParamKind) -> Self {
        FilterParam::new(field, field, kind)
    }

    /// Build the filter for a raw parameter value.
    pub fn to_filter(&self, raw: &str) -> Result<Filter> {
        let field = self.field.clone();
        let filter = match self.kind {
            ParamKind::Text => Filter::Equals {
                field,
                value: Value::String(raw.to_string()),
            },
            ParamKind::Number => Filter::Equals {
                field,
                value: parse_number(&self.param, raw)?,
            },
            ParamKind::Bool => Filter::Equals {
                field,
                value: Value::Bool(parse_bool(&self.param, raw)?),
            },
            ParamKind::Contains => Filter::Contains {
                field,
                needle: raw.to_string(),
            },
            ParamKind::From => Filter::Range {
                field,
                from: Some(parse_bound(&self.param, raw)?),
                to: None,
            },
            ParamKind::To => Filter::Range {
                field,
                from: None,
                to: Some(parse_bound(&self.param, raw)?),
            },
        };
        Ok(filter)
    }
}

/// Parse a 1-based positive integer such as `page` or `limit`.
pub fn parse_positive(name: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => usize::try_from(n).map_err(|_| invalid(name, raw)),
        _ => Err(invalid(name, raw)),
    }
}

fn parse_number(name: &str, raw: &str) -> Result<Value> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Value::from(n));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| invalid(name, raw))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(invalid(name, raw)),
    }
}

fn parse_bound(name: &str, raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    parse_instant(raw).ok_or_else(|| invalid(name, raw))
}

fn invalid(name: &str, raw: &str) -> TourDbError {
    TourDbError::InvalidDescriptor(format!("invalid value for '{name}': '{raw}'"))
}
