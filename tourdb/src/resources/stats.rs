// Statistics presets served by the dashboard's stats endpoints

use crate::aggregate::{self, AggregationDescriptor, GroupKey, Reducer, StatsDescriptor};
use crate::error::Result;
use crate::record::Record;
use crate::util::number_value;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Which statistics shape a resource serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPreset {
    Files,
    Reservations,
    Ratings,
    Photos,
    Rewards,
}

impl StatsPreset {
    pub fn compute(self, records: &[Record], now: DateTime<Utc>, recent_days: u32) -> Result<Value> {
        match self {
            StatsPreset::Files => file_stats(records, now, recent_days),
            StatsPreset::Reservations => reservation_stats(records, now),
            StatsPreset::Ratings => rating_stats(records, now),
            StatsPreset::Photos => photo_stats(records, now),
            StatsPreset::Rewards => reward_stats(records, now),
        }
    }
}

fn file_stats(records: &[Record], now: DateTime<Utc>, recent_days: u32) -> Result<Value> {
    let descriptor = StatsDescriptor::new()
        .status("status", "active", "deleted")
        .sum("size", "total_size")
        .breakdown("category", "by_category")
        .breakdown("type", "by_type")
        .recent("uploaded_at", recent_days);
    let stats = aggregate::statistics(records, &descriptor, now)?;

    Ok(json!({
        "total_files": stats.total,
        "active_files": stats.active,
        "deleted_files": stats.inactive,
        "total_size": stats.sum("total_size"),
        "by_category": stats.breakdown("by_category"),
        "by_type": stats.breakdown("by_type"),
        "recent_uploads": stats.recent,
    }))
}

fn reservation_stats(records: &[Record], now: DateTime<Utc>) -> Result<Value> {
    let descriptor = StatsDescriptor::new()
        .sum("participants", "participantTotal")
        .sum("total_price", "revenueTotal")
        .breakdown("status", "by_status");
    let stats = aggregate::statistics(records, &descriptor, now)?;

    let daily = AggregationDescriptor::new(GroupKey::DatePortion("tour_date".into()))
        .reduce(Reducer::Count)
        .reduce(Reducer::sum("participants", "participantTotal"))
        .reduce(Reducer::sum("total_price", "revenueTotal"));
    let by_date = aggregate::group(records, &daily)?;

    Ok(json!({
        "total": stats.total,
        "by_status": stats.breakdown("by_status"),
        "participantTotal": stats.sum("participantTotal"),
        "revenueTotal": stats.sum("revenueTotal"),
        "by_date": by_date,
    }))
}

fn rating_stats(records: &[Record], now: DateTime<Utc>) -> Result<Value> {
    let descriptor = StatsDescriptor::new().breakdown("rating", "by_score");
    let stats = aggregate::statistics(records, &descriptor, now)?;

    let per_guide = AggregationDescriptor::new(GroupKey::Field("guide_id".into()))
        .reduce(Reducer::average("rating", "average"));
    let by_guide = aggregate::group(records, &per_guide)?;

    Ok(json!({
        "total": stats.total,
        "average": number_value(aggregate::average(records, "rating")),
        "by_score": stats.breakdown("by_score"),
        "by_guide": by_guide,
    }))
}

fn photo_stats(records: &[Record], now: DateTime<Utc>) -> Result<Value> {
    let descriptor = StatsDescriptor::new().breakdown("guide_name", "by_guide");
    let stats = aggregate::statistics(records, &descriptor, now)?;

    let daily = AggregationDescriptor::new(GroupKey::DatePortion("taken_at".into()))
        .reduce(Reducer::Count)
        .reduce(Reducer::distinct("reservation_id", "reservations"));
    let by_date = aggregate::group(records, &daily)?;

    Ok(json!({
        "total": stats.total,
        "by_date": by_date,
        "by_guide": stats.breakdown("by_guide"),
    }))
}

fn reward_stats(records: &[Record], now: DateTime<Utc>) -> Result<Value> {
    let descriptor = StatsDescriptor::new()
        .status("status", "active", "redeemed")
        .sum("points", "points_total")
        .breakdown("type", "by_type");
    let stats = aggregate::statistics(records, &descriptor, now)?;

    Ok(json!({
        "total": stats.total,
        "active": stats.active,
        "redeemed": stats.inactive,
        "points_total": stats.sum("points_total"),
        "by_type": stats.breakdown("by_type"),
    }))
}
