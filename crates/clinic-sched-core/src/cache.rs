//! Read-through cache in front of slot availability and aggregate queries.
//!
//! Two caches with independent TTLs: per-date busy intervals (feeding the
//! availability grid) and per-date status summaries. TTL bounds staleness for
//! readers that race a write; the write path itself never relies on expiry —
//! the lifecycle manager invalidates synchronously before its event completes.

use std::sync::Arc;

use chrono::NaiveDate;
use moka::sync::Cache;

use crate::config::ScheduleConfig;
use crate::db::DbResult;
use crate::models::{BusyInterval, DailySummary};

/// Shared read-mostly cache. Only the lifecycle manager invalidates it.
pub struct ScheduleCache {
    busy: Cache<NaiveDate, Arc<Vec<BusyInterval>>>,
    aggregates: Cache<NaiveDate, Arc<DailySummary>>,
}

impl ScheduleCache {
    pub fn new(config: &ScheduleConfig) -> Self {
        Self {
            busy: Cache::builder()
                .time_to_live(config.slot_cache_ttl)
                .max_capacity(512)
                .build(),
            aggregates: Cache::builder()
                .time_to_live(config.aggregate_cache_ttl)
                .max_capacity(512)
                .build(),
        }
    }

    /// Busy intervals for a date, computing and storing on miss.
    /// Concurrent misses may compute twice; last insert wins, both are correct.
    pub fn busy_intervals<F>(&self, date: NaiveDate, compute: F) -> DbResult<Arc<Vec<BusyInterval>>>
    where
        F: FnOnce() -> DbResult<Vec<BusyInterval>>,
    {
        if let Some(cached) = self.busy.get(&date) {
            return Ok(cached);
        }
        let value = Arc::new(compute()?);
        self.busy.insert(date, value.clone());
        Ok(value)
    }

    /// Daily status summary for a date, computing and storing on miss.
    pub fn daily_summary<F>(&self, date: NaiveDate, compute: F) -> DbResult<Arc<DailySummary>>
    where
        F: FnOnce() -> DbResult<DailySummary>,
    {
        if let Some(cached) = self.aggregates.get(&date) {
            return Ok(cached);
        }
        let value = Arc::new(compute()?);
        self.aggregates.insert(date, value.clone());
        Ok(value)
    }

    /// Drop the cached busy intervals for a date.
    pub fn invalidate_slots(&self, date: NaiveDate) {
        self.busy.invalidate(&date);
    }

    /// Drop the cached summary for a date.
    pub fn invalidate_aggregates(&self, date: NaiveDate) {
        self.aggregates.invalidate(&date);
    }
}
