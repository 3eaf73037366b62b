//! Scheduling configuration.

use chrono::Duration;

/// Tunables for the scheduling core. All times are UTC.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// First bookable hour of the day
    pub open_hour: u32,
    /// Hour the clinic closes; slots must end at or before this
    pub close_hour: u32,
    /// Slot grid granularity in minutes
    pub slot_minutes: i64,
    /// Duration used when a booking request omits one
    pub default_duration_minutes: i64,
    /// Failed delivery attempts before a reminder becomes terminally `failed`
    pub max_delivery_retries: u32,
    /// Base delay before the first retry; doubles per subsequent attempt
    pub retry_backoff_base: Duration,
    /// TTL for the per-date busy-interval cache
    pub slot_cache_ttl: std::time::Duration,
    /// TTL for the per-date aggregate summary cache
    pub aggregate_cache_ttl: std::time::Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 18,
            slot_minutes: 30,
            default_duration_minutes: 60,
            max_delivery_retries: 3,
            retry_backoff_base: Duration::minutes(5),
            slot_cache_ttl: std::time::Duration::from_secs(120),
            aggregate_cache_ttl: std::time::Duration::from_secs(60),
        }
    }
}

impl ScheduleConfig {
    /// Minutes the clinic is open per day; the longest bookable duration.
    pub fn open_minutes(&self) -> i64 {
        i64::from(self.close_hour - self.open_hour) * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScheduleConfig::default();
        assert_eq!(config.open_hour, 9);
        assert_eq!(config.close_hour, 18);
        assert_eq!(config.open_minutes(), 540);
    }
}
