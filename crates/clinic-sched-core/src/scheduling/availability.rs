//! Slot availability: the free/busy overlay for the single shared chair.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SchedulingError, SchedulingResult};
use crate::cache::ScheduleCache;
use crate::config::ScheduleConfig;
use crate::db::Database;
use crate::models::BusyInterval;

/// A bookable grid position for a given date and duration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    /// Candidate start time
    pub start: DateTime<Utc>,
    /// Whether an appointment of the requested duration fits here
    pub available: bool,
}

/// Computes which time slots are free by overlaying active appointments.
/// Reads go through the per-date busy-interval cache.
pub struct SlotAvailabilityEngine<'a> {
    db: &'a Database,
    cache: &'a ScheduleCache,
    config: &'a ScheduleConfig,
}

impl<'a> SlotAvailabilityEngine<'a> {
    pub fn new(db: &'a Database, cache: &'a ScheduleCache, config: &'a ScheduleConfig) -> Self {
        Self { db, cache, config }
    }

    /// The fixed grid for a date with each slot's availability for the given
    /// duration. Slots that would start before `now` are unavailable; slots
    /// that would run past closing are not generated.
    pub fn available_slots(
        &self,
        date: NaiveDate,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> SchedulingResult<Vec<Slot>> {
        self.validate_duration(duration_minutes)?;
        let busy = self.busy_intervals(date)?;
        let duration = Duration::minutes(duration_minutes);
        let (open, close) = self.day_window(date)?;

        let mut slots = Vec::new();
        let mut start = open;
        while start + duration <= close {
            let end = start + duration;
            let available = start >= now && !busy.iter().any(|b| b.overlaps(start, end));
            slots.push(Slot { start, available });
            start += Duration::minutes(self.config.slot_minutes);
        }

        debug!(
            date = %date,
            duration_minutes,
            free = slots.iter().filter(|s| s.available).count(),
            total = slots.len(),
            "computed slot availability"
        );
        Ok(slots)
    }

    /// Probe a candidate interval against active appointments on its date.
    /// Returns the first competing busy interval, or `None` when free.
    /// `exclude_appointment_id` lets a reschedule ignore its own row.
    pub fn has_conflict(
        &self,
        start: DateTime<Utc>,
        duration_minutes: i64,
        exclude_appointment_id: Option<&str>,
    ) -> SchedulingResult<Option<BusyInterval>> {
        self.validate_duration(duration_minutes)?;
        let end = start + Duration::minutes(duration_minutes);
        let busy = self.busy_intervals(start.date_naive())?;

        let hit = busy
            .iter()
            .filter(|b| exclude_appointment_id != Some(b.appointment_id.as_str()))
            .find(|b| b.overlaps(start, end))
            .cloned();

        if let Some(competing) = &hit {
            debug!(
                requested_start = %start,
                competing_start = %competing.start,
                competing_end = %competing.end,
                "booking conflict detected"
            );
        }
        Ok(hit)
    }

    /// Free same-day slots ordered by proximity to the requested start.
    /// Offered to callers whose booking attempt collided.
    pub fn suggest_alternatives(
        &self,
        requested_start: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulingResult<Vec<Slot>> {
        let mut free: Vec<Slot> = self
            .available_slots(requested_start.date_naive(), duration_minutes, now)?
            .into_iter()
            .filter(|s| s.available)
            .collect();

        free.sort_by_key(|s| {
            (s.start - requested_start)
                .num_minutes()
                .abs()
        });
        free.truncate(limit);
        Ok(free)
    }

    /// A bookable interval must lie entirely within one business day. This
    /// keeps every occupied interval on the same date as its start, which the
    /// per-date busy-interval probe and cache depend on: an interval crossing
    /// midnight would be invisible to the next day's conflict check.
    pub fn validate_within_hours(
        &self,
        start: DateTime<Utc>,
        duration_minutes: i64,
    ) -> SchedulingResult<()> {
        self.validate_duration(duration_minutes)?;
        let (open, close) = self.day_window(start.date_naive())?;
        let end = start + Duration::minutes(duration_minutes);
        if start < open || end > close {
            return Err(SchedulingError::Validation(format!(
                "appointment from {} to {} falls outside business hours",
                start, end
            )));
        }
        Ok(())
    }

    /// Zero-length, negative, or longer-than-the-business-day durations are
    /// malformed.
    fn validate_duration(&self, duration_minutes: i64) -> SchedulingResult<()> {
        if duration_minutes <= 0 {
            return Err(SchedulingError::Validation(format!(
                "duration must be positive, got {} minutes",
                duration_minutes
            )));
        }
        if duration_minutes > self.config.open_minutes() {
            return Err(SchedulingError::Validation(format!(
                "duration of {} minutes exceeds the business day",
                duration_minutes
            )));
        }
        Ok(())
    }

    fn day_window(&self, date: NaiveDate) -> SchedulingResult<(DateTime<Utc>, DateTime<Utc>)> {
        let open = date
            .and_hms_opt(self.config.open_hour, 0, 0)
            .ok_or_else(|| SchedulingError::Validation("invalid business hours".into()))?
            .and_utc();
        let close = date
            .and_hms_opt(self.config.close_hour, 0, 0)
            .ok_or_else(|| SchedulingError::Validation("invalid business hours".into()))?
            .and_utc();
        Ok((open, close))
    }

    fn busy_intervals(&self, date: NaiveDate) -> SchedulingResult<Arc<Vec<BusyInterval>>> {
        let intervals = self.cache.busy_intervals(date, || {
            let appointments = self.db.list_active_appointments_for_date(date)?;
            Ok(appointments.iter().map(|a| a.busy_interval()).collect())
        })?;
        Ok(intervals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Appointment, Patient};
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 10, h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 10).unwrap()
    }

    /// A `now` long before the test date so no slot is past.
    fn early() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
    }

    struct Fixture {
        db: Database,
        cache: ScheduleCache,
        config: ScheduleConfig,
        patient_id: String,
    }

    fn setup() -> Fixture {
        let config = ScheduleConfig::default();
        let db = Database::open_in_memory().unwrap();
        let cache = ScheduleCache::new(&config);
        let patient = Patient::new("Tanaka Yuki".into());
        db.insert_patient(&patient).unwrap();
        Fixture {
            db,
            cache,
            config,
            patient_id: patient.id,
        }
    }

    fn book(f: &Fixture, start: DateTime<Utc>, minutes: i64) -> Appointment {
        let appt = Appointment::new(f.patient_id.clone(), start, minutes, None);
        f.db.insert_appointment(&appt).unwrap();
        f.cache.invalidate_slots(start.date_naive());
        appt
    }

    #[test]
    fn test_empty_day_all_available() {
        let f = setup();
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);

        let slots = engine.available_slots(date(), 60, early()).unwrap();
        // 09:00..17:00 starts on a 30-minute grid for a 60-minute visit
        assert_eq!(slots.len(), 17);
        assert!(slots.iter().all(|s| s.available));
        assert_eq!(slots[0].start, ts(9, 0));
        assert_eq!(slots.last().unwrap().start, ts(17, 0));
    }

    #[test]
    fn test_booked_interval_blocks_overlapping_slots() {
        let f = setup();
        book(&f, ts(10, 30), 30);
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);

        let slots = engine.available_slots(date(), 60, early()).unwrap();
        let availability: std::collections::HashMap<DateTime<Utc>, bool> =
            slots.into_iter().map(|s| (s.start, s.available)).collect();

        // 09:30 ends exactly at 10:30: half-open, still free
        assert!(availability[&ts(9, 30)]);
        // 10:00 and 10:30 overlap [10:30, 11:00)
        assert!(!availability[&ts(10, 0)]);
        assert!(!availability[&ts(10, 30)]);
        // 11:00 starts exactly at the busy end: free
        assert!(availability[&ts(11, 0)]);
    }

    #[test]
    fn test_past_slots_unavailable_today() {
        let f = setup();
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);

        let now = ts(12, 15);
        let slots = engine.available_slots(date(), 30, now).unwrap();
        for slot in &slots {
            if slot.start < now {
                assert!(!slot.available, "{} should be past", slot.start);
            } else {
                assert!(slot.available, "{} should be free", slot.start);
            }
        }
    }

    #[test]
    fn test_malformed_duration_rejected() {
        let f = setup();
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);

        assert!(matches!(
            engine.available_slots(date(), 0, early()),
            Err(SchedulingError::Validation(_))
        ));
        assert!(matches!(
            engine.available_slots(date(), -30, early()),
            Err(SchedulingError::Validation(_))
        ));
        assert!(matches!(
            engine.has_conflict(ts(10, 0), 10_000, None),
            Err(SchedulingError::Validation(_))
        ));
    }

    #[test]
    fn test_within_hours_bounds() {
        let f = setup();
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);

        assert!(engine.validate_within_hours(ts(9, 0), 60).is_ok());
        assert!(engine.validate_within_hours(ts(17, 0), 60).is_ok());

        // Before open, past close, and across midnight
        assert!(matches!(
            engine.validate_within_hours(ts(8, 30), 30),
            Err(SchedulingError::Validation(_))
        ));
        assert!(matches!(
            engine.validate_within_hours(ts(17, 30), 60),
            Err(SchedulingError::Validation(_))
        ));
        assert!(matches!(
            engine.validate_within_hours(ts(23, 30), 60),
            Err(SchedulingError::Validation(_))
        ));
    }

    #[test]
    fn test_has_conflict_reports_competing_window() {
        let f = setup();
        let appt = book(&f, ts(10, 30), 30);
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);

        let hit = engine.has_conflict(ts(10, 0), 60, None).unwrap().unwrap();
        assert_eq!(hit.start, ts(10, 30));
        assert_eq!(hit.end, ts(11, 0));

        // Excluding the appointment itself sees no conflict
        assert!(engine
            .has_conflict(ts(10, 0), 60, Some(&appt.id))
            .unwrap()
            .is_none());

        // Abutting before and after: free
        assert!(engine.has_conflict(ts(9, 30), 60, None).unwrap().is_none());
        assert!(engine.has_conflict(ts(11, 0), 60, None).unwrap().is_none());
    }

    #[test]
    fn test_suggestions_sorted_by_proximity() {
        let f = setup();
        book(&f, ts(10, 30), 30);
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);

        let suggested = engine
            .suggest_alternatives(ts(10, 0), 60, early(), 3)
            .unwrap();
        assert_eq!(suggested.len(), 3);
        // Nearest free starts to 10:00 for a 60-minute visit: 09:30 abuts
        // the busy interval and 11:00 starts at its end.
        assert_eq!(suggested[0].start, ts(9, 30));
        assert!(suggested.iter().all(|s| s.available));
        let mut last_distance = 0;
        for slot in &suggested {
            let distance = (slot.start - ts(10, 0)).num_minutes().abs();
            assert!(distance >= last_distance);
            last_distance = distance;
        }
    }

    #[test]
    fn test_cancelled_appointment_frees_slot() {
        let f = setup();
        let appt = book(&f, ts(10, 0), 60);
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);
        assert!(engine.has_conflict(ts(10, 0), 60, None).unwrap().is_some());

        f.db.update_appointment_status(
            &appt.id,
            crate::models::AppointmentStatus::Cancelled,
            ts(9, 0),
        )
        .unwrap();
        f.cache.invalidate_slots(date());

        assert!(engine.has_conflict(ts(10, 0), 60, None).unwrap().is_none());
    }
}
