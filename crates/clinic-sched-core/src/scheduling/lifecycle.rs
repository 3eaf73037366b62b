//! Appointment lifecycle: booking, transitions, cancellation, reschedule.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{
    ConflictDetails, LifecycleEvent, LifecycleObserver, SchedulingError, SchedulingResult,
    SlotAvailabilityEngine,
};
use crate::cache::ScheduleCache;
use crate::config::ScheduleConfig;
use crate::db::{Database, DbError};
use crate::models::{Appointment, AppointmentStatus};
use crate::reminders::ReminderScheduler;

/// A booking request as it arrives from the (out-of-scope) transport layer.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub patient_id: String,
    pub start: DateTime<Utc>,
    /// Defaults to `ScheduleConfig::default_duration_minutes` when omitted
    pub duration_minutes: Option<i64>,
    pub treatment_type: Option<String>,
    pub notes: Option<String>,
}

/// Owns creation, state transitions, and cancellation of appointments.
///
/// Booking runs an optimistic check-then-commit: the availability probe runs
/// immediately before insert, and the storage-level partial unique index is
/// the final arbiter for exact patient+timestamp duplicates. A race window
/// remains for overlapping-but-offset bookings between the check and the
/// commit; that window is inherent to the single-chair model and accepted.
pub struct AppointmentLifecycleManager<'a> {
    db: &'a Database,
    cache: &'a ScheduleCache,
    config: &'a ScheduleConfig,
    observer: Option<&'a dyn LifecycleObserver>,
}

impl<'a> AppointmentLifecycleManager<'a> {
    pub fn new(db: &'a Database, cache: &'a ScheduleCache, config: &'a ScheduleConfig) -> Self {
        Self {
            db,
            cache,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn LifecycleObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn availability(&self) -> SlotAvailabilityEngine<'a> {
        SlotAvailabilityEngine::new(self.db, self.cache, self.config)
    }

    fn reminders(&self) -> ReminderScheduler<'a> {
        ReminderScheduler::new(self.db)
    }

    /// Book a new appointment. On conflict, returns the competing window and
    /// concrete alternatives instead of a bare rejection.
    pub fn book(&self, request: &BookingRequest, now: DateTime<Utc>) -> SchedulingResult<Appointment> {
        let duration = request
            .duration_minutes
            .unwrap_or(self.config.default_duration_minutes);

        if request.start < now {
            return Err(SchedulingError::Validation(
                "cannot book an appointment in the past".into(),
            ));
        }
        if self.db.get_patient(&request.patient_id)?.is_none() {
            return Err(SchedulingError::NotFound(format!(
                "patient {}",
                request.patient_id
            )));
        }

        let engine = self.availability();
        engine.validate_within_hours(request.start, duration)?;
        if let Some(competing) = engine.has_conflict(request.start, duration, None)? {
            return Err(SchedulingError::Conflict(self.conflict_details(
                competing.start,
                competing.end,
                request.start,
                duration,
                now,
            )?));
        }

        let mut appointment = Appointment::new(
            request.patient_id.clone(),
            request.start,
            duration,
            request.treatment_type.clone(),
        );
        appointment.notes = request.notes.clone();

        // The unique index resolves the exact-timestamp race: one writer wins,
        // the other lands here with a constraint violation.
        match self.db.insert_appointment(&appointment) {
            Ok(()) => {}
            Err(DbError::Constraint(_)) => {
                let end = request.start + chrono::Duration::minutes(duration);
                return Err(SchedulingError::Conflict(self.conflict_details(
                    request.start,
                    end,
                    request.start,
                    duration,
                    now,
                )?));
            }
            Err(e) => return Err(e.into()),
        }

        self.invalidate(request.start);
        let deliveries = self.reminders().on_booked(&appointment, now)?;
        info!(
            appointment_id = %appointment.id,
            patient_id = %appointment.patient_id,
            start = %appointment.scheduled_at,
            reminders = deliveries.len(),
            "appointment booked"
        );
        self.emit(LifecycleEvent::Booked {
            appointment: appointment.clone(),
        });
        Ok(appointment)
    }

    /// Apply a state-machine transition. Transitions not on the graph are
    /// rejected before any mutation.
    pub fn transition(
        &self,
        appointment_id: &str,
        new_status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> SchedulingResult<Appointment> {
        if new_status == AppointmentStatus::Cancelled {
            return self.cancel(appointment_id, now);
        }

        let appointment = self.load(appointment_id)?;
        if !appointment.status.can_transition_to(new_status) {
            warn!(
                appointment_id,
                from = %appointment.status,
                to = %new_status,
                "rejected invalid transition"
            );
            return Err(SchedulingError::InvalidTransition {
                from: appointment.status,
                to: new_status,
            });
        }

        let from = appointment.status;
        self.db
            .update_appointment_status(appointment_id, new_status, now)?;
        // A no-show frees its slot and must never be reminded about.
        if new_status == AppointmentStatus::NoShow {
            let cancelled = self.reminders().on_cancelled(appointment_id, now)?;
            debug!(appointment_id, cancelled, "cancelled reminders for no-show");
        }
        self.invalidate(appointment.scheduled_at);

        let updated = self.load(appointment_id)?;
        info!(appointment_id, from = %from, to = %new_status, "appointment transitioned");
        self.emit(LifecycleEvent::StatusChanged {
            appointment: updated.clone(),
            from,
            to: new_status,
        });
        Ok(updated)
    }

    /// Cancel an appointment. Succeeds from any non-terminal state, cascades
    /// to pending reminders, and is idempotent: cancelling an already
    /// cancelled appointment is a no-op, not an error.
    pub fn cancel(&self, appointment_id: &str, now: DateTime<Utc>) -> SchedulingResult<Appointment> {
        let appointment = self.load(appointment_id)?;

        if appointment.status == AppointmentStatus::Cancelled {
            debug!(appointment_id, "cancel on already-cancelled appointment: no-op");
            return Ok(appointment);
        }
        if !appointment.status.can_transition_to(AppointmentStatus::Cancelled) {
            return Err(SchedulingError::InvalidTransition {
                from: appointment.status,
                to: AppointmentStatus::Cancelled,
            });
        }

        let from = appointment.status;
        self.db
            .update_appointment_status(appointment_id, AppointmentStatus::Cancelled, now)?;
        let cancelled = self.reminders().on_cancelled(appointment_id, now)?;
        self.invalidate(appointment.scheduled_at);

        let updated = self.load(appointment_id)?;
        info!(
            appointment_id,
            from = %from,
            reminders_cancelled = cancelled,
            "appointment cancelled"
        );
        self.emit(LifecycleEvent::Cancelled {
            appointment: updated.clone(),
        });
        Ok(updated)
    }

    /// Move an appointment to a new slot, preserving its identity and
    /// history. Pending reminders are cancelled and regenerated against the
    /// new time.
    pub fn reschedule(
        &self,
        appointment_id: &str,
        new_start: DateTime<Utc>,
        new_duration_minutes: Option<i64>,
        now: DateTime<Utc>,
    ) -> SchedulingResult<Appointment> {
        let appointment = self.load(appointment_id)?;
        if !matches!(
            appointment.status,
            AppointmentStatus::Booked | AppointmentStatus::Visited
        ) {
            return Err(SchedulingError::Validation(format!(
                "only booked or visited appointments can be rescheduled, not {}",
                appointment.status
            )));
        }
        if new_start < now {
            return Err(SchedulingError::Validation(
                "cannot reschedule into the past".into(),
            ));
        }

        let duration = new_duration_minutes.unwrap_or(appointment.duration_minutes);
        let engine = self.availability();
        engine.validate_within_hours(new_start, duration)?;
        if let Some(competing) =
            engine.has_conflict(new_start, duration, Some(appointment_id))?
        {
            return Err(SchedulingError::Conflict(self.conflict_details(
                competing.start,
                competing.end,
                new_start,
                duration,
                now,
            )?));
        }

        let previous_start = appointment.scheduled_at;
        match self
            .db
            .update_appointment_schedule(appointment_id, new_start, duration, now)
        {
            Ok(_) => {}
            Err(DbError::Constraint(_)) => {
                let end = new_start + chrono::Duration::minutes(duration);
                return Err(SchedulingError::Conflict(self.conflict_details(
                    new_start, end, new_start, duration, now,
                )?));
            }
            Err(e) => return Err(e.into()),
        }

        // Old date may differ from the new one; both views are stale now.
        self.invalidate(previous_start);
        self.invalidate(new_start);

        let updated = self.load(appointment_id)?;
        let deliveries = self.reminders().on_rescheduled(&updated, now)?;
        info!(
            appointment_id,
            from = %previous_start,
            to = %new_start,
            reminders = deliveries.len(),
            "appointment rescheduled"
        );
        self.emit(LifecycleEvent::Rescheduled {
            previous_start,
            appointment: updated.clone(),
        });
        Ok(updated)
    }

    fn load(&self, appointment_id: &str) -> SchedulingResult<Appointment> {
        self.db
            .get_appointment(appointment_id)?
            .ok_or_else(|| SchedulingError::NotFound(format!("appointment {}", appointment_id)))
    }

    fn conflict_details(
        &self,
        competing_start: DateTime<Utc>,
        competing_end: DateTime<Utc>,
        requested_start: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> SchedulingResult<ConflictDetails> {
        let suggested =
            self.availability()
                .suggest_alternatives(requested_start, duration_minutes, now, 5)?;
        Ok(ConflictDetails {
            competing_start,
            competing_end,
            suggested,
        })
    }

    /// Synchronous, unconditional invalidation on every state-changing write,
    /// before the lifecycle event is considered complete.
    fn invalidate(&self, at: DateTime<Utc>) {
        let date = at.date_naive();
        self.cache.invalidate_slots(date);
        self.cache.invalidate_aggregates(date);
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(observer) = self.observer {
            observer.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Patient;
    use chrono::TimeZone;
    use std::cell::RefCell;

    fn ts(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, day, h, m, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        ts(1, 8, 0)
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
        let mut patient = Patient::new("Tanaka Yuki".into());
        patient.email = Some("yuki@example.com".into());
        db.insert_patient(&patient).unwrap();
        Fixture {
            db,
            cache,
            config,
            patient_id: patient.id,
        }
    }

    fn request(f: &Fixture, start: DateTime<Utc>) -> BookingRequest {
        BookingRequest {
            patient_id: f.patient_id.clone(),
            start,
            duration_minutes: Some(60),
            treatment_type: Some("cleaning".into()),
            notes: None,
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: RefCell<Vec<(String, String)>>,
    }

    impl LifecycleObserver for RecordingObserver {
        fn on_event(&self, event: &LifecycleEvent) {
            let name = match event {
                LifecycleEvent::Booked { .. } => "booked",
                LifecycleEvent::Cancelled { .. } => "cancelled",
                LifecycleEvent::Rescheduled { .. } => "rescheduled",
                LifecycleEvent::StatusChanged { .. } => "status_changed",
            };
            self.events
                .borrow_mut()
                .push((name.to_string(), event.appointment().id.clone()));
        }
    }

    #[test]
    fn test_book_success() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();
        assert_eq!(appt.status, AppointmentStatus::Booked);
        assert_eq!(appt.scheduled_at, ts(10, 10, 0));

        let stored = f.db.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(stored, appt);
    }

    #[test]
    fn test_book_past_rejected() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        let result = manager.book(&request(&f, ts(1, 7, 0)), now());
        assert!(matches!(result, Err(SchedulingError::Validation(_))));
    }

    #[test]
    fn test_book_outside_hours_rejected() {
        let f = setup();
        let other = Patient::new("Sato Ken".into());
        f.db.insert_patient(&other).unwrap();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        // A visit crossing midnight would be invisible to the next day's
        // conflict probe; the hours gate keeps it unrepresentable.
        assert!(matches!(
            manager.book(&request(&f, ts(10, 23, 30)), now()),
            Err(SchedulingError::Validation(_))
        ));
        let mut early = request(&f, ts(11, 0, 0));
        early.patient_id = other.id;
        assert!(matches!(
            manager.book(&early, now()),
            Err(SchedulingError::Validation(_))
        ));

        // Reschedule goes through the same gate
        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();
        assert!(matches!(
            manager.reschedule(&appt.id, ts(10, 17, 30), None, now()),
            Err(SchedulingError::Validation(_))
        ));
    }

    #[test]
    fn test_book_unknown_patient_rejected() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        let mut req = request(&f, ts(10, 10, 0));
        req.patient_id = "nobody".into();
        assert!(matches!(
            manager.book(&req, now()),
            Err(SchedulingError::NotFound(_))
        ));
    }

    #[test]
    fn test_overlapping_booking_conflicts_with_suggestions() {
        let f = setup();
        let other = Patient::new("Sato Ken".into());
        f.db.insert_patient(&other).unwrap();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        // Existing 10:30-11:00 held by a different patient
        let mut existing = request(&f, ts(10, 10, 30));
        existing.duration_minutes = Some(30);
        manager.book(&existing, now()).unwrap();

        let mut req = request(&f, ts(10, 10, 0));
        req.patient_id = other.id;
        let err = manager.book(&req, now()).unwrap_err();
        match err {
            SchedulingError::Conflict(details) => {
                assert_eq!(details.competing_start, ts(10, 10, 30));
                assert_eq!(details.competing_end, ts(10, 11, 0));
                assert!(!details.suggested.is_empty());
                // Every suggestion is genuinely free for a 60-minute visit
                for slot in &details.suggested {
                    assert!(slot.available);
                    let end = slot.start + chrono::Duration::minutes(60);
                    assert!(end <= ts(10, 10, 30) || slot.start >= ts(10, 11, 0));
                }
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_exact_duplicate_self_booking_conflicts() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();
        let err = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap_err();
        assert!(matches!(err, SchedulingError::Conflict(_)));
    }

    #[test]
    fn test_transition_valid_path() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);
        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();

        let appt = manager
            .transition(&appt.id, AppointmentStatus::Visited, now())
            .unwrap();
        assert_eq!(appt.status, AppointmentStatus::Visited);
        let appt = manager
            .transition(&appt.id, AppointmentStatus::Done, now())
            .unwrap();
        assert_eq!(appt.status, AppointmentStatus::Done);
        let appt = manager
            .transition(&appt.id, AppointmentStatus::Paid, now())
            .unwrap();
        assert_eq!(appt.status, AppointmentStatus::Paid);
    }

    #[test]
    fn test_invalid_transition_rejected_without_mutation() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);
        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();

        let err = manager
            .transition(&appt.id, AppointmentStatus::Paid, now())
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::InvalidTransition {
                from: AppointmentStatus::Booked,
                to: AppointmentStatus::Paid,
            }
        ));

        // Status unchanged
        let stored = f.db.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Booked);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);
        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();

        let first = manager.cancel(&appt.id, now()).unwrap();
        assert_eq!(first.status, AppointmentStatus::Cancelled);

        let second = manager.cancel(&appt.id, now()).unwrap();
        assert_eq!(second.status, AppointmentStatus::Cancelled);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn test_cancel_from_done_allowed_from_paid_rejected() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();
        manager
            .transition(&appt.id, AppointmentStatus::Visited, now())
            .unwrap();
        manager
            .transition(&appt.id, AppointmentStatus::Done, now())
            .unwrap();
        // Non-terminal: cancel succeeds
        let cancelled = manager.cancel(&appt.id, now()).unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

        let appt2 = manager.book(&request(&f, ts(10, 14, 0)), now()).unwrap();
        manager
            .transition(&appt2.id, AppointmentStatus::Visited, now())
            .unwrap();
        manager
            .transition(&appt2.id, AppointmentStatus::Done, now())
            .unwrap();
        manager
            .transition(&appt2.id, AppointmentStatus::Paid, now())
            .unwrap();
        // Terminal: cancel is an invalid transition
        assert!(matches!(
            manager.cancel(&appt2.id, now()),
            Err(SchedulingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_frees_slot_for_others() {
        let f = setup();
        let other = Patient::new("Sato Ken".into());
        f.db.insert_patient(&other).unwrap();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();
        manager.cancel(&appt.id, now()).unwrap();

        let mut req = request(&f, ts(10, 10, 0));
        req.patient_id = other.id;
        let rebooked = manager.book(&req, now()).unwrap();
        assert_eq!(rebooked.scheduled_at, ts(10, 10, 0));
    }

    #[test]
    fn test_reschedule_moves_and_checks_conflicts() {
        let f = setup();
        let other = Patient::new("Sato Ken".into());
        f.db.insert_patient(&other).unwrap();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);

        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();
        let mut blocker = request(&f, ts(10, 14, 0));
        blocker.patient_id = other.id;
        manager.book(&blocker, now()).unwrap();

        // Into the blocker: conflict
        assert!(matches!(
            manager.reschedule(&appt.id, ts(10, 14, 30), None, now()),
            Err(SchedulingError::Conflict(_))
        ));

        // To a free slot on another day: same identity, new time
        let moved = manager
            .reschedule(&appt.id, ts(11, 9, 0), Some(30), now())
            .unwrap();
        assert_eq!(moved.id, appt.id);
        assert_eq!(moved.scheduled_at, ts(11, 9, 0));
        assert_eq!(moved.duration_minutes, 30);
        assert_eq!(moved.status, AppointmentStatus::Booked);

        // Old slot is free again
        let engine = SlotAvailabilityEngine::new(&f.db, &f.cache, &f.config);
        assert!(engine.has_conflict(ts(10, 10, 0), 60, None).unwrap().is_none());
    }

    #[test]
    fn test_reschedule_terminal_rejected() {
        let f = setup();
        let manager = AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config);
        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();
        manager.cancel(&appt.id, now()).unwrap();

        assert!(matches!(
            manager.reschedule(&appt.id, ts(11, 9, 0), None, now()),
            Err(SchedulingError::Validation(_))
        ));
    }

    #[test]
    fn test_observer_sees_events() {
        let f = setup();
        let observer = RecordingObserver::default();
        let manager =
            AppointmentLifecycleManager::new(&f.db, &f.cache, &f.config).with_observer(&observer);

        let appt = manager.book(&request(&f, ts(10, 10, 0)), now()).unwrap();
        manager
            .transition(&appt.id, AppointmentStatus::Visited, now())
            .unwrap();
        manager
            .reschedule(&appt.id, ts(11, 9, 0), None, now())
            .unwrap();
        manager.cancel(&appt.id, now()).unwrap();
        // Idempotent second cancel emits nothing
        manager.cancel(&appt.id, now()).unwrap();

        let events = observer.events.borrow();
        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["booked", "status_changed", "rescheduled", "cancelled"]
        );
        // Every event carried the same appointment
        assert!(events.iter().all(|(_, id)| *id == appt.id));
    }
}
