//! Reminder pipeline: schedule, route, and dispatch patient reminders.

mod channel;
mod dispatch;

pub use channel::*;
pub use dispatch::*;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::db::{Database, DbResult};
use crate::models::{Appointment, Delivery, LeadTimeBucket};

/// Listens to lifecycle events and keeps the set of reminder instances in
/// line with the appointment: one pending `Delivery` per lead-time bucket
/// whose fire time is still in the future.
pub struct ReminderScheduler<'a> {
    db: &'a Database,
}

impl<'a> ReminderScheduler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create deliveries for a freshly booked appointment. A bucket whose
    /// computed fire time has already elapsed is not created at all; a
    /// patient with no contact data gets no deliveries.
    pub fn on_booked(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Delivery>> {
        let patient = match self.db.get_patient(&appointment.patient_id)? {
            Some(p) => p,
            None => {
                warn!(
                    appointment_id = %appointment.id,
                    patient_id = %appointment.patient_id,
                    "no patient record; skipping reminders"
                );
                return Ok(Vec::new());
            }
        };
        let channel = match patient.preferred_channel() {
            Some(c) => c,
            None => {
                warn!(
                    appointment_id = %appointment.id,
                    patient_id = %patient.id,
                    "patient has no contact data; skipping reminders"
                );
                return Ok(Vec::new());
            }
        };

        let mut created = Vec::new();
        for bucket in LeadTimeBucket::ALL {
            let fire_at = appointment.scheduled_at - bucket.offset();
            if fire_at <= now {
                continue;
            }
            let delivery = Delivery::new(
                appointment.id.clone(),
                patient.id.clone(),
                channel,
                bucket,
                fire_at,
            );
            self.db.insert_delivery(&delivery)?;
            created.push(delivery);
        }

        debug!(
            appointment_id = %appointment.id,
            channel = %channel,
            created = created.len(),
            "scheduled reminders"
        );
        Ok(created)
    }

    /// Cascade: every pending delivery for the appointment becomes
    /// `cancelled`. Terminal rows are left alone. Returns the count.
    pub fn on_cancelled(&self, appointment_id: &str, now: DateTime<Utc>) -> DbResult<usize> {
        let cancelled = self.db.cancel_pending_deliveries(appointment_id, now)?;
        debug!(appointment_id, cancelled, "cascaded reminder cancellation");
        Ok(cancelled)
    }

    /// Reschedule: drop the pending set and generate a fresh one against the
    /// appointment's new time.
    pub fn on_rescheduled(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Delivery>> {
        self.on_cancelled(&appointment.id, now)?;
        self.on_booked(appointment, now)
    }
}
