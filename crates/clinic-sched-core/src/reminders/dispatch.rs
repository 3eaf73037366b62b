//! Time-driven delivery dispatch.
//!
//! An external clock/scheduler invokes `dispatch` at or after each
//! delivery's fire time. Every step is idempotent against duplicate
//! triggers, and delivery failures never escape this module.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ChannelRouter, ReminderMessage, SendError};
use crate::config::ScheduleConfig;
use crate::db::{Database, DbError};
use crate::models::{AppointmentStatus, Delivery, DeliveryStatus};

/// Dispatch errors. These concern the dispatcher's own plumbing; channel
/// failures are recorded on the delivery row instead of propagating.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("delivery not found: {0}")]
    NotFound(String),

    #[error("no adapter registered for channel {0}")]
    NoAdapter(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// What happened to a single dispatch invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the adapter successfully
    Sent,
    /// Row was already in a terminal state; duplicate trigger ignored
    AlreadyResolved,
    /// Appointment no longer eligible; delivery cancelled, adapter untouched
    CancelledStale,
    /// Retryable failure recorded; still pending for the next pass
    RetryScheduled,
    /// Terminal failure recorded; no further attempts
    FailedTerminal,
    /// Backoff window after a failure has not elapsed yet
    Deferred,
}

/// Counts from one `dispatch_due` sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub cancelled: usize,
    pub retried: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
    /// Deliveries whose dispatch errored at the plumbing level
    pub errors: usize,
}

/// Fires due reminders, re-validating the appointment each time.
pub struct DeliveryDispatcher<'a> {
    db: &'a Database,
    router: &'a ChannelRouter<'a>,
    config: &'a ScheduleConfig,
}

impl<'a> DeliveryDispatcher<'a> {
    pub fn new(db: &'a Database, router: &'a ChannelRouter<'a>, config: &'a ScheduleConfig) -> Self {
        Self { db, router, config }
    }

    /// Dispatch one delivery. Safe to call any number of times.
    pub fn dispatch(&self, delivery_id: &str, now: DateTime<Utc>) -> DispatchResult<DispatchOutcome> {
        let delivery = self
            .db
            .get_delivery(delivery_id)?
            .ok_or_else(|| DispatchError::NotFound(delivery_id.to_string()))?;

        if delivery.status != DeliveryStatus::Pending {
            debug!(delivery_id, status = %delivery.status, "duplicate trigger; no-op");
            return Ok(DispatchOutcome::AlreadyResolved);
        }

        if !self.backoff_elapsed(&delivery, now) {
            return Ok(DispatchOutcome::Deferred);
        }

        // Re-validate: the appointment may have been cancelled or completed
        // in the hours/days since this reminder was scheduled.
        let appointment = match self.db.get_appointment(&delivery.appointment_id)? {
            Some(a)
                if matches!(
                    a.status,
                    AppointmentStatus::Booked | AppointmentStatus::Visited
                ) && a.scheduled_at > now =>
            {
                a
            }
            _ => {
                self.db.mark_delivery_cancelled(delivery_id, now)?;
                info!(
                    delivery_id,
                    appointment_id = %delivery.appointment_id,
                    "appointment no longer eligible; reminder cancelled"
                );
                return Ok(DispatchOutcome::CancelledStale);
            }
        };

        let patient = self
            .db
            .get_patient(&delivery.patient_id)?
            .ok_or_else(|| DispatchError::NotFound(format!("patient {}", delivery.patient_id)))?;

        let adapter = self
            .router
            .adapter_for(delivery.channel)
            .ok_or_else(|| DispatchError::NoAdapter(delivery.channel.to_string()))?;

        let recipient = match patient.recipient_for(delivery.channel) {
            Some(r) => r.to_string(),
            None => {
                // Contact data removed since scheduling: permanently undeliverable
                self.db.record_delivery_failure(
                    delivery_id,
                    "no recipient on file for channel",
                    delivery.retry_count + 1,
                    true,
                    now,
                )?;
                return Ok(DispatchOutcome::FailedTerminal);
            }
        };

        let message = ReminderMessage {
            appointment_id: appointment.id.clone(),
            patient_name: patient.name.clone(),
            scheduled_at: appointment.scheduled_at,
            treatment_type: appointment.treatment_type.clone(),
            lead_time: delivery.lead_time,
        };

        match adapter.send(&recipient, &message) {
            Ok(()) => {
                self.db.mark_delivery_sent(delivery_id, now)?;
                info!(
                    delivery_id,
                    appointment_id = %appointment.id,
                    channel = %delivery.channel,
                    "reminder sent"
                );
                Ok(DispatchOutcome::Sent)
            }
            Err(SendError::Retryable(e)) => {
                let retry_count = delivery.retry_count + 1;
                let terminal = retry_count >= self.config.max_delivery_retries;
                self.db
                    .record_delivery_failure(delivery_id, &e, retry_count, terminal, now)?;
                if terminal {
                    warn!(delivery_id, retry_count, error = %e, "retries exhausted");
                    Ok(DispatchOutcome::FailedTerminal)
                } else {
                    debug!(delivery_id, retry_count, error = %e, "retry scheduled");
                    Ok(DispatchOutcome::RetryScheduled)
                }
            }
            Err(SendError::Terminal(e)) => {
                self.db
                    .record_delivery_failure(delivery_id, &e, delivery.retry_count + 1, true, now)?;
                warn!(delivery_id, error = %e, "permanently undeliverable");
                Ok(DispatchOutcome::FailedTerminal)
            }
        }
    }

    /// Sweep every due pending delivery. Individual failures are contained
    /// and counted; the sweep itself only fails on the initial due query.
    pub fn dispatch_due(&self, now: DateTime<Utc>) -> DispatchResult<DispatchReport> {
        let due = self.db.list_due_deliveries(now)?;
        let mut report = DispatchReport::default();

        for delivery in due {
            match self.dispatch(&delivery.id, now) {
                Ok(DispatchOutcome::Sent) => report.sent += 1,
                Ok(DispatchOutcome::CancelledStale) => report.cancelled += 1,
                Ok(DispatchOutcome::RetryScheduled) => report.retried += 1,
                Ok(DispatchOutcome::FailedTerminal) => report.failed += 1,
                Ok(DispatchOutcome::Deferred) => report.deferred += 1,
                Ok(DispatchOutcome::AlreadyResolved) => report.skipped += 1,
                Err(e) => {
                    warn!(delivery_id = %delivery.id, error = %e, "dispatch error");
                    report.errors += 1;
                }
            }
        }

        debug!(?report, "dispatch sweep complete");
        Ok(report)
    }

    /// After a failure, the next attempt waits `base * 2^(retry_count - 1)`
    /// from the last attempt. The row's own counters are the only state.
    fn backoff_elapsed(&self, delivery: &Delivery, now: DateTime<Utc>) -> bool {
        if delivery.retry_count == 0 {
            return true;
        }
        let exponent = delivery.retry_count.saturating_sub(1).min(16);
        let wait = self.config.retry_backoff_base * 2_i32.pow(exponent);
        now >= delivery.updated_at + wait
    }
}
