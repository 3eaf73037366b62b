//! Lifecycle events emitted on every accepted appointment mutation.

use chrono::{DateTime, Utc};

use crate::models::{Appointment, AppointmentStatus};

/// What happened to an appointment. Consumed by the reminder cascade and
/// cache invalidation internally; also handed to an injected observer.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Booked {
        appointment: Appointment,
    },
    Cancelled {
        appointment: Appointment,
    },
    Rescheduled {
        previous_start: DateTime<Utc>,
        appointment: Appointment,
    },
    StatusChanged {
        appointment: Appointment,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
}

impl LifecycleEvent {
    pub fn appointment(&self) -> &Appointment {
        match self {
            Self::Booked { appointment }
            | Self::Cancelled { appointment }
            | Self::Rescheduled { appointment, .. }
            | Self::StatusChanged { appointment, .. } => appointment,
        }
    }
}

/// Injected observer for counters/audit. Never ambient mutable state: whoever
/// constructs the lifecycle manager decides what, if anything, listens.
pub trait LifecycleObserver {
    fn on_event(&self, event: &LifecycleEvent);
}
