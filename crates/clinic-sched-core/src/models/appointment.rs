//! Appointment model and its status state machine.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Appointment lifecycle status.
///
/// ```text
/// booked  -> visited | cancelled | no_show
/// visited -> done    | cancelled
/// done    -> paid    | cancelled
/// ```
///
/// `paid`, `cancelled` and `no_show` are terminal. `done -> cancelled` is
/// allowed because cancellation succeeds from any non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Visited,
    Done,
    Paid,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Whether no further transition is permitted from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled | Self::NoShow)
    }

    /// Active appointments occupy their slot and receive reminders.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Cancelled | Self::NoShow)
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Booked => matches!(next, Self::Visited | Self::Cancelled | Self::NoShow),
            Self::Visited => matches!(next, Self::Done | Self::Cancelled),
            Self::Done => matches!(next, Self::Paid | Self::Cancelled),
            Self::Paid | Self::Cancelled | Self::NoShow => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::Visited => "visited",
            Self::Done => "done",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central scheduling entity: one booked visit on the single shared chair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    /// UUID
    pub id: String,
    /// Owning patient
    pub patient_id: String,
    /// Visit start time (UTC)
    pub scheduled_at: DateTime<Utc>,
    /// Visit length in minutes
    pub duration_minutes: i64,
    /// Treatment label (free text, e.g. "cleaning", "root canal")
    pub treatment_type: Option<String>,
    /// Additional notes
    pub notes: Option<String>,
    /// Lifecycle status
    pub status: AppointmentStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Create a new appointment in the initial `booked` state.
    pub fn new(
        patient_id: String,
        scheduled_at: DateTime<Utc>,
        duration_minutes: i64,
        treatment_type: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            scheduled_at,
            duration_minutes,
            treatment_type,
            notes: None,
            status: AppointmentStatus::Booked,
            created_at: now,
            updated_at: now,
        }
    }

    /// End of the occupied interval (exclusive).
    pub fn end_time(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(self.duration_minutes)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The busy interval this appointment occupies.
    pub fn busy_interval(&self) -> BusyInterval {
        BusyInterval {
            appointment_id: self.id.clone(),
            patient_id: self.patient_id.clone(),
            start: self.scheduled_at,
            end: self.end_time(),
        }
    }
}

/// An occupied half-open interval `[start, end)` on the shared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusyInterval {
    pub appointment_id: String,
    pub patient_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    /// Half-open overlap: `[a, b)` and `[c, d)` intersect iff `a < d && c < b`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}

/// Per-date appointment counts by status (the cached aggregate query).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DailySummary {
    pub date: Option<NaiveDate>,
    pub booked: i64,
    pub visited: i64,
    pub done: i64,
    pub paid: i64,
    pub cancelled: i64,
    pub no_show: i64,
}

impl DailySummary {
    pub fn total(&self) -> i64 {
        self.booked + self.visited + self.done + self.paid + self.cancelled + self.no_show
    }

    /// Appointments still occupying their slot.
    pub fn active(&self) -> i64 {
        self.booked + self.visited + self.done + self.paid
    }
}
