//! Booking, conflict detection, and the appointment state machine.

mod availability;
mod events;
mod lifecycle;

pub use availability::*;
pub use events::*;
pub use lifecycle::*;

use thiserror::Error;

use crate::db::DbError;
use crate::models::AppointmentStatus;

/// Scheduling errors.
#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("booking conflicts with an existing appointment from {} to {}",
        .0.competing_start, .0.competing_end)]
    Conflict(ConflictDetails),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type SchedulingResult<T> = Result<T, SchedulingError>;

/// What the caller gets instead of a bare rejection: the competing window and
/// concrete free slots to offer instead.
#[derive(Debug, Clone)]
pub struct ConflictDetails {
    /// Start of the occupied window the request collided with
    pub competing_start: chrono::DateTime<chrono::Utc>,
    /// End of that window (exclusive)
    pub competing_end: chrono::DateTime<chrono::Utc>,
    /// Free alternatives on the same day, nearest to the request first
    pub suggested: Vec<Slot>,
}
