//! Clinic-Sched Core Library
//!
//! Appointment scheduling core for a single-practitioner clinic: slot
//! availability, the appointment state machine, and a reminder pipeline,
//! all backed by a local SQLite database.
//!
//! # Architecture
//!
//! ```text
//!                     Booking / Cancel / Reschedule
//!                                  │
//!                  ┌───────────────▼───────────────┐
//!                  │  AppointmentLifecycleManager  │
//!                  │   conflict check → commit     │
//!                  └───┬───────────┬───────────┬───┘
//!                      │           │           │
//!          ┌───────────▼──┐  ┌─────▼──────┐  ┌─▼────────────────┐
//!          │ Availability │  │  Reminder  │  │ Cache            │
//!          │ Engine       │  │  Scheduler │  │ invalidation     │
//!          └───────┬──────┘  └─────┬──────┘  └──────────────────┘
//!                  │               │
//!                  │        one delivery per
//!                  │        lead-time bucket
//!                  │               │
//!                  │        ┌──────▼─────────────┐
//!                  │        │ DeliveryDispatcher │──▶ email / SMS / push
//!                  │        └────────────────────┘
//!                  ▼
//!          per-date busy-interval cache (read path)
//! ```
//!
//! # Core Principle
//!
//! **One chair.** At most one active appointment occupies any instant;
//! overlap is decided on half-open intervals, so back-to-back visits touch
//! without colliding.
//!
//! # Modules
//!
//! - [`db`]: SQLite database layer
//! - [`models`]: Domain types (Patient, Appointment, Delivery, etc.)
//! - [`scheduling`]: Availability engine and appointment lifecycle
//! - [`reminders`]: Reminder scheduling, channel routing, dispatch
//! - [`cache`]: Read-through cache for slot and aggregate queries
//! - [`config`]: Business-hours and retry tuning

pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod reminders;
pub mod scheduling;

// Re-export commonly used types
pub use cache::ScheduleCache;
pub use config::ScheduleConfig;
pub use db::Database;
pub use models::{
    Appointment, AppointmentStatus, BusyInterval, DailySummary, Delivery, DeliveryStatus,
    LeadTimeBucket, Patient, ReminderChannel,
};
pub use reminders::{
    ChannelAdapter, ChannelRouter, DeliveryDispatcher, DispatchOutcome, DispatchReport,
    ReminderMessage, ReminderScheduler, SendError,
};
pub use scheduling::{
    AppointmentLifecycleManager, BookingRequest, ConflictDetails, LifecycleEvent,
    LifecycleObserver, SchedulingError, Slot, SlotAvailabilityEngine,
};

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};

// =========================================================================
// Top-Level Error Type
// =========================================================================

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error(transparent)]
    Database(#[from] db::DbError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Dispatch(#[from] reminders::DispatchError),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for ClinicError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ClinicError::LockPoisoned(e.to_string())
    }
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe entry point bundling the database, cache, and configuration.
///
/// Embedders that need finer control (observers, custom wiring) can use the
/// component types directly; this object covers the common path. Every
/// operation takes the caller's clock so behavior stays deterministic under
/// test and honest about when "now" was sampled.
pub struct ClinicCore {
    db: Arc<Mutex<Database>>,
    cache: ScheduleCache,
    config: ScheduleConfig,
}

impl ClinicCore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ClinicError> {
        Ok(Self::from_database(Database::open(path)?, ScheduleConfig::default()))
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, ClinicError> {
        Ok(Self::from_database(
            Database::open_in_memory()?,
            ScheduleConfig::default(),
        ))
    }

    /// Wrap an already-open database with the given configuration.
    pub fn from_database(db: Database, config: ScheduleConfig) -> Self {
        let cache = ScheduleCache::new(&config);
        Self {
            db: Arc::new(Mutex::new(db)),
            cache,
            config,
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Create a new patient.
    pub fn create_patient(&self, name: String) -> Result<Patient, ClinicError> {
        let db = self.db.lock()?;
        let patient = Patient::new(name);
        db.insert_patient(&patient)?;
        Ok(patient)
    }

    /// Update a patient's contact data and notes.
    pub fn update_patient(&self, patient: &Patient, now: DateTime<Utc>) -> Result<bool, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.update_patient(patient, now)?)
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: &str) -> Result<Option<Patient>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.get_patient(id)?)
    }

    /// Search patients by name prefix.
    pub fn search_patients(&self, query: &str, limit: usize) -> Result<Vec<Patient>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.search_patients(query, limit)?)
    }

    // =========================================================================
    // Availability Operations
    // =========================================================================

    /// The slot grid for a date with availability for the given duration.
    pub fn available_slots(
        &self,
        date: NaiveDate,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, ClinicError> {
        let db = self.db.lock()?;
        let engine = SlotAvailabilityEngine::new(&db, &self.cache, &self.config);
        Ok(engine.available_slots(date, duration_minutes, now)?)
    }

    /// Per-status appointment counts for a date, served from the aggregate
    /// cache.
    pub fn daily_summary(&self, date: NaiveDate) -> Result<Arc<DailySummary>, ClinicError> {
        let db = self.db.lock()?;
        let summary = self
            .cache
            .daily_summary(date, || db.count_appointments_for_date(date))?;
        Ok(summary)
    }

    // =========================================================================
    // Appointment Operations
    // =========================================================================

    /// Book a new appointment.
    pub fn book_appointment(
        &self,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, ClinicError> {
        let db = self.db.lock()?;
        let manager = AppointmentLifecycleManager::new(&db, &self.cache, &self.config);
        Ok(manager.book(request, now)?)
    }

    /// Cancel an appointment, cascading to its pending reminders.
    pub fn cancel_appointment(
        &self,
        appointment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Appointment, ClinicError> {
        let db = self.db.lock()?;
        let manager = AppointmentLifecycleManager::new(&db, &self.cache, &self.config);
        Ok(manager.cancel(appointment_id, now)?)
    }

    /// Move an appointment to a new slot.
    pub fn reschedule_appointment(
        &self,
        appointment_id: &str,
        new_start: DateTime<Utc>,
        new_duration_minutes: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, ClinicError> {
        let db = self.db.lock()?;
        let manager = AppointmentLifecycleManager::new(&db, &self.cache, &self.config);
        Ok(manager.reschedule(appointment_id, new_start, new_duration_minutes, now)?)
    }

    /// Apply a state-machine transition.
    pub fn transition_appointment(
        &self,
        appointment_id: &str,
        new_status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment, ClinicError> {
        let db = self.db.lock()?;
        let manager = AppointmentLifecycleManager::new(&db, &self.cache, &self.config);
        Ok(manager.transition(appointment_id, new_status, now)?)
    }

    /// Get an appointment by ID.
    pub fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.get_appointment(id)?)
    }

    /// A patient's appointment history, newest first.
    pub fn appointment_history(&self, patient_id: &str) -> Result<Vec<Appointment>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.list_appointments_for_patient(patient_id)?)
    }

    // =========================================================================
    // Reminder Operations
    // =========================================================================

    /// All reminder deliveries for an appointment, by fire time.
    pub fn deliveries_for_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Vec<Delivery>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.list_deliveries_for_appointment(appointment_id)?)
    }

    /// Fire every due reminder through the given channel adapters.
    pub fn dispatch_due_reminders(
        &self,
        router: &ChannelRouter<'_>,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ClinicError> {
        let db = self.db.lock()?;
        let dispatcher = DeliveryDispatcher::new(&db, router, &self.config);
        Ok(dispatcher.dispatch_due(now)?)
    }
}
