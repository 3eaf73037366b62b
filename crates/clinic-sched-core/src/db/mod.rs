//! Database layer for clinic-sched.

mod schema;
mod patients;
mod appointments;
mod deliveries;

pub use schema::*;
#[allow(unused_imports)]
pub use patients::*;
#[allow(unused_imports)]
pub use appointments::*;
#[allow(unused_imports)]
pub use deliveries::*;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid stored value: {0}")]
    Decode(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Format a timestamp for storage. Uniform second precision keeps
/// lexicographic comparison in SQL chronological.
pub(crate) fn ts_to_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp.
pub(crate) fn ts_from_string(s: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Decode(format!("bad timestamp '{}': {}", s, e)))
}

/// Stored bounds of a calendar day, `[start, end)`.
pub(crate) fn day_bounds(date: NaiveDate) -> (String, String) {
    let start = date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc();
    let end = start + chrono::Duration::days(1);
    (ts_to_string(start), ts_to_string(end))
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction.
    pub fn transaction(&mut self) -> DbResult<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

/// Map a SQLite uniqueness violation to `DbError::Constraint`, leaving other
/// errors untouched. The partial unique index on active appointments is the
/// final arbiter for duplicate patient+timestamp bookings.
pub(crate) fn map_constraint(e: rusqlite::Error, context: &str) -> DbError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(context.to_string())
        }
        _ => DbError::Sqlite(e),
    }
}
