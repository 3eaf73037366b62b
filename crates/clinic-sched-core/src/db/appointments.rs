//! Appointment database operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{day_bounds, map_constraint, ts_from_string, ts_to_string, Database, DbError, DbResult};
use crate::models::{Appointment, AppointmentStatus, DailySummary};

const APPOINTMENT_COLUMNS: &str = "id, patient_id, scheduled_at, duration_minutes, \
     treatment_type, notes, status, created_at, updated_at";

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        scheduled_at: row.get(2)?,
        duration_minutes: row.get(3)?,
        treatment_type: row.get(4)?,
        notes: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    /// Insert a new appointment. A uniqueness violation on the partial
    /// `(patient_id, scheduled_at)` index surfaces as `DbError::Constraint`.
    pub fn insert_appointment(&self, appointment: &Appointment) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO appointments (
                    id, patient_id, scheduled_at, duration_minutes,
                    treatment_type, notes, status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    appointment.id,
                    appointment.patient_id,
                    ts_to_string(appointment.scheduled_at),
                    appointment.duration_minutes,
                    appointment.treatment_type,
                    appointment.notes,
                    status_to_string(appointment.status),
                    ts_to_string(appointment.created_at),
                    ts_to_string(appointment.updated_at),
                ],
            )
            .map_err(|e| {
                map_constraint(
                    e,
                    "patient already holds an active appointment at this time",
                )
            })?;
        Ok(())
    }

    /// Get an appointment by ID.
    pub fn get_appointment(&self, id: &str) -> DbResult<Option<Appointment>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM appointments WHERE id = ?", APPOINTMENT_COLUMNS),
                [id],
                appointment_from_row,
            )
            .optional()?
            .map(Appointment::try_from)
            .transpose()
    }

    /// Update only the status field.
    pub fn update_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE appointments SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status_to_string(status), ts_to_string(now)],
        )?;
        Ok(rows_affected > 0)
    }

    /// Move an appointment to a new start time and duration (reschedule).
    /// Subject to the same uniqueness constraint as insert.
    pub fn update_appointment_schedule(
        &self,
        id: &str,
        scheduled_at: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute(
                "UPDATE appointments SET scheduled_at = ?2, duration_minutes = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    id,
                    ts_to_string(scheduled_at),
                    duration_minutes,
                    ts_to_string(now),
                ],
            )
            .map_err(|e| {
                map_constraint(
                    e,
                    "patient already holds an active appointment at this time",
                )
            })?;
        Ok(rows_affected > 0)
    }

    /// List active appointments (not cancelled/no-show) starting on a date,
    /// ordered by start time.
    pub fn list_active_appointments_for_date(
        &self,
        date: NaiveDate,
    ) -> DbResult<Vec<Appointment>> {
        let (day_start, day_end) = day_bounds(date);
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM appointments
            WHERE scheduled_at >= ?1 AND scheduled_at < ?2
              AND status NOT IN ('cancelled', 'no_show')
            ORDER BY scheduled_at
            "#,
            APPOINTMENT_COLUMNS
        ))?;

        let rows = stmt.query_map(params![day_start, day_end], appointment_from_row)?;

        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?.try_into()?);
        }
        Ok(appointments)
    }

    /// Full appointment history for a patient, newest first. Cancelled and
    /// no-show rows are kept; nothing is physically deleted.
    pub fn list_appointments_for_patient(&self, patient_id: &str) -> DbResult<Vec<Appointment>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM appointments
            WHERE patient_id = ?
            ORDER BY scheduled_at DESC
            "#,
            APPOINTMENT_COLUMNS
        ))?;

        let rows = stmt.query_map([patient_id], appointment_from_row)?;

        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?.try_into()?);
        }
        Ok(appointments)
    }

    /// Per-status appointment counts for a date (feeds the aggregate cache).
    pub fn count_appointments_for_date(&self, date: NaiveDate) -> DbResult<DailySummary> {
        let (day_start, day_end) = day_bounds(date);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT status, COUNT(*) FROM appointments
            WHERE scheduled_at >= ?1 AND scheduled_at < ?2
            GROUP BY status
            "#,
        )?;

        let rows = stmt.query_map(params![day_start, day_end], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut summary = DailySummary {
            date: Some(date),
            ..DailySummary::default()
        };
        for row in rows {
            let (status, count) = row?;
            match string_to_status(&status)? {
                AppointmentStatus::Booked => summary.booked = count,
                AppointmentStatus::Visited => summary.visited = count,
                AppointmentStatus::Done => summary.done = count,
                AppointmentStatus::Paid => summary.paid = count,
                AppointmentStatus::Cancelled => summary.cancelled = count,
                AppointmentStatus::NoShow => summary.no_show = count,
            }
        }
        Ok(summary)
    }
}

/// Intermediate row struct for database mapping.
struct AppointmentRow {
    id: String,
    patient_id: String,
    scheduled_at: String,
    duration_minutes: i64,
    treatment_type: Option<String>,
    notes: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DbError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            patient_id: row.patient_id,
            scheduled_at: ts_from_string(&row.scheduled_at)?,
            duration_minutes: row.duration_minutes,
            treatment_type: row.treatment_type,
            notes: row.notes,
            status: string_to_status(&row.status)?,
            created_at: ts_from_string(&row.created_at)?,
            updated_at: ts_from_string(&row.updated_at)?,
        })
    }
}

fn status_to_string(status: AppointmentStatus) -> &'static str {
    status.as_str()
}

fn string_to_status(s: &str) -> Result<AppointmentStatus, DbError> {
    match s {
        "booked" => Ok(AppointmentStatus::Booked),
        "visited" => Ok(AppointmentStatus::Visited),
        "done" => Ok(AppointmentStatus::Done),
        "paid" => Ok(AppointmentStatus::Paid),
        "cancelled" => Ok(AppointmentStatus::Cancelled),
        "no_show" => Ok(AppointmentStatus::NoShow),
        _ => Err(DbError::Decode(format!("unknown appointment status: {}", s))),
    }
}
