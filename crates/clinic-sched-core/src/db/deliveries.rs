//! Delivery (reminder instance) database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{ts_from_string, ts_to_string, Database, DbError, DbResult};
use crate::models::{Delivery, DeliveryStatus, LeadTimeBucket, ReminderChannel};

const DELIVERY_COLUMNS: &str = "id, appointment_id, patient_id, channel, lead_time, \
     scheduled_at, status, retry_count, last_error, sent_at, created_at, updated_at";

fn delivery_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryRow> {
    Ok(DeliveryRow {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        patient_id: row.get(2)?,
        channel: row.get(3)?,
        lead_time: row.get(4)?,
        scheduled_at: row.get(5)?,
        status: row.get(6)?,
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        sent_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl Database {
    /// Insert a new delivery.
    pub fn insert_delivery(&self, delivery: &Delivery) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO deliveries (
                id, appointment_id, patient_id, channel, lead_time,
                scheduled_at, status, retry_count, last_error, sent_at,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                delivery.id,
                delivery.appointment_id,
                delivery.patient_id,
                channel_to_string(delivery.channel),
                bucket_to_string(delivery.lead_time),
                ts_to_string(delivery.scheduled_at),
                status_to_string(delivery.status),
                delivery.retry_count,
                delivery.last_error,
                delivery.sent_at.map(ts_to_string),
                ts_to_string(delivery.created_at),
                ts_to_string(delivery.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Get a delivery by ID.
    pub fn get_delivery(&self, id: &str) -> DbResult<Option<Delivery>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM deliveries WHERE id = ?", DELIVERY_COLUMNS),
                [id],
                delivery_from_row,
            )
            .optional()?
            .map(Delivery::try_from)
            .transpose()
    }

    /// All deliveries for an appointment, by fire time.
    pub fn list_deliveries_for_appointment(
        &self,
        appointment_id: &str,
    ) -> DbResult<Vec<Delivery>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM deliveries WHERE appointment_id = ? ORDER BY scheduled_at",
            DELIVERY_COLUMNS
        ))?;

        let rows = stmt.query_map([appointment_id], delivery_from_row)?;

        let mut deliveries = Vec::new();
        for row in rows {
            deliveries.push(row?.try_into()?);
        }
        Ok(deliveries)
    }

    /// Pending deliveries whose fire time has arrived, oldest first.
    /// Served by the `(status, scheduled_at)` index.
    pub fn list_due_deliveries(&self, now: DateTime<Utc>) -> DbResult<Vec<Delivery>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM deliveries
            WHERE status = 'pending' AND scheduled_at <= ?
            ORDER BY scheduled_at
            "#,
            DELIVERY_COLUMNS
        ))?;

        let rows = stmt.query_map([ts_to_string(now)], delivery_from_row)?;

        let mut deliveries = Vec::new();
        for row in rows {
            deliveries.push(row?.try_into()?);
        }
        Ok(deliveries)
    }

    /// Cascade: cancel every pending delivery for an appointment.
    /// Terminal rows are untouched. Returns the number cancelled.
    pub fn cancel_pending_deliveries(
        &self,
        appointment_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE deliveries SET status = 'cancelled', updated_at = ?2
            WHERE appointment_id = ?1 AND status = 'pending'
            "#,
            params![appointment_id, ts_to_string(now)],
        )?;
        Ok(rows_affected)
    }

    /// Mark a pending delivery sent. The `status = 'pending'` guard makes
    /// duplicate triggers harmless.
    pub fn mark_delivery_sent(&self, id: &str, sent_at: DateTime<Utc>) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE deliveries SET status = 'sent', sent_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id, ts_to_string(sent_at)],
        )?;
        Ok(rows_affected > 0)
    }

    /// Mark a pending delivery cancelled (stale appointment at dispatch time).
    pub fn mark_delivery_cancelled(&self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE deliveries SET status = 'cancelled', updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id, ts_to_string(now)],
        )?;
        Ok(rows_affected > 0)
    }

    /// Record a failed attempt. Leaves the row `pending` for another pass
    /// unless `terminal` is set, in which case it becomes `failed` for good.
    pub fn record_delivery_failure(
        &self,
        id: &str,
        error: &str,
        retry_count: u32,
        terminal: bool,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let status = if terminal { "failed" } else { "pending" };
        let rows_affected = self.conn.execute(
            r#"
            UPDATE deliveries SET status = ?2, retry_count = ?3, last_error = ?4, updated_at = ?5
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id, status, retry_count, error, ts_to_string(now)],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct DeliveryRow {
    id: String,
    appointment_id: String,
    patient_id: String,
    channel: String,
    lead_time: String,
    scheduled_at: String,
    status: String,
    retry_count: u32,
    last_error: Option<String>,
    sent_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = DbError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(Delivery {
            id: row.id,
            appointment_id: row.appointment_id,
            patient_id: row.patient_id,
            channel: string_to_channel(&row.channel)?,
            lead_time: string_to_bucket(&row.lead_time)?,
            scheduled_at: ts_from_string(&row.scheduled_at)?,
            status: string_to_status(&row.status)?,
            retry_count: row.retry_count,
            last_error: row.last_error,
            sent_at: row.sent_at.as_deref().map(ts_from_string).transpose()?,
            created_at: ts_from_string(&row.created_at)?,
            updated_at: ts_from_string(&row.updated_at)?,
        })
    }
}

fn status_to_string(status: DeliveryStatus) -> &'static str {
    status.as_str()
}

fn string_to_status(s: &str) -> Result<DeliveryStatus, DbError> {
    match s {
        "pending" => Ok(DeliveryStatus::Pending),
        "sent" => Ok(DeliveryStatus::Sent),
        "failed" => Ok(DeliveryStatus::Failed),
        "cancelled" => Ok(DeliveryStatus::Cancelled),
        _ => Err(DbError::Decode(format!("unknown delivery status: {}", s))),
    }
}

fn channel_to_string(channel: ReminderChannel) -> &'static str {
    channel.as_str()
}

fn string_to_channel(s: &str) -> Result<ReminderChannel, DbError> {
    match s {
        "email" => Ok(ReminderChannel::Email),
        "sms" => Ok(ReminderChannel::Sms),
        "push" => Ok(ReminderChannel::Push),
        _ => Err(DbError::Decode(format!("unknown channel: {}", s))),
    }
}

fn bucket_to_string(bucket: LeadTimeBucket) -> &'static str {
    bucket.as_str()
}

fn string_to_bucket(s: &str) -> Result<LeadTimeBucket, DbError> {
    match s {
        "seven_day" => Ok(LeadTimeBucket::SevenDay),
        "three_day" => Ok(LeadTimeBucket::ThreeDay),
        "one_day" => Ok(LeadTimeBucket::OneDay),
        _ => Err(DbError::Decode(format!("unknown lead-time bucket: {}", s))),
    }
}
