//! Reminder delivery models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The channel a reminder is sent through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChannel {
    Email,
    Sms,
    Push,
}

impl ReminderChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
        }
    }
}

impl std::fmt::Display for ReminderChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named offset before the appointment at which a reminder fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LeadTimeBucket {
    SevenDay,
    ThreeDay,
    OneDay,
}

impl LeadTimeBucket {
    /// All buckets, furthest out first.
    pub const ALL: [LeadTimeBucket; 3] = [Self::SevenDay, Self::ThreeDay, Self::OneDay];

    /// Offset subtracted from the appointment time to get the fire time.
    pub fn offset(self) -> Duration {
        match self {
            Self::SevenDay => Duration::days(7),
            Self::ThreeDay => Duration::days(3),
            Self::OneDay => Duration::days(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SevenDay => "seven_day",
            Self::ThreeDay => "three_day",
            Self::OneDay => "one_day",
        }
    }
}

impl std::fmt::Display for LeadTimeBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its fire time (or for a retry)
    Pending,
    /// Handed to the channel adapter successfully
    Sent,
    /// Gave up: retries exhausted or permanently undeliverable
    Failed,
    /// Appointment cancelled/rescheduled before the reminder fired
    Cancelled,
}

impl DeliveryStatus {
    /// `sent`, `failed` and `cancelled` rows are never mutated again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reminder instance: a row per (appointment, lead-time bucket).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    /// UUID
    pub id: String,
    /// Appointment this reminder is for
    pub appointment_id: String,
    /// Patient to notify (denormalized for the dispatcher)
    pub patient_id: String,
    /// Delivery channel, chosen at creation from the patient's contact data
    pub channel: ReminderChannel,
    /// Which lead-time bucket this instance covers
    pub lead_time: LeadTimeBucket,
    /// When the dispatcher should fire this reminder
    pub scheduled_at: DateTime<Utc>,
    /// Delivery status
    pub status: DeliveryStatus,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Most recent channel error, if any
    pub last_error: Option<String>,
    /// When the reminder was actually sent
    pub sent_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp (doubles as last-attempt time for backoff)
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Create a pending delivery for an appointment reminder.
    pub fn new(
        appointment_id: String,
        patient_id: String,
        channel: ReminderChannel,
        lead_time: LeadTimeBucket,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            appointment_id,
            patient_id,
            channel,
            lead_time,
            scheduled_at,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            last_error: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
