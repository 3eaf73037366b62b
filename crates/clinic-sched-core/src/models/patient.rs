//! Patient models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ReminderChannel;

/// A patient record with the contact data reminder delivery needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// UUID, generated locally
    pub id: String,
    /// Patient name
    pub name: String,
    /// Phone number for SMS reminders
    pub phone: Option<String>,
    /// Email address for email reminders
    pub email: Option<String>,
    /// Messaging-app identifier for push reminders
    pub push_id: Option<String>,
    /// Additional notes
    pub notes: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    /// Create a new patient with required fields.
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            phone: None,
            email: None,
            push_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Best reminder channel for this patient: push, then email, then SMS.
    /// Returns `None` when no contact data is on file.
    pub fn preferred_channel(&self) -> Option<ReminderChannel> {
        if self.push_id.is_some() {
            Some(ReminderChannel::Push)
        } else if self.email.is_some() {
            Some(ReminderChannel::Email)
        } else if self.phone.is_some() {
            Some(ReminderChannel::Sms)
        } else {
            None
        }
    }

    /// The recipient address for a given channel, if on file.
    pub fn recipient_for(&self, channel: ReminderChannel) -> Option<&str> {
        match channel {
            ReminderChannel::Email => self.email.as_deref(),
            ReminderChannel::Sms => self.phone.as_deref(),
            ReminderChannel::Push => self.push_id.as_deref(),
        }
    }
}
