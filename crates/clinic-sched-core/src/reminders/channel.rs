//! Channel adapters: the seam between the dispatcher and the outside world.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{LeadTimeBucket, ReminderChannel};

/// How a send attempt failed. The distinction drives retry bookkeeping:
/// retryable errors count against the bound, terminal errors end the
/// delivery immediately.
#[derive(Error, Debug)]
pub enum SendError {
    /// Transient channel/network failure; worth another pass
    #[error("retryable channel failure: {0}")]
    Retryable(String),

    /// Permanently undeliverable (e.g. malformed address); never retried
    #[error("permanently undeliverable: {0}")]
    Terminal(String),
}

/// What the adapter gets to render and send. Message content and
/// localization are the adapter's concern, not this core's.
#[derive(Debug, Clone)]
pub struct ReminderMessage {
    pub appointment_id: String,
    pub patient_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub treatment_type: Option<String>,
    pub lead_time: LeadTimeBucket,
}

/// One implementation per delivery channel (email, SMS, push).
pub trait ChannelAdapter {
    fn send(&self, recipient: &str, message: &ReminderMessage) -> Result<(), SendError>;
}

/// Selects the adapter for a delivery's channel at dispatch time.
/// A channel with no registered adapter is a deployment gap, not a
/// delivery failure; dispatch reports it without touching the row.
#[derive(Default)]
pub struct ChannelRouter<'a> {
    email: Option<&'a dyn ChannelAdapter>,
    sms: Option<&'a dyn ChannelAdapter>,
    push: Option<&'a dyn ChannelAdapter>,
}

impl<'a> ChannelRouter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_email(mut self, adapter: &'a dyn ChannelAdapter) -> Self {
        self.email = Some(adapter);
        self
    }

    pub fn with_sms(mut self, adapter: &'a dyn ChannelAdapter) -> Self {
        self.sms = Some(adapter);
        self
    }

    pub fn with_push(mut self, adapter: &'a dyn ChannelAdapter) -> Self {
        self.push = Some(adapter);
        self
    }

    pub fn adapter_for(&self, channel: ReminderChannel) -> Option<&'a dyn ChannelAdapter> {
        match channel {
            ReminderChannel::Email => self.email,
            ReminderChannel::Sms => self.sms,
            ReminderChannel::Push => self.push,
        }
    }
}
