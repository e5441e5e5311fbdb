//! Trigger message handling: body parsing and what to do with a message
//! after its dispatch has run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use techconf_common::config::QueueConfig;
use techconf_common::error::AppError;
use techconf_notifier::DispatchError;

/// Parse a trigger body: UTF-8 text holding a decimal notification id.
pub fn parse_notification_id(body: &[u8]) -> Result<i32, AppError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| AppError::InvalidMessage("body is not valid UTF-8".to_string()))?;

    text.trim()
        .parse::<i32>()
        .map_err(|_| AppError::InvalidMessage(format!("'{}' is not a notification id", text)))
}

/// What the consumer does with a message once handling has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Remove from the queue.
    Complete,
    /// Hold in the delayed set, then put back on the queue for another delivery.
    Retry { attempts: u32, delay_secs: u64 },
    /// Move to the dead-letter list.
    DeadLetter { reason: String, attempts: u32 },
}

impl Disposition {
    /// Decide after a failed dispatch. `attempts` includes the one that just failed.
    pub fn after_failure(error: &DispatchError, attempts: u32, queue: &QueueConfig) -> Self {
        if !error.is_transient() {
            return Disposition::DeadLetter {
                reason: error.to_string(),
                attempts,
            };
        }

        if attempts >= queue.max_delivery_attempts {
            return Disposition::DeadLetter {
                reason: format!("{} (gave up after {} attempts)", error, attempts),
                attempts,
            };
        }

        Disposition::Retry {
            attempts,
            delay_secs: queue.retry_delay_secs(attempts),
        }
    }
}

/// Entry pushed onto the dead-letter list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub body: String,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(body: &[u8], reason: &str, attempts: u32) -> Self {
        Self {
            body: String::from_utf8_lossy(body).into_owned(),
            reason: reason.to_string(),
            attempts,
            dead_lettered_at: Utc::now(),
        }
    }
}
