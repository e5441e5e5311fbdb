use async_trait::async_trait;

use super::{EmailMessage, EmailSender};
use crate::error::DeliveryError;

/// Logs each message instead of calling the email API.
#[derive(Debug, Clone)]
pub struct LogOnlySender {
    from_address: String,
}

impl LogOnlySender {
    pub fn new(from_address: String) -> Self {
        Self { from_address }
    }
}

#[async_trait]
impl EmailSender for LogOnlySender {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, email: &EmailMessage) -> Result<(), DeliveryError> {
        if let Err(e) = email.validate() {
            tracing::warn!(
                to = %email.to,
                error = %e,
                "Recipient would be rejected by the email API"
            );
        }

        tracing::info!(
            from = %self.from_address,
            to = %email.to,
            subject = %email.subject,
            "Email delivery disabled, message logged only"
        );
        Ok(())
    }
}
