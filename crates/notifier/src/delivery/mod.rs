//! Email delivery backends.
//!
//! The dispatcher only sees [`EmailSender`]; which backend runs is decided by
//! `EMAIL_DELIVERY_MODE` when the worker starts.

mod log_only;
mod sendgrid;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use techconf_common::config::{EmailConfig, EmailDeliveryMode};

pub use log_only::LogOnlySender;
pub use sendgrid::SendGridSender;

use crate::error::DeliveryError;

/// One plain-text email to one recipient. The sender supplies the from-address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
}

impl EmailMessage {
    /// Reject messages no backend could deliver.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        let to = self.to.trim();
        if to.is_empty() {
            return Err(DeliveryError::InvalidMessage("recipient is empty".to_string()));
        }
        if !to.contains('@') {
            return Err(DeliveryError::InvalidMessage(format!(
                "recipient '{}' is not an email address",
                to
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Hand one message to the backend. Returns once it has been accepted.
    async fn send(&self, email: &EmailMessage) -> Result<(), DeliveryError>;
}

/// Build the sender selected by the email configuration.
pub fn build_sender(config: &EmailConfig) -> Result<Arc<dyn EmailSender>, DeliveryError> {
    let sender: Arc<dyn EmailSender> = match config.delivery_mode {
        EmailDeliveryMode::LogOnly => Arc::new(LogOnlySender::new(config.from_address.clone())),
        EmailDeliveryMode::SendGrid => Arc::new(SendGridSender::new(
            config.api_base_url.clone(),
            config.api_key.clone(),
            config.from_address.clone(),
            Duration::from_secs(config.timeout_secs),
        )?),
    };

    tracing::info!(
        backend = sender.name(),
        from = %config.from_address,
        "Email sender configured"
    );
    Ok(sender)
}
