//! SendGrid v3 Mail Send client.
//!
//! One `POST /v3/mail/send` per message. SendGrid answers `202 Accepted` once a
//! message is queued on their side; any non-2xx status is surfaced as
//! [`DeliveryError::Rejected`] with the response body for diagnosis.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{EmailMessage, EmailSender};
use crate::error::DeliveryError;

const MAIL_SEND_PATH: &str = "/v3/mail/send";

pub struct SendGridSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_address: String,
}

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

impl SendGridSender {
    pub fn new(
        api_base_url: String,
        api_key: String,
        from_address: String,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}{}", api_base_url.trim_end_matches('/'), MAIL_SEND_PATH);

        Ok(Self {
            client,
            endpoint,
            api_key,
            from_address,
        })
    }

    fn request_body<'a>(&'a self, email: &'a EmailMessage) -> MailSendRequest<'a> {
        MailSendRequest {
            personalizations: [Personalization {
                to: [Address {
                    email: email.to.trim(),
                }],
            }],
            from: Address {
                email: &self.from_address,
            },
            subject: &email.subject,
            content: [Content {
                content_type: "text/plain",
                value: &email.text_body,
            }],
        }
    }
}

#[async_trait]
impl EmailSender for SendGridSender {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn send(&self, email: &EmailMessage) -> Result<(), DeliveryError> {
        email.validate()?;

        tracing::debug!(
            to = %email.to,
            subject = %email.subject,
            from = %self.from_address,
            "Submitting email to SendGrid"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(email))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(to = %email.to, status = status.as_u16(), "Email was sent");
        Ok(())
    }
}
