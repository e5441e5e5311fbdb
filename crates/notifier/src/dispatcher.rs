//! Notification dispatcher.
//!
//! For one notification id:
//! 1. Open a store session (one transaction)
//! 2. Load the notification's message and subject
//! 3. Load every attendee
//! 4. Email each attendee in turn, stopping at the first failed send
//! 5. Write `completed_date` and `"Notified {n} attendees"` back, then commit
//!
//! The session is dropped on every early return, which rolls back and
//! releases the connection. Nothing is written unless every email was sent.

use std::sync::Arc;

use chrono::Utc;
use techconf_common::types::{DispatchReport, completion_status};

use crate::delivery::{EmailMessage, EmailSender};
use crate::error::DispatchError;
use crate::store::NotificationStore;

pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    sender: Arc<dyn EmailSender>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn NotificationStore>, sender: Arc<dyn EmailSender>) -> Self {
        Self { store, sender }
    }

    pub async fn dispatch(&self, notification_id: i32) -> Result<DispatchReport, DispatchError> {
        let mut session = self.store.begin().await?;

        let content = session
            .fetch_notification(notification_id)
            .await?
            .ok_or(DispatchError::NotFound(notification_id))?;

        let attendees = session.fetch_attendees().await?;
        let total = attendees.len();

        tracing::info!(
            notification_id,
            attendees = total,
            subject = %content.subject,
            "Sending notification to attendees"
        );

        for (delivered, attendee) in attendees.iter().enumerate() {
            let email = EmailMessage {
                to: attendee.email.clone(),
                subject: content.subject.clone(),
                text_body: attendee.greeting(&content.message),
            };

            tracing::info!(to = %email.to, subject = %email.subject, "Send email");

            self.sender
                .send(&email)
                .await
                .map_err(|source| DispatchError::Delivery {
                    recipient: attendee.email.clone(),
                    delivered,
                    total,
                    source,
                })?;
        }

        let completed_date = Utc::now();
        let status = completion_status(total);

        tracing::info!(notification_id, status = %status, "Updating notification table");
        let updated = session
            .mark_completed(notification_id, completed_date, &status)
            .await?;
        if updated == 0 {
            // Row vanished between the read and the write.
            return Err(DispatchError::NotFound(notification_id));
        }

        session.commit().await?;
        tracing::info!(notification_id, "Notification table updated");

        Ok(DispatchReport {
            notification_id,
            attendees_notified: total,
            status,
            completed_date,
        })
    }
}
