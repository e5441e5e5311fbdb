//! In-memory store and email sender for dispatcher tests.
//!
//! Enabled with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! techconf-notifier = { workspace = true, features = ["test-utils"] }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use techconf_common::types::{Attendee, Notification, NotificationContent};

use crate::delivery::{EmailMessage, EmailSender};
use crate::error::DeliveryError;
use crate::store::{NotificationStore, StoreSession};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Begin,
    FetchNotification,
    FetchAttendees,
    MarkCompleted,
    Commit,
}

#[derive(Default)]
struct MockStoreState {
    notifications: Mutex<HashMap<i32, Notification>>,
    attendees: Mutex<Vec<Attendee>>,
    fail_on: Mutex<Option<StoreOperation>>,
    open_sessions: AtomicUsize,
    sessions_opened: AtomicUsize,
    commits: AtomicUsize,
}

// ===== MockNotificationStore =====

/// Writes are staged per session and applied on commit, like a transaction.
#[derive(Clone, Default)]
pub struct MockNotificationStore {
    state: Arc<MockStoreState>,
}

impl MockNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_notification(&self, id: i32, message: &str, subject: &str) {
        self.state.notifications.lock().unwrap().insert(
            id,
            Notification {
                id,
                status: None,
                message: message.to_string(),
                subject: subject.to_string(),
                submitted_date: Some(Utc::now()),
                completed_date: None,
            },
        );
    }

    pub fn add_attendee(&self, email: &str, first_name: &str, last_name: &str) {
        self.state.attendees.lock().unwrap().push(Attendee {
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        });
    }

    pub fn fail_on(&self, operation: StoreOperation) {
        *self.state.fail_on.lock().unwrap() = Some(operation);
    }

    pub fn notification(&self, id: i32) -> Option<Notification> {
        self.state.notifications.lock().unwrap().get(&id).cloned()
    }

    /// Sessions begun but not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    fn check(&self, operation: StoreOperation) -> Result<(), sqlx::Error> {
        if *self.state.fail_on.lock().unwrap() == Some(operation) {
            return Err(sqlx::Error::Protocol(format!(
                "injected failure during {:?}",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MockNotificationStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>, sqlx::Error> {
        self.check(StoreOperation::Begin)?;
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStoreSession {
            store: self.clone(),
            pending: Vec::new(),
        }))
    }
}

struct MockStoreSession {
    store: MockNotificationStore,
    pending: Vec<(i32, DateTime<Utc>, String)>,
}

#[async_trait]
impl StoreSession for MockStoreSession {
    async fn fetch_notification(
        &mut self,
        notification_id: i32,
    ) -> Result<Option<NotificationContent>, sqlx::Error> {
        self.store.check(StoreOperation::FetchNotification)?;
        Ok(self
            .store
            .notification(notification_id)
            .map(|n| NotificationContent {
                message: n.message,
                subject: n.subject,
            }))
    }

    async fn fetch_attendees(&mut self) -> Result<Vec<Attendee>, sqlx::Error> {
        self.store.check(StoreOperation::FetchAttendees)?;
        Ok(self.store.state.attendees.lock().unwrap().clone())
    }

    async fn mark_completed(
        &mut self,
        notification_id: i32,
        completed_date: DateTime<Utc>,
        status: &str,
    ) -> Result<u64, sqlx::Error> {
        self.store.check(StoreOperation::MarkCompleted)?;
        if self.store.notification(notification_id).is_none() {
            return Ok(0);
        }
        self.pending
            .push((notification_id, completed_date, status.to_string()));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        let mut session = self;
        session.store.check(StoreOperation::Commit)?;

        let mut notifications = session.store.state.notifications.lock().unwrap();
        for (id, completed_date, status) in session.pending.drain(..) {
            if let Some(n) = notifications.get_mut(&id) {
                n.completed_date = Some(completed_date);
                n.status = Some(status);
            }
        }
        drop(notifications);

        session.store.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockStoreSession {
    fn drop(&mut self) {
        self.store.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

// ===== MockEmailSender =====

/// Records every message it accepts. Recipients marked with
/// [`MockEmailSender::fail_for`] are rejected with a 500, or with the given
/// status via [`MockEmailSender::fail_with_status`].
#[derive(Clone, Default)]
pub struct MockEmailSender {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
    attempts: Arc<AtomicUsize>,
    failing_recipients: Arc<Mutex<HashMap<String, u16>>>,
}

impl MockEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, recipient: &str) {
        self.fail_with_status(recipient, 500);
    }

    pub fn fail_with_status(&self, recipient: &str, status: u16) {
        self.failing_recipients
            .lock()
            .unwrap()
            .insert(recipient.to_string(), status);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Calls to `send`, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for MockEmailSender {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, email: &EmailMessage) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(&status) = self.failing_recipients.lock().unwrap().get(&email.to) {
            return Err(DeliveryError::Rejected {
                status,
                body: "injected failure".to_string(),
            });
        }

        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}
