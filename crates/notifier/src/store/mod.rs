//! Scoped access to the notification and attendee tables.
//!
//! A dispatch opens exactly one [`StoreSession`]. Dropping a session without
//! calling [`StoreSession::commit`] releases its connection and discards any
//! uncommitted write.

mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use techconf_common::types::{Attendee, NotificationContent};

pub use postgres::PgNotificationStore;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Acquire a connection and open a transaction on it.
    async fn begin(&self) -> Result<Box<dyn StoreSession>, sqlx::Error>;
}

#[async_trait]
pub trait StoreSession: Send {
    async fn fetch_notification(
        &mut self,
        notification_id: i32,
    ) -> Result<Option<NotificationContent>, sqlx::Error>;

    /// Every attendee, in the order the database returns them.
    async fn fetch_attendees(&mut self) -> Result<Vec<Attendee>, sqlx::Error>;

    /// Returns the number of rows updated.
    async fn mark_completed(
        &mut self,
        notification_id: i32,
        completed_date: DateTime<Utc>,
        status: &str,
    ) -> Result<u64, sqlx::Error>;

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error>;
}
