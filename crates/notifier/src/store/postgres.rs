use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use techconf_common::types::{Attendee, NotificationContent};

use super::{NotificationStore, StoreSession};

/// PostgreSQL-backed store: one pooled connection and transaction per session.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>, sqlx::Error> {
        let tx = self.pool.begin().await?;
        tracing::debug!("Database transaction opened");
        Ok(Box::new(PgStoreSession { tx: Some(tx) }))
    }
}

struct PgStoreSession {
    /// `None` once committed.
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStoreSession {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, sqlx::Error> {
        self.tx
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("session already committed".to_string()))
    }
}

#[async_trait]
impl StoreSession for PgStoreSession {
    async fn fetch_notification(
        &mut self,
        notification_id: i32,
    ) -> Result<Option<NotificationContent>, sqlx::Error> {
        let tx = self.tx()?;
        sqlx::query_as("SELECT message, subject FROM notification WHERE id = $1")
            .bind(notification_id)
            .fetch_optional(&mut **tx)
            .await
    }

    async fn fetch_attendees(&mut self) -> Result<Vec<Attendee>, sqlx::Error> {
        let tx = self.tx()?;
        sqlx::query_as("SELECT email, first_name, last_name FROM attendee")
            .fetch_all(&mut **tx)
            .await
    }

    async fn mark_completed(
        &mut self,
        notification_id: i32,
        completed_date: DateTime<Utc>,
        status: &str,
    ) -> Result<u64, sqlx::Error> {
        let tx = self.tx()?;
        let result =
            sqlx::query("UPDATE notification SET completed_date = $1, status = $2 WHERE id = $3")
                .bind(completed_date)
                .bind(status)
                .bind(notification_id)
                .execute(&mut **tx)
                .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        let mut session = self;
        match session.tx.take() {
            Some(tx) => tx.commit().await,
            None => Ok(()),
        }
    }
}

impl Drop for PgStoreSession {
    fn drop(&mut self) {
        // Transaction's own Drop issues the rollback and returns the connection.
        if self.tx.is_some() {
            tracing::debug!("Database session closed without commit, rolling back");
        }
        tracing::info!("Close database connection");
    }
}
