//! Redis-list queue consumer.
//!
//! Producers `LPUSH` notification ids onto the queue. Each consumer registers
//! an id in `{queue}:consumers` and keeps `{queue}:heartbeat:{id}` alive while
//! it runs. It moves one message at a time into its own
//! `{queue}:processing:{id}` list with `BLMOVE`, dispatches it, and then acks,
//! delays or dead-letters it. A message is only removed from the processing
//! list after its disposition has been applied, so a crash mid-dispatch leaves
//! it there until [`QueueConsumer::recover_in_flight`] finds the heartbeat expired.
//!
//! Retries wait in the `{queue}:delayed` sorted set, scored by the time they
//! become due, and are moved back onto the queue at the start of each poll.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use uuid::Uuid;

use techconf_common::config::QueueConfig;
use techconf_common::error::AppError;
use techconf_notifier::NotificationDispatcher;

use crate::trigger::{DeadLetterRecord, Disposition, parse_notification_id};

/// Retries promoted per poll.
const PROMOTE_BATCH: usize = 100;

// KEYS[1] = delayed set, KEYS[2] = queue, ARGV[1] = now (ms), ARGV[2] = batch size
const PROMOTE_DUE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, body in ipairs(due) do
    redis.call('ZREM', KEYS[1], body)
    redis.call('LPUSH', KEYS[2], body)
end
return #due
";

pub struct QueueConsumer {
    redis: ConnectionManager,
    queue: QueueConfig,
    dispatcher: NotificationDispatcher,
    consumer_id: String,
    promote_due: redis::Script,
}

impl QueueConsumer {
    pub fn new(
        redis: ConnectionManager,
        queue: QueueConfig,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            redis,
            queue,
            dispatcher,
            consumer_id: Uuid::new_v4().to_string(),
            promote_due: redis::Script::new(PROMOTE_DUE_SCRIPT),
        }
    }

    pub fn id(&self) -> &str {
        &self.consumer_id
    }

    /// This consumer's in-flight list.
    pub fn processing_key(&self) -> String {
        self.queue.processing_key(&self.consumer_id)
    }

    /// Announce this consumer and start its heartbeat.
    pub async fn register(&mut self) -> Result<(), AppError> {
        let _: () = redis::pipe()
            .atomic()
            .sadd(self.queue.consumers_key(), &self.consumer_id)
            .ignore()
            .set_ex(
                self.queue.heartbeat_key(&self.consumer_id),
                1,
                self.queue.heartbeat_ttl_secs,
            )
            .ignore()
            .query_async(&mut self.redis)
            .await?;

        tracing::info!(consumer_id = %self.consumer_id, "Queue consumer registered");
        Ok(())
    }

    /// Refresh the heartbeat key in the background until the handle is aborted.
    ///
    /// The refresh runs on its own connection clone so a long dispatch does not
    /// let the key expire.
    pub fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let mut redis = self.redis.clone();
        let key = self.queue.heartbeat_key(&self.consumer_id);
        let ttl = self.queue.heartbeat_ttl_secs;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs((ttl / 3).max(1)));
            loop {
                ticker.tick().await;
                let refreshed: Result<(), _> = redis.set_ex(&key, 1, ttl).await;
                if let Err(e) = refreshed {
                    tracing::warn!(error = %e, "Failed to refresh consumer heartbeat");
                }
            }
        })
    }

    /// Consume messages until the task is cancelled. Call [`Self::register`] first.
    pub async fn run(&mut self) -> Result<(), AppError> {
        let recovered = self.recover_in_flight().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Requeued messages left in processing by expired consumers");
        }

        tracing::info!(
            queue = %self.queue.name,
            consumer_id = %self.consumer_id,
            max_delivery_attempts = self.queue.max_delivery_attempts,
            "Queue consumer started"
        );

        loop {
            self.poll_once().await?;
        }
    }

    /// Promote due retries, then wait up to the poll timeout for one message
    /// and handle it. Returns `None` if the queue stayed empty.
    pub async fn poll_once(&mut self) -> Result<Option<Disposition>, AppError> {
        let promoted = self.promote_due_retries().await?;
        if promoted > 0 {
            tracing::debug!(promoted, "Delayed retries moved back onto the queue");
        }

        let body: Option<Vec<u8>> = redis::cmd("BLMOVE")
            .arg(&self.queue.name)
            .arg(self.processing_key())
            .arg("RIGHT")
            .arg("LEFT")
            .arg(self.queue.poll_timeout_secs)
            .query_async(&mut self.redis)
            .await?;

        match body {
            Some(body) => Ok(Some(self.handle(&body).await?)),
            None => Ok(None),
        }
    }

    /// Move retries whose delay has elapsed from the delayed set to the queue.
    pub async fn promote_due_retries(&mut self) -> Result<usize, AppError> {
        let promoted: usize = self
            .promote_due
            .key(self.queue.delayed_key())
            .key(&self.queue.name)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut self.redis)
            .await?;
        Ok(promoted)
    }

    /// Requeue the in-flight messages of every registered consumer whose
    /// heartbeat has expired, then forget those consumers. Live consumers,
    /// this one included, are left alone.
    pub async fn recover_in_flight(&mut self) -> Result<usize, AppError> {
        let consumers_key = self.queue.consumers_key();
        let consumers: Vec<String> = self.redis.smembers(&consumers_key).await?;

        let mut recovered = 0;
        for consumer_id in consumers {
            if consumer_id == self.consumer_id {
                continue;
            }
            let alive: bool = self
                .redis
                .exists(self.queue.heartbeat_key(&consumer_id))
                .await?;
            if alive {
                continue;
            }

            let processing = self.queue.processing_key(&consumer_id);
            let moved = self.requeue_all(&processing).await?;
            let _: () = self.redis.srem(&consumers_key, &consumer_id).await?;

            tracing::warn!(consumer_id = %consumer_id, moved, "Reclaimed expired consumer");
            recovered += moved;
        }

        Ok(recovered)
    }

    /// Hand back anything still in flight and deregister.
    pub async fn shutdown(&mut self) -> Result<usize, AppError> {
        let processing = self.processing_key();
        let requeued = self.requeue_all(&processing).await?;

        let _: () = redis::pipe()
            .atomic()
            .srem(self.queue.consumers_key(), &self.consumer_id)
            .ignore()
            .del(self.queue.heartbeat_key(&self.consumer_id))
            .ignore()
            .query_async(&mut self.redis)
            .await?;

        tracing::info!(consumer_id = %self.consumer_id, requeued, "Queue consumer deregistered");
        Ok(requeued)
    }

    /// Move every entry of `from` back onto the consuming end of the queue.
    async fn requeue_all(&mut self, from: &str) -> Result<usize, AppError> {
        let mut moved = 0;
        loop {
            let body: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(from)
                .arg(&self.queue.name)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut self.redis)
                .await?;

            if body.is_none() {
                return Ok(moved);
            }
            moved += 1;
        }
    }

    async fn handle(&mut self, body: &[u8]) -> Result<Disposition, AppError> {
        let invocation_id = Uuid::new_v4();

        let notification_id = match parse_notification_id(body) {
            Ok(id) => id,
            Err(e) => {
                let disposition = Disposition::DeadLetter {
                    reason: e.to_string(),
                    attempts: 1,
                };
                tracing::warn!(
                    invocation_id = %invocation_id,
                    error = %e,
                    "Rejecting trigger message"
                );
                self.apply(body, &disposition).await?;
                return Ok(disposition);
            }
        };

        tracing::info!(
            invocation_id = %invocation_id,
            notification_id,
            "Queue trigger processed message"
        );

        let disposition = match self.dispatcher.dispatch(notification_id).await {
            Ok(report) => {
                tracing::info!(
                    invocation_id = %invocation_id,
                    notification_id,
                    attendees_notified = report.attendees_notified,
                    "Notification dispatched"
                );
                Disposition::Complete
            }
            Err(error) => {
                let attempts: u32 = self.redis.hincr(self.queue.attempts_key(), body, 1).await?;
                let disposition = Disposition::after_failure(&error, attempts, &self.queue);

                tracing::error!(
                    invocation_id = %invocation_id,
                    notification_id,
                    attempts,
                    transient = error.is_transient(),
                    error = %error,
                    "Notification dispatch failed"
                );
                disposition
            }
        };

        self.apply(body, &disposition).await?;
        Ok(disposition)
    }

    async fn apply(&mut self, body: &[u8], disposition: &Disposition) -> Result<(), AppError> {
        let processing = self.processing_key();
        let attempts_key = self.queue.attempts_key();

        match disposition {
            Disposition::Complete => {
                let _: () = redis::pipe()
                    .atomic()
                    .lrem(&processing, 1, body)
                    .ignore()
                    .hdel(&attempts_key, body)
                    .ignore()
                    .query_async(&mut self.redis)
                    .await?;
            }
            Disposition::Retry {
                attempts,
                delay_secs,
            } => {
                let delay_ms = i64::try_from(delay_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
                let due_at = Utc::now().timestamp_millis().saturating_add(delay_ms);

                let _: () = redis::pipe()
                    .atomic()
                    .zadd(self.queue.delayed_key(), body, due_at)
                    .ignore()
                    .lrem(&processing, 1, body)
                    .ignore()
                    .query_async(&mut self.redis)
                    .await?;

                tracing::warn!(attempts, delay_secs, "Message delayed for redelivery");
            }
            Disposition::DeadLetter { reason, attempts } => {
                let record = DeadLetterRecord::new(body, reason, *attempts);
                let payload = serde_json::to_string(&record)
                    .map_err(|e| AppError::Internal(format!("dead-letter record: {}", e)))?;

                let _: () = redis::pipe()
                    .atomic()
                    .lpush(self.queue.dead_letter_key(), payload)
                    .ignore()
                    .lrem(&processing, 1, body)
                    .ignore()
                    .hdel(&attempts_key, body)
                    .ignore()
                    .query_async(&mut self.redis)
                    .await?;

                tracing::error!(reason = %reason, attempts, "Message moved to dead-letter list");
            }
        }

        Ok(())
    }
}
