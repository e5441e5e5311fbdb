use std::sync::Arc;

use techconf_common::config::AppConfig;
use techconf_common::db;
use techconf_common::redis_pool::create_redis_pool;
use techconf_notifier::NotificationDispatcher;
use techconf_notifier::delivery::build_sender;
use techconf_notifier::store::PgNotificationStore;
use techconf_worker::consumer::QueueConsumer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "techconf_worker=info,techconf_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("TechConf notification worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database)?;

    if config.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let redis = create_redis_pool(&config.redis_url).await?;
    let sender = build_sender(&config.email)?;

    let dispatcher = NotificationDispatcher::new(
        Arc::new(PgNotificationStore::new(pool.clone())),
        sender,
    );
    let mut consumer = QueueConsumer::new(redis, config.queue.clone(), dispatcher);
    consumer.register().await?;
    let heartbeat = consumer.spawn_heartbeat();

    // A dispatch interrupted by shutdown is still in this consumer's
    // processing list; `shutdown` puts it back on the queue.
    let outcome = tokio::select! {
        result = consumer.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            Ok(())
        }
    };

    heartbeat.abort();
    if let Err(e) = consumer.shutdown().await {
        // The heartbeat expires on its own and another worker reclaims the list.
        tracing::warn!(error = %e, "Failed to deregister queue consumer");
    }
    pool.close().await;

    if let Err(e) = outcome {
        tracing::error!(error = %e, "Queue consumer exited with error");
        return Err(e.into());
    }
    tracing::info!("TechConf notification worker stopped.");
    Ok(())
}
