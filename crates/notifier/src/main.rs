use std::sync::Arc;
use std::time::Duration;

use agentdesk_common::config::AppConfig;
use agentdesk_common::db;
use agentdesk_notifier::resolver::StaticDeliveryConfig;
use agentdesk_notifier::retry::RetryPolicy;
use agentdesk_notifier::sender::TelegramSender;
use agentdesk_notifier::{Dispatcher, DispatcherConfig, PgNotificationStore, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentdesk_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("AgentDesk notifier starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    let bot_token = config
        .telegram_bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("TELEGRAM_BOT_TOKEN environment variable is required"))?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let dispatcher = Dispatcher::new(
        Arc::new(PgNotificationStore::new(pool)),
        Arc::new(TelegramSender::new(bot_token)?),
        Arc::new(SystemClock),
        Arc::new(StaticDeliveryConfig::new(config.telegram_chat_id.clone())),
        DispatcherConfig {
            poll_interval: Duration::from_millis(config.dispatch_poll_interval_ms),
            batch_size: config.dispatch_batch_size,
            lease_duration_ms: config.notify_lease_duration_ms,
            max_retries: config.notify_max_retries,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(config.notify_retry_base_ms),
                max_delay: Duration::from_millis(config.notify_retry_max_ms),
                ..RetryPolicy::default()
            },
        },
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        _ = dispatcher.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("AgentDesk notifier stopped.");
    Ok(())
}
