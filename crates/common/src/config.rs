use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Telegram bot token used by the delivery channel
    pub telegram_bot_token: Option<String>,

    /// Default chat that receives task notifications
    pub telegram_chat_id: Option<String>,

    /// Dispatcher polling interval in milliseconds (default: 1000)
    pub dispatch_poll_interval_ms: u64,

    /// Maximum candidates fetched per dispatcher poll (default: 20)
    pub dispatch_batch_size: i64,

    /// How long a claimed record stays invisible to other dispatchers (default: 60000)
    pub notify_lease_duration_ms: i64,

    /// Delivery attempts before a record is abandoned (default: 10)
    pub notify_max_retries: i32,

    /// First retry delay in milliseconds (default: 30000)
    pub notify_retry_base_ms: u64,

    /// Upper bound for the retry delay in milliseconds (default: 3600000)
    pub notify_retry_max_ms: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            telegram_bot_token: non_empty_var("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty_var("TELEGRAM_CHAT_ID"),
            dispatch_poll_interval_ms: parse_var("DISPATCH_POLL_INTERVAL_MS", "1000")?,
            dispatch_batch_size: parse_var("DISPATCH_BATCH_SIZE", "20")?,
            notify_lease_duration_ms: parse_var("NOTIFY_LEASE_DURATION_MS", "60000")?,
            notify_max_retries: parse_var("NOTIFY_MAX_RETRIES", "10")?,
            notify_retry_base_ms: parse_var("NOTIFY_RETRY_BASE_MS", "30000")?,
            notify_retry_max_ms: parse_var("NOTIFY_RETRY_MAX_MS", "3600000")?,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_uses_default_when_unset() {
        let value: u64 = parse_var("AGENTDESK_TEST_UNSET_VARIABLE", "1500").unwrap();
        assert_eq!(value, 1500);
    }

    #[test]
    fn test_parse_var_rejects_invalid_default() {
        let result: anyhow::Result<u32> = parse_var("AGENTDESK_TEST_UNSET_VARIABLE", "abc");
        assert!(result.is_err());
    }

    #[test]
    fn test_non_empty_var_unset_is_none() {
        assert!(non_empty_var("AGENTDESK_TEST_UNSET_VARIABLE").is_none());
    }
}
