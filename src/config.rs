use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Shortest poll interval the upstream feed tolerates
pub const MIN_POLL_INTERVAL_SECS: u64 = 5;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub insight: InsightConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Scoreboard endpoint polled each cycle
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// Seconds between polls (minimum 5)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-request timeout for the scoreboard fetch
    #[serde(default = "default_feed_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_feed_url() -> String {
    "https://site.api.espn.com/apis/site/v2/sports/basketball/nba/scoreboard".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_feed_timeout_secs() -> u64 {
    10
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_feed_timeout_secs(),
        }
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }
}

/// TTL tiers for cached snapshots, in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_live_ttl")]
    pub live_ttl_secs: u64,
    #[serde(default = "default_today_ttl")]
    pub today_ttl_secs: u64,
    #[serde(default = "default_historical_ttl")]
    pub historical_ttl_secs: u64,
    #[serde(default = "default_static_ttl")]
    pub static_ttl_secs: u64,
    /// Lower bound applied to every tier; 0 means "twice the poll interval"
    #[serde(default)]
    pub ttl_floor_secs: u64,
}

fn default_live_ttl() -> u64 {
    10
}

fn default_today_ttl() -> u64 {
    60
}

fn default_historical_ttl() -> u64 {
    300
}

fn default_static_ttl() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            live_ttl_secs: default_live_ttl(),
            today_ttl_secs: default_today_ttl(),
            historical_ttl_secs: default_historical_ttl(),
            static_ttl_secs: default_static_ttl(),
            ttl_floor_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Seconds between heartbeat events on an idle connection
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds before a connection is told to reconnect and closed
    #[serde(default = "default_max_lifetime_secs")]
    pub max_connection_lifetime_secs: u64,
    /// Capacity of the fan-out hub shared by all connections
    #[serde(default = "default_hub_capacity")]
    pub hub_capacity: usize,
    /// Capacity of each connection's own output queue
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_max_lifetime_secs() -> u64 {
    300
}

fn default_hub_capacity() -> usize {
    1024
}

fn default_connection_buffer() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_secs(),
            max_connection_lifetime_secs: default_max_lifetime_secs(),
            hub_capacity: default_hub_capacity(),
            connection_buffer: default_connection_buffer(),
        }
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_connection_lifetime_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightConfig {
    /// Insight backend endpoint; insights are disabled when unset
    #[serde(default)]
    pub url: Option<String>,
    /// Minimum spacing between backend calls, across all keys
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Wait applied after a 429 without a Retry-After header
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
    #[serde(default = "default_insight_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_min_interval_ms() -> u64 {
    3000
}

fn default_retry_after_secs() -> u64 {
    30
}

fn default_insight_timeout_secs() -> u64 {
    30
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            url: None,
            min_interval_ms: default_min_interval_ms(),
            default_retry_after_secs: default_retry_after_secs(),
            request_timeout_secs: default_insight_timeout_secs(),
        }
    }
}

impl InsightConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Last regulation period (4 quarters for basketball)
    #[serde(default = "default_final_period")]
    pub final_period: u32,
    /// Largest score margin that still counts as a close game
    #[serde(default = "default_close_margin")]
    pub close_game_margin: u32,
    /// Upper bound on how long a notification waits for its insight
    #[serde(default = "default_insight_wait_secs")]
    pub insight_wait_secs: u64,
    /// Optional webhook receiving a text message per notification
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_final_period() -> u32 {
    4
}

fn default_close_margin() -> u32 {
    5
}

fn default_insight_wait_secs() -> u64 {
    45
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            final_period: default_final_period(),
            close_game_margin: default_close_margin(),
            insight_wait_secs: default_insight_wait_secs(),
            webhook_url: None,
        }
    }
}

impl NotificationConfig {
    pub fn insight_wait(&self) -> Duration {
        Duration::from_secs(self.insight_wait_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Stream endpoint the watch client connects to
    #[serde(default = "default_client_url")]
    pub url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_client_url() -> String {
    "http://127.0.0.1:8080/api/live/stream".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            cache: CacheConfig::default(),
            stream: StreamConfig::default(),
            insight: InsightConfig::default(),
            notifications: NotificationConfig::default(),
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig {
                level: default_log_level(),
                json: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SCORECAST_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // SCORECAST_FEED__POLL_INTERVAL_SECS, SCORECAST_INSIGHT__URL, ...
            .add_source(
                Environment::with_prefix("SCORECAST")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.feed.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            errors.push(format!(
                "feed.poll_interval_secs must be at least {}",
                MIN_POLL_INTERVAL_SECS
            ));
        }
        if self.feed.url.trim().is_empty() {
            errors.push("feed.url must not be empty".to_string());
        }
        if self.stream.heartbeat_interval_secs == 0 {
            errors.push("stream.heartbeat_interval_secs must be > 0".to_string());
        }
        if self.stream.max_connection_lifetime_secs == 0 {
            errors.push("stream.max_connection_lifetime_secs must be > 0".to_string());
        }
        if self.stream.hub_capacity == 0 || self.stream.connection_buffer == 0 {
            errors.push("stream buffers must be > 0".to_string());
        }
        if self.client.max_attempts == 0 {
            errors.push("client.max_attempts must be > 0".to_string());
        }
        if self.client.backoff_base_ms == 0 || self.client.backoff_cap_ms < self.client.backoff_base_ms
        {
            errors.push("client backoff requires 0 < backoff_base_ms <= backoff_cap_ms".to_string());
        }
        if self.notifications.final_period == 0 {
            errors.push("notifications.final_period must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.feed.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.stream.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.stream.max_connection_lifetime(), Duration::from_secs(300));
        assert_eq!(config.insight.min_interval(), Duration::from_millis(3000));
        assert_eq!(config.client.max_attempts, 5);
    }

    #[test]
    fn test_poll_interval_minimum_enforced() {
        let mut config = AppConfig::default();
        config.feed.poll_interval_secs = 2;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("poll_interval_secs")));
        // Even unvalidated configs never poll faster than the minimum
        assert_eq!(config.feed.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_bounds_validated() {
        let mut config = AppConfig::default();
        config.client.backoff_cap_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("/nonexistent/scorecast-config").unwrap();
        assert_eq!(config.stream.heartbeat_interval_secs, 30);
        assert_eq!(config.notifications.close_game_margin, 5);
    }
}
