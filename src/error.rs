use thiserror::Error;

/// Main error type for the live feed service
#[derive(Error, Debug)]
pub enum ScorecastError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Feed errors
    #[error("Upstream feed unavailable: {0}")]
    Upstream(String),

    #[error("Invalid feed data: {0}")]
    InvalidFeedData(String),

    // Cache errors
    #[error("Cache backend error: {0}")]
    Cache(String),

    // Subscriber-side stream errors
    #[error("Malformed stream event '{event}': {reason}")]
    StreamParse { event: String, reason: String },

    #[error("Reconnect attempts exhausted after {attempts} consecutive failures")]
    ReconnectExhausted { attempts: u32 },

    #[error("Stream transport error: {0}")]
    Transport(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for ScorecastError
pub type Result<T> = std::result::Result<T, ScorecastError>;

impl ScorecastError {
    /// Transient errors are retried on the next cycle instead of being surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScorecastError::Http(_)
                | ScorecastError::Upstream(_)
                | ScorecastError::Transport(_)
                | ScorecastError::Cache(_)
        )
    }
}

/// Errors returned by the insight backend
#[derive(Error, Debug, Clone)]
pub enum InsightError {
    #[error("Insight backend throttled the request (retry after {retry_after:?})")]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    #[error("Insight backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Insight backend reported failure: {0}")]
    Rejected(String),

    #[error("Insight request failed: {0}")]
    Request(String),

    #[error("Insight backend not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for InsightError {
    fn from(err: reqwest::Error) -> Self {
        InsightError::Request(err.to_string())
    }
}
