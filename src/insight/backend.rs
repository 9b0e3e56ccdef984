//! Generative-text backend client

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::InsightConfig;
use crate::domain::{Insight, InsightRequest};
use crate::error::{InsightError, Result, ScorecastError};

/// Produces commentary for a game transition
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InsightBackend: Send + Sync {
    async fn generate(&self, request: &InsightRequest) -> std::result::Result<Insight, InsightError>;
}

#[derive(Debug, Deserialize)]
struct InsightResponse {
    success: bool,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP insight backend
pub struct HttpInsightClient {
    http: Client,
    url: String,
}

impl HttpInsightClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScorecastError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Client for the configured endpoint, `None` when insights are disabled
    pub fn from_config(config: &InsightConfig) -> Result<Option<Self>> {
        match config.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(Some(Self::new(
                url,
                Duration::from_secs(config.request_timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }

    /// `Retry-After` in its delta-seconds form
    fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

#[async_trait]
impl InsightBackend for HttpInsightClient {
    async fn generate(&self, request: &InsightRequest) -> std::result::Result<Insight, InsightError> {
        debug!("Requesting insight {}", request.key());
        let resp = self.http.post(&self.url).json(request).send().await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(InsightError::RateLimited {
                retry_after: Self::retry_after(resp.headers()),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InsightError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: InsightResponse = resp.json().await?;
        match body {
            InsightResponse {
                success: true,
                summary: Some(summary),
                model,
                ..
            } => Ok(Insight {
                summary,
                model: model.unwrap_or_default(),
            }),
            InsightResponse { error, .. } => Err(InsightError::Rejected(
                error.unwrap_or_else(|| "no summary returned".to_string()),
            )),
        }
    }
}

/// Stand-in used when no backend is configured
pub struct DisabledInsights;

#[async_trait]
impl InsightBackend for DisabledInsights {
    async fn generate(&self, _request: &InsightRequest) -> std::result::Result<Insight, InsightError> {
        Err(InsightError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(
            HttpInsightClient::retry_after(&headers),
            Some(Duration::from_secs(12))
        );
    }

    #[test]
    fn test_retry_after_http_date_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(HttpInsightClient::retry_after(&headers), None);
        assert_eq!(HttpInsightClient::retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_from_config_requires_url() {
        let mut config = InsightConfig::default();
        assert!(HttpInsightClient::from_config(&config).unwrap().is_none());

        config.url = Some("   ".to_string());
        assert!(HttpInsightClient::from_config(&config).unwrap().is_none());

        config.url = Some("http://127.0.0.1:9/insights".to_string());
        assert!(HttpInsightClient::from_config(&config).unwrap().is_some());
    }

    #[test]
    fn test_response_decoding() {
        let ok: InsightResponse =
            serde_json::from_str(r#"{"success":true,"summary":"Tight half.","model":"m1"}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.summary.as_deref(), Some("Tight half."));

        let rejected: InsightResponse =
            serde_json::from_str(r#"{"success":false,"error":"quota"}"#).unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.error.as_deref(), Some("quota"));
    }
}
