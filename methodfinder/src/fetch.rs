//! HTTP page fetching with an injected retry policy.

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::AppConfig;
use crate::retry::{Classify, FailureClass, RetryPolicy};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout(error.to_string())
        } else if error.is_builder() {
            FetchError::InvalidUrl(error.to_string())
        } else if let Some(status) = error.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

impl Classify for FetchError {
    fn failure_class(&self) -> FailureClass {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) | FetchError::Body(_) => FailureClass::Network,
            FetchError::Status(_) => FailureClass::Status,
            FetchError::InvalidUrl(_) => FailureClass::Fatal,
        }
    }
}

/// Fetches page bodies, retrying according to its policy.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl PageFetcher {
    pub fn new(timeout: Duration, user_agent: &str, policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, policy })
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Self::new(
            config.http.request_timeout(),
            &config.http.user_agent,
            config.retry.to_policy(),
        )
    }

    /// Fetch `url` and return the body text. Non-2xx responses are failures.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.policy
            .run(|attempt| async move {
                debug!("GET {} (attempt {})", url, attempt);
                self.fetch_once(url).await
            })
            .await
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        assert_eq!(FetchError::Status(503).failure_class(), FailureClass::Status);
        assert_eq!(FetchError::Timeout("t".into()).failure_class(), FailureClass::Network);
        assert_eq!(FetchError::Network("n".into()).failure_class(), FailureClass::Network);
        assert_eq!(FetchError::InvalidUrl("u".into()).failure_class(), FailureClass::Fatal);
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_retried() {
        let fetcher = PageFetcher::new(Duration::from_secs(1), "test/1.0", RetryPolicy::immediate(3)).unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)), "got {:?}", err);
    }
}
