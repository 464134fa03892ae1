//! Configuration management for methodfinder
//!
//! Configuration is loaded from `./config/methodfinder.toml` (or `--config`).
//! Defaults live only in the config template, which is also embedded in the
//! binary and used when no file exists at the default location.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;
use regex::Regex;

use crate::retry::{BackoffStrategy, RetryPolicy};

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/methodfinder.toml";

/// Default configuration file content - this is the ONLY place defaults exist
pub const DEFAULT_CONFIG: &str = include_str!("../config/methodfinder.toml");

/// Environment variable that overrides `api.api_token`
pub const API_TOKEN_ENV: &str = "METHODFINDER_API_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid regex pattern '{pattern_name}': {error}\n  Pattern: {pattern}")]
    InvalidRegex {
        pattern_name: String,
        pattern: String,
        error: String,
    },

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' must be greater than 0")]
    Zero { field: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub detector: DetectorConfig,
    pub splitter: SplitterConfig,
    pub api: ApiConfig,
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry behaviour for page fetches
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub retry_on_network: bool,
    #[serde(default = "default_true")]
    pub retry_on_status: bool,
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.delay_ms),
            backoff: self.backoff.clone(),
            max_delay: Duration::from_millis(self.max_delay_ms),
            retry_on_network: self.retry_on_network,
            retry_on_status: self.retry_on_status,
        }
    }
}

/// Detector stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Maximum in-flight page fetches
    pub concurrency: usize,
    /// Regex matched against the `src` attribute of `<script>` tags
    pub script_src_pattern: String,
    /// Substrings of URLs that are never fetched (authentication walls)
    #[serde(default)]
    pub skip_domains: Vec<String>,
}

/// Splitter stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub output_prefix: String,
}

/// Edge-service REST API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_per_page() -> u32 {
    100
}

impl ApiConfig {
    /// Resolve the API token, preferring the environment over the file.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(API_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| Some(self.api_token.clone()).filter(|t| !t.trim().is_empty()))
    }
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration embedded in the binary
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.user_agent.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "http.user_agent".to_string(),
            });
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "http.request_timeout_secs".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "retry.max_attempts".to_string(),
            });
        }
        if self.detector.concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "detector.concurrency".to_string(),
            });
        }
        if self.splitter.chunk_size == 0 {
            return Err(ConfigError::Zero {
                field: "splitter.chunk_size".to_string(),
            });
        }
        if self.splitter.output_prefix.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "splitter.output_prefix".to_string(),
            });
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl {
                field: "api.base_url".to_string(),
                url: self.api.base_url.clone(),
            });
        }

        self.validate_regex("detector.script_src_pattern", &self.detector.script_src_pattern)?;

        Ok(())
    }

    fn validate_regex(&self, name: &str, pattern: &str) -> Result<(), ConfigError> {
        Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            pattern_name: name.to_string(),
            pattern: pattern.to_string(),
            error: e.to_string(),
        })?;
        Ok(())
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        let path = Path::new(CONFIG_PATH);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }
}
