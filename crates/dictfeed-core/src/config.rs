use crate::error::{FeedError, Result};
use crate::paths;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Settings read from `dictfeed.yaml` at the repository root. Every field has
/// a default, so the file is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_dict_dir")]
    pub dict_dir: String,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_dict_dir() -> String {
    paths::DICT_DIR.to_string()
}

fn default_logs_dir() -> String {
    paths::LOGS_DIR.to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_history_limit() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dict_dir: default_dict_dir(),
            logs_dir: default_logs_dir(),
            github_api_url: default_github_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
            history_limit: default_history_limit(),
        }
    }
}

impl Config {
    /// Load `dictfeed.yaml` from `root`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&data)
            .map_err(|e| FeedError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(FeedError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(FeedError::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(FeedError::Config(
                "history_limit must be at least 1".into(),
            ));
        }
        if self.dict_dir.trim().is_empty() || self.logs_dir.trim().is_empty() {
            return Err(FeedError::Config(
                "dict_dir and logs_dir must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.base_delay_secs),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn api_base(&self) -> &str {
        self.github_api_url.trim_end_matches('/')
    }
}
