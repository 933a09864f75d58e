use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {message}")]
    Network { message: String, retryable: bool },

    #[error("unrecognized upstream metadata: {0}")]
    Parse(String),

    #[error("downloaded content failed integrity check: {0}")]
    Integrity(String),

    #[error("state store error at {}: {message}", path.display())]
    Store { path: PathBuf, message: String },

    #[error("install failed at {}: {message} (target state may be ambiguous)", path.display())]
    Install { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FeedError {
    pub fn transient(message: impl Into<String>) -> Self {
        FeedError::Network {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        FeedError::Network {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn store(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        FeedError::Store {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn install(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        FeedError::Install {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Only transient network failures are worth another attempt in the same run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Network {
                retryable: true,
                ..
            }
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        let retryable = e.is_timeout()
            || e.is_connect()
            || e.is_request()
            || e.is_body()
            || e.status().is_some_and(|s| s.is_server_error());
        FeedError::Network {
            message: e.to_string(),
            retryable,
        }
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
