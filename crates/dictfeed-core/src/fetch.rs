use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::retry::RetryPolicy;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;

/// Downloaded upstream asset, alive only for one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryArtifact {
    pub asset_name: String,
    pub bytes: Vec<u8>,
}

pub trait Fetcher {
    fn fetch(&self, url: &str, asset_name: &str) -> Result<DictionaryArtifact>;
}

pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FeedError::permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            retry: config.retry_policy(),
            user_agent: format!("dictfeed/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn fetch_once(&self, url: &str, asset_name: &str) -> Result<DictionaryArtifact> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()?;
        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::transient(format!("download returned HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FeedError::permanent(format!("download returned HTTP {status}")));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if content_type.starts_with("text/html") {
            return Err(FeedError::Integrity(format!(
                "{asset_name}: expected a dictionary download, got {content_type}"
            )));
        }

        let bytes = resp.bytes()?.to_vec();
        if bytes.is_empty() {
            return Err(FeedError::Integrity(format!("{asset_name}: empty body")));
        }
        Ok(DictionaryArtifact {
            asset_name: asset_name.to_string(),
            bytes,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, asset_name: &str) -> Result<DictionaryArtifact> {
        tracing::info!(%url, asset = asset_name, "downloading");
        let artifact = self
            .retry
            .run("download", |_| self.fetch_once(url, asset_name))?;
        tracing::info!(asset = asset_name, bytes = artifact.bytes.len(), "download complete");
        Ok(artifact)
    }
}
