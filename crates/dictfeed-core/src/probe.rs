//! Upstream version discovery via the GitHub "latest release" API.

use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::feed::{AssetCandidate, FeedId, FeedSpec};
use crate::retry::RetryPolicy;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

pub const GITHUB_API_ACCEPT: &str = "application/vnd.github.v3+json";

/// Latest upstream version of a feed and where to download it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRelease {
    /// Release tag.
    pub version: String,
    pub asset_name: String,
    /// `YYYYMMDD` taken from the asset name, when it carries one.
    pub asset_date: Option<String>,
    pub download_url: String,
}

impl UpstreamRelease {
    /// Human-readable version token, e.g. `v1.2 (20250823)`.
    pub fn label(&self) -> String {
        match &self.asset_date {
            Some(date) => format!("{} ({date})", self.version),
            None => self.version.clone(),
        }
    }
}

pub trait VersionProber {
    fn probe(&self, feed: FeedId) -> Result<UpstreamRelease>;
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

pub struct GithubProber {
    client: Client,
    api_base: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl GithubProber {
    /// `token` is optional; without one GitHub throttles sooner.
    pub fn new(config: &Config, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FeedError::permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: config.api_base().to_string(),
            token: token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            retry: config.retry_policy(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn latest_release_url(&self, spec: &FeedSpec) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, spec.owner, spec.repo
        )
    }

    fn request_once(&self, spec: &FeedSpec) -> Result<String> {
        let mut req = self
            .client
            .get(self.latest_release_url(spec))
            .header(ACCEPT, GITHUB_API_ACCEPT)
            .header(USER_AGENT, spec.user_agent);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = req.send()?;
        let status = resp.status();

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let header = |name: &str| {
                resp.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown")
                    .to_string()
            };
            let remaining = header("x-ratelimit-remaining");
            let reset = header("x-ratelimit-reset");
            tracing::warn!(feed = %spec.id, %remaining, %reset, "GitHub API rate limited");
            return Err(FeedError::transient(format!(
                "rate limited by GitHub (HTTP {status}, remaining {remaining}, reset {reset})"
            )));
        }
        if status.is_server_error() {
            return Err(FeedError::transient(format!("GitHub API returned HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FeedError::permanent(format!("GitHub API returned HTTP {status}")));
        }
        Ok(resp.text()?)
    }
}

impl VersionProber for GithubProber {
    fn probe(&self, feed: FeedId) -> Result<UpstreamRelease> {
        let spec = feed.spec();
        tracing::info!(%feed, owner = spec.owner, repo = spec.repo, "querying latest release");
        let body = self.retry.run("release metadata", |_| self.request_once(spec))?;
        parse_release(spec, &body)
    }
}

/// Interpret a GitHub release JSON document for `spec`.
pub fn parse_release(spec: &FeedSpec, body: &str) -> Result<UpstreamRelease> {
    let release: GithubRelease = serde_json::from_str(body)
        .map_err(|e| FeedError::Parse(format!("release JSON for {}: {e}", spec.id)))?;

    let candidates: Vec<AssetCandidate<'_>> = release
        .assets
        .iter()
        .map(|a| AssetCandidate {
            name: &a.name,
            url: &a.browser_download_url,
        })
        .collect();

    let selected = spec.asset.select(&candidates).ok_or_else(|| {
        FeedError::Parse(format!(
            "release {} of {}/{} has no asset matching {:?}",
            release.tag_name, spec.owner, spec.repo, spec.asset
        ))
    })?;
    tracing::info!(
        feed = %spec.id,
        version = %release.tag_name,
        asset = %selected.name,
        "found release asset"
    );

    Ok(UpstreamRelease {
        version: release.tag_name,
        asset_name: selected.name,
        asset_date: selected.date,
        download_url: selected.url,
    })
}
