use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::feed::FeedId;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// FeedStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Ok,
    Failed,
    Skipped,
}

impl FeedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedStatus::Ok => "ok",
            FeedStatus::Failed => "failed",
            FeedStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FeedState
// ---------------------------------------------------------------------------

/// Persisted record of the last applied upstream version for one feed.
///
/// Every field defaults and unknown fields are ignored, so older binaries can
/// read records written by newer ones and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedState {
    #[serde(default)]
    pub last_known_version: Option<String>,
    #[serde(default)]
    pub last_asset_date: Option<String>,
    #[serde(default)]
    pub last_dict_name: Option<String>,
    #[serde(default)]
    pub last_check_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: Option<FeedStatus>,
    #[serde(default)]
    pub update_history: Vec<String>,
}

impl FeedState {
    /// Whether the recorded version token is `(version, asset_date)`.
    pub fn is_at(&self, version: &str, asset_date: Option<&str>) -> bool {
        self.last_known_version.as_deref() == Some(version)
            && self.last_asset_date.as_deref() == asset_date
    }

    /// Append a history line, keeping only the newest `limit` entries.
    pub fn push_history(&mut self, line: String, limit: usize) {
        self.update_history.push(line);
        if self.update_history.len() > limit {
            let excess = self.update_history.len() - limit;
            self.update_history.drain(..excess);
        }
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

pub trait StateStore {
    /// `None` when the feed has never been recorded.
    fn read(&self, feed: FeedId) -> Result<Option<FeedState>>;

    /// Replace the feed's record. Readers never observe a partial record.
    fn write(&self, feed: FeedId, state: &FeedState) -> Result<()>;
}

/// One pretty-printed JSON file per feed under the logs directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
    config: Config,
}

impl FileStateStore {
    pub fn new(root: &Path, config: &Config) -> Self {
        Self {
            root: root.to_path_buf(),
            config: config.clone(),
        }
    }

    pub fn path_for(&self, feed: FeedId) -> PathBuf {
        paths::status_path(&self.root, &self.config, feed)
    }
}

impl StateStore for FileStateStore {
    fn read(&self, feed: FeedId) -> Result<Option<FeedState>> {
        let path = self.path_for(feed);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FeedError::store(&path, e)),
        };
        let state = serde_json::from_str(&data).map_err(|e| FeedError::store(&path, e))?;
        Ok(Some(state))
    }

    fn write(&self, feed: FeedId, state: &FeedState) -> Result<()> {
        let path = self.path_for(feed);
        let mut data =
            serde_json::to_string_pretty(state).map_err(|e| FeedError::store(&path, e))?;
        data.push('\n');
        crate::io::atomic_write(&path, data.as_bytes()).map_err(|e| FeedError::store(&path, e))
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RefCell<HashMap<FeedId, FeedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, feed: FeedId) -> Option<FeedState> {
        self.records.borrow().get(&feed).cloned()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self, feed: FeedId) -> Result<Option<FeedState>> {
        Ok(self.get(feed))
    }

    fn write(&self, feed: FeedId, state: &FeedState) -> Result<()> {
        self.records.borrow_mut().insert(feed, state.clone());
        Ok(())
    }
}
