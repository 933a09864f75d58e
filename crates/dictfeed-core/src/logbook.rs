//! Append-only per-feed audit trail, one line per orchestrator run.

use crate::config::Config;
use crate::error::Result;
use crate::feed::FeedId;
use crate::paths;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The probe failed before a decision could be made.
    Undetermined,
    UpToDate,
    Update,
    ForcedUpdate,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Undetermined => "undetermined",
            Decision::UpToDate => "up_to_date",
            Decision::Update => "update",
            Decision::ForcedUpdate => "forced_update",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    pub timestamp: DateTime<Utc>,
    pub feed: FeedId,
    pub decision: Decision,
    /// Terminal run state: `up_to_date`, `done` or `failed`.
    pub outcome: String,
    pub version: Option<String>,
    pub detail: Option<String>,
}

impl fmt::Display for UpdateLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} decision={} outcome={}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.feed,
            self.decision,
            self.outcome
        )?;
        if let Some(version) = &self.version {
            write!(f, " version={version:?}")?;
        }
        if let Some(detail) = &self.detail {
            // Keep one entry per line even for multi-line error chains.
            write!(f, " detail={:?}", detail.replace('\n', " "))?;
        }
        Ok(())
    }
}

pub trait LogSink {
    fn append(&self, entry: &UpdateLogEntry) -> Result<()>;
}

/// `logs/<feed>_update.log`.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    root: PathBuf,
    config: Config,
}

impl FileLogSink {
    pub fn new(root: &Path, config: &Config) -> Self {
        Self {
            root: root.to_path_buf(),
            config: config.clone(),
        }
    }
}

impl LogSink for FileLogSink {
    fn append(&self, entry: &UpdateLogEntry) -> Result<()> {
        let path = paths::update_log_path(&self.root, &self.config, entry.feed);
        crate::io::append_text(&path, &format!("{entry}\n"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: RefCell<Vec<UpdateLogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<UpdateLogEntry> {
        self.entries.borrow().clone()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, entry: &UpdateLogEntry) -> Result<()> {
        self.entries.borrow_mut().push(entry.clone());
        Ok(())
    }
}
