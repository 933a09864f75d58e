use crate::config::Config;
use crate::feed::FeedId;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DICT_DIR: &str = "dict";
pub const LOGS_DIR: &str = "logs";
pub const CONFIG_FILE: &str = "dictfeed.yaml";

/// Prefix of in-flight install tempfiles inside the dictionary directory.
pub const TEMP_PREFIX: &str = ".dictfeed-";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn dict_dir(root: &Path, config: &Config) -> PathBuf {
    root.join(&config.dict_dir)
}

pub fn logs_dir(root: &Path, config: &Config) -> PathBuf {
    root.join(&config.logs_dir)
}

pub fn status_path(root: &Path, config: &Config, feed: FeedId) -> PathBuf {
    logs_dir(root, config).join(format!("{}_status.json", feed.file_stem()))
}

pub fn update_log_path(root: &Path, config: &Config, feed: FeedId) -> PathBuf {
    logs_dir(root, config).join(format!("{}_update.log", feed.file_stem()))
}
