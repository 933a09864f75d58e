//! One update run for one feed.
//!
//! ```text
//! IDLE -> CHECKING -> UP_TO_DATE
//!                  -> DOWNLOADING -> INSTALLING -> DONE
//! CHECKING | DOWNLOADING | INSTALLING -> FAILED
//! ```
//!
//! Every run writes the feed's state record (unless the record itself is
//! unreadable) and appends exactly one log entry. Version fields only move
//! forward on `DONE`, so a failed run is retried by the next one.

use crate::error::{FeedError, Result};
use crate::feed::FeedId;
use crate::fetch::Fetcher;
use crate::install::{InstallTarget, InstalledDictionary, Installer};
use crate::logbook::{Decision, LogSink, UpdateLogEntry};
use crate::probe::{UpstreamRelease, VersionProber};
use crate::state::{FeedState, FeedStatus, StateStore};
use crate::unpack;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Checking,
    UpToDate,
    Downloading,
    Installing,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Checking => "checking",
            RunState::UpToDate => "up_to_date",
            RunState::Downloading => "downloading",
            RunState::Installing => "installing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::UpToDate | RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub feed: FeedId,
    pub outcome: RunState,
    pub decision: Decision,
    pub release: Option<UpstreamRelease>,
    pub installed: Option<InstalledDictionary>,
    /// State the run was in when it failed.
    pub failed_step: Option<RunState>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunState::UpToDate | RunState::Done)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

pub struct Orchestrator<'a> {
    feed: FeedId,
    prober: &'a dyn VersionProber,
    fetcher: &'a dyn Fetcher,
    store: &'a dyn StateStore,
    log: &'a dyn LogSink,
    installer: Installer,
    history_limit: usize,
}

/// Mutable bookkeeping for one run.
struct Run {
    state: RunState,
    decision: Decision,
    release: Option<UpstreamRelease>,
    started: DateTime<Utc>,
}

impl Run {
    fn advance(&mut self, feed: FeedId, next: RunState) {
        debug_assert!(
            !self.state.is_terminal(),
            "{feed}: transition out of terminal state {}",
            self.state
        );
        tracing::debug!(%feed, from = %self.state, to = %next, "state transition");
        self.state = next;
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        feed: FeedId,
        prober: &'a dyn VersionProber,
        fetcher: &'a dyn Fetcher,
        store: &'a dyn StateStore,
        log: &'a dyn LogSink,
        installer: Installer,
    ) -> Self {
        Self {
            feed,
            prober,
            fetcher,
            store,
            log,
            installer,
            history_limit: 50,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn run(&self, force: bool) -> RunReport {
        let mut run = Run {
            state: RunState::Idle,
            decision: Decision::Undetermined,
            release: None,
            started: Utc::now(),
        };
        run.advance(self.feed, RunState::Checking);
        tracing::info!(feed = %self.feed, force, "checking for updates");

        let mut record = match self.store.read(self.feed) {
            Ok(record) => record.unwrap_or_default(),
            // An unreadable record is left alone for a human to inspect.
            Err(e) => return self.fail(run, None, e),
        };

        match self.attempt(&mut run, &mut record, force) {
            Ok(installed) => self.finish(run, record, installed),
            Err(e) => self.fail(run, Some(record), e),
        }
    }

    /// Probe, decide, and (when stale or forced) download and install.
    fn attempt(
        &self,
        run: &mut Run,
        record: &mut FeedState,
        force: bool,
    ) -> Result<Option<InstalledDictionary>> {
        let spec = self.feed.spec();
        let release = self.prober.probe(self.feed)?;
        run.release = Some(release.clone());
        record.last_check_time = Some(run.started);

        if !force && record.is_at(&release.version, release.asset_date.as_deref()) {
            tracing::info!(feed = %self.feed, version = %release.label(), "already up to date");
            run.decision = Decision::UpToDate;
            return Ok(None);
        }
        run.decision = if force {
            Decision::ForcedUpdate
        } else {
            Decision::Update
        };
        tracing::info!(
            feed = %self.feed,
            from = record.last_known_version.as_deref().unwrap_or("none"),
            to = %release.label(),
            decision = %run.decision,
            "update needed"
        );
        let target = InstallTarget {
            feed: self.feed,
            file_name: spec.filename.target_name(release.asset_date.as_deref())?,
            policy: spec.filename,
        };

        run.advance(self.feed, RunState::Downloading);
        let artifact = self
            .fetcher
            .fetch(&release.download_url, &release.asset_name)?;
        let artifact = unpack::extract_dictionary(spec.format, artifact)?;

        run.advance(self.feed, RunState::Installing);
        let installed = self.installer.install(artifact, &target)?;
        Ok(Some(installed))
    }

    fn finish(
        &self,
        mut run: Run,
        mut record: FeedState,
        installed: Option<InstalledDictionary>,
    ) -> RunReport {
        let Some(release) = run.release.clone() else {
            return self.fail(
                run,
                Some(record),
                FeedError::Parse("no release recorded for completed run".into()),
            );
        };

        match &installed {
            None => {
                record.last_status = Some(FeedStatus::Skipped);
            }
            Some(dict) => {
                let file_name = dict
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                record.last_known_version = Some(release.version.clone());
                record.last_asset_date = release.asset_date.clone();
                record.last_dict_name = file_name.clone();
                record.last_update_time = Some(run.started);
                record.last_status = Some(FeedStatus::Ok);
                record.push_history(
                    format!(
                        "{}: ok - updated to version `{}`{}",
                        run.started.format("%Y-%m-%d %H:%M:%S"),
                        release.label(),
                        file_name.map(|n| format!(", file {n}")).unwrap_or_default()
                    ),
                    self.history_limit,
                );
            }
        }

        if let Err(e) = self.store.write(self.feed, &record) {
            // The dictionary may already be live; the next run re-probes and
            // reinstalls because the version fields were not persisted.
            let mut report = self.fail(run, None, e);
            report.installed = installed;
            return report;
        }

        let terminal = if installed.is_some() {
            RunState::Done
        } else {
            RunState::UpToDate
        };
        run.advance(self.feed, terminal);
        self.append_log(&run, None);
        tracing::info!(feed = %self.feed, outcome = %terminal, "run complete");

        RunReport {
            feed: self.feed,
            outcome: terminal,
            decision: run.decision,
            release: Some(release),
            installed,
            failed_step: None,
            error: None,
        }
    }

    /// Record a failure. `record` is `None` when the state store must not be
    /// touched (it is unreadable, or writing it is what failed).
    fn fail(&self, mut run: Run, record: Option<FeedState>, error: FeedError) -> RunReport {
        let step = run.state;
        let detail = format!("{step}: {error}");
        tracing::error!(feed = %self.feed, %step, "update failed: {error}");

        if let Some(mut record) = record {
            record.last_status = Some(FeedStatus::Failed);
            record.last_check_time = Some(run.started);
            if let Some(release) = &run.release {
                record.push_history(
                    format!(
                        "{}: failed - tried to update to version `{}`",
                        run.started.format("%Y-%m-%d %H:%M:%S"),
                        release.label()
                    ),
                    self.history_limit,
                );
            }
            if let Err(e) = self.store.write(self.feed, &record) {
                tracing::error!(feed = %self.feed, "could not record failure status: {e}");
            }
        }

        run.advance(self.feed, RunState::Failed);
        self.append_log(&run, Some(detail.clone()));

        RunReport {
            feed: self.feed,
            outcome: RunState::Failed,
            decision: run.decision,
            release: run.release,
            installed: None,
            failed_step: Some(step),
            error: Some(detail),
        }
    }

    fn append_log(&self, run: &Run, detail: Option<String>) {
        let entry = UpdateLogEntry {
            timestamp: Utc::now(),
            feed: self.feed,
            decision: run.decision,
            outcome: run.state.as_str().to_string(),
            version: run.release.as_ref().map(UpstreamRelease::label),
            detail,
        };
        if let Err(e) = self.log.append(&entry) {
            tracing::error!(feed = %self.feed, "could not append update log: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DictionaryArtifact;
    use crate::logbook::MemoryLogSink;
    use crate::state::MemoryStateStore;
    use std::cell::Cell;
    use tempfile::TempDir;

    struct StubProber {
        release: Option<UpstreamRelease>,
    }

    impl VersionProber for StubProber {
        fn probe(&self, _feed: FeedId) -> Result<UpstreamRelease> {
            self.release
                .clone()
                .ok_or_else(|| FeedError::transient("api.github.com unreachable"))
        }
    }

    struct StubFetcher {
        body: Option<Vec<u8>>,
        calls: Cell<u32>,
    }

    impl StubFetcher {
        fn serving(body: &[u8]) -> Self {
            Self {
                body: Some(body.to_vec()),
                calls: Cell::new(0),
            }
        }

        fn offline() -> Self {
            Self {
                body: None,
                calls: Cell::new(0),
            }
        }
    }

    impl Fetcher for StubFetcher {
        fn fetch(&self, _url: &str, asset_name: &str) -> Result<DictionaryArtifact> {
            self.calls.set(self.calls.get() + 1);
            match &self.body {
                Some(bytes) => Ok(DictionaryArtifact {
                    asset_name: asset_name.to_string(),
                    bytes: bytes.clone(),
                }),
                None => Err(FeedError::transient("connection reset")),
            }
        }
    }

    fn zhwiki_release(version: &str, date: &str) -> UpstreamRelease {
        UpstreamRelease {
            version: version.into(),
            asset_name: format!("zhwiki-{date}.dict"),
            asset_date: Some(date.into()),
            download_url: format!("https://example.invalid/zhwiki-{date}.dict"),
        }
    }

    struct Fixture {
        dir: TempDir,
        store: MemoryStateStore,
        log: MemoryLogSink,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                store: MemoryStateStore::new(),
                log: MemoryLogSink::new(),
            }
        }

        fn run(&self, prober: &StubProber, fetcher: &StubFetcher, force: bool) -> RunReport {
            Orchestrator::new(
                FeedId::Zhwiki,
                prober,
                fetcher,
                &self.store,
                &self.log,
                Installer::new(self.dir.path()),
            )
            .run(force)
        }

        fn dict_files(&self) -> Vec<String> {
            let mut v: Vec<String> = std::fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            v.sort();
            v
        }
    }

    #[test]
    fn first_run_installs_and_records_ok() {
        let fx = Fixture::new();
        let prober = StubProber {
            release: Some(zhwiki_release("2025-08-23", "20250823")),
        };
        let fetcher = StubFetcher::serving(b"dict");

        let report = fx.run(&prober, &fetcher, false);
        assert_eq!(report.outcome, RunState::Done);
        assert_eq!(report.decision, Decision::Update);
        assert_eq!(report.exit_code(), 0);

        let state = fx.store.get(FeedId::Zhwiki).unwrap();
        assert_eq!(state.last_known_version.as_deref(), Some("2025-08-23"));
        assert_eq!(state.last_status, Some(FeedStatus::Ok));
        assert_eq!(state.last_dict_name.as_deref(), Some("zhwiki-20250823.dict"));
        assert!(state.last_update_time.is_some());
        assert_eq!(state.update_history.len(), 1);
        assert_eq!(fx.dict_files(), vec!["zhwiki-20250823.dict"]);

        let entries = fx.log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, "done");
    }

    #[test]
    fn same_version_skips_fetch_and_install() {
        let fx = Fixture::new();
        let prober = StubProber {
            release: Some(zhwiki_release("2025-08-23", "20250823")),
        };
        fx.run(&prober, &StubFetcher::serving(b"dict"), false);

        let fetcher = StubFetcher::serving(b"changed");
        let report = fx.run(&prober, &fetcher, false);
        assert_eq!(report.outcome, RunState::UpToDate);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(fetcher.calls.get(), 0);
        assert_eq!(
            std::fs::read(fx.dir.path().join("zhwiki-20250823.dict")).unwrap(),
            b"dict"
        );

        let state = fx.store.get(FeedId::Zhwiki).unwrap();
        assert_eq!(state.last_status, Some(FeedStatus::Skipped));
        assert_eq!(state.last_known_version.as_deref(), Some("2025-08-23"));
        assert_eq!(state.update_history.len(), 1);
        assert_eq!(fx.log.entries()[1].decision, Decision::UpToDate);
    }

    #[test]
    fn force_reinstalls_matching_version() {
        let fx = Fixture::new();
        let prober = StubProber {
            release: Some(zhwiki_release("2025-08-23", "20250823")),
        };
        fx.run(&prober, &StubFetcher::serving(b"dict"), false);

        let fetcher = StubFetcher::serving(b"rebuilt");
        let report = fx.run(&prober, &fetcher, true);
        assert_eq!(report.outcome, RunState::Done);
        assert_eq!(report.decision, Decision::ForcedUpdate);
        assert_eq!(fetcher.calls.get(), 1);
        assert_eq!(
            std::fs::read(fx.dir.path().join("zhwiki-20250823.dict")).unwrap(),
            b"rebuilt"
        );
    }

    #[test]
    fn new_asset_date_under_same_tag_triggers_update() {
        let fx = Fixture::new();
        fx.run(
            &StubProber {
                release: Some(zhwiki_release("0.2.5", "20250701")),
            },
            &StubFetcher::serving(b"july"),
            false,
        );

        let report = fx.run(
            &StubProber {
                release: Some(zhwiki_release("0.2.5", "20250823")),
            },
            &StubFetcher::serving(b"august"),
            false,
        );
        assert_eq!(report.outcome, RunState::Done);
        assert_eq!(report.installed.unwrap().removed, vec!["zhwiki-20250701.dict"]);
        assert_eq!(fx.dict_files(), vec!["zhwiki-20250823.dict"]);
    }

    #[test]
    fn failed_fetch_keeps_version_and_dictionary() {
        let fx = Fixture::new();
        fx.run(
            &StubProber {
                release: Some(zhwiki_release("0.2.4", "20250701")),
            },
            &StubFetcher::serving(b"july"),
            false,
        );

        let report = fx.run(
            &StubProber {
                release: Some(zhwiki_release("0.2.5", "20250823")),
            },
            &StubFetcher::offline(),
            false,
        );
        assert_eq!(report.outcome, RunState::Failed);
        assert_eq!(report.failed_step, Some(RunState::Downloading));
        assert_eq!(report.exit_code(), 1);

        let state = fx.store.get(FeedId::Zhwiki).unwrap();
        assert_eq!(state.last_known_version.as_deref(), Some("0.2.4"));
        assert_eq!(state.last_asset_date.as_deref(), Some("20250701"));
        assert_eq!(state.last_status, Some(FeedStatus::Failed));
        assert!(state.update_history[1].contains("failed"));
        assert_eq!(fx.dict_files(), vec!["zhwiki-20250701.dict"]);

        let last = fx.log.entries().pop().unwrap();
        assert_eq!(last.outcome, "failed");
        assert!(last.detail.unwrap().starts_with("downloading: network error"));
    }

    #[test]
    fn probe_failure_is_recorded_without_fetching() {
        let fx = Fixture::new();
        let fetcher = StubFetcher::serving(b"dict");
        let report = fx.run(&StubProber { release: None }, &fetcher, true);

        assert_eq!(report.outcome, RunState::Failed);
        assert_eq!(report.failed_step, Some(RunState::Checking));
        assert_eq!(report.decision, Decision::Undetermined);
        assert_eq!(fetcher.calls.get(), 0);

        let state = fx.store.get(FeedId::Zhwiki).unwrap();
        assert_eq!(state.last_status, Some(FeedStatus::Failed));
        assert_eq!(state.last_known_version, None);
        assert!(state.update_history.is_empty());
    }

    #[test]
    fn empty_download_fails_at_install_and_keeps_old_file() {
        let fx = Fixture::new();
        fx.run(
            &StubProber {
                release: Some(zhwiki_release("0.2.4", "20250701")),
            },
            &StubFetcher::serving(b"july"),
            false,
        );
        let report = fx.run(
            &StubProber {
                release: Some(zhwiki_release("0.2.5", "20250823")),
            },
            &StubFetcher::serving(b""),
            false,
        );
        assert_eq!(report.failed_step, Some(RunState::Installing));
        assert_eq!(fx.dict_files(), vec!["zhwiki-20250701.dict"]);
    }

    struct UnreadableStore;

    impl StateStore for UnreadableStore {
        fn read(&self, _feed: FeedId) -> Result<Option<FeedState>> {
            Err(FeedError::store("logs/zhwiki_status.json", "permission denied"))
        }

        fn write(&self, _feed: FeedId, _state: &FeedState) -> Result<()> {
            panic!("an unreadable record must not be overwritten");
        }
    }

    #[test]
    fn unreadable_store_fails_the_run_without_touching_anything() {
        let dir = TempDir::new().unwrap();
        let log = MemoryLogSink::new();
        let fetcher = StubFetcher::serving(b"dict");
        let prober = StubProber {
            release: Some(zhwiki_release("0.2.5", "20250823")),
        };
        let report = Orchestrator::new(
            FeedId::Zhwiki,
            &prober,
            &fetcher,
            &UnreadableStore,
            &log,
            Installer::new(dir.path()),
        )
        .run(false);

        assert_eq!(report.outcome, RunState::Failed);
        assert_eq!(report.failed_step, Some(RunState::Checking));
        assert_eq!(fetcher.calls.get(), 0);
        assert!(report.error.unwrap().contains("permission denied"));
        assert_eq!(log.entries().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Reads as never-run; every write fails.
    struct ReadOnlyStore {
        writes: Cell<u32>,
    }

    impl StateStore for ReadOnlyStore {
        fn read(&self, _feed: FeedId) -> Result<Option<FeedState>> {
            Ok(None)
        }

        fn write(&self, _feed: FeedId, _state: &FeedState) -> Result<()> {
            self.writes.set(self.writes.get() + 1);
            Err(FeedError::store("logs/zhwiki_status.json", "read-only file system"))
        }
    }

    #[test]
    fn state_write_failure_after_install_reports_failed_with_install() {
        let dir = TempDir::new().unwrap();
        let log = MemoryLogSink::new();
        let store = ReadOnlyStore {
            writes: Cell::new(0),
        };
        let prober = StubProber {
            release: Some(zhwiki_release("0.2.5", "20250823")),
        };
        let fetcher = StubFetcher::serving(b"dict");
        let report = Orchestrator::new(
            FeedId::Zhwiki,
            &prober,
            &fetcher,
            &store,
            &log,
            Installer::new(dir.path()),
        )
        .run(false);

        assert_eq!(report.outcome, RunState::Failed);
        assert_eq!(report.failed_step, Some(RunState::Installing));
        assert_eq!(report.exit_code(), 1);
        assert!(report.error.unwrap().contains("read-only file system"));
        let installed = report.installed.expect("install details kept on the report");
        assert_eq!(installed.path, dir.path().join("zhwiki-20250823.dict"));
        assert_eq!(std::fs::read(&installed.path).unwrap(), b"dict");

        // The failed write is not followed by a second attempt to record failure.
        assert_eq!(store.writes.get(), 1);
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, "failed");
    }

    struct BrokenLog;

    impl LogSink for BrokenLog {
        fn append(&self, _entry: &UpdateLogEntry) -> Result<()> {
            Err(FeedError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn log_sink_failure_does_not_change_outcome() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStateStore::new();
        let prober = StubProber {
            release: Some(zhwiki_release("0.2.5", "20250823")),
        };
        let fetcher = StubFetcher::serving(b"dict");
        let report = Orchestrator::new(
            FeedId::Zhwiki,
            &prober,
            &fetcher,
            &store,
            &BrokenLog,
            Installer::new(dir.path()),
        )
        .run(false);

        assert_eq!(report.outcome, RunState::Done);
        assert_eq!(report.exit_code(), 0);
        let state = store.get(FeedId::Zhwiki).unwrap();
        assert_eq!(state.last_known_version.as_deref(), Some("0.2.5"));
        assert_eq!(state.last_status, Some(FeedStatus::Ok));
        assert!(dir.path().join("zhwiki-20250823.dict").is_file());
    }

    #[test]
    fn run_state_terminality() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Installing.is_terminal());
        assert!(RunState::UpToDate.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }
}
