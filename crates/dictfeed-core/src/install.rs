//! Atomic replacement of the live dictionary file.
//!
//! The artifact is written to a tempfile in the target directory, checked,
//! then renamed over the target. The rename is the only step a reader can
//! observe, so the old file stays live until the new one is complete.

use crate::error::{FeedError, Result};
use crate::feed::{FeedId, FilenamePolicy};
use crate::fetch::DictionaryArtifact;
use crate::paths::TEMP_PREFIX;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub feed: FeedId,
    pub file_name: String,
    pub policy: FilenamePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledDictionary {
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the installed bytes.
    pub sha256: String,
    /// Superseded dated files deleted after the rename.
    pub removed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Installer {
    dir: PathBuf,
}

impl InstallTarget {
    /// Tempfile prefix, distinct per feed so concurrent feed runs sharing the
    /// directory never sweep each other's in-flight files.
    fn temp_prefix(&self) -> String {
        format!("{TEMP_PREFIX}{}-", self.feed.file_stem())
    }
}

impl Installer {
    pub fn new(dict_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dict_dir.into(),
        }
    }

    pub fn install(
        &self,
        artifact: DictionaryArtifact,
        target: &InstallTarget,
    ) -> Result<InstalledDictionary> {
        let target_path = self.dir.join(&target.file_name);
        let failed = |e: std::io::Error| FeedError::install(&target_path, e);

        crate::io::ensure_dir(&self.dir).map_err(|e| FeedError::install(&self.dir, e))?;
        let prefix = target.temp_prefix();
        self.sweep_stale_tempfiles(&prefix);

        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(failed)?;
        tmp.write_all(&artifact.bytes).map_err(failed)?;
        tmp.flush().map_err(failed)?;
        tmp.as_file().sync_all().map_err(failed)?;
        let sha256 = hex::encode(Sha256::digest(&artifact.bytes));
        drop(artifact);

        let size = tmp.as_file().metadata().map_err(failed)?.len();
        if size == 0 {
            // Dropping `tmp` deletes it; the live dictionary is untouched.
            return Err(FeedError::Integrity(format!(
                "refusing to install empty file as {}",
                target.file_name
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(failed)?;
        }

        tmp.persist(&target_path)
            .map_err(|e| FeedError::install(&target_path, e.error))?;
        sync_dir(&self.dir);
        tracing::info!(
            path = %target_path.display(),
            size,
            sha256 = %sha256,
            "dictionary installed"
        );

        let removed = self.remove_superseded(target)?;
        Ok(InstalledDictionary {
            path: target_path,
            size,
            sha256,
            removed,
        })
    }

    /// Remove tempfiles left behind by an interrupted run.
    fn sweep_stale_tempfiles(&self, prefix: &str) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(prefix) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => tracing::info!(file = %name, "removed stale tempfile"),
                Err(e) => tracing::warn!(file = %name, "cannot remove stale tempfile: {e}"),
            }
        }
    }

    fn remove_superseded(&self, target: &InstallTarget) -> Result<Vec<String>> {
        if let FilenamePolicy::Fixed(_) = target.policy {
            return Ok(Vec::new());
        }
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| FeedError::install(&self.dir, e))?;

        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FeedError::install(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_file() || !target.policy.is_superseded(&name, &target.file_name) {
                continue;
            }
            std::fs::remove_file(entry.path()).map_err(|e| {
                FeedError::install(entry.path(), format!("removing superseded file: {e}"))
            })?;
            tracing::info!(file = %name, "removed superseded dictionary");
            removed.push(name);
        }
        removed.sort();
        Ok(removed)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), "directory fsync skipped: {e}");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{CUSTOM_PINYIN, ZHWIKI};
    use tempfile::TempDir;

    fn artifact(bytes: &[u8]) -> DictionaryArtifact {
        DictionaryArtifact {
            asset_name: "asset".into(),
            bytes: bytes.to_vec(),
        }
    }

    fn fixed() -> InstallTarget {
        InstallTarget {
            feed: FeedId::CustomPinyin,
            file_name: "CustomPinyinDictionary_Fcitx.dict".into(),
            policy: CUSTOM_PINYIN.filename,
        }
    }

    fn dated(date: &str) -> InstallTarget {
        InstallTarget {
            feed: FeedId::Zhwiki,
            file_name: format!("zhwiki-{date}.dict"),
            policy: ZHWIKI.filename,
        }
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut v: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn replaces_fixed_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("CustomPinyinDictionary_Fcitx.dict");
        std::fs::write(&target, b"old").unwrap();

        let out = Installer::new(dir.path())
            .install(artifact(b"new contents"), &fixed())
            .unwrap();
        assert_eq!(out.path, target);
        assert_eq!(out.size, 12);
        assert_eq!(out.sha256.len(), 64);
        assert!(out.removed.is_empty());
        assert_eq!(std::fs::read(&target).unwrap(), b"new contents");
        assert_eq!(names(dir.path()), vec!["CustomPinyinDictionary_Fcitx.dict"]);
    }

    #[test]
    fn empty_artifact_leaves_old_dictionary_live() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("CustomPinyinDictionary_Fcitx.dict");
        std::fs::write(&target, b"old").unwrap();

        let err = Installer::new(dir.path())
            .install(artifact(b""), &fixed())
            .unwrap_err();
        assert!(matches!(err, FeedError::Integrity(_)));
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        assert_eq!(names(dir.path()), vec!["CustomPinyinDictionary_Fcitx.dict"]);
    }

    #[test]
    fn reports_sha256_of_installed_bytes() {
        let dir = TempDir::new().unwrap();
        let out = Installer::new(dir.path())
            .install(artifact(b"abc"), &fixed())
            .unwrap();
        assert_eq!(
            out.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn unusable_dict_dir_is_install_error() {
        let dir = TempDir::new().unwrap();
        let dict_dir = dir.path().join("dict");
        // A regular file where the dictionary directory should be.
        std::fs::write(&dict_dir, b"").unwrap();
        let err = Installer::new(&dict_dir)
            .install(artifact(b"data"), &fixed())
            .unwrap_err();
        assert!(matches!(err, FeedError::Install { .. }), "got {err:?}");
    }

    #[test]
    fn dated_install_removes_every_other_dated_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("zhwiki-20240509.dict"), b"a").unwrap();
        std::fs::write(dir.path().join("zhwiki-20250101.dict"), b"b").unwrap();
        std::fs::write(dir.path().join("CustomPinyinDictionary_Fcitx.dict"), b"c").unwrap();

        let out = Installer::new(dir.path())
            .install(artifact(b"fresh"), &dated("20250823"))
            .unwrap();
        assert_eq!(out.removed, vec!["zhwiki-20240509.dict", "zhwiki-20250101.dict"]);
        assert_eq!(
            names(dir.path()),
            vec!["CustomPinyinDictionary_Fcitx.dict", "zhwiki-20250823.dict"]
        );
    }

    #[test]
    fn reinstalling_same_dated_file_keeps_exactly_one() {
        let dir = TempDir::new().unwrap();
        let installer = Installer::new(dir.path());
        installer.install(artifact(b"v1"), &dated("20250823")).unwrap();
        installer.install(artifact(b"v2"), &dated("20250823")).unwrap();
        assert_eq!(names(dir.path()), vec!["zhwiki-20250823.dict"]);
        assert_eq!(std::fs::read(dir.path().join("zhwiki-20250823.dict")).unwrap(), b"v2");
    }

    #[test]
    fn stale_tempfiles_are_swept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".dictfeed-custom_pinyin-abc123.tmp"), b"half").unwrap();
        std::fs::write(dir.path().join(".dictfeed-zhwiki-in-flight.tmp"), b"other feed").unwrap();
        Installer::new(dir.path())
            .install(artifact(b"data"), &fixed())
            .unwrap();
        assert_eq!(
            names(dir.path()),
            vec![".dictfeed-zhwiki-in-flight.tmp", "CustomPinyinDictionary_Fcitx.dict"]
        );
    }

    #[test]
    fn creates_missing_dict_dir() {
        let dir = TempDir::new().unwrap();
        let dict_dir = dir.path().join("dict");
        Installer::new(&dict_dir)
            .install(artifact(b"data"), &dated("20250823"))
            .unwrap();
        assert!(dict_dir.join("zhwiki-20250823.dict").is_file());
    }

    #[test]
    fn concurrent_reader_sees_old_or_new_never_partial() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("CustomPinyinDictionary_Fcitx.dict");
        let old = vec![b'o'; 256 * 1024];
        let new = vec![b'n'; 512 * 1024];
        std::fs::write(&target, &old).unwrap();

        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let stop = stop.clone();
            let target = target.clone();
            let (old, new) = (old.clone(), new.clone());
            std::thread::spawn(move || {
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    let seen = std::fs::read(&target).unwrap();
                    assert!(seen == old || seen == new, "observed partial file");
                }
            })
        };

        let installer = Installer::new(dir.path());
        for _ in 0..20 {
            installer.install(artifact(&new), &fixed()).unwrap();
            installer.install(artifact(&old), &fixed()).unwrap();
        }
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        reader.join().unwrap();
    }
}
