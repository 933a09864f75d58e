//! Turns a downloaded asset into the dictionary bytes that get installed.

use crate::error::{FeedError, Result};
use crate::feed::ArtifactFormat;
use crate::fetch::DictionaryArtifact;
use flate2::read::GzDecoder;
use std::io::Read;

/// Upper bound on an archive member's declared size. Upstream dictionaries
/// are tens of megabytes.
const MAX_MEMBER_BYTES: u64 = 512 * 1024 * 1024;

/// Unpack `artifact` according to `format`. Raw assets pass through.
///
/// For tarballs the first regular `.dict` member whose file name contains the
/// member stem wins, matching how upstream lays out its archive.
pub fn extract_dictionary(
    format: ArtifactFormat,
    artifact: DictionaryArtifact,
) -> Result<DictionaryArtifact> {
    match format {
        ArtifactFormat::Raw => Ok(artifact),
        ArtifactFormat::TarGz { member_stem } => extract_tar_gz(&artifact, member_stem),
    }
}

fn extract_tar_gz(artifact: &DictionaryArtifact, member_stem: &str) -> Result<DictionaryArtifact> {
    let corrupt = |e: std::io::Error| {
        FeedError::Integrity(format!("{}: unreadable archive: {e}", artifact.asset_name))
    };

    let mut archive = tar::Archive::new(GzDecoder::new(artifact.bytes.as_slice()));
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(corrupt)?.into_owned();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !(file_name.ends_with(".dict") && file_name.contains(member_stem)) {
            continue;
        }

        let declared = entry.header().size().map_err(corrupt)?;
        if declared > MAX_MEMBER_BYTES {
            return Err(FeedError::Integrity(format!(
                "{}: member {} declares {declared} bytes, limit is {MAX_MEMBER_BYTES}",
                artifact.asset_name,
                path.display()
            )));
        }

        let file_name = file_name.to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(corrupt)?;
        tracing::info!(
            archive = %artifact.asset_name,
            member = %path.display(),
            bytes = bytes.len(),
            "extracted dictionary"
        );
        return Ok(DictionaryArtifact {
            asset_name: file_name,
            bytes,
        });
    }

    Err(FeedError::Integrity(format!(
        "{}: no {member_stem}*.dict member in archive",
        artifact.asset_name
    )))
}
