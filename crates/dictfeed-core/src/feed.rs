//! The fixed set of upstream dictionary feeds and their per-feed policies.
//!
//! Both feeds follow the same update workflow; they differ only in where the
//! release lives, which asset is picked, whether it has to be unpacked, and
//! how the installed file is named.

use crate::error::{FeedError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// FeedId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedId {
    CustomPinyin,
    Zhwiki,
}

impl FeedId {
    pub fn all() -> &'static [FeedId] {
        &[FeedId::CustomPinyin, FeedId::Zhwiki]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeedId::CustomPinyin => "custom-pinyin",
            FeedId::Zhwiki => "zhwiki",
        }
    }

    /// Stem used for the feed's status and log file names.
    pub fn file_stem(self) -> &'static str {
        match self {
            FeedId::CustomPinyin => "custom_pinyin",
            FeedId::Zhwiki => "zhwiki",
        }
    }

    pub fn spec(self) -> &'static FeedSpec {
        match self {
            FeedId::CustomPinyin => &CUSTOM_PINYIN,
            FeedId::Zhwiki => &ZHWIKI,
        }
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Which release asset to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRule {
    /// First asset whose name contains `contains` and ends with `suffix`.
    /// The date, if any, comes from an `_YYYYMMDD.` fragment of the name.
    FirstMatching {
        contains: &'static str,
        suffix: &'static str,
    },
    /// Among assets named `{prefix}YYYYMMDD{suffix}`, the newest date.
    NewestDated {
        prefix: &'static str,
        suffix: &'static str,
    },
}

/// How the downloaded asset turns into dictionary bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// Gzipped tarball; the dictionary is the first `.dict` member whose
    /// name contains `member_stem`.
    TarGz { member_stem: &'static str },
    Raw,
}

/// How the installed dictionary is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenamePolicy {
    Fixed(&'static str),
    /// `{prefix}YYYYMMDD{suffix}`; older dated siblings are removed on install.
    Dated {
        prefix: &'static str,
        suffix: &'static str,
    },
}

impl FilenamePolicy {
    /// File name the installer writes for a release carrying `asset_date`.
    pub fn target_name(&self, asset_date: Option<&str>) -> Result<String> {
        match *self {
            FilenamePolicy::Fixed(name) => Ok(name.to_string()),
            FilenamePolicy::Dated { prefix, suffix } => match asset_date {
                Some(date) if is_date8(date) => Ok(format!("{prefix}{date}{suffix}")),
                _ => Err(FeedError::Parse(format!(
                    "dated feed needs an 8-digit asset date, got {asset_date:?}"
                ))),
            },
        }
    }

    /// Whether `name` is a file this policy manages but is not `current`.
    pub fn is_superseded(&self, name: &str, current: &str) -> bool {
        match *self {
            FilenamePolicy::Fixed(_) => false,
            FilenamePolicy::Dated { prefix, suffix } => {
                name != current && dated_part(name, prefix, suffix).is_some()
            }
        }
    }
}

#[derive(Debug)]
pub struct FeedSpec {
    pub id: FeedId,
    pub owner: &'static str,
    pub repo: &'static str,
    pub user_agent: &'static str,
    pub asset: AssetRule,
    pub format: ArtifactFormat,
    pub filename: FilenamePolicy,
}

pub static CUSTOM_PINYIN: FeedSpec = FeedSpec {
    id: FeedId::CustomPinyin,
    owner: "wuhgit",
    repo: "CustomPinyinDictionary",
    user_agent: "CustomPinyinUpdater/1.0",
    asset: AssetRule::FirstMatching {
        contains: "CustomPinyinDictionary_Fcitx",
        suffix: ".tar.gz",
    },
    format: ArtifactFormat::TarGz {
        member_stem: "CustomPinyinDictionary_Fcitx",
    },
    filename: FilenamePolicy::Fixed("CustomPinyinDictionary_Fcitx.dict"),
};

pub static ZHWIKI: FeedSpec = FeedSpec {
    id: FeedId::Zhwiki,
    owner: "felixonmars",
    repo: "fcitx5-pinyin-zhwiki",
    user_agent: "ZhwikiUpdater/1.0",
    asset: AssetRule::NewestDated {
        prefix: "zhwiki-",
        suffix: ".dict",
    },
    format: ArtifactFormat::Raw,
    filename: FilenamePolicy::Dated {
        prefix: "zhwiki-",
        suffix: ".dict",
    },
};

// ---------------------------------------------------------------------------
// Asset selection
// ---------------------------------------------------------------------------

/// A release asset as far as selection is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetCandidate<'a> {
    pub name: &'a str,
    pub url: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedAsset {
    pub name: String,
    pub url: String,
    pub date: Option<String>,
}

impl AssetRule {
    pub fn select(&self, assets: &[AssetCandidate<'_>]) -> Option<SelectedAsset> {
        match *self {
            AssetRule::FirstMatching { contains, suffix } => assets
                .iter()
                .find(|a| a.name.contains(contains) && a.name.ends_with(suffix))
                .map(|a| SelectedAsset {
                    name: a.name.to_string(),
                    url: a.url.to_string(),
                    date: underscore_date(a.name),
                }),
            AssetRule::NewestDated { prefix, suffix } => assets
                .iter()
                .filter_map(|a| dated_part(a.name, prefix, suffix).map(|d| (d, a)))
                .max_by(|(x, _), (y, _)| x.cmp(y))
                .map(|(date, a)| SelectedAsset {
                    name: a.name.to_string(),
                    url: a.url.to_string(),
                    date: Some(date.to_string()),
                }),
        }
    }
}

fn is_date8(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())
}

fn dated_part<'a>(name: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let date = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    is_date8(date).then_some(date)
}

static UNDERSCORE_DATE_RE: OnceLock<Regex> = OnceLock::new();

fn underscore_date(name: &str) -> Option<String> {
    let re = UNDERSCORE_DATE_RE.get_or_init(|| Regex::new(r"_(\d{8})\.").unwrap());
    re.captures(name).map(|c| c[1].to_string())
}
