use crate::output::{print_json, print_table};
use anyhow::Context;
use chrono::{DateTime, Utc};
use dictfeed_core::{
    config::Config,
    state::{FeedState, FileStateStore, StateStore},
    FeedId,
};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct FeedStatusOutput {
    feed: FeedId,
    #[serde(flatten)]
    state: FeedState,
}

/// `dictfeed status` — show the recorded state of every feed.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load dictfeed.yaml")?;
    let store = FileStateStore::new(root, &config);

    let mut rows = Vec::new();
    for &feed in FeedId::all() {
        let state = store
            .read(feed)
            .with_context(|| format!("failed to read state for {feed}"))?
            .unwrap_or_default();
        rows.push(FeedStatusOutput { feed, state });
    }

    if json {
        return print_json(&rows);
    }

    let table = rows
        .iter()
        .map(|r| {
            vec![
                r.feed.to_string(),
                r.state.last_known_version.clone().unwrap_or_else(|| "-".into()),
                r.state.last_asset_date.clone().unwrap_or_else(|| "-".into()),
                r.state
                    .last_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "never run".into()),
                fmt_time(r.state.last_check_time),
                fmt_time(r.state.last_update_time),
                r.state.last_dict_name.clone().unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();
    print_table(
        &["FEED", "VERSION", "DATE", "STATUS", "CHECKED", "UPDATED", "FILE"],
        table,
    );
    Ok(())
}

fn fmt_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into())
}
