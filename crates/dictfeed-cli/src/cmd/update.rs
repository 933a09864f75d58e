use crate::output::print_json;
use anyhow::Context;
use dictfeed_core::{
    config::Config,
    fetch::HttpFetcher,
    install::Installer,
    logbook::FileLogSink,
    paths,
    probe::GithubProber,
    state::FileStateStore,
    FeedId, Orchestrator, RunReport, RunState,
};
use std::path::Path;

/// `dictfeed <feed>` / `dictfeed all` — check each feed and update it when stale.
///
/// Returns `Ok(false)` when any feed ended in `FAILED`; every feed is still
/// attempted so one broken upstream does not hold back the other.
pub fn run(
    root: &Path,
    feeds: &[FeedId],
    force: bool,
    github_token: Option<String>,
    json: bool,
) -> anyhow::Result<bool> {
    let config = Config::load(root).context("failed to load dictfeed.yaml")?;
    let store = FileStateStore::new(root, &config);
    let log = FileLogSink::new(root, &config);
    let prober = GithubProber::new(&config, github_token)?;
    let fetcher = HttpFetcher::new(&config)?;
    let dict_dir = paths::dict_dir(root, &config);

    let mut reports = Vec::with_capacity(feeds.len());
    for &feed in feeds {
        let report = Orchestrator::new(
            feed,
            &prober,
            &fetcher,
            &store,
            &log,
            Installer::new(&dict_dir),
        )
        .with_history_limit(config.history_limit)
        .run(force);
        if !json {
            print_report(&report);
        }
        reports.push(report);
    }

    if json {
        print_json(&reports)?;
    }
    Ok(reports.iter().all(RunReport::is_success))
}

fn print_report(report: &RunReport) {
    let version = report
        .release
        .as_ref()
        .map(|r| r.label())
        .unwrap_or_else(|| "unknown".to_string());
    match report.outcome {
        RunState::UpToDate => println!("{}: up to date ({version})", report.feed),
        RunState::Done => {
            println!("{}: updated to {version}", report.feed);
            if let Some(installed) = &report.installed {
                println!("  installed: {}", installed.path.display());
                println!("  sha256:    {}", installed.sha256);
                for name in &installed.removed {
                    println!("  removed:   {name}");
                }
            }
        }
        _ => eprintln!(
            "{}: update failed ({})",
            report.feed,
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
