mod cmd;
mod output;
mod root;

use clap::{Args, Parser, Subcommand};
use dictfeed_core::FeedId;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "dictfeed",
    about = "Keep the repository's pinyin dictionaries in sync with their upstream releases",
    version,
    propagate_version = true
)]
struct Cli {
    /// Repository root holding dict/ and logs/ (default: auto-detect)
    #[arg(long, global = true, env = "DICTFEED_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct UpdateFlags {
    /// Download and install even if the recorded version matches upstream
    #[arg(long)]
    force: bool,

    /// GitHub token for the release API (raises the rate limit)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Update CustomPinyinDictionary_Fcitx.dict from wuhgit/CustomPinyinDictionary
    CustomPinyin(UpdateFlags),

    /// Update zhwiki-YYYYMMDD.dict from felixonmars/fcitx5-pinyin-zhwiki
    Zhwiki(UpdateFlags),

    /// Update every feed in turn
    All(UpdateFlags),

    /// Show the recorded state of every feed
    Status,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::CustomPinyin(flags) => update(&root, &[FeedId::CustomPinyin], flags, cli.json),
        Commands::Zhwiki(flags) => update(&root, &[FeedId::Zhwiki], flags, cli.json),
        Commands::All(flags) => update(&root, FeedId::all(), flags, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json).map(|()| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn update(
    root: &std::path::Path,
    feeds: &[FeedId],
    flags: UpdateFlags,
    json: bool,
) -> anyhow::Result<bool> {
    cmd::update::run(root, feeds, flags.force, flags.github_token, json)
}
