pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod install;
pub mod io;
pub mod logbook;
pub mod orchestrator;
pub mod paths;
pub mod probe;
pub mod retry;
pub mod state;
pub mod unpack;

pub use error::{FeedError, Result};
pub use feed::FeedId;
pub use orchestrator::{Orchestrator, RunReport, RunState};
