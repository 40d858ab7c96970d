use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "epwatch",
    version,
    about = "Watch episodes with resume, skip windows, progress checkpoints and autoplay"
)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct BackendArgs {
    /// Viewer profile whose progress is read and written.
    #[arg(long, global = true, env = "EPWATCH_PROFILE")]
    pub profile: Option<String>,

    /// SQLite progress database (local backend).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// JSON show catalog (local backend).
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Base URL of a watch-history API; replaces the local backend.
    #[arg(long, global = true, env = "EPWATCH_REMOTE_URL")]
    pub remote: Option<String>,

    #[arg(long, global = true, env = "EPWATCH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive watch screen.
    Watch {
        episode_id: String,
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },
    /// Headless run on a virtual clock, printing every transition.
    Simulate {
        episode_id: String,
        /// Timed actions, one `<at-seconds> <action> [arg]` per line.
        #[arg(long)]
        script: Option<PathBuf>,
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
        /// Stop after this many episodes have been opened.
        #[arg(long)]
        max_episodes: Option<usize>,
        /// Keep progress in memory instead of the configured store.
        #[arg(long)]
        ephemeral: bool,
    },
    /// List stored progress for the profile, newest first.
    Progress,
    /// List shows and their ordered episodes.
    Catalog,
}
