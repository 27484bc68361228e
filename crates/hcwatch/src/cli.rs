//! Clap derive structures for the `hcwatch` CLI.
//!
//! Defines the command tree and global flags. Also compiled by `build.rs`
//! for man pages, so it may only depend on clap and clap_complete.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hcwatch -- record Home Connect appliance events
#[derive(Debug, Parser)]
#[command(
    name = "hcwatch",
    version,
    about = "Record Home Connect appliance events",
    long_about = "Watches the Home Connect event stream, enriches every event with\n\
        follow-up status, settings and program requests, and records the\n\
        result as daily JSONL files and/or a SQLite database.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "HCWATCH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "HCWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch the event stream and record every event
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Print the authorization URL, or exchange a code for a token
    Authorize(AuthorizeArgs),

    /// Log in to the developer simulator without a browser
    LoginSimulator(LoginSimulatorArgs),

    /// Bulk-load recorded JSONL files into the SQLite database
    Load(LoadArgs),

    /// Print the item map of every recorded event
    Items(ItemsArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Watch one appliance (haId) instead of all of them
    #[arg(long, short = 'a')]
    pub appliance: Option<String>,

    /// Directory for daily JSONL files (overrides profile)
    #[arg(long, short = 'o', env = "HCWATCH_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// SQLite database URL (overrides profile)
    #[arg(long, env = "HCWATCH_DATABASE")]
    pub database: Option<String>,

    /// Seconds between status log lines
    #[arg(long, default_value = "300")]
    pub status_interval: u64,
}

#[derive(Debug, Args)]
pub struct AuthorizeArgs {
    /// Authorization code from the redirect (omit to print the URL)
    #[arg(long)]
    pub code: Option<String>,
}

#[derive(Debug, Args)]
pub struct LoginSimulatorArgs {
    /// Simulator account email
    #[arg(long, short = 'u', env = "HCWATCH_SIMULATOR_USER")]
    pub user: String,

    /// Simulator account password
    #[arg(long, env = "HCWATCH_SIMULATOR_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// A JSONL file, or a directory of them
    pub path: PathBuf,

    /// SQLite database URL (overrides profile)
    #[arg(long, env = "HCWATCH_DATABASE")]
    pub database: Option<String>,

    /// Delete all stored events before loading
    #[arg(long)]
    pub clean: bool,
}

#[derive(Debug, Args)]
pub struct ItemsArgs {
    /// JSONL files or directories of them
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Only events of this appliance
    #[arg(long, short = 'a')]
    pub appliance: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
