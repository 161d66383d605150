//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Extract direct download links from file-sharing links.
///
/// Links are read from the arguments, or from stdin (one per line) when no
/// arguments are given. Settings come from the environment and `.env`;
/// flags override them.
#[derive(Parser, Debug)]
#[command(name = "sharelink")]
#[command(author, version, about)]
pub struct Args {
    /// Share links to extract
    pub urls: Vec<String>,

    /// Caller id used for per-caller rate limiting
    #[arg(long)]
    pub caller: Option<String>,

    /// Send every request directly, without the proxy pool
    #[arg(long)]
    pub no_proxy: bool,

    /// Disable the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum retries per request (0-20)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: Option<u32>,

    /// Read settings from this env file instead of ./.env
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Print results as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
