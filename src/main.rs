//! CLI entry point for sharelink.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::future::join_all;
use serde::Serialize;
use sharelink_core::{ErrorKind, ExtractError, Extraction, Settings, build_orchestrator};
use tracing::{debug, info};

mod cli;

use cli::Args;

/// One line of `--json` output.
#[derive(Debug, Serialize)]
struct Report<'a> {
    url: &'a str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    extraction: Option<&'a Extraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let urls: Vec<String> = if !args.urls.is_empty() {
        args.urls.clone()
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    } else {
        info!("No input provided. Pass share links as arguments or pipe them via stdin.");
        info!("Example: sharelink https://www.terabox.com/s/1AbCdEf");
        return Ok(());
    };

    if urls.is_empty() {
        info!("No share links found in input");
        return Ok(());
    }

    let settings = load_settings(&args)?;
    let orchestrator = build_orchestrator(&settings).await?;
    let caller = args.caller.as_deref();

    let results = join_all(urls.iter().map(|url| orchestrator.extract(url, caller))).await;

    let mut failed = 0;
    for (url, result) in urls.iter().zip(&results) {
        if result.is_err() {
            failed += 1;
        }
        if args.json {
            println!("{}", serde_json::to_string(&report(url, result))?);
        } else {
            print_text(url, result);
        }
    }

    let stats = orchestrator.stats().await;
    debug!(
        cache_hits = stats.cache.hits,
        cache_size = stats.cache.size,
        proxies_alive = stats.proxies.alive,
        identities_valid = stats.identities.valid,
        "pipeline stats"
    );

    if failed > 0 {
        bail!("{failed} of {} link(s) could not be extracted", urls.len());
    }
    Ok(())
}

/// Environment settings with CLI overrides applied.
fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.env_file {
        Some(path) => Settings::from_env_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::from_env().context("loading settings from the environment")?,
    };
    if args.no_proxy {
        settings.use_proxy = false;
    }
    if args.no_cache {
        settings.cache_enabled = false;
    }
    if let Some(max_retries) = args.max_retries {
        settings.max_retries = max_retries;
    }
    settings.validate()?;
    Ok(settings)
}

fn report<'a>(url: &'a str, result: &'a Result<Extraction, ExtractError>) -> Report<'a> {
    match result {
        Ok(extraction) => Report {
            url,
            ok: true,
            extraction: Some(extraction),
            error: None,
            kind: None,
        },
        Err(error) => Report {
            url,
            ok: false,
            extraction: None,
            error: Some(error.to_string()),
            kind: Some(error.kind()),
        },
    }
}

fn print_text(url: &str, result: &Result<Extraction, ExtractError>) {
    match result {
        Ok(extraction) => {
            let source = if extraction.from_cache { "cache" } else { extraction.strategy.as_str() };
            println!("{url} ({} file(s) via {source})", extraction.files.len());
            for file in &extraction.files {
                let duration = file.formatted_duration();
                if duration.is_empty() {
                    println!("  {}  [{}]", file.filename, file.formatted_size());
                } else {
                    println!("  {}  [{}, {duration}]", file.filename, file.formatted_size());
                }
                if !file.direct_link.is_empty() {
                    println!("    {}", file.direct_link);
                }
            }
        }
        Err(error) => eprintln!("{url}: {error}"),
    }
}
