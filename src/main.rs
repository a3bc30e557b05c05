//! CLI entry point for the docmirror tool.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use docmirror_core::{CrawlConfig, start_scraping_from};
use tracing::{debug, info};

mod cli;

use cli::Args;

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

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!(seed = %args.seed, doc = %args.doc, version = %args.doc_version, "Docmirror starting");

    let config = build_config(&args);
    let summary = start_scraping_from(&args.seed, &args.doc, &args.doc_version, config)
        .await
        .with_context(|| format!("crawl of {} failed", args.seed))?;

    info!(
        fetched = summary.pages_fetched,
        changed = summary.pages_changed,
        unchanged = summary.pages_unchanged,
        skipped = summary.pages_skipped,
        failed = summary.pages_failed,
        links_checked = summary.links_checked,
        resumed = summary.resumed,
        "Crawl complete"
    );

    if !args.quiet {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

fn build_config(args: &Args) -> CrawlConfig {
    let initial_delay = Duration::from_millis(args.delay);
    let mut config = CrawlConfig::new(&args.output);
    config.max_workers = usize::from(args.workers);
    config.max_retries = u32::from(args.max_retries);
    config.initial_delay = initial_delay;
    config.min_delay = config.min_delay.min(initial_delay);
    config.use_sitemap = !args.no_sitemap;
    config
}
