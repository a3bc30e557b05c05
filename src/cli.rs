//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use docmirror_core::{DEFAULT_MAX_RETRIES, DEFAULT_MAX_WORKERS};

/// Mirror a documentation site, re-fetching only what changed.
///
/// Docmirror crawls every page under the seed URL's path, stores each page
/// under `<output>/docs/<doc>/<doc-version>/`, and on later runs writes only
/// the pages whose content changed.
#[derive(Parser, Debug)]
#[command(name = "docmirror")]
#[command(author, version, about)]
pub struct Args {
    /// Seed URL; only pages under its directory are crawled
    pub seed: String,

    /// Documentation set name used in the output layout
    #[arg(short, long)]
    pub doc: String,

    /// Documentation version used in the output layout
    #[arg(long = "doc-version", default_value = "latest")]
    pub doc_version: String,

    /// Output root directory
    #[arg(short, long, default_value = "mirror")]
    pub output: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent crawl workers (1-64)
    #[arg(short = 'w', long, default_value_t = DEFAULT_MAX_WORKERS as u8, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: u8,

    /// Maximum fetch attempts per page (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Initial delay between requests in milliseconds (max 5000)
    #[arg(short = 'l', long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=5000))]
    pub delay: u64,

    /// Do not seed the frontier from sitemap.xml
    #[arg(long)]
    pub no_sitemap: bool,
}
