//! Command-line interface definitions.
//!
//! Every option that carries a secret or deployment detail can also be set
//! through an environment variable, so a YAML file checked into the repo never
//! needs to hold credentials.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Crawl paginated sports news catalogs through rotating proxies.
///
/// # Examples
///
/// ```sh
/// # Crawl the built-in catalogs into Postgres
/// DATABASE_URL=postgres://localhost/news PROXY_TOKEN=... sports_news_crawler crawl
///
/// # Four workers, custom jobs, no database
/// sports_news_crawler crawl -c crawl.yaml -w 4 --dry-run
///
/// # Dump the competition index
/// sports_news_crawler competitions -o competitions.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML crawl configuration
    #[arg(short, long, global = true, env = "CRAWL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command that opens browser sessions.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Proxy allocator token
    #[arg(long, global = true, env = "PROXY_TOKEN", hide_env_values = true)]
    pub proxy_token: Option<String>,

    /// Chromium binary to launch instead of the autodetected one
    #[arg(long, global = true, env = "CHROME_EXECUTABLE")]
    pub chrome_executable: Option<String>,

    /// Show the browser window
    #[arg(long, global = true)]
    pub headful: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl every configured job and upsert the articles found
    Crawl(CrawlArgs),

    /// Scrape the competition index and print it as JSON
    Competitions {
        /// Write the index to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct CrawlArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, required_unless_present = "dry_run")]
    pub database_url: Option<String>,

    /// Number of crawl units processed concurrently
    #[arg(short, long, env = "CRAWL_WORKERS")]
    pub workers: Option<usize>,

    /// Keep articles in memory instead of writing to Postgres
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for records that could not be persisted
    #[arg(long)]
    pub dead_letter_dir: Option<PathBuf>,

    /// Pool size for the Postgres connection pool
    #[arg(long, default_value_t = 5)]
    pub max_connections: u32,
}
