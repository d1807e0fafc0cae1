//! CLI for the dmscrape comment scraper.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, ValueEnum};

use dmscrape_core::config;
use dmscrape_core::exporter::{Exporter, FileExporter, SqliteExporter, StreamExporter};
use dmscrape_core::scraper::Scraper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportMethod {
    /// XML files under the output directory.
    File,
    /// XML documents to stdout.
    Stream,
    /// Rows in a SQLite database.
    Sqlite,
}

/// Scrape danmaku comment pools, history included, with the minimum number
/// of requests.
#[derive(Debug, Parser)]
#[command(name = "dmscrape")]
#[command(about = "Scrape timed-comment pools including their history", long_about = None)]
pub struct Cli {
    /// Export method.
    #[arg(short = 'e', long = "export", value_enum, default_value = "file")]
    pub export: ExportMethod,

    /// Output root directory for file export.
    #[arg(short = 'p', long = "path", value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// SQLite database URI for database export.
    #[arg(long = "db", value_name = "URI", default_value = "sqlite://comments.db?mode=rwc")]
    pub db: String,

    /// Merge each target's history into one document instead of one file
    /// per snapshot.
    #[arg(short = 'j', long = "join")]
    pub join: bool,

    /// Do not scrape historical snapshots.
    #[arg(short = 'b', long = "no-history")]
    pub no_history: bool,

    /// Keep only comments dated at or after this unix timestamp.
    #[arg(short = 's', long = "start", value_name = "TS")]
    pub start: Option<i64>,

    /// Keep only comments dated at or before this unix timestamp.
    #[arg(short = 'n', long = "end", value_name = "TS")]
    pub end: Option<i64>,

    /// Add an inclusive range of targets; may be repeated.
    #[arg(
        short = 'r',
        long = "range",
        num_args = 2,
        value_names = ["FIRST", "LAST"],
        action = ArgAction::Append
    )]
    pub range: Vec<u64>,

    /// Maximum simultaneous workers (default from the config file).
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Verbose logging.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Individual target CIDs.
    #[arg(value_name = "CID")]
    pub targets: Vec<u64>,
}

impl Cli {
    fn exporter(&self) -> Arc<dyn Exporter> {
        match self.export {
            ExportMethod::File => Arc::new(FileExporter::new(self.path.as_deref(), self.join)),
            ExportMethod::Stream => Arc::new(StreamExporter::stdout()),
            ExportMethod::Sqlite => Arc::new(SqliteExporter::new(&self.db)),
        }
    }
}

pub async fn run_from_args() -> Result<()> {
    let cli = Cli::parse();
    dmscrape_core::logging::init_logging(cli.verbose);
    run(cli).await
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.targets.is_empty() && cli.range.is_empty() {
        bail!("no targets given; pass CIDs or --range FIRST LAST");
    }

    let cfg = config::load_or_init()?;
    tracing::debug!("loaded config: {:?}", cfg);

    let mut scraper = Scraper::new(
        cli.exporter(),
        !cli.no_history,
        (cli.start, cli.end),
        cli.workers.unwrap_or(cfg.max_workers),
    )?
    .with_fetcher_config(cfg.fetcher_config())
    .with_controller_config(cfg.controller_config()?);

    for pair in cli.range.chunks(2) {
        scraper.add_range(pair[0], pair[1])?;
    }
    for &cid in &cli.targets {
        scraper.add(cid)?;
    }

    scraper.run().await
}
