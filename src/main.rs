mod config;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{AppConfig, TimeFormat};
use crate::loader::{discover_buckets, scan_bucket};
use crate::pipeline::{CrawlSummary, Crawler, Progress};
use crate::storage::ledger::Ledger;

#[derive(Parser)]
#[command(
    name = "playlist-crawler",
    about = "Archive The Current's daily playlists into monthly CSV buckets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a date range; days already on disk are skipped
    Crawl(CrawlArgs),

    /// Show bucket and ledger statistics
    Stats {
        /// Also list every monthly bucket
        #[arg(long)]
        months: bool,
    },

    /// List days whose latest crawl failed
    Failed,
}

#[derive(Args)]
struct CrawlArgs {
    /// First day to crawl (default: first available playlist)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last day to crawl, inclusive (default: today)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Maximum page fetches in flight
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Bucket directory; the ledger moves along with it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop dispatching new days after the first failure
    #[arg(long)]
    fail_fast: bool,

    #[arg(long, value_enum)]
    time_format: Option<TimeFormat>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl CrawlArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(start) = self.start {
            config.crawl.start_date = start;
        }
        if let Some(end) = self.end {
            config.crawl.end_date = Some(end);
        }
        if let Some(n) = self.concurrency {
            config.crawl.concurrency = n;
        }
        if let Some(dir) = &self.output {
            config.storage.ledger_path = dir.join("crawl.duckdb");
            config.storage.output_dir = dir.clone();
        }
        if self.fail_fast {
            config.crawl.fail_fast = true;
        }
        if let Some(format) = self.time_format {
            config.crawl.time_format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "playlist_crawler=info,warn",
        1 => "playlist_crawler=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Crawl(args) => {
            args.apply(&mut config);
            let start = config.crawl.start_date;
            let end = config.crawl.end_date.unwrap_or_else(|| Local::now().date_naive());

            let _t = utils::Timer::start(format!("Crawl {} → {}", start, end));
            let mut crawler = Crawler::from_config(&config)?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted: aborting in-flight fetches, writing days already fetched");
                    on_signal.cancel();
                }
            });

            let every = Duration::from_secs(config.crawl.progress_interval_secs.max(1));
            let reporter = spawn_progress_log(crawler.progress(), every);
            let result = crawler.run(start, end, cancel).await;
            reporter.abort();
            let summary = result?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }

            if summary.cancelled {
                return Ok(ExitCode::from(130));
            }
            if summary.failed > 0 || summary.aborted {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::Stats { months } => {
            let dir = &config.storage.output_dir;
            let buckets = discover_buckets(dir)?;

            let mut rows = 0usize;
            let mut days = 0usize;
            let mut stray = 0usize;
            let mut per_month = Vec::new();
            for (key, path) in &buckets {
                let scan = scan_bucket(*key, path)
                    .with_context(|| format!("Failed to scan {:?}", path))?;
                rows += scan.rows;
                days += scan.days.len();
                stray += scan.skipped;
                per_month.push(scan);
            }

            let ledger = Ledger::open(&config.storage.ledger_path)?;
            let (ok, failed) = ledger.day_counts()?;
            let runs = ledger.run_count()?;

            println!("─────────────────────────────────");
            println!("  Playlist archive");
            println!("─────────────────────────────────");
            println!("  Buckets      : {}", buckets.len());
            println!("  Plays        : {}", utils::fmt_number(rows as i64));
            println!("  Days on disk : {}", utils::fmt_number(days as i64));
            println!("  Stray rows   : {}", utils::fmt_number(stray as i64));
            println!("  From         : {}", buckets.first().map(|(k, _)| k.to_string()).unwrap_or("—".into()));
            println!("  To           : {}", buckets.last().map(|(k, _)| k.to_string()).unwrap_or("—".into()));
            println!("  Ledger ok    : {}", utils::fmt_number(ok));
            println!("  Ledger failed: {}", utils::fmt_number(failed));
            println!("  Crawl runs   : {}", utils::fmt_number(runs));
            println!("─────────────────────────────────");

            if months {
                for scan in &per_month {
                    let name = scan.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                    println!(
                        "  {}  {:>8} plays  {:>2} days  {}",
                        scan.key,
                        utils::fmt_number(scan.rows as i64),
                        scan.days.len(),
                        name
                    );
                }
            }
        }

        Command::Failed => {
            let ledger = Ledger::open(&config.storage.ledger_path)?;
            let days = ledger.failed_days()?;
            if days.is_empty() {
                println!("No failed days.");
            } else {
                println!("{} failed days:", days.len());
                for day in &days {
                    println!("  {}  ({} attempts)  {}", day.date, day.attempts, day.error);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn spawn_progress_log(progress: Progress, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!(
                "Progress: {}/{} days",
                utils::fmt_number(progress.processed() as i64),
                utils::fmt_number(progress.total() as i64)
            );
        }
    })
}

fn print_summary(s: &CrawlSummary) {
    println!("─────────────────────────────────");
    println!("  Crawl summary");
    println!("─────────────────────────────────");
    println!("  Succeeded    : {}", utils::fmt_number(s.succeeded as i64));
    println!("  Empty days   : {}", utils::fmt_number(s.succeeded_empty as i64));
    println!("  Failed       : {}", utils::fmt_number(s.failed as i64));
    println!("  Skipped      : {}", utils::fmt_number(s.skipped as i64));
    println!("  Not started  : {}", utils::fmt_number(s.not_started as i64));
    println!("  Rows written : {}", utils::fmt_number(s.rows_written as i64));
    println!("  Bad cards    : {}", utils::fmt_number(s.parse_warnings as i64));
    println!("─────────────────────────────────");
    for f in &s.failed_dates {
        println!("  ✗ {}  ({} attempts)  {}", f.date, f.attempts, f.error);
    }
}
