use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::FIRST_AVAILABLE_DATE;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    /// Either a base (`…/playlist`, date appended) or a template containing `{date}`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Total attempts per date, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default)]
    pub jitter: bool,
}

/// Which on-page time representation to expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    /// Modern if any card carries an AM/PM marker, legacy otherwise.
    #[default]
    Auto,
    /// `H:MM` without a marker, resolved by page order.
    Legacy,
    /// `h:MM am|pm`.
    Modern,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlConfig {
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// `None` means today.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub fail_fast: bool,

    #[serde(default)]
    pub time_format: TimeFormat,

    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.thecurrent.org/playlist".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    "playlist-crawler/0.1 (personal archive; polite crawl)".to_string()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    10_000
}
fn default_start_date() -> NaiveDate {
    FIRST_AVAILABLE_DATE
}
fn default_concurrency() -> usize {
    25
}
fn default_progress_interval_secs() -> u64 {
    30
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("output/crawl.duckdb")
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter: false,
        }
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            end_date: None,
            concurrency: default_concurrency(),
            fail_fast: false,
            time_format: TimeFormat::Auto,
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            ledger_path: default_ledger_path(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("PLAYLIST").separator("__"))
            .build()
            .context("Failed to read configuration sources")?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.fetcher.max_attempts, 5);
        assert_eq!(cfg.fetcher.backoff_base_ms, 1_000);
        assert_eq!(cfg.fetcher.backoff_max_ms, 10_000);
        assert_eq!(cfg.crawl.concurrency, 25);
        assert_eq!(cfg.crawl.start_date, FIRST_AVAILABLE_DATE);
        assert!(!cfg.crawl.fail_fast);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[crawl]\nconcurrency = 4\nstart_date = \"2020-04-01\"\ntime_format = \"legacy\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.crawl.concurrency, 4);
        assert_eq!(cfg.crawl.start_date, NaiveDate::from_ymd_opt(2020, 4, 1).unwrap());
        assert_eq!(cfg.crawl.time_format, TimeFormat::Legacy);
        assert_eq!(cfg.fetcher.base_url, default_base_url());
        assert_eq!(cfg.storage.output_dir, PathBuf::from("output"));
    }
}
