pub mod cleaner;
pub mod clock;
pub mod http_client;
pub mod parsers;
pub mod retry;

use crate::config::{FetcherConfig, TimeFormat};
use crate::models::{CrawlStatus, CrawlUnit, FIRST_AVAILABLE_DATE, PlayEvent, RawSongCard};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Timelike};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use self::cleaner::{card_to_event, has_meridiem, parse_legacy_time, parse_modern_time, with_hour};
use self::clock::LegacyClock;
use self::http_client::HttpClient;
use self::parsers::parse_song_cards;
use self::retry::RetryPolicy;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Outcome of a single failed attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Network trouble, timeouts, 408/429/5xx.
    #[error("transient: {0}")]
    Transient(String),
    /// Other 4xx, malformed URL, date outside the archive.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// A date the fetcher gave up on.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{date}: gave up after {attempts} attempt(s): {source}")]
pub struct FetchFailure {
    pub date: NaiveDate,
    pub attempts: u32,
    pub source: FetchError,
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// One attempt at retrieving the playlist page for a date.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_page(&self, date: NaiveDate) -> Result<String, FetchError>;
}

// ── thecurrent.org source ─────────────────────────────────────────────────────

pub struct HttpPageSource {
    client: HttpClient,
    url_template: String,
}

impl HttpPageSource {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config).context("Failed to build page source")?,
            url_template: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// e.g. 2020-04-01 → https://www.thecurrent.org/playlist/2020-04-01
    pub fn page_url(&self, date: NaiveDate) -> String {
        let iso = date.format("%Y-%m-%d").to_string();
        if self.url_template.contains("{date}") {
            self.url_template.replace("{date}", &iso)
        } else {
            format!("{}/{}", self.url_template, iso)
        }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get_page(&self, date: NaiveDate) -> Result<String, FetchError> {
        let url = self.page_url(date);
        url::Url::parse(&url)
            .map_err(|e| FetchError::Permanent(format!("malformed URL {}: {}", url, e)))?;
        self.client.get_text(&url).await
    }
}

// ── Retrying fetcher ──────────────────────────────────────────────────────────

/// Wraps a [`PageSource`] with the retry policy. Holds no state between dates.
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(source: Arc<dyn PageSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Fetch the page for `unit.date`, retrying transient failures.
    ///
    /// Drives the unit through `Fetching` / `Retrying`, and to `Failed` when it
    /// gives up. Success leaves the unit open for the extractor to finish.
    pub async fn fetch(&self, unit: &mut CrawlUnit) -> Result<String, FetchFailure> {
        let date = unit.date;

        if date < FIRST_AVAILABLE_DATE {
            unit.transition(CrawlStatus::Failed);
            return Err(FetchFailure {
                date,
                attempts: 0,
                source: FetchError::Permanent(format!(
                    "no playlist before {}",
                    FIRST_AVAILABLE_DATE
                )),
            });
        }

        unit.transition(CrawlStatus::Fetching);

        let attempts = AtomicU32::new(0);
        let source: &dyn PageSource = self.source.as_ref();
        let schedule = self
            .policy
            .schedule()
            .inspect(move |d| debug!("{}: next attempt in {:?}", date, d));

        let result = {
            let attempts = &attempts;
            let unit = &mut *unit;
            RetryIf::start(
                schedule,
                move || {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    source.get_page(date)
                },
                |e: &FetchError| {
                    let n = attempts.load(Ordering::Relaxed);
                    if e.is_transient() {
                        warn!("{}: attempt {} failed: {}", date, n, e);
                        unit.transition(CrawlStatus::Retrying);
                        true
                    } else {
                        warn!("{}: attempt {} failed permanently: {}", date, n, e);
                        false
                    }
                },
            )
            .await
        };

        unit.attempt_count = attempts.load(Ordering::Relaxed);

        result.map_err(|source| {
            unit.transition(CrawlStatus::Failed);
            FetchFailure { date, attempts: unit.attempt_count, source }
        })
    }
}

// ── Extractor ─────────────────────────────────────────────────────────────────

/// One song card that could not be turned into a play event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("card {card}: {reason}")]
pub struct ParseWarning {
    /// 0-based position on the page.
    pub card: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Extraction {
    /// Page order, newest first.
    pub events: Vec<PlayEvent>,
    pub warnings: Vec<ParseWarning>,
}

/// Page HTML → play events for the requested date. Never fails as a whole.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor {
    time_format: TimeFormat,
}

impl Extractor {
    pub fn new(time_format: TimeFormat) -> Self {
        Self { time_format }
    }

    pub fn extract(&self, date: NaiveDate, html: &str) -> Extraction {
        let cards = parse_song_cards(html);
        let format = self.effective_format(&cards);
        let mut clock = LegacyClock::new();
        let mut out = Extraction::default();

        for (i, card) in cards.into_iter().enumerate() {
            let time = match resolve_time(card.time.as_deref(), format, &mut clock) {
                Ok(t) => t,
                Err(reason) => {
                    out.warnings.push(ParseWarning { card: i, reason });
                    continue;
                }
            };

            match card_to_event(date, card, time) {
                Ok(ev) => out.events.push(ev),
                Err(reason) => out.warnings.push(ParseWarning { card: i, reason }),
            }
        }

        for w in &out.warnings {
            warn!("{}: skipped {}", date, w);
        }
        debug!(
            "{}: {} events, {:?} times, clock ended {:?}",
            date, out.events.len(), format, clock.phase()
        );
        out
    }

    fn effective_format(&self, cards: &[RawSongCard]) -> TimeFormat {
        match self.time_format {
            TimeFormat::Auto => {
                if cards.iter().filter_map(|c| c.time.as_deref()).any(has_meridiem) {
                    TimeFormat::Modern
                } else {
                    TimeFormat::Legacy
                }
            }
            explicit => explicit,
        }
    }
}

fn resolve_time(
    raw: Option<&str>,
    format: TimeFormat,
    clock: &mut LegacyClock,
) -> Result<NaiveTime, String> {
    let raw = raw.ok_or_else(|| "missing time".to_string())?;
    match format {
        TimeFormat::Modern | TimeFormat::Auto => {
            parse_modern_time(raw).ok_or_else(|| format!("unparseable time {:?}", raw))
        }
        TimeFormat::Legacy => {
            let t = parse_legacy_time(raw).ok_or_else(|| format!("unparseable time {:?}", raw))?;
            let hour = clock.resolve_hour(t.hour());
            with_hour(t, hour).ok_or_else(|| format!("hour {} out of range", hour))
        }
    }
}
