//! Crawl orchestrator: ties fetcher → extractor → bucket sink together.
//!
//! ## How a run proceeds
//!
//! 1. Work out which days in `[start, end]` are already covered (ledger
//!    successes plus days present in existing bucket files) and skip them.
//! 2. For every other day, take a permit from the admission gate and spawn a
//!    task that fetches and extracts that day. The permit is released as soon
//!    as the fetch is over.
//! 3. Finished days come back to this task, which is the only writer. Within a
//!    monthly bucket they are appended in date order, so bucket contents do not
//!    depend on which fetch happened to finish first. A slow day only holds
//!    back later days of its own month, and dispatching pauses while too many
//!    fetched days are waiting to be written.
//!
//! Re-running over the same output directory only fetches days that are not
//! covered yet. A failed day is logged, recorded, and the run carries on
//! unless `fail_fast` is set. Cancelling stops new dispatches, aborts
//! in-flight fetches, and still flushes whatever was already extracted.

use crate::config::{AppConfig, CrawlConfig};
use crate::loader::covered_days;
use crate::models::{CrawlStatus, CrawlUnit, FIRST_AVAILABLE_DATE, MonthKey, PlayEvent};
use crate::scraper::retry::RetryPolicy;
use crate::scraper::{Extractor, FetchFailure, Fetcher, HttpPageSource};
use crate::storage::BucketSink;
use crate::storage::ledger::{Ledger, RunTotals};
use crate::utils::days_inclusive;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ── Errors & results ──────────────────────────────────────────────────────────

/// Reasons a run refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("start date {start} is after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("start date {0} is before the first available playlist ({FIRST_AVAILABLE_DATE})")]
    BeforeArchive(NaiveDate),

    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,

    #[error("crawl ledger: {0:#}")]
    Ledger(anyhow::Error),

    #[error("scanning existing buckets: {0:#}")]
    Coverage(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDate {
    pub date: NaiveDate,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlSummary {
    /// Days persisted with at least one play.
    pub succeeded: usize,
    /// Days fetched fine that had no plays.
    pub succeeded_empty: usize,
    pub failed: usize,
    /// Days already covered before the run.
    pub skipped: usize,
    /// Days never finished because the run was cancelled or aborted.
    pub not_started: usize,
    pub rows_written: usize,
    pub parse_warnings: usize,
    pub failed_dates: Vec<FailedDate>,
    pub cancelled: bool,
    /// Stopped early by `fail_fast`.
    pub aborted: bool,
}

/// Days processed so far; cheap to clone and read from another task.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    processed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl Progress {
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn add_total(&self, n: usize) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    fn tick(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Fetched-but-unwritten days allowed per permit before dispatching pauses.
const REORDER_WINDOW_PER_PERMIT: usize = 4;

// ── Per-day work ──────────────────────────────────────────────────────────────

enum DayOutcome {
    Extracted { date: NaiveDate, attempts: u32, events: Vec<PlayEvent>, warnings: usize },
    FetchFailed(FetchFailure),
    Cancelled(NaiveDate),
}

impl DayOutcome {
    fn date(&self) -> NaiveDate {
        match self {
            DayOutcome::Extracted { date, .. } | DayOutcome::Cancelled(date) => *date,
            DayOutcome::FetchFailed(f) => f.date,
        }
    }
}

async fn crawl_day(
    date: NaiveDate,
    fetcher: Fetcher,
    extractor: Extractor,
    permit: OwnedSemaphorePermit,
    stop: CancellationToken,
) -> DayOutcome {
    let mut unit = CrawlUnit::new(date);

    let fetched = tokio::select! {
        biased;
        _ = stop.cancelled() => None,
        r = fetcher.fetch(&mut unit) => Some(r),
    };
    drop(permit);

    match fetched {
        None => {
            debug!("{}: cancelled in flight", date);
            DayOutcome::Cancelled(date)
        }
        Some(Err(failure)) => DayOutcome::FetchFailed(failure),
        Some(Ok(html)) => {
            let extraction = extractor.extract(date, &html);
            unit.transition(CrawlStatus::Succeeded);
            DayOutcome::Extracted {
                date,
                attempts: unit.attempt_count,
                events: extraction.events,
                warnings: extraction.warnings.len(),
            }
        }
    }
}

struct RunState {
    run_id: i64,
    stop: CancellationToken,
    /// Dispatched, unwritten days in date order; `None` until the day's task reports back.
    pending: BTreeMap<NaiveDate, Option<DayOutcome>>,
    summary: CrawlSummary,
}

// ── Crawler ───────────────────────────────────────────────────────────────────

pub struct Crawler {
    config: CrawlConfig,
    fetcher: Fetcher,
    extractor: Extractor,
    sink: BucketSink,
    ledger: Ledger,
    progress: Progress,
}

impl Crawler {
    pub fn new(
        config: CrawlConfig,
        fetcher: Fetcher,
        extractor: Extractor,
        sink: BucketSink,
        ledger: Ledger,
    ) -> Self {
        Self { config, fetcher, extractor, sink, ledger, progress: Progress::default() }
    }

    /// Wire up the HTTP source, output directory and ledger from configuration.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let source = HttpPageSource::new(&config.fetcher)?;
        let fetcher = Fetcher::new(Arc::new(source), RetryPolicy::from(&config.fetcher));
        let sink = BucketSink::open(&config.storage.output_dir)
            .context("Failed to open output directory")?;
        let ledger = Ledger::open(&config.storage.ledger_path)
            .context("Failed to open crawl ledger")?;

        Ok(Self::new(
            config.crawl.clone(),
            fetcher,
            Extractor::new(config.crawl.time_format),
            sink,
            ledger,
        ))
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Crawl every day in `[start, end]` that is not already covered.
    pub async fn run(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: CancellationToken,
    ) -> Result<CrawlSummary, CrawlError> {
        if start > end {
            return Err(CrawlError::InvalidRange { start, end });
        }
        if start < FIRST_AVAILABLE_DATE {
            return Err(CrawlError::BeforeArchive(start));
        }
        let limit = self.config.concurrency;
        if limit == 0 {
            return Err(CrawlError::ZeroConcurrency);
        }

        let covered = self.coverage(start, end)?;
        let dates: Vec<NaiveDate> = days_inclusive(start, end).collect();
        self.progress.add_total(dates.len());
        info!(
            "Crawling {} days ({} → {}): {} already covered, concurrency {}",
            dates.len(), start, end, covered.len(), limit
        );

        let run_id = self.ledger.begin_run(start, end).map_err(CrawlError::Ledger)?;
        let gate = Arc::new(Semaphore::new(limit));
        let window = limit.saturating_mul(REORDER_WINDOW_PER_PERMIT);
        let mut tasks: JoinSet<DayOutcome> = JoinSet::new();
        let mut state = RunState {
            run_id,
            stop: cancel.child_token(),
            pending: BTreeMap::new(),
            summary: CrawlSummary::default(),
        };

        'dates: for &date in &dates {
            if covered.contains(&date) {
                debug!("{}: already covered, skipping", date);
                state.summary.skipped += 1;
                self.progress.tick();
                continue;
            }

            // Wait for a slot and room in the reorder window, settling finished days meanwhile.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = state.stop.cancelled() => break 'dates,
                    Some(joined) = tasks.join_next() => self.collect(joined, &mut state),
                    permit = gate.clone().acquire_owned(), if state.pending.len() < window => match permit {
                        Ok(p) => break p,
                        Err(_) => break 'dates,
                    },
                }
            };

            state.pending.insert(date, None);
            tasks.spawn(crawl_day(
                date,
                self.fetcher.clone(),
                self.extractor,
                permit,
                state.stop.clone(),
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            self.collect(joined, &mut state);
        }
        self.flush_remaining(&mut state);

        let mut summary = state.summary;
        summary.failed_dates.sort_by_key(|f| f.date);
        summary.cancelled = cancel.is_cancelled();
        let settled = summary.succeeded + summary.succeeded_empty + summary.failed + summary.skipped;
        summary.not_started = dates.len().saturating_sub(settled);

        let totals = RunTotals {
            succeeded: summary.succeeded + summary.succeeded_empty,
            failed: summary.failed,
            skipped: summary.skipped,
            rows_written: summary.rows_written,
            cancelled: summary.cancelled || summary.aborted,
        };
        if let Err(e) = self.ledger.finish_run(run_id, &totals) {
            warn!("Could not close crawl run #{}: {:#}", run_id, e);
        }
        for (key, rows) in self.sink.rows_written() {
            debug!("{}: {} rows appended by this crawler", key, rows);
        }

        info!(
            "=== Done: {} ok | {} empty | {} failed | {} skipped | {} not started | {} rows ===",
            summary.succeeded, summary.succeeded_empty, summary.failed,
            summary.skipped, summary.not_started, summary.rows_written,
        );
        Ok(summary)
    }

    fn coverage(&self, start: NaiveDate, end: NaiveDate) -> Result<HashSet<NaiveDate>, CrawlError> {
        let mut covered = self.ledger.succeeded_days(start, end).map_err(CrawlError::Ledger)?;
        let in_buckets = covered_days(self.sink.dir(), start, end).map_err(CrawlError::Coverage)?;
        covered.extend(in_buckets);
        Ok(covered)
    }

    /// Park a finished day, then settle every day not waiting on an earlier one
    /// in the same month.
    fn collect(&mut self, joined: Result<DayOutcome, JoinError>, state: &mut RunState) {
        match joined {
            Ok(outcome) => {
                if !matches!(outcome, DayOutcome::Cancelled(_)) {
                    self.progress.tick();
                }
                state.pending.insert(outcome.date(), Some(outcome));
            }
            Err(e) => {
                error!("Crawl task panicked: {}", e);
                self.progress.tick();
            }
        }

        let mut blocked = HashSet::new();
        let mut ready = Vec::new();
        for (date, slot) in &state.pending {
            let key = MonthKey::from_date(*date);
            if slot.is_none() {
                blocked.insert(key);
            } else if !blocked.contains(&key) {
                ready.push(*date);
            }
        }

        for date in ready {
            if let Some(Some(outcome)) = state.pending.remove(&date) {
                self.settle(outcome, state);
            }
        }
    }

    /// After every task has reported: settle stragglers behind a panicked day.
    fn flush_remaining(&mut self, state: &mut RunState) {
        for (date, slot) in std::mem::take(&mut state.pending) {
            match slot {
                Some(outcome) => self.settle(outcome, state),
                None => self.record_failure(state, date, 0, "crawl task panicked".to_string()),
            }
        }
    }

    fn settle(&mut self, outcome: DayOutcome, state: &mut RunState) {
        match outcome {
            DayOutcome::Extracted { date, attempts, events, warnings } => {
                state.summary.parse_warnings += warnings;
                match self.sink.append(MonthKey::from_date(date), events) {
                    Ok(rows) => self.record_success(state, date, rows, attempts),
                    Err(e) => self.record_failure(state, date, attempts, e.to_string()),
                }
            }
            DayOutcome::FetchFailed(f) => {
                self.record_failure(state, f.date, f.attempts, f.source.to_string())
            }
            DayOutcome::Cancelled(_) => {}
        }
    }

    fn record_success(&mut self, state: &mut RunState, date: NaiveDate, rows: usize, attempts: u32) {
        if rows == 0 {
            state.summary.succeeded_empty += 1;
        } else {
            state.summary.succeeded += 1;
        }
        state.summary.rows_written += rows;
        debug!("{}: {} plays persisted", date, rows);

        if let Err(e) = self.ledger.record_success(state.run_id, date, rows, attempts) {
            warn!("{}: persisted but not recorded in ledger: {:#}", date, e);
        }
    }

    fn record_failure(&mut self, state: &mut RunState, date: NaiveDate, attempts: u32, error: String) {
        error!("{}: failed after {} attempt(s): {}", date, attempts, error);

        if let Err(e) = self.ledger.record_failure(state.run_id, date, attempts, &error) {
            warn!("{}: failure not recorded in ledger: {:#}", date, e);
        }
        state.summary.failed += 1;
        state.summary.failed_dates.push(FailedDate { date, attempts, error });

        if self.config.fail_fast && !state.stop.is_cancelled() {
            warn!("fail_fast is set: no new days will be dispatched");
            state.summary.aborted = true;
            state.stop.cancel();
        }
    }
}
