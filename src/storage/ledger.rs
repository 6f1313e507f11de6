//! Crawl ledger in DuckDB: which days are done, which failed, and a log of runs.
//!
//! Bucket files stay the source of truth for play data; the ledger only
//! remembers outcomes, including days that legitimately had no plays.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::{Connection, params};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS crawl_run_ids START 1;

CREATE TABLE IF NOT EXISTS crawl_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('crawl_run_ids'),
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    range_start     DATE NOT NULL,
    range_end       DATE NOT NULL,
    succeeded       INTEGER DEFAULT 0,
    failed          INTEGER DEFAULT 0,
    skipped         INTEGER DEFAULT 0,
    rows_written    INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS crawled_days (
    date        DATE PRIMARY KEY,
    status      VARCHAR NOT NULL,
    row_count   BIGINT NOT NULL DEFAULT 0,
    attempts    BIGINT NOT NULL DEFAULT 0,
    error_msg   VARCHAR,
    run_id      BIGINT,
    updated_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

/// A day the ledger remembers as failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedDay {
    pub date: NaiveDate,
    pub attempts: i64,
    pub error: String,
}

/// Totals at the end of a run, as stored in `crawl_runs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunTotals {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows_written: usize,
    pub cancelled: bool,
}

// ── Ledger ────────────────────────────────────────────────────────────────────

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        let ledger = Self { conn };
        ledger.run_migrations()?;
        Ok(ledger)
    }

    pub fn open_in_memory() -> Result<Self> {
        let ledger = Self { conn: Connection::open_in_memory()? };
        ledger.run_migrations()?;
        Ok(ledger)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    // ── Days ──────────────────────────────────────────────────────────────────

    pub fn record_success(&self, run_id: i64, date: NaiveDate, rows: usize, attempts: u32) -> Result<()> {
        self.upsert_day(run_id, date, "succeeded", rows, attempts, None)
    }

    pub fn record_failure(&self, run_id: i64, date: NaiveDate, attempts: u32, error: &str) -> Result<()> {
        self.upsert_day(run_id, date, "failed", 0, attempts, Some(error))
    }

    fn upsert_day(
        &self,
        run_id: i64,
        date: NaiveDate,
        status: &str,
        rows: usize,
        attempts: u32,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                r#"INSERT INTO crawled_days (date, status, row_count, attempts, error_msg, run_id, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (date) DO UPDATE SET
                       status     = excluded.status,
                       row_count  = excluded.row_count,
                       attempts   = excluded.attempts,
                       error_msg  = excluded.error_msg,
                       run_id     = excluded.run_id,
                       updated_at = excluded.updated_at"#,
                params![
                    date,
                    status,
                    rows as i64,
                    attempts as i64,
                    error,
                    run_id,
                    Utc::now().naive_utc(),
                ],
            )
            .with_context(|| format!("record {} as {}", date, status))?;
        Ok(())
    }

    /// Days in `[start, end]` already crawled to completion.
    pub fn succeeded_days(&self, start: NaiveDate, end: NaiveDate) -> Result<HashSet<NaiveDate>> {
        let mut stmt = self.conn.prepare(
            "SELECT date FROM crawled_days WHERE status = 'succeeded' AND date BETWEEN ? AND ?",
        )?;
        let days = stmt
            .query_map(params![start, end], |r| r.get::<_, NaiveDate>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(days)
    }

    /// Days whose latest outcome is a failure, oldest first.
    pub fn failed_days(&self) -> Result<Vec<FailedDay>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, attempts, COALESCE(error_msg, '') FROM crawled_days
             WHERE status = 'failed' ORDER BY date",
        )?;
        let days = stmt
            .query_map([], |r| {
                Ok(FailedDay { date: r.get(0)?, attempts: r.get(1)?, error: r.get(2)? })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(days)
    }

    /// (succeeded, failed) day counts.
    pub fn day_counts(&self) -> Result<(i64, i64)> {
        let mut s = self.conn.prepare(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'succeeded'),
                COUNT(*) FILTER (WHERE status = 'failed')
             FROM crawled_days",
        )?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Run log ───────────────────────────────────────────────────────────────

    pub fn begin_run(&self, start: NaiveDate, end: NaiveDate) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO crawl_runs (started_at, status, range_start, range_end)
             VALUES (?, 'running', ?, ?) RETURNING id",
            params![Utc::now().naive_utc(), start, end],
            |r| r.get(0),
        )?;
        info!("Crawl run #{} started ({} → {})", id, start, end);
        Ok(id)
    }

    pub fn finish_run(&self, run_id: i64, totals: &RunTotals) -> Result<()> {
        let status = if totals.cancelled {
            "cancelled"
        } else if totals.failed > 0 {
            "error"
        } else {
            "success"
        };
        self.conn.execute(
            r#"UPDATE crawl_runs SET
               finished_at = ?, status = ?,
               succeeded = ?, failed = ?, skipped = ?, rows_written = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                status,
                totals.succeeded as i64,
                totals.failed as i64,
                totals.skipped as i64,
                totals.rows_written as i64,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn run_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM crawl_runs")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2015, 6, day).unwrap()
    }

    #[test]
    fn success_overrides_earlier_failure() {
        let ledger = Ledger::open_in_memory().unwrap();
        let run = ledger.begin_run(d(1), d(3)).unwrap();

        ledger.record_success(run, d(1), 40, 1).unwrap();
        ledger.record_failure(run, d(2), 5, "HTTP 503").unwrap();
        ledger.record_success(run, d(3), 0, 1).unwrap();

        assert_eq!(ledger.failed_days().unwrap(), vec![FailedDay {
            date: d(2),
            attempts: 5,
            error: "HTTP 503".into(),
        }]);

        ledger.record_success(run, d(2), 12, 2).unwrap();
        assert!(ledger.failed_days().unwrap().is_empty());

        let done = ledger.succeeded_days(d(1), d(2)).unwrap();
        assert_eq!(done, HashSet::from([d(1), d(2)]));
        assert_eq!(ledger.day_counts().unwrap(), (3, 0));
    }

    #[test]
    fn run_ids_increase() {
        let ledger = Ledger::open_in_memory().unwrap();
        let a = ledger.begin_run(d(1), d(2)).unwrap();
        let b = ledger.begin_run(d(1), d(2)).unwrap();
        assert!(b > a);
        ledger.finish_run(a, &RunTotals { succeeded: 2, ..RunTotals::default() }).unwrap();
        assert_eq!(ledger.run_count().unwrap(), 2);
    }

    #[test]
    fn file_ledger_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("crawl.duckdb");
        {
            let ledger = Ledger::open(&path).unwrap();
            let run = ledger.begin_run(d(1), d(1)).unwrap();
            ledger.record_success(run, d(1), 7, 1).unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        assert!(ledger.succeeded_days(d(1), d(1)).unwrap().contains(&d(1)));
    }
}
