//! Reads existing bucket files back: discovery, row counts, and which days they cover.

use crate::models::MonthKey;
use crate::storage::TIMESTAMP_FORMAT;
use crate::scraper::cleaner::TITLE_HEADER;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Timestamp column names: current schema first, then the six-column legacy export.
const TIMESTAMP_COLUMNS: [&str; 2] = ["timestamp", "date_time"];

#[derive(Debug, Clone)]
pub struct BucketScan {
    pub key: MonthKey,
    pub path: PathBuf,
    pub rows: usize,
    pub days: BTreeSet<NaiveDate>,
    /// Stray header rows and rows whose timestamp did not parse.
    pub skipped: usize,
}

/// All `playlist_{year}-{month}.csv` files in `dir`, ordered by month.
pub fn discover_buckets(dir: &Path) -> Result<Vec<(MonthKey, PathBuf)>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut buckets = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read_dir {:?}", dir))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(MonthKey::from_file_name);
        if let Some(key) = key {
            buckets.push((key, path));
        }
    }
    buckets.sort_by_key(|(key, _)| *key);
    Ok(buckets)
}

/// Count rows and collect the distinct days present in one bucket.
pub fn scan_bucket(key: MonthKey, path: &Path) -> Result<BucketScan> {
    debug!("Scanning {} from {:?}", key, path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open bucket {:?}", path))?;

    let headers = reader.headers()?.clone();
    let title_idx = headers.iter().position(|h| h == TITLE_HEADER).unwrap_or(0);
    let ts_idx = headers
        .iter()
        .position(|h| TIMESTAMP_COLUMNS.contains(&h));

    let mut scan = BucketScan {
        key,
        path: path.to_path_buf(),
        rows: 0,
        days: BTreeSet::new(),
        skipped: 0,
    };

    let Some(ts_idx) = ts_idx else {
        warn!("{:?}: no timestamp column, coverage unknown", path);
        return Ok(scan);
    };

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                scan.skipped += 1;
                continue;
            }
        };

        if record.get(title_idx) == Some(TITLE_HEADER) {
            scan.skipped += 1;
            continue;
        }

        match record.get(ts_idx).and_then(parse_timestamp) {
            Some(ts) => {
                scan.rows += 1;
                scan.days.insert(ts.date());
            }
            None => scan.skipped += 1,
        }
    }

    Ok(scan)
}

/// Days in `[start, end]` that already have rows in some bucket.
pub fn covered_days(dir: &Path, start: NaiveDate, end: NaiveDate) -> Result<HashSet<NaiveDate>> {
    let (first, last) = (MonthKey::from_date(start), MonthKey::from_date(end));
    let mut days = HashSet::new();

    for (key, path) in discover_buckets(dir)? {
        if key < first || key > last {
            continue;
        }
        let scan = scan_bucket(key, &path)?;
        days.extend(scan.days.into_iter().filter(|d| (start..=end).contains(d)));
    }
    Ok(days)
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CURRENT: &str = "title,artists,album,album_art_url,timestamp,song_id\n\
        Heroes,David Bowie,,,2017-01-10 23:04:00,12\n\
        title,artists,album,album_art_url,timestamp,song_id\n\
        Ashes to Ashes,David Bowie,Scary Monsters,,2017-01-11 08:30:00,13\n";

    const LEGACY: &str = "title,artist,album,album_art_url,song_id,date_time\n\
        Paranoid Android,Radiohead,OK Computer,,555,2006-02-01 22:10:00\n\
        Broken,Radiohead,,,556,not a time\n";

    #[test]
    fn test_discover_buckets_orders_by_month() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["playlist_2017-10.csv", "playlist_2017-2.csv", "top_89_songs_2017_02.csv", "notes.txt"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        let keys: Vec<MonthKey> = discover_buckets(tmp.path()).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![MonthKey { year: 2017, month: 2 }, MonthKey { year: 2017, month: 10 }]);
        assert!(discover_buckets(&tmp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_scan_skips_repeated_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("playlist_2017-1.csv");
        fs::write(&path, CURRENT).unwrap();

        let scan = scan_bucket(MonthKey { year: 2017, month: 1 }, &path).unwrap();
        assert_eq!(scan.rows, 2);
        assert_eq!(scan.skipped, 1);
        assert_eq!(scan.days.len(), 2);
    }

    #[test]
    fn test_scan_reads_legacy_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("playlist_2006-2.csv");
        fs::write(&path, LEGACY).unwrap();

        let scan = scan_bucket(MonthKey { year: 2006, month: 2 }, &path).unwrap();
        assert_eq!(scan.rows, 1);
        assert_eq!(scan.skipped, 1);
        assert!(scan.days.contains(&NaiveDate::from_ymd_opt(2006, 2, 1).unwrap()));
    }

    #[test]
    fn test_covered_days_respects_range() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("playlist_2017-1.csv"), CURRENT).unwrap();

        let d = |day| NaiveDate::from_ymd_opt(2017, 1, day).unwrap();
        let covered = covered_days(tmp.path(), d(11), d(31)).unwrap();
        assert_eq!(covered, HashSet::from([d(11)]));
    }
}
