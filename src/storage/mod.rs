//! Monthly bucket files: `playlist_{year}-{month}.csv`, append-only.
//!
//! A bucket, once it exists, starts with the header row. Every append is one
//! day's batch serialized in memory and written with a single call; a failed
//! write is rolled back to the previous length so the file never ends in a
//! partial row. The sink does not look for duplicates; callers skip days that
//! are already covered.
//!
//! Rows follow the header of the file they land in, so buckets left behind by
//! the older six-column export (`…,song_id,date_time`) keep their layout.

pub mod ledger;

use crate::models::{MonthKey, PlayEvent};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

// ── Schema ────────────────────────────────────────────────────────────────────

pub const HEADER: [&str; 6] = ["title", "artists", "album", "album_art_url", "timestamp", "song_id"];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("could not create output directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("append to {path:?} failed: {source}")]
    Append { path: PathBuf, source: io::Error },

    #[error("could not encode rows for {path:?}: {source}")]
    Encode { path: PathBuf, source: csv::Error },

    #[error("could not read the header of {path:?}: {source}")]
    ReadHeader { path: PathBuf, source: csv::Error },

    #[error("{path:?} has an unrecognised header {header:?}")]
    SchemaMismatch { path: PathBuf, header: String },

    #[error("play at {observed} does not belong in bucket {key}")]
    WrongBucket { key: MonthKey, observed: NaiveDateTime },
}

// ── Columns ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Title,
    Artists,
    Album,
    AlbumArtUrl,
    Timestamp,
    SongId,
}

const CURRENT_COLUMNS: [Column; 6] = [
    Column::Title,
    Column::Artists,
    Column::Album,
    Column::AlbumArtUrl,
    Column::Timestamp,
    Column::SongId,
];

impl Column {
    fn from_header(name: &str) -> Option<Self> {
        match name.trim() {
            "title" => Some(Column::Title),
            "artists" | "artist" => Some(Column::Artists),
            "album" => Some(Column::Album),
            "album_art_url" => Some(Column::AlbumArtUrl),
            "timestamp" | "date_time" => Some(Column::Timestamp),
            "song_id" => Some(Column::SongId),
            _ => None,
        }
    }
}

/// Column order of an existing bucket; every known column exactly once.
fn existing_columns(path: &Path) -> Result<Vec<Column>, PersistenceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| PersistenceError::ReadHeader { path: path.to_path_buf(), source })?;
    let header = reader
        .headers()
        .map_err(|source| PersistenceError::ReadHeader { path: path.to_path_buf(), source })?
        .clone();

    let columns: Option<Vec<Column>> = header.iter().map(Column::from_header).collect();
    match columns {
        Some(cols) if cols.len() == CURRENT_COLUMNS.len()
            && CURRENT_COLUMNS.iter().all(|c| cols.contains(c)) =>
        {
            Ok(cols)
        }
        _ => Err(PersistenceError::SchemaMismatch {
            path: path.to_path_buf(),
            header: header.iter().collect::<Vec<_>>().join(","),
        }),
    }
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Writes day batches into monthly buckets. Appends take `&mut self`, so one
/// owner serializes every write to every bucket.
pub struct BucketSink {
    dir: PathBuf,
    rows_written: BTreeMap<MonthKey, usize>,
}

impl BucketSink {
    pub fn open(dir: &Path) -> Result<Self, PersistenceError> {
        fs::create_dir_all(dir).map_err(|source| PersistenceError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self { dir: dir.to_path_buf(), rows_written: BTreeMap::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bucket_path(&self, key: MonthKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Append `records` to the bucket for `key`, creating it with a header on first write.
    /// An empty batch touches nothing.
    pub fn append(&mut self, key: MonthKey, records: Vec<PlayEvent>) -> Result<usize, PersistenceError> {
        if let Some(stray) = records.iter().find(|r| r.month_key() != key) {
            return Err(PersistenceError::WrongBucket { key, observed: stray.observed_at });
        }
        if records.is_empty() {
            return Ok(0);
        }

        let path = self.bucket_path(key);
        let append_err = |source: io::Error| PersistenceError::Append { path: path.clone(), source };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(append_err)?;
        let prev_len = file.metadata().map_err(append_err)?.len();

        let columns = if prev_len == 0 {
            CURRENT_COLUMNS.to_vec()
        } else {
            existing_columns(&path)?
        };

        let buf = encode_rows(prev_len == 0, &columns, &records)
            .map_err(|source| PersistenceError::Encode { path: path.clone(), source })?;

        if let Err(e) = file.write_all(&buf).and_then(|_| file.sync_data()) {
            // Drop whatever part of the batch made it to disk.
            if let Err(rollback) = file.set_len(prev_len) {
                error!("{:?}: rollback to {} bytes failed, a partial row may remain: {}", path, prev_len, rollback);
            }
            return Err(append_err(e));
        }

        if prev_len == 0 {
            info!("Created bucket {:?}", path);
        }
        debug!("{}: +{} rows", key, records.len());
        *self.rows_written.entry(key).or_default() += records.len();
        Ok(records.len())
    }

    /// Rows appended by this sink, per bucket.
    pub fn rows_written(&self) -> &BTreeMap<MonthKey, usize> {
        &self.rows_written
    }
}

/// Header (when the file is new) plus one line per record in `columns` order, `\n`-terminated.
fn encode_rows(with_header: bool, columns: &[Column], records: &[PlayEvent]) -> Result<Vec<u8>, csv::Error> {
    let mut w = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    if with_header {
        w.write_record(HEADER)?;
    }
    for r in records {
        let timestamp = r.observed_at.format(TIMESTAMP_FORMAT).to_string();
        let artists = r.artists_joined();
        w.write_record(columns.iter().map(|c| match c {
            Column::Title => r.title.as_str(),
            Column::Artists => artists.as_str(),
            Column::Album => r.album.as_deref().unwrap_or(""),
            Column::AlbumArtUrl => r.album_art_url.as_deref().unwrap_or(""),
            Column::Timestamp => timestamp.as_str(),
            Column::SongId => r.catalogue_id.as_deref().unwrap_or(""),
        }))?;
    }

    w.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}
