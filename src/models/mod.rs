use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// First day the station published a playlist page.
pub const FIRST_AVAILABLE_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2005, 12, 22) {
    Some(d) => d,
    None => panic!("invalid first available date"),
};

// ── Play event ────────────────────────────────────────────────────────────────

/// One song-play observation lifted off a playlist page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayEvent {
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub album_art_url: Option<String>,
    pub catalogue_id: Option<String>,  // station's song id, e.g. "12345"
    pub observed_at: NaiveDateTime,    // station local time
}

impl PlayEvent {
    /// Artists flattened for a single CSV column.
    pub fn artists_joined(&self) -> String {
        self.artists.join(", ")
    }

    pub fn month_key(&self) -> MonthKey {
        MonthKey::from_date(self.observed_at.date())
    }
}

// ── Monthly bucket key ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    /// `playlist_2020-4.csv`; month is deliberately not zero-padded.
    pub fn file_name(&self) -> String {
        format!("playlist_{}-{}.csv", self.year, self.month)
    }

    /// Inverse of [`MonthKey::file_name`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_prefix("playlist_")?.strip_suffix(".csv")?;
        let (year, month) = stem.split_once('-')?;
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self { year, month })
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

// ── Crawl unit ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Pending,
    Fetching,
    Retrying,
    Succeeded,
    Failed,
}

impl CrawlStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CrawlStatus::Succeeded | CrawlStatus::Failed)
    }
}

/// One day's fetch + extract task. Lives inside the task processing that day.
#[derive(Debug, Clone)]
pub struct CrawlUnit {
    pub date: NaiveDate,
    pub status: CrawlStatus,
    pub attempt_count: u32,
}

impl CrawlUnit {
    pub fn new(date: NaiveDate) -> Self {
        Self { date, status: CrawlStatus::Pending, attempt_count: 0 }
    }

    /// Move to `next`. Terminal units stay put.
    pub fn transition(&mut self, next: CrawlStatus) {
        if self.status.is_terminal() {
            return;
        }
        tracing::trace!("{}: {:?} -> {:?}", self.date, self.status, next);
        self.status = next;
    }
}

// ── Raw card rows ─────────────────────────────────────────────────────────────

/// Strings lifted off one song card before any cleaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSongCard {
    pub title: Option<String>,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub album_art_url: Option<String>,
    pub href: Option<String>,
    pub time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_key_file_name_round_trips() {
        let key = MonthKey::from_date(NaiveDate::from_ymd_opt(2020, 4, 17).unwrap());
        assert_eq!(key.file_name(), "playlist_2020-4.csv");
        assert_eq!(MonthKey::from_file_name("playlist_2020-4.csv"), Some(key));
        assert_eq!(MonthKey::from_file_name("playlist_2020-13.csv"), None);
        assert_eq!(MonthKey::from_file_name("top_10_per_month.csv"), None);
    }

    #[test]
    fn terminal_units_do_not_move() {
        let mut unit = CrawlUnit::new(FIRST_AVAILABLE_DATE);
        unit.transition(CrawlStatus::Fetching);
        unit.transition(CrawlStatus::Failed);
        unit.transition(CrawlStatus::Retrying);
        assert_eq!(unit.status, CrawlStatus::Failed);
    }
}
