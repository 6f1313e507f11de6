use crate::models::{PlayEvent, RawSongCard};
use chrono::{NaiveDate, NaiveTime, Timelike};
use url::Url;

/// The header value of the title column. A data row must never carry it.
pub const TITLE_HEADER: &str = "title";

// ── Text ──────────────────────────────────────────────────────────────────────

/// Collapse runs of whitespace and trim; empty becomes `None`.
pub fn clean_text(s: &str) -> Option<String> {
    let cleaned = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

// ── Catalogue id ──────────────────────────────────────────────────────────────

/// Song id from a card link.
/// "#song12345" → 12345 | "/songs/12345-some-title" → 12345-some-title | "/x/y/678" → 678
pub fn catalogue_id_from_href(href: &str) -> Option<String> {
    let href = href.trim();
    if let Some(id) = href.strip_prefix("#song") {
        return clean_text(id);
    }

    let base = Url::parse("https://playlist.invalid/").ok()?;
    let url = base.join(href).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();

    let after_songs = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("songs") || s.eq_ignore_ascii_case("song"))
        .and_then(|i| segments.get(i + 1));

    after_songs.or(segments.last()).map(|s| s.to_string())
}

// ── Times ─────────────────────────────────────────────────────────────────────

/// True when the on-page time carries an AM/PM marker.
pub fn has_meridiem(s: &str) -> bool {
    let s = s.trim().to_ascii_lowercase().replace('.', "");
    s.ends_with("am") || s.ends_with("pm")
}

/// "11:58 pm" / "9:04AM" / "11:58 p.m." → time of day.
pub fn parse_modern_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim().to_ascii_uppercase().replace('.', "");
    for fmt in ["%I:%M %p", "%I:%M%p"] {
        if let Ok(t) = NaiveTime::parse_from_str(&s, fmt) {
            return Some(t);
        }
    }
    None
}

/// "23:05" / "9:04" with no marker. The hour is still ambiguous.
pub fn parse_legacy_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Replace the hour of a legacy reading with the resolved one.
pub fn with_hour(t: NaiveTime, hour: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour, t.minute(), 0)
}

// ── Card → PlayEvent ──────────────────────────────────────────────────────────

/// Build a play event from a card whose time has already been resolved.
/// `Err` carries the reason the card was dropped.
pub fn card_to_event(
    date: NaiveDate,
    card: RawSongCard,
    time: NaiveTime,
) -> Result<PlayEvent, String> {
    let title = card
        .title
        .as_deref()
        .and_then(clean_text)
        .ok_or_else(|| "missing title".to_string())?;

    if title == TITLE_HEADER {
        return Err(format!("title equals the header value {:?}", TITLE_HEADER));
    }

    Ok(PlayEvent {
        title,
        artists: card.artists.iter().filter_map(|a| clean_text(a)).collect(),
        album: card.album.as_deref().and_then(clean_text),
        album_art_url: card.album_art_url.as_deref().and_then(clean_text),
        catalogue_id: card.href.as_deref().and_then(catalogue_id_from_href),
        observed_at: date.and_time(time),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
