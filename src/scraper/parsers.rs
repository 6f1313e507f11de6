use crate::models::RawSongCard;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

// ── Card layouts ──────────────────────────────────────────────────────────────

/// CSS selectors describing one generation of the playlist page.
#[derive(Debug, Clone, Copy)]
pub struct CardLayout {
    pub name: &'static str,
    pub card: &'static str,
    pub title: &'static str,
    pub artist: &'static str,
    /// Dedicated album element; when absent the album comes from the art's `alt`.
    pub album: Option<&'static str>,
    pub art: &'static str,
    pub link: &'static str,
    pub time: &'static str,
}

/// Pre-redesign pages: `<div class="row song">` with `h5` fields and `#songNNN` anchors.
pub const LEGACY_LAYOUT: CardLayout = CardLayout {
    name: "legacy",
    card: ".row.song",
    title: "h5.title",
    artist: "h5.artist",
    album: None,
    art: "img.album-art",
    link: "a[href]",
    time: "time",
};

/// Current pages: `playlist-card` articles linking to `/songs/<id>`.
pub const MODERN_LAYOUT: CardLayout = CardLayout {
    name: "modern",
    card: ".playlist-card",
    title: ".playlist-title",
    artist: ".playlist-artist",
    album: Some(".playlist-album"),
    art: "img",
    link: "a[href*=\"/songs/\"], a[href*=\"/song/\"], a[href]",
    time: "time",
};

pub const LAYOUTS: [CardLayout; 2] = [LEGACY_LAYOUT, MODERN_LAYOUT];

struct Compiled {
    card: Selector,
    title: Selector,
    artist: Selector,
    album: Option<Selector>,
    art: Selector,
    link: Selector,
    time: Selector,
}

impl CardLayout {
    fn compile(&self) -> Option<Compiled> {
        let album = match self.album {
            Some(s) => Some(Selector::parse(s).ok()?),
            None => None,
        };
        Some(Compiled {
            card: Selector::parse(self.card).ok()?,
            title: Selector::parse(self.title).ok()?,
            artist: Selector::parse(self.artist).ok()?,
            album,
            art: Selector::parse(self.art).ok()?,
            link: Selector::parse(self.link).ok()?,
            time: Selector::parse(self.time).ok()?,
        })
    }
}

// ── Page → raw cards ──────────────────────────────────────────────────────────

/// All song cards on a playlist page, in page order (newest first).
/// Uses the first layout that matches any card; a page matching none yields nothing.
pub fn parse_song_cards(html: &str) -> Vec<RawSongCard> {
    let doc = Html::parse_document(html);

    for layout in &LAYOUTS {
        let Some(sel) = layout.compile() else { continue };
        let cards: Vec<ElementRef> = doc.select(&sel.card).collect();
        if cards.is_empty() {
            continue;
        }

        debug!("{} cards matched the {} layout", cards.len(), layout.name);
        return cards.into_iter().map(|card| parse_card(card, &sel)).collect();
    }

    Vec::new()
}

fn parse_card(card: ElementRef, sel: &Compiled) -> RawSongCard {
    let art = card.select(&sel.art).next();

    let album = match &sel.album {
        Some(album_sel) => card.select(album_sel).next().map(text_of),
        None => None,
    }
    .or_else(|| art.and_then(|img| img.value().attr("alt")).map(str::to_string));

    let album_art_url = art.and_then(|img| {
        img.value()
            .attr("data-src")
            .or_else(|| img.value().attr("src"))
            .map(str::to_string)
    });

    RawSongCard {
        title: card.select(&sel.title).next().map(text_of),
        artists: card.select(&sel.artist).map(text_of).collect(),
        album,
        album_art_url,
        href: card
            .select(&sel.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string),
        time: card.select(&sel.time).next().map(text_of),
    }
}

fn text_of(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}
