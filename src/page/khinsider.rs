use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use super::{PageModel, PageRequest};
use crate::error::ParseError;
use crate::model::{AlbumPage, TrackReference};

pub const KHINSIDER_BASE_URL: &str = "https://downloads.khinsider.com";

const ALBUM_PATH: [&str; 2] = ["game-soundtracks", "album"];
const MISSING_MARKER: &str = "Ooops!";

static TITLE: LazyLock<Selector> = LazyLock::new(|| css("h2"));
static COVER_LINKS: LazyLock<Selector> = LazyLock::new(|| css(".albumImage a"));
static INFO_BLOCK: LazyLock<Selector> = LazyLock::new(|| css("p[align=left]"));
static INFO_TYPE: LazyLock<Selector> = LazyLock::new(|| css("b a"));
static INFO_LINKS: LazyLock<Selector> = LazyLock::new(|| css("a"));
static SONG_ROWS: LazyLock<Selector> = LazyLock::new(|| css("#songlist tr"));
static ROW_LINK: LazyLock<Selector> = LazyLock::new(|| css("td a"));
static AUDIO: LazyLock<Selector> = LazyLock::new(|| css("audio[src]"));
static DOWNLOAD_LINK: LazyLock<Selector> = LazyLock::new(|| css("span.songDownloadLink"));

fn css(selector: &'static str) -> Selector {
    Selector::parse(selector).expect("static selector is valid css")
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

/// Page model for downloads.khinsider.com album and track pages.
#[derive(Debug, Clone)]
pub struct KhinsiderPageModel {
    base: Url,
}

impl KhinsiderPageModel {
    /// `base` is the site root; relative links on pages are resolved against it.
    pub fn new(base: &str) -> Result<Self, ParseError> {
        let base = Url::parse(base).map_err(|err| ParseError::InvalidUrl {
            url: base.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { base })
    }

    fn absolute(&self, href: &str) -> Option<String> {
        match self.base.join(href) {
            Ok(url) => Some(url.to_string()),
            Err(err) => {
                tracing::warn!(href, error = %err, "skipping malformed link");
                None
            }
        }
    }

    fn parse_info_block(&self, document: &Html, page: &mut AlbumPage) {
        let Some(info) = document.select(&INFO_BLOCK).next() else {
            tracing::debug!("album info block not found");
            return;
        };

        page.info.album_type = info
            .select(&INFO_TYPE)
            .next()
            .map(element_text)
            .and_then(non_empty);

        let text = element_text(info);
        page.info.year = text
            .split_once("Year:")
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .filter(|year| year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string);

        page.info.publisher = info
            .select(&INFO_LINKS)
            .find(|a| {
                a.value()
                    .attr("href")
                    .is_some_and(|href| href.contains("/publisher/"))
            })
            .map(element_text)
            .and_then(non_empty);
    }
}

impl PageModel for KhinsiderPageModel {
    fn album_key(&self, album_url: &str) -> Result<String, ParseError> {
        match self.classify(album_url)? {
            PageRequest::Album { key } => Ok(key),
            PageRequest::Track { .. } => Err(ParseError::InvalidUrl {
                url: album_url.to_string(),
                reason: "this is a track page, expected an album page".to_string(),
            }),
        }
    }

    fn classify(&self, url: &str) -> Result<PageRequest, ParseError> {
        let invalid = |reason: &str| ParseError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(url).map_err(|err| invalid(&err.to_string()))?;
        if parsed.origin() != self.base.origin() {
            return Err(invalid(&format!("expected a link to {}", self.base)));
        }

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let (slug, track) = match segments.as_slice() {
            [section, kind, slug] if [*section, *kind] == ALBUM_PATH => (*slug, None),
            [section, kind, slug, track] if [*section, *kind] == ALBUM_PATH => {
                (*slug, Some(*track))
            }
            _ => return Err(invalid("not an album or track page")),
        };

        let valid_slug = slug != "."
            && slug != ".."
            && slug
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid_slug {
            return Err(invalid("malformed album slug"));
        }

        let Some(track) = track else {
            return Ok(PageRequest::Album {
                key: slug.to_string(),
            });
        };
        if track == "." || track == ".." {
            return Err(invalid("malformed track name"));
        }

        let album_path = format!("/{}/{}/{}", ALBUM_PATH[0], ALBUM_PATH[1], slug);
        let album_url = self
            .base
            .join(&album_path)
            .map_err(|err| invalid(&err.to_string()))?;
        let track_url = self
            .base
            .join(&format!("{}/{}", album_path, track))
            .map_err(|err| invalid(&err.to_string()))?;
        Ok(PageRequest::Track {
            album_key: slug.to_string(),
            album_url: album_url.to_string(),
            track_url: track_url.to_string(),
        })
    }

    fn parse_album_page(&self, html: &str) -> Result<AlbumPage, ParseError> {
        if html.contains(MISSING_MARKER) {
            return Err(ParseError::NotFound);
        }

        let document = Html::parse_document(html);
        let mut page = AlbumPage {
            title: document
                .select(&TITLE)
                .next()
                .map(element_text)
                .and_then(non_empty),
            ..AlbumPage::default()
        };
        page.info.cover_urls = document
            .select(&COVER_LINKS)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| self.absolute(href))
            .collect();
        self.parse_info_block(&document, &mut page);

        let mut seen = HashSet::new();
        for row in document.select(&SONG_ROWS) {
            // header and footer rows carry no links
            let Some(anchor) = row.select(&ROW_LINK).next() else {
                continue;
            };
            let Some(page_url) = anchor.value().attr("href").and_then(|h| self.absolute(h))
            else {
                continue;
            };
            if !seen.insert(page_url.clone()) {
                continue;
            }
            page.tracks.push(TrackReference {
                position: page.tracks.len() + 1,
                display_name: element_text(anchor),
                page_url,
            });
        }

        if page.tracks.is_empty() {
            return Err(ParseError::MissingElement("#songlist track links"));
        }
        Ok(page)
    }

    fn parse_track_page(&self, html: &str) -> Result<String, ParseError> {
        if html.contains(MISSING_MARKER) {
            return Err(ParseError::NotFound);
        }

        let document = Html::parse_document(html);
        let from_player = document
            .select(&AUDIO)
            .filter_map(|audio| audio.value().attr("src"))
            .find(|src| !src.trim().is_empty());

        let href = from_player.or_else(|| {
            document.select(&DOWNLOAD_LINK).find_map(|span| {
                span.parent()
                    .and_then(ElementRef::wrap)
                    .filter(|parent| parent.value().name() == "a")
                    .and_then(|anchor| anchor.value().attr("href"))
            })
        });

        href.and_then(|href| self.absolute(href.trim()))
            .ok_or(ParseError::MissingElement("audio source or download link"))
    }
}
