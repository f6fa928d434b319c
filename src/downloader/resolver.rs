use std::path::Path;
use std::sync::Arc;
use url::Url;

use crate::error::ResolveError;
use crate::fetcher::Fetcher;
use crate::model::{DownloadTarget, TrackReference};
use crate::page::PageModel;

const MAX_NAME_BYTES: usize = 180;
const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Turns a track page into a download target.
#[derive(Clone)]
pub struct TrackResolver {
    fetcher: Arc<dyn Fetcher>,
    page_model: Arc<dyn PageModel>,
}

impl TrackResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, page_model: Arc<dyn PageModel>) -> Self {
        Self {
            fetcher,
            page_model,
        }
    }

    pub async fn resolve(
        &self,
        track: &TrackReference,
        album_dir: &Path,
        track_count: usize,
    ) -> Result<DownloadTarget, ResolveError> {
        let html = self.fetcher.fetch_html(&track.page_url).await?;
        let direct_url = self.page_model.parse_track_page(&html)?;
        let file_name = track_file_name(track, &direct_url, track_count);

        tracing::debug!(
            position = track.position,
            file_name = file_name.as_str(),
            direct_url = direct_url.as_str(),
            "resolved track"
        );

        Ok(DownloadTarget {
            destination_path: album_dir.join(&file_name),
            file_name,
            direct_url,
        })
    }
}

/// `"NN. <name>.<ext>"`, numbered by listing position so names sort in album
/// order and never collide within an album.
pub fn track_file_name(track: &TrackReference, direct_url: &str, track_count: usize) -> String {
    let base = sanitize_file_name(&track.display_name)
        .or_else(|| url_file_name(direct_url))
        .or_else(|| url_file_name(&track.page_url))
        .unwrap_or_else(|| "track".to_string());

    let width = track_count.max(track.position).to_string().len().max(2);
    let mut name = format!("{:0width$}. {}", track.position, base, width = width);

    if let Some(ext) = url_extension(direct_url) {
        let suffix = format!(".{}", ext.to_lowercase());
        if !name.to_lowercase().ends_with(&suffix) {
            name.push_str(&suffix);
        }
    }
    name
}

/// Replaces path separators, reserved and control characters, and trims
/// names the filesystem would treat specially. `None` if nothing usable is left.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_whitespace() {
                ' '
            } else if RESERVED.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_start_matches('.')
        .trim_end_matches(['.', ' '])
        .trim();

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return None;
    }

    let mut end = trimmed.len().min(MAX_NAME_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    Some(trimmed[..end].trim_end().to_string())
}

/// The site percent-encodes file names twice, so decode twice.
pub fn full_unquote(text: &str) -> String {
    let mut decoded = text.to_string();
    for _ in 0..2 {
        match urlencoding::decode(&decoded) {
            Ok(next) => decoded = next.into_owned(),
            Err(_) => break,
        }
    }
    decoded
}

fn last_segment(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(full_unquote(segment))
}

fn url_file_name(url: &str) -> Option<String> {
    last_segment(url).and_then(|name| sanitize_file_name(&name))
}

fn url_extension(url: &str) -> Option<String> {
    let name = last_segment(url)?;
    let (stem, ext) = name.rsplit_once('.')?;
    let valid = !stem.is_empty()
        && (1..=5).contains(&ext.len())
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, FetchErrorKind, ParseError};
    use crate::test_support::{LinePageModel, ScriptedFetcher};
    use std::path::PathBuf;

    fn track(position: usize, name: &str) -> TrackReference {
        TrackReference {
            position,
            display_name: name.to_string(),
            page_url: format!("http://site/album/x/{:02}.%2520Track.mp3", position),
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Intro").as_deref(), Some("Intro"));
        assert_eq!(
            sanitize_file_name("AC/DC: Back?").as_deref(),
            Some("AC_DC_ Back_")
        );
        assert_eq!(
            sanitize_file_name("  spaced \t  out.. ").as_deref(),
            Some("spaced out")
        );
        assert_eq!(sanitize_file_name("..hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_file_name(""), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("///"), None);
        assert_eq!(sanitize_file_name("a\u{0}b").as_deref(), Some("a_b"));
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let name = sanitize_file_name(&long).unwrap();
        assert!(name.len() <= MAX_NAME_BYTES);
        assert!(name.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_full_unquote_decodes_twice() {
        assert_eq!(full_unquote("01.%2520Open%2520Your%2520Heart.mp3"), "01. Open Your Heart.mp3");
        assert_eq!(full_unquote("plain.mp3"), "plain.mp3");
    }

    #[test]
    fn test_track_file_name_numbers_and_extension() {
        assert_eq!(
            track_file_name(&track(1, "Intro"), "http://cdn/a/01%20Intro.mp3", 12),
            "01. Intro.mp3"
        );
        assert_eq!(
            track_file_name(&track(7, "Theme"), "http://cdn/a/07.flac", 120),
            "007. Theme.flac"
        );
        // extension already present in the display name
        assert_eq!(
            track_file_name(&track(2, "Theme.MP3"), "http://cdn/a/x.mp3", 2),
            "02. Theme.MP3"
        );
        // no extension on the direct url
        assert_eq!(
            track_file_name(&track(3, "Outro"), "http://cdn/stream", 3),
            "03. Outro"
        );
    }

    #[test]
    fn test_track_file_name_falls_back_to_url() {
        assert_eq!(
            track_file_name(&track(4, " / "), "http://cdn/a/04.%2520Boss%2520Battle.mp3", 10),
            "04. 04. Boss Battle.mp3"
        );
        assert_eq!(
            track_file_name(&track(5, ""), "http://cdn/", 10),
            "05. 05. Track.mp3"
        );
    }

    #[tokio::test]
    async fn test_resolve_builds_target() {
        let t = track(1, "Intro");
        let fetcher = ScriptedFetcher::new().respond(&t.page_url, "http://cdn/x/01%20Intro.mp3");
        let resolver = TrackResolver::new(Arc::new(fetcher), Arc::new(LinePageModel));

        let target = resolver
            .resolve(&t, Path::new("/music/album"), 2)
            .await
            .unwrap();

        assert_eq!(target.file_name, "01. Intro.mp3");
        assert_eq!(target.direct_url, "http://cdn/x/01%20Intro.mp3");
        assert_eq!(
            target.destination_path,
            PathBuf::from("/music/album/01. Intro.mp3")
        );
    }

    #[tokio::test]
    async fn test_resolve_wraps_fetch_and_parse_errors() {
        let fetch_failed = track(1, "Intro");
        let no_link = track(2, "Theme");
        let fetcher = ScriptedFetcher::new()
            .fail(
                &fetch_failed.page_url,
                FetchError::permanent(&fetch_failed.page_url, Some(404), "Not Found"),
            )
            .respond(&no_link.page_url, "   ");
        let resolver = TrackResolver::new(Arc::new(fetcher), Arc::new(LinePageModel));

        match resolver.resolve(&fetch_failed, Path::new("out"), 2).await {
            Err(ResolveError::Fetch(err)) => assert_eq!(err.kind, FetchErrorKind::Permanent),
            other => panic!("expected fetch error, got {:?}", other),
        }
        match resolver.resolve(&no_link, Path::new("out"), 2).await {
            Err(ResolveError::Parse(ParseError::MissingElement(_))) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
