// RipStream Core - Music Streaming Download Engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Streaming URL parsing
//!
//! Malformed input never panics or returns `Err`: every failure mode
//! produces an invalid [`ParsedUrl`] whose metadata carries an `error`
//! entry explaining why.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use super::patterns::{
    patterns_for_service, CaptureLayout, ServicePatterns, CONTENT_PRIORITY, SERVICE_PATTERNS,
};
use crate::models::{ContentType, StreamingSource};

/// Result of parsing a streaming URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUrl {
    pub service: StreamingSource,
    pub content_type: ContentType,
    /// Empty when unresolved
    pub content_id: String,
    /// Normalized URL (trimmed, scheme added)
    pub url: String,
    /// Query parameters and extracted side data, or `error` on failure
    pub metadata: HashMap<String, String>,
}

impl ParsedUrl {
    fn invalid(url: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), reason.into());
        Self {
            service: StreamingSource::Unknown,
            content_type: ContentType::Unknown,
            content_id: String::new(),
            url: url.into(),
            metadata,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.service != StreamingSource::Unknown
            && self.content_type != ContentType::Unknown
            && !self.content_id.is_empty()
    }

    /// Failure reason for invalid results
    pub fn error(&self) -> Option<&str> {
        self.metadata.get("error").map(String::as_str)
    }
}

/// Pattern-table driven URL parser
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlParser;

impl UrlParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, input: &str) -> ParsedUrl {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return ParsedUrl::invalid(trimmed, "Empty URL");
        }

        let normalized = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };

        let parsed = match Url::parse(&normalized) {
            Ok(parsed) => parsed,
            Err(e) => return ParsedUrl::invalid(normalized, format!("Invalid URL format: {}", e)),
        };

        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        let Some(patterns) = detect_service(&host) else {
            return ParsedUrl::invalid(normalized, "Unknown streaming service");
        };

        let (content_type, content_id, metadata) = match_content(patterns, &parsed);

        ParsedUrl {
            service: patterns.source,
            content_type,
            content_id,
            url: normalized,
            metadata,
        }
    }

    /// Services this parser recognizes, in detection order
    pub fn supported_services(&self) -> Vec<StreamingSource> {
        SERVICE_PATTERNS.iter().map(|p| p.source).collect()
    }

    /// Whether the URL's domain belongs to a recognized service
    pub fn is_supported_service(&self, url: &str) -> bool {
        self.parse(url).service != StreamingSource::Unknown
    }

    /// Path pattern sources for one service, keyed by content type
    pub fn service_info(&self, service: StreamingSource) -> HashMap<String, Vec<String>> {
        let mut info = HashMap::new();
        if let Some(patterns) = patterns_for_service(service) {
            info.insert(
                "domains".to_string(),
                patterns.domains.iter().map(|re| re.as_str().to_string()).collect(),
            );
            for (content_type, paths) in &patterns.paths {
                info.insert(
                    content_type.as_str().to_string(),
                    paths.iter().map(|p| p.regex.as_str().to_string()).collect(),
                );
            }
        }
        info
    }
}

fn detect_service(host: &str) -> Option<&'static ServicePatterns> {
    if host.is_empty() {
        return None;
    }
    SERVICE_PATTERNS.iter().find(|p| p.matches_host(host))
}

fn match_content(
    patterns: &ServicePatterns,
    parsed: &Url,
) -> (ContentType, String, HashMap<String, String>) {
    let target = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };

    let mut query_params: Vec<(String, String)> = Vec::new();
    for (key, value) in parsed.query_pairs() {
        // First occurrence of a repeated key is kept
        if !query_params.iter().any(|(k, _)| *k == key) {
            query_params.push((key.into_owned(), value.into_owned()));
        }
    }

    for content_type in CONTENT_PRIORITY {
        for pattern in patterns.patterns_for(content_type) {
            if let Some(key) = pattern.unless_query_key {
                if query_params.iter().any(|(k, _)| k == key) {
                    continue;
                }
            }

            let Some(captures) = pattern.regex.captures(&target) else {
                continue;
            };

            let mut metadata = HashMap::new();
            let group = |i: usize| captures.get(i).map(|m| m.as_str().to_string());

            let content_id = match (pattern.layout, group(2)) {
                (CaptureLayout::AlbumThenId, Some(id)) => {
                    if let Some(album_id) = group(1) {
                        metadata.insert("album_id".to_string(), album_id);
                    }
                    id
                }
                (CaptureLayout::ArtistThenId, Some(id)) => {
                    if let Some(artist) = group(1) {
                        metadata.insert("artist".to_string(), artist);
                    }
                    id
                }
                _ => group(1).unwrap_or_default(),
            };

            for (key, value) in &query_params {
                metadata.insert(key.clone(), value.clone());
            }

            return (content_type, content_id, metadata);
        }
    }

    (ContentType::Unknown, String::new(), HashMap::new())
}

/// Parse a streaming URL with the built-in pattern tables
pub fn parse_url(url: &str) -> ParsedUrl {
    UrlParser::new().parse(url)
}

pub fn detect_service_from_url(url: &str) -> StreamingSource {
    parse_url(url).service
}

pub fn content_type_from_url(url: &str) -> ContentType {
    parse_url(url).content_type
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qobuz_album_with_slug() {
        let parsed = parse_url("qobuz.com/album/example-album/123456");
        assert_eq!(parsed.service, StreamingSource::Qobuz);
        assert_eq!(parsed.content_type, ContentType::Album);
        assert_eq!(parsed.content_id, "123456");
        assert!(parsed.is_valid());
        assert_eq!(parsed.url, "https://qobuz.com/album/example-album/123456");
    }

    #[test]
    fn test_qobuz_variants() {
        let track = parse_url("https://open.qobuz.com/track/98765");
        assert_eq!(track.content_type, ContentType::Track);
        assert_eq!(track.content_id, "98765");

        let artist = parse_url("https://www.qobuz.com/us-en/interpreter/miles-davis/36819");
        assert_eq!(artist.content_type, ContentType::Artist);
        assert_eq!(artist.content_id, "36819");

        let playlist = parse_url("https://open.qobuz.com/playlist/4455");
        assert_eq!(playlist.content_type, ContentType::Playlist);
        assert_eq!(playlist.content_id, "4455");
    }

    #[test]
    fn test_missing_scheme_matches_https() {
        for url in [
            "open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
            "www.deezer.com/en/album/302127",
            "tidal.com/browse/track/77646168",
            "example.com/whatever",
            "qobuz.com/genre/jazz",
        ] {
            assert_eq!(parse_url(url), parse_url(&format!("https://{}", url)), "{}", url);
        }
    }

    #[test]
    fn test_empty_is_invalid_with_error() {
        let parsed = parse_url("");
        assert!(!parsed.is_valid());
        assert_eq!(parsed.error(), Some("Empty URL"));

        let blank = parse_url("   ");
        assert_eq!(blank.error(), Some("Empty URL"));
    }

    #[test]
    fn test_unknown_service() {
        let parsed = parse_url("https://example.com/album/1");
        assert_eq!(parsed.service, StreamingSource::Unknown);
        assert_eq!(parsed.error(), Some("Unknown streaming service"));
    }

    #[test]
    fn test_malformed_syntax_is_converted() {
        let parsed = parse_url("https://exa mple.com/album/1");
        assert!(!parsed.is_valid());
        assert!(parsed.error().unwrap().starts_with("Invalid URL format"));
    }

    #[test]
    fn test_known_service_unmatched_path() {
        let parsed = parse_url("https://www.qobuz.com/us-en/genre/rock");
        assert_eq!(parsed.service, StreamingSource::Qobuz);
        assert_eq!(parsed.content_type, ContentType::Unknown);
        assert_eq!(parsed.content_id, "");
        assert!(!parsed.is_valid());
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn test_query_params_copied() {
        let parsed = parse_url("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3?si=abc&si=def&ref=x");
        assert_eq!(parsed.content_type, ContentType::Album);
        assert_eq!(parsed.metadata.get("si").map(String::as_str), Some("abc"));
        assert_eq!(parsed.metadata.get("ref").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_apple_music_track_and_album() {
        let track = parse_url("https://music.apple.com/us/album/kind-of-blue/268443092?i=268443097");
        assert_eq!(track.service, StreamingSource::AppleMusic);
        assert_eq!(track.content_type, ContentType::Track);
        assert_eq!(track.content_id, "268443097");
        assert_eq!(track.metadata.get("album_id").map(String::as_str), Some("268443092"));

        let album = parse_url("https://music.apple.com/us/album/kind-of-blue/268443092");
        assert_eq!(album.content_type, ContentType::Album);
        assert_eq!(album.content_id, "268443092");

        let playlist = parse_url("https://music.apple.com/us/playlist/chill/pl.u-abc123");
        assert_eq!(playlist.content_type, ContentType::Playlist);
        assert_eq!(playlist.content_id, "pl.u-abc123");
    }

    #[test]
    fn test_soundcloud_artist_segment() {
        let track = parse_url("https://soundcloud.com/some-artist/some-track");
        assert_eq!(track.content_type, ContentType::Track);
        assert_eq!(track.content_id, "some-track");
        assert_eq!(track.metadata.get("artist").map(String::as_str), Some("some-artist"));

        let set = parse_url("https://soundcloud.com/some-artist/sets/live-2020");
        assert_eq!(set.content_type, ContentType::Album);
        assert_eq!(set.content_id, "live-2020");

        let artist = parse_url("https://soundcloud.com/some-artist");
        assert_eq!(artist.content_type, ContentType::Artist);
        assert_eq!(artist.content_id, "some-artist");
    }

    #[test]
    fn test_youtube_music() {
        let watch = parse_url("https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RD");
        assert_eq!(watch.service, StreamingSource::YoutubeMusic);
        assert_eq!(watch.content_type, ContentType::Track);
        assert_eq!(watch.content_id, "dQw4w9WgXcQ");

        let short = parse_url("youtu.be/dQw4w9WgXcQ");
        assert_eq!(short.content_type, ContentType::Track);
        assert_eq!(short.content_id, "dQw4w9WgXcQ");

        let list = parse_url("https://music.youtube.com/playlist?list=OLAK5uy_abc");
        assert_eq!(list.content_type, ContentType::Album);
        assert_eq!(list.content_id, "OLAK5uy_abc");
    }

    #[test]
    fn test_service_helpers() {
        let parser = UrlParser::new();
        assert!(parser.is_supported_service("https://www.deezer.com/track/3135556"));
        assert!(!parser.is_supported_service("https://example.com"));
        assert_eq!(parser.supported_services().len(), 7);
        assert!(parser.service_info(StreamingSource::Deezer).contains_key("track"));
        assert!(parser.service_info(StreamingSource::Youtube).is_empty());
        assert_eq!(detect_service_from_url("tidal.com/album/1"), StreamingSource::Tidal);
        assert_eq!(content_type_from_url("deezer.com/playlist/908622995"), ContentType::Playlist);
    }
}
