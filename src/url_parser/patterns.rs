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


//! Per-service domain and path pattern tables
//!
//! Path patterns are matched against the request target (path plus
//! `?query` when present). Content types are tried in
//! [`CONTENT_PRIORITY`] order and the first matching pattern wins.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{ContentType, StreamingSource};

/// Order in which content-type patterns are evaluated
pub const CONTENT_PRIORITY: [ContentType; 4] = [
    ContentType::Artist,
    ContentType::Album,
    ContentType::Track,
    ContentType::Playlist,
];

/// How captured groups map onto the parsed id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureLayout {
    /// Group 1 is the content id
    Single,
    /// Group 1 is the album id (metadata), group 2 the content id
    AlbumThenId,
    /// Group 1 is the artist name (metadata), group 2 the content id
    ArtistThenId,
}

/// A compiled path pattern
#[derive(Debug)]
pub struct PathPattern {
    pub regex: Regex,
    pub layout: CaptureLayout,
    /// Skip this pattern when the query carries this key
    pub unless_query_key: Option<&'static str>,
}

/// Domain and path tables for one service
#[derive(Debug)]
pub struct ServicePatterns {
    pub source: StreamingSource,
    pub domains: Vec<Regex>,
    pub paths: Vec<(ContentType, Vec<PathPattern>)>,
}

impl ServicePatterns {
    pub fn matches_host(&self, host: &str) -> bool {
        self.domains.iter().any(|re| re.is_match(host))
    }

    pub fn patterns_for(&self, content_type: ContentType) -> &[PathPattern] {
        self.paths
            .iter()
            .find(|(ct, _)| *ct == content_type)
            .map(|(_, patterns)| patterns.as_slice())
            .unwrap_or(&[])
    }
}

fn domain(pattern: &str) -> Regex {
    compile(&format!(r"(?:^|\.){}$", pattern))
}

fn single(pattern: &str) -> PathPattern {
    PathPattern {
        regex: compile(pattern),
        layout: CaptureLayout::Single,
        unless_query_key: None,
    }
}

fn with_layout(pattern: &str, layout: CaptureLayout) -> PathPattern {
    PathPattern {
        regex: compile(pattern),
        layout,
        unless_query_key: None,
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in URL pattern must compile")
}

lazy_static! {
    /// Services in detection order
    pub static ref SERVICE_PATTERNS: Vec<ServicePatterns> = vec![
        ServicePatterns {
            source: StreamingSource::Qobuz,
            domains: vec![domain(r"qobuz\.com"), domain(r"open\.qobuz\.com")],
            paths: vec![
                (ContentType::Artist, vec![
                    single(r"/artist/(?:[^/?]+/)?([^/?]+)"),
                    single(r"/interpreter/(?:[^/?]+/)?([^/?]+)"),
                ]),
                (ContentType::Album, vec![single(r"/album/(?:[^/?]+/)?([^/?]+)")]),
                (ContentType::Track, vec![single(r"/track/(?:[^/?]+/)?([^/?]+)")]),
                (ContentType::Playlist, vec![
                    single(r"/playlist/([^/?]+)"),
                    single(r"/user-playlists/([^/?]+)"),
                ]),
            ],
        },
        ServicePatterns {
            source: StreamingSource::Spotify,
            domains: vec![domain(r"spotify\.com"), domain(r"open\.spotify\.com")],
            paths: vec![
                (ContentType::Artist, vec![single(r"/artist/([a-zA-Z0-9]+)")]),
                (ContentType::Album, vec![single(r"/album/([a-zA-Z0-9]+)")]),
                (ContentType::Track, vec![single(r"/track/([a-zA-Z0-9]+)")]),
                (ContentType::Playlist, vec![single(r"/playlist/([a-zA-Z0-9]+)")]),
            ],
        },
        ServicePatterns {
            source: StreamingSource::Tidal,
            domains: vec![domain(r"tidal\.com"), domain(r"listen\.tidal\.com")],
            paths: vec![
                (ContentType::Artist, vec![single(r"/artist/(\d+)"), single(r"/browse/artist/(\d+)")]),
                (ContentType::Album, vec![single(r"/album/(\d+)"), single(r"/browse/album/(\d+)")]),
                (ContentType::Track, vec![single(r"/track/(\d+)"), single(r"/browse/track/(\d+)")]),
                (ContentType::Playlist, vec![
                    single(r"/playlist/([a-zA-Z0-9-]+)"),
                    single(r"/browse/playlist/([a-zA-Z0-9-]+)"),
                ]),
            ],
        },
        ServicePatterns {
            source: StreamingSource::Deezer,
            domains: vec![domain(r"deezer\.com"), domain(r"www\.deezer\.com")],
            paths: vec![
                (ContentType::Artist, vec![single(r"/artist/(\d+)")]),
                (ContentType::Album, vec![single(r"/album/(\d+)")]),
                (ContentType::Track, vec![single(r"/track/(\d+)")]),
                (ContentType::Playlist, vec![single(r"/playlist/(\d+)")]),
            ],
        },
        ServicePatterns {
            source: StreamingSource::AppleMusic,
            domains: vec![domain(r"music\.apple\.com"), domain(r"itunes\.apple\.com")],
            paths: vec![
                (ContentType::Artist, vec![single(r"/artist/[^/?]+/(\d+)")]),
                (ContentType::Album, vec![PathPattern {
                    regex: compile(r"/album/[^/?]+/(\d+)"),
                    layout: CaptureLayout::Single,
                    unless_query_key: Some("i"),
                }]),
                (ContentType::Track, vec![with_layout(
                    r"/album/[^/?]+/(\d+)\?(?:.*&)?i=(\d+)",
                    CaptureLayout::AlbumThenId,
                )]),
                (ContentType::Playlist, vec![single(r"/playlist/[^/?]+/(pl\.[a-zA-Z0-9]+)")]),
            ],
        },
        ServicePatterns {
            source: StreamingSource::YoutubeMusic,
            domains: vec![
                domain(r"music\.youtube\.com"),
                domain(r"youtu\.be"),
                domain(r"youtube\.com"),
            ],
            paths: vec![
                (ContentType::Artist, vec![
                    single(r"^/channel/([a-zA-Z0-9_-]+)"),
                    single(r"^/c/([a-zA-Z0-9_-]+)"),
                ]),
                (ContentType::Album, vec![single(r"^/playlist\?(?:.*&)?list=([a-zA-Z0-9_-]+)")]),
                (ContentType::Track, vec![
                    single(r"^/watch\?(?:.*&)?v=([a-zA-Z0-9_-]+)"),
                    // youtu.be short links
                    single(r"^/([a-zA-Z0-9_-]+)/?(?:\?|$)"),
                ]),
                (ContentType::Playlist, vec![single(r"^/playlist\?(?:.*&)?list=([a-zA-Z0-9_-]+)")]),
            ],
        },
        ServicePatterns {
            source: StreamingSource::SoundCloud,
            domains: vec![domain(r"soundcloud\.com")],
            paths: vec![
                (ContentType::Artist, vec![single(r"^/([^/?]+)/?(?:\?|$)")]),
                (ContentType::Album, vec![with_layout(
                    r"^/([^/?]+)/sets/([^/?]+)",
                    CaptureLayout::ArtistThenId,
                )]),
                (ContentType::Track, vec![with_layout(
                    r"^/([^/?]+)/([^/?]+)/?(?:\?|$)",
                    CaptureLayout::ArtistThenId,
                )]),
                (ContentType::Playlist, vec![with_layout(
                    r"^/([^/?]+)/sets/([^/?]+)",
                    CaptureLayout::ArtistThenId,
                )]),
            ],
        },
    ];
}

/// Look up the pattern table for a service
pub fn patterns_for_service(source: StreamingSource) -> Option<&'static ServicePatterns> {
    SERVICE_PATTERNS.iter().find(|p| p.source == source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_compile() {
        assert_eq!(SERVICE_PATTERNS.len(), 7);
        for service in SERVICE_PATTERNS.iter() {
            assert!(!service.domains.is_empty());
            for ct in CONTENT_PRIORITY {
                assert!(!service.patterns_for(ct).is_empty(), "{} has no {} pattern", service.source, ct);
            }
        }
    }

    #[test]
    fn test_domain_anchoring() {
        let qobuz = patterns_for_service(StreamingSource::Qobuz).unwrap();
        assert!(qobuz.matches_host("qobuz.com"));
        assert!(qobuz.matches_host("www.qobuz.com"));
        assert!(qobuz.matches_host("open.qobuz.com"));
        assert!(!qobuz.matches_host("qobuz.com.evil.net"));
        assert!(!qobuz.matches_host("notqobuz.com"));
    }
}
