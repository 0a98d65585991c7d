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

//! URL validation for UI consumption

use serde_json::json;

use super::parser::UrlParser;
use crate::models::StreamingSource;

/// Validates pasted URLs and produces (ok, message) pairs
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlValidator {
    parser: UrlParser,
}

impl UrlValidator {
    pub fn new() -> Self {
        Self { parser: UrlParser::new() }
    }

    pub fn validate(&self, url: &str) -> (bool, String) {
        if url.trim().is_empty() {
            return (false, "URL cannot be empty".to_string());
        }

        let parsed = self.parser.parse(url);
        if !parsed.is_valid() {
            let message = parsed.error().unwrap_or("Invalid URL").to_string();
            return (false, message);
        }

        (true, "Valid URL".to_string())
    }

    /// Summary of what a URL resolves to
    pub fn url_info(&self, url: &str) -> serde_json::Value {
        let parsed = self.parser.parse(url);
        let service = if parsed.service == StreamingSource::Unknown {
            "unknown"
        } else {
            parsed.service.as_str()
        };

        json!({
            "service": service,
            "content_type": parsed.content_type.as_str(),
            "content_id": parsed.content_id,
            "is_valid": parsed.is_valid(),
            "metadata": parsed.metadata,
        })
    }
}

pub fn validate_url(url: &str) -> (bool, String) {
    UrlValidator::new().validate(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_parser::parse_url;

    #[test]
    fn test_validate_messages() {
        assert_eq!(validate_url(""), (false, "URL cannot be empty".to_string()));
        assert_eq!(validate_url("  "), (false, "URL cannot be empty".to_string()));
        assert_eq!(
            validate_url("https://example.com/x"),
            (false, "Unknown streaming service".to_string())
        );
        assert_eq!(
            validate_url("https://www.qobuz.com/genre/jazz"),
            (false, "Invalid URL".to_string())
        );
        assert_eq!(
            validate_url("https://www.deezer.com/track/3135556"),
            (true, "Valid URL".to_string())
        );
    }

    #[test]
    fn test_validate_agrees_with_parse() {
        for url in [
            "",
            "qobuz.com/album/example-album/123456",
            "https://example.com",
            "https://exa mple.com",
            "https://tidal.com/browse/playlist/0a1b-2c3d",
            "https://soundcloud.com/artist/sets/x",
            "https://music.apple.com/us/artist/miles-davis/44984",
            "https://open.spotify.com/show/abc",
        ] {
            assert_eq!(validate_url(url).0, parse_url(url).is_valid(), "{}", url);
        }
    }

    #[test]
    fn test_url_info() {
        let info = UrlValidator::new().url_info("https://www.deezer.com/album/302127?utm=1");
        assert_eq!(info["service"], "deezer");
        assert_eq!(info["content_type"], "album");
        assert_eq!(info["content_id"], "302127");
        assert_eq!(info["is_valid"], true);
        assert_eq!(info["metadata"]["utm"], "1");
    }
}
