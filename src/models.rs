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


//! Core value types shared by providers, the service and workers
//!
//! - [`StreamingSource`] / [`ContentType`] identify what is being fetched
//! - [`DownloadableContent`] describes one fetchable asset
//! - [`DownloadResult`] is the outcome of one transfer attempt
//! - [`DownloadProviderResult`] aggregates a provider-level operation

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, RipstreamError};

/// Free-form metadata attached to content and results
pub type Metadata = HashMap<String, serde_json::Value>;

/// Characters that cannot appear in file names on common filesystems
const UNSAFE_FILENAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Longest file stem produced by [`DownloadableContent::safe_filename`]
const MAX_FILENAME_STEM: usize = 200;

/// Streaming service identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingSource {
    Qobuz,
    Tidal,
    Deezer,
    #[serde(rename = "soundcloud")]
    SoundCloud,
    Spotify,
    YoutubeMusic,
    Youtube,
    AppleMusic,
    Unknown,
}

impl StreamingSource {
    pub const ALL: [StreamingSource; 8] = [
        StreamingSource::Qobuz,
        StreamingSource::Tidal,
        StreamingSource::Deezer,
        StreamingSource::SoundCloud,
        StreamingSource::Spotify,
        StreamingSource::YoutubeMusic,
        StreamingSource::Youtube,
        StreamingSource::AppleMusic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamingSource::Qobuz => "qobuz",
            StreamingSource::Tidal => "tidal",
            StreamingSource::Deezer => "deezer",
            StreamingSource::SoundCloud => "soundcloud",
            StreamingSource::Spotify => "spotify",
            StreamingSource::YoutubeMusic => "youtube_music",
            StreamingSource::Youtube => "youtube",
            StreamingSource::AppleMusic => "apple_music",
            StreamingSource::Unknown => "unknown",
        }
    }

    /// Human readable name, e.g. "Qobuz"
    pub fn display_name(&self) -> &'static str {
        match self {
            StreamingSource::Qobuz => "Qobuz",
            StreamingSource::Tidal => "Tidal",
            StreamingSource::Deezer => "Deezer",
            StreamingSource::SoundCloud => "SoundCloud",
            StreamingSource::Spotify => "Spotify",
            StreamingSource::YoutubeMusic => "YouTube Music",
            StreamingSource::Youtube => "YouTube",
            StreamingSource::AppleMusic => "Apple Music",
            StreamingSource::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StreamingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamingSource {
    type Err = RipstreamError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == normalized)
            .ok_or_else(|| RipstreamError::invalid_input(format!("Unknown streaming source: {}", s)))
    }
}

/// Kind of content a URL or download refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Track,
    Album,
    Playlist,
    Artwork,
    Metadata,
    Artist,
    Unknown,
}

impl ContentType {
    /// Content types a provider can be asked to download
    pub const DOWNLOADABLE: [ContentType; 4] = [
        ContentType::Artist,
        ContentType::Album,
        ContentType::Track,
        ContentType::Playlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Track => "track",
            ContentType::Album => "album",
            ContentType::Playlist => "playlist",
            ContentType::Artwork => "artwork",
            ContentType::Metadata => "metadata",
            ContentType::Artist => "artist",
            ContentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = RipstreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "track" => Ok(ContentType::Track),
            "album" => Ok(ContentType::Album),
            "playlist" => Ok(ContentType::Playlist),
            "artwork" => Ok(ContentType::Artwork),
            "metadata" => Ok(ContentType::Metadata),
            "artist" => Ok(ContentType::Artist),
            "unknown" => Ok(ContentType::Unknown),
            _ => Err(RipstreamError::invalid_input(format!("Unknown content type: {}", s))),
        }
    }
}

/// Audio quality tier advertised by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    Low,
    High,
    Lossless,
    HiRes,
}

/// Description of a single fetchable asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadableContent {
    pub content_id: String,
    pub content_type: ContentType,
    pub source: StreamingSource,

    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,

    /// Where the bytes are fetched from
    pub url: String,
    pub file_name: String,
    pub file_extension: String,

    pub expected_size: Option<u64>,
    pub checksum: Option<String>,
    /// "md5" or "sha256"
    pub checksum_algorithm: String,

    pub quality: Option<AudioQuality>,
    pub format: Option<String>,
    pub bitrate: Option<u32>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl DownloadableContent {
    pub fn new(
        content_id: impl Into<String>,
        content_type: ContentType,
        source: StreamingSource,
        title: impl Into<String>,
        url: impl Into<String>,
        file_name: impl Into<String>,
        file_extension: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            content_type,
            source,
            title: title.into(),
            artist: None,
            album: None,
            url: url.into(),
            file_name: file_name.into(),
            file_extension: file_extension.into(),
            expected_size: None,
            checksum: None,
            checksum_algorithm: "md5".to_string(),
            quality: None,
            format: None,
            bitrate: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_expected_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>, algorithm: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self.checksum_algorithm = algorithm.into();
        self
    }

    pub fn with_quality(mut self, quality: AudioQuality, format: impl Into<String>, bitrate: Option<u32>) -> Self {
        self.quality = Some(quality);
        self.format = Some(format.into());
        self.bitrate = bitrate;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// "Artist - Title", or just the title when no artist is known
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) if !artist.is_empty() => format!("{} - {}", artist, self.title),
            _ => self.title.clone(),
        }
    }

    pub fn full_file_name(&self) -> String {
        if self.file_extension.starts_with('.') {
            format!("{}{}", self.file_name, self.file_extension)
        } else {
            format!("{}.{}", self.file_name, self.file_extension)
        }
    }

    /// File name with filesystem-hostile characters replaced
    pub fn safe_filename(&self) -> String {
        let mut stem = sanitize_path_component(&self.file_name);

        if stem.chars().count() > MAX_FILENAME_STEM {
            stem = stem.chars().take(MAX_FILENAME_STEM).collect();
        }

        format!("{}.{}", stem, self.file_extension.trim_start_matches('.'))
    }

    /// Compare the file's digest with the expected checksum
    ///
    /// Returns `Ok(false)` when no checksum is known or the file is missing.
    pub fn validate_checksum(&self, path: &Path) -> Result<bool> {
        let Some(expected) = &self.checksum else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        let actual = file_checksum(path, &self.checksum_algorithm)?;
        Ok(actual.eq_ignore_ascii_case(expected))
    }
}

/// Replace characters that cannot appear in a file or folder name
///
/// Dot-only names would resolve to the current or parent directory and
/// become `_`.
pub fn sanitize_path_component(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    name.chars()
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Hex digest of a file using the named algorithm
pub fn file_checksum(path: &Path, algorithm: &str) -> Result<String> {
    let bytes = std::fs::read(path)?;
    match algorithm.to_lowercase().as_str() {
        "md5" => Ok(hex::encode(Md5::digest(&bytes))),
        "sha256" => Ok(hex::encode(Sha256::digest(&bytes))),
        other => Err(RipstreamError::invalid_input(format!(
            "Unsupported checksum algorithm: {}",
            other
        ))),
    }
}

/// Outcome of one transfer attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub download_id: String,
    pub success: bool,
    pub file_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub checksum: Option<String>,
    pub duration_seconds: Option<f64>,
    pub average_speed_bps: Option<f64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DownloadResult {
    pub fn succeeded(download_id: impl Into<String>, file_path: PathBuf, file_size: u64) -> Self {
        Self {
            download_id: download_id.into(),
            success: true,
            file_path: Some(file_path),
            file_size: Some(file_size),
            checksum: None,
            duration_seconds: None,
            average_speed_bps: None,
            error_message: None,
            retry_count: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn failed(download_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            download_id: download_id.into(),
            success: false,
            file_path: None,
            file_size: None,
            checksum: None,
            duration_seconds: None,
            average_speed_bps: None,
            error_message: Some(error_message.into()),
            retry_count: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the reported file is present on disk
    pub fn has_file(&self) -> bool {
        self.file_path.as_deref().map(Path::exists).unwrap_or(false)
    }

    pub fn formatted_file_size(&self) -> String {
        self.file_size.map(format_bytes).unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn formatted_speed(&self) -> String {
        self.average_speed_bps
            .map(format_speed)
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn formatted_duration(&self) -> String {
        self.duration_seconds
            .map(format_seconds)
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// How a provider-level operation ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// The provider ran to completion; individual items may still have failed
    Completed { results: Vec<DownloadResult> },
    /// The operation as a whole failed before or while producing results
    Failed {
        message: String,
        #[serde(default)]
        results: Vec<DownloadResult>,
    },
}

/// Aggregate outcome of a provider-level operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProviderResult {
    pub outcome: ProviderOutcome,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DownloadProviderResult {
    pub fn from_results(results: Vec<DownloadResult>) -> Self {
        Self {
            outcome: ProviderOutcome::Completed { results },
            metadata: Metadata::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: ProviderOutcome::Failed {
                message: message.into(),
                results: Vec::new(),
            },
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn results(&self) -> &[DownloadResult] {
        match &self.outcome {
            ProviderOutcome::Completed { results } | ProviderOutcome::Failed { results, .. } => results,
        }
    }

    /// Non-empty and every item succeeded
    pub fn is_success(&self) -> bool {
        match &self.outcome {
            ProviderOutcome::Completed { results } => {
                !results.is_empty() && results.iter().all(|r| r.success)
            }
            ProviderOutcome::Failed { .. } => false,
        }
    }

    /// Human readable failure summary, `None` on success
    pub fn error_message(&self) -> Option<String> {
        match &self.outcome {
            ProviderOutcome::Failed { message, .. } => Some(message.clone()),
            ProviderOutcome::Completed { results } if results.is_empty() => {
                Some("No content was downloaded".to_string())
            }
            ProviderOutcome::Completed { results } => {
                let errors: Vec<&str> = results
                    .iter()
                    .filter(|r| !r.success)
                    .map(|r| r.error_message.as_deref().unwrap_or("Unknown error"))
                    .collect();
                if errors.is_empty() {
                    None
                } else {
                    Some(errors.join("; "))
                }
            }
        }
    }

    pub fn successful_count(&self) -> usize {
        self.results().iter().filter(|r| r.success).count()
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    let size = bytes as f64;
    if size < 1024.0 {
        format!("{} B", bytes)
    } else if size < 1024.0 * 1024.0 {
        format!("{:.1} KB", size / 1024.0)
    } else if size < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.1} MB", size / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", size / (1024.0 * 1024.0 * 1024.0))
    }
}

pub(crate) fn format_speed(bytes_per_second: f64) -> String {
    if bytes_per_second < 1024.0 {
        format!("{:.1} B/s", bytes_per_second)
    } else if bytes_per_second < 1024.0 * 1024.0 {
        format!("{:.1} KB/s", bytes_per_second / 1024.0)
    } else if bytes_per_second < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.1} MB/s", bytes_per_second / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB/s", bytes_per_second / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "45s", "3m 20s" or "2h 5m"
pub(crate) fn format_seconds(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    if total < 60 {
        format!("{}s", total)
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}
