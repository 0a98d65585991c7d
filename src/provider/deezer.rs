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


//! Deezer provider
//!
//! Downloads the public 30-second MP3 preview of a track. Track details come
//! from the public API; an `arl` credential, when present, is attached as a
//! session cookie for account-scoped endpoints.

use async_trait::async_trait;
use log::{debug, error, warn};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::download::{DownloadScope, ProgressCallback, Transfer};
use crate::error::{Result, RipstreamError};
use crate::models::{
    AudioQuality, ContentType, DownloadProviderResult, DownloadableContent, StreamingSource,
};
use crate::provider::{ensure_supported, failed_result, CallbackGuard, DownloadProvider, ProviderContext};

pub const DEEZER_API_BASE: &str = "https://api.deezer.com";
const COOKIE_DOMAIN: &str = "https://www.deezer.com";
const PREVIEW_BITRATE: u32 = 128_000;

#[derive(Debug, Deserialize)]
struct TrackResponse {
    title: Option<String>,
    preview: Option<String>,
    artist: Option<ArtistRef>,
    album: Option<AlbumRef>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlbumRef {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

pub struct DeezerProvider {
    context: ProviderContext,
    api_base: String,
    authenticated: AtomicBool,
}

impl DeezerProvider {
    pub fn new(context: ProviderContext) -> Self {
        Self::with_api_base(context, DEEZER_API_BASE)
    }

    /// Use a different API host, e.g. a local mirror
    pub fn with_api_base(context: ProviderContext, api_base: impl Into<String>) -> Self {
        Self {
            context,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            authenticated: AtomicBool::new(false),
        }
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        if self.is_authenticated() || self.authenticate().await {
            Ok(())
        } else {
            Err(RipstreamError::auth_failed("session could not be initialized", self.service_name()))
        }
    }

    async fn preview_content(&self, track_id: &str) -> Result<DownloadableContent> {
        let session = self.context.sessions.get_session(StreamingSource::Deezer).await?;
        let url = format!("{}/track/{}", self.api_base, track_id);
        let track: TrackResponse = session.get_json(&url).await?;
        let mut content = track_content(track_id, track)?;

        content.expected_size = match self
            .context
            .sessions
            .get_content_info(StreamingSource::Deezer, &content.url)
            .await
        {
            Ok(info) => info.size,
            Err(e) => {
                debug!("No size for preview {}: {}", track_id, e);
                None
            }
        };
        Ok(content)
    }

    async fn download_preview(
        &self,
        track_id: &str,
        directory: Option<&Path>,
        scope: DownloadScope,
    ) -> Result<DownloadProviderResult> {
        self.ensure_authenticated().await?;
        let content = self.preview_content(track_id).await?;

        let session = self.context.sessions.get_session(StreamingSource::Deezer).await?;
        let transfer =
            Transfer::new(session, Arc::clone(&self.context.tracker), self.context.config()).with_scope(scope);
        let target = self.context.resolve_directory(directory, StreamingSource::Deezer);

        let result = transfer
            .download(&content, &target)
            .await
            .with_metadata("content_type", json!(ContentType::Track.as_str()))
            .with_metadata("source", json!(self.service_name()))
            .with_metadata("is_preview", json!(true));

        Ok(DownloadProviderResult::from_results(vec![result])
            .with_metadata("content_type", json!(ContentType::Track.as_str()))
            .with_metadata("content_id", json!(track_id)))
    }
}

#[async_trait]
impl DownloadProvider for DeezerProvider {
    fn service_name(&self) -> &'static str {
        "deezer"
    }

    fn streaming_source(&self) -> StreamingSource {
        StreamingSource::Deezer
    }

    fn supported_content_types(&self) -> &'static [ContentType] {
        &[ContentType::Track]
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn authenticate(&self) -> bool {
        let session = match self.context.sessions.get_session(StreamingSource::Deezer).await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create Deezer session: {}", e);
                self.authenticated.store(false, Ordering::SeqCst);
                return false;
            }
        };

        if let Some(arl) = self.context.credentials.get("arl") {
            if let Err(e) = session.add_cookie("arl", arl, COOKIE_DOMAIN) {
                warn!("Could not attach arl cookie: {}", e);
            }
        }

        self.authenticated.store(true, Ordering::SeqCst);
        true
    }

    async fn get_download_info(&self, content_id: &str, content_type: ContentType) -> Result<DownloadableContent> {
        ensure_supported(self, content_type)?;
        self.ensure_authenticated().await?;
        self.preview_content(content_id).await
    }

    async fn download_content(
        &self,
        content_id: &str,
        content_type: ContentType,
        directory: Option<&Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadProviderResult> {
        ensure_supported(self, content_type)?;
        let callback = CallbackGuard::register(&self.context.tracker, progress);

        match self.download_preview(content_id, directory, callback.scope()).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_validation_error() => Err(e),
            Err(e) => {
                error!("Deezer download failed for content {}: {}", content_id, e);
                Ok(failed_result(content_id, content_type, &e))
            }
        }
    }

    async fn cleanup(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }
}

fn track_content(track_id: &str, track: TrackResponse) -> Result<DownloadableContent> {
    if let Some(api_error) = track.error {
        return Err(RipstreamError::ContentNotFound {
            content_id: format!("{} ({})", track_id, api_error.message),
            source_name: Some("deezer".to_string()),
        });
    }

    let title = track
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("Track_{}", track_id));
    let artist = track.artist.and_then(|a| a.name).filter(|a| !a.is_empty());
    let album = track.album.and_then(|a| a.title);
    let preview = track.preview.filter(|p| !p.is_empty()).ok_or_else(|| RipstreamError::InvalidContent {
        message: "Preview URL not available for this track".to_string(),
        content_type: Some(ContentType::Track.to_string()),
    })?;

    let file_name = format!("{} - {}", artist.as_deref().unwrap_or("Unknown Artist"), title);
    let mut content = DownloadableContent::new(
        track_id,
        ContentType::Track,
        StreamingSource::Deezer,
        title,
        preview,
        file_name,
        "mp3",
    )
    .with_quality(AudioQuality::Low, "MP3", Some(PREVIEW_BITRATE))
    .with_metadata("is_preview", json!(true));

    content.artist = artist;
    content.album = album;
    Ok(content)
}
