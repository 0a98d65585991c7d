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


//! Provider contract
//!
//! A provider adapts one streaming service to a uniform download contract.
//! Services differ completely in how they authenticate and what they can
//! deliver, so the orchestrator only ever talks to [`DownloadProvider`].
//!
//! Error policy: validation mistakes (an unsupported content type, malformed
//! credentials) come back as `Err` and are not retried. Everything else is
//! folded into a failed [`DownloadProviderResult`].

pub mod deezer;
pub mod factory;
pub mod qobuz;

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::download::{Credentials, DownloaderConfig, ProgressCallback, ProgressTracker, SessionManager};
use crate::download::progress::{CallbackId, DownloadScope};
use crate::error::{Result, RipstreamError};
use crate::models::{ContentType, DownloadProviderResult, DownloadableContent, StreamingSource};

pub use deezer::DeezerProvider;
pub use factory::{ProviderConstructor, ProviderFactory};
pub use qobuz::{CatalogClient, QobuzProvider};

/// Shared collaborators handed to every provider at construction
#[derive(Clone)]
pub struct ProviderContext {
    pub sessions: Arc<SessionManager>,
    pub tracker: Arc<ProgressTracker>,
    pub credentials: Credentials,
}

impl ProviderContext {
    pub fn new(sessions: Arc<SessionManager>, tracker: Arc<ProgressTracker>, credentials: Credentials) -> Self {
        Self {
            sessions,
            tracker,
            credentials,
        }
    }

    pub fn config(&self) -> &DownloaderConfig {
        self.sessions.config()
    }

    /// Requested directory, or the configured download directory for `source`
    pub fn resolve_directory(&self, directory: Option<&Path>, source: StreamingSource) -> PathBuf {
        match directory {
            Some(dir) => dir.to_path_buf(),
            None => self.config().download_directory_for(source),
        }
    }
}

#[async_trait]
pub trait DownloadProvider: Send + Sync {
    /// Lowercase service name, e.g. "qobuz"
    fn service_name(&self) -> &'static str;

    fn streaming_source(&self) -> StreamingSource;

    fn supported_content_types(&self) -> &'static [ContentType];

    fn is_authenticated(&self) -> bool;

    /// Authenticate with the service; false when credentials were rejected
    async fn authenticate(&self) -> bool;

    async fn get_download_info(&self, content_id: &str, content_type: ContentType) -> Result<DownloadableContent>;

    async fn download_content(
        &self,
        content_id: &str,
        content_type: ContentType,
        directory: Option<&Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadProviderResult>;

    async fn cleanup(&self);

    fn can_download(&self, content_type: ContentType) -> bool {
        self.supported_content_types().contains(&content_type)
    }

    async fn download_track(
        &self,
        track_id: &str,
        directory: Option<&Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadProviderResult> {
        self.download_content(track_id, ContentType::Track, directory, progress).await
    }

    async fn download_album(
        &self,
        album_id: &str,
        directory: Option<&Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadProviderResult> {
        self.download_content(album_id, ContentType::Album, directory, progress).await
    }

    async fn download_playlist(
        &self,
        playlist_id: &str,
        directory: Option<&Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadProviderResult> {
        self.download_content(playlist_id, ContentType::Playlist, directory, progress).await
    }

    async fn download_artist_discography(
        &self,
        artist_id: &str,
        directory: Option<&Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadProviderResult> {
        self.download_content(artist_id, ContentType::Artist, directory, progress).await
    }
}

/// Reject content types the provider cannot download
pub(crate) fn ensure_supported<P: DownloadProvider + ?Sized>(provider: &P, content_type: ContentType) -> Result<()> {
    if provider.can_download(content_type) {
        Ok(())
    } else {
        Err(RipstreamError::UnsupportedContentType {
            content_type: content_type.to_string(),
            provider: provider.service_name().to_string(),
        })
    }
}

/// Failure result tagged with what was requested
pub(crate) fn failed_result(content_id: &str, content_type: ContentType, error: &RipstreamError) -> DownloadProviderResult {
    DownloadProviderResult::failure(error.to_string())
        .with_metadata("content_type", json!(content_type.as_str()))
        .with_metadata("content_id", json!(content_id))
}

/// Keeps a caller's progress callback registered for the life of an operation
///
/// The callback only hears about downloads started through [`CallbackGuard::scope`].
pub(crate) struct CallbackGuard {
    tracker: Arc<ProgressTracker>,
    id: Option<CallbackId>,
    scope: DownloadScope,
}

impl CallbackGuard {
    pub(crate) fn register(tracker: &Arc<ProgressTracker>, callback: Option<ProgressCallback>) -> Self {
        let scope = DownloadScope::new();
        Self {
            tracker: Arc::clone(tracker),
            id: callback.map(|cb| tracker.add_callback(scope.filter(cb))),
            scope,
        }
    }

    pub(crate) fn scope(&self) -> DownloadScope {
        self.scope.clone()
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.tracker.remove_callback(id);
        }
    }
}
