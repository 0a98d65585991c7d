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


//! Qobuz provider
//!
//! Full-catalog provider: tracks, albums, playlists and artist discographies.
//! Catalog lookups (login, track listings, signed file URLs) go through a
//! [`CatalogClient`]; the bytes themselves are fetched by the shared
//! [`Transfer`] engine. Tracks that belong to an album land in an
//! "Artist - Album" folder under the download directory.

use async_trait::async_trait;
use log::{error, info, warn};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::download::{Credentials, DownloadScope, ProgressCallback, Transfer};
use crate::error::{Result, RipstreamError};
use crate::models::{
    sanitize_path_component, ContentType, DownloadProviderResult, DownloadResult, DownloadableContent,
    StreamingSource,
};
use crate::provider::{ensure_supported, failed_result, CallbackGuard, DownloadProvider, ProviderContext};

const SUPPORTED: &[ContentType] = &[
    ContentType::Track,
    ContentType::Album,
    ContentType::Playlist,
    ContentType::Artist,
];

/// Qobuz catalog API
///
/// Every track returned must carry a resolved, downloadable `url`.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Log in; `Ok(false)` when the service rejected the credentials
    async fn login(&self, credentials: &Credentials) -> Result<bool>;

    /// Describe any catalog item without downloading it
    async fn content_info(&self, content_id: &str, content_type: ContentType) -> Result<DownloadableContent>;

    async fn track(&self, track_id: &str) -> Result<DownloadableContent>;

    async fn album_tracks(&self, album_id: &str) -> Result<Vec<DownloadableContent>>;

    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<DownloadableContent>>;

    /// Album ids making up an artist's discography
    async fn artist_album_ids(&self, artist_id: &str) -> Result<Vec<String>>;

    async fn close(&self) {}
}

pub struct QobuzProvider {
    context: ProviderContext,
    client: Arc<dyn CatalogClient>,
    authenticated: AtomicBool,
}

impl QobuzProvider {
    pub fn new(context: ProviderContext, client: Arc<dyn CatalogClient>) -> Self {
        Self {
            context,
            client,
            authenticated: AtomicBool::new(false),
        }
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        if self.is_authenticated() || self.authenticate().await {
            Ok(())
        } else {
            Err(RipstreamError::auth_failed(
                "credentials were rejected",
                self.service_name(),
            ))
        }
    }

    async fn transfer(&self, scope: DownloadScope) -> Result<Transfer> {
        let session = self.context.sessions.get_session(StreamingSource::Qobuz).await?;
        Ok(Transfer::new(
            session,
            Arc::clone(&self.context.tracker),
            self.context.config(),
        )
        .with_scope(scope))
    }

    async fn collect(
        &self,
        content_id: &str,
        content_type: ContentType,
        directory: Option<&Path>,
        scope: DownloadScope,
    ) -> Result<Vec<DownloadResult>> {
        self.ensure_authenticated().await?;

        let base = self.context.resolve_directory(directory, StreamingSource::Qobuz);
        let transfer = self.transfer(scope).await?;

        match content_type {
            ContentType::Track => {
                let track = self.client.track(content_id).await?;
                let target = album_folder(&base, &track);
                Ok(vec![transfer.download(&track, &target).await])
            }
            ContentType::Album => {
                let tracks = self.client.album_tracks(content_id).await?;
                Ok(download_all(&transfer, &tracks, &base).await)
            }
            ContentType::Playlist => {
                let tracks = self.client.playlist_tracks(content_id).await?;
                let mut results = Vec::with_capacity(tracks.len());
                for track in &tracks {
                    results.push(transfer.download(track, &base).await);
                }
                Ok(results)
            }
            ContentType::Artist => {
                let album_ids = self.client.artist_album_ids(content_id).await?;
                info!("Downloading {} albums for artist {}", album_ids.len(), content_id);

                let mut results = Vec::new();
                for album_id in album_ids {
                    match self.client.album_tracks(&album_id).await {
                        Ok(tracks) => results.extend(download_all(&transfer, &tracks, &base).await),
                        Err(e) => {
                            warn!("Skipping album {}: {}", album_id, e);
                            results.push(
                                DownloadResult::failed(uuid::Uuid::new_v4().to_string(), e.to_string())
                                    .with_metadata("album_id", json!(album_id)),
                            );
                        }
                    }
                }
                Ok(results)
            }
            other => Err(RipstreamError::UnsupportedContentType {
                content_type: other.to_string(),
                provider: self.service_name().to_string(),
            }),
        }
    }
}

#[async_trait]
impl DownloadProvider for QobuzProvider {
    fn service_name(&self) -> &'static str {
        "qobuz"
    }

    fn streaming_source(&self) -> StreamingSource {
        StreamingSource::Qobuz
    }

    fn supported_content_types(&self) -> &'static [ContentType] {
        SUPPORTED
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn authenticate(&self) -> bool {
        let ok = match self.client.login(&self.context.credentials).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("Qobuz authentication failed: {}", e);
                false
            }
        };
        self.authenticated.store(ok, Ordering::SeqCst);
        ok
    }

    async fn get_download_info(&self, content_id: &str, content_type: ContentType) -> Result<DownloadableContent> {
        ensure_supported(self, content_type)?;
        self.ensure_authenticated().await?;
        self.client.content_info(content_id, content_type).await
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

        match self.collect(content_id, content_type, directory, callback.scope()).await {
            Ok(results) => Ok(DownloadProviderResult::from_results(results)
                .with_metadata("content_type", json!(content_type.as_str()))
                .with_metadata("content_id", json!(content_id))),
            Err(e) if e.is_validation_error() => Err(e),
            Err(e) => {
                error!("Qobuz download failed for {} {}: {}", content_type, content_id, e);
                Ok(failed_result(content_id, content_type, &e))
            }
        }
    }

    async fn cleanup(&self) {
        self.client.close().await;
        self.authenticated.store(false, Ordering::SeqCst);
    }
}

/// "Artist - Album" folder for tracks that belong to an album
fn album_folder(base: &Path, track: &DownloadableContent) -> PathBuf {
    match (&track.artist, &track.album) {
        (Some(artist), Some(album)) if !album.is_empty() => {
            base.join(sanitize_path_component(&format!("{} - {}", artist, album)))
        }
        (None, Some(album)) if !album.is_empty() => base.join(sanitize_path_component(album)),
        _ => base.to_path_buf(),
    }
}

async fn download_all(transfer: &Transfer, tracks: &[DownloadableContent], base: &Path) -> Vec<DownloadResult> {
    let mut results = Vec::with_capacity(tracks.len());
    for track in tracks {
        results.push(transfer.download(track, &album_folder(base, track)).await);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{DownloaderConfig, ProgressTracker, SessionManager};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct StubCatalog {
        accept_login: bool,
        logins: AtomicUsize,
    }

    #[async_trait]
    impl CatalogClient for StubCatalog {
        async fn login(&self, credentials: &Credentials) -> Result<bool> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(self.accept_login && credentials.get("user_auth_token").is_some())
        }

        async fn content_info(&self, content_id: &str, content_type: ContentType) -> Result<DownloadableContent> {
            Ok(DownloadableContent::new(
                content_id,
                content_type,
                StreamingSource::Qobuz,
                "Example",
                "https://streaming.qobuz.com/file",
                "Example",
                "flac",
            ))
        }

        async fn track(&self, track_id: &str) -> Result<DownloadableContent> {
            Err(RipstreamError::ContentNotFound {
                content_id: track_id.to_string(),
                source_name: Some("qobuz".to_string()),
            })
        }

        async fn album_tracks(&self, _album_id: &str) -> Result<Vec<DownloadableContent>> {
            Err(RipstreamError::network("catalog unavailable"))
        }

        async fn playlist_tracks(&self, _playlist_id: &str) -> Result<Vec<DownloadableContent>> {
            Ok(Vec::new())
        }

        async fn artist_album_ids(&self, _artist_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn provider(accept_login: bool, credentials: Credentials) -> (QobuzProvider, Arc<StubCatalog>) {
        let catalog = Arc::new(StubCatalog {
            accept_login,
            ..StubCatalog::default()
        });
        let context = ProviderContext::new(
            Arc::new(SessionManager::new(DownloaderConfig::default())),
            Arc::new(ProgressTracker::new()),
            credentials,
        );
        let client: Arc<dyn CatalogClient> = catalog.clone();
        (QobuzProvider::new(context, client), catalog)
    }

    fn token() -> Credentials {
        Credentials::new().with("user_id", "1").with("user_auth_token", "abc")
    }

    #[test]
    fn test_album_folder() {
        let base = Path::new("/music");
        let track = DownloadableContent::new("1", ContentType::Track, StreamingSource::Qobuz, "t", "u", "t", "flac");
        assert_eq!(album_folder(base, &track), PathBuf::from("/music"));

        let track = track.with_album("Live: 1999").with_artist("AC/DC");
        assert_eq!(album_folder(base, &track), PathBuf::from("/music/AC_DC - Live_ 1999"));

        let dotted = DownloadableContent::new("2", ContentType::Track, StreamingSource::Qobuz, "t", "u", "t", "flac")
            .with_album("..");
        assert_eq!(album_folder(base, &dotted), PathBuf::from("/music/_"));
    }

    #[tokio::test]
    async fn test_supports_all_collection_types() {
        let (provider, _) = provider(true, token());
        for content_type in [ContentType::Track, ContentType::Album, ContentType::Playlist, ContentType::Artist] {
            assert!(provider.can_download(content_type));
        }
        assert!(!provider.can_download(ContentType::Artwork));

        let err = provider
            .download_content("1", ContentType::Artwork, None, None)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[tokio::test]
    async fn test_lazy_authentication_once() {
        let (provider, catalog) = provider(true, token());
        assert!(!provider.is_authenticated());

        provider.get_download_info("1", ContentType::Album).await.unwrap();
        provider.get_download_info("2", ContentType::Track).await.unwrap();

        assert!(provider.is_authenticated());
        assert_eq!(catalog.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_credentials_become_failure_result() {
        let (provider, _) = provider(false, Credentials::new());
        let result = provider
            .download_content("123", ContentType::Album, None, None)
            .await
            .unwrap();

        assert!(!result.is_success());
        assert!(result.error_message().unwrap().contains("Authentication failed"));
        assert_eq!(result.metadata["content_id"], json!("123"));
    }

    #[tokio::test]
    async fn test_catalog_errors_become_failure_result() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, _) = provider(true, token());

        let album = provider
            .download_album("9", Some(dir.path()), None)
            .await
            .unwrap();
        assert!(!album.is_success());
        assert!(album.error_message().unwrap().contains("catalog unavailable"));
        assert_eq!(album.metadata["content_type"], json!("album"));

        let track = provider
            .download_track("404", Some(dir.path()), None)
            .await
            .unwrap();
        assert!(track.error_message().unwrap().contains("Content not found: 404"));
    }

    #[tokio::test]
    async fn test_empty_playlist_is_not_success() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, _) = provider(true, token());

        let result = provider
            .download_playlist("p", Some(dir.path()), None)
            .await
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(result.error_message().as_deref(), Some("No content was downloaded"));
    }

    #[tokio::test]
    async fn test_cleanup_resets_authentication() {
        let (provider, _) = provider(true, token());
        assert!(provider.authenticate().await);
        provider.cleanup().await;
        assert!(!provider.is_authenticated());
    }
}
