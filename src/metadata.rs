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


//! Background metadata fetching
//!
//! A [`MetadataSource`] answers catalog questions for one service. The
//! [`MetadataFetcher`] runs a single lookup on a background task that can be
//! cancelled and awaited, so a UI can abandon a slow fetch when the user
//! pastes another URL.

use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RipstreamError};
use crate::models::{ContentType, Metadata};
use crate::url_parser::ParsedUrl;

/// Metadata returned by a lookup
///
/// Only `service`, `content_type` and `data["id"]` are read by the download
/// path; the rest of `data` is passed through for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataResult {
    pub content_type: String,
    pub service: String,
    #[serde(default)]
    pub data: Metadata,
}

impl MetadataResult {
    pub fn new(content_type: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            service: service.into(),
            data: Metadata::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// `data["id"]` as a string; numeric ids are accepted
    pub fn content_id(&self) -> Option<String> {
        match self.data.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn service_name(&self) -> &'static str;

    async fn authenticate(&self) -> bool;

    async fn fetch_album_metadata(&self, album_id: &str) -> Result<MetadataResult>;

    async fn fetch_track_metadata(&self, track_id: &str) -> Result<MetadataResult>;

    async fn fetch_artist_metadata(&self, artist_id: &str) -> Result<MetadataResult>;

    async fn fetch_playlist_metadata(&self, playlist_id: &str) -> Result<MetadataResult>;

    async fn cleanup(&self) {}
}

pub struct MetadataFetcher;

impl MetadataFetcher {
    /// Start fetching metadata for `content_id` on a background task
    pub fn spawn(source: Arc<dyn MetadataSource>, content_type: ContentType, content_id: impl Into<String>) -> FetchHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let content_id = content_id.into();

        let task = tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!("Metadata fetch for {} {} cancelled", content_type, content_id);
                    Err(RipstreamError::Cancelled)
                }
                result = fetch(source.as_ref(), content_type, &content_id) => result,
            };
            source.cleanup().await;
            result
        });

        FetchHandle { task, token }
    }

    /// Start fetching metadata for a parsed URL
    pub fn spawn_for_url(source: Arc<dyn MetadataSource>, parsed: &ParsedUrl) -> FetchHandle {
        Self::spawn(source, parsed.content_type, parsed.content_id.clone())
    }
}

async fn fetch(source: &dyn MetadataSource, content_type: ContentType, content_id: &str) -> Result<MetadataResult> {
    let service = source.service_name();
    if !source.authenticate().await {
        return Err(RipstreamError::auth_failed(
            format!("Failed to authenticate with {}", service),
            service,
        ));
    }

    let mut result = match content_type {
        ContentType::Album => source.fetch_album_metadata(content_id).await,
        ContentType::Track => source.fetch_track_metadata(content_id).await,
        ContentType::Artist => source.fetch_artist_metadata(content_id).await,
        ContentType::Playlist => source.fetch_playlist_metadata(content_id).await,
        other => Err(RipstreamError::UnsupportedContentType {
            content_type: other.to_string(),
            provider: service.to_string(),
        }),
    }
    .map_err(|e| {
        error!("Failed to fetch metadata: {}", e);
        e
    })?;

    result.data.insert("service".to_string(), json!(service));
    Ok(result)
}

/// Handle to a running metadata fetch
pub struct FetchHandle {
    task: JoinHandle<Result<MetadataResult>>,
    token: CancellationToken,
}

impl FetchHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the fetch and wait for the task to wind down
    pub async fn cancel_and_wait(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            debug!("Metadata task ended abnormally: {}", e);
        }
    }

    /// Wait for the fetch to finish
    pub async fn join(self) -> Result<MetadataResult> {
        self.task
            .await
            .map_err(|e| RipstreamError::internal(format!("Metadata task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct StubSource {
        accept: bool,
        delay: Duration,
        cleaned_up: AtomicBool,
    }

    impl StubSource {
        fn new(accept: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                accept,
                delay,
                cleaned_up: AtomicBool::new(false),
            })
        }

        async fn answer(&self, content_type: &str, id: &str) -> Result<MetadataResult> {
            tokio::time::sleep(self.delay).await;
            Ok(MetadataResult::new(content_type, "qobuz").with_data("id", json!(id)))
        }
    }

    #[async_trait]
    impl MetadataSource for StubSource {
        fn service_name(&self) -> &'static str {
            "qobuz"
        }

        async fn authenticate(&self) -> bool {
            self.accept
        }

        async fn fetch_album_metadata(&self, album_id: &str) -> Result<MetadataResult> {
            self.answer("album", album_id).await
        }

        async fn fetch_track_metadata(&self, track_id: &str) -> Result<MetadataResult> {
            self.answer("track", track_id).await
        }

        async fn fetch_artist_metadata(&self, artist_id: &str) -> Result<MetadataResult> {
            self.answer("artist", artist_id).await
        }

        async fn fetch_playlist_metadata(&self, playlist_id: &str) -> Result<MetadataResult> {
            self.answer("playlist", playlist_id).await
        }

        async fn cleanup(&self) {
            self.cleaned_up.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_content_id_accepts_numbers() {
        let result = MetadataResult::new("album", "qobuz").with_data("id", json!(123456));
        assert_eq!(result.content_id().as_deref(), Some("123456"));

        let result = MetadataResult::new("album", "qobuz").with_data("id", json!(null));
        assert_eq!(result.content_id(), None);
    }

    #[tokio::test]
    async fn test_fetch_dispatches_by_content_type() {
        let source = StubSource::new(true, Duration::ZERO);
        let handle = MetadataFetcher::spawn(source.clone(), ContentType::Playlist, "p1");
        let result = handle.join().await.unwrap();

        assert_eq!(result.content_type, "playlist");
        assert_eq!(result.content_id().as_deref(), Some("p1"));
        assert_eq!(result.data["service"], json!("qobuz"));
        assert!(source.cleaned_up.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let source = StubSource::new(false, Duration::ZERO);
        let err = MetadataFetcher::spawn(source, ContentType::Album, "1")
            .join()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to authenticate with qobuz"));
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let source = StubSource::new(true, Duration::ZERO);
        let err = MetadataFetcher::spawn(source, ContentType::Artwork, "1")
            .join()
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[tokio::test]
    async fn test_cancel_and_wait_stops_slow_fetch() {
        let source = StubSource::new(true, Duration::from_secs(60));
        let handle = MetadataFetcher::spawn(source.clone(), ContentType::Artist, "a");

        tokio::time::timeout(Duration::from_secs(5), handle.cancel_and_wait())
            .await
            .expect("cancellation should not wait for the fetch");
        assert!(source.cleaned_up.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_join_reports_cancelled() {
        let source = StubSource::new(true, Duration::from_secs(60));
        let handle = MetadataFetcher::spawn(source, ContentType::Album, "a");
        handle.cancel();
        assert!(matches!(handle.join().await, Err(RipstreamError::Cancelled)));
    }
}
