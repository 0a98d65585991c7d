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


//! Download orchestration
//!
//! Two entry paths, URL-first and metadata-first, converge on a provider's
//! `download_content`. Providers are created on first use and cached per
//! streaming source, so at most one live provider exists per service for
//! the lifetime of a [`DownloadService`].

use log::{error, info};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::download::{Credentials, ProgressCallback, ProgressTracker, SessionManager};
use crate::error::{Result, RipstreamError};
use crate::metadata::MetadataResult;
use crate::models::{ContentType, DownloadProviderResult, DownloadableContent, StreamingSource};
use crate::provider::{DownloadProvider, ProviderContext, ProviderFactory};
use crate::url_parser::UrlParser;

pub struct DownloadService {
    factory: ProviderFactory,
    sessions: Arc<SessionManager>,
    tracker: Arc<ProgressTracker>,
    parser: UrlParser,
    providers: Mutex<HashMap<StreamingSource, Arc<dyn DownloadProvider>>>,
}

impl DownloadService {
    pub fn new(factory: ProviderFactory, sessions: Arc<SessionManager>, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            factory,
            sessions,
            tracker,
            parser: UrlParser::new(),
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Parse `url` and download what it points to
    ///
    /// Never fails: problems are reported through the returned result.
    pub async fn download_from_url(
        &self,
        url: &str,
        directory: Option<&Path>,
        credentials: Option<Credentials>,
        progress: Option<ProgressCallback>,
    ) -> DownloadProviderResult {
        let parsed = self.parser.parse(url);
        if !parsed.is_valid() {
            return DownloadProviderResult::failure(format!("Invalid URL: {}", url))
                .with_metadata("url", json!(url))
                .with_metadata("parsed_url", json!(parsed));
        }

        info!(
            "Downloading {} {} from {}",
            parsed.content_type, parsed.content_id, parsed.service
        );

        let outcome = async {
            let provider = self.provider_for(parsed.service, credentials).await?;
            provider
                .download_content(&parsed.content_id, parsed.content_type, directory, progress)
                .await
        }
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                error!("Download from URL failed: {}: {}", url, e);
                DownloadProviderResult::failure(e.to_string()).with_metadata("url", json!(url))
            }
        }
    }

    /// Download using metadata fetched earlier
    ///
    /// Never fails: problems are reported through the returned result.
    pub async fn download_with_metadata(
        &self,
        metadata: &MetadataResult,
        directory: Option<&Path>,
        credentials: Option<Credentials>,
        progress: Option<ProgressCallback>,
    ) -> DownloadProviderResult {
        let outcome = async {
            let source = source_from_service_name(&metadata.service);
            let provider = self.provider_for(source, credentials).await?;
            let content_type = content_type_from_metadata(&metadata.content_type)?;
            let content_id = metadata.content_id().unwrap_or_default();

            provider
                .download_content(&content_id, content_type, directory, progress)
                .await
        }
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                error!("Download with metadata failed: {}", e);
                DownloadProviderResult::failure(e.to_string()).with_metadata("metadata", json!(metadata))
            }
        }
    }

    /// Describe the content behind `url` without downloading it
    pub async fn get_download_info_from_url(
        &self,
        url: &str,
        credentials: Option<Credentials>,
    ) -> Result<DownloadableContent> {
        let parsed = self.parser.parse(url);
        if !parsed.is_valid() {
            return Err(RipstreamError::InvalidUrl(url.to_string()));
        }

        let provider = self.provider_for(parsed.service, credentials).await?;
        provider
            .get_download_info(&parsed.content_id, parsed.content_type)
            .await
            .map_err(|e| {
                error!("Failed to get download info from URL: {}: {}", url, e);
                e
            })
    }

    /// Release every cached provider
    pub async fn cleanup(&self) {
        let providers: Vec<_> = self.providers.lock().await.drain().map(|(_, p)| p).collect();
        for provider in providers {
            provider.cleanup().await;
        }
    }

    pub fn supported_services(&self) -> Vec<StreamingSource> {
        self.factory.supported_services()
    }

    pub fn is_service_supported(&self, source: StreamingSource) -> bool {
        self.factory.is_service_supported(source)
    }

    pub async fn cached_providers(&self) -> usize {
        self.providers.lock().await.len()
    }

    /// Cached provider for `source`, created on first use
    ///
    /// Credentials only apply when the provider is created; without them the
    /// configured credentials for the source are used.
    async fn provider_for(
        &self,
        source: StreamingSource,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn DownloadProvider>> {
        let mut providers = self.providers.lock().await;
        if let Some(provider) = providers.get(&source) {
            return Ok(Arc::clone(provider));
        }

        let credentials = credentials.unwrap_or_else(|| self.sessions.config().credentials_for(source));
        let context = ProviderContext::new(Arc::clone(&self.sessions), Arc::clone(&self.tracker), credentials);
        let provider = self.factory.create_provider(source, context)?;
        providers.insert(source, Arc::clone(&provider));
        Ok(provider)
    }
}

/// Map a metadata service name to a streaming source
pub fn source_from_service_name(name: &str) -> StreamingSource {
    match name.trim().to_lowercase().as_str() {
        "qobuz" => StreamingSource::Qobuz,
        "tidal" => StreamingSource::Tidal,
        "deezer" => StreamingSource::Deezer,
        "youtube" => StreamingSource::Youtube,
        "spotify" => StreamingSource::Spotify,
        other => StreamingSource::from_str(other).unwrap_or(StreamingSource::Unknown),
    }
}

fn content_type_from_metadata(content_type: &str) -> Result<ContentType> {
    match content_type {
        "artist" => Ok(ContentType::Artist),
        "album" => Ok(ContentType::Album),
        "track" => Ok(ContentType::Track),
        "playlist" => Ok(ContentType::Playlist),
        other => Err(RipstreamError::invalid_input(format!("Unknown content type: {}", other))),
    }
}
