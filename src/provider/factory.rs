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


//! Provider registry
//!
//! Maps a [`StreamingSource`] to a constructor. Registration is checked at
//! compile time: only types implementing [`DownloadProvider`] can be
//! registered.

use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RipstreamError};
use crate::models::StreamingSource;
use crate::provider::deezer::DeezerProvider;
use crate::provider::qobuz::{CatalogClient, QobuzProvider};
use crate::provider::{DownloadProvider, ProviderContext};

pub type ProviderConstructor = Arc<dyn Fn(ProviderContext) -> Arc<dyn DownloadProvider> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProviderFactory {
    constructors: HashMap<StreamingSource, ProviderConstructor>,
}

impl fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("services", &self.supported_services())
            .finish()
    }
}

impl ProviderFactory {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the providers that need no external collaborators
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register_provider(StreamingSource::Deezer, DeezerProvider::new);
        factory
    }

    /// Register Qobuz backed by `client`
    pub fn with_catalog_client(mut self, client: Arc<dyn CatalogClient>) -> Self {
        self.register_provider(StreamingSource::Qobuz, move |context| {
            QobuzProvider::new(context, Arc::clone(&client))
        });
        self
    }

    /// Register (or replace) the constructor for `source`
    pub fn register_provider<P, F>(&mut self, source: StreamingSource, constructor: F)
    where
        P: DownloadProvider + 'static,
        F: Fn(ProviderContext) -> P + Send + Sync + 'static,
    {
        debug!("Registering provider for {}", source);
        self.constructors.insert(
            source,
            Arc::new(move |context| Arc::new(constructor(context)) as Arc<dyn DownloadProvider>),
        );
    }

    pub fn create_provider(&self, source: StreamingSource, context: ProviderContext) -> Result<Arc<dyn DownloadProvider>> {
        match self.constructors.get(&source) {
            Some(constructor) => Ok(constructor(context)),
            None => Err(RipstreamError::UnsupportedService {
                service: source.to_string(),
                supported: self
                    .supported_services()
                    .iter()
                    .map(StreamingSource::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Registered services, sorted
    pub fn supported_services(&self) -> Vec<StreamingSource> {
        let mut services: Vec<StreamingSource> = self.constructors.keys().copied().collect();
        services.sort();
        services
    }

    pub fn is_service_supported(&self, source: StreamingSource) -> bool {
        self.constructors.contains_key(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{Credentials, DownloaderConfig, ProgressCallback, ProgressTracker, SessionManager};
    use crate::models::{ContentType, DownloadProviderResult, DownloadableContent};
    use async_trait::async_trait;
    use std::path::Path;

    struct NullProvider;

    #[async_trait]
    impl DownloadProvider for NullProvider {
        fn service_name(&self) -> &'static str {
            "tidal"
        }

        fn streaming_source(&self) -> StreamingSource {
            StreamingSource::Tidal
        }

        fn supported_content_types(&self) -> &'static [ContentType] {
            &[ContentType::Track]
        }

        fn is_authenticated(&self) -> bool {
            true
        }

        async fn authenticate(&self) -> bool {
            true
        }

        async fn get_download_info(&self, content_id: &str, _content_type: ContentType) -> Result<DownloadableContent> {
            Err(RipstreamError::ContentNotFound {
                content_id: content_id.to_string(),
                source_name: None,
            })
        }

        async fn download_content(
            &self,
            _content_id: &str,
            _content_type: ContentType,
            _directory: Option<&Path>,
            _progress: Option<ProgressCallback>,
        ) -> Result<DownloadProviderResult> {
            Ok(DownloadProviderResult::from_results(Vec::new()))
        }

        async fn cleanup(&self) {}
    }

    fn context() -> ProviderContext {
        ProviderContext::new(
            Arc::new(SessionManager::new(DownloaderConfig::default())),
            Arc::new(ProgressTracker::new()),
            Credentials::new(),
        )
    }

    #[test]
    fn test_unregistered_service_lists_supported() {
        let factory = ProviderFactory::with_defaults();
        let err = factory
            .create_provider(StreamingSource::Tidal, context())
            .err()
            .unwrap();
        let message = err.to_string();

        assert!(message.contains("tidal"));
        assert!(message.contains("Supported services: deezer"));
    }

    #[test]
    fn test_register_then_create() {
        let mut factory = ProviderFactory::with_defaults();
        assert!(!factory.is_service_supported(StreamingSource::Tidal));

        factory.register_provider(StreamingSource::Tidal, |_| NullProvider);

        assert!(factory.is_service_supported(StreamingSource::Tidal));
        let provider = factory.create_provider(StreamingSource::Tidal, context()).unwrap();
        assert_eq!(provider.service_name(), "tidal");
        assert!(provider.can_download(ContentType::Track));
        assert!(!provider.can_download(ContentType::Album));
    }

    #[test]
    fn test_supported_services_sorted() {
        let mut factory = ProviderFactory::new();
        factory.register_provider(StreamingSource::Tidal, |_| NullProvider);
        factory.register_provider(StreamingSource::Qobuz, |_| NullProvider);
        factory.register_provider(StreamingSource::Deezer, DeezerProvider::new);

        assert_eq!(
            factory.supported_services(),
            vec![StreamingSource::Qobuz, StreamingSource::Tidal, StreamingSource::Deezer]
        );
    }

    #[tokio::test]
    async fn test_default_helpers_delegate() {
        let provider = NullProvider;
        let result = provider.download_album("1", None, None).await.unwrap();
        assert!(!result.is_success());
        assert_eq!(result.error_message().as_deref(), Some("No content was downloaded"));
    }
}
