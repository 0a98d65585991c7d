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

//! Background download workers
//!
//! [`WorkerPool`] runs the downloads. [`DownloadDispatcher`] sits in front
//! of it, recording each request in a [`DownloadRecordSink`] and mirroring
//! worker events into that sink before forwarding them to an optional
//! subscriber.

pub mod events;
pub mod pool;

pub use events::{event_channel, DownloadRequest, EventReceiver, EventSender, WorkerEvent};
pub use pool::WorkerPool;

use crate::download::{DownloaderConfig, SessionManager};
use crate::error::Result;
use crate::provider::ProviderFactory;
use crate::storage::{DownloadRecordSink, NewDownloadRecord, RecordStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

impl From<&DownloadRequest> for NewDownloadRecord {
    fn from(request: &DownloadRequest) -> Self {
        NewDownloadRecord {
            source: request.source,
            media_type: request.content_type,
            source_id: request.content_id.clone(),
            source_url: request.source_url.clone(),
            title: request.title.clone(),
            artist: request.artist.clone(),
            album: request.album.clone(),
            album_id: None,
        }
    }
}

/// Worker pool plus persistence bookkeeping
pub struct DownloadDispatcher {
    pool: WorkerPool,
    sink: Arc<dyn DownloadRecordSink>,
    event_loop: JoinHandle<()>,
}

impl DownloadDispatcher {
    /// Start the pool and the event loop. Must be called inside a Tokio runtime.
    pub fn start(
        config: DownloaderConfig,
        factory: ProviderFactory,
        sink: Arc<dyn DownloadRecordSink>,
        subscriber: Option<EventSender>,
    ) -> Self {
        Self::with_sessions(Arc::new(SessionManager::new(config)), factory, sink, subscriber)
    }

    pub fn with_sessions(
        sessions: Arc<SessionManager>,
        factory: ProviderFactory,
        sink: Arc<dyn DownloadRecordSink>,
        subscriber: Option<EventSender>,
    ) -> Self {
        let (tx, rx) = event_channel();
        let pool = WorkerPool::with_sessions(sessions, factory, tx);
        let event_loop = tokio::spawn(record_events(rx, Arc::clone(&sink), subscriber));

        Self {
            pool,
            sink,
            event_loop,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Record the request and queue it. The request's download id is replaced
    /// by the record id, which is returned.
    pub async fn submit(&self, mut request: DownloadRequest) -> Result<String> {
        let record_id = self.sink.add_download_record(&NewDownloadRecord::from(&request)).await?;
        request.download_id = record_id.clone();
        self.pool.submit(request)?;
        Ok(record_id)
    }

    /// Stop the workers, then let the event loop flush what they emitted
    pub async fn shutdown(self, timeout: Duration) {
        self.pool.shutdown(timeout).await;

        match tokio::time::timeout(timeout, self.event_loop).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Download event loop panicked: {}", e),
            Err(_) => log::warn!("Download event loop did not finish within {:?}", timeout),
        }
    }
}

/// Runs until every worker (and so every event sender) is gone
async fn record_events(
    mut events: EventReceiver,
    sink: Arc<dyn DownloadRecordSink>,
    subscriber: Option<EventSender>,
) {
    while let Some(event) = events.recv().await {
        if let Err(e) = apply_event(sink.as_ref(), &event).await {
            log::warn!("Failed to record event for download {}: {}", event.download_id(), e);
        }

        if let Some(subscriber) = &subscriber {
            if subscriber.send(event).is_err() {
                log::debug!("Download event subscriber went away");
            }
        }
    }
}

async fn apply_event(sink: &dyn DownloadRecordSink, event: &WorkerEvent) -> Result<()> {
    match event {
        WorkerEvent::Started { download_id, .. } => {
            sink.update_download_status(download_id, RecordStatus::Downloading, None, None)
                .await
        }
        WorkerEvent::Progress { download_id, percent } => {
            sink.update_download_status(
                download_id,
                RecordStatus::Downloading,
                Some(f64::from(*percent)),
                None,
            )
            .await
        }
        WorkerEvent::Speed { .. } => Ok(()),
        WorkerEvent::Completed {
            download_id,
            success: true,
            file_path,
            file_size,
            ..
        } => {
            let path = file_path.as_ref().map(|p| p.to_string_lossy().into_owned());
            sink.mark_download_completed(download_id, path.as_deref(), *file_size)
                .await
        }
        WorkerEvent::Completed {
            download_id,
            success: false,
            message,
            ..
        }
        | WorkerEvent::Error {
            download_id,
            message,
        } => sink.mark_download_failed(download_id, message).await,
        WorkerEvent::Cancelled { download_id } => {
            sink.update_download_status(
                download_id,
                RecordStatus::Cancelled,
                None,
                Some("Download cancelled"),
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{ProgressCallback, DownloadProgress};
    use crate::error::RipstreamError;
    use crate::models::{
        ContentType, DownloadProviderResult, DownloadResult, DownloadableContent, StreamingSource,
    };
    use crate::provider::DownloadProvider;
    use crate::storage::{Database, DownloadHistory};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    /// Writes the file only for content ids starting with "ok"
    struct SelectiveProvider;

    #[async_trait]
    impl DownloadProvider for SelectiveProvider {
        fn service_name(&self) -> &'static str {
            "qobuz"
        }

        fn streaming_source(&self) -> StreamingSource {
            StreamingSource::Qobuz
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
            content_id: &str,
            _content_type: ContentType,
            directory: Option<&Path>,
            progress: Option<ProgressCallback>,
        ) -> Result<DownloadProviderResult> {
            let path = directory.expect("directory").join(format!("{}.flac", content_id));
            if content_id.starts_with("ok") {
                tokio::fs::write(&path, b"flac-data").await?;
                if let Some(callback) = progress {
                    let id = uuid::Uuid::new_v4();
                    let mut snapshot = DownloadProgress::new(id, Some(9));
                    snapshot.update_progress(9);
                    snapshot.mark_completed();
                    callback(id, &snapshot).expect("relay never fails");
                }
            }
            Ok(DownloadProviderResult::from_results(vec![DownloadResult::succeeded(
                content_id, path, 9,
            )]))
        }

        async fn cleanup(&self) {}
    }

    async fn dispatcher(dir: &TempDir) -> (DownloadDispatcher, DownloadHistory, EventReceiver) {
        let history = DownloadHistory::new(Database::new_in_memory().await.unwrap());
        let mut config = DownloaderConfig {
            download_directory: dir.path().to_path_buf(),
            concurrency_enabled: false,
            ..DownloaderConfig::default()
        };
        config.default_behavior.max_retries = 1;
        config.default_behavior.retry_delay = 0.0;

        let mut factory = ProviderFactory::new();
        factory.register_provider(StreamingSource::Qobuz, |_| SelectiveProvider);

        let (tx, rx) = event_channel();
        let dispatcher = DownloadDispatcher::start(config, factory, Arc::new(history.clone()), Some(tx));
        (dispatcher, history, rx)
    }

    async fn wait_terminal(rx: &mut EventReceiver) -> WorkerEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out")
                .expect("closed");
            if event.is_terminal() {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_event_marks_record_cancelled() {
        let history = DownloadHistory::new(Database::new_in_memory().await.unwrap());
        let request = DownloadRequest::new(StreamingSource::Qobuz, ContentType::Track, "t1");
        let id = history
            .add_download_record(&NewDownloadRecord::from(&request))
            .await
            .unwrap();

        apply_event(&history, &WorkerEvent::Cancelled { download_id: id.clone() })
            .await
            .unwrap();

        let record = history.get_download(&id).await.unwrap().expect("record");
        assert_eq!(record.get_status(), RecordStatus::Cancelled);
        assert_eq!(record.error_message.as_deref(), Some("Download cancelled"));
    }

    #[tokio::test]
    async fn test_successful_download_is_recorded() {
        let dir = TempDir::new().unwrap();
        let (dispatcher, history, mut rx) = dispatcher(&dir).await;

        let request = DownloadRequest::new(StreamingSource::Qobuz, ContentType::Track, "ok-1")
            .with_title("Song");
        let id = dispatcher.submit(request).await.unwrap();

        let event = wait_terminal(&mut rx).await;
        assert_eq!(event.download_id(), id);

        let record = history.get_download(&id).await.unwrap().expect("record");
        assert_eq!(record.get_status(), RecordStatus::Completed);
        assert_eq!(record.progress_percentage, 100.0);
        assert_eq!(record.file_size_bytes, Some(9));
        assert!(record.started_at.is_some());
        assert!(record
            .file_path
            .as_deref()
            .map_or(false, |p| p.ends_with("ok-1.flac")));

        dispatcher.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_failed_download_is_recorded() {
        let dir = TempDir::new().unwrap();
        let (dispatcher, history, mut rx) = dispatcher(&dir).await;

        let request = DownloadRequest::new(StreamingSource::Qobuz, ContentType::Track, "missing");
        let id = dispatcher.submit(request).await.unwrap();

        match wait_terminal(&mut rx).await {
            WorkerEvent::Completed { success, .. } => assert!(!success),
            other => panic!("unexpected event {:?}", other),
        }

        let record = history.get_download(&id).await.unwrap().expect("record");
        assert_eq!(record.get_status(), RecordStatus::Failed);
        assert_eq!(record.retry_count, 1);
        assert!(record
            .error_message
            .as_deref()
            .map_or(false, |m| m.starts_with("Download failed after 2 attempts")));

        dispatcher.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_resubmission_reuses_record() {
        let dir = TempDir::new().unwrap();
        let (dispatcher, history, mut rx) = dispatcher(&dir).await;

        let first = dispatcher
            .submit(DownloadRequest::new(StreamingSource::Qobuz, ContentType::Track, "ok-2"))
            .await
            .unwrap();
        wait_terminal(&mut rx).await;
        let second = dispatcher
            .submit(DownloadRequest::new(StreamingSource::Qobuz, ContentType::Track, "ok-2"))
            .await
            .unwrap();
        wait_terminal(&mut rx).await;

        assert_eq!(first, second);
        assert_eq!(history.statistics().await.unwrap().total, 1);

        dispatcher.shutdown(Duration::from_secs(5)).await;
    }
}
