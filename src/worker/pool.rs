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

//! Fixed-size download worker pool
//!
//! Each worker owns an unbounded request queue and processes it strictly
//! in order, one transfer at a time. Requests are assigned round-robin
//! regardless of queue depth. All workers share one [`SessionManager`];
//! each has its own [`ProgressTracker`] so a progress event can only come
//! from the worker that owns the download.
//!
//! A provider reporting success is not enough: every reported file must
//! exist and be non-empty before `Completed { success: true }` is emitted.
//! Anything else is retried with the source's retry delay until the
//! attempts run out.

use crate::download::{
    DownloadId, DownloadProgress, DownloaderConfig, ProgressCallback, ProgressTracker, SessionManager,
};
use crate::error::{Result, RipstreamError};
use crate::file::{ensure_directory, verified_size};
use crate::models::DownloadProviderResult;
use crate::provider::{DownloadProvider, ProviderContext, ProviderFactory};
use crate::worker::events::{DownloadRequest, EventSender, WorkerEvent};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Minimum spacing between speed samples for one download
const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

pub struct WorkerPool {
    senders: Vec<mpsc::UnboundedSender<DownloadRequest>>,
    handles: Vec<JoinHandle<()>>,
    next_worker: AtomicUsize,
    token: CancellationToken,
    sessions: Arc<SessionManager>,
}

impl WorkerPool {
    /// Spawn `config.worker_count()` workers. Must be called inside a Tokio runtime.
    pub fn start(config: DownloaderConfig, factory: ProviderFactory, events: EventSender) -> Self {
        Self::with_sessions(Arc::new(SessionManager::new(config)), factory, events)
    }

    pub fn with_sessions(sessions: Arc<SessionManager>, factory: ProviderFactory, events: EventSender) -> Self {
        let count = sessions.config().worker_count().max(1);
        let token = CancellationToken::new();
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for index in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = Worker {
                index,
                sessions: Arc::clone(&sessions),
                tracker: Arc::new(ProgressTracker::new()),
                factory: factory.clone(),
                events: events.clone(),
            };
            handles.push(tokio::spawn(worker.run(rx, token.child_token())));
            senders.push(tx);
        }

        log::info!("Started {} download workers", count);

        Self {
            senders,
            handles,
            next_worker: AtomicUsize::new(0),
            token,
            sessions,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Queue a request on the next worker in rotation and return that worker's index
    pub fn submit(&self, request: DownloadRequest) -> Result<usize> {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        let download_id = request.download_id.clone();

        self.senders[index]
            .send(request)
            .map_err(|_| RipstreamError::internal(format!("Download worker {} is not running", index)))?;

        log::debug!("Queued download {} on worker {}", download_id, index);
        Ok(index)
    }

    /// Cancel all workers, discard whatever is still queued and wait up to
    /// `timeout` per worker before aborting it.
    pub async fn shutdown(self, timeout: Duration) {
        self.token.cancel();
        drop(self.senders);

        for (index, mut handle) in self.handles.into_iter().enumerate() {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Download worker {} panicked: {}", index, e),
                Err(_) => {
                    log::warn!("Download worker {} did not stop within {:?}, aborting", index, timeout);
                    handle.abort();
                }
            }
        }

        self.sessions.close_all_sessions().await;
        log::info!("Download workers stopped");
    }
}

struct Worker {
    index: usize,
    sessions: Arc<SessionManager>,
    tracker: Arc<ProgressTracker>,
    factory: ProviderFactory,
    events: EventSender,
}

/// Files confirmed on disk after a provider reported success
struct Verified {
    file_path: Option<PathBuf>,
    file_size: Option<u64>,
}

enum Attempt {
    Verified(Verified),
    Retry(String),
    Abort(String),
}

impl Worker {
    async fn run(self, mut requests: mpsc::UnboundedReceiver<DownloadRequest>, token: CancellationToken) {
        log::debug!("Download worker {} started", self.index);

        loop {
            let request = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            self.process(request, &token).await;
        }

        requests.close();
        let mut discarded = 0usize;
        while let Ok(request) = requests.try_recv() {
            log::debug!("Worker {} discarding queued download {}", self.index, request.download_id);
            discarded += 1;
        }
        if discarded > 0 {
            log::info!("Worker {} discarded {} queued downloads", self.index, discarded);
        }

        log::debug!("Download worker {} stopped", self.index);
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Worker {} has no event subscriber", self.index);
        }
    }

    /// One request from provider creation to cleanup
    ///
    /// Cancellation interrupts the download, but the provider is still cleaned
    /// up and a [`WorkerEvent::Cancelled`] is emitted for it.
    async fn process(&self, request: DownloadRequest, token: &CancellationToken) {
        let download_id = request.download_id.clone();
        log::info!(
            "Worker {} processing {} {} from {}",
            self.index,
            request.content_type,
            request.content_id,
            request.source
        );

        let context = ProviderContext::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.tracker),
            self.sessions.config().credentials_for(request.source),
        );

        let provider = match self.factory.create_provider(request.source, context) {
            Ok(provider) => provider,
            Err(e) => {
                log::error!("No provider for download {}: {}", download_id, e);
                self.emit(WorkerEvent::Error {
                    download_id,
                    message: e.to_string(),
                });
                return;
            }
        };

        let event = tokio::select! {
            biased;
            _ = token.cancelled() => {
                log::warn!("Worker {} stopped during download {}", self.index, download_id);
                WorkerEvent::Cancelled { download_id }
            }
            event = self.authenticate_and_execute(provider.as_ref(), &request) => event,
        };
        self.emit(event);

        provider.cleanup().await;
    }

    async fn authenticate_and_execute(&self, provider: &dyn DownloadProvider, request: &DownloadRequest) -> WorkerEvent {
        if provider.authenticate().await {
            self.execute(provider, request).await
        } else {
            log::error!(
                "Authentication with {} failed for download {}",
                request.source,
                request.download_id
            );
            WorkerEvent::Error {
                download_id: request.download_id.clone(),
                message: format!("Failed to authenticate with {}", request.source),
            }
        }
    }

    /// Run the provider until a verified result or the attempts run out
    async fn execute(&self, provider: &dyn DownloadProvider, request: &DownloadRequest) -> WorkerEvent {
        let download_id = request.download_id.clone();
        let config = self.sessions.config();
        let directory = config.download_directory_for(request.source);

        if let Err(e) = ensure_directory(&directory).await {
            return WorkerEvent::Error {
                download_id,
                message: e.to_string(),
            };
        }

        let callback = progress_relay(download_id.clone(), self.events.clone());
        self.emit(WorkerEvent::Started {
            download_id: download_id.clone(),
            details: request.clone(),
        });

        let behavior = config.behavior_for_source(request.source);
        let attempts = behavior.max_retries + 1;
        let mut errors: Vec<String> = Vec::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(behavior.retry_delay_for(attempt - 1)).await;
                log::info!(
                    "Retrying download {} (attempt {}/{})",
                    download_id,
                    attempt + 1,
                    attempts
                );
            }

            match self.attempt(provider, request, &directory, callback.clone()).await {
                Attempt::Verified(verified) => {
                    log::info!("Download {} completed and verified", download_id);
                    return WorkerEvent::Completed {
                        download_id,
                        success: true,
                        message: format!("Successfully downloaded {}", request.title),
                        file_path: verified.file_path,
                        file_size: verified.file_size,
                    };
                }
                Attempt::Abort(message) => {
                    log::error!("Download {} rejected: {}", download_id, message);
                    return WorkerEvent::Error { download_id, message };
                }
                Attempt::Retry(reason) => {
                    log::warn!("Download {} attempt {} failed: {}", download_id, attempt + 1, reason);
                    if !errors.contains(&reason) {
                        errors.push(reason);
                    }
                }
            }
        }

        WorkerEvent::Completed {
            download_id,
            success: false,
            message: format!("Download failed after {} attempts: {}", attempts, errors.join("; ")),
            file_path: None,
            file_size: None,
        }
    }

    async fn attempt(
        &self,
        provider: &dyn DownloadProvider,
        request: &DownloadRequest,
        directory: &Path,
        callback: ProgressCallback,
    ) -> Attempt {
        let result = provider
            .download_content(&request.content_id, request.content_type, Some(directory), Some(callback))
            .await;

        match result {
            Ok(result) => match verify(&result).await {
                Ok(verified) => Attempt::Verified(verified),
                Err(reason) => Attempt::Retry(reason),
            },
            Err(e) if e.is_validation_error() => Attempt::Abort(e.to_string()),
            Err(e) => Attempt::Retry(e.to_string()),
        }
    }
}

/// Check the provider's claims against the filesystem
async fn verify(result: &DownloadProviderResult) -> std::result::Result<Verified, String> {
    if !result.is_success() {
        return Err(result
            .error_message()
            .unwrap_or_else(|| "Download failed".to_string()));
    }

    let mut files = Vec::new();
    let mut total = 0u64;
    for item in result.results() {
        let Some(path) = &item.file_path else { continue };
        match verified_size(path).await {
            Some(size) => {
                total += size;
                files.push(path.clone());
            }
            None => {
                return Err(format!(
                    "Reported file is missing or empty: {}",
                    path.display()
                ))
            }
        }
    }

    let file_path = match files.len() {
        0 => None,
        1 => files.pop(),
        _ => files[0].parent().map(Path::to_path_buf),
    };

    Ok(Verified {
        file_path,
        file_size: (total > 0).then_some(total),
    })
}

/// Translate tracker updates into Progress/Speed events for one download
fn progress_relay(download_id: String, events: EventSender) -> ProgressCallback {
    let last_percent: Mutex<Option<u8>> = Mutex::new(None);
    let last_speed: Mutex<Option<Instant>> = Mutex::new(None);

    Arc::new(move |_: DownloadId, progress: &DownloadProgress| {
        let percent = if progress.is_complete() {
            100
        } else {
            progress.percentage.clamp(0.0, 100.0) as u8
        };

        {
            let mut last = last_percent.lock();
            if *last != Some(percent) {
                *last = Some(percent);
                let _ = events.send(WorkerEvent::Progress {
                    download_id: download_id.clone(),
                    percent,
                });
            }
        }

        if progress.bytes_per_second > 0.0 {
            let now = Instant::now();
            let mut last = last_speed.lock();
            let due = last.map_or(true, |at| now.duration_since(at) >= SPEED_SAMPLE_INTERVAL);
            if due {
                *last = Some(now);
                let _ = events.send(WorkerEvent::Speed {
                    download_id: download_id.clone(),
                    bytes_per_second: progress.bytes_per_second,
                });
            }
        }

        Ok(())
    })
}
