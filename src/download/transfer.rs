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


//! Single-asset transfer with retry and verification
//!
//! # Flow
//! 1. Ensure the target directory exists and has room
//! 2. Skip when the file is already present (and matches its checksum)
//! 3. Stream the body into `<file><temp_suffix>`, resuming a previous
//!    partial file when the server honors byte ranges
//! 4. Verify size and checksum, then move the temp file into place
//! 5. Retry transient failures using the behavior's retry strategy
//!
//! A transfer never returns `Err`: failures become a [`DownloadResult`]
//! with `success == false` and the partial file is removed. The tracker
//! entry is released once subscribers have seen the terminal state.

use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::StatusCode;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::download::config::{DownloadBehaviorSettings, DownloaderConfig};
use crate::download::progress::{DownloadId, DownloadScope, DownloadState, ProgressTracker};
use crate::download::session::HttpSession;
use crate::error::{Result, RipstreamError};
use crate::file;
use crate::models::{file_checksum, DownloadResult, DownloadableContent};

/// Downloads [`DownloadableContent`] to disk through a shared session
pub struct Transfer {
    session: Arc<HttpSession>,
    tracker: Arc<ProgressTracker>,
    behavior: DownloadBehaviorSettings,
    min_free_space: u64,
    enable_resume: bool,
    scope: Option<DownloadScope>,
}

impl Transfer {
    pub fn new(
        session: Arc<HttpSession>,
        tracker: Arc<ProgressTracker>,
        config: &DownloaderConfig,
    ) -> Self {
        let behavior = config.behavior_for_source(session.source());
        Self {
            session,
            tracker,
            behavior,
            min_free_space: config.min_free_space_bytes(),
            enable_resume: config.enable_resume,
            scope: None,
        }
    }

    /// Replace the behavior derived from the config
    pub fn with_behavior(mut self, behavior: DownloadBehaviorSettings) -> Self {
        self.behavior = behavior;
        self
    }

    /// Register every download id this transfer starts in `scope`
    pub fn with_scope(mut self, scope: DownloadScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Download `content` into `directory`
    pub async fn download(&self, content: &DownloadableContent, directory: &Path) -> DownloadResult {
        let download_id = Uuid::new_v4();
        let target = directory.join(content.safe_filename());
        let temp = temp_path(&target, &self.behavior.temp_suffix);
        let started = Utc::now();
        if let Some(scope) = &self.scope {
            scope.insert(download_id);
        }

        let result = match self.run(download_id, content, directory, &target, &temp).await {
            Ok(TransferOutcome::Skipped(size)) => {
                info!("Skipping existing file {}", target.display());
                DownloadResult::succeeded(download_id.to_string(), target, size)
                    .with_metadata("skipped", json!(true))
            }
            Ok(TransferOutcome::Downloaded { size, attempts }) => {
                let elapsed = (Utc::now() - started).num_milliseconds().max(1) as f64 / 1000.0;
                let checksum = checksum_of(&target, &content.checksum_algorithm).await;

                let mut result = DownloadResult::succeeded(download_id.to_string(), target, size);
                result.checksum = checksum;
                result.duration_seconds = Some(elapsed);
                result.average_speed_bps = Some(size as f64 / elapsed);
                result.retry_count = attempts.saturating_sub(1);
                result.with_metadata("content_id", json!(content.content_id))
            }
            Err((error, attempts)) => {
                warn!("Download of {} failed: {}", content.display_name(), error);
                if let Err(abort) = self.tracker.mark_error(download_id, &error.to_string()) {
                    debug!("{}", abort);
                }
                file::discard_partial(&temp).await;

                let mut result = DownloadResult::failed(download_id.to_string(), error.to_string());
                result.retry_count = attempts.saturating_sub(1);
                result.with_metadata("content_id", json!(content.content_id))
            }
        };

        self.tracker.remove_progress(download_id);
        result
    }

    async fn run(
        &self,
        download_id: DownloadId,
        content: &DownloadableContent,
        directory: &Path,
        target: &Path,
        temp: &Path,
    ) -> std::result::Result<TransferOutcome, (RipstreamError, u32)> {
        self.prepare(content, directory).await.map_err(|e| (e, 0))?;

        if let Some(size) = self.existing_file(content, target).await {
            return Ok(TransferOutcome::Skipped(size));
        }

        self.tracker
            .start_tracking(download_id, content.expected_size)
            .map_err(|e| (e.into(), 0))?;

        let max_attempts = self.behavior.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match self.fetch(download_id, content, temp).await {
                Ok(size) => self.verify(content, temp, size).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(size) => {
                    file::safe_move(temp, target).await.map_err(|e| (e, attempt))?;
                    self.tracker
                        .mark_completed(download_id)
                        .map_err(|e| (e.into(), attempt))?;
                    return Ok(TransferOutcome::Downloaded { size, attempts: attempt });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = match e.retry_after_seconds() {
                        Some(seconds) => std::time::Duration::from_secs(seconds),
                        None => self.behavior.retry_delay_for(attempt - 1),
                    };
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        content.display_name(),
                        e,
                        delay
                    );
                    self.tracker
                        .set_state(download_id, DownloadState::Retrying)
                        .map_err(|e| (e.into(), attempt))?;
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err((
                        RipstreamError::RetryExhausted {
                            retry_count: attempt - 1,
                            last_error: Box::new(e),
                        },
                        attempt,
                    ));
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    async fn prepare(&self, content: &DownloadableContent, directory: &Path) -> Result<()> {
        if self.behavior.create_directories {
            file::ensure_directory(directory).await?;
        } else if !file::manager::file_exists(directory).await {
            return Err(RipstreamError::FileIoError(format!(
                "Directory does not exist: {}",
                directory.display()
            )));
        }

        let required = self.min_free_space + content.expected_size.unwrap_or(0);
        file::ensure_free_space(directory, required).await
    }

    /// Size of an existing target that can be kept as-is
    async fn existing_file(&self, content: &DownloadableContent, target: &Path) -> Option<u64> {
        if self.behavior.overwrite_existing {
            return None;
        }
        let size = file::verified_size(target).await?;

        if content.checksum.is_some() {
            let content = content.clone();
            let target = target.to_path_buf();
            let valid = tokio::task::spawn_blocking(move || content.validate_checksum(&target))
                .await
                .ok()?
                .ok()?;
            if !valid {
                return None;
            }
        }

        Some(size)
    }

    /// Stream the body into the temp file, returning its final size
    async fn fetch(&self, download_id: DownloadId, content: &DownloadableContent, temp: &Path) -> Result<u64> {
        let resume_from = if self.enable_resume {
            file::verified_size(temp).await.unwrap_or(0)
        } else {
            0
        };

        let response = if resume_from > 0 {
            debug!("Resuming {} from byte {}", content.display_name(), resume_from);
            self.session.get_from(&content.url, resume_from).await?
        } else {
            self.session.get(&content.url).await?
        };

        let resumed = response.status() == StatusCode::PARTIAL_CONTENT;
        let mut downloaded = if resumed { resume_from } else { 0 };

        if content.expected_size.is_none() {
            if let Some(length) = response.content_length() {
                self.tracker.set_total_size(download_id, downloaded + length)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(temp)
            .await
            .map_err(|e| io_error(e, temp))?;
        let mut writer = BufWriter::new(file);

        self.tracker.set_state(download_id, DownloadState::Downloading)?;
        self.tracker.update_progress(download_id, downloaded)?;

        let mut stream = response.bytes_stream();
        let mut last_reported = downloaded;
        loop {
            let next = tokio::time::timeout(self.behavior.timeout(), stream.next())
                .await
                .map_err(|_| RipstreamError::DownloadTimeout {
                    seconds: self.behavior.timeout().as_secs().max(1),
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| self.session.map_transport_error(e))?;

            writer.write_all(&chunk).await.map_err(|e| io_error(e, temp))?;
            downloaded += chunk.len() as u64;

            if downloaded - last_reported >= self.behavior.chunk_size as u64 {
                self.tracker.update_progress(download_id, downloaded)?;
                last_reported = downloaded;
            }
        }

        writer.flush().await.map_err(|e| io_error(e, temp))?;
        self.tracker.update_progress(download_id, downloaded)?;
        Ok(downloaded)
    }

    async fn verify(&self, content: &DownloadableContent, temp: &Path, size: u64) -> Result<u64> {
        if self.behavior.verify_file_size {
            if let Some(expected) = content.expected_size {
                if expected != size {
                    file::discard_partial(temp).await;
                    return Err(RipstreamError::FileSizeMismatch { expected, actual: size });
                }
            }
        }

        if self.behavior.verify_checksums {
            if let Some(expected) = &content.checksum {
                let actual = checksum_of(temp, &content.checksum_algorithm)
                    .await
                    .unwrap_or_default();
                if !actual.eq_ignore_ascii_case(expected) {
                    file::discard_partial(temp).await;
                    return Err(RipstreamError::ChecksumMismatch {
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
        }

        if size == 0 {
            return Err(RipstreamError::InvalidContent {
                message: format!("Empty response for {}", content.display_name()),
                content_type: Some(content.content_type.to_string()),
            });
        }

        Ok(size)
    }
}

enum TransferOutcome {
    Skipped(u64),
    Downloaded { size: u64, attempts: u32 },
}

fn temp_path(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(error: std::io::Error, path: &Path) -> RipstreamError {
    match error.kind() {
        std::io::ErrorKind::PermissionDenied => RipstreamError::PermissionDenied {
            path: path.display().to_string(),
        },
        _ => RipstreamError::IoError(error),
    }
}

async fn checksum_of(path: &Path, algorithm: &str) -> Option<String> {
    let path = path.to_path_buf();
    let algorithm = algorithm.to_string();
    tokio::task::spawn_blocking(move || file_checksum(&path, &algorithm))
        .await
        .ok()?
        .ok()
}
