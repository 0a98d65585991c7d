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


//! Download progress tracking and reporting
//!
//! # Progress Information
//! - Bytes downloaded / total bytes
//! - Instantaneous and average speed
//! - Percentage complete (always clamped to 0-100)
//! - Estimated time remaining, unknown until an average speed exists
//! - Download state and error history
//!
//! # Callback isolation
//! Every mutation on [`ProgressTracker`] notifies all registered callbacks.
//! Each callback runs inside its own error boundary:
//! - [`CallbackError::Recoverable`] is logged at WARN and swallowed
//! - a panic is caught and logged at ERROR
//! - [`CallbackError::Fatal`] stops notification and is returned to the
//!   caller as [`ProgressAbort`]
//!
//! The tracker map is guarded internally and may be shared between workers.

use chrono::{DateTime, Utc};
use log::{error, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RipstreamError;
use crate::models::{format_bytes, format_seconds, format_speed};

/// Identifier of one tracked transfer
pub type DownloadId = Uuid;

/// Download state enum representing the lifecycle of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Not yet tracked
    Pending,
    /// Queued but not started
    Queued,
    /// Currently transferring
    Downloading,
    Paused,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
    Cancelled,
    /// Waiting for another attempt
    Retrying,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Pending => "pending",
            DownloadState::Queued => "queued",
            DownloadState::Downloading => "downloading",
            DownloadState::Paused => "paused",
            DownloadState::Completed => "completed",
            DownloadState::Failed => "failed",
            DownloadState::Cancelled => "cancelled",
            DownloadState::Retrying => "retrying",
        }
    }
}

/// Progress of a single download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub download_id: DownloadId,
    pub state: DownloadState,

    /// Total bytes to download, if known
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,

    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,

    /// Speed measured from the latest sample
    pub bytes_per_second: f64,
    /// Downloaded bytes over time since start
    pub average_speed: f64,

    /// Percentage complete (0.0 - 100.0)
    pub percentage: f64,
    /// `None` until an average speed is known
    pub eta_seconds: Option<f64>,

    pub error_count: u32,
    pub last_error: Option<String>,
}

impl DownloadProgress {
    pub fn new(download_id: DownloadId, total_bytes: Option<u64>) -> Self {
        Self::started_at(download_id, total_bytes, Utc::now())
    }

    fn started_at(download_id: DownloadId, total_bytes: Option<u64>, now: DateTime<Utc>) -> Self {
        Self {
            download_id,
            state: DownloadState::Downloading,
            total_bytes,
            downloaded_bytes: 0,
            start_time: now,
            last_update_time: now,
            bytes_per_second: 0.0,
            average_speed: 0.0,
            percentage: 0.0,
            eta_seconds: None,
            error_count: 0,
            last_error: None,
        }
    }

    /// Record a new byte count
    pub fn update_progress(&mut self, downloaded_bytes: u64) {
        self.update_progress_at(downloaded_bytes, Utc::now());
    }

    /// Record a new byte count observed at `now`
    ///
    /// A count lower than the previous one (restarted transfer) resets the
    /// counter and the percentage without producing a speed sample.
    pub fn update_progress_at(&mut self, downloaded_bytes: u64, now: DateTime<Utc>) {
        if downloaded_bytes < self.downloaded_bytes {
            self.downloaded_bytes = downloaded_bytes;
        } else {
            let time_diff = seconds_between(self.last_update_time, now);
            if time_diff > 0.0 {
                let bytes_diff = downloaded_bytes - self.downloaded_bytes;
                self.bytes_per_second = bytes_diff as f64 / time_diff;

                let total_time = seconds_between(self.start_time, now);
                if total_time > 0.0 {
                    self.average_speed = downloaded_bytes as f64 / total_time;
                }
            }

            self.downloaded_bytes = downloaded_bytes;
            self.last_update_time = now;
        }

        if let Some(total) = self.total_bytes.filter(|t| *t > 0) {
            self.percentage = clamp_percentage(self.downloaded_bytes, total);

            if self.average_speed > 0.0 {
                let remaining = total.saturating_sub(self.downloaded_bytes);
                self.eta_seconds = Some(remaining as f64 / self.average_speed);
            }
        }
    }

    pub fn set_total_size(&mut self, total_bytes: u64) {
        self.total_bytes = Some(total_bytes);
        if total_bytes > 0 && self.downloaded_bytes > 0 {
            self.percentage = clamp_percentage(self.downloaded_bytes, total_bytes);
        }
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
        self.state = DownloadState::Failed;
    }

    pub fn mark_completed(&mut self) {
        self.state = DownloadState::Completed;
        self.percentage = 100.0;
        if let Some(total) = self.total_bytes.filter(|t| *t > 0) {
            self.downloaded_bytes = total;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == DownloadState::Completed
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, DownloadState::Downloading | DownloadState::Retrying)
    }

    pub fn elapsed_seconds(&self) -> f64 {
        seconds_between(self.start_time, Utc::now())
    }

    /// "1.5 MB / 10.0 MB", or "<downloaded> / Unknown"
    pub fn formatted_size(&self) -> String {
        match self.total_bytes.filter(|t| *t > 0) {
            Some(total) => format!("{} / {}", format_bytes(self.downloaded_bytes), format_bytes(total)),
            None => format!("{} / Unknown", format_bytes(self.downloaded_bytes)),
        }
    }

    pub fn formatted_total_size(&self) -> String {
        self.total_bytes
            .filter(|t| *t > 0)
            .map(format_bytes)
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn formatted_speed(&self) -> String {
        format_speed(self.bytes_per_second)
    }

    pub fn formatted_eta(&self) -> String {
        match self.eta_seconds {
            Some(eta) if eta >= 1.0 => format_seconds(eta),
            _ => "Unknown".to_string(),
        }
    }

    /// One-line summary for terminal output
    pub fn status_line(&self) -> String {
        match self.state {
            DownloadState::Downloading | DownloadState::Retrying => format!(
                "{:.1}% ({}) - {} - ETA {}",
                self.percentage,
                self.formatted_size(),
                self.formatted_speed(),
                self.formatted_eta()
            ),
            DownloadState::Failed => format!(
                "Failed - {}",
                self.last_error.as_deref().unwrap_or("Unknown error")
            ),
            state => {
                let name = state.as_str();
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()),
                    None => String::new(),
                }
            }
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
}

fn clamp_percentage(downloaded: u64, total: u64) -> f64 {
    ((downloaded as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

/// Failure raised by a progress subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// Expected subscriber failure; logged and swallowed
    Recoverable(String),
    /// Termination request; propagated to the tracker's caller
    Fatal(String),
}

/// A subscriber requested termination while handling a progress event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Progress subscriber aborted download {download_id}: {reason}")]
pub struct ProgressAbort {
    pub download_id: DownloadId,
    pub reason: String,
}

impl From<ProgressAbort> for RipstreamError {
    fn from(_: ProgressAbort) -> Self {
        RipstreamError::Cancelled
    }
}

/// Callback type for progress updates
pub type ProgressCallback =
    Arc<dyn Fn(DownloadId, &DownloadProgress) -> Result<(), CallbackError> + Send + Sync>;

/// Download ids started on behalf of one operation
///
/// A callback wrapped by [`DownloadScope::filter`] only hears about ids
/// inserted here, even when the tracker is shared with other operations.
#[derive(Debug, Clone, Default)]
pub struct DownloadScope(Arc<RwLock<HashSet<DownloadId>>>);

impl DownloadScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, download_id: DownloadId) {
        self.0.write().insert(download_id);
    }

    pub fn contains(&self, download_id: DownloadId) -> bool {
        self.0.read().contains(&download_id)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Wrap `callback` so it ignores downloads outside this scope
    pub fn filter(&self, callback: ProgressCallback) -> ProgressCallback {
        let scope = self.clone();
        Arc::new(move |download_id, progress| {
            if scope.contains(download_id) {
                callback(download_id, progress)
            } else {
                Ok(())
            }
        })
    }
}

/// Handle returned by [`ProgressTracker::add_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Registry of progress for many downloads with callback fan-out
#[derive(Default)]
pub struct ProgressTracker {
    progress: RwLock<HashMap<DownloadId, DownloadProgress>>,
    callbacks: RwLock<Vec<(CallbackId, ProgressCallback)>>,
    next_callback_id: AtomicU64,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("tracked", &self.progress.read().len())
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&self, callback: ProgressCallback) -> CallbackId {
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, callback));
        id
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        callbacks.len() != before
    }

    /// Begin tracking a download in the Downloading state
    pub fn start_tracking(
        &self,
        download_id: DownloadId,
        total_bytes: Option<u64>,
    ) -> Result<DownloadProgress, ProgressAbort> {
        let progress = DownloadProgress::new(download_id, total_bytes);
        self.progress.write().insert(download_id, progress.clone());
        self.notify(download_id, &progress)?;
        Ok(progress)
    }

    pub fn update_progress(&self, download_id: DownloadId, downloaded_bytes: u64) -> Result<(), ProgressAbort> {
        self.mutate(download_id, |p| p.update_progress(downloaded_bytes))
    }

    pub fn set_total_size(&self, download_id: DownloadId, total_bytes: u64) -> Result<(), ProgressAbort> {
        self.mutate(download_id, |p| p.set_total_size(total_bytes))
    }

    pub fn set_state(&self, download_id: DownloadId, state: DownloadState) -> Result<(), ProgressAbort> {
        self.mutate(download_id, |p| p.state = state)
    }

    pub fn mark_completed(&self, download_id: DownloadId) -> Result<(), ProgressAbort> {
        self.mutate(download_id, DownloadProgress::mark_completed)
    }

    pub fn mark_error(&self, download_id: DownloadId, message: &str) -> Result<(), ProgressAbort> {
        self.mutate(download_id, |p| p.mark_error(message))
    }

    pub fn get_progress(&self, download_id: DownloadId) -> Option<DownloadProgress> {
        self.progress.read().get(&download_id).cloned()
    }

    /// Snapshot of every tracked download
    pub fn get_all_progress(&self) -> HashMap<DownloadId, DownloadProgress> {
        self.progress.read().clone()
    }

    pub fn remove_progress(&self, download_id: DownloadId) -> Option<DownloadProgress> {
        self.progress.write().remove(&download_id)
    }

    /// Drop every completed download, returning how many were removed
    pub fn clear_completed(&self) -> usize {
        let mut progress = self.progress.write();
        let before = progress.len();
        progress.retain(|_, p| !p.is_complete());
        before - progress.len()
    }

    pub fn clear(&self) {
        self.progress.write().clear();
        self.callbacks.write().clear();
    }

    /// Apply a mutation to a tracked download and notify subscribers
    ///
    /// Unknown ids are ignored.
    fn mutate<F>(&self, download_id: DownloadId, apply: F) -> Result<(), ProgressAbort>
    where
        F: FnOnce(&mut DownloadProgress),
    {
        let snapshot = {
            let mut progress = self.progress.write();
            let Some(entry) = progress.get_mut(&download_id) else {
                return Ok(());
            };
            apply(entry);
            entry.clone()
        };
        self.notify(download_id, &snapshot)
    }

    fn notify(&self, download_id: DownloadId, progress: &DownloadProgress) -> Result<(), ProgressAbort> {
        // Callbacks may add or remove subscribers, so iterate over a copy
        let callbacks: Vec<ProgressCallback> =
            self.callbacks.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();

        for callback in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(download_id, progress))) {
                Ok(Ok(())) => {}
                Ok(Err(CallbackError::Recoverable(message))) => {
                    warn!("Progress callback failed for download {}: {}", download_id, message);
                }
                Ok(Err(CallbackError::Fatal(reason))) => {
                    return Err(ProgressAbort { download_id, reason });
                }
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        "Unexpected error in progress callback for download {}: {}",
                        download_id, message
                    );
                }
            }
        }

        Ok(())
    }
}
