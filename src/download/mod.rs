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


//! Transfer layer
//!
//! Everything needed to move bytes from a streaming CDN onto disk:
//! per-source HTTP sessions, the resumable transfer engine, progress
//! tracking and a priority task queue.

pub mod config;
pub mod progress;
pub mod queue;
pub mod session;
pub mod transfer;

pub use config::{
    BehaviorOverrides, Credentials, DownloadBehaviorSettings, DownloaderConfig, RetryStrategy,
};
pub use progress::{
    CallbackError, CallbackId, DownloadId, DownloadProgress, DownloadScope, DownloadState,
    ProgressAbort, ProgressCallback, ProgressTracker,
};
pub use queue::{DownloadQueue, DownloadTask, QueueStats, TaskPriority, TaskStatus};
pub use session::{ContentInfo, HttpSession, SessionManager};
pub use transfer::Transfer;
