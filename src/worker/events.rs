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

//! Lifecycle events emitted by download workers
//!
//! Events are fire-and-forget: workers send on an unbounded channel and
//! never wait for a consumer.

use crate::models::{ContentType, StreamingSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<WorkerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<WorkerEvent>;

/// Channel pair for worker events
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A single item submitted to the worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Identifier carried by every event for this request
    pub download_id: String,
    pub source: StreamingSource,
    pub content_type: ContentType,
    pub content_id: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub source_url: Option<String>,
}

impl DownloadRequest {
    /// New request with a fresh UUID as its download id
    pub fn new(source: StreamingSource, content_type: ContentType, content_id: impl Into<String>) -> Self {
        let content_id = content_id.into();
        Self {
            download_id: uuid::Uuid::new_v4().to_string(),
            source,
            content_type,
            title: content_id.clone(),
            content_id,
            artist: None,
            album: None,
            source_url: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Started {
        download_id: String,
        details: DownloadRequest,
    },
    /// Whole-number percentage, sent only when it changes
    Progress { download_id: String, percent: u8 },
    /// Raw speed sample, at most one per 500 ms per download
    Speed {
        download_id: String,
        bytes_per_second: f64,
    },
    /// Terminal outcome after verification and retries
    Completed {
        download_id: String,
        success: bool,
        message: String,
        file_path: Option<PathBuf>,
        file_size: Option<u64>,
    },
    /// The request could not be attempted at all
    Error { download_id: String, message: String },
    /// The worker shut down while the download was running
    Cancelled { download_id: String },
}

impl WorkerEvent {
    pub fn download_id(&self) -> &str {
        match self {
            WorkerEvent::Started { download_id, .. }
            | WorkerEvent::Progress { download_id, .. }
            | WorkerEvent::Speed { download_id, .. }
            | WorkerEvent::Completed { download_id, .. }
            | WorkerEvent::Error { download_id, .. }
            | WorkerEvent::Cancelled { download_id } => download_id,
        }
    }

    /// Completed, Error or Cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::Completed { .. } | WorkerEvent::Error { .. } | WorkerEvent::Cancelled { .. }
        )
    }
}
