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

//! RipStream core: the download engine behind the RipStream music client.
//!
//! - [`url_parser`] turns streaming-service links into typed references
//! - [`provider`] adapts each service behind the [`provider::DownloadProvider`] contract
//! - [`service::DownloadService`] routes URLs and metadata to providers
//! - [`worker`] runs downloads on a fixed pool with filesystem verification
//! - [`storage`] keeps the download history in SQLite
//!
//! # Usage Example
//! ```no_run
//! use std::sync::Arc;
//! use ripstream_core::download::{DownloaderConfig, ProgressTracker, SessionManager};
//! use ripstream_core::provider::ProviderFactory;
//! use ripstream_core::service::DownloadService;
//!
//! # async fn example() {
//! let sessions = Arc::new(SessionManager::new(DownloaderConfig::default()));
//! let service = DownloadService::new(
//!     ProviderFactory::with_defaults(),
//!     sessions,
//!     Arc::new(ProgressTracker::new()),
//! );
//!
//! let result = service
//!     .download_from_url("https://www.deezer.com/track/3135556", None, None, None)
//!     .await;
//! println!("success: {}", result.is_success());
//! # }
//! ```

pub mod download;
pub mod error;
pub mod file;
pub mod metadata;
pub mod models;
pub mod provider;
pub mod service;
pub mod storage;
pub mod url_parser;
pub mod worker;

pub use error::{Result, RipstreamError};
pub use models::{
    ContentType, DownloadProviderResult, DownloadResult, DownloadableContent, StreamingSource,
};
pub use service::DownloadService;
pub use url_parser::{parse_url, validate_url, ParsedUrl};
