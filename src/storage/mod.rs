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

//! Download history storage
//!
//! SQLite via sqlx, with runtime migrations.
//!
//! # Usage Example
//! ```no_run
//! use ripstream_core::models::{ContentType, StreamingSource};
//! use ripstream_core::storage::{Database, DownloadHistory, DownloadRecordSink, NewDownloadRecord};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./downloads.db").await?;
//! let history = DownloadHistory::new(db);
//!
//! let record = NewDownloadRecord::new(StreamingSource::Qobuz, ContentType::Track, "12345", "Song");
//! let id = history.add_download_record(&record).await?;
//! history.mark_download_completed(&id, Some("/music/Song.flac"), Some(1024)).await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod history;
pub mod migrations;

pub use database::{Database, DatabaseStats};
pub use history::{
    DownloadHistory, DownloadRecord, DownloadRecordSink, DownloadStatistics, NewDownloadRecord,
    RecordStatus, MAX_RECORD_RETRIES,
};
