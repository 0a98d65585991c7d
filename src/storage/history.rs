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

//! Download history persistence
//!
//! [`DownloadRecordSink`] is the narrow interface the download dispatcher
//! writes through. [`DownloadHistory`] implements it over the
//! `download_records` table and adds the read/maintenance queries a UI needs.
//!
//! Timestamps are stored as ISO 8601 TEXT. Records are keyed by a UUID
//! string and are unique per (source, source_id, media_type).

use crate::error::{Result, RipstreamError};
use crate::models::{ContentType, StreamingSource};
use crate::storage::Database;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// A failed record may be reset to pending while `retry_count` is below this
pub const MAX_RECORD_RETRIES: i64 = 3;

/// Lifecycle state of a persisted download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Downloading => "downloading",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
            RecordStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = RipstreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(RecordStatus::Pending),
            "downloading" => Ok(RecordStatus::Downloading),
            "completed" => Ok(RecordStatus::Completed),
            "failed" => Ok(RecordStatus::Failed),
            "cancelled" => Ok(RecordStatus::Cancelled),
            other => Err(RipstreamError::invalid_input(format!(
                "Unknown download status: {}",
                other
            ))),
        }
    }
}

/// Insert payload for a new download record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDownloadRecord {
    pub source: StreamingSource,
    pub media_type: ContentType,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_id: Option<String>,
}

impl NewDownloadRecord {
    pub fn new(
        source: StreamingSource,
        media_type: ContentType,
        source_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            source,
            media_type,
            source_id: source_id.into(),
            source_url: None,
            title: title.into(),
            artist: None,
            album: None,
            album_id: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>, album_id: Option<String>) -> Self {
        self.album = Some(album.into());
        self.album_id = album_id;
        self
    }
}

/// Row of `download_records`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub media_type: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub status: String,
    pub progress_percentage: f64,
    pub file_path: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// Stored status; unrecognized text reads as pending
    pub fn get_status(&self) -> RecordStatus {
        self.status.parse().unwrap_or(RecordStatus::Pending)
    }

    pub fn get_source(&self) -> StreamingSource {
        self.source.parse().unwrap_or(StreamingSource::Unknown)
    }

    pub fn get_content_type(&self) -> Option<ContentType> {
        self.media_type.parse().ok()
    }

    pub fn can_retry(&self) -> bool {
        self.get_status() == RecordStatus::Failed && self.retry_count < MAX_RECORD_RETRIES
    }
}

/// Aggregate counts over the history table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStatistics {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    /// Pending plus downloading
    pub pending: i64,
}

/// Persistence seam between the worker pool and storage.
///
/// Implementations must be safe to call from the dispatcher's event loop
/// while new records are being added from other tasks.
#[async_trait]
pub trait DownloadRecordSink: Send + Sync {
    /// Insert a record and return its id. If the same
    /// (source, source_id, media_type) already exists, its id is returned.
    async fn add_download_record(&self, record: &NewDownloadRecord) -> Result<String>;

    /// Progress is clamped to 0..=100. Entering `Downloading` stamps
    /// `started_at` once; entering `Completed` stamps `completed_at`.
    async fn update_download_status(
        &self,
        id: &str,
        status: RecordStatus,
        progress: Option<f64>,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn mark_download_completed(
        &self,
        id: &str,
        file_path: Option<&str>,
        file_size: Option<u64>,
    ) -> Result<()>;

    /// Records the error and bumps `retry_count`
    async fn mark_download_failed(&self, id: &str, error_message: &str) -> Result<()>;
}

/// SQLite-backed download history
#[derive(Debug, Clone)]
pub struct DownloadHistory {
    db: Database,
}

impl DownloadHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    pub async fn get_download(&self, id: &str) -> Result<Option<DownloadRecord>> {
        let record = sqlx::query_as::<_, DownloadRecord>("SELECT * FROM download_records WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(record)
    }

    /// Newest first, optionally restricted to one status
    pub async fn list_downloads(&self, status: Option<RecordStatus>) -> Result<Vec<DownloadRecord>> {
        let records = match status {
            Some(status) => {
                sqlx::query_as::<_, DownloadRecord>(
                    "SELECT * FROM download_records WHERE status = ? ORDER BY created_at DESC, rowid DESC",
                )
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, DownloadRecord>(
                    "SELECT * FROM download_records ORDER BY created_at DESC, rowid DESC",
                )
                .fetch_all(self.pool())
                .await?
            }
        };

        Ok(records)
    }

    /// Reset a failed record to pending. Returns false when the record is
    /// not failed or has used up its retries.
    pub async fn retry_download(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE download_records
            SET status = 'pending', progress_percentage = 0.0, error_message = NULL,
                started_at = NULL, completed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'failed' AND retry_count < ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(MAX_RECORD_RETRIES)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_download(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM download_records WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete completed records, returning how many went
    pub async fn clear_completed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_records WHERE status = 'completed'")
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete completed records and reclaim the space they held
    pub async fn compact(&self) -> Result<u64> {
        let removed = self.clear_completed().await?;
        self.db.compact().await?;
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_records")
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn statistics(&self) -> Result<DownloadStatistics> {
        let (total, completed, failed, pending): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status IN ('pending', 'downloading') THEN 1 ELSE 0 END), 0)
            FROM download_records
            "#,
        )
        .fetch_one(self.pool())
        .await?;

        Ok(DownloadStatistics {
            total,
            completed,
            failed,
            pending,
        })
    }

    async fn find_existing(&self, record: &NewDownloadRecord) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM download_records WHERE source = ? AND source_id = ? AND media_type = ?",
        )
        .bind(record.source.as_str())
        .bind(&record.source_id)
        .bind(record.media_type.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(id)
    }
}

fn ensure_updated(rows: u64, id: &str) -> Result<()> {
    if rows == 0 {
        return Err(RipstreamError::RecordNotFound(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl DownloadRecordSink for DownloadHistory {
    async fn add_download_record(&self, record: &NewDownloadRecord) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO download_records (
                id, media_type, source, source_id, source_url,
                title, artist, album, album_id,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source, source_id, media_type) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(record.media_type.as_str())
        .bind(record.source.as_str())
        .bind(&record.source_id)
        .bind(&record.source_url)
        .bind(&record.title)
        .bind(&record.artist)
        .bind(&record.album)
        .bind(&record.album_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        if result.rows_affected() > 0 {
            log::debug!("Recorded download {} ({} {})", id, record.source, record.source_id);
            return Ok(id);
        }

        self.find_existing(record).await?.ok_or_else(|| {
            RipstreamError::DatabaseError(format!(
                "Conflicting download record for {} {} vanished",
                record.source, record.source_id
            ))
        })
    }

    async fn update_download_status(
        &self,
        id: &str,
        status: RecordStatus,
        progress: Option<f64>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let progress = progress.map(|p| if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) });
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE download_records
            SET status = ?,
                progress_percentage = COALESCE(?, progress_percentage),
                error_message = COALESCE(?, error_message),
                started_at = CASE WHEN ? = 'downloading' AND started_at IS NULL THEN ? ELSE started_at END,
                completed_at = CASE WHEN ? = 'completed' THEN ? ELSE completed_at END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(progress)
        .bind(error_message)
        .bind(status.as_str())
        .bind(now)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        ensure_updated(result.rows_affected(), id)
    }

    async fn mark_download_completed(
        &self,
        id: &str,
        file_path: Option<&str>,
        file_size: Option<u64>,
    ) -> Result<()> {
        let now = Utc::now();
        let file_size = file_size.map(|size| i64::try_from(size).unwrap_or(i64::MAX));

        let result = sqlx::query(
            r#"
            UPDATE download_records
            SET status = 'completed', progress_percentage = 100.0, error_message = NULL,
                file_path = COALESCE(?, file_path),
                file_size_bytes = COALESCE(?, file_size_bytes),
                completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(file_path)
        .bind(file_size)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        ensure_updated(result.rows_affected(), id)
    }

    async fn mark_download_failed(&self, id: &str, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE download_records
            SET status = 'failed', error_message = ?, retry_count = retry_count + 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;

        ensure_updated(result.rows_affected(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn history() -> DownloadHistory {
        let db = Database::new_in_memory().await.expect("Failed to create database");
        DownloadHistory::new(db)
    }

    fn track(id: &str) -> NewDownloadRecord {
        NewDownloadRecord::new(StreamingSource::Qobuz, ContentType::Track, id, "Song")
            .with_artist("Artist")
            .with_album("Album", Some("alb-1".to_string()))
    }

    #[tokio::test]
    async fn test_add_and_get_record() {
        let history = history().await;
        let id = history.add_download_record(&track("t1")).await.unwrap();

        let record = history.get_download(&id).await.unwrap().expect("record exists");
        assert_eq!(record.source, "qobuz");
        assert_eq!(record.media_type, "track");
        assert_eq!(record.get_status(), RecordStatus::Pending);
        assert_eq!(record.progress_percentage, 0.0);
        assert_eq!(record.album_id.as_deref(), Some("alb-1"));
        assert!(record.started_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_returns_existing_id() {
        let history = history().await;
        let first = history.add_download_record(&track("t1")).await.unwrap();
        let second = history.add_download_record(&track("t1")).await.unwrap();
        assert_eq!(first, second);

        let album = NewDownloadRecord::new(StreamingSource::Qobuz, ContentType::Album, "t1", "Album");
        let third = history.add_download_record(&album).await.unwrap();
        assert_ne!(first, third);

        assert_eq!(history.statistics().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_status_update_clamps_and_stamps() {
        let history = history().await;
        let id = history.add_download_record(&track("t1")).await.unwrap();

        history
            .update_download_status(&id, RecordStatus::Downloading, Some(150.0), None)
            .await
            .unwrap();
        let record = history.get_download(&id).await.unwrap().unwrap();
        assert_eq!(record.progress_percentage, 100.0);
        let started = record.started_at.expect("started_at stamped");

        history
            .update_download_status(&id, RecordStatus::Downloading, Some(-5.0), None)
            .await
            .unwrap();
        let record = history.get_download(&id).await.unwrap().unwrap();
        assert_eq!(record.progress_percentage, 0.0);
        assert_eq!(record.started_at, Some(started));
        assert!(record.completed_at.is_none());

        history
            .update_download_status(&id, RecordStatus::Completed, None, None)
            .await
            .unwrap();
        let record = history.get_download(&id).await.unwrap().unwrap();
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_record_update_fails() {
        let history = history().await;
        let err = history.mark_download_failed("missing", "boom").await.unwrap_err();
        assert!(matches!(err, RipstreamError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_completed() {
        let history = history().await;
        let id = history.add_download_record(&track("t1")).await.unwrap();

        history
            .mark_download_completed(&id, Some("/music/song.flac"), Some(4096))
            .await
            .unwrap();

        let record = history.get_download(&id).await.unwrap().unwrap();
        assert_eq!(record.get_status(), RecordStatus::Completed);
        assert_eq!(record.progress_percentage, 100.0);
        assert_eq!(record.file_path.as_deref(), Some("/music/song.flac"));
        assert_eq!(record.file_size_bytes, Some(4096));
    }

    #[tokio::test]
    async fn test_retry_limit() {
        let history = history().await;
        let id = history.add_download_record(&track("t1")).await.unwrap();

        // Not failed yet
        assert!(!history.retry_download(&id).await.unwrap());

        for attempt in 0..MAX_RECORD_RETRIES {
            history.mark_download_failed(&id, "network down").await.unwrap();
            let record = history.get_download(&id).await.unwrap().unwrap();
            assert_eq!(record.retry_count, attempt + 1);
            assert_eq!(record.error_message.as_deref(), Some("network down"));

            let reset = history.retry_download(&id).await.unwrap();
            assert_eq!(reset, attempt + 1 < MAX_RECORD_RETRIES);
        }

        let record = history.get_download(&id).await.unwrap().unwrap();
        assert_eq!(record.get_status(), RecordStatus::Failed);
        assert!(!record.can_retry());
    }

    #[tokio::test]
    async fn test_list_filter_and_statistics() {
        let history = history().await;
        let a = history.add_download_record(&track("a")).await.unwrap();
        let b = history.add_download_record(&track("b")).await.unwrap();
        let c = history.add_download_record(&track("c")).await.unwrap();

        history.mark_download_completed(&a, None, None).await.unwrap();
        history.mark_download_failed(&b, "boom").await.unwrap();
        history
            .update_download_status(&c, RecordStatus::Downloading, Some(10.0), None)
            .await
            .unwrap();

        let stats = history.statistics().await.unwrap();
        assert_eq!(
            stats,
            DownloadStatistics {
                total: 3,
                completed: 1,
                failed: 1,
                pending: 1,
            }
        );

        let failed = history.list_downloads(Some(RecordStatus::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, b);
        assert_eq!(history.list_downloads(None).await.unwrap().len(), 3);

        assert_eq!(history.clear_completed().await.unwrap(), 1);
        assert!(history.get_download(&a).await.unwrap().is_none());

        assert!(history.remove_download(&b).await.unwrap());
        assert!(!history.remove_download(&b).await.unwrap());
        assert_eq!(history.clear_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_compact_reclaims_completed_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::new(dir.path().join("history.db")).await.unwrap();
        let history = DownloadHistory::new(db);

        let note = "x".repeat(4000);
        for i in 0..200 {
            let id = history.add_download_record(&track(&format!("t{}", i))).await.unwrap();
            history.mark_download_completed(&id, None, None).await.unwrap();
        }
        let kept = history.add_download_record(&track("kept")).await.unwrap();

        // Pad completed rows so deleting them frees whole pages
        sqlx::query("UPDATE download_records SET file_path = ? WHERE status = 'completed'")
            .bind(&note)
            .execute(history.pool())
            .await
            .unwrap();

        assert_eq!(history.compact().await.unwrap(), 200);

        let stats = history.database().get_stats().await.unwrap();
        assert!(!stats.should_vacuum(), "{:.1}% still unused", stats.unused_percentage());
        assert!(history.get_download(&kept).await.unwrap().is_some());
        assert_eq!(history.statistics().await.unwrap().total, 1);

        // Nothing left to reclaim on a second pass
        assert!(!history.database().compact().await.unwrap());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Downloading".parse::<RecordStatus>().unwrap(), RecordStatus::Downloading);
        assert!("paused".parse::<RecordStatus>().is_err());
        assert_eq!(RecordStatus::Cancelled.to_string(), "cancelled");
    }
}
