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

//! Database connection and management
//!
//! Owns the SQLite pool that backs the download history.
//!
//! # Database Location
//! - macOS: ~/Library/Application Support/RipStream/downloads.db
//! - Linux: ~/.local/share/RipStream/downloads.db
//! - Windows: %APPDATA%/RipStream/downloads.db
//!
//! # SQLite Configuration
//! - WAL journal, foreign keys on
//! - Incremental auto-vacuum
//! - Normal synchronous mode

use crate::error::{Result, RipstreamError};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous},
    ConnectOptions,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Connection pool plus the file it was opened from
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>, // None for in-memory databases
}

impl Database {
    /// Open (or create) the database at `database_path` and apply migrations.
    ///
    /// # Errors
    /// Fails if the parent directory cannot be created, the file cannot be
    /// opened, or a migration fails.
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RipstreamError::FileIoError(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let connection_string = format!("sqlite://{}?mode=rwc", path.display());
        let connect_opts = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_opts)
            .await?;

        Self::configure_database(&pool).await?;

        let db = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        db.migrate().await?;

        log::debug!("Opened download database at {}", path.display());
        Ok(db)
    }

    /// In-memory database for tests and throwaway sessions
    pub async fn new_in_memory() -> Result<Self> {
        let connect_opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .disable_statement_logging();

        // A single connection that never recycles, otherwise the data vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_opts)
            .await?;

        Self::configure_database(&pool).await?;

        let db = Self { pool, path: None };
        db.migrate().await?;

        Ok(db)
    }

    async fn configure_database(pool: &SqlitePool) -> Result<()> {
        sqlx::query("PRAGMA auto_vacuum = INCREMENTAL")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        crate::storage::migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| RipstreamError::MigrationFailed(e.to_string()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    /// Platform application-data location of the history database
    pub fn get_default_path() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("RipStream")
                .join("downloads.db")
        }

        #[cfg(target_os = "linux")]
        {
            let base = std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                    PathBuf::from(home).join(".local").join("share")
                });
            base.join("RipStream").join("downloads.db")
        }

        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(appdata).join("RipStream").join("downloads.db")
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            PathBuf::from("./downloads.db")
        }
    }

    /// Reclaim unused pages
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Size of the database file in bytes, 0 when in memory
    pub async fn get_size(&self) -> Result<u64> {
        match &self.path {
            Some(path) => {
                let metadata = tokio::fs::metadata(path).await.map_err(|e| {
                    RipstreamError::FileIoError(format!(
                        "Failed to get database size for {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(metadata.len())
            }
            None => Ok(0),
        }
    }

    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?;
        let freelist_count: i64 = sqlx::query_scalar("PRAGMA freelist_count")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            page_count: page_count.max(0) as u64,
            page_size: page_size.max(0) as u64,
            freelist_count: freelist_count.max(0) as u64,
        })
    }

    /// Flush the WAL into the main file
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Checkpoint the WAL, then vacuum once free pages pass the threshold
    ///
    /// Returns whether a vacuum ran.
    pub async fn compact(&self) -> Result<bool> {
        if self.path.is_some() {
            self.checkpoint().await?;
        }

        let stats = self.get_stats().await?;
        if !stats.should_vacuum() {
            log::debug!("Skipping vacuum, {:.1}% of the database is unused", stats.unused_percentage());
            return Ok(false);
        }

        log::info!(
            "Vacuuming download database to reclaim {} bytes ({:.1}%)",
            stats.unused_size(),
            stats.unused_percentage()
        );
        self.vacuum().await?;
        Ok(true)
    }

    /// Full integrity scan; true when SQLite reports "ok"
    pub async fn check_integrity(&self) -> Result<bool> {
        let result: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&self.pool)
            .await?;

        Ok(result == "ok")
    }
}

/// Page-level statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub page_count: u64,
    pub page_size: u64,
    pub freelist_count: u64,
}

impl DatabaseStats {
    pub fn total_size(&self) -> u64 {
        self.page_count * self.page_size
    }

    pub fn unused_size(&self) -> u64 {
        self.freelist_count * self.page_size
    }

    pub fn unused_percentage(&self) -> f64 {
        let total = self.total_size();
        if total == 0 {
            0.0
        } else {
            (self.unused_size() as f64 / total as f64) * 100.0
        }
    }

    /// More than a fifth of the file is free pages
    pub fn should_vacuum(&self) -> bool {
        self.unused_percentage() > 20.0
    }
}
