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

//! Database migrations
//!
//! Migrations are plain SQL run at startup and recorded in `_migrations`,
//! so no build-time database connection is required.

use crate::error::Result;
use sqlx::{Executor, SqlitePool};

/// Create the tracking table and apply every pending migration in order
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_migrations_table(pool).await?;

    run_migration(pool, 1, "download_records", create_download_records(pool)).await?;

    Ok(())
}

async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Run a single migration if it hasn't been applied yet
async fn run_migration(
    pool: &SqlitePool,
    id: i32,
    name: &str,
    migration_fn: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let applied: Option<i32> = sqlx::query_scalar("SELECT id FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if applied.is_some() {
        return Ok(());
    }

    migration_fn.await?;

    sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;

    log::info!("Applied migration {} ({})", id, name);
    Ok(())
}

/// One row per requested download, keyed by a UUID string
async fn create_download_records(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
CREATE TABLE IF NOT EXISTS download_records (
    id TEXT PRIMARY KEY NOT NULL,

    media_type TEXT NOT NULL,
    source TEXT NOT NULL,
    source_id TEXT NOT NULL,
    source_url TEXT,

    title TEXT NOT NULL DEFAULT '',
    artist TEXT,
    album TEXT,
    album_id TEXT,

    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'downloading', 'completed', 'failed', 'cancelled')),
    progress_percentage REAL NOT NULL DEFAULT 0.0,
    file_path TEXT,
    file_size_bytes INTEGER,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,

    UNIQUE (source, source_id, media_type)
);

CREATE INDEX IF NOT EXISTS idx_download_records_status ON download_records(status);
CREATE INDEX IF NOT EXISTS idx_download_records_source ON download_records(source);
CREATE INDEX IF NOT EXISTS idx_download_records_created ON download_records(created_at);
        "#,
    )
    .await?;

    Ok(())
}
