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

//! Local file operations used by transfers and download verification
//!
//! - Moving finished temp files into place with retry
//! - Removing partial files
//! - Free space checks against the target volume
//! - Existence and non-empty checks for reported files

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::Disks;
use tokio::fs;
use tokio::time::sleep;

use crate::error::{Result, RipstreamError};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Move a file, replacing the destination, retrying transient failures
pub async fn safe_move(source: &Path, destination: &Path) -> Result<()> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        match try_move(source, destination).await {
            Ok(()) => return Ok(()),
            Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                return Err(RipstreamError::FileIoError(format!(
                    "Failed to move file after {} attempts: {} -> {}: {}",
                    MAX_RETRY_ATTEMPTS,
                    source.display(),
                    destination.display(),
                    e
                )));
            }
            Err(e) => {
                debug!("Move attempt {} failed: {}", attempts, e);
                sleep(RETRY_DELAY).await;
            }
        }
    }
}

async fn try_move(source: &Path, destination: &Path) -> Result<()> {
    if file_exists(destination).await {
        fs::remove_file(destination).await?;
    }

    if let Some(parent) = destination.parent() {
        ensure_directory(parent).await?;
    }

    fs::rename(source, destination).await.map_err(|e| {
        RipstreamError::FileIoError(format!(
            "Move failed: {} -> {}: {}",
            source.display(),
            destination.display(),
            e
        ))
    })
}

/// Delete a file if present; a missing file is not an error
pub async fn safe_delete(path: &Path) -> Result<()> {
    if !file_exists(path).await {
        return Ok(());
    }

    fs::remove_file(path).await.map_err(|e| {
        RipstreamError::FileIoError(format!("Delete failed: {}: {}", path.display(), e))
    })
}

/// Remove a partially written file, logging instead of failing
pub async fn discard_partial(path: &Path) {
    if let Err(e) = safe_delete(path).await {
        warn!("Could not remove partial file {}: {}", path.display(), e);
    }
}

/// Create a directory and its parents
pub async fn ensure_directory(path: &Path) -> Result<()> {
    if fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }

    fs::create_dir_all(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => RipstreamError::PermissionDenied {
            path: path.display().to_string(),
        },
        _ => RipstreamError::FileIoError(format!(
            "Failed to create directory {}: {}",
            path.display(),
            e
        )),
    })
}

pub async fn file_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

pub async fn file_size(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).await.map_err(|e| {
        RipstreamError::FileIoError(format!("Failed to get file size {}: {}", path.display(), e))
    })?;
    Ok(metadata.len())
}

/// Size of a reported file if it exists and is non-empty
pub async fn verified_size(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() && metadata.len() > 0 => Some(metadata.len()),
        _ => None,
    }
}

/// Free bytes on the volume holding `path`, if it can be determined
pub fn available_space(path: &Path) -> Option<u64> {
    let target = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Fail with `InsufficientStorage` when the volume has less than `required` bytes free
///
/// Volumes that cannot be inspected are assumed to have room.
pub async fn ensure_free_space(path: &Path, required: u64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }

    let path = path.to_path_buf();
    let available = tokio::task::spawn_blocking(move || available_space(&path))
        .await
        .map_err(|e| RipstreamError::internal(format!("Disk space check panicked: {}", e)))?;

    match available {
        Some(available) if available < required => {
            Err(RipstreamError::InsufficientStorage { required, available })
        }
        _ => Ok(()),
    }
}
