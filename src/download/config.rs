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


//! Downloader configuration
//!
//! One [`DownloadBehaviorSettings`] acts as the default policy; per-source
//! [`BehaviorOverrides`] are merged onto it field by field.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RipstreamError};
use crate::models::StreamingSource;

/// Upper bound on worker pool size
pub const MAX_WORKERS: usize = 10;

/// Worker count used when `max_connections` is not a positive number
pub const DEFAULT_WORKERS: usize = 6;

const DEFAULT_TIMEOUT_SECONDS: f64 = 120.0;
const DEFAULT_RETRY_DELAY_SECONDS: f64 = 1.0;

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    Linear,
    Exponential,
    FixedDelay,
}

/// Per-source or default transfer policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadBehaviorSettings {
    /// Per network operation, in seconds
    pub timeout_seconds: f64,
    pub chunk_size: usize,
    pub max_concurrent_chunks: usize,

    pub max_retries: u32,
    pub retry_strategy: RetryStrategy,
    /// Base delay in seconds
    pub retry_delay: f64,
    pub backoff_factor: f64,

    pub max_requests_per_second: f64,
    pub burst_size: u32,

    pub overwrite_existing: bool,
    pub create_directories: bool,
    pub temp_suffix: String,

    pub verify_checksums: bool,
    pub verify_file_size: bool,
}

impl Default for DownloadBehaviorSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            chunk_size: 8192,
            max_concurrent_chunks: 1,
            max_retries: 3,
            retry_strategy: RetryStrategy::Exponential,
            retry_delay: DEFAULT_RETRY_DELAY_SECONDS,
            backoff_factor: 2.0,
            max_requests_per_second: 10.0,
            burst_size: 5,
            overwrite_existing: false,
            create_directories: true,
            temp_suffix: ".tmp".to_string(),
            verify_checksums: true,
            verify_file_size: true,
        }
    }
}

impl DownloadBehaviorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_seconds <= 0.0 {
            return Err(RipstreamError::InvalidConfiguration("timeout must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(RipstreamError::InvalidConfiguration("chunk_size must be positive".into()));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(RipstreamError::InvalidConfiguration(
                "max_concurrent_chunks must be positive".into(),
            ));
        }
        if self.max_requests_per_second <= 0.0 {
            return Err(RipstreamError::InvalidConfiguration(
                "max_requests_per_second must be positive".into(),
            ));
        }
        if self.burst_size == 0 {
            return Err(RipstreamError::InvalidConfiguration("burst_size must be positive".into()));
        }
        if self.retry_delay < 0.0 || self.backoff_factor < 1.0 {
            return Err(RipstreamError::InvalidConfiguration(
                "retry_delay must be non-negative and backoff_factor at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Per-operation timeout; unusable values fall back to the default
    pub fn timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.timeout_seconds) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        let seconds = match self.retry_strategy {
            RetryStrategy::None => 0.0,
            RetryStrategy::Linear => self.retry_delay * f64::from(attempt + 1),
            RetryStrategy::Exponential => self.retry_delay * self.backoff_factor.powi(attempt.min(16) as i32),
            RetryStrategy::FixedDelay => self.retry_delay,
        };
        Duration::try_from_secs_f64(seconds.max(0.0))
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_RETRY_DELAY_SECONDS))
    }

    /// Apply per-source overrides
    pub fn merged_with(&self, overrides: &BehaviorOverrides) -> Self {
        let mut merged = self.clone();
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = &overrides.$field {
                    merged.$field = value.clone();
                })*
            };
        }
        merge!(
            timeout_seconds,
            chunk_size,
            max_concurrent_chunks,
            max_retries,
            retry_strategy,
            retry_delay,
            backoff_factor,
            max_requests_per_second,
            burst_size,
            overwrite_existing,
            create_directories,
            temp_suffix,
            verify_checksums,
            verify_file_size,
        );
        merged
    }
}

/// Sparse per-source overrides of [`DownloadBehaviorSettings`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorOverrides {
    pub timeout_seconds: Option<f64>,
    pub chunk_size: Option<usize>,
    pub max_concurrent_chunks: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_strategy: Option<RetryStrategy>,
    pub retry_delay: Option<f64>,
    pub backoff_factor: Option<f64>,
    pub max_requests_per_second: Option<f64>,
    pub burst_size: Option<u32>,
    pub overwrite_existing: Option<bool>,
    pub create_directories: Option<bool>,
    pub temp_suffix: Option<String>,
    pub verify_checksums: Option<bool>,
    pub verify_file_size: Option<bool>,
}

/// Service credentials, e.g. `email`/`password` or an `arl` cookie value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(HashMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Value stored base64-encoded in the settings file
    pub fn decoded(&self, key: &str) -> Result<Option<String>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(value)
            .map_err(|e| RipstreamError::invalid_input(format!("Credential '{}' is not valid base64: {}", key, e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| RipstreamError::invalid_input(format!("Credential '{}' is not UTF-8: {}", key, e)))?;
        Ok(Some(text))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| v.is_empty())
    }
}

/// Top level downloader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub download_directory: PathBuf,
    pub temp_directory: PathBuf,
    /// Put each source's files under an uppercase source folder
    pub create_source_subdirectories: bool,

    pub max_concurrent_downloads: usize,
    pub queue_size_limit: usize,
    /// Run more than one worker
    pub concurrency_enabled: bool,
    /// Requested worker count; non-positive selects the default
    pub max_connections: i32,

    pub user_agent: String,
    pub session_timeout_seconds: u64,
    pub min_free_space_mb: u64,

    pub enable_resume: bool,
    pub enable_compression: bool,
    pub verify_ssl: bool,

    pub default_behavior: DownloadBehaviorSettings,
    pub source_settings: HashMap<StreamingSource, BehaviorOverrides>,
    pub custom_headers: HashMap<String, String>,
    pub credentials: HashMap<StreamingSource, Credentials>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_directory: PathBuf::from("./downloads"),
            temp_directory: PathBuf::from("./temp"),
            create_source_subdirectories: false,
            max_concurrent_downloads: 3,
            queue_size_limit: 1000,
            concurrency_enabled: true,
            max_connections: DEFAULT_WORKERS as i32,
            user_agent: "RipStream/1.0".to_string(),
            session_timeout_seconds: 300,
            min_free_space_mb: 100,
            enable_resume: true,
            enable_compression: true,
            verify_ssl: true,
            default_behavior: DownloadBehaviorSettings::default(),
            source_settings: HashMap::new(),
            custom_headers: HashMap::new(),
            credentials: HashMap::new(),
        }
    }
}

impl DownloaderConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RipstreamError::FileIoError(format!(
                "Failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(RipstreamError::InvalidConfiguration(
                "max_concurrent_downloads must be positive".into(),
            ));
        }
        if self.queue_size_limit == 0 {
            return Err(RipstreamError::InvalidConfiguration("queue_size_limit must be positive".into()));
        }
        self.default_behavior.validate()?;
        for source in self.source_settings.keys() {
            self.behavior_for_source(*source).validate()?;
        }
        Ok(())
    }

    /// Effective behavior for a source, overrides merged onto the default
    pub fn behavior_for_source(&self, source: StreamingSource) -> DownloadBehaviorSettings {
        match self.source_settings.get(&source) {
            Some(overrides) => self.default_behavior.merged_with(overrides),
            None => self.default_behavior.clone(),
        }
    }

    pub fn add_source_setting(&mut self, source: StreamingSource, overrides: BehaviorOverrides) {
        self.source_settings.insert(source, overrides);
    }

    pub fn remove_source_setting(&mut self, source: StreamingSource) -> Option<BehaviorOverrides> {
        self.source_settings.remove(&source)
    }

    pub fn credentials_for(&self, source: StreamingSource) -> Credentials {
        self.credentials.get(&source).cloned().unwrap_or_default()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.download_directory)?;
        std::fs::create_dir_all(&self.temp_directory)?;
        Ok(())
    }

    pub fn download_path(&self, filename: &str) -> PathBuf {
        self.download_directory.join(filename)
    }

    pub fn temp_path(&self, filename: &str) -> PathBuf {
        self.temp_directory.join(filename)
    }

    /// Target directory for a source, honoring `create_source_subdirectories`
    pub fn download_directory_for(&self, source: StreamingSource) -> PathBuf {
        if self.create_source_subdirectories {
            self.download_directory.join(source.as_str().to_uppercase())
        } else {
            self.download_directory.clone()
        }
    }

    /// Worker pool size derived from the concurrency settings
    pub fn worker_count(&self) -> usize {
        if !self.concurrency_enabled {
            return 1;
        }
        if self.max_connections <= 0 {
            return DEFAULT_WORKERS;
        }
        (self.max_connections as usize).min(MAX_WORKERS)
    }

    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let behavior = DownloadBehaviorSettings::default();
        assert_eq!(behavior.chunk_size, 8192);
        assert_eq!(behavior.max_retries, 3);
        assert_eq!(behavior.retry_strategy, RetryStrategy::Exponential);
        assert!(behavior.validate().is_ok());

        let config = DownloaderConfig::default();
        assert_eq!(config.user_agent, "RipStream/1.0");
        assert_eq!(config.min_free_space_bytes(), 100 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_delays() {
        let mut behavior = DownloadBehaviorSettings {
            retry_delay: 2.0,
            backoff_factor: 3.0,
            ..Default::default()
        };
        assert_eq!(behavior.retry_delay_for(0), Duration::from_secs(2));
        assert_eq!(behavior.retry_delay_for(2), Duration::from_secs(18));

        behavior.retry_strategy = RetryStrategy::Linear;
        assert_eq!(behavior.retry_delay_for(2), Duration::from_secs(6));

        behavior.retry_strategy = RetryStrategy::FixedDelay;
        assert_eq!(behavior.retry_delay_for(5), Duration::from_secs(2));

        behavior.retry_strategy = RetryStrategy::None;
        assert_eq!(behavior.retry_delay_for(5), Duration::ZERO);
    }

    #[test]
    fn test_unvalidated_durations_fall_back_to_defaults() {
        for timeout_seconds in [-5.0, 0.0, f64::NAN, f64::INFINITY, 1e300] {
            let behavior = DownloadBehaviorSettings {
                timeout_seconds,
                ..Default::default()
            };
            assert_eq!(behavior.timeout(), Duration::from_secs(120), "timeout {}", timeout_seconds);
        }

        let behavior = DownloadBehaviorSettings {
            retry_delay: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(behavior.retry_delay_for(0), Duration::from_secs(1));

        let behavior = DownloadBehaviorSettings {
            retry_delay: -3.0,
            retry_strategy: RetryStrategy::FixedDelay,
            ..Default::default()
        };
        assert_eq!(behavior.retry_delay_for(0), Duration::ZERO);

        let behavior = DownloadBehaviorSettings {
            retry_delay: f64::NAN,
            ..Default::default()
        };
        assert_eq!(behavior.retry_delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_validation_rejects_non_positive() {
        let behavior = DownloadBehaviorSettings {
            timeout_seconds: 0.0,
            ..Default::default()
        };
        assert!(matches!(behavior.validate(), Err(RipstreamError::InvalidConfiguration(_))));

        let behavior = DownloadBehaviorSettings {
            burst_size: 0,
            ..Default::default()
        };
        assert!(behavior.validate().is_err());
    }

    #[test]
    fn test_source_overrides_merge_field_by_field() {
        let mut config = DownloaderConfig::default();
        config.add_source_setting(
            StreamingSource::Deezer,
            BehaviorOverrides {
                max_retries: Some(7),
                timeout_seconds: Some(30.0),
                ..Default::default()
            },
        );

        let deezer = config.behavior_for_source(StreamingSource::Deezer);
        assert_eq!(deezer.max_retries, 7);
        assert_eq!(deezer.timeout_seconds, 30.0);
        assert_eq!(deezer.chunk_size, 8192);

        assert_eq!(config.behavior_for_source(StreamingSource::Qobuz).max_retries, 3);
        assert!(config.remove_source_setting(StreamingSource::Deezer).is_some());
        assert_eq!(config.behavior_for_source(StreamingSource::Deezer).max_retries, 3);
    }

    #[test]
    fn test_worker_count() {
        let mut config = DownloaderConfig::default();
        config.concurrency_enabled = false;
        config.max_connections = 8;
        assert_eq!(config.worker_count(), 1);

        config.concurrency_enabled = true;
        assert_eq!(config.worker_count(), 8);
        config.max_connections = 0;
        assert_eq!(config.worker_count(), 6);
        config.max_connections = -3;
        assert_eq!(config.worker_count(), 6);
        config.max_connections = 64;
        assert_eq!(config.worker_count(), 10);
    }

    #[test]
    fn test_directories() {
        let mut config = DownloaderConfig::default();
        config.download_directory = PathBuf::from("/music");
        assert_eq!(config.download_directory_for(StreamingSource::Qobuz), PathBuf::from("/music"));
        config.create_source_subdirectories = true;
        assert_eq!(
            config.download_directory_for(StreamingSource::Qobuz),
            PathBuf::from("/music/QOBUZ")
        );
        assert_eq!(config.download_path("a.flac"), PathBuf::from("/music/a.flac"));
    }

    #[test]
    fn test_credentials_decoding() {
        let creds = Credentials::new()
            .with("email", "user@example.com")
            .with("password", "c2VjcmV0")
            .with("empty", "");
        assert_eq!(creds.get("email"), Some("user@example.com"));
        assert_eq!(creds.get("empty"), None);
        assert_eq!(creds.decoded("password").unwrap().as_deref(), Some("secret"));
        assert_eq!(creds.decoded("missing").unwrap(), None);
        assert!(creds.decoded("email").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = DownloaderConfig::default();
        config.download_directory = dir.path().join("music");
        config.max_connections = 4;
        config.credentials.insert(StreamingSource::Deezer, Credentials::new().with("arl", "abc"));
        config.add_source_setting(
            StreamingSource::Qobuz,
            BehaviorOverrides {
                retry_strategy: Some(RetryStrategy::Linear),
                ..Default::default()
            },
        );
        config.save(&path).unwrap();

        let loaded = DownloaderConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.credentials_for(StreamingSource::Deezer).get("arl"), Some("abc"));
        assert!(loaded.credentials_for(StreamingSource::Tidal).is_empty());
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_connections": 2, "default_behavior": {"max_retries": 1}}"#).unwrap();

        let loaded = DownloaderConfig::load(&path).unwrap();
        assert_eq!(loaded.worker_count(), 2);
        assert_eq!(loaded.default_behavior.max_retries, 1);
        assert_eq!(loaded.default_behavior.chunk_size, 8192);
    }
}
