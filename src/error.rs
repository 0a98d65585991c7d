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


//! Error types for the download engine
//!
//! # Error Categories
//!
//! ### Transfer
//! - `NetworkError` - transport or HTTP failure, optionally with a status code
//! - `DownloadTimeout` - an operation exceeded the configured timeout
//! - `RateLimitExceeded` - service-imposed throttling
//! - `RetryExhausted` - every configured attempt failed; wraps the last error
//!
//! ### Content
//! - `InvalidContent` - fetched content failed validation
//! - `ContentNotFound` - requested id does not exist upstream
//! - `ChecksumMismatch` / `FileSizeMismatch` - integrity checks failed
//!
//! ### Local storage
//! - `InsufficientStorage` - target volume lacks free space
//! - `PermissionDenied` - filesystem write denied
//!
//! ### Validation (never retried)
//! - `InvalidUrl`, `UnsupportedService`, `UnsupportedContentType`,
//!   `InvalidInput`, `InvalidConfiguration`

use thiserror::Error;

/// Result type alias using our RipstreamError type
pub type Result<T> = std::result::Result<T, RipstreamError>;

/// Main error type for the download engine
#[derive(Error, Debug)]
pub enum RipstreamError {
    // ===== Network Errors =====

    /// Transport or HTTP level failure
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
    },

    /// Operation exceeded the configured timeout
    #[error("Download timed out after {seconds} seconds")]
    DownloadTimeout { seconds: u64 },

    /// Service-imposed throttling (HTTP 429)
    #[error("Rate limit exceeded{}", retry_hint(.retry_after_seconds))]
    RateLimitExceeded {
        /// Retry-After hint from the service
        retry_after_seconds: Option<u64>,
    },

    /// All configured attempts failed
    #[error("Download failed after {retry_count} retries: {last_error}")]
    RetryExhausted {
        retry_count: u32,
        last_error: Box<RipstreamError>,
    },

    // ===== Authentication Errors =====

    /// Credentials were rejected by the service
    #[error("Authentication failed for {source_name}: {message}")]
    AuthenticationFailed {
        message: String,
        source_name: String,
    },

    // ===== Content Errors =====

    /// Fetched content failed validation
    #[error("Invalid content: {message}")]
    InvalidContent {
        message: String,
        content_type: Option<String>,
    },

    /// Requested id does not exist upstream
    #[error("Content not found: {content_id}{}", source_hint(.source_name))]
    ContentNotFound {
        content_id: String,
        source_name: Option<String>,
    },

    /// Checksum of the downloaded file does not match the expected value
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Size of the downloaded file does not match the expected value
    #[error("File size mismatch: expected {expected} bytes, got {actual} bytes")]
    FileSizeMismatch { expected: u64, actual: u64 },

    // ===== File System Errors =====

    /// Target volume lacks required free space
    #[error("Insufficient storage: need {required} bytes, have {available} bytes")]
    InsufficientStorage { required: u64, available: u64 },

    /// Filesystem write denied
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    /// Generic file I/O error
    #[error("File I/O error: {0}")]
    FileIoError(String),

    // ===== Validation Errors =====

    /// URL could not be parsed or resolved to a content item
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No provider is registered for the requested service
    #[error("Unsupported streaming service: {service}. Supported services: {supported}")]
    UnsupportedService { service: String, supported: String },

    /// Provider does not handle the requested content type
    #[error("Unsupported content type for {provider} provider: {content_type}")]
    UnsupportedContentType {
        content_type: String,
        provider: String,
    },

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== Database Errors =====

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Record lookup failed
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // ===== General Errors =====

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not happen
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
}

fn retry_hint(retry_after_seconds: &Option<u64>) -> String {
    retry_after_seconds
        .map(|s| format!(". Retry after {} seconds", s))
        .unwrap_or_default()
}

fn source_hint(source_name: &Option<String>) -> String {
    source_name
        .as_ref()
        .map(|s| format!(" on {}", s))
        .unwrap_or_default()
}

impl RipstreamError {
    /// Create a network error without a status code
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::NetworkError {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a network error carrying an HTTP status
    pub fn http_status<S: Into<String>>(message: S, status_code: u16) -> Self {
        Self::NetworkError {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn auth_failed<M: Into<String>, S: Into<String>>(message: M, source_name: S) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
            source_name: source_name.into(),
        }
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::InternalError(message.into())
    }

    /// Check if this error may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { status_code, .. } => match status_code {
                Some(code) => *code >= 500 || *code == 408,
                None => true,
            },
            Self::DownloadTimeout { .. }
            | Self::RateLimitExceeded { .. }
            | Self::ChecksumMismatch { .. }
            | Self::FileSizeMismatch { .. } => true,
            Self::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Check if this error is a caller or configuration mistake
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::UnsupportedService { .. }
                | Self::UnsupportedContentType { .. }
                | Self::InvalidInput(_)
                | Self::InvalidConfiguration(_)
        )
    }

    /// Check if this error requires new credentials
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    /// Get retry delay for rate limit errors
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded {
                retry_after_seconds,
            } => *retry_after_seconds,
            Self::RetryExhausted { last_error, .. } => last_error.retry_after_seconds(),
            _ => None,
        }
    }

    /// Get a user-facing message
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthenticationFailed { source_name, .. } => {
                format!("Could not sign in to {}. Please check your credentials.", source_name)
            }
            Self::InsufficientStorage { required, available } => format!(
                "Not enough disk space. Need {} MB, only {} MB available.",
                required / 1_048_576,
                available / 1_048_576
            ),
            Self::RateLimitExceeded {
                retry_after_seconds: Some(seconds),
            } => format!(
                "The service is throttling requests. Please wait {} seconds before trying again.",
                seconds
            ),
            Self::ContentNotFound { content_id, .. } => {
                format!("The requested item ({}) could not be found.", content_id)
            }
            Self::PermissionDenied { path } => {
                format!("Cannot write to {}. Check folder permissions.", path)
            }
            Self::RetryExhausted { last_error, .. } => last_error.user_message(),
            _ => self.to_string(),
        }
    }
}
