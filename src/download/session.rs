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


//! Pooled HTTP sessions shared by providers and workers
//!
//! One [`HttpSession`] per streaming source, each with its own connection
//! pool, cookie jar and request rate limiter. Sessions are created lazily
//! and handed out as `Arc`s so any number of workers can borrow them.
//!
//! # Status mapping
//! - 401 → `AuthenticationFailed`
//! - 403 → `PermissionDenied`
//! - 404 → `ContentNotFound`
//! - 429 → `RateLimitExceeded` (with `Retry-After`)
//! - 5xx and other failures → `NetworkError` with status
//! - client timeouts → `DownloadTimeout`

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::debug;
use reqwest::cookie::Jar;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED,
    RANGE, RETRY_AFTER,
};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::download::config::{DownloadBehaviorSettings, DownloaderConfig};
use crate::error::{Result, RipstreamError};
use crate::models::StreamingSource;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a HEAD request revealed about a remote asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub supports_ranges: bool,
}

impl ContentInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            size: text(CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            content_type: text(CONTENT_TYPE),
            etag: text(ETAG),
            last_modified: text(LAST_MODIFIED),
            supports_ranges: text(ACCEPT_RANGES)
                .map(|v| v.eq_ignore_ascii_case("bytes"))
                .unwrap_or(false),
        }
    }
}

/// Rate limited HTTP client for one streaming source
pub struct HttpSession {
    source: StreamingSource,
    client: Client,
    cookie_jar: Arc<Jar>,
    rate_limiter: DefaultDirectRateLimiter,
    timeout: Duration,
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession")
            .field("source", &self.source)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpSession {
    pub fn new(
        source: StreamingSource,
        config: &DownloaderConfig,
        behavior: &DownloadBehaviorSettings,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RipstreamError::InvalidConfiguration(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RipstreamError::InvalidConfiguration(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let cookie_jar = Arc::new(Jar::default());
        let timeout = behavior.timeout();

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .pool_idle_timeout(Duration::from_secs(config.session_timeout_seconds))
            .gzip(config.enable_compression)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .cookie_provider(Arc::clone(&cookie_jar))
            .build()?;

        Ok(Self {
            source,
            client,
            cookie_jar,
            rate_limiter: RateLimiter::direct(rate_quota(behavior)?),
            timeout,
        })
    }

    pub fn source(&self) -> StreamingSource {
        self.source
    }

    /// Store a cookie for requests to `url`
    pub fn add_cookie(&self, name: &str, value: &str, url: &str) -> Result<()> {
        let url = Url::parse(url)?;
        self.cookie_jar.add_cookie_str(&format!("{}={}", name, value), &url);
        Ok(())
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        let request = self.client.get(url);
        self.execute(request, url).await
    }

    /// GET starting at byte `start`
    pub async fn get_from(&self, url: &str, start: u64) -> Result<Response> {
        let request = self.client.get(url).header(RANGE, format!("bytes={}-", start));
        self.execute(request, url).await
    }

    pub async fn head(&self, url: &str) -> Result<Response> {
        let request = self.client.head(url);
        self.execute(request, url).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        response.json::<T>().await.map_err(|e| self.map_transport_error(e))
    }

    pub async fn content_info(&self, url: &str) -> Result<ContentInfo> {
        let response = self.head(url).await?;
        Ok(ContentInfo::from_headers(response.headers()))
    }

    async fn execute(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Response> {
        self.rate_limiter.until_ready().await;
        debug!("{} request: {}", self.source, url);

        let response = request.send().await.map_err(|e| self.map_transport_error(e))?;
        check_status(response, url)
    }

    pub(crate) fn map_transport_error(&self, error: reqwest::Error) -> RipstreamError {
        if error.is_timeout() {
            RipstreamError::DownloadTimeout {
                seconds: self.timeout.as_secs().max(1),
            }
        } else {
            RipstreamError::NetworkError {
                message: error.to_string(),
                status_code: error.status().map(|s| s.as_u16()),
            }
        }
    }
}

fn rate_quota(behavior: &DownloadBehaviorSettings) -> Result<Quota> {
    let invalid = || {
        RipstreamError::InvalidConfiguration(format!(
            "Invalid rate limit: {} requests/s, burst {}",
            behavior.max_requests_per_second, behavior.burst_size
        ))
    };

    if behavior.max_requests_per_second <= 0.0 {
        return Err(invalid());
    }
    let period = Duration::try_from_secs_f64(1.0 / behavior.max_requests_per_second).map_err(|_| invalid())?;
    let burst = NonZeroU32::new(behavior.burst_size).ok_or_else(invalid)?;
    Ok(Quota::with_period(period).ok_or_else(invalid)?.allow_burst(burst))
}

/// Convert non-success statuses into typed errors
pub fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(status_error(status, response.headers(), url))
}

pub(crate) fn status_error(status: StatusCode, headers: &HeaderMap, url: &str) -> RipstreamError {
    match status {
        StatusCode::UNAUTHORIZED => RipstreamError::AuthenticationFailed {
            message: format!("Unauthorized request to {}", url),
            source_name: host_of(url),
        },
        StatusCode::FORBIDDEN => RipstreamError::PermissionDenied {
            path: url.to_string(),
        },
        StatusCode::NOT_FOUND => RipstreamError::ContentNotFound {
            content_id: url.to_string(),
            source_name: Some(host_of(url)),
        },
        StatusCode::TOO_MANY_REQUESTS => RipstreamError::RateLimitExceeded {
            retry_after_seconds: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
        },
        status if status.is_server_error() => {
            RipstreamError::http_status(format!("Server error {} from {}", status, url), status.as_u16())
        }
        status => RipstreamError::http_status(format!("HTTP {} from {}", status, url), status.as_u16()),
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Lazily created per-source sessions
pub struct SessionManager {
    config: DownloaderConfig,
    sessions: Mutex<HashMap<StreamingSource, Arc<HttpSession>>>,
}

impl SessionManager {
    pub fn new(config: DownloaderConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Get or create the session for a source
    pub async fn get_session(&self, source: StreamingSource) -> Result<Arc<HttpSession>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&source) {
            return Ok(Arc::clone(session));
        }

        let behavior = self.config.behavior_for_source(source);
        let session = Arc::new(HttpSession::new(source, &self.config, &behavior)?);
        sessions.insert(source, Arc::clone(&session));
        debug!("Created HTTP session for {}", source);
        Ok(session)
    }

    /// HEAD an asset through the source's session
    pub async fn get_content_info(&self, source: StreamingSource, url: &str) -> Result<ContentInfo> {
        self.get_session(source).await?.content_info(url).await
    }

    pub async fn close_session(&self, source: StreamingSource) -> bool {
        self.sessions.lock().await.remove(&source).is_some()
    }

    pub async fn close_all_sessions(&self) {
        self.sessions.lock().await.clear();
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_info_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1048576"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("audio/flac"));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));

        let info = ContentInfo::from_headers(&headers);
        assert_eq!(info.size, Some(1_048_576));
        assert_eq!(info.content_type.as_deref(), Some("audio/flac"));
        assert!(info.supports_ranges);
        assert_eq!(info.etag.as_deref(), Some("\"abc\""));
        assert_eq!(ContentInfo::from_headers(&HeaderMap::new()), ContentInfo::default());
    }

    #[test]
    fn test_status_mapping() {
        let url = "https://cdn.example.com/a.mp3";
        let empty = HeaderMap::new();

        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, &empty, url),
            RipstreamError::AuthenticationFailed { ref source_name, .. } if source_name == "cdn.example.com"
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, &empty, url),
            RipstreamError::PermissionDenied { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, &empty, url),
            RipstreamError::ContentNotFound { .. }
        ));

        let mut retry = HeaderMap::new();
        retry.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        let limited = status_error(StatusCode::TOO_MANY_REQUESTS, &retry, url);
        assert_eq!(limited.retry_after_seconds(), Some(12));
        assert!(limited.is_retryable());

        let server = status_error(StatusCode::BAD_GATEWAY, &empty, url);
        assert!(matches!(server, RipstreamError::NetworkError { status_code: Some(502), .. }));
        assert!(server.is_retryable());

        let teapot = status_error(StatusCode::IM_A_TEAPOT, &empty, url);
        assert!(!teapot.is_retryable());
    }

    #[test]
    fn test_rate_quota_validation() {
        let behavior = DownloadBehaviorSettings::default();
        assert!(rate_quota(&behavior).is_ok());

        let zero_burst = DownloadBehaviorSettings {
            burst_size: 0,
            ..Default::default()
        };
        assert!(rate_quota(&zero_burst).is_err());

        let unset_rate = DownloadBehaviorSettings {
            max_requests_per_second: f64::NAN,
            ..Default::default()
        };
        assert!(rate_quota(&unset_rate).is_err());
    }

    #[tokio::test]
    async fn test_sessions_are_reused_per_source() {
        let manager = SessionManager::new(DownloaderConfig::default());
        let a = manager.get_session(StreamingSource::Deezer).await.unwrap();
        let b = manager.get_session(StreamingSource::Deezer).await.unwrap();
        let c = manager.get_session(StreamingSource::Qobuz).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(manager.active_sessions().await, 2);

        assert!(manager.close_session(StreamingSource::Deezer).await);
        assert!(!manager.close_session(StreamingSource::Deezer).await);
        manager.close_all_sessions().await;
        assert_eq!(manager.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_custom_header_is_rejected() {
        let mut config = DownloaderConfig::default();
        config.custom_headers.insert("bad header".into(), "x".into());
        let manager = SessionManager::new(config);
        assert!(matches!(
            manager.get_session(StreamingSource::Tidal).await,
            Err(RipstreamError::InvalidConfiguration(_))
        ));
    }
}
