//! Shared HTTP plumbing for the source clients.
//!
//! Every client goes through [`HttpSource::get_json`], which applies the
//! per-source rate limit, maps HTTP status codes to [`SourceError`] and
//! returns the body as an untyped JSON value for the client's own parser.

use std::sync::Arc;
use std::time::{Duration, Instant};

use geosync_core::AppConfig;
use reqwest::header;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::SourceError;

/// Connection settings for one remote source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// Minimum spacing between two requests to this source.
    pub request_interval: Duration,
    /// Sent as `X-Api-Key` when present.
    pub api_key: Option<String>,
}

impl SourceConfig {
    fn from_app(config: &AppConfig, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            request_interval: config.request_interval(),
            api_key: None,
        }
    }

    pub fn listings(config: &AppConfig) -> Self {
        Self { api_key: config.listings_api_key.clone(), ..Self::from_app(config, &config.listings_base_url) }
    }

    pub fn places(config: &AppConfig) -> Self {
        Self::from_app(config, &config.places_base_url)
    }

    pub fn geocoder(config: &AppConfig) -> Self {
        Self::from_app(config, &config.geocoder_base_url)
    }

    /// Settings for tests and ad-hoc use: no rate limit, 5s timeout.
    pub fn unthrottled(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: "geosync-test/0.1".into(),
            timeout: Duration::from_secs(5),
            request_interval: Duration::ZERO,
            api_key: None,
        }
    }
}

/// Rate limiter to enforce request intervals.
#[derive(Debug)]
struct RateLimiter {
    last_request: Mutex<Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(Instant::now().checked_sub(min_interval).unwrap_or_else(Instant::now)),
            min_interval,
        }
    }

    /// Acquire permission to make a request, waiting if necessary.
    async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

/// A rate-limited JSON-over-HTTP endpoint.
#[derive(Debug, Clone)]
pub(crate) struct HttpSource {
    name: &'static str,
    http: reqwest::Client,
    config: SourceConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl HttpSource {
    pub(crate) fn new(name: &'static str, config: SourceConfig) -> Result<Self, SourceError> {
        url::Url::parse(&config.base_url).map_err(|e| SourceError::InvalidUrl(format!("{}: {e}", config.base_url)))?;

        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self { name, http, rate_limiter: Arc::new(RateLimiter::new(config.request_interval)), config })
    }

    pub(crate) fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// GET `{base}/{path}` with `query` and parse the body as JSON.
    pub(crate) async fn get_json<Q: Serialize + ?Sized>(
        &self, path: &str, query: &Q,
    ) -> Result<serde_json::Value, SourceError> {
        self.rate_limiter.acquire().await;

        let start = Instant::now();
        let url = format!("{}/{}", self.base_url(), path.trim_start_matches('/'));

        let mut request = self
            .http
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .query(query);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!(source = self.name, %status, elapsed_ms = start.elapsed().as_millis() as u64, "response");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(format!("{} returned 404 for {path}", self.name)));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(SourceError::HttpError { status: status.as_u16() });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Parse(format!("{}: {e}", self.name)))
    }
}
