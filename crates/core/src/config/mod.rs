//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (GEOSYNC_*)
//! 2. TOML config file (if GEOSYNC_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::geo::Viewport;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (GEOSYNC_*)
/// 2. TOML config file (if GEOSYNC_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite store.
    ///
    /// Set via GEOSYNC_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for every remote fetch in milliseconds.
    ///
    /// Set via GEOSYNC_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum spacing between requests to the same source, in milliseconds.
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,

    /// Base URL of the listing search API.
    #[serde(default = "default_listings_base_url")]
    pub listings_base_url: String,

    /// Optional API key sent to the listing search API.
    ///
    /// Set via GEOSYNC_LISTINGS_API_KEY environment variable.
    #[serde(default)]
    pub listings_api_key: Option<String>,

    /// Base URL of the places (POI) API.
    #[serde(default = "default_places_base_url")]
    pub places_base_url: String,

    /// Base URL of the geocoder.
    #[serde(default = "default_geocoder_base_url")]
    pub geocoder_base_url: String,

    /// Radius within which an earlier POI query covers a new one, in meters.
    #[serde(default = "default_coverage_radius_m")]
    pub coverage_radius_m: f64,

    /// Radius used to cluster a page's listing coordinates before POI fetches.
    #[serde(default = "default_batch_dedup_radius_m")]
    pub batch_dedup_radius_m: f64,

    /// How long a coverage record suppresses refetching, in seconds.
    #[serde(default = "default_coverage_ttl_secs")]
    pub coverage_ttl_secs: u64,

    /// How long a sync snapshot serves pages, in seconds.
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,

    /// Maximum concurrent POI fetches in a batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Viewport assumed when a caller does not send one.
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./geosync.sqlite")
}

fn default_user_agent() -> String {
    "geosync/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_request_interval_ms() -> u64 {
    1_000
}

fn default_listings_base_url() -> String {
    "http://127.0.0.1:8081".into()
}

fn default_places_base_url() -> String {
    "http://127.0.0.1:8082".into()
}

fn default_geocoder_base_url() -> String {
    "https://nominatim.openstreetmap.org".into()
}

fn default_coverage_radius_m() -> f64 {
    400.0
}

fn default_batch_dedup_radius_m() -> f64 {
    1_000.0
}

fn default_coverage_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_snapshot_ttl_secs() -> u64 {
    3600
}

fn default_max_concurrency() -> usize {
    4
}

fn default_viewport_width() -> u32 {
    936
}

fn default_viewport_height() -> u32 {
    925
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            request_interval_ms: default_request_interval_ms(),
            listings_base_url: default_listings_base_url(),
            listings_api_key: None,
            places_base_url: default_places_base_url(),
            geocoder_base_url: default_geocoder_base_url(),
            coverage_radius_m: default_coverage_radius_m(),
            batch_dedup_radius_m: default_batch_dedup_radius_m(),
            coverage_ttl_secs: default_coverage_ttl_secs(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            max_concurrency: default_max_concurrency(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn coverage_ttl(&self) -> Duration {
        Duration::from_secs(self.coverage_ttl_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn default_viewport(&self) -> Viewport {
        Viewport { width: self.viewport_width, height: self.viewport_height }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `GEOSYNC_`
    /// 2. TOML file from `GEOSYNC_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("GEOSYNC_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("GEOSYNC_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
