//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for out-of-range timeouts, radii,
    /// TTLs, concurrency or viewport sizes, and for empty base URLs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        for (field, url) in [
            ("listings_base_url", &self.listings_base_url),
            ("places_base_url", &self.places_base_url),
            ("geocoder_base_url", &self.geocoder_base_url),
        ] {
            if url.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }

        if !(self.coverage_radius_m.is_finite() && self.coverage_radius_m > 0.0) {
            return Err(invalid("coverage_radius_m", "must be a positive number of meters"));
        }
        if !self.batch_dedup_radius_m.is_finite() || self.batch_dedup_radius_m < self.coverage_radius_m {
            return Err(invalid("batch_dedup_radius_m", "must be at least coverage_radius_m"));
        }

        if self.snapshot_ttl_secs == 0 {
            return Err(invalid("snapshot_ttl_secs", "must be greater than 0"));
        }

        if !(1..=16).contains(&self.max_concurrency) {
            return Err(invalid("max_concurrency", "must be between 1 and 16"));
        }

        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(invalid("viewport", "width and height must be greater than 0"));
        }

        if self.coverage_ttl_secs == 0 {
            tracing::warn!("coverage_ttl_secs is 0; every POI lookup will refetch");
        }

        Ok(())
    }
}
