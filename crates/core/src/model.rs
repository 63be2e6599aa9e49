//! Domain records shared by the store, the sources and the sync engine.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geo::{BoundingBox, Coordinate, Viewport};

/// Render a timestamp the way every table stores it.
///
/// A fixed width keeps lexical and chronological order identical in SQL.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Search filters forwarded to the listing source.
///
/// Part of a snapshot's identity, so field order must stay stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adults: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// A listing as scraped from the listing source.
///
/// `external_id` is stable across refetches; price, rating and images may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Listing {
    pub external_id: String,
    pub name: String,
    pub price: Option<f64>,
    pub rating_label: Option<String>,
    pub coordinate: Coordinate,
    pub images: Vec<String>,
    pub link: String,
}

/// A point of interest for one interest category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Poi {
    /// Hex SHA-256 of the source's place identifier.
    pub external_id: String,
    pub category: String,
    pub name: String,
    pub coordinate: Coordinate,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub link: Option<String>,
}

/// Result of an idempotent batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertStats {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

/// An immutable view of one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SyncSnapshot {
    pub id: String,
    /// Hash of (search term, filters, rounded box); shared by snapshots of the same search.
    pub key: String,
    pub search_term: String,
    pub filters: SearchFilters,
    pub bounding_box: BoundingBox,
    pub viewport: Viewport,
    pub midpoint: Coordinate,
    pub zoom: u8,
    /// Opaque page cursors in source order; the first one is page 0.
    pub cursors: Vec<String>,
    pub created_at: String,
    pub expires_at: String,
}

impl SyncSnapshot {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= timestamp(now)
    }

    pub fn first_cursor(&self) -> &str {
        self.cursors.first().map(String::as_str).unwrap_or(FIRST_PAGE_CURSOR)
    }

    /// The cursor after `cursor`, if any.
    pub fn next_cursor(&self, cursor: &str) -> Option<&str> {
        let position = self.cursors.iter().position(|c| c == cursor)?;
        self.cursors.get(position + 1).map(String::as_str)
    }
}

/// Cursor given to page 0 when the source returns no cursor list.
pub const FIRST_PAGE_CURSOR: &str = "0";

/// Lifecycle of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    /// Cursors known, only the first page materialized.
    Created,
    /// At least one page beyond the first is cached.
    PagesPartiallyLoaded,
    /// TTL elapsed; terminal.
    Expired,
}

/// One page of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Page {
    pub snapshot_id: String,
    pub cursor: String,
    pub listings: Vec<Listing>,
    pub next_cursor: Option<String>,
}

/// The closest persisted POI to some coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NearestPoi {
    pub external_id: String,
    pub distance_meters: f64,
}

/// A listing with read-time computed fields. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedListing {
    #[serde(flatten)]
    pub listing: Listing,
    /// Absent when no POI is persisted at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nearest_poi_distance_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nearest_poi_id: Option<String>,
    pub is_favorited: bool,
}
