//! geo_sync tool implementation.
//!
//! Creates (or reuses) a sync snapshot for a search and makes sure POIs of
//! the requested interest categories are cached around its midpoint.

use geosync_core::sync::CategoryCoverage;
use geosync_core::{BoundingBox, Coordinate, GeoSync, Poi, SearchFilters, SnapshotRequest, Viewport};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Input parameters for geo_sync tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GeoSyncParams {
    /// Free-text place, e.g. "Roma Norte, Mexico City". Geocoded when no
    /// bounding box is given.
    #[serde(default)]
    pub search_term: String,

    /// Visible map box. Takes precedence over geocoding.
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,

    /// Map viewport in pixels (default from server config).
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Listing filters; part of the snapshot identity.
    #[serde(default)]
    pub filters: SearchFilters,

    /// POI categories to cache around the snapshot, e.g. ["cafe", "gym"].
    #[serde(default)]
    pub interests: Vec<String>,
}

/// Output structure for geo_sync tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GeoSyncOutput {
    pub snapshot_id: String,
    /// Page cursors in order; pass them to geo_page.
    pub cursors: Vec<String>,
    pub bounding_box: BoundingBox,
    pub midpoint: Coordinate,
    pub zoom: u8,
    /// ISO8601 time after which the snapshot stops serving pages.
    pub expires_at: String,
    /// Cached POIs of the requested categories inside the bounding box.
    pub poi: Vec<Poi>,
    pub coverage: Vec<CategoryCoverage>,
}

/// Implementation of the geo_sync tool.
pub async fn sync_impl(engine: &GeoSync, params: GeoSyncParams) -> Result<CallToolResult, McpError> {
    let request = SnapshotRequest {
        search_term: params.search_term,
        filters: params.filters,
        bounding_box: params.bounding_box,
        viewport: params.viewport,
    };

    let outcome = engine.sync(request, &params.interests).await?;
    let snapshot = outcome.snapshot;

    json_result(&GeoSyncOutput {
        snapshot_id: snapshot.id,
        cursors: snapshot.cursors,
        bounding_box: snapshot.bounding_box,
        midpoint: snapshot.midpoint,
        zoom: snapshot.zoom,
        expires_at: snapshot.expires_at,
        poi: outcome.pois,
        coverage: outcome.coverage,
    })
}
