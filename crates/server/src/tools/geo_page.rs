//! geo_page tool implementation.

use geosync_core::sync::SyncPager;
use geosync_core::{BoundingBox, EnrichedPage, GeoSync, SnapshotState};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

/// Input parameters for geo_page tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GeoPageParams {
    /// Snapshot id returned by geo_sync.
    pub snapshot_id: String,

    /// Page cursor from the snapshot's cursor list. Omit for the first page.
    #[serde(default)]
    pub cursor: Option<String>,

    /// Marks listings this user has favorited.
    #[serde(default)]
    pub user_id: Option<String>,

    /// POI categories to cover around this page's listings.
    #[serde(default)]
    pub interests: Vec<String>,

    /// Box the map shows now. When given, the output says whether it moved
    /// away from the snapshot's box.
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Output structure for geo_page tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GeoPageOutput {
    #[serde(flatten)]
    pub page: EnrichedPage,
    pub state: SnapshotState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_resync: Option<bool>,
}

/// Implementation of the geo_page tool.
pub async fn page_impl(engine: &GeoSync, params: GeoPageParams) -> Result<CallToolResult, McpError> {
    let snapshot_id = params.snapshot_id.trim();
    if snapshot_id.is_empty() {
        return Err(ToolError::InvalidInput("snapshot_id is empty".into()).into());
    }
    let user_id = params.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty());

    let page = engine
        .page(snapshot_id, params.cursor.as_deref(), user_id, &params.interests)
        .await?;

    let needs_resync = match params.bounding_box {
        Some(bbox) => {
            let snapshot = engine.pager().live_snapshot(snapshot_id).await?;
            Some(SyncPager::needs_resync(&snapshot, &bbox))
        }
        None => None,
    };
    let state = engine.pager().state(snapshot_id).await?;

    json_result(&GeoPageOutput { page, state, needs_resync })
}
