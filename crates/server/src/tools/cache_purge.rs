//! cache_purge tool implementation.
//!
//! Removes expired snapshots (with their pages) and coverage records older
//! than the coverage TTL. Listings, POIs and favorites are kept.

use geosync_core::GeoSync;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

fn default_true() -> bool {
    true
}

/// Input parameters for cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Purge expired snapshots (default: true)
    #[serde(default = "default_true")]
    pub snapshots: bool,

    /// Purge stale coverage records (default: true)
    #[serde(default = "default_true")]
    pub coverage: bool,
}

impl Default for CachePurgeParams {
    fn default() -> Self {
        Self { snapshots: true, coverage: true }
    }
}

/// Output structure for cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    pub snapshots_deleted: u64,
    pub coverage_deleted: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(engine: &GeoSync, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    if !params.snapshots && !params.coverage {
        return Err(ToolError::InvalidInput("nothing to purge: snapshots and coverage are both false".into()).into());
    }

    let snapshots_deleted = if params.snapshots { engine.purge_snapshots().await? } else { 0 };
    let coverage_deleted = if params.coverage { engine.purge_coverage().await? } else { 0 };

    json_result(&CachePurgeOutput { snapshots_deleted, coverage_deleted })
}
