//! MCP tool implementations.
//!
//! This module contains all tools exposed by the geosync server. Each tool
//! returns its output as pretty-printed JSON text content.

pub mod cache_purge;
pub mod geo_favorite;
pub mod geo_page;
pub mod geo_sync;

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

use crate::error::ToolError;

pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(|e| ToolError::OutputFailed(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
