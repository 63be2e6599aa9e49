//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use crate::tools::cache_purge::{CachePurgeParams, purge_impl};
use crate::tools::geo_favorite::{GeoFavoriteParams, favorite_impl};
use crate::tools::geo_page::{GeoPageParams, page_impl};
use crate::tools::geo_sync::{GeoSyncParams, sync_impl};

use geosync_core::GeoSync;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for geosync.
#[derive(Clone)]
pub struct GeoSyncServer {
    engine: GeoSync,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl GeoSyncServer {
    /// Create a new server handler around a wired engine.
    pub fn new(engine: GeoSync) -> Self {
        Self { engine, tool_router: Self::tool_router() }
    }

    /// Snapshot a map search and cache POIs around it.
    ///
    /// Repeating the same search while its snapshot is live returns the same
    /// snapshot id without calling the listing source again.
    #[tool(
        description = "Snapshot a listing search for a place or map box. Returns snapshot id, page cursors, midpoint, zoom and cached POIs for the given interests."
    )]
    async fn geo_sync(&self, params: Parameters<GeoSyncParams>) -> Result<CallToolResult, McpError> {
        sync_impl(&self.engine, params.0).await
    }

    /// Read one page of a snapshot with favorites and nearest-POI distances.
    #[tool(
        description = "Get one page of listings from a snapshot, marked with favorites and distance to the nearest POI."
    )]
    async fn geo_page(&self, params: Parameters<GeoPageParams>) -> Result<CallToolResult, McpError> {
        page_impl(&self.engine, params.0).await
    }

    #[tool(description = "Add or remove a listing from a user's favorites.")]
    async fn geo_favorite(&self, params: Parameters<GeoFavoriteParams>) -> Result<CallToolResult, McpError> {
        favorite_impl(&self.engine, params.0).await
    }

    /// Purge expired snapshots and stale coverage.
    #[tool(description = "Remove expired snapshots and stale POI coverage records from the local store.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(&self.engine, params.0).await
    }
}

impl ServerHandler for GeoSyncServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "geosync".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::engine;

    #[tokio::test]
    async fn test_lists_all_tools() {
        let (engine, _) = engine().await;
        let server = GeoSyncServer::new(engine);
        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["cache_purge", "geo_favorite", "geo_page", "geo_sync"]);
    }

    #[tokio::test]
    async fn test_server_info() {
        let (engine, _) = engine().await;
        let info = GeoSyncServer::new(engine).get_info();
        assert_eq!(info.server_info.name, "geosync");
        assert!(info.capabilities.tools.is_some());
    }
}
