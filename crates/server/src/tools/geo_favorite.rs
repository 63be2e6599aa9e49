//! geo_favorite tool implementation.

use geosync_core::GeoSync;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::error::ToolError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteAction {
    #[default]
    Add,
    Remove,
}

/// Input parameters for geo_favorite tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GeoFavoriteParams {
    pub user_id: String,
    /// Listing external id as returned by geo_page.
    pub listing_id: String,
    /// "add" (default) or "remove".
    #[serde(default)]
    pub action: FavoriteAction,
}

/// Output structure for geo_favorite tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GeoFavoriteOutput {
    /// Whether the listing is a favorite after the call.
    pub favorited: bool,
    /// False when the call was a no-op.
    pub changed: bool,
}

/// Implementation of the geo_favorite tool.
pub async fn favorite_impl(engine: &GeoSync, params: GeoFavoriteParams) -> Result<CallToolResult, McpError> {
    let user_id = params.user_id.trim();
    let listing_id = params.listing_id.trim();
    if user_id.is_empty() || listing_id.is_empty() {
        return Err(ToolError::InvalidInput("user_id and listing_id are required".into()).into());
    }

    let output = match params.action {
        FavoriteAction::Add => {
            let changed = engine.db().add_favorite(user_id, listing_id).await?;
            GeoFavoriteOutput { favorited: true, changed }
        }
        FavoriteAction::Remove => {
            let changed = engine.db().remove_favorite(user_id, listing_id).await?;
            GeoFavoriteOutput { favorited: false, changed }
        }
    };
    tracing::debug!(user_id, listing_id, action = ?params.action, changed = output.changed, "favorite updated");

    json_result(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{engine, output};
    use geosync_core::FavoritesStore;
    use rmcp::model::ErrorCode;

    fn params(action: FavoriteAction) -> GeoFavoriteParams {
        GeoFavoriteParams { user_id: "ana".into(), listing_id: "l1".into(), action }
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let (engine, _) = engine().await;

        let first: GeoFavoriteOutput = output(&favorite_impl(&engine, params(FavoriteAction::Add)).await.unwrap());
        assert!(first.favorited && first.changed);

        let second: GeoFavoriteOutput = output(&favorite_impl(&engine, params(FavoriteAction::Add)).await.unwrap());
        assert!(second.favorited);
        assert!(!second.changed);

        let ids = engine.db().list_favorite_ids("ana").await.unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let (engine, _) = engine().await;
        favorite_impl(&engine, params(FavoriteAction::Add)).await.unwrap();

        let out: GeoFavoriteOutput = output(&favorite_impl(&engine, params(FavoriteAction::Remove)).await.unwrap());
        assert!(!out.favorited && out.changed);

        let again: GeoFavoriteOutput =
            output(&favorite_impl(&engine, params(FavoriteAction::Remove)).await.unwrap());
        assert!(!again.changed);
    }

    #[test]
    fn test_action_defaults_to_add() {
        let params: GeoFavoriteParams = serde_json::from_str(r#"{"user_id":"a","listing_id":"b"}"#).unwrap();
        assert_eq!(params.action, FavoriteAction::Add);
    }

    #[tokio::test]
    async fn test_blank_ids_rejected() {
        let (engine, _) = engine().await;
        let params = GeoFavoriteParams { user_id: " ".into(), listing_id: "l1".into(), ..Default::default() };
        let err = favorite_impl(&engine, params).await.unwrap_err();
        assert_eq!(err.code, ErrorCode(-32602));
    }
}
