//! Unified error types for geosync.
//!
//! Every variant maps to a JSON-RPC error code for the MCP layer.

use std::sync::Arc;

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the geosync engine.
///
/// The type is `Clone` so a single in-flight fetch can hand the same failure
/// to every waiter; non-cloneable sources are held behind `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Unresolvable search term, unknown snapshot or unknown cursor.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// A remote fetch failed or timed out.
    #[error("UPSTREAM_UNAVAILABLE: {0}")]
    UpstreamUnavailable(String),

    /// The snapshot's TTL elapsed.
    #[error("EXPIRED: {0}")]
    Expired(String),

    /// Structurally impossible input (e.g. `ne_lat < sw_lat`).
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(Arc<tokio_rusqlite::Error>),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored JSON column could not be decoded.
    #[error("STORE_ERROR: corrupt record: {0}")]
    Corrupt(String),
}

impl Error {
    /// Whether the failure came from a remote source rather than local state.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::UpstreamUnavailable(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => {
                Error::Database(Arc::new(tokio_rusqlite::Error::ConnectionClosed))
            }
            tokio_rusqlite::Error::Close(c) => Error::Database(Arc::new(tokio_rusqlite::Error::Close(c))),
            _ => Error::Database(Arc::new(tokio_rusqlite::Error::ConnectionClosed)),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(Arc::new(err))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(Arc::new(tokio_rusqlite::Error::Error(err)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidArgument(msg) => (-32602, msg.clone()),
            Error::NotFound(msg) => (-32001, msg.clone()),
            Error::UpstreamUnavailable(msg) => (-32003, format!("upstream unavailable, try again: {msg}")),
            Error::Expired(msg) => (-32004, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::Corrupt(msg) => (-32002, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("cursor abc".to_string());
        assert!(err.to_string().contains("NOT_FOUND"));
        assert!(err.to_string().contains("cursor abc"));
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::Expired("snapshot 42".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32004);

        let mcp_err: McpError = Error::InvalidArgument("bad box".into()).into();
        assert_eq!(mcp_err.code.0, -32602);
    }

    #[test]
    fn test_upstream_message_suggests_retry() {
        let mcp_err: McpError = Error::UpstreamUnavailable("timeout".into()).into();
        assert!(mcp_err.message.contains("try again"));
    }

    #[test]
    fn test_database_error_is_cloneable() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
