//! Structured errors for the geosync MCP tools.
//!
//! Engine failures arrive as `geosync_core::Error` and convert on their own;
//! these cover what the tool layer itself rejects.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid input parameters (e.g., empty snapshot id).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A tool result could not be serialized.
    #[error("OUTPUT_FAILED: {0}")]
    OutputFailed(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::InvalidInput(_) => -32602,
            ToolError::OutputFailed(_) => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
