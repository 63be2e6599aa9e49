//! Source client error types.

use std::sync::Arc;

use geosync_core::Error;

/// Errors from the HTTP source clients.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Base URL could not be parsed.
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    /// Request parameters the remote would reject.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The remote has nothing for this request.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limited by the remote.
    #[error("rate limited: too many requests")]
    RateLimited,

    /// HTTP error response.
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response body was not the expected shape at all.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { SourceError::Timeout } else { SourceError::Network(Arc::new(err)) }
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(what) => Error::NotFound(what),
            SourceError::InvalidUrl(msg) | SourceError::InvalidRequest(msg) => Error::InvalidArgument(msg),
            other => Error::UpstreamUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SourceError::HttpError { status: 503 };
        assert!(err.to_string().contains("503"));

        let err = SourceError::InvalidRequest("adults must be at least 1".to_string());
        assert!(err.to_string().contains("invalid request"));
    }

    #[test]
    fn test_into_core_error() {
        assert!(matches!(Error::from(SourceError::NotFound("x".into())), Error::NotFound(_)));
        assert!(matches!(Error::from(SourceError::Timeout), Error::UpstreamUnavailable(_)));
        assert!(matches!(Error::from(SourceError::RateLimited), Error::UpstreamUnavailable(_)));
        assert!(matches!(Error::from(SourceError::InvalidUrl("bad".into())), Error::InvalidArgument(_)));
    }
}
