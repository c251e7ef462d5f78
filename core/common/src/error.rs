//! Common error types for notemirror.

use thiserror::Error;

/// Top-level error type for notemirror operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be carried out by the transport.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote side is temporarily unable to answer (500, 504, timeout).
    ///
    /// The affected node is skipped for this run and retried on the next one.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The remote side answered with an unexpected status code.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A page's level cannot be attached to any ancestor page.
    #[error("Malformed hierarchy: {0}")]
    MalformedHierarchy(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the failure only makes the node unavailable for this run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Unavailable("504".to_string()).is_transient());
        assert!(!Error::Http {
            status: 403,
            message: "forbidden".to_string()
        }
        .is_transient());
        assert!(!Error::MalformedResponse("no value".to_string()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_http_error_display() {
        let err = Error::Http {
            status: 404,
            message: "20102: The specified resource ID does not exist.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 404: 20102: The specified resource ID does not exist."
        );
    }
}
