//! Error types for the connectivity layer.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Statement execution failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Column ordinal out of range.
    #[error("no column at ordinal {0}")]
    NoSuchColumn(usize),

    /// The cursor is not positioned on a row.
    #[error("result set is not positioned on a row")]
    NoCurrentRow,

    /// No registered driver matches the name or URL.
    #[error("no driver registered for '{0}'")]
    UnknownDriver(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

impl From<rusqlite::Error> for ClientError {
    fn from(err: rusqlite::Error) -> Self {
        ClientError::QueryFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(ClientError::ConnectionClosed.to_string(), "connection closed");
        assert_eq!(
            ClientError::NoSuchColumn(4).to_string(),
            "no column at ordinal 4"
        );
        assert_eq!(
            ClientError::UnknownDriver("oracle".into()).to_string(),
            "no driver registered for 'oracle'"
        );
    }
}
