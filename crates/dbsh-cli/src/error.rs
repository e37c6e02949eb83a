//! Error types for the shell.
//!
//! Only [`ShellError::Argument`] and a startup [`ShellError::Connection`] are
//! allowed to end the process; everything else is reported by the shell loop
//! and the loop keeps going.

use thiserror::Error;

use dbsh_client::ClientError;

/// Result type for shell operations.
pub type ShellResult<T> = std::result::Result<T, ShellError>;

/// Errors raised by the shell.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Unknown or malformed option.
    #[error("argument error: {0}")]
    Argument(String),

    /// The driver failed to open a connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// Statement execution failed.
    #[error("sql error: {0}")]
    Sql(String),

    /// An expression failed to compile.
    #[error("compile error: {0}")]
    Compile(String),

    /// An expression failed while running.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// A transformer failed on a single cell.
    #[error("transform error: {0}")]
    Transform(String),

    /// Console, transcript or file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Creates an argument error.
    pub fn argument(msg: impl Into<String>) -> Self {
        ShellError::Argument(msg.into())
    }

    /// Creates a compile error.
    pub fn compile(msg: impl Into<String>) -> Self {
        ShellError::Compile(msg.into())
    }

    /// Creates an evaluation error.
    pub fn evaluation(msg: impl Into<String>) -> Self {
        ShellError::Evaluation(msg.into())
    }

    /// Returns true for errors that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::Argument(_) | ShellError::Connection(_))
    }
}

impl From<ClientError> for ShellError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ConnectionFailed(msg) => ShellError::Connection(msg),
            ClientError::UnknownDriver(name) => {
                ShellError::Connection(format!("no driver registered for '{}'", name))
            }
            other => ShellError::Sql(other.to_string()),
        }
    }
}
