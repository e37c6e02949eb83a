//! # dbsh-client
//!
//! Database connectivity layer for dbsh.
//!
//! This crate hides concrete databases behind a small set of traits so the
//! shell never depends on a particular driver:
//!
//! - **Drivers**: [`Driver`] opens a [`Connection`]; [`DriverManager`] finds
//!   drivers by name or URL
//! - **Statements**: [`Statement`] executes SQL and keeps the current
//!   [`ResultSet`] and update count
//! - **Result sets**: forward-only cursors with per-ordinal metadata
//! - **SQLite**: the bundled [`SqliteDriver`]
//!
//! ## Quick Start
//!
//! ```rust
//! use dbsh_client::{DriverManager, Statement};
//!
//! let drivers = DriverManager::with_defaults();
//! let driver = drivers.get("sqlite").unwrap();
//! let mut conn = driver.connect("sqlite::memory:", "sa", "").unwrap();
//!
//! let mut stmt = Statement::new();
//! let has_rows = stmt.execute(conn.as_mut(), "SELECT 1 AS one").unwrap();
//! assert!(has_rows);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;

/// Connections, statements, values and result sets.
pub mod client;

/// Driver registry and bundled drivers.
pub mod driver;

// Re-exports
pub use client::{
    ColumnInfo, Connection, DatabaseMetadata, Driver, Execution, MemoryResultSet, ResultSet,
    ResultSetMetadata, Statement, Value,
};
pub use driver::{DriverManager, SqliteConnection, SqliteDriver};
pub use error::{ClientError, ClientResult};
