//! Connection, statement and value abstractions.
//!
//! A [`Driver`] opens a [`Connection`]; a [`Statement`] runs SQL over that
//! connection and keeps the current [`ResultSet`] and the last update count.

mod result;

pub use result::{ColumnInfo, MemoryMetadata, MemoryResultSet, ResultSet, ResultSetMetadata};

use std::fmt;

use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Value types a driver can return for a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Real(f64),
    /// Text value.
    Text(String),
    /// Binary or large-object data.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns true if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Tries to get as integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Tries to get as float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Tries to get as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Tries to get as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the storage class name of the value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(fl) => write!(f, "{}", fl),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Value::Null,
            rusqlite::types::Value::Integer(i) => Value::Integer(i),
            rusqlite::types::Value::Real(f) => Value::Real(f),
            rusqlite::types::Value::Text(s) => Value::Text(s),
            rusqlite::types::Value::Blob(b) => Value::Blob(b),
        }
    }
}

/// Outcome of executing one SQL statement.
pub enum Execution {
    /// The statement produced rows.
    Rows(Box<dyn ResultSet>),
    /// The statement changed this many rows.
    Updated(u64),
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Rows(_) => write!(f, "Rows(..)"),
            Execution::Updated(n) => write!(f, "Updated({})", n),
        }
    }
}

/// Static facts about an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseMetadata {
    /// Database product name.
    pub product_name: String,
    /// Database product version.
    pub product_version: String,
    /// Name of the driver that opened the connection.
    pub driver_name: String,
    /// Connection URL.
    pub url: String,
    /// User the connection was opened for.
    pub user: String,
}

/// A live database connection. Connections are `Send` so a termination
/// handler on another thread can close them.
pub trait Connection: Send {
    /// Executes one SQL statement.
    fn execute(&mut self, sql: &str) -> ClientResult<Execution>;

    /// Returns connection metadata.
    fn metadata(&self) -> ClientResult<DatabaseMetadata>;

    /// Lists the tables and views visible on this connection.
    fn tables(&mut self) -> ClientResult<Box<dyn ResultSet>>;

    /// Closes the connection. Closing twice is an error.
    fn close(&mut self) -> ClientResult<()>;

    /// Returns true once the connection has been closed.
    fn is_closed(&self) -> bool;
}

/// A database driver.
pub trait Driver: Send + Sync {
    /// Returns the driver identifier used on the command line.
    fn name(&self) -> &str;

    /// Returns true if the driver understands the URL.
    fn accepts_url(&self, url: &str) -> bool;

    /// Opens a connection.
    fn connect(&self, url: &str, user: &str, password: &str) -> ClientResult<Box<dyn Connection>>;
}

/// The active statement of a connection.
///
/// Holds the current result set (if the last execution produced one) and the
/// update count of the last data-changing execution.
#[derive(Default)]
pub struct Statement {
    result_set: Option<Box<dyn ResultSet>>,
    update_count: Option<u64>,
    executions: u64,
}

impl Statement {
    /// Creates an idle statement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes SQL on `conn`. Returns true when a result set is available.
    ///
    /// The previous result set is discarded before executing, even if the
    /// execution fails.
    pub fn execute(&mut self, conn: &mut dyn Connection, sql: &str) -> ClientResult<bool> {
        if conn.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        self.result_set = None;
        self.update_count = None;
        self.executions += 1;
        debug!(execution = self.executions, "executing statement");

        match conn.execute(sql)? {
            Execution::Rows(rs) => {
                self.result_set = Some(rs);
                Ok(true)
            }
            Execution::Updated(count) => {
                self.update_count = Some(count);
                Ok(false)
            }
        }
    }

    /// Replaces the current result set.
    pub fn set_result_set(&mut self, rs: Box<dyn ResultSet>) {
        self.update_count = None;
        self.result_set = Some(rs);
    }

    /// Returns the current result set.
    pub fn result_set(&self) -> Option<&dyn ResultSet> {
        self.result_set.as_deref()
    }

    /// Returns the current result set mutably.
    pub fn result_set_mut(&mut self) -> Option<&mut (dyn ResultSet + 'static)> {
        self.result_set.as_deref_mut()
    }

    /// Returns the update count of the last execution.
    pub fn update_count(&self) -> Option<u64> {
        self.update_count
    }

    /// Returns how many statements have been executed.
    pub fn executions(&self) -> u64 {
        self.executions
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("has_result_set", &self.result_set.is_some())
            .field("update_count", &self.update_count)
            .field("executions", &self.executions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedConnection {
        closed: bool,
    }

    impl Connection for ScriptedConnection {
        fn execute(&mut self, sql: &str) -> ClientResult<Execution> {
            match sql {
                "rows" => Ok(Execution::Rows(Box::new(MemoryResultSet::new(
                    vec![ColumnInfo::new("n", "INTEGER")],
                    vec![vec![Value::Integer(7)]],
                )))),
                "update" => Ok(Execution::Updated(3)),
                other => Err(ClientError::QueryFailed(format!("bad sql: {}", other))),
            }
        }

        fn metadata(&self) -> ClientResult<DatabaseMetadata> {
            Err(ClientError::Internal("unused".into()))
        }

        fn tables(&mut self) -> ClientResult<Box<dyn ResultSet>> {
            Err(ClientError::Internal("unused".into()))
        }

        fn close(&mut self) -> ClientResult<()> {
            self.closed = true;
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    #[test]
    fn test_value_conversions() {
        let int_val = Value::Integer(42);
        assert_eq!(int_val.as_i64(), Some(42));
        assert_eq!(int_val.as_f64(), Some(42.0));
        assert!(int_val.as_str().is_none());

        let text_val = Value::Text("hello".to_string());
        assert_eq!(text_val.as_str(), Some("hello"));
        assert_eq!(text_val.type_name(), "TEXT");

        assert!(Value::Null.is_null());
        assert_eq!(Value::Blob(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Real(1.5).to_string(), "1.5");
        assert_eq!(Value::Blob(vec![0; 4]).to_string(), "<4 bytes>");
    }

    #[test]
    fn test_statement_tracks_result_set_and_update_count() {
        let mut conn = ScriptedConnection { closed: false };
        let mut stmt = Statement::new();

        assert!(stmt.execute(&mut conn, "rows").unwrap());
        assert!(stmt.result_set().is_some());
        assert_eq!(stmt.update_count(), None);

        assert!(!stmt.execute(&mut conn, "update").unwrap());
        assert!(stmt.result_set().is_none());
        assert_eq!(stmt.update_count(), Some(3));

        assert!(stmt.execute(&mut conn, "nonsense").is_err());
        assert!(stmt.result_set().is_none());
        assert_eq!(stmt.executions(), 3);
    }

    #[test]
    fn test_statement_refuses_closed_connection() {
        let mut conn = ScriptedConnection { closed: true };
        let mut stmt = Statement::new();
        assert!(matches!(
            stmt.execute(&mut conn, "rows"),
            Err(ClientError::ConnectionClosed)
        ));
    }
}
