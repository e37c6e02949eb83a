//! SQLite driver backed by `rusqlite`.
//!
//! Accepted URLs: `sqlite::memory:`, `sqlite:<path>`, each optionally
//! prefixed with `jdbc:`. Queries are materialized into a
//! [`MemoryResultSet`] before returning.

use std::time::Instant;

use tracing::debug;

use crate::client::{
    ColumnInfo, Connection, DatabaseMetadata, Driver, Execution, MemoryResultSet, ResultSet, Value,
};
use crate::error::{ClientError, ClientResult};

const DRIVER_NAME: &str = "sqlite";

/// The bundled SQLite driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

impl SqliteDriver {
    /// Extracts the database location from a URL, or `None` if the URL is
    /// not a SQLite URL. An empty location means an in-memory database.
    fn location(url: &str) -> Option<&str> {
        let url = url.trim();
        let url = url.strip_prefix("jdbc:").unwrap_or(url);
        url.strip_prefix("sqlite:")
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn accepts_url(&self, url: &str) -> bool {
        Self::location(url).is_some()
    }

    fn connect(&self, url: &str, user: &str, _password: &str) -> ClientResult<Box<dyn Connection>> {
        let location = Self::location(url).ok_or_else(|| {
            ClientError::ConnectionFailed(format!("not a sqlite URL: {}", url))
        })?;

        let conn = match location {
            "" | ":memory:" => rusqlite::Connection::open_in_memory(),
            path => rusqlite::Connection::open(path),
        }
        .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        debug!(url, user, "sqlite connection opened");
        Ok(Box::new(SqliteConnection {
            conn: Some(conn),
            url: url.to_string(),
            user: user.to_string(),
        }))
    }
}

/// An open SQLite connection.
pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
    url: String,
    user: String,
}

impl SqliteConnection {
    fn handle(&self) -> ClientResult<&rusqlite::Connection> {
        self.conn.as_ref().ok_or(ClientError::ConnectionClosed)
    }

    /// Runs a row-producing statement and collects every row.
    fn materialize(stmt: &mut rusqlite::Statement<'_>) -> ClientResult<MemoryResultSet> {
        let mut columns: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), c.decl_type().unwrap_or_default().to_uppercase()))
            .collect();
        let width = columns.len();

        let mut data = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                let value: rusqlite::types::Value = row.get(index)?;
                values.push(Value::from(value));
            }
            data.push(values);
        }

        // Expressions and untyped columns have no declared type; fall back to
        // the storage class of the first non-null value.
        for (index, column) in columns.iter_mut().enumerate() {
            if column.type_name.is_empty() {
                column.type_name = data
                    .iter()
                    .map(|row| &row[index])
                    .find(|v| !v.is_null())
                    .map_or("NULL", Value::type_name)
                    .to_string();
            }
        }

        Ok(MemoryResultSet::new(columns, data))
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str) -> ClientResult<Execution> {
        let conn = self.handle()?;
        let start = Instant::now();
        let mut stmt = conn.prepare(sql)?;

        let execution = if stmt.column_count() == 0 {
            let changed = stmt.execute([])?;
            Execution::Updated(changed as u64)
        } else {
            Execution::Rows(Box::new(Self::materialize(&mut stmt)?))
        };

        debug!(elapsed_us = start.elapsed().as_micros() as u64, "sqlite statement finished");
        Ok(execution)
    }

    fn metadata(&self) -> ClientResult<DatabaseMetadata> {
        self.handle()?;
        Ok(DatabaseMetadata {
            product_name: "SQLite".to_string(),
            product_version: rusqlite::version().to_string(),
            driver_name: DRIVER_NAME.to_string(),
            url: self.url.clone(),
            user: self.user.clone(),
        })
    }

    fn tables(&mut self) -> ClientResult<Box<dyn ResultSet>> {
        let conn = self.handle()?;
        let mut stmt = conn.prepare(
            "SELECT name, type FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )?;
        Ok(Box::new(Self::materialize(&mut stmt)?))
    }

    fn close(&mut self) -> ClientResult<()> {
        let conn = self.conn.take().ok_or(ClientError::ConnectionClosed)?;
        conn.close()
            .map_err(|(_, e)| ClientError::Internal(format!("failed to close sqlite connection: {}", e)))?;
        debug!(url = %self.url, "sqlite connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}
