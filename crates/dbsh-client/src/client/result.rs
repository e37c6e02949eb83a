//! Result sets and their metadata.
//!
//! Ordinals are 1-based throughout, matching the convention most database
//! connectivity APIs use. Metadata probing past the last column fails, which
//! is how callers discover the column count without trusting a separate
//! "how many columns" call.

use super::Value;
use crate::error::{ClientError, ClientResult};

/// Column names and type names of a result set.
pub trait ResultSetMetadata {
    /// Returns the name of the column at `ordinal`.
    fn column_name(&self, ordinal: usize) -> ClientResult<&str>;

    /// Returns the database type name of the column at `ordinal`.
    fn column_type_name(&self, ordinal: usize) -> ClientResult<&str>;
}

/// A forward-only cursor over rows.
pub trait ResultSet {
    /// Returns the column metadata.
    fn metadata(&self) -> &dyn ResultSetMetadata;

    /// Advances to the next row. Returns `false` once exhausted.
    fn next(&mut self) -> ClientResult<bool>;

    /// Reads the value at `ordinal` in the current row.
    fn get(&self, ordinal: usize) -> ClientResult<Value>;
}

/// Name and type of a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column label.
    pub name: String,
    /// Database type name.
    pub type_name: String,
}

impl ColumnInfo {
    /// Creates a column description.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Column list backing a [`MemoryResultSet`].
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadata {
    columns: Vec<ColumnInfo>,
}

impl MemoryMetadata {
    fn column(&self, ordinal: usize) -> ClientResult<&ColumnInfo> {
        ordinal
            .checked_sub(1)
            .and_then(|index| self.columns.get(index))
            .ok_or(ClientError::NoSuchColumn(ordinal))
    }
}

impl ResultSetMetadata for MemoryMetadata {
    fn column_name(&self, ordinal: usize) -> ClientResult<&str> {
        self.column(ordinal).map(|c| c.name.as_str())
    }

    fn column_type_name(&self, ordinal: usize) -> ClientResult<&str> {
        self.column(ordinal).map(|c| c.type_name.as_str())
    }
}

/// A fully materialized result set.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSet {
    metadata: MemoryMetadata,
    rows: Vec<Vec<Value>>,
    /// Index of the current row; `None` before the first `next()`.
    cursor: Option<usize>,
}

impl MemoryResultSet {
    /// Creates a result set from columns and rows.
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            metadata: MemoryMetadata { columns },
            rows,
            cursor: None,
        }
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the number of columns.
    pub fn column_count(&self) -> usize {
        self.metadata.columns.len()
    }

    /// Returns the column descriptions.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.metadata.columns
    }

    /// Rewinds the cursor to before the first row.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }
}

impl ResultSet for MemoryResultSet {
    fn metadata(&self) -> &dyn ResultSetMetadata {
        &self.metadata
    }

    fn next(&mut self) -> ClientResult<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.rows.len() {
            self.cursor = Some(next);
            Ok(true)
        } else {
            self.cursor = Some(self.rows.len());
            Ok(false)
        }
    }

    fn get(&self, ordinal: usize) -> ClientResult<Value> {
        let row = self
            .cursor
            .and_then(|c| self.rows.get(c))
            .ok_or(ClientError::NoCurrentRow)?;
        ordinal
            .checked_sub(1)
            .and_then(|index| row.get(index))
            .cloned()
            .ok_or(ClientError::NoSuchColumn(ordinal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> MemoryResultSet {
        MemoryResultSet::new(
            vec![
                ColumnInfo::new("id", "INTEGER"),
                ColumnInfo::new("name", "TEXT"),
            ],
            vec![
                vec![Value::Integer(1), Value::Text("Alice".into())],
                vec![Value::Integer(2), Value::Text("Bob".into())],
            ],
        )
    }

    #[test]
    fn test_metadata_probing_stops_past_last_column() {
        let rs = people();
        let meta = rs.metadata();
        assert_eq!(meta.column_name(1).unwrap(), "id");
        assert_eq!(meta.column_type_name(2).unwrap(), "TEXT");
        assert!(matches!(meta.column_name(3), Err(ClientError::NoSuchColumn(3))));
        assert!(meta.column_name(0).is_err());
    }

    #[test]
    fn test_cursor_iteration() {
        let mut rs = people();
        assert!(matches!(rs.get(1), Err(ClientError::NoCurrentRow)));

        assert!(rs.next().unwrap());
        assert_eq!(rs.get(1).unwrap(), Value::Integer(1));
        assert!(rs.next().unwrap());
        assert_eq!(rs.get(2).unwrap(), Value::Text("Bob".into()));
        assert!(!rs.next().unwrap());
        assert!(!rs.next().unwrap());
        assert!(rs.get(1).is_err());

        rs.rewind();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get(2).unwrap(), Value::Text("Alice".into()));
    }

    #[test]
    fn test_counts() {
        let rs = people();
        assert_eq!(rs.row_count(), 2);
        assert_eq!(rs.column_count(), 2);
        assert_eq!(rs.columns()[0].name, "id");
    }
}
