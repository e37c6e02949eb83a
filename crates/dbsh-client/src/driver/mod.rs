//! Driver registration and lookup.

mod sqlite;

pub use sqlite::{SqliteConnection, SqliteDriver};

use std::fmt;
use std::sync::Arc;

use crate::client::Driver;
use crate::error::{ClientError, ClientResult};

/// Registry of available drivers.
#[derive(Clone, Default)]
pub struct DriverManager {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the bundled drivers.
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(SqliteDriver));
        manager
    }

    /// Registers a driver. A later registration with the same name shadows
    /// the earlier one.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(0, driver);
    }

    /// Looks up a driver by name (case-insensitive).
    pub fn get(&self, name: &str) -> ClientResult<Arc<dyn Driver>> {
        self.drivers
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| ClientError::UnknownDriver(name.to_string()))
    }

    /// Finds the first driver that accepts the URL.
    pub fn for_url(&self, url: &str) -> ClientResult<Arc<dyn Driver>> {
        self.drivers
            .iter()
            .find(|d| d.accepts_url(url))
            .cloned()
            .ok_or_else(|| ClientError::UnknownDriver(url.to_string()))
    }

    /// Returns the names of all registered drivers.
    pub fn names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.name().to_string()).collect()
    }
}

impl fmt::Debug for DriverManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverManager")
            .field("drivers", &self.names())
            .finish()
    }
}
