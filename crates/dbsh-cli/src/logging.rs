//! Diagnostic logging setup.

use std::io;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::error::{ShellError, ShellResult};

const QUIET: &str = "dbsh=warn";
const VERBOSE: &str = "dbsh=debug,dbsh_client=debug";

/// Filter directives for the given debug setting.
pub fn directives(debug: bool) -> &'static str {
    if debug {
        VERBOSE
    } else {
        QUIET
    }
}

/// Changes the log filter after startup.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Switches debug logging on or off.
    pub fn set_debug(&self, debug: bool) -> ShellResult<()> {
        self.handle
            .reload(EnvFilter::new(directives(debug)))
            .map_err(|e| ShellError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LogHandle")
    }
}

/// Installs the global subscriber: stderr, no timestamps, no targets.
pub fn init_logging(debug: bool) -> ShellResult<LogHandle> {
    let (filter, handle) = reload::Layer::new(EnvFilter::new(directives(debug)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .without_time(),
        )
        .try_init()
        .map_err(|e| ShellError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

    Ok(LogHandle { handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(directives(false), "dbsh=warn");
        assert!(directives(true).contains("dbsh_client=debug"));
    }
}
