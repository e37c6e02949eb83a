//! The shell session.
//!
//! A [`Session`] owns everything that lives between statements: the
//! configuration, the connection and its active statement, cached metadata,
//! the transformer registry and the transcript. Closing the connection drops
//! the statement and the metadata with it.
//!
//! Cleanup runs exactly once. It is armed by the first successful connect and
//! runs on [`Session::close`], when the session is dropped, or through a
//! [`Resources`] handle held by the termination signal handler.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbsh_client::{Connection, DatabaseMetadata, DriverManager, Statement};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{self, Configuration, OptionValue};
use crate::error::{ShellError, ShellResult};
use crate::logging::LogHandle;
use crate::options::{self, OptionId};
use crate::render::{self, RenderSummary};
use crate::transcript::Transcript;
use crate::transform::TransformerRegistry;

/// Result of [`Session::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// Something was open and is now closed.
    Closed,
    /// Nothing was open.
    AlreadyClosed,
}

/// Facts about the current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection URL.
    pub url: String,
    /// Connected user.
    pub user: String,
    /// Driver that opened the connection.
    pub driver: String,
    /// Time the connect took.
    pub elapsed: Duration,
}

/// The connection and the transcript. Clones share both, so whichever
/// holder releases first closes them and later releases find nothing open.
#[derive(Clone, Default)]
pub struct Resources {
    connection: Arc<Mutex<Option<Box<dyn Connection>>>>,
    transcript: Transcript,
}

impl Resources {
    fn close_connection(&self) -> CloseStatus {
        let Some(mut connection) = self.connection.lock().take() else {
            return CloseStatus::AlreadyClosed;
        };
        if let Err(e) = connection.close() {
            warn!(error = %e, "closing connection failed");
        }
        info!("connection closed");
        CloseStatus::Closed
    }

    /// Closes the connection and the transcript.
    pub fn release(&self) -> CloseStatus {
        let connection = self.close_connection();
        let transcript = self.transcript.close();
        if connection == CloseStatus::Closed || transcript {
            CloseStatus::Closed
        } else {
            CloseStatus::AlreadyClosed
        }
    }
}

/// State shared by every statement of a shell run.
pub struct Session {
    config: Configuration,
    drivers: DriverManager,
    resources: Resources,
    info: Option<ConnectionInfo>,
    statement: Option<Statement>,
    metadata: Option<DatabaseMetadata>,
    transformers: TransformerRegistry,
    cleanup_armed: bool,
    log_handle: Option<LogHandle>,
}

impl Session {
    /// Creates a disconnected session.
    pub fn new(config: Configuration, transformers: TransformerRegistry) -> Self {
        Self {
            config,
            drivers: DriverManager::with_defaults(),
            resources: Resources::default(),
            info: None,
            statement: None,
            metadata: None,
            transformers,
            cleanup_armed: false,
            log_handle: None,
        }
    }

    /// Replaces the driver registry.
    #[cfg(test)]
    pub(crate) fn with_drivers(mut self, drivers: DriverManager) -> Self {
        self.drivers = drivers;
        self
    }

    /// Attaches a transcript.
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.resources.transcript = transcript;
        self
    }

    /// A handle that closes this session's connection and transcript from
    /// outside the shell loop.
    pub fn resources(&self) -> Resources {
        self.resources.clone()
    }

    /// Attaches the log filter handle used by the `debug` toggle.
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    /// Connects with the configured URL and credentials.
    pub fn connect_configured(&mut self) -> ShellResult<&ConnectionInfo> {
        let (url, user, password) = (
            self.config.url().to_string(),
            self.config.user().to_string(),
            self.config.password().to_string(),
        );
        self.connect(&url, &user, &password)
    }

    /// Opens a connection, closing any previous one first.
    pub fn connect(&mut self, url: &str, user: &str, password: &str) -> ShellResult<&ConnectionInfo> {
        if self.disconnect() == CloseStatus::Closed {
            debug!("previous connection closed before reconnecting");
        }

        let driver = match self.config.driver() {
            Some(name) => self.drivers.get(name)?,
            None => self.drivers.for_url(url)?,
        };

        let start = Instant::now();
        let connection = driver.connect(url, user, password)?;
        let elapsed = start.elapsed();
        info!(url, driver = driver.name(), elapsed_ms = elapsed.as_millis() as u64, "connected");

        self.resources
            .transcript
            .record_connection(url, driver.name(), user, elapsed);
        *self.resources.connection.lock() = Some(connection);
        self.statement = Some(Statement::new());
        if !self.cleanup_armed {
            self.cleanup_armed = true;
            debug!("session cleanup armed");
        }

        Ok(self.info.insert(ConnectionInfo {
            url: url.to_string(),
            user: user.to_string(),
            driver: driver.name().to_string(),
            elapsed,
        }))
    }

    /// Closes the connection only. The transcript stays open.
    pub fn disconnect(&mut self) -> CloseStatus {
        self.statement = None;
        self.metadata = None;
        self.info = None;
        self.resources.close_connection()
    }

    /// Closes the connection and the transcript, disarming cleanup.
    pub fn close(&mut self) -> CloseStatus {
        self.statement = None;
        self.metadata = None;
        self.info = None;
        self.cleanup_armed = false;
        self.resources.release()
    }

    /// Returns true while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.resources
            .connection
            .lock()
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// Executes SQL on the active statement. Returns true when a result set
    /// is available.
    pub fn execute_sql(&mut self, sql: &str) -> ShellResult<bool> {
        let mut guard = self.resources.connection.lock();
        let (Some(connection), Some(statement)) = (guard.as_deref_mut(), self.statement.as_mut()) else {
            return Err(ShellError::Sql("not connected".to_string()));
        };
        debug!(sql, "executing");
        Ok(statement.execute(connection, sql)?)
    }

    /// Makes the table listing the current result set.
    pub fn list_tables(&mut self) -> ShellResult<()> {
        let mut guard = self.resources.connection.lock();
        let (Some(connection), Some(statement)) = (guard.as_deref_mut(), self.statement.as_mut()) else {
            return Err(ShellError::Sql("not connected".to_string()));
        };
        let tables = connection.tables()?;
        statement.set_result_set(tables);
        Ok(())
    }

    /// Connection facts, if connected.
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }

    /// The active statement, if connected.
    pub fn statement(&self) -> Option<&Statement> {
        self.statement.as_ref()
    }

    /// Returns true when a current result set exists.
    pub fn has_result_set(&self) -> bool {
        self.statement
            .as_ref()
            .is_some_and(|s| s.result_set().is_some())
    }

    /// Update count of the last execution.
    pub fn update_count(&self) -> Option<u64> {
        self.statement.as_ref().and_then(|s| s.update_count())
    }

    /// Connection metadata, fetched on first use and cached until close.
    pub fn metadata(&mut self) -> ShellResult<&DatabaseMetadata> {
        if self.metadata.is_none() {
            let guard = self.resources.connection.lock();
            let connection = guard
                .as_deref()
                .ok_or_else(|| ShellError::Sql("not connected".to_string()))?;
            debug!("fetching connection metadata");
            self.metadata = Some(connection.metadata()?);
        }
        self.metadata
            .as_ref()
            .ok_or_else(|| ShellError::Sql("not connected".to_string()))
    }

    /// The configuration.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The transformer registry.
    pub fn transformers(&self) -> &TransformerRegistry {
        &self.transformers
    }

    /// The transformer registry, mutably.
    pub fn transformers_mut(&mut self) -> &mut TransformerRegistry {
        &mut self.transformers
    }

    /// The transcript.
    pub fn transcript(&self) -> &Transcript {
        &self.resources.transcript
    }

    /// Renders the current result set, if any.
    pub fn render_result<W: Write>(&mut self, out: &mut W) -> ShellResult<Option<RenderSummary>> {
        let limit = self.config.limit();
        let Some(rs) = self.statement.as_mut().and_then(|s| s.result_set_mut()) else {
            return Ok(None);
        };
        render::render(rs, &self.transformers, &self.resources.transcript, limit, out)
    }

    /// Changes one of the options that may change while the shell runs:
    /// `debug`, `limit`, `line_numbers` and `record`.
    pub fn set_option(&mut self, key: &str, raw: &str) -> ShellResult<OptionValue> {
        let descriptor = options::by_key(key)
            .ok_or_else(|| ShellError::evaluation(format!("unknown option '{}'", key)))?;
        let value = config::parse_value(descriptor, raw)
            .map_err(|e| ShellError::evaluation(e.to_string()))?;

        match (descriptor.id, &value) {
            (OptionId::Debug, OptionValue::Flag(on)) => {
                if let Some(handle) = &self.log_handle {
                    handle.set_debug(*on)?;
                }
            }
            (OptionId::Limit, _) | (OptionId::LineNumbers, _) => {}
            (OptionId::Record, OptionValue::Text(text)) => {
                let recording = config::parse_flag(text).ok_or_else(|| {
                    ShellError::evaluation("record expects on or off while the shell runs")
                })?;
                let transcript = &self.resources.transcript;
                if !transcript.is_open() {
                    return Err(ShellError::evaluation(
                        "no transcript is open; start dbsh with --record",
                    ));
                }
                transcript.set_paused(!recording);
                info!(recording = transcript.is_recording(), "transcript toggled");
                return Ok(OptionValue::Flag(recording));
            }
            _ => {
                return Err(ShellError::evaluation(format!(
                    "option '{}' cannot be changed while the shell runs",
                    descriptor.key
                )))
            }
        }

        info!(option = descriptor.key, value = %value, "option changed");
        self.config.set(descriptor.id, value.clone());
        Ok(value)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.cleanup_armed || self.resources.transcript.is_open() {
            debug!("running session cleanup");
            self.close();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("connection", &self.info)
            .field("statement", &self.statement)
            .field("transformers", &self.transformers)
            .field("transcript", &self.resources.transcript.path())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    use chrono::Local;
    use dbsh_client::{ClientError, ClientResult, Driver, Execution, ResultSet};

    use super::*;

    /// A configuration pointing at a fresh in-memory database.
    pub(crate) fn memory_config() -> Configuration {
        let mut config = Configuration::new();
        config.set(OptionId::Url, OptionValue::Text("sqlite::memory:".into()));
        config.set(OptionId::User, OptionValue::Text("sa".into()));
        config.set(OptionId::Password, OptionValue::Text("secret".into()));
        config.set(OptionId::Driver, OptionValue::Text("sqlite".into()));
        config.set(OptionId::Limit, OptionValue::Integer(-1));
        config
    }

    /// A connected session over an in-memory database.
    pub(crate) fn memory_session() -> Session {
        let mut session = Session::new(memory_config(), TransformerRegistry::new());
        session.connect_configured().unwrap();
        session
    }

    /// Counts closes so cleanup can be observed after the session is gone.
    struct CountingDriver {
        closes: Arc<std::sync::atomic::AtomicUsize>,
    }

    struct CountingConnection {
        closes: Arc<std::sync::atomic::AtomicUsize>,
        closed: bool,
    }

    impl Driver for CountingDriver {
        fn name(&self) -> &str {
            "counting"
        }

        fn accepts_url(&self, url: &str) -> bool {
            url.starts_with("counting:")
        }

        fn connect(&self, url: &str, _user: &str, _password: &str) -> ClientResult<Box<dyn Connection>> {
            if url.ends_with("refuse") {
                return Err(ClientError::ConnectionFailed("refused".into()));
            }
            Ok(Box::new(CountingConnection {
                closes: self.closes.clone(),
                closed: false,
            }))
        }
    }

    impl Connection for CountingConnection {
        fn execute(&mut self, _sql: &str) -> ClientResult<Execution> {
            Ok(Execution::Updated(0))
        }

        fn metadata(&self) -> ClientResult<DatabaseMetadata> {
            Err(ClientError::Internal("no metadata".into()))
        }

        fn tables(&mut self) -> ClientResult<Box<dyn ResultSet>> {
            Err(ClientError::Internal("no tables".into()))
        }

        fn close(&mut self) -> ClientResult<()> {
            if self.closed {
                return Err(ClientError::ConnectionClosed);
            }
            self.closed = true;
            self.closes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn counting_session() -> (Session, Arc<std::sync::atomic::AtomicUsize>) {
        let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut drivers = DriverManager::new();
        drivers.register(Arc::new(CountingDriver {
            closes: closes.clone(),
        }));
        let mut config = memory_config();
        config.set(OptionId::Driver, OptionValue::Text("counting".into()));
        let session = Session::new(config, TransformerRegistry::new()).with_drivers(drivers);
        (session, closes)
    }

    fn closes(counter: &Arc<std::sync::atomic::AtomicUsize>) -> usize {
        counter.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[test]
    fn test_execute_sql_query_and_update() {
        let mut session = memory_session();
        assert!(!session.execute_sql("CREATE TABLE t (id INTEGER, name TEXT)").unwrap());
        assert!(!session.execute_sql("INSERT INTO t VALUES (1, 'a'), (2, 'b')").unwrap());
        assert_eq!(session.update_count(), Some(2));
        assert!(session.execute_sql("SELECT * FROM t").unwrap());
        assert!(session.has_result_set());
    }

    #[test]
    fn test_execute_sql_errors() {
        let mut session = memory_session();
        let err = session.execute_sql("SELEC 1").unwrap_err();
        assert!(matches!(err, ShellError::Sql(_)));

        session.close();
        let err = session.execute_sql("SELECT 1").unwrap_err();
        assert!(matches!(err, ShellError::Sql(ref m) if m.contains("not connected")));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = memory_session();
        assert_eq!(session.close(), CloseStatus::Closed);
        assert_eq!(session.close(), CloseStatus::AlreadyClosed);
        assert!(!session.is_connected());
        assert!(session.statement().is_none());
    }

    #[test]
    fn test_cleanup_runs_once_on_drop() {
        let (mut session, counter) = counting_session();
        session.connect_configured().unwrap();
        drop(session);
        assert_eq!(closes(&counter), 1);

        let (mut session, counter) = counting_session();
        session.connect_configured().unwrap();
        assert_eq!(session.close(), CloseStatus::Closed);
        drop(session);
        assert_eq!(closes(&counter), 1);
    }

    #[test]
    fn test_cleanup_runs_on_panic() {
        let (session, counter) = counting_session();
        let unwound = Rc::new(Cell::new(false));
        let flag = unwound.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut session = session;
            session.connect_configured().unwrap();
            flag.set(true);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(unwound.get());
        assert_eq!(closes(&counter), 1);
    }

    #[test]
    fn test_reconnect_closes_previous_connection() {
        let (mut session, counter) = counting_session();
        session.connect("counting:a", "u", "p").unwrap();
        session.connect("counting:b", "u", "p").unwrap();
        assert_eq!(closes(&counter), 1);
        assert_eq!(session.connection_info().unwrap().url, "counting:b");
        session.close();
        assert_eq!(closes(&counter), 2);
    }

    #[test]
    fn test_connection_failure() {
        let (mut session, _) = counting_session();
        let err = session.connect("counting:refuse", "u", "p").unwrap_err();
        assert!(matches!(err, ShellError::Connection(ref m) if m == "refused"));
        assert!(err.is_fatal());
        assert!(!session.is_connected());

        let mut session = Session::new(memory_config(), TransformerRegistry::new());
        let mut config = memory_config();
        config.set(OptionId::Driver, OptionValue::Text("oracle".into()));
        session.config = config;
        assert!(matches!(
            session.connect_configured(),
            Err(ShellError::Connection(_))
        ));
    }

    #[test]
    fn test_metadata_is_cached_until_close() {
        let mut session = memory_session();
        let meta = session.metadata().unwrap().clone();
        assert_eq!(meta.product_name, "SQLite");
        assert_eq!(meta.url, "sqlite::memory:");
        assert!(session.metadata.is_some());
        session.disconnect();
        assert!(session.metadata.is_none());
        assert!(session.metadata().is_err());
    }

    #[test]
    fn test_list_tables() {
        let mut session = memory_session();
        session.execute_sql("CREATE TABLE people (id INTEGER)").unwrap();
        session.list_tables().unwrap();
        let mut out = Vec::new();
        let summary = session.render_result(&mut out).unwrap().unwrap();
        assert_eq!(summary.rows, 1);
        assert!(String::from_utf8(out).unwrap().contains("people"));
    }

    #[test]
    fn test_set_option() {
        let mut session = memory_session();
        assert_eq!(session.set_option("limit", "5").unwrap(), OptionValue::Integer(5));
        assert_eq!(session.config().limit(), 5);
        assert_eq!(
            session.set_option("line-numbers", "on").unwrap(),
            OptionValue::Flag(true)
        );
        assert!(session.config().line_numbers());

        assert!(matches!(session.set_option("url", "x"), Err(ShellError::Evaluation(_))));
        assert!(matches!(session.set_option("limit", "many"), Err(ShellError::Evaluation(_))));
        assert!(matches!(session.set_option("nope", "1"), Err(ShellError::Evaluation(_))));
        assert!(matches!(session.set_option("record", "off"), Err(ShellError::Evaluation(_))));
    }

    #[test]
    fn test_record_pauses_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::open(dir.path(), "s", Local::now()).unwrap();
        let mut session =
            Session::new(memory_config(), TransformerRegistry::new()).with_transcript(transcript);
        session.connect_configured().unwrap();

        session.set_option("record", "off").unwrap();
        session.transcript().record_input("invisible");
        session.set_option("record", "on").unwrap();
        session.transcript().record_input("visible");
        let path = session.transcript().path().unwrap().to_path_buf();
        drop(session);

        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("<td>sqlite::memory:</td>"));
        assert!(!html.contains("invisible"));
        assert!(html.contains("<pre>visible</pre>"));
        assert!(html.contains("</html>"));
    }

    #[test]
    fn test_limit_applies_to_rendering() {
        let mut session = memory_session();
        session.execute_sql("CREATE TABLE n (v INTEGER)").unwrap();
        session.execute_sql("INSERT INTO n VALUES (1), (2), (3)").unwrap();
        session.set_option("limit", "2").unwrap();
        session.execute_sql("SELECT v FROM n ORDER BY v").unwrap();
        let mut out = Vec::new();
        let summary = session.render_result(&mut out).unwrap().unwrap();
        assert_eq!(summary.rows, 2);
        assert!(summary.limited);

        session.set_option("limit", "0").unwrap();
        session.execute_sql("SELECT v FROM n").unwrap();
        assert!(session.render_result(&mut Vec::new()).unwrap().is_none());
    }

    #[test]
    fn test_resources_release_from_another_thread() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::open(dir.path(), "term", Local::now()).unwrap();
        let path = transcript.path().unwrap().to_path_buf();
        let (session, counter) = counting_session();
        let mut session = session.with_transcript(transcript);
        session.connect_configured().unwrap();
        session.transcript().record_input("SELECT 1");

        let handle = session.resources();
        let status = std::thread::spawn(move || handle.release()).join().unwrap();
        assert_eq!(status, CloseStatus::Closed);
        assert_eq!(closes(&counter), 1);
        assert!(!session.is_connected());
        assert!(session.execute_sql("SELECT 1").is_err());

        assert_eq!(session.resources().release(), CloseStatus::AlreadyClosed);
        drop(session);
        assert_eq!(closes(&counter), 1);

        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("<pre>SELECT&nbsp;1</pre>"));
        assert_eq!(html.matches("</html>").count(), 1);
    }
}
