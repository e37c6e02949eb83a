//! The shell loop.
//!
//! Reads a statement, classifies it as SQL or an expression, executes it,
//! renders the outcome and starts over. Any error inside one cycle is
//! reported and the loop continues; the loop ends at end of input or on
//! `quit`/`exit`, after which the session is closed.

use std::io::Write;
use std::time::Instant;

use comfy_table::{Cell, ContentArrangement, Table};
use tracing::{debug, error, info, warn};

use crate::error::{ShellError, ShellResult};
use crate::eval::{Evaluator, ScriptValue};
use crate::reader::{LineSource, QueryReader};
use crate::session::Session;

/// Marks a statement as an expression.
pub const EXPRESSION_PREFIX: char = '!';

/// Kind of a classified statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Sent to the database.
    Sql,
    /// Evaluated against the session.
    Expression,
}

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// Waiting for the next statement.
    AwaitingInput,
    /// A statement was read and classified.
    Classified(StatementKind),
    /// The statement is running.
    Executing,
    /// The outcome is being printed.
    Rendering,
    /// The loop has ended and the session is closed.
    Closed,
}

/// A statement after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Nothing to do.
    Empty,
    /// End the shell.
    Quit,
    /// SQL text.
    Sql(String),
    /// Expression text, without the prefix.
    Expression(String),
}

/// Classifies one statement.
pub fn classify(statement: &str) -> Command {
    let statement = statement.trim();
    if statement.is_empty() {
        return Command::Empty;
    }
    if statement.eq_ignore_ascii_case("quit") || statement.eq_ignore_ascii_case("exit") {
        return Command::Quit;
    }
    if statement.eq_ignore_ascii_case("help") {
        return Command::Expression("help()".to_string());
    }
    match statement.strip_prefix(EXPRESSION_PREFIX) {
        Some(expr) => Command::Expression(expr.trim().to_string()),
        None => Command::Sql(statement.to_string()),
    }
}

enum Outcome {
    Sql(bool),
    Value(ScriptValue),
}

/// Interactive shell over a line source, writing results to `out`.
pub struct Shell<S, W> {
    reader: QueryReader<S>,
    session: Session,
    evaluator: Evaluator,
    out: W,
    state: ShellState,
}

impl<S: LineSource, W: Write> Shell<S, W> {
    /// Creates a shell.
    pub fn new(session: Session, source: S, out: W) -> Self {
        Self {
            reader: QueryReader::new(source),
            session,
            evaluator: Evaluator::new(),
            out,
            state: ShellState::AwaitingInput,
        }
    }

    /// Current state.
    pub fn state(&self) -> ShellState {
        self.state
    }

    #[cfg(test)]
    fn session(&self) -> &Session {
        &self.session
    }

    fn transition(&mut self, next: ShellState) {
        debug!(from = ?self.state, to = ?next, "shell state");
        self.state = next;
    }

    /// Runs until end of input or `quit`, then closes the session.
    pub fn run(&mut self) -> ShellResult<()> {
        loop {
            self.transition(ShellState::AwaitingInput);
            self.reader
                .set_line_numbers(self.session.config().line_numbers());

            let statement = match self.reader.read_statement() {
                Ok(Some(statement)) => statement,
                Ok(None) => break,
                Err(e) => {
                    self.report(&e);
                    break;
                }
            };

            let (kind, text) = match classify(&statement) {
                Command::Empty => continue,
                Command::Quit => break,
                Command::Sql(sql) => (StatementKind::Sql, sql),
                Command::Expression(expr) => (StatementKind::Expression, expr),
            };
            self.transition(ShellState::Classified(kind));
            self.session.transcript().record_input(&statement);

            if let Err(e) = self.cycle(kind, &text) {
                self.report(&e);
            }
        }

        self.transition(ShellState::Closed);
        info!(statements = self.reader.statements_read(), "input finished");
        self.session.close();
        self.out.flush()?;
        Ok(())
    }

    fn cycle(&mut self, kind: StatementKind, text: &str) -> ShellResult<()> {
        self.transition(ShellState::Executing);
        let start = Instant::now();
        let outcome = match kind {
            StatementKind::Sql => self.session.execute_sql(text).map(Outcome::Sql),
            StatementKind::Expression => self
                .evaluator
                .evaluate(text, &mut self.session)
                .map(Outcome::Value),
        };
        let elapsed = start.elapsed();

        let label = match kind {
            StatementKind::Sql => "query execution",
            StatementKind::Expression => "expression evaluation",
        };
        let ok = outcome.is_ok();
        writeln!(
            self.out,
            "{} status : [{}] in {}ms",
            label,
            if ok { "successful" } else { "failed" },
            elapsed.as_millis()
        )?;
        self.session
            .transcript()
            .record_status(label, ok, elapsed);

        let outcome = outcome?;
        self.transition(ShellState::Rendering);
        match outcome {
            Outcome::Sql(true) | Outcome::Value(ScriptValue::ResultSet) => {
                if self.session.render_result(&mut self.out)?.is_none() {
                    debug!("nothing rendered");
                }
            }
            Outcome::Sql(false) => {
                let count = self.session.update_count().unwrap_or(0);
                let text = format!("{} row{} affected", count, if count == 1 { "" } else { "s" });
                self.emit(&text)?;
            }
            Outcome::Value(ScriptValue::Map(map)) => {
                let mut table = Table::new();
                table
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .load_preset(comfy_table::presets::UTF8_FULL)
                    .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
                    .set_header(vec![Cell::new("key"), Cell::new("value")]);
                for (key, value) in &map {
                    table.add_row(vec![Cell::new(key), Cell::new(value.to_string())]);
                }
                self.emit(&table.to_string())?;
            }
            Outcome::Value(value) => self.emit(&value.to_string())?,
        }
        Ok(())
    }

    fn emit(&mut self, text: &str) -> ShellResult<()> {
        writeln!(self.out, "{}", text)?;
        self.session.transcript().record_text(text);
        Ok(())
    }

    fn report(&mut self, err: &ShellError) {
        if err.is_fatal() {
            error!(error = %err, "statement failed");
        } else {
            warn!(error = %err, "statement failed");
        }
        let text = format!("Error: {}", err);
        if writeln!(self.out, "{}", text).is_err() {
            eprintln!("{}", text);
        }
        self.session.transcript().record_text(&text);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::Local;

    use super::*;
    use crate::eval::builtins::{FIELDS, OPERATIONS};
    use crate::reader::BufReadSource;
    use crate::session::tests::{memory_config, memory_session};
    use crate::transcript::Transcript;
    use crate::transform::TransformerRegistry;

    fn run_script(session: Session, script: impl AsRef<[u8]>) -> (String, ShellState, bool) {
        let mut out = Vec::new();
        let source = BufReadSource::new(Cursor::new(script.as_ref().to_vec()));
        let mut shell = Shell::new(session, source, &mut out);
        shell.run().unwrap();
        let state = shell.state();
        let connected = shell.session().is_connected();
        drop(shell);
        (String::from_utf8(out).unwrap(), state, connected)
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("  "), Command::Empty);
        assert_eq!(classify("QUIT"), Command::Quit);
        assert_eq!(classify("exit"), Command::Quit);
        assert_eq!(classify("help"), Command::Expression("help()".into()));
        assert_eq!(classify("! 1 + 1"), Command::Expression("1 + 1".into()));
        assert_eq!(classify("SELECT 1"), Command::Sql("SELECT 1".into()));
    }

    #[test]
    fn test_sql_round_trip() {
        let (out, state, connected) = run_script(
            memory_session(),
            "CREATE TABLE t (a INT, b TEXT);\n\
             INSERT INTO t VALUES (1, 'x'),\n(2, 'y');\n\
             SELECT * FROM t ORDER BY a;\n",
        );
        assert_eq!(out.matches("query execution status : [successful]").count(), 3);
        assert!(out.contains("2 rows affected"));
        assert!(out.contains("a |b |\n--+--+\n1 |x |\n2 |y |\n"));
        assert!(out.contains("2 rows (all) in "));
        assert_eq!(state, ShellState::Closed);
        assert!(!connected);
    }

    #[test]
    fn test_errors_do_not_stop_the_loop() {
        let (out, _, _) = run_script(
            memory_session(),
            "SELEC 1;\n!1 / 0;\n!nothing;\nSELECT 7 AS n;\n",
        );
        assert!(out.contains("query execution status : [failed]"));
        assert!(out.contains("Error: sql error"));
        assert!(out.contains("Error: evaluation error: division by zero"));
        assert!(out.contains("Error: compile error: unknown identifier `nothing`"));
        assert!(out.contains("n |\n--+\n7 |\n"));
    }

    #[test]
    fn test_help_and_quit() {
        let (out, state, _) = run_script(memory_session(), "help\n!help('query');\nquit\nSELECT 1;\n");
        assert!(out.contains("executeSql(sql)"));
        assert!(out.contains("sql: Statement text"));
        assert_eq!(out.matches("status :").count(), 2);
        assert_eq!(state, ShellState::Closed);
    }

    #[test]
    fn test_expression_outcomes() {
        let (out, _, _) = run_script(
            memory_session(),
            "!query('SELECT 5 AS five');\n!transformers;\n!1 + 1;\n!executeSql('CREATE TABLE z (a INT)');\n",
        );
        assert!(out.contains("five |\n-----+\n5    |\n"));
        assert!(out.contains("BLOB"));
        assert!(out.contains("│ key"));
        assert!(out.contains("\n2\n"));
        assert!(out.contains("\nfalse\n"));
    }

    #[test]
    fn test_limit_zero_renders_nothing() {
        let (out, _, _) = run_script(memory_session(), "!set('limit', 0);\nSELECT 1 AS one;\n");
        assert!(out.contains("query execution status : [successful]"));
        assert!(!out.contains("one |"));
    }

    #[test]
    fn test_transcript_records_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::open(dir.path(), "e2e", Local::now()).unwrap();
        let path = transcript.path().unwrap().to_path_buf();
        let mut session =
            Session::new(memory_config(), TransformerRegistry::new()).with_transcript(transcript);
        session.connect_configured().unwrap();

        run_script(session, "SELECT '<b>' AS tag;\nSELEC;\n");

        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("<pre>SELECT&nbsp;'&lt;b&gt;'&nbsp;AS&nbsp;tag</pre>"));
        assert!(html.contains("<th>tag</th>"));
        assert!(html.contains("<td>&lt;b&gt;</td>"));
        assert!(html.contains("[failed]"));
        assert!(html.contains("Error:"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_line_numbers_toggle() {
        let (out, _, _) = run_script(memory_session(), "!set('line_numbers', true);\n!get('line_numbers');\n");
        assert!(out.contains("\ntrue\n"));
    }

    #[test]
    fn test_help_expression_lists_every_operation() {
        let (out, _, _) = run_script(memory_session(), "!help();\n");
        assert!(out.contains("expression evaluation status : [successful]"));
        assert!(!out.contains("Error:"));
        for op in OPERATIONS {
            assert!(out.contains(&op.signature()), "missing {}", op.name);
            assert!(out.contains(op.description), "missing {}", op.name);
        }
        for field in FIELDS {
            assert!(out.contains(field.description), "missing {}", field.name);
        }
    }

    #[test]
    fn test_invalid_utf8_line_does_not_end_the_run() {
        let (out, state, _) = run_script(
            memory_session(),
            b"SELECT 1 AS a;\nSELECT '\xff' AS bad;\nSELECT 2 AS b;\n",
        );
        assert!(out.contains("a |\n--+\n1 |\n"));
        assert!(out.contains("bad |"));
        assert!(out.contains("b |\n--+\n2 |\n"));
        assert!(!out.contains("Error:"));
        assert_eq!(state, ShellState::Closed);
    }
}
