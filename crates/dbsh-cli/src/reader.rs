//! Statement input.
//!
//! A statement may span several physical lines; it ends at the first line
//! whose trimmed text ends with `;`. Lines come from a [`LineSource`]: the
//! interactive editor, a script file or piped standard input.

use std::borrow::Cow;
use std::io::{self, BufRead};
use std::path::PathBuf;

use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{CompletionType, Config, EditMode, Editor, Helper};
use tracing::{debug, warn};

use crate::error::{ShellError, ShellResult};

/// Prompt for the first line of a statement.
pub const PROMPT: &str = "dbsh> ";

/// Prompt for continuation lines.
pub const CONTINUATION_PROMPT: &str = "   -> ";

/// Words that complete a statement on their own.
const SHELL_KEYWORDS: &[&str] = &["help", "quit", "exit"];

/// One read from a line source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A physical line without its line terminator.
    Text(String),
    /// The operator pressed Ctrl-C.
    Interrupted,
    /// No more input.
    Eof,
}

/// Supplies physical lines.
pub trait LineSource {
    /// Reads one line, showing `prompt` if the source is interactive.
    fn read_line(&mut self, prompt: &str) -> ShellResult<Line>;

    /// Records a complete statement in the source's history.
    fn add_history(&mut self, _statement: &str) {}
}

/// Lines from any buffered reader.
pub struct BufReadSource<R> {
    reader: R,
}

impl<R: BufRead> BufReadSource<R> {
    /// Wraps a reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for BufReadSource<R> {
    fn read_line(&mut self, _prompt: &str) -> ShellResult<Line> {
        let mut bytes = Vec::new();
        if self.reader.read_until(b'\n', &mut bytes)? == 0 {
            return Ok(Line::Eof);
        }
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                warn!("input line is not valid UTF-8, invalid bytes replaced");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        Ok(Line::Text(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Editor helper: keyword completion, no multi-line validation.
struct ShellHelper {
    keywords: Vec<&'static str>,
}

impl ShellHelper {
    fn new() -> Self {
        Self {
            keywords: vec![
                "SELECT", "FROM", "WHERE", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE",
                "CREATE", "TABLE", "DROP", "ALTER", "INDEX", "VIEW", "PRIMARY", "KEY", "JOIN",
                "LEFT", "INNER", "ON", "AND", "OR", "NOT", "NULL", "IS", "IN", "LIKE", "ORDER",
                "BY", "GROUP", "HAVING", "LIMIT", "DISTINCT", "AS", "BEGIN", "COMMIT",
                "ROLLBACK", "EXPLAIN", "HELP", "QUIT", "EXIT",
            ],
        }
    }
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = line[..pos]
            .rfind(|c: char| c.is_whitespace() || c == '(' || c == ',')
            .map(|i| i + 1)
            .unwrap_or(0);
        let word = line[start..pos].to_uppercase();
        if word.is_empty() {
            return Ok((start, Vec::new()));
        }

        let matches = self
            .keywords
            .iter()
            .filter(|kw| kw.starts_with(&word))
            .map(|kw| Pair {
                display: kw.to_string(),
                replacement: kw.to_string(),
            })
            .collect();
        Ok((start, matches))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for ShellHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Borrowed(line)
    }
}

impl Validator for ShellHelper {
    fn validate(&self, _ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        // The query reader joins lines itself.
        Ok(ValidationResult::Valid(None))
    }
}

impl Helper for ShellHelper {}

fn editor_error(err: ReadlineError) -> ShellError {
    match err {
        ReadlineError::Io(e) => ShellError::Io(e),
        other => ShellError::Io(io::Error::new(io::ErrorKind::Other, other.to_string())),
    }
}

/// Interactive line editor with persistent history.
pub struct EditorSource {
    editor: Editor<ShellHelper, DefaultHistory>,
    history_file: Option<PathBuf>,
}

impl EditorSource {
    /// Creates the editor and loads history.
    pub fn new() -> ShellResult<Self> {
        let config = Config::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .edit_mode(EditMode::Emacs)
            .max_history_size(1000)
            .map_err(editor_error)?
            .build();

        let mut editor = Editor::with_config(config).map_err(editor_error)?;
        editor.set_helper(Some(ShellHelper::new()));

        let history_file = history_file();
        if let Some(path) = history_file.as_ref().filter(|p| p.exists()) {
            if let Err(e) = editor.load_history(path) {
                warn!(path = %path.display(), error = %e, "could not load history");
            }
        }

        Ok(Self {
            editor,
            history_file,
        })
    }

    fn save_history(&mut self) {
        let Some(path) = &self.history_file else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = self.editor.save_history(path) {
            warn!(path = %path.display(), error = %e, "could not save history");
        }
    }
}

impl LineSource for EditorSource {
    fn read_line(&mut self, prompt: &str) -> ShellResult<Line> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Line::Text(line)),
            Err(ReadlineError::Interrupted) => Ok(Line::Interrupted),
            Err(ReadlineError::Eof) => Ok(Line::Eof),
            Err(e) => Err(editor_error(e)),
        }
    }

    fn add_history(&mut self, statement: &str) {
        let _ = self.editor.add_history_entry(statement);
    }
}

impl Drop for EditorSource {
    fn drop(&mut self) {
        self.save_history();
    }
}

fn history_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("dbsh").join("history"))
}

/// Assembles statements from physical lines.
pub struct QueryReader<S> {
    source: S,
    line_numbers: bool,
    statements: usize,
}

impl<S: LineSource> QueryReader<S> {
    /// Creates a reader over a line source.
    pub fn new(source: S) -> Self {
        Self {
            source,
            line_numbers: false,
            statements: 0,
        }
    }

    /// Numbers the first prompt of each statement.
    pub fn set_line_numbers(&mut self, on: bool) {
        self.line_numbers = on;
    }

    fn prompt(&self, continuation: bool) -> String {
        match (continuation, self.line_numbers) {
            (true, _) => CONTINUATION_PROMPT.to_string(),
            (false, true) => format!("[{}] {}", self.statements + 1, PROMPT),
            (false, false) => PROMPT.to_string(),
        }
    }

    /// Reads the next statement, without its terminator.
    ///
    /// Returns `None` at end of input. A partial statement pending at end of
    /// input is returned as the last statement.
    pub fn read_statement(&mut self) -> ShellResult<Option<String>> {
        let mut parts: Vec<String> = Vec::new();
        loop {
            let prompt = self.prompt(!parts.is_empty());
            let line = match self.source.read_line(&prompt)? {
                Line::Text(line) => line,
                Line::Interrupted => {
                    if !parts.is_empty() {
                        debug!(lines = parts.len(), "partial statement discarded");
                    }
                    parts.clear();
                    continue;
                }
                Line::Eof if parts.is_empty() => return Ok(None),
                Line::Eof => {
                    debug!("end of input inside a statement");
                    return Ok(Some(self.finish(parts)));
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if parts.is_empty() && is_shell_keyword(line) {
                return Ok(Some(self.finish(vec![line.to_string()])));
            }
            parts.push(line.to_string());
            if line.ends_with(';') {
                return Ok(Some(self.finish(parts)));
            }
        }
    }

    fn finish(&mut self, parts: Vec<String>) -> String {
        let joined = parts.join(" ");
        self.source.add_history(&joined);
        self.statements += 1;
        let statement = joined.strip_suffix(';').unwrap_or(&joined).trim_end();
        statement.to_string()
    }

    /// Number of statements read so far.
    pub fn statements_read(&self) -> usize {
        self.statements
    }
}

fn is_shell_keyword(line: &str) -> bool {
    SHELL_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(line))
}
