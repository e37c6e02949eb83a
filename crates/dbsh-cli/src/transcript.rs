//! HTML transcript of a shell session.
//!
//! The transcript is append-only and every block is flushed as soon as it is
//! written. Write failures never stop the shell: they are logged and the
//! failed write is dropped.
//!
//! [`Transcript`] is a cheap handle; clones share one file, so the
//! termination handler can close the document while the shell owns another
//! handle.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ShellResult;

const STYLE: &str = "<style>\n\
body { font-family: monospace; }\n\
pre { background-color: #f4f4f4; padding: 4px; }\n\
table { border-collapse: collapse; margin: 4px 0; }\n\
th { background-color: lightgray; }\n\
th, td { border: 1px solid #888; padding: 2px 6px; }\n\
.ok { color: green; }\n\
.failed { color: red; }\n\
</style>\n";

/// Escapes text for inclusion in HTML. Spaces become `&nbsp;` so column
/// alignment survives.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            ' ' => out.push_str("&nbsp;"),
            other => out.push(other),
        }
    }
    out
}

/// Transcript file name for a record identifier and start time.
pub fn file_name(record_id: &str, started_at: &DateTime<Local>) -> String {
    format!("dbsh_record_{}_{}.html", record_id, started_at.timestamp_millis())
}

#[derive(Debug, Default)]
struct Sink {
    writer: Option<BufWriter<File>>,
    paused: bool,
}

impl Sink {
    fn emit(&mut self, html: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_all(html.as_bytes()).and_then(|_| writer.flush()) {
            warn!(error = %e, "transcript write failed");
        }
    }
}

/// Optional HTML sink for the session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    sink: Arc<Mutex<Sink>>,
    path: Option<PathBuf>,
}

impl Transcript {
    /// A transcript that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Creates the transcript file in `dir` and writes the document head.
    pub fn open(dir: &Path, record_id: &str, started_at: DateTime<Local>) -> ShellResult<Self> {
        let path = dir.join(file_name(record_id, &started_at));
        let file = File::create(&path)?;
        info!(path = %path.display(), "recording transcript");

        let transcript = Self {
            sink: Arc::new(Mutex::new(Sink {
                writer: Some(BufWriter::new(file)),
                paused: false,
            })),
            path: Some(path),
        };
        transcript.sink.lock().emit(&format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>dbsh {}</title>\n{}</head>\n<body>\n\
             <h3>dbsh session {} started {}</h3>\n",
            escape_html(record_id),
            STYLE,
            escape_html(record_id),
            started_at.format("%Y-%m-%d %H:%M:%S"),
        ));
        Ok(transcript)
    }

    /// Path of the transcript file, if one was opened.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true while the file is open.
    pub fn is_open(&self) -> bool {
        self.sink.lock().writer.is_some()
    }

    /// Returns true when writes reach the file.
    pub fn is_recording(&self) -> bool {
        let sink = self.sink.lock();
        sink.writer.is_some() && !sink.paused
    }

    /// Pauses or resumes recording.
    pub fn set_paused(&self, paused: bool) {
        let mut sink = self.sink.lock();
        if sink.paused != paused {
            debug!(paused, "transcript recording toggled");
        }
        sink.paused = paused;
    }

    /// Appends raw HTML.
    pub fn write(&self, html: &str) {
        let mut sink = self.sink.lock();
        if !sink.paused {
            sink.emit(html);
        }
    }

    /// Records a statement as typed.
    pub fn record_input(&self, text: &str) {
        self.write(&format!("<pre>{}</pre>\n", escape_html(text)));
    }

    /// Records the outcome of one execution.
    pub fn record_status(&self, label: &str, ok: bool, elapsed: Duration) {
        let (class, status) = if ok { ("ok", "successful") } else { ("failed", "failed") };
        self.write(&format!(
            "<p>{} status : <span class='{}'>[{}]</span> in {}ms</p>\n",
            escape_html(label),
            class,
            status,
            elapsed.as_millis()
        ));
    }

    /// Records free text.
    pub fn record_text(&self, text: &str) {
        self.write(&format!("<pre>{}</pre>\n", escape_html(text)));
    }

    /// Records a connection block.
    pub fn record_connection(&self, url: &str, driver: &str, user: &str, elapsed: Duration) {
        self.write(&format!(
            "<table>\n<tr><th>url</th><td>{}</td></tr>\n<tr><th>driver</th><td>{}</td></tr>\n\
             <tr><th>user</th><td>{}</td></tr>\n<tr><th>connected in</th><td>{}ms</td></tr>\n</table>\n",
            escape_html(url),
            escape_html(driver),
            escape_html(user),
            elapsed.as_millis()
        ));
    }

    /// Writes the document tail and closes the file. Returns false if the
    /// transcript was not open.
    pub fn close(&self) -> bool {
        let mut sink = self.sink.lock();
        if sink.writer.is_none() {
            return false;
        }
        sink.emit(&format!(
            "<p>session ended {}</p>\n</body>\n</html>\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        sink.writer = None;
        info!("transcript closed");
        true
    }
}
