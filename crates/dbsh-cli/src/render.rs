//! Result rendering.
//!
//! One pass over a result set writes an aligned text table to the console
//! and, when a transcript is recording, an HTML table. Every column shares
//! one width: the longest header label.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbsh_client::{ResultSet, Value};
use tracing::{debug, warn};

use crate::error::{ShellError, ShellResult};
use crate::transcript::{escape_html, Transcript};
use crate::transform::{Transformer, TransformerRegistry};

/// A column of the result set being rendered.
pub struct ColumnDescriptor {
    /// 1-based ordinal.
    pub ordinal: usize,
    /// Column label.
    pub name: String,
    /// Upper-cased database type name.
    pub type_name: String,
    /// Transformer resolved for this column.
    pub transformer: Option<Arc<dyn Transformer>>,
}

impl ColumnDescriptor {
    fn cell(&self, value: &Value) -> String {
        let Some(transformer) = &self.transformer else {
            return value.to_string();
        };
        match transformer.transform(value) {
            Ok(text) => text,
            Err(e) => {
                warn!(column = %self.name, error = %e, "transformer failed");
                format!("<error: {}>", e.message)
            }
        }
    }
}

impl fmt::Debug for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("transformer", &self.transformer.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

/// Discovers columns by probing ordinals from 1 until the metadata refuses.
pub fn describe_columns(rs: &dyn ResultSet, transformers: &TransformerRegistry) -> Vec<ColumnDescriptor> {
    let metadata = rs.metadata();
    let mut columns = Vec::new();
    let mut ordinal = 1;
    while let Ok(name) = metadata.column_name(ordinal) {
        let type_name = metadata
            .column_type_name(ordinal)
            .unwrap_or_default()
            .to_uppercase();
        let transformer = transformers.lookup(name, &type_name);
        columns.push(ColumnDescriptor {
            ordinal,
            name: name.to_string(),
            type_name,
            transformer,
        });
        ordinal += 1;
    }
    columns
}

/// Outcome of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSummary {
    /// Rows printed.
    pub rows: usize,
    /// True when more rows existed beyond the limit.
    pub limited: bool,
    /// Time spent on the pass.
    pub elapsed: Duration,
}

impl fmt::Display for RenderSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row{} ({}) in {}ms",
            self.rows,
            if self.rows == 1 { "" } else { "s" },
            if self.limited { "limited" } else { "all" },
            self.elapsed.as_millis()
        )
    }
}

/// Renders `rs` to `out` and the transcript.
///
/// Returns `None` when `limit` is 0. A negative limit prints every row.
pub fn render<W: Write>(
    rs: &mut dyn ResultSet,
    transformers: &TransformerRegistry,
    transcript: &Transcript,
    limit: i64,
    out: &mut W,
) -> ShellResult<Option<RenderSummary>> {
    if limit == 0 {
        debug!("print limit is 0, result not rendered");
        return Ok(None);
    }
    let start = Instant::now();

    let columns = describe_columns(rs, transformers);
    let width = columns.iter().map(|c| c.name.chars().count()).max().unwrap_or(0);
    debug!(columns = columns.len(), width, "rendering result");

    let mut header = String::new();
    let mut separator = String::new();
    let mut html = String::from("<table>\n<tr>");
    for column in &columns {
        header.push_str(&format!("{:<width$} |", column.name, width = width));
        separator.push_str(&"-".repeat(width));
        separator.push_str("-+");
        html.push_str(&format!("<th>{}</th>", escape_html(&column.name)));
    }
    html.push_str("</tr>\n");
    writeln!(out, "{}", header)?;
    writeln!(out, "{}", separator)?;
    transcript.write(&html);

    let mut rows = 0usize;
    let mut limited = false;
    loop {
        if limit > 0 && rows as i64 >= limit {
            limited = match rs.next() {
                Ok(more) => more,
                Err(e) => {
                    warn!(error = %e, "could not look for rows past the limit");
                    false
                }
            };
            break;
        }

        let line = match read_row(rs, &columns) {
            Ok(Some(cells)) => cells,
            Ok(None) => break,
            Err(e) => {
                transcript.write("</table>\n");
                return Err(e);
            }
        };

        let mut text = String::new();
        let mut html = String::from("<tr>");
        for cell in &line {
            text.push_str(&format!("{:<width$} |", cell, width = width));
            html.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        html.push_str("</tr>\n");
        writeln!(out, "{}", text)?;
        transcript.write(&html);
        rows += 1;
    }
    transcript.write("</table>\n");

    let summary = RenderSummary {
        rows,
        limited,
        elapsed: start.elapsed(),
    };
    writeln!(out, "{}", summary)?;
    transcript.write(&format!("<p>{}</p>\n", escape_html(&summary.to_string())));
    Ok(Some(summary))
}

fn read_row(rs: &mut dyn ResultSet, columns: &[ColumnDescriptor]) -> ShellResult<Option<Vec<String>>> {
    if !rs.next().map_err(ShellError::from)? {
        return Ok(None);
    }
    let mut cells = Vec::with_capacity(columns.len());
    for column in columns {
        let cell = match rs.get(column.ordinal) {
            Ok(value) => column.cell(&value),
            Err(e) => {
                warn!(column = %column.name, error = %e, "cell could not be read");
                Value::Null.to_string()
            }
        };
        cells.push(cell);
    }
    Ok(Some(cells))
}
