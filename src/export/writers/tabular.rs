//! Delimited-text (CSV) row encoding
//!
//! [`TabularWriter`] is the push-based hierarchical writer: it consumes the
//! depth-first [`WriteEvent`] stream of one document and produces a single
//! delimited row whose fields follow the [`ColumnSet`] order.
//!
//! The writer keeps an explicit stack of frames instead of parent-linked
//! contexts. Each frame is one open container; its `name` is the path segment
//! of the value currently being written inside it (a field name for
//! documents, an element index for arrays). A scalar's path is the
//! separator-joined names of all open frames.
//!
//! Values are emitted raw: no quoting and no escaping of delimiters or line
//! breaks inside strings.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};

use super::DocumentEncoder;
use crate::error::{ConfigError, EncodeError};
use crate::export::columns::ColumnSet;
use crate::export::flatten::PATH_SEPARATOR;
use crate::export::traversal::{EventWriter, WriteEvent, encode_with};

/// Default datetime pattern: ISO-8601 in UTC with millisecond precision.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Default field delimiter.
pub const DEFAULT_DELIMITER: &str = ",";

/// Validated `strftime`-style pattern used for datetime cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    pattern: String,
}

impl DateFormat {
    /// Parse and validate a pattern.
    pub fn new(pattern: impl Into<String>) -> Result<Self, ConfigError> {
        let pattern = pattern.into();
        if pattern.is_empty() || StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::InvalidValue {
                field: "date-format".to_string(),
                value: pattern,
            });
        }
        Ok(Self { pattern })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Format epoch milliseconds as UTC; `None` when outside chrono's range.
    pub fn format_millis(&self, millis: i64) -> Option<String> {
        let datetime: DateTime<Utc> = DateTime::from_timestamp_millis(millis)?;
        let mut out = String::with_capacity(self.pattern.len() + 16);
        write!(out, "{}", datetime.format(&self.pattern)).ok()?;
        Some(out)
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

/// Kind of an open container on the writer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Nothing open: before the first event or after the row is finished.
    TopLevel,
    Document,
    Array,
}

#[derive(Debug)]
struct Frame {
    kind: ContainerKind,
    /// Segment of the value currently being written inside this container.
    name: Option<String>,
    /// Next element index, arrays only.
    next_index: usize,
}

impl Frame {
    fn new(kind: ContainerKind) -> Self {
        Self {
            kind,
            name: None,
            next_index: 0,
        }
    }
}

/// Hierarchical writer producing one delimited row per document.
///
/// Row state is owned by the writer, so each document gets its own writer
/// and nothing is shared between workers.
pub struct TabularWriter<'a> {
    columns: &'a ColumnSet,
    delimiter: &'a str,
    date_format: &'a DateFormat,
    frames: Vec<Frame>,
    values: HashMap<String, String>,
    row: Option<String>,
}

impl<'a> TabularWriter<'a> {
    pub fn new(columns: &'a ColumnSet, delimiter: &'a str, date_format: &'a DateFormat) -> Self {
        Self {
            columns,
            delimiter,
            date_format,
            frames: Vec::with_capacity(8),
            values: HashMap::with_capacity(columns.len()),
            row: None,
        }
    }

    /// Kind of the innermost open container.
    pub fn context(&self) -> ContainerKind {
        self.frames
            .last()
            .map(|frame| frame.kind)
            .unwrap_or(ContainerKind::TopLevel)
    }

    /// Assign the path segment for the next value in the innermost container.
    fn claim_slot(&mut self) -> Result<(), EncodeError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| EncodeError::Protocol("value outside of a document".to_string()))?;

        match frame.kind {
            ContainerKind::Document if frame.name.is_none() => Err(EncodeError::Protocol(
                "value written before its field name".to_string(),
            )),
            ContainerKind::Document => Ok(()),
            ContainerKind::Array => {
                frame.name = Some(frame.next_index.to_string());
                frame.next_index += 1;
                Ok(())
            }
            ContainerKind::TopLevel => Err(EncodeError::Protocol(
                "top level is not a container".to_string(),
            )),
        }
    }

    /// Forget the current segment once its value is complete.
    fn release_slot(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.name = None;
        }
    }

    fn current_path(&self) -> String {
        let mut path = String::new();
        for name in self.frames.iter().filter_map(|frame| frame.name.as_deref()) {
            if !path.is_empty() {
                path.push(PATH_SEPARATOR);
            }
            path.push_str(name);
        }
        path
    }

    fn open(&mut self, kind: ContainerKind) -> Result<(), EncodeError> {
        if self.row.is_some() {
            return Err(EncodeError::Protocol("row already finished".to_string()));
        }
        if kind == ContainerKind::Array || !self.frames.is_empty() {
            self.claim_slot()?;
        }
        self.frames.push(Frame::new(kind));
        Ok(())
    }

    fn close(&mut self, kind: ContainerKind) -> Result<(), EncodeError> {
        match self.frames.pop() {
            Some(frame) if frame.kind == kind => {}
            _ => {
                return Err(EncodeError::Protocol(format!(
                    "unbalanced end of {kind:?}"
                )));
            }
        }

        if self.frames.is_empty() {
            self.row = Some(self.join_row());
        } else {
            self.release_slot();
        }
        Ok(())
    }

    fn write_scalar(&mut self, value: &Bson) -> Result<(), EncodeError> {
        self.claim_slot()?;
        let path = self.current_path();
        let formatted = format_cell(value, &path, self.date_format)?;
        if let Some(text) = formatted
            && self.columns.contains(&path)
        {
            self.values.insert(path, text);
        }
        if self.context() == ContainerKind::Document {
            self.release_slot();
        }
        Ok(())
    }

    fn join_row(&mut self) -> String {
        let mut row = String::new();
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                row.push_str(self.delimiter);
            }
            if let Some(value) = self.values.get(column) {
                row.push_str(value);
            }
        }
        self.values.clear();
        row
    }
}

impl EventWriter for TabularWriter<'_> {
    type Output = String;

    fn write_event(&mut self, event: WriteEvent<'_>) -> Result<(), EncodeError> {
        match event {
            WriteEvent::StartDocument => self.open(ContainerKind::Document),
            WriteEvent::EndDocument => self.close(ContainerKind::Document),
            WriteEvent::StartArray => self.open(ContainerKind::Array),
            WriteEvent::EndArray => self.close(ContainerKind::Array),
            WriteEvent::FieldName(name) => match self.frames.last_mut() {
                Some(frame) if frame.kind == ContainerKind::Document => {
                    frame.name = Some(name.to_string());
                    Ok(())
                }
                _ => Err(EncodeError::Protocol(format!(
                    "field name '{name}' outside of a document"
                ))),
            },
            WriteEvent::Scalar(value) => self.write_scalar(value),
        }
    }

    fn finish(self) -> Result<String, EncodeError> {
        self.row
            .ok_or_else(|| EncodeError::Protocol("document was not closed".to_string()))
    }
}

/// Format one scalar for a cell.
///
/// Returns `None` for `Null`, which leaves the cell empty.
fn format_cell(value: &Bson, path: &str, date_format: &DateFormat) -> Result<Option<String>, EncodeError> {
    let text = match value {
        Bson::Null => return Ok(None),
        Bson::Boolean(b) => b.to_string(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(f) => format_double(*f),
        Bson::Decimal128(d) => d.to_string(),
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => {
            let millis = dt.timestamp_millis();
            date_format
                .format_millis(millis)
                .ok_or_else(|| EncodeError::DateOutOfRange {
                    path: path.to_string(),
                    millis,
                })?
        }
        Bson::Document(_) | Bson::Array(_) => {
            return Err(EncodeError::Protocol(format!(
                "container at '{path}' written as a scalar"
            )));
        }
        unsupported => {
            return Err(EncodeError::UnsupportedType {
                bson_type: type_label(unsupported),
                path: path.to_string(),
            });
        }
    };
    Ok(Some(text))
}

/// Shortest round-trip text, keeping a fractional part on integral values.
fn format_double(f: f64) -> String {
    format!("{f:?}")
}

fn type_label(value: &Bson) -> &'static str {
    match value {
        Bson::Binary(_) => "binary",
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => "javascript",
        Bson::DbPointer(_) => "dbpointer",
        Bson::RegularExpression(_) => "regular expression",
        Bson::Timestamp(_) => "timestamp",
        Bson::Symbol(_) => "symbol",
        Bson::Undefined => "undefined",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
        _ => "unknown",
    }
}

/// Tabular [`DocumentEncoder`]: one delimited row per document.
#[derive(Debug, Clone)]
pub struct TabularEncoder {
    columns: Arc<ColumnSet>,
    delimiter: String,
    date_format: DateFormat,
    include_header: bool,
}

impl TabularEncoder {
    pub fn new(columns: Arc<ColumnSet>, delimiter: impl Into<String>, date_format: DateFormat) -> Self {
        Self {
            columns,
            delimiter: delimiter.into(),
            date_format,
            include_header: false,
        }
    }

    /// Emit a header line before the first row.
    pub fn with_header(mut self, include_header: bool) -> Self {
        self.include_header = include_header;
        self
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    /// Encode one document to its row text.
    pub fn encode_row(&self, doc: &Document) -> Result<String, EncodeError> {
        let writer = TabularWriter::new(&self.columns, &self.delimiter, &self.date_format);
        encode_with(doc, writer)
    }
}

impl DocumentEncoder for TabularEncoder {
    fn encode(&self, doc: &Document) -> Result<Vec<u8>, EncodeError> {
        self.encode_row(doc).map(String::into_bytes)
    }

    fn header(&self) -> Option<String> {
        self.include_header
            .then(|| self.columns.header(&self.delimiter))
    }
}
