//! Output column derivation
//!
//! A [`ColumnSet`] is built once, before the first record is read, from
//! either an explicit field list or a projection document. It fixes the
//! column order and header text for the whole run.

use std::collections::HashSet;

use bson::{Bson, Document};

use super::flatten::{PATH_SEPARATOR, flatten_leaves};
use crate::error::ConfigError;

/// Fixed, ordered, deduplicated list of dotted output paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSet {
    columns: Vec<String>,
    index: HashSet<String>,
}

impl ColumnSet {
    /// Build from an explicit field list, e.g. the values of `--fields`.
    ///
    /// Names are trimmed; empty names and repeats are dropped, keeping the
    /// first occurrence.
    pub fn from_fields<I, S>(fields: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for field in fields {
            set.push(field.as_ref().trim());
        }

        if set.is_empty() {
            return Err(ConfigError::MissingField(
                "at least one field name is required".to_string(),
            ));
        }
        Ok(set)
    }

    /// Build from a projection document such as `{"a.b": 1, c: {d: true}, _id: 0}`.
    ///
    /// Inclusions (non-zero numbers, `true`, computed expressions) become
    /// columns in projection order. Exclusions are ignored. Operator keys like
    /// `$slice` end the path, so `{a: {$slice: 2}}` yields column `a`.
    ///
    /// # Errors
    /// A projection without any inclusion cannot name its columns up front
    /// and is rejected.
    pub fn from_projection(projection: &Document) -> Result<Self, ConfigError> {
        let mut set = Self::empty();

        for (path, value) in flatten_leaves(projection).iter() {
            let column = strip_operator(path);
            if column.is_empty() || (!is_inclusion(value) && column.len() == path.len()) {
                continue;
            }
            set.push(column);
        }

        if set.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "projection".to_string(),
                value: projection.to_string(),
            });
        }
        Ok(set)
    }

    fn empty() -> Self {
        Self {
            columns: Vec::new(),
            index: HashSet::new(),
        }
    }

    fn push(&mut self, column: &str) {
        if !column.is_empty() && self.index.insert(column.to_string()) {
            self.columns.push(column.to_string());
        }
    }

    /// Column paths in output order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains(path)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Header line text: column paths joined by `delimiter`.
    pub fn header(&self, delimiter: &str) -> String {
        self.columns.join(delimiter)
    }
}

/// Cut a flattened projection path at its first operator segment.
fn strip_operator(path: &str) -> &str {
    let mut end = 0usize;
    for (i, segment) in path.split(PATH_SEPARATOR).enumerate() {
        if segment.starts_with('$') {
            return &path[..end.saturating_sub(usize::from(i > 0))];
        }
        end += segment.len() + 1;
    }
    path
}

fn is_inclusion(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(f) => *f != 0.0,
        // "$field" references and literals are computed columns.
        Bson::String(_) => true,
        _ => false,
    }
}
