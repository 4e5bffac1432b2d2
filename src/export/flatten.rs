//! Document flattening
//!
//! Turns a nested document into a mapping from dotted path to value, e.g.
//! `{a: {b: 1}, c: [true]}` becomes `{"a.b": 1, "c.0": true}` in leaf-only
//! mode. The result is itself an ordered [`Document`], so paths keep the
//! depth-first order in which they were discovered.

use bson::{Bson, Document};

/// Default path separator.
pub const PATH_SEPARATOR: char = '.';

/// Flatten a document into a path → value mapping.
///
/// # Arguments
/// * `doc` - Document to flatten
/// * `separator` - Character placed between path segments
/// * `leaf_only` - When false, nested documents and arrays are also recorded
///   at their own path, after their children
///
/// # Returns
/// * `Document` - Flat mapping keyed by path
///
/// Null values are skipped entirely. Null array elements are dropped before
/// indexing, so `[null, 5]` flattens to `{"0": 5}`.
pub fn flatten(doc: &Document, separator: char, leaf_only: bool) -> Document {
    let mut out = Document::new();
    flatten_document(&mut out, doc, separator, leaf_only, "");
    out
}

/// Flatten with the default separator, leaves only.
pub fn flatten_leaves(doc: &Document) -> Document {
    flatten(doc, PATH_SEPARATOR, true)
}

fn flatten_document(
    out: &mut Document,
    doc: &Document,
    separator: char,
    leaf_only: bool,
    prefix: &str,
) {
    for (key, value) in doc.iter().filter(|(_, v)| !matches!(v, Bson::Null)) {
        let path = join_path(prefix, separator, key);
        flatten_value(out, value, separator, leaf_only, path);
    }
}

fn flatten_value(out: &mut Document, value: &Bson, separator: char, leaf_only: bool, path: String) {
    match value {
        Bson::Document(nested) => {
            flatten_document(out, nested, separator, leaf_only, &path);
            if !leaf_only {
                out.insert(path, value.clone());
            }
        }
        Bson::Array(items) => {
            let present = items.iter().filter(|item| !matches!(item, Bson::Null));
            for (index, item) in present.enumerate() {
                let item_path = join_path(&path, separator, &index.to_string());
                flatten_value(out, item, separator, leaf_only, item_path);
            }
            if !leaf_only {
                out.insert(path, value.clone());
            }
        }
        scalar => {
            out.insert(path, scalar.clone());
        }
    }
}

/// Join a path prefix and a segment.
pub(crate) fn join_path(prefix: &str, separator: char, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        let mut path = String::with_capacity(prefix.len() + 1 + segment.len());
        path.push_str(prefix);
        path.push(separator);
        path.push_str(segment);
        path
    }
}
