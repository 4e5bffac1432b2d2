//! Record sources for export operations
//!
//! The pipeline pulls documents one at a time through [`RecordSource`]. The
//! server-backed [`CursorSource`] receives documents that are already
//! filtered, projected, limited and unwound by the query built from a
//! [`QueryPlan`]. [`VecSource`] and [`Unwind`] provide the same contract
//! without a server.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::{Collection, Cursor};
use tracing::{debug, info};

use crate::error::Result;

/// Lazy, forward-only sequence of documents
#[async_trait]
pub trait RecordSource: Send {
    /// Fetch the next document
    ///
    /// # Returns
    /// * `Result<Option<Document>>` - Next document, or None when exhausted
    async fn next_document(&mut self) -> Result<Option<Document>>;
}

#[async_trait]
impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        (**self).next_document().await
    }
}

/// Cursor-based record source
///
/// Works for both find and aggregate cursors.
pub struct CursorSource {
    cursor: Option<Cursor<Document>>,
    total_fetched: u64,
    query_type: &'static str,
}

impl CursorSource {
    /// Create a new cursor source
    ///
    /// # Arguments
    /// * `cursor` - MongoDB cursor from find or aggregate operation
    /// * `query_type` - Type of query for logging ("Find" or "Aggregate")
    pub fn new(cursor: Cursor<Document>, query_type: &'static str) -> Self {
        Self {
            cursor: Some(cursor),
            total_fetched: 0,
            query_type,
        }
    }
}

#[async_trait]
impl RecordSource for CursorSource {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        match cursor.try_next().await {
            Ok(Some(doc)) => {
                self.total_fetched += 1;
                Ok(Some(doc))
            }
            Ok(None) => {
                debug!(
                    "{} cursor exhausted after {} documents",
                    self.query_type, self.total_fetched
                );
                self.cursor = None;
                Ok(None)
            }
            Err(e) => {
                // Release the server cursor before surfacing the error
                self.cursor = None;
                Err(e.into())
            }
        }
    }
}

impl Drop for CursorSource {
    fn drop(&mut self) {
        if self.cursor.take().is_some() {
            info!(
                "Closed {} cursor early after fetching {} documents",
                self.query_type, self.total_fetched
            );
        }
    }
}

/// In-memory record source.
pub struct VecSource {
    items: VecDeque<Result<Document>>,
}

impl VecSource {
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            items: docs.into_iter().map(Ok).collect(),
        }
    }

    /// Source that yields the given results in order, errors included.
    pub fn from_results(items: Vec<Result<Document>>) -> Self {
        Self { items: items.into() }
    }
}

#[async_trait]
impl RecordSource for VecSource {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        self.items.pop_front().transpose()
    }
}

/// Adapter duplicating each document once per element of one array field
///
/// Follows `$unwind` semantics: a missing, null or empty array yields no
/// documents and a non-array value passes through unchanged.
pub struct Unwind<S> {
    inner: S,
    field: String,
    pending: VecDeque<Document>,
}

impl<S: RecordSource> Unwind<S> {
    pub fn new(inner: S, field: impl Into<String>) -> Self {
        Self {
            inner,
            field: field.into(),
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl<S: RecordSource> RecordSource for Unwind<S> {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        loop {
            if let Some(doc) = self.pending.pop_front() {
                return Ok(Some(doc));
            }
            match self.inner.next_document().await? {
                Some(doc) => self.pending.extend(unwind(doc, &self.field)),
                None => return Ok(None),
            }
        }
    }
}

/// Expand `doc` on the dotted array path `field`.
pub fn unwind(doc: Document, field: &str) -> Vec<Document> {
    let elements = match lookup(&doc, field) {
        None | Some(Bson::Null) => return Vec::new(),
        Some(Bson::Array(items)) => items.clone(),
        Some(_) => return vec![doc],
    };

    elements
        .into_iter()
        .map(|element| {
            let mut copy = doc.clone();
            replace(&mut copy, field, element);
            copy
        })
        .collect()
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    match (doc.get(head)?, rest) {
        (value, None) => Some(value),
        (Bson::Document(inner), Some(rest)) => lookup(inner, rest),
        _ => None,
    }
}

fn replace(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                replace(inner, rest, value);
            }
        }
    }
}

/// Server-side query used to feed the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// JSON mode: plain find.
    Find {
        filter: Document,
        projection: Option<Document>,
        limit: Option<i64>,
    },
    /// Tabular mode: aggregation with optional `$unwind`.
    Aggregate { pipeline: Vec<Document> },
}

impl QueryPlan {
    /// Plan for line-delimited JSON output.
    pub fn find(filter: Document, projection: Option<Document>, limit: Option<i64>) -> Self {
        QueryPlan::Find {
            filter,
            projection,
            limit,
        }
    }

    /// Plan for tabular output
    ///
    /// The `$limit` stage follows `$unwind` so the cap counts output rows.
    ///
    /// # Arguments
    /// * `filter` - `$match` predicate
    /// * `projection` - `$project` document
    /// * `unwind` - Optional array field to unwind
    /// * `limit` - Optional row cap
    pub fn aggregate(
        filter: Document,
        projection: Document,
        unwind: Option<&str>,
        limit: Option<i64>,
    ) -> Self {
        let mut pipeline = vec![doc! { "$match": filter }];
        if let Some(field) = unwind {
            pipeline.push(doc! { "$unwind": format!("${field}") });
        }
        pipeline.push(doc! { "$project": projection });
        if let Some(n) = limit {
            pipeline.push(doc! { "$limit": n });
        }
        QueryPlan::Aggregate { pipeline }
    }

    /// Execute the plan and wrap the cursor
    ///
    /// # Arguments
    /// * `collection` - Target collection
    /// * `batch_size` - Cursor batch size hint
    ///
    /// # Returns
    /// * `Result<CursorSource>` - Source over the server cursor
    pub async fn open(self, collection: &Collection<Document>, batch_size: u32) -> Result<CursorSource> {
        match self {
            QueryPlan::Find {
                filter,
                projection,
                limit,
            } => {
                debug!("Opening find cursor with filter {}", filter);
                let mut action = collection.find(filter).batch_size(batch_size);
                if let Some(p) = projection {
                    action = action.projection(p);
                }
                if let Some(n) = limit {
                    action = action.limit(n);
                }
                Ok(CursorSource::new(action.await?, "Find"))
            }
            QueryPlan::Aggregate { pipeline } => {
                debug!("Opening aggregate cursor with {} stages", pipeline.len());
                let cursor = collection.aggregate(pipeline).batch_size(batch_size).await?;
                Ok(CursorSource::new(cursor, "Aggregate"))
            }
        }
    }
}

/// Inclusion projection `{a: 1, b: 1, _id: 0}` for an explicit field list.
///
/// `_id` is only kept when the list names it.
pub fn fields_to_projection<I, S>(fields: I) -> Document
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut projection: Document = fields
        .into_iter()
        .map(|f| (f.as_ref().to_string(), Bson::Int32(1)))
        .collect();
    if !projection.contains_key("_id") {
        projection.insert("_id", Bson::Int32(0));
    }
    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;

    async fn drain<S: RecordSource>(mut source: S) -> Vec<Document> {
        let mut out = Vec::new();
        while let Some(doc) = source.next_document().await.unwrap() {
            out.push(doc);
        }
        out
    }

    #[tokio::test]
    async fn test_vec_source_yields_in_order() {
        let docs = drain(VecSource::new(vec![doc! { "n": 1 }, doc! { "n": 2 }])).await;
        assert_eq!(docs, vec![doc! { "n": 1 }, doc! { "n": 2 }]);
    }

    #[tokio::test]
    async fn test_vec_source_surfaces_errors() {
        let mut source = VecSource::from_results(vec![
            Ok(doc! { "n": 1 }),
            Err(ExportError::Generic("boom".to_string())),
        ]);
        assert!(source.next_document().await.unwrap().is_some());
        assert!(source.next_document().await.is_err());
        assert!(source.next_document().await.unwrap().is_none());
    }

    #[test]
    fn test_unwind_array_field() {
        let doc = doc! {
            "_id": "myId",
            "firstName": "Bob",
            "taxlots": [ { "rec": 0 }, { "rec": 1 }, { "rec": 2 } ],
        };
        let rows = unwind(doc, "taxlots");
        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.get_str("firstName").unwrap(), "Bob");
            assert_eq!(row.get_document("taxlots").unwrap(), &doc! { "rec": i as i32 });
        }
    }

    #[test]
    fn test_unwind_missing_null_empty_and_scalar() {
        assert!(unwind(doc! { "a": 1 }, "tags").is_empty());
        assert!(unwind(doc! { "tags": null }, "tags").is_empty());
        assert!(unwind(doc! { "tags": [] }, "tags").is_empty());
        assert_eq!(unwind(doc! { "tags": "x" }, "tags"), vec![doc! { "tags": "x" }]);
    }

    #[test]
    fn test_unwind_dotted_path() {
        let rows = unwind(doc! { "a": { "b": [1, 2], "c": true } }, "a.b");
        assert_eq!(
            rows,
            vec![
                doc! { "a": { "b": 1, "c": true } },
                doc! { "a": { "b": 2, "c": true } },
            ]
        );
    }

    #[tokio::test]
    async fn test_unwind_adapter() {
        let source = VecSource::new(vec![
            doc! { "k": [1, 2] },
            doc! { "k": [] },
            doc! { "k": [3] },
        ]);
        let docs = drain(Unwind::new(source, "k")).await;
        assert_eq!(docs, vec![doc! { "k": 1 }, doc! { "k": 2 }, doc! { "k": 3 }]);
    }

    #[test]
    fn test_fields_to_projection() {
        assert_eq!(
            fields_to_projection(["taxlots.rec", "firstName"]),
            doc! { "taxlots.rec": 1, "firstName": 1, "_id": 0 }
        );
    }

    #[test]
    fn test_fields_to_projection_keeps_listed_id() {
        assert_eq!(
            fields_to_projection(["_id", "firstName"]),
            doc! { "_id": 1, "firstName": 1 }
        );
    }

    #[test]
    fn test_aggregate_plan_stages() {
        let plan = QueryPlan::aggregate(
            doc! { "active": true },
            doc! { "taxlots.rec": 1 },
            Some("taxlots"),
            Some(5),
        );
        let QueryPlan::Aggregate { pipeline } = plan else {
            panic!("expected aggregate plan");
        };
        assert_eq!(
            pipeline,
            vec![
                doc! { "$match": { "active": true } },
                doc! { "$unwind": "$taxlots" },
                doc! { "$project": { "taxlots.rec": 1 } },
                doc! { "$limit": 5i64 },
            ]
        );
    }

    #[test]
    fn test_aggregate_plan_without_unwind_or_limit() {
        let plan = QueryPlan::aggregate(doc! {}, doc! { "a": 1 }, None, None);
        assert_eq!(
            plan,
            QueryPlan::Aggregate {
                pipeline: vec![doc! { "$match": {} }, doc! { "$project": { "a": 1 } }],
            }
        );
    }
}
