//! Streaming export engine
//!
//! Converts a stream of MongoDB documents into line-delimited JSON or
//! delimited-text rows.
//!
//! # Data flow
//!
//! ```text
//! RecordSource ──► ExportPipeline ──► encode workers ──► OutputSink
//!  (cursor)        (bounded, unordered)  (traversal +     (single writer)
//!                                         writer)
//! ```
//!
//! - [`flatten`]: nested document to dotted-path map
//! - [`traversal`]: depth-first [`WriteEvent`] stream shared by all writers
//! - [`writers`]: JSON and tabular [`DocumentEncoder`]s
//! - [`columns`]: fixed output [`ColumnSet`]
//! - [`source`]: [`RecordSource`] implementations and the server [`QueryPlan`]
//! - [`pipeline`]: bounded-concurrency [`ExportPipeline`]
//! - [`progress`]: conflating progress emitter and display
//! - [`sink`]: buffered [`OutputSink`]
//! - [`settings`] and [`job`]: validated options and the end-to-end run
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fastexport::export::{
//!     ColumnSet, DateFormat, ExportPipeline, OutputSink, PipelineOptions, TabularEncoder, VecSource,
//! };
//! use mongodb::bson::doc;
//!
//! # async fn demo() -> fastexport::error::Result<()> {
//! let columns = Arc::new(ColumnSet::from_fields(["name", "age"])?);
//! let encoder = TabularEncoder::new(columns, ",", DateFormat::default()).with_header(true);
//! let pipeline = ExportPipeline::new(Arc::new(encoder), PipelineOptions::default());
//!
//! let source = VecSource::new(vec![doc! { "name": "Ann", "age": 30 }]);
//! let run = pipeline.run(source, OutputSink::new(Vec::new(), "memory")).await?;
//! assert_eq!(run.output, b"name,age\nAnn,30\n");
//! # Ok(())
//! # }
//! ```

pub mod columns;
pub mod flatten;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod settings;
pub mod sink;
pub mod source;
pub mod traversal;
pub mod writers;

#[cfg(test)]
mod tests;

pub use columns::ColumnSet;
pub use flatten::{PATH_SEPARATOR, flatten, flatten_leaves};
pub use job::{ExportJob, ExportOutcome};
pub use pipeline::{ExportPipeline, ExportSummary, PipelineOptions, PipelineOutput};
pub use progress::{ProgressDisplay, ProgressEmitter, ProgressReport, ProgressTracker};
pub use settings::{ExportMode, ExportRequest, ExportSettings, FieldSelection, OutputMode, OutputTarget};
pub use sink::OutputSink;
pub use source::{CursorSource, QueryPlan, RecordSource, Unwind, VecSource};
pub use traversal::{EventWriter, WriteEvent, encode_with, traverse};
pub use writers::{DateFormat, DocumentEncoder, JsonEncoder, JsonFormat, TabularEncoder};
