//! End-to-end export job
//!
//! Runs the steps around the pipeline: echo the query, connect and ping,
//! probe for an empty collection, open the server cursor and the sink, then
//! stream. [`ExportJob::export`] is the server-free part and accepts any
//! source and destination.

use std::io::IsTerminal;
use std::sync::Arc;

use mongodb::bson::{Bson, Document};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::pipeline::{ExportPipeline, ExportSummary, PipelineOutput};
use super::progress::{ProgressDisplay, ProgressTracker};
use super::settings::{ExportSettings, OutputTarget};
use super::sink::OutputSink;
use super::source::RecordSource;
use crate::connection::{ConnectionManager, sanitize_uri};
use crate::error::{ExitStatus, Result};

/// Final state of a job that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Records were streamed (possibly zero, possibly cancelled)
    Completed(ExportSummary),
    /// The collection is empty or missing; nothing was written
    EmptySource { namespace: String },
}

impl ExportOutcome {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            ExportOutcome::Completed(summary) if summary.cancelled => ExitStatus::Failed,
            ExportOutcome::Completed(_) => ExitStatus::Success,
            ExportOutcome::EmptySource { .. } => ExitStatus::EmptySource,
        }
    }
}

/// One export run over validated settings
pub struct ExportJob {
    settings: ExportSettings,
    display: ProgressDisplay,
    cancel_token: Option<CancellationToken>,
}

impl ExportJob {
    /// Create a new job
    ///
    /// Progress is hidden in test mode, drawn as a spinner on a terminal and
    /// printed as lines otherwise.
    pub fn new(settings: ExportSettings) -> Self {
        let display = if settings.test {
            ProgressDisplay::Hidden
        } else if std::io::stderr().is_terminal() {
            ProgressDisplay::Bar
        } else {
            ProgressDisplay::Lines
        };

        Self {
            settings,
            display,
            cancel_token: None,
        }
    }

    /// Override how progress is shown.
    pub fn with_display(mut self, display: ProgressDisplay) -> Self {
        self.display = display;
        self
    }

    /// Set cancellation token for this job.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Run the whole job against the server
    ///
    /// # Returns
    /// * `Result<ExportOutcome>` - Completed run or empty-source notice
    pub async fn run(&self) -> Result<ExportOutcome> {
        let settings = &self.settings;
        let namespace = settings.namespace();

        eprintln!("query: {}", to_extjson(&settings.filter));
        if let Some(projection) = settings.selection.projection() {
            eprintln!("projection: {}", to_extjson(&projection));
        }
        eprintln!("connecting to: {}", sanitize_uri(&settings.uri));

        let mut connection = ConnectionManager::new(
            settings.uri.clone(),
            settings.app_name.clone(),
            settings.server_selection_timeout,
        );
        connection.connect().await?;
        connection.ping(&settings.database).await?;

        let total = connection
            .estimated_count(&settings.database, &settings.collection)
            .await?;
        if total == 0 {
            eprintln!("{namespace} is empty or does not exist!");
            return Ok(ExportOutcome::EmptySource { namespace });
        }

        let collection = connection.collection(&settings.database, &settings.collection)?;
        let plan = settings.query_plan();
        debug!("Query plan: {:?}", plan);
        let source = plan.open(&collection, settings.batch_size).await?;

        let sink = match &settings.output {
            OutputTarget::File(path) => OutputSink::file(path).await?,
            OutputTarget::Stdout => {
                eprintln!("--------------------------------------------------");
                OutputSink::stdout()
            }
        };
        eprintln!("exporting {} to {}", namespace, sink.label());

        // Unwinding and limits change the row count, so the estimate only
        // bounds plain exports.
        let bounded = settings.limit.is_none() && !settings.is_unwinding();
        let run = self.export(source, sink, bounded.then_some(total)).await?;
        let summary = run.summary;

        if summary.cancelled {
            eprintln!("export interrupted after {} records", summary.records_written);
        } else {
            eprintln!(
                "exported {} records in {:.2?}",
                summary.records_written, summary.elapsed
            );
        }
        Ok(ExportOutcome::Completed(summary))
    }

    /// Stream `source` into `sink` with the job's encoder and options
    ///
    /// # Arguments
    /// * `source` - Document source
    /// * `sink` - Destination, released before returning
    /// * `total` - Expected record count for the progress display, if known
    ///
    /// # Returns
    /// * `Result<PipelineOutput<W>>` - Run statistics and the released destination
    pub async fn export<S, W>(&self, source: S, sink: OutputSink<W>, total: Option<u64>) -> Result<PipelineOutput<W>>
    where
        S: RecordSource,
        W: AsyncWrite + Unpin,
    {
        let mut pipeline = ExportPipeline::new(self.settings.encoder(), self.settings.pipeline_options());
        if self.display != ProgressDisplay::Hidden {
            pipeline = pipeline.with_progress(Arc::new(ProgressTracker::new(total, self.display)));
        }
        if let Some(token) = &self.cancel_token {
            pipeline = pipeline.with_cancellation(token.clone());
        }

        info!("Exporting {}", self.settings.namespace());
        pipeline.run(source, sink).await
    }
}

fn to_extjson(doc: &Document) -> String {
    Bson::Document(doc.clone()).into_relaxed_extjson().to_string()
}
