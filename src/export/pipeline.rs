//! Export pipeline
//!
//! Turns a [`RecordSource`] into sink writes with bounded, unordered
//! concurrency:
//!
//! - one loop pulls documents from the source, submits each to the blocking
//!   pool through a [`JoinSet`] and owns the sink;
//! - at most `concurrency` encodes are in flight; when the set is full the
//!   loop writes completed rows before it reads further;
//! - rows are written in completion order, each as one whole line;
//! - the running count feeds a [`ProgressEmitter`] that reports at most once
//!   per tick.
//!
//! The first failure (source, encode, task or sink) ends the run. Dropping the
//! [`JoinSet`] aborts encodes that have not started, and the sink is flushed
//! and released on every exit path.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use super::progress::{DEFAULT_PROGRESS_INTERVAL, ProgressEmitter, ProgressReport};
use super::sink::OutputSink;
use super::source::RecordSource;
use super::writers::DocumentEncoder;
use crate::error::{EncodeError, Result};

type EncodeResult = std::result::Result<Vec<u8>, EncodeError>;

/// Default number of in-flight encodes: the available parallelism.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Tuning knobs for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Maximum number of concurrently running encodes
    pub concurrency: usize,
    /// Progress tick
    pub progress_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Statistics of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// Number of records written (header excluded)
    pub records_written: u64,
    /// Bytes handed to the sink, header included
    pub bytes_written: u64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Whether the run stopped on cancellation
    pub cancelled: bool,
}

/// Summary plus the released sink destination.
#[derive(Debug)]
pub struct PipelineOutput<W> {
    pub summary: ExportSummary,
    pub output: W,
}

/// Bounded-concurrency export pipeline
pub struct ExportPipeline {
    /// Stateless per-document encoder shared by all workers
    encoder: Arc<dyn DocumentEncoder>,
    options: PipelineOptions,
    /// Optional progress destination
    reporter: Option<Arc<dyn ProgressReport>>,
    /// Cancellation token for aborting the run
    cancel_token: Option<CancellationToken>,
}

impl ExportPipeline {
    /// Create a new pipeline
    ///
    /// # Arguments
    /// * `encoder` - JSON or tabular document encoder
    /// * `options` - Concurrency and progress settings
    pub fn new(encoder: Arc<dyn DocumentEncoder>, options: PipelineOptions) -> Self {
        Self {
            encoder,
            options,
            reporter: None,
            cancel_token: None,
        }
    }

    /// Report conflated progress to `reporter`.
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReport>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Set cancellation token for this run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Run the pipeline to completion
    ///
    /// Writes the header (if the encoder has one), then every encoded
    /// document, then flushes and releases the sink.
    ///
    /// # Arguments
    /// * `source` - Document source
    /// * `sink` - Output sink, consumed
    ///
    /// # Returns
    /// * `Result<PipelineOutput<W>>` - Run statistics and the released
    ///   destination, or the first error encountered
    pub async fn run<S, W>(&self, mut source: S, mut sink: OutputSink<W>) -> Result<PipelineOutput<W>>
    where
        S: RecordSource,
        W: AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let (count_tx, count_rx) = watch::channel(0u64);
        let emitter = self.reporter.as_ref().map(|reporter| {
            AbortOnDropHandle::new(ProgressEmitter::spawn(
                count_rx,
                self.options.progress_interval,
                Arc::clone(reporter),
            ))
        });

        info!(
            "Starting export to {} with concurrency {}",
            sink.label(),
            self.options.concurrency
        );
        let outcome = self.drive(&mut source, &mut sink, &count_tx).await;

        drop(emitter);
        let records_written = sink.records_written();
        let bytes_written = sink.bytes_written();
        let closed = sink.close().await;
        if let Some(reporter) = &self.reporter {
            reporter.finish(records_written);
        }

        let cancelled = match outcome {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!("Export failed after {} records: {}", records_written, e);
                return Err(e);
            }
        };
        let output = closed?;

        let summary = ExportSummary {
            records_written,
            bytes_written,
            elapsed: start.elapsed(),
            cancelled,
        };
        info!(
            "Export completed: {} records, {} bytes, {} ms",
            summary.records_written,
            summary.bytes_written,
            summary.elapsed.as_millis()
        );
        Ok(PipelineOutput { summary, output })
    }

    /// Main loop. Returns whether the run was cancelled.
    async fn drive<S, W>(
        &self,
        source: &mut S,
        sink: &mut OutputSink<W>,
        progress: &watch::Sender<u64>,
    ) -> Result<bool>
    where
        S: RecordSource,
        W: AsyncWrite + Unpin,
    {
        if let Some(header) = self.encoder.header() {
            sink.write_header(&header).await?;
        }

        let limit = self.options.concurrency.max(1);
        let mut tasks: JoinSet<EncodeResult> = JoinSet::new();
        let mut dispatched = 0u64;

        loop {
            // Saturated: the next read waits for a free slot
            while tasks.len() >= limit {
                let joined = match &self.cancel_token {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            info!("Export cancelled with {} encodes in flight", tasks.len());
                            return Ok(true);
                        }
                        joined = tasks.join_next() => joined,
                    },
                    None => tasks.join_next().await,
                };
                let Some(joined) = joined else {
                    break;
                };
                write_completed(sink, joined, progress).await?;
            }

            let next = match &self.cancel_token {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!("Export cancelled after {} documents read", dispatched);
                        return Ok(true);
                    }
                    next = source.next_document() => next?,
                },
                None => source.next_document().await?,
            };
            let Some(doc) = next else {
                break;
            };

            let encoder = Arc::clone(&self.encoder);
            tasks.spawn_blocking(move || encoder.encode(&doc));
            dispatched += 1;

            while let Some(joined) = tasks.try_join_next() {
                write_completed(sink, joined, progress).await?;
            }
        }

        debug!(
            "Source drained after {} documents, {} encodes pending",
            dispatched,
            tasks.len()
        );
        while let Some(joined) = tasks.join_next().await {
            write_completed(sink, joined, progress).await?;
        }

        Ok(false)
    }
}

async fn write_completed<W>(
    sink: &mut OutputSink<W>,
    joined: std::result::Result<EncodeResult, JoinError>,
    progress: &watch::Sender<u64>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = joined??;
    sink.write_record(&line).await?;
    progress.send_replace(sink.records_written());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::export::source::VecSource;
    use crate::export::writers::JsonEncoder;
    use crate::error::ExitStatus;
    use mongodb::bson::{Document, doc};
    use std::io;
    use std::pin::Pin;
    use std::sync::{Condvar, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    /// Encoder that sleeps and tracks how many calls overlap.
    #[derive(Default)]
    struct SlowEncoder {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_on: Option<i32>,
    }

    impl DocumentEncoder for SlowEncoder {
        fn encode(&self, doc: &Document) -> std::result::Result<Vec<u8>, EncodeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let n = doc.get_i32("n").unwrap_or(-1);
            if Some(n) == self.fail_on {
                return Err(EncodeError::UnsupportedType {
                    bson_type: "binData",
                    path: "n".to_string(),
                });
            }
            Ok(n.to_string().into_bytes())
        }

        fn header(&self) -> Option<String> {
            Some("n".to_string())
        }
    }

    #[derive(Default)]
    struct FinishRecorder {
        finished: Mutex<Option<u64>>,
    }

    impl ProgressReport for FinishRecorder {
        fn report(&self, _written: u64) {}

        fn finish(&self, written: u64) {
            *self.finished.lock().unwrap() = Some(written);
        }
    }

    /// Destination whose every write fails.
    #[derive(Default, Debug)]
    struct BrokenWriter {
        attempts: Arc<AtomicUsize>,
    }

    impl AsyncWrite for BrokenWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Err(io::Error::other("disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn numbered(count: i32) -> VecSource {
        VecSource::new((0..count).map(|n| doc! { "n": n }).collect())
    }

    fn options(concurrency: usize) -> PipelineOptions {
        PipelineOptions {
            concurrency,
            progress_interval: Duration::from_millis(50),
        }
    }

    fn sorted_lines(bytes: &[u8]) -> Vec<String> {
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let mut lines: Vec<String> = text.lines().skip(1).map(str::to_string).collect();
        lines.sort_by_key(|l| l.parse::<i32>().unwrap());
        lines
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let encoder = Arc::new(SlowEncoder::default());
        let pipeline = ExportPipeline::new(encoder.clone(), options(3));

        let run = pipeline
            .run(numbered(40), OutputSink::new(Vec::new(), "memory"))
            .await
            .unwrap();

        assert_eq!(run.summary.records_written, 40);
        assert!(encoder.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert!(encoder.max_in_flight.load(Ordering::SeqCst) >= 1);
        assert_eq!(encoder.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_records_written_once() {
        let pipeline = ExportPipeline::new(Arc::new(SlowEncoder::default()), options(4));
        let run = pipeline
            .run(numbered(25), OutputSink::new(Vec::new(), "memory"))
            .await
            .unwrap();

        let expected: Vec<String> = (0..25).map(|n| n.to_string()).collect();
        assert_eq!(sorted_lines(&run.output), expected);
        assert!(run.output.starts_with(b"n\n"));
    }

    #[tokio::test]
    async fn test_header_alone_for_empty_source() {
        let pipeline = ExportPipeline::new(Arc::new(SlowEncoder::default()), options(2));
        let run = pipeline
            .run(VecSource::new(Vec::new()), OutputSink::new(Vec::new(), "memory"))
            .await
            .unwrap();

        assert_eq!(run.output, b"n\n");
        assert_eq!(run.summary.records_written, 0);
        assert_eq!(run.summary.bytes_written, 2);
    }

    #[tokio::test]
    async fn test_encode_failure_is_terminal() {
        let encoder = Arc::new(SlowEncoder {
            fail_on: Some(7),
            ..Default::default()
        });
        let recorder = Arc::new(FinishRecorder::default());
        let pipeline = ExportPipeline::new(encoder, options(2)).with_progress(recorder.clone());

        let err = pipeline
            .run(numbered(50), OutputSink::new(Vec::new(), "memory"))
            .await
            .unwrap_err();

        assert!(err.is_unsupported_type());
        let finished = recorder.finished.lock().unwrap().unwrap();
        assert!(finished < 50);
    }

    #[tokio::test]
    async fn test_source_failure_is_terminal() {
        let source = VecSource::from_results(vec![
            Ok(doc! { "n": 1 }),
            Err(ExportError::Generic("cursor died".to_string())),
            Ok(doc! { "n": 2 }),
        ]);
        let pipeline = ExportPipeline::new(Arc::new(SlowEncoder::default()), options(2));

        let err = pipeline
            .run(source, OutputSink::new(Vec::new(), "memory"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Generic(_)));
    }

    #[tokio::test]
    async fn test_sink_flush_failure_is_terminal() {
        let writer = BrokenWriter::default();
        let attempts = Arc::clone(&writer.attempts);
        let pipeline = ExportPipeline::new(Arc::new(SlowEncoder::default()), options(2));

        let err = pipeline
            .run(numbered(3), OutputSink::new(writer, "broken"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Io(_)));
        assert_eq!(err.exit_status(), ExitStatus::Failed);
        assert_eq!(err.to_string(), "I/O error: disk full");
        assert!(attempts.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_sink_write_failure_stops_run() {
        let writer = BrokenWriter::default();
        let attempts = Arc::clone(&writer.attempts);
        let recorder = Arc::new(FinishRecorder::default());
        // Records larger than the sink buffer go straight to the destination
        let big = "x".repeat(128 * 1024);
        let docs = (0..10).map(|n| doc! { "n": n, "pad": big.as_str() }).collect();
        let pipeline = ExportPipeline::new(Arc::new(JsonEncoder::default()), options(2))
            .with_progress(recorder.clone());

        let err = pipeline
            .run(VecSource::new(docs), OutputSink::new(writer, "broken"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Io(_)));
        assert_eq!(err.exit_status(), ExitStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.finished.lock().unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let pipeline =
            ExportPipeline::new(Arc::new(SlowEncoder::default()), options(2)).with_cancellation(token);

        let run = pipeline
            .run(numbered(10), OutputSink::new(Vec::new(), "memory"))
            .await
            .unwrap();

        assert!(run.summary.cancelled);
        assert_eq!(run.summary.records_written, 0);
        assert_eq!(run.output, b"n\n");
    }

    /// Encoder that blocks until the gate opens.
    #[derive(Default)]
    struct GatedEncoder {
        open: Mutex<bool>,
        opened: Condvar,
    }

    impl GatedEncoder {
        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.opened.notify_all();
        }
    }

    impl DocumentEncoder for GatedEncoder {
        fn encode(&self, _doc: &Document) -> std::result::Result<Vec<u8>, EncodeError> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
            Ok(b"x".to_vec())
        }

        fn header(&self) -> Option<String> {
            Some("n".to_string())
        }
    }

    #[tokio::test]
    async fn test_cancel_while_pool_is_full() {
        let encoder = Arc::new(GatedEncoder::default());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let pipeline = ExportPipeline::new(encoder.clone(), options(1)).with_cancellation(token);
        let run = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run(numbered(3), OutputSink::new(Vec::new(), "memory")),
        )
        .await;
        encoder.release();
        let run = run.expect("cancellation waited for a stuck encode").unwrap();

        assert!(run.summary.cancelled);
        assert_eq!(run.summary.records_written, 0);
        assert_eq!(run.output, b"n\n");
    }

    #[tokio::test]
    async fn test_progress_finish_receives_total() {
        let recorder = Arc::new(FinishRecorder::default());
        let pipeline = ExportPipeline::new(Arc::new(JsonEncoder::default()), options(2))
            .with_progress(recorder.clone());

        let run = pipeline
            .run(numbered(5), OutputSink::new(Vec::new(), "memory"))
            .await
            .unwrap();

        assert_eq!(run.summary.records_written, 5);
        assert_eq!(*recorder.finished.lock().unwrap(), Some(5));
        assert_eq!(String::from_utf8(run.output).unwrap().lines().count(), 5);
    }

    #[test]
    fn test_default_options() {
        let options = PipelineOptions::default();
        assert!(options.concurrency >= 1);
        assert_eq!(options.progress_interval, Duration::from_secs(1));
    }
}
