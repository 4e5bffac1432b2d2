//! Progress reporting for export runs
//!
//! The pipeline publishes its running written-count into a `watch` channel
//! after every record. [`ProgressEmitter`] samples that channel once per tick,
//! so any number of updates inside one tick collapse into the latest value,
//! and a tick without new records reports nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, info};

/// Default progress tick.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Receiver of conflated progress counts.
pub trait ProgressReport: Send + Sync {
    /// Called at most once per tick with the latest written-count.
    fn report(&self, written: u64);

    /// Called once when the run is over, successfully or not.
    fn finish(&self, _written: u64) {}
}

/// Periodic, conflating progress emitter.
pub struct ProgressEmitter;

impl ProgressEmitter {
    /// Spawn the emitter task
    ///
    /// # Arguments
    /// * `counts` - Receiver of the running written-count
    /// * `every` - Tick interval
    /// * `reporter` - Destination of one value per tick with changes
    ///
    /// # Returns
    /// * `JoinHandle<()>` - Task handle; the task ends when the sender is
    ///   dropped or the handle is aborted
    pub fn spawn(
        mut counts: watch::Receiver<u64>,
        every: Duration,
        reporter: Arc<dyn ProgressReport>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = interval_at(start, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match counts.has_changed() {
                    Ok(true) => {
                        let written = *counts.borrow_and_update();
                        reporter.report(written);
                    }
                    Ok(false) => {}
                    Err(_) => {
                        debug!("Progress channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// How progress is shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressDisplay {
    /// Nothing is printed.
    Hidden,
    /// One "exported N records" line per tick.
    Lines,
    /// Spinner or bar on the terminal.
    Bar,
}

/// Progress tracker for export operations
///
/// Tracks the written-count and renders it as log lines or as a progress bar
/// with throughput.
pub struct ProgressTracker {
    /// Number of documents processed so far
    processed: AtomicU64,
    /// Start time of the operation
    start_time: Instant,
    /// Progress bar (only in `Bar` display)
    bar: Option<ProgressBar>,
    display: ProgressDisplay,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `total` - Total number of documents if known (None for unknown)
    /// * `display` - How progress is shown
    ///
    /// # Returns
    /// * `Self` - New progress tracker instance
    pub fn new(total: Option<u64>, display: ProgressDisplay) -> Self {
        let bar = (display == ProgressDisplay::Bar).then(|| match total {
            Some(n) => {
                let bar = ProgressBar::new(n);
                if let Ok(style) =
                    ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {pos} records {msg}") {
                    bar.set_style(style);
                }
                bar
            }
        });

        Self {
            processed: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
            display,
        }
    }

    /// Update progress with new count
    ///
    /// # Arguments
    /// * `count` - Total number of records written so far
    pub fn update(&self, count: u64) {
        self.processed.store(count, Ordering::Relaxed);

        match (&self.bar, self.display) {
            (Some(bar), _) => {
                bar.set_position(count);
                let elapsed = self.start_time.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    bar.set_message(format!("({:.0} records/sec)", count as f64 / elapsed));
                }
            }
            (None, ProgressDisplay::Lines) => eprintln!("exported {count} records"),
            (None, _) => {}
        }
    }

    /// Last count seen.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

impl ProgressReport for ProgressTracker {
    fn report(&self, written: u64) {
        self.update(written);
    }

    fn finish(&self, written: u64) {
        self.processed.store(written, Ordering::Relaxed);
        ProgressTracker::finish(self);
        info!(
            "Wrote {} records in {:.1}s",
            written,
            self.start_time.elapsed().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
        finished: Mutex<Option<u64>>,
    }

    impl ProgressReport for Recorder {
        fn report(&self, written: u64) {
            self.seen.lock().unwrap().push(written);
        }

        fn finish(&self, written: u64) {
            *self.finished.lock().unwrap() = Some(written);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_emitter_conflates_within_tick() {
        let (tx, rx) = watch::channel(0u64);
        let recorder = Arc::new(Recorder::default());
        let handle = ProgressEmitter::spawn(rx, Duration::from_secs(1), recorder.clone());

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![3]);

        tx.send(4).unwrap();
        tx.send(5).unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![3, 5]);

        // No new records: the tick stays silent.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![3, 5]);

        drop(tx);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emitter_silent_before_first_tick() {
        let (tx, rx) = watch::channel(0u64);
        let recorder = Arc::new(Recorder::default());
        let _handle = ProgressEmitter::spawn(rx, Duration::from_secs(1), recorder.clone());

        tx.send(10).unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_progress_tracker_hidden() {
        let tracker = ProgressTracker::new(Some(1000), ProgressDisplay::Hidden);
        tracker.update(500);
        assert_eq!(tracker.processed(), 500);
        ProgressReport::finish(&tracker, 700);
        assert_eq!(tracker.processed(), 700);
    }

    #[test]
    fn test_progress_tracker_without_total() {
        let tracker = ProgressTracker::new(None, ProgressDisplay::Hidden);
        tracker.update(500);
        assert_eq!(tracker.processed(), 500);
    }
}
