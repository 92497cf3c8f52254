//! Extracting consumer: bounded worker pool running extract → deliver → report

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;

use crate::entry::PathEntry;
use crate::error::SubmitError;
use crate::extract::{Extractor, Document};
use crate::report::{FailureKind, ReportEntry, Reporter, Status};
use crate::semaphore::Semaphore;
use crate::spewer::Spewer;

/// Available hardware concurrency, at least 1
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// What one worker step did with its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Extracted, delivered and recorded
    Extracted,
    /// Not extracted; carries the prior report status or the skip reason
    Skipped(Status),
    Failed(FailureKind),
    /// Dropped by a forceful shutdown
    Cancelled,
}

/// Counters since the consumer was built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub submitted: u64,
    pub extracted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    extracted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Everything one task needs, cloned per submission
#[derive(Clone)]
struct Task {
    extractor: Arc<dyn Extractor>,
    spewer: Arc<dyn Spewer>,
    reporter: Option<Reporter>,
    cancelled: Arc<AtomicBool>,
    counters: Arc<Counters>,
    progress: ProgressBar,
}

impl Task {
    fn run(&self, path: PathEntry) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(&path)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                log::error!("Extraction of {path} panicked: {message}");
                self.record(
                    &path,
                    ReportEntry::failed(FailureKind::NotParsed, format!("panicked: {message}")),
                );
                TaskOutcome::Failed(FailureKind::NotParsed)
            });
        let counter = match &outcome {
            TaskOutcome::Extracted => &self.counters.extracted,
            TaskOutcome::Skipped(_) => &self.counters.skipped,
            TaskOutcome::Failed(_) => &self.counters.failed,
            TaskOutcome::Cancelled => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if outcome != TaskOutcome::Cancelled {
            self.progress.inc(1);
            self.progress.set_message(path.to_string());
        }
    }

    /// skip-check → extract → deliver → record, strictly in that order
    fn process(&self, path: &PathEntry) -> TaskOutcome {
        if self.is_cancelled() {
            return TaskOutcome::Cancelled;
        }

        if let Some(status) = self.reporter.as_ref().and_then(|r| r.should_skip(path)) {
            log::debug!("Skipping {path}: already {status}");
            return TaskOutcome::Skipped(status);
        }

        let extracted = self.extractor.extract(path);
        // Results of extractions still running at a forceful shutdown are dropped
        if self.is_cancelled() {
            log::debug!("Discarding {path}: cancelled");
            return TaskOutcome::Cancelled;
        }

        let doc = match extracted {
            Ok(doc) => doc,
            Err(e) => {
                let status = e.status();
                match status {
                    Status::Skipped => log::info!("Skipping {e}"),
                    _ => log::warn!("Extraction failed: {e}"),
                }
                self.record(path, ReportEntry::new(status, Some(e.to_string())));
                return match status {
                    Status::Failed(kind) => TaskOutcome::Failed(kind),
                    other => TaskOutcome::Skipped(other),
                };
            }
        };

        self.deliver(path, &doc)
    }

    fn deliver(&self, path: &PathEntry, doc: &Document) -> TaskOutcome {
        match self.spewer.write(doc) {
            Ok(()) => {
                log::trace!("Delivered {path}");
                self.record(path, ReportEntry::succeeded());
                TaskOutcome::Extracted
            }
            Err(e) => {
                log::error!("Failed to output {path}: {e}");
                self.record(path, ReportEntry::failed(FailureKind::NotSaved, e.to_string()));
                TaskOutcome::Failed(FailureKind::NotSaved)
            }
        }
    }

    fn record(&self, path: &PathEntry, entry: ReportEntry) {
        if let Some(reporter) = &self.reporter {
            reporter.record(path, entry);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Runs at most `parallelism` extractions at once.
///
/// `submit` blocks while every slot is taken, which throttles whoever is
/// feeding the consumer. Per-file failures are logged and recorded, never
/// returned.
pub struct ExtractingConsumer {
    pool: rayon::ThreadPool,
    slots: Arc<Semaphore>,
    parallelism: usize,
    accepting: AtomicBool,
    task: Task,
}

impl ExtractingConsumer {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        spewer: Arc<dyn Spewer>,
        parallelism: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let parallelism = parallelism.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|i| format!("extract-{i}"))
            .panic_handler(|_| log::error!("extraction worker panicked"))
            .build()?;

        Ok(Self {
            pool,
            slots: Semaphore::new(parallelism),
            parallelism,
            accepting: AtomicBool::new(true),
            task: Task {
                extractor,
                spewer,
                reporter: None,
                cancelled: Arc::new(AtomicBool::new(false)),
                counters: Arc::new(Counters::default()),
                progress: ProgressBar::hidden(),
            },
        })
    }

    /// Consult and update `reporter` around every extraction
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.task.reporter = Some(reporter);
        self
    }

    /// Bar incremented once per finished path
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.task.progress = progress;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Queue `path` for extraction, blocking until a slot is free.
    pub fn submit(&self, path: PathEntry) -> Result<(), SubmitError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShutDown);
        }
        let permit = self.slots.acquire();
        // Shut down while we were waiting for a slot
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShutDown);
        }

        self.task.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let task = self.task.clone();
        self.pool.spawn(move || {
            let _permit = permit;
            task.run(path);
        });
        Ok(())
    }

    /// Stop accepting submissions. Running and admitted tasks continue.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for every admitted task to finish.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.slots.wait_idle(timeout)
    }

    /// Stop accepting and cancel what is still running.
    ///
    /// Tasks that have not started return immediately; extractions already
    /// underway finish but their result is neither delivered nor recorded.
    /// Returns the number of tasks in flight at the time of the call.
    pub fn shutdown_now(&self) -> usize {
        self.shutdown();
        self.task.cancelled.store(true, Ordering::Release);
        let in_flight = self.slots.in_use();
        if in_flight > 0 {
            log::warn!("Cancelling {in_flight} extraction(s) still in flight");
        }
        in_flight
    }

    pub fn stats(&self) -> ConsumerStats {
        let c = &self.task.counters;
        ConsumerStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            extracted: c.extracted.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ExtractingConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractingConsumer")
            .field("parallelism", &self.parallelism)
            .field("in_flight", &self.slots.in_use())
            .field("reporter", &self.task.reporter)
            .finish_non_exhaustive()
    }
}
