//! Drainer: moves queued paths into the extracting consumer

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::consumer::ExtractingConsumer;
use crate::error::DrainError;
use crate::latch::Latch;
use crate::queue::PathQueue;
use crate::shutdown::is_shutdown_requested;

/// Pause after a non-blocking miss before polling again
pub const IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// Polls a queue and submits every entry to the consumer.
///
/// With a latch, draining ends once the latch is sealed and a poll made
/// after observing the seal still comes back empty. Without one it runs
/// until stopped (daemon mode), either through [`Draining::stop`] or the
/// process-wide shutdown flag.
pub struct Drainer {
    queue: Arc<dyn PathQueue>,
    consumer: Arc<ExtractingConsumer>,
    latch: Option<Arc<Latch>>,
    poll_timeout: Duration,
}

impl Drainer {
    pub fn new(queue: Arc<dyn PathQueue>, consumer: Arc<ExtractingConsumer>) -> Self {
        Self {
            queue,
            consumer,
            latch: None,
            poll_timeout: Duration::ZERO,
        }
    }

    /// Stop once `latch` is sealed and the queue is empty
    pub fn with_latch(mut self, latch: Arc<Latch>) -> Self {
        self.latch = Some(latch);
        self
    }

    /// How long each poll waits for an entry. Zero never blocks.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Start draining on a background thread.
    pub fn drain(self) -> Result<Draining, DrainError> {
        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(Latch::new());
        let dispatched = Arc::new(AtomicU64::new(0));

        let handle = {
            let stop = Arc::clone(&stop);
            let done = Arc::clone(&done);
            let dispatched = Arc::clone(&dispatched);
            std::thread::Builder::new()
                .name("drainer".to_string())
                .spawn(move || {
                    let _done = SealOnDrop(done);
                    self.run(&stop, &dispatched)
                })
                .map_err(DrainError::Spawn)?
        };

        Ok(Draining {
            stop,
            done,
            dispatched,
            handle,
        })
    }

    fn run(&self, stop: &AtomicBool, dispatched: &AtomicU64) -> Result<u64, DrainError> {
        match &self.latch {
            Some(_) => log::debug!("Draining until scanning completes"),
            None => log::info!("Draining in daemon mode until stopped"),
        }

        loop {
            if stop.load(Ordering::Acquire) {
                log::debug!("Drainer stopped");
                break;
            }
            if self.latch.is_none() && is_shutdown_requested() {
                log::info!("Shutdown requested, no longer polling the queue");
                break;
            }

            if let Some(entry) = self.queue.poll(self.poll_timeout)? {
                log::trace!("Dispatching {entry}");
                self.consumer.submit(entry)?;
                dispatched.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            match &self.latch {
                // Seal observed after the miss: one more poll catches anything
                // enqueued before the seal, and only then is the queue drained.
                Some(latch) if latch.is_sealed() => match self.queue.poll(Duration::ZERO)? {
                    Some(entry) => {
                        log::trace!("Dispatching {entry}");
                        self.consumer.submit(entry)?;
                        dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                    None => break,
                },
                Some(latch) => {
                    if self.poll_timeout.is_zero() {
                        latch.wait(IDLE_BACKOFF);
                    }
                }
                None => {
                    if self.poll_timeout.is_zero() {
                        std::thread::sleep(IDLE_BACKOFF);
                    }
                }
            }
        }

        Ok(dispatched.load(Ordering::Relaxed))
    }
}

struct SealOnDrop(Arc<Latch>);

impl Drop for SealOnDrop {
    fn drop(&mut self) {
        self.0.seal();
    }
}

/// A running drain
pub struct Draining {
    stop: Arc<AtomicBool>,
    done: Arc<Latch>,
    dispatched: Arc<AtomicU64>,
    handle: JoinHandle<Result<u64, DrainError>>,
}

impl Draining {
    /// Ask the loop to exit after the current iteration. Entries already
    /// submitted keep running in the consumer.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Orderly shutdown: stop polling. Does not shut the consumer down.
    pub fn shutdown(&self) {
        self.stop();
    }

    /// Wait up to `timeout` for the loop to exit.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.done.wait(timeout)
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_sealed()
    }

    /// Entries submitted so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Block until the loop exits; returns the number of entries dispatched.
    pub fn join(self) -> Result<u64, DrainError> {
        self.handle.join().map_err(|_| DrainError::Panicked)?
    }
}
