//! Run orchestration: scan and drain, then shut everything down in order

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::consumer::ExtractingConsumer;
use crate::drainer::{Drainer, Draining};
use crate::error::DrainError;
use crate::latch::Latch;
use crate::progress::fmt_num;
use crate::queue::PathQueue;
use crate::scanner::{ScanOptions, Scanner};
use crate::shutdown::is_shutdown_requested;

/// How often the run checks the shutdown flag while waiting for the drainer
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Roots to scan. Empty means drain only.
    pub roots: Vec<PathBuf>,
    pub scan: ScanOptions,
    /// Drainer poll timeout
    pub poll_timeout: Duration,
    /// With no roots, keep polling until stopped instead of draining what is there
    pub daemon: bool,
    pub scanner_timeout: Duration,
    pub drainer_timeout: Duration,
    /// Extractions may run for a long time (OCR), hence the separate, long wait
    pub consumer_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            scan: ScanOptions::default(),
            poll_timeout: Duration::ZERO,
            daemon: false,
            scanner_timeout: Duration::from_secs(5),
            drainer_timeout: Duration::from_secs(5),
            consumer_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries the drainer dispatched, whatever became of them
    pub drained: u64,
    pub extracted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!(
            "Done in {:.1?}: {} extracted, {} skipped, {} failed",
            self.elapsed,
            fmt_num(self.extracted),
            fmt_num(self.skipped),
            fmt_num(self.failed)
        );
    }
}

/// Drain `queue` through `consumer`, scanning `options.roots` into it first
/// when there are any.
///
/// Only setup failures are returned. Unreadable roots and failing files are
/// logged and recorded, and the run still reports how many paths it drained.
/// Shutdown goes scanner, drainer, consumer: stopping the consumer first
/// would strand dispatched paths.
pub fn spew(
    queue: Arc<dyn PathQueue>,
    consumer: Arc<ExtractingConsumer>,
    options: &RunOptions,
) -> anyhow::Result<RunSummary> {
    let started = Instant::now();
    log::info!(
        "Processing up to {} file(s) in parallel.",
        consumer.parallelism()
    );

    let drainer =
        Drainer::new(Arc::clone(&queue), Arc::clone(&consumer)).with_poll_timeout(options.poll_timeout);

    let draining = if options.roots.is_empty() {
        let drainer = if options.daemon {
            drainer
        } else {
            // Nothing to scan: drain what is already queued and stop
            drainer.with_latch(Arc::new(Latch::sealed()))
        };
        drainer.drain().context("failed to start draining")?
    } else {
        let scanner = Scanner::new(queue, Arc::new(Latch::new()), options.scan.clone())
            .context("failed to set up scanner")?;
        let draining = drainer
            .with_latch(Arc::clone(scanner.latch()))
            .drain()
            .context("failed to start draining")?;

        // Walk in the background, but block until every root has been queued
        let handles = scanner.scan(&options.roots).context("failed to start scanning")?;
        while !scanner.await_termination(WATCH_INTERVAL) {
            // A drainer that quit early leaves walkers blocked on a full queue
            if draining.is_finished() {
                log::warn!("Drainer stopped before scanning finished, cancelling scans");
                scanner.shutdown_now();
                break;
            }
        }
        let mut queued = 0;
        for handle in handles {
            match handle.join() {
                Ok(stats) => queued += stats.queued,
                Err(e) => log::debug!("Scan did not complete: {e}"),
            }
        }
        log::info!("Queued {} file(s) in total.", fmt_num(queued as u64));

        // Every walk is joined by now, so a short wait is enough
        scanner.shutdown();
        if !scanner.await_termination(options.scanner_timeout) {
            log::warn!("Scanner still busy after {:?}, cancelling", options.scanner_timeout);
            scanner.shutdown_now();
        }
        draining
    };

    while !draining.await_termination(WATCH_INTERVAL) {
        if is_shutdown_requested() {
            log::info!("Shutdown requested, stopping the drainer");
            break;
        }
    }
    let drained = stop_draining(draining, options.drainer_timeout);
    if let Ok(n) = &drained {
        log::info!("Drained {} files.", fmt_num(*n));
    }

    consumer.shutdown();
    if !consumer.await_termination(options.consumer_timeout) {
        let cancelled = consumer.shutdown_now();
        log::warn!(
            "Extraction still running after {:?}, cancelled {cancelled} task(s)",
            options.consumer_timeout
        );
    }

    let drained = drained.context("draining failed")?;
    let stats = consumer.stats();
    Ok(RunSummary {
        drained,
        extracted: stats.extracted,
        skipped: stats.skipped,
        failed: stats.failed,
        elapsed: started.elapsed(),
    })
}

/// Shut the drainer down with a short timeout. By now the queue should
/// have been observed empty, so it only has to notice.
fn stop_draining(draining: Draining, timeout: Duration) -> Result<u64, DrainError> {
    draining.shutdown();
    if draining.await_termination(timeout) {
        return draining.join();
    }
    let dispatched = draining.dispatched();
    log::warn!("Drainer did not stop within {timeout:?}, leaving it behind");
    Ok(dispatched)
}
