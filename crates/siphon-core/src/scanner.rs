//! Directory scanner feeding the work queue
//!
//! Each root is walked as its own task on a bounded walker pool. The scanner
//! counts outstanding walks and seals its latch when the last one finishes,
//! whether it succeeded, failed or was cancelled.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use walkdir::{DirEntry, WalkDir};

use crate::entry::PathEntry;
use crate::error::ScanError;
use crate::filter::{FilterOptions, ScanFilter, has_hidden_attribute};
use crate::latch::Latch;
use crate::queue::PathQueue;
use crate::shutdown::is_shutdown_requested;

/// Longest single wait on a full queue before re-checking for cancellation
const PUT_RECHECK: Duration = Duration::from_millis(100);

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub filter: FilterOptions,
    /// Prefix stripped from queued paths
    pub path_base: Option<PathBuf>,
    /// How long a walker waits for queue space. `None` waits indefinitely.
    pub put_timeout: Option<Duration>,
    /// Roots walked concurrently
    pub walkers: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            filter: FilterOptions::default(),
            path_base: None,
            put_timeout: None,
            walkers: 4,
        }
    }
}

/// Counters from walking one root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub root: PathBuf,
    pub queued: usize,
    pub dirs: usize,
    /// Subtrees that could not be read and were skipped
    pub errors: usize,
}

/// Awaitable result of walking a single root
pub struct ScanHandle {
    root: PathBuf,
    result: Receiver<Result<ScanStats, ScanError>>,
}

impl ScanHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Block until the walk has finished
    pub fn join(self) -> Result<ScanStats, ScanError> {
        self.result
            .recv()
            .unwrap_or(Err(ScanError::Lost { root: self.root }))
    }
}

struct Progress {
    outstanding: usize,
    accepting: bool,
}

struct ScanState {
    queue: Arc<dyn PathQueue>,
    latch: Arc<Latch>,
    filter: ScanFilter,
    options: ScanOptions,
    progress: Mutex<Progress>,
    idle: Condvar,
    cancelled: AtomicBool,
}

impl ScanState {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_walk(&self) {
        let mut progress = self.lock();
        progress.outstanding -= 1;
        if progress.outstanding == 0 {
            if self.latch.seal() {
                log::debug!("all scans finished, latch sealed");
            }
            self.idle.notify_all();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || is_shutdown_requested()
    }
}

/// Walks roots and enqueues matching files
pub struct Scanner {
    state: Arc<ScanState>,
    pool: rayon::ThreadPool,
}

impl Scanner {
    /// Fails before any walking when a pattern is invalid or the walker
    /// pool cannot start.
    pub fn new(
        queue: Arc<dyn PathQueue>,
        latch: Arc<Latch>,
        options: ScanOptions,
    ) -> Result<Self, ScanError> {
        let filter = ScanFilter::new(&options.filter)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.walkers.max(1))
            .thread_name(|i| format!("scanner-{i}"))
            .build()
            .map_err(ScanError::Pool)?;
        Ok(Self {
            state: Arc::new(ScanState {
                queue,
                latch,
                filter,
                options,
                progress: Mutex::new(Progress {
                    outstanding: 0,
                    accepting: true,
                }),
                idle: Condvar::new(),
                cancelled: AtomicBool::new(false),
            }),
            pool,
        })
    }

    pub fn latch(&self) -> &Arc<Latch> {
        &self.state.latch
    }

    /// Start walking `roots` in the background.
    ///
    /// Every root gets its own handle. The latch seals once all of them,
    /// and any roots from earlier calls, have finished. Roots offered
    /// after that are rejected.
    pub fn scan<P: AsRef<Path>>(&self, roots: &[P]) -> Result<Vec<ScanHandle>, ScanError> {
        {
            let mut progress = self.state.lock();
            if !progress.accepting || self.state.latch.is_sealed() {
                return Err(ScanError::Closed);
            }
            if roots.is_empty() {
                if progress.outstanding == 0 {
                    self.state.latch.seal();
                }
                return Ok(Vec::new());
            }
            // Counted up front so an early finisher cannot seal mid-batch
            progress.outstanding += roots.len();
        }

        let handles = roots
            .iter()
            .map(|root| {
                let root = root.as_ref().to_path_buf();
                let (tx, rx) = crossbeam_channel::bounded(1);
                let state = Arc::clone(&self.state);
                let walk_root = root.clone();
                self.pool.spawn(move || {
                    let result = walk(&state, &walk_root);
                    match &result {
                        Ok(stats) => log::info!(
                            "Queued {} file(s) from {} ({} unreadable)",
                            stats.queued,
                            walk_root.display(),
                            stats.errors
                        ),
                        Err(e) => log::warn!("Scan failed: {e}"),
                    }
                    // Seal before reporting so a joined batch implies a sealed latch
                    state.finish_walk();
                    let _ = tx.send(result);
                });
                ScanHandle { root, result: rx }
            })
            .collect();
        Ok(handles)
    }

    /// Stop accepting roots. Walks in progress continue.
    pub fn shutdown(&self) {
        let mut progress = self.state.lock();
        progress.accepting = false;
        if progress.outstanding == 0 && self.state.latch.seal() {
            log::debug!("scanner shut down idle, latch sealed");
        }
    }

    /// Stop accepting roots and cancel walks in progress
    pub fn shutdown_now(&self) {
        self.state.cancelled.store(true, Ordering::Relaxed);
        self.shutdown();
    }

    /// Wait up to `timeout` for all walks to finish
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let progress = self.state.lock();
        let (progress, _) = self
            .state
            .idle
            .wait_timeout_while(progress, timeout, |p| p.outstanding > 0)
            .unwrap_or_else(PoisonError::into_inner);
        progress.outstanding == 0
    }
}

fn walk(state: &ScanState, root: &Path) -> Result<ScanStats, ScanError> {
    let started = Instant::now();
    std::fs::metadata(root).map_err(|source| ScanError::Root {
        root: root.to_path_buf(),
        source,
    })?;
    log::info!("Scanning {}", root.display());

    let options = &state.options;
    let filter = &state.filter;
    let mut stats = ScanStats {
        root: root.to_path_buf(),
        ..Default::default()
    };

    let walker = WalkDir::new(root)
        .follow_links(options.filter.follow_symlinks)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || admits(filter, root, entry));

    for entry in walker {
        if state.is_cancelled() {
            return Err(ScanError::Cancelled {
                root: root.to_path_buf(),
            });
        }
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // Permission denied, symlink loop, vanished subtree
                log::warn!("{}: {e}", root.display());
                stats.errors += 1;
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            stats.dirs += 1;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        if entry.depth() == 0 && !admits(filter, root, &entry) {
            continue;
        }

        let path = PathEntry::relativize(entry.path(), options.path_base.as_deref());
        log::trace!("queueing {path}");
        enqueue(state, root, path)?;
        stats.queued += 1;
    }

    log::debug!(
        "{}: walked {} dirs in {:.1}s",
        root.display(),
        stats.dirs,
        started.elapsed().as_secs_f64()
    );
    Ok(stats)
}

/// Put `path`, waking every [`PUT_RECHECK`] to notice cancellation.
///
/// `put_timeout` bounds the total wait; without one the walker waits until
/// there is room or the scan is cancelled.
fn enqueue(state: &ScanState, root: &Path, path: PathEntry) -> Result<(), ScanError> {
    let deadline = state.options.put_timeout.map(|t| Instant::now() + t);
    loop {
        let wait = match deadline {
            Some(d) => d.saturating_duration_since(Instant::now()).min(PUT_RECHECK),
            None => PUT_RECHECK,
        };
        match state.queue.put(path.clone(), Some(wait)) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(source) => {
                return Err(ScanError::Queue {
                    root: root.to_path_buf(),
                    source,
                });
            }
        }
        if state.is_cancelled() {
            return Err(ScanError::Cancelled {
                root: root.to_path_buf(),
            });
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ScanError::QueueTimeout {
                root: root.to_path_buf(),
            });
        }
    }
}

/// Symlink policy first, then name rules and patterns
fn admits(filter: &ScanFilter, root: &Path, entry: &DirEntry) -> bool {
    if entry.path_is_symlink() && !entry.file_type().is_dir() && !entry.file_type().is_file() {
        // Unfollowed link or dangling target
        return false;
    }
    let relative = if entry.depth() == 0 {
        Path::new(entry.file_name())
    } else {
        entry.path().strip_prefix(root).unwrap_or(entry.path())
    };
    let hidden_attr = cfg!(windows) && entry.metadata().is_ok_and(|m| has_hidden_attribute(&m));
    if entry.file_type().is_dir() {
        filter.admits_dir(relative, hidden_attr)
    } else {
        filter.admits_file(relative, hidden_attr)
    }
}
