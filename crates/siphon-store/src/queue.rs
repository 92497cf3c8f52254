//! Durable path queue journaled to `<dir>/<name>.queue.jsonl`

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use siphon_core::{PathEntry, PathQueue, QueueError};

use crate::journal::Journal;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum QueueOp {
    Put { path: PathEntry },
    Take { path: PathEntry },
}

struct State {
    pending: VecDeque<PathEntry>,
    closed: bool,
}

/// Bounded queue whose contents survive restarts.
///
/// Blocks exactly like [`siphon_core::MemoryQueue`]. Every put and every
/// take is journaled before the call returns, and opening replays the
/// journal, so an interrupted run picks up where it stopped without
/// rescanning. A restored backlog may exceed the capacity; puts then block
/// until it drains below it.
pub struct JournalQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    journal: Journal,
}

impl JournalQueue {
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.queue.jsonl"))
    }

    pub fn open(dir: &Path, name: &str, capacity: usize) -> Result<Self> {
        let path = Self::path_for(dir, name);
        let ops: Vec<QueueOp> = Journal::replay(&path)
            .with_context(|| format!("failed to read queue journal {}", path.display()))?;

        let mut pending = VecDeque::new();
        for op in ops {
            match op {
                QueueOp::Put { path } => pending.push_back(path),
                QueueOp::Take { path } => {
                    if let Some(i) = pending.iter().position(|p| *p == path) {
                        pending.remove(i);
                    }
                }
            }
        }
        if !pending.is_empty() {
            log::info!(
                "Resuming queue {name} with {} pending path(s)",
                pending.len()
            );
        }

        let records: Vec<QueueOp> = pending
            .iter()
            .map(|path| QueueOp::Put { path: path.clone() })
            .collect();
        let journal = Journal::create(&path, &records)
            .with_context(|| format!("failed to open queue journal {}", path.display()))?;

        Ok(Self {
            state: Mutex::new(State {
                pending,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            journal,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PathQueue for JournalQueue {
    fn put(&self, entry: PathEntry, timeout: Option<Duration>) -> Result<bool, QueueError> {
        let guard = self.lock();
        let full = |s: &mut State| s.pending.len() >= self.capacity && !s.closed;
        let mut state = match timeout {
            Some(t) => {
                self.not_full
                    .wait_timeout_while(guard, t, full)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .not_full
                .wait_while(guard, full)
                .unwrap_or_else(PoisonError::into_inner),
        };
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.pending.len() >= self.capacity {
            return Ok(false);
        }

        self.journal.append(&QueueOp::Put {
            path: entry.clone(),
        })?;
        state.pending.push_back(entry);
        self.not_empty.notify_one();
        Ok(true)
    }

    fn poll(&self, timeout: Duration) -> Result<Option<PathEntry>, QueueError> {
        let guard = self.lock();
        let (mut state, _) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |s| s.pending.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(QueueError::Closed);
        }
        let Some(front) = state.pending.front() else {
            return Ok(None);
        };

        // Journal first: a failed write leaves the entry queued
        self.journal.append(&QueueOp::Take {
            path: front.clone(),
        })?;
        let entry = state.pending.pop_front();
        self.not_full.notify_one();
        Ok(entry)
    }

    fn len(&self) -> usize {
        self.lock().pending.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    /// Compacts the journal to the pending entries and keeps it on disk
    fn close(&self) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let records: Vec<QueueOp> = state
            .pending
            .iter()
            .map(|path| QueueOp::Put { path: path.clone() })
            .collect();
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.journal.compact_and_close(&records)?;
        log::debug!(
            "Closed queue journal {} with {} pending path(s)",
            self.journal.path().display(),
            records.len()
        );
        Ok(())
    }
}
