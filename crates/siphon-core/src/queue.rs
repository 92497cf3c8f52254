//! Bounded work queue feeding paths from the scanner to the drainer

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};

use crate::entry::PathEntry;
use crate::error::QueueError;

/// Default number of paths a queue holds before producers block
pub const DEFAULT_CAPACITY: usize = 1024;

/// Bounded, thread-safe queue of paths awaiting extraction.
///
/// `put` blocks while the queue is full and `poll` blocks while it is empty,
/// each up to its timeout. A timeout is not an error: `put` returns
/// `Ok(false)` and `poll` returns `Ok(None)`.
///
/// The queue has no notion of "done". End of production is signalled
/// separately with a [`Latch`](crate::Latch), so a durable backend can be
/// shared between runs.
pub trait PathQueue: Send + Sync {
    /// Enqueue `entry`. `None` blocks until there is room.
    fn put(&self, entry: PathEntry, timeout: Option<Duration>) -> Result<bool, QueueError>;

    /// Dequeue one entry, waiting up to `timeout`. A zero timeout never blocks.
    fn poll(&self, timeout: Duration) -> Result<Option<PathEntry>, QueueError>;

    /// Entries currently held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Release backend resources. Idempotent; durable backends keep their contents.
    fn close(&self) -> Result<(), QueueError>;
}

/// In-memory queue backed by a bounded channel
pub struct MemoryQueue {
    sender: Sender<PathEntry>,
    receiver: Receiver<PathEntry>,
    capacity: usize,
    closed: AtomicBool,
}

impl MemoryQueue {
    /// Create a queue holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PathQueue for MemoryQueue {
    fn put(&self, entry: PathEntry, timeout: Option<Duration>) -> Result<bool, QueueError> {
        self.check_open()?;
        match timeout {
            None => self
                .sender
                .send(entry)
                .map(|()| true)
                .map_err(|_| QueueError::Closed),
            Some(t) => match self.sender.send_timeout(entry, t) {
                Ok(()) => Ok(true),
                Err(SendTimeoutError::Timeout(_)) => Ok(false),
                Err(SendTimeoutError::Disconnected(_)) => Err(QueueError::Closed),
            },
        }
    }

    fn poll(&self, timeout: Duration) -> Result<Option<PathEntry>, QueueError> {
        self.check_open()?;
        if timeout.is_zero() {
            return match self.receiver.try_recv() {
                Ok(entry) => Ok(Some(entry)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(QueueError::Closed),
            };
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(entry) => Ok(Some(entry)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::Closed),
        }
    }

    fn len(&self) -> usize {
        self.receiver.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) -> Result<(), QueueError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("memory queue closed with {} entries left", self.len());
        }
        Ok(())
    }
}
