//! One-shot completion latch signalling that no more paths will be produced

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Monotonic "no more producers" signal.
///
/// The latch holds the only sender of a channel nobody ever sends on.
/// Sealing drops that sender, which every receiver observes as a
/// disconnect, so any number of threads can wait on it at once.
pub struct Latch {
    sealer: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    sealed: AtomicBool,
}

impl Latch {
    pub fn new() -> Self {
        let (sender, signal) = crossbeam_channel::bounded(0);
        Self {
            sealer: Mutex::new(Some(sender)),
            signal,
            sealed: AtomicBool::new(false),
        }
    }

    /// A latch that is already sealed
    pub fn sealed() -> Self {
        let latch = Self::new();
        latch.seal();
        latch
    }

    /// Seal the latch. Returns `true` only for the call that sealed it.
    pub fn seal(&self) -> bool {
        let sender = self
            .sealer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                // Flag first: a waiter woken by the disconnect must see it set.
                self.sealed.store(true, Ordering::Release);
                drop(sender);
                true
            }
            None => false,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the seal. Returns whether the latch is sealed.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_sealed() {
            return true;
        }
        match self.signal.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) | Ok(()) => self.is_sealed(),
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch")
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn starts_unsealed() {
        let latch = Latch::new();
        assert!(!latch.is_sealed());
        assert!(!latch.wait(Duration::from_millis(10)));
    }

    #[test]
    fn seal_is_idempotent() {
        let latch = Latch::new();
        assert!(latch.seal());
        assert!(!latch.seal());
        assert!(latch.is_sealed());
        assert!(latch.wait(Duration::ZERO));
    }

    #[test]
    fn presealed() {
        assert!(Latch::sealed().is_sealed());
    }

    #[test]
    fn wakes_all_waiters() {
        let latch = Arc::new(Latch::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                std::thread::spawn(move || latch.wait(Duration::from_secs(5)))
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        latch.seal();

        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn concurrent_seal_has_one_winner() {
        let latch = Arc::new(Latch::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let latch = Arc::clone(&latch);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if latch.seal() {
                        winners.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::Relaxed), 1);
        assert!(latch.is_sealed());
    }
}
