//! Progress channel between the filter and a polling display thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// One poll's view of the progress state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub phase: String,
    pub progress: usize,
    pub target: usize,
}

/// Phase/target/count progress sink.
///
/// The filter is the single writer; any number of threads may poll
/// [`Progress::read`] concurrently. Increments are relaxed atomics, so a
/// reader can momentarily see a fresh phase with a stale count, which is
/// fine for display purposes.
#[derive(Debug, Default)]
pub struct Progress {
    phase: Mutex<String>,
    target: AtomicUsize,
    progress: AtomicUsize,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new phase with `target` work items.
    pub fn reset(&self, phase: &str, target: usize) {
        let mut guard = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        self.progress.store(0, Ordering::Relaxed);
        self.target.store(target, Ordering::Relaxed);
        guard.clear();
        guard.push_str(phase);
    }

    /// Record one completed work item in the current phase.
    #[inline]
    pub fn increment(&self) {
        self.progress.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(&self) -> ProgressSnapshot {
        let phase = self
            .phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ProgressSnapshot {
            phase,
            progress: self.progress.load(Ordering::Relaxed),
            target: self.target.load(Ordering::Relaxed),
        }
    }
}
