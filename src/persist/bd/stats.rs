use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct BdCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    callbacks: AtomicU64,
    callback_panics: AtomicU64,
}

impl BdCounters {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, workers: usize, running: bool) -> EngineStats {
        EngineStats {
            workers,
            running,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            callbacks_invoked: self.callbacks.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters of the background database and its consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub workers: usize,
    pub running: bool,
    /// Ops accepted into a worker queue.
    pub submitted: u64,
    /// Ops handed back through their completion channel.
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub callbacks_invoked: u64,
    pub callback_panics: u64,
}
