//! Pluggable progress reporting for long-running stages.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

/// Receives coarse progress updates from the matrix builder and the solver
/// drivers. Implementations must be cheap and thread-safe; updates arrive
/// from worker threads.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, stage: &str, done: usize, total: usize);
}

/// Discards all updates.
#[derive(Debug, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn on_progress(&self, _stage: &str, _done: usize, _total: usize) {}
}

/// Emits a tracing event every `step` completions and on the final one.
#[derive(Debug)]
pub struct LogProgress {
    step: usize,
    last_logged: AtomicUsize,
}

impl LogProgress {
    pub fn new(step: usize) -> Self {
        Self {
            step: step.max(1),
            last_logged: AtomicUsize::new(0),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressReporter for LogProgress {
    fn on_progress(&self, stage: &str, done: usize, total: usize) {
        let last = self.last_logged.load(Ordering::Relaxed);
        if done == total || done.saturating_sub(last) >= self.step {
            self.last_logged.store(done, Ordering::Relaxed);
            info!(stage, done, total, "progress");
        }
    }
}
