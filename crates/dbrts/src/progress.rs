//! Progress reporting collaborators.
//!
//! Orchestrators size a sink once with the total amount of work, then every
//! committed page reports its size. Sinks are shared across concurrent jobs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

/// Receives progress from the copy pipelines.
pub trait ProgressSink: Send + Sync {
    /// Start a unit of work with a known total.
    fn begin(&self, label: &str, total: u64);

    /// Record `n` more rows or documents.
    fn increment(&self, n: u64);

    /// Mark the current unit of work as done.
    fn finish(&self);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn begin(&self, _label: &str, _total: u64) {}
    fn increment(&self, _n: u64) {}
    fn finish(&self) {}
}

/// Logs a line every 10% of the total.
#[derive(Debug, Default)]
pub struct LogProgress {
    label: Mutex<String>,
    total: AtomicU64,
    done: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogProgress {
    fn begin(&self, label: &str, total: u64) {
        if let Ok(mut l) = self.label.lock() {
            *l = label.to_string();
        }
        self.total.store(total, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        info!("{}: starting ({} total)", label, total);
    }

    fn increment(&self, n: u64) {
        let before = self.done.fetch_add(n, Ordering::SeqCst);
        let after = before + n;
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return;
        }

        let step_before = before * 10 / total;
        let step_after = after * 10 / total;
        if step_after > step_before {
            let label = self.label.lock().map(|l| l.clone()).unwrap_or_default();
            info!(
                "{}: {}/{} ({}%)",
                label,
                after,
                total,
                (after * 100 / total).min(100)
            );
        }
    }

    fn finish(&self) {
        let label = self.label.lock().map(|l| l.clone()).unwrap_or_default();
        info!(
            "{}: finished ({} processed)",
            label,
            self.done.load(Ordering::SeqCst)
        );
    }
}

/// Shared atomic counters, polled by a reporter.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    total: AtomicU64,
    done: AtomicU64,
    finished: AtomicBool,
}

/// Point-in-time view of a [`ProgressCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub done: u64,
    pub finished: bool,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            done: self.done.load(Ordering::SeqCst),
            finished: self.finished.load(Ordering::SeqCst),
        }
    }
}

impl ProgressSink for ProgressCounter {
    fn begin(&self, _label: &str, total: u64) {
        // Document runs begin once per collection; totals accumulate.
        self.total.fetch_add(total, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
    }

    fn increment(&self, n: u64) {
        self.done.fetch_add(n, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_accumulates_across_threads() {
        let counter = Arc::new(ProgressCounter::new());
        counter.begin("rows", 1000);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        c.increment(5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        counter.finish();

        let snap = counter.snapshot();
        assert_eq!(snap.total, 1000);
        assert_eq!(snap.done, 1000);
        assert!(snap.finished);
    }

    #[test]
    fn test_log_progress_tolerates_zero_total() {
        let progress = LogProgress::new();
        progress.begin("empty", 0);
        progress.increment(10);
        progress.finish();
        assert_eq!(progress.done.load(Ordering::SeqCst), 10);
    }
}
