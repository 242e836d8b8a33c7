use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Events emitted by [`super::FanOut`] while executing a batch.
#[derive(Debug, Clone)]
pub enum FanOutEvent {
    RunStarted { ops: usize },
    OpStarted { index: usize },
    OpFinished { index: usize, ok: bool },
    Aborted { index: usize },
    RunFinished {
        elapsed: Duration,
        metrics: FanOutMetricsSnapshot,
    },
}

/// Observer hook for fan-out events.
pub trait FanOutObserver: Send + Sync {
    fn on_event(&self, event: &FanOutEvent);
}

/// Logs fan-out events at `trace` level.
#[derive(Default)]
pub struct TracingFanOutObserver;

impl FanOutObserver for TracingFanOutObserver {
    fn on_event(&self, event: &FanOutEvent) {
        tracing::trace!(?event, "fan-out");
    }
}

/// Cumulative metrics across all fan-out runs of one [`super::FanOut`].
///
/// Counters are updated by worker threads during execution; callers can snapshot them at any
/// time.
pub struct FanOutMetrics {
    runs: AtomicU64,
    elapsed_ns: AtomicU64,

    ops_started: AtomicU64,
    ops_failed: AtomicU64,
    ops_skipped: AtomicU64,

    active_ops: AtomicUsize,
    max_active_ops: AtomicUsize,
}

impl FanOutMetrics {
    pub fn new() -> Self {
        Self {
            runs: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            ops_started: AtomicU64::new(0),
            ops_failed: AtomicU64::new(0),
            ops_skipped: AtomicU64::new(0),
            active_ops: AtomicUsize::new(0),
            max_active_ops: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.runs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        let add = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        let _ = self.elapsed_ns.fetch_add(add, Ordering::SeqCst);
    }

    pub fn on_op_start(&self) {
        let _ = self.ops_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_ops.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_ops, now);
    }

    pub fn on_op_end(&self, ok: bool) {
        if !ok {
            let _ = self.ops_failed.fetch_add(1, Ordering::SeqCst);
        }
        let _ = self.active_ops.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_op_skipped(&self) {
        let _ = self.ops_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> FanOutMetricsSnapshot {
        FanOutMetricsSnapshot {
            runs: self.runs.load(Ordering::SeqCst),
            elapsed: Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst)),
            ops_started: self.ops_started.load(Ordering::SeqCst),
            ops_failed: self.ops_failed.load(Ordering::SeqCst),
            ops_skipped: self.ops_skipped.load(Ordering::SeqCst),
            max_active_ops: self.max_active_ops.load(Ordering::SeqCst),
        }
    }
}

impl Default for FanOutMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    loop {
        let cur = dst.load(Ordering::SeqCst);
        if now <= cur {
            break;
        }
        if dst.compare_exchange(cur, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break;
        }
    }
}

/// Immutable snapshot of [`FanOutMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutMetricsSnapshot {
    pub runs: u64,
    pub elapsed: Duration,
    pub ops_started: u64,
    pub ops_failed: u64,
    pub ops_skipped: u64,
    pub max_active_ops: usize,
}

impl fmt::Display for FanOutMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "runs={}, ops_started={}, ops_failed={}, ops_skipped={}, max_active_ops={}, elapsed={:?}",
            self.runs,
            self.ops_started,
            self.ops_failed,
            self.ops_skipped,
            self.max_active_ops,
            self.elapsed
        )
    }
}
