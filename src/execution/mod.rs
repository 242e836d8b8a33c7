//! Bounded fan-out execution for sink writes.
//!
//! The pipeline itself is single-threaded; the only concurrency is inside a sink's batch write,
//! which runs one operation per row on a fixed-size worker pool and waits for every operation
//! to settle before returning.
//!
//! - The pool size is the fan-out degree (maximum in-flight operations)
//! - With `stop_on_first_error`, operations not yet started after a failure are skipped
//! - Metrics + observer hooks for monitoring

mod observer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;

pub use observer::{
    FanOutEvent, FanOutMetrics, FanOutMetricsSnapshot, FanOutObserver, TracingFanOutObserver,
};

/// Configuration for a [`FanOut`].
#[derive(Debug, Clone)]
pub struct FanOutOptions {
    /// Maximum number of concurrently executing operations.
    pub concurrency: usize,
    /// Skip operations that have not started once one has failed.
    pub stop_on_first_error: bool,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            concurrency: 50,
            stop_on_first_error: false,
        }
    }
}

/// Outcome of one [`FanOut::run`].
#[derive(Debug)]
pub struct FanOutResult<E> {
    /// Operations that returned `Ok`.
    pub succeeded: usize,
    /// Failed operations as `(index, error)`, sorted by index.
    pub failures: Vec<(usize, E)>,
    /// Operations never started because an earlier one failed.
    pub skipped: usize,
}

impl<E> FanOutResult<E> {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }
}

/// A fixed-degree worker pool that runs one fallible operation per item.
pub struct FanOut {
    pool: ThreadPool,
    opts: FanOutOptions,
    observer: Option<Arc<dyn FanOutObserver>>,
    metrics: Arc<FanOutMetrics>,
}

impl FanOut {
    /// Create a new fan-out with the given options.
    ///
    /// Returns an error if `concurrency == 0` or the worker pool cannot be built.
    pub fn new(opts: FanOutOptions) -> Result<Self, String> {
        if opts.concurrency == 0 {
            return Err("concurrency must be > 0".to_string());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(opts.concurrency)
            .thread_name(|i| format!("cellstream-write-{i}"))
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(FanOutMetrics::new()),
        })
    }

    /// Attach an observer for fan-out events.
    pub fn with_observer(mut self, observer: Arc<dyn FanOutObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to cumulative metrics.
    pub fn metrics(&self) -> Arc<FanOutMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn options(&self) -> &FanOutOptions {
        &self.opts
    }

    /// Run `op` once per item and wait for all of them to settle.
    pub fn run<T, E, F>(&self, items: &[T], op: F) -> FanOutResult<E>
    where
        T: Sync,
        E: Send,
        F: Fn(&T) -> Result<(), E> + Send + Sync,
    {
        self.pool.install(|| self.run_impl(items, &op))
    }

    fn run_impl<T, E>(&self, items: &[T], op: &(dyn Fn(&T) -> Result<(), E> + Send + Sync)) -> FanOutResult<E>
    where
        T: Sync,
        E: Send,
    {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(FanOutEvent::RunStarted { ops: items.len() });

        let aborted = AtomicBool::new(false);
        let failures: Mutex<Vec<(usize, E)>> = Mutex::new(Vec::new());

        let outcomes: Vec<Option<bool>> = items
            .par_iter()
            .enumerate()
            .map(|(index, item)| {
                if self.opts.stop_on_first_error && aborted.load(Ordering::SeqCst) {
                    self.metrics.on_op_skipped();
                    return None;
                }

                self.metrics.on_op_start();
                self.emit(FanOutEvent::OpStarted { index });
                let ok = match op(item) {
                    Ok(()) => true,
                    Err(e) => {
                        if self.opts.stop_on_first_error && !aborted.swap(true, Ordering::SeqCst) {
                            self.emit(FanOutEvent::Aborted { index });
                        }
                        if let Ok(mut g) = failures.lock() {
                            g.push((index, e));
                        }
                        false
                    }
                };
                self.emit(FanOutEvent::OpFinished { index, ok });
                self.metrics.on_op_end(ok);
                Some(ok)
            })
            .collect();

        let succeeded = outcomes.iter().filter(|o| **o == Some(true)).count();
        let skipped = outcomes.iter().filter(|o| o.is_none()).count();
        let mut failures = failures.into_inner().unwrap_or_else(|p| p.into_inner());
        failures.sort_by_key(|(i, _)| *i);

        self.metrics.end_run(start.elapsed());
        self.emit(FanOutEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });

        FanOutResult {
            succeeded,
            failures,
            skipped,
        }
    }

    fn emit(&self, event: FanOutEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FanOut, FanOutOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::execution::{FanOutEvent, FanOutObserver};

    struct ConcurrencyObserver {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ConcurrencyObserver {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }
        fn max(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }
        fn bump_max(&self, now: usize) {
            loop {
                let cur = self.max_active.load(Ordering::SeqCst);
                if now <= cur {
                    break;
                }
                if self
                    .max_active
                    .compare_exchange(cur, now, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    impl FanOutObserver for ConcurrencyObserver {
        fn on_event(&self, event: &FanOutEvent) {
            match event {
                FanOutEvent::OpStarted { .. } => {
                    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                    self.bump_max(now);
                }
                FanOutEvent::OpFinished { .. } => {
                    let _ = self.active.fetch_sub(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn runs_every_item_with_bounded_concurrency() {
        let observer = Arc::new(ConcurrencyObserver::new());
        let obs_trait: Arc<dyn FanOutObserver> = observer.clone();
        let fan_out = FanOut::new(FanOutOptions {
            concurrency: 2,
            stop_on_first_error: false,
        })
        .unwrap()
        .with_observer(obs_trait);

        let items: Vec<u32> = (0..40).collect();
        let out = fan_out.run(&items, |_| -> Result<(), String> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        });

        assert_eq!(out.succeeded, 40);
        assert!(out.is_ok());
        assert!(observer.max() <= 2);
    }

    #[test]
    fn collects_all_failures_when_not_stopping() {
        let fan_out = FanOut::new(FanOutOptions {
            concurrency: 4,
            stop_on_first_error: false,
        })
        .unwrap();

        let items: Vec<u32> = (0..10).collect();
        let out = fan_out.run(&items, |i| if i % 3 == 0 { Err(*i) } else { Ok(()) });

        assert_eq!(out.succeeded, 6);
        assert_eq!(out.skipped, 0);
        let failed: Vec<usize> = out.failures.iter().map(|(idx, _)| *idx).collect();
        assert_eq!(failed, vec![0, 3, 6, 9]);
    }

    #[test]
    fn stops_starting_new_ops_after_first_error() {
        let fan_out = FanOut::new(FanOutOptions {
            concurrency: 1,
            stop_on_first_error: true,
        })
        .unwrap();
        let metrics = fan_out.metrics();

        let items: Vec<u32> = (0..5).collect();
        let out = fan_out.run(&items, |i| if *i == 0 { Err("boom") } else { Ok(()) });

        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.succeeded + out.skipped, 4);
        assert!(!out.is_ok());

        let snap = metrics.snapshot();
        assert_eq!(snap.runs, 1);
        assert_eq!(snap.ops_failed, 1);
        assert_eq!(snap.max_active_ops, 1);
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(FanOut::new(FanOutOptions {
            concurrency: 0,
            stop_on_first_error: false,
        })
        .is_err());
    }
}
