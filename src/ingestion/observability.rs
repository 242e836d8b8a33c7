use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::EtlError;
use crate::stats::RunStatistics;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational event.
    Info,
    /// A single input unit or family was skipped.
    Warning,
    /// Data was lost from the pipeline's perspective (failed batch, missing table).
    Error,
    /// The run cannot continue (I/O, schema, sink lifecycle).
    Critical,
}

impl Severity {
    /// Classify a pipeline error.
    pub fn of(e: &EtlError) -> Self {
        match e {
            EtlError::Parse { .. } | EtlError::Extraction { .. } | EtlError::UnknownFamily { .. } => {
                Severity::Warning
            }
            EtlError::Sink { .. } | EtlError::TableCreation { .. } | EtlError::Csv(_) => Severity::Error,
            EtlError::Interrupted => Severity::Info,
            EtlError::Io(_)
            | EtlError::Parquet(_)
            | EtlError::SinkLifecycle(_)
            | EtlError::Schema { .. }
            | EtlError::Config { .. } => Severity::Critical,
        }
    }
}

/// Periodic progress snapshot emitted while streaming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    /// Records extracted so far.
    pub records: u64,
    /// Cells extracted so far.
    pub cells: u64,
    /// Recoverable errors so far.
    pub errors: u64,
    /// Fraction of the input consumed, in `[0.0, 1.0]`.
    pub fraction: f64,
    /// Time since streaming started.
    pub elapsed: Duration,
}

impl ProgressEvent {
    /// Records per second since streaming started.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.records as f64 / secs } else { 0.0 }
    }
}

/// Observer interface for pipeline runs.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait PipelineObserver: Send + Sync {
    /// Called every progress interval while streaming.
    fn on_progress(&self, _event: &ProgressEvent) {}

    /// Called for every error the pipeline records, recoverable or not.
    fn on_error(&self, _severity: Severity, _error: &EtlError) {}

    /// Called when an error meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_error`].
    fn on_alert(&self, severity: Severity, error: &EtlError) {
        self.on_error(severity, error)
    }

    /// Called once with the final statistics, on success and on interruption.
    fn on_finish(&self, _stats: &RunStatistics) {}
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositeObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        for o in &self.observers {
            o.on_progress(event);
        }
    }

    fn on_error(&self, severity: Severity, error: &EtlError) {
        for o in &self.observers {
            o.on_error(severity, error);
        }
    }

    fn on_alert(&self, severity: Severity, error: &EtlError) {
        for o in &self.observers {
            o.on_alert(severity, error);
        }
    }

    fn on_finish(&self, stats: &RunStatistics) {
        for o in &self.observers {
            o.on_finish(stats);
        }
    }
}

/// Logs pipeline events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        tracing::info!(
            records = event.records,
            cells = event.cells,
            errors = event.errors,
            "processed {} records ({:.1} records/sec) - {:.1}% complete",
            event.records,
            event.rate(),
            event.fraction * 100.0
        );
    }

    fn on_error(&self, severity: Severity, error: &EtlError) {
        match severity {
            Severity::Info => tracing::info!("{error}"),
            Severity::Warning => tracing::warn!("{error}"),
            Severity::Error | Severity::Critical => tracing::error!(?severity, "{error}"),
        }
    }

    fn on_alert(&self, severity: Severity, error: &EtlError) {
        tracing::error!(?severity, alert = true, "{error}");
    }

    fn on_finish(&self, stats: &RunStatistics) {
        tracing::info!(
            records = stats.total_records,
            cells = stats.total_cells,
            errors = stats.error_count,
            "run finished"
        );
    }
}

/// Appends pipeline events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl PipelineObserver for FileObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        self.append_line(&format!(
            "{} progress records={} cells={} errors={} fraction={:.4}",
            unix_ts(),
            event.records,
            event.cells,
            event.errors,
            event.fraction
        ));
    }

    fn on_error(&self, severity: Severity, error: &EtlError) {
        self.append_line(&format!("{} error severity={severity:?} err={error}", unix_ts()));
    }

    fn on_alert(&self, severity: Severity, error: &EtlError) {
        self.append_line(&format!("{} ALERT severity={severity:?} err={error}", unix_ts()));
    }

    fn on_finish(&self, stats: &RunStatistics) {
        self.append_line(&format!(
            "{} finish records={} cells={} errors={}",
            unix_ts(),
            stats.total_records,
            stats.total_cells,
            stats.error_count
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
