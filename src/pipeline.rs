//! Pipeline driver: wires source, extraction, batching, sink, memory checks and statistics.
//!
//! State machine:
//!
//! ```text
//! Init -> Streaming -> Flushing -> Reporting -> Done
//!              \-> Interrupted -> Flushing -> Reporting -> Interrupted
//! ```
//!
//! Unit-level errors (see [`EtlError::is_recoverable`]) are counted and skipped. Any other error
//! ends streaming; buffered rows are flushed before it propagates. The sink is closed on every
//! exit path once it has been handed to [`Pipeline::new`] and `run` was called.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{EtlError, EtlResult};
use crate::export::{default_sample_path, export_sample, SampleSummary};
use crate::ingestion::{
    open_source, PipelineObserver, ProgressEvent, RecordSource, Severity, SourceFormat,
    TracingObserver,
};
use crate::memory::{MemoryCheck, MemoryGovernor, MemoryProbe};
use crate::processing::{
    discover, ensure_tables, exposes_shape, extract, BatchOptions, Extraction, FamilyBatcher,
    FlushOutcome, KeyColumn,
};
use crate::sink::Sink;
use crate::stats::RunStatistics;
use crate::types::{RawRecord, Schema};

/// Options for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Input file.
    pub source: PathBuf,
    /// Input format; inferred from the extension when `None`.
    pub format: Option<SourceFormat>,
    pub key_column: KeyColumn,
    /// Explicit family list; discovered from the first record carrying a family when `None`.
    pub families: Option<Vec<String>>,
    pub batch: BatchOptions,
    /// Resident memory (MB) above which buffers are reclaimed.
    pub memory_ceiling_mb: u64,
    /// Units between memory checks.
    pub memory_check_interval: u64,
    /// Units between progress events.
    pub progress_interval: u64,
    /// Export a CSV sample after streaming.
    pub export_sample: bool,
    /// Records in the CSV sample.
    pub sample_size: usize,
    /// CSV sample path; defaults to the source path with a `.csv` extension.
    pub sample_path: Option<PathBuf>,
    /// Where to write the text report.
    pub report_path: Option<PathBuf>,
    /// Where to write the statistics as JSON.
    pub stats_json_path: Option<PathBuf>,
    /// Errors kept verbatim in the statistics.
    pub error_sample_limit: usize,
    /// Qualifiers listed in the report.
    pub top_qualifiers: usize,
    /// Minimum severity that triggers [`PipelineObserver::on_alert`].
    pub alert_threshold: Option<Severity>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            format: None,
            key_column: KeyColumn::default(),
            families: None,
            batch: BatchOptions::default(),
            memory_ceiling_mb: 1024,
            memory_check_interval: 1000,
            progress_interval: 1000,
            export_sample: false,
            sample_size: 5000,
            sample_path: None,
            report_path: None,
            stats_json_path: None,
            error_sample_limit: 50,
            top_qualifiers: 20,
            alert_threshold: Some(Severity::Critical),
        }
    }
}

impl PipelineOptions {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.source.as_os_str().is_empty() {
            return Err(EtlError::config("source path is required"));
        }
        self.batch.validate()?;
        if self.memory_check_interval == 0 {
            return Err(EtlError::config("memory_check_interval must be > 0"));
        }
        if self.progress_interval == 0 {
            return Err(EtlError::config("progress_interval must be > 0"));
        }
        if matches!(&self.families, Some(f) if f.is_empty()) {
            return Err(EtlError::config("explicit family list must not be empty"));
        }
        Ok(())
    }
}

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Streaming,
    Flushing,
    Reporting,
    Done,
    Interrupted,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub statistics: RunStatistics,
    pub elapsed: Duration,
    pub sample: Option<SampleSummary>,
}

impl RunSummary {
    /// Records per second over the whole run.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.statistics.total_records as f64 / secs
        } else {
            0.0
        }
    }
}

enum StreamEnd {
    Exhausted,
    Interrupted,
}

/// A single streaming ETL run.
pub struct Pipeline {
    opts: PipelineOptions,
    sink: Arc<dyn Sink>,
    observer: Arc<dyn PipelineObserver>,
    interrupt: Arc<AtomicBool>,
    governor: MemoryGovernor,
    state: PipelineState,
    stats: RunStatistics,
    schema: Option<Arc<Schema>>,
}

impl Pipeline {
    pub fn new(opts: PipelineOptions, sink: Arc<dyn Sink>) -> Self {
        let governor = MemoryGovernor::new(opts.memory_ceiling_mb);
        let stats = RunStatistics::new(opts.error_sample_limit);
        Self {
            opts,
            sink,
            observer: Arc::new(TracingObserver),
            interrupt: Arc::new(AtomicBool::new(false)),
            governor,
            state: PipelineState::Init,
            stats,
            schema: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Use an externally owned interruption flag (e.g. set by a signal handler).
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn with_memory_probe(mut self, probe: Box<dyn MemoryProbe>) -> Self {
        self.governor = MemoryGovernor::with_probe(self.opts.memory_ceiling_mb, probe);
        self
    }

    /// Handle to the interruption flag checked between units.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    /// The discovered schema, once streaming has seen a record.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_deref()
    }

    /// Run the pipeline to completion.
    ///
    /// Returns [`EtlError::Interrupted`] after flushing and reporting if the interruption flag
    /// was raised; statistics stay available through [`Self::statistics`].
    pub fn run(&mut self) -> EtlResult<RunSummary> {
        self.opts.validate()?;
        let started = Instant::now();
        self.transition(PipelineState::Init);

        let result = match self.sink.open() {
            Ok(()) => self.run_opened(started),
            Err(e) => Err(EtlError::SinkLifecycle(e)),
        };

        let closed = self.sink.close().map_err(EtlError::SinkLifecycle);
        match (result, closed) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => {
                self.report_error(&e);
                Err(e)
            }
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    tracing::error!(error = %close_err, "failed to close sink after error");
                }
                if !matches!(e, EtlError::Interrupted) {
                    self.report_error(&e);
                }
                Err(e)
            }
        }
    }

    fn run_opened(&mut self, started: Instant) -> EtlResult<RunSummary> {
        let mut source = open_source(&self.opts.source, self.opts.format)?;
        let mut batcher = FamilyBatcher::new(Arc::clone(&self.sink), &self.opts.batch)?;

        self.transition(PipelineState::Streaming);
        let end = self.stream(source.as_mut(), &mut batcher, started);
        drop(source);

        if matches!(end, Ok(StreamEnd::Interrupted)) {
            self.transition(PipelineState::Interrupted);
        }
        self.transition(PipelineState::Flushing);
        for outcome in batcher.flush_all() {
            self.record_flush(outcome);
        }

        let interrupted = match end {
            Ok(StreamEnd::Exhausted) => false,
            Ok(StreamEnd::Interrupted) => true,
            Err(e) => return Err(e),
        };
        if !interrupted && self.schema.is_none() {
            return Err(EtlError::Schema {
                message: format!(
                    "none of {} records carried a column family",
                    self.stats.total_records
                ),
            });
        }

        self.transition(PipelineState::Reporting);
        let sample = if interrupted { None } else { self.export_sample() };
        self.write_outputs();
        self.observer.on_finish(&self.stats);

        let elapsed = started.elapsed();
        if interrupted {
            self.transition(PipelineState::Interrupted);
            tracing::warn!(
                records = self.stats.total_records,
                "processing interrupted; buffered rows flushed"
            );
            return Err(EtlError::Interrupted);
        }

        self.transition(PipelineState::Done);
        let summary = RunSummary {
            statistics: self.stats.clone(),
            elapsed,
            sample,
        };
        tracing::info!(
            records = summary.statistics.total_records,
            cells = summary.statistics.total_cells,
            errors = summary.statistics.error_count,
            "processing completed in {:.2}s ({:.1} records/sec)",
            elapsed.as_secs_f64(),
            summary.rate()
        );
        Ok(summary)
    }

    fn stream(
        &mut self,
        source: &mut dyn RecordSource,
        batcher: &mut FamilyBatcher,
        started: Instant,
    ) -> EtlResult<StreamEnd> {
        let mut units: u64 = 0;
        let mut fraction = 0.0;

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return Ok(StreamEnd::Interrupted);
            }
            let Some(item) = source.next() else {
                return Ok(StreamEnd::Exhausted);
            };
            units += 1;

            match item {
                Ok(record) => {
                    fraction = record.progress;
                    self.process_record(&record, batcher)?;
                }
                Err(e) if e.is_recoverable() => self.record_error(e),
                Err(e) => return Err(e),
            }

            if units % self.opts.memory_check_interval == 0 {
                self.check_memory(batcher);
            }
            if units % self.opts.progress_interval == 0 {
                self.observer.on_progress(&ProgressEvent {
                    records: self.stats.total_records,
                    cells: self.stats.total_cells,
                    errors: self.stats.error_count,
                    fraction,
                    elapsed: started.elapsed(),
                });
            }
        }
    }

    fn process_record(&mut self, record: &RawRecord, batcher: &mut FamilyBatcher) -> EtlResult<()> {
        let schema = match &self.schema {
            Some(schema) => Arc::clone(schema),
            None if !exposes_shape(record, &self.opts.key_column, self.opts.families.as_deref()) => {
                tracing::debug!(sequence = record.sequence, "record carries no family; discovery deferred");
                self.stats.record_extraction(&Extraction::default());
                return Ok(());
            }
            None => self.init_schema(record)?,
        };
        let mut extraction = extract(record, &schema);
        self.stats.record_extraction(&extraction);
        for e in std::mem::take(&mut extraction.errors) {
            self.record_error(e);
        }
        for row in extraction.rows {
            if let Some(outcome) = batcher.accept(row) {
                self.record_flush(outcome);
            }
        }
        Ok(())
    }

    fn init_schema(&mut self, record: &RawRecord) -> EtlResult<Arc<Schema>> {
        let schema = Arc::new(discover(record, &self.opts.key_column, self.opts.families.as_deref())?);
        let setup = ensure_tables(&schema, self.sink.as_ref());
        self.stats.seed_families(&schema);
        self.stats.record_table_setup(&setup);
        for e in setup.errors {
            self.record_error(e);
        }
        self.schema = Some(Arc::clone(&schema));
        Ok(schema)
    }

    fn check_memory(&mut self, batcher: &mut FamilyBatcher) {
        if let MemoryCheck::Exceeded { .. } = self.governor.check() {
            let outcomes = batcher.reclaim();
            self.stats.record_reclamation();
            for outcome in outcomes {
                self.record_flush(outcome);
            }
        }
    }

    fn record_flush(&mut self, outcome: FlushOutcome) {
        self.stats.record_flush(&outcome);
        if let Some(e) = outcome.into_error() {
            self.record_error(e);
        }
    }

    fn record_error(&mut self, e: EtlError) {
        self.stats.record_error(&e);
        self.report_error(&e);
    }

    fn report_error(&self, e: &EtlError) {
        let severity = Severity::of(e);
        self.observer.on_error(severity, e);
        if matches!(self.opts.alert_threshold, Some(t) if severity >= t) {
            self.observer.on_alert(severity, e);
        }
    }

    fn export_sample(&self) -> Option<SampleSummary> {
        if !self.opts.export_sample {
            return None;
        }
        let schema = self.schema.clone()?;
        let path = self
            .opts
            .sample_path
            .clone()
            .unwrap_or_else(|| default_sample_path(&self.opts.source));
        let result = open_source(&self.opts.source, self.opts.format)
            .and_then(|source| export_sample(source, &schema, &path, self.opts.sample_size));
        match result {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!(error = %e, "failed to export csv sample");
                self.report_error(&e);
                None
            }
        }
    }

    fn write_outputs(&self) {
        if let Some(path) = self.opts.report_path.clone() {
            if let Err(e) = self.stats.write_report(&path, self.opts.top_qualifiers) {
                tracing::error!(error = %e, "failed to write analysis report");
                self.report_error(&e);
            }
        }
        if let Some(path) = self.opts.stats_json_path.clone() {
            if let Err(e) = self.stats.write_json(&path) {
                tracing::error!(error = %e, "failed to write statistics json");
                self.report_error(&e);
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineOptions, PipelineState};

    #[test]
    fn defaults_match_documented_values() {
        let o = PipelineOptions::default();
        assert_eq!(o.batch.batch_size, 1000);
        assert_eq!(o.memory_ceiling_mb, 1024);
        assert_eq!(o.memory_check_interval, 1000);
        assert_eq!(o.progress_interval, 1000);
        assert_eq!(o.sample_size, 5000);
        assert_eq!(o.error_sample_limit, 50);
        assert_eq!(o.top_qualifiers, 20);
    }

    #[test]
    fn validation_rejects_bad_options() {
        assert!(PipelineOptions::default().validate().is_err());
        let mut o = PipelineOptions::new("dump.jsonl");
        assert!(o.validate().is_ok());
        o.progress_interval = 0;
        assert!(o.validate().is_err());
        let o = PipelineOptions {
            families: Some(Vec::new()),
            ..PipelineOptions::new("dump.jsonl")
        };
        assert!(o.validate().is_err());
        assert_ne!(PipelineState::Done, PipelineState::Interrupted);
    }
}
