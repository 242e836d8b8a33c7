//! Per-family accumulation buffers with size-triggered flush.
//!
//! Invariant: after every public call returns, each buffer holds fewer than `batch_size` rows.
//! A flush moves the buffer out and hands ownership to [`Sink::write_batch`]; the buffer is
//! empty afterwards whether the write succeeded or not. Failed batches are not retried.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use crate::error::{EtlError, EtlResult};
use crate::sink::{Sink, SinkError, WriteReport};
use crate::types::CellRow;

/// Options for [`FamilyBatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Rows per family that trigger a flush.
    pub batch_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

impl BatchOptions {
    pub fn validate(&self) -> EtlResult<()> {
        if self.batch_size == 0 {
            return Err(EtlError::config("batch_size must be > 0"));
        }
        Ok(())
    }
}

/// Result of flushing one family buffer.
#[derive(Debug)]
pub struct FlushOutcome {
    pub family: String,
    /// Rows handed to the sink.
    pub rows: usize,
    pub result: Result<WriteReport, SinkError>,
}

impl FlushOutcome {
    /// Rows the sink acknowledged.
    pub fn written(&self) -> usize {
        match &self.result {
            Ok(report) => report.written,
            Err(_) => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(report) if report.is_complete())
    }

    /// Convert into the pipeline error for a failed or partial flush, keeping the sink error.
    pub fn into_error(self) -> Option<EtlError> {
        let source = match self.result {
            Ok(report) => match report.into_result(&self.family) {
                Ok(_) => return None,
                Err(e) => e,
            },
            Err(e) => e,
        };
        Some(EtlError::Sink {
            family: self.family,
            rows: self.rows,
            source,
        })
    }
}

struct FamilyBatch {
    family: String,
    rows: Vec<CellRow>,
}

/// Routes cell rows into one buffer per family and flushes full buffers to the sink.
pub struct FamilyBatcher {
    sink: Arc<dyn Sink>,
    batch_size: usize,
    batches: Vec<FamilyBatch>,
    index: HashMap<String, usize>,
}

impl FamilyBatcher {
    pub fn new(sink: Arc<dyn Sink>, opts: &BatchOptions) -> EtlResult<Self> {
        opts.validate()?;
        Ok(Self {
            sink,
            batch_size: opts.batch_size,
            batches: Vec::new(),
            index: HashMap::new(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Append `row` to its family buffer, flushing the buffer if it reached the batch size.
    pub fn accept(&mut self, row: CellRow) -> Option<FlushOutcome> {
        let idx = match self.index.get(&row.family) {
            Some(idx) => *idx,
            None => {
                let idx = self.batches.len();
                self.index.insert(row.family.clone(), idx);
                self.batches.push(FamilyBatch {
                    family: row.family.clone(),
                    rows: Vec::with_capacity(self.batch_size),
                });
                idx
            }
        };
        self.batches[idx].rows.push(row);
        if self.batches[idx].rows.len() >= self.batch_size {
            return self.flush_at(idx);
        }
        None
    }

    /// Flush one family's buffer. Returns `None` if it is unknown or empty.
    pub fn flush(&mut self, family: &str) -> Option<FlushOutcome> {
        let idx = *self.index.get(family)?;
        self.flush_at(idx)
    }

    /// Flush every non-empty buffer, in family creation order.
    pub fn flush_all(&mut self) -> Vec<FlushOutcome> {
        (0..self.batches.len())
            .filter_map(|idx| self.flush_at(idx))
            .collect()
    }

    /// Flush everything and release spare buffer capacity.
    pub fn reclaim(&mut self) -> Vec<FlushOutcome> {
        let outcomes = self.flush_all();
        for batch in &mut self.batches {
            batch.rows.shrink_to_fit();
        }
        outcomes
    }

    /// Rows currently buffered for `family`.
    pub fn buffered(&self, family: &str) -> usize {
        self.index
            .get(family)
            .map_or(0, |idx| self.batches[*idx].rows.len())
    }

    /// Rows currently buffered across all families.
    pub fn total_buffered(&self) -> usize {
        self.batches.iter().map(|b| b.rows.len()).sum()
    }

    /// Families with a buffer, in creation order.
    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.batches.iter().map(|b| b.family.as_str())
    }

    fn flush_at(&mut self, idx: usize) -> Option<FlushOutcome> {
        let batch = &mut self.batches[idx];
        if batch.rows.is_empty() {
            return None;
        }
        let rows = mem::take(&mut batch.rows);
        let count = rows.len();
        let family = batch.family.clone();
        let result = self.sink.write_batch(&family, rows);
        match &result {
            Ok(report) => tracing::debug!(
                family = %family,
                rows = count,
                written = report.written,
                failed = report.failures.len(),
                "flushed batch"
            ),
            Err(e) => tracing::warn!(family = %family, rows = count, error = %e, "batch failed"),
        }
        Some(FlushOutcome {
            family,
            rows: count,
            result,
        })
    }
}
