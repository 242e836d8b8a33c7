//! Write side of the pipeline: one destination table per column family.
//!
//! A [`Sink`] is constructed once, handed to the pipeline driver, opened before the first
//! record and closed on every exit path. Implementations:
//!
//! - [`cql::CqlSink`]: renders CQL DDL/INSERTs and executes them through a [`cql::CqlSession`]
//!   with a bounded fan-out per batch
//! - [`memory::MemorySink`]: in-memory tables, used for dry runs and tests
//!
//! Sinks never retry. A failed batch is reported once and is lost from the pipeline's
//! perspective.

use std::fmt;

use thiserror::Error;

use crate::types::CellRow;

pub mod cql;
pub mod memory;
pub mod script;

pub use cql::{Compression, Consistency, CqlOptions, CqlSession, CqlSink, CqlValue, SessionError};
pub use memory::MemorySink;
pub use script::{ScriptSession, ScriptTarget};

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Error type returned by sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The destination table does not exist (e.g. its creation failed earlier).
    #[error("table '{table}' does not exist")]
    MissingTable { table: String },

    /// The store rejected an operation.
    #[error("table '{table}' rejected the operation: {message}")]
    Rejected { table: String, message: String },

    /// A write failed and the batch was abandoned at that point.
    #[error("write to '{table}' aborted after {attempted} of {total} rows: {source}")]
    Aborted {
        table: String,
        attempted: usize,
        total: usize,
        #[source]
        source: SessionError,
    },

    /// Some rows of a batch failed; the rest were written.
    #[error("{failed} of {total} rows failed for '{table}', first error: {first}")]
    Partial {
        table: String,
        failed: usize,
        total: usize,
        first: String,
    },

    /// Error raised by the store session.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The fan-out worker pool could not be created.
    #[error("failed to build write pool: {0}")]
    Pool(String),
}

/// Per-row failure collected when a sink does not abort on the first error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub row_key: String,
    pub qualifier: String,
    pub timestamp_micros: i64,
    pub message: String,
}

/// Outcome of one [`Sink::write_batch`] call that did not abort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Rows acknowledged by the store.
    pub written: usize,
    /// Rows that failed.
    pub failures: Vec<RowFailure>,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert a report with failures into [`SinkError::Partial`].
    pub fn into_result(self, table: &str) -> SinkResult<WriteReport> {
        match self.failures.first() {
            None => Ok(self),
            Some(first) => Err(SinkError::Partial {
                table: table.to_string(),
                failed: self.failures.len(),
                total: self.written + self.failures.len(),
                first: first.message.clone(),
            }),
        }
    }
}

/// Destination for per-family cell batches.
///
/// Implementations must be safe to call from the pipeline thread while internally fanning
/// writes out to worker threads.
pub trait Sink: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// Prepare the destination (e.g. create the keyspace). Called once before any table.
    fn open(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Create the table for `family` if it does not exist and return its name.
    ///
    /// Must be idempotent: calling it twice for the same family never errors because of the
    /// first call and results in one logical table.
    fn ensure_table(&self, family: &str) -> SinkResult<String>;

    /// Write one batch of rows belonging to `family`.
    ///
    /// Ownership of `rows` moves to the sink. An `Err` means the batch failed as a whole (or
    /// was aborted on its first error); an `Ok` report may still list per-row failures.
    fn write_batch(&self, family: &str, rows: Vec<CellRow>) -> SinkResult<WriteReport>;

    /// Release the destination. Called once on every exit path.
    fn close(&self) -> SinkResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").field("name", &self.name()).finish()
    }
}

/// Make a family name usable as a table identifier.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`; names that do not start with a letter
/// are prefixed with `f_`.
pub fn sanitize_identifier(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    match sanitized.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => sanitized,
        _ => format!("f_{sanitized}"),
    }
}

/// Deterministic destination table name for a family.
pub fn table_name(prefix: &str, family: &str) -> String {
    format!("{prefix}_{}", sanitize_identifier(family))
}

#[cfg(test)]
mod tests {
    use super::{sanitize_identifier, table_name, RowFailure, WriteReport};

    #[test]
    fn sanitizes_family_names() {
        assert_eq!(sanitize_identifier("cf1"), "cf1");
        assert_eq!(sanitize_identifier("my-family.v2"), "my_family_v2");
        assert_eq!(sanitize_identifier("1abc"), "f_1abc");
        assert_eq!(sanitize_identifier("_x"), "f__x");
        assert_eq!(sanitize_identifier(""), "f_");
        assert_eq!(table_name("table", "pb"), "table_pb");
    }

    #[test]
    fn partial_reports_become_errors() {
        let report = WriteReport {
            written: 3,
            failures: vec![RowFailure {
                row_key: "r".into(),
                qualifier: "q".into(),
                timestamp_micros: 1,
                message: "timeout".into(),
            }],
        };
        let err = report.into_result("t").unwrap_err();
        assert_eq!(err.to_string(), "1 of 4 rows failed for 't', first error: timeout");
    }
}
