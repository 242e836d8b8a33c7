use thiserror::Error;

use crate::sink::SinkError;

/// Convenience result type for pipeline operations.
pub type EtlResult<T> = Result<T, EtlError>;

/// Error type returned by sources, extraction and the pipeline driver.
///
/// Recoverable variants (see [`EtlError::is_recoverable`]) are counted and skipped by the
/// driver; everything else ends the run after a best-effort flush.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet decoding or metadata error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// CSV sample export error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// One input unit (a JSON line, a Parquet row group) could not be decoded.
    #[error("malformed input at {unit} {index}: {message}")]
    Parse {
        unit: &'static str,
        index: u64,
        message: String,
    },

    /// The nested cell structure of one family within one record is malformed.
    #[error("failed to extract family '{family}' of row '{row_key}': {message}")]
    Extraction {
        row_key: String,
        family: String,
        message: String,
    },

    /// A record references a family outside the discovered schema.
    #[error("row '{row_key}' references family '{family}' which is not in the discovered schema")]
    UnknownFamily { row_key: String, family: String },

    /// The destination table for a family could not be created.
    #[error("failed to create table for family '{family}': {source}")]
    TableCreation {
        family: String,
        #[source]
        source: SinkError,
    },

    /// A batch write to the sink failed (fully or partially).
    #[error("batch of {rows} rows for family '{family}' failed: {source}")]
    Sink {
        family: String,
        rows: usize,
        #[source]
        source: SinkError,
    },

    /// Sink setup or teardown failed; not tied to a single family.
    #[error("sink error: {0}")]
    SinkLifecycle(#[source] SinkError),

    /// The schema could not be derived from the input.
    #[error("schema discovery failed: {message}")]
    Schema { message: String },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The run was stopped by an external interruption signal.
    #[error("interrupted")]
    Interrupted,
}

impl EtlError {
    /// Whether the driver may skip the failing unit and keep streaming.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EtlError::Parse { .. }
                | EtlError::Extraction { .. }
                | EtlError::UnknownFamily { .. }
                | EtlError::TableCreation { .. }
                | EtlError::Sink { .. }
        )
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        EtlError::Config {
            message: message.into(),
        }
    }
}
