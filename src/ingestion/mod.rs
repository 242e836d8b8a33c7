//! Record sources and run observability.
//!
//! Most callers should use [`open_source`] (from [`unified`]) which:
//!
//! - picks the format from the file extension (or an explicit [`SourceFormat`])
//! - returns a lazy [`RecordSource`] that yields one [`crate::types::RawRecord`] at a time
//!
//! Format-specific sources are also available under:
//! - [`json`]
//! - [`parquet`]
//!
//! Restarting a source means opening it again; nothing is cached between passes.

use std::path::Path;

use crate::error::EtlResult;
use crate::types::RawRecord;

pub mod json;
pub mod observability;
pub mod parquet;
pub mod unified;

pub use observability::{
    CompositeObserver, FileObserver, PipelineObserver, ProgressEvent, Severity, TracingObserver,
};
pub use unified::{open_source, SourceFormat};

/// A lazy sequence of raw records read from a file.
///
/// Items are `Err` for units that could not be decoded. Recoverable errors
/// ([`crate::EtlError::is_recoverable`]) leave the source usable; any other error ends it.
pub trait RecordSource: Iterator<Item = EtlResult<RawRecord>> {
    /// The file this source reads.
    fn path(&self) -> &Path;
}
