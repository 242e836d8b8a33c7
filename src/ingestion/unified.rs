//! Format selection for record sources.

use std::path::Path;

use crate::error::{EtlError, EtlResult};

use super::json::JsonLinesSource;
use super::parquet::ParquetRowGroupSource;
use super::RecordSource;

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Newline-delimited JSON, one row per line.
    JsonLines,
    /// Apache Parquet, one family per top-level column.
    Parquet,
}

impl SourceFormat {
    /// Parse a source format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" | "jsonl" | "ndjson" => Some(Self::JsonLines),
            "parquet" | "pq" => Some(Self::Parquet),
            _ => None,
        }
    }

    /// Infer the format from a path's extension.
    pub fn infer(path: &Path) -> EtlResult<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                EtlError::config(format!(
                    "cannot infer format: path has no extension ({})",
                    path.display()
                ))
            })?;

        Self::from_extension(ext).ok_or_else(|| {
            EtlError::config(format!(
                "cannot infer format from extension '{ext}' for path ({})",
                path.display()
            ))
        })
    }
}

/// Open a record source for `path`.
///
/// If `format` is `None`, it is inferred from the file extension. A missing file fails with
/// [`EtlError::Io`].
///
/// ```no_run
/// use cellstream::ingestion::open_source;
///
/// # fn main() -> Result<(), cellstream::EtlError> {
/// let source = open_source("dump.jsonl", None)?;
/// for record in source {
///     match record {
///         Ok(record) => println!("{} columns", record.columns.len()),
///         Err(e) if e.is_recoverable() => eprintln!("skipped: {e}"),
///         Err(e) => return Err(e),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn open_source(
    path: impl AsRef<Path>,
    format: Option<SourceFormat>,
) -> EtlResult<Box<dyn RecordSource>> {
    let path = path.as_ref();
    let format = match format {
        Some(f) => f,
        None => SourceFormat::infer(path)?,
    };
    Ok(match format {
        SourceFormat::JsonLines => Box::new(JsonLinesSource::open(path)?),
        SourceFormat::Parquet => Box::new(ParquetRowGroupSource::open(path)?),
    })
}
