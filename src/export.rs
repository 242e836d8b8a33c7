//! CSV sample of extracted rows for spot verification.
//!
//! The sample is taken by reopening the source and extracting its first N records again, so it
//! never holds more than one record's cells in memory beyond the CSV writer's buffer.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

use crate::error::EtlResult;
use crate::processing::{decode_value, extract};
use crate::types::{CellRow, RawRecord, Schema};

/// One CSV line of the sample.
#[derive(Debug, Serialize)]
struct SampleRow<'a> {
    row_key: &'a str,
    family: &'a str,
    qualifier: &'a str,
    timestamp: String,
    timestamp_micros: i64,
    raw_value_b64: String,
    decoded_value: String,
}

impl<'a> From<&'a CellRow> for SampleRow<'a> {
    fn from(row: &'a CellRow) -> Self {
        Self {
            row_key: &row.row_key,
            family: &row.family,
            qualifier: &row.qualifier,
            timestamp: format_micros(row.timestamp_micros),
            timestamp_micros: row.timestamp_micros,
            raw_value_b64: STANDARD.encode(&row.raw_value),
            decoded_value: decode_value(&row.raw_value),
        }
    }
}

/// Render epoch microseconds as an RFC 3339 UTC timestamp.
pub fn format_micros(micros: i64) -> String {
    match DateTime::from_timestamp_micros(micros) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Micros, true),
        None => micros.to_string(),
    }
}

/// Default sample path: the source path with a `.csv` extension.
pub fn default_sample_path(source: &Path) -> PathBuf {
    source.with_extension("csv")
}

/// Summary of a sample export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleSummary {
    pub records: usize,
    pub rows: usize,
}

/// Write the cells of the first `max_records` decodable records to `path`.
///
/// Undecodable units are skipped; a fatal source error aborts the export.
pub fn export_sample<I>(source: I, schema: &Schema, path: &Path, max_records: usize) -> EtlResult<SampleSummary>
where
    I: IntoIterator<Item = EtlResult<RawRecord>>,
{
    tracing::info!(path = %path.display(), max_records, "exporting csv sample");
    let mut writer = csv::Writer::from_path(path)?;
    let mut summary = SampleSummary::default();

    for item in source {
        if summary.records >= max_records {
            break;
        }
        let record = match item {
            Ok(record) => record,
            Err(e) if e.is_recoverable() => continue,
            Err(e) => return Err(e),
        };
        let extraction = extract(&record, schema);
        for row in &extraction.rows {
            writer.serialize(SampleRow::from(row))?;
        }
        summary.records += 1;
        summary.rows += extraction.rows.len();
    }

    writer.flush()?;
    tracing::info!(
        path = %path.display(),
        records = summary.records,
        rows = summary.rows,
        "csv sample exported"
    );
    Ok(summary)
}
