//! Cumulative run statistics and the plain-text analysis report.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{EtlError, EtlResult};
use crate::processing::{Extraction, FlushOutcome, TableSetup};
use crate::types::Schema;

const RULE_WIDE: usize = 60;
const RULE: usize = 40;

/// Counters, histograms and a bounded error sample for one run.
///
/// All counters only grow. The error sample keeps the first `error_sample_limit` messages;
/// `error_count` keeps counting past it.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    pub total_records: u64,
    pub total_cells: u64,
    /// Cells per family; every schema family is present, possibly with 0.
    pub family_counts: BTreeMap<String, u64>,
    pub qualifier_counts: HashMap<String, u64>,
    /// Number of families touched by a record -> number of records.
    pub families_per_row: BTreeMap<usize, u64>,
    pub error_count: u64,
    pub errors: Vec<String>,
    #[serde(skip)]
    error_sample_limit: usize,

    pub tables_created: u64,
    pub tables_failed: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
    pub memory_reclamations: u64,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new(50)
    }
}

impl RunStatistics {
    pub fn new(error_sample_limit: usize) -> Self {
        Self {
            total_records: 0,
            total_cells: 0,
            family_counts: BTreeMap::new(),
            qualifier_counts: HashMap::new(),
            families_per_row: BTreeMap::new(),
            error_count: 0,
            errors: Vec::new(),
            error_sample_limit,
            tables_created: 0,
            tables_failed: 0,
            batches_flushed: 0,
            batches_failed: 0,
            rows_written: 0,
            rows_failed: 0,
            memory_reclamations: 0,
        }
    }

    /// Pre-seed one zero counter per schema family.
    pub fn seed_families(&mut self, schema: &Schema) {
        for family in schema.families() {
            self.family_counts.entry(family.clone()).or_insert(0);
        }
    }

    /// Count one extracted record. Its errors are recorded separately via [`Self::record_error`].
    pub fn record_extraction(&mut self, extraction: &Extraction) {
        self.total_records += 1;
        self.total_cells += extraction.rows.len() as u64;
        for row in &extraction.rows {
            *self.family_counts.entry(row.family.clone()).or_insert(0) += 1;
            *self.qualifier_counts.entry(row.qualifier.clone()).or_insert(0) += 1;
        }
        *self
            .families_per_row
            .entry(extraction.families_touched)
            .or_insert(0) += 1;
    }

    pub fn record_error(&mut self, error: &EtlError) {
        self.error_count += 1;
        if self.errors.len() < self.error_sample_limit {
            self.errors.push(error.to_string());
        }
    }

    pub fn record_table_setup(&mut self, setup: &TableSetup) {
        self.tables_created += setup.ready.len() as u64;
        self.tables_failed += setup.errors.len() as u64;
    }

    pub fn record_flush(&mut self, outcome: &FlushOutcome) {
        let written = outcome.written() as u64;
        self.rows_written += written;
        self.rows_failed += outcome.rows as u64 - written;
        if outcome.is_success() {
            self.batches_flushed += 1;
        } else {
            self.batches_failed += 1;
        }
    }

    pub fn record_reclamation(&mut self) {
        self.memory_reclamations += 1;
    }

    pub fn average_cells_per_record(&self) -> Option<f64> {
        (self.total_records > 0).then(|| self.total_cells as f64 / self.total_records as f64)
    }

    /// The `n` most frequent qualifiers, ties broken by name.
    pub fn top_qualifiers(&self, n: usize) -> Vec<(&str, u64)> {
        let mut all: Vec<(&str, u64)> = self
            .qualifier_counts
            .iter()
            .map(|(q, c)| (q.as_str(), *c))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        all.truncate(n);
        all
    }

    /// Render the plain-text analysis report.
    pub fn render_report(&self, top_n: usize) -> String {
        let mut out = String::new();
        let wide = "=".repeat(RULE_WIDE);
        let rule = "-".repeat(RULE);

        let _ = writeln!(out, "STREAMING COLUMN-FAMILY INGESTION REPORT");
        let _ = writeln!(out, "{wide}\n");

        let _ = writeln!(out, "Processing Summary:");
        let _ = writeln!(out, "Total Records Processed: {}", self.total_records);
        let _ = writeln!(out, "Total Cells Processed: {}", self.total_cells);
        let _ = writeln!(out, "Processing Errors: {}", self.error_count);
        if let Some(avg) = self.average_cells_per_record() {
            let _ = writeln!(out, "Average Cells per Record: {avg:.2}");
        }
        out.push('\n');

        let _ = writeln!(out, "COLUMN FAMILY DISTRIBUTION:\n{rule}");
        let mut families: Vec<(&String, &u64)> = self.family_counts.iter().collect();
        families.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (family, count) in families {
            let _ = writeln!(out, "{family}: {count} cells");
        }

        let _ = writeln!(out, "\nTOP {top_n} QUALIFIERS:\n{rule}");
        for (qualifier, count) in self.top_qualifiers(top_n) {
            let _ = writeln!(out, "{qualifier}: {count} occurrences");
        }

        let _ = writeln!(out, "\nSINK SUMMARY:\n{rule}");
        let _ = writeln!(out, "Tables Created: {}", self.tables_created);
        let _ = writeln!(out, "Tables Failed: {}", self.tables_failed);
        let _ = writeln!(out, "Batches Flushed: {}", self.batches_flushed);
        let _ = writeln!(out, "Batches Failed: {}", self.batches_failed);
        let _ = writeln!(out, "Rows Written: {}", self.rows_written);
        let _ = writeln!(out, "Rows Failed: {}", self.rows_failed);
        let _ = writeln!(out, "Memory Reclamations: {}", self.memory_reclamations);

        if !self.errors.is_empty() {
            let _ = writeln!(out, "\nERRORS ENCOUNTERED:\n{rule}");
            for error in &self.errors {
                let _ = writeln!(out, "{error}");
            }
            let hidden = self.error_count.saturating_sub(self.errors.len() as u64);
            if hidden > 0 {
                let _ = writeln!(out, "... and {hidden} more");
            }
        }

        if !self.families_per_row.is_empty() {
            let _ = writeln!(out, "\nFAMILIES PER ROW DISTRIBUTION:\n{rule}");
            for (families, rows) in &self.families_per_row {
                let _ = writeln!(out, "{families} families: {rows} rows");
            }
        }
        out
    }

    /// Write the report to `path`, replacing any existing file.
    pub fn write_report(&self, path: &Path, top_n: usize) -> EtlResult<()> {
        fs::write(path, self.render_report(top_n))?;
        tracing::info!(path = %path.display(), "analysis report saved");
        Ok(())
    }

    /// Write the statistics as pretty JSON.
    pub fn write_json(&self, path: &Path) -> EtlResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EtlError::Io(std::io::Error::other(e)))?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RunStatistics;
    use crate::error::EtlError;
    use crate::processing::Extraction;
    use crate::types::{CellRow, Schema};

    fn extraction(cells: &[(&str, &str)], touched: usize) -> Extraction {
        Extraction {
            row_key: "r".into(),
            rows: cells
                .iter()
                .map(|(f, q)| CellRow {
                    row_key: "r".into(),
                    family: f.to_string(),
                    qualifier: q.to_string(),
                    timestamp_micros: 0,
                    raw_value: Vec::new(),
                })
                .collect(),
            families_touched: touched,
            errors: Vec::new(),
        }
    }

    #[test]
    fn counts_records_cells_and_histograms() {
        let mut stats = RunStatistics::new(50);
        stats.seed_families(&Schema::new("k", ["cf1", "cf2", "cf3"].map(String::from)));
        stats.record_extraction(&extraction(&[("cf1", "a"), ("cf1", "b"), ("cf2", "a")], 2));
        stats.record_extraction(&extraction(&[("cf1", "a")], 1));
        stats.record_extraction(&extraction(&[], 0));

        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.total_cells, 4);
        assert_eq!(stats.family_counts["cf1"], 3);
        assert_eq!(stats.family_counts["cf3"], 0);
        assert_eq!(stats.qualifier_counts["a"], 3);
        assert_eq!(stats.qualifier_counts["b"], 1);
        assert_eq!(stats.qualifier_counts.len(), 2);
        assert_eq!(stats.families_per_row[&0], 1);
        assert_eq!(stats.families_per_row[&1], 1);
        assert_eq!(stats.families_per_row[&2], 1);
        assert_eq!(stats.top_qualifiers(1), vec![("a", 3)]);
        let avg = stats.average_cells_per_record().unwrap();
        assert!((avg - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn error_sample_is_bounded() {
        let mut stats = RunStatistics::new(2);
        for _ in 0..5 {
            stats.record_error(&EtlError::Interrupted);
        }
        assert_eq!(stats.error_count, 5);
        assert_eq!(stats.errors.len(), 2);
        assert!(stats.render_report(20).contains("... and 3 more"));
    }

    #[test]
    fn report_lists_sections() {
        let mut stats = RunStatistics::new(50);
        stats.seed_families(&Schema::new("k", ["cf1".to_string()]));
        stats.record_extraction(&extraction(&[("cf1", "q")], 1));
        let report = stats.render_report(20);
        assert!(report.starts_with("STREAMING COLUMN-FAMILY INGESTION REPORT\n"));
        assert!(report.contains("Total Records Processed: 1\n"));
        assert!(report.contains("Average Cells per Record: 1.00\n"));
        assert!(report.contains("cf1: 1 cells\n"));
        assert!(report.contains("TOP 20 QUALIFIERS:"));
        assert!(report.contains("q: 1 occurrences\n"));
        assert!(report.contains("1 families: 1 rows\n"));
        assert!(!report.contains("ERRORS ENCOUNTERED"));
    }

    #[test]
    fn serializes_to_json() {
        let stats = RunStatistics::new(50);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_records"], 0);
        assert!(json.get("error_sample_limit").is_none());
    }
}
