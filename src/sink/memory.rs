//! In-memory sink for dry runs and tests.
//!
//! Tables are keyed like the CQL layout, `(row_key, timestamp DESC, qualifier)`, so rewriting
//! the same cell overwrites it. Failures can be injected per family.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::types::CellRow;

use super::{table_name, RowFailure, Sink, SinkError, SinkResult, WriteReport};

type CellKey = (String, Reverse<i64>, String);

#[derive(Debug, Default)]
struct State {
    closed: bool,
    tables: HashMap<String, BTreeMap<CellKey, Vec<u8>>>,
    owners: HashMap<String, String>,
    ensure_calls: HashMap<String, usize>,
    batches: HashMap<String, Vec<usize>>,
}

/// [`Sink`] holding every table in memory.
#[derive(Debug)]
pub struct MemorySink {
    table_prefix: String,
    fail_create: HashSet<String>,
    fail_write: HashSet<String>,
    fail_qualifiers: HashSet<String>,
    state: Mutex<State>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            table_prefix: "table".to_string(),
            fail_create: HashSet::new(),
            fail_write: HashSet::new(),
            fail_qualifiers: HashSet::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Make `ensure_table` fail for `family`.
    pub fn fail_table_creation(mut self, family: impl Into<String>) -> Self {
        self.fail_create.insert(family.into());
        self
    }

    /// Make every `write_batch` for `family` fail as a whole.
    pub fn fail_writes(mut self, family: impl Into<String>) -> Self {
        self.fail_write.insert(family.into());
        self
    }

    /// Reject individual rows with this qualifier; the rest of the batch is written.
    pub fn fail_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.fail_qualifiers.insert(qualifier.into());
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Names of created tables, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of `ensure_table` calls made for `family`.
    pub fn ensure_calls(&self, family: &str) -> usize {
        self.state().ensure_calls.get(family).copied().unwrap_or(0)
    }

    /// Sizes of the batches received for `family`, in arrival order (failed ones included).
    pub fn batch_sizes(&self, family: &str) -> Vec<usize> {
        self.state().batches.get(family).cloned().unwrap_or_default()
    }

    /// Number of distinct cells stored for `family`.
    pub fn row_count(&self, family: &str) -> usize {
        let table = table_name(&self.table_prefix, family);
        self.state().tables.get(&table).map_or(0, BTreeMap::len)
    }

    /// Stored value of one cell.
    pub fn get(&self, family: &str, row_key: &str, timestamp_micros: i64, qualifier: &str) -> Option<Vec<u8>> {
        let table = table_name(&self.table_prefix, family);
        let key = (row_key.to_string(), Reverse(timestamp_micros), qualifier.to_string());
        self.state().tables.get(&table).and_then(|t| t.get(&key).cloned())
    }

    /// All stored cells of `family` in clustering order.
    pub fn rows(&self, family: &str) -> Vec<CellRow> {
        let table = table_name(&self.table_prefix, family);
        self.state()
            .tables
            .get(&table)
            .map(|t| {
                t.iter()
                    .map(|((row_key, Reverse(ts), qualifier), value)| CellRow {
                        row_key: row_key.clone(),
                        family: family.to_string(),
                        qualifier: qualifier.clone(),
                        timestamp_micros: *ts,
                        raw_value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self) -> SinkResult<()> {
        self.state().closed = false;
        Ok(())
    }

    fn ensure_table(&self, family: &str) -> SinkResult<String> {
        let table = table_name(&self.table_prefix, family);
        let mut s = self.state();
        *s.ensure_calls.entry(family.to_string()).or_insert(0) += 1;
        if self.fail_create.contains(family) {
            return Err(SinkError::Rejected {
                table,
                message: "table creation refused".to_string(),
            });
        }
        match s.owners.get(&table) {
            Some(owner) if owner != family => {
                return Err(SinkError::Rejected {
                    message: format!("table already holds family '{owner}'"),
                    table,
                });
            }
            Some(_) => {}
            None => {
                s.owners.insert(table.clone(), family.to_string());
            }
        }
        s.tables.entry(table.clone()).or_default();
        Ok(table)
    }

    fn write_batch(&self, family: &str, rows: Vec<CellRow>) -> SinkResult<WriteReport> {
        let table = table_name(&self.table_prefix, family);
        let mut s = self.state();
        s.batches.entry(family.to_string()).or_default().push(rows.len());
        if self.fail_write.contains(family) {
            return Err(SinkError::Rejected {
                table,
                message: "write refused".to_string(),
            });
        }
        if s.owners.get(&table).map(String::as_str) != Some(family) {
            return Err(SinkError::MissingTable { table });
        }
        let stored = s
            .tables
            .get_mut(&table)
            .ok_or_else(|| SinkError::MissingTable { table: table.clone() })?;

        let mut report = WriteReport::default();
        for row in rows {
            if self.fail_qualifiers.contains(&row.qualifier) {
                report.failures.push(RowFailure {
                    row_key: row.row_key,
                    qualifier: row.qualifier,
                    timestamp_micros: row.timestamp_micros,
                    message: "row rejected".to_string(),
                });
                continue;
            }
            stored.insert(
                (row.row_key, Reverse(row.timestamp_micros), row.qualifier),
                row.raw_value,
            );
            report.written += 1;
        }
        Ok(report)
    }

    fn close(&self) -> SinkResult<()> {
        self.state().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySink;
    use crate::sink::{Sink, SinkError};
    use crate::types::CellRow;

    fn cell(row_key: &str, q: &str, ts: i64, v: &[u8]) -> CellRow {
        CellRow {
            row_key: row_key.into(),
            family: "cf1".into(),
            qualifier: q.into(),
            timestamp_micros: ts,
            raw_value: v.to_vec(),
        }
    }

    #[test]
    fn rewriting_a_cell_overwrites_it() {
        let sink = MemorySink::new();
        sink.ensure_table("cf1").unwrap();
        sink.write_batch("cf1", vec![cell("r", "q", 1, b"a")]).unwrap();
        sink.write_batch("cf1", vec![cell("r", "q", 1, b"b")]).unwrap();
        assert_eq!(sink.row_count("cf1"), 1);
        assert_eq!(sink.get("cf1", "r", 1, "q"), Some(b"b".to_vec()));
    }

    #[test]
    fn rows_come_back_newest_first() {
        let sink = MemorySink::new();
        sink.ensure_table("cf1").unwrap();
        sink.write_batch(
            "cf1",
            vec![cell("r", "b", 1, b""), cell("r", "a", 2, b""), cell("r", "a", 1, b"")],
        )
        .unwrap();
        let order: Vec<(i64, String)> = sink
            .rows("cf1")
            .into_iter()
            .map(|c| (c.timestamp_micros, c.qualifier))
            .collect();
        assert_eq!(order, vec![(2, "a".into()), (1, "a".into()), (1, "b".into())]);
    }

    #[test]
    fn write_without_table_fails() {
        let sink = MemorySink::new();
        let err = sink.write_batch("cf1", vec![cell("r", "q", 1, b"")]).unwrap_err();
        assert!(matches!(err, SinkError::MissingTable { .. }));
        assert_eq!(sink.batch_sizes("cf1"), vec![1]);
    }

    #[test]
    fn second_family_with_the_same_table_name_is_refused() {
        let sink = MemorySink::new();
        sink.ensure_table("cf-1").unwrap();
        assert_eq!(sink.ensure_table("cf-1").unwrap(), "table_cf_1");
        assert!(matches!(sink.ensure_table("cf.1"), Err(SinkError::Rejected { .. })));
        let err = sink.write_batch("cf.1", vec![cell("r", "q", 1, b"x")]).unwrap_err();
        assert!(matches!(err, SinkError::MissingTable { .. }));
        assert_eq!(sink.get("cf-1", "r", 1, "q"), None);
    }

    #[test]
    fn injected_failures() {
        let sink = MemorySink::new()
            .fail_table_creation("bad")
            .fail_qualifier("x");
        assert!(sink.ensure_table("bad").is_err());
        assert_eq!(sink.ensure_calls("bad"), 1);
        sink.ensure_table("cf1").unwrap();
        let report = sink
            .write_batch("cf1", vec![cell("r", "x", 1, b""), cell("r", "y", 1, b"")])
            .unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(sink.tables(), vec!["table_cf1".to_string()]);
    }
}
