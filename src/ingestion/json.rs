//! Line-delimited JSON record source.
//!
//! Each non-empty line is one row:
//!
//! ```text
//! {"row_key":"r1","cells":[{"family":"f1","qual":"q1","ts_micros":1000,"value_b64":"aGk="}]}
//! ```
//!
//! Cells are regrouped per family (in first-appearance order) into the same nested shape the
//! Parquet source produces, so extraction does not care which format a record came from.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{EtlError, EtlResult};
use crate::types::{Node, RawRecord};

use super::RecordSource;

/// Name of the row-key column synthesized for JSON records.
pub const JSON_KEY_COLUMN: &str = "row_key";

const UNKNOWN: &str = "unknown";

/// Streams [`RawRecord`]s from a JSON lines file, one line at a time.
pub struct JsonLinesSource {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    total_bytes: u64,
    bytes_read: u64,
    line_num: u64,
    sequence: u64,
    failed: bool,
}

impl JsonLinesSource {
    /// Open a JSON lines file. Fails with [`EtlError::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let total_bytes = file.metadata()?.len();
        Ok(Self {
            path,
            reader: BufReader::new(file),
            buf: Vec::new(),
            total_bytes,
            bytes_read: 0,
            line_num: 0,
            sequence: 0,
            failed: false,
        })
    }

    /// 1-based number of the last line read.
    pub fn line_number(&self) -> u64 {
        self.line_num
    }

    fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            (self.bytes_read as f64 / self.total_bytes as f64).min(1.0)
        }
    }
}

impl Iterator for JsonLinesSource {
    type Item = EtlResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            self.buf.clear();
            let n = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(EtlError::Io(e)));
                }
            };
            self.bytes_read += n as u64;
            self.line_num += 1;

            let line = match std::str::from_utf8(&self.buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    return Some(Err(EtlError::Parse {
                        unit: "line",
                        index: self.line_num,
                        message: format!("line is not valid utf-8: {e}"),
                    }));
                }
            };
            if line.is_empty() {
                continue;
            }

            let parsed = parse_line(line, self.line_num).map(|columns| RawRecord {
                sequence: self.sequence,
                progress: self.progress(),
                columns,
            });
            if parsed.is_ok() {
                self.sequence += 1;
            }
            return Some(parsed);
        }
    }
}

impl RecordSource for JsonLinesSource {
    fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse one JSON line into record columns.
pub(crate) fn parse_line(line: &str, line_num: u64) -> EtlResult<Vec<(String, Node)>> {
    let parse_err = |message: String| EtlError::Parse {
        unit: "line",
        index: line_num,
        message,
    };

    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| parse_err(e.to_string()))?;
    let serde_json::Value::Object(mut obj) = value else {
        return Err(parse_err("expected a json object".to_string()));
    };

    let row_key = match obj.remove(JSON_KEY_COLUMN) {
        None | Some(serde_json::Value::Null) => Node::Null,
        Some(serde_json::Value::String(s)) => Node::Text(s),
        Some(other) => Node::Text(other.to_string()),
    };

    let cells = match obj.remove("cells") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items,
        Some(other) => {
            return Err(parse_err(format!(
                "'cells' must be an array, found {}",
                json_kind(&other)
            )));
        }
    };

    let mut columns: Vec<(String, Node)> = vec![(JSON_KEY_COLUMN.to_string(), row_key)];
    let mut families: Vec<(String, Vec<(Node, Vec<Node>)>)> = Vec::new();

    for cell in cells {
        let serde_json::Value::Object(mut cell) = cell else {
            return Err(parse_err("every cell must be a json object".to_string()));
        };
        let family = match cell.remove("family") {
            Some(serde_json::Value::String(s)) => s,
            _ => UNKNOWN.to_string(),
        };
        let qualifier = cell
            .remove("qual")
            .map(Node::from)
            .unwrap_or_else(|| Node::Text(UNKNOWN.to_string()));
        let timestamp = cell.remove("ts_micros").map(Node::from).unwrap_or(Node::Int(0));
        let value = cell
            .remove("value_b64")
            .map(Node::from)
            .unwrap_or_else(|| Node::Text(String::new()));
        let pair = Node::Group(vec![
            ("timestamp".to_string(), timestamp),
            ("value_b64".to_string(), value),
        ]);

        let idx = match families.iter().position(|(name, _)| *name == family) {
            Some(idx) => idx,
            None => {
                families.push((family, Vec::new()));
                families.len() - 1
            }
        };
        let qualifiers = &mut families[idx].1;
        match qualifiers.iter_mut().find(|(q, _)| *q == qualifier) {
            Some((_, pairs)) => pairs.push(pair),
            None => qualifiers.push((qualifier, vec![pair])),
        }
    }

    for (family, qualifiers) in families {
        let entries = qualifiers
            .into_iter()
            .map(|(name, pairs)| {
                Node::Group(vec![
                    ("name".to_string(), name),
                    ("cell".to_string(), Node::List(pairs)),
                ])
            })
            .collect();
        columns.push((family, Node::Group(vec![("column".to_string(), Node::List(entries))])));
    }

    Ok(columns)
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_line, JSON_KEY_COLUMN};
    use crate::types::Node;

    #[test]
    fn cells_are_grouped_by_family_then_qualifier() {
        let line = r#"{"row_key":"r1","cells":[
            {"family":"f1","qual":"a","ts_micros":1,"value_b64":"AA=="},
            {"family":"f2","qual":"b","ts_micros":2,"value_b64":"AQ=="},
            {"family":"f1","qual":"a","ts_micros":3,"value_b64":"Ag=="}
        ]}"#
        .replace('\n', "");
        let columns = parse_line(&line, 1).unwrap();
        let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec![JSON_KEY_COLUMN, "f1", "f2"]);

        let Some(Node::List(entries)) = columns[1].1.get("column") else {
            panic!("expected a column list");
        };
        assert_eq!(entries.len(), 1);
        let Some(Node::List(cells)) = entries[0].get("cell") else {
            panic!("expected a cell list");
        };
        assert_eq!(cells.len(), 2);
    }

    #[test]
    fn missing_row_key_is_null_and_missing_fields_default() {
        let columns = parse_line(r#"{"cells":[{"ts_micros":5}]}"#, 7).unwrap();
        assert_eq!(columns[0].1, Node::Null);
        assert_eq!(columns[1].0, "unknown");
    }

    #[test]
    fn rejects_non_object_lines_with_line_number() {
        let err = parse_line("[1,2]", 12).unwrap_err();
        assert!(err.to_string().contains("line 12"));
        let err = parse_line("{not json", 3).unwrap_err();
        assert!(err.is_recoverable());
    }
}
