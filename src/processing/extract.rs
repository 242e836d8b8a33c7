//! Flatten one record's nested family groups into [`CellRow`]s.
//!
//! Expected family shape (both formats):
//!
//! ```text
//! {column: [{name: <qualifier>, cell: [{timestamp: <micros>, value: <bytes> | value_b64: <text>}]}]}
//! ```
//!
//! A missing `column` or `cell` list means "no cells". Wrong types anywhere inside a family
//! make that family malformed: its partial cells are dropped and one error is reported for it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::EtlError;
use crate::types::{CellRow, Node, RawRecord, Schema};

/// Output of [`extract`] for one record.
#[derive(Debug, Default)]
pub struct Extraction {
    pub row_key: String,
    /// Cells in source order.
    pub rows: Vec<CellRow>,
    /// Distinct non-null, in-schema families present in the record.
    pub families_touched: usize,
    /// Recoverable errors scoped to single families.
    pub errors: Vec<EtlError>,
}

/// Extract every cell of `record` according to `schema`.
pub fn extract(record: &RawRecord, schema: &Schema) -> Extraction {
    let row_key = row_key_of(record, schema);
    let mut out = Extraction {
        row_key: row_key.clone(),
        ..Extraction::default()
    };

    for (family, node) in &record.columns {
        if family == schema.key_column() || node.is_null() {
            continue;
        }
        if !schema.contains(family) {
            out.errors.push(EtlError::UnknownFamily {
                row_key: row_key.clone(),
                family: family.clone(),
            });
            continue;
        }
        out.families_touched += 1;
        match flatten_family(&row_key, family, node) {
            Ok(mut cells) => out.rows.append(&mut cells),
            Err(message) => out.errors.push(EtlError::Extraction {
                row_key: row_key.clone(),
                family: family.clone(),
                message,
            }),
        }
    }
    out
}

fn row_key_of(record: &RawRecord, schema: &Schema) -> String {
    match record.column(schema.key_column()) {
        Some(Node::Text(s)) => s.clone(),
        Some(Node::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
        Some(Node::Int(i)) => i.to_string(),
        Some(Node::Float(f)) => f.to_string(),
        Some(Node::Bool(b)) => b.to_string(),
        _ => format!("unknown_{}", record.sequence),
    }
}

fn flatten_family(row_key: &str, family: &str, node: &Node) -> Result<Vec<CellRow>, String> {
    let entries = list_field(node, "column")?;
    let mut rows = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let qualifier = match entry.get("name") {
            Some(Node::Text(s)) => s.clone(),
            Some(Node::Bytes(b)) => String::from_utf8(b.clone())
                .map_err(|_| format!("qualifier entry {i}: name is not valid utf-8"))?,
            Some(other) => return Err(format!("qualifier entry {i}: name is {}", other.kind())),
            None => return Err(format!("qualifier entry {i}: missing name")),
        };
        let cells = list_field(entry, "cell").map_err(|e| format!("qualifier '{qualifier}': {e}"))?;
        for (j, cell) in cells.iter().enumerate() {
            let at = || format!("qualifier '{qualifier}' cell {j}");
            let timestamp_micros = match cell.get("timestamp") {
                Some(Node::Int(ts)) => *ts,
                Some(other) => return Err(format!("{}: timestamp is {}", at(), other.kind())),
                None => return Err(format!("{}: missing timestamp", at())),
            };
            let raw_value = cell_value(cell).map_err(|e| format!("{}: {e}", at()))?;
            rows.push(CellRow {
                row_key: row_key.to_string(),
                family: family.to_string(),
                qualifier: qualifier.clone(),
                timestamp_micros,
                raw_value,
            });
        }
    }
    Ok(rows)
}

/// A repeated child of a group; absent or null means empty.
fn list_field<'a>(node: &'a Node, name: &str) -> Result<&'a [Node], String> {
    let Node::Group(_) = node else {
        return Err(format!("expected a group, found {}", node.kind()));
    };
    match node.get(name) {
        None | Some(Node::Null) => Ok(&[]),
        Some(Node::List(items)) => Ok(items),
        Some(other) => Err(format!("'{name}' must be a list, found {}", other.kind())),
    }
}

fn cell_value(cell: &Node) -> Result<Vec<u8>, String> {
    if let Some(encoded) = cell.get("value_b64") {
        return match encoded {
            Node::Null => Ok(Vec::new()),
            Node::Text(s) => STANDARD
                .decode(s.as_bytes())
                .map_err(|e| format!("invalid base64 value: {e}")),
            other => Err(format!("value_b64 is {}", other.kind())),
        };
    }
    match cell.get("value") {
        None | Some(Node::Null) => Ok(Vec::new()),
        Some(Node::Bytes(b)) => Ok(b.clone()),
        Some(Node::Text(s)) => Ok(s.as_bytes().to_vec()),
        Some(other) => Err(format!("value is {}", other.kind())),
    }
}

#[cfg(test)]
mod tests {
    use super::extract;
    use crate::error::EtlError;
    use crate::types::{Node, RawRecord, Schema};

    fn group(fields: Vec<(&str, Node)>) -> Node {
        Node::Group(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    fn family(qualifiers: Vec<(&str, Vec<(i64, &str)>)>) -> Node {
        group(vec![(
            "column",
            Node::List(
                qualifiers
                    .into_iter()
                    .map(|(name, cells)| {
                        group(vec![
                            ("name", Node::Text(name.to_string())),
                            (
                                "cell",
                                Node::List(
                                    cells
                                        .into_iter()
                                        .map(|(ts, v)| {
                                            group(vec![
                                                ("timestamp", Node::Int(ts)),
                                                ("value", Node::Bytes(v.as_bytes().to_vec())),
                                            ])
                                        })
                                        .collect(),
                                ),
                            ),
                        ])
                    })
                    .collect(),
            ),
        )])
    }

    fn schema() -> Schema {
        Schema::new("rowkey", ["cf1", "cf2"].into_iter().map(String::from))
    }

    fn record(columns: Vec<(&str, Node)>) -> RawRecord {
        RawRecord {
            sequence: 7,
            progress: 0.5,
            columns: columns.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn flattens_every_cell_in_order() {
        let rec = record(vec![
            ("rowkey", Node::Text("r1".into())),
            ("cf1", family(vec![("a", vec![(2, "x"), (1, "y")]), ("b", vec![(3, "z")])])),
            ("cf2", Node::Null),
        ]);
        let out = extract(&rec, &schema());
        assert!(out.errors.is_empty());
        assert_eq!(out.families_touched, 1);
        let got: Vec<(&str, i64, &[u8])> = out
            .rows
            .iter()
            .map(|r| (r.qualifier.as_str(), r.timestamp_micros, r.raw_value.as_slice()))
            .collect();
        assert_eq!(got, vec![("a", 2, &b"x"[..]), ("a", 1, &b"y"[..]), ("b", 3, &b"z"[..])]);
        assert!(out.rows.iter().all(|r| r.row_key == "r1" && r.family == "cf1"));
    }

    #[test]
    fn missing_row_key_gets_a_placeholder() {
        let rec = record(vec![("rowkey", Node::Null), ("cf1", family(vec![("a", vec![(1, "")])]))]);
        let out = extract(&rec, &schema());
        assert_eq!(out.row_key, "unknown_7");
        assert_eq!(out.rows[0].row_key, "unknown_7");
    }

    #[test]
    fn malformed_family_is_isolated() {
        let rec = record(vec![
            ("rowkey", Node::Text("r1".into())),
            ("cf1", group(vec![("column", Node::Int(5))])),
            ("cf2", family(vec![("q", vec![(1, "v")])])),
        ]);
        let out = extract(&rec, &schema());
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].family, "cf2");
        assert_eq!(out.families_touched, 2);
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(&out.errors[0], EtlError::Extraction { family, .. } if family == "cf1"));
    }

    #[test]
    fn partial_cells_of_a_malformed_family_are_dropped() {
        let bad_cell = group(vec![("timestamp", Node::Text("yesterday".into()))]);
        let good_cell = group(vec![("timestamp", Node::Int(1))]);
        let cf1 = group(vec![(
            "column",
            Node::List(vec![group(vec![
                ("name", Node::Text("q".into())),
                ("cell", Node::List(vec![good_cell, bad_cell])),
            ])]),
        )]);
        let rec = record(vec![("rowkey", Node::Text("r1".into())), ("cf1", cf1)]);
        let out = extract(&rec, &schema());
        assert!(out.rows.is_empty());
        assert!(out.errors[0].to_string().contains("timestamp is text"));
    }

    #[test]
    fn unknown_family_is_reported_not_added() {
        let rec = record(vec![
            ("rowkey", Node::Text("r1".into())),
            ("cf9", family(vec![("q", vec![(1, "v")])])),
        ]);
        let out = extract(&rec, &schema());
        assert!(out.rows.is_empty());
        assert_eq!(out.families_touched, 0);
        assert!(matches!(&out.errors[0], EtlError::UnknownFamily { family, .. } if family == "cf9"));
    }

    #[test]
    fn decodes_base64_values() {
        let cell = group(vec![
            ("timestamp", Node::Int(1000)),
            ("value_b64", Node::Text("aGk=".into())),
        ]);
        let f1 = group(vec![(
            "column",
            Node::List(vec![group(vec![
                ("name", Node::Text("q1".into())),
                ("cell", Node::List(vec![cell])),
            ])]),
        )]);
        let schema = Schema::new("row_key", ["f1".to_string()]);
        let rec = record(vec![("row_key", Node::Text("r1".into())), ("f1", f1)]);
        let out = extract(&rec, &schema);
        assert_eq!(out.rows[0].raw_value, b"hi".to_vec());

        let bad = group(vec![(
            "column",
            Node::List(vec![group(vec![
                ("name", Node::Text("q1".into())),
                (
                    "cell",
                    Node::List(vec![group(vec![
                        ("timestamp", Node::Int(1)),
                        ("value_b64", Node::Text("!!".into())),
                    ])]),
                ),
            ])]),
        )]);
        let rec = record(vec![("row_key", Node::Text("r1".into())), ("f1", bad)]);
        let out = extract(&rec, &schema);
        assert!(out.rows.is_empty());
        assert!(out.errors[0].to_string().contains("invalid base64"));
    }
}
