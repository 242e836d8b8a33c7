//! Core data model types shared by sources, extraction and sinks.
//!
//! Sources decode each input unit into a [`RawRecord`], a list of named columns holding
//! format-neutral [`Node`] trees. Extraction flattens those trees into [`CellRow`]s according
//! to the run's fixed [`Schema`].

use std::collections::HashSet;

/// A format-neutral nested value produced by record sources.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Missing/null value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integral value (timestamps are carried as microseconds).
    Int(i64),
    /// Any floating point value.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Repeated values.
    List(Vec<Node>),
    /// Named fields, in source order.
    Group(Vec<(String, Node)>),
}

impl Node {
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Look up a field of a [`Node::Group`] by name.
    pub fn get(&self, name: &str) -> Option<&Node> {
        match self {
            Node::Group(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Short type label used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Int(_) => "int",
            Node::Float(_) => "float",
            Node::Text(_) => "text",
            Node::Bytes(_) => "bytes",
            Node::List(_) => "list",
            Node::Group(_) => "group",
        }
    }
}

impl From<serde_json::Value> for Node {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Node::Null,
            serde_json::Value::Bool(b) => Node::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Node::Int(i),
                None => Node::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Node::Text(s),
            serde_json::Value::Array(items) => Node::List(items.into_iter().map(Node::from).collect()),
            serde_json::Value::Object(map) => {
                Node::Group(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
        }
    }
}

/// One source row: its position in the input plus its named columns.
///
/// One of the columns is the row-key column; every other column is a family whose value is a
/// nested cell-group tree of the form `{column: [{name, cell: [{timestamp, value}]}]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Zero-based position of the record in its source.
    pub sequence: u64,
    /// Fraction of the input consumed once this record was produced, in `[0.0, 1.0]`.
    pub progress: f64,
    /// Columns in source order.
    pub columns: Vec<(String, Node)>,
}

impl RawRecord {
    /// Iterate column names in source order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Returns a column value by name, if present.
    pub fn column(&self, name: &str) -> Option<&Node> {
        self.columns.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// The flattened unit of work written to a per-family table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRow {
    pub row_key: String,
    pub family: String,
    pub qualifier: String,
    /// Cell timestamp in microseconds since the Unix epoch.
    pub timestamp_micros: i64,
    pub raw_value: Vec<u8>,
}

/// The fixed set of column families for a run.
///
/// Built once during schema discovery and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    key_column: String,
    families: Vec<String>,
    known: HashSet<String>,
}

impl Schema {
    /// Create a schema from the key column name and the ordered family names.
    ///
    /// Duplicate family names keep their first position.
    pub fn new(key_column: impl Into<String>, families: impl IntoIterator<Item = String>) -> Self {
        let mut ordered = Vec::new();
        let mut known = HashSet::new();
        for family in families {
            if known.insert(family.clone()) {
                ordered.push(family);
            }
        }
        Self {
            key_column: key_column.into(),
            families: ordered,
            known,
        }
    }

    /// Name of the designated row-key column.
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Family names in discovery order.
    pub fn families(&self) -> &[String] {
        &self.families
    }

    pub fn contains(&self, family: &str) -> bool {
        self.known.contains(family)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Node, Schema};

    #[test]
    fn schema_keeps_first_position_of_duplicates() {
        let schema = Schema::new(
            "rowkey",
            ["cf1", "cf2", "cf1"].into_iter().map(String::from),
        );
        assert_eq!(schema.families(), ["cf1".to_string(), "cf2".to_string()]);
        assert!(schema.contains("cf2"));
        assert_eq!(schema.len(), 2);
        assert!(!schema.contains("rowkey"));
    }

    #[test]
    fn json_objects_become_groups_in_key_order() {
        let v: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":[true,null],"c":"x"}"#).unwrap();
        let node = Node::from(v);
        assert_eq!(node.get("a"), Some(&Node::Int(1)));
        assert_eq!(node.get("b"), Some(&Node::List(vec![Node::Bool(true), Node::Null])));
        assert_eq!(node.get("c").map(Node::kind), Some("text"));
    }
}
