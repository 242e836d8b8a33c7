//! Record processing between sources and sinks.
//!
//! - [`schema`]: one-shot schema discovery and per-family table setup
//! - [`extract`]: flatten one record into [`crate::types::CellRow`]s
//! - [`batch`]: per-family buffers with size-triggered flush
//! - [`value`]: display decoding of raw cell values
//!
//! ## Example: extract and batch one record
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cellstream::processing::{extract, BatchOptions, FamilyBatcher};
//! use cellstream::sink::{MemorySink, Sink};
//! use cellstream::types::{Node, RawRecord, Schema};
//!
//! let schema = Schema::new("rowkey", vec!["cf1".to_string()]);
//! let cell = Node::Group(vec![
//!     ("timestamp".to_string(), Node::Int(1_000)),
//!     ("value".to_string(), Node::Bytes(b"v".to_vec())),
//! ]);
//! let qualifier = Node::Group(vec![
//!     ("name".to_string(), Node::Text("q".to_string())),
//!     ("cell".to_string(), Node::List(vec![cell])),
//! ]);
//! let record = RawRecord {
//!     sequence: 0,
//!     progress: 1.0,
//!     columns: vec![
//!         ("rowkey".to_string(), Node::Text("r1".to_string())),
//!         ("cf1".to_string(), Node::Group(vec![("column".to_string(), Node::List(vec![qualifier]))])),
//!     ],
//! };
//!
//! let extraction = extract(&record, &schema);
//! assert_eq!(extraction.rows.len(), 1);
//!
//! let sink = Arc::new(MemorySink::new());
//! sink.ensure_table("cf1").unwrap();
//! let mut batcher = FamilyBatcher::new(sink.clone(), &BatchOptions { batch_size: 10 }).unwrap();
//! for row in extraction.rows {
//!     assert!(batcher.accept(row).is_none());
//! }
//! assert_eq!(batcher.flush_all().len(), 1);
//! assert_eq!(sink.row_count("cf1"), 1);
//! ```

pub mod batch;
pub mod extract;
pub mod schema;
pub mod value;

pub use batch::{BatchOptions, FamilyBatcher, FlushOutcome};
pub use extract::{extract, Extraction};
pub use schema::{discover, ensure_tables, exposes_shape, KeyColumn, TableSetup};
pub use value::decode_value;
