//! `cellstream` streams column-family dumps (Bigtable-style rows: row key, families, qualifiers,
//! timestamped cells) into flat per-family tables of a wide-column store, with bounded memory
//! and cumulative ingestion statistics.
//!
//! The primary entrypoint is [`pipeline::Pipeline`], which pulls records from a
//! [`ingestion::RecordSource`], flattens them with [`processing::extract`], buffers the cells per
//! family in a [`processing::FamilyBatcher`] and flushes full batches to a [`sink::Sink`].
//!
//! ## What you can ingest
//!
//! **File formats (auto-detected by extension):**
//!
//! - **JSON lines**: `.json`, `.jsonl`, `.ndjson`; one
//!   `{"row_key", "cells": [{"family", "qual", "ts_micros", "value_b64"}]}` object per line
//! - **Parquet**: `.parquet`, `.pq`; one row-key column plus one nested column per family
//!   (`{column: [{name, cell: [{timestamp, value}]}]}`), decoded one row group at a time
//!
//! Malformed lines, row groups and families are counted and skipped; they never abort the run.
//!
//! ## Where cells go
//!
//! Each family gets its own table `(row_key, qualifier, timestamp, raw_value)` keyed by
//! `(row_key, timestamp DESC, qualifier)`. Sinks:
//!
//! - [`sink::CqlSink`] over any [`sink::CqlSession`] (the driver boundary), e.g.
//!   [`sink::ScriptSession`] which writes a replayable CQL script
//! - [`sink::MemorySink`] for dry runs and tests
//!
//! ## Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cellstream::pipeline::{Pipeline, PipelineOptions};
//! use cellstream::sink::MemorySink;
//!
//! # fn main() -> Result<(), cellstream::EtlError> {
//! let sink = Arc::new(MemorySink::new());
//! let mut opts = PipelineOptions::new("dump.jsonl");
//! opts.batch.batch_size = 500;
//!
//! let summary = Pipeline::new(opts, sink.clone()).run()?;
//! println!("{}", summary.statistics.render_report(20));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: record sources and run observers
//! - [`processing`]: schema discovery, extraction, batching
//! - [`sink`]: the sink trait, CQL rendering and sessions, in-memory sink
//! - [`execution`]: bounded fan-out used by sink writes
//! - [`memory`]: resident-memory ceiling checks
//! - [`stats`]: run statistics and the text report
//! - [`export`]: CSV sample export
//! - [`pipeline`]: the driver state machine
//! - [`types`]: records, cells, schema
//! - [`error`]: error types

pub mod error;
pub mod execution;
pub mod export;
pub mod ingestion;
pub mod memory;
pub mod pipeline;
pub mod processing;
pub mod sink;
pub mod stats;
pub mod types;

pub use error::{EtlError, EtlResult};
