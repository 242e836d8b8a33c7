//! CQL sink: per-family tables in a wide-column store reached through a [`CqlSession`].
//!
//! The session is the driver boundary (connection pool, prepared statements, consistency-level
//! execution). This module owns everything above it: keyspace and table DDL, the INSERT
//! statement, the per-table statement cache and the bounded fan-out of one batch.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::execution::{FanOut, FanOutMetrics, FanOutObserver, FanOutOptions};
use crate::types::CellRow;

use super::{table_name, RowFailure, Sink, SinkError, SinkResult, WriteReport};

/// Error reported by a [`CqlSession`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SessionError {
    pub message: String,
}

impl SessionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A bound value of the INSERT statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CqlValue {
    Text(String),
    /// Milliseconds since the Unix epoch (CQL `timestamp`).
    Timestamp(i64),
    Blob(Vec<u8>),
}

impl CqlValue {
    /// Render the value as a CQL literal.
    pub fn to_literal(&self) -> String {
        match self {
            CqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            CqlValue::Timestamp(ms) => ms.to_string(),
            CqlValue::Blob(bytes) => {
                let mut out = String::with_capacity(2 + bytes.len() * 2);
                out.push_str("0x");
                for b in bytes {
                    out.push_str(&format!("{b:02x}"));
                }
                out
            }
        }
    }
}

/// Consistency level for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    Any,
    One,
    #[default]
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
        };
        f.write_str(s)
    }
}

impl FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ANY" => Ok(Consistency::Any),
            "ONE" => Ok(Consistency::One),
            "TWO" => Ok(Consistency::Two),
            "THREE" => Ok(Consistency::Three),
            "QUORUM" => Ok(Consistency::Quorum),
            "ALL" => Ok(Consistency::All),
            "LOCAL_QUORUM" => Ok(Consistency::LocalQuorum),
            "EACH_QUORUM" => Ok(Consistency::EachQuorum),
            "LOCAL_ONE" => Ok(Consistency::LocalOne),
            other => Err(format!("unknown consistency level '{other}'")),
        }
    }
}

/// Table compression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Zstd with trained dictionaries (level 9).
    #[default]
    ZstdDict,
    Zstd,
    Lz4,
    None,
}

impl Compression {
    /// Short mode name, also used to derive default keyspace names.
    pub fn short_name(&self) -> &'static str {
        match self {
            Compression::ZstdDict => "zdic",
            Compression::Zstd => "zstd",
            Compression::Lz4 => "lz4c",
            Compression::None => "none",
        }
    }

    /// Body of the `compression = { ... }` table option.
    pub fn options(&self) -> &'static str {
        match self {
            Compression::ZstdDict => {
                "'sstable_compression': 'ZstdWithDictsCompressor', 'compression_level': 9"
            }
            Compression::Zstd => "'sstable_compression': 'ZstdCompressor'",
            Compression::Lz4 => "'sstable_compression': 'org.apache.cassandra.io.compress.LZ4Compressor'",
            Compression::None => "",
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zdic" | "zstd-dict" | "0" => Ok(Compression::ZstdDict),
            "zstd" | "1" => Ok(Compression::Zstd),
            "lz4" | "lz4c" | "2" => Ok(Compression::Lz4),
            "none" | "3" => Ok(Compression::None),
            other => Err(format!("unknown compression mode '{other}'")),
        }
    }
}

/// Configuration for [`CqlSink`].
#[derive(Debug, Clone)]
pub struct CqlOptions {
    pub keyspace: String,
    /// Tables are named `<table_prefix>_<sanitized family>`.
    pub table_prefix: String,
    pub replication_factor: u32,
    pub tablets: bool,
    pub compression: Compression,
    /// Drop the keyspace before creating it.
    pub drop_keyspace: bool,
    pub consistency: Consistency,
    /// Maximum in-flight writes per batch.
    pub concurrency: usize,
    /// Abandon a batch at its first failed row instead of collecting per-row failures.
    pub raise_on_first_error: bool,
}

impl Default for CqlOptions {
    fn default() -> Self {
        Self {
            keyspace: "cellstream".to_string(),
            table_prefix: "table".to_string(),
            replication_factor: 3,
            tablets: true,
            compression: Compression::default(),
            drop_keyspace: false,
            consistency: Consistency::default(),
            concurrency: 50,
            raise_on_first_error: true,
        }
    }
}

impl CqlOptions {
    pub fn validate(&self) -> SinkResult<()> {
        let bad = |message: &str| SinkError::Rejected {
            table: self.keyspace.clone(),
            message: message.to_string(),
        };
        if self.keyspace.is_empty() || !self.keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(bad("keyspace must be a non-empty identifier"));
        }
        if self.concurrency == 0 {
            return Err(bad("concurrency must be > 0"));
        }
        if self.replication_factor == 0 {
            return Err(bad("replication factor must be > 0"));
        }
        Ok(())
    }

    pub fn drop_keyspace_cql(&self) -> String {
        format!("DROP KEYSPACE IF EXISTS {}", self.keyspace)
    }

    pub fn create_keyspace_cql(&self) -> String {
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'org.apache.cassandra.locator.NetworkTopologyStrategy', 'replication_factor': {}}} AND tablets = {{'enabled': {}}}",
            self.keyspace, self.replication_factor, self.tablets
        )
    }

    pub fn create_table_cql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}.{table} (row_key text, qualifier text, timestamp timestamp, raw_value blob, PRIMARY KEY (row_key, timestamp, qualifier)) WITH CLUSTERING ORDER BY (timestamp DESC, qualifier ASC) AND compression = {{{}}}",
            self.keyspace,
            self.compression.options()
        )
    }

    pub fn insert_cql(&self, table: &str) -> String {
        format!(
            "INSERT INTO {}.{table} (row_key, qualifier, timestamp, raw_value) VALUES (?, ?, ?, ?)",
            self.keyspace
        )
    }
}

/// Driver boundary for a CQL store.
pub trait CqlSession: Send + Sync {
    /// Handle to a prepared statement.
    type Prepared: Send + Sync + Clone;

    /// Execute an unprepared statement (DDL).
    fn execute(&self, cql: &str) -> Result<(), SessionError>;

    fn prepare(&self, cql: &str) -> Result<Self::Prepared, SessionError>;

    /// Execute a prepared statement with bound values at the given consistency.
    fn execute_prepared(
        &self,
        prepared: &Self::Prepared,
        values: &[CqlValue],
        consistency: Consistency,
    ) -> Result<(), SessionError>;

    fn shutdown(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Bound values for one cell row, in INSERT column order.
pub fn insert_values(row: &CellRow) -> [CqlValue; 4] {
    [
        CqlValue::Text(row.row_key.clone()),
        CqlValue::Text(row.qualifier.clone()),
        CqlValue::Timestamp(row.timestamp_micros.div_euclid(1_000)),
        CqlValue::Blob(row.raw_value.clone()),
    ]
}

/// [`Sink`] writing to per-family CQL tables.
pub struct CqlSink<S: CqlSession> {
    session: S,
    opts: CqlOptions,
    fan_out: FanOut,
    tables: Mutex<HashMap<String, String>>,
    prepared: Mutex<HashMap<String, S::Prepared>>,
}

impl<S: CqlSession> CqlSink<S> {
    pub fn new(session: S, opts: CqlOptions) -> SinkResult<Self> {
        opts.validate()?;
        let fan_out = FanOut::new(FanOutOptions {
            concurrency: opts.concurrency,
            stop_on_first_error: opts.raise_on_first_error,
        })
        .map_err(SinkError::Pool)?;
        Ok(Self {
            session,
            opts,
            fan_out,
            tables: Mutex::new(HashMap::new()),
            prepared: Mutex::new(HashMap::new()),
        })
    }

    /// Attach an observer for per-row write events.
    pub fn with_observer(mut self, observer: Arc<dyn FanOutObserver>) -> Self {
        self.fan_out = self.fan_out.with_observer(observer);
        self
    }

    pub fn options(&self) -> &CqlOptions {
        &self.opts
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Cumulative write fan-out metrics.
    pub fn metrics(&self) -> Arc<FanOutMetrics> {
        self.fan_out.metrics()
    }

    fn known_table(&self, family: &str) -> Option<String> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(family).cloned())
    }

    /// Family already writing to `table`.
    fn table_owner(&self, table: &str) -> Option<String> {
        self.tables.lock().ok().and_then(|t| {
            t.iter()
                .find(|(_, owned)| owned.as_str() == table)
                .map(|(family, _)| family.clone())
        })
    }

    fn prepared_insert(&self, table: &str) -> SinkResult<S::Prepared> {
        let mut cache = self.prepared.lock().map_err(|_| SinkError::Rejected {
            table: table.to_string(),
            message: "statement cache poisoned".to_string(),
        })?;
        if let Some(p) = cache.get(table) {
            return Ok(p.clone());
        }
        let p = self.session.prepare(&self.opts.insert_cql(table))?;
        cache.insert(table.to_string(), p.clone());
        Ok(p)
    }
}

impl<S: CqlSession> Sink for CqlSink<S> {
    fn name(&self) -> &str {
        "cql"
    }

    fn open(&self) -> SinkResult<()> {
        if self.opts.drop_keyspace {
            tracing::warn!(keyspace = %self.opts.keyspace, "dropping keyspace");
            self.session.execute(&self.opts.drop_keyspace_cql())?;
        }
        self.session.execute(&self.opts.create_keyspace_cql())?;
        tracing::info!(
            keyspace = %self.opts.keyspace,
            replication_factor = self.opts.replication_factor,
            tablets = self.opts.tablets,
            compression = self.opts.compression.short_name(),
            "keyspace ready"
        );
        Ok(())
    }

    fn ensure_table(&self, family: &str) -> SinkResult<String> {
        if let Some(table) = self.known_table(family) {
            return Ok(table);
        }
        let table = table_name(&self.opts.table_prefix, family);
        if let Some(owner) = self.table_owner(&table) {
            return Err(SinkError::Rejected {
                message: format!("table already holds family '{owner}'"),
                table,
            });
        }
        self.session.execute(&self.opts.create_table_cql(&table))?;
        if let Ok(mut t) = self.tables.lock() {
            t.insert(family.to_string(), table.clone());
        }
        tracing::info!(family, table = %table, "table ready");
        Ok(table)
    }

    fn write_batch(&self, family: &str, rows: Vec<CellRow>) -> SinkResult<WriteReport> {
        let table = self.known_table(family).ok_or_else(|| SinkError::MissingTable {
            table: table_name(&self.opts.table_prefix, family),
        })?;
        if rows.is_empty() {
            return Ok(WriteReport::default());
        }
        let prepared = self.prepared_insert(&table)?;
        let consistency = self.opts.consistency;

        let mut out = self.fan_out.run(&rows, |row| {
            self.session
                .execute_prepared(&prepared, &insert_values(row), consistency)
        });

        if self.opts.raise_on_first_error && !out.failures.is_empty() {
            let attempted = out.succeeded + out.failures.len();
            let (_, first) = out.failures.swap_remove(0);
            return Err(SinkError::Aborted {
                table,
                attempted,
                total: rows.len(),
                source: first,
            });
        }

        let failures = out
            .failures
            .into_iter()
            .map(|(i, e)| {
                let row = &rows[i];
                RowFailure {
                    row_key: row.row_key.clone(),
                    qualifier: row.qualifier.clone(),
                    timestamp_micros: row.timestamp_micros,
                    message: e.message,
                }
            })
            .collect();
        Ok(WriteReport {
            written: out.succeeded,
            failures,
        })
    }

    fn close(&self) -> SinkResult<()> {
        self.session.shutdown()?;
        Ok(())
    }
}
