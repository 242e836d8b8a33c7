//! One-shot schema discovery and table setup.

use crate::error::{EtlError, EtlResult};
use crate::sink::Sink;
use crate::types::{RawRecord, Schema};

/// Which column of a record holds the row key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyColumn {
    /// The first column of the first record.
    #[default]
    First,
    /// A column with this exact name.
    Named(String),
}

/// Whether `record` carries at least one column a schema could be derived from.
///
/// A row with no cells (e.g. a JSON line with `"cells": []`) exposes no family columns and is
/// not used for discovery. An explicit family list always suffices.
pub fn exposes_shape(record: &RawRecord, key: &KeyColumn, explicit: Option<&[String]>) -> bool {
    if matches!(explicit, Some(list) if !list.is_empty()) {
        return true;
    }
    match key {
        KeyColumn::First => record.columns.len() > 1,
        KeyColumn::Named(name) => record.column_names().any(|c| c != name.as_str()),
    }
}

/// Derive the run's [`Schema`] from the first record that exposes a shape.
///
/// Families are the record's columns minus the key column, in column order, unless `explicit`
/// lists them. A record that carries no family at all cannot define a schema.
pub fn discover(record: &RawRecord, key: &KeyColumn, explicit: Option<&[String]>) -> EtlResult<Schema> {
    let key_column = match key {
        KeyColumn::First => record
            .column_names()
            .next()
            .map(str::to_string)
            .ok_or_else(|| EtlError::Schema {
                message: "first record has no columns".to_string(),
            })?,
        KeyColumn::Named(name) => {
            if record.column(name).is_none() {
                tracing::warn!(key_column = %name, "key column not present in first record");
            }
            name.clone()
        }
    };

    let families: Vec<String> = match explicit {
        Some(list) => list.to_vec(),
        None => record
            .column_names()
            .filter(|c| *c != key_column)
            .map(str::to_string)
            .collect(),
    };

    let schema = Schema::new(key_column, families);
    if schema.is_empty() {
        return Err(EtlError::Schema {
            message: format!(
                "no column families besides key column '{}'",
                schema.key_column()
            ),
        });
    }
    tracing::info!(
        key_column = schema.key_column(),
        families = ?schema.families(),
        "schema discovered"
    );
    Ok(schema)
}

/// Result of creating one table per family.
#[derive(Debug, Default)]
pub struct TableSetup {
    /// `(family, table)` for every table that is ready.
    pub ready: Vec<(String, String)>,
    /// One [`EtlError::TableCreation`] per family whose table could not be created.
    pub errors: Vec<EtlError>,
}

/// Ask the sink for one table per schema family. Failures isolate to their family.
pub fn ensure_tables(schema: &Schema, sink: &dyn Sink) -> TableSetup {
    let mut setup = TableSetup::default();
    for family in schema.families() {
        match sink.ensure_table(family) {
            Ok(table) => setup.ready.push((family.clone(), table)),
            Err(source) => {
                tracing::error!(family = %family, error = %source, "table creation failed");
                setup.errors.push(EtlError::TableCreation {
                    family: family.clone(),
                    source,
                });
            }
        }
    }
    setup
}
