//! A [`CqlSession`] that writes an executable CQL script instead of talking to a cluster.
//!
//! Prepared statements are rendered with their bound values inlined as literals, so the output
//! can be replayed with `cqlsh -f`. Consistency changes are emitted as `CONSISTENCY` commands.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::cql::{Consistency, CqlSession, CqlValue, SessionError};

/// Connection details recorded in the script header.
#[derive(Debug, Clone, Default)]
pub struct ScriptTarget {
    pub contact_points: Vec<String>,
    pub local_dc: Option<String>,
    pub username: Option<String>,
}

struct ScriptState {
    out: BufWriter<File>,
    consistency: Option<Consistency>,
    statements: u64,
}

/// Script-writing session.
pub struct ScriptSession {
    path: PathBuf,
    state: Mutex<ScriptState>,
}

impl ScriptSession {
    /// Create (truncate) the script file and write its header.
    pub fn create(path: impl AsRef<Path>, target: &ScriptTarget) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| io_error(&path, e))?;
        let mut out = BufWriter::new(file);
        let header = (|| -> std::io::Result<()> {
            writeln!(out, "-- generated by cellstream")?;
            if !target.contact_points.is_empty() {
                writeln!(out, "-- contact points: {}", target.contact_points.join(", "))?;
            }
            if let Some(dc) = &target.local_dc {
                writeln!(out, "-- local datacenter: {dc}")?;
            }
            if let Some(user) = &target.username {
                writeln!(out, "-- user: {user}")?;
            }
            Ok(())
        })();
        header.map_err(|e| io_error(&path, e))?;
        Ok(Self {
            path,
            state: Mutex::new(ScriptState {
                out,
                consistency: None,
                statements: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Statements written so far.
    pub fn statements(&self) -> u64 {
        self.state.lock().map(|s| s.statements).unwrap_or(0)
    }

    fn write_statement(&self, cql: &str, consistency: Option<Consistency>) -> Result<(), SessionError> {
        let mut s = self
            .state
            .lock()
            .map_err(|_| SessionError::new("script writer poisoned"))?;
        if let Some(level) = consistency {
            if s.consistency != Some(level) {
                writeln!(s.out, "CONSISTENCY {level};").map_err(|e| io_error(&self.path, e))?;
                s.consistency = Some(level);
            }
        }
        writeln!(s.out, "{cql};").map_err(|e| io_error(&self.path, e))?;
        s.statements += 1;
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> SessionError {
    SessionError::new(format!("{}: {e}", path.display()))
}

/// Substitute `?` placeholders with literal values, left to right.
pub fn bind_literals(cql: &str, values: &[CqlValue]) -> Result<String, SessionError> {
    let mut out = String::with_capacity(cql.len() + values.len() * 16);
    let mut values = values.iter();
    for c in cql.chars() {
        if c == '?' {
            let v = values
                .next()
                .ok_or_else(|| SessionError::new("not enough bound values"))?;
            out.push_str(&v.to_literal());
        } else {
            out.push(c);
        }
    }
    if values.next().is_some() {
        return Err(SessionError::new("too many bound values"));
    }
    Ok(out)
}

impl CqlSession for ScriptSession {
    type Prepared = Arc<str>;

    fn execute(&self, cql: &str) -> Result<(), SessionError> {
        self.write_statement(cql, None)
    }

    fn prepare(&self, cql: &str) -> Result<Arc<str>, SessionError> {
        Ok(Arc::from(cql))
    }

    fn execute_prepared(
        &self,
        prepared: &Arc<str>,
        values: &[CqlValue],
        consistency: Consistency,
    ) -> Result<(), SessionError> {
        let cql = bind_literals(prepared, values)?;
        self.write_statement(&cql, Some(consistency))
    }

    fn shutdown(&self) -> Result<(), SessionError> {
        let mut s = self
            .state
            .lock()
            .map_err(|_| SessionError::new("script writer poisoned"))?;
        s.out.flush().map_err(|e| io_error(&self.path, e))?;
        tracing::info!(path = %self.path.display(), statements = s.statements, "cql script written");
        Ok(())
    }
}
