use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cellstream::error::EtlError;
use cellstream::execution::{FanOutEvent, FanOutObserver};
use cellstream::pipeline::{Pipeline, PipelineOptions};
use cellstream::sink::{
    Compression, Consistency, CqlOptions, CqlSession, CqlSink, CqlValue, ScriptSession,
    ScriptTarget, SessionError, Sink, SinkError,
};
use cellstream::types::CellRow;

fn script_options() -> CqlOptions {
    CqlOptions {
        keyspace: "bt_zstd".to_string(),
        compression: Compression::Zstd,
        replication_factor: 1,
        consistency: Consistency::One,
        concurrency: 4,
        ..CqlOptions::default()
    }
}

#[test]
fn pipeline_renders_a_replayable_script() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("dump.jsonl");
    let mut f = std::fs::File::create(&source).unwrap();
    writeln!(
        f,
        r#"{{"row_key":"it's","cells":[{{"family":"pb","qual":"q","ts_micros":1700000000123456,"value_b64":"AQI="}}]}}"#
    )
    .unwrap();
    writeln!(
        f,
        r#"{{"row_key":"r2","cells":[{{"family":"pb","qual":"q","ts_micros":2000,"value_b64":""}},{{"family":"tv-2","qual":"x","ts_micros":0,"value_b64":""}}]}}"#
    )
    .unwrap();
    drop(f);

    let script = dir.path().join("load.cql");
    let target = ScriptTarget {
        contact_points: vec!["127.0.0.1".into()],
        local_dc: None,
        username: Some("loader".into()),
    };
    let session = ScriptSession::create(&script, &target).unwrap();
    let sink = Arc::new(CqlSink::new(session, script_options()).unwrap());

    let mut opts = PipelineOptions::new(&source);
    opts.report_path = None;
    let summary = Pipeline::new(opts, sink.clone()).run().unwrap();
    assert_eq!(summary.statistics.rows_written, 2);
    assert_eq!(summary.statistics.tables_created, 1);
    assert_eq!(sink.session().statements(), 1 + 1 + 2);

    let text = std::fs::read_to_string(&script).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "-- generated by cellstream");
    assert_eq!(lines[1], "-- contact points: 127.0.0.1");
    assert_eq!(lines[2], "-- user: loader");
    assert!(lines[3].starts_with("CREATE KEYSPACE IF NOT EXISTS bt_zstd WITH replication"));
    assert!(lines[3].contains("'replication_factor': 1"));
    assert!(lines[3].ends_with("AND tablets = {'enabled': true};"));
    assert!(lines[4].starts_with("CREATE TABLE IF NOT EXISTS bt_zstd.table_pb (row_key text"));
    assert!(lines[4].ends_with("compression = {'sstable_compression': 'ZstdCompressor'};"));
    // the second family only shows up after discovery
    assert!(!text.contains("table_tv_2 ("));
    assert_eq!(lines[5], "CONSISTENCY ONE;");

    let mut inserts: Vec<&str> = lines[6..].to_vec();
    inserts.sort();
    assert_eq!(
        inserts,
        vec![
            "INSERT INTO bt_zstd.table_pb (row_key, qualifier, timestamp, raw_value) VALUES ('it''s', 'q', 1700000000123, 0x0102);",
            "INSERT INTO bt_zstd.table_pb (row_key, qualifier, timestamp, raw_value) VALUES ('r2', 'q', 2, 0x);",
        ]
    );
    assert_eq!(summary.statistics.error_count, 1);
    assert!(summary.statistics.errors[0].contains("family 'tv-2'"));
}

#[test]
fn drop_keyspace_precedes_creation() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("load.cql");
    let session = ScriptSession::create(&script, &ScriptTarget::default()).unwrap();
    let sink = CqlSink::new(
        session,
        CqlOptions {
            drop_keyspace: true,
            compression: Compression::None,
            ..script_options()
        },
    )
    .unwrap();
    sink.open().unwrap();
    assert_eq!(sink.ensure_table("a.b").unwrap(), "table_a_b");
    assert_eq!(sink.ensure_table("a.b").unwrap(), "table_a_b");
    sink.close().unwrap();

    let text = std::fs::read_to_string(&script).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[1], "DROP KEYSPACE IF EXISTS bt_zstd;");
    assert!(lines[2].starts_with("CREATE KEYSPACE"));
    assert!(lines[3].ends_with("compression = {};"));
    assert_eq!(lines.len(), 4);
}

/// Session that rejects every insert whose qualifier is "bad".
#[derive(Default)]
struct PickySession {
    inserts: Mutex<Vec<String>>,
}

impl CqlSession for PickySession {
    type Prepared = ();

    fn execute(&self, _cql: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn prepare(&self, _cql: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn execute_prepared(
        &self,
        _prepared: &(),
        values: &[CqlValue],
        _consistency: Consistency,
    ) -> Result<(), SessionError> {
        match &values[1] {
            CqlValue::Text(q) if q == "bad" => Err(SessionError::new("write timeout")),
            CqlValue::Text(q) => {
                self.inserts.lock().unwrap().push(q.clone());
                Ok(())
            }
            other => Err(SessionError::new(format!("unexpected {other:?}"))),
        }
    }
}

fn rows(qualifiers: &[&str]) -> Vec<CellRow> {
    qualifiers
        .iter()
        .enumerate()
        .map(|(i, q)| CellRow {
            row_key: format!("r{i}"),
            family: "pb".into(),
            qualifier: (*q).into(),
            timestamp_micros: i as i64 * 1_000,
            raw_value: vec![],
        })
        .collect()
}

#[derive(Default)]
struct CountingObserver {
    finished: AtomicUsize,
    failed: AtomicUsize,
}

impl FanOutObserver for CountingObserver {
    fn on_event(&self, event: &FanOutEvent) {
        match event {
            FanOutEvent::OpFinished { ok: false, .. } => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            FanOutEvent::RunFinished { .. } => {
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

#[test]
fn collects_failures_when_not_raising() {
    let observer = Arc::new(CountingObserver::default());
    let sink = CqlSink::new(
        PickySession::default(),
        CqlOptions {
            raise_on_first_error: false,
            ..script_options()
        },
    )
    .unwrap()
    .with_observer(observer.clone());
    sink.ensure_table("pb").unwrap();

    let report = sink.write_batch("pb", rows(&["a", "bad", "c", "bad"])).unwrap();
    assert_eq!(report.written, 2);
    let failed: Vec<&str> = report.failures.iter().map(|f| f.row_key.as_str()).collect();
    assert_eq!(failed, vec!["r1", "r3"]);
    assert_eq!(report.failures[0].message, "write timeout");
    assert_eq!(report.failures[1].timestamp_micros, 3_000);

    assert_eq!(observer.failed.load(Ordering::SeqCst), 2);
    assert_eq!(observer.finished.load(Ordering::SeqCst), 1);
    let snapshot = sink.metrics().snapshot();
    assert_eq!(snapshot.runs, 1);
    assert_eq!(snapshot.ops_failed, 2);
    assert!(snapshot.max_active_ops <= 4);
}

#[test]
fn raising_sink_reports_the_abort() {
    let sink = CqlSink::new(PickySession::default(), script_options()).unwrap();
    sink.ensure_table("pb").unwrap();

    let err = sink.write_batch("pb", rows(&["a", "bad"])).unwrap_err();
    match err {
        SinkError::Aborted { table, total, source, .. } => {
            assert_eq!(table, "table_pb");
            assert_eq!(total, 2);
            assert_eq!(source.message, "write timeout");
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(sink.session().inserts.lock().unwrap().len() <= 1);
}

#[test]
fn unknown_table_is_not_written() {
    let sink = CqlSink::new(PickySession::default(), script_options()).unwrap();
    let err = sink.write_batch("pb", rows(&["a"])).unwrap_err();
    assert!(matches!(err, SinkError::MissingTable { ref table } if table == "table_pb"));
    assert!(sink.session().inserts.lock().unwrap().is_empty());

    let wrapped = EtlError::Sink {
        family: "pb".into(),
        rows: 1,
        source: err,
    };
    assert!(wrapped.is_recoverable());
}

#[test]
fn invalid_keyspace_is_rejected() {
    let result = CqlSink::new(
        PickySession::default(),
        CqlOptions {
            keyspace: "bad-name".into(),
            ..CqlOptions::default()
        },
    );
    assert!(result.is_err());
}
