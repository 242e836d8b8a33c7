use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use cellstream::processing::{extract, BatchOptions, FamilyBatcher};
use cellstream::sink::{MemorySink, Sink};
use cellstream::types::{Node, RawRecord, Schema};

const FAMILIES: usize = 4;
const QUALIFIERS: usize = 8;
const VERSIONS: usize = 3;

fn family(seed: usize) -> Node {
    let columns = (0..QUALIFIERS)
        .map(|q| {
            let cells = (0..VERSIONS)
                .map(|v| {
                    Node::Group(vec![
                        ("timestamp".to_string(), Node::Int((seed * 1_000 + v) as i64)),
                        ("value".to_string(), Node::Bytes(vec![q as u8; 32])),
                    ])
                })
                .collect();
            Node::Group(vec![
                ("name".to_string(), Node::Text(format!("q{q}"))),
                ("cell".to_string(), Node::List(cells)),
            ])
        })
        .collect();
    Node::Group(vec![("column".to_string(), Node::List(columns))])
}

fn record(seq: usize) -> RawRecord {
    let mut columns = vec![("rowkey".to_string(), Node::Text(format!("row-{seq:08}")))];
    columns.extend((0..FAMILIES).map(|f| (format!("cf{f}"), family(seq + f))));
    RawRecord {
        sequence: seq as u64,
        progress: 0.0,
        columns,
    }
}

fn schema() -> Schema {
    Schema::new("rowkey", (0..FAMILIES).map(|f| format!("cf{f}")))
}

fn bench_extract(c: &mut Criterion) {
    let schema = schema();
    let records: Vec<RawRecord> = (0..256).map(record).collect();

    let mut group = c.benchmark_group("extract");
    group.throughput(Throughput::Elements(records.len() as u64));
    group.bench_function("256_records", |b| {
        b.iter(|| {
            for r in &records {
                black_box(extract(black_box(r), &schema));
            }
        })
    });
    group.finish();
}

fn bench_batching(c: &mut Criterion) {
    let schema = schema();
    let rows: Vec<_> = (0..256).flat_map(|i| extract(&record(i), &schema).rows).collect();

    let mut group = c.benchmark_group("batching");
    group.throughput(Throughput::Elements(rows.len() as u64));
    group.bench_function("memory_sink_batch_1000", |b| {
        b.iter_batched(
            || {
                let sink = Arc::new(MemorySink::new());
                for f in schema.families() {
                    sink.ensure_table(f).ok();
                }
                let batcher = FamilyBatcher::new(sink, &BatchOptions { batch_size: 1000 }).ok();
                (batcher, rows.clone())
            },
            |(batcher, rows)| {
                let Some(mut batcher) = batcher else { return };
                for row in rows {
                    black_box(batcher.accept(row));
                }
                black_box(batcher.flush_all());
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_extract, bench_batching);
criterion_main!(benches);
