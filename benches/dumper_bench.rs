use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sql_subsetter::database::{Columns, Row, Value};
use sql_subsetter::dumper::{BlockOutcome, Dumper, OutputWriter, SqlDialect, SqlDumper};
use tempfile::TempDir;

fn generate_rows(count: usize) -> (Columns, Vec<Row>) {
    let columns: Columns = ["id", "email", "score", "note"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let rows = (0..count)
        .map(|i| {
            Row::new(
                columns.clone(),
                vec![
                    Value::Int(i as i64),
                    Value::Text(format!("user{}@example.com", i)),
                    Value::Float(i as f64 * 0.5),
                    if i % 3 == 0 {
                        Value::Null
                    } else {
                        Value::Text("it's a note".to_string())
                    },
                ],
            )
        })
        .collect();
    (columns, rows)
}

fn write_block<D: Dumper>(dumper: &mut D, columns: &Columns, rows: &[Row]) {
    dumper.begin_table("users", columns).unwrap();
    for row in rows {
        dumper.write_row("users", row).unwrap();
    }
    dumper
        .end_table("users", &BlockOutcome::Complete { rows: rows.len() as u64 })
        .unwrap();
}

fn bench_dialects(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_dumper");
    let (columns, rows) = generate_rows(10_000);
    group.throughput(Throughput::Elements(rows.len() as u64));

    for dialect in [SqlDialect::MySql, SqlDialect::Postgres, SqlDialect::DuckDb] {
        group.bench_with_input(
            BenchmarkId::new("10k_rows", dialect.to_string()),
            &dialect,
            |b, &dialect| {
                b.iter(|| {
                    let mut dumper = SqlDumper::new(Vec::with_capacity(1 << 20)).with_dialect(dialect);
                    write_block(&mut dumper, &columns, &rows);
                    dumper.close().unwrap();
                    dumper.into_inner().len()
                })
            },
        );
    }

    group.finish();
}

fn bench_rows_per_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("rows_per_insert");
    let (columns, rows) = generate_rows(10_000);
    group.throughput(Throughput::Elements(rows.len() as u64));

    for batch in [1, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let mut dumper = SqlDumper::new(std::io::sink()).with_rows_per_insert(batch);
                write_block(&mut dumper, &columns, &rows);
                dumper.close().unwrap();
            })
        });
    }

    group.finish();
}

fn bench_compressed_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("compressed_output");
    let (columns, rows) = generate_rows(10_000);
    group.throughput(Throughput::Elements(rows.len() as u64));

    for ext in ["sql", "sql.gz", "sql.zst"] {
        group.bench_with_input(BenchmarkId::from_parameter(ext), &ext, |b, ext| {
            b.iter_with_setup(
                || {
                    let temp_dir = TempDir::new().unwrap();
                    let path = temp_dir.path().join(format!("out.{}", ext));
                    let writer = OutputWriter::create(&path).unwrap();
                    (temp_dir, SqlDumper::new(writer))
                },
                |(_temp_dir, mut dumper)| {
                    write_block(&mut dumper, &columns, &rows);
                    dumper.close().unwrap();
                },
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dialects,
    bench_rows_per_insert,
    bench_compressed_output
);
criterion_main!(benches);
