use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use beacon_core::log_record::LogRecord;
use beacon_core::{DispatchOutcome, RawRow, RunId, parse_timestamp_micros, transform};
use serde_json::{Map, Value, json};

fn wide_row(properties: usize) -> RawRow {
    let mut columns = Map::new();
    columns.insert("client_id".into(), json!("1234567890.1234567890"));
    columns.insert("user_id".into(), json!("u-42"));
    columns.insert("event_name".into(), json!("purchase_propensity"));
    columns.insert("event_timestamp".into(), json!("2023-02-25 10:00:00.123456 UTC"));
    for i in 0..properties {
        columns.insert(format!("ep_param_{i}"), json!(i as f64 * 0.5));
        columns.insert(format!("up_prop_{i}_"), json!(format!("v{i}")));
        columns.insert(format!("ep_null_{i}"), Value::Null);
    }
    RawRow::new(columns).expect("valid row")
}

fn bench_timestamp_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("timestamp_parsing");

    for input in [
        "2023-02-25 10:00:00.123456 UTC",
        "2023-02-25 10:00:00",
        "2023-02-25",
        "not a timestamp",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(input), input, |b, input| {
            b.iter(|| parse_timestamp_micros(black_box(input)))
        });
    }

    group.finish();
}

fn bench_row_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_transform");

    for properties in [0usize, 8, 64] {
        let row = wide_row(properties);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(properties),
            &row,
            |b, row| b.iter(|| transform(black_box(row))),
        );
    }

    group.finish();
}

fn bench_log_record(c: &mut Criterion) {
    let run = RunId::parse("202302251200").expect("valid run id");
    let outcome = DispatchOutcome::new(transform(&wide_row(16)), 204, "");

    c.bench_function("log_record_from_outcome", |b| {
        b.iter(|| LogRecord::from_outcome(black_box(&outcome), &run))
    });
}

criterion_group!(
    benches,
    bench_timestamp_parsing,
    bench_row_transform,
    bench_log_record
);
criterion_main!(benches);
