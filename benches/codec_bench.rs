// In batchline-core/benches/codec_bench.rs

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use batchline::api::{decode_bytes, encode_batches};
use batchline::codecs::{ARROW_FILE_MIME, ARROW_STREAM_MIME, CSV_MIME, JSON_MIME};
use batchline::CodecOptions;

// --- Mock Data Generation ---

fn bench_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("score", DataType::Float64, true),
        Field::new("name", DataType::Utf8, true),
    ]))
}

/// A batch of `rows` rows with a null in every seventh score.
fn generate_batch(rows: usize) -> RecordBatch {
    let ids: Vec<i64> = (0..rows as i64).collect();
    let scores: Vec<Option<f64>> = (0..rows)
        .map(|i| (i % 7 != 0).then_some(i as f64 * 0.25))
        .collect();
    let names: Vec<String> = (0..rows).map(|i| format!("name-{}", i % 97)).collect();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(Float64Array::from(scores)),
        Arc::new(StringArray::from(names)),
    ];
    RecordBatch::try_new(bench_schema(), columns).unwrap()
}

// --- Benchmark Suite ---

const BENCH_ROWS: usize = 10_000;
const CHUNK_SIZE: usize = 16 * 1024;

fn bench_codecs(c: &mut Criterion) {
    let batch = generate_batch(BENCH_ROWS);
    let options = Arc::new(CodecOptions::default());

    let mut group = c.benchmark_group("Codecs");
    group.throughput(criterion::Throughput::Elements(BENCH_ROWS as u64));

    for (label, mime) in [
        ("CSV", CSV_MIME),
        ("JSON", JSON_MIME),
        ("Arrow Stream", ARROW_STREAM_MIME),
        ("Arrow File", ARROW_FILE_MIME),
    ] {
        let encoded =
            encode_batches(mime, bench_schema(), vec![batch.clone()], options.clone()).unwrap();

        group.bench_function(format!("Encode {}", label), |b| {
            b.iter(|| {
                black_box(encode_batches(
                    mime,
                    bench_schema(),
                    vec![black_box(batch.clone())],
                    options.clone(),
                ))
            })
        });
        group.bench_function(format!("Decode {}", label), |b| {
            b.iter(|| {
                black_box(decode_bytes(
                    mime,
                    bench_schema(),
                    black_box(&encoded),
                    CHUNK_SIZE,
                    options.clone(),
                ))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_codecs);
criterion_main!(benches);
