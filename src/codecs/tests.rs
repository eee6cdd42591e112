// In: src/codecs/tests.rs

//! End-to-end tests for the four codecs: lossless round trips, chunk-boundary
//! independence, classified failures on damaged input, dictionary stability and
//! the decoder/encoder lifecycle rules.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Decimal128Array, DictionaryArray, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, ListArray, StringArray,
    StructArray, TimestampMicrosecondArray, UInt16Array, UInt32Array, UInt8Array,
};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{DataType, Field, Fields, Int32Type, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::api::{decode_bytes, encode_batches};
use crate::config::CodecOptions;
use crate::context::BatchContext;
use crate::error::ErrorKind;
use crate::pipeline::{BatchReceiver, SharedVecSink};

//==================================================================================
// Helpers
//==================================================================================

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn options(capacity: usize) -> Arc<CodecOptions> {
    Arc::new(CodecOptions::default().with_batch_capacity(capacity))
}

/// A downstream whose readiness the test controls.
#[derive(Default)]
struct Gate {
    closed: bool,
    batches: Vec<RecordBatch>,
}

impl Gate {
    fn rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

impl BatchReceiver for Gate {
    fn ready(&mut self) -> bool {
        !self.closed
    }

    fn on_batch(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        let batch = ctx.begin_unload()?;
        self.batches.push(batch);
        ctx.finish_unload()
    }
}

/// Drives a decoder by hand over the given chunks, resuming until each is consumed.
fn drive(
    codec: &dyn Codec,
    schema: SchemaRef,
    options: Arc<CodecOptions>,
    chunks: &[&[u8]],
) -> Result<Vec<RecordBatch>, BatchlineError> {
    let mut ctx = BatchContext::new(schema.clone(), options.batch_capacity)?;
    let mut decoder = codec.decoder(schema, options)?;
    let mut gate = Gate::default();
    decoder.on_start(&mut ctx)?;
    for chunk in chunks {
        decoder.on_next(&mut ctx, chunk, &mut gate)?;
        while !decoder.resume(&mut ctx, &mut gate)? {}
    }
    decoder.on_complete(&mut ctx, &mut gate)?;
    assert!(decoder.close());
    assert!(ctx.stats().max_in_flight <= 2);
    Ok(gate.batches)
}

/// Places the single null of a three-row column at `at`.
fn with_null<T: Copy>(values: [T; 3], at: usize) -> Vec<Option<T>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| if i == at { None } else { Some(*v) })
        .collect()
}

fn nullable(name: &str, data_type: DataType) -> Field {
    Field::new(name, data_type, true)
}

/// Every primitive type plus a dictionary column, one null per column.
fn flat_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        nullable("flag", DataType::Boolean),
        nullable("i8", DataType::Int8),
        nullable("i16", DataType::Int16),
        nullable("i32", DataType::Int32),
        nullable("i64", DataType::Int64),
        nullable("u8", DataType::UInt8),
        nullable("u16", DataType::UInt16),
        nullable("u32", DataType::UInt32),
        nullable("f32", DataType::Float32),
        nullable("f64", DataType::Float64),
        nullable("price", DataType::Decimal128(20, 4)),
        nullable("label", DataType::Utf8),
        nullable("day", DataType::Date32),
        nullable("at", DataType::Timestamp(TimeUnit::Microsecond, None)),
        nullable(
            "tag",
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
        ),
    ]));
    let tags: DictionaryArray<Int32Type> =
        with_null(["x", "y", "x"], 1).into_iter().collect();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(BooleanArray::from(with_null([true, false, true], 0))),
        Arc::new(Int8Array::from(with_null([i8::MIN, 0, i8::MAX], 1))),
        Arc::new(Int16Array::from(with_null([i16::MIN, 1, i16::MAX], 2))),
        Arc::new(Int32Array::from(with_null([i32::MIN, 2, i32::MAX], 0))),
        Arc::new(Int64Array::from(with_null([i64::MIN, 3, i64::MAX], 1))),
        Arc::new(UInt8Array::from(with_null([0, 1, u8::MAX], 2))),
        Arc::new(UInt16Array::from(with_null([0, 1, u16::MAX], 0))),
        Arc::new(UInt32Array::from(with_null([0, 1, u32::MAX], 1))),
        Arc::new(Float32Array::from(with_null([1.5f32, -0.25, f32::MAX], 2))),
        Arc::new(Float64Array::from(with_null([0.1, -2.5e-300, 1e300], 0))),
        Arc::new(
            Decimal128Array::from(with_null([123_456_789i128, -5, 0], 1))
                .with_precision_and_scale(20, 4)
                .unwrap(),
        ),
        Arc::new(StringArray::from(with_null(["héllo", "a,b\"c", "日本"], 2))),
        Arc::new(Date32Array::from(with_null([0, 19_000, -1], 0))),
        Arc::new(TimestampMicrosecondArray::from(with_null(
            [0, 1_700_000_000_123_456, -1],
            1,
        ))),
        Arc::new(tags),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

/// The flat batch minus its dictionary column.
fn plain_batch() -> RecordBatch {
    let batch = flat_batch();
    let last = batch.num_columns() - 1;
    batch.project(&(0..last).collect::<Vec<_>>()).unwrap()
}

/// A list column and a struct column next to an id, one null each.
fn nested_batch() -> RecordBatch {
    let point_fields = Fields::from(vec![
        nullable("x", DataType::Float64),
        nullable("y", DataType::Utf8),
    ]);
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        nullable(
            "scores",
            DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
        ),
        nullable("point", DataType::Struct(point_fields.clone())),
    ]));
    let scores = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
        Some(vec![Some(1), None, Some(3)]),
        None,
        Some(vec![]),
    ]);
    let point = StructArray::try_new(
        point_fields,
        vec![
            Arc::new(Float64Array::from(vec![Some(1.25), None, None])) as ArrayRef,
            Arc::new(StringArray::from(vec![Some("a"), None, Some("ö")])),
        ],
        Some(NullBuffer::from(vec![true, false, true])),
    )
    .unwrap();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(scores),
            Arc::new(point),
        ],
    )
    .unwrap()
}

fn assert_round_trip(mime: &str, batch: &RecordBatch, chunk_sizes: &[usize]) {
    let schema = batch.schema();
    let bytes = encode_batches(mime, schema.clone(), vec![batch.clone()], options(1024))
        .unwrap_or_else(|e| panic!("{} encode failed: {}", mime, e));
    for &chunk in chunk_sizes {
        let decoded = decode_bytes(mime, schema.clone(), &bytes, chunk, options(1024))
            .unwrap_or_else(|e| panic!("{} decode (chunk {}) failed: {}", mime, chunk, e));
        assert_eq!(decoded.len(), 1, "{} chunk {}", mime, chunk);
        assert_eq!(&decoded[0], batch, "{} chunk {}", mime, chunk);
    }
}

//==================================================================================
// Round trips
//==================================================================================

#[test]
fn test_csv_round_trip_every_flat_type() {
    init_logger();
    assert_round_trip(CSV_MIME, &flat_batch(), &[0, 1, 7]);
}

#[test]
fn test_json_round_trip_flat_and_nested_types() {
    init_logger();
    assert_round_trip(JSON_MIME, &flat_batch(), &[0, 1, 5]);
    assert_round_trip(JSON_MIME, &nested_batch(), &[0, 1, 3]);
}

#[test]
fn test_arrow_stream_round_trip() {
    init_logger();
    assert_round_trip(ARROW_STREAM_MIME, &plain_batch(), &[0, 1, 64]);
    assert_round_trip(ARROW_STREAM_MIME, &nested_batch(), &[0, 13]);
}

#[test]
fn test_arrow_file_round_trip_with_dictionary() {
    init_logger();
    assert_round_trip(ARROW_FILE_MIME, &flat_batch(), &[0, 1, 100]);
    assert_round_trip(ARROW_FILE_MIME, &nested_batch(), &[0]);
}

#[test]
fn test_multiple_batches_keep_their_boundaries_in_arrow() {
    let batch = plain_batch();
    let schema = batch.schema();
    let parts = vec![batch.slice(0, 1), batch.slice(1, 2)];
    for mime in [ARROW_STREAM_MIME, ARROW_FILE_MIME] {
        let bytes = encode_batches(mime, schema.clone(), parts.clone(), options(1024)).unwrap();
        let decoded = decode_bytes(mime, schema.clone(), &bytes, 9, options(1024)).unwrap();
        let rows: Vec<usize> = decoded.iter().map(|b| b.num_rows()).collect();
        assert_eq!(rows, vec![1, 2], "{}", mime);
        assert_eq!(decoded[1], batch.slice(1, 2), "{}", mime);
    }
}

#[test]
fn test_text_formats_keep_special_floats() {
    let schema = Arc::new(Schema::new(vec![nullable("v", DataType::Float64)]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Float64Array::from(vec![
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
            -0.0,
        ]))],
    )
    .unwrap();
    for mime in [CSV_MIME, JSON_MIME] {
        let bytes = encode_batches(mime, schema.clone(), vec![batch.clone()], options(8)).unwrap();
        let decoded = decode_bytes(mime, schema.clone(), &bytes, 2, options(8)).unwrap();
        let values = decoded[0]
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!(values.value(0).is_nan(), "{}", mime);
        assert_eq!(values.value(1), f64::INFINITY, "{}", mime);
        assert_eq!(values.value(2), f64::NEG_INFINITY, "{}", mime);
        assert!(values.value(3) == 0.0 && values.value(3).is_sign_negative(), "{}", mime);
    }
}

#[test]
fn test_arrow_keeps_nan_payload_bits() {
    let payload = f64::from_bits(0x7ff8_0000_0000_0001);
    let schema = Arc::new(Schema::new(vec![nullable("v", DataType::Float64)]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Float64Array::from(vec![payload]))],
    )
    .unwrap();
    for mime in [ARROW_STREAM_MIME, ARROW_FILE_MIME] {
        let bytes = encode_batches(mime, schema.clone(), vec![batch.clone()], options(8)).unwrap();
        let decoded = decode_bytes(mime, schema.clone(), &bytes, 0, options(8)).unwrap();
        let values = decoded[0]
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(values.value(0).to_bits(), payload.to_bits(), "{}", mime);
    }
}

//==================================================================================
// Chunk boundaries
//==================================================================================

#[test]
fn test_text_decoding_is_independent_of_chunk_boundaries() {
    init_logger();
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        nullable("name", DataType::Utf8),
    ]));
    let json = r#" [ {"id": 1, "name": "Zoë"}, {"name": "日本語", "id": 2},
        {"id": 3, "name": null}, {"id": 4} ] "#
        .as_bytes();
    let csv = "name,id\n\"Zoë, \"\"the\"\"\",1\n日本語,2\n,3\n".as_bytes();

    for (codec, input) in [
        (&JsonCodec as &dyn Codec, json),
        (&CsvCodec as &dyn Codec, csv),
    ] {
        let whole = drive(codec, schema.clone(), options(2), &[input]).unwrap();
        assert!(whole.len() >= 2);
        for size in 1..=9 {
            let chunks: Vec<&[u8]> = input.chunks(size).collect();
            let split = drive(codec, schema.clone(), options(2), &chunks).unwrap();
            assert_eq!(split, whole, "{} chunk size {}", codec.mime_type(), size);
        }
    }
}

#[test]
fn test_decoder_parks_input_until_downstream_is_ready() {
    let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
    let options = options(1);
    let mut ctx = BatchContext::new(schema.clone(), 1).unwrap();
    let mut decoder = JsonCodec.decoder(schema, options).unwrap();
    let mut gate = Gate {
        closed: true,
        ..Gate::default()
    };
    decoder.on_start(&mut ctx).unwrap();
    decoder
        .on_next(&mut ctx, br#"[{"n":1},{"n":2},{"n":3},{"n":4}]"#, &mut gate)
        .unwrap();
    assert_eq!(ctx.in_flight(), 2);
    assert!(!decoder.resume(&mut ctx, &mut gate).unwrap());

    let err = decoder.on_next(&mut ctx, b" ", &mut gate).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(decoder.state(), DecoderState::Receiving);

    gate.closed = false;
    assert!(decoder.resume(&mut ctx, &mut gate).unwrap());
    decoder.on_complete(&mut ctx, &mut gate).unwrap();
    assert_eq!(gate.rows(), 4);
    assert_eq!(gate.batches.len(), 4);
    assert!(ctx.stats().max_in_flight <= 2);
    assert_eq!(ctx.in_flight(), 0);
}

/// Accepts a delivery only on every `period`-th poll.
struct Sluggish {
    period: usize,
    polls: usize,
    batches: Vec<RecordBatch>,
}

impl BatchReceiver for Sluggish {
    fn ready(&mut self) -> bool {
        self.polls += 1;
        self.polls % self.period == 0
    }

    fn on_batch(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        let batch = ctx.begin_unload()?;
        self.batches.push(batch);
        ctx.finish_unload()
    }
}

#[test]
fn test_completion_waits_out_a_slow_downstream() {
    let batch = plain_batch();
    for mime in [JSON_MIME, ARROW_STREAM_MIME, ARROW_FILE_MIME] {
        let bytes = encode_batches(mime, batch.schema(), vec![batch.clone()], options(1)).unwrap();
        let codec = CodecRegistry::with_defaults().resolve(mime).unwrap();
        let mut ctx = BatchContext::new(batch.schema(), 1).unwrap();
        let mut decoder = codec.decoder(batch.schema(), options(1)).unwrap();
        let mut slow = Sluggish {
            period: 25,
            polls: 0,
            batches: Vec::new(),
        };
        decoder.on_start(&mut ctx).unwrap();
        decoder.on_next(&mut ctx, &bytes, &mut slow).unwrap();
        decoder.on_complete(&mut ctx, &mut slow).unwrap();
        let rows: usize = slow.batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 3, "{}", mime);
        assert!(slow.polls >= 25, "{}", mime);
        assert_eq!(ctx.in_flight(), 0, "{}", mime);
    }
}

//==================================================================================
// Damaged input
//==================================================================================

fn id_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        nullable("name", DataType::Utf8),
    ]))
}

#[test]
fn test_empty_input_is_data_corruption_for_every_format() {
    for mime in [CSV_MIME, JSON_MIME, ARROW_STREAM_MIME, ARROW_FILE_MIME] {
        let err = decode_bytes(mime, id_schema(), b"", 0, options(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataCorruption, "{}: {}", mime, err);
    }
}

#[test]
fn test_random_garbage_never_decodes() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..200 {
        let len = rng.random_range(16..256);
        let garbage: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        let chunk = rng.random_range(1..32);
        for mime in [CSV_MIME, JSON_MIME, ARROW_STREAM_MIME, ARROW_FILE_MIME] {
            let err = decode_bytes(mime, id_schema(), &garbage, chunk, options(4))
                .expect_err("garbage must not decode");
            assert_eq!(
                err.kind(),
                ErrorKind::DataCorruption,
                "{} round {}: {}",
                mime,
                round,
                err
            );
        }
    }
}

#[test]
fn test_bit_flipped_arrow_input_fails_cleanly_or_decodes() {
    // IPC carries no checksum, so a flip inside a value buffer still decodes. Every
    // other outcome must be a DataCorruption error rather than a panic.
    let mut rng = StdRng::seed_from_u64(0xb17f);
    for mime in [ARROW_STREAM_MIME, ARROW_FILE_MIME] {
        let batch = plain_batch();
        let bytes = encode_batches(mime, batch.schema(), vec![batch.clone()], options(4)).unwrap();
        let mut rejected = 0;
        for round in 0..400 {
            let mut damaged = bytes.clone();
            for _ in 0..rng.random_range(1..=3) {
                let at = rng.random_range(0..damaged.len());
                damaged[at] ^= 1 << rng.random_range(0..8);
            }
            let chunk = rng.random_range(0..64);
            match decode_bytes(mime, batch.schema(), &damaged, chunk, options(4)) {
                Ok(decoded) => assert!(decoded.len() <= 1, "{} round {}", mime, round),
                Err(err) => {
                    rejected += 1;
                    assert_eq!(
                        err.kind(),
                        ErrorKind::DataCorruption,
                        "{} round {}: {}",
                        mime,
                        round,
                        err
                    );
                }
            }
        }
        assert!(rejected > 0, "{}: no damaged input was rejected", mime);
    }
}

#[test]
fn test_truncated_documents_never_decode() {
    let batch = RecordBatch::try_new(
        id_schema(),
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
        ],
    )
    .unwrap();
    for mime in [JSON_MIME, ARROW_STREAM_MIME, ARROW_FILE_MIME] {
        let bytes = encode_batches(mime, id_schema(), vec![batch.clone()], options(4)).unwrap();
        for cut in 1..bytes.len() {
            let result = decode_bytes(mime, id_schema(), &bytes[..cut], 7, options(4));
            let err = match result {
                Ok(batches) => panic!("{} cut at {} decoded {} batches", mime, cut, batches.len()),
                Err(e) => e,
            };
            assert_eq!(err.kind(), ErrorKind::DataCorruption, "{} cut at {}", mime, cut);
        }
    }
}

#[test]
fn test_corrupt_record_stops_and_errors_the_decoder() {
    let schema = id_schema();
    let mut ctx = BatchContext::new(schema.clone(), 8).unwrap();
    let mut decoder = JsonCodec.decoder(schema, options(8)).unwrap();
    let mut gate = Gate::default();
    decoder.on_start(&mut ctx).unwrap();
    let err = decoder
        .on_next(&mut ctx, br#"[{"id": "seven"}]"#, &mut gate)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataCorruption);
    assert_eq!(decoder.state(), DecoderState::Errored);
    let err = decoder.on_complete(&mut ctx, &mut gate).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(gate.batches.is_empty());
}

#[test]
fn test_arrow_schema_mismatch_is_data_corruption() {
    let batch = RecordBatch::try_new(
        id_schema(),
        vec![
            Arc::new(Int64Array::from(vec![1])),
            Arc::new(StringArray::from(vec!["a"])),
        ],
    )
    .unwrap();
    let other = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        nullable("name", DataType::Utf8),
    ]));
    for mime in [ARROW_STREAM_MIME, ARROW_FILE_MIME] {
        let bytes = encode_batches(mime, id_schema(), vec![batch.clone()], options(4)).unwrap();
        let err = decode_bytes(mime, other.clone(), &bytes, 0, options(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataCorruption, "{}", mime);
    }
}

#[test]
fn test_zero_batch_arrow_input_still_checks_the_schema() {
    let other = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
    for mime in [ARROW_STREAM_MIME, ARROW_FILE_MIME] {
        let bytes = encode_batches(mime, id_schema(), vec![], options(4)).unwrap();
        assert!(decode_bytes(mime, id_schema(), &bytes, 3, options(4))
            .unwrap()
            .is_empty());
        let err = decode_bytes(mime, other.clone(), &bytes, 3, options(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataCorruption, "{}", mime);
        assert!(err.to_string().contains("schema"), "{}: {}", mime, err);
    }
}

//==================================================================================
// Dictionaries
//==================================================================================

#[test]
fn test_dictionary_codes_are_stable_across_batches() {
    init_logger();
    let schema = Arc::new(Schema::new(vec![nullable(
        "city",
        DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
    )]));
    let input: Vec<Option<&str>> = vec![
        Some("oslo"),
        Some("rome"),
        Some("oslo"),
        None,
        Some("lima"),
        Some("rome"),
        Some("oslo"),
        Some("kyiv"),
    ];
    let body: Vec<String> = input
        .iter()
        .map(|v| match v {
            Some(city) => format!("{{\"city\":\"{}\"}}", city),
            None => "{\"city\":null}".to_string(),
        })
        .collect();
    let json = format!("[{}]", body.join(","));

    let batches = drive(&JsonCodec, schema.clone(), options(3), &[json.as_bytes()]).unwrap();
    assert_eq!(batches.len(), 3);

    let mut seen: HashMap<String, i32> = HashMap::new();
    let mut decoded = Vec::new();
    let mut previous_len = 0;
    for batch in &batches {
        let dict = batch
            .column(0)
            .as_any()
            .downcast_ref::<DictionaryArray<Int32Type>>()
            .unwrap();
        let values = dict.values().as_any().downcast_ref::<StringArray>().unwrap();
        assert!(values.len() >= previous_len);
        previous_len = values.len();
        for (code, value) in values.iter().enumerate() {
            let value = value.unwrap().to_string();
            let code = code as i32;
            assert_eq!(*seen.entry(value).or_insert(code), code);
        }
        for row in 0..dict.len() {
            decoded.push(if dict.is_null(row) {
                None
            } else {
                Some(values.value(dict.keys().value(row) as usize).to_string())
            });
        }
    }
    assert_eq!(seen.len(), 4);
    let expected: Vec<Option<String>> = input.iter().map(|v| v.map(str::to_string)).collect();
    assert_eq!(decoded, expected);

    let reencoded =
        encode_batches(JSON_MIME, schema, batches, options(3)).unwrap();
    assert_eq!(String::from_utf8(reencoded).unwrap(), json);
}

//==================================================================================
// Scenarios
//==================================================================================

#[test]
fn test_csv_ten_rows_with_one_null_per_column() {
    let schema = Arc::new(Schema::new(vec![
        nullable("ok", DataType::Boolean),
        nullable("count", DataType::Int64),
        nullable("label", DataType::Utf8),
    ]));
    let oks: Vec<Option<bool>> = (0..10).map(|i| (i != 2).then_some(i % 2 == 0)).collect();
    let counts: Vec<Option<i64>> = (0..10).map(|i| (i != 5).then_some(i * 1000 - 3)).collect();
    let labels: Vec<Option<String>> = (0..10)
        .map(|i| (i != 8).then(|| format!("row {}", i)))
        .collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(BooleanArray::from(oks)),
            Arc::new(Int64Array::from(counts)),
            Arc::new(StringArray::from(labels)),
        ],
    )
    .unwrap();

    let bytes = encode_batches(CSV_MIME, schema.clone(), vec![batch.clone()], options(4)).unwrap();
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(text.starts_with("ok,count,label\ntrue,-3,row 0\n"), "{}", text);
    assert!(text.contains("\n,1997,row 2\n"), "{}", text);

    let decoded = decode_bytes(CSV_MIME, schema, &bytes, 5, options(4)).unwrap();
    let rows: Vec<usize> = decoded.iter().map(|b| b.num_rows()).collect();
    assert_eq!(rows, vec![4, 4, 2]);
    let joined = arrow::compute::concat_batches(&batch.schema(), &decoded).unwrap();
    assert_eq!(joined, batch);
}

#[test]
fn test_single_record_json_split_at_every_byte() {
    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
    let doc = br#"{"a":1}"#;
    for split in 0..=doc.len() {
        let (head, tail) = doc.split_at(split);
        let mut ctx = BatchContext::new(schema.clone(), 16).unwrap();
        let mut decoder = JsonCodec
            .decoder(schema.clone(), Arc::new(CodecOptions::default().with_single_record(true)))
            .unwrap();
        let mut gate = Gate::default();
        decoder.on_start(&mut ctx).unwrap();
        decoder.on_next(&mut ctx, head, &mut gate).unwrap();
        decoder.on_next(&mut ctx, tail, &mut gate).unwrap();
        decoder.on_complete(&mut ctx, &mut gate).unwrap();
        assert_eq!(gate.rows(), 1, "split at {}", split);
        let values = gate.batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(values.value(0), 1);

        let err = decoder.on_complete(&mut ctx, &mut gate).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(gate.batches.len(), 1);
        assert_eq!(decoder.state(), DecoderState::Completed);
    }
}

#[test]
fn test_single_record_mode_from_schema_metadata() {
    let metadata = HashMap::from([(SINGLE_RECORD_METADATA_KEY.to_string(), "TRUE".to_string())]);
    let schema = Arc::new(
        Schema::new(vec![Field::new("a", DataType::Int64, false)]).with_metadata(metadata),
    );
    let batches = drive(&JsonCodec, schema.clone(), options(4), &[&b" {\"a\": 5} "[..]]).unwrap();
    assert_eq!(batches.len(), 1);

    let two = br#"{"a":1}{"a":2}"#;
    let err = drive(&JsonCodec, schema.clone(), options(4), &[&two[..]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataCorruption);
    let err = drive(&JsonCodec, schema.clone(), options(4), &[&b"   "[..]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataCorruption);

    let out = encode_batches(JSON_MIME, schema.clone(), batches, options(4)).unwrap();
    assert_eq!(out, br#"{"a":5}"#);
}

#[test]
fn test_arrow_stream_decimal_is_bit_exact() {
    let schema = Arc::new(Schema::new(vec![nullable("amount", DataType::Decimal128(38, 12))]));
    let mantissa = 10i128.pow(25) * 10i128.pow(12);
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(
            Decimal128Array::from(vec![Some(mantissa), Some(-1), None])
                .with_precision_and_scale(38, 12)
                .unwrap(),
        )],
    )
    .unwrap();
    let bytes =
        encode_batches(ARROW_STREAM_MIME, schema.clone(), vec![batch.clone()], options(8)).unwrap();
    let decoded = decode_bytes(ARROW_STREAM_MIME, schema, &bytes, 3, options(8)).unwrap();
    let values = decoded[0]
        .column(0)
        .as_any()
        .downcast_ref::<Decimal128Array>()
        .unwrap();
    assert_eq!(values.value(0), mantissa);
    assert_eq!(values.value_as_string(0), "10000000000000000000000000.000000000000");
    assert_eq!(values.value(1), -1);
    assert!(values.is_null(2));
}

//==================================================================================
// Encoder lifecycle and type support
//==================================================================================

#[test]
fn test_encoder_rejects_a_second_completion() {
    let schema = id_schema();
    let mut ctx = BatchContext::new(schema.clone(), 4).unwrap();
    let out = SharedVecSink::new();
    let mut encoder = JsonCodec.encoder(schema.clone(), options(4)).unwrap();
    encoder.on_start(Box::new(out.clone())).unwrap();

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![9])),
            Arc::new(StringArray::from(vec![Some("z")])),
        ],
    )
    .unwrap();
    ctx.load_batch(batch).unwrap();
    ctx.flip().unwrap();
    encoder.on_batch(&mut ctx).unwrap();
    assert_eq!(ctx.front_state(), crate::context::BufferState::Empty);

    encoder.on_complete().unwrap();
    assert_eq!(encoder.state(), EncoderState::Completed);
    let err = encoder.on_complete().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(out.contents(), br#"[{"id":9,"name":"z"}]"#);
    assert!(encoder.close());
    assert!(!encoder.close());
    assert_eq!(out.close_count(), 1);
}

#[test]
fn test_encoder_error_closes_the_byte_sink_once() {
    let out = SharedVecSink::new();
    let mut encoder = CsvCodec.encoder(id_schema(), options(4)).unwrap();
    encoder.on_start(Box::new(out.clone())).unwrap();
    encoder.on_error(&BatchlineError::Cancelled);
    assert_eq!(encoder.state(), EncoderState::Errored);
    encoder.close();
    assert_eq!(out.close_count(), 1);
    assert!(encoder.on_complete().is_err());
}

#[test]
fn test_csv_rejects_nested_columns() {
    let schema = nested_batch().schema();
    let err = CsvCodec.decoder(schema.clone(), options(4)).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    let err = CsvCodec.encoder(schema, options(4)).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[test]
fn test_unsupported_arrow_types_are_rejected_at_binding() {
    let schema = Arc::new(Schema::new(vec![nullable("blob", DataType::Binary)]));
    for codec in [
        &CsvCodec as &dyn Codec,
        &JsonCodec,
        &ArrowStreamCodec,
        &ArrowFileCodec,
    ] {
        let err = codec.decoder(schema.clone(), options(4)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unsupported, "{}", codec.mime_type());
    }
}

#[test]
fn test_stream_encoder_refuses_dictionary_columns() {
    let schema = flat_batch().schema();
    let mut encoder = ArrowStreamCodec.encoder(schema, options(4)).unwrap();
    let err = encoder.on_start(Box::new(SharedVecSink::new())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn test_single_record_encoder_rejects_many_rows() {
    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Int64Array::from(vec![1, 2]))],
    )
    .unwrap();
    let options = Arc::new(CodecOptions::default().with_single_record(true));
    let err = encode_batches(JSON_MIME, schema, vec![batch], options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataCorruption);
}
