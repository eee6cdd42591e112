// In: src/api.rs

//! A stateless, one-call facade over the registry and the pipeline.
//!
//! Every function builds a complete pipeline run, executes it on the calling thread
//! and returns the finished output. Formats are selected by MIME type.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::codecs::CodecRegistry;
use crate::config::{CodecOptions, EngineConfig};
use crate::error::BatchlineError;
use crate::pipeline::{
    ChunkedByteSource, CollectingSink, EncoderSink, Pipeline, SharedVecSink, VecBatchSource,
};

fn engine_config(options: &Arc<CodecOptions>) -> EngineConfig {
    EngineConfig {
        codec: options.as_ref().clone(),
        ..EngineConfig::default()
    }
}

/// Encodes `batches` of `schema` into one document of the `mime` format.
pub fn encode_batches(
    mime: &str,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    options: Arc<CodecOptions>,
) -> Result<Vec<u8>, BatchlineError> {
    let codec = CodecRegistry::with_defaults().resolve(mime)?;
    let encoder = codec.encoder(schema.clone(), options.clone())?;
    let output = SharedVecSink::new();

    let source = VecBatchSource::new(schema, batches);
    let mut pipeline = Pipeline::from_batches(Box::new(source), &engine_config(&options))?;
    pipeline.add_sink(Box::new(EncoderSink::new(encoder, Box::new(output.clone()))));
    pipeline.execute()?;
    Ok(output.contents())
}

/// Decodes `bytes` of the `mime` format into batches of `schema`, feeding the decoder
/// `chunk_size` bytes at a time (`0` feeds everything at once).
pub fn decode_bytes(
    mime: &str,
    schema: SchemaRef,
    bytes: &[u8],
    chunk_size: usize,
    options: Arc<CodecOptions>,
) -> Result<Vec<RecordBatch>, BatchlineError> {
    let codec = CodecRegistry::with_defaults().resolve(mime)?;
    let decoder = codec.decoder(schema.clone(), options.clone())?;
    let sink = CollectingSink::new();
    let batches = sink.handle();

    let source = ChunkedByteSource::new(bytes, chunk_size);
    let mut pipeline =
        Pipeline::from_bytes(Box::new(source), decoder, schema, &engine_config(&options))?;
    pipeline.add_sink(Box::new(sink));
    pipeline.execute()?;
    let collected = batches.take();
    Ok(collected)
}

/// Converts a document from one format into another in a single run.
pub fn transcode(
    from_mime: &str,
    to_mime: &str,
    schema: SchemaRef,
    bytes: &[u8],
    chunk_size: usize,
    options: Arc<CodecOptions>,
) -> Result<Vec<u8>, BatchlineError> {
    let registry = CodecRegistry::with_defaults();
    let decoder = registry
        .resolve(from_mime)?
        .decoder(schema.clone(), options.clone())?;
    let encoder = registry
        .resolve(to_mime)?
        .encoder(schema.clone(), options.clone())?;
    let output = SharedVecSink::new();

    let source = ChunkedByteSource::new(bytes, chunk_size);
    let mut pipeline =
        Pipeline::from_bytes(Box::new(source), decoder, schema, &engine_config(&options))?;
    pipeline.add_sink(Box::new(EncoderSink::new(encoder, Box::new(output.clone()))));
    pipeline.execute()?;
    Ok(output.contents())
}
