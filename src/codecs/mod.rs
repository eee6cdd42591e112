// In: src/codecs/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: Format Codecs
// ====================================================================================
//
// A `Codec` is a stateless factory for one wire format. Binding it to a schema
// yields a `Decoder` (bytes -> batches) or an `Encoder` (batches -> bytes). Both
// operate on the run's `BatchContext`:
//
//   Decoder: on_start(ctx) -> on_next(ctx, chunk, downstream)* / resume(...)
//            -> on_complete(ctx, downstream) | on_error(err)      then close()
//
//   Encoder: on_start(byte_sink) -> on_batch(ctx)* -> on_complete() | on_error(err)
//            then close()
//
// CSV and JSON share the text engine (`crate::text`). Arrow IPC stream and file
// wrap the `arrow::ipc` readers and writers.
//
// ====================================================================================

pub mod arrow_file;
pub mod arrow_stream;
pub mod csv;
pub(crate) mod ipc;
pub mod json;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;

pub use self::arrow_file::ArrowFileCodec;
pub use self::arrow_stream::ArrowStreamCodec;
pub use self::csv::CsvCodec;
pub use self::json::JsonCodec;
pub use self::registry::CodecRegistry;

use crate::config::CodecOptions;
use crate::context::BatchContext;
use crate::error::BatchlineError;
use crate::pipeline::{BatchReceiver, ByteSink};

pub const CSV_MIME: &str = "text/csv";
pub const JSON_MIME: &str = "application/json";
pub const ARROW_STREAM_MIME: &str = "application/vnd.apache.arrow.stream";
pub const ARROW_FILE_MIME: &str = "application/vnd.apache.arrow.file";

/// The schema metadata key that switches the JSON decoder to single-record mode.
pub const SINGLE_RECORD_METADATA_KEY: &str = "batchline.single_record";

/// A stateless factory binding one wire format to a schema.
pub trait Codec: Send + Sync {
    fn mime_type(&self) -> &'static str;

    fn default_file_extension(&self) -> &'static str;

    /// Binds a decoder producing batches of `target_schema`.
    fn decoder(
        &self,
        target_schema: SchemaRef,
        options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Decoder>, BatchlineError>;

    /// Binds an encoder consuming batches of `source_schema`.
    fn encoder(
        &self,
        source_schema: SchemaRef,
        options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Encoder>, BatchlineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Created,
    Started,
    Receiving,
    Completed,
    Errored,
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Bytes -> batches.
pub trait Decoder {
    fn name(&self) -> &str;

    fn state(&self) -> DecoderState;

    /// The schema of the batches this decoder loads into the context.
    fn schema(&self) -> SchemaRef;

    fn on_start(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError>;

    /// Feeds one chunk and pumps. Fails with `PreconditionViolation` while input of
    /// the previous chunk is still unconsumed.
    fn on_next(
        &mut self,
        ctx: &mut BatchContext,
        chunk: &[u8],
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError>;

    /// Re-runs the pump. Returns `true` once all fed input has been consumed.
    fn resume(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<bool, BatchlineError>;

    /// Finishes the input, flushing the last partial batch downstream.
    fn on_complete(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError>;

    fn on_error(&mut self, error: &BatchlineError);

    /// Releases resources. Returns `false` if the decoder was already closed.
    fn close(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Created,
    Started,
    Completed,
    Errored,
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Batches -> bytes.
pub trait Encoder {
    fn name(&self) -> &str;

    fn state(&self) -> EncoderState;

    /// Binds the byte sink and writes the preamble.
    fn on_start(&mut self, sink: Box<dyn ByteSink>) -> Result<(), BatchlineError>;

    /// Serializes the loaded front batch and releases it.
    fn on_batch(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError>;

    /// Writes the epilogue, flushes and closes the byte sink.
    fn on_complete(&mut self) -> Result<(), BatchlineError>;

    fn on_error(&mut self, error: &BatchlineError);

    /// Closes the byte sink if still open. Returns `false` if already closed.
    fn close(&mut self) -> bool;
}

/// Rejects a lifecycle call made in the wrong state.
pub(crate) fn illegal_call(codec: &str, call: &str, state: impl fmt::Display) -> BatchlineError {
    BatchlineError::PreconditionViolation(format!(
        "{} {} called in state {}",
        codec, call, state
    ))
}

/// Hands the loaded front batch to `downstream`, which must leave the front `Empty`.
pub(crate) fn deliver(
    codec: &str,
    ctx: &mut BatchContext,
    downstream: &mut dyn BatchReceiver,
) -> Result<(), BatchlineError> {
    log_metric!("event" = "deliver", "decoder" = codec, "flips" = ctx.stats().flips);
    downstream.on_batch(ctx)?;
    if ctx.front_state() != crate::context::BufferState::Empty {
        return Err(BatchlineError::internal(format!(
            "downstream of the {} decoder left the front buffer {}",
            codec,
            ctx.front_state()
        )));
    }
    Ok(())
}

/// Yields the thread while a decoder waits on a downstream that is not ready.
/// `stalls` counts consecutive waits; the first one of a run is logged.
pub(crate) fn backoff(codec: &str, stalls: &mut usize) {
    if *stalls == 0 {
        log::trace!("{} decoder waiting for downstream", codec);
    }
    *stalls += 1;
    std::thread::yield_now();
}

/// `true` when both schemas list the same column names and types in the same order.
pub(crate) fn same_columns(a: &SchemaRef, b: &SchemaRef) -> bool {
    a.fields().len() == b.fields().len()
        && a
            .fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}

/// Rejects batches whose columns do not match the bound schema.
pub(crate) fn check_batch_schema(
    codec: &str,
    expected: &SchemaRef,
    batch: &arrow::record_batch::RecordBatch,
) -> Result<(), BatchlineError> {
    let actual = batch.schema();
    if same_columns(&actual, expected) {
        Ok(())
    } else {
        Err(BatchlineError::DataCorruption(format!(
            "{}: batch schema {:?} does not match the bound schema {:?}",
            codec,
            actual.fields(),
            expected.fields()
        )))
    }
}

#[cfg(test)]
mod tests;
