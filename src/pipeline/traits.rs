// In: src/pipeline/traits.rs

//! Defines the contracts between the orchestrator and its participants.
//!
//! Byte-level collaborators (`ByteSource`, `ByteSink`, `BatchSource`) are what the
//! hosting service implements. Batch-level participants (`Stage`, `Sink`) see the
//! run's `BatchContext`. Every participant follows the same lifecycle:
//! `on_start -> (on_next | on_batch)* -> (on_complete | on_error)`, then `close`
//! exactly once.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::context::BatchContext;
use crate::error::BatchlineError;

//==================================================================================
// 1. External collaborators
//==================================================================================

/// A pull-based producer of raw bytes (a socket, a file, an upload).
pub trait ByteSource {
    /// Returns the next chunk, or `None` once the source is exhausted.
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, BatchlineError>;

    /// Asks the source to stop producing. Called when the run fails or is cancelled.
    fn stop(&mut self) {}
}

/// A consumer of encoded bytes.
pub trait ByteSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), BatchlineError>;
    fn flush(&mut self) -> Result<(), BatchlineError>;
    /// Called exactly once, after the final `flush` or after an error.
    fn close(&mut self) -> Result<(), BatchlineError>;
}

/// A pull-based producer of ready-made batches.
pub trait BatchSource {
    fn schema(&self) -> SchemaRef;
    fn next_batch(&mut self) -> Result<Option<RecordBatch>, BatchlineError>;
    fn stop(&mut self) {}
}

//==================================================================================
// 2. Batch-level participants
//==================================================================================

/// The downstream end of a decoder: receives the front batch of the context.
pub trait BatchReceiver {
    /// `true` when the receiver can take a batch now. Polling may let the receiver
    /// make progress, hence `&mut self`.
    fn ready(&mut self) -> bool;

    /// Consumes the loaded front batch. On return the front must be `Empty`.
    fn on_batch(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError>;
}

/// A transform between the decoder and the sink. It rewrites the front batch in
/// place and never holds batches of its own.
pub trait Stage {
    fn name(&self) -> &str;

    /// Receives the upstream schema and returns the schema it produces.
    fn on_start(&mut self, schema: SchemaRef) -> Result<SchemaRef, BatchlineError> {
        Ok(schema)
    }

    fn on_batch(&mut self, batch: RecordBatch) -> Result<RecordBatch, BatchlineError>;

    fn on_complete(&mut self) -> Result<(), BatchlineError> {
        Ok(())
    }

    fn on_error(&mut self, _error: &BatchlineError) {}

    fn close(&mut self) {}
}

/// The terminal participant of a pipeline.
pub trait Sink: BatchReceiver {
    fn name(&self) -> &str;
    fn on_start(&mut self, schema: SchemaRef) -> Result<(), BatchlineError>;
    fn on_complete(&mut self) -> Result<(), BatchlineError>;
    fn on_error(&mut self, error: &BatchlineError);
    fn close(&mut self);
}
