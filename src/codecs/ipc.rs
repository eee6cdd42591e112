// In: src/codecs/ipc.rs

//! Pieces shared by the Arrow IPC stream and file codecs.
//!
//! Binary decoders produce whole batches rather than rows, so they skip the
//! row-level back-buffer loading and hand complete batches to
//! `BatchContext::load_batch`. The flip/deliver loop is the same as in the text
//! decoder.

use std::panic::{catch_unwind, AssertUnwindSafe};

use arrow::datatypes::SchemaRef;
use arrow::ipc::writer::{FileWriter, StreamWriter};
use arrow::record_batch::RecordBatch;

use crate::codecs::{
    backoff, check_batch_schema, deliver, illegal_call, same_columns, Encoder, EncoderState,
};
use crate::context::{BatchContext, BufferState};
use crate::error::BatchlineError;
use crate::pipeline::{BatchReceiver, ByteSink};
use crate::types::compile_schema;
use crate::utils::SharedBuffer;

//==================================================================================
// 1. Decode side
//==================================================================================

/// Runs flip/deliver/load until the back slot is occupied or `next` runs dry.
///
/// Returns `true` when `next` returned `None`, i.e. every available batch was loaded.
pub(crate) fn pump_batches<F>(
    codec: &str,
    ctx: &mut BatchContext,
    downstream: &mut dyn BatchReceiver,
    mut next: F,
) -> Result<bool, BatchlineError>
where
    F: FnMut() -> Result<Option<RecordBatch>, BatchlineError>,
{
    loop {
        if ctx.can_flip() {
            ctx.flip()?;
            continue;
        }
        if ctx.front_ready() && downstream.ready() {
            deliver(codec, ctx, downstream)?;
            continue;
        }
        if ctx.back_state() != BufferState::Empty {
            return Ok(false);
        }
        match next()? {
            Some(batch) => ctx.load_batch(batch)?,
            None => return Ok(true),
        }
    }
}

/// Delivers whatever is still held in the context once the source is exhausted.
pub(crate) fn drain_batches(
    codec: &str,
    ctx: &mut BatchContext,
    downstream: &mut dyn BatchReceiver,
) -> Result<(), BatchlineError> {
    let mut stalls = 0;
    loop {
        if ctx.can_flip() {
            ctx.flip()?;
        } else if ctx.front_ready() {
            if downstream.ready() {
                deliver(codec, ctx, downstream)?;
                stalls = 0;
            } else {
                backoff(codec, &mut stalls);
            }
        } else {
            return Ok(());
        }
    }
}

/// Runs an Arrow IPC read. Arrow asserts on some malformed buffers instead of
/// returning an error, so a panic here is reported as DataCorruption.
pub(crate) fn read_guarded<T, F>(codec: &str, read: F) -> Result<T, BatchlineError>
where
    F: FnOnce() -> Result<T, BatchlineError>,
{
    catch_unwind(AssertUnwindSafe(read)).unwrap_or_else(|payload| {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        log::debug!("{}: arrow panicked on malformed input: {}", codec, msg);
        Err(BatchlineError::DataCorruption(format!(
            "{}: malformed input: {}",
            codec, msg
        )))
    })
}

/// Little-endian i32 at the start of `bytes`, which holds at least four bytes.
pub(crate) fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Checks that the schema found in the stream is the one the decoder is bound to.
pub(crate) fn check_wire_schema(
    codec: &str,
    expected: &SchemaRef,
    found: &SchemaRef,
) -> Result<(), BatchlineError> {
    if same_columns(found, expected) {
        Ok(())
    } else {
        Err(BatchlineError::DataCorruption(format!(
            "{}: input schema {:?} does not match the target schema {:?}",
            codec,
            found.fields(),
            expected.fields()
        )))
    }
}

/// Rebinds a decoded batch to the target schema, which also enforces nullability.
pub(crate) fn conform(
    codec: &str,
    target: &SchemaRef,
    batch: RecordBatch,
) -> Result<RecordBatch, BatchlineError> {
    check_wire_schema(codec, target, &batch.schema())?;
    RecordBatch::try_new(target.clone(), batch.columns().to_vec())
        .map_err(|e| BatchlineError::corrupt_arrow(codec, e))
}

//==================================================================================
// 2. Encode side
//==================================================================================

pub(crate) enum IpcWriter {
    Stream(StreamWriter<SharedBuffer>),
    File(FileWriter<SharedBuffer>),
}

impl IpcWriter {
    fn write(&mut self, batch: &RecordBatch) -> Result<(), arrow::error::ArrowError> {
        match self {
            Self::Stream(w) => w.write(batch),
            Self::File(w) => w.write(batch),
        }
    }

    fn finish(&mut self) -> Result<(), arrow::error::ArrowError> {
        match self {
            Self::Stream(w) => w.finish(),
            Self::File(w) => w.finish(),
        }
    }
}

/// Which IPC container an [`IpcEncoder`] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IpcLayout {
    Stream,
    File,
}

/// Encoder for both IPC containers. The Arrow writer emits into a shared buffer
/// that is drained into the byte sink after every call.
pub(crate) struct IpcEncoder {
    name: &'static str,
    layout: IpcLayout,
    schema: SchemaRef,
    buffer: SharedBuffer,
    writer: Option<IpcWriter>,
    sink: Option<Box<dyn ByteSink>>,
    state: EncoderState,
    closed: bool,
    batches_written: usize,
}

impl IpcEncoder {
    pub(crate) fn new(name: &'static str, layout: IpcLayout, schema: SchemaRef) -> Self {
        Self {
            name,
            layout,
            schema,
            buffer: SharedBuffer::new(),
            writer: None,
            sink: None,
            state: EncoderState::Created,
            closed: false,
            batches_written: 0,
        }
    }

    fn forward(&mut self) -> Result<(), BatchlineError> {
        let bytes = self.buffer.take();
        if bytes.is_empty() {
            return Ok(());
        }
        let name = self.name;
        self.sink
            .as_mut()
            .ok_or_else(|| BatchlineError::internal(format!("{} encoder has no byte sink", name)))?
            .write_chunk(&bytes)
    }

    fn writer(&mut self) -> Result<&mut IpcWriter, BatchlineError> {
        let name = self.name;
        self.writer
            .as_mut()
            .ok_or_else(|| BatchlineError::internal(format!("{} encoder has no writer", name)))
    }

    fn start(&mut self) -> Result<(), BatchlineError> {
        let columns = compile_schema(&self.schema)?;
        if self.layout == IpcLayout::Stream
            && columns.iter().any(|c| c.column_type.contains_dictionary())
        {
            return Err(BatchlineError::internal(format!(
                "{}: dictionary-encoded columns cannot be written to an IPC stream",
                self.name
            )));
        }
        let target = self.buffer.clone();
        let writer = match self.layout {
            IpcLayout::Stream => StreamWriter::try_new(target, &self.schema).map(IpcWriter::Stream),
            IpcLayout::File => FileWriter::try_new(target, &self.schema).map(IpcWriter::File),
        }
        .map_err(|e| BatchlineError::internal_arrow(self.name, e))?;
        self.writer = Some(writer);
        self.forward()
    }

    fn encode_front(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        let batch = ctx.begin_unload()?;
        check_batch_schema(self.name, &self.schema, &batch)?;
        let name = self.name;
        self.writer()?
            .write(&batch)
            .map_err(|e| BatchlineError::internal_arrow(name, e))?;
        self.forward()?;
        self.batches_written += 1;
        log_metric!("event" = "encode", "encoder" = name, "rows" = batch.num_rows());
        ctx.finish_unload()
    }

    fn finish(&mut self) -> Result<(), BatchlineError> {
        let name = self.name;
        self.writer()?
            .finish()
            .map_err(|e| BatchlineError::internal_arrow(name, e))?;
        self.forward()?;
        self.writer = None;
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| BatchlineError::internal("completed encoder has no byte sink"))?;
        sink.flush()?;
        sink.close()
    }

    fn guard<T>(&mut self, result: Result<T, BatchlineError>) -> Result<T, BatchlineError> {
        if result.is_err() {
            self.state = EncoderState::Errored;
        }
        result
    }
}

impl Encoder for IpcEncoder {
    fn name(&self) -> &str {
        self.name
    }

    fn state(&self) -> EncoderState {
        self.state
    }

    fn on_start(&mut self, sink: Box<dyn ByteSink>) -> Result<(), BatchlineError> {
        if self.state != EncoderState::Created {
            return Err(illegal_call(self.name, "on_start", self.state));
        }
        self.sink = Some(sink);
        let result = self.start();
        self.guard(result)?;
        self.state = EncoderState::Started;
        log::debug!("{} encoder started", self.name);
        Ok(())
    }

    fn on_batch(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        if self.state != EncoderState::Started {
            return Err(illegal_call(self.name, "on_batch", self.state));
        }
        let result = self.encode_front(ctx);
        self.guard(result)
    }

    fn on_complete(&mut self) -> Result<(), BatchlineError> {
        if self.state != EncoderState::Started {
            return Err(illegal_call(self.name, "on_complete", self.state));
        }
        let result = self.finish();
        self.guard(result)?;
        self.state = EncoderState::Completed;
        log::debug!(
            "{} encoder completed: {} batches",
            self.name,
            self.batches_written
        );
        Ok(())
    }

    fn on_error(&mut self, error: &BatchlineError) {
        if self.state == EncoderState::Completed {
            return;
        }
        log::debug!("{} encoder errored: {}", self.name, error);
        self.state = EncoderState::Errored;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                log::warn!("{} encoder: closing the byte sink failed: {}", self.name, e);
            }
        }
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.writer = None;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                log::warn!("{} encoder: closing the byte sink failed: {}", self.name, e);
            }
        }
        true
    }
}
