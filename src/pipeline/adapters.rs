// In: src/pipeline/adapters.rs

//! Ready-made sources, sinks and stages for the common cases: in-memory bytes,
//! `std::io` readers and writers, collected batches and encoder-backed sinks.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::Rc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::codecs::Encoder;
use crate::context::BatchContext;
use crate::error::BatchlineError;
use crate::pipeline::traits::{BatchReceiver, BatchSource, ByteSink, ByteSource, Sink, Stage};
use crate::utils::SharedBuffer;

const DEFAULT_READ_CHUNK: usize = 64 * 1024;

//==================================================================================
// 1. Byte sources
//==================================================================================

/// Serves an in-memory byte string in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct ChunkedByteSource {
    data: Vec<u8>,
    chunk_size: usize,
    pos: usize,
    stopped: bool,
}

impl ChunkedByteSource {
    /// A `chunk_size` of zero serves everything as one chunk.
    pub fn new(data: impl Into<Vec<u8>>, chunk_size: usize) -> Self {
        let data = data.into();
        let chunk_size = if chunk_size == 0 { data.len().max(1) } else { chunk_size };
        Self {
            data,
            chunk_size,
            pos: 0,
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl ByteSource for ChunkedByteSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, BatchlineError> {
        if self.stopped || self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(chunk))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Pulls chunks from any `std::io::Read`.
#[derive(Debug)]
pub struct ReaderByteSource<R: Read> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ReaderByteSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_READ_CHUNK)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }
}

impl<R: Read> ByteSource for ReaderByteSource<R> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, BatchlineError> {
        if self.done {
            return Ok(None);
        }
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.done = true;
                    return Ok(None);
                }
                Ok(n) => {
                    chunk.truncate(n);
                    return Ok(Some(chunk));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn stop(&mut self) {
        self.done = true;
    }
}

//==================================================================================
// 2. Byte sinks
//==================================================================================

/// Writes encoded bytes to any `std::io::Write`.
#[derive(Debug)]
pub struct WriterByteSink<W: Write> {
    writer: W,
    closed: bool,
}

impl<W: Write> WriterByteSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }
}

impl<W: Write> ByteSink for WriterByteSink<W> {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), BatchlineError> {
        if self.closed {
            return Err(BatchlineError::PreconditionViolation(
                "write to a closed byte sink".to_string(),
            ));
        }
        self.writer.write_all(chunk)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BatchlineError> {
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BatchlineError> {
        if !self.closed {
            self.closed = true;
            self.writer.flush()?;
        }
        Ok(())
    }
}

/// An in-memory byte sink whose contents stay readable through any clone.
#[derive(Debug, Clone, Default)]
pub struct SharedVecSink {
    buffer: SharedBuffer,
    closes: Rc<Cell<usize>>,
}

impl SharedVecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// How many times `close` was called on this sink or one of its clones.
    pub fn close_count(&self) -> usize {
        self.closes.get()
    }
}

impl ByteSink for SharedVecSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), BatchlineError> {
        self.buffer.write_all(chunk)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BatchlineError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), BatchlineError> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

//==================================================================================
// 3. Batch sources and sinks
//==================================================================================

/// Serves a fixed list of batches.
#[derive(Debug)]
pub struct VecBatchSource {
    schema: SchemaRef,
    batches: VecDeque<RecordBatch>,
}

impl VecBatchSource {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            schema,
            batches: batches.into(),
        }
    }
}

impl BatchSource for VecBatchSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>, BatchlineError> {
        Ok(self.batches.pop_front())
    }

    fn stop(&mut self) {
        self.batches.clear();
    }
}

/// Collects every delivered batch; read them back through [`CollectingSink::handle`].
#[derive(Debug, Default)]
pub struct CollectingSink {
    batches: Rc<RefCell<Vec<RecordBatch>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access to the collected batches, valid after the sink moved into a pipeline.
    pub fn handle(&self) -> Rc<RefCell<Vec<RecordBatch>>> {
        self.batches.clone()
    }
}

impl BatchReceiver for CollectingSink {
    fn ready(&mut self) -> bool {
        true
    }

    fn on_batch(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        let batch = ctx.begin_unload()?;
        self.batches.borrow_mut().push(batch);
        ctx.finish_unload()
    }
}

impl Sink for CollectingSink {
    fn name(&self) -> &str {
        "collect"
    }

    fn on_start(&mut self, _schema: SchemaRef) -> Result<(), BatchlineError> {
        Ok(())
    }

    fn on_complete(&mut self) -> Result<(), BatchlineError> {
        Ok(())
    }

    fn on_error(&mut self, _error: &BatchlineError) {}

    fn close(&mut self) {}
}

/// Terminates a pipeline with an encoder writing into a byte sink.
pub struct EncoderSink {
    encoder: Box<dyn Encoder>,
    byte_sink: Option<Box<dyn ByteSink>>,
}

impl EncoderSink {
    pub fn new(encoder: Box<dyn Encoder>, byte_sink: Box<dyn ByteSink>) -> Self {
        Self {
            encoder,
            byte_sink: Some(byte_sink),
        }
    }
}

impl BatchReceiver for EncoderSink {
    fn ready(&mut self) -> bool {
        true
    }

    fn on_batch(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        self.encoder.on_batch(ctx)
    }
}

impl Sink for EncoderSink {
    fn name(&self) -> &str {
        self.encoder.name()
    }

    fn on_start(&mut self, _schema: SchemaRef) -> Result<(), BatchlineError> {
        let byte_sink = self.byte_sink.take().ok_or_else(|| {
            BatchlineError::PreconditionViolation("encoder sink started twice".to_string())
        })?;
        self.encoder.on_start(byte_sink)
    }

    fn on_complete(&mut self) -> Result<(), BatchlineError> {
        self.encoder.on_complete()
    }

    fn on_error(&mut self, error: &BatchlineError) {
        self.encoder.on_error(error);
    }

    fn close(&mut self) {
        self.encoder.close();
    }
}

//==================================================================================
// 4. Stages
//==================================================================================

/// A transform stage built from a closure.
pub struct MapStage<F>
where
    F: FnMut(RecordBatch) -> Result<RecordBatch, BatchlineError>,
{
    name: String,
    f: F,
}

impl<F> MapStage<F>
where
    F: FnMut(RecordBatch) -> Result<RecordBatch, BatchlineError>,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Stage for MapStage<F>
where
    F: FnMut(RecordBatch) -> Result<RecordBatch, BatchlineError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_batch(&mut self, batch: RecordBatch) -> Result<RecordBatch, BatchlineError> {
        (self.f)(batch)
    }
}
