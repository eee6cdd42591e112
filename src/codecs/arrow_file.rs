// In: src/codecs/arrow_file.rs

//! The Arrow IPC file codec.
//!
//! The file layout is footer-indexed and needs random access, so the decoder
//! buffers every chunk and only opens the `FileReader` at `on_complete`. Before
//! that, the footer's block table is checked against the bytes actually received.
//! Batches are then emitted in file order under the usual backpressure.

use std::io::Cursor;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::FileReader;
use arrow::ipc::root_as_footer;

use crate::codecs::ipc::{
    check_wire_schema, conform, drain_batches, le_i32, pump_batches, read_guarded, IpcEncoder,
    IpcLayout,
};
use crate::codecs::{
    backoff, illegal_call, Codec, Decoder, DecoderState, Encoder, ARROW_FILE_MIME,
};
use crate::config::CodecOptions;
use crate::context::BatchContext;
use crate::error::BatchlineError;
use crate::pipeline::BatchReceiver;
use crate::types::compile_schema;

const NAME: &str = "arrow-file";

const MAGIC: &[u8] = b"ARROW1";

/// Leading magic plus padding.
const HEADER_LEN: usize = 8;

/// Footer length plus trailing magic.
const TRAILER_LEN: usize = 4 + 6;

fn corrupt(what: impl std::fmt::Display) -> BatchlineError {
    BatchlineError::DataCorruption(format!("{}: {}", NAME, what))
}

/// Checks the magic, the footer and that every block the footer lists lies inside
/// the data section.
fn check_layout(bytes: &[u8]) -> Result<(), BatchlineError> {
    if bytes.len() < HEADER_LEN + TRAILER_LEN
        || !bytes.starts_with(MAGIC)
        || !bytes.ends_with(MAGIC)
    {
        return Err(corrupt("incomplete input: missing the ARROW1 magic"));
    }
    let trailer = bytes.len() - TRAILER_LEN;
    let footer_len = le_i32(&bytes[trailer..]);
    let footer_start = usize::try_from(footer_len)
        .ok()
        .filter(|&len| len > 0 && len <= trailer - HEADER_LEN)
        .map(|len| trailer - len)
        .ok_or_else(|| corrupt(format!("invalid footer length {}", footer_len)))?;
    let footer = root_as_footer(&bytes[footer_start..trailer])
        .map_err(|e| corrupt(format!("invalid footer: {}", e)))?;

    let blocks = footer
        .dictionaries()
        .into_iter()
        .flatten()
        .chain(footer.recordBatches().into_iter().flatten());
    for block in blocks {
        let offset = usize::try_from(block.offset()).ok();
        let meta = usize::try_from(block.metaDataLength()).ok();
        let body = usize::try_from(block.bodyLength()).ok();
        let end = match (offset, meta, body) {
            (Some(offset), Some(meta), Some(body)) if offset >= HEADER_LEN => {
                offset.checked_add(meta).and_then(|e| e.checked_add(body))
            }
            _ => None,
        };
        if !matches!(end, Some(end) if end <= footer_start) {
            return Err(corrupt(format!(
                "block at offset {} ({} + {} bytes) lies outside the data section",
                block.offset(),
                block.metaDataLength(),
                block.bodyLength()
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ArrowFileCodec;

impl Codec for ArrowFileCodec {
    fn mime_type(&self) -> &'static str {
        ARROW_FILE_MIME
    }

    fn default_file_extension(&self) -> &'static str {
        "arrow"
    }

    fn decoder(
        &self,
        target_schema: SchemaRef,
        _options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Decoder>, BatchlineError> {
        compile_schema(&target_schema)?;
        Ok(Box::new(ArrowFileDecoder::new(target_schema)))
    }

    fn encoder(
        &self,
        source_schema: SchemaRef,
        _options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Encoder>, BatchlineError> {
        compile_schema(&source_schema)?;
        Ok(Box::new(IpcEncoder::new(NAME, IpcLayout::File, source_schema)))
    }
}

#[derive(Debug)]
pub struct ArrowFileDecoder {
    schema: SchemaRef,
    state: DecoderState,
    bytes: Vec<u8>,
    closed: bool,
}

impl ArrowFileDecoder {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            state: DecoderState::Created,
            bytes: Vec::new(),
            closed: false,
        }
    }

    fn complete(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        if self.bytes.is_empty() {
            return Err(BatchlineError::DataCorruption(
                "empty input: the arrow-file decoder received no bytes".to_string(),
            ));
        }
        let bytes = std::mem::take(&mut self.bytes);
        check_layout(&bytes)?;
        let mut reader = read_guarded(NAME, || {
            FileReader::try_new(Cursor::new(bytes), None)
                .map_err(|e| BatchlineError::corrupt_arrow(NAME, e))
        })?;
        check_wire_schema(NAME, &self.schema, &reader.schema())?;
        log::debug!("{} decoder opened a file of {} batches", NAME, reader.num_batches());

        let schema = self.schema.clone();
        let mut next = || {
            read_guarded(NAME, || match reader.next() {
                Some(batch) => {
                    let batch = batch.map_err(|e| BatchlineError::corrupt_arrow(NAME, e))?;
                    conform(NAME, &schema, batch).map(Some)
                }
                None => Ok(None),
            })
        };
        let mut stalls = 0;
        while !pump_batches(NAME, ctx, downstream, &mut next)? {
            backoff(NAME, &mut stalls);
        }
        drain_batches(NAME, ctx, downstream)
    }

    fn guard<T>(&mut self, result: Result<T, BatchlineError>) -> Result<T, BatchlineError> {
        if result.is_err() {
            self.state = DecoderState::Errored;
        }
        result
    }
}

impl Decoder for ArrowFileDecoder {
    fn name(&self) -> &str {
        NAME
    }

    fn state(&self) -> DecoderState {
        self.state
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn on_start(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        if self.state != DecoderState::Created || self.closed {
            return Err(illegal_call(NAME, "on_start", self.state));
        }
        if ctx.schema().fields() != self.schema.fields() {
            return Err(BatchlineError::PreconditionViolation(format!(
                "{} decoder bound to a context of a different schema",
                NAME
            )));
        }
        self.state = DecoderState::Started;
        Ok(())
    }

    fn on_next(
        &mut self,
        _ctx: &mut BatchContext,
        chunk: &[u8],
        _downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        if !matches!(self.state, DecoderState::Started | DecoderState::Receiving) {
            return Err(illegal_call(NAME, "on_next", self.state));
        }
        self.bytes.extend_from_slice(chunk);
        self.state = DecoderState::Receiving;
        Ok(())
    }

    fn resume(
        &mut self,
        _ctx: &mut BatchContext,
        _downstream: &mut dyn BatchReceiver,
    ) -> Result<bool, BatchlineError> {
        if !matches!(self.state, DecoderState::Started | DecoderState::Receiving) {
            return Err(illegal_call(NAME, "resume", self.state));
        }
        Ok(true)
    }

    fn on_complete(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        if !matches!(self.state, DecoderState::Started | DecoderState::Receiving) {
            return Err(illegal_call(NAME, "on_complete", self.state));
        }
        let result = self.complete(ctx, downstream);
        self.guard(result)?;
        self.state = DecoderState::Completed;
        log::debug!(
            "{} decoder completed: {} batches delivered",
            NAME,
            ctx.stats().batches_unloaded
        );
        Ok(())
    }

    fn on_error(&mut self, error: &BatchlineError) {
        if self.state == DecoderState::Completed {
            return;
        }
        log::debug!("{} decoder errored: {}", NAME, error);
        self.state = DecoderState::Errored;
        self.bytes = Vec::new();
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.bytes = Vec::new();
        true
    }
}
