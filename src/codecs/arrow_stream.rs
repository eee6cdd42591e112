// In: src/codecs/arrow_stream.rs

//! The Arrow IPC stream codec.
//!
//! Decoding is incremental. The decoder frames the stream itself: each message is
//! an optional continuation marker, a metadata length, the flatbuffer `Message` and
//! a body whose length the metadata declares. Only complete messages are handed to
//! `arrow::ipc::reader::StreamDecoder`, so the decoder always knows where the schema,
//! every batch and the end-of-stream marker sit. Complete messages behind a decoded
//! batch stay queued until the context has room for the next one.

use std::sync::Arc;

use arrow::buffer::Buffer;
use arrow::datatypes::SchemaRef;
use arrow::ipc::convert::fb_to_schema;
use arrow::ipc::reader::StreamDecoder;
use arrow::ipc::{root_as_message, MessageHeader};
use arrow::record_batch::RecordBatch;

use crate::codecs::ipc::{
    check_wire_schema, conform, drain_batches, le_i32, pump_batches, read_guarded, IpcEncoder,
    IpcLayout,
};
use crate::codecs::{
    backoff, illegal_call, Codec, Decoder, DecoderState, Encoder, ARROW_STREAM_MIME,
};
use crate::config::CodecOptions;
use crate::context::BatchContext;
use crate::error::BatchlineError;
use crate::pipeline::BatchReceiver;
use crate::types::compile_schema;

const NAME: &str = "arrow-stream";

const CONTINUATION: [u8; 4] = [0xFF; 4];

#[derive(Debug, Default, Clone, Copy)]
pub struct ArrowStreamCodec;

impl Codec for ArrowStreamCodec {
    fn mime_type(&self) -> &'static str {
        ARROW_STREAM_MIME
    }

    fn default_file_extension(&self) -> &'static str {
        "arrows"
    }

    fn decoder(
        &self,
        target_schema: SchemaRef,
        _options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Decoder>, BatchlineError> {
        compile_schema(&target_schema)?;
        Ok(Box::new(ArrowStreamDecoder::new(target_schema)))
    }

    fn encoder(
        &self,
        source_schema: SchemaRef,
        _options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Encoder>, BatchlineError> {
        compile_schema(&source_schema)?;
        Ok(Box::new(IpcEncoder::new(NAME, IpcLayout::Stream, source_schema)))
    }
}

//==================================================================================
// 1. Message framing
//==================================================================================

fn corrupt(what: impl std::fmt::Display) -> BatchlineError {
    BatchlineError::DataCorruption(format!("{}: {}", NAME, what))
}

#[derive(Debug)]
enum FrameKind {
    Schema(SchemaRef),
    /// A record batch or dictionary batch.
    Data,
    EndOfStream,
}

/// One message whose metadata has been read. `len` covers prefix, metadata and body.
#[derive(Debug)]
struct Frame {
    len: usize,
    kind: FrameKind,
}

/// Reads the framing of the message at the start of `bytes`.
///
/// Returns `None` while the prefix or the metadata is still incomplete. The body
/// does not have to be present yet.
fn read_frame(bytes: &[u8]) -> Result<Option<Frame>, BatchlineError> {
    let (prefix, meta_len) = match bytes.get(..4) {
        None => return Ok(None),
        Some(head) if head == CONTINUATION => match bytes.get(4..8) {
            None => return Ok(None),
            Some(len) => (8, le_i32(len)),
        },
        // Pre-1.0 streams omit the continuation marker.
        Some(len) => (4, le_i32(len)),
    };
    let meta_len = usize::try_from(meta_len)
        .map_err(|_| corrupt(format!("negative metadata length {}", meta_len)))?;
    if meta_len == 0 {
        return Ok(Some(Frame {
            len: prefix,
            kind: FrameKind::EndOfStream,
        }));
    }
    let Some(meta) = bytes.get(prefix..prefix + meta_len) else {
        return Ok(None);
    };
    let message =
        root_as_message(meta).map_err(|e| corrupt(format!("invalid message metadata: {}", e)))?;
    let body = usize::try_from(message.bodyLength())
        .map_err(|_| corrupt(format!("invalid body length {}", message.bodyLength())))?;
    let len = (prefix + meta_len)
        .checked_add(body)
        .ok_or_else(|| corrupt(format!("body length {} overflows", body)))?;

    let header = message.header_type();
    let kind = if header == MessageHeader::Schema {
        let fb = message
            .header_as_schema()
            .ok_or_else(|| corrupt("schema message without a schema"))?;
        let schema = read_guarded(NAME, || Ok(fb_to_schema(fb)))?;
        FrameKind::Schema(Arc::new(schema))
    } else if header == MessageHeader::RecordBatch || header == MessageHeader::DictionaryBatch {
        FrameKind::Data
    } else {
        return Err(corrupt(format!("unexpected message type {:?}", header)));
    };
    Ok(Some(Frame { len, kind }))
}

/// The wire side of the decoder: buffered bytes, the framing cursor and the
/// Arrow decoder that turns complete messages into batches.
struct WireReader {
    target: SchemaRef,
    decoder: StreamDecoder,
    /// Fed bytes not yet handed to `decoder`.
    pending: Vec<u8>,
    /// The framing of the message at the head of `pending`, once its metadata arrived.
    frame: Option<Frame>,
    wire_schema: Option<SchemaRef>,
    ended: bool,
    messages: usize,
}

impl WireReader {
    fn new(target: SchemaRef) -> Self {
        Self {
            target,
            decoder: StreamDecoder::new(),
            pending: Vec::new(),
            frame: None,
            wire_schema: None,
            ended: false,
            messages: 0,
        }
    }

    /// Takes the head message if all of its bytes are buffered.
    fn next_frame(&mut self) -> Result<Option<Frame>, BatchlineError> {
        if self.frame.is_none() {
            if self.pending.is_empty() {
                return Ok(None);
            }
            if self.ended {
                return Err(corrupt(format!(
                    "{} bytes after the end-of-stream marker",
                    self.pending.len()
                )));
            }
            self.frame = read_frame(&self.pending)?;
        }
        match self.frame.take() {
            Some(frame) if frame.len <= self.pending.len() => Ok(Some(frame)),
            other => {
                self.frame = other;
                Ok(None)
            }
        }
    }

    /// Runs complete messages through the decoder until one yields a batch.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>, BatchlineError> {
        while let Some(frame) = self.next_frame()? {
            let message: Vec<u8> = self.pending.drain(..frame.len).collect();
            self.messages += 1;
            match frame.kind {
                FrameKind::EndOfStream => {
                    self.ended = true;
                }
                FrameKind::Schema(found) => {
                    if self.wire_schema.is_some() {
                        return Err(corrupt("a second schema message"));
                    }
                    check_wire_schema(NAME, &self.target, &found)?;
                    self.wire_schema = Some(found);
                    self.decode(message)?;
                }
                FrameKind::Data => {
                    if self.wire_schema.is_none() {
                        return Err(corrupt("a batch message before the schema message"));
                    }
                    if let Some(batch) = self.decode(message)? {
                        return Ok(Some(batch));
                    }
                }
            }
        }
        Ok(None)
    }

    fn decode(&mut self, message: Vec<u8>) -> Result<Option<RecordBatch>, BatchlineError> {
        let Self {
            target, decoder, ..
        } = self;
        read_guarded(NAME, || {
            let mut buffer = Buffer::from_vec(message);
            let mut decoded = None;
            while !buffer.is_empty() && decoded.is_none() {
                let before = buffer.len();
                decoded = decoder
                    .decode(&mut buffer)
                    .map_err(|e| BatchlineError::corrupt_arrow(NAME, e))?;
                if buffer.len() == before {
                    break;
                }
            }
            if !buffer.is_empty() {
                return Err(corrupt("a message longer than its declared body"));
            }
            decoded.map(|batch| conform(NAME, target, batch)).transpose()
        })
    }

    /// Fails unless the stream held a schema and ended with its marker.
    fn finish(&self) -> Result<(), BatchlineError> {
        if !self.pending.is_empty() {
            return Err(BatchlineError::DataCorruption(format!(
                "incomplete input: the arrow stream ended inside a message ({} bytes left over)",
                self.pending.len()
            )));
        }
        if self.wire_schema.is_none() {
            return Err(BatchlineError::DataCorruption(
                "incomplete input: the arrow stream ended before its schema message".to_string(),
            ));
        }
        if !self.ended {
            return Err(BatchlineError::DataCorruption(
                "incomplete input: the arrow stream ended without its end-of-stream marker"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

//==================================================================================
// 2. Decoder
//==================================================================================

pub struct ArrowStreamDecoder {
    schema: SchemaRef,
    state: DecoderState,
    wire: WireReader,
    /// `false` while complete messages of the last chunk are still queued.
    drained: bool,
    bytes_fed: usize,
    closed: bool,
}

impl std::fmt::Debug for ArrowStreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrowStreamDecoder")
            .field("state", &self.state)
            .field("pending", &self.wire.pending.len())
            .field("messages", &self.wire.messages)
            .field("bytes_fed", &self.bytes_fed)
            .finish()
    }
}

impl ArrowStreamDecoder {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            wire: WireReader::new(schema.clone()),
            schema,
            state: DecoderState::Created,
            drained: true,
            bytes_fed: 0,
            closed: false,
        }
    }

    fn pump(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<bool, BatchlineError> {
        let wire = &mut self.wire;
        self.drained = pump_batches(NAME, ctx, downstream, || wire.next_batch())?;
        Ok(self.drained)
    }

    fn guard<T>(&mut self, result: Result<T, BatchlineError>) -> Result<T, BatchlineError> {
        if result.is_err() {
            self.state = DecoderState::Errored;
        }
        result
    }

    fn complete(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        if self.bytes_fed == 0 {
            return Err(BatchlineError::DataCorruption(
                "empty input: the arrow-stream decoder received no bytes".to_string(),
            ));
        }
        let mut stalls = 0;
        while !self.pump(ctx, downstream)? {
            backoff(NAME, &mut stalls);
        }
        self.wire.finish()?;
        drain_batches(NAME, ctx, downstream)
    }

    fn release(&mut self) {
        self.wire = WireReader::new(self.schema.clone());
        self.drained = true;
    }
}

impl Decoder for ArrowStreamDecoder {
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
        log::debug!("{} decoder started", NAME);
        Ok(())
    }

    fn on_next(
        &mut self,
        ctx: &mut BatchContext,
        chunk: &[u8],
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        if !matches!(self.state, DecoderState::Started | DecoderState::Receiving) {
            return Err(illegal_call(NAME, "on_next", self.state));
        }
        if !self.drained {
            return Err(BatchlineError::PreconditionViolation(format!(
                "{} decoder fed a new chunk before the previous one was consumed",
                NAME
            )));
        }
        self.wire.pending.extend_from_slice(chunk);
        self.bytes_fed += chunk.len();
        self.state = DecoderState::Receiving;
        log::trace!("{} decoder received {} bytes", NAME, chunk.len());
        let result = self.pump(ctx, downstream).map(|_| ());
        self.guard(result)
    }

    fn resume(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<bool, BatchlineError> {
        if !matches!(self.state, DecoderState::Started | DecoderState::Receiving) {
            return Err(illegal_call(NAME, "resume", self.state));
        }
        let result = self.pump(ctx, downstream);
        self.guard(result)
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
            "{} decoder completed: {} bytes, {} messages, {} batches",
            NAME,
            self.bytes_fed,
            self.wire.messages,
            ctx.stats().batches_unloaded
        );
        self.release();
        Ok(())
    }

    fn on_error(&mut self, error: &BatchlineError) {
        if self.state == DecoderState::Completed {
            return;
        }
        log::debug!("{} decoder errored: {}", NAME, error);
        self.state = DecoderState::Errored;
        self.release();
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.release();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    use crate::api::encode_batches;
    use crate::error::ErrorKind;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]))
    }

    fn stream(batches: usize) -> Vec<u8> {
        let batches = (0..batches)
            .map(|i| {
                RecordBatch::try_new(schema(), vec![Arc::new(Int64Array::from(vec![i as i64]))])
                    .unwrap()
            })
            .collect();
        encode_batches(ARROW_STREAM_MIME, schema(), batches, Arc::new(CodecOptions::default()))
            .unwrap()
    }

    /// Byte length of every message in `bytes`, in order.
    fn message_lengths(mut bytes: &[u8]) -> Vec<usize> {
        let mut lengths = Vec::new();
        while !bytes.is_empty() {
            let frame = read_frame(bytes).unwrap().unwrap();
            lengths.push(frame.len);
            bytes = &bytes[frame.len..];
        }
        lengths
    }

    #[test]
    fn test_frames_cover_schema_batches_and_end_marker() {
        let bytes = stream(2);
        let lengths = message_lengths(&bytes);
        assert_eq!(lengths.len(), 4);
        assert_eq!(*lengths.last().unwrap(), 8);
        assert_eq!(lengths.iter().sum::<usize>(), bytes.len());

        let first = read_frame(&bytes).unwrap().unwrap();
        match first.kind {
            FrameKind::Schema(found) => assert_eq!(found.fields(), schema().fields()),
            other => panic!("expected the schema message first, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_prefix_or_metadata_needs_more_input() {
        let bytes = stream(1);
        for cut in [0, 3, 7, 12] {
            assert!(read_frame(&bytes[..cut]).unwrap().is_none(), "cut {}", cut);
        }
    }

    #[test]
    fn test_negative_metadata_length_is_corrupt() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x80];
        let err = read_frame(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataCorruption);
    }

    #[test]
    fn test_missing_end_marker_is_caught_when_the_body_looks_like_one() {
        // 0xFFFF_FFFF as a little-endian i64 ends the batch body with FF FF FF FF 00 00 00 00.
        let batch =
            RecordBatch::try_new(schema(), vec![Arc::new(Int64Array::from(vec![0xFFFF_FFFFi64]))])
                .unwrap();
        let bytes = encode_batches(
            ARROW_STREAM_MIME,
            schema(),
            vec![batch],
            Arc::new(CodecOptions::default()),
        )
        .unwrap();
        let truncated = &bytes[..bytes.len() - 8];
        assert_eq!(truncated[truncated.len() - 8..], [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);

        let err = crate::api::decode_bytes(
            ARROW_STREAM_MIME,
            schema(),
            truncated,
            5,
            Arc::new(CodecOptions::default()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataCorruption);
        assert!(err.to_string().contains("end-of-stream marker"), "{}", err);
    }

    #[test]
    fn test_bytes_after_the_end_marker_are_corrupt() {
        let mut bytes = stream(1);
        bytes.extend_from_slice(&stream(1));
        let err = crate::api::decode_bytes(
            ARROW_STREAM_MIME,
            schema(),
            &bytes,
            0,
            Arc::new(CodecOptions::default()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataCorruption);
        assert!(err.to_string().contains("end-of-stream"), "{}", err);
    }
}
