// In: src/text/decoder.rs

//! The streaming text decoder shared by the CSV and JSON codecs.
//!
//! State machine: `Created -> Started -> Receiving -> {Completed | Errored}`.
//!
//! All work happens in `pump`, which repeats three moves until none applies:
//!
//! 1. flip, when back is `Loaded` and front is `Empty`;
//! 2. deliver front downstream, when front is `Loaded` and downstream is ready;
//! 3. decode one record into back, while input remains and back is not full.
//!
//! It stops when no token can complete without more input, or when back is full
//! and the front batch is still waiting for the downstream.

use arrow::datatypes::SchemaRef;

use crate::codecs::{backoff, deliver, illegal_call, Decoder, DecoderState};
use crate::config::CsvOptions;
use crate::consumers::{RecordReader, RecordStep};
use crate::context::{BatchContext, BufferState};
use crate::error::BatchlineError;
use crate::pipeline::BatchReceiver;
use crate::text::csv_lexer::CsvLexer;
use crate::text::json_lexer::JsonLexer;
use crate::text::token::{Lexer, TokenCursor};
use crate::types::{compile_schema, ColumnSpec};

/// The text syntax a decoder or encoder speaks.
#[derive(Debug, Clone)]
pub enum TextFormat {
    Csv(CsvOptions),
    Json { single_record: bool },
}

impl TextFormat {
    fn lexer(&self) -> Lexer {
        match self {
            Self::Csv(options) => Lexer::Csv(CsvLexer::new(options)),
            Self::Json { .. } => Lexer::Json(JsonLexer::new()),
        }
    }

    fn record_reader(&self, columns: &[ColumnSpec]) -> RecordReader {
        match self {
            Self::Csv(options) => RecordReader::csv(columns, options.has_header),
            Self::Json { single_record } => RecordReader::json(columns, *single_record),
        }
    }
}

/// Decoding resources that only exist between `on_start` and release.
#[derive(Debug)]
struct Active {
    cursor: TokenCursor,
    reader: RecordReader,
}

#[derive(Debug)]
pub struct TextDecoder {
    name: &'static str,
    schema: SchemaRef,
    columns: Vec<ColumnSpec>,
    format: TextFormat,
    state: DecoderState,
    active: Option<Active>,
    /// No further record can be decoded from the bytes fed so far.
    input_exhausted: bool,
    /// The last pump stopped with bytes that may still hold records.
    input_pending: bool,
    closed: bool,
}

impl TextDecoder {
    pub fn new(
        name: &'static str,
        schema: SchemaRef,
        format: TextFormat,
    ) -> Result<Self, BatchlineError> {
        let columns = compile_schema(&schema)?;
        Ok(Self {
            name,
            schema,
            columns,
            format,
            state: DecoderState::Created,
            active: None,
            input_exhausted: false,
            input_pending: false,
            closed: false,
        })
    }

    /// Number of records decoded so far.
    pub fn records(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.reader.records())
    }

    fn release(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.cursor.clear();
        }
    }

    /// Marks the decoder `Errored` when `result` failed.
    fn guard<T>(&mut self, result: Result<T, BatchlineError>) -> Result<T, BatchlineError> {
        if result.is_err() {
            self.state = DecoderState::Errored;
        }
        result
    }

    fn pump(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        let name = self.name;
        let Some(active) = self.active.as_mut() else {
            return Err(BatchlineError::internal(format!("{} decoder pumped without input", name)));
        };
        loop {
            if ctx.can_flip() {
                ctx.flip()?;
                continue;
            }
            if ctx.front_ready() && downstream.ready() {
                deliver(name, ctx, downstream)?;
                continue;
            }
            if ctx.back_state() == BufferState::Loaded {
                // Both slots occupied: wait for the downstream.
                self.input_pending = !self.input_exhausted;
                return Ok(());
            }
            if self.input_exhausted {
                self.input_pending = false;
                return Ok(());
            }
            if ctx.back_state() == BufferState::Empty {
                ctx.begin_load()?;
            }
            if ctx.back_is_full() {
                ctx.finish_load()?;
                continue;
            }
            let (vectors, dictionaries) = ctx.loading_parts()?;
            match active
                .reader
                .next_record(&mut active.cursor, vectors, dictionaries)?
            {
                RecordStep::Record => {
                    dictionaries.flush_staged();
                    ctx.commit_row()?;
                }
                RecordStep::NeedInput | RecordStep::End => self.input_exhausted = true,
            }
        }
    }

    /// Loads the partial back batch and pushes everything left downstream.
    fn drain(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        let mut stalls = 0;
        loop {
            if ctx.can_flip() {
                ctx.flip()?;
                continue;
            }
            if ctx.front_ready() {
                if downstream.ready() {
                    deliver(self.name, ctx, downstream)?;
                    stalls = 0;
                } else {
                    backoff(self.name, &mut stalls);
                }
                continue;
            }
            if ctx.back_state() == BufferState::Loading && ctx.back_rows() > 0 {
                ctx.finish_load()?;
                continue;
            }
            return Ok(());
        }
    }

    fn complete(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| BatchlineError::internal("started decoder has no input state"))?;
        if active.cursor.fed_total() == 0 {
            return Err(BatchlineError::DataCorruption(format!(
                "empty input: the {} decoder received no bytes",
                self.name
            )));
        }
        active.cursor.set_end_of_input();
        self.input_exhausted = false;
        self.pump(ctx, downstream)?;
        let mut stalls = 0;
        while self.input_pending {
            backoff(self.name, &mut stalls);
            self.pump(ctx, downstream)?;
        }
        if let Some(active) = self.active.as_mut() {
            active.reader.finish()?;
        }
        self.drain(ctx, downstream)?;
        ctx.dictionaries_mut().freeze_all();
        Ok(())
    }
}

impl Decoder for TextDecoder {
    fn name(&self) -> &str {
        self.name
    }

    fn state(&self) -> DecoderState {
        self.state
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn on_start(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        if self.state != DecoderState::Created || self.closed {
            return Err(illegal_call(self.name, "on_start", self.state));
        }
        if ctx.schema().fields() != self.schema.fields() {
            return Err(BatchlineError::PreconditionViolation(format!(
                "{} decoder bound to a context of a different schema",
                self.name
            )));
        }
        let result = ctx.allocate_vectors();
        self.guard(result)?;
        self.active = Some(Active {
            cursor: TokenCursor::new(self.format.lexer()),
            reader: self.format.record_reader(&self.columns),
        });
        self.state = DecoderState::Started;
        log::debug!(
            "{} decoder started: {} columns, batch capacity {}",
            self.name,
            self.columns.len(),
            ctx.capacity()
        );
        Ok(())
    }

    fn on_next(
        &mut self,
        ctx: &mut BatchContext,
        chunk: &[u8],
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        if !matches!(self.state, DecoderState::Started | DecoderState::Receiving) {
            return Err(illegal_call(self.name, "on_next", self.state));
        }
        if self.input_pending {
            return Err(BatchlineError::PreconditionViolation(format!(
                "{} decoder fed a new chunk before the previous one was consumed",
                self.name
            )));
        }
        if let Some(active) = self.active.as_mut() {
            active.cursor.feed(chunk);
        }
        self.input_exhausted = false;
        self.state = DecoderState::Receiving;
        log::trace!("{} decoder received {} bytes", self.name, chunk.len());
        let result = self.pump(ctx, downstream);
        self.guard(result)
    }

    fn resume(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<bool, BatchlineError> {
        if !matches!(self.state, DecoderState::Started | DecoderState::Receiving) {
            return Err(illegal_call(self.name, "resume", self.state));
        }
        let result = self.pump(ctx, downstream);
        self.guard(result)?;
        Ok(!self.input_pending)
    }

    fn on_complete(
        &mut self,
        ctx: &mut BatchContext,
        downstream: &mut dyn BatchReceiver,
    ) -> Result<(), BatchlineError> {
        if !matches!(self.state, DecoderState::Started | DecoderState::Receiving) {
            return Err(illegal_call(self.name, "on_complete", self.state));
        }
        let result = self.complete(ctx, downstream);
        self.guard(result)?;
        log::debug!(
            "{} decoder completed: {} records in {} batches",
            self.name,
            self.records(),
            ctx.stats().batches_unloaded
        );
        self.state = DecoderState::Completed;
        self.release();
        Ok(())
    }

    fn on_error(&mut self, error: &BatchlineError) {
        if self.state == DecoderState::Completed {
            return;
        }
        log::debug!("{} decoder errored: {}", self.name, error);
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
