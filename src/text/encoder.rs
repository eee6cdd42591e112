// In: src/text/encoder.rs

//! The text encoder shared by the CSV and JSON codecs.
//!
//! Each front batch is serialized row by row through the compiled column writers,
//! then handed to the byte sink as one chunk.

use arrow::array::Array;
use arrow::datatypes::SchemaRef;

use crate::codecs::{check_batch_schema, illegal_call, Encoder, EncoderState};
use crate::config::CodecOptions;
use crate::consumers::ColumnWriter;
use crate::context::BatchContext;
use crate::error::BatchlineError;
use crate::pipeline::ByteSink;
use crate::text::decoder::TextFormat;
use crate::text::generator::{CsvGenerator, Generator, JsonGenerator};
use crate::types::compile_schema;

pub struct TextEncoder {
    name: &'static str,
    schema: SchemaRef,
    single_record: bool,
    writers: Vec<(String, ColumnWriter)>,
    generator: Generator,
    sink: Option<Box<dyn ByteSink>>,
    state: EncoderState,
    closed: bool,
    rows_written: usize,
}

impl std::fmt::Debug for TextEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextEncoder")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("rows_written", &self.rows_written)
            .finish()
    }
}

impl TextEncoder {
    pub fn new(
        name: &'static str,
        schema: SchemaRef,
        format: TextFormat,
        options: &CodecOptions,
    ) -> Result<Self, BatchlineError> {
        let columns = compile_schema(&schema)?;
        let writers = columns
            .iter()
            .map(|c| (c.name.clone(), ColumnWriter::compile(&c.column_type)))
            .collect();
        let (generator, single_record) = match &format {
            TextFormat::Csv(csv) => (Generator::Csv(CsvGenerator::new(csv)), false),
            TextFormat::Json { single_record } => (
                Generator::Json(JsonGenerator::new(&options.json, *single_record)),
                *single_record,
            ),
        };
        Ok(Self {
            name,
            schema,
            single_record,
            writers,
            generator,
            sink: None,
            state: EncoderState::Created,
            closed: false,
            rows_written: 0,
        })
    }

    fn sink(&mut self) -> Result<&mut Box<dyn ByteSink>, BatchlineError> {
        let name = self.name;
        self.sink
            .as_mut()
            .ok_or_else(|| BatchlineError::internal(format!("{} encoder has no byte sink", name)))
    }

    fn forward_output(&mut self) -> Result<(), BatchlineError> {
        let bytes = self.generator.take_output()?;
        if !bytes.is_empty() {
            self.sink()?.write_chunk(&bytes)?;
        }
        Ok(())
    }

    fn encode_front(&mut self, ctx: &mut BatchContext) -> Result<(), BatchlineError> {
        let batch = ctx.begin_unload()?;
        check_batch_schema(self.name, &self.schema, &batch)?;
        if self.single_record && self.rows_written + batch.num_rows() > 1 {
            return Err(BatchlineError::DataCorruption(format!(
                "{} single-record output received more than one record",
                self.name
            )));
        }
        for row in 0..batch.num_rows() {
            self.generator.begin_record();
            for ((name, writer), column) in self.writers.iter().zip(batch.columns()) {
                self.generator.field_name(name)?;
                writer.write(column.as_ref() as &dyn Array, row, &mut self.generator)?;
            }
            self.generator.end_record()?;
        }
        self.rows_written += batch.num_rows();
        self.forward_output()?;
        log_metric!("event" = "encode", "encoder" = self.name, "rows" = batch.num_rows());
        ctx.finish_unload()
    }

    fn finish(&mut self) -> Result<(), BatchlineError> {
        if self.single_record && self.rows_written != 1 {
            return Err(BatchlineError::DataCorruption(format!(
                "{} single-record output needs exactly one record, got {}",
                self.name, self.rows_written
            )));
        }
        self.generator.end_document();
        self.forward_output()?;
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

impl Encoder for TextEncoder {
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
        let names: Vec<String> = self.writers.iter().map(|(n, _)| n.clone()).collect();
        let result = self
            .generator
            .begin_document(&names)
            .and_then(|_| self.forward_output());
        self.guard(result)?;
        self.state = EncoderState::Started;
        log::debug!("{} encoder started with {} columns", self.name, names.len());
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
        log::debug!("{} encoder completed: {} rows", self.name, self.rows_written);
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
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                log::warn!("{} encoder: closing the byte sink failed: {}", self.name, e);
            }
        }
        true
    }
}
