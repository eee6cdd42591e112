// In: src/text/generator.rs

//! Text generators: the encode-side inverse of the tokenizers.
//!
//! Column writers describe a row as a sequence of structural events and scalars;
//! the generator turns those into bytes. Output accumulates in memory and is taken
//! by the encoder once per batch.

use std::borrow::Cow;

use crate::config::{CsvOptions, JsonOptions};
use crate::error::BatchlineError;
use crate::utils::SharedBuffer;

/// One scalar as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar<'a> {
    Null,
    Bool(bool),
    /// Written verbatim in JSON (unquoted).
    Number(String),
    /// Written as a JSON string; NaN, infinities and decimals travel this way.
    Text(Cow<'a, str>),
}

#[derive(Debug)]
pub enum Generator {
    Json(JsonGenerator),
    Csv(CsvGenerator),
}

impl Generator {
    pub fn begin_document(&mut self, column_names: &[String]) -> Result<(), BatchlineError> {
        match self {
            Self::Json(g) => {
                g.begin_document();
                Ok(())
            }
            Self::Csv(g) => g.begin_document(column_names),
        }
    }

    pub fn begin_record(&mut self) {
        match self {
            Self::Json(g) => g.begin_record(),
            Self::Csv(g) => g.begin_record(),
        }
    }

    pub fn field_name(&mut self, name: &str) -> Result<(), BatchlineError> {
        match self {
            Self::Json(g) => g.field_name(name),
            // CSV columns are positional.
            Self::Csv(_) => Ok(()),
        }
    }

    pub fn scalar(&mut self, value: Scalar<'_>) -> Result<(), BatchlineError> {
        match self {
            Self::Json(g) => g.scalar(value),
            Self::Csv(g) => {
                g.scalar(value);
                Ok(())
            }
        }
    }

    pub fn begin_list(&mut self) -> Result<(), BatchlineError> {
        match self {
            Self::Json(g) => {
                g.open(b'[');
                Ok(())
            }
            Self::Csv(_) => Err(nested_in_csv()),
        }
    }

    pub fn end_list(&mut self) -> Result<(), BatchlineError> {
        match self {
            Self::Json(g) => {
                g.close(b']');
                Ok(())
            }
            Self::Csv(_) => Err(nested_in_csv()),
        }
    }

    pub fn begin_object(&mut self) -> Result<(), BatchlineError> {
        match self {
            Self::Json(g) => {
                g.open(b'{');
                Ok(())
            }
            Self::Csv(_) => Err(nested_in_csv()),
        }
    }

    pub fn end_object(&mut self) -> Result<(), BatchlineError> {
        match self {
            Self::Json(g) => {
                g.close(b'}');
                Ok(())
            }
            Self::Csv(_) => Err(nested_in_csv()),
        }
    }

    pub fn end_record(&mut self) -> Result<(), BatchlineError> {
        match self {
            Self::Json(g) => {
                g.end_record();
                Ok(())
            }
            Self::Csv(g) => g.end_record(),
        }
    }

    pub fn end_document(&mut self) {
        if let Self::Json(g) = self {
            g.end_document();
        }
    }

    /// Removes and returns the bytes generated since the last call.
    pub fn take_output(&mut self) -> Result<Vec<u8>, BatchlineError> {
        match self {
            Self::Json(g) => Ok(std::mem::take(&mut g.out)),
            Self::Csv(g) => g.take_output(),
        }
    }
}

fn nested_in_csv() -> BatchlineError {
    BatchlineError::internal("nested value reached the CSV generator")
}

//==================================================================================
// JSON
//==================================================================================

#[derive(Debug)]
pub struct JsonGenerator {
    out: Vec<u8>,
    pretty: bool,
    single_record: bool,
    /// One entry per open container: `true` until its first member is written.
    firsts: Vec<bool>,
    /// A field name was just written; the next value needs no separator.
    after_key: bool,
    records: usize,
}

impl JsonGenerator {
    pub fn new(options: &JsonOptions, single_record: bool) -> Self {
        Self {
            out: Vec::new(),
            pretty: options.pretty,
            single_record,
            firsts: Vec::new(),
            after_key: false,
            records: 0,
        }
    }

    fn begin_document(&mut self) {
        if !self.single_record {
            self.out.push(b'[');
            self.firsts.push(true);
        }
    }

    fn separator(&mut self) {
        if self.after_key {
            self.after_key = false;
            return;
        }
        if let Some(first) = self.firsts.last_mut() {
            if !*first {
                self.out.push(b',');
            }
            *first = false;
        }
    }

    fn begin_record(&mut self) {
        self.separator();
        if self.pretty && !self.single_record {
            self.out.push(b'\n');
        }
        self.out.push(b'{');
        self.firsts.push(true);
    }

    fn end_record(&mut self) {
        self.close(b'}');
        self.records += 1;
    }

    fn end_document(&mut self) {
        if !self.single_record {
            self.firsts.pop();
            if self.pretty && self.records > 0 {
                self.out.push(b'\n');
            }
            self.out.push(b']');
        }
        if self.pretty {
            self.out.push(b'\n');
        }
    }

    fn open(&mut self, bracket: u8) {
        self.separator();
        self.out.push(bracket);
        self.firsts.push(true);
    }

    fn close(&mut self, bracket: u8) {
        self.firsts.pop();
        self.out.push(bracket);
    }

    fn field_name(&mut self, name: &str) -> Result<(), BatchlineError> {
        self.separator();
        self.write_string(name)?;
        self.out.push(b':');
        self.after_key = true;
        Ok(())
    }

    fn scalar(&mut self, value: Scalar<'_>) -> Result<(), BatchlineError> {
        self.separator();
        match value {
            Scalar::Null => self.out.extend_from_slice(b"null"),
            Scalar::Bool(true) => self.out.extend_from_slice(b"true"),
            Scalar::Bool(false) => self.out.extend_from_slice(b"false"),
            Scalar::Number(text) => self.out.extend_from_slice(text.as_bytes()),
            Scalar::Text(text) => self.write_string(&text)?,
        }
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<(), BatchlineError> {
        serde_json::to_writer(&mut self.out, s)
            .map_err(|e| BatchlineError::internal(format!("escaping JSON string: {}", e)))
    }
}

//==================================================================================
// CSV
//==================================================================================

pub struct CsvGenerator {
    writer: csv::Writer<SharedBuffer>,
    buffer: SharedBuffer,
    has_header: bool,
    null_value: String,
    record: Vec<String>,
}

impl std::fmt::Debug for CsvGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvGenerator")
            .field("has_header", &self.has_header)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl CsvGenerator {
    pub fn new(options: &CsvOptions) -> Self {
        let buffer = SharedBuffer::new();
        let writer = csv::WriterBuilder::new()
            .delimiter(options.delimiter_byte())
            .quote(options.quote_byte())
            .from_writer(buffer.clone());
        Self {
            writer,
            buffer,
            has_header: options.has_header,
            null_value: options.null_value.clone(),
            record: Vec::new(),
        }
    }

    fn begin_document(&mut self, column_names: &[String]) -> Result<(), BatchlineError> {
        if self.has_header {
            self.writer.write_record(column_names)?;
        }
        Ok(())
    }

    fn begin_record(&mut self) {
        self.record.clear();
    }

    fn scalar(&mut self, value: Scalar<'_>) {
        let text = match value {
            Scalar::Null => self.null_value.clone(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(text) => text,
            Scalar::Text(text) => text.into_owned(),
        };
        self.record.push(text);
    }

    fn end_record(&mut self) -> Result<(), BatchlineError> {
        self.writer.write_record(&self.record)?;
        Ok(())
    }

    fn take_output(&mut self) -> Result<Vec<u8>, BatchlineError> {
        self.writer.flush()?;
        Ok(self.buffer.take())
    }
}
