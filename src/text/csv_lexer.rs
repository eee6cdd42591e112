// In: src/text/csv_lexer.rs

//! Incremental CSV record reader built on `csv_core`.
//!
//! `csv_core::Reader` is itself a resumable state machine: it consumes as much input
//! as it can and remembers where it stopped inside a quoted or unquoted field. We
//! accumulate the field bytes in `field` until a whole field is available and only
//! then validate UTF-8, so multi-byte characters may straddle chunk boundaries.
//!
//! Records are surfaced as `StartArray`, one scalar token per field, `EndArray`.

use std::collections::VecDeque;

use csv_core::{ReadFieldResult, Reader, ReaderBuilder};

use crate::config::CsvOptions;
use crate::error::BatchlineError;
use crate::text::feeder::ByteFeeder;
use crate::text::token::Token;

const INITIAL_FIELD_CAPACITY: usize = 256;

pub struct CsvLexer {
    reader: Reader,
    field: Vec<u8>,
    field_len: usize,
    pending: VecDeque<Token>,
    in_record: bool,
    /// The header row is never null-converted.
    header_pending: bool,
    null_value: String,
    records: u64,
    finished: bool,
}

impl std::fmt::Debug for CsvLexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvLexer")
            .field("in_record", &self.in_record)
            .field("records", &self.records)
            .field("finished", &self.finished)
            .finish()
    }
}

impl CsvLexer {
    pub fn new(options: &CsvOptions) -> Self {
        let reader = ReaderBuilder::new()
            .delimiter(options.delimiter_byte())
            .quote(options.quote_byte())
            .build();
        Self {
            reader,
            field: vec![0; INITIAL_FIELD_CAPACITY],
            field_len: 0,
            pending: VecDeque::new(),
            in_record: false,
            header_pending: options.has_header,
            null_value: options.null_value.clone(),
            records: 0,
            finished: false,
        }
    }

    /// `true` while a record has started but its last field has not been read.
    pub fn in_record(&self) -> bool {
        self.in_record || self.field_len > 0
    }

    pub fn next_token(&mut self, feeder: &mut ByteFeeder) -> Result<Option<Token>, BatchlineError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            if self.finished {
                return Ok(None);
            }
            let eof = feeder.is_end_of_input();
            let input = feeder.remaining();
            // An empty slice tells csv_core the input has ended.
            if input.is_empty() && !eof {
                return Ok(None);
            }
            let (result, nin, nout) = self
                .reader
                .read_field(input, &mut self.field[self.field_len..]);
            feeder.consume(nin);
            self.field_len += nout;
            match result {
                ReadFieldResult::InputEmpty => {}
                ReadFieldResult::OutputFull => {
                    let grown = self.field.len() * 2;
                    self.field.resize(grown, 0);
                }
                ReadFieldResult::Field { record_end } => self.emit_field(record_end)?,
                ReadFieldResult::End => self.finished = true,
            }
        }
    }

    fn emit_field(&mut self, record_end: bool) -> Result<(), BatchlineError> {
        let raw = &self.field[..self.field_len];
        let text = std::str::from_utf8(raw).map_err(|e| {
            BatchlineError::DataCorruption(format!(
                "CSV: invalid UTF-8 in record {}: {}",
                self.records + 1,
                e
            ))
        })?;
        let token = if !self.header_pending && text == self.null_value {
            Token::Null
        } else {
            Token::Str(text.to_string())
        };
        self.field_len = 0;

        if !self.in_record {
            self.pending.push_back(Token::StartArray);
            self.in_record = true;
        }
        self.pending.push_back(token);
        if record_end {
            self.pending.push_back(Token::EndArray);
            self.in_record = false;
            self.header_pending = false;
            self.records += 1;
        }
        Ok(())
    }
}
