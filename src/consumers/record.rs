// In: src/consumers/record.rs

//! Record framing: how a stream of tokens is cut into rows.
//!
//! - JSON array mode: `[ {record}, {record}, ... ]`
//! - JSON single-record mode: exactly one top-level `{record}`
//! - CSV: an optional header record, then one record per row
//!
//! Every reader delegates the record body to column consumers and reports one
//! `RecordStep` per call. `finish` is called once the input has ended and rejects
//! framing that was left open.

use crate::consumers::composite::ObjectConsumer;
use crate::consumers::ColumnConsumer;
use crate::context::{ColumnVector, DictionarySet};
use crate::error::BatchlineError;
use crate::text::token::{Token, TokenCursor};
use crate::types::ColumnSpec;

/// The outcome of one `next_record` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStep {
    /// One complete row was appended to every vector.
    Record,
    /// No complete token is available; resume after more input.
    NeedInput,
    /// The framing closed; no further records follow.
    End,
}

#[derive(Debug)]
pub enum RecordReader {
    JsonArray(JsonArrayReader),
    SingleRecord(SingleRecordReader),
    Csv(CsvRowReader),
}

impl RecordReader {
    pub fn json(columns: &[ColumnSpec], single_record: bool) -> Self {
        let object = ObjectConsumer::new("record", ColumnConsumer::compile_members(columns));
        if single_record {
            Self::SingleRecord(SingleRecordReader::new(object))
        } else {
            Self::JsonArray(JsonArrayReader::new(object))
        }
    }

    pub fn csv(columns: &[ColumnSpec], has_header: bool) -> Self {
        Self::Csv(CsvRowReader::new(columns, has_header))
    }

    pub fn next_record(
        &mut self,
        cursor: &mut TokenCursor,
        vectors: &mut [ColumnVector],
        dictionaries: &mut DictionarySet,
    ) -> Result<RecordStep, BatchlineError> {
        match self {
            Self::JsonArray(r) => r.next_record(cursor, vectors, dictionaries),
            Self::SingleRecord(r) => r.next_record(cursor, vectors, dictionaries),
            Self::Csv(r) => r.next_record(cursor, vectors, dictionaries),
        }
    }

    /// Validates the framing after the input ended.
    pub fn finish(&mut self) -> Result<(), BatchlineError> {
        match self {
            Self::JsonArray(r) => r.finish(),
            Self::SingleRecord(r) => r.finish(),
            Self::Csv(r) => r.finish(),
        }
    }

    pub fn records(&self) -> usize {
        match self {
            Self::JsonArray(r) => r.records,
            Self::SingleRecord(r) => usize::from(r.record_produced()),
            Self::Csv(r) => r.records,
        }
    }
}

fn incomplete(what: &str) -> BatchlineError {
    BatchlineError::DataCorruption(format!("incomplete input: {}", what))
}

//==================================================================================
// JSON array of records
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    Start,
    Between,
    InRecord,
    Finished,
}

#[derive(Debug)]
pub struct JsonArrayReader {
    object: ObjectConsumer,
    state: ArrayState,
    records: usize,
}

impl JsonArrayReader {
    fn new(object: ObjectConsumer) -> Self {
        Self {
            object,
            state: ArrayState::Start,
            records: 0,
        }
    }

    fn next_record(
        &mut self,
        cursor: &mut TokenCursor,
        vectors: &mut [ColumnVector],
        dictionaries: &mut DictionarySet,
    ) -> Result<RecordStep, BatchlineError> {
        loop {
            match self.state {
                ArrayState::Start => match cursor.take()? {
                    None => return Ok(RecordStep::NeedInput),
                    Some(Token::StartArray) => self.state = ArrayState::Between,
                    Some(other) => {
                        return Err(BatchlineError::DataCorruption(format!(
                            "expected a top-level array of records, found {}",
                            other.describe()
                        )))
                    }
                },
                ArrayState::Between => match cursor.take()? {
                    None => return Ok(RecordStep::NeedInput),
                    Some(Token::EndArray) => {
                        self.state = ArrayState::Finished;
                        return Ok(RecordStep::End);
                    }
                    Some(Token::StartObject) => self.state = ArrayState::InRecord,
                    Some(other) => {
                        return Err(BatchlineError::DataCorruption(format!(
                            "expected a record object, found {}",
                            other.describe()
                        )))
                    }
                },
                ArrayState::InRecord => {
                    if !self.object.consume_fields(cursor, vectors, dictionaries)? {
                        return Ok(RecordStep::NeedInput);
                    }
                    self.state = ArrayState::Between;
                    self.records += 1;
                    return Ok(RecordStep::Record);
                }
                ArrayState::Finished => return Ok(RecordStep::End),
            }
        }
    }

    fn finish(&mut self) -> Result<(), BatchlineError> {
        match self.state {
            ArrayState::Finished => Ok(()),
            ArrayState::Start => Err(incomplete("no top-level array")),
            ArrayState::Between => Err(incomplete("top-level array was not closed")),
            ArrayState::InRecord => Err(incomplete("input ended inside a record")),
        }
    }
}

//==================================================================================
// JSON single record
//==================================================================================

/// The sub-state-machine of single-record framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleRecordState {
    NotStarted,
    /// Waiting for the opening brace.
    Active,
    /// Inside the record; the object consumer owns the tokens.
    DelegateActive,
    RecordComplete,
    Done,
}

#[derive(Debug)]
pub struct SingleRecordReader {
    object: ObjectConsumer,
    state: SingleRecordState,
}

impl SingleRecordReader {
    pub fn new(object: ObjectConsumer) -> Self {
        Self {
            object,
            state: SingleRecordState::NotStarted,
        }
    }

    pub fn state(&self) -> SingleRecordState {
        self.state
    }

    fn record_produced(&self) -> bool {
        matches!(
            self.state,
            SingleRecordState::RecordComplete | SingleRecordState::Done
        )
    }

    /// Returns to `NotStarted`. Illegal while a record is half consumed.
    pub fn reset(&mut self) -> Result<(), BatchlineError> {
        if self.state == SingleRecordState::DelegateActive || self.object.is_mid_value() {
            return Err(BatchlineError::PreconditionViolation(
                "single-record consumer reset in the middle of a record".to_string(),
            ));
        }
        self.object.reset();
        self.state = SingleRecordState::NotStarted;
        Ok(())
    }

    pub fn next_record(
        &mut self,
        cursor: &mut TokenCursor,
        vectors: &mut [ColumnVector],
        dictionaries: &mut DictionarySet,
    ) -> Result<RecordStep, BatchlineError> {
        loop {
            match self.state {
                SingleRecordState::NotStarted => self.state = SingleRecordState::Active,
                SingleRecordState::Active => match cursor.take()? {
                    None => return Ok(RecordStep::NeedInput),
                    Some(Token::StartObject) => self.state = SingleRecordState::DelegateActive,
                    Some(other) => {
                        return Err(BatchlineError::DataCorruption(format!(
                            "single-record input must be one object, found {}",
                            other.describe()
                        )))
                    }
                },
                SingleRecordState::DelegateActive => {
                    if !self.object.consume_fields(cursor, vectors, dictionaries)? {
                        return Ok(RecordStep::NeedInput);
                    }
                    self.state = SingleRecordState::RecordComplete;
                    return Ok(RecordStep::Record);
                }
                SingleRecordState::RecordComplete => {
                    return match cursor.peek()? {
                        None => Ok(RecordStep::NeedInput),
                        Some(_) => Err(BatchlineError::DataCorruption(
                            "single-record input contains more than one record".to_string(),
                        )),
                    }
                }
                SingleRecordState::Done => return Ok(RecordStep::End),
            }
        }
    }

    fn finish(&mut self) -> Result<(), BatchlineError> {
        match self.state {
            SingleRecordState::RecordComplete | SingleRecordState::Done => {
                self.state = SingleRecordState::Done;
                Ok(())
            }
            SingleRecordState::DelegateActive => Err(incomplete("input ended inside the record")),
            SingleRecordState::NotStarted | SingleRecordState::Active => Err(
                BatchlineError::DataCorruption("single-record input contains no record".to_string()),
            ),
        }
    }
}

//==================================================================================
// CSV rows
//==================================================================================

#[derive(Debug)]
enum CsvState {
    AwaitHeader,
    InHeader(Vec<String>),
    AwaitRow,
    /// Inside a data record; the payload is the wire position of the next field.
    InRow(usize),
}

#[derive(Debug)]
pub struct CsvRowReader {
    names: Vec<String>,
    consumers: Vec<ColumnConsumer>,
    /// Wire position -> column index.
    mapping: Vec<usize>,
    state: CsvState,
    records: usize,
}

impl CsvRowReader {
    fn new(columns: &[ColumnSpec], has_header: bool) -> Self {
        Self {
            names: columns.iter().map(|c| c.name.clone()).collect(),
            consumers: columns
                .iter()
                .map(|c| ColumnConsumer::compile(&c.column_type, &c.name, c.nullable))
                .collect(),
            mapping: (0..columns.len()).collect(),
            state: if has_header {
                CsvState::AwaitHeader
            } else {
                CsvState::AwaitRow
            },
            records: 0,
        }
    }

    /// Maps header names onto schema columns. Every column must appear exactly once.
    fn bind_header(&mut self, header: Vec<String>) -> Result<(), BatchlineError> {
        let mut mapping = Vec::with_capacity(header.len());
        let mut bound = vec![false; self.names.len()];
        for name in &header {
            let idx = self.names.iter().position(|n| n == name).ok_or_else(|| {
                BatchlineError::DataCorruption(format!("unknown column '{}' in CSV header", name))
            })?;
            if bound[idx] {
                return Err(BatchlineError::DataCorruption(format!(
                    "duplicate column '{}' in CSV header",
                    name
                )));
            }
            bound[idx] = true;
            mapping.push(idx);
        }
        if let Some(missing) = bound.iter().position(|b| !*b) {
            return Err(BatchlineError::DataCorruption(format!(
                "CSV header is missing column '{}'",
                self.names[missing]
            )));
        }
        self.mapping = mapping;
        Ok(())
    }

    fn next_record(
        &mut self,
        cursor: &mut TokenCursor,
        vectors: &mut [ColumnVector],
        dictionaries: &mut DictionarySet,
    ) -> Result<RecordStep, BatchlineError> {
        loop {
            match &mut self.state {
                CsvState::AwaitHeader | CsvState::AwaitRow => {
                    let Some(token) = cursor.take()? else {
                        return Ok(RecordStep::NeedInput);
                    };
                    if token != Token::StartArray {
                        return Err(BatchlineError::internal(format!(
                            "CSV reader produced {} at a record boundary",
                            token.describe()
                        )));
                    }
                    self.state = match self.state {
                        CsvState::AwaitHeader => CsvState::InHeader(Vec::new()),
                        _ => CsvState::InRow(0),
                    };
                }
                CsvState::InHeader(names) => match cursor.take()? {
                    None => return Ok(RecordStep::NeedInput),
                    Some(Token::Str(name)) => names.push(name),
                    Some(Token::EndArray) => {
                        let header = std::mem::take(names);
                        self.bind_header(header)?;
                        self.state = CsvState::AwaitRow;
                    }
                    Some(other) => {
                        return Err(BatchlineError::DataCorruption(format!(
                            "invalid CSV header cell {}",
                            other.describe()
                        )))
                    }
                },
                CsvState::InRow(pos) => {
                    let pos = *pos;
                    match cursor.peek()? {
                        None => return Ok(RecordStep::NeedInput),
                        Some(Token::EndArray) => {
                            cursor.advance();
                            if pos != self.mapping.len() {
                                return Err(BatchlineError::DataCorruption(format!(
                                    "CSV record {} has {} fields, expected {}",
                                    self.records + 1,
                                    pos,
                                    self.mapping.len()
                                )));
                            }
                            self.state = CsvState::AwaitRow;
                            self.records += 1;
                            return Ok(RecordStep::Record);
                        }
                        Some(_) => {}
                    }
                    let Some(&column) = self.mapping.get(pos) else {
                        return Err(BatchlineError::DataCorruption(format!(
                            "CSV record {} has more than {} fields",
                            self.records + 1,
                            self.mapping.len()
                        )));
                    };
                    if !self.consumers[column].consume_element(
                        cursor,
                        &mut vectors[column],
                        dictionaries,
                    )? {
                        return Ok(RecordStep::NeedInput);
                    }
                    self.state = CsvState::InRow(pos + 1);
                }
            }
        }
    }

    fn finish(&mut self) -> Result<(), BatchlineError> {
        match self.state {
            CsvState::InHeader(_) | CsvState::InRow(_) => {
                Err(incomplete("input ended inside a CSV record"))
            }
            CsvState::AwaitHeader | CsvState::AwaitRow => Ok(()),
        }
    }
}
