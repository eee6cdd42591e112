// In: src/text/token.rs

//! The token vocabulary shared by the JSON tokenizer and the CSV record reader,
//! and the cursor consumers read tokens through.
//!
//! A CSV record is presented as an array of scalars (`StartArray`, one value per
//! field, `EndArray`), so record consumers for both formats speak the same language.

use crate::error::BatchlineError;
use crate::text::csv_lexer::CsvLexer;
use crate::text::feeder::ByteFeeder;
use crate::text::json_lexer::JsonLexer;

/// One complete lexical unit. Partial units are never surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    FieldName(String),
    Null,
    Bool(bool),
    /// The literal text of a JSON number, validated against the JSON grammar.
    Number(String),
    /// A decoded string, or the raw text of a CSV field.
    Str(String),
}

impl Token {
    /// A short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::StartObject => "'{'".to_string(),
            Self::EndObject => "'}'".to_string(),
            Self::StartArray => "'['".to_string(),
            Self::EndArray => "']'".to_string(),
            Self::FieldName(name) => format!("field name \"{}\"", name),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format!("number {}", n),
            Self::Str(s) => format!("string \"{}\"", s),
        }
    }
}

/// The format-specific lexer behind a cursor.
#[derive(Debug)]
pub enum Lexer {
    Json(JsonLexer),
    Csv(CsvLexer),
}

impl Lexer {
    fn next_token(&mut self, feeder: &mut ByteFeeder) -> Result<Option<Token>, BatchlineError> {
        match self {
            Self::Json(lexer) => lexer.next_token(feeder),
            Self::Csv(lexer) => lexer.next_token(feeder),
        }
    }
}

/// A one-token lookahead over a lexer and its feeder.
///
/// `peek` returning `Ok(None)` means no complete token is available yet; the caller
/// must suspend and retry after the next chunk (or fail, at end of input).
#[derive(Debug)]
pub struct TokenCursor {
    lexer: Lexer,
    feeder: ByteFeeder,
    peeked: Option<Token>,
}

impl TokenCursor {
    pub fn new(lexer: Lexer) -> Self {
        Self {
            lexer,
            feeder: ByteFeeder::new(),
            peeked: None,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.feeder.feed(chunk);
    }

    pub fn set_end_of_input(&mut self) {
        self.feeder.set_end_of_input();
    }

    pub fn is_end_of_input(&self) -> bool {
        self.feeder.is_end_of_input()
    }

    pub fn fed_total(&self) -> u64 {
        self.feeder.fed_total()
    }

    pub fn offset(&self) -> u64 {
        self.feeder.offset()
    }

    pub fn peek(&mut self) -> Result<Option<&Token>, BatchlineError> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token(&mut self.feeder)?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Discards the peeked token.
    pub fn advance(&mut self) {
        self.peeked = None;
    }

    pub fn take(&mut self) -> Result<Option<Token>, BatchlineError> {
        self.peek()?;
        Ok(self.peeked.take())
    }

    /// Drops buffered input and lookahead.
    pub fn clear(&mut self) {
        self.peeked = None;
        self.feeder.clear();
    }
}
