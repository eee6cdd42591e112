// In: src/text/json_lexer.rs

//! A non-blocking, incremental JSON tokenizer.
//!
//! The lexer keeps a grammar stack of open containers plus the next expected
//! syntactic element, so it validates structure while it tokenizes. Structural
//! bytes (`{ } [ ] , :`) are consumed immediately; strings, numbers and literals
//! are consumed only once they are complete. When the buffered input ends inside
//! one of them, `next_token` returns `Ok(None)` without consuming anything and
//! the same bytes are examined again after the next chunk arrives.

use crate::error::BatchlineError;
use crate::text::feeder::ByteFeeder;
use crate::text::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    /// Directly after `[`.
    ValueOrEnd,
    /// Directly after `{`.
    KeyOrEnd,
    Key,
    Colon,
    CommaOrEnd,
    /// The top-level value is complete; only whitespace may follow.
    Done,
}

#[derive(Debug)]
pub struct JsonLexer {
    stack: Vec<Container>,
    expect: Expect,
    /// Progress through a string token still waiting for its closing quote.
    scan: StringScan,
}

impl Default for JsonLexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Either a complete lexeme and its length in bytes, or `None` for "need more input".
type Lexed<T> = Result<Option<(T, usize)>, String>;

impl JsonLexer {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            expect: Expect::Value,
            scan: StringScan::default(),
        }
    }

    /// `true` once the top-level value has been closed.
    pub fn is_finished(&self) -> bool {
        self.expect == Expect::Done
    }

    pub fn next_token(&mut self, feeder: &mut ByteFeeder) -> Result<Option<Token>, BatchlineError> {
        loop {
            let eof = feeder.is_end_of_input();
            let input = feeder.remaining();
            let ws = input
                .iter()
                .take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
                .count();
            if ws > 0 {
                feeder.consume(ws);
                continue;
            }
            let Some(&b) = input.first() else {
                return Ok(None);
            };

            match self.expect {
                Expect::Done => {
                    return Err(corrupt(
                        feeder,
                        format!("unexpected {} after the top-level value", describe_byte(b)),
                    ))
                }
                Expect::Colon => {
                    if b != b':' {
                        return Err(corrupt(
                            feeder,
                            format!("expected ':' but found {}", describe_byte(b)),
                        ));
                    }
                    feeder.consume(1);
                    self.expect = Expect::Value;
                }
                Expect::CommaOrEnd => match (b, self.stack.last()) {
                    (b',', Some(Container::Object)) => {
                        feeder.consume(1);
                        self.expect = Expect::Key;
                    }
                    (b',', Some(Container::Array)) => {
                        feeder.consume(1);
                        self.expect = Expect::Value;
                    }
                    (b'}', Some(Container::Object)) | (b']', Some(Container::Array)) => {
                        feeder.consume(1);
                        return Ok(Some(self.close()));
                    }
                    _ => {
                        return Err(corrupt(
                            feeder,
                            format!("expected ',' or a closing bracket but found {}", describe_byte(b)),
                        ))
                    }
                },
                Expect::KeyOrEnd | Expect::Key => match b {
                    b'"' => {
                        return match lex_string(input, eof, &mut self.scan) {
                            Ok(Some((name, len))) => {
                                feeder.consume(len);
                                self.expect = Expect::Colon;
                                Ok(Some(Token::FieldName(name)))
                            }
                            Ok(None) => Ok(None),
                            Err(msg) => Err(corrupt(feeder, msg)),
                        };
                    }
                    b'}' if self.expect == Expect::KeyOrEnd => {
                        feeder.consume(1);
                        return Ok(Some(self.close()));
                    }
                    _ => {
                        return Err(corrupt(
                            feeder,
                            format!("expected a field name but found {}", describe_byte(b)),
                        ))
                    }
                },
                Expect::Value | Expect::ValueOrEnd => {
                    let lexed = match b {
                        b'{' => {
                            feeder.consume(1);
                            self.stack.push(Container::Object);
                            self.expect = Expect::KeyOrEnd;
                            return Ok(Some(Token::StartObject));
                        }
                        b'[' => {
                            feeder.consume(1);
                            self.stack.push(Container::Array);
                            self.expect = Expect::ValueOrEnd;
                            return Ok(Some(Token::StartArray));
                        }
                        b']' if self.expect == Expect::ValueOrEnd => {
                            feeder.consume(1);
                            return Ok(Some(self.close()));
                        }
                        b'"' => lex_string(input, eof, &mut self.scan)
                            .map(|o| o.map(|(s, n)| (Token::Str(s), n))),
                        b'-' | b'0'..=b'9' => {
                            lex_number(input, eof).map(|o| o.map(|(s, n)| (Token::Number(s), n)))
                        }
                        b't' => lex_literal(input, eof, b"true", Token::Bool(true)),
                        b'f' => lex_literal(input, eof, b"false", Token::Bool(false)),
                        b'n' => lex_literal(input, eof, b"null", Token::Null),
                        _ => Err(format!("expected a value but found {}", describe_byte(b))),
                    };
                    return match lexed {
                        Ok(Some((token, len))) => {
                            feeder.consume(len);
                            self.after_value();
                            Ok(Some(token))
                        }
                        Ok(None) => Ok(None),
                        Err(msg) => Err(corrupt(feeder, msg)),
                    };
                }
            }
        }
    }

    fn after_value(&mut self) {
        self.expect = if self.stack.is_empty() {
            Expect::Done
        } else {
            Expect::CommaOrEnd
        };
    }

    /// Pops the innermost container; the caller has matched its closing byte.
    fn close(&mut self) -> Token {
        let token = match self.stack.pop() {
            Some(Container::Object) => Token::EndObject,
            _ => Token::EndArray,
        };
        self.after_value();
        token
    }
}

fn corrupt(feeder: &ByteFeeder, msg: String) -> BatchlineError {
    BatchlineError::DataCorruption(format!("JSON: {} at byte {}", msg, feeder.offset()))
}

fn describe_byte(b: u8) -> String {
    if b.is_ascii_graphic() {
        format!("'{}'", b as char)
    } else {
        format!("byte 0x{:02x}", b)
    }
}

//==================================================================================
// Scalar lexemes
//==================================================================================

/// Where an unfinished string token stopped. Offsets count from the opening quote,
/// which stays at the head of the input until the token completes.
#[derive(Debug, Default)]
struct StringScan {
    /// Decoded bytes before `run_start`.
    out: Vec<u8>,
    /// Next byte to examine; `0` means the token has not been started.
    pos: usize,
    /// Start of the escape-free run not yet copied into `out`.
    run_start: usize,
}

/// Lexes a string starting at the opening quote, decoding escapes. When the input
/// runs out first, `scan` keeps the progress so the next call resumes where this
/// one stopped instead of rescanning the token.
fn lex_string(input: &[u8], eof: bool, scan: &mut StringScan) -> Lexed<String> {
    if scan.pos == 0 {
        scan.pos = 1;
        scan.run_start = 1;
        scan.out.clear();
    }
    let result = scan_string(input, scan);
    match &result {
        Ok(Some(_)) | Err(_) => *scan = StringScan::default(),
        Ok(None) if eof => {
            *scan = StringScan::default();
            return Err("incomplete input: ended inside a string".to_string());
        }
        Ok(None) => {}
    }
    result
}

fn scan_string(input: &[u8], scan: &mut StringScan) -> Lexed<String> {
    let StringScan {
        out,
        pos: i,
        run_start,
    } = scan;
    while *i < input.len() {
        match input[*i] {
            b'"' => {
                out.extend_from_slice(&input[*run_start..*i]);
                let s = String::from_utf8(std::mem::take(out))
                    .map_err(|_| "invalid UTF-8 in string".to_string())?;
                return Ok(Some((s, *i + 1)));
            }
            b'\\' => {
                out.extend_from_slice(&input[*run_start..*i]);
                *run_start = *i;
                let Some(&esc) = input.get(*i + 1) else {
                    return Ok(None);
                };
                let decoded = match esc {
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'/' => b'/',
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'u' => match lex_unicode_escape(&input[*i..])? {
                        Some((c, used)) => {
                            let mut utf8 = [0u8; 4];
                            out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                            *i += used;
                            *run_start = *i;
                            continue;
                        }
                        None => return Ok(None),
                    },
                    other => return Err(format!("invalid escape '\\{}'", other as char)),
                };
                out.push(decoded);
                *i += 2;
                *run_start = *i;
            }
            c if c < 0x20 => return Err("unescaped control character in string".to_string()),
            _ => *i += 1,
        }
    }
    Ok(None)
}

/// Lexes `\uXXXX`, or a `\uXXXX\uXXXX` surrogate pair.
fn lex_unicode_escape(input: &[u8]) -> Lexed<char> {
    let Some(high) = hex4(input, 2)? else {
        return Ok(None);
    };
    if !(0xD800..0xDC00).contains(&high) {
        return char::from_u32(high)
            .map(|c| Some((c, 6)))
            .ok_or_else(|| format!("lone surrogate \\u{:04x}", high));
    }
    if input.len() < 8 {
        return Ok(None);
    }
    if &input[6..8] != b"\\u" {
        return Err(format!("unpaired surrogate \\u{:04x}", high));
    }
    let Some(low) = hex4(input, 8)? else {
        return Ok(None);
    };
    if !(0xDC00..0xE000).contains(&low) {
        return Err(format!("invalid low surrogate \\u{:04x}", low));
    }
    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
    char::from_u32(code)
        .map(|c| Some((c, 12)))
        .ok_or_else(|| format!("invalid code point U+{:X}", code))
}

fn hex4(input: &[u8], at: usize) -> Result<Option<u32>, String> {
    let Some(digits) = input.get(at..at + 4) else {
        return Ok(None);
    };
    digits
        .iter()
        .try_fold(0u32, |acc, d| {
            (*d as char).to_digit(16).map(|v| (acc << 4) | v)
        })
        .map(Some)
        .ok_or_else(|| format!("invalid unicode escape '{}'", String::from_utf8_lossy(digits)))
}

/// Lexes a number. A number touching the end of the buffer is only complete at
/// end of input, since the next chunk may carry more digits.
fn lex_number(input: &[u8], eof: bool) -> Lexed<String> {
    let len = input
        .iter()
        .take_while(|b| matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E'))
        .count();
    if len == input.len() && !eof {
        return Ok(None);
    }
    let text = &input[..len];
    if !is_json_number(text) {
        return Err(format!("invalid number '{}'", String::from_utf8_lossy(text)));
    }
    Ok(Some((String::from_utf8_lossy(text).into_owned(), len)))
}

/// `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`
fn is_json_number(text: &[u8]) -> bool {
    fn digits(text: &[u8], i: &mut usize) -> usize {
        let start = *i;
        while *i < text.len() && text[*i].is_ascii_digit() {
            *i += 1;
        }
        *i - start
    }

    let mut i = 0;
    if text.get(i) == Some(&b'-') {
        i += 1;
    }
    match text.get(i) {
        Some(b'0') => i += 1,
        Some(b'1'..=b'9') => {
            digits(text, &mut i);
        }
        _ => return false,
    }
    if text.get(i) == Some(&b'.') {
        i += 1;
        if digits(text, &mut i) == 0 {
            return false;
        }
    }
    if matches!(text.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(text.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        if digits(text, &mut i) == 0 {
            return false;
        }
    }
    i == text.len()
}

fn lex_literal(input: &[u8], eof: bool, word: &'static [u8], token: Token) -> Lexed<Token> {
    let n = word.len().min(input.len());
    if input[..n] != word[..n] {
        let end = input.len().min(word.len());
        return Err(format!(
            "invalid literal '{}'",
            String::from_utf8_lossy(&input[..end])
        ));
    }
    if n < word.len() {
        return if eof {
            Err("incomplete input: ended inside a literal".to_string())
        } else {
            Ok(None)
        };
    }
    Ok(Some((token, word.len())))
}
