// In: src/text/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Text Parsing Engine
// ====================================================================================
//
// Decoding (bytes -> columns):
//
//   chunk -> ByteFeeder -> Lexer (JSON | CSV) -> TokenCursor -> RecordReader
//                                                                 |
//                                           ColumnConsumer per column -> ColumnVector
//
// The feeder keeps every unconsumed byte. The lexers never surface a partial token:
// when a token would touch the end of the fed bytes they return `None` and leave the
// bytes in place, so a token split across chunks is lexed once the next chunk lands.
//
// Encoding (columns -> bytes):
//
//   RecordBatch -> ColumnWriter per column -> Generator (JSON | CSV) -> ByteSink
//
// ====================================================================================

pub mod csv_lexer;
pub mod decoder;
pub mod encoder;
pub mod feeder;
pub mod generator;
pub mod json_lexer;
pub mod token;

pub use decoder::{TextDecoder, TextFormat};
pub use encoder::TextEncoder;
pub use token::{Token, TokenCursor};
