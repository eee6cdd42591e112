//! This file is the root of the `batchline` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of the library (`codecs`, `pipeline`,
//!     `context`, etc.) so the Rust compiler knows they exist.
//! 2.  Re-exporting the handful of types a hosting service needs to run a pipeline.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
#[macro_use]
mod observability; // Make macros available throughout the crate

pub mod api;
pub mod codecs;
pub mod config;
pub mod consumers;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod text;
pub mod types;

mod utils;

//==================================================================================
// 2. Public Surface
//==================================================================================
pub use codecs::{Codec, CodecRegistry, Decoder, DecoderState, Encoder, EncoderState};
pub use config::{CodecOptions, CsvOptions, EngineConfig, JsonOptions};
pub use context::{BatchContext, BufferState};
pub use error::{BatchlineError, ErrorKind};
pub use pipeline::{CancelHandle, Pipeline, PipelineSummary};
