//! This module defines the core, strongly-typed column representations used
//! throughout the engine.
//!
//! It includes the canonical `ColumnType` enum, a closed tagged variant compiled
//! once per schema, and the scalar `Value` produced by primitive consumers.

pub mod column_type;
pub mod value;

// Re-export the main type(s) for easier access.
pub use column_type::{compile_schema, ColumnSpec, ColumnType, IntWidth};
pub use value::Value;
