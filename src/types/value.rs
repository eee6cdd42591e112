//! A single parsed primitive value.
//!
//! `Value` is the hand-off between a primitive consumer and a column vector or a
//! dictionary. Floats are carried as raw bits so the type is `Eq + Hash` and can key
//! a dictionary index; NaN payloads survive untouched.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Boolean(bool),
    /// Any integer width; range checks happen before construction.
    Int(i64),
    Float32(u32),
    Float64(u64),
    /// Unscaled decimal mantissa.
    Decimal(i128),
    Utf8(String),
    /// Days since the UNIX epoch.
    Date(i32),
    /// Microseconds since the UNIX epoch.
    Timestamp(i64),
}

impl Value {
    pub fn from_f32(v: f32) -> Self {
        Self::Float32(v.to_bits())
    }

    pub fn from_f64(v: f64) -> Self {
        Self::Float64(v.to_bits())
    }
}
