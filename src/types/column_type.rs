//! This module defines the canonical, closed set of column types the engine can
//! decode and encode, and their mapping onto Arrow data types.
//!
//! A schema is compiled into a `ColumnType` tree exactly once, when it is bound to
//! a codec. Everything downstream (consumers, writers, vectors) dispatches on this
//! enum instead of inspecting Arrow types per value.

use std::fmt;

use arrow_schema::{DataType as ArrowDataType, Field, FieldRef, Fields, Schema, TimeUnit};

use crate::error::BatchlineError;

/// Fixed-width integer representations. Unsigned storage stops at 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl IntWidth {
    /// Inclusive value range representable by this width.
    pub fn bounds(&self) -> (i64, i64) {
        match self {
            Self::I8 => (i8::MIN as i64, i8::MAX as i64),
            Self::I16 => (i16::MIN as i64, i16::MAX as i64),
            Self::I32 => (i32::MIN as i64, i32::MAX as i64),
            Self::I64 => (i64::MIN, i64::MAX),
            Self::U8 => (0, u8::MAX as i64),
            Self::U16 => (0, u16::MAX as i64),
            Self::U32 => (0, u32::MAX as i64),
        }
    }
}

/// The canonical, internal representation of a column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Int(IntWidth),
    Float32,
    Float64,
    Decimal { precision: u8, scale: i8 },
    Utf8,
    /// Days since the UNIX epoch.
    Date,
    /// Microseconds since the UNIX epoch, no time zone.
    Timestamp,
    /// An array-shaped column. The field describes the elements.
    List(FieldRef, Box<ColumnType>),
    /// An object-shaped column.
    Struct(Fields, Vec<ColumnType>),
    /// Int32 codes into a dictionary of primitive values.
    Dictionary(Box<ColumnType>),
}

impl ColumnType {
    /// Converts an Arrow `DataType` into a `ColumnType`.
    pub fn from_arrow_type(arrow_type: &ArrowDataType) -> Result<Self, BatchlineError> {
        match arrow_type {
            ArrowDataType::Boolean => Ok(Self::Boolean),
            ArrowDataType::Int8 => Ok(Self::Int(IntWidth::I8)),
            ArrowDataType::Int16 => Ok(Self::Int(IntWidth::I16)),
            ArrowDataType::Int32 => Ok(Self::Int(IntWidth::I32)),
            ArrowDataType::Int64 => Ok(Self::Int(IntWidth::I64)),
            ArrowDataType::UInt8 => Ok(Self::Int(IntWidth::U8)),
            ArrowDataType::UInt16 => Ok(Self::Int(IntWidth::U16)),
            ArrowDataType::UInt32 => Ok(Self::Int(IntWidth::U32)),
            ArrowDataType::Float32 => Ok(Self::Float32),
            ArrowDataType::Float64 => Ok(Self::Float64),
            ArrowDataType::Decimal128(precision, scale) => {
                if *scale < 0 || (*scale as u8) > *precision {
                    return Err(BatchlineError::UnsupportedType(format!(
                        "Decimal128({}, {}) must have 0 <= scale <= precision",
                        precision, scale
                    )));
                }
                Ok(Self::Decimal {
                    precision: *precision,
                    scale: *scale,
                })
            }
            ArrowDataType::Utf8 => Ok(Self::Utf8),
            ArrowDataType::Date32 => Ok(Self::Date),
            ArrowDataType::Timestamp(TimeUnit::Microsecond, None) => Ok(Self::Timestamp),
            ArrowDataType::List(field) => {
                let element = Self::from_arrow_type(field.data_type())?;
                Ok(Self::List(field.clone(), Box::new(element)))
            }
            ArrowDataType::Struct(fields) => {
                let children = fields
                    .iter()
                    .map(|f| Self::from_arrow_type(f.data_type()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Struct(fields.clone(), children))
            }
            ArrowDataType::Dictionary(key, value) => {
                if key.as_ref() != &ArrowDataType::Int32 {
                    return Err(BatchlineError::UnsupportedType(format!(
                        "Dictionary keys must be Int32, got {:?}",
                        key
                    )));
                }
                let value_type = Self::from_arrow_type(value)?;
                if !value_type.is_primitive() {
                    return Err(BatchlineError::UnsupportedType(format!(
                        "Dictionary values must be primitive, got {:?}",
                        value
                    )));
                }
                Ok(Self::Dictionary(Box::new(value_type)))
            }
            dt => Err(BatchlineError::UnsupportedType(format!(
                "Cannot convert Arrow type {:?} to a column type",
                dt
            ))),
        }
    }

    /// Converts a `ColumnType` back into an Arrow `DataType`.
    pub fn to_arrow_type(&self) -> ArrowDataType {
        match self {
            Self::Boolean => ArrowDataType::Boolean,
            Self::Int(IntWidth::I8) => ArrowDataType::Int8,
            Self::Int(IntWidth::I16) => ArrowDataType::Int16,
            Self::Int(IntWidth::I32) => ArrowDataType::Int32,
            Self::Int(IntWidth::I64) => ArrowDataType::Int64,
            Self::Int(IntWidth::U8) => ArrowDataType::UInt8,
            Self::Int(IntWidth::U16) => ArrowDataType::UInt16,
            Self::Int(IntWidth::U32) => ArrowDataType::UInt32,
            Self::Float32 => ArrowDataType::Float32,
            Self::Float64 => ArrowDataType::Float64,
            Self::Decimal { precision, scale } => ArrowDataType::Decimal128(*precision, *scale),
            Self::Utf8 => ArrowDataType::Utf8,
            Self::Date => ArrowDataType::Date32,
            Self::Timestamp => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
            Self::List(field, _) => ArrowDataType::List(field.clone()),
            Self::Struct(fields, _) => ArrowDataType::Struct(fields.clone()),
            Self::Dictionary(value) => ArrowDataType::Dictionary(
                Box::new(ArrowDataType::Int32),
                Box::new(value.to_arrow_type()),
            ),
        }
    }

    /// Returns `true` for types that occupy a single token on a text wire.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::List(..) | Self::Struct(..) | Self::Dictionary(_))
    }

    /// Returns `true` if this type, or any type nested in it, is dictionary encoded.
    pub fn contains_dictionary(&self) -> bool {
        match self {
            Self::Dictionary(_) => true,
            Self::List(_, element) => element.contains_dictionary(),
            Self::Struct(_, children) => children.iter().any(|c| c.contains_dictionary()),
            _ => false,
        }
    }
}

/// Provides a short, stable name for a `ColumnType`, used in error messages.
impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(width) => write!(f, "{:?}", width),
            Self::Decimal { precision, scale } => write!(f, "Decimal({}, {})", precision, scale),
            Self::List(_, element) => write!(f, "List<{}>", element),
            Self::Struct(fields, _) => write!(f, "Struct[{}]", fields.len()),
            Self::Dictionary(value) => write!(f, "Dictionary<{}>", value),
            other => write!(f, "{:?}", other),
        }
    }
}

/// One top-level column of a compiled schema.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub nullable: bool,
    pub column_type: ColumnType,
}

/// Compiles every top-level field of `schema` into a `ColumnSpec`.
pub fn compile_schema(schema: &Schema) -> Result<Vec<ColumnSpec>, BatchlineError> {
    schema
        .fields()
        .iter()
        .map(|field| compile_field(field))
        .collect()
}

fn compile_field(field: &Field) -> Result<ColumnSpec, BatchlineError> {
    let column_type = ColumnType::from_arrow_type(field.data_type()).map_err(|e| match e {
        BatchlineError::UnsupportedType(msg) => {
            BatchlineError::UnsupportedType(format!("column '{}': {}", field.name(), msg))
        }
        other => other,
    })?;
    Ok(ColumnSpec {
        name: field.name().clone(),
        nullable: field.is_nullable(),
        column_type,
    })
}
