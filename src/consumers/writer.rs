// In: src/consumers/writer.rs

//! Column writers: the inverse of the consumers.
//!
//! A writer walks one slot of an Arrow array and emits generator events. Dictionary
//! columns are resolved code -> value here, so encoders never see codes.

use arrow::array::{Array, DictionaryArray, ListArray, StructArray};
use arrow::datatypes::Int32Type;

use crate::consumers::primitive::{downcast, format_scalar};
use crate::error::BatchlineError;
use crate::text::generator::{Generator, Scalar};
use crate::types::ColumnType;

#[derive(Debug, Clone)]
pub enum ColumnWriter {
    Primitive(ColumnType),
    /// Carries the dictionary's value type.
    Dictionary(ColumnType),
    List(Box<ColumnWriter>),
    Struct(Vec<(String, ColumnWriter)>),
}

impl ColumnWriter {
    pub fn compile(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::Dictionary(value_type) => Self::Dictionary(value_type.as_ref().clone()),
            ColumnType::List(_, element) => Self::List(Box::new(Self::compile(element))),
            ColumnType::Struct(fields, children) => Self::Struct(
                fields
                    .iter()
                    .zip(children)
                    .map(|(f, c)| (f.name().clone(), Self::compile(c)))
                    .collect(),
            ),
            primitive => Self::Primitive(primitive.clone()),
        }
    }

    /// Writes slot `row` of `array`.
    pub fn write(
        &self,
        array: &dyn Array,
        row: usize,
        generator: &mut Generator,
    ) -> Result<(), BatchlineError> {
        match self {
            Self::Primitive(kind) => generator.scalar(format_scalar(kind, array, row)?),
            _ if array.is_null(row) => generator.scalar(Scalar::Null),
            Self::Dictionary(value_type) => {
                let dict = downcast::<DictionaryArray<Int32Type>>(array)?;
                let values = dict.values();
                let key = dict.keys().value(row);
                let idx = usize::try_from(key)
                    .ok()
                    .filter(|k| *k < values.len())
                    .ok_or_else(|| {
                        BatchlineError::DataCorruption(format!(
                            "dictionary key {} out of range for {} values",
                            key,
                            values.len()
                        ))
                    })?;
                generator.scalar(format_scalar(value_type, values.as_ref(), idx)?)
            }
            Self::List(element) => {
                let list = downcast::<ListArray>(array)?;
                let values = list.value(row);
                generator.begin_list()?;
                for i in 0..values.len() {
                    element.write(values.as_ref(), i, generator)?;
                }
                generator.end_list()
            }
            Self::Struct(members) => {
                let structs = downcast::<StructArray>(array)?;
                generator.begin_object()?;
                for (i, (name, writer)) in members.iter().enumerate() {
                    generator.field_name(name)?;
                    writer.write(structs.column(i).as_ref(), row, generator)?;
                }
                generator.end_object()
            }
        }
    }
}
