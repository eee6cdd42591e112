// In: src/consumers/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: Batch Consumers
// ====================================================================================
//
// A consumer turns tokens into column vector slots. Consumers are compiled once per
// bound schema from the `ColumnType` tree into a fixed list, one per column; there
// is no per-value type lookup.
//
//   ColumnType::Int(I32)          -> Primitive   (parse, range check, append)
//   ColumnType::Dictionary(Utf8)  -> Dictionary  (parse, code lookup/stage, append key)
//   ColumnType::List(_, T)        -> List        (brackets, then T per element)
//   ColumnType::Struct(F, C)      -> Struct      (braces, then an ObjectConsumer over C)
//
// `consume_element` returns `Ok(false)` when the cursor ran out of complete tokens.
// Composite consumers keep their position, so calling again after the next chunk
// resumes exactly where the previous call stopped.
//
// `writer` holds the inverse direction: one `ColumnWriter` per column that walks an
// Arrow array slot and emits generator events.
//
// ====================================================================================

pub mod composite;
pub mod dictionary;
pub mod primitive;
pub mod record;
pub mod writer;

pub use composite::{ListConsumer, Member, ObjectConsumer, StructConsumer};
pub use dictionary::DictionaryConsumer;
pub use primitive::PrimitiveConsumer;
pub use record::{RecordReader, RecordStep, SingleRecordReader, SingleRecordState};
pub use writer::ColumnWriter;

use crate::context::{ColumnVector, DictionarySet};
use crate::error::BatchlineError;
use crate::text::token::TokenCursor;
use crate::types::{ColumnSpec, ColumnType};

/// The closed set of column consumers.
#[derive(Debug)]
pub enum ColumnConsumer {
    Primitive(PrimitiveConsumer),
    Dictionary(DictionaryConsumer),
    List(ListConsumer),
    Struct(StructConsumer),
}

impl ColumnConsumer {
    /// Compiles the consumer for a column (or nested member) named `column`.
    pub fn compile(column_type: &ColumnType, column: &str, nullable: bool) -> Self {
        match column_type {
            ColumnType::Dictionary(value_type) => Self::Dictionary(DictionaryConsumer::new(
                PrimitiveConsumer::new(value_type.as_ref().clone(), column, nullable),
            )),
            ColumnType::List(field, element) => {
                let element = Self::compile(element, &format!("{}[]", column), field.is_nullable());
                Self::List(ListConsumer::new(element, column, nullable))
            }
            ColumnType::Struct(fields, children) => {
                let members = fields
                    .iter()
                    .zip(children)
                    .map(|(field, child)| Member {
                        name: field.name().clone(),
                        nullable: field.is_nullable(),
                        consumer: Self::compile(
                            child,
                            &format!("{}.{}", column, field.name()),
                            field.is_nullable(),
                        ),
                    })
                    .collect();
                let object = ObjectConsumer::new(format!("column '{}'", column), members);
                Self::Struct(StructConsumer::new(object, column, nullable))
            }
            primitive => Self::Primitive(PrimitiveConsumer::new(primitive.clone(), column, nullable)),
        }
    }

    /// One member per top-level column, in schema order.
    pub fn compile_members(columns: &[ColumnSpec]) -> Vec<Member> {
        columns
            .iter()
            .map(|c| Member {
                name: c.name.clone(),
                nullable: c.nullable,
                consumer: Self::compile(&c.column_type, &c.name, c.nullable),
            })
            .collect()
    }

    /// Consumes one complete value into `vector`, or returns `Ok(false)` to be resumed.
    pub fn consume_element(
        &mut self,
        cursor: &mut TokenCursor,
        vector: &mut ColumnVector,
        dictionaries: &mut DictionarySet,
    ) -> Result<bool, BatchlineError> {
        match self {
            Self::Primitive(c) => c.consume_element(cursor, vector),
            Self::Dictionary(c) => c.consume_element(cursor, vector, dictionaries),
            Self::List(c) => c.consume_element(cursor, vector, dictionaries),
            Self::Struct(c) => c.consume_element(cursor, vector, dictionaries),
        }
    }

    /// `true` while a composite value has been started but not finished.
    pub fn is_mid_value(&self) -> bool {
        match self {
            Self::Primitive(_) | Self::Dictionary(_) => false,
            Self::List(c) => c.is_mid_value(),
            Self::Struct(c) => c.is_mid_value(),
        }
    }
}
