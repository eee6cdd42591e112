// In: src/context/vector.rs

//! Growable column vectors backing the *back* buffer of a `BatchContext`.
//!
//! Primitive columns wrap the matching Arrow builder. Composite columns keep their
//! own offsets/validity and recurse into child vectors. Dictionary columns only hold
//! Int32 codes plus the id of the run-scoped dictionary those codes point into.

use std::sync::Arc;

use arrow::array::{
    ArrayBuilder, ArrayRef, BooleanBuilder, Date32Builder, Decimal128Builder, DictionaryArray,
    Float32Builder, Float64Builder, Int16Builder, Int32Builder, Int64Builder, Int8Builder,
    ListArray, StringBuilder, StructArray, TimestampMicrosecondBuilder, UInt16Builder,
    UInt32Builder, UInt8Builder,
};
use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{FieldRef, Fields, Int32Type};

use crate::context::dictionary::DictionarySet;
use crate::error::BatchlineError;
use crate::types::{ColumnType, IntWidth, Value};

/// Average bytes reserved per string slot when a Utf8 vector is allocated.
const STRING_BYTES_PER_SLOT: usize = 16;

#[derive(Debug)]
pub enum ColumnVector {
    Boolean(BooleanBuilder),
    Int8(Int8Builder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    UInt8(UInt8Builder),
    UInt16(UInt16Builder),
    UInt32(UInt32Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Decimal(Decimal128Builder),
    Utf8(StringBuilder),
    Date(Date32Builder),
    Timestamp(TimestampMicrosecondBuilder),
    List {
        field: FieldRef,
        /// Always starts with `0`; one more entry than there are rows.
        offsets: Vec<i32>,
        validity: Vec<bool>,
        child: Box<ColumnVector>,
    },
    Struct {
        fields: Fields,
        children: Vec<ColumnVector>,
        validity: Vec<bool>,
    },
    Dictionary {
        dict_id: usize,
        keys: Int32Builder,
    },
}

impl ColumnVector {
    /// Allocates an empty vector for `column_type`, reserving `capacity` slots.
    ///
    /// Dictionary columns are numbered in depth-first order through `next_dict_id`,
    /// and each one is registered with `dictionaries` on first sight.
    pub fn allocate(
        column_type: &ColumnType,
        capacity: usize,
        next_dict_id: &mut usize,
        dictionaries: &mut DictionarySet,
    ) -> Result<Self, BatchlineError> {
        let vector = match column_type {
            ColumnType::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            ColumnType::Int(IntWidth::I8) => Self::Int8(Int8Builder::with_capacity(capacity)),
            ColumnType::Int(IntWidth::I16) => Self::Int16(Int16Builder::with_capacity(capacity)),
            ColumnType::Int(IntWidth::I32) => Self::Int32(Int32Builder::with_capacity(capacity)),
            ColumnType::Int(IntWidth::I64) => Self::Int64(Int64Builder::with_capacity(capacity)),
            ColumnType::Int(IntWidth::U8) => Self::UInt8(UInt8Builder::with_capacity(capacity)),
            ColumnType::Int(IntWidth::U16) => Self::UInt16(UInt16Builder::with_capacity(capacity)),
            ColumnType::Int(IntWidth::U32) => Self::UInt32(UInt32Builder::with_capacity(capacity)),
            ColumnType::Float32 => Self::Float32(Float32Builder::with_capacity(capacity)),
            ColumnType::Float64 => Self::Float64(Float64Builder::with_capacity(capacity)),
            ColumnType::Decimal { precision, scale } => Self::Decimal(
                Decimal128Builder::with_capacity(capacity)
                    .with_precision_and_scale(*precision, *scale)
                    .map_err(|e| BatchlineError::internal_arrow("decimal vector", e))?,
            ),
            ColumnType::Utf8 => Self::Utf8(StringBuilder::with_capacity(
                capacity,
                capacity * STRING_BYTES_PER_SLOT,
            )),
            ColumnType::Date => Self::Date(Date32Builder::with_capacity(capacity)),
            ColumnType::Timestamp => {
                Self::Timestamp(TimestampMicrosecondBuilder::with_capacity(capacity))
            }
            ColumnType::List(field, element) => {
                let mut offsets = Vec::with_capacity(capacity + 1);
                offsets.push(0);
                Self::List {
                    field: field.clone(),
                    offsets,
                    validity: Vec::with_capacity(capacity),
                    child: Box::new(Self::allocate(
                        element,
                        capacity,
                        next_dict_id,
                        dictionaries,
                    )?),
                }
            }
            ColumnType::Struct(fields, children) => Self::Struct {
                fields: fields.clone(),
                children: children
                    .iter()
                    .map(|c| Self::allocate(c, capacity, next_dict_id, dictionaries))
                    .collect::<Result<Vec<_>, _>>()?,
                validity: Vec::with_capacity(capacity),
            },
            ColumnType::Dictionary(value_type) => {
                let dict_id = *next_dict_id;
                *next_dict_id += 1;
                dictionaries.ensure(dict_id, value_type)?;
                Self::Dictionary {
                    dict_id,
                    keys: Int32Builder::with_capacity(capacity),
                }
            }
        };
        Ok(vector)
    }

    /// Number of slots appended since the last `finish`.
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(b) => b.len(),
            Self::Int8(b) => b.len(),
            Self::Int16(b) => b.len(),
            Self::Int32(b) => b.len(),
            Self::Int64(b) => b.len(),
            Self::UInt8(b) => b.len(),
            Self::UInt16(b) => b.len(),
            Self::UInt32(b) => b.len(),
            Self::Float32(b) => b.len(),
            Self::Float64(b) => b.len(),
            Self::Decimal(b) => b.len(),
            Self::Utf8(b) => b.len(),
            Self::Date(b) => b.len(),
            Self::Timestamp(b) => b.len(),
            Self::List { validity, .. } => validity.len(),
            Self::Struct { validity, .. } => validity.len(),
            Self::Dictionary { keys, .. } => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append_null(&mut self) {
        match self {
            Self::Boolean(b) => b.append_null(),
            Self::Int8(b) => b.append_null(),
            Self::Int16(b) => b.append_null(),
            Self::Int32(b) => b.append_null(),
            Self::Int64(b) => b.append_null(),
            Self::UInt8(b) => b.append_null(),
            Self::UInt16(b) => b.append_null(),
            Self::UInt32(b) => b.append_null(),
            Self::Float32(b) => b.append_null(),
            Self::Float64(b) => b.append_null(),
            Self::Decimal(b) => b.append_null(),
            Self::Utf8(b) => b.append_null(),
            Self::Date(b) => b.append_null(),
            Self::Timestamp(b) => b.append_null(),
            Self::List {
                offsets, validity, ..
            } => {
                let last = offsets.last().copied().unwrap_or(0);
                offsets.push(last);
                validity.push(false);
            }
            Self::Struct {
                children, validity, ..
            } => {
                // Children keep one slot per parent row, masked by the parent null.
                for child in children.iter_mut() {
                    child.append_null();
                }
                validity.push(false);
            }
            Self::Dictionary { keys, .. } => keys.append_null(),
        }
    }

    /// Appends a parsed primitive value. The value variant must match the vector.
    pub fn append_value(&mut self, value: &Value) -> Result<(), BatchlineError> {
        match (self, value) {
            (Self::Boolean(b), Value::Boolean(v)) => b.append_value(*v),
            (Self::Int8(b), Value::Int(v)) => b.append_value(narrow(*v)?),
            (Self::Int16(b), Value::Int(v)) => b.append_value(narrow(*v)?),
            (Self::Int32(b), Value::Int(v)) => b.append_value(narrow(*v)?),
            (Self::Int64(b), Value::Int(v)) => b.append_value(*v),
            (Self::UInt8(b), Value::Int(v)) => b.append_value(narrow(*v)?),
            (Self::UInt16(b), Value::Int(v)) => b.append_value(narrow(*v)?),
            (Self::UInt32(b), Value::Int(v)) => b.append_value(narrow(*v)?),
            (Self::Float32(b), Value::Float32(bits)) => b.append_value(f32::from_bits(*bits)),
            (Self::Float64(b), Value::Float64(bits)) => b.append_value(f64::from_bits(*bits)),
            (Self::Decimal(b), Value::Decimal(v)) => b.append_value(*v),
            (Self::Utf8(b), Value::Utf8(v)) => b.append_value(v),
            (Self::Date(b), Value::Date(v)) => b.append_value(*v),
            (Self::Timestamp(b), Value::Timestamp(v)) => b.append_value(*v),
            (vector, value) => {
                return Err(BatchlineError::internal(format!(
                    "value {:?} does not fit vector {}",
                    value,
                    vector.kind_name()
                )))
            }
        }
        Ok(())
    }

    /// Appends a dictionary code. Only legal on dictionary vectors.
    pub fn append_code(&mut self, code: i32) -> Result<(), BatchlineError> {
        match self {
            Self::Dictionary { keys, .. } => {
                keys.append_value(code);
                Ok(())
            }
            other => Err(BatchlineError::internal(format!(
                "dictionary code appended to {} vector",
                other.kind_name()
            ))),
        }
    }

    /// Closes the current list slot after its elements were appended to the child.
    pub fn close_list_slot(&mut self) -> Result<(), BatchlineError> {
        match self {
            Self::List {
                offsets,
                validity,
                child,
                ..
            } => {
                let end = i32::try_from(child.len()).map_err(|_| {
                    BatchlineError::DataCorruption("list column exceeds i32 offsets".to_string())
                })?;
                offsets.push(end);
                validity.push(true);
                Ok(())
            }
            other => Err(BatchlineError::internal(format!(
                "list slot closed on {} vector",
                other.kind_name()
            ))),
        }
    }

    /// Marks the current struct slot valid after one value was appended to every child.
    pub fn close_struct_slot(&mut self) -> Result<(), BatchlineError> {
        match self {
            Self::Struct { validity, .. } => {
                validity.push(true);
                Ok(())
            }
            other => Err(BatchlineError::internal(format!(
                "struct slot closed on {} vector",
                other.kind_name()
            ))),
        }
    }

    pub fn list_child_mut(&mut self) -> Result<&mut ColumnVector, BatchlineError> {
        match self {
            Self::List { child, .. } => Ok(child.as_mut()),
            other => Err(BatchlineError::internal(format!(
                "list child requested from {} vector",
                other.kind_name()
            ))),
        }
    }

    pub fn struct_children_mut(&mut self) -> Result<&mut [ColumnVector], BatchlineError> {
        match self {
            Self::Struct { children, .. } => Ok(children.as_mut_slice()),
            other => Err(BatchlineError::internal(format!(
                "struct children requested from {} vector",
                other.kind_name()
            ))),
        }
    }

    /// The run-scoped dictionary id of a dictionary vector.
    pub fn dictionary_id(&self) -> Option<usize> {
        match self {
            Self::Dictionary { dict_id, .. } => Some(*dict_id),
            _ => None,
        }
    }

    /// Builds an Arrow array from everything appended so far and resets the vector.
    pub fn finish(&mut self, dictionaries: &DictionarySet) -> Result<ArrayRef, BatchlineError> {
        let array: ArrayRef = match self {
            Self::Boolean(b) => Arc::new(b.finish()),
            Self::Int8(b) => Arc::new(b.finish()),
            Self::Int16(b) => Arc::new(b.finish()),
            Self::Int32(b) => Arc::new(b.finish()),
            Self::Int64(b) => Arc::new(b.finish()),
            Self::UInt8(b) => Arc::new(b.finish()),
            Self::UInt16(b) => Arc::new(b.finish()),
            Self::UInt32(b) => Arc::new(b.finish()),
            Self::Float32(b) => Arc::new(b.finish()),
            Self::Float64(b) => Arc::new(b.finish()),
            Self::Decimal(b) => Arc::new(b.finish()),
            Self::Utf8(b) => Arc::new(b.finish()),
            Self::Date(b) => Arc::new(b.finish()),
            Self::Timestamp(b) => Arc::new(b.finish()),
            Self::List {
                field,
                offsets,
                validity,
                child,
            } => {
                let values = child.finish(dictionaries)?;
                let offsets = std::mem::replace(offsets, vec![0]);
                let nulls = take_nulls(validity);
                let list = ListArray::try_new(
                    field.clone(),
                    OffsetBuffer::new(ScalarBuffer::from(offsets)),
                    values,
                    nulls,
                )
                .map_err(|e| BatchlineError::corrupt_arrow("list column", e))?;
                Arc::new(list)
            }
            Self::Struct {
                fields,
                children,
                validity,
            } => {
                let arrays = children
                    .iter_mut()
                    .map(|c| c.finish(dictionaries))
                    .collect::<Result<Vec<_>, _>>()?;
                let nulls = take_nulls(validity);
                let array = StructArray::try_new(fields.clone(), arrays, nulls)
                    .map_err(|e| BatchlineError::corrupt_arrow("struct column", e))?;
                Arc::new(array)
            }
            Self::Dictionary { dict_id, keys } => {
                let values = dictionaries.get(*dict_id)?.snapshot()?;
                let dict = DictionaryArray::<Int32Type>::try_new(keys.finish(), values)
                    .map_err(|e| BatchlineError::internal_arrow("dictionary column", e))?;
                Arc::new(dict)
            }
        };
        Ok(array)
    }

    /// Builds an Arrow array of the primitive values appended so far without resetting.
    /// Used for dictionary value snapshots, which must keep growing.
    pub fn finish_cloned(&self) -> Result<ArrayRef, BatchlineError> {
        let array: ArrayRef = match self {
            Self::Boolean(b) => Arc::new(b.finish_cloned()),
            Self::Int8(b) => Arc::new(b.finish_cloned()),
            Self::Int16(b) => Arc::new(b.finish_cloned()),
            Self::Int32(b) => Arc::new(b.finish_cloned()),
            Self::Int64(b) => Arc::new(b.finish_cloned()),
            Self::UInt8(b) => Arc::new(b.finish_cloned()),
            Self::UInt16(b) => Arc::new(b.finish_cloned()),
            Self::UInt32(b) => Arc::new(b.finish_cloned()),
            Self::Float32(b) => Arc::new(b.finish_cloned()),
            Self::Float64(b) => Arc::new(b.finish_cloned()),
            Self::Decimal(b) => Arc::new(b.finish_cloned()),
            Self::Utf8(b) => Arc::new(b.finish_cloned()),
            Self::Date(b) => Arc::new(b.finish_cloned()),
            Self::Timestamp(b) => Arc::new(b.finish_cloned()),
            other => {
                return Err(BatchlineError::internal(format!(
                    "snapshot of non-primitive {} vector",
                    other.kind_name()
                )))
            }
        };
        Ok(array)
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "Boolean",
            Self::Int8(_) => "Int8",
            Self::Int16(_) => "Int16",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::UInt8(_) => "UInt8",
            Self::UInt16(_) => "UInt16",
            Self::UInt32(_) => "UInt32",
            Self::Float32(_) => "Float32",
            Self::Float64(_) => "Float64",
            Self::Decimal(_) => "Decimal",
            Self::Utf8(_) => "Utf8",
            Self::Date(_) => "Date",
            Self::Timestamp(_) => "Timestamp",
            Self::List { .. } => "List",
            Self::Struct { .. } => "Struct",
            Self::Dictionary { .. } => "Dictionary",
        }
    }
}

/// Narrows an already range-checked integer to the vector's native type.
fn narrow<T: num_traits::NumCast>(v: i64) -> Result<T, BatchlineError> {
    num_traits::cast(v)
        .ok_or_else(|| BatchlineError::internal(format!("integer {} escaped its range check", v)))
}

fn take_nulls(validity: &mut Vec<bool>) -> Option<NullBuffer> {
    let validity = std::mem::take(validity);
    if validity.iter().all(|v| *v) {
        None
    } else {
        Some(NullBuffer::from(validity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray, Int32Array};
    use arrow::datatypes::{DataType, Field};

    fn alloc(ct: &ColumnType, dicts: &mut DictionarySet) -> ColumnVector {
        let mut next = 0;
        ColumnVector::allocate(ct, 4, &mut next, dicts).unwrap()
    }

    #[test]
    fn test_primitive_vector_finish_resets() {
        let mut dicts = DictionarySet::default();
        let mut v = alloc(&ColumnType::Int(IntWidth::I32), &mut dicts);
        v.append_value(&Value::Int(7)).unwrap();
        v.append_null();
        let array = v.finish(&dicts).unwrap();
        assert_eq!(array.as_primitive::<Int32Type>(), &Int32Array::from(vec![Some(7), None]));
        assert!(v.is_empty());
    }

    #[test]
    fn test_every_primitive_vector_counts_its_rows() {
        let cases = [
            (ColumnType::Boolean, Value::Boolean(true)),
            (ColumnType::Int(IntWidth::I8), Value::Int(-1)),
            (ColumnType::Int(IntWidth::I16), Value::Int(-1)),
            (ColumnType::Int(IntWidth::I64), Value::Int(-1)),
            (ColumnType::Int(IntWidth::U8), Value::Int(1)),
            (ColumnType::Int(IntWidth::U16), Value::Int(1)),
            (ColumnType::Int(IntWidth::U32), Value::Int(1)),
            (ColumnType::Float32, Value::from_f32(0.5)),
            (ColumnType::Float64, Value::from_f64(0.5)),
            (ColumnType::Decimal { precision: 10, scale: 2 }, Value::Decimal(125)),
            (ColumnType::Utf8, Value::Utf8("x".to_string())),
            (ColumnType::Date, Value::Date(1)),
            (ColumnType::Timestamp, Value::Timestamp(1)),
        ];
        for (ct, value) in cases {
            let mut dicts = DictionarySet::default();
            let mut v = alloc(&ct, &mut dicts);
            assert!(v.is_empty());
            v.append_value(&value).unwrap();
            v.append_null();
            assert_eq!(v.len(), 2, "{:?}", ct);
            assert_eq!(v.finish(&dicts).unwrap().len(), 2, "{:?}", ct);
            assert_eq!(v.len(), 0, "{:?}", ct);
        }
    }

    #[test]
    fn test_mismatched_value_is_internal_error() {
        let mut dicts = DictionarySet::default();
        let mut v = alloc(&ColumnType::Boolean, &mut dicts);
        let err = v.append_value(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, BatchlineError::InternalError(_)));
    }

    #[test]
    fn test_list_vector_tracks_offsets_and_nulls() {
        let field = Arc::new(Field::new("item", DataType::Int64, true));
        let ct = ColumnType::List(field, Box::new(ColumnType::Int(IntWidth::I64)));
        let mut dicts = DictionarySet::default();
        let mut v = alloc(&ct, &mut dicts);

        if let ColumnVector::List { child, .. } = &mut v {
            child.append_value(&Value::Int(1)).unwrap();
            child.append_value(&Value::Int(2)).unwrap();
        }
        v.close_list_slot().unwrap();
        v.append_null();
        v.close_list_slot().unwrap(); // empty list

        let array = v.finish(&dicts).unwrap();
        let list = array.as_list::<i32>();
        assert_eq!(list.len(), 3);
        assert_eq!(list.value_offsets(), &[0, 2, 2, 2]);
        assert!(list.is_null(1));
        assert!(list.is_valid(2));
        assert_eq!(list.value(2).len(), 0);
    }

    #[test]
    fn test_dictionary_ids_follow_depth_first_order() {
        let dict = ColumnType::Dictionary(Box::new(ColumnType::Utf8));
        let mut dicts = DictionarySet::default();
        let mut next = 0;
        let a = ColumnVector::allocate(&dict, 4, &mut next, &mut dicts).unwrap();
        let b = ColumnVector::allocate(&dict, 4, &mut next, &mut dicts).unwrap();
        assert!(matches!(a, ColumnVector::Dictionary { dict_id: 0, .. }));
        assert!(matches!(b, ColumnVector::Dictionary { dict_id: 1, .. }));
        assert_eq!(dicts.len(), 2);
    }
}
