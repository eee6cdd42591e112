// In: src/context/dictionary.rs

//! Run-scoped dictionaries for categorical columns.
//!
//! A `Dictionary` maps distinct primitive values to dense Int32 codes in order of
//! first appearance. It grows monotonically while a decoder stages new entries and
//! is frozen when an encoder of the same run starts reading from it. The set of
//! dictionaries lives inside the `BatchContext`; there is no process-wide cache.

use arrow::array::ArrayRef;
use hashbrown::HashMap;

use crate::context::vector::ColumnVector;
use crate::error::BatchlineError;
use crate::types::{ColumnType, Value};

/// Values reserved per dictionary when it is first registered.
const INITIAL_DICTIONARY_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct Dictionary {
    id: usize,
    value_type: ColumnType,
    /// Committed value -> code.
    index: HashMap<Value, i32>,
    /// Every value ever assigned a code, committed or staged, in code order.
    values: ColumnVector,
    /// Values assigned a code during the current record, not yet in `index`.
    staged: Vec<Value>,
    frozen: bool,
}

impl Dictionary {
    fn new(id: usize, value_type: &ColumnType) -> Result<Self, BatchlineError> {
        if !value_type.is_primitive() {
            return Err(BatchlineError::UnsupportedType(format!(
                "dictionary {} values must be primitive, got {}",
                id, value_type
            )));
        }
        let mut unused_ids = 0;
        let mut no_nested = DictionarySet::default();
        let values = ColumnVector::allocate(
            value_type,
            INITIAL_DICTIONARY_CAPACITY,
            &mut unused_ids,
            &mut no_nested,
        )?;
        Ok(Self {
            id,
            value_type: value_type.clone(),
            index: HashMap::new(),
            values,
            staged: Vec::new(),
            frozen: false,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn value_type(&self) -> &ColumnType {
        &self.value_type
    }

    /// Number of distinct values, staged ones included.
    pub fn len(&self) -> usize {
        self.index.len() + self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The code of a committed or staged value.
    pub fn code_of(&self, value: &Value) -> Option<i32> {
        if let Some(code) = self.index.get(value) {
            return Some(*code);
        }
        self.staged
            .iter()
            .position(|v| v == value)
            .map(|pos| (self.index.len() + pos) as i32)
    }

    /// Returns the existing code for `value` or assigns the next one and stages it.
    pub fn lookup_or_stage(&mut self, value: Value) -> Result<i32, BatchlineError> {
        if let Some(code) = self.code_of(&value) {
            return Ok(code);
        }
        if self.frozen {
            return Err(BatchlineError::PreconditionViolation(format!(
                "dictionary {} is frozen; cannot add {:?}",
                self.id, value
            )));
        }
        let code = i32::try_from(self.len()).map_err(|_| {
            BatchlineError::DataCorruption(format!(
                "dictionary {} exceeds the Int32 code space",
                self.id
            ))
        })?;
        self.values.append_value(&value)?;
        self.staged.push(value);
        Ok(code)
    }

    /// Commits the entries staged during the record that just completed.
    pub fn flush_staged(&mut self) {
        let base = self.index.len();
        for (offset, value) in self.staged.drain(..).enumerate() {
            self.index.insert(value, (base + offset) as i32);
        }
    }

    /// An immutable snapshot of all values assigned so far.
    pub fn snapshot(&self) -> Result<ArrayRef, BatchlineError> {
        self.values.finish_cloned()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }
}

/// All dictionaries of one pipeline run, indexed by their depth-first column id.
#[derive(Debug, Default)]
pub struct DictionarySet {
    dictionaries: Vec<Dictionary>,
}

impl DictionarySet {
    /// Registers dictionary `id` if it does not exist yet. Ids must be dense.
    pub fn ensure(&mut self, id: usize, value_type: &ColumnType) -> Result<(), BatchlineError> {
        match id.cmp(&self.dictionaries.len()) {
            std::cmp::Ordering::Less => {
                let existing = &self.dictionaries[id];
                if existing.value_type() != value_type {
                    return Err(BatchlineError::internal(format!(
                        "dictionary {} re-registered as {} (was {})",
                        id,
                        value_type,
                        existing.value_type()
                    )));
                }
                Ok(())
            }
            std::cmp::Ordering::Equal => {
                self.dictionaries.push(Dictionary::new(id, value_type)?);
                Ok(())
            }
            std::cmp::Ordering::Greater => Err(BatchlineError::internal(format!(
                "dictionary id {} registered out of order",
                id
            ))),
        }
    }

    pub fn get(&self, id: usize) -> Result<&Dictionary, BatchlineError> {
        self.dictionaries
            .get(id)
            .ok_or_else(|| BatchlineError::internal(format!("unknown dictionary id {}", id)))
    }

    pub fn get_mut(&mut self, id: usize) -> Result<&mut Dictionary, BatchlineError> {
        self.dictionaries
            .get_mut(id)
            .ok_or_else(|| BatchlineError::internal(format!("unknown dictionary id {}", id)))
    }

    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }

    pub fn flush_staged(&mut self) {
        for dict in &mut self.dictionaries {
            dict.flush_staged();
        }
    }

    pub fn freeze_all(&mut self) {
        for dict in &mut self.dictionaries {
            dict.freeze();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dictionary> {
        self.dictionaries.iter()
    }

    /// Drops every dictionary and its values.
    pub fn clear(&mut self) {
        self.dictionaries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};

    #[test]
    fn test_codes_follow_first_appearance() {
        let mut set = DictionarySet::default();
        set.ensure(0, &ColumnType::Utf8).unwrap();
        let dict = set.get_mut(0).unwrap();

        let a = dict.lookup_or_stage(Value::Utf8("red".into())).unwrap();
        let b = dict.lookup_or_stage(Value::Utf8("blue".into())).unwrap();
        // A repeat inside the same record resolves against the staged entries.
        let a2 = dict.lookup_or_stage(Value::Utf8("red".into())).unwrap();
        assert_eq!((a, b, a2), (0, 1, 0));

        dict.flush_staged();
        let c = dict.lookup_or_stage(Value::Utf8("green".into())).unwrap();
        let b2 = dict.lookup_or_stage(Value::Utf8("blue".into())).unwrap();
        assert_eq!((c, b2), (2, 1));
        assert_eq!(dict.len(), 3);

        let snapshot = dict.snapshot().unwrap();
        let strings = snapshot.as_string::<i32>();
        assert_eq!(strings.len(), 3);
        assert_eq!(strings.value(2), "green");
    }

    #[test]
    fn test_frozen_dictionary_rejects_new_values() {
        let mut set = DictionarySet::default();
        set.ensure(0, &ColumnType::Utf8).unwrap();
        set.get_mut(0)
            .unwrap()
            .lookup_or_stage(Value::Utf8("x".into()))
            .unwrap();
        set.flush_staged();
        set.freeze_all();

        let dict = set.get_mut(0).unwrap();
        assert_eq!(dict.lookup_or_stage(Value::Utf8("x".into())).unwrap(), 0);
        let err = dict.lookup_or_stage(Value::Utf8("y".into())).unwrap_err();
        assert!(matches!(err, BatchlineError::PreconditionViolation(_)));
    }

    #[test]
    fn test_out_of_order_registration_is_a_bug() {
        let mut set = DictionarySet::default();
        assert!(set.ensure(1, &ColumnType::Utf8).is_err());
        set.ensure(0, &ColumnType::Utf8).unwrap();
        set.ensure(0, &ColumnType::Utf8).unwrap();
        assert!(set.ensure(0, &ColumnType::Boolean).is_err());
    }
}
