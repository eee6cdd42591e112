// In: src/consumers/dictionary.rs

//! The dictionary-staging consumer.
//!
//! Wraps a primitive consumer: the raw value is parsed exactly as it would be for a
//! plain column, then resolved to an Int32 code in the run's dictionary. New values
//! are staged and only committed (`DictionarySet::flush_staged`) once the record that
//! introduced them is complete.

use crate::consumers::primitive::PrimitiveConsumer;
use crate::context::{ColumnVector, DictionarySet};
use crate::error::BatchlineError;
use crate::text::token::TokenCursor;

#[derive(Debug, Clone)]
pub struct DictionaryConsumer {
    values: PrimitiveConsumer,
}

impl DictionaryConsumer {
    pub fn new(values: PrimitiveConsumer) -> Self {
        Self { values }
    }

    pub fn consume_element(
        &mut self,
        cursor: &mut TokenCursor,
        vector: &mut ColumnVector,
        dictionaries: &mut DictionarySet,
    ) -> Result<bool, BatchlineError> {
        let dict_id = vector.dictionary_id().ok_or_else(|| {
            BatchlineError::internal(format!(
                "dictionary consumer for '{}' bound to a non-dictionary vector",
                self.values.column()
            ))
        })?;
        let value = match cursor.peek()? {
            None => return Ok(false),
            Some(token) => self.values.parse_token(token)?,
        };
        cursor.advance();
        match value {
            None => vector.append_null(),
            Some(v) => {
                let code = dictionaries.get_mut(dict_id)?.lookup_or_stage(v)?;
                vector.append_code(code)?;
            }
        }
        Ok(true)
    }
}
