// In: src/consumers/composite.rs

//! Composite consumers: lists (array-shaped), structs (object-shaped) and the
//! object body shared by struct columns and JSON records.
//!
//! Each composite remembers whether it is between values (`Idle`) or inside one
//! (`Open`). When a child reports "need more input" the parent returns `false`
//! as well, and the next call descends straight back into the same child.

use hashbrown::HashMap;

use crate::consumers::ColumnConsumer;
use crate::context::{ColumnVector, DictionarySet};
use crate::error::BatchlineError;
use crate::text::token::{Token, TokenCursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Open,
}

//==================================================================================
// List
//==================================================================================

#[derive(Debug)]
pub struct ListConsumer {
    element: Box<ColumnConsumer>,
    column: String,
    nullable: bool,
    state: SlotState,
}

impl ListConsumer {
    pub fn new(element: ColumnConsumer, column: impl Into<String>, nullable: bool) -> Self {
        Self {
            element: Box::new(element),
            column: column.into(),
            nullable,
            state: SlotState::Idle,
        }
    }

    pub fn is_mid_value(&self) -> bool {
        self.state == SlotState::Open
    }

    pub fn consume_element(
        &mut self,
        cursor: &mut TokenCursor,
        vector: &mut ColumnVector,
        dictionaries: &mut DictionarySet,
    ) -> Result<bool, BatchlineError> {
        loop {
            match self.state {
                SlotState::Idle => match cursor.peek()? {
                    None => return Ok(false),
                    Some(Token::Null) => {
                        check_nullable(self.nullable, &self.column)?;
                        cursor.advance();
                        vector.append_null();
                        return Ok(true);
                    }
                    Some(Token::StartArray) => {
                        cursor.advance();
                        self.state = SlotState::Open;
                    }
                    Some(other) => {
                        return Err(BatchlineError::DataCorruption(format!(
                            "column '{}': expected an array, found {}",
                            self.column,
                            other.describe()
                        )))
                    }
                },
                SlotState::Open => {
                    if !self.element.is_mid_value() {
                        match cursor.peek()? {
                            None => return Ok(false),
                            Some(Token::EndArray) => {
                                cursor.advance();
                                vector.close_list_slot()?;
                                self.state = SlotState::Idle;
                                return Ok(true);
                            }
                            Some(_) => {}
                        }
                    }
                    let child = vector.list_child_mut()?;
                    if !self.element.consume_element(cursor, child, dictionaries)? {
                        return Ok(false);
                    }
                }
            }
        }
    }
}

//==================================================================================
// Struct
//==================================================================================

#[derive(Debug)]
pub struct StructConsumer {
    object: ObjectConsumer,
    column: String,
    nullable: bool,
    state: SlotState,
}

impl StructConsumer {
    pub fn new(object: ObjectConsumer, column: impl Into<String>, nullable: bool) -> Self {
        Self {
            object,
            column: column.into(),
            nullable,
            state: SlotState::Idle,
        }
    }

    pub fn is_mid_value(&self) -> bool {
        self.state == SlotState::Open
    }

    pub fn consume_element(
        &mut self,
        cursor: &mut TokenCursor,
        vector: &mut ColumnVector,
        dictionaries: &mut DictionarySet,
    ) -> Result<bool, BatchlineError> {
        loop {
            match self.state {
                SlotState::Idle => match cursor.peek()? {
                    None => return Ok(false),
                    Some(Token::Null) => {
                        check_nullable(self.nullable, &self.column)?;
                        cursor.advance();
                        vector.append_null();
                        return Ok(true);
                    }
                    Some(Token::StartObject) => {
                        cursor.advance();
                        self.state = SlotState::Open;
                    }
                    Some(other) => {
                        return Err(BatchlineError::DataCorruption(format!(
                            "column '{}': expected an object, found {}",
                            self.column,
                            other.describe()
                        )))
                    }
                },
                SlotState::Open => {
                    let children = vector.struct_children_mut()?;
                    if !self.object.consume_fields(cursor, children, dictionaries)? {
                        return Ok(false);
                    }
                    vector.close_struct_slot()?;
                    self.state = SlotState::Idle;
                    return Ok(true);
                }
            }
        }
    }
}

fn check_nullable(nullable: bool, column: &str) -> Result<(), BatchlineError> {
    if nullable {
        Ok(())
    } else {
        Err(BatchlineError::DataCorruption(format!(
            "null in non-nullable column '{}'",
            column
        )))
    }
}

//==================================================================================
// Object body
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectState {
    AwaitKey,
    InValue(usize),
}

/// One named member of an object: its name, nullability and consumer.
#[derive(Debug)]
pub struct Member {
    pub name: String,
    pub nullable: bool,
    pub consumer: ColumnConsumer,
}

/// Consumes `"key": value` pairs up to and including the closing brace, routing each
/// value to the vector of the same position. Absent keys become nulls.
#[derive(Debug)]
pub struct ObjectConsumer {
    context: String,
    index: HashMap<String, usize>,
    members: Vec<Member>,
    seen: Vec<bool>,
    state: ObjectState,
}

impl ObjectConsumer {
    /// `context` names the object in error messages ("record", "column 'x'").
    pub fn new(context: impl Into<String>, members: Vec<Member>) -> Self {
        let index = members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();
        let seen = vec![false; members.len()];
        Self {
            context: context.into(),
            index,
            members,
            seen,
            state: ObjectState::AwaitKey,
        }
    }

    /// `true` once any member of the current object was consumed.
    pub fn is_mid_value(&self) -> bool {
        matches!(self.state, ObjectState::InValue(_)) || self.seen.iter().any(|s| *s)
    }

    pub fn reset(&mut self) {
        self.state = ObjectState::AwaitKey;
        self.seen.iter_mut().for_each(|s| *s = false);
    }

    /// Consumes members of an object whose opening brace was already taken.
    pub fn consume_fields(
        &mut self,
        cursor: &mut TokenCursor,
        vectors: &mut [ColumnVector],
        dictionaries: &mut DictionarySet,
    ) -> Result<bool, BatchlineError> {
        loop {
            match self.state {
                ObjectState::AwaitKey => {
                    let Some(token) = cursor.take()? else {
                        return Ok(false);
                    };
                    match token {
                        Token::EndObject => {
                            self.fill_absent(vectors)?;
                            return Ok(true);
                        }
                        Token::FieldName(name) => {
                            let idx = *self.index.get(&name).ok_or_else(|| {
                                BatchlineError::DataCorruption(format!(
                                    "unknown field '{}' in {}",
                                    name, self.context
                                ))
                            })?;
                            if self.seen[idx] {
                                return Err(BatchlineError::DataCorruption(format!(
                                    "duplicate field '{}' in {}",
                                    name, self.context
                                )));
                            }
                            self.seen[idx] = true;
                            self.state = ObjectState::InValue(idx);
                        }
                        other => {
                            return Err(BatchlineError::internal(format!(
                                "tokenizer produced {} where a field name was expected",
                                other.describe()
                            )))
                        }
                    }
                }
                ObjectState::InValue(idx) => {
                    let vector = vectors.get_mut(idx).ok_or_else(|| {
                        BatchlineError::internal(format!("no vector for member {}", idx))
                    })?;
                    if !self.members[idx]
                        .consumer
                        .consume_element(cursor, vector, dictionaries)?
                    {
                        return Ok(false);
                    }
                    self.state = ObjectState::AwaitKey;
                }
            }
        }
    }

    fn fill_absent(&mut self, vectors: &mut [ColumnVector]) -> Result<(), BatchlineError> {
        for (idx, member) in self.members.iter().enumerate() {
            if self.seen[idx] {
                continue;
            }
            if !member.nullable {
                return Err(BatchlineError::DataCorruption(format!(
                    "missing required field '{}' in {}",
                    member.name, self.context
                )));
            }
            vectors[idx].append_null();
        }
        self.reset();
        Ok(())
    }
}
