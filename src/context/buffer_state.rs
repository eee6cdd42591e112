// In: src/context/buffer_state.rs

//! The flow-control state of one half of the double buffer.
//!
//! Every legal transition is listed in `BufferState::on`; the match is exhaustive
//! over `(state, event)` so adding a state forces every transition to be revisited.

use std::fmt;

use crate::error::BatchlineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferState {
    /// Holds nothing; may start loading (back) or receive a flip (front).
    #[default]
    Empty,
    /// Vectors are being appended to. Only the back buffer ever loads.
    Loading,
    /// Holds a complete batch.
    Loaded,
    /// A consumer is draining the batch; the slot becomes `Empty` when it is done.
    Unloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    BeginLoad,
    FinishLoad,
    BeginUnload,
    FinishUnload,
    /// The slot was handed across in a flip (back `Loaded -> Empty`, front `Empty -> Loaded`).
    FlipOut,
    FlipIn,
}

impl BufferState {
    /// Applies `event`, returning the next state or a precondition violation.
    pub fn on(self, event: BufferEvent) -> Result<BufferState, BatchlineError> {
        use BufferEvent::*;
        use BufferState::*;
        match (self, event) {
            (Empty, BeginLoad) => Ok(Loading),
            (Loading, FinishLoad) => Ok(Loaded),
            (Loaded, BeginUnload) => Ok(Unloading),
            (Unloading, FinishUnload) => Ok(Empty),
            (Loaded, FlipOut) => Ok(Empty),
            (Empty, FlipIn) => Ok(Loaded),
            (Empty, FinishLoad | BeginUnload | FinishUnload | FlipOut)
            | (Loading, BeginLoad | BeginUnload | FinishUnload | FlipOut | FlipIn)
            | (Loaded, BeginLoad | FinishLoad | FinishUnload | FlipIn)
            | (Unloading, BeginLoad | FinishLoad | BeginUnload | FlipOut | FlipIn) => {
                Err(BatchlineError::PreconditionViolation(format!(
                    "illegal buffer transition {:?} on {}",
                    event, self
                )))
            }
        }
    }

    /// `true` while the slot holds rows that have not been released.
    pub fn is_occupied(&self) -> bool {
        !matches!(self, Self::Empty)
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
