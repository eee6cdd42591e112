//! This module provides a set of shared, low-level utilities used throughout the
//! batchline engine.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

//==================================================================================
// 1. Shared output buffer
//==================================================================================

/// An `io::Write` target whose bytes can be drained while a writer still owns it.
///
/// The Arrow IPC writers and the CSV writer take ownership of their `Write`
/// target. Encoders hand them a clone of this buffer and call [`SharedBuffer::take`]
/// after every batch to forward the produced bytes to the byte sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Rc<RefCell<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything written so far.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.inner.borrow_mut())
    }

    /// A copy of everything written so far, leaving the buffer intact.
    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_drains_bytes_written_through_a_clone() {
        let buffer = SharedBuffer::new();
        let mut writer = buffer.clone();
        writer.write_all(b"abc").unwrap();
        assert_eq!(buffer.take(), b"abc");
        assert!(buffer.is_empty());
        writer.write_all(b"d").unwrap();
        assert_eq!(buffer.take(), b"d");
    }
}
