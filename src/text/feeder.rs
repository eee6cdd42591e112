// In: src/text/feeder.rs

//! The pausable byte feeder in front of the tokenizers.
//!
//! Lexers read from `remaining()` and `consume()` only whole tokens (or whole
//! structural bytes). Anything left unconsumed when a chunk runs dry is the partial
//! tail of a token and is kept for the next `feed`.

/// Buffered input of one text decoder.
#[derive(Debug, Default)]
pub struct ByteFeeder {
    buf: Vec<u8>,
    pos: usize,
    /// Absolute offset of `buf[0]` in the whole input.
    base_offset: u64,
    fed_total: u64,
    end_of_input: bool,
}

impl ByteFeeder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk behind the retained partial tail.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.base_offset += self.pos as u64;
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
        self.fed_total += chunk.len() as u64;
    }

    /// Marks that no further chunk will arrive.
    pub fn set_end_of_input(&mut self) {
        self.end_of_input = true;
    }

    pub fn is_end_of_input(&self) -> bool {
        self.end_of_input
    }

    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub fn consume(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.buf.len());
        self.pos = (self.pos + n).min(self.buf.len());
    }

    /// Total number of bytes ever fed.
    pub fn fed_total(&self) -> u64 {
        self.fed_total
    }

    /// Absolute input offset of the next unconsumed byte, for error messages.
    pub fn offset(&self) -> u64 {
        self.base_offset + self.pos as u64
    }

    /// Releases the buffer.
    pub fn clear(&mut self) {
        self.buf = Vec::new();
        self.pos = 0;
    }
}
