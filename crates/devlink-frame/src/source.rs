use std::time::Instant;

use crate::error::BufferError;

/// Pull-side view of a byte stream with speculative consumption.
///
/// The scanner marks the start of a candidate frame, consumes bytes while
/// probing, and either commits them or rolls back to the mark.
pub trait ByteSource {
    /// Remember the current read position. Replaces any earlier mark.
    fn mark(&mut self);

    /// Move the read position back to the mark. The mark stays set.
    fn reset_to_mark(&mut self);

    /// Forget the mark, releasing the bytes it protected.
    fn commit(&mut self);

    /// Consume exactly `n` bytes, appending them to `dst`.
    ///
    /// Waits until `deadline` (`None`: until the source closes). Nothing is
    /// consumed on error. `Closed` means the source ended with fewer than
    /// `n` readable bytes.
    fn read_into(
        &mut self,
        dst: &mut Vec<u8>,
        n: usize,
        deadline: Option<Instant>,
    ) -> Result<(), BufferError>;

    /// Discard up to `n` readable bytes. Returns how many were discarded.
    fn skip(&mut self, n: usize) -> usize;

    /// Readable byte count.
    fn available(&self) -> usize;
}

/// A finished, in-memory byte capture.
///
/// Behaves like a [`StreamBuffer`](crate::StreamBuffer) that was closed
/// after all bytes were pushed: reads never wait.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
    mark: Option<usize>,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            mark: None,
        }
    }

    /// Current read offset from the start of the capture.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl ByteSource for SliceSource<'_> {
    fn mark(&mut self) {
        self.mark = Some(self.pos);
    }

    fn reset_to_mark(&mut self) {
        if let Some(mark) = self.mark {
            self.pos = mark;
        }
    }

    fn commit(&mut self) {
        self.mark = None;
    }

    fn read_into(
        &mut self,
        dst: &mut Vec<u8>,
        n: usize,
        _deadline: Option<Instant>,
    ) -> Result<(), BufferError> {
        if self.available() < n {
            return Err(BufferError::Closed);
        }
        dst.extend_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(())
    }

    fn skip(&mut self, n: usize) -> usize {
        let skipped = n.min(self.available());
        self.pos += skipped;
        skipped
    }

    fn available(&self) -> usize {
        self.data.len() - self.pos
    }
}
