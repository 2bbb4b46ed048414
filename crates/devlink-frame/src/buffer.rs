use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BufferError;
use crate::source::ByteSource;

/// Default ring capacity in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Default bound on how long a full buffer makes the producer wait.
pub const DEFAULT_OVERFLOW_WAIT: Duration = Duration::from_secs(1);

/// What [`StreamBuffer::push`] does when the ring is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait up to `max_wait` for the consumer to free space, then drop
    /// whatever still does not fit.
    Block {
        #[serde(
            with = "crate::serde_ms",
            rename = "max_wait_ms",
            default = "default_overflow_wait"
        )]
        max_wait: Duration,
    },
    /// Evict the oldest unmarked bytes to make room.
    DropOldest,
}

fn default_overflow_wait() -> Duration {
    DEFAULT_OVERFLOW_WAIT
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::Block {
            max_wait: DEFAULT_OVERFLOW_WAIT,
        }
    }
}

/// Bounded byte ring shared by one producer (the reader thread) and one
/// consumer (the decode loop).
///
/// Cursors are absolute stream offsets; the ring index is the offset modulo
/// capacity. Bytes from the mark (if any) up to the write cursor are
/// retained and count against capacity.
pub struct StreamBuffer {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    policy: OverflowPolicy,
}

struct State {
    ring: Box<[u8]>,
    read: u64,
    write: u64,
    mark: Option<u64>,
    closed: bool,
}

impl State {
    fn capacity(&self) -> usize {
        self.ring.len()
    }

    fn readable(&self) -> usize {
        (self.write - self.read) as usize
    }

    fn retained_from(&self) -> u64 {
        self.mark.map_or(self.read, |mark| mark.min(self.read))
    }

    fn free(&self) -> usize {
        self.capacity() - (self.write - self.retained_from()) as usize
    }

    /// Append `data`. The caller guarantees `data.len() <= self.free()`.
    fn put(&mut self, data: &[u8]) {
        let cap = self.capacity();
        let start = (self.write % cap as u64) as usize;
        let first = data.len().min(cap - start);
        self.ring[start..start + first].copy_from_slice(&data[..first]);
        self.ring[..data.len() - first].copy_from_slice(&data[first..]);
        self.write += data.len() as u64;
    }

    fn copy_out(&self, n: usize, dst: &mut Vec<u8>) {
        let cap = self.capacity();
        let start = (self.read % cap as u64) as usize;
        let first = n.min(cap - start);
        dst.extend_from_slice(&self.ring[start..start + first]);
        dst.extend_from_slice(&self.ring[..n - first]);
    }
}

impl StreamBuffer {
    /// Create a buffer with the default overflow policy.
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::default())
    }

    /// Create a buffer. A zero capacity is raised to one byte.
    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(State {
                ring: vec![0u8; capacity.max(1)].into_boxed_slice(),
                read: 0,
                write: 0,
                mark: None,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Append bytes from the producer.
    ///
    /// Returns the number of bytes discarded to make room (always 0 under
    /// `Block`, which reports drops as [`BufferError::Overflow`] instead).
    pub fn push(&self, data: &[u8]) -> Result<usize, BufferError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BufferError::Closed);
        }

        match self.policy {
            OverflowPolicy::Block { max_wait } => {
                let deadline = Instant::now() + max_wait;
                let mut rest = data;
                while !rest.is_empty() {
                    let free = state.free();
                    if free > 0 {
                        let n = free.min(rest.len());
                        state.put(&rest[..n]);
                        rest = &rest[n..];
                        self.readable.notify_all();
                        continue;
                    }
                    if state.closed {
                        return Err(BufferError::Closed);
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(dropped = rest.len(), "stream buffer full, dropping bytes");
                        return Err(BufferError::Overflow {
                            dropped: rest.len(),
                        });
                    }
                    state = self
                        .writable
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                Ok(0)
            }
            OverflowPolicy::DropOldest => {
                let mut rest = data;
                let mut dropped = 0;

                // Marked bytes are protected, so only free space is usable.
                let room = if state.mark.is_some() {
                    state.free()
                } else {
                    state.capacity()
                };
                if rest.len() > room {
                    dropped += rest.len() - room;
                    rest = &rest[rest.len() - room..];
                }

                let free = state.free();
                if rest.len() > free {
                    let evict = rest.len() - free;
                    state.read += evict as u64;
                    dropped += evict;
                }

                state.put(rest);
                self.readable.notify_all();
                if dropped > 0 {
                    warn!(dropped, "stream buffer full, discarded oldest bytes");
                }
                Ok(dropped)
            }
        }
    }

    /// Consume `n` bytes, waiting up to `timeout` (`None`: until closed).
    pub fn read(&self, n: usize, timeout: Option<Duration>) -> Result<Bytes, BufferError> {
        let mut out = Vec::with_capacity(n);
        self.take(&mut out, n, timeout.map(|t| Instant::now() + t), true)?;
        Ok(Bytes::from(out))
    }

    /// Like [`read`](Self::read) but leaves the bytes in place.
    pub fn peek(&self, n: usize, timeout: Option<Duration>) -> Result<Bytes, BufferError> {
        let mut out = Vec::with_capacity(n);
        self.take(&mut out, n, timeout.map(|t| Instant::now() + t), false)?;
        Ok(Bytes::from(out))
    }

    pub fn mark(&self) {
        let mut state = self.lock();
        state.mark = Some(state.read);
        self.writable.notify_all();
    }

    pub fn reset_to_mark(&self) {
        let mut state = self.lock();
        if let Some(mark) = state.mark {
            state.read = mark;
        }
    }

    pub fn commit(&self) {
        let mut state = self.lock();
        state.mark = None;
        self.writable.notify_all();
    }

    /// Discard up to `n` readable bytes without waiting.
    pub fn skip(&self, n: usize) -> usize {
        let mut state = self.lock();
        let skipped = n.min(state.readable());
        state.read += skipped as u64;
        if state.mark.is_none() {
            self.writable.notify_all();
        }
        skipped
    }

    pub fn available(&self) -> usize {
        self.lock().readable()
    }

    /// Close the buffer and wake every waiter. Buffered bytes stay readable.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(
        &self,
        dst: &mut Vec<u8>,
        n: usize,
        deadline: Option<Instant>,
        consume: bool,
    ) -> Result<(), BufferError> {
        let mut state = self.lock();
        let held = (state.read - state.retained_from()) as usize;
        if held + n > state.capacity() {
            return Err(BufferError::TooLarge {
                requested: n,
                capacity: state.capacity() - held,
            });
        }

        loop {
            if state.readable() >= n {
                break;
            }
            if state.closed {
                return Err(BufferError::Closed);
            }
            state = match deadline {
                None => self
                    .readable
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(BufferError::Timeout);
                    }
                    self.readable
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }

        state.copy_out(n, dst);
        if consume {
            state.read += n as u64;
            if state.mark.is_none() {
                self.writable.notify_all();
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("StreamBuffer")
            .field("capacity", &state.capacity())
            .field("read", &state.read)
            .field("write", &state.write)
            .field("mark", &state.mark)
            .field("closed", &state.closed)
            .finish()
    }
}

impl ByteSource for &StreamBuffer {
    fn mark(&mut self) {
        StreamBuffer::mark(self);
    }

    fn reset_to_mark(&mut self) {
        StreamBuffer::reset_to_mark(self);
    }

    fn commit(&mut self) {
        StreamBuffer::commit(self);
    }

    fn read_into(
        &mut self,
        dst: &mut Vec<u8>,
        n: usize,
        deadline: Option<Instant>,
    ) -> Result<(), BufferError> {
        self.take(dst, n, deadline, true)
    }

    fn skip(&mut self, n: usize) -> usize {
        StreamBuffer::skip(self, n)
    }

    fn available(&self) -> usize {
        StreamBuffer::available(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn push_then_read() {
        let buffer = StreamBuffer::new(16);
        buffer.push(b"hello").unwrap();
        assert_eq!(buffer.available(), 5);
        assert_eq!(buffer.peek(2, None).unwrap().as_ref(), b"he");
        assert_eq!(buffer.read(5, None).unwrap().as_ref(), b"hello");
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn read_waits_for_producer() {
        let buffer = Arc::new(StreamBuffer::new(16));
        let producer = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(b"ab").unwrap();
            thread::sleep(Duration::from_millis(20));
            producer.push(b"cd").unwrap();
        });

        let bytes = buffer.read(4, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(bytes.as_ref(), b"abcd");
        handle.join().unwrap();
    }

    #[test]
    fn read_times_out() {
        let buffer = StreamBuffer::new(16);
        buffer.push(b"a").unwrap();
        let err = buffer.read(2, Some(Duration::from_millis(20))).unwrap_err();
        assert_eq!(err, BufferError::Timeout);
        // Nothing consumed on failure.
        assert_eq!(buffer.available(), 1);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let buffer = StreamBuffer::new(16);
        buffer.push(b"abc").unwrap();
        buffer.close();

        assert_eq!(buffer.read(2, None).unwrap().as_ref(), b"ab");
        assert_eq!(buffer.read(2, None).unwrap_err(), BufferError::Closed);
        assert_eq!(buffer.read(1, None).unwrap().as_ref(), b"c");
        assert_eq!(buffer.push(b"x").unwrap_err(), BufferError::Closed);
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let buffer = Arc::new(StreamBuffer::new(16));
        let reader = Arc::clone(&buffer);
        let handle = thread::spawn(move || reader.read(1, None));

        thread::sleep(Duration::from_millis(20));
        buffer.close();
        assert_eq!(handle.join().unwrap().unwrap_err(), BufferError::Closed);
    }

    #[test]
    fn mark_reset_survives_wrap_around() {
        let buffer = StreamBuffer::new(8);
        buffer.push(b"012345").unwrap();
        buffer.read(6, None).unwrap();

        // Write cursor wraps past the end of the ring.
        buffer.push(b"ABCDE").unwrap();
        buffer.mark();
        assert_eq!(buffer.read(3, None).unwrap().as_ref(), b"ABC");
        buffer.reset_to_mark();
        assert_eq!(buffer.read(5, None).unwrap().as_ref(), b"ABCDE");
        buffer.commit();
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn marked_bytes_count_against_capacity() {
        let buffer = StreamBuffer::with_policy(
            4,
            OverflowPolicy::Block {
                max_wait: Duration::from_millis(20),
            },
        );
        buffer.push(b"abcd").unwrap();
        buffer.mark();
        buffer.read(4, None).unwrap();

        let err = buffer.push(b"e").unwrap_err();
        assert_eq!(err, BufferError::Overflow { dropped: 1 });

        buffer.commit();
        buffer.push(b"e").unwrap();
        assert_eq!(buffer.read(1, None).unwrap().as_ref(), b"e");
    }

    #[test]
    fn block_policy_drops_after_wait() {
        let buffer = StreamBuffer::with_policy(
            4,
            OverflowPolicy::Block {
                max_wait: Duration::from_millis(20),
            },
        );
        let err = buffer.push(b"abcdef").unwrap_err();
        assert_eq!(err, BufferError::Overflow { dropped: 2 });
        assert_eq!(buffer.read(4, None).unwrap().as_ref(), b"abcd");
    }

    #[test]
    fn block_policy_waits_for_consumer() {
        let buffer = Arc::new(StreamBuffer::new(4));
        let producer = Arc::clone(&buffer);
        let handle = thread::spawn(move || producer.push(b"abcdefgh"));

        let mut received = Vec::new();
        while received.len() < 8 {
            let chunk = buffer.read(2, Some(Duration::from_secs(2))).unwrap();
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"abcdefgh");
        assert_eq!(handle.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn drop_oldest_evicts_unmarked_bytes() {
        let buffer = StreamBuffer::with_policy(4, OverflowPolicy::DropOldest);
        buffer.push(b"abcd").unwrap();
        assert_eq!(buffer.push(b"ef").unwrap(), 2);
        assert_eq!(buffer.read(4, None).unwrap().as_ref(), b"cdef");
    }

    #[test]
    fn drop_oldest_never_evicts_marked_bytes() {
        let buffer = StreamBuffer::with_policy(4, OverflowPolicy::DropOldest);
        buffer.push(b"ab").unwrap();
        buffer.mark();
        buffer.read(1, None).unwrap();

        assert_eq!(buffer.push(b"cdef").unwrap(), 2);
        buffer.reset_to_mark();
        assert_eq!(buffer.read(2, None).unwrap().as_ref(), b"ab");
    }

    #[test]
    fn oversized_request_is_rejected() {
        let buffer = StreamBuffer::new(4);
        let err = buffer.read(5, None).unwrap_err();
        assert_eq!(
            err,
            BufferError::TooLarge {
                requested: 5,
                capacity: 4
            }
        );
    }

    #[test]
    fn policy_from_json() {
        let policy: OverflowPolicy = serde_json::from_str(r#"{"mode":"drop_oldest"}"#).unwrap();
        assert_eq!(policy, OverflowPolicy::DropOldest);

        let policy: OverflowPolicy =
            serde_json::from_str(r#"{"mode":"block","max_wait_ms":250}"#).unwrap();
        assert_eq!(
            policy,
            OverflowPolicy::Block {
                max_wait: Duration::from_millis(250)
            }
        );
    }
}
