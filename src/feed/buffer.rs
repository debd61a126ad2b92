//! Accumulate-and-drain byte buffer shared by one producer and one consumer.

use bytes::Bytes;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of [`ElementaryBuffer::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The data was copied; the buffer now holds `cursor` bytes.
    Stored { cursor: usize },
    /// The data did not fit and was discarded whole.
    Full { had_data: bool },
    /// The abort check fired before the data was stored.
    Aborted,
}

impl AppendOutcome {
    /// `true` when the buffer holds data the consumer should pick up.
    pub fn has_data(&self) -> bool {
        match *self {
            AppendOutcome::Stored { cursor } => cursor > 0,
            AppendOutcome::Full { had_data } => had_data,
            AppendOutcome::Aborted => false,
        }
    }
}

/// A fixed-capacity byte buffer with an atomic fill cursor.
///
/// The producer copies new data behind the cursor and then moves the cursor
/// forward with a compare-and-swap; the consumer copies `[0, cursor)` and
/// swaps the cursor back to zero. Neither side takes a lock.
///
/// # Single producer, single consumer
///
/// Safety rests on there being exactly one thread calling
/// [`append`](Self::append) and exactly one thread calling
/// [`drain`](Self::drain) at any time. The producer only writes at or past
/// the cursor it observed and the consumer only reads below the cursor it
/// observed, so their byte ranges never overlap; a lost CAS race means the
/// other side moved the cursor and the operation is redone from the new
/// value. A second producer would break this and must not be added without
/// a different scheme.
pub struct ElementaryBuffer {
    /// Start of the leaked `Box<[u8]>`; only ever accessed through raw
    /// pointers and given back in `Drop`.
    base: NonNull<u8>,
    capacity: usize,
    cursor: AtomicUsize,
}

// Access to the allocation is partitioned by the cursor protocol described
// above.
unsafe impl Send for ElementaryBuffer {}
unsafe impl Sync for ElementaryBuffer {}

impl ElementaryBuffer {
    pub fn new(capacity: usize) -> Self {
        let data: Box<[u8]> = vec![0u8; capacity].into_boxed_slice();
        let raw = Box::into_raw(data);
        // SAFETY: `Box::into_raw` never returns null.
        let base = unsafe { NonNull::new_unchecked(raw as *mut u8) };
        Self {
            base,
            capacity,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently waiting to be drained.
    pub fn len(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `data` behind the cursor. Producer side.
    ///
    /// `abort` is consulted before every attempt; data that would overflow
    /// the buffer is discarded and the buffer is left untouched.
    pub fn append(&self, data: &[u8], abort: impl Fn() -> bool) -> AppendOutcome {
        loop {
            if abort() {
                return AppendOutcome::Aborted;
            }

            let cursor = self.cursor.load(Ordering::Acquire);
            let end = cursor + data.len();
            if end > self.capacity() {
                return AppendOutcome::Full {
                    had_data: cursor > 0,
                };
            }

            // SAFETY: [cursor, end) lies within the allocation and is past the
            // cursor, so the single consumer is not reading it.
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), self.base.as_ptr().add(cursor), data.len())
            };

            if self
                .cursor
                .compare_exchange(cursor, end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return AppendOutcome::Stored { cursor: end };
            }
        }
    }

    /// Takes everything appended so far. Consumer side.
    ///
    /// Returns `None` when the buffer is empty or `abort` fires.
    pub fn drain(&self, abort: impl Fn() -> bool) -> Option<Bytes> {
        loop {
            if abort() {
                return None;
            }

            let cursor = self.cursor.load(Ordering::Acquire);
            if cursor == 0 {
                return None;
            }

            let mut chunk = vec![0u8; cursor];
            // SAFETY: [0, cursor) was published by the producer's release CAS
            // and is not written again until the cursor is reset.
            unsafe { ptr::copy_nonoverlapping(self.base.as_ptr(), chunk.as_mut_ptr(), cursor) };

            if self
                .cursor
                .compare_exchange(cursor, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(Bytes::from(chunk));
            }
        }
    }

    /// Drops all pending data.
    pub fn clear(&self) {
        self.cursor.store(0, Ordering::Release);
    }
}

impl Drop for ElementaryBuffer {
    fn drop(&mut self) {
        let raw = ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.capacity);
        // SAFETY: `raw` is the pointer leaked in `new`, rebuilt with its
        // original length, and no other reference to it remains.
        drop(unsafe { Box::from_raw(raw) });
    }
}

impl std::fmt::Debug for ElementaryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementaryBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn never() -> bool {
        false
    }

    #[test]
    fn test_append_then_drain() {
        let buffer = ElementaryBuffer::new(16);
        assert_eq!(buffer.append(b"abc", never), AppendOutcome::Stored { cursor: 3 });
        assert_eq!(buffer.append(b"defg", never), AppendOutcome::Stored { cursor: 7 });

        assert_eq!(buffer.drain(never).unwrap(), Bytes::from_static(b"abcdefg"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_keeps_content() {
        let buffer = ElementaryBuffer::new(8);
        assert_eq!(buffer.append(b"too long for it", never), AppendOutcome::Full { had_data: false });
        assert!(!buffer.append(b"too long for it", never).has_data());

        buffer.append(b"12345", never);
        assert_eq!(buffer.append(b"6789", never), AppendOutcome::Full { had_data: true });
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.drain(never).unwrap(), Bytes::from_static(b"12345"));
    }

    #[test]
    fn test_exact_fit() {
        let buffer = ElementaryBuffer::new(4);
        assert_eq!(buffer.append(b"1234", never), AppendOutcome::Stored { cursor: 4 });
        assert_eq!(buffer.append(b"5", never), AppendOutcome::Full { had_data: true });
    }

    #[test]
    fn test_empty_drain_yields_nothing() {
        let buffer = ElementaryBuffer::new(4);
        assert!(buffer.drain(never).is_none());
        buffer.append(b"", never);
        assert!(buffer.drain(never).is_none());
    }

    #[test]
    fn test_zero_capacity_and_drop_across_threads() {
        let buffer = ElementaryBuffer::new(0);
        assert_eq!(buffer.capacity(), 0);
        assert_eq!(buffer.append(b"", never), AppendOutcome::Stored { cursor: 0 });
        assert_eq!(buffer.append(b"x", never), AppendOutcome::Full { had_data: false });

        let buffer = ElementaryBuffer::new(32);
        buffer.append(b"moved", never);
        let drained = thread::spawn(move || buffer.drain(never)).join().unwrap();
        assert_eq!(drained.unwrap(), Bytes::from_static(b"moved"));
    }

    #[test]
    fn test_abort_short_circuits() {
        let buffer = ElementaryBuffer::new(16);
        buffer.append(b"abc", never);
        assert_eq!(buffer.append(b"def", || true), AppendOutcome::Aborted);
        assert!(buffer.drain(|| true).is_none());
        assert_eq!(buffer.len(), 3);

        buffer.clear();
        assert!(buffer.drain(never).is_none());
    }

    #[quickcheck]
    fn prop_matches_sequential_model(ops: Vec<(bool, Vec<u8>)>) -> bool {
        let buffer = ElementaryBuffer::new(64);
        let mut model: Vec<u8> = Vec::new();

        for (is_append, data) in ops {
            if is_append {
                let before = model.len();
                let outcome = buffer.append(&data, never);
                if before + data.len() <= 64 {
                    model.extend_from_slice(&data);
                    if outcome != (AppendOutcome::Stored { cursor: model.len() }) {
                        return false;
                    }
                } else if outcome != (AppendOutcome::Full { had_data: before > 0 }) {
                    return false;
                }
            } else {
                let drained = buffer.drain(never);
                let expected = std::mem::take(&mut model);
                match drained {
                    Some(chunk) if !expected.is_empty() => {
                        if chunk[..] != expected[..] {
                            return false;
                        }
                    }
                    None if expected.is_empty() => {}
                    _ => return false,
                }
            }
        }
        true
    }

    #[test]
    fn test_concurrent_producer_and_consumer() {
        let buffer = Arc::new(ElementaryBuffer::new(4096));
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let buffer = buffer.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut stored = Vec::new();
                let mut value = 0u32;
                for round in 0..5_000usize {
                    let chunk: Vec<u8> = (0..(round % 97) + 1)
                        .flat_map(|_| {
                            value = value.wrapping_add(1);
                            value.to_be_bytes()
                        })
                        .collect();
                    if let AppendOutcome::Stored { .. } = buffer.append(&chunk, || false) {
                        stored.extend_from_slice(&chunk);
                    }
                }
                done.store(true, Ordering::Release);
                stored
            })
        };

        let mut received = Vec::new();
        loop {
            let finished = done.load(Ordering::Acquire);
            if let Some(chunk) = buffer.drain(|| false) {
                received.extend_from_slice(&chunk);
            } else if finished {
                break;
            }
        }

        let stored = producer.join().unwrap();
        assert_eq!(received.len(), stored.len());
        assert!(received == stored);
    }
}
