//! Unbounded in-memory buffer for raw record payloads.
//!
//! Delivery tasks append from the hot path while a consumer drains batches
//! out; both sides go through a lock-free queue so neither blocks the other.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::SegQueue;

/// Thread-safe unbounded FIFO of raw record payloads.
///
/// The buffer never drops a record on its own: capacity management is left
/// to the consumer, which is expected to drain in batches. Payloads are
/// opaque text; nothing here parses them.
#[derive(Default)]
pub struct RecordBuffer {
    queue: SegQueue<String>,
    /// Lifetime append count, for monitoring (never decremented).
    total_appended: AtomicU64,
}

impl RecordBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record. Never blocks, never fails.
    pub fn append(&self, record: String) {
        self.queue.push(record);
        self.total_appended.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes and returns everything currently queued, in FIFO order.
    ///
    /// Records appended concurrently with a drain land either in the
    /// returned batch or in the queue for the next drain, never nowhere.
    pub fn drain(&self) -> Vec<String> {
        let mut batch = Vec::with_capacity(self.queue.len());
        while let Some(record) = self.queue.pop() {
            batch.push(record);
        }
        batch
    }

    /// Discards everything currently queued.
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total records appended over the buffer's lifetime.
    pub fn total_appended(&self) -> u64 {
        self.total_appended.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_append_and_len() {
        let buffer = RecordBuffer::new();
        assert!(buffer.is_empty());

        for i in 0..100 {
            buffer.append(format!("record-{i}"));
        }

        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.total_appended(), 100);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let buffer = RecordBuffer::new();
        buffer.append("first".to_string());
        buffer.append("second".to_string());
        buffer.append("third".to_string());

        let batch = buffer.drain();
        assert_eq!(batch, vec!["first", "second", "third"]);
        assert_eq!(buffer.len(), 0);

        // Drain followed by clear leaves the buffer at size 0.
        buffer.append("late".to_string());
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_clear_discards_everything() {
        let buffer = RecordBuffer::new();
        for i in 0..10 {
            buffer.append(i.to_string());
        }
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        // Lifetime counter is unaffected by clear.
        assert_eq!(buffer.total_appended(), 10);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let buffer = Arc::new(RecordBuffer::new());
        let threads = 4;
        let per_thread = 250;

        let mut handles = Vec::new();
        for t in 0..threads {
            let buffer = Arc::clone(&buffer);
            handles.push(thread::spawn(move || {
                for i in 0..per_thread {
                    buffer.append(format!("{t}-{i}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), threads * per_thread);
        assert_eq!(buffer.total_appended(), (threads * per_thread) as u64);
        assert_eq!(buffer.drain().len(), threads * per_thread);
    }
}
