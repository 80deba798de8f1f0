// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion buffer shared by every producer and the flusher.
//!
//! Only two operations touch the contents: [`MessageBuffer::append`] and
//! [`MessageBuffer::drain_all`]. Both run under a single mutex, so a message
//! is either in the drained batch or still in the buffer, never both.
//!
//! The buffer is unbounded unless a cap is configured. With a cap the oldest
//! message is evicted to make room, which keeps producers from ever blocking
//! at the cost of losing data under a producer storm. Evictions are counted
//! and reported by the flusher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::message::RawMessage;

/// Messages captured between two flush ticks.
pub type Batch = Vec<RawMessage>;

#[derive(Debug, Default)]
pub struct MessageBuffer {
    messages: Mutex<VecDeque<RawMessage>>,
    max_messages: Option<usize>,
    dropped: AtomicU64,
}

impl MessageBuffer {
    /// Creates an unbounded buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer holding at most `max_messages`, evicting the oldest
    /// message when full. `None` means unbounded.
    pub fn with_limit(max_messages: Option<usize>) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            max_messages,
            dropped: AtomicU64::new(0),
        }
    }

    // A panic while holding the lock cannot leave the deque half-written, so
    // poisoning is ignored rather than surfaced to producers.
    fn lock(&self) -> MutexGuard<'_, VecDeque<RawMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, message: RawMessage) {
        let mut messages = self.lock();
        if let Some(max) = self.max_messages {
            if messages.len() >= max {
                messages.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        messages.push_back(message);
    }

    /// Detaches everything currently buffered, leaving the buffer empty.
    pub fn drain_all(&self) -> Batch {
        let drained = std::mem::take(&mut *self.lock());
        Vec::from(drained)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Total number of messages evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the evictions since the previous call and resets the counter.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn tagged(marker: usize) -> RawMessage {
        RawMessage::build("10.0.0.1", 40000, "10.0.0.2", 80, format!("msg-{marker}"))
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = MessageBuffer::new();
        buffer.append(tagged(1));
        buffer.append(tagged(2));
        assert_eq!(buffer.len(), 2);

        let batch = buffer.drain_all();
        assert_eq!(batch.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn test_single_producer_order_is_preserved() {
        let buffer = MessageBuffer::new();
        for i in 0..10 {
            buffer.append(tagged(i));
        }
        let payloads: Vec<String> = buffer
            .drain_all()
            .iter()
            .map(|m| m.payload().to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("msg-{i}")).collect();
        assert_eq!(payloads, expected);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let buffer = Arc::new(MessageBuffer::new());
        let producers = 8;
        let per_producer = 250;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        buffer.append(tagged(p * per_producer + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let batch = buffer.drain_all();
        assert_eq!(batch.len(), producers * per_producer);
        let unique: HashSet<&str> = batch.iter().map(RawMessage::payload).collect();
        assert_eq!(unique.len(), producers * per_producer);
    }

    #[test]
    fn test_drains_racing_appends_are_disjoint_and_complete() {
        let buffer = Arc::new(MessageBuffer::new());
        let total = 2_000;

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..total {
                    buffer.append(tagged(i));
                }
            })
        };
        let drainer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut batches = Vec::new();
                for _ in 0..50 {
                    batches.push(buffer.drain_all());
                    thread::yield_now();
                }
                batches
            })
        };

        producer.join().unwrap();
        let mut batches = drainer.join().unwrap();
        batches.push(buffer.drain_all());

        let mut seen = HashSet::new();
        for batch in &batches {
            for message in batch {
                assert!(seen.insert(message.payload().to_string()), "duplicate message");
            }
        }
        assert_eq!(seen.len(), total);
    }

    #[test]
    fn test_limit_evicts_oldest() {
        let buffer = MessageBuffer::with_limit(Some(3));
        for i in 0..5 {
            buffer.append(tagged(i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);

        let payloads: Vec<String> = buffer
            .drain_all()
            .iter()
            .map(|m| m.payload().to_string())
            .collect();
        assert_eq!(payloads, vec!["msg-2", "msg-3", "msg-4"]);

        assert_eq!(buffer.take_dropped(), 2);
        assert_eq!(buffer.take_dropped(), 0);
    }

    #[test]
    fn test_unbounded_never_drops() {
        let buffer = MessageBuffer::with_limit(None);
        for i in 0..10_000 {
            buffer.append(tagged(i));
        }
        assert_eq!(buffer.len(), 10_000);
        assert_eq!(buffer.dropped(), 0);
    }
}
