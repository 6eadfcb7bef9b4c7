use std::collections::VecDeque;

use bytes::Bytes;

/// The received but not yet read data of one connection.
///
/// Segments are kept in arrival order. A read may take only part of the head segment, the rest
/// stays at the head with its consumed offset advanced.
#[derive(Debug, Default)]
pub struct PacketQueue {
    segments: VecDeque<QueuedSegment>,
    remaining: usize,
}

/// One received segment.
#[derive(Clone, Debug)]
pub struct QueuedSegment {
    data: Bytes,
    consumed: usize,
}

impl QueuedSegment {
    /// The unread bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    /// The number of bytes already read.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl PacketQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        PacketQueue::default()
    }

    /// Append a segment.
    ///
    /// Empty segments are not queued.
    pub fn push(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }

        self.remaining += data.len();
        self.segments.push_back(QueuedSegment { data, consumed: 0 });
    }

    /// Take up to `max` bytes from the head segment.
    ///
    /// A fully consumed segment is removed, otherwise its consumed offset advances. The returned
    /// chunk shares the segment's buffer so that it can be copied out after the queue was
    /// released.
    pub fn take_front(&mut self, max: usize) -> Option<Bytes> {
        if max == 0 {
            return None;
        }

        let head = self.segments.front_mut()?;
        let available = head.data.len() - head.consumed;
        let len = available.min(max);
        let chunk = head.data.slice(head.consumed..head.consumed + len);

        if len == available {
            self.segments.pop_front();
        } else {
            head.consumed += len;
        }

        self.remaining -= len;
        Some(chunk)
    }

    /// The head segment, if any.
    pub fn front(&self) -> Option<&QueuedSegment> {
        self.segments.front()
    }

    /// Free all segments, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.segments.len();
        self.segments.clear();
        self.remaining = 0;
        count
    }

    /// Check if no data is queued.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The number of queued segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// The number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}
