//! Sliding window over the most recent capture samples.
//!
//! The capture callback pushes every block it sees; the voice-activity
//! monitor reads the newest window on each tick without consuming it, so
//! capture and analysis never compete for the same data.
//!
//! ```rust
//! use agnes_voice::audio::RingBuffer;
//!
//! let mut buf = RingBuffer::new(4);
//! buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(buf.snapshot(), vec![2.0, 3.0, 4.0, 5.0]);
//! assert_eq!(buf.len(), 4); // snapshot does not consume
//! ```

use std::collections::VecDeque;

/// Bounded FIFO that evicts the oldest samples once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RingBuffer<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push_slice(&mut self, data: &[T]) {
        let tail = &data[data.len().saturating_sub(self.capacity)..];
        let overflow = (self.samples.len() + tail.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(tail.iter().copied());
    }

    /// Copy of the stored samples, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
