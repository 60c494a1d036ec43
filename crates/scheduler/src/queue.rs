//! Stable weighted FIFO queue.
//!
//! Entries are kept in ascending weight order; insertion scans for the
//! first entry with a strictly greater weight and inserts before it, so
//! entries of equal weight keep their arrival order.

use std::collections::VecDeque;

struct Entry<T> {
    weight: f64,
    item: T,
}

/// An ascending-weight queue with FIFO ordering among equal weights.
pub struct WeightedQueue<T> {
    entries: VecDeque<Entry<T>>,
}

impl<T> Default for WeightedQueue<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T> WeightedQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert before the first entry with a strictly greater weight.
    pub fn insert(&mut self, weight: f64, item: T) {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.weight > weight)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, Entry { weight, item });
    }

    /// The lowest-weight entry, oldest among ties.
    pub fn front(&self) -> Option<&T> {
        self.entries.front().map(|entry| &entry.item)
    }

    pub fn pop_front(&mut self) -> Option<(f64, T)> {
        self.entries.pop_front().map(|entry| (entry.weight, entry.item))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
