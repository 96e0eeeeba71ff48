//! Min-heap of scheduled entries keyed by target time.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Anything the queue can order.
pub trait Scheduled {
    /// Monotonic nanosecond timestamp at which the entry becomes due.
    fn target_time(&self) -> u64;
    /// Unique id used for removal and as the tie-break.
    fn sequence(&self) -> u64;
}

struct HeapEntry<T>(T);

impl<T: Scheduled> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Scheduled> Eq for HeapEntry<T> {}

impl<T: Scheduled> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Scheduled> Ord for HeapEntry<T> {
    // Reversed: BinaryHeap is a max-heap, we want the earliest target on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .target_time()
            .cmp(&self.0.target_time())
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

/// Ordered container of scheduled entries.
///
/// Not synchronized; the owning [`EventLoop`](super::EventLoop) guards it
/// with its queue mutex.
pub struct PriorityEventQueue<T> {
    heap: BinaryHeap<HeapEntry<T>>,
}

impl<T: Scheduled> PriorityEventQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, entry: T) {
        self.heap.push(HeapEntry(entry));
    }

    /// Earliest entry without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|e| &e.0)
    }

    /// Target time of the earliest entry.
    pub fn peek_target(&self) -> Option<u64> {
        self.peek().map(Scheduled::target_time)
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|e| e.0)
    }

    /// Pop the earliest entry only if it is due at `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<T> {
        match self.peek_target() {
            Some(target) if target <= now => self.pop(),
            _ => None,
        }
    }

    /// Remove the entry with `sequence`. Returns whether it was present.
    pub fn remove(&mut self, sequence: u64) -> bool {
        let before = self.heap.len();
        self.heap.retain(|e| e.0.sequence() != sequence);
        self.heap.len() != before
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every entry, handing them back so the caller controls when
    /// they are dropped.
    pub fn drain(&mut self) -> Vec<T> {
        self.heap.drain().map(|e| e.0).collect()
    }
}

impl<T: Scheduled> Default for PriorityEventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
