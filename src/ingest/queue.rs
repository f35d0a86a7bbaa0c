// src/ingest/queue.rs
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

/// Anything that can sit in a [`DueQueue`].
pub trait Due {
    fn due_at(&self) -> Instant;
}

/// Heap entry; reversed ordering so `BinaryHeap` (a max-heap) pops the
/// earliest due time first.
#[derive(Debug)]
struct Entry<T>(T);

impl<T: Due> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.due_at() == other.0.due_at()
    }
}

impl<T: Due> Eq for Entry<T> {}

impl<T: Due> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Due> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.due_at().cmp(&self.0.due_at())
    }
}

/// Min-heap of jobs keyed by due time. Ties pop in unspecified order.
///
/// Not synchronized; the orchestrator guards it with its own lock.
#[derive(Debug)]
pub struct DueQueue<T> {
    heap: BinaryHeap<Entry<T>>,
}

impl<T: Due> DueQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn insert(&mut self, job: T) {
        self.heap.push(Entry(job));
    }

    pub fn peek_earliest(&self) -> Option<&T> {
        self.heap.peek().map(|e| &e.0)
    }

    pub fn remove_earliest(&mut self) -> Option<T> {
        self.heap.pop().map(|e| e.0)
    }

    /// Removes and returns the earliest job only if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        match self.peek_earliest() {
            Some(job) if job.due_at() <= now => self.remove_earliest(),
            _ => None,
        }
    }
}

impl<T: Due> Default for DueQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
