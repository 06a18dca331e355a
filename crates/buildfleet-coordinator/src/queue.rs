//! Stable max-priority queue of build ids.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use buildfleet_core::BuildId;

/// A queued build.
///
/// `sequence` is assigned once at submission and kept across requeues, so a
/// build that is pushed back never loses its place among equal priorities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub build_id: BuildId,
    pub priority: i32,
    pub sequence: u64,
}

impl QueueEntry {
    pub fn new(build_id: BuildId, priority: i32, sequence: u64) -> Self {
        Self {
            build_id,
            priority,
            sequence,
        }
    }

    fn key(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, then lowest sequence
        self.key().cmp(&other.key())
    }
}

/// Priority queue over build ids, FIFO within equal priority.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. O(log n).
    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    /// Remove and return the highest-priority, earliest-submitted entry.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    /// Pop until an entry satisfies `eligible`, discarding the ones that don't.
    pub fn pop_eligible(
        &mut self,
        mut eligible: impl FnMut(&QueueEntry) -> bool,
    ) -> Option<QueueEntry> {
        while let Some(entry) = self.heap.pop() {
            if eligible(&entry) {
                return Some(entry);
            }
        }
        None
    }

    /// Number of entries, including ones that will be discarded on pop.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, priority: i32, sequence: u64) -> QueueEntry {
        QueueEntry::new(BuildId::new(id), priority, sequence)
    }

    fn drain(queue: &mut PriorityQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop())
            .map(|e| e.build_id.into_inner())
            .collect()
    }

    #[test]
    fn test_higher_priority_first() {
        let mut queue = PriorityQueue::new();
        queue.push(entry("low", 1, 1));
        queue.push(entry("high", 5, 2));
        queue.push(entry("negative", -3, 3));

        assert_eq!(drain(&mut queue), vec!["high", "low", "negative"]);
    }

    #[test]
    fn test_fifo_within_equal_priority() {
        let mut queue = PriorityQueue::new();
        for seq in 1..=50 {
            queue.push(entry(&format!("b{seq:02}"), 0, seq));
        }

        let order = drain(&mut queue);
        let expected: Vec<String> = (1..=50).map(|seq| format!("b{seq:02}")).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_requeued_entry_keeps_its_place() {
        let mut queue = PriorityQueue::new();
        queue.push(entry("first", 0, 1));
        queue.push(entry("second", 0, 2));

        let head = queue.pop().unwrap();
        queue.push(entry("third", 0, 3));
        queue.push(head);

        assert_eq!(drain(&mut queue), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_pop_eligible_discards_stale_entries() {
        let mut queue = PriorityQueue::new();
        queue.push(entry("cancelled", 9, 1));
        queue.push(entry("live", 1, 2));

        let popped = queue.pop_eligible(|e| e.build_id.as_str() != "cancelled");
        assert_eq!(popped.map(|e| e.build_id.into_inner()), Some("live".to_string()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_empty_pop() {
        let mut queue = PriorityQueue::new();
        assert!(queue.pop().is_none());
        assert!(queue.pop_eligible(|_| true).is_none());
    }
}
