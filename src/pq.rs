//! Priority Queue with lazy cancellation
//!
//! A BinaryHeap of keys next to a HashMap that owns the payloads.
//! Entries are keyed by (deadline, seq) so equal deadlines pop in insertion
//! order. Cancelled entries stay in the heap until they reach the top.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

/// A min-priority queue keyed by deadline, with removal by sequence number.
/// The HashMap is the source of truth; heap keys without a live entry are stale.
pub struct MinPq<M> {
    heap: BinaryHeap<Reverse<(Duration, u64)>>,
    live: HashMap<u64, (Duration, M)>, // seq -> (deadline, payload)
    next_seq: u64,
}

impl<M> Default for MinPq<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MinPq<M> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Add an item. Returns its sequence number, usable with `remove`.
    pub fn push(&mut self, deadline: Duration, meta: M) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(seq, (deadline, meta));
        self.heap.push(Reverse((deadline, seq)));
        seq
    }

    /// Remove an item by sequence number. Returns the payload if it was live.
    pub fn remove(&mut self, seq: u64) -> Option<M> {
        self.live.remove(&seq).map(|(_, m)| m)
    }

    /// Earliest live deadline, dropping stale keys on the way.
    pub fn peek_deadline(&mut self) -> Option<Duration> {
        self.clean_top();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop the minimum item. Returns (seq, deadline, payload).
    pub fn pop(&mut self) -> Option<(u64, Duration, M)> {
        loop {
            let Reverse((_, seq)) = self.heap.pop()?;
            if let Some((deadline, meta)) = self.live.remove(&seq) {
                return Some((seq, deadline, meta));
            }
        }
    }

    /// Remove stale entries from the top of the heap.
    fn clean_top(&mut self) {
        while let Some(Reverse((_, seq))) = self.heap.peek() {
            if self.live.contains_key(seq) {
                break;
            }
            self.heap.pop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Live items, not counting stale heap keys.
    pub fn len(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_pops_in_deadline_order() {
        let mut pq: MinPq<&str> = MinPq::new();

        pq.push(ms(500), "first");
        pq.push(ms(200), "second");
        pq.push(ms(800), "third");
        assert_eq!(pq.len(), 3);

        let (_, dl, meta) = pq.pop().unwrap();
        assert_eq!(dl, ms(200));
        assert_eq!(meta, "second");

        let (_, dl, meta) = pq.pop().unwrap();
        assert_eq!(dl, ms(500));
        assert_eq!(meta, "first");
    }

    #[test]
    fn test_remove() {
        let mut pq: MinPq<i32> = MinPq::new();

        pq.push(ms(500), 100);
        let min = pq.push(ms(200), 200);
        pq.push(ms(800), 300);

        assert_eq!(pq.remove(min), Some(200));
        assert_eq!(pq.remove(min), None);
        assert_eq!(pq.peek_deadline(), Some(ms(500)));

        let (_, _, meta) = pq.pop().unwrap();
        assert_eq!(meta, 100);
    }

    #[test]
    fn test_equal_deadlines_pop_in_insertion_order() {
        let mut pq: MinPq<u32> = MinPq::new();

        pq.push(ms(5), 1);
        pq.push(ms(5), 2);
        pq.push(ms(1), 0);
        pq.push(ms(5), 3);

        let order: Vec<u32> = std::iter::from_fn(|| pq.pop().map(|(_, _, m)| m)).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(pq.is_empty());
        assert_eq!(pq.peek_deadline(), None);
    }
}
