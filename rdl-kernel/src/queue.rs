//! Bounded binary min-heap of events, keyed by `(timestamp, sequence)`.
//!
//! `std::collections::BinaryHeap` is a max-heap; `Event`'s `Ord` impl is
//! reversed (see event.rs) so the heap pops the earliest event first. The
//! heap itself grows without bound, so capacity is enforced at the call
//! site: push reports "queue full" as a `bool` rather than letting the
//! backing storage grow past budget.

use crate::event::Event;
use std::collections::BinaryHeap;

pub struct EventQueue {
    heap: BinaryHeap<Event>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push an event. Returns `false` (and leaves the queue unchanged) if
    /// the queue is at capacity. Callers decide whether that failure is
    /// structured (reject caller input) or a fatal design-invariant
    /// violation (see `RdlKernel::flush_pending_events`); the queue
    /// itself never panics or grows.
    #[inline]
    pub fn push(&mut self, event: Event) -> bool {
        if self.heap.len() >= self.capacity {
            return false;
        }
        self.heap.push(event);
        true
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torus::Cell;

    fn ev(ts: u64, seq: u64) -> Event {
        Event {
            timestamp: ts,
            sequence: seq,
            dst_cell: Cell::new(0, 0, 0),
            src_cell: Cell::new(0, 0, 0),
            payload: 0,
        }
    }

    #[test]
    fn pops_in_timestamp_then_sequence_order() {
        let mut q = EventQueue::new(16);
        assert!(q.push(ev(5, 0)));
        assert!(q.push(ev(1, 1)));
        assert!(q.push(ev(1, 2)));
        let a = q.pop().unwrap();
        let b = q.pop().unwrap();
        let c = q.pop().unwrap();
        assert_eq!((a.timestamp, a.sequence), (1, 1));
        assert_eq!((b.timestamp, b.sequence), (1, 2));
        assert_eq!((c.timestamp, c.sequence), (5, 0));
    }

    #[test]
    fn capacity_exhaustion_rejects_push() {
        let mut q = EventQueue::new(2);
        assert!(q.push(ev(1, 0)));
        assert!(q.push(ev(2, 1)));
        assert!(!q.push(ev(3, 2)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn push_reports_false_at_capacity_without_panicking() {
        let mut q = EventQueue::new(1);
        assert!(q.push(ev(1, 0)));
        assert!(!q.push(ev(2, 1)));
        assert_eq!(q.len(), 1);
    }
}
