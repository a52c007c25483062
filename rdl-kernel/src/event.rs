//! Discrete events scheduled by virtual time.

use crate::torus::Cell;

/// A single scheduled message. Ephemeral: created by `inject_event` or by
/// delivery, consumed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub sequence: u64,
    pub dst_cell: Cell,
    pub src_cell: Cell,
    pub payload: i32,
}

impl Event {
    #[inline]
    pub fn key(&self) -> (u64, u64) {
        (self.timestamp, self.sequence)
    }
}

/// Ordering used by the event queue: earliest `(timestamp, sequence)`
/// first. `sequence` is assigned at push time and is the sole tie-breaker,
/// so insertion order decides ties between equal timestamps.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so a max-heap (BinaryHeap's only mode) behaves as a
        // min-heap on (timestamp, sequence).
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
