//! Fixed-capacity transmit window.
//!
//! [`Window`] holds every segment that has been sent but not cumulatively
//! acknowledged.  Slots are addressed by their offset from the left edge
//! (`last_ack + 1`), so the arena never holds more than `capacity` entries
//! and every entry's sequence number lies in
//! `[last_ack + 1, last_ack + capacity]`.
//!
//! ```text
//!  last_ack+1                    next_seq
//!      │                             │
//!  ────┼─────────────────────────────┼──────────▶ seq space
//!      │ <─── outstanding slots ───▶ │ <─ free ─▶
//! ```
//!
//! Each entry owns its retransmission [`Countdown`] and retry counter.  A
//! selectively acknowledged entry keeps its slot (it still sits inside the
//! window) but its timer is cancelled and it is never resent.

use std::collections::VecDeque;

use crate::segment::Segment;
use crate::seq::SequenceNumber;
use crate::timer::Countdown;

/// One outstanding segment.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub segment: Segment,
    /// Resends so far (0 after the first transmission).
    pub retries: u8,
    pub timer: Countdown,
    /// Acknowledged by an EACK, waiting for the cumulative ack to pass it.
    pub selectively_acked: bool,
}

impl WindowEntry {
    pub fn seq(&self) -> SequenceNumber {
        self.segment.header.seq
    }
}

/// Read-only view of the window, for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub last_ack: SequenceNumber,
    pub next_seq: SequenceNumber,
    pub outstanding: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct Window {
    last_ack: SequenceNumber,
    next_seq: SequenceNumber,
    capacity: usize,
    slots: VecDeque<WindowEntry>,
}

impl Window {
    /// Create an empty window whose first assigned number is `isn + 1`.
    pub fn new(isn: SequenceNumber, capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            last_ack: isn,
            next_seq: isn.next(),
            capacity,
            slots: VecDeque::with_capacity(capacity),
        }
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence number the next inserted segment will receive.
    pub fn next_seq(&self) -> SequenceNumber {
        self.next_seq
    }

    /// Highest cumulatively acknowledged sequence number.
    pub fn last_ack(&self) -> SequenceNumber {
        self.last_ack
    }

    /// Assign the next sequence number to `segment`, store it, and arm its
    /// retransmission timer.  Returns the assigned number.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the window is full.  Check [`is_full`]
    /// first.
    ///
    /// [`is_full`]: Window::is_full
    pub fn insert(&mut self, mut segment: Segment, retransmit_ticks: u32) -> SequenceNumber {
        debug_assert!(
            !self.is_full(),
            "insert called on a full window ({} / {})",
            self.slots.len(),
            self.capacity
        );
        let seq = self.next_seq;
        segment.header.seq = seq;
        self.slots.push_back(WindowEntry {
            segment,
            retries: 0,
            timer: Countdown::armed(retransmit_ticks),
            selectively_acked: false,
        });
        self.next_seq = seq.next();
        seq
    }

    /// Process a cumulative acknowledgment.
    ///
    /// Removes every entry with a sequence number at or before `ack` and
    /// returns how many were removed.  Stale acks (at or before `last_ack`)
    /// and acks for numbers never sent are ignored.
    pub fn acknowledge_through(&mut self, ack: SequenceNumber) -> usize {
        if !ack.within(self.last_ack.next(), self.next_seq.prev()) {
            return 0;
        }
        let mut removed = 0;
        while let Some(front) = self.slots.front() {
            if front.seq().precedes_or_eq(ack) {
                self.slots.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        self.last_ack = ack;
        removed
    }

    /// Process a selective acknowledgment of one sequence number.
    ///
    /// Returns `true` if an outstanding, not yet acknowledged entry matched.
    pub fn acknowledge_one(&mut self, seq: SequenceNumber) -> bool {
        let offset = self.last_ack.next().distance_to(seq);
        if offset < 0 {
            return false;
        }
        match self.slots.get_mut(offset as usize) {
            Some(entry) if !entry.selectively_acked => {
                entry.selectively_acked = true;
                entry.timer.cancel();
                true
            }
            _ => false,
        }
    }

    /// Advance every retransmission timer one tick and return the entries
    /// whose timer expired.
    pub fn expired(&mut self) -> Vec<&mut WindowEntry> {
        self.slots
            .iter_mut()
            .filter(|e| !e.selectively_acked)
            .filter_map(|e| if e.timer.tick() { Some(e) } else { None })
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.slots.iter()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            last_ack: self.last_ack,
            next_seq: self.next_seq,
            outstanding: self.slots.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::flags;

    fn seg() -> Segment {
        Segment::new(
            1,
            flags::DATA,
            0,
            SequenceNumber(0),
            SequenceNumber(0),
            vec![0u8; 4],
        )
    }

    #[test]
    fn insert_assigns_consecutive_numbers() {
        let mut w = Window::new(SequenceNumber(100), 4);
        assert_eq!(w.insert(seg(), 10), SequenceNumber(101));
        assert_eq!(w.insert(seg(), 10), SequenceNumber(102));
        assert_eq!(w.len(), 2);
        assert_eq!(w.next_seq(), SequenceNumber(103));
    }

    #[test]
    fn full_at_capacity() {
        let mut w = Window::new(SequenceNumber(0), 2);
        w.insert(seg(), 10);
        assert!(!w.is_full());
        w.insert(seg(), 10);
        assert!(w.is_full());
    }

    #[test]
    fn cumulative_ack_removes_prefix() {
        let mut w = Window::new(SequenceNumber(0), 4);
        for _ in 0..3 {
            w.insert(seg(), 10);
        }
        assert_eq!(w.acknowledge_through(SequenceNumber(2)), 2);
        assert_eq!(w.len(), 1);
        assert_eq!(w.last_ack(), SequenceNumber(2));
    }

    #[test]
    fn stale_and_future_acks_ignored() {
        let mut w = Window::new(SequenceNumber(10), 4);
        w.insert(seg(), 10);
        assert_eq!(w.acknowledge_through(SequenceNumber(10)), 0);
        assert_eq!(w.acknowledge_through(SequenceNumber(500)), 0);
        assert_eq!(w.len(), 1);
        assert_eq!(w.acknowledge_through(SequenceNumber(11)), 1);
        assert_eq!(w.acknowledge_through(SequenceNumber(11)), 0);
    }

    #[test]
    fn selective_ack_keeps_slot_and_silences_timer() {
        let mut w = Window::new(SequenceNumber(0), 4);
        for _ in 0..3 {
            w.insert(seg(), 1);
        }
        assert!(w.acknowledge_one(SequenceNumber(2)));
        assert!(!w.acknowledge_one(SequenceNumber(2)));
        assert_eq!(w.len(), 3);

        let expired: Vec<_> = w.expired().into_iter().map(|e| e.seq()).collect();
        assert_eq!(expired, vec![SequenceNumber(1), SequenceNumber(3)]);

        // The cumulative ack of 1 must also release the already-EACKed 2
        // only once it covers it.
        assert_eq!(w.acknowledge_through(SequenceNumber(1)), 1);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn wraps_around_sequence_space() {
        let mut w = Window::new(SequenceNumber(u16::MAX - 1), 4);
        assert_eq!(w.insert(seg(), 10), SequenceNumber(u16::MAX));
        assert_eq!(w.insert(seg(), 10), SequenceNumber(0));
        assert_eq!(w.insert(seg(), 10), SequenceNumber(1));
        assert_eq!(w.acknowledge_through(SequenceNumber(0)), 2);
        assert_eq!(w.entries().next().unwrap().seq(), SequenceNumber(1));
    }
}
