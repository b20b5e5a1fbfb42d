//! Diagnostic counters and rolling throughput estimates.
//!
//! The monitor only observes.  Engines report what happened through
//! [`Monitor::record`]; nothing in the protocol ever reads a counter back
//! to make a decision.

/// Something worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A segment was accepted.  Control segments count once they pass
    /// checksum and framing checks; DATA and NUL only when in sequence or
    /// buffered.
    Valid,
    /// A segment was discarded (corrupt, duplicate, or no room to buffer).
    Dropped,
    /// A segment was retransmitted.
    Resent,
    /// A segment was buffered ahead of the expected sequence number.
    OutOfSequence,
    /// A datagram was handed to the channel.
    Sent,
    /// A payload of this many bytes was delivered in order.
    Delivered(usize),
    /// The reorder buffer overflowed past its threshold.
    ReorderOverflow,
    /// The connection was lost and torn down.
    Reconnect,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub valid: u64,
    pub dropped: u64,
    pub resent: u64,
    pub reconnect: u64,
    pub out_of_sequence: u64,
    pub sent: u64,
    pub delivered_frames: u64,
    pub delivered_bytes: u64,
    pub reorder_overflows: u64,
    /// Frames delivered during the last completed observation interval.
    pub frame_rate: u64,
    /// Bytes delivered during the last completed observation interval.
    pub bandwidth: u64,
}

#[derive(Debug, Clone)]
pub struct Monitor {
    counters: Counters,
    interval: u32,
    elapsed: u32,
    interval_frames: u64,
    interval_bytes: u64,
}

impl Monitor {
    /// `interval` is the observation window for the rate estimates, in ticks.
    pub fn new(interval: u32) -> Self {
        Self {
            counters: Counters::default(),
            interval: interval.max(1),
            elapsed: 0,
            interval_frames: 0,
            interval_bytes: 0,
        }
    }

    pub fn record(&mut self, event: MonitorEvent) {
        let c = &mut self.counters;
        match event {
            MonitorEvent::Valid => c.valid += 1,
            MonitorEvent::Dropped => c.dropped += 1,
            MonitorEvent::Resent => c.resent += 1,
            MonitorEvent::OutOfSequence => c.out_of_sequence += 1,
            MonitorEvent::Sent => c.sent += 1,
            MonitorEvent::Delivered(bytes) => {
                c.delivered_frames += 1;
                c.delivered_bytes += bytes as u64;
                self.interval_frames += 1;
                self.interval_bytes += bytes as u64;
            }
            MonitorEvent::ReorderOverflow => c.reorder_overflows += 1,
            MonitorEvent::Reconnect => c.reconnect += 1,
        }
    }

    /// Advance the observation clock one tick, rolling the rate estimates
    /// over at each interval boundary.
    pub fn tick(&mut self) {
        self.elapsed += 1;
        if self.elapsed >= self.interval {
            self.counters.frame_rate = self.interval_frames;
            self.counters.bandwidth = self.interval_bytes;
            self.elapsed = 0;
            self.interval_frames = 0;
            self.interval_bytes = 0;
        }
    }

    /// Zero the traffic counters for a fresh connection.
    ///
    /// The reconnect count survives: it counts across connections.
    pub fn reset_for_reconnect(&mut self) {
        self.counters = Counters {
            reconnect: self.counters.reconnect,
            ..Counters::default()
        };
        self.elapsed = 0;
        self.interval_frames = 0;
        self.interval_bytes = 0;
    }

    pub fn snapshot(&self) -> Counters {
        self.counters
    }
}
