//! Tick-driven countdown timers.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time, that deferred acknowledgments go out
//! eventually, and that an idle peer is checked on.  All of that is expressed in
//! ticks of one fixed time unit, so timers are plain counters decremented
//! once per tick.  No OS timers and no tasks are involved; whoever owns the
//! engine calls `tick()` at the configured rate.
//!
//! This module provides:
//! - [`Countdown`]: a single one-shot timer (one per window entry for
//!   retransmission).
//! - [`TimerBank`]: the fixed set of named connection-level timers
//!   (handshake, ack-delay, keep-alive, idle-close), scanned once per tick.

/// A one-shot countdown measured in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Countdown {
    remaining: Option<u32>,
}

impl Countdown {
    /// A timer that is armed to fire after `ticks` ticks.
    pub fn armed(ticks: u32) -> Self {
        let mut c = Self::default();
        c.arm(ticks);
        c
    }

    /// Arm (or re-arm) the timer.  Arming with `0` disarms it, which is how
    /// a zero timeout parameter disables a timer.
    pub fn arm(&mut self, ticks: u32) {
        self.remaining = (ticks > 0).then_some(ticks);
    }

    pub fn cancel(&mut self) {
        self.remaining = None;
    }

    pub fn is_armed(&self) -> bool {
        self.remaining.is_some()
    }

    /// Advance one tick.  Returns `true` exactly once, on the tick the timer
    /// expires; the timer is disarmed afterwards.
    pub fn tick(&mut self) -> bool {
        match self.remaining {
            Some(1) => {
                self.remaining = None;
                true
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

/// Named connection-level timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Resend of the current handshake segment.
    Handshake,
    /// Deadline for a deferred pure acknowledgment.
    AckDelay,
    /// Idle period after which a NUL keep-alive is sent.
    KeepAlive,
    /// Silence from the peer after which the connection is dropped.
    IdleClose,
}

impl TimerKind {
    pub const ALL: [TimerKind; 4] = [
        TimerKind::Handshake,
        TimerKind::AckDelay,
        TimerKind::KeepAlive,
        TimerKind::IdleClose,
    ];

    const fn index(self) -> usize {
        match self {
            TimerKind::Handshake => 0,
            TimerKind::AckDelay => 1,
            TimerKind::KeepAlive => 2,
            TimerKind::IdleClose => 3,
        }
    }
}

/// Fixed array of [`Countdown`]s indexed by [`TimerKind`].
#[derive(Debug, Clone, Default)]
pub struct TimerBank {
    timers: [Countdown; 4],
}

impl TimerBank {
    pub fn arm(&mut self, kind: TimerKind, ticks: u32) {
        self.timers[kind.index()].arm(ticks);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.timers[kind.index()].cancel();
    }

    /// Disarm every timer at once (teardown).
    pub fn cancel_all(&mut self) {
        self.timers = [Countdown::default(); 4];
    }

    /// Advance every timer one tick and return the ones that fired, in
    /// [`TimerKind::ALL`] order.
    pub fn tick(&mut self) -> Vec<TimerKind> {
        TimerKind::ALL
            .into_iter()
            .filter(|kind| self.timers[kind.index()].tick())
            .collect()
    }
}
