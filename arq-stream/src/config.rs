//! Engine-level settings that are not negotiated with the peer.
//!
//! [`ConnectionParameters`](crate::params::ConnectionParameters) are proposed
//! in the SYN and agreed on by both sides; [`EngineConfig`] is purely local
//! policy: how long a tick is, how hard to try to open, and what to do when
//! things go wrong.

use std::time::Duration;

use crate::error::EngineError;
use crate::params::ConnectionParameters;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Wall-clock length of one tick.  All timeout parameters count ticks.
    pub timeout_unit: Duration,
    /// SYN / SYN-ACK resends before the open fails with a handshake timeout.
    pub handshake_retries: u32,
    /// Rejected proposals tolerated before the open fails.
    pub negotiation_attempts: u32,
    /// Consecutive reorder-buffer drops that raise a reorder-overflow
    /// event.  `0` disables the event.
    pub reorder_overflow_threshold: u32,
    /// Treat a reorder overflow as fatal instead of only reporting it.
    pub escalate_reorder_overflow: bool,
    /// Ticks of silence from the peer before the connection is dropped.
    /// `0` disables the check.  See [`EngineConfig::idle_ticks`] for how
    /// this combines with the negotiated keep-alive period.
    pub idle_timeout: u32,
    /// Re-open with the same role and parameters after a lost connection.
    pub auto_reconnect: bool,
    /// Ticks per observation interval for the rate counters.
    pub monitor_interval: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_unit: Duration::from_millis(10),
            handshake_retries: 5,
            negotiation_attempts: 3,
            reorder_overflow_threshold: 8,
            escalate_reorder_overflow: false,
            idle_timeout: 1000,
            auto_reconnect: false,
            monitor_interval: 100,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.timeout_unit.is_zero() {
            return Err(EngineError::InvalidParameters(
                "timeout unit must be non-zero".into(),
            ));
        }
        if self.monitor_interval == 0 {
            return Err(EngineError::InvalidParameters(
                "monitor interval must be at least one tick".into(),
            ));
        }
        Ok(())
    }

    /// Idle period for a connection opened with `params`; `0` means off.
    ///
    /// An idle but healthy peer is only heard from through keep-alives, so
    /// the check is off when they are (`null_timeout == 0`) and never
    /// shorter than two keep-alive periods plus one retransmission.
    pub fn idle_ticks(&self, params: &ConnectionParameters) -> u32 {
        if self.idle_timeout == 0 || params.null_timeout == 0 {
            return 0;
        }
        let floor = 2 * u32::from(params.null_timeout) + u32::from(params.retransmit_timeout);
        self.idle_timeout.max(floor)
    }
}
