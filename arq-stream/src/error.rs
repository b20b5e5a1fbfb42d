//! Engine-level error type.
//!
//! Per-segment anomalies (bad checksums, duplicates, stale acks) never show
//! up here; they are absorbed and counted inside the Tx/Rx engines.  What
//! remains is what an application has to react to: backpressure, misuse,
//! failed opens, and lost connections.

use thiserror::Error;

use crate::params::ParamError;
use crate::seq::SequenceNumber;
use crate::state::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The transmit window is at capacity; retry after an ack frees a slot.
    #[error("transmit window is full")]
    WindowFull,
    #[error("payload of {len} bytes exceeds max segment size {max}")]
    PayloadTooLarge { len: usize, max: u16 },
    #[error("operation not permitted while {0}")]
    BadState(ConnectionState),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("protocol version mismatch: local {local}, peer {peer}")]
    VersionMismatch { local: u8, peer: u8 },
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("segment {0} exceeded its retransmission limit")]
    RetransmitExhausted(SequenceNumber),
    #[error("reorder buffer overflowed repeatedly")]
    ReorderOverflow,
    #[error("no segment received from peer within the idle timeout")]
    IdleTimeout,
    #[error("connection reset by peer")]
    Reset,
}

impl From<ParamError> for EngineError {
    fn from(err: ParamError) -> Self {
        match err {
            ParamError::VersionMismatch { local, peer } => {
                EngineError::VersionMismatch { local, peer }
            }
            ParamError::ConnectionIdMismatch { .. } => EngineError::HandshakeFailed(err.to_string()),
            ParamError::Invalid(reason) => EngineError::InvalidParameters(reason),
        }
    }
}
