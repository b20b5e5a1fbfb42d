//! Connection parameters and the negotiation function.
//!
//! Each side proposes a [`ConnectionParameters`] set.  [`negotiate`] combines
//! the two proposals field by field: numeric limits take the minimum (the
//! more conservative capacity wins), feature switches are ANDed, and the
//! identifiers must match exactly.  The result is immutable for the lifetime
//! of the open connection.
//!
//! # Parameter block
//!
//! SYN segments carry the numeric fields and switches as a fixed 14-byte
//! block; version, connection id, and the initial sequence number travel in
//! the segment header instead.
//!
//! ```text
//!  window_size:2  max_segment_size:2  retransmit_timeout:2  ack_timeout:2
//!  null_timeout:2 max_retrans_count:1 max_cumulative_ack:1
//!  max_out_of_sequence:1 options:1 (bit0 header checksum, bit1 payload checksum)
//! ```

use rand::Rng;
use thiserror::Error;

use crate::segment::{SegmentError, MAX_VERSION};
use crate::seq::SequenceNumber;

/// Encoded size of the parameter block carried by SYN segments.
pub const PARAMS_LEN: usize = 14;

/// Upper bound on `window_size`; keeps every window far below half the
/// sequence space so wrap-around comparisons stay unambiguous.
pub const MAX_WINDOW_SIZE: u16 = 1024;

const OPT_HEADER_CHECKSUM: u8 = 0b01;
const OPT_PAYLOAD_CHECKSUM: u8 = 0b10;

/// Which side of the handshake a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the first SYN.
    Initiator,
    /// Waits for a SYN and answers it.
    Responder,
}

/// Operating parameters of one connection.
///
/// All timeouts are expressed in ticks of the engine's time unit
/// (see [`crate::config::EngineConfig::timeout_unit`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    /// Protocol version; must match the peer's exactly.
    pub version: u8,
    /// Connection identifier; must match the peer's exactly.
    pub connection_id: u16,
    /// First sequence number this side uses (the SYN's own number).
    /// Not negotiated; each side keeps its own.
    pub initial_sequence_number: SequenceNumber,
    /// Effect: max outstanding unacknowledged segments.
    pub window_size: u16,
    /// Effect: max payload bytes per segment.
    pub max_segment_size: u16,
    /// Effect: ticks before an unacknowledged segment is resent.
    pub retransmit_timeout: u16,
    /// Effect: ticks a deferred acknowledgment may wait for a piggyback.
    pub ack_timeout: u16,
    /// Effect: idle ticks before a NUL keep-alive is sent (0 disables).
    pub null_timeout: u16,
    /// Effect: resends of one segment before the connection is lost.
    pub max_retrans_count: u8,
    /// Effect: consecutive in-order receipts coalesced into one ack.
    pub max_cumulative_ack: u8,
    /// Effect: reorder-buffer capacity in segments.
    pub max_out_of_sequence: u8,
    /// Effect: receivers verify segment checksums.
    pub header_checksum_enabled: bool,
    /// Effect: the checksum also covers the payload.
    pub payload_checksum_enabled: bool,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            version: 1,
            connection_id: 0,
            initial_sequence_number: SequenceNumber(0),
            window_size: 8,
            max_segment_size: 1024,
            retransmit_timeout: 20,
            ack_timeout: 5,
            null_timeout: 200,
            max_retrans_count: 5,
            max_cumulative_ack: 3,
            max_out_of_sequence: 4,
            header_checksum_enabled: true,
            payload_checksum_enabled: true,
        }
    }
}

impl ConnectionParameters {
    /// Same parameters with a freshly randomised initial sequence number.
    pub fn with_random_isn(mut self) -> Self {
        self.initial_sequence_number = SequenceNumber(rand::rng().random());
        self
    }

    /// Check that this set describes a workable connection.
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.version > MAX_VERSION {
            return Err(ParamError::Invalid(format!(
                "version {} does not fit in 4 bits",
                self.version
            )));
        }
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(ParamError::Invalid(format!(
                "window_size {} outside 1..={MAX_WINDOW_SIZE}",
                self.window_size
            )));
        }
        if self.max_segment_size == 0 {
            return Err(ParamError::Invalid("max_segment_size is 0".into()));
        }
        if self.retransmit_timeout == 0 {
            return Err(ParamError::Invalid("retransmit_timeout is 0".into()));
        }
        if self.ack_timeout == 0 || self.ack_timeout >= self.retransmit_timeout {
            return Err(ParamError::Invalid(format!(
                "ack_timeout {} must be in 1..{}",
                self.ack_timeout, self.retransmit_timeout
            )));
        }
        Ok(())
    }

    /// Serialise the negotiable fields into a SYN parameter block.
    pub fn encode_block(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PARAMS_LEN);
        buf.extend_from_slice(&self.window_size.to_be_bytes());
        buf.extend_from_slice(&self.max_segment_size.to_be_bytes());
        buf.extend_from_slice(&self.retransmit_timeout.to_be_bytes());
        buf.extend_from_slice(&self.ack_timeout.to_be_bytes());
        buf.extend_from_slice(&self.null_timeout.to_be_bytes());
        buf.push(self.max_retrans_count);
        buf.push(self.max_cumulative_ack);
        buf.push(self.max_out_of_sequence);
        let mut options = 0u8;
        if self.header_checksum_enabled {
            options |= OPT_HEADER_CHECKSUM;
        }
        if self.payload_checksum_enabled {
            options |= OPT_PAYLOAD_CHECKSUM;
        }
        buf.push(options);
        buf
    }

    /// Rebuild a peer's proposal from a SYN header and parameter block.
    pub fn decode_block(
        version: u8,
        connection_id: u16,
        initial_sequence_number: SequenceNumber,
        block: &[u8],
    ) -> Result<Self, SegmentError> {
        if block.len() != PARAMS_LEN {
            return Err(SegmentError::MalformedParameters(block.len()));
        }
        let word = |off: usize| u16::from_be_bytes([block[off], block[off + 1]]);
        Ok(Self {
            version,
            connection_id,
            initial_sequence_number,
            window_size: word(0),
            max_segment_size: word(2),
            retransmit_timeout: word(4),
            ack_timeout: word(6),
            null_timeout: word(8),
            max_retrans_count: block[10],
            max_cumulative_ack: block[11],
            max_out_of_sequence: block[12],
            header_checksum_enabled: block[13] & OPT_HEADER_CHECKSUM != 0,
            payload_checksum_enabled: block[13] & OPT_PAYLOAD_CHECKSUM != 0,
        })
    }
}

/// Combine a local and a peer proposal into the negotiated set.
///
/// The local initial sequence number is kept.  The result is validated, so
/// a proposal that would produce an unusable connection is rejected here.
pub fn negotiate(
    local: &ConnectionParameters,
    peer: &ConnectionParameters,
) -> Result<ConnectionParameters, ParamError> {
    if local.version != peer.version {
        return Err(ParamError::VersionMismatch {
            local: local.version,
            peer: peer.version,
        });
    }
    if local.connection_id != peer.connection_id {
        return Err(ParamError::ConnectionIdMismatch {
            local: local.connection_id,
            peer: peer.connection_id,
        });
    }

    let negotiated = ConnectionParameters {
        version: local.version,
        connection_id: local.connection_id,
        initial_sequence_number: local.initial_sequence_number,
        window_size: local.window_size.min(peer.window_size),
        max_segment_size: local.max_segment_size.min(peer.max_segment_size),
        retransmit_timeout: local.retransmit_timeout.min(peer.retransmit_timeout),
        ack_timeout: local.ack_timeout.min(peer.ack_timeout),
        null_timeout: local.null_timeout.min(peer.null_timeout),
        max_retrans_count: local.max_retrans_count.min(peer.max_retrans_count),
        max_cumulative_ack: local.max_cumulative_ack.min(peer.max_cumulative_ack),
        max_out_of_sequence: local.max_out_of_sequence.min(peer.max_out_of_sequence),
        header_checksum_enabled: local.header_checksum_enabled && peer.header_checksum_enabled,
        payload_checksum_enabled: local.payload_checksum_enabled && peer.payload_checksum_enabled,
    };
    negotiated.validate()?;
    Ok(negotiated)
}

/// Reasons a parameter set or a negotiation is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("protocol version mismatch: local {local}, peer {peer}")]
    VersionMismatch { local: u8, peer: u8 },
    #[error("connection id mismatch: local {local:#06x}, peer {peer:#06x}")]
    ConnectionIdMismatch { local: u16, peer: u16 },
    #[error("invalid parameters: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ConnectionParameters::default().validate().unwrap();
    }

    #[test]
    fn numeric_fields_take_minimum() {
        let local = ConnectionParameters {
            window_size: 8,
            max_segment_size: 512,
            retransmit_timeout: 30,
            ..Default::default()
        };
        let peer = ConnectionParameters {
            window_size: 4,
            max_segment_size: 1400,
            retransmit_timeout: 25,
            max_retrans_count: 2,
            initial_sequence_number: SequenceNumber(900),
            ..Default::default()
        };
        let n = negotiate(&local, &peer).unwrap();
        assert_eq!(n.window_size, 4);
        assert_eq!(n.max_segment_size, 512);
        assert_eq!(n.retransmit_timeout, 25);
        assert_eq!(n.max_retrans_count, 2);
        // Local ISN survives negotiation.
        assert_eq!(n.initial_sequence_number, local.initial_sequence_number);
    }

    #[test]
    fn switches_are_anded() {
        let local = ConnectionParameters::default();
        let peer = ConnectionParameters {
            header_checksum_enabled: false,
            ..Default::default()
        };
        let n = negotiate(&local, &peer).unwrap();
        assert!(!n.header_checksum_enabled);
        assert!(n.payload_checksum_enabled);
    }

    #[test]
    fn version_mismatch_rejected() {
        let local = ConnectionParameters::default();
        let peer = ConnectionParameters {
            version: 2,
            ..Default::default()
        };
        assert_eq!(
            negotiate(&local, &peer),
            Err(ParamError::VersionMismatch { local: 1, peer: 2 })
        );
    }

    #[test]
    fn connection_id_mismatch_rejected() {
        let local = ConnectionParameters::default();
        let peer = ConnectionParameters {
            connection_id: 7,
            ..Default::default()
        };
        assert!(matches!(
            negotiate(&local, &peer),
            Err(ParamError::ConnectionIdMismatch { .. })
        ));
    }

    #[test]
    fn unusable_result_rejected() {
        let local = ConnectionParameters::default();
        let peer = ConnectionParameters {
            window_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            negotiate(&local, &peer),
            Err(ParamError::Invalid(_))
        ));
    }

    #[test]
    fn block_roundtrip_keeps_every_field() {
        let p = ConnectionParameters {
            version: 1,
            connection_id: 0x1234,
            initial_sequence_number: SequenceNumber(77),
            window_size: 16,
            max_segment_size: 900,
            retransmit_timeout: 40,
            ack_timeout: 9,
            null_timeout: 300,
            max_retrans_count: 7,
            max_cumulative_ack: 2,
            max_out_of_sequence: 5,
            header_checksum_enabled: true,
            payload_checksum_enabled: false,
        };
        let block = p.encode_block();
        assert_eq!(block.len(), PARAMS_LEN);
        let back = ConnectionParameters::decode_block(1, 0x1234, SequenceNumber(77), &block).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn short_block_rejected() {
        assert_eq!(
            ConnectionParameters::decode_block(1, 0, SequenceNumber(0), &[0u8; 3]),
            Err(SegmentError::MalformedParameters(3))
        );
    }

    #[test]
    fn ack_timeout_must_undercut_retransmit_timeout() {
        let p = ConnectionParameters {
            ack_timeout: 20,
            retransmit_timeout: 20,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}
