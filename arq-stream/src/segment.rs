//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for malformed, truncated, or corrupted input.
//!
//! No I/O happens here; this is pure data transformation.  Checksums are
//! delegated to [`ChecksumEngine`] because their coverage is negotiated.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|         Flags         |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Connection Id         |        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Acknowledgment Number     |        Payload Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//!
//! SYN segments carry the proposer's parameter block as payload (see
//! [`crate::params`]); EACK segments carry a list of selectively
//! acknowledged sequence numbers.

use thiserror::Error;

use crate::checksum::ChecksumEngine;
use crate::seq::SequenceNumber;

/// Bit-flag constants for the 12-bit `flags` header field.
pub mod flags {
    /// Negotiation request / reply.
    pub const SYN: u16 = 0x001;
    /// Acknowledgment field is valid.
    pub const ACK: u16 = 0x002;
    /// Payload lists selectively acknowledged sequence numbers.
    pub const EACK: u16 = 0x004;
    /// Reset / close.
    pub const RST: u16 = 0x008;
    /// Keep-alive; consumes a sequence number, carries no data.
    pub const NUL: u16 = 0x010;
    /// Payload carries application data.
    pub const DATA: u16 = 0x020;

    pub(crate) const ALL: u16 = SYN | ACK | EACK | RST | NUL | DATA;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Highest protocol version representable in the 4-bit version field.
pub const MAX_VERSION: u8 = 0x0f;

// Byte offsets of each field within the serialised header.
const OFF_VERSION_FLAGS: usize = 0;
pub(crate) const OFF_CHECKSUM: usize = 2;
const OFF_CONN_ID: usize = 4;
const OFF_SEQ: usize = 6;
const OFF_ACK: usize = 8;
const OFF_PAYLOAD_LEN: usize = 10;

/// Fixed-size protocol header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Protocol version (low 4 bits used).
    pub version: u8,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
    /// Identifier both peers agreed on.
    pub connection_id: u16,
    pub seq: SequenceNumber,
    /// Cumulative acknowledgment: every sequence number up to and
    /// including this one has been received.
    pub ack: SequenceNumber,
    /// Length of the payload in bytes.
    ///
    /// On encode this is computed from the actual payload length.
    pub payload_len: u16,
    /// Stored checksum as read from the wire (zero for unencoded segments).
    pub checksum: u16,
}

impl Header {
    /// Parse only the header, without checksum verification.
    ///
    /// Useful for observers (simulator filters, logging) that need to look
    /// at a datagram without owning its connection's checksum settings.
    pub fn peek(buf: &[u8]) -> Result<Header, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::BufferTooShort);
        }
        let word = |off: usize| u16::from_be_bytes([buf[off], buf[off + 1]]);
        let version_flags = word(OFF_VERSION_FLAGS);
        Ok(Header {
            version: (version_flags >> 12) as u8,
            flags: version_flags & 0x0fff,
            connection_id: word(OFF_CONN_ID),
            seq: SequenceNumber(word(OFF_SEQ)),
            ack: SequenceNumber(word(OFF_ACK)),
            payload_len: word(OFF_PAYLOAD_LEN),
            checksum: word(OFF_CHECKSUM),
        })
    }

    #[inline]
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

/// A complete protocol segment: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Build a segment; `payload_len` and `checksum` are filled in on encode.
    pub fn new(
        version: u8,
        flags: u16,
        connection_id: u16,
        seq: SequenceNumber,
        ack: SequenceNumber,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            header: Header {
                version,
                flags,
                connection_id,
                seq,
                ack,
                payload_len: 0,
                checksum: 0,
            },
            payload,
        }
    }

    #[inline]
    pub fn has(&self, flag: u16) -> bool {
        self.header.has(flag)
    }

    /// `true` for segments that occupy a sequence number (DATA, NUL, RST).
    pub fn is_sequenced(&self) -> bool {
        self.has(flags::DATA | flags::NUL | flags::RST) && !self.has(flags::SYN)
    }

    /// `true` for DATA and NUL segments, the ones the receiver sequences.
    pub fn carries_stream(&self) -> bool {
        self.has(flags::DATA | flags::NUL) && !self.has(flags::SYN | flags::RST)
    }

    /// Serialise this segment and seal it with `checksum`.
    ///
    /// `header.payload_len` and `header.checksum` are computed; any values
    /// already stored in those fields are ignored.
    pub fn encode(&self, checksum: &ChecksumEngine) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        let version_flags =
            (u16::from(self.header.version & MAX_VERSION) << 12) | (self.header.flags & 0x0fff);
        buf[OFF_VERSION_FLAGS..OFF_VERSION_FLAGS + 2].copy_from_slice(&version_flags.to_be_bytes());
        buf[OFF_CONN_ID..OFF_CONN_ID + 2]
            .copy_from_slice(&self.header.connection_id.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.header.seq.0.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 2].copy_from_slice(&self.header.ack.0.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        checksum.seal(&mut buf);
        buf
    }

    /// Parse and verify a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the `payload_len` field disagrees with `buf.len()`,
    /// - unknown flag bits are set, or
    /// - the checksum does not verify under `checksum`.
    pub fn decode(buf: &[u8], checksum: &ChecksumEngine) -> Result<Self, SegmentError> {
        let header = Header::peek(buf)?;

        if buf.len() != HEADER_LEN + header.payload_len as usize {
            return Err(SegmentError::LengthMismatch);
        }
        if header.flags & !flags::ALL != 0 {
            return Err(SegmentError::UnknownFlags(header.flags));
        }
        if !checksum.verify(buf) {
            return Err(SegmentError::ChecksumFailed);
        }

        Ok(Segment {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Encode a list of selectively acknowledged sequence numbers.
    pub fn eack_payload(seqs: &[SequenceNumber]) -> Vec<u8> {
        seqs.iter().flat_map(|s| s.0.to_be_bytes()).collect()
    }

    /// Decode the EACK list carried in this segment's payload.
    pub fn eack_list(&self) -> Result<Vec<SequenceNumber>, SegmentError> {
        if self.payload.len() % 2 != 0 {
            return Err(SegmentError::MalformedEack);
        }
        Ok(self
            .payload
            .chunks_exact(2)
            .map(|c| SequenceNumber(u16::from_be_bytes([c[0], c[1]])))
            .collect())
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    #[error("payload_len field does not match remaining bytes")]
    LengthMismatch,
    #[error("unknown flag bits set: {0:#05x}")]
    UnknownFlags(u16),
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("EACK payload is not a whole number of sequence numbers")]
    MalformedEack,
    #[error("parameter block is {0} bytes")]
    MalformedParameters(usize),
}
