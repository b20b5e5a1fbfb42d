//! Segment checksum computation and verification.
//!
//! The algorithm is the 16-bit one's-complement Internet checksum
//! (RFC 1071).  It always covers the fixed header with the checksum field
//! zeroed; when payload coverage is on, the payload bytes follow the header
//! in the summed data.  Both peers must agree on coverage, which is why the
//! two switches are negotiated connection parameters.
//!
//! [`ChecksumEngine`] operates on already-serialised segments so that the
//! bytes which are summed are exactly the bytes on the wire.

use crate::params::ConnectionParameters;
use crate::segment::{HEADER_LEN, OFF_CHECKSUM};

/// Stateless checksum calculator configured for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumEngine {
    /// Receivers verify the checksum field; senders fill it in.
    pub enabled: bool,
    /// The checksum also covers the payload bytes.
    pub cover_payload: bool,
}

impl ChecksumEngine {
    /// Full coverage with verification on.
    ///
    /// Used for the handshake, before any parameters are agreed.
    pub const fn strict() -> Self {
        Self {
            enabled: true,
            cover_payload: true,
        }
    }

    /// Engine matching a negotiated parameter set.
    pub fn for_params(params: &ConnectionParameters) -> Self {
        Self {
            enabled: params.header_checksum_enabled,
            cover_payload: params.payload_checksum_enabled,
        }
    }

    /// Compute the checksum of a serialised segment.
    ///
    /// The stored checksum field is treated as zero regardless of its
    /// current contents.  `segment` must be at least [`HEADER_LEN`] bytes.
    pub fn compute(&self, segment: &[u8]) -> u16 {
        let header = &segment[..HEADER_LEN.min(segment.len())];
        let mut sum = Summer::default();
        sum.add(&header[..OFF_CHECKSUM]);
        sum.add(&[0, 0]);
        sum.add(&header[OFF_CHECKSUM + 2..]);
        if self.cover_payload && segment.len() > HEADER_LEN {
            sum.add(&segment[HEADER_LEN..]);
        }
        sum.finish()
    }

    /// Write the checksum into the checksum field of `segment`.
    ///
    /// Writes zero when checksums are disabled.
    pub fn seal(&self, segment: &mut [u8]) {
        let csum = if self.enabled { self.compute(segment) } else { 0 };
        segment[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
    }

    /// `true` if the stored checksum matches (always `true` when disabled).
    pub fn verify(&self, segment: &[u8]) -> bool {
        if !self.enabled {
            return true;
        }
        if segment.len() < HEADER_LEN {
            return false;
        }
        let stored = u16::from_be_bytes([segment[OFF_CHECKSUM], segment[OFF_CHECKSUM + 1]]);
        stored == self.compute(segment)
    }

    /// Deliberately invalidate the stored checksum (fault injection).
    pub fn corrupt(segment: &mut [u8]) {
        segment[OFF_CHECKSUM] ^= 0xff;
        segment[OFF_CHECKSUM + 1] ^= 0xff;
    }
}

/// Running RFC 1071 sum that tolerates odd-length chunks.
#[derive(Default)]
struct Summer {
    sum: u32,
    pending: Option<u8>,
}

impl Summer {
    fn add(&mut self, data: &[u8]) {
        let mut bytes = data.iter().copied();
        if let Some(hi) = self.pending.take() {
            match bytes.next() {
                Some(lo) => self.sum += u32::from(u16::from_be_bytes([hi, lo])),
                None => {
                    self.pending = Some(hi);
                    return;
                }
            }
        }
        loop {
            match (bytes.next(), bytes.next()) {
                (Some(hi), Some(lo)) => self.sum += u32::from(u16::from_be_bytes([hi, lo])),
                (Some(hi), None) => {
                    self.pending = Some(hi);
                    break;
                }
                _ => break,
            }
        }
    }

    fn finish(mut self) -> u16 {
        // Odd trailing byte, padded with a zero byte on the right.
        if let Some(hi) = self.pending.take() {
            self.sum += u32::from(hi) << 8;
        }
        while self.sum >> 16 != 0 {
            self.sum = (self.sum & 0xffff) + (self.sum >> 16);
        }
        !(self.sum as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = 0x10;
        buf[1] = 0x22;
        buf[6] = 0x01;
        buf[10..12].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn sealed_segment_verifies() {
        let engine = ChecksumEngine::strict();
        let mut buf = sample(b"abc");
        engine.seal(&mut buf);
        assert!(engine.verify(&buf));
    }

    #[test]
    fn payload_corruption_detected_only_with_coverage() {
        let full = ChecksumEngine::strict();
        let header_only = ChecksumEngine {
            enabled: true,
            cover_payload: false,
        };

        let mut a = sample(b"payload");
        full.seal(&mut a);
        a[HEADER_LEN] ^= 0x01;
        assert!(!full.verify(&a));

        let mut b = sample(b"payload");
        header_only.seal(&mut b);
        b[HEADER_LEN] ^= 0x01;
        assert!(header_only.verify(&b));
    }

    #[test]
    fn header_corruption_always_detected() {
        let engine = ChecksumEngine {
            enabled: true,
            cover_payload: false,
        };
        let mut buf = sample(b"");
        engine.seal(&mut buf);
        buf[7] ^= 0x40;
        assert!(!engine.verify(&buf));
    }

    #[test]
    fn corrupt_breaks_verification() {
        let engine = ChecksumEngine::strict();
        let mut buf = sample(b"xyz");
        engine.seal(&mut buf);
        ChecksumEngine::corrupt(&mut buf);
        assert!(!engine.verify(&buf));
    }

    #[test]
    fn disabled_engine_accepts_anything() {
        let engine = ChecksumEngine {
            enabled: false,
            cover_payload: true,
        };
        let mut buf = sample(b"xyz");
        engine.seal(&mut buf);
        assert_eq!(&buf[OFF_CHECKSUM..OFF_CHECKSUM + 2], &[0, 0]);
        ChecksumEngine::corrupt(&mut buf);
        assert!(engine.verify(&buf));
    }

    #[test]
    fn odd_length_payload_matches_contiguous_sum() {
        // Chunked summing must equal summing the zero-checksum buffer in one go.
        let engine = ChecksumEngine::strict();
        let buf = sample(b"odd");
        let mut whole = Summer::default();
        whole.add(&buf);
        assert_eq!(engine.compute(&buf), whole.finish());
    }
}
