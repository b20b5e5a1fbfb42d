//! Receive-side state machine.
//!
//! [`RxEngine`] validates inbound datagrams, delivers payloads to the
//! application exactly once and in order, and buffers a bounded number of
//! early arrivals:
//!
//! - A segment at the expected sequence number is delivered, then any
//!   buffered successors that have become contiguous are drained.
//! - A segment ahead of the expected number is buffered while the reorder
//!   buffer has room (at most `max_out_of_sequence` entries), and the
//!   sender is told about it with an EACK.
//! - Duplicates and segments that cannot be buffered are dropped, and the
//!   current cumulative ack is repeated at once.
//!
//! Acknowledgment work is not sent from here; it is queued as
//! [`AckRequest`]s that the caller hands to the [`crate::tx::TxEngine`].
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::checksum::ChecksumEngine;
use crate::error::EngineError;
use crate::monitor::{Monitor, MonitorEvent};
use crate::params::ConnectionParameters;
use crate::segment::{flags, Segment};
use crate::seq::SequenceNumber;
use crate::tx::AckRequest;

/// What happened to one sequenced segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// In order; this many segments (including drained successors) were
    /// accepted.
    Accepted(usize),
    /// Ahead of the expected number and stored for later.
    Buffered,
    /// Already delivered or already buffered.
    Duplicate,
    /// Dropped for lack of space.
    Dropped,
}

#[derive(Debug)]
pub struct RxEngine {
    version: u8,
    connection_id: u16,
    checksum: ChecksumEngine,
    /// Next sequence number to deliver.
    expected: SequenceNumber,
    window_size: u16,
    max_segment_size: u16,
    max_out_of_sequence: usize,
    max_cumulative_ack: u8,
    /// Early arrivals; `None` payload marks a NUL keep-alive.
    reorder: Vec<(SequenceNumber, Option<Vec<u8>>)>,
    /// In-order receipts not yet covered by an outgoing ack.
    unacked_receipts: u8,
    overflow_drops: u32,
    overflow_threshold: u32,
    delivered: VecDeque<Vec<u8>>,
    ack_requests: VecDeque<AckRequest>,
}

impl RxEngine {
    /// `peer_isn` is the sequence number from the peer's SYN; the first
    /// expected segment is the one after it.
    pub fn new(
        params: &ConnectionParameters,
        peer_isn: SequenceNumber,
        overflow_threshold: u32,
    ) -> Self {
        Self {
            version: params.version,
            connection_id: params.connection_id,
            checksum: ChecksumEngine::for_params(params),
            expected: peer_isn.next(),
            window_size: params.window_size,
            max_segment_size: params.max_segment_size,
            max_out_of_sequence: params.max_out_of_sequence as usize,
            max_cumulative_ack: params.max_cumulative_ack,
            reorder: Vec::with_capacity(params.max_out_of_sequence as usize),
            unacked_receipts: 0,
            overflow_drops: 0,
            overflow_threshold,
            delivered: VecDeque::new(),
            ack_requests: VecDeque::new(),
        }
    }

    /// Decode and validate a raw datagram.
    ///
    /// Corrupt, truncated, foreign, or oversize datagrams count as dropped
    /// and yield `None`.  DATA and NUL segments are counted later by
    /// [`RxEngine::on_segment`], so each datagram is counted exactly once.
    pub fn accept(&self, datagram: &[u8], monitor: &mut Monitor) -> Option<Segment> {
        let segment = match Segment::decode(datagram, &self.checksum) {
            Ok(segment) => segment,
            Err(e) => {
                log::debug!("[rx] drop {} byte datagram: {}", datagram.len(), e);
                monitor.record(MonitorEvent::Dropped);
                return None;
            }
        };
        if segment.header.version != self.version
            || segment.header.connection_id != self.connection_id
        {
            log::debug!(
                "[rx] drop foreign segment (version {}, connection {})",
                segment.header.version,
                segment.header.connection_id
            );
            monitor.record(MonitorEvent::Dropped);
            return None;
        }
        if segment.payload.len() > self.max_segment_size as usize && segment.has(flags::DATA) {
            log::debug!("[rx] drop oversize segment seq={}", segment.header.seq);
            monitor.record(MonitorEvent::Dropped);
            return None;
        }
        if !segment.carries_stream() {
            monitor.record(MonitorEvent::Valid);
        }
        Some(segment)
    }

    /// Sequence one DATA or NUL segment.
    ///
    /// Returns [`EngineError::ReorderOverflow`] once `overflow_threshold`
    /// consecutive segments have been dropped for lack of buffer space
    /// (the count then starts over).
    pub fn on_segment(
        &mut self,
        segment: &Segment,
        monitor: &mut Monitor,
    ) -> Result<RxOutcome, EngineError> {
        let seq = segment.header.seq;
        let offset = self.expected.distance_to(seq);

        if offset == 0 {
            monitor.record(MonitorEvent::Valid);
            self.overflow_drops = 0;
            let mut accepted = 1;
            let mut keep_alive = !segment.has(flags::DATA);
            self.deliver(segment.has(flags::DATA).then(|| segment.payload.clone()), monitor);

            while let Some(pos) = self.reorder.iter().position(|(s, _)| *s == self.expected) {
                let (_, payload) = self.reorder.swap_remove(pos);
                keep_alive |= payload.is_none();
                self.deliver(payload, monitor);
                accepted += 1;
            }

            let ack = self.ack_point();
            if !self.reorder.is_empty() {
                self.ack_requests.push_back(AckRequest::Selective {
                    ack,
                    received: self.buffered(),
                });
            } else if keep_alive || accepted > 1 {
                self.ack_requests.push_back(AckRequest::Immediate { ack });
            } else {
                self.unacked_receipts = self.unacked_receipts.saturating_add(1);
                if self.unacked_receipts >= self.max_cumulative_ack {
                    self.ack_requests.push_back(AckRequest::Immediate { ack });
                } else {
                    self.ack_requests.push_back(AckRequest::Deferred { ack });
                }
            }
            return Ok(RxOutcome::Accepted(accepted));
        }

        if offset < 0 || self.reorder.iter().any(|(s, _)| *s == seq) {
            log::trace!("[rx] duplicate seq={} (expected {})", seq, self.expected);
            monitor.record(MonitorEvent::Dropped);
            self.repeat_ack();
            return Ok(RxOutcome::Duplicate);
        }

        if (offset as u16) < self.window_size && self.reorder.len() < self.max_out_of_sequence {
            self.overflow_drops = 0;
            let payload = segment.has(flags::DATA).then(|| segment.payload.clone());
            self.reorder.push((seq, payload));
            monitor.record(MonitorEvent::Valid);
            monitor.record(MonitorEvent::OutOfSequence);
            log::debug!(
                "[rx] buffered seq={} (expected {}, {} held)",
                seq,
                self.expected,
                self.reorder.len()
            );
            self.ack_requests.push_back(AckRequest::Selective {
                ack: self.ack_point(),
                received: self.buffered(),
            });
            return Ok(RxOutcome::Buffered);
        }

        monitor.record(MonitorEvent::Dropped);
        self.repeat_ack();
        if (offset as u16) >= self.window_size {
            log::debug!("[rx] drop seq={} beyond receive window", seq);
            return Ok(RxOutcome::Dropped);
        }

        self.overflow_drops += 1;
        log::debug!(
            "[rx] reorder buffer full, drop seq={} ({} consecutive)",
            seq,
            self.overflow_drops
        );
        if self.overflow_threshold > 0 && self.overflow_drops >= self.overflow_threshold {
            self.overflow_drops = 0;
            monitor.record(MonitorEvent::ReorderOverflow);
            return Err(EngineError::ReorderOverflow);
        }
        Ok(RxOutcome::Dropped)
    }

    /// Payloads delivered in order since the last call.
    pub fn drain_delivered(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.delivered.drain(..)
    }

    /// Acknowledgment requests produced since the last call.
    pub fn take_ack_requests(&mut self) -> impl Iterator<Item = AckRequest> + '_ {
        self.ack_requests.drain(..)
    }

    /// Highest sequence number received contiguously.
    pub fn ack_point(&self) -> SequenceNumber {
        self.expected.prev()
    }

    /// Note that an outgoing segment carried `ack`; receipts it covers no
    /// longer count toward `max_cumulative_ack`.
    pub fn on_ack_sent(&mut self, ack: SequenceNumber) {
        if ack == self.ack_point() {
            self.unacked_receipts = 0;
        }
    }

    /// Buffered out-of-sequence numbers, in sequence order.
    pub fn buffered(&self) -> Vec<SequenceNumber> {
        let mut seqs: Vec<_> = self.reorder.iter().map(|(s, _)| *s).collect();
        seqs.sort_by_key(|s| self.expected.distance_to(*s));
        seqs
    }

    fn deliver(&mut self, payload: Option<Vec<u8>>, monitor: &mut Monitor) {
        if let Some(payload) = payload {
            log::trace!("[rx] deliver seq={} len={}", self.expected, payload.len());
            monitor.record(MonitorEvent::Delivered(payload.len()));
            self.delivered.push_back(payload);
        }
        self.expected = self.expected.next();
    }

    fn repeat_ack(&mut self) {
        self.ack_requests.push_back(AckRequest::Immediate {
            ack: self.ack_point(),
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
