//! Send-side state machine.
//!
//! [`TxEngine`] owns the transmit [`Window`] and is the only code that
//! mutates it.  It assigns sequence numbers, drives per-segment
//! retransmission, emits keep-alives, and turns [`AckRequest`]s from the
//! receive side into outgoing acknowledgments.
//!
//! # Protocol contract
//!
//! - At most `window_size` sequenced segments (DATA, NUL, the close RST)
//!   are outstanding.
//! - Every outgoing segment carries the ACK flag and the current cumulative
//!   ack point, so any segment doubles as an acknowledgment.
//! - A segment whose retransmission timer expires is resent unchanged
//!   (fixed interval, no back-off) until `max_retrans_count` resends have
//!   gone unanswered, at which point the connection is lost.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.  The caller drains [`TxEngine::poll_transmit`] after
//! every operation.

use std::collections::VecDeque;

use crate::error::EngineError;
use crate::monitor::{Monitor, MonitorEvent};
use crate::params::ConnectionParameters;
use crate::segment::{flags, Segment};
use crate::seq::SequenceNumber;
use crate::timer::{TimerBank, TimerKind};
use crate::window::{Window, WindowSnapshot};

/// Acknowledgment work requested by the receive side.
///
/// `ack` is always the receiver's current cumulative ack point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckRequest {
    /// Acknowledge within `ack_timeout` unless a piggyback happens first.
    Deferred { ack: SequenceNumber },
    /// Acknowledge now.
    Immediate { ack: SequenceNumber },
    /// Send an EACK listing every buffered out-of-sequence number.
    Selective {
        ack: SequenceNumber,
        received: Vec<SequenceNumber>,
    },
}

#[derive(Debug)]
pub struct TxEngine {
    version: u8,
    connection_id: u16,
    window: Window,
    max_segment_size: u16,
    retransmit_timeout: u32,
    max_retrans_count: u8,
    ack_timeout: u32,
    null_timeout: u32,
    /// Cumulative ack point stamped on every outgoing segment.
    ack_point: SequenceNumber,
    ack_pending: bool,
    timers: TimerBank,
    outbound: VecDeque<Segment>,
    close_queued: bool,
    /// A submit bounced off a full window; report the next free slot.
    backpressured: bool,
}

impl TxEngine {
    /// Build the send side from negotiated parameters.
    ///
    /// `peer_isn` seeds the ack point: nothing beyond the peer's SYN has
    /// been received yet.
    pub fn new(params: &ConnectionParameters, peer_isn: SequenceNumber) -> Self {
        let mut timers = TimerBank::default();
        timers.arm(TimerKind::KeepAlive, u32::from(params.null_timeout));
        Self {
            version: params.version,
            connection_id: params.connection_id,
            window: Window::new(params.initial_sequence_number, params.window_size as usize),
            max_segment_size: params.max_segment_size,
            retransmit_timeout: u32::from(params.retransmit_timeout),
            max_retrans_count: params.max_retrans_count,
            ack_timeout: u32::from(params.ack_timeout),
            null_timeout: u32::from(params.null_timeout),
            ack_point: peer_isn,
            ack_pending: false,
            timers,
            outbound: VecDeque::new(),
            close_queued: false,
            backpressured: false,
        }
    }

    /// Queue one payload for reliable delivery.
    ///
    /// Fails with [`EngineError::WindowFull`] when the window is at capacity;
    /// the caller should retry once an acknowledgment frees a slot.
    pub fn submit(&mut self, payload: Vec<u8>) -> Result<SequenceNumber, EngineError> {
        if payload.len() > self.max_segment_size as usize {
            return Err(EngineError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_segment_size,
            });
        }
        if self.window.is_full() {
            self.backpressured = true;
            return Err(EngineError::WindowFull);
        }

        let len = payload.len();
        let seq = self.enqueue_sequenced(flags::DATA, payload);
        self.timers.arm(TimerKind::KeepAlive, self.null_timeout);
        log::debug!(
            "[tx] → DATA seq={} len={} in_flight={}",
            seq,
            len,
            self.window.len()
        );
        Ok(seq)
    }

    /// Process a cumulative acknowledgment.  Returns the number of window
    /// entries released.
    pub fn on_cumulative_ack(&mut self, ack: SequenceNumber) -> usize {
        let released = self.window.acknowledge_through(ack);
        if released > 0 {
            log::trace!("[tx] ← ACK ack={} released={}", ack, released);
            if self.window.is_empty() && !self.close_queued {
                self.timers.arm(TimerKind::KeepAlive, self.null_timeout);
            }
        }
        released
    }

    /// Process the sequence numbers listed in an EACK.
    pub fn on_selective_ack(&mut self, seqs: &[SequenceNumber]) -> usize {
        let acked = seqs
            .iter()
            .filter(|&&seq| self.window.acknowledge_one(seq))
            .count();
        if acked > 0 {
            log::trace!("[tx] ← EACK {:?} matched={}", seqs, acked);
        }
        acked
    }

    /// Apply an acknowledgment request from the receive side.
    pub fn request_ack(&mut self, request: AckRequest) {
        match request {
            AckRequest::Deferred { ack } => {
                self.ack_point = ack;
                if !self.ack_pending {
                    self.ack_pending = true;
                    self.timers.arm(TimerKind::AckDelay, self.ack_timeout);
                }
            }
            AckRequest::Immediate { ack } => {
                self.ack_point = ack;
                self.queue_pure_ack();
            }
            AckRequest::Selective { ack, received } => {
                self.ack_point = ack;
                // A newer EACK supersedes any still queued.
                self.outbound.retain(|s| !s.has(flags::EACK));
                let eack = self.control(flags::EACK, Segment::eack_payload(&received));
                self.outbound.push_back(eack);
            }
        }
    }

    /// Advance retransmission and connection timers by one tick.
    ///
    /// Returns [`EngineError::RetransmitExhausted`] when a segment has used
    /// up its resends; the connection must be torn down.
    pub fn tick(&mut self, monitor: &mut Monitor) -> Result<(), EngineError> {
        let max_retrans = self.max_retrans_count;
        let rto = self.retransmit_timeout;
        for entry in self.window.expired() {
            if entry.retries >= max_retrans {
                log::warn!(
                    "[tx] segment {} unacknowledged after {} resends",
                    entry.seq(),
                    entry.retries
                );
                return Err(EngineError::RetransmitExhausted(entry.seq()));
            }
            entry.retries += 1;
            entry.timer.arm(rto);
            log::debug!("[tx] timeout, resending seq={} (retry {})", entry.seq(), entry.retries);
            self.outbound.push_back(entry.segment.clone());
            monitor.record(MonitorEvent::Resent);
        }

        for kind in self.timers.tick() {
            match kind {
                TimerKind::AckDelay if self.ack_pending => self.queue_pure_ack(),
                TimerKind::KeepAlive => self.on_keep_alive_timer(),
                _ => {}
            }
        }
        Ok(())
    }

    /// Queue the graceful-close RST.  It occupies a window slot and is
    /// retransmitted like data until acknowledged.
    pub fn send_close(&mut self) -> SequenceNumber {
        self.close_queued = true;
        self.timers.cancel(TimerKind::KeepAlive);
        let seq = self.enqueue_sequenced(flags::RST, Vec::new());
        log::debug!("[tx] → RST (close) seq={}", seq);
        seq
    }

    /// Queue a one-shot RST outside the window (abortive close).
    pub fn send_reset(&mut self) {
        let rst = self.control(flags::RST, Vec::new());
        self.outbound.push_back(rst);
    }

    /// Next segment to put on the wire, stamped with the current ack point.
    pub fn poll_transmit(&mut self) -> Option<Segment> {
        let mut segment = self.outbound.pop_front()?;
        segment.header.flags |= flags::ACK;
        segment.header.ack = self.ack_point;
        // Whatever goes out now carries the cumulative ack.
        self.ack_pending = false;
        self.timers.cancel(TimerKind::AckDelay);
        Some(segment)
    }

    /// `true` once after a full window, which bounced a submit, frees a slot.
    pub fn take_writable(&mut self) -> bool {
        if self.backpressured && !self.window.is_full() {
            self.backpressured = false;
            return true;
        }
        false
    }

    pub fn is_idle(&self) -> bool {
        self.window.is_empty()
    }

    pub fn can_submit(&self) -> bool {
        !self.window.is_full()
    }

    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn ack_point(&self) -> SequenceNumber {
        self.ack_point
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.window.snapshot()
    }

    fn on_keep_alive_timer(&mut self) {
        if self.close_queued {
            return;
        }
        if self.window.is_empty() {
            let seq = self.enqueue_sequenced(flags::NUL, Vec::new());
            log::debug!("[tx] idle, NUL keep-alive seq={}", seq);
        } else {
            // Traffic still in flight; look again after another idle period.
            self.timers.arm(TimerKind::KeepAlive, self.null_timeout);
        }
    }

    fn enqueue_sequenced(&mut self, kind: u16, payload: Vec<u8>) -> SequenceNumber {
        let mut segment = self.control(kind, payload);
        segment.header.seq = self.window.next_seq();
        let seq = self.window.insert(segment.clone(), self.retransmit_timeout);
        self.outbound.push_back(segment);
        seq
    }

    fn queue_pure_ack(&mut self) {
        // Anything already queued will carry the ack.
        if self.outbound.is_empty() {
            let ack = self.control(0, Vec::new());
            self.outbound.push_back(ack);
        }
    }

    fn control(&self, kind: u16, payload: Vec<u8>) -> Segment {
        Segment::new(
            self.version,
            kind | flags::ACK,
            self.connection_id,
            self.window.next_seq(),
            self.ack_point,
            payload,
        )
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn params(window: u16) -> ConnectionParameters {
        ConnectionParameters {
            window_size: window,
            initial_sequence_number: SequenceNumber(100),
            retransmit_timeout: 4,
            ack_timeout: 2,
            null_timeout: 10,
            max_retrans_count: 2,
            ..Default::default()
        }
    }

    fn drain(tx: &mut TxEngine) -> Vec<Segment> {
        std::iter::from_fn(|| tx.poll_transmit()).collect()
    }

    #[test]
    fn submit_assigns_numbers_after_isn() {
        let mut tx = TxEngine::new(&params(4), SequenceNumber(7));
        assert_eq!(tx.submit(b"a".to_vec()), Ok(SequenceNumber(101)));
        assert_eq!(tx.submit(b"b".to_vec()), Ok(SequenceNumber(102)));
        let out = drain(&mut tx);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|s| s.has(flags::DATA) && s.has(flags::ACK)));
        assert!(out.iter().all(|s| s.header.ack == SequenceNumber(7)));
    }

    #[test]
    fn full_window_rejects_until_ack() {
        let mut tx = TxEngine::new(&params(2), SequenceNumber(0));
        tx.submit(vec![1]).unwrap();
        tx.submit(vec![2]).unwrap();
        assert_eq!(tx.submit(vec![3]), Err(EngineError::WindowFull));
        assert!(!tx.take_writable());

        assert_eq!(tx.on_cumulative_ack(SequenceNumber(101)), 1);
        assert!(tx.take_writable());
        assert!(!tx.take_writable());
        assert_eq!(tx.submit(vec![3]), Ok(SequenceNumber(103)));
    }

    #[test]
    fn oversize_payload_rejected() {
        let mut p = params(2);
        p.max_segment_size = 4;
        let mut tx = TxEngine::new(&p, SequenceNumber(0));
        assert_eq!(
            tx.submit(vec![0; 5]),
            Err(EngineError::PayloadTooLarge { len: 5, max: 4 })
        );
    }

    #[test]
    fn timeout_resends_identical_segment() {
        let mut monitor = Monitor::new(10);
        let mut tx = TxEngine::new(&params(4), SequenceNumber(0));
        tx.submit(b"abc".to_vec()).unwrap();
        let first = drain(&mut tx);

        for _ in 0..4 {
            tx.tick(&mut monitor).unwrap();
        }
        let resent = drain(&mut tx);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].header.seq, first[0].header.seq);
        assert_eq!(resent[0].payload, first[0].payload);
        assert_eq!(monitor.snapshot().resent, 1);
    }

    #[test]
    fn exhaustion_after_max_resends() {
        let mut monitor = Monitor::new(10);
        let mut tx = TxEngine::new(&params(4), SequenceNumber(0));
        tx.submit(b"x".to_vec()).unwrap();

        // Two resends allowed, the third expiry is fatal.
        let mut result = Ok(());
        for _ in 0..12 {
            result = tx.tick(&mut monitor);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(EngineError::RetransmitExhausted(SequenceNumber(101))));
        assert_eq!(monitor.snapshot().resent, 2);
    }

    #[test]
    fn selective_ack_removes_only_listed_entry() {
        let mut monitor = Monitor::new(10);
        let mut tx = TxEngine::new(&params(4), SequenceNumber(0));
        for i in 0..3u8 {
            tx.submit(vec![i]).unwrap();
        }
        drain(&mut tx);
        assert_eq!(tx.on_selective_ack(&[SequenceNumber(102)]), 1);
        assert_eq!(tx.in_flight(), 3);

        for _ in 0..4 {
            tx.tick(&mut monitor).unwrap();
        }
        let resent: Vec<_> = drain(&mut tx).iter().map(|s| s.header.seq).collect();
        assert_eq!(resent, vec![SequenceNumber(101), SequenceNumber(103)]);
    }

    #[test]
    fn deferred_ack_goes_out_after_ack_timeout() {
        let mut monitor = Monitor::new(10);
        let mut tx = TxEngine::new(&params(4), SequenceNumber(0));
        tx.request_ack(AckRequest::Deferred { ack: SequenceNumber(9) });
        assert!(drain(&mut tx).is_empty());

        tx.tick(&mut monitor).unwrap();
        assert!(drain(&mut tx).is_empty());
        tx.tick(&mut monitor).unwrap();
        let out = drain(&mut tx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].header.ack, SequenceNumber(9));
        assert!(!out[0].is_sequenced());
    }

    #[test]
    fn piggyback_cancels_deferred_ack() {
        let mut monitor = Monitor::new(10);
        let mut tx = TxEngine::new(&params(4), SequenceNumber(0));
        tx.request_ack(AckRequest::Deferred { ack: SequenceNumber(9) });
        tx.submit(b"data".to_vec()).unwrap();
        let out = drain(&mut tx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].header.ack, SequenceNumber(9));

        for _ in 0..3 {
            tx.tick(&mut monitor).unwrap();
        }
        assert!(drain(&mut tx).is_empty());
    }

    #[test]
    fn selective_request_emits_eack_list() {
        let mut tx = TxEngine::new(&params(4), SequenceNumber(0));
        tx.request_ack(AckRequest::Selective {
            ack: SequenceNumber(1),
            received: vec![SequenceNumber(3), SequenceNumber(4)],
        });
        let out = drain(&mut tx);
        assert_eq!(out.len(), 1);
        assert!(out[0].has(flags::EACK));
        assert_eq!(
            out[0].eack_list().unwrap(),
            vec![SequenceNumber(3), SequenceNumber(4)]
        );
    }

    #[test]
    fn keep_alive_after_idle_period() {
        let mut monitor = Monitor::new(10);
        let mut tx = TxEngine::new(&params(4), SequenceNumber(0));
        for _ in 0..9 {
            tx.tick(&mut monitor).unwrap();
        }
        assert!(drain(&mut tx).is_empty());
        tx.tick(&mut monitor).unwrap();
        let out = drain(&mut tx);
        assert_eq!(out.len(), 1);
        assert!(out[0].has(flags::NUL));
        assert_eq!(tx.in_flight(), 1);
    }

    #[test]
    fn close_segment_occupies_window() {
        let mut tx = TxEngine::new(&params(4), SequenceNumber(0));
        let seq = tx.send_close();
        assert!(!tx.is_idle());
        let out = drain(&mut tx);
        assert!(out[0].has(flags::RST));
        tx.on_cumulative_ack(seq);
        assert!(tx.is_idle());
    }
}
