//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! session.  Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Running the two-way parameter negotiation.
//! - Coordinating [`crate::tx::TxEngine`] and [`crate::rx::RxEngine`].
//! - Dispatching inbound datagrams to the right handler.
//! - Surfacing [`Event`]s and diagnostics to the application.
//!
//! The connection is sans-IO.  The owner feeds it datagrams with
//! [`Connection::handle_datagram`], advances time with [`Connection::tick`],
//! and drains [`Connection::poll_transmit`] / [`Connection::poll_event`]
//! after every call.  [`crate::session`] does exactly that over a real
//! socket; the integration tests do it over a [`crate::simulator`].
//!
//! # Handshake
//!
//! ```text
//!  Initiator                                  Responder
//!     │ ── SYN (isn_i, proposal) ───────────────▶ │  negotiate
//!     │ ◀─────────── SYN|ACK (isn_r, agreed) ──── │
//!  negotiate, OPEN                                 │
//!     │ ── ACK (ack = isn_r) ───────────────────▶ │  OPEN
//! ```
//!
//! Handshake segments always carry a full checksum; the negotiated
//! checksum settings apply from the first non-SYN segment onward.

use std::collections::{vec_deque, VecDeque};

use crate::checksum::ChecksumEngine;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::monitor::{Counters, Monitor, MonitorEvent};
use crate::params::{negotiate, ConnectionParameters, ParamError, Role};
use crate::rx::RxEngine;
use crate::segment::{flags, Header, Segment};
use crate::seq::SequenceNumber;
use crate::state::{transition, Action, ConnectionState, Input};
use crate::timer::{TimerBank, TimerKind};
use crate::tx::{AckRequest, TxEngine};
use crate::window::WindowSnapshot;

/// Notifications for the application, drained with [`Connection::poll_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Negotiation finished; data may flow.
    Opened(ConnectionParameters),
    /// The open attempt failed; the connection is `Closed` again.
    OpenFailed(EngineError),
    /// A submit was refused with `WindowFull` and a slot is free again.
    Writable,
    /// The reorder buffer overflowed repeatedly.
    ReorderOverflow,
    /// The connection closed in an orderly way.
    Closed,
    /// An established connection failed and was torn down.
    ConnectionLost(EngineError),
}

/// Snapshot returned by [`Connection::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: ConnectionState,
    pub role: Option<Role>,
    pub negotiated: Option<ConnectionParameters>,
    pub counters: Counters,
    pub window: Option<WindowSnapshot>,
    pub fault_injection: bool,
    pub last_error: Option<EngineError>,
}

/// Handshake bookkeeping, alive only while `Negotiating`.
#[derive(Debug)]
struct Handshake {
    local: ConnectionParameters,
    negotiated: Option<ConnectionParameters>,
    peer_isn: Option<SequenceNumber>,
    /// Segment to resend when the handshake timer fires.
    last_sent: Option<Segment>,
    resends: u32,
    rejections: u32,
}

/// Data-transfer engines, alive only while `Open` or `Closing`.
#[derive(Debug)]
struct Transfer {
    params: ConnectionParameters,
    peer_isn: SequenceNumber,
    checksum: ChecksumEngine,
    tx: TxEngine,
    rx: RxEngine,
    close_sent: bool,
    /// Silent ticks tolerated before the connection is dropped; `0` is off.
    idle_ticks: u32,
}

impl Transfer {
    fn new(params: ConnectionParameters, peer_isn: SequenceNumber, config: &EngineConfig) -> Self {
        Self {
            checksum: ChecksumEngine::for_params(&params),
            tx: TxEngine::new(&params, peer_isn),
            rx: RxEngine::new(&params, peer_isn, config.reorder_overflow_threshold),
            idle_ticks: config.idle_ticks(&params),
            params,
            peer_isn,
            close_sent: false,
        }
    }
}

/// A single reliable connection, driven by ticks and datagrams.
#[derive(Debug)]
pub struct Connection {
    config: EngineConfig,
    state: ConnectionState,
    role: Option<Role>,
    /// Last parameters passed to `open`, kept for auto-reconnect.
    proposal: Option<ConnectionParameters>,
    handshake: Option<Handshake>,
    transfer: Option<Transfer>,
    /// Handshake resend and idle-close timers.
    timers: TimerBank,
    fault_injection: bool,
    /// Close requested during negotiation: `Some(graceful)`.
    pending_close: Option<bool>,
    /// A connection was lost; counters restart on the next open.
    lost: bool,
    monitor: Monitor,
    transmit: VecDeque<Vec<u8>>,
    delivered: VecDeque<Vec<u8>>,
    events: VecDeque<Event>,
    last_error: Option<EngineError>,
}

impl Connection {
    pub fn new(config: EngineConfig) -> Self {
        let monitor = Monitor::new(config.monitor_interval);
        Self {
            config,
            state: ConnectionState::Closed,
            role: None,
            proposal: None,
            handshake: None,
            transfer: None,
            timers: TimerBank::default(),
            fault_injection: false,
            pending_close: None,
            lost: false,
            monitor,
            transmit: VecDeque::new(),
            delivered: VecDeque::new(),
            events: VecDeque::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Application operations
    // -----------------------------------------------------------------------

    /// Start negotiating as `role` with the given proposal.
    ///
    /// Only legal from `Closed`.  The outcome arrives later as
    /// [`Event::Opened`] or [`Event::OpenFailed`].
    pub fn open(&mut self, role: Role, params: ConnectionParameters) -> Result<(), EngineError> {
        let (next, action) = transition(self.state, Input::Open);
        if action == Action::Reject {
            return Err(EngineError::BadState(self.state));
        }
        self.config.validate()?;
        params.validate()?;

        if self.lost {
            self.monitor.reset_for_reconnect();
            self.lost = false;
        }
        self.state = next;
        self.role = Some(role);
        self.proposal = Some(params.clone());
        self.last_error = None;
        self.pending_close = None;
        self.start_handshake(role, params);
        Ok(())
    }

    /// Close the connection.
    ///
    /// A graceful close drains the window and exchanges a close segment; an
    /// abortive close sends a reset and discards everything at once.  While
    /// negotiating, the first close request is remembered and applied when
    /// negotiation settles.
    pub fn close(&mut self, graceful: bool) -> Result<(), EngineError> {
        let (next, action) = transition(self.state, Input::Close { graceful });
        match action {
            Action::Reject => return Err(EngineError::BadState(self.state)),
            Action::QueueClose => {
                if self.pending_close.is_none() {
                    log::debug!("[conn] close (graceful={}) queued until negotiated", graceful);
                    self.pending_close = Some(graceful);
                }
            }
            Action::BeginDrain => {
                log::info!("[conn] closing: draining {} segment(s)", self.in_flight());
                self.state = next;
                self.check_drained();
            }
            Action::Abort => {
                log::info!("[conn] aborting connection");
                if let Some(t) = self.transfer.as_mut() {
                    t.tx.send_reset();
                }
                self.flush();
                self.state = next;
                self.teardown();
                self.events.push_back(Event::Closed);
            }
            _ => {}
        }
        self.flush();
        Ok(())
    }

    /// Corrupt the checksum of every outgoing segment while `enabled`.
    pub fn inject_fault(&mut self, enabled: bool) {
        if enabled != self.fault_injection {
            log::warn!("[conn] fault injection {}", if enabled { "on" } else { "off" });
        }
        self.fault_injection = enabled;
    }

    /// Queue one payload for reliable, in-order delivery.
    pub fn submit(&mut self, payload: impl Into<Vec<u8>>) -> Result<SequenceNumber, EngineError> {
        if self.state != ConnectionState::Open {
            return Err(EngineError::BadState(self.state));
        }
        let t = self
            .transfer
            .as_mut()
            .ok_or(EngineError::BadState(self.state))?;
        let seq = t.tx.submit(payload.into())?;
        self.flush();
        Ok(seq)
    }

    /// Drain the payloads delivered in order so far.
    pub fn poll(&mut self) -> vec_deque::Drain<'_, Vec<u8>> {
        self.delivered.drain(..)
    }

    pub fn status(&self) -> Status {
        Status {
            state: self.state,
            role: self.role,
            negotiated: self.transfer.as_ref().map(|t| t.params.clone()),
            counters: self.monitor.snapshot(),
            window: self.transfer.as_ref().map(|t| t.tx.snapshot()),
            fault_injection: self.fault_injection,
            last_error: self.last_error.clone(),
        }
    }

    /// `true` when a submit would not bounce off a full window.
    pub fn can_submit(&self) -> bool {
        self.state == ConnectionState::Open
            && self.transfer.as_ref().is_some_and(|t| t.tx.can_submit())
    }

    // -----------------------------------------------------------------------
    // Driver operations
    // -----------------------------------------------------------------------

    /// Feed one datagram received from the peer.
    pub fn handle_datagram(&mut self, datagram: &[u8]) {
        match self.state {
            ConnectionState::Negotiating => self.on_handshake_datagram(datagram),
            ConnectionState::Open | ConnectionState::Closing => {
                // A late SYN|ACK is sealed like every handshake segment.
                let segment = match (self.transfer.as_ref(), Header::peek(datagram)) {
                    (Some(_), Ok(header)) if header.has(flags::SYN) => {
                        self.decode_counted(datagram, &ChecksumEngine::strict())
                    }
                    (Some(t), _) => t.rx.accept(datagram, &mut self.monitor),
                    (None, _) => None,
                };
                if let Some(segment) = segment {
                    self.on_transfer_segment(segment);
                }
            }
            ConnectionState::Closed | ConnectionState::Error => {
                log::trace!("[conn] ignoring datagram while {}", self.state);
            }
        }
        self.flush();
    }

    /// Advance every timer by one tick.
    pub fn tick(&mut self) {
        self.monitor.tick();

        for kind in self.timers.tick() {
            match kind {
                TimerKind::Handshake => self.on_handshake_timeout(),
                TimerKind::IdleClose => {
                    if let Some(t) = self.transfer.as_ref() {
                        log::warn!("[conn] peer silent for {} ticks", t.idle_ticks);
                        self.fail(EngineError::IdleTimeout);
                    }
                }
                _ => {}
            }
        }

        if let Some(t) = self.transfer.as_mut() {
            if let Err(err) = t.tx.tick(&mut self.monitor) {
                if self.state == ConnectionState::Closing {
                    log::warn!("[conn] giving up on close handshake: {}", err);
                    self.finish_close();
                } else {
                    self.fail(err);
                }
            }
        }
        self.check_drained();
        self.flush();
    }

    /// Next datagram to hand to the channel.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmit.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    fn start_handshake(&mut self, role: Role, local: ConnectionParameters) {
        self.timers.cancel_all();
        let mut handshake = Handshake {
            local,
            negotiated: None,
            peer_isn: None,
            last_sent: None,
            resends: 0,
            rejections: 0,
        };
        match role {
            Role::Initiator => {
                let local = &handshake.local;
                let syn = Segment::new(
                    local.version,
                    flags::SYN,
                    local.connection_id,
                    local.initial_sequence_number,
                    SequenceNumber(0),
                    local.encode_block(),
                );
                log::info!(
                    "[conn] → SYN isn={} window={} mss={}",
                    local.initial_sequence_number,
                    local.window_size,
                    local.max_segment_size
                );
                self.timers
                    .arm(TimerKind::Handshake, u32::from(local.retransmit_timeout));
                self.emit_handshake(&syn);
                handshake.last_sent = Some(syn);
            }
            Role::Responder => {
                log::info!("[conn] listening for SYN");
            }
        }
        self.handshake = Some(handshake);
    }

    fn on_handshake_datagram(&mut self, datagram: &[u8]) {
        let Some(hs) = self.handshake.as_ref() else {
            return;
        };
        // Non-SYN segments from a peer that already considers itself open
        // use the negotiated checksum settings.
        let checksum = match Header::peek(datagram) {
            Ok(header) if !header.has(flags::SYN) => hs
                .negotiated
                .as_ref()
                .map(ChecksumEngine::for_params)
                .unwrap_or_else(ChecksumEngine::strict),
            _ => ChecksumEngine::strict(),
        };
        let Some(segment) = self.decode_counted(datagram, &checksum) else {
            return;
        };

        let role = self.role.unwrap_or(Role::Responder);
        let Some(hs) = self.handshake.as_ref() else {
            return;
        };
        let completes = role == Role::Responder
            && !segment.has(flags::SYN)
            && segment.has(flags::ACK)
            && hs.negotiated.is_some()
            && segment.header.ack == hs.local.initial_sequence_number;
        let local_version = hs.local.version;

        if completes {
            self.complete_handshake();
            if segment.is_sequenced() || segment.has(flags::EACK) {
                self.on_transfer_segment(segment);
            }
        } else if segment.has(flags::RST) && !segment.has(flags::SYN) {
            log::warn!("[conn] ← RST during negotiation");
            let err = if segment.header.version != local_version {
                EngineError::VersionMismatch {
                    local: local_version,
                    peer: segment.header.version,
                }
            } else {
                EngineError::HandshakeFailed("reset by peer".into())
            };
            self.fail(err);
        } else if segment.has(flags::SYN) {
            match (role, segment.has(flags::ACK)) {
                (Role::Responder, false) => self.on_syn(segment),
                (Role::Initiator, true) => self.on_syn_ack(segment),
                _ => {
                    log::debug!("[conn] unexpected SYN for {:?}, ignoring", role);
                    self.monitor.record(MonitorEvent::Dropped);
                }
            }
        } else if segment.carries_stream() {
            log::debug!("[conn] stream segment seq={} before open, ignoring", segment.header.seq);
            self.monitor.record(MonitorEvent::Dropped);
        }
    }

    /// Responder: the initiator's proposal arrived.
    fn on_syn(&mut self, syn: Segment) {
        let Some(hs) = self.handshake.as_mut() else {
            return;
        };
        if hs.peer_isn == Some(syn.header.seq) {
            // Our SYN|ACK was lost; answer the retransmitted SYN again.
            if let Some(reply) = hs.last_sent.clone() {
                log::debug!("[conn] duplicate SYN, resending SYN|ACK");
                self.emit_handshake(&reply);
            }
            return;
        }

        let proposal = ConnectionParameters::decode_block(
            syn.header.version,
            syn.header.connection_id,
            syn.header.seq,
            &syn.payload,
        )
        .map_err(|e| ParamError::Invalid(e.to_string()))
        .and_then(|peer| negotiate(&hs.local, &peer));

        let agreed = match proposal {
            Ok(agreed) => agreed,
            Err(err) => return self.reject_proposal(&syn, err),
        };

        let reply = Segment::new(
            agreed.version,
            flags::SYN | flags::ACK,
            agreed.connection_id,
            agreed.initial_sequence_number,
            syn.header.seq,
            agreed.encode_block(),
        );
        log::info!(
            "[conn] ← SYN isn={}; → SYN|ACK window={} mss={}",
            syn.header.seq,
            agreed.window_size,
            agreed.max_segment_size
        );
        self.timers
            .arm(TimerKind::Handshake, u32::from(agreed.retransmit_timeout));
        hs.negotiated = Some(agreed);
        hs.peer_isn = Some(syn.header.seq);
        hs.resends = 0;
        hs.last_sent = Some(reply.clone());
        self.emit_handshake(&reply);
    }

    /// Initiator: the responder's answer arrived.
    fn on_syn_ack(&mut self, syn_ack: Segment) {
        let Some(hs) = self.handshake.as_mut() else {
            return;
        };
        if syn_ack.header.ack != hs.local.initial_sequence_number {
            log::debug!("[conn] stale SYN|ACK (ack={}), ignoring", syn_ack.header.ack);
            return;
        }
        let proposal = ConnectionParameters::decode_block(
            syn_ack.header.version,
            syn_ack.header.connection_id,
            syn_ack.header.seq,
            &syn_ack.payload,
        )
        .map_err(|e| ParamError::Invalid(e.to_string()))
        .and_then(|peer| negotiate(&hs.local, &peer));

        match proposal {
            Ok(agreed) => {
                log::info!("[conn] ← SYN|ACK isn={}", syn_ack.header.seq);
                hs.negotiated = Some(agreed);
                hs.peer_isn = Some(syn_ack.header.seq);
                self.complete_handshake();
            }
            Err(err) => self.reject_proposal(&syn_ack, err),
        }
    }

    fn reject_proposal(&mut self, offending: &Segment, err: ParamError) {
        if let ParamError::VersionMismatch { .. } = err {
            log::warn!("[conn] {}", err);
            self.send_handshake_reset(offending);
            return self.fail(err.into());
        }

        let Some(hs) = self.handshake.as_mut() else {
            return;
        };
        hs.rejections += 1;
        log::warn!(
            "[conn] rejected proposal ({}/{}): {}",
            hs.rejections,
            self.config.negotiation_attempts,
            err
        );
        if hs.rejections > self.config.negotiation_attempts {
            self.send_handshake_reset(offending);
            self.fail(EngineError::HandshakeFailed(err.to_string()));
        }
    }

    fn send_handshake_reset(&mut self, offending: &Segment) {
        let Some(hs) = self.handshake.as_ref() else {
            return;
        };
        let rst = Segment::new(
            hs.local.version,
            flags::RST,
            hs.local.connection_id,
            hs.local.initial_sequence_number,
            offending.header.seq,
            Vec::new(),
        );
        self.emit_handshake(&rst);
    }

    /// Build the transfer engines and enter `Open`.  The initiator also
    /// queues the final handshake ACK, ahead of anything a queued close
    /// may send.
    fn complete_handshake(&mut self) {
        let ready = self
            .handshake
            .as_ref()
            .and_then(|hs| Some((hs.negotiated.clone()?, hs.peer_isn?)));
        let Some((params, peer_isn)) = ready else {
            return;
        };
        self.handshake = None;
        let (next, _) = transition(self.state, Input::HandshakeComplete);
        self.state = next;
        self.timers.cancel(TimerKind::Handshake);
        log::info!(
            "[conn] open: window={} mss={} rto={} checksum(header={}, payload={})",
            params.window_size,
            params.max_segment_size,
            params.retransmit_timeout,
            params.header_checksum_enabled,
            params.payload_checksum_enabled
        );
        let mut transfer = Transfer::new(params.clone(), peer_isn, &self.config);
        self.timers.arm(TimerKind::IdleClose, transfer.idle_ticks);
        if self.role == Some(Role::Initiator) {
            transfer
                .tx
                .request_ack(AckRequest::Immediate { ack: peer_isn });
        }
        self.transfer = Some(transfer);
        self.events.push_back(Event::Opened(params));
        self.flush();

        if let Some(graceful) = self.pending_close.take() {
            if let Err(e) = self.close(graceful) {
                log::warn!("[conn] queued close failed: {}", e);
            }
        }
    }

    fn on_handshake_timeout(&mut self) {
        let Some(hs) = self.handshake.as_mut() else {
            return;
        };
        let Some(segment) = hs.last_sent.clone() else {
            return;
        };
        hs.resends += 1;
        if hs.resends > self.config.handshake_retries {
            log::warn!("[conn] no answer after {} handshake resends", self.config.handshake_retries);
            return self.fail(EngineError::HandshakeTimeout);
        }
        let rto = hs
            .negotiated
            .as_ref()
            .unwrap_or(&hs.local)
            .retransmit_timeout;
        log::debug!("[conn] handshake timeout, resend {}", hs.resends);
        self.timers.arm(TimerKind::Handshake, u32::from(rto));
        self.monitor.record(MonitorEvent::Resent);
        self.emit_handshake(&segment);
    }

    fn decode_counted(&mut self, datagram: &[u8], checksum: &ChecksumEngine) -> Option<Segment> {
        match Segment::decode(datagram, checksum) {
            Ok(segment) => {
                // Stream segments are counted once sequenced.
                if !segment.carries_stream() {
                    self.monitor.record(MonitorEvent::Valid);
                }
                Some(segment)
            }
            Err(e) => {
                log::debug!("[conn] drop handshake datagram: {}", e);
                self.monitor.record(MonitorEvent::Dropped);
                None
            }
        }
    }

    fn emit_handshake(&mut self, segment: &Segment) {
        let mut bytes = segment.encode(&ChecksumEngine::strict());
        if self.fault_injection {
            ChecksumEngine::corrupt(&mut bytes);
        }
        self.monitor.record(MonitorEvent::Sent);
        self.transmit.push_back(bytes);
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    fn on_transfer_segment(&mut self, segment: Segment) {
        let Some(t) = self.transfer.as_mut() else {
            return;
        };
        self.timers.arm(TimerKind::IdleClose, t.idle_ticks);

        if segment.has(flags::SYN) {
            if segment.has(flags::ACK) || segment.header.seq == t.peer_isn {
                // A late copy of the handshake; the peer may have missed our ACK.
                let ack = t.rx.ack_point();
                t.tx.request_ack(AckRequest::Immediate { ack });
            } else {
                log::warn!("[conn] ← SYN on an open connection, peer restarted");
                self.fail(EngineError::Reset);
            }
            return;
        }

        if segment.has(flags::ACK) {
            t.tx.on_cumulative_ack(segment.header.ack);
        }
        if segment.has(flags::EACK) {
            match segment.eack_list() {
                Ok(seqs) => {
                    t.tx.on_selective_ack(&seqs);
                }
                Err(e) => log::debug!("[conn] bad EACK payload: {}", e),
            }
        }

        if segment.has(flags::RST) {
            log::info!("[conn] ← RST seq={}, peer closed", segment.header.seq);
            t.tx.request_ack(AckRequest::Immediate {
                ack: segment.header.seq,
            });
            self.flush();
            let (next, _) = transition(self.state, Input::PeerReset);
            self.state = next;
            self.teardown();
            self.events.push_back(Event::Closed);
            return;
        }

        if segment.has(flags::DATA) || segment.has(flags::NUL) {
            let outcome = t.rx.on_segment(&segment, &mut self.monitor);
            self.delivered.extend(t.rx.drain_delivered());
            for request in t.rx.take_ack_requests() {
                t.tx.request_ack(request);
            }
            if let Err(err) = outcome {
                log::warn!("[conn] {}", err);
                self.events.push_back(Event::ReorderOverflow);
                if self.config.escalate_reorder_overflow {
                    return self.fail(err);
                }
            }
        }

        if t.tx.take_writable() {
            self.events.push_back(Event::Writable);
        }
        self.check_drained();
    }

    /// While `Closing`: send the close segment once the window is empty, and
    /// finish once it has been acknowledged.
    fn check_drained(&mut self) {
        if self.state != ConnectionState::Closing {
            return;
        }
        let Some(t) = self.transfer.as_mut() else {
            return;
        };
        if !t.tx.is_idle() {
            return;
        }
        if t.close_sent {
            log::info!("[conn] close acknowledged");
            self.finish_close();
        } else {
            t.tx.send_close();
            t.close_sent = true;
        }
    }

    fn finish_close(&mut self) {
        let (next, _) = transition(self.state, Input::Drained);
        self.state = next;
        self.teardown();
        self.events.push_back(Event::Closed);
    }

    /// Move everything the Tx engine has queued onto the transmit queue.
    fn flush(&mut self) {
        let Some(t) = self.transfer.as_mut() else {
            return;
        };
        while let Some(segment) = t.tx.poll_transmit() {
            let mut bytes = segment.encode(&t.checksum);
            if self.fault_injection {
                ChecksumEngine::corrupt(&mut bytes);
            }
            t.rx.on_ack_sent(segment.header.ack);
            self.monitor.record(MonitorEvent::Sent);
            self.transmit.push_back(bytes);
        }
    }

    fn in_flight(&self) -> usize {
        self.transfer.as_ref().map_or(0, |t| t.tx.in_flight())
    }

    // -----------------------------------------------------------------------
    // Teardown and failure
    // -----------------------------------------------------------------------

    fn teardown(&mut self) {
        self.handshake = None;
        self.transfer = None;
        self.timers.cancel_all();
    }

    /// Fatal error: record it, fall through `Error` to `Closed`, and
    /// optionally start over.
    fn fail(&mut self, err: EngineError) {
        let (next, action) = transition(self.state, Input::Fatal);
        if action != Action::Fail {
            return;
        }
        let negotiating = self.state == ConnectionState::Negotiating;
        self.state = next;
        log::error!("[conn] {}", err);
        self.teardown();
        self.pending_close = None;
        self.monitor.record(MonitorEvent::Reconnect);
        self.lost = true;
        self.last_error = Some(err.clone());
        self.events.push_back(if negotiating {
            Event::OpenFailed(err)
        } else {
            Event::ConnectionLost(err)
        });

        let (next, _) = transition(self.state, Input::CleanupComplete);
        self.state = next;

        if self.config.auto_reconnect {
            if let (Some(role), Some(params)) = (self.role, self.proposal.clone()) {
                log::info!("[conn] reconnecting as {:?}", role);
                let params = params.with_random_isn();
                if let Err(e) = self.open(role, params) {
                    log::error!("[conn] reconnect failed: {}", e);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn params(isn: u16) -> ConnectionParameters {
        ConnectionParameters {
            initial_sequence_number: SequenceNumber(isn),
            ..Default::default()
        }
    }

    /// Move every queued datagram from `from` to `to`.
    fn pump(from: &mut Connection, to: &mut Connection) -> usize {
        let mut n = 0;
        while let Some(d) = from.poll_transmit() {
            to.handle_datagram(&d);
            n += 1;
        }
        n
    }

    fn open_pair() -> (Connection, Connection) {
        let mut a = Connection::new(EngineConfig::default());
        let mut b = Connection::new(EngineConfig::default());
        b.open(Role::Responder, params(500)).unwrap();
        a.open(Role::Initiator, params(100)).unwrap();
        pump(&mut a, &mut b);
        pump(&mut b, &mut a);
        pump(&mut a, &mut b);
        (a, b)
    }

    #[test]
    fn handshake_opens_both_sides() {
        let (mut a, mut b) = open_pair();
        assert_eq!(a.state(), ConnectionState::Open);
        assert_eq!(b.state(), ConnectionState::Open);
        assert!(matches!(a.poll_event(), Some(Event::Opened(_))));
        assert!(matches!(b.poll_event(), Some(Event::Opened(_))));
    }

    #[test]
    fn submit_requires_open() {
        let mut c = Connection::new(EngineConfig::default());
        assert_eq!(
            c.submit(b"x".to_vec()),
            Err(EngineError::BadState(ConnectionState::Closed))
        );
    }

    #[test]
    fn open_twice_is_rejected() {
        let mut c = Connection::new(EngineConfig::default());
        c.open(Role::Initiator, params(1)).unwrap();
        assert_eq!(
            c.open(Role::Initiator, params(1)),
            Err(EngineError::BadState(ConnectionState::Negotiating))
        );
    }

    #[test]
    fn invalid_parameters_rejected_before_state_change() {
        let mut c = Connection::new(EngineConfig::default());
        let bad = ConnectionParameters {
            window_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            c.open(Role::Initiator, bad),
            Err(EngineError::InvalidParameters(_))
        ));
        assert_eq!(c.state(), ConnectionState::Closed);
    }

    #[test]
    fn data_flows_after_open() {
        let (mut a, mut b) = open_pair();
        a.submit(b"hello".to_vec()).unwrap();
        pump(&mut a, &mut b);
        assert_eq!(b.poll().collect::<Vec<_>>(), vec![b"hello".to_vec()]);
    }

    #[test]
    fn abortive_close_resets_peer() {
        let (mut a, mut b) = open_pair();
        a.close(false).unwrap();
        assert_eq!(a.state(), ConnectionState::Closed);
        pump(&mut a, &mut b);
        assert_eq!(b.state(), ConnectionState::Closed);
    }

    #[test]
    fn close_during_negotiation_applied_on_open() {
        let mut a = Connection::new(EngineConfig::default());
        let mut b = Connection::new(EngineConfig::default());
        b.open(Role::Responder, params(500)).unwrap();
        a.open(Role::Initiator, params(100)).unwrap();
        a.close(true).unwrap();
        a.close(false).unwrap();
        assert_eq!(a.state(), ConnectionState::Negotiating);

        pump(&mut a, &mut b);
        pump(&mut b, &mut a);
        // The first (graceful) request wins.
        assert_eq!(a.state(), ConnectionState::Closing);
    }

    #[test]
    fn abortive_close_during_negotiation_resets_on_open() {
        let mut a = Connection::new(EngineConfig::default());
        let mut b = Connection::new(EngineConfig::default());
        b.open(Role::Responder, params(500)).unwrap();
        a.open(Role::Initiator, params(100)).unwrap();
        a.close(false).unwrap();

        pump(&mut a, &mut b);
        pump(&mut b, &mut a);
        assert_eq!(a.state(), ConnectionState::Closed);
        let events: Vec<_> = std::iter::from_fn(|| a.poll_event()).collect();
        assert!(matches!(events.as_slice(), [Event::Opened(_), Event::Closed]));

        // The handshake ACK goes out ahead of the reset.
        pump(&mut a, &mut b);
        assert_eq!(b.state(), ConnectionState::Closed);
    }

    #[test]
    fn status_reports_negotiated_parameters() {
        let (a, _b) = open_pair();
        let status = a.status();
        assert_eq!(status.state, ConnectionState::Open);
        assert_eq!(status.role, Some(Role::Initiator));
        assert!(status.negotiated.is_some());
        assert_eq!(status.window.map(|w| w.outstanding), Some(0));
    }
}
