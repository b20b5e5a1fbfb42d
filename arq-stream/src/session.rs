//! Async driver: one [`Connection`] bound to a UDP [`Socket`].
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send / recv / next_event         Session (handle)
//!      │                               ┌──────────────────────┐
//!      └─────────────────────────────▶ │ commands  (mpsc)     │
//!                                      │ delivered (mpsc)     │
//!                                      │ events    (mpsc)     │
//!                                      │ writable  (Notify)   │
//!                                      └──────────┬───────────┘
//!                                                 │ event_loop task
//!   tokio::select! over ─┬─ interval tick ──▶ Connection::tick
//!                        ├─ socket recv   ──▶ Connection::handle_datagram
//!                        └─ command       ──▶ submit / close / fault / status
//!   then: poll_transmit ─▶ [Simulator] ─▶ Socket
//! ```
//!
//! The task owns the connection outright; the handle talks to it only
//! through channels.  [`Session::send`] retries a `WindowFull` submit once
//! the engine reports a free slot.
//!
//! # Shutdown
//!
//! [`Session::shutdown`] drops the command channel; the loop then closes
//! gracefully and exits once the connection is `Closed`.  The loop also
//! exits by itself whenever the connection ends (peer close, failure).

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::EngineConfig;
use crate::connection::{Connection, Event, Status};
use crate::error::EngineError;
use crate::params::{ConnectionParameters, Role};
use crate::seq::SequenceNumber;
use crate::simulator::Simulator;
use crate::socket::{Socket, SocketError, MAX_DATAGRAM};
use crate::state::ConnectionState;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// The event loop has exited; the connection is gone.
    #[error("session has ended")]
    Closed,
}

enum Command {
    Submit {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<SequenceNumber, EngineError>>,
    },
    Close {
        graceful: bool,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    InjectFault(bool),
    Status(oneshot::Sender<Status>),
}

/// Handle to a running connection task.
pub struct Session {
    commands: mpsc::Sender<Command>,
    delivered: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedReceiver<Event>,
    writable: Arc<Notify>,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl Session {
    /// Open as initiator towards `peer`.
    pub fn connect(
        socket: Socket,
        peer: SocketAddr,
        params: ConnectionParameters,
        config: EngineConfig,
    ) -> Result<Self, SessionError> {
        Self::spawn(socket, Role::Initiator, Some(peer), params, config, None)
    }

    /// Open as responder; the peer address is learned from the first SYN.
    pub fn listen(
        socket: Socket,
        params: ConnectionParameters,
        config: EngineConfig,
    ) -> Result<Self, SessionError> {
        Self::spawn(socket, Role::Responder, None, params, config, None)
    }

    /// Open the connection and start its event loop.
    ///
    /// When `link` is given, every outgoing datagram passes through the
    /// simulator before it reaches the socket.  Must be called from within
    /// a tokio runtime.
    pub fn spawn(
        socket: Socket,
        role: Role,
        peer: Option<SocketAddr>,
        params: ConnectionParameters,
        config: EngineConfig,
        link: Option<Simulator>,
    ) -> Result<Self, SessionError> {
        let mut conn = Connection::new(config);
        conn.open(role, params)?;

        let local_addr = socket.local_addr;
        let (commands, command_rx) = mpsc::channel(64);
        let (delivered_tx, delivered) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let writable = Arc::new(Notify::new());

        let handle = tokio::spawn(event_loop(
            socket,
            peer,
            conn,
            link,
            command_rx,
            delivered_tx,
            events_tx,
            Arc::clone(&writable),
        ));

        Ok(Self {
            commands,
            delivered,
            events,
            writable,
            handle,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Submit one payload; fails at once with `WindowFull` at capacity.
    pub async fn submit(&self, payload: Vec<u8>) -> Result<SequenceNumber, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Submit { payload, reply }).await?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Submit one payload, waiting for window space if necessary.
    pub async fn send(&self, payload: Vec<u8>) -> Result<SequenceNumber, SessionError> {
        loop {
            // Registered before the submit so a slot freed in between is
            // not missed.
            let notified = self.writable.notified();
            match self.submit(payload.clone()).await {
                Err(SessionError::Engine(EngineError::WindowFull)) => notified.await,
                other => return other,
            }
        }
    }

    /// Next payload delivered in order, or `Closed` once the connection
    /// has ended and everything delivered has been read.
    pub async fn recv(&mut self) -> Result<Vec<u8>, SessionError> {
        self.delivered.recv().await.ok_or(SessionError::Closed)
    }

    /// Next lifecycle event, or `None` once the loop has exited.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Wait for negotiation to finish, discarding other events meanwhile.
    pub async fn wait_open(&mut self) -> Result<ConnectionParameters, SessionError> {
        while let Some(event) = self.events.recv().await {
            match event {
                Event::Opened(params) => return Ok(params),
                Event::OpenFailed(err) | Event::ConnectionLost(err) => return Err(err.into()),
                Event::Closed => return Err(SessionError::Closed),
                _ => {}
            }
        }
        Err(SessionError::Closed)
    }

    pub async fn status(&self) -> Result<Status, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Status(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn inject_fault(&self, enabled: bool) -> Result<(), SessionError> {
        self.command(Command::InjectFault(enabled)).await
    }

    pub async fn close(&self, graceful: bool) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Close { graceful, reply }).await?;
        Ok(rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Close gracefully and wait for the background task to finish.
    pub async fn shutdown(self) {
        let Session {
            commands, handle, ..
        } = self;
        drop(commands);
        let _ = handle.await;
    }

    async fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn event_loop(
    socket: Socket,
    mut peer: Option<SocketAddr>,
    mut conn: Connection,
    mut link: Option<Simulator>,
    mut commands: mpsc::Receiver<Command>,
    delivered: mpsc::UnboundedSender<Vec<u8>>,
    events: mpsc::UnboundedSender<Event>,
    writable: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(conn.config().timeout_unit);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut commands_open = true;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            // ── Branch 1: time advances ──────────────────────────────────
            _ = ticker.tick() => {
                conn.tick();
                if let Some(link) = link.as_mut() {
                    link.advance();
                }
            }

            // ── Branch 2: incoming datagram ──────────────────────────────
            result = socket.recv_from(&mut buf) => match result {
                Ok((n, from)) => match peer {
                    Some(expected) if expected != from => {
                        log::trace!("[session] ignoring datagram from {}", from);
                    }
                    _ => {
                        if peer.is_none() {
                            log::info!("[session] peer is {}", from);
                            peer = Some(from);
                        }
                        conn.handle_datagram(&buf[..n]);
                    }
                },
                Err(e) => log::warn!("[session] receive failed: {}", e),
            },

            // ── Branch 3: application command ────────────────────────────
            command = commands.recv(), if commands_open => match command {
                Some(command) => apply(&mut conn, command),
                None => {
                    log::debug!("[session] handle dropped, closing");
                    commands_open = false;
                    let _ = conn.close(true);
                }
            },
        }

        while let Some(datagram) = conn.poll_transmit() {
            match link.as_mut() {
                Some(link) => link.transmit(datagram),
                None => send(&socket, peer, &datagram).await,
            }
        }
        if let Some(link) = link.as_mut() {
            for datagram in link.deliver() {
                send(&socket, peer, &datagram).await;
            }
        }

        for payload in conn.poll() {
            let _ = delivered.send(payload);
        }
        while let Some(event) = conn.poll_event() {
            log::debug!("[session] event {:?}", event);
            if !matches!(event, Event::Opened(_) | Event::ReorderOverflow) {
                writable.notify_waiters();
            }
            let _ = events.send(event);
        }

        if conn.state() == ConnectionState::Closed {
            log::info!("[session] connection closed, stopping");
            break;
        }
    }
    writable.notify_waiters();
}

fn apply(conn: &mut Connection, command: Command) {
    match command {
        Command::Submit { payload, reply } => {
            let _ = reply.send(conn.submit(payload));
        }
        Command::Close { graceful, reply } => {
            let _ = reply.send(conn.close(graceful));
        }
        Command::InjectFault(enabled) => conn.inject_fault(enabled),
        Command::Status(reply) => {
            let _ = reply.send(conn.status());
        }
    }
}

async fn send(socket: &Socket, peer: Option<SocketAddr>, datagram: &[u8]) {
    let Some(peer) = peer else {
        log::trace!("[session] no peer yet, dropping {} bytes", datagram.len());
        return;
    };
    if let Err(e) = socket.send_to(datagram, peer).await {
        log::warn!("[session] send failed: {}", e);
    }
}
