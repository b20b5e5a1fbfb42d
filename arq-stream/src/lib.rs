//! `arq-stream`: a reliable, windowed segment stream over an unreliable
//! datagram channel.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   segments   ┌──────────┐
//!  │ TxEngine │─────────────▶│ RxEngine │   (on the peer)
//!  └────┬─────┘              └─────┬────┘
//!       │      ACK / EACK          │
//!       │◀─────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │ (FSM, negotiation, timers, events)│
//!  └────┬──────────────────────────────┘
//!       │ datagrams + ticks (sans-IO)
//!  ┌────▼──────┐     ┌────────────┐
//!  │  Session  │────▶│   Socket   │  (tokio task around a UdpSocket)
//!  └───────────┘     └────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`seq`]         16-bit wrapping sequence numbers
//! - [`segment`]     wire format (serialise / deserialise)
//! - [`checksum`]    RFC 1071 Internet checksum with negotiable coverage
//! - [`params`]      connection parameters and negotiation
//! - [`window`]      fixed-capacity transmit window
//! - [`timer`]       tick-driven countdowns
//! - [`tx`]          send-side state machine
//! - [`rx`]          receive-side state machine
//! - [`monitor`]     diagnostic counters and throughput estimates
//! - [`state`]       finite-state-machine types and transition table
//! - [`connection`]  per-connection lifecycle manager
//! - [`config`]      local engine policy
//! - [`error`]       engine error type
//! - [`simulator`]   seeded lossy/reordering link for testing
//! - [`socket`]      async UDP socket abstraction
//! - [`session`]     async driver binding a connection to a socket

pub mod checksum;
pub mod config;
pub mod connection;
pub mod error;
pub mod monitor;
pub mod params;
pub mod rx;
pub mod segment;
pub mod seq;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod tx;
pub mod window;

pub use config::EngineConfig;
pub use connection::{Connection, Event, Status};
pub use error::EngineError;
pub use params::{ConnectionParameters, Role};
pub use seq::SequenceNumber;
pub use state::ConnectionState;
