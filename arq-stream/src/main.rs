//! Entry point for `arq-stream`.
//!
//! Parses CLI arguments and runs one connection in either **listen** or
//! **connect** mode.  Lines read from stdin are sent as payloads; payloads
//! received from the peer are written to stdout.  All protocol work is
//! delegated to library modules; `main.rs` owns only process setup
//! (logging, argument parsing, stdin/stdout plumbing).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use arq_stream::config::EngineConfig;
use arq_stream::params::{ConnectionParameters, Role};
use arq_stream::session::{Session, SessionError};
use arq_stream::seq::SequenceNumber;
use arq_stream::simulator::{Simulator, SimulatorConfig};
use arq_stream::socket::Socket;

/// Reliable windowed streaming over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a peer to open a connection.
    Listen {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        #[command(flatten)]
        opts: Options,
    },
    /// Open a connection to a listening peer.
    Connect {
        /// Remote peer address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        #[command(flatten)]
        opts: Options,
    },
}

#[derive(Args)]
struct Options {
    /// Protocol version (0-15).
    #[arg(long, default_value_t = 1)]
    version: u8,
    #[arg(long, default_value_t = 0)]
    connection_id: u16,
    /// Max unacknowledged segments in flight.
    #[arg(long, default_value_t = 8)]
    window: u16,
    /// Max payload bytes per segment.
    #[arg(long, default_value_t = 1024)]
    mss: u16,
    /// Retransmit timeout, in ticks.
    #[arg(long, default_value_t = 20)]
    rto: u16,
    /// Deferred-ack timeout, in ticks.
    #[arg(long, default_value_t = 5)]
    ack_timeout: u16,
    /// Idle ticks before a keep-alive (0 disables).
    #[arg(long, default_value_t = 200)]
    null_timeout: u16,
    #[arg(long, default_value_t = 5)]
    max_retrans: u8,
    /// Disable checksum verification.
    #[arg(long)]
    no_checksum: bool,
    /// Checksum covers the header only.
    #[arg(long)]
    header_only_checksum: bool,
    /// Length of one tick in milliseconds.
    #[arg(long, default_value_t = 10)]
    tick_ms: u64,
    /// Silent ticks before the connection is dropped (0 disables).
    #[arg(long, default_value_t = 1000)]
    idle_timeout: u32,
    /// Re-open automatically after a lost connection.
    #[arg(long)]
    auto_reconnect: bool,
    /// Simulated outgoing loss probability.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Simulated outgoing duplication probability.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// Simulated outgoing reorder probability.
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
    /// Seed for the simulated link.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Options {
    fn parameters(&self) -> ConnectionParameters {
        ConnectionParameters {
            version: self.version,
            connection_id: self.connection_id,
            window_size: self.window,
            max_segment_size: self.mss,
            retransmit_timeout: self.rto,
            ack_timeout: self.ack_timeout,
            null_timeout: self.null_timeout,
            max_retrans_count: self.max_retrans,
            header_checksum_enabled: !self.no_checksum,
            payload_checksum_enabled: !self.no_checksum && !self.header_only_checksum,
            ..ConnectionParameters::default()
        }
        .with_random_isn()
    }

    fn engine(&self) -> EngineConfig {
        EngineConfig {
            timeout_unit: Duration::from_millis(self.tick_ms),
            idle_timeout: self.idle_timeout,
            auto_reconnect: self.auto_reconnect,
            ..EngineConfig::default()
        }
    }

    fn link(&self) -> anyhow::Result<Option<Simulator>> {
        if self.loss == 0.0 && self.duplicate == 0.0 && self.reorder == 0.0 {
            return Ok(None);
        }
        let config = SimulatorConfig {
            loss_rate: self.loss,
            duplicate_rate: self.duplicate,
            reorder_rate: self.reorder,
            reorder_delay: u32::from(self.rto / 2),
            ..SimulatorConfig::default()
        };
        Ok(Some(Simulator::new(config, self.seed)?))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let (role, bind, peer, opts) = match cli.mode {
        Mode::Listen { bind, opts } => (Role::Responder, bind, None, opts),
        Mode::Connect { peer, bind, opts } => (Role::Initiator, bind, Some(peer), opts),
    };

    let socket = Socket::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    log::info!("bound {} as {:?}", socket.local_addr, role);

    let mut session = Session::spawn(
        socket,
        role,
        peer,
        opts.parameters(),
        opts.engine(),
        opts.link()?,
    )?;
    let negotiated = session.wait_open().await.context("opening connection")?;
    eprintln!(
        "connected: window={} mss={} rto={} ticks",
        negotiated.window_size, negotiated.max_segment_size, negotiated.retransmit_timeout
    );

    run(&mut session, negotiated.max_segment_size as usize).await?;

    if let Ok(status) = session.status().await {
        log::info!("final counters: {:?}", status.counters);
    }
    session.shutdown().await;
    Ok(())
}

/// Pump stdin lines to the peer and peer payloads to stdout until either
/// side finishes.
async fn run(session: &mut Session, mss: usize) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    for chunk in line.as_bytes().chunks(mss.max(1)) {
                        let seq: SequenceNumber = session.send(chunk.to_vec()).await?;
                        log::debug!("queued {} bytes as seq={}", chunk.len(), seq);
                    }
                }
                None => {
                    stdin_open = false;
                    session.close(true).await?;
                }
            },
            received = session.recv() => match received {
                Ok(payload) => println!("{}", String::from_utf8_lossy(&payload)),
                Err(SessionError::Closed) => return Ok(()),
                Err(e) => bail!(e),
            },
        }
    }
}
