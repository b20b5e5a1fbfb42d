//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves
//! whole datagrams.  Decoding is the connection's job (its checksum
//! settings are negotiated), so this module owns only byte I/O.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Largest datagram accepted from the network.
pub const MAX_DATAGRAM: usize = 65_535;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks if needed.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns a port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send `datagram` as a single UDP datagram to `dest`.
    pub async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    /// Receive the next datagram into `buf`.  Returns `(length, sender_address)`.
    ///
    /// Anything past `buf.len()` is discarded, so callers should size the
    /// buffer to [`MAX_DATAGRAM`].
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        let (n, addr) = self.inner.recv_from(buf).await?;
        Ok((n, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_round_trip() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = Socket::bind(any).await.unwrap();
        let b = Socket::bind(any).await.unwrap();

        a.send_to(b"ping", b.local_addr).await.unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr);
    }

    #[tokio::test]
    async fn receive_buffer_is_reused() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = Socket::bind(any).await.unwrap();
        let b = Socket::bind(any).await.unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        a.send_to(b"a longer datagram", b.local_addr).await.unwrap();
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"a longer datagram");

        // A shorter datagram is bounded by its own length, not stale bytes.
        a.send_to(b"short", b.local_addr).await.unwrap();
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"short");
        assert_eq!(buf.len(), MAX_DATAGRAM);
    }
}
