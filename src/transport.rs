use std::{io, net::SocketAddr, time::Duration};

use log::{debug, trace};
use tokio::{net::UdpSocket, time::timeout};

use crate::{
    error::SampError,
    packet::{self, ServerAddress, HANDSHAKE_TOKEN, HEADER_LEN},
};

/// Limit for opening the socket and for each read of the handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest datagram UDP can carry.
const MAX_DATAGRAM: usize = 65_535;

/// UDP socket connected to a single SA-MP server.
///
/// Reads behave like reads on a stream: a datagram that is only partly
/// consumed stays buffered and the next read continues where the previous one
/// stopped. Reads never fail; a timeout or socket error reads as no data.
pub struct Transport {
    socket: UdpSocket,
    pending: Vec<u8>,
}

impl Transport {
    pub async fn open(addr: &ServerAddress) -> Result<Self, SampError> {
        let socket = timeout(HANDSHAKE_TIMEOUT, Self::bind_and_connect(addr.socket_addr()))
            .await
            .map_err(|e| SampError::ConnectionFailed(e.into()))?
            .map_err(SampError::ConnectionFailed)?;

        trace!("opened udp socket to {}", addr);

        Ok(Transport {
            socket,
            pending: Vec::new(),
        })
    }

    async fn bind_and_connect(peer: SocketAddr) -> io::Result<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(peer).await?;
        Ok(socket)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), SampError> {
        trace!("sending {} bytes", payload.len());
        self.socket
            .send(payload)
            .await
            .map(|_| ())
            .map_err(SampError::SendFailed)
    }

    /// Reads up to `max` bytes. Waits at most `wait` for a datagram when
    /// nothing is buffered and returns fewer bytes, possibly none, if the
    /// server sent less.
    pub async fn read(&mut self, max: usize, wait: Duration) -> Vec<u8> {
        if self.pending.is_empty() {
            self.pending = self.recv_datagram(wait).await;
        }

        let n = max.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    /// Drops whatever is left of a previously received datagram.
    pub fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!("discarding {} stale bytes", self.pending.len());
            self.pending.clear();
        }
    }

    async fn recv_datagram(&self, wait: Duration) -> Vec<u8> {
        let mut buf = vec![0; MAX_DATAGRAM];

        match timeout(wait, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                trace!("received {} bytes", n);
                buf.truncate(n);
                buf
            }
            Ok(Err(e)) => {
                debug!("receive failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                trace!("no data within {:?}", wait);
                Vec::new()
            }
        }
    }
}

/// Lifecycle of a client's connection. Only the handshake moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket could be opened.
    Unconnected,
    /// Socket open, waiting for the probe to be echoed.
    Probing,
    Online,
    /// Socket open but the probe went unanswered or came back wrong.
    Failed,
}

/// Opens the transport and runs the handshake shared by both clients.
pub(crate) async fn handshake(addr: &ServerAddress) -> (Option<Transport>, ConnectionState) {
    probe(Transport::open(addr).await, addr).await
}

async fn probe(
    opened: Result<Transport, SampError>,
    addr: &ServerAddress,
) -> (Option<Transport>, ConnectionState) {
    let mut transport = match opened {
        Ok(transport) => transport,
        Err(e) => {
            debug!("{}: {}", addr, e);
            return (None, ConnectionState::Unconnected);
        }
    };

    trace!("probing {}", addr);
    if let Err(e) = transport.send(&packet::handshake_packet(addr)).await {
        debug!("{}: handshake probe not sent: {}", addr, e);
    }

    let echoed_header = transport.read(HEADER_LEN, HANDSHAKE_TIMEOUT).await;
    let state = if !echoed_header.is_empty()
        && transport.read(HANDSHAKE_TOKEN.len(), HANDSHAKE_TIMEOUT).await == HANDSHAKE_TOKEN
    {
        ConnectionState::Online
    } else {
        ConnectionState::Failed
    };

    debug!("{} handshake finished: {:?}", addr, state);
    (Some(transport), state)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (Transport, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = match peer.local_addr().unwrap() {
            SocketAddr::V4(v4) => ServerAddress::from(v4),
            SocketAddr::V6(_) => unreachable!(),
        };
        let transport = Transport::open(&addr).await.unwrap();
        let port = transport.socket.local_addr().unwrap().port();
        peer.connect(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .unwrap();
        (transport, peer)
    }

    #[tokio::test]
    async fn partial_reads_continue_within_a_datagram() {
        let (mut transport, peer) = pair().await;
        peer.send(b"0123456789abcde").await.unwrap();

        let wait = Duration::from_millis(500);
        assert_eq!(transport.read(10, wait).await, b"0123456789");
        assert_eq!(transport.read(10, wait).await, b"abcde");
    }

    #[tokio::test]
    async fn silent_peer_reads_as_empty() {
        let (mut transport, _peer) = pair().await;
        let data = transport.read(128, Duration::from_millis(20)).await;
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn discard_pending_drops_leftovers() {
        let (mut transport, peer) = pair().await;
        peer.send(b"leftover").await.unwrap();
        peer.send(b"fresh").await.unwrap();

        let wait = Duration::from_millis(500);
        assert_eq!(transport.read(4, wait).await, b"left");
        transport.discard_pending();
        assert_eq!(transport.read(128, wait).await, b"fresh");
    }

    #[tokio::test]
    async fn unopened_socket_stays_unconnected() {
        let addr = ServerAddress::new("127.0.0.1", 7777).unwrap();
        let opened = Err(SampError::ConnectionFailed(
            io::ErrorKind::AddrNotAvailable.into(),
        ));

        let (transport, state) = probe(opened, &addr).await;
        assert!(transport.is_none());
        assert_eq!(state, ConnectionState::Unconnected);
    }

    #[tokio::test]
    async fn unanswered_probe_fails() {
        let (transport, _peer) = pair().await;
        let addr = ServerAddress::new("127.0.0.1", 7777).unwrap();

        let (transport, state) = probe(Ok(transport), &addr).await;
        assert!(transport.is_some());
        assert_eq!(state, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn send_reaches_peer() {
        let (transport, peer) = pair().await;
        transport.send(b"SAMP").await.unwrap();

        let mut buf = [0u8; 16];
        let n = peer.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"SAMP");
    }
}
