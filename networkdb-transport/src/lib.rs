//! # Gossip transport
//!
//! Owns the actual sockets: a bound UDP socket for best-effort gossip
//! (heartbeats, table events batched into compound frames) and a TCP
//! listener for reliable transfers (push/pull, bulk sync) that must not
//! be dropped or reordered (§4.4).
//!
//! Every frame that crosses the wire is encrypted under the local
//! [`networkdb_keyring::KeyRing`]'s primary key before it leaves the
//! process, and decrypted (trying every known key, to tolerate peers
//! mid-rotation) on the way in.
//!
//! Outbound best-effort gossip is never sent directly — it is handed to a
//! per-network [`queue::TransmitQueue`] and drained by the replication
//! engine's gossip tick, which is what actually governs fan-out and
//! retransmit counts.

mod queue;
mod socket;

pub use queue::TransmitQueue;
pub use socket::{SocketError, MAX_UDP_PAYLOAD};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use networkdb_keyring::KeyRing;
use networkdb_protocol::{NetworkId, NodeId};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Keyring(#[from] networkdb_keyring::KeyRingError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rolling send/receive counters used to derive a coarse [0.0, 1.0] health
/// score per peer (§4.4 "health score"): 1.0 is a peer we've never failed
/// to reach, pulling toward 0.0 the more consecutive failures pile up.
#[derive(Default)]
struct PeerHealth {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl PeerHealth {
    fn record(&self, ok: bool) {
        if ok {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn score(&self) -> f64 {
        let s = self.successes.load(Ordering::Relaxed) as f64;
        let f = self.failures.load(Ordering::Relaxed) as f64;
        if s + f == 0.0 {
            1.0
        } else {
            s / (s + f)
        }
    }
}

/// Raw UDP/TCP gossip transport for a single local node.
pub struct GossipTransport {
    udp: UdpSocket,
    tcp: TcpListener,
    local_addr: SocketAddr,
    keyring: Arc<KeyRing>,
    queues: DashMap<NetworkId, Arc<TransmitQueue>>,
    health: DashMap<NodeId, PeerHealth>,
    retransmit_mult: u32,
}

impl GossipTransport {
    pub async fn bind(addr: SocketAddr, keyring: Arc<KeyRing>, retransmit_mult: u32) -> Result<Self, TransportError> {
        let udp = UdpSocket::bind(addr).await?;
        let local_addr = udp.local_addr()?;
        // Bind TCP to the exact port UDP landed on (not `addr` again) so an
        // ephemeral-port bind (`addr`'s port `0`) doesn't hand the two
        // sockets different ports — callers only ever advertise one address
        // for both gossip (UDP) and push/pull-bulk-sync (TCP).
        let tcp = TcpListener::bind(local_addr).await?;
        Ok(Self {
            udp,
            tcp,
            local_addr,
            keyring,
            queues: DashMap::new(),
            health: DashMap::new(),
            retransmit_mult,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transmit queue for `network`, created on first use.
    pub fn queue_for(&self, network: &NetworkId) -> Arc<TransmitQueue> {
        self.queues
            .entry(network.clone())
            .or_insert_with(|| Arc::new(TransmitQueue::new(self.retransmit_mult)))
            .clone()
    }

    /// Send a single best-effort (UDP) frame, encrypted under the primary key.
    ///
    /// This does not update peer health: the transport has no notion of
    /// node identity, only addresses, and UDP send success just means the
    /// datagram left the local socket, not that the peer received it. The
    /// replication engine calls [`Self::record_peer_result`] itself once it
    /// has resolved a reply (or a gossip round's lack of one) to a node.
    pub async fn send_best_effort(&self, to: SocketAddr, frame: &[u8]) -> Result<(), TransportError> {
        let encrypted = self.keyring.encrypt(frame)?;
        socket::send_udp(&self.udp, to, &encrypted).await?;
        Ok(())
    }

    /// Receive and decrypt the next best-effort datagram.
    pub async fn recv_best_effort(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        let (encrypted, from) = socket::recv_udp(&self.udp, &mut buf).await?;
        let plaintext = self.keyring.decrypt(&encrypted)?;
        Ok((plaintext, from))
    }

    /// Open a reliable (TCP) connection, send one frame, and read the reply
    /// frame — used for push/pull and bulk sync (§4.6.6, §4.6.8).
    pub async fn send_reliable(&self, to: SocketAddr, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        let encrypted = self.keyring.encrypt(frame)?;
        let mut stream = TcpStream::connect(to).await?;
        socket::write_tcp_frame(&mut stream, &encrypted).await?;
        let reply = socket::read_tcp_frame(&mut stream).await?;
        Ok(self.keyring.decrypt(&reply)?)
    }

    /// Accept one inbound reliable connection and hand back the peer
    /// address alongside the raw stream so the caller can read the
    /// request frame, process it, and write a reply frame.
    pub async fn accept_reliable(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        let (stream, addr) = self.tcp.accept().await?;
        Ok((stream, addr))
    }

    pub async fn read_reliable_frame(&self, stream: &mut TcpStream) -> Result<Vec<u8>, TransportError> {
        let encrypted = socket::read_tcp_frame(stream).await?;
        Ok(self.keyring.decrypt(&encrypted)?)
    }

    pub async fn write_reliable_frame(&self, stream: &mut TcpStream, frame: &[u8]) -> Result<(), TransportError> {
        let encrypted = self.keyring.encrypt(frame)?;
        socket::write_tcp_frame(stream, &encrypted).await?;
        Ok(())
    }

    /// Best-effort fan-out of a single pre-built frame to `peers`, stopping
    /// early once `timeout` elapses (§5/§6.1 Close: a node leaving the
    /// cluster gets a bounded budget to announce it, not an unbounded one).
    pub async fn leave(&self, peers: &[SocketAddr], frame: &[u8], timeout: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        for peer in peers {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            let _ = self.send_best_effort(*peer, frame).await;
        }
    }

    pub fn record_peer_result(&self, peer: NodeId, ok: bool) {
        self.health.entry(peer).or_default().record(ok);
    }

    pub fn health_score(&self, peer: &NodeId) -> f64 {
        self.health.get(peer).map(|h| h.score()).unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkdb_keyring::GossipKey;

    fn keyring() -> Arc<KeyRing> {
        Arc::new(KeyRing::with_primary(GossipKey::new([7u8; 32], 1)))
    }

    #[tokio::test]
    async fn udp_round_trip_decrypts_to_original_bytes() {
        let a = GossipTransport::bind("127.0.0.1:0".parse().unwrap(), keyring(), 3)
            .await
            .unwrap();
        let b = GossipTransport::bind("127.0.0.1:0".parse().unwrap(), keyring(), 3)
            .await
            .unwrap();

        a.send_best_effort(b.local_addr(), b"ping").await.unwrap();
        let (received, _from) = b.recv_best_effort().await.unwrap();
        assert_eq!(received, b"ping");
    }

    #[test]
    fn health_score_starts_optimistic_and_degrades_on_failure() {
        let transport_health = PeerHealth::default();
        assert_eq!(transport_health.score(), 1.0);
        transport_health.record(false);
        transport_health.record(false);
        assert!(transport_health.score() < 1.0);
    }

    #[test]
    fn queue_for_returns_the_same_queue_on_repeated_calls() {
        // Exercised indirectly through DashMap's entry API; a fresh DashMap
        // with `or_insert_with` must not reallocate per call.
        let queues: DashMap<NetworkId, Arc<TransmitQueue>> = DashMap::new();
        let net = NetworkId::from("n1");
        let a = queues.entry(net.clone()).or_insert_with(|| Arc::new(TransmitQueue::new(3))).clone();
        let b = queues.entry(net).or_insert_with(|| Arc::new(TransmitQueue::new(3))).clone();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
