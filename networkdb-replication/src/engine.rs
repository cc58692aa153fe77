use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use networkdb_membership::MembershipTable;
use networkdb_protocol::{EntryKey, NetworkId, NodeId, TableName};
use networkdb_store::Store;
use networkdb_transport::GossipTransport;

use crate::clock::LamportClock;
use crate::watch::Broadcaster;

/// Tunables governing the replication engine's background ticks. Mirrors
/// the teacher's pattern of a small `*Config` struct embedded in the
/// engine rather than a dozen constructor arguments.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub gossip_interval: std::time::Duration,
    pub bulk_sync_interval: std::time::Duration,
    pub reap_interval: std::time::Duration,
    pub reap_entry_interval: std::time::Duration,
    pub reap_network_interval: std::time::Duration,
    pub reap_node_interval: std::time::Duration,
    pub max_gossip_packet_bytes: usize,
    pub retransmit_mult: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            gossip_interval: std::time::Duration::from_millis(200),
            bulk_sync_interval: std::time::Duration::from_secs(17),
            reap_interval: std::time::Duration::from_secs(1),
            reap_entry_interval: std::time::Duration::from_secs(15 * 60),
            reap_network_interval: std::time::Duration::from_secs(24 * 60 * 60),
            reap_node_interval: std::time::Duration::from_secs(24 * 60 * 60),
            max_gossip_packet_bytes: networkdb_transport::MAX_UDP_PAYLOAD,
            retransmit_mult: 4,
        }
    }
}

/// Ties the store, membership table, and transport together and drives
/// convergence: applying local writes, reconciling inbound events,
/// gossiping, bulk-syncing, and reaping expired state (§4.6).
pub struct ReplicationEngine {
    pub(crate) local_node: NodeId,
    pub(crate) local_hostname: String,
    pub(crate) store: Arc<Store>,
    pub(crate) membership: Arc<MembershipTable>,
    pub(crate) transport: Arc<GossipTransport>,
    pub(crate) node_clock: LamportClock,
    pub(crate) table_clock: LamportClock,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) config: ReplicationConfig,
    /// Addresses of known peers, learned from node events. Looked up by
    /// the gossip tick and push/pull to know where to dial.
    pub(crate) peer_addresses: DashMap<NodeId, SocketAddr>,
    /// Wall-clock deadlines for state the reaper needs to drop once expired
    /// (§4.7). `reap_time`/`reap_*_interval` only ever travel as relative
    /// durations (local config, or seconds-from-now on the wire), so the
    /// engine anchors each one to an `Instant` the moment it first learns
    /// about the state — these maps are that anchor, not the store itself.
    pub(crate) tombstone_deadlines: DashMap<(TableName, NetworkId, EntryKey), Instant>,
    pub(crate) leaving_deadlines: DashMap<(NodeId, NetworkId), Instant>,
    pub(crate) departed_node_deadlines: DashMap<NodeId, Instant>,
}

impl ReplicationEngine {
    pub fn new(
        local_node: NodeId,
        local_hostname: String,
        store: Arc<Store>,
        membership: Arc<MembershipTable>,
        transport: Arc<GossipTransport>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            local_node,
            local_hostname,
            store,
            membership,
            transport,
            node_clock: LamportClock::new(),
            table_clock: LamportClock::new(),
            broadcaster: Broadcaster::new(),
            config,
            peer_addresses: DashMap::new(),
            tombstone_deadlines: DashMap::new(),
            leaving_deadlines: DashMap::new(),
            departed_node_deadlines: DashMap::new(),
        }
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    pub fn local_hostname(&self) -> &str {
        &self.local_hostname
    }

    /// This node's own dialable address, as learned from its own bootstrap
    /// self-join (§4.6.1) — falls back to the transport's bound address if
    /// for some reason that bootstrap event hasn't landed yet.
    pub fn local_address(&self) -> SocketAddr {
        self.peer_address(&self.local_node)
            .unwrap_or_else(|| self.transport.local_addr())
    }

    /// Tunables this engine was built with, so the owning facade can drive
    /// the gossip/bulk-sync/reap ticks on the same cadence the engine
    /// itself was configured for.
    pub fn replication_config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn watch(
        &self,
        table: Option<TableName>,
        network: Option<NetworkId>,
    ) -> (
        tokio::sync::mpsc::Receiver<crate::watch::WatchEvent>,
        crate::watch::WatchHandle,
    ) {
        self.broadcaster.subscribe_filtered(table, network)
    }

    /// Tear down the watch broadcaster (§5 Close): every outstanding
    /// subscription observes its channel close from here on.
    pub fn shutdown_broadcaster(&self) {
        self.broadcaster.shutdown();
    }

    /// Record (or update) where a peer can be dialed, learned from a node event.
    pub fn record_peer_address(&self, node: NodeId, address: SocketAddr) {
        self.peer_addresses.insert(node, address);
    }

    pub fn peer_address(&self, node: &NodeId) -> Option<SocketAddr> {
        self.peer_addresses.get(node).map(|r| *r)
    }

    pub fn known_peer_addresses(&self) -> Vec<SocketAddr> {
        self.peer_addresses
            .iter()
            .filter(|entry| *entry.key() != self.local_node)
            .map(|entry| *entry.value())
            .collect()
    }
}
