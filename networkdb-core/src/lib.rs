//! # NetworkDB core facade
//!
//! Wires the dual-indexed store, the membership table, the gossip
//! transport, and the replication engine into one process-instantiable
//! object with an explicit lifecycle: [`NetworkDb::new`] binds the
//! transport and spawns every background tick as its own task; [`NetworkDb::close`]
//! aborts them all. This is the only crate in the workspace callers are
//! expected to depend on directly — everything else is plumbing.

mod config;
mod node;
mod types;

pub use config::{
    DiagnosticsConfig, EncryptionConfig, NetworkDbConfig, NodeConfig, ReaperConfig, RejoinConfig,
    TransportConfig,
};
pub use node::NodeInfo;
pub use types::{NetworkDbError, PeerInfo};

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use networkdb_keyring::{GossipKey, KeyRing};
use networkdb_membership::{MembershipTable, NodeStatus};
use networkdb_protocol::{
    EntryKey, NetworkId, NodeEventKind, NodeEventPayload, TableEventKind, TableName,
};
use networkdb_replication::{ReplicationConfig, ReplicationEngine, WatchEvent, WatchHandle};
use networkdb_store::{Store, TableEntry};
use networkdb_transport::GossipTransport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Best-effort budget for the node-leave frame sent to known peers on close
/// (§5 close sequence) — shutdown must not hang waiting on a dead peer.
const LEAVE_BUDGET: Duration = Duration::from_secs(1);

/// A table-change event re-interpreted for the driver/discovery-notify
/// surface (§6.4): an `Update` is reported as a `Delete` there, even though
/// the same write is a plain `Update` to a [`NetworkDb::watch`] subscriber
/// (§9 Open Question i — the two surfaces deliberately disagree).
#[derive(Debug, Clone)]
pub struct DriverNotifyEvent {
    pub table: TableName,
    pub network: NetworkId,
    pub key: EntryKey,
    pub value: Vec<u8>,
    pub kind: TableEventKind,
}

/// Wraps the same filtered channel [`NetworkDb::watch`] reads from and
/// remaps `Update` to `Delete` on the way out.
pub struct DriverNotifyReceiver(mpsc::Receiver<WatchEvent>);

impl DriverNotifyReceiver {
    pub async fn recv(&mut self) -> Option<DriverNotifyEvent> {
        let event = self.0.recv().await?;
        let kind = if matches!(event.kind, TableEventKind::Update) {
            TableEventKind::Delete
        } else {
            event.kind
        };
        Some(DriverNotifyEvent {
            table: event.table,
            network: event.network,
            key: event.key,
            value: event.value,
            kind,
        })
    }
}

/// A running NetworkDB node: its identity, its view of the cluster, and the
/// background tasks keeping that view converging.
pub struct NetworkDb {
    node: NodeInfo,
    store: Arc<Store>,
    membership: Arc<MembershipTable>,
    keyring: Arc<KeyRing>,
    transport: Arc<GossipTransport>,
    engine: Arc<ReplicationEngine>,
    config: NetworkDbConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkDb {
    /// Bind the transport, build every subsystem, and start the background
    /// ticks. Does not contact any peer — call [`Self::join`] afterward to
    /// seed the cluster view from a set of known addresses.
    pub async fn new(config: NetworkDbConfig) -> Result<Self, NetworkDbError> {
        let bind_addr: SocketAddr = format!("{}:{}", config.transport.bind_addr, config.transport.bind_port)
            .parse()
            .map_err(|err| NetworkDbError::Internal(format!("invalid bind address: {err}")))?;

        let keyring = Arc::new(build_keyring(&config.encryption));
        let transport = Arc::new(
            GossipTransport::bind(bind_addr, Arc::clone(&keyring), config.transport.retransmit_mult).await?,
        );
        let advertise_addr = config.transport.advertise_addr.unwrap_or_else(|| transport.local_addr());
        let node = NodeInfo::new(&config.node, advertise_addr);

        let store = Arc::new(Store::new());
        let membership = Arc::new(MembershipTable::new());

        let mut replication_config = ReplicationConfig::default();
        replication_config.reap_interval = config.reaper.reap_period;
        replication_config.reap_entry_interval = config.reaper.reap_entry_interval;
        replication_config.reap_network_interval = config.reaper.reap_network_interval();
        replication_config.reap_node_interval = config.reaper.reap_node_interval;
        replication_config.max_gossip_packet_bytes = config.transport.packet_buffer_size;
        replication_config.retransmit_mult = config.transport.retransmit_mult;

        let engine = Arc::new(ReplicationEngine::new(
            node.id,
            node.hostname.clone(),
            Arc::clone(&store),
            Arc::clone(&membership),
            Arc::clone(&transport),
            replication_config,
        ));

        // Seed our own membership record so cluster_peers()/bulk sync see us
        // the same way they'd see any other node, with ltime 1 so the first
        // real event from us (a join_network, a key rotation heartbeat) is
        // guaranteed to supersede it.
        engine.handle_node_event(&NodeEventPayload {
            kind: NodeEventKind::Join,
            ltime: 1,
            node: node.id,
            hostname: node.hostname.clone(),
            address: node.address,
        });

        let db = Self {
            node,
            store,
            membership,
            keyring,
            transport,
            engine,
            config,
            tasks: Mutex::new(Vec::new()),
        };
        db.spawn_background_tasks();
        info!(node = %db.node.id, addr = %db.node.address, "networkdb node ready");
        Ok(db)
    }

    fn spawn_background_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap();

        let replication_config = self.engine.replication_config().clone();

        tasks.push(spawn_ticker(replication_config.gossip_interval, {
            let engine = Arc::clone(&self.engine);
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.gossip_tick().await }
            }
        }));

        tasks.push(spawn_ticker(replication_config.bulk_sync_interval, {
            let engine = Arc::clone(&self.engine);
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.bulk_sync_tick().await }
            }
        }));

        tasks.push(spawn_ticker(replication_config.reap_interval, {
            let engine = Arc::clone(&self.engine);
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.reap_tick() }
            }
        }));

        tasks.push(spawn_ticker(self.config.reaper.reap_node_period, {
            let engine = Arc::clone(&self.engine);
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.reap_node_tick() }
            }
        }));

        tasks.push(tokio::spawn(recv_udp_loop(Arc::clone(&self.transport), Arc::clone(&self.engine))));
        tasks.push(tokio::spawn(accept_tcp_loop(Arc::clone(&self.transport), Arc::clone(&self.engine))));

        tasks.push(spawn_ticker(self.config.diagnostics.stats_print_period, {
            let store = Arc::clone(&self.store);
            let membership = Arc::clone(&self.membership);
            move || {
                let store = Arc::clone(&store);
                let membership = Arc::clone(&membership);
                async move { log_stats(&store, &membership) }
            }
        }));

        tasks.push(spawn_ticker(self.config.diagnostics.health_print_period, {
            let membership = Arc::clone(&self.membership);
            let transport = Arc::clone(&self.transport);
            move || {
                let membership = Arc::clone(&membership);
                let transport = Arc::clone(&transport);
                async move { log_health(&membership, &transport) }
            }
        }));

        tasks.push(spawn_ticker(self.config.rejoin.rejoin_cluster_interval, {
            let engine = Arc::clone(&self.engine);
            let membership = Arc::clone(&self.membership);
            let timeout = self.config.rejoin.rejoin_cluster_duration;
            move || {
                let engine = Arc::clone(&engine);
                let membership = Arc::clone(&membership);
                async move { rejoin_tick(&engine, &membership, timeout).await }
            }
        }));
    }

    /// Greet a set of seed peers via push/pull (§4.6.6), so this node's
    /// cluster view converges immediately instead of waiting out several
    /// gossip rounds. Failures are logged, not fatal — a peer that's
    /// unreachable right now may still answer the periodic rejoin tick.
    pub async fn join(&self, peers: Vec<SocketAddr>) -> Result<(), NetworkDbError> {
        for peer in peers {
            match tokio::time::timeout(self.config.rejoin.rejoin_cluster_duration, self.engine.push_pull_with(peer))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%peer, %err, "push/pull with seed peer failed"),
                Err(_) => warn!(%peer, "push/pull with seed peer timed out"),
            }
        }
        Ok(())
    }

    /// Shut down this node (§5 close sequence): abort every background
    /// task, gossip a best-effort node-leave to known peers so the rest of
    /// the cluster doesn't have to wait out a failure-detector timeout to
    /// learn we're gone, then tear down the watch broadcaster so every
    /// outstanding subscriber observes the channel close. The store/
    /// membership/transport stay alive as long as any `Arc` clone of this
    /// `NetworkDb` does.
    pub async fn close(&self) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        let leave = self.engine.local_node_leave_event();
        let peers = self.engine.known_peer_addresses();
        if !peers.is_empty() {
            if let Ok(frame) = networkdb_protocol::encode_frame(&networkdb_protocol::Message::NodeEvent(leave)) {
                self.transport.leave(&peers, &frame, LEAVE_BUDGET).await;
            }
        }

        self.engine.shutdown_broadcaster();
        info!(node = %self.node.id, "networkdb node closed");
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub fn config(&self) -> &NetworkDbConfig {
        &self.config
    }

    // ---- §6.1 table entry API ----

    /// Create a new entry. Fails with [`NetworkDbError::AlreadyExists`] if a
    /// live (non-tombstoned) entry already sits at this path.
    pub fn create_entry(
        &self,
        table: TableName,
        network: NetworkId,
        key: EntryKey,
        value: Vec<u8>,
    ) -> Result<(), NetworkDbError> {
        if let Some(existing) = self.store.get(&table, &network, &key) {
            if !existing.deleting {
                return Err(NetworkDbError::AlreadyExists { table, network, key });
            }
        }
        self.engine.create_entry(table, network, key, value);
        Ok(())
    }

    /// Update an existing live entry. Fails with [`NetworkDbError::NotFound`]
    /// if there is no entry yet, or [`NetworkDbError::AlreadyDeleting`] if
    /// the entry is a tombstone awaiting reap.
    pub fn update_entry(
        &self,
        table: TableName,
        network: NetworkId,
        key: EntryKey,
        value: Vec<u8>,
    ) -> Result<(), NetworkDbError> {
        match self.store.get(&table, &network, &key) {
            None => return Err(NetworkDbError::NotFound { table, network, key }),
            Some(existing) if existing.deleting => {
                return Err(NetworkDbError::AlreadyDeleting { table, network, key })
            }
            Some(_) => {}
        }
        self.engine.update_entry(table, network, key, value);
        Ok(())
    }

    /// Delete an entry, writing a tombstone rather than removing it
    /// outright (§4.6.3) so peers that haven't seen the write yet still
    /// witness it. Fails the same way [`Self::update_entry`] does.
    pub fn delete_entry(
        &self,
        table: TableName,
        network: NetworkId,
        key: EntryKey,
        value: Vec<u8>,
    ) -> Result<(), NetworkDbError> {
        match self.store.get(&table, &network, &key) {
            None => return Err(NetworkDbError::NotFound { table, network, key }),
            Some(existing) if existing.deleting => {
                return Err(NetworkDbError::AlreadyDeleting { table, network, key })
            }
            Some(_) => {}
        }
        self.engine.delete_entry(table, network, key, value);
        Ok(())
    }

    /// Look up a single entry. Tombstones are reported as [`NetworkDbError::NotFound`] —
    /// a caller never sees the delete marker itself.
    pub fn get_entry(&self, table: &TableName, network: &NetworkId, key: &EntryKey) -> Result<Vec<u8>, NetworkDbError> {
        match self.store.get(table, network, key) {
            Some(entry) if !entry.deleting => Ok(entry.value.clone()),
            _ => Err(NetworkDbError::NotFound {
                table: table.clone(),
                network: network.clone(),
                key: key.clone(),
            }),
        }
    }

    /// Every live entry under `table` within `network`, tombstones excluded.
    pub fn get_table_by_network(&self, table: &TableName, network: &NetworkId) -> Vec<(EntryKey, Vec<u8>)> {
        let mut out = Vec::new();
        self.store.walk_by_network(network, |entry_table, key, entry| {
            if entry_table == table && !entry.deleting {
                out.push((key.clone(), entry.value.clone()));
            }
            false
        });
        out
    }

    /// Walk every entry under `table` across all networks, tombstones
    /// included — `f` receives `(network, key, entry)` and can stop the
    /// walk early by returning `true`.
    pub fn walk_table<F>(&self, table: &TableName, f: F)
    where
        F: FnMut(&NetworkId, &EntryKey, &TableEntry) -> bool,
    {
        self.store.walk_by_table(table, f);
    }

    /// Subscribe to table mutations this node applies, local or gossiped
    /// (§6.1 `Watch`), reported with their true event kind. `table`/
    /// `network` narrow the subscription to one table or network; `None`
    /// means "every table"/"every network". The returned [`WatchHandle`]
    /// cancels the subscription explicitly — dropping the receiver alone
    /// leaves the forwarding task running until the broadcaster itself
    /// shuts down.
    pub fn watch(
        &self,
        table: Option<TableName>,
        network: Option<NetworkId>,
    ) -> (mpsc::Receiver<WatchEvent>, WatchHandle) {
        self.engine.watch(table, network)
    }

    /// Subscribe to the driver/discovery-notify view of the same stream
    /// (§6.4), where `Update` is reported as `Delete`. Same filtering and
    /// cancellation as [`Self::watch`].
    pub fn watch_driver_notify(
        &self,
        table: Option<TableName>,
        network: Option<NetworkId>,
    ) -> (DriverNotifyReceiver, WatchHandle) {
        let (rx, handle) = self.engine.watch(table, network);
        (DriverNotifyReceiver(rx), handle)
    }

    // ---- §6.1 network membership API ----

    pub fn join_network(&self, network: NetworkId) {
        self.engine.join_network(network);
    }

    pub fn leave_network(&self, network: NetworkId) {
        self.engine.leave_network(network);
    }

    /// Every node this node currently believes is `Active`, cluster-wide.
    pub fn cluster_peers(&self) -> Vec<PeerInfo> {
        self.membership
            .all_nodes()
            .into_iter()
            .filter(|(_, record)| record.status == NodeStatus::Active)
            .map(|(id, record)| PeerInfo {
                id,
                name: record.hostname,
                ip: self.engine.peer_address(&id).map(|a| a.ip()).unwrap_or_else(|| self.node.address.ip()),
            })
            .collect()
    }

    /// Members currently joined to `network`.
    pub fn peers(&self, network: &NetworkId) -> Vec<PeerInfo> {
        self.membership
            .members_of(network)
            .into_iter()
            .filter_map(|id| {
                let record = self.membership.node(&id)?;
                Some(PeerInfo {
                    id,
                    name: record.hostname,
                    ip: self.engine.peer_address(&id).map(|a| a.ip()).unwrap_or_else(|| self.node.address.ip()),
                })
            })
            .collect()
    }

    // ---- §4.9 key rotation API ----

    pub fn set_key(&self, bytes: [u8; 32], ltime: u64) {
        self.keyring.add_key(GossipKey::new(bytes, ltime));
    }

    pub fn set_primary_key(&self, bytes: &[u8; 32]) -> Result<(), NetworkDbError> {
        Ok(self.keyring.use_key(bytes)?)
    }

    pub fn remove_key(&self, bytes: &[u8; 32]) -> Result<(), NetworkDbError> {
        Ok(self.keyring.remove_key(bytes)?)
    }
}

fn build_keyring(config: &EncryptionConfig) -> KeyRing {
    let mut keys = config::encryption_keys_or_random(config).into_iter();
    let primary = keys.next().expect("encryption_keys_or_random never returns an empty list");
    let ring = KeyRing::with_primary(primary);
    for key in keys {
        ring.add_key(key);
    }
    ring
}

/// Spawn a task that calls `make_tick()` (building a fresh future each
/// round) on a fixed interval, forever, until aborted.
fn spawn_ticker<F, Fut>(period: Duration, mut make_tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            make_tick().await;
        }
    })
}

async fn recv_udp_loop(transport: Arc<GossipTransport>, engine: Arc<ReplicationEngine>) {
    loop {
        match transport.recv_best_effort().await {
            Ok((plaintext, from)) => match networkdb_protocol::decode_frame(&plaintext) {
                Ok(message) => engine.dispatch_unsolicited(message),
                Err(err) => warn!(%from, %err, "dropping undecodable gossip datagram"),
            },
            Err(err) => warn!(%err, "udp receive failed"),
        }
    }
}

async fn accept_tcp_loop(transport: Arc<GossipTransport>, engine: Arc<ReplicationEngine>) {
    loop {
        let (mut stream, from) = match transport.accept_reliable().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "tcp accept failed");
                continue;
            }
        };
        let transport = Arc::clone(&transport);
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let request = match transport.read_reliable_frame(&mut stream).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%from, %err, "failed to read reliable frame");
                    return;
                }
            };
            let message = match networkdb_protocol::decode_frame(&request) {
                Ok(message) => message,
                Err(err) => {
                    warn!(%from, %err, "dropping undecodable reliable frame");
                    return;
                }
            };
            if let Some(reply) = engine.dispatch_request(message) {
                if let Ok(frame) = networkdb_protocol::encode_frame(&reply) {
                    if let Err(err) = transport.write_reliable_frame(&mut stream, &frame).await {
                        warn!(%from, %err, "failed to write reliable reply");
                    }
                }
            }
        });
    }
}

fn log_stats(store: &Store, membership: &MembershipTable) {
    for network in membership.known_networks() {
        debug!(
            network = %network,
            entries = store.network_entry_count(&network),
            members = membership.members_of(&network).len(),
            "network stats"
        );
    }
}

fn log_health(membership: &MembershipTable, transport: &GossipTransport) {
    for (id, record) in membership.all_nodes() {
        debug!(node = %id, hostname = %record.hostname, status = ?record.status, health = %transport.health_score(&id), "node health");
    }
}

async fn rejoin_tick(engine: &ReplicationEngine, membership: &MembershipTable, timeout: Duration) {
    for (id, record) in membership.all_nodes() {
        if id == engine.local_node() || record.status != NodeStatus::Active {
            continue;
        }
        let Some(addr) = engine.peer_address(&id) else { continue };
        match tokio::time::timeout(timeout, engine.push_pull_with(addr)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(peer = %id, %err, "rejoin push/pull failed"),
            Err(_) => warn!(peer = %id, "rejoin push/pull timed out"),
        }
    }
}
