//! Time-based reaper (§4.7): three independent sweeps run off the same
//! tick, each dropping state whose deadline has passed. Deadlines are
//! anchored in `Instant`s recorded by the handlers the moment the state
//! was created (see `ReplicationEngine::tombstone_deadlines` and friends) —
//! nothing here recomputes a deadline from scratch.

use std::time::Instant;

use crate::engine::ReplicationEngine;

impl ReplicationEngine {
    /// Sweep 1: drop tombstoned table entries whose reap deadline elapsed.
    fn reap_entries(&self) {
        let now = Instant::now();
        let expired: Vec<_> = self
            .tombstone_deadlines
            .iter()
            .filter(|r| *r.value() <= now)
            .map(|r| r.key().clone())
            .collect();
        for (table, network, key) in expired {
            let outcome = self.store.remove(&table, &network, &key);
            if outcome.removed_from_table {
                self.membership.adjust_entry_count(&self.local_node, &network, -1);
            }
            self.tombstone_deadlines.remove(&(table, network, key));
        }
    }

    /// Sweep 2: drop `Leaving` network attachments whose deadline elapsed.
    fn reap_leaving_attachments(&self) {
        let now = Instant::now();
        let expired: Vec<_> = self
            .leaving_deadlines
            .iter()
            .filter(|r| *r.value() <= now)
            .map(|r| r.key().clone())
            .collect();
        for (node, network) in expired {
            self.membership.reap_attachment(&node, &network);
            self.leaving_deadlines.remove(&(node, network));
        }
    }

    /// Sweep 3: drop `Failed`/`Left` nodes whose deadline elapsed. Node
    /// records themselves live in [`networkdb_membership::MembershipTable`],
    /// which has no delete-by-id primitive beyond witnessing a newer event,
    /// so this only drops the deadline bookkeeping and the peer address —
    /// the node record is left for a future `Join` to revive with a fresh
    /// Lamport time, matching how a rejoin after a long absence behaves.
    fn reap_departed_nodes(&self) {
        let now = Instant::now();
        let expired: Vec<_> = self
            .departed_node_deadlines
            .iter()
            .filter(|r| *r.value() <= now)
            .map(|r| *r.key())
            .collect();
        for node in expired {
            self.peer_addresses.remove(&node);
            self.departed_node_deadlines.remove(&node);
        }
    }

    /// Entry and attachment sweeps. Call on `config.reap_interval`.
    pub fn reap_tick(&self) {
        self.reap_entries();
        self.reap_leaving_attachments();
    }

    /// Node sweep, on its own coarser cadence — node bookkeeping's deadline
    /// (`config.reap_node_interval`, 24h by default) is long enough that
    /// checking it on the tight `reap_interval` tick buys nothing. Call on
    /// `config.reap_node_interval`'s matching period (§4.7).
    pub fn reap_node_tick(&self) {
        self.reap_departed_nodes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use networkdb_keyring::{GossipKey, KeyRing};
    use networkdb_membership::MembershipTable;
    use networkdb_protocol::{NodeEventKind, NodeEventPayload, NodeId};
    use networkdb_store::Store;
    use networkdb_transport::GossipTransport;
    use crate::engine::ReplicationConfig;

    async fn engine(config: ReplicationConfig) -> ReplicationEngine {
        let transport = GossipTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(KeyRing::with_primary(GossipKey::new([1u8; 32], 1))),
            4,
        )
        .await
        .unwrap();
        ReplicationEngine::new(
            NodeId::random(),
            "test-node".to_string(),
            Arc::new(Store::new()),
            Arc::new(MembershipTable::new()),
            Arc::new(transport),
            config,
        )
    }

    fn instant_config() -> ReplicationConfig {
        let mut config = ReplicationConfig::default();
        config.reap_entry_interval = Duration::from_secs(0);
        config.reap_network_interval = Duration::from_secs(0);
        config.reap_node_interval = Duration::from_secs(0);
        config
    }

    #[tokio::test]
    async fn reap_tick_drops_expired_tombstone() {
        let engine = engine(instant_config()).await;
        engine.create_entry("t".into(), "n".into(), "k".into(), b"v".to_vec());
        engine.delete_entry("t".into(), "n".into(), "k".into(), b"v".to_vec());
        assert!(engine.store.get(&"t".into(), &"n".into(), &"k".into()).is_some());

        std::thread::sleep(Duration::from_millis(5));
        engine.reap_tick();
        assert!(engine.store.get(&"t".into(), &"n".into(), &"k".into()).is_none());
    }

    #[tokio::test]
    async fn reap_tick_leaves_live_entries_alone() {
        let engine = engine(instant_config()).await;
        engine.create_entry("t".into(), "n".into(), "k".into(), b"v".to_vec());
        engine.reap_tick();
        assert!(engine.store.get(&"t".into(), &"n".into(), &"k".into()).is_some());
    }

    #[tokio::test]
    async fn reap_tick_drops_expired_leaving_attachment() {
        let engine = engine(instant_config()).await;
        engine.join_network("n".into());
        engine.leave_network("n".into());
        assert!(engine.membership.attachment(&engine.local_node, &"n".into()).is_some());

        std::thread::sleep(Duration::from_millis(5));
        engine.reap_tick();
        assert!(engine.membership.attachment(&engine.local_node, &"n".into()).is_none());
    }

    #[tokio::test]
    async fn reap_tick_forgets_peer_address_of_expired_departed_node() {
        let engine = engine(instant_config()).await;
        let remote = NodeId::random();
        let event = NodeEventPayload {
            kind: NodeEventKind::Fail,
            ltime: 1,
            node: remote,
            hostname: "h".into(),
            address: "127.0.0.1:9000".parse().unwrap(),
        };
        engine.handle_node_event(&event);
        assert!(engine.peer_address(&remote).is_some());

        std::thread::sleep(Duration::from_millis(5));
        engine.reap_node_tick();
        assert!(engine.peer_address(&remote).is_none());
    }
}
