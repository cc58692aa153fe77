//! Local write entry points and inbound event reconciliation (§4.6.1–§4.6.5).
//!
//! Every local write and every inbound event funnels through the same
//! last-writer-wins rule: an update only takes effect if its Lamport time
//! is strictly greater than whatever is already recorded. Local writes
//! always win this race against themselves because they mint a fresh
//! clock tick before touching the store.

use std::time::{Duration, Instant};

use networkdb_protocol::{EntryKey, NetworkId, NodeId, TableEventKind, TableEventPayload, TableName};
use networkdb_protocol::{NetworkEventKind, NetworkEventPayload, NodeEventKind, NodeEventPayload};
use networkdb_membership::{AttachmentState, NodeStatus};
use networkdb_store::TableEntry;

use crate::engine::ReplicationEngine;
use crate::watch::WatchEvent;

impl ReplicationEngine {
    /// Local `CreateEntry` (§6.1). Returns the event that was queued for gossip.
    pub fn create_entry(&self, table: TableName, network: NetworkId, key: EntryKey, value: Vec<u8>) -> TableEventPayload {
        self.write_local_entry(TableEventKind::Create, table, network, key, value, 0)
    }

    /// Local `UpdateEntry` (§6.1).
    pub fn update_entry(&self, table: TableName, network: NetworkId, key: EntryKey, value: Vec<u8>) -> TableEventPayload {
        self.write_local_entry(TableEventKind::Update, table, network, key, value, 0)
    }

    /// Local `DeleteEntry` (§6.1): writes a tombstone carrying the
    /// locally configured reap interval rather than removing the entry
    /// outright, so peers that haven't seen the delete yet still witness it.
    pub fn delete_entry(&self, table: TableName, network: NetworkId, key: EntryKey, value: Vec<u8>) -> TableEventPayload {
        let reap_time_secs = self.config.reap_entry_interval.as_secs() as u32;
        self.write_local_entry(TableEventKind::Delete, table, network, key, value, reap_time_secs)
    }

    fn write_local_entry(
        &self,
        kind: TableEventKind,
        table: TableName,
        network: NetworkId,
        key: EntryKey,
        value: Vec<u8>,
        reap_time_secs: u32,
    ) -> TableEventPayload {
        let ltime = self.table_clock.increment();
        let entry = if matches!(kind, TableEventKind::Delete) {
            TableEntry::tombstone(self.local_node, ltime, value.clone(), Duration::from_secs(reap_time_secs as u64))
        } else {
            TableEntry::live(self.local_node, ltime, value.clone())
        };

        let outcome = self.store.upsert(&table, &network, &key, entry);
        if outcome.inserted_in_table {
            self.membership.adjust_entry_count(&self.local_node, &network, 1);
        }
        self.update_tombstone_deadline(&table, &network, &key, kind, reap_time_secs);

        self.broadcaster.publish(WatchEvent {
            table: table.clone(),
            network: network.clone(),
            key: key.clone(),
            value: value.clone(),
            kind,
            deleted: matches!(kind, TableEventKind::Delete),
        });

        let event = TableEventPayload {
            kind,
            ltime,
            node: self.local_node,
            network,
            table,
            key,
            value,
            reap_time_secs,
        };
        self.queue_table_event(&event);
        event
    }

    /// Apply an inbound table event (local or gossiped write from a peer).
    /// `from_bulk_sync` distinguishes a bulk-sync-carried event from one
    /// that arrived over ordinary async gossip — it changes how an
    /// unknown-key delete and the rebroadcast damper behave (§4.6.2).
    /// Returns `true` if it was newer than what we already had and was applied.
    pub fn handle_table_event(&self, event: &TableEventPayload, from_bulk_sync: bool) -> bool {
        // Preconditions (§4.6.2): drop without rebroadcast if either our own
        // attachment to the network has lapsed, or the event's origin isn't
        // even a member of the sub-cluster we believe we're in.
        let locally_attached = self
            .membership
            .attachment(&self.local_node, &event.network)
            .map(|a| a.state == AttachmentState::Joined)
            .unwrap_or(false);
        if !locally_attached {
            return false;
        }
        if self.membership.attachment(&event.node, &event.network).is_none() {
            return false;
        }

        let existing = self.store.get(&event.table, &event.network, &event.key);
        if let Some(existing) = &existing {
            if event.ltime <= existing.ltime {
                return false;
            }
        } else if matches!(event.kind, TableEventKind::Delete) && !from_bulk_sync {
            // Deleting a key we've never seen would require tracking
            // unknown-key tombstones indefinitely; drop it instead. A bulk
            // sync installs the tombstone anyway — it's catching us up on
            // state we may simply never have witnessed the create for.
            return false;
        }
        self.table_clock.witness(event.ltime);

        let entry = if matches!(event.kind, TableEventKind::Delete) {
            // A zero reap time from a legacy peer must be rewritten to our
            // own configured interval rather than reaped immediately (§6.3).
            let secs = if event.reap_time_secs == 0 {
                self.config.reap_entry_interval.as_secs() as u32
            } else {
                event.reap_time_secs
            };
            TableEntry::tombstone(event.node, event.ltime, event.value.clone(), Duration::from_secs(secs as u64))
        } else {
            TableEntry::live(event.node, event.ltime, event.value.clone())
        };

        let outcome = self.store.upsert(&event.table, &event.network, &event.key, entry);
        if outcome.inserted_in_table {
            self.membership.adjust_entry_count(&self.local_node, &event.network, 1);
        }
        let applied_reap_secs = if matches!(event.kind, TableEventKind::Delete) && event.reap_time_secs == 0 {
            self.config.reap_entry_interval.as_secs() as u32
        } else {
            event.reap_time_secs
        };
        self.update_tombstone_deadline(&event.table, &event.network, &event.key, event.kind, applied_reap_secs);

        self.broadcaster.publish(WatchEvent {
            table: event.table.clone(),
            network: event.network.clone(),
            key: event.key.clone(),
            value: event.value.clone(),
            kind: event.kind,
            deleted: matches!(event.kind, TableEventKind::Delete),
        });

        // Rebroadcast an inbound tombstone so it reaches nodes beyond this
        // gossip round's fanout, but only once our own view of the network
        // is caught up — otherwise we'd be amplifying a delete we received
        // before we even know who else is in the network (§9 Open Question
        // iii: `in_sync` gates this, set optimistically after bulk sync).
        // A bulk-synced tombstone already close to its own reap deadline is
        // also damped: it isn't worth another gossip round if it'll expire
        // locally before that round would matter (§4.6.2).
        if matches!(event.kind, TableEventKind::Delete) {
            let in_sync = self
                .membership
                .attachment(&self.local_node, &event.network)
                .map(|a| a.in_sync)
                .unwrap_or(false);
            let damped = from_bulk_sync && (applied_reap_secs as u64) <= self.config.reap_entry_interval.as_secs() / 6;
            if in_sync && !damped {
                self.queue_table_event(event);
            }
        }
        true
    }

    /// Apply an inbound node lifecycle event (§4.6.2).
    pub fn handle_node_event(&self, event: &NodeEventPayload) -> bool {
        self.node_clock.witness(event.ltime);
        let status = match event.kind {
            NodeEventKind::Join | NodeEventKind::Update => NodeStatus::Active,
            NodeEventKind::Leave => NodeStatus::Left,
            NodeEventKind::Fail => NodeStatus::Failed,
        };
        self.record_peer_address(event.node, event.address);
        let applied = self
            .membership
            .witness_node_event(event.node, event.hostname.clone(), status, event.ltime);
        if applied {
            match status {
                NodeStatus::Active => {
                    self.departed_node_deadlines.remove(&event.node);
                }
                NodeStatus::Failed | NodeStatus::Left => {
                    self.departed_node_deadlines
                        .insert(event.node, Instant::now() + self.config.reap_node_interval);
                    // A dead node's entries have no owner left to converge a
                    // graceful tombstone for, unlike a network leave — hard
                    // delete them outright (§4.6.2 `deleteNodeTableEntries`).
                    self.delete_node_table_entries(event.node);
                }
            }
        }
        applied
    }

    /// Apply an inbound network attachment event (§4.6.3–§4.6.4).
    pub fn handle_network_event(&self, event: &NetworkEventPayload) -> bool {
        self.node_clock.witness(event.ltime);
        let applied = match event.kind {
            NetworkEventKind::Join => self.membership.join_network(event.node, event.network.clone(), event.ltime),
            NetworkEventKind::Leave => self.membership.leave_network(event.node, event.network.clone(), event.ltime),
        };
        if applied {
            self.update_leaving_deadline(event.node, &event.network, event.kind);
            if matches!(event.kind, NetworkEventKind::Leave) {
                // Bulk-tombstone every replica we hold of that node's entries
                // under this network, independently of whatever per-entry
                // deletes the leaving node itself gossips (§4.6.2
                // `deleteNodeNetworkEntries`) — laggards converge either way.
                self.tombstone_node_network_entries(event.node, &event.network);
            }
        }
        applied
    }

    /// Hard-delete every entry authored by `node`, across every network this
    /// node knows about. Used when a node is witnessed as failed or left —
    /// there is no lagging-peer convergence concern the way there is for a
    /// graceful network leave, so these are dropped outright rather than
    /// tombstoned.
    fn delete_node_table_entries(&self, node: NodeId) {
        for network in self.membership.known_networks() {
            let mut owned = Vec::new();
            self.store.walk_by_network(&network, |table, key, entry| {
                if entry.owner == node {
                    owned.push((table.clone(), key.clone()));
                }
                false
            });
            for (table, key) in owned {
                let outcome = self.store.remove(&table, &network, &key);
                if outcome.removed_from_table {
                    self.membership.adjust_entry_count(&self.local_node, &network, -1);
                }
                self.tombstone_deadlines.remove(&(table, network.clone(), key));
            }
        }
    }

    /// Tombstone every replica held locally of `node`'s entries under
    /// `network`, as if each had been individually deleted by `node` —
    /// reusing [`Self::handle_table_event`] so deadlines, the watch
    /// broadcast, and in-sync-gated rebroadcast all stay in one place.
    fn tombstone_node_network_entries(&self, node: NodeId, network: &NetworkId) {
        let mut owned = Vec::new();
        self.store.walk_by_network(network, |table, key, entry| {
            if entry.owner == node && !entry.deleting {
                owned.push((table.clone(), key.clone(), entry.value.clone()));
            }
            false
        });
        for (table, key, value) in owned {
            let event = TableEventPayload {
                kind: TableEventKind::Delete,
                ltime: self.table_clock.increment(),
                node,
                network: network.clone(),
                table,
                key,
                value,
                reap_time_secs: self.config.reap_entry_interval.as_secs() as u32,
            };
            self.handle_table_event(&event, false);
        }
    }

    /// Local `JoinNetwork` (§4.6.4, §6.1).
    pub fn join_network(&self, network: NetworkId) -> NetworkEventPayload {
        let ltime = self.node_clock.increment();
        self.membership.join_network(self.local_node, network.clone(), ltime);
        self.leaving_deadlines.remove(&(self.local_node, network.clone()));
        let event = NetworkEventPayload {
            kind: NetworkEventKind::Join,
            ltime,
            node: self.local_node,
            network,
        };
        self.queue_network_event(&event);
        event
    }

    /// Local `LeaveNetwork` (§4.6.4–§4.6.5, §6.1). Order matters: the leave
    /// event is published before the locally owned entries are walked and
    /// tombstoned, so a peer that only sees the network event still learns
    /// who left even if it races ahead of the per-entry tombstones.
    pub fn leave_network(&self, network: NetworkId) -> NetworkEventPayload {
        let ltime = self.node_clock.increment();
        self.membership.leave_network(self.local_node, network.clone(), ltime);
        self.leaving_deadlines.insert(
            (self.local_node, network.clone()),
            Instant::now() + self.config.reap_network_interval,
        );
        let event = NetworkEventPayload {
            kind: NetworkEventKind::Leave,
            ltime,
            node: self.local_node,
            network: network.clone(),
        };
        self.queue_network_event(&event);
        self.tombstone_own_network_entries(&network);
        self.hard_delete_foreign_network_entries(&network);
        event
    }

    /// Convert every locally owned, still-live entry under `network` into a
    /// tombstone (§4.6.4 step 3): "this ensures lagging peers can still
    /// learn of the leave by observing the tombstoned creates."
    fn tombstone_own_network_entries(&self, network: &NetworkId) {
        let mut owned = Vec::new();
        self.store.walk_by_network(network, |table, key, entry| {
            if entry.owner == self.local_node && !entry.deleting {
                owned.push((table.clone(), key.clone(), entry.value.clone()));
            }
            false
        });
        for (table, key, value) in owned {
            self.delete_entry(table, network.clone(), key, value);
        }
    }

    /// Hard-delete every entry under `network` owned by some other node
    /// (§4.6.4 step 3, foreign-owned branch): they can be re-learned if we
    /// rejoin, so there's no local owner left to gossip a graceful delete
    /// for. Watchers are notified of the deletion only for entries that
    /// weren't already a tombstone.
    fn hard_delete_foreign_network_entries(&self, network: &NetworkId) {
        let mut foreign = Vec::new();
        self.store.walk_by_network(network, |table, key, entry| {
            if entry.owner != self.local_node {
                foreign.push((table.clone(), key.clone(), entry.value.clone(), entry.deleting));
            }
            false
        });
        for (table, key, value, was_tombstone) in foreign {
            let outcome = self.store.remove(&table, network, &key);
            if outcome.removed_from_table {
                self.membership.adjust_entry_count(&self.local_node, network, -1);
            }
            self.tombstone_deadlines.remove(&(table.clone(), network.clone(), key.clone()));
            if !was_tombstone {
                self.broadcaster.publish(WatchEvent {
                    table,
                    network: network.clone(),
                    key,
                    value,
                    kind: TableEventKind::Delete,
                    deleted: true,
                });
            }
        }
    }

    pub fn local_node_id(&self) -> NodeId {
        self.local_node
    }

    /// Build a `Leave` node event for this node, for a best-effort shutdown
    /// broadcast (§5 close sequence). Only minted for transmission — it is
    /// not applied to local membership state, since this node is about to
    /// stop running `gossip_tick` for good and has no further use for its
    /// own attachments.
    pub fn local_node_leave_event(&self) -> NodeEventPayload {
        let ltime = self.node_clock.increment();
        NodeEventPayload {
            kind: NodeEventKind::Leave,
            ltime,
            node: self.local_node,
            hostname: self.local_hostname().to_string(),
            address: self.local_address(),
        }
    }

    /// Keep `tombstone_deadlines` in sync with a just-applied table write: a
    /// delete schedules a reap deadline, anything else clears one (a write
    /// racing in after a delete resurrects the key).
    fn update_tombstone_deadline(
        &self,
        table: &TableName,
        network: &NetworkId,
        key: &EntryKey,
        kind: TableEventKind,
        reap_time_secs: u32,
    ) {
        let path = (table.clone(), network.clone(), key.clone());
        if matches!(kind, TableEventKind::Delete) {
            self.tombstone_deadlines
                .insert(path, Instant::now() + Duration::from_secs(reap_time_secs as u64));
        } else {
            self.tombstone_deadlines.remove(&path);
        }
    }

    fn update_leaving_deadline(&self, node: NodeId, network: &NetworkId, kind: NetworkEventKind) {
        let key = (node, network.clone());
        match kind {
            NetworkEventKind::Join => {
                self.leaving_deadlines.remove(&key);
            }
            NetworkEventKind::Leave => {
                self.leaving_deadlines.insert(key, Instant::now() + self.config.reap_network_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use networkdb_keyring::{GossipKey, KeyRing};
    use networkdb_membership::MembershipTable;
    use networkdb_store::Store;
    use networkdb_transport::GossipTransport;
    use crate::engine::ReplicationConfig;

    async fn engine() -> ReplicationEngine {
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
            ReplicationConfig::default(),
        )
    }

    #[tokio::test]
    async fn create_then_update_is_visible_with_newer_ltime() {
        let engine = engine().await;
        engine.create_entry("t".into(), "n".into(), "k".into(), b"v1".to_vec());
        engine.update_entry("t".into(), "n".into(), "k".into(), b"v2".to_vec());
        let stored = engine.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        assert_eq!(stored.value, b"v2");
    }

    #[tokio::test]
    async fn stale_table_event_is_rejected() {
        let engine = engine().await;
        engine.join_network("n".into());
        let fresh = engine.create_entry("t".into(), "n".into(), "k".into(), b"v1".to_vec());
        let mut stale = fresh.clone();
        stale.ltime -= 1;
        stale.value = b"stale".to_vec();
        assert!(!engine.handle_table_event(&stale, false));
        let stored = engine.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        assert_eq!(stored.value, b"v1");
    }

    #[tokio::test]
    async fn replaying_the_same_event_twice_is_a_no_op() {
        let engine = engine().await;
        engine.join_network("n".into());
        let event = engine.create_entry("t".into(), "n".into(), "k".into(), b"v1".to_vec());
        assert!(!engine.handle_table_event(&event, false));
        let stored = engine.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        assert_eq!(stored.value, b"v1");
    }

    #[tokio::test]
    async fn applying_events_out_of_order_converges_to_the_same_state_either_way() {
        let author_low = NodeId::random();
        let author_high = NodeId::random();
        let lower = TableEventPayload {
            kind: TableEventKind::Update,
            ltime: 3,
            node: author_low,
            network: "n".into(),
            table: "t".into(),
            key: "k".into(),
            value: b"lower".to_vec(),
            reap_time_secs: 0,
        };
        let higher = TableEventPayload {
            kind: TableEventKind::Update,
            ltime: 7,
            node: author_high,
            network: "n".into(),
            table: "t".into(),
            key: "k".into(),
            value: b"higher".to_vec(),
            reap_time_secs: 0,
        };

        let high_then_low = engine().await;
        high_then_low.membership.join_network(high_then_low.local_node, "n".into(), 1);
        high_then_low.membership.join_network(author_low, "n".into(), 1);
        high_then_low.membership.join_network(author_high, "n".into(), 1);
        assert!(high_then_low.handle_table_event(&higher, false));
        assert!(!high_then_low.handle_table_event(&lower, false));

        let low_then_high = engine().await;
        low_then_high.membership.join_network(low_then_high.local_node, "n".into(), 1);
        low_then_high.membership.join_network(author_low, "n".into(), 1);
        low_then_high.membership.join_network(author_high, "n".into(), 1);
        assert!(low_then_high.handle_table_event(&lower, false));
        assert!(low_then_high.handle_table_event(&higher, false));

        let expected = high_then_low.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        let actual = low_then_high.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        assert_eq!(expected.value, actual.value);
        assert_eq!(expected.value, b"higher");
    }

    #[tokio::test]
    async fn delete_entry_writes_a_tombstone_with_configured_reap_time() {
        let engine = engine().await;
        engine.create_entry("t".into(), "n".into(), "k".into(), b"v1".to_vec());
        engine.delete_entry("t".into(), "n".into(), "k".into(), b"v1".to_vec());
        let stored = engine.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        assert!(stored.deleting);
        assert_eq!(stored.reap_time, engine.config.reap_entry_interval);
    }

    #[tokio::test]
    async fn legacy_zero_reap_time_is_rewritten_to_local_config() {
        let engine = engine().await;
        let remote = NodeId::random();
        engine.membership.join_network(engine.local_node, "n".into(), 1);
        engine.membership.join_network(remote, "n".into(), 1);

        let create = TableEventPayload {
            kind: TableEventKind::Create,
            ltime: 1,
            node: remote,
            network: "n".into(),
            table: "t".into(),
            key: "k".into(),
            value: b"v".to_vec(),
            reap_time_secs: 0,
        };
        assert!(engine.handle_table_event(&create, false));

        let event = TableEventPayload {
            kind: TableEventKind::Delete,
            ltime: 99,
            node: remote,
            network: "n".into(),
            table: "t".into(),
            key: "k".into(),
            value: vec![],
            reap_time_secs: 0,
        };
        assert!(engine.handle_table_event(&event, false));
        let stored = engine.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        assert_eq!(stored.reap_time, engine.config.reap_entry_interval);
    }

    #[tokio::test]
    async fn join_then_leave_network_updates_membership() {
        let engine = engine().await;
        engine.join_network("n".into());
        assert_eq!(engine.membership.members_of(&"n".into()), vec![engine.local_node]);
        engine.leave_network("n".into());
        assert!(engine.membership.members_of(&"n".into()).is_empty());
    }

    #[tokio::test]
    async fn inbound_tombstone_is_not_rebroadcast_before_in_sync() {
        let engine = engine().await;
        let remote = NodeId::random();
        engine.membership.join_network(engine.local_node, "n".into(), 1);
        engine.membership.join_network(remote, "n".into(), 1);
        let before = engine.transport.queue_for(&"n".into()).get_broadcasts(usize::MAX, 1).len();

        let event = TableEventPayload {
            kind: TableEventKind::Delete,
            ltime: 5,
            node: remote,
            network: "n".into(),
            table: "t".into(),
            key: "k".into(),
            value: vec![],
            reap_time_secs: 30,
        };
        assert!(engine.handle_table_event(&event, false));

        let after = engine.transport.queue_for(&"n".into()).get_broadcasts(usize::MAX, 1).len();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn inbound_tombstone_is_rebroadcast_once_in_sync() {
        let engine = engine().await;
        let remote = NodeId::random();
        engine.membership.join_network(engine.local_node, "n".into(), 1);
        engine.membership.join_network(remote, "n".into(), 1);
        engine.membership.mark_in_sync(&engine.local_node, &"n".into());

        let event = TableEventPayload {
            kind: TableEventKind::Delete,
            ltime: 5,
            node: remote,
            network: "n".into(),
            table: "t".into(),
            key: "k".into(),
            value: vec![],
            reap_time_secs: 30,
        };
        assert!(engine.handle_table_event(&event, false));

        let queued = engine.transport.queue_for(&"n".into()).get_broadcasts(usize::MAX, 1);
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn leave_network_tombstones_locally_owned_entries() {
        let engine = engine().await;
        engine.join_network("n".into());
        engine.create_entry("t".into(), "n".into(), "k".into(), b"v".to_vec());

        engine.leave_network("n".into());

        let stored = engine.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        assert!(stored.deleting);
    }

    #[tokio::test]
    async fn inbound_network_leave_bulk_tombstones_that_nodes_replicas() {
        let engine = engine().await;
        let remote = NodeId::random();
        engine.membership.join_network(engine.local_node, "n".into(), 1);
        engine.membership.join_network(remote, "n".into(), 1);

        // A replica of `remote`'s entry, learned earlier via gossip.
        let create = TableEventPayload {
            kind: TableEventKind::Create,
            ltime: 1,
            node: remote,
            network: "n".into(),
            table: "t".into(),
            key: "k".into(),
            value: b"v".to_vec(),
            reap_time_secs: 0,
        };
        assert!(engine.handle_table_event(&create, false));

        // A replica under a different network must be left untouched.
        engine.membership.join_network(engine.local_node, "other".into(), 1);
        engine.membership.join_network(remote, "other".into(), 1);
        let untouched = TableEventPayload {
            kind: TableEventKind::Create,
            ltime: 1,
            node: remote,
            network: "other".into(),
            table: "t".into(),
            key: "k".into(),
            value: b"v".to_vec(),
            reap_time_secs: 0,
        };
        assert!(engine.handle_table_event(&untouched, false));

        let leave = NetworkEventPayload {
            kind: NetworkEventKind::Leave,
            ltime: 2,
            node: remote,
            network: "n".into(),
        };
        assert!(engine.handle_network_event(&leave));

        let tombstoned = engine.store.get(&"t".into(), &"n".into(), &"k".into()).unwrap();
        assert!(tombstoned.deleting);
        let other = engine.store.get(&"t".into(), &"other".into(), &"k".into()).unwrap();
        assert!(!other.deleting);
    }

    #[tokio::test]
    async fn inbound_node_failure_hard_deletes_entries_across_every_network() {
        let engine = engine().await;
        let remote = NodeId::random();
        engine.membership.join_network(engine.local_node, "n".into(), 1);
        engine.membership.join_network(remote, "n".into(), 1);

        let create = TableEventPayload {
            kind: TableEventKind::Create,
            ltime: 1,
            node: remote,
            network: "n".into(),
            table: "t".into(),
            key: "k".into(),
            value: b"v".to_vec(),
            reap_time_secs: 0,
        };
        assert!(engine.handle_table_event(&create, false));

        let fail = NodeEventPayload {
            kind: NodeEventKind::Fail,
            ltime: 2,
            node: remote,
            hostname: "remote".into(),
            address: "127.0.0.1:1".parse().unwrap(),
        };
        assert!(engine.handle_node_event(&fail));

        assert!(engine.store.get(&"t".into(), &"n".into(), &"k".into()).is_none());
    }
}
