//! Bulk sync (§4.6.8–§4.6.9): a full transfer of every entry under a set of
//! networks to a single peer, used both periodically and to catch a newly
//! joined peer up before it has to wait out several gossip rounds.

use std::net::SocketAddr;
use std::time::Instant;

use networkdb_protocol::{
    decode_frame, encode_frame, BulkSyncPayload, CompoundPayload, Message, NetworkId, TableEventKind, TableEventPayload,
};

use crate::engine::ReplicationEngine;

impl ReplicationEngine {
    pub fn build_bulk_sync(&self, networks: Vec<NetworkId>, unsolicited: bool) -> BulkSyncPayload {
        let mut frames = Vec::new();
        for network in &networks {
            self.store.walk_by_network(network, |table, key, entry| {
                // Live entries are encoded as `Create`, never `Update` — a
                // driver-notify subscriber (§6.4) remaps `Update` to
                // `Delete`, and a bulk-synced live entry is not a delete.
                let (kind, reap_time_secs) = if entry.deleting {
                    let residual = self
                        .tombstone_deadlines
                        .get(&(table.clone(), network.clone(), key.clone()))
                        .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_secs() as u32)
                        .unwrap_or_else(|| entry.reap_time.as_secs() as u32);
                    (TableEventKind::Delete, residual)
                } else {
                    (TableEventKind::Create, 0)
                };
                let event = TableEventPayload {
                    kind,
                    ltime: entry.ltime,
                    node: entry.owner,
                    network: network.clone(),
                    table: table.clone(),
                    key: key.clone(),
                    value: entry.value.clone(),
                    reap_time_secs,
                };
                if let Ok(frame) = encode_frame(&Message::TableEvent(event)) {
                    frames.push(frame);
                }
                false
            });
        }
        BulkSyncPayload {
            ltime: self.table_clock.time(),
            unsolicited,
            origin: self.local_node,
            networks,
            entries: CompoundPayload { frames },
        }
    }

    /// Apply every table event carried by a bulk sync payload. Returns how
    /// many were newer than what we already had and got applied.
    pub fn apply_bulk_sync(&self, payload: &BulkSyncPayload) -> usize {
        payload
            .entries
            .frames
            .iter()
            .filter_map(|frame| decode_frame(frame).ok())
            .filter_map(|message| match message {
                Message::TableEvent(event) => Some(event),
                _ => None,
            })
            .filter(|event| self.handle_table_event(event, true))
            .count()
    }

    /// Client side: send our view of `networks` to `peer` and merge its reply.
    ///
    /// Marks every network in `networks` as in-sync the moment this round
    /// trip returns, whether or not it actually succeeded — the flag is an
    /// optimistic "we've at least tried a full sync", not a guarantee (§9
    /// Open Question iii).
    pub async fn bulk_sync_with(&self, peer: SocketAddr, networks: Vec<NetworkId>) -> anyhow::Result<usize> {
        // Always sent unsolicited: every caller of this method is initiating
        // a sync unprompted, and wants `peer` to answer with its own view
        // rather than silently swallowing the push (§4.6.9, §8 scenario 5).
        let payload = self.build_bulk_sync(networks.clone(), true);
        let frame = encode_frame(&Message::BulkSync(payload))?;
        let result = self.transport.send_reliable(peer, &frame).await;
        for network in &networks {
            self.membership.mark_in_sync(&self.local_node, network);
        }
        match decode_frame(&result?)? {
            Message::BulkSync(remote) => Ok(self.apply_bulk_sync(&remote)),
            _ => Ok(0),
        }
    }

    /// Server side: apply an inbound bulk sync. An *unsolicited* bulk sync
    /// (periodic push from a peer who didn't ask us for anything) gets a
    /// reply bulk sync of our own for the same networks back, so a single
    /// periodic tick catches both sides up (§4.6.9).
    pub fn handle_bulk_sync_request(&self, payload: &BulkSyncPayload) -> Option<BulkSyncPayload> {
        self.apply_bulk_sync(payload);
        payload.unsolicited.then(|| self.build_bulk_sync(payload.networks.clone(), false))
    }

    /// Periodic bulk sync (§4.6.8): pick one member per known network and
    /// exchange full state with it. Call on `config.bulk_sync_interval`.
    pub async fn bulk_sync_tick(&self) {
        for network in self.membership.known_networks() {
            let members = self.membership.members_of(&network);
            let Some(peer) = members.into_iter().find(|n| *n != self.local_node) else {
                continue;
            };
            let Some(addr) = self.peer_address(&peer) else { continue };
            if let Err(err) = self.bulk_sync_with(addr, vec![network.clone()]).await {
                tracing::warn!(peer = %peer, network = %network, %err, "bulk sync tick failed");
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
    use networkdb_protocol::NodeId;
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
    async fn build_then_apply_bulk_sync_round_trips_entries() {
        let sender = engine().await;
        sender.create_entry("t".into(), "n".into(), "k1".into(), b"v1".to_vec());
        sender.create_entry("t".into(), "n".into(), "k2".into(), b"v2".to_vec());

        let payload = sender.build_bulk_sync(vec!["n".into()], false);
        assert_eq!(payload.entries.frames.len(), 2);

        let receiver = engine().await;
        receiver.membership.join_network(receiver.local_node, "n".into(), 1);
        receiver.membership.join_network(sender.local_node, "n".into(), 1);
        let applied = receiver.apply_bulk_sync(&payload);
        assert_eq!(applied, 2);
        assert_eq!(
            receiver.store.get(&"t".into(), &"n".into(), &"k1".into()).unwrap().value,
            b"v1"
        );
    }

    #[tokio::test]
    async fn unsolicited_bulk_sync_gets_a_reply_bulk_sync() {
        let a = engine().await;
        a.create_entry("t".into(), "n".into(), "k".into(), b"v".to_vec());
        let payload = a.build_bulk_sync(vec!["n".into()], true);

        let b = engine().await;
        let reply = b.handle_bulk_sync_request(&payload);
        assert!(reply.is_some());
    }

    #[tokio::test]
    async fn solicited_bulk_sync_gets_no_reply() {
        let a = engine().await;
        let payload = a.build_bulk_sync(vec!["n".into()], false);
        let b = engine().await;
        assert!(b.handle_bulk_sync_request(&payload).is_none());
    }

    #[tokio::test]
    async fn bulk_sync_with_marks_attachment_in_sync_and_exchanges_entries() {
        let a = Arc::new(engine().await);
        a.join_network("n".into());
        a.create_entry("t".into(), "n".into(), "from_a".into(), b"a".to_vec());

        let b = Arc::new(engine().await);
        a.membership.join_network(b.local_node, "n".into(), 1);
        b.membership.join_network(a.local_node, "n".into(), 1);
        b.membership.join_network(b.local_node, "n".into(), 1);
        b.create_entry("t".into(), "n".into(), "from_b".into(), b"b".to_vec());
        let b_addr = b.transport.local_addr();

        let server = tokio::spawn({
            let b = Arc::clone(&b);
            async move {
                let (mut stream, _) = b.transport.accept_reliable().await.unwrap();
                let request = b.transport.read_reliable_frame(&mut stream).await.unwrap();
                if let Message::BulkSync(payload) = decode_frame(&request).unwrap() {
                    if let Some(reply) = b.handle_bulk_sync_request(&payload) {
                        let frame = encode_frame(&Message::BulkSync(reply)).unwrap();
                        b.transport.write_reliable_frame(&mut stream, &frame).await.unwrap();
                    }
                }
            }
        });

        assert!(!a.membership.attachment(&a.local_node, &"n".into()).unwrap().in_sync);
        let applied = a.bulk_sync_with(b_addr, vec!["n".into()]).await.unwrap();
        server.await.unwrap();

        assert_eq!(applied, 1);
        assert!(a.store.get(&"t".into(), &"n".into(), &"from_b".into()).is_some());
        assert!(a.membership.attachment(&a.local_node, &"n".into()).unwrap().in_sync);
    }
}
