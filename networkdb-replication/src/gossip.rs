//! Gossip tick (§4.6.7): drains each network's transmit queue and fans the
//! batched frames out to a handful of that network's members.

use networkdb_protocol::{Message, NetworkEventPayload, NetworkId, NodeEventPayload, TableEventPayload};
use rand::seq::SliceRandom;

use crate::engine::ReplicationEngine;

/// How many peers a single gossip tick pushes a batch to per network.
const GOSSIP_FANOUT: usize = 3;

impl ReplicationEngine {
    pub(crate) fn queue_table_event(&self, event: &TableEventPayload) {
        self.queue_message(&event.network, Message::TableEvent(event.clone()), dedup_key(&event.network, &event.table.0, &event.key.0));
    }

    pub(crate) fn queue_network_event(&self, event: &NetworkEventPayload) {
        self.queue_message(
            &event.network,
            Message::NetworkEvent(event.clone()),
            format!("network-attach/{}/{}", event.network.0, event.node),
        );
    }

    pub fn queue_node_event(&self, network: &NetworkId, event: &NodeEventPayload) {
        self.queue_message(network, Message::NodeEvent(event.clone()), format!("node/{}", event.node));
    }

    fn queue_message(&self, network: &NetworkId, message: Message, dedup_key: String) {
        let Ok(frame) = networkdb_protocol::encode_frame(&message) else {
            tracing::warn!("dropping message that failed to encode for gossip");
            return;
        };
        self.transport.queue_for(network).queue_broadcast(dedup_key, frame);
    }

    /// Drain every network's transmit queue and send a batch to a random
    /// subset of that network's members. Call on a fixed interval
    /// (`config.gossip_interval`) from the owning task.
    pub async fn gossip_tick(&self) {
        for network in self.membership.known_networks() {
            let members = self.membership.members_of(&network);
            if members.is_empty() {
                continue;
            }
            let queue = self.transport.queue_for(&network);
            let frames = queue.get_broadcasts(self.config.max_gossip_packet_bytes, members.len());
            if frames.is_empty() {
                continue;
            }
            let compounds = networkdb_protocol::pack_into_compounds(frames, self.config.max_gossip_packet_bytes);

            let mut targets = members;
            targets.retain(|n| *n != self.local_node);
            let mut rng = rand::thread_rng();
            targets.shuffle(&mut rng);
            targets.truncate(GOSSIP_FANOUT);

            for peer in targets {
                let Some(addr) = self.peer_address(&peer) else { continue };
                for compound in &compounds {
                    let ok = self.transport.send_best_effort(addr, compound).await.is_ok();
                    self.transport.record_peer_result(peer, ok);
                }
            }
        }
    }
}

fn dedup_key(network: &NetworkId, table: &str, key: &str) -> String {
    format!("entry/{}/{}/{}", network.0, table, key)
}
