//! Push/pull exchange on cluster join (§4.6.6): a node greeting a peer
//! sends its own network attachments and the peer replies with its own,
//! so both sides synthesize the matching join/leave events without
//! waiting for the next gossip round.

use std::net::SocketAddr;

use networkdb_membership::AttachmentState;
use networkdb_protocol::{decode_frame, encode_frame, Message, NodeEventKind, NodeEventPayload, PushPullEntry, PushPullPayload};

use crate::engine::ReplicationEngine;

impl ReplicationEngine {
    pub fn local_push_pull_payload(&self) -> PushPullPayload {
        let networks = self
            .membership
            .attachments_of(&self.local_node)
            .into_iter()
            .map(|(network, attachment)| PushPullEntry {
                network,
                ltime: attachment.ltime,
                leaving: attachment.state == AttachmentState::Leaving,
            })
            .collect();
        PushPullPayload {
            ltime: self.node_clock.time(),
            node: self.local_node,
            hostname: self.local_hostname().to_string(),
            address: self.local_address(),
            networks,
        }
    }

    /// Merge a remote push/pull payload into our membership view (§4.6.6).
    ///
    /// The remote's attachments are applied as ordinary network events, but
    /// the remote node itself is synthesized as a `Join` node event first —
    /// a node that only ever *receives* push/pull (never a direct node event
    /// gossiped about the sender) would otherwise never learn the sender's
    /// dialable address, and its own `gossip_tick` would have nobody to fan
    /// entries out to. The synthesized join is also queued for gossip, under
    /// every network the remote is attached to, so it propagates onward
    /// instead of staying known only to the two push/pull participants.
    pub fn apply_push_pull(&self, payload: &PushPullPayload) {
        self.node_clock.witness(payload.ltime);
        let join = NodeEventPayload {
            kind: NodeEventKind::Join,
            ltime: payload.ltime,
            node: payload.node,
            hostname: payload.hostname.clone(),
            address: payload.address,
        };
        self.handle_node_event(&join);
        for entry in &payload.networks {
            if entry.leaving {
                self.membership.leave_network(payload.node, entry.network.clone(), entry.ltime);
            } else {
                self.membership.join_network(payload.node, entry.network.clone(), entry.ltime);
            }
            self.queue_node_event(&entry.network, &join);
        }
    }

    /// Client side of push/pull: dial `peer`, exchange payloads, merge the
    /// reply. The reply is applied first so the remote's own networks are
    /// already known before we pin its dialable address under `peer` —
    /// `apply_push_pull` records its own address from the payload, and this
    /// only overrides it with the address we actually dialed.
    pub async fn push_pull_with(&self, peer: SocketAddr) -> anyhow::Result<()> {
        let frame = encode_frame(&Message::PushPull(self.local_push_pull_payload()))?;
        let reply = self.transport.send_reliable(peer, &frame).await?;
        if let Message::PushPull(remote) = decode_frame(&reply)? {
            self.apply_push_pull(&remote);
            self.record_peer_address(remote.node, peer);
        }
        Ok(())
    }

    /// Server side of push/pull: merge the incoming payload and answer with ours.
    pub fn handle_push_pull_request(&self, payload: &PushPullPayload) -> PushPullPayload {
        self.apply_push_pull(payload);
        self.local_push_pull_payload()
    }
}
