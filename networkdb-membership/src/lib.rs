//! # Cluster and network membership tracking
//!
//! Two state machines live here:
//!
//! - **Node membership** — every peer NetworkDB has ever heard of, tracked
//!   as `Active`, `Failed` (suspected down, still a cluster member) or
//!   `Left` (departed on purpose) along with the Lamport time of its last
//!   event (§4.3 "Node membership").
//! - **Network attachment** — per (node, network) pair, whether that node
//!   has joined a given network sub-cluster: `Joined`, `Leaving` (left but
//!   not yet reaped) or absent entirely once reaped.
//!
//! Both maps are `DashMap`s rather than a map behind one lock: node and
//! network events arrive independently off the wire and off local API
//! calls, and serializing all of them behind a single mutex would turn the
//! gossip receive loop into a bottleneck the way a single coarse lock did
//! in the cache layer this crate started from.

mod network;
mod node;

pub use network::{AttachmentState, NetworkAttachment};
pub use node::{NodeRecord, NodeStatus};

use dashmap::DashMap;
use dashmap::DashSet;
use networkdb_protocol::{LamportTime, NetworkId, NodeId};

/// Tracks node liveness and per-network attachment state for the whole
/// cluster as this node currently understands it.
#[derive(Default)]
pub struct MembershipTable {
    nodes: DashMap<NodeId, NodeRecord>,
    /// (node, network) -> attachment state.
    attachments: DashMap<(NodeId, NetworkId), NetworkAttachment>,
    /// Reverse index: network -> nodes currently joined to it, so a gossip
    /// tick or bulk sync can find everyone to talk to about a network
    /// without scanning `attachments`.
    members_by_network: DashMap<NetworkId, DashSet<NodeId>>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &NodeId) -> Option<NodeRecord> {
        self.nodes.get(id).map(|r| r.clone())
    }

    /// Apply a node event, honoring last-writer-wins by Lamport time.
    /// Returns `true` if the record was actually updated.
    pub fn witness_node_event(&self, id: NodeId, hostname: String, status: NodeStatus, ltime: LamportTime) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.nodes.entry(id) {
            Entry::Vacant(v) => {
                v.insert(NodeRecord { hostname, status, ltime });
                true
            }
            Entry::Occupied(mut o) => {
                if ltime <= o.get().ltime {
                    return false;
                }
                let record = o.get_mut();
                record.hostname = hostname;
                record.status = status;
                record.ltime = ltime;
                true
            }
        }
    }

    pub fn all_nodes(&self) -> Vec<(NodeId, NodeRecord)> {
        self.nodes.iter().map(|r| (*r.key(), r.value().clone())).collect()
    }

    pub fn attachment(&self, node: &NodeId, network: &NetworkId) -> Option<NetworkAttachment> {
        self.attachments.get(&(*node, network.clone())).map(|r| r.clone())
    }

    /// Every network attachment recorded for `node`, used to build the
    /// push/pull payload a node sends when it greets a peer.
    pub fn attachments_of(&self, node: &NodeId) -> Vec<(NetworkId, NetworkAttachment)> {
        self.attachments
            .iter()
            .filter(|r| r.key().0 == *node)
            .map(|r| (r.key().1.clone(), r.value().clone()))
            .collect()
    }

    /// Mark `node` as joined to `network`, or bump its ltime if it's a
    /// re-join racing a stale leave. No-op (returns `false`) if a newer
    /// event already won.
    pub fn join_network(&self, node: NodeId, network: NetworkId, ltime: LamportTime) -> bool {
        use dashmap::mapref::entry::Entry;
        let key = (node, network.clone());
        let updated = match self.attachments.entry(key) {
            Entry::Vacant(v) => {
                v.insert(NetworkAttachment::joined(ltime));
                true
            }
            Entry::Occupied(mut o) => {
                if ltime <= o.get().ltime {
                    false
                } else {
                    o.get_mut().state = AttachmentState::Joined;
                    o.get_mut().ltime = ltime;
                    true
                }
            }
        };
        if updated {
            self.members_by_network.entry(network).or_default().insert(node);
        }
        updated
    }

    /// Mark `node`'s attachment to `network` as leaving (not yet reaped).
    pub fn leave_network(&self, node: NodeId, network: NetworkId, ltime: LamportTime) -> bool {
        use dashmap::mapref::entry::Entry;
        let key = (node, network.clone());
        let updated = match self.attachments.entry(key) {
            Entry::Vacant(v) => {
                let mut attachment = NetworkAttachment::joined(ltime);
                attachment.state = AttachmentState::Leaving;
                v.insert(attachment);
                true
            }
            Entry::Occupied(mut o) => {
                if ltime <= o.get().ltime {
                    false
                } else {
                    o.get_mut().state = AttachmentState::Leaving;
                    o.get_mut().ltime = ltime;
                    true
                }
            }
        };
        if updated {
            if let Some(set) = self.members_by_network.get(&network) {
                set.remove(&node);
            }
        }
        updated
    }

    /// Drop a leaving attachment entirely once its reap deadline has passed.
    /// Returns the removed record, if any.
    pub fn reap_attachment(&self, node: &NodeId, network: &NetworkId) -> Option<NetworkAttachment> {
        self.attachments.remove(&(*node, network.clone())).map(|(_, v)| v)
    }

    pub fn members_of(&self, network: &NetworkId) -> Vec<NodeId> {
        self.members_by_network
            .get(network)
            .map(|set| set.iter().map(|r| *r).collect())
            .unwrap_or_default()
    }

    /// Every network this node currently has at least one known member for
    /// (itself included), used to drive the gossip tick's per-network loop.
    pub fn known_networks(&self) -> Vec<NetworkId> {
        self.members_by_network
            .iter()
            .filter(|r| !r.value().is_empty())
            .map(|r| r.key().clone())
            .collect()
    }

    /// Adjust the live entry counter for an attachment. Called by the
    /// facade immediately after a [`networkdb_store::Store`] mutation so
    /// `entries_number` stays correct without this crate depending on the
    /// store crate.
    pub fn adjust_entry_count(&self, node: &NodeId, network: &NetworkId, delta: i64) {
        if let Some(mut attachment) = self.attachments.get_mut(&(*node, network.clone())) {
            attachment.entries_number = attachment.entries_number.saturating_add_signed(delta);
        }
    }

    /// Mark a network attachment as caught up after a bulk sync. Set
    /// optimistically by the caller once the bulk sync round-trip
    /// *returns*, regardless of whether it errored (§9 Open Question iii —
    /// reproduced as observed, not tightened). No-op if the attachment
    /// doesn't exist (e.g. we've since left the network).
    pub fn mark_in_sync(&self, node: &NodeId, network: &NetworkId) {
        if let Some(mut attachment) = self.attachments.get_mut(&(*node, network.clone())) {
            attachment.in_sync = true;
        }
    }

    /// Snapshot of every attachment currently marked `Leaving`, for the reaper.
    pub fn leaving_attachments(&self) -> Vec<(NodeId, NetworkId, NetworkAttachment)> {
        self.attachments
            .iter()
            .filter(|r| r.value().state == AttachmentState::Leaving)
            .map(|r| {
                let (node, network) = r.key().clone();
                (node, network, r.value().clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn node() -> NodeId {
        NodeId::random()
    }

    #[test]
    fn witness_node_event_rejects_stale_ltime() {
        let table = MembershipTable::new();
        let n = node();
        assert!(table.witness_node_event(n, "a".into(), NodeStatus::Active, 5));
        assert!(!table.witness_node_event(n, "b".into(), NodeStatus::Failed, 3));
        assert_eq!(table.node(&n).unwrap().hostname, "a");
    }

    #[test]
    fn join_then_leave_updates_reverse_index() {
        let table = MembershipTable::new();
        let n = node();
        let net = NetworkId::from("n1");
        assert!(table.join_network(n, net.clone(), 1));
        assert_eq!(table.members_of(&net), vec![n]);

        assert!(table.leave_network(n, net.clone(), 2));
        assert!(table.members_of(&net).is_empty());
        assert_eq!(table.attachment(&n, &net).unwrap().state, AttachmentState::Leaving);
    }

    #[test]
    fn leave_network_before_join_is_rejected_by_stale_ltime() {
        let table = MembershipTable::new();
        let n = node();
        let net = NetworkId::from("n1");
        table.join_network(n, net.clone(), 10);
        // A leave racing in with an older ltime must not undo the join.
        assert!(!table.leave_network(n, net.clone(), 5));
        assert_eq!(table.attachment(&n, &net).unwrap().state, AttachmentState::Joined);
    }

    #[test]
    fn reap_attachment_removes_it() {
        let table = MembershipTable::new();
        let n = node();
        let net = NetworkId::from("n1");
        table.join_network(n, net.clone(), 1);
        table.leave_network(n, net.clone(), 2);
        let removed = table.reap_attachment(&n, &net);
        assert!(removed.is_some());
        assert!(table.attachment(&n, &net).is_none());
    }

    #[test]
    fn adjust_entry_count_tracks_store_mutations() {
        let table = MembershipTable::new();
        let n = node();
        let net = NetworkId::from("n1");
        table.join_network(n, net.clone(), 1);
        table.adjust_entry_count(&n, &net, 3);
        table.adjust_entry_count(&n, &net, -1);
        assert_eq!(table.attachment(&n, &net).unwrap().entries_number, 2);
    }

    #[test]
    fn leaving_attachments_lists_only_leaving_state() {
        let table = MembershipTable::new();
        let n = node();
        let net_a = NetworkId::from("a");
        let net_b = NetworkId::from("b");
        table.join_network(n, net_a.clone(), 1);
        table.join_network(n, net_b.clone(), 1);
        table.leave_network(n, net_a.clone(), 2);

        let leaving = table.leaving_attachments();
        assert_eq!(leaving.len(), 1);
        assert_eq!(leaving[0].1, net_a);
        let _ = Duration::ZERO;
    }
}
