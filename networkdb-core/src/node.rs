//! Node identity (§6.2 "node identity").
//!
//! NetworkDB has no cryptographic node identity of its own — encryption is
//! keyed entirely off the shared [`networkdb_keyring::KeyRing`] (§4.9), not
//! per-node keys — so this is a plain identity/metadata record, unlike the
//! teacher's `NodeIdentity` which also carried signing/box keypairs.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use networkdb_protocol::NodeId;
use uuid::Uuid;

use crate::config::NodeConfig;

/// This node's own identity and advertised address.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: NodeId,
    pub hostname: String,
    pub address: SocketAddr,
    pub started_at: DateTime<Utc>,
}

impl NodeInfo {
    pub fn new(config: &NodeConfig, address: SocketAddr) -> Self {
        let id = NodeId(config.node_id.unwrap_or_else(Uuid::new_v4));
        let hostname = config
            .hostname
            .clone()
            .or_else(|| hostname_from_os())
            .unwrap_or_else(|| format!("networkdb-{id}"));
        Self {
            id,
            hostname,
            address,
            started_at: Utc::now(),
        }
    }
}

fn hostname_from_os() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty())
}
