use std::time::Duration;

use serde::{Deserialize, Serialize};

use networkdb_protocol::{LamportTime, NodeId};

/// A single (table, network, key) value and the bookkeeping needed to
/// reconcile it against the rest of the cluster (§3 "Table entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub value: Vec<u8>,
    pub owner: NodeId,
    pub ltime: LamportTime,
    pub deleting: bool,
    pub reap_time: Duration,
}

impl TableEntry {
    pub fn live(owner: NodeId, ltime: LamportTime, value: Vec<u8>) -> Self {
        Self {
            value,
            owner,
            ltime,
            deleting: false,
            reap_time: Duration::ZERO,
        }
    }

    pub fn tombstone(owner: NodeId, ltime: LamportTime, value: Vec<u8>, reap_time: Duration) -> Self {
        debug_assert!(reap_time > Duration::ZERO, "tombstones must carry reap_time > 0");
        Self {
            value,
            owner,
            ltime,
            deleting: true,
            reap_time,
        }
    }
}
