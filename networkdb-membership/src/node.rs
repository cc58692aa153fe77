use networkdb_protocol::LamportTime;

/// Liveness state of a cluster peer as last witnessed by the failure
/// detector or a gossiped node event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Active,
    Failed,
    Left,
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub hostname: String,
    pub status: NodeStatus,
    pub ltime: LamportTime,
}
