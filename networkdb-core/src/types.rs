//! Caller-facing error type and small public value types (§7, §6.1).

use networkdb_protocol::{EntryKey, NetworkId, NodeId, TableName};
use thiserror::Error;

/// Typed errors returned from the synchronous, user-initiated surface
/// (§6.1). Background workers never return this — they log and keep
/// converging (§7 "Propagation policy").
#[derive(Debug, Error)]
pub enum NetworkDbError {
    #[error("no entry for table={table} network={network} key={key}")]
    NotFound {
        table: TableName,
        network: NetworkId,
        key: EntryKey,
    },
    #[error("entry already exists and is live for table={table} network={network} key={key}")]
    AlreadyExists {
        table: TableName,
        network: NetworkId,
        key: EntryKey,
    },
    #[error("entry is already being deleted for table={table} network={network} key={key}")]
    AlreadyDeleting {
        table: TableName,
        network: NetworkId,
        key: EntryKey,
    },
    #[error(transparent)]
    Transport(#[from] networkdb_transport::TransportError),
    #[error(transparent)]
    Decode(#[from] networkdb_protocol::ProtocolError),
    #[error(transparent)]
    Keyring(#[from] networkdb_keyring::KeyRingError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// A cluster member as surfaced by `ClusterPeers`/`Peers` (§6.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: NodeId,
    pub name: String,
    pub ip: std::net::IpAddr,
}
