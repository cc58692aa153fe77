use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::ids::{EntryKey, LamportTime, NetworkId, NodeId, TableName};

/// A single frame exchanged between two NetworkDB nodes.
///
/// Tagged union over the wire (see [`crate::codec`]) rather than an
/// inheritance hierarchy — each variant is self-describing and carries its
/// own Lamport time where spec requires one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    NodeEvent(NodeEventPayload),
    NetworkEvent(NetworkEventPayload),
    TableEvent(TableEventPayload),
    BulkSync(BulkSyncPayload),
    Compound(CompoundPayload),
    PushPull(PushPullPayload),
}

/// The one-byte discriminant written before every frame's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    NodeEvent = 0,
    NetworkEvent = 1,
    TableEvent = 2,
    BulkSync = 3,
    Compound = 4,
    PushPull = 5,
}

impl MessageKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::NodeEvent),
            1 => Some(Self::NetworkEvent),
            2 => Some(Self::TableEvent),
            3 => Some(Self::BulkSync),
            4 => Some(Self::Compound),
            5 => Some(Self::PushPull),
            _ => None,
        }
    }

    pub fn of(message: &Message) -> Self {
        match message {
            Message::NodeEvent(_) => Self::NodeEvent,
            Message::NetworkEvent(_) => Self::NetworkEvent,
            Message::TableEvent(_) => Self::TableEvent,
            Message::BulkSync(_) => Self::BulkSync,
            Message::Compound(_) => Self::Compound,
            Message::PushPull(_) => Self::PushPull,
        }
    }
}

/// Node lifecycle events as observed by the failure detector or relayed by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEventKind {
    Join,
    Leave,
    Fail,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEventPayload {
    pub kind: NodeEventKind,
    pub ltime: LamportTime,
    pub node: NodeId,
    pub hostname: String,
    pub address: SocketAddr,
}

/// Network attachment events: a node joining or leaving a sub-cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEventKind {
    Join,
    Leave,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEventPayload {
    pub kind: NetworkEventKind,
    pub ltime: LamportTime,
    pub node: NodeId,
    pub network: NetworkId,
}

/// Create/update/delete of a single table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableEventKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEventPayload {
    pub kind: TableEventKind,
    pub ltime: LamportTime,
    pub node: NodeId,
    pub network: NetworkId,
    pub table: TableName,
    pub key: EntryKey,
    pub value: Vec<u8>,
    /// Residual reap time in whole seconds. Only meaningful for deletes; a
    /// value of 0 received from a legacy peer must be rewritten by the
    /// caller to the locally configured `reap_entry_interval` (§6.3).
    pub reap_time_secs: u32,
}

/// Reliable transfer of all entries for a set of networks to a single peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSyncPayload {
    pub ltime: LamportTime,
    /// `true` when sent proactively (periodic tick or join); `false` when
    /// sent in answer to an unsolicited bulk sync (§4.6.9).
    pub unsolicited: bool,
    pub origin: NodeId,
    pub networks: Vec<NetworkId>,
    pub entries: CompoundPayload,
}

/// N length-prefixed inner frames, packed to amortize per-packet overhead.
/// Used both on the wire (broadcasting a batch of queued events) and as the
/// entry list inside a [`BulkSyncPayload`].
///
/// Serialized by hand (see [`crate::codec`]) as `count: u8 ‖ (len: u16 ‖
/// body)*` rather than through `bincode`'s derive, so that the on-wire shape
/// matches §6.3 exactly even though it is nested inside a `bincode`-encoded
/// envelope as an opaque byte string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundPayload {
    pub frames: Vec<Vec<u8>>,
}

impl Serialize for CompoundPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&crate::codec::pack_compound(&self.frames))
    }
}

impl<'de> Deserialize<'de> for CompoundPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        let frames = crate::codec::unpack_compound(&bytes).map_err(serde::de::Error::custom)?;
        Ok(CompoundPayload { frames })
    }
}

/// State handed to a newly joined cluster peer: the sender's own identity
/// and network attachments, so the receiver can synthesize the matching
/// node-join and network join/leave events (§4.6.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPullPayload {
    pub ltime: LamportTime,
    pub node: NodeId,
    pub hostname: String,
    pub address: SocketAddr,
    pub networks: Vec<PushPullEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPullEntry {
    pub network: NetworkId,
    pub ltime: LamportTime,
    pub leaving: bool,
}
