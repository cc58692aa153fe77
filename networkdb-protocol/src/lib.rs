//! # NetworkDB Wire Protocol
//!
//! This crate defines the message frames exchanged between NetworkDB nodes and
//! the identifiers that those frames carry. It has no knowledge of membership,
//! storage, or transport — it only knows how to name things (`NodeId`,
//! `NetworkId`, `LamportTime`) and how to turn messages into bytes and back.
//!
//! ## Wire format
//!
//! A frame on the wire is `type: u8 ‖ data: bytes`. `data` is the
//! `bincode`-encoded body of the matching [`Message`] variant. A
//! [`CompoundPayload`] packs several inner frames as `count: u8 ‖ (len: u16 ‖
//! body)*`, used both to amortize per-packet overhead on the gossip path and
//! to carry the table-event list inside a [`BulkSyncPayload`].

mod codec;
mod ids;
mod message;

pub use codec::{decode_frame, encode_frame, pack_into_compounds, ProtocolError};
pub use ids::{EntryKey, LamportTime, NetworkId, NodeId, TableName};
pub use message::{
    BulkSyncPayload, CompoundPayload, Message, MessageKind, NetworkEventKind, NetworkEventPayload,
    NodeEventKind, NodeEventPayload, PushPullEntry, PushPullPayload, TableEventKind,
    TableEventPayload,
};
