//! Single point of entry for any decoded [`Message`], whether it arrived
//! best-effort over UDP (gossip, no reply expected) or reliably over TCP
//! (push/pull, bulk sync — both request/reply). Keeps the two receive loops
//! in `networkdb-core` from having to know which handler method goes with
//! which variant.

use networkdb_protocol::Message;

use crate::engine::ReplicationEngine;

impl ReplicationEngine {
    /// Apply a message that arrived with no expectation of a reply (UDP
    /// gossip). `PushPull`/`BulkSync` frames received this way are still
    /// applied, just without answering back.
    pub fn dispatch_unsolicited(&self, message: Message) {
        match message {
            Message::NodeEvent(event) => {
                self.handle_node_event(&event);
            }
            Message::NetworkEvent(event) => {
                self.handle_network_event(&event);
            }
            Message::TableEvent(event) => {
                self.handle_table_event(&event, false);
            }
            Message::BulkSync(payload) => {
                self.apply_bulk_sync(&payload);
            }
            Message::PushPull(payload) => {
                self.apply_push_pull(&payload);
            }
            Message::Compound(compound) => {
                for frame in compound.frames {
                    match networkdb_protocol::decode_frame(&frame) {
                        Ok(inner) => self.dispatch_unsolicited(inner),
                        Err(err) => tracing::warn!(%err, "dropping undecodable frame inside compound"),
                    }
                }
            }
        }
    }

    /// Apply a message that arrived over a reliable (TCP) connection and
    /// expects a reply frame back, if any. `None` means "no reply, close
    /// the connection" — the right answer for anything except push/pull and
    /// bulk sync.
    pub fn dispatch_request(&self, message: Message) -> Option<Message> {
        match message {
            Message::PushPull(payload) => Some(Message::PushPull(self.handle_push_pull_request(&payload))),
            Message::BulkSync(payload) => self.handle_bulk_sync_request(&payload).map(Message::BulkSync),
            other => {
                self.dispatch_unsolicited(other);
                None
            }
        }
    }
}
