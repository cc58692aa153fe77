//! Watch/broadcaster (§4.8): local subscribers are notified of every table
//! mutation this node applies, whether it originated locally or arrived
//! over gossip. `Watch(table, nid)` (§6.1) takes optional table/network
//! wildcard filters and hands back a cancel handle distinct from the
//! receiver itself, so a subscriber can be torn down explicitly instead of
//! relying on the receiver's `Drop` impl.

use std::sync::Mutex;

use networkdb_protocol::{EntryKey, NetworkId, TableEventKind, TableName};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub table: TableName,
    pub network: NetworkId,
    pub key: EntryKey,
    pub value: Vec<u8>,
    /// The table-event kind exactly as applied (no quirk applied here).
    /// `networkdb-core`'s driver-notify surface (§6.4) derives its own
    /// legacy-mapped event type from this; `Watch` (§6.1) exposes it as-is.
    pub kind: TableEventKind,
    pub deleted: bool,
}

const CHANNEL_CAPACITY: usize = 1024;

/// Cancels a filtered subscription started by [`Broadcaster::subscribe_filtered`].
/// Dropping this handle without calling [`Self::cancel`] leaves the forwarding
/// task running for as long as the receiver end is still held — `cancel` is
/// the explicit, immediate version §6.1's `Watch` signature calls for.
pub struct WatchHandle {
    forward: JoinHandle<()>,
}

impl WatchHandle {
    pub fn cancel(self) {
        self.forward.abort();
    }
}

pub struct Broadcaster {
    sender: Mutex<Option<broadcast::Sender<WatchEvent>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<WatchEvent>> {
        self.sender.lock().unwrap().as_ref().map(|s| s.subscribe())
    }

    /// Subscribe with optional table/network wildcard filters (§6.1 `Watch`).
    /// Spawns a small forwarding task that drops non-matching events and
    /// relays the rest into a bounded mpsc channel, so a slow consumer can't
    /// block the publisher the way a direct broadcast subscriber would once
    /// the ring buffer lags. If the broadcaster has already been shut down,
    /// the returned receiver is closed immediately.
    pub fn subscribe_filtered(
        &self,
        table: Option<TableName>,
        network: Option<NetworkId>,
    ) -> (mpsc::Receiver<WatchEvent>, WatchHandle) {
        let source = self.subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let forward = tokio::spawn(async move {
            let Some(mut source) = source else { return };
            loop {
                match source.recv().await {
                    Ok(event) => {
                        let table_matches = table.as_ref().map(|t| *t == event.table).unwrap_or(true);
                        let network_matches = network.as_ref().map(|n| *n == event.network).unwrap_or(true);
                        if table_matches && network_matches && tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        (rx, WatchHandle { forward })
    }

    /// Publish an event. Silently dropped if nobody is currently watching,
    /// or if the broadcaster has been shut down (a lagging/absent receiver
    /// is not this node's problem to solve).
    pub fn publish(&self, event: WatchEvent) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }

    /// Drop the underlying broadcast sender, closing every outstanding
    /// subscription: filtered forwarders observe `RecvError::Closed` and
    /// exit, their mpsc receivers then read as closed too. Called once, on
    /// [`crate::ReplicationEngine`] shutdown (§5 Close). Idempotent.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap().take();
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let broadcaster = Broadcaster::new();
        let (mut rx, _handle) = broadcaster.subscribe_filtered(None, None);
        broadcaster.publish(WatchEvent {
            table: "t".into(),
            network: "n".into(),
            key: "k".into(),
            value: vec![1, 2, 3],
            kind: networkdb_protocol::TableEventKind::Create,
            deleted: false,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn filtered_subscriber_ignores_non_matching_table() {
        let broadcaster = Broadcaster::new();
        let (mut rx, _handle) = broadcaster.subscribe_filtered(Some("wanted".into()), None);
        broadcaster.publish(WatchEvent {
            table: "other".into(),
            network: "n".into(),
            key: "k".into(),
            value: vec![1],
            kind: networkdb_protocol::TableEventKind::Create,
            deleted: false,
        });
        broadcaster.publish(WatchEvent {
            table: "wanted".into(),
            network: "n".into(),
            key: "k".into(),
            value: vec![2],
            kind: networkdb_protocol::TableEventKind::Create,
            deleted: false,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.value, vec![2]);
    }

    #[tokio::test]
    async fn shutdown_closes_outstanding_subscriptions() {
        let broadcaster = Broadcaster::new();
        let (mut rx, _handle) = broadcaster.subscribe_filtered(None, None);
        broadcaster.shutdown();
        assert!(rx.recv().await.is_none());
    }
}
