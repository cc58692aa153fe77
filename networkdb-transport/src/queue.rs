//! Per-network, rate-limited gossip transmit queues (§4.4, §4.6.7).
//!
//! Every queued broadcast carries a dedup key; queuing a new broadcast
//! under a key already present supersedes the old one (e.g. a second
//! update to the same entry replaces the first before it ever goes out).
//! Each broadcast is retransmitted a bounded number of times —
//! `retransmit_mult * ceil(log2(cluster_size + 1))` — after which it is
//! dropped: the assumption is that `retransmit_mult` rounds of gossip are
//! enough for the update to have reached everyone already.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct QueuedBroadcast {
    dedup_key: String,
    frame: Vec<u8>,
    transmits: u32,
}

pub struct TransmitQueue {
    retransmit_mult: u32,
    items: Mutex<Vec<QueuedBroadcast>>,
    by_key: Mutex<HashMap<String, usize>>,
}

impl TransmitQueue {
    pub fn new(retransmit_mult: u32) -> Self {
        Self {
            retransmit_mult,
            items: Mutex::new(Vec::new()),
            by_key: Mutex::new(HashMap::new()),
        }
    }

    fn max_transmits(&self, cluster_size: usize) -> u32 {
        let n = (cluster_size as f64 + 1.0).ln().max(0.0) / std::f64::consts::LN_2;
        (self.retransmit_mult as f64 * n.ceil()).ceil().max(1.0) as u32
    }

    /// Queue `frame` under `dedup_key`, replacing any not-yet-sent broadcast
    /// already queued under the same key.
    pub fn queue_broadcast(&self, dedup_key: impl Into<String>, frame: Vec<u8>) {
        let dedup_key = dedup_key.into();
        let mut items = self.items.lock().unwrap();
        let mut by_key = self.by_key.lock().unwrap();

        if let Some(&idx) = by_key.get(&dedup_key) {
            items[idx] = QueuedBroadcast {
                dedup_key: dedup_key.clone(),
                frame,
                transmits: 0,
            };
            return;
        }

        items.push(QueuedBroadcast {
            dedup_key: dedup_key.clone(),
            frame,
            transmits: 0,
        });
        by_key.insert(dedup_key, items.len() - 1);
    }

    /// Pop up to `max_bytes` worth of broadcasts, least-transmitted first,
    /// bumping their transmit counters and dropping any that have now
    /// exhausted their retransmit budget for the current cluster size.
    pub fn get_broadcasts(&self, max_bytes: usize, cluster_size: usize) -> Vec<Vec<u8>> {
        let max_transmits = self.max_transmits(cluster_size);
        let mut items = self.items.lock().unwrap();
        items.sort_by_key(|item| item.transmits);

        let mut out = Vec::new();
        let mut budget = max_bytes;
        let mut survivors = Vec::with_capacity(items.len());

        for mut item in items.drain(..) {
            if item.frame.len() <= budget {
                budget -= item.frame.len();
                out.push(item.frame.clone());
                item.transmits += 1;
            }
            if item.transmits < max_transmits {
                survivors.push(item);
            }
        }

        *items = survivors;
        let mut by_key = self.by_key.lock().unwrap();
        by_key.clear();
        for (idx, item) in items.iter().enumerate() {
            by_key.insert(item.dedup_key.clone(), idx);
        }

        out
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_then_get_broadcasts_respects_byte_budget() {
        let q = TransmitQueue::new(3);
        q.queue_broadcast("a", vec![0u8; 10]);
        q.queue_broadcast("b", vec![0u8; 10]);
        let batch = q.get_broadcasts(15, 5);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn queuing_same_dedup_key_replaces_pending_broadcast() {
        let q = TransmitQueue::new(3);
        q.queue_broadcast("a", vec![1, 2, 3]);
        q.queue_broadcast("a", vec![4, 5]);
        assert_eq!(q.len(), 1);
        let batch = q.get_broadcasts(100, 1);
        assert_eq!(batch, vec![vec![4, 5]]);
    }

    #[test]
    fn broadcasts_are_dropped_after_exhausting_retransmit_budget() {
        let q = TransmitQueue::new(1);
        q.queue_broadcast("a", vec![1]);
        // cluster_size=0 -> max_transmits = ceil(1 * ceil(ln(1)/ln2)) = max(.., 1) = 1
        let _ = q.get_broadcasts(100, 0);
        assert!(q.is_empty());
    }

    #[test]
    fn larger_clusters_get_more_retransmits() {
        let q = TransmitQueue::new(4);
        assert!(q.max_transmits(1000) > q.max_transmits(1));
    }
}
