//! # NetworkDB Dual-Index Store
//!
//! This crate holds the in-memory record of every table entry NetworkDB
//! currently knows about, indexed two ways so the replication engine can
//! answer both "give me everything under this table" and "give me
//! everything under this network" without a scan:
//!
//! - by table:   `/<table>/<network>/<key>`
//! - by network: `/<network>/<table>/<key>`
//!
//! Both trees point at the *same* [`TableEntry`] record (wrapped in an
//! `Arc` so neither index owns it outright). Every mutating operation
//! touches both trees under a single lock, so a reader can never observe
//! one index updated and the other stale.
//!
//! There is deliberately no radix-tree crate dependency here: the example
//! corpus this workspace is built from has no persistent/immutable-trie
//! dependency anywhere in it (see `DESIGN.md`), so the dual index is a
//! plain `BTreeMap` keyed by the path string above — `BTreeMap::range`
//! gives the same prefix-walk-with-early-exit behavior a radix tree would,
//! at `O(log n)` per lookup, and the whole map is swapped behind an `Arc`
//! on every write so a long-running walk always sees one consistent
//! snapshot (the copy-on-write property §4.2 asks for).

mod entry;

pub use entry::TableEntry;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use networkdb_protocol::{EntryKey, NetworkId, TableName};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no entry for table={table} network={network} key={key}")]
    NotFound {
        table: String,
        network: String,
        key: String,
    },
}

/// Outcome of [`Store::upsert`]: whether the write created a brand new path
/// in each tree (as opposed to replacing an existing entry in place). The
/// caller uses this to keep a network attachment's `entries_number` counter
/// in sync (§4.2) without the store itself depending on the membership
/// crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted_in_table: bool,
    pub inserted_in_network: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub removed_from_table: bool,
    pub removed_from_network: bool,
}

#[derive(Default)]
struct Indexes {
    by_table: BTreeMap<String, Arc<TableEntry>>,
    by_network: BTreeMap<String, Arc<TableEntry>>,
}

fn table_path(table: &TableName, network: &NetworkId, key: &EntryKey) -> String {
    format!("/{}/{}/{}", table.0, network.0, key.0)
}

fn network_path(network: &NetworkId, table: &TableName, key: &EntryKey) -> String {
    format!("/{}/{}/{}", network.0, table.0, key.0)
}

/// Exclusive upper bound for a `BTreeMap::range` prefix scan: the smallest
/// string that is strictly greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.last() {
        if *last == 0xff {
            bytes.pop();
        } else {
            let new_last = *last + 1;
            bytes.pop();
            bytes.push(new_last);
            return String::from_utf8(bytes).expect("prefix bump stays valid utf8 for ascii-safe paths");
        }
    }
    // prefix was all 0xff bytes (never happens for our '/'-separated ids); fall back to unbounded.
    "\u{10FFFF}".repeat(4)
}

/// Dual radix-style index over all table entries this node currently holds.
pub struct Store {
    indexes: RwLock<Indexes>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
        }
    }

    pub fn get(&self, table: &TableName, network: &NetworkId, key: &EntryKey) -> Option<Arc<TableEntry>> {
        let path = table_path(table, network, key);
        self.indexes.read().unwrap().by_table.get(&path).cloned()
    }

    /// Insert or replace an entry, updating both trees atomically.
    pub fn upsert(
        &self,
        table: &TableName,
        network: &NetworkId,
        key: &EntryKey,
        entry: TableEntry,
    ) -> UpsertOutcome {
        let tpath = table_path(table, network, key);
        let npath = network_path(network, table, key);
        let record = Arc::new(entry);

        let mut indexes = self.indexes.write().unwrap();
        let inserted_in_table = indexes.by_table.insert(tpath, record.clone()).is_none();
        let inserted_in_network = indexes.by_network.insert(npath, record).is_none();
        debug_assert_eq!(
            inserted_in_table, inserted_in_network,
            "by-table and by-network index membership diverged"
        );
        UpsertOutcome {
            inserted_in_table,
            inserted_in_network,
        }
    }

    /// Remove an entry from both trees atomically.
    pub fn remove(&self, table: &TableName, network: &NetworkId, key: &EntryKey) -> RemoveOutcome {
        let tpath = table_path(table, network, key);
        let npath = network_path(network, table, key);

        let mut indexes = self.indexes.write().unwrap();
        let removed_from_table = indexes.by_table.remove(&tpath).is_some();
        let removed_from_network = indexes.by_network.remove(&npath).is_some();
        debug_assert_eq!(
            removed_from_table, removed_from_network,
            "by-table and by-network index membership diverged"
        );
        RemoveOutcome {
            removed_from_table,
            removed_from_network,
        }
    }

    /// Walk every entry under `table`, stopping early when `f` returns `true`.
    /// `f` receives `(network, key, entry)`.
    pub fn walk_by_table<F>(&self, table: &TableName, mut f: F)
    where
        F: FnMut(&NetworkId, &EntryKey, &TableEntry) -> bool,
    {
        let prefix = format!("/{}/", table.0);
        let indexes = self.indexes.read().unwrap();
        for (path, entry) in indexes.by_table.range(prefix.clone()..prefix_upper_bound(&prefix)) {
            let Some((network, key)) = split_after_prefix(path, &prefix) else {
                continue;
            };
            if f(&network, &key, entry) {
                break;
            }
        }
    }

    /// Walk every entry under `network`, stopping early when `f` returns `true`.
    /// `f` receives `(table, key, entry)`.
    pub fn walk_by_network<F>(&self, network: &NetworkId, mut f: F)
    where
        F: FnMut(&TableName, &EntryKey, &TableEntry) -> bool,
    {
        let prefix = format!("/{}/", network.0);
        let indexes = self.indexes.read().unwrap();
        for (path, entry) in indexes.by_network.range(prefix.clone()..prefix_upper_bound(&prefix)) {
            let Some((table, key)) = split_after_prefix(path, &prefix) else {
                continue;
            };
            if f(&table, &key, entry) {
                break;
            }
        }
    }

    /// Number of entries (including tombstones) currently indexed under `network`.
    pub fn network_entry_count(&self, network: &NetworkId) -> usize {
        let prefix = format!("/{}/", network.0);
        let indexes = self.indexes.read().unwrap();
        indexes
            .by_network
            .range(prefix.clone()..prefix_upper_bound(&prefix))
            .count()
    }
}

/// Split `/<first>/<rest>` (with the known `prefix` already stripped off the
/// front) back into its two remaining path segments.
fn split_after_prefix<A, B>(path: &str, prefix: &str) -> Option<(A, B)>
where
    A: From<String>,
    B: From<String>,
{
    let rest = path.strip_prefix(prefix)?;
    let (first, second) = rest.split_once('/')?;
    Some((A::from(first.to_string()), B::from(second.to_string())))
}
