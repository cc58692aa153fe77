//! Configuration management (§6.2).
//!
//! Follows the teacher's `AerolithsConfig` shape: one nested struct per
//! functional area, each with its own `Default` impl carrying the
//! documented defaults, the whole thing `Serialize`/`Deserialize` so it can
//! be loaded from a JSON file or built programmatically.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use networkdb_keyring::GossipKey;

/// Root configuration for a `NetworkDb` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDbConfig {
    pub node: NodeConfig,
    pub transport: TransportConfig,
    pub encryption: EncryptionConfig,
    pub reaper: ReaperConfig,
    pub rejoin: RejoinConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl NetworkDbConfig {
    /// Load from `config.json` in the current directory, writing a fresh
    /// default file the first time there isn't one — same fallback the
    /// teacher's config loader uses.
    pub async fn load() -> Result<Self> {
        match tokio::fs::read_to_string("config.json").await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(_) => {
                let default_config = Self::default();
                default_config.save().await?;
                Ok(default_config)
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write("config.json", content).await?;
        Ok(())
    }
}

impl Default for NetworkDbConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            transport: TransportConfig::default(),
            encryption: EncryptionConfig::default(),
            reaper: ReaperConfig::default(),
            rejoin: RejoinConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

/// Node identity (§6.2 "node identity").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `None` means generate a random id, matching spec's documented default.
    pub node_id: Option<Uuid>,
    /// `None` means use the OS hostname.
    pub hostname: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            hostname: None,
        }
    }
}

/// Transport binding (§6.2 "transport").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub bind_addr: String,
    /// 0 means auto-assign.
    pub bind_port: u16,
    pub advertise_addr: Option<SocketAddr>,
    pub packet_buffer_size: usize,
    /// How many times a gossip broadcast is retransmitted, scaled by
    /// cluster size (§4.4). Not itself a §6.2 option; carried here because
    /// it is a transport-layer tunable with no better home.
    pub retransmit_mult: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 0,
            advertise_addr: None,
            packet_buffer_size: networkdb_transport::MAX_UDP_PAYLOAD,
            retransmit_mult: 4,
        }
    }
}

/// Encryption (§6.2 "encryption", §4.9, §8.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Ordered list; index 0 is primary. Empty means "generate one key at
    /// startup" — the key-ring invariant (§8) that the sorted list is never
    /// empty once encryption is configured is upheld either way.
    pub keys: Vec<[u8; 32]>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self { keys: Vec::new() }
    }
}

/// Reaper timing (§6.2 "reaper", §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    pub reap_entry_interval: Duration,
    /// How often the entry/attachment sweep runs. `reap_network_interval` is
    /// derived from this and `reap_entry_interval` (§6.2 invariant), not
    /// independently configurable.
    pub reap_period: Duration,
    /// How long a failed/left node's bookkeeping (peer address, departure
    /// deadline) is kept before being forgotten. Deliberately much longer
    /// than `reap_entry_interval` — a flapping node rejoining should still
    /// find its old address remembered.
    pub reap_node_interval: Duration,
    /// How often the node sweep runs. Coarser than `reap_period`: node
    /// bookkeeping is cheap to keep around and expensive to re-learn, so
    /// there's no benefit to sweeping it on the same tight cadence as
    /// tombstones.
    pub reap_node_period: Duration,
}

impl ReaperConfig {
    /// `reapEntryInterval + 5 * reapPeriod`, exactly per §6.2's invariant —
    /// networks need longer to reap than entries so a flapping rejoin
    /// doesn't race the attachment out from under a slow bulk sync.
    pub fn reap_network_interval(&self) -> Duration {
        self.reap_entry_interval + self.reap_period * 5
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            reap_entry_interval: Duration::from_secs(30 * 60),
            reap_period: Duration::from_secs(5),
            reap_node_interval: Duration::from_secs(24 * 60 * 60),
            reap_node_period: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Rejoin loop timing (§6.2 "rejoin", §9 "coroutine-style flow").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejoinConfig {
    pub rejoin_cluster_duration: Duration,
    pub rejoin_cluster_interval: Duration,
}

impl Default for RejoinConfig {
    fn default() -> Self {
        Self {
            rejoin_cluster_duration: Duration::from_secs(10),
            rejoin_cluster_interval: Duration::from_secs(60),
        }
    }
}

/// Periodic diagnostic logging (§6.2 "diagnostics"). Observability, carried
/// regardless of spec.md's metrics non-goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    pub stats_print_period: Duration,
    pub health_print_period: Duration,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            stats_print_period: Duration::from_secs(5 * 60),
            health_print_period: Duration::from_secs(60),
        }
    }
}

/// Where a node's on-disk data would live if this workspace grows
/// persistent storage; unused today but kept so `NodeConfig` callers that
/// expect a data directory (per the teacher's layout) have somewhere to put
/// future wallet/snapshot files.
pub fn default_data_dir() -> PathBuf {
    PathBuf::from(".networkdb")
}

pub(crate) fn encryption_keys_or_random(config: &EncryptionConfig) -> Vec<GossipKey> {
    if config.keys.is_empty() {
        let mut bytes = [0u8; 32];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut bytes);
        vec![GossipKey::new(bytes, 1)]
    } else {
        config
            .keys
            .iter()
            .enumerate()
            .map(|(i, bytes)| GossipKey::new(*bytes, i as u64 + 1))
            .collect()
    }
}
