use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for an [`EntityStore`](crate::EntityStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Age after which a cached reference resolution is stale (ms).
    pub reference_ttl_ms: i64,
    /// Upper bound for one reference target lookup (ms).
    pub resolve_timeout_ms: u64,
    /// Rows fetched per round-trip by `list`.
    pub list_batch_size: usize,
    /// Keep at most this many history records per entity. `None` keeps all.
    pub history_retention: Option<usize>,
    /// Period of the background reconciliation pass (ms).
    pub reconcile_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reference_ttl_ms: 5 * 60 * 1000,
            resolve_timeout_ms: 2_000,
            list_batch_size: 256,
            history_retention: None,
            reconcile_interval_ms: 30_000,
        }
    }
}

impl StoreConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms.max(1))
    }

    /// Parses a JSON config document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
