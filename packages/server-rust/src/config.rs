//! `SamoaConfig`: the node's static configuration, loaded once at startup
//! and wrapped into a [`samoa_core::Context`]-adjacent `Config` so nothing
//! downstream reaches for a process global. Field shape and defaults follow
//! the original implementation's `config.json` schema and the teacher's
//! `ServerConfig` convention of one flat struct with `Default`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default replication factor for newly created tables.
pub const DEFAULT_REPLICATION_FACTOR: u32 = 3;

/// Default consistency horizon `H`: how long a partition clock entry is
/// kept before being eligible for pruning.
pub const DEFAULT_CONSISTENCY_HORIZON_SECS: u64 = 60 * 60 * 24;

/// Default byte length of a fresh hash-ring layer.
pub const DEFAULT_LAYER_REGION_SIZE: u64 = 64 * 1024 * 1024;

/// Default hash-chain index slot count per layer.
pub const DEFAULT_LAYER_INDEX_SIZE: u32 = 1 << 16;

/// Default digest filter size in bytes.
pub const DEFAULT_DIGEST_BYTE_LENGTH: u32 = 1 << 20;

/// Default peer connect timeout (§5: "60s default peer connect-timeout").
pub const DEFAULT_PEER_CONNECT_TIMEOUT_MS: u64 = 60_000;

/// Default idle connection timeout.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 300_000;

/// Default cap on in-flight requests, for backpressure (§5).
pub const DEFAULT_MAX_IN_FLIGHT_REQUESTS: u32 = 1024;

/// Fixed cap on a single data block's size (§5: "4MiB data-block cap").
pub const MAX_DATA_BLOCK_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamoaConfig {
    /// Stable identity of this node, used as the default author id seed
    /// for locally originated clock ticks.
    pub node_id: String,
    pub replication_factor: u32,
    pub consistency_horizon_secs: u64,
    pub layer_region_size: u64,
    pub layer_index_size: u32,
    pub digest_byte_length: u32,
    pub peer_connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_in_flight_requests: u32,
    /// Directory under which ring and digest files for this node are
    /// stored.
    pub data_dir: String,
}

impl SamoaConfig {
    #[must_use]
    pub fn peer_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_connect_timeout_ms)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub fn consistency_horizon(&self) -> Duration {
        Duration::from_secs(self.consistency_horizon_secs)
    }
}

impl Default for SamoaConfig {
    fn default() -> Self {
        Self {
            node_id: "samoa-node".to_string(),
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            consistency_horizon_secs: DEFAULT_CONSISTENCY_HORIZON_SECS,
            layer_region_size: DEFAULT_LAYER_REGION_SIZE,
            layer_index_size: DEFAULT_LAYER_INDEX_SIZE,
            digest_byte_length: DEFAULT_DIGEST_BYTE_LENGTH,
            peer_connect_timeout_ms: DEFAULT_PEER_CONNECT_TIMEOUT_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_in_flight_requests: DEFAULT_MAX_IN_FLIGHT_REQUESTS,
            data_dir: "./data".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = SamoaConfig::default();
        assert_eq!(config.replication_factor, 3);
        assert_eq!(config.peer_connect_timeout_ms, 60_000);
    }

    #[test]
    fn duration_helpers_convert_from_millis_and_secs() {
        let config = SamoaConfig::default();
        assert_eq!(config.peer_connect_timeout(), Duration::from_secs(60));
        assert_eq!(config.consistency_horizon(), Duration::from_secs(DEFAULT_CONSISTENCY_HORIZON_SECS));
    }
}
