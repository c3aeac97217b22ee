//! Cluster-state ownership and peer discovery (§4.8): the mutable,
//! merge-aware counterpart to `samoa_core::routing`'s read-only shapes.

pub mod discovery;
pub mod state;

pub use discovery::DiscoveryTick;
pub use state::ClusterStateStore;
