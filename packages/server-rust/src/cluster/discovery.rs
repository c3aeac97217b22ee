//! Peer discovery (§4.8): periodically exchanges `ClusterState` with a
//! tracked peer and folds the reply in through [`super::state`]'s merge
//! rules. The actual network round-trip is out of scope (§1); this module
//! provides the scheduling and merge-application shape a transport layer
//! drives.

use std::time::Duration;

use samoa_core::routing::ClusterState;
use uuid::Uuid;

use super::state::ClusterStateStore;

/// Default interval between discovery exchanges with any one peer.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// The outcome of one discovery exchange, useful for logging/metrics at
/// the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryTick {
    pub peer_uuid: Uuid,
    pub tables_before: usize,
    pub tables_after: usize,
    pub peers_before: usize,
    pub peers_after: usize,
}

/// Applies one peer's exchanged state into `store`, returning a summary of
/// what changed. Called once per discovery round per tracked peer; callers
/// are expected to serialize calls to `store` through a single task (see
/// `ClusterStateStore`'s doc comment).
pub fn apply_exchange(
    store: &mut ClusterStateStore,
    peer_uuid: Uuid,
    remote: &ClusterState,
    now_lamport_ts: u64,
) -> DiscoveryTick {
    let tables_before = store.state().tables.len();
    let peers_before = store.state().peers.len();

    store.merge(remote, now_lamport_ts);

    DiscoveryTick {
        peer_uuid,
        tables_before,
        tables_after: store.state().tables.len(),
        peers_before,
        peers_after: store.state().peers.len(),
    }
}

/// The list of peer uuids due for a discovery exchange right now: every
/// tracked, non-dropped peer other than the local node itself. Seed peers
/// are always included even if otherwise unreferenced, since
/// `required_peer_uuids` keeps them from ever being pruned.
#[must_use]
pub fn due_peers(store: &ClusterStateStore) -> Vec<Uuid> {
    let local = store.state().local_uuid;
    store.state().peers.iter().filter(|p| !p.dropped && p.uuid != local).map(|p| p.uuid).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use samoa_core::routing::{DataType, Partition, PeerServer, Table};

    fn remote_state(local: Uuid) -> ClusterState {
        ClusterState {
            local_uuid: local,
            peers: vec![PeerServer { uuid: local, address: "peer:1".into(), lamport_ts: 1, dropped: false, seed: true }],
            tables: vec![Table {
                uuid: Uuid::from_bytes([9; 16]),
                name: "t".into(),
                data_type: DataType::Blob,
                replication_factor: 1,
                consistency_horizon_secs: 60,
                ring: vec![Partition {
                    uuid: Uuid::from_bytes([1; 16]),
                    server_uuid: local,
                    ring_position: 1,
                    range_begin: 0,
                    range_end: 0,
                    consistent_range_begin: 0,
                    consistent_range_end: 0,
                    lamport_ts: 1,
                    is_tracked: true,
                    dropped: false,
                }],
                lamport_ts: 1,
                dropped: false,
            }],
        }
    }

    #[test]
    fn exchange_grows_local_state_from_empty() {
        let mut store = ClusterStateStore::new(Uuid::from_bytes([0; 16]));
        let peer = Uuid::from_bytes([1; 16]);
        let tick = apply_exchange(&mut store, peer, &remote_state(peer), 5);
        assert_eq!(tick.tables_before, 0);
        assert_eq!(tick.tables_after, 1);
        assert_eq!(tick.peers_after, 1);
    }

    #[test]
    fn due_peers_excludes_local_and_dropped() {
        let mut store = ClusterStateStore::new(Uuid::from_bytes([0; 16]));
        let peer = Uuid::from_bytes([1; 16]);
        apply_exchange(&mut store, peer, &remote_state(peer), 5);
        assert_eq!(due_peers(&store), vec![peer]);
    }
}
