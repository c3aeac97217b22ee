//! The single-writer cluster-state transaction service (§4.8): owns the
//! node's view of `Table`s and peer `PeerServer`s and applies the merge
//! rules used both for incoming peer-gossip replies and for locally issued
//! changes (e.g. provisioning a table). Grounded on the original
//! `cluster_state` actor's serialized-apply design -- every mutation goes
//! through one exclusive `&mut self` path, so no internal locking is
//! needed as long as callers route through a single task (the teacher's
//! `cluster/state.rs` made the same choice with its single-writer
//! `DashMap`/`ArcSwap` pairing; here the exclusivity is structural instead).

use std::collections::HashSet;

use samoa_core::routing::{ClusterState, PeerServer, Table};
use uuid::Uuid;

/// Owns one node's `ClusterState` and exposes the merge operations that
/// keep it converging with peers' views.
pub struct ClusterStateStore {
    state: ClusterState,
}

impl ClusterStateStore {
    #[must_use]
    pub fn new(local_uuid: Uuid) -> Self {
        Self { state: ClusterState { local_uuid, peers: vec![], tables: vec![] } }
    }

    #[must_use]
    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    /// Merges a peer's exchanged `ClusterState` into this node's own,
    /// applying the table and peer merge rules (§4.8) and then pruning any
    /// peer no longer referenced by a tracked partition (seed peers are
    /// exempt).
    pub fn merge(&mut self, remote: &ClusterState, now_lamport_ts: u64) {
        merge_tables(&mut self.state.tables, &remote.tables);
        merge_peers(&mut self.state.peers, &remote.peers);
        let required = required_peer_uuids(&self.state.tables);
        mark_unreferenced_peers_dropped(&mut self.state.peers, &required, now_lamport_ts);
    }

    /// Registers (or updates) a table produced locally, e.g. by a
    /// provisioning request. Uses the same lamport-gated merge as a remote
    /// table so a later gossip round can't undo a concurrent local change
    /// that actually happened first.
    pub fn apply_local_table(&mut self, table: Table) {
        merge_tables(&mut self.state.tables, std::slice::from_ref(&table));
    }
}

/// Merges `remote` tables into `local`: tables present only remotely are
/// adopted outright; tables present in both are merged field-by-field,
/// gated on `lamport_ts` so a stale remote copy can never regress a newer
/// local one. A `dropped` table is kept (as a tombstone) rather than
/// removed, so the drop itself continues to propagate.
pub fn merge_tables(local: &mut Vec<Table>, remote: &[Table]) {
    for remote_table in remote {
        match local.iter_mut().find(|t| t.uuid == remote_table.uuid) {
            None => local.push(remote_table.clone()),
            Some(local_table) => merge_one_table(local_table, remote_table),
        }
    }
}

fn merge_one_table(local: &mut Table, remote: &Table) {
    if remote.lamport_ts > local.lamport_ts {
        local.name = remote.name.clone();
        local.data_type = remote.data_type;
        local.replication_factor = remote.replication_factor;
        local.consistency_horizon_secs = remote.consistency_horizon_secs;
        local.dropped = remote.dropped;
        local.lamport_ts = remote.lamport_ts;
    }
    merge_partitions(&mut local.ring, &remote.ring);
}

/// Merges a table's partition list linearly by partition uuid, then
/// re-sorts by `ring_position` since routing's binary search assumes
/// sorted order.
fn merge_partitions(local: &mut Vec<samoa_core::routing::Partition>, remote: &[samoa_core::routing::Partition]) {
    for remote_partition in remote {
        match local.iter_mut().find(|p| p.uuid == remote_partition.uuid) {
            None => local.push(remote_partition.clone()),
            Some(local_partition) => {
                if remote_partition.lamport_ts > local_partition.lamport_ts {
                    *local_partition = remote_partition.clone();
                }
            }
        }
    }
    local.sort_by_key(|p| p.ring_position);
}

/// Merges `remote` peers into `local` the same way: lamport-gated
/// field copy, adoption of peers seen only remotely.
pub fn merge_peers(local: &mut Vec<PeerServer>, remote: &[PeerServer]) {
    for remote_peer in remote {
        match local.iter_mut().find(|p| p.uuid == remote_peer.uuid) {
            None => local.push(remote_peer.clone()),
            Some(local_peer) => {
                if remote_peer.lamport_ts > local_peer.lamport_ts {
                    local_peer.address = remote_peer.address.clone();
                    local_peer.dropped = remote_peer.dropped;
                    local_peer.lamport_ts = remote_peer.lamport_ts;
                    // `seed` only ever grows more true: a peer added as a
                    // seed in any exchanged view stays exempt from pruning.
                    local_peer.seed = local_peer.seed || remote_peer.seed;
                }
            }
        }
    }
}

/// The set of server uuids any live (non-dropped) partition still points
/// to -- the peers this node must keep a connection-worthy record of.
#[must_use]
pub fn required_peer_uuids(tables: &[Table]) -> HashSet<Uuid> {
    tables
        .iter()
        .filter(|t| !t.dropped)
        .flat_map(|t| t.ring.iter())
        .filter(|p| !p.dropped)
        .map(|p| p.server_uuid)
        .collect()
}

/// Marks any peer no longer in `required` as dropped, unless it's a seed
/// peer (seed peers are kept regardless of current table references, per
/// §4.8's seed-peer exemption) or already dropped.
pub fn mark_unreferenced_peers_dropped(peers: &mut [PeerServer], required: &HashSet<Uuid>, now_lamport_ts: u64) {
    for peer in peers.iter_mut() {
        if !peer.dropped && !peer.seed && !required.contains(&peer.uuid) {
            peer.dropped = true;
            peer.lamport_ts = now_lamport_ts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samoa_core::routing::{DataType, Partition};

    fn partition(uuid: u8, server: u8, ts: u64) -> Partition {
        Partition {
            uuid: Uuid::from_bytes([uuid; 16]),
            server_uuid: Uuid::from_bytes([server; 16]),
            ring_position: u64::from(uuid),
            range_begin: 0,
            range_end: 0,
            consistent_range_begin: 0,
            consistent_range_end: 0,
            lamport_ts: ts,
            is_tracked: true,
            dropped: false,
        }
    }

    fn table(uuid: u8, ts: u64, ring: Vec<Partition>) -> Table {
        Table {
            uuid: Uuid::from_bytes([uuid; 16]),
            name: "t".to_string(),
            data_type: DataType::Blob,
            replication_factor: 1,
            consistency_horizon_secs: 60,
            ring,
            lamport_ts: ts,
            dropped: false,
        }
    }

    #[test]
    fn remote_only_table_is_adopted() {
        let mut local = vec![];
        let remote = vec![table(1, 5, vec![])];
        merge_tables(&mut local, &remote);
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn stale_remote_table_does_not_regress_local_metadata() {
        let mut local = vec![table(1, 10, vec![])];
        local[0].name = "newer".to_string();
        let remote = vec![table(1, 5, vec![])];
        merge_tables(&mut local, &remote);
        assert_eq!(local[0].name, "newer");
    }

    #[test]
    fn newer_remote_table_overwrites_local_metadata() {
        let mut local = vec![table(1, 5, vec![])];
        let mut remote_table = table(1, 10, vec![]);
        remote_table.name = "renamed".to_string();
        merge_tables(&mut local, std::slice::from_ref(&remote_table));
        assert_eq!(local[0].name, "renamed");
    }

    #[test]
    fn partitions_merge_and_stay_sorted_by_ring_position() {
        let mut local = vec![table(1, 5, vec![partition(2, 1, 1)])];
        let remote = vec![table(1, 5, vec![partition(1, 1, 1), partition(2, 1, 1)])];
        merge_tables(&mut local, &remote);
        let positions: Vec<u64> = local[0].ring.iter().map(|p| p.ring_position).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn seed_peer_survives_even_when_unreferenced() {
        let mut peers = vec![PeerServer { uuid: Uuid::from_bytes([1; 16]), address: "a".into(), lamport_ts: 0, dropped: false, seed: true }];
        mark_unreferenced_peers_dropped(&mut peers, &HashSet::new(), 100);
        assert!(!peers[0].dropped);
    }

    #[test]
    fn unreferenced_non_seed_peer_is_marked_dropped() {
        let mut peers = vec![PeerServer { uuid: Uuid::from_bytes([1; 16]), address: "a".into(), lamport_ts: 0, dropped: false, seed: false }];
        mark_unreferenced_peers_dropped(&mut peers, &HashSet::new(), 100);
        assert!(peers[0].dropped);
        assert_eq!(peers[0].lamport_ts, 100);
    }
}
