//! Ring geometry: partitions, tables, and cluster-state routing.
//!
//! This module models the *shapes* described by the cluster metadata and
//! the read-only routing walk (`route`). Mutating these shapes under
//! concurrent peer merges -- the single-writer cluster-state transaction
//! service -- lives in `samoa-server::cluster::state`, which owns `Table`
//! and `ClusterState` values and applies the merge rules in §4.8.

use uuid::Uuid;

use crate::hash::ring_position;

/// A slice of the hash ring owned (as one of its R replicas) by a server.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Partition {
    pub uuid: Uuid,
    pub server_uuid: Uuid,
    pub ring_position: u64,
    pub range_begin: u64,
    pub range_end: u64,
    pub consistent_range_begin: u64,
    pub consistent_range_end: u64,
    pub lamport_ts: u64,
    pub is_tracked: bool,
    pub dropped: bool,
}

impl Partition {
    /// Whether `position` falls within this partition's (possibly
    /// wrapping) replica range.
    #[must_use]
    pub fn covers(&self, position: u64) -> bool {
        if self.range_begin <= self.range_end {
            (self.range_begin..self.range_end).contains(&position)
        } else {
            position >= self.range_begin || position < self.range_end
        }
    }
}

/// A named, replicated, horizon-pruned collection of partitions.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Table {
    pub uuid: Uuid,
    pub name: String,
    pub data_type: DataType,
    pub replication_factor: u32,
    pub consistency_horizon_secs: u64,
    /// Sorted by `ring_position`.
    pub ring: Vec<Partition>,
    pub lamport_ts: u64,
    pub dropped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    Blob,
    Counter,
}

/// The result of routing a key to its replica set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteState {
    pub ring_position: u64,
    /// Up to `replication_factor` partitions, walked forward from the
    /// first partition whose `ring_position >= ring_position`, wrapping.
    pub replicas: Vec<Partition>,
}

impl RouteState {
    /// The first local partition among the replica walk, if this node owns
    /// one; `None` if the request must be forwarded.
    #[must_use]
    pub fn primary(&self, local_server_uuid: Uuid) -> Option<&Partition> {
        self.replicas.iter().find(|p| p.server_uuid == local_server_uuid)
    }

    /// The replicas other than the given primary: the set that
    /// replication must fan out to.
    #[must_use]
    pub fn peers<'a>(&'a self, primary: &Partition) -> Vec<&'a Partition> {
        self.replicas.iter().filter(|p| p.uuid != primary.uuid).collect()
    }
}

/// Hashes `key` to its ring position and walks `table.ring` forward for
/// `table.replication_factor` partitions, wrapping past the end.
#[must_use]
pub fn route(table: &Table, key: &[u8]) -> RouteState {
    let position = ring_position(key);
    route_position(table, position)
}

/// As [`route`], but from an already-hashed ring position -- used when
/// re-deriving a route to validate an explicit peer set (§4.5).
#[must_use]
pub fn route_position(table: &Table, position: u64) -> RouteState {
    if table.ring.is_empty() {
        return RouteState { ring_position: position, replicas: vec![] };
    }

    let start = table.ring.partition_point(|p| p.ring_position < position) % table.ring.len();

    let count = (table.replication_factor as usize).min(table.ring.len());
    let replicas = (0..count)
        .map(|offset| table.ring[(start + offset) % table.ring.len()].clone())
        .collect();

    RouteState { ring_position: position, replicas }
}

/// Validates that an explicit peer-partition-uuid list from a request
/// exactly matches the set the ring derives for the key. Mismatches must
/// be rejected by the caller with code 409 per §4.5.
#[must_use]
pub fn peers_match_derived(route: &RouteState, explicit_peer_uuids: &[Uuid]) -> bool {
    let mut derived: Vec<Uuid> = route.replicas.iter().map(|p| p.uuid).collect();
    let mut explicit = explicit_peer_uuids.to_vec();
    derived.sort_unstable();
    explicit.sort_unstable();
    derived == explicit
}

/// `{local_uuid, peer list, table list}` -- the cluster metadata exchanged
/// and merged between peers (§4.8). Mutation and merging live in
/// `samoa-server::cluster::state`; this is the plain data shape.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClusterState {
    pub local_uuid: Uuid,
    pub peers: Vec<PeerServer>,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerServer {
    pub uuid: Uuid,
    pub address: String,
    pub lamport_ts: u64,
    pub dropped: bool,
    /// Seed peers are never pruned even if no table currently references
    /// them, per §4.8's peer-set maintenance rule.
    pub seed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(uuid_byte: u8, server_byte: u8, pos: u64) -> Partition {
        Partition {
            uuid: Uuid::from_bytes([uuid_byte; 16]),
            server_uuid: Uuid::from_bytes([server_byte; 16]),
            ring_position: pos,
            range_begin: pos,
            range_end: pos.wrapping_add(100),
            consistent_range_begin: pos,
            consistent_range_end: pos.wrapping_add(100),
            lamport_ts: 0,
            is_tracked: true,
            dropped: false,
        }
    }

    fn table_with(partitions: Vec<Partition>, rf: u32) -> Table {
        Table {
            uuid: Uuid::from_bytes([0xAA; 16]),
            name: "t".to_string(),
            data_type: DataType::Blob,
            replication_factor: rf,
            consistency_horizon_secs: 60,
            ring: partitions,
            lamport_ts: 0,
            dropped: false,
        }
    }

    #[test]
    fn route_picks_first_partition_at_or_after_position() {
        let table = table_with(vec![partition(1, 1, 10), partition(2, 2, 200), partition(3, 3, 500)], 1);
        let route = route_position(&table, 150);
        assert_eq!(route.replicas.len(), 1);
        assert_eq!(route.replicas[0].ring_position, 200);
    }

    #[test]
    fn route_wraps_past_end_of_ring() {
        let table = table_with(vec![partition(1, 1, 10), partition(2, 2, 200), partition(3, 3, 500)], 3);
        let route = route_position(&table, 600);
        let positions: Vec<u64> = route.replicas.iter().map(|p| p.ring_position).collect();
        assert_eq!(positions, vec![10, 200, 500]);
    }

    #[test]
    fn route_caps_replica_count_at_ring_size() {
        let table = table_with(vec![partition(1, 1, 10)], 3);
        let route = route_position(&table, 5);
        assert_eq!(route.replicas.len(), 1);
    }

    #[test]
    fn primary_is_first_replica_owned_by_local_server() {
        let table = table_with(vec![partition(1, 1, 10), partition(2, 2, 200)], 2);
        let route = route_position(&table, 5);
        let primary = route.primary(Uuid::from_bytes([2; 16])).unwrap();
        assert_eq!(primary.uuid, Uuid::from_bytes([2; 16]));
    }

    #[test]
    fn peers_match_derived_is_order_independent() {
        let table = table_with(vec![partition(1, 1, 10), partition(2, 2, 200), partition(3, 3, 500)], 3);
        let route = route_position(&table, 5);
        let mut explicit: Vec<Uuid> = route.replicas.iter().map(|p| p.uuid).collect();
        explicit.reverse();
        assert!(peers_match_derived(&route, &explicit));
    }

    #[test]
    fn peers_match_derived_rejects_mismatched_set() {
        let table = table_with(vec![partition(1, 1, 10), partition(2, 2, 200)], 2);
        let route = route_position(&table, 5);
        assert!(!peers_match_derived(&route, &[Uuid::from_bytes([9; 16])]));
    }
}
