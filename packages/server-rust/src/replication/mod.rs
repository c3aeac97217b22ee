//! Replication pipeline (§4.7): quorum accounting over a fan-out of peer
//! RPCs, and the read-side merge/read-repair/reverse-replication walk.
//! Wire framing and the actual peer connection are out of scope (§1); this
//! module only implements the bookkeeping and merge logic those RPCs feed
//! into, grounded on the original `replication` state's quorum counter and
//! read-repair callback.

use std::time::Duration;

use samoa_core::{Blob, ClusterClock, Counter};
use uuid::Uuid;

use crate::storage::{Payload, PersistedRecord};

/// Tracks REPLICATE-RPC outcomes against a request's quorum requirement.
/// Each of `peer_replication_success`/`peer_replication_failure` returns
/// `true` exactly once: the first call that pushes the outcome (quorum
/// satisfied, or quorum now unreachable) past its deciding threshold.
#[derive(Debug, Clone, Copy)]
pub struct QuorumTracker {
    required: u32,
    total_peers: u32,
    successes: u32,
    failures: u32,
    decided: bool,
}

impl QuorumTracker {
    #[must_use]
    pub fn new(required: u32, total_peers: u32) -> Self {
        Self { required, total_peers, successes: 0, failures: 0, decided: false }
    }

    /// Records one successful peer reply. Returns `true` the first time
    /// this pushes `successes` to meet `required` -- i.e. the single moment
    /// the client-visible request should be satisfied.
    pub fn peer_replication_success(&mut self) -> bool {
        self.successes += 1;
        if !self.decided && self.successes >= self.required {
            self.decided = true;
            return true;
        }
        false
    }

    /// Records one failed/timed-out peer reply. Returns `true` the first
    /// time remaining possible successes can no longer reach `required` --
    /// the moment the request should fail outright.
    pub fn peer_replication_failure(&mut self) -> bool {
        self.failures += 1;
        let remaining = self.total_peers.saturating_sub(self.successes + self.failures);
        let reachable = self.successes + remaining >= self.required;
        if !self.decided && !reachable {
            self.decided = true;
            return true;
        }
        false
    }

    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.decided
    }

    #[must_use]
    pub fn successes(&self) -> u32 {
        self.successes
    }
}

/// Outcome of merging a peer's reply into the locally held record during
/// a read: whether the local copy was updated, and whether the peer's copy
/// is now known to be stale and should receive a reverse-replication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadRepairOutcome {
    pub local_was_updated: bool,
    pub peer_is_stale: bool,
}

/// Merges `peer_clock`/`peer_payload` into `local`, mirroring whichever
/// datatype the table holds. `local` is `None` if this replica had no
/// record at all, in which case the peer's record is adopted outright.
///
/// # Panics
/// Panics if `local` and the peer payload are of different datatype
/// variants -- a table-level invariant that should never be violated by a
/// well-formed request (mismatches are rejected earlier, at the state
/// machine's table-load stage).
pub fn merge_read_reply(
    local: &mut Option<PersistedRecord>,
    peer_clock: &ClusterClock,
    peer_payload: &Payload,
    consistency_horizon: Duration,
    now: u64,
) -> ReadRepairOutcome {
    let Some(record) = local else {
        *local = Some(PersistedRecord {
            cluster_clock: peer_clock.clone(),
            payload: peer_payload.clone(),
            expire_timestamp: None,
        });
        return ReadRepairOutcome { local_was_updated: true, peer_is_stale: false };
    };

    let outcome = match (&mut record.payload, peer_payload) {
        (Payload::Blob(local_blob), Payload::Blob(peer_blob)) => {
            local_blob.merge(&mut record.cluster_clock, peer_clock, peer_blob, consistency_horizon, now)
        }
        (Payload::Counter(local_counter), Payload::Counter(peer_counter)) => {
            local_counter.merge(&mut record.cluster_clock, peer_clock, peer_counter, consistency_horizon, now)
        }
        _ => panic!("read-repair merge called across mismatched datatypes"),
    };

    ReadRepairOutcome { local_was_updated: outcome.local_was_updated, peer_is_stale: outcome.remote_is_stale }
}

/// One pending REPLICATE RPC to issue as part of a write's fan-out or a
/// read's repair pass.
#[derive(Debug, Clone)]
pub struct ReplicateRequest {
    pub partition_uuid: Uuid,
    pub key: Vec<u8>,
    pub cluster_clock: ClusterClock,
    pub payload: Payload,
}

/// Builds the fan-out of REPLICATE requests for a write to `peers`, one per
/// peer partition, all carrying the same post-update clock/payload.
#[must_use]
pub fn build_replication_fanout(peers: &[Uuid], key: &[u8], record: &PersistedRecord) -> Vec<ReplicateRequest> {
    peers
        .iter()
        .map(|&partition_uuid| ReplicateRequest {
            partition_uuid,
            key: key.to_vec(),
            cluster_clock: record.cluster_clock.clone(),
            payload: record.payload.clone(),
        })
        .collect()
}

/// Whether the local node should forward a request rather than act on it,
/// because the route's primary belongs to a different server.
#[must_use]
pub fn should_forward(route: &samoa_core::routing::RouteState, local_server_uuid: Uuid) -> bool {
    route.primary(local_server_uuid).is_none()
}
