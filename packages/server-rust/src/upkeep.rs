//! Eventual-consistency upkeep (§4.9): the callback a persister's
//! bottom-up compaction drives once a partition's dead-space churn crosses
//! a threshold, re-replicating or relocating records whose keys no longer
//! belong entirely to the local partition's consistent range. Also the
//! digest-gossip trigger: when compaction has touched enough distinct
//! elements, the local digest is stale enough to warrant a fresh gossip
//! round.

use samoa_core::routing::Partition;
use uuid::Uuid;

/// Default number of relocated/touched elements a compaction pass must
/// accumulate before the digest for that partition is considered stale
/// enough to re-gossip.
pub const DEFAULT_DIGEST_CHURN_THRESHOLD: u64 = 4096;

/// What should happen to one record found to no longer belong entirely to
/// `partition`'s consistent range during upkeep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpkeepAction {
    /// The key's ring position still falls in the partition's owned range;
    /// nothing to do.
    Keep,
    /// The key now belongs to a different partition than the one storing
    /// it; re-replicate to the correct owner(s) and drop the local copy
    /// once they've acknowledged.
    Relocate { target_partition: Uuid },
    /// The key falls within `partition`'s *replica* range but not its
    /// *consistent* range -- it should be (re-)replicated to bring it back
    /// to full replication, without changing its primary owner.
    ReReplicate,
}

/// Decides what upkeep should do with `key_ring_position` currently stored
/// under `partition`, given the full replica set the ring currently
/// derives for that key (`current_replicas`, ordered as `route` returns
/// them).
#[must_use]
pub fn classify_record(
    partition: &Partition,
    key_ring_position: u64,
    current_replicas: &[Partition],
) -> UpkeepAction {
    if !current_replicas.iter().any(|p| p.uuid == partition.uuid) {
        // The ring has moved on: some other partition is now primary (or a
        // replica at all) for this position.
        let target = current_replicas.first().map(|p| p.uuid).unwrap_or(partition.uuid);
        return UpkeepAction::Relocate { target_partition: target };
    }

    if partition.covers(key_ring_position) {
        UpkeepAction::Keep
    } else {
        UpkeepAction::ReReplicate
    }
}

/// Tracks a partition's compaction churn since its digest was last
/// rebuilt, firing once churn crosses `threshold`.
#[derive(Debug, Default)]
pub struct ChurnCounter {
    touched: u64,
}

impl ChurnCounter {
    /// Records that compaction touched (relocated, marked dead, or moved)
    /// `count` more elements. Returns `true` exactly once churn first
    /// crosses `threshold`, resetting the counter so the next gossip round
    /// starts fresh.
    pub fn record(&mut self, count: u64, threshold: u64) -> bool {
        self.touched += count;
        if self.touched >= threshold {
            self.touched = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(uuid: u8, range_begin: u64, range_end: u64) -> Partition {
        Partition {
            uuid: Uuid::from_bytes([uuid; 16]),
            server_uuid: Uuid::from_bytes([1; 16]),
            ring_position: range_end,
            range_begin,
            range_end,
            consistent_range_begin: range_begin,
            consistent_range_end: range_end,
            lamport_ts: 0,
            is_tracked: true,
            dropped: false,
        }
    }

    #[test]
    fn record_within_owned_range_is_kept() {
        let p = partition(1, 0, 100);
        let action = classify_record(&p, 50, &[p.clone()]);
        assert_eq!(action, UpkeepAction::Keep);
    }

    #[test]
    fn record_outside_any_current_replica_is_relocated() {
        let p = partition(1, 0, 100);
        let other = partition(2, 100, 200);
        let action = classify_record(&p, 150, &[other.clone()]);
        assert_eq!(action, UpkeepAction::Relocate { target_partition: other.uuid });
    }

    #[test]
    fn churn_counter_fires_once_threshold_crossed() {
        let mut counter = ChurnCounter::default();
        assert!(!counter.record(3, 5));
        assert!(counter.record(3, 5));
        assert!(!counter.record(1, 5));
    }
}
