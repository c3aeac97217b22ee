//! PN-counter-like distributed counter: each partition tracks its own
//! running delta; the value is the sum of all deltas plus whatever has been
//! folded into the consistent aggregate by pruning.

use uuid::Uuid;

use crate::clock::{self, remote_slot, ClusterClock, MergeEvent, MergeOutcome, PruneEvent, TickEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Counter {
    pub counter_value: Vec<i64>,
    pub counter_consistent_value: i64,
    /// Mirrors `Blob::legacy_pruned`: set once a slot has ever been pruned.
    pub legacy_pruned: bool,
}

impl Counter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `increment` at `author_id`'s slot (adding to the existing
    /// delta rather than overwriting it, since a counter's per-slot value
    /// is itself an accumulator of that partition's writes).
    pub fn update(&mut self, clock: &mut ClusterClock, author_id: Uuid, increment: i64, now: u64) {
        clock::tick(clock, author_id, now, |event| match event {
            TickEvent::Insert { index } => self.counter_value.insert(index, increment),
            TickEvent::Update { index } => self.counter_value[index] += increment,
        });
    }

    /// Folds every pruned slot's delta into `counter_consistent_value`.
    pub fn prune(&mut self, clock: &mut ClusterClock, consistency_horizon: std::time::Duration, now: u64) {
        let mut folded = 0_i64;
        let mut any = false;
        clock::prune(clock, consistency_horizon, now, |PruneEvent { index }| {
            folded += self.counter_value.remove(index);
            any = true;
        });
        if any {
            self.counter_consistent_value += folded;
            self.legacy_pruned = true;
        }
    }

    /// Merges `remote` into `self`.
    ///
    /// If the remote has already folded history we haven't seen
    /// (`legacy_pruned` asymmetry), our consistent aggregate is overwritten
    /// from the remote's rather than summed with it -- this is the known
    /// "legacy merge" behavior carried over from the original counter
    /// implementation: it can discard increments applied locally during a
    /// window where the remote had already pruned. We do not silently
    /// change this; the debug assertion below is the property that should
    /// hold whenever that window did not occur.
    pub fn merge(
        &mut self,
        clock: &mut ClusterClock,
        remote_clock: &ClusterClock,
        remote: &Counter,
        consistency_horizon: std::time::Duration,
        now: u64,
    ) -> MergeOutcome {
        let value_before = self.value();
        let mut applied_delta = 0_i64;

        let is_legacy_merge = !self.legacy_pruned && remote.legacy_pruned;
        if is_legacy_merge {
            self.counter_consistent_value = remote.counter_consistent_value;
            self.legacy_pruned = true;
        }

        let outcome = clock::merge(clock, remote_clock, consistency_horizon, now, |event| match event {
            MergeEvent::Equal { .. } | MergeEvent::LocalOnly { .. } | MergeEvent::RemotePruned => {}
            MergeEvent::LocalNewer { index } => {
                // Local already holds this partition's latest delta; no change.
                let _ = index;
            }
            MergeEvent::RemoteNewer { index, partition_id } => {
                let remote_index = remote_slot(remote_clock, partition_id);
                let delta = remote.counter_value[remote_index] - self.counter_value[index];
                self.counter_value[index] = remote.counter_value[remote_index];
                applied_delta += delta;
            }
            MergeEvent::RemoteOnly { index, partition_id } => {
                let remote_index = remote_slot(remote_clock, partition_id);
                let value = remote.counter_value[remote_index];
                self.counter_value.insert(index, value);
                applied_delta += value;
            }
        });

        debug_assert!(
            is_legacy_merge || value_before + applied_delta == remote.value(),
            "counter merge must satisfy value(local)+delta == value(remote) outside the legacy-prune window",
        );

        outcome
    }

    /// The counter's externally visible value: consistent aggregate plus
    /// every live per-partition delta.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.counter_consistent_value + self.counter_value.iter().sum::<i64>()
    }
}
