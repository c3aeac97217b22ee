//! Multi-value register: every concurrent write is kept until an
//! application-level read collapses them, at which point the record holds a
//! sibling list rather than picking a winner.

use uuid::Uuid;

use crate::clock::{self, remote_slot, ClusterClock, MergeEvent, MergeOutcome, PruneEvent, TickEvent};

/// A blob record's payload: one byte-string per live clock slot, plus the
/// byte-strings folded in from slots that have since been pruned.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Blob {
    pub blob_value: Vec<Vec<u8>>,
    pub consistent_blob_value: Vec<Vec<u8>>,
    /// Set once this blob has absorbed at least one pruned slot. Mirrors
    /// the clock's own `clock_is_pruned`, tracked separately because the
    /// payload needs it even after the clock later becomes fully empty
    /// (and clears its own flag).
    pub legacy_pruned: bool,
}

impl Blob {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `new_value` at `author_id`'s slot, ticking `clock` in
    /// lock-step.
    pub fn update(&mut self, clock: &mut ClusterClock, author_id: Uuid, new_value: Vec<u8>, now: u64) {
        let mut pending = Some(new_value);
        clock::tick(clock, author_id, now, |event| match event {
            TickEvent::Insert { index } => {
                self.blob_value.insert(index, pending.take().expect("tick callback invoked once"));
            }
            TickEvent::Update { index } => {
                self.blob_value[index] = pending.take().expect("tick callback invoked once");
            }
        });
    }

    /// Folds every slot older than `consistency_horizon` into
    /// `consistent_blob_value`, removing it from the live sequence.
    pub fn prune(&mut self, clock: &mut ClusterClock, consistency_horizon: std::time::Duration, now: u64) {
        let mut folded = vec![];
        clock::prune(clock, consistency_horizon, now, |PruneEvent { index }| {
            folded.push(self.blob_value.remove(index));
        });
        if !folded.is_empty() {
            self.legacy_pruned = true;
            self.consistent_blob_value.extend(folded.into_iter().filter(|v| !v.is_empty()));
        }
    }

    /// Merges `remote` into `self`, mirroring clock-slot insert/overwrite
    /// onto `blob_value`. If the remote has folded history we don't, its
    /// consistent history replaces ours outright (we have none to lose).
    pub fn merge(
        &mut self,
        clock: &mut ClusterClock,
        remote_clock: &ClusterClock,
        remote: &Blob,
        consistency_horizon: std::time::Duration,
        now: u64,
    ) -> MergeOutcome {
        let outcome = clock::merge(clock, remote_clock, consistency_horizon, now, |event| match event {
            MergeEvent::Equal { .. } | MergeEvent::LocalNewer { .. } | MergeEvent::LocalOnly { .. } => {}
            MergeEvent::RemoteNewer { index, partition_id } => {
                let remote_index = remote_slot(remote_clock, partition_id);
                self.blob_value[index] = remote.blob_value[remote_index].clone();
            }
            MergeEvent::RemoteOnly { index, partition_id } => {
                let remote_index = remote_slot(remote_clock, partition_id);
                self.blob_value.insert(index, remote.blob_value[remote_index].clone());
            }
            MergeEvent::RemotePruned => {}
        });

        if !self.legacy_pruned && remote.legacy_pruned {
            self.consistent_blob_value = remote.consistent_blob_value.clone();
            self.legacy_pruned = true;
        }

        outcome
    }

    /// The value as observed by clients: consistent history first, then
    /// each live, non-tombstoned slot.
    pub fn value(&self) -> impl Iterator<Item = &[u8]> {
        self.consistent_blob_value
            .iter()
            .map(Vec::as_slice)
            .chain(self.blob_value.iter().filter(|v| !v.is_empty()).map(Vec::as_slice))
    }
}
