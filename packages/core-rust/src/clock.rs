//! `ClusterClock`: the causal-ordering primitive shared by every datatype.
//!
//! A cluster clock is a sorted sequence of [`PartitionClock`] entries, one
//! per partition that has ever written the owning record. The three
//! operations here (`tick`, `prune`, `merge`) never know about a datatype's
//! payload directly -- each takes a callback that is invoked with the index
//! into the clock sequence being touched, so a datatype can keep a parallel
//! `Vec` (blob values, counter deltas) in lock-step. This mirrors the
//! callback-parameterized clock algebra of the original implementation,
//! where a single `clock_util` is reused by both the blob and counter
//! datatypes.

use std::time::Duration;

use uuid::Uuid;

/// The jitter bound folded into the prune threshold, distinct from the
/// consistency horizon itself: `prune_ts = now - H - CLOCK_JITTER_BOUND`.
/// Guards against clock entries that are barely within the horizon being
/// pruned by a peer whose wall clock runs slightly ahead.
pub const CLOCK_JITTER_BOUND: Duration = Duration::from_secs(5);

/// One partition's contribution to a cluster clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartitionClock {
    pub partition_id: Uuid,
    pub unix_timestamp: u64,
    pub lamport_tick: u32,
}

impl PartitionClock {
    fn order_key(&self) -> (u64, u32) {
        (self.unix_timestamp, self.lamport_tick)
    }
}

/// Sorted-by-`partition_id` sequence of partition clocks, plus a flag
/// recording whether any entry has ever been pruned from this clock.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClusterClock {
    pub partition_clock: Vec<PartitionClock>,
    pub clock_is_pruned: bool,
}

impl ClusterClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every partition's contribution is still present, i.e. no
    /// entry was ever folded away by pruning.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.clock_is_pruned
    }

    fn binary_search(&self, partition_id: Uuid) -> Result<usize, usize> {
        self.partition_clock
            .binary_search_by_key(&partition_id, |c| c.partition_id)
    }
}

/// Event delivered to a `tick` callback.
#[derive(Debug, Clone, Copy)]
pub enum TickEvent {
    /// A brand new slot was inserted at `index`; the callback must insert
    /// its own parallel payload entry at the same index.
    Insert { index: usize },
    /// An existing slot at `index` advanced; the callback may overwrite its
    /// parallel payload entry in place.
    Update { index: usize },
}

/// Advances `clock`'s entry for `partition_id`, inserting a fresh slot if
/// absent. `now` is the caller's wall-clock reading in unix seconds.
pub fn tick(clock: &mut ClusterClock, partition_id: Uuid, now: u64, mut update_cb: impl FnMut(TickEvent)) {
    match clock.binary_search(partition_id) {
        Err(insert_at) => {
            clock.partition_clock.insert(
                insert_at,
                PartitionClock { partition_id, unix_timestamp: now, lamport_tick: 0 },
            );
            update_cb(TickEvent::Insert { index: insert_at });
        }
        Ok(index) => {
            let entry = &mut clock.partition_clock[index];
            if entry.unix_timestamp < now {
                entry.unix_timestamp = now;
                entry.lamport_tick = 0;
            } else {
                entry.lamport_tick += 1;
            }
            update_cb(TickEvent::Update { index });
        }
    }
}

/// Event delivered to a `prune` callback: entry `index` is about to be
/// removed from the clock: the callback must fold its value into whatever
/// "consistent" aggregate the datatype keeps before the removal happens.
#[derive(Debug, Clone, Copy)]
pub struct PruneEvent {
    pub index: usize,
}

/// Removes every clock entry older than `now - consistency_horizon -
/// CLOCK_JITTER_BOUND`, folding each one through `update_cb` first.
pub fn prune(clock: &mut ClusterClock, consistency_horizon: Duration, now: u64, mut update_cb: impl FnMut(PruneEvent)) {
    let prune_ts = now
        .saturating_sub(consistency_horizon.as_secs())
        .saturating_sub(CLOCK_JITTER_BOUND.as_secs());

    let mut index = 0;
    let mut pruned_any = false;
    while index < clock.partition_clock.len() {
        if clock.partition_clock[index].unix_timestamp <= prune_ts {
            update_cb(PruneEvent { index });
            clock.partition_clock.remove(index);
            pruned_any = true;
        } else {
            index += 1;
        }
    }

    if pruned_any {
        clock.clock_is_pruned = true;
    }
    if clock.partition_clock.is_empty() && clock.clock_is_pruned {
        clock.clock_is_pruned = false;
    }
}

/// Event delivered to a `merge` callback, naming which side(s) held the
/// entry and what happened to it. Names follow the original clock
/// algebra's LHS/RHS terminology (local = LHS, remote = RHS).
#[derive(Debug, Clone, Copy)]
pub enum MergeEvent {
    /// Present on both sides with identical timestamp and tick.
    Equal { index: usize },
    /// Local entry outranks the remote one; local is kept.
    LocalNewer { index: usize },
    /// Remote entry outranks the local one; local is overwritten.
    /// `partition_id` identifies the slot in `remote`'s own payload so the
    /// datatype can look up the value to copy in, independent of index
    /// alignment between the two clocks.
    RemoteNewer { index: usize, partition_id: Uuid },
    /// Present only locally.
    LocalOnly { index: usize },
    /// Present only remotely and inserted into the local clock at `index`.
    RemoteOnly { index: usize, partition_id: Uuid },
    /// Present only remotely but already provably pruned on the local side;
    /// dropped rather than inserted.
    RemotePruned,
}

/// Outcome of a clock merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub local_was_updated: bool,
    pub remote_is_stale: bool,
}

/// Merges `remote` into `local` in place, invoking `update_cb` once per
/// entry considered so the datatype can keep its parallel payload
/// synchronized. `now` is used to compute `ignore_ts = now - H` and
/// `prune_ts = ignore_ts - CLOCK_JITTER_BOUND`.
pub fn merge(
    local: &mut ClusterClock,
    remote: &ClusterClock,
    consistency_horizon: Duration,
    now: u64,
    mut update_cb: impl FnMut(MergeEvent),
) -> MergeOutcome {
    let ignore_ts = now.saturating_sub(consistency_horizon.as_secs());
    let prune_ts = ignore_ts.saturating_sub(CLOCK_JITTER_BOUND.as_secs());

    let mut outcome = MergeOutcome::default();
    let local_was_consistent = local.is_consistent();

    let mut i = 0;
    let mut j = 0;
    while i < local.partition_clock.len() && j < remote.partition_clock.len() {
        let l = local.partition_clock[i];
        let r = remote.partition_clock[j];
        match l.partition_id.cmp(&r.partition_id) {
            std::cmp::Ordering::Less => {
                handle_local_only(local, i, ignore_ts, &mut outcome, &mut update_cb);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                if handle_remote_only(local, i, r, local_was_consistent, prune_ts, &mut outcome, &mut update_cb) {
                    i += 1;
                }
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if l.order_key() == r.order_key() {
                    update_cb(MergeEvent::Equal { index: i });
                } else if l.order_key() > r.order_key() {
                    update_cb(MergeEvent::LocalNewer { index: i });
                    outcome.remote_is_stale = true;
                } else {
                    local.partition_clock[i] = r;
                    update_cb(MergeEvent::RemoteNewer { index: i, partition_id: r.partition_id });
                    outcome.local_was_updated = true;
                }
                i += 1;
                j += 1;
            }
        }
    }

    while i < local.partition_clock.len() {
        handle_local_only(local, i, ignore_ts, &mut outcome, &mut update_cb);
        i += 1;
    }
    while j < remote.partition_clock.len() {
        let r = remote.partition_clock[j];
        if handle_remote_only(local, i, r, local_was_consistent, prune_ts, &mut outcome, &mut update_cb) {
            i += 1;
        }
        j += 1;
    }

    if local_was_consistent && !remote.is_consistent() {
        outcome.remote_is_stale = true;
    }
    if local_was_consistent && remote.clock_is_pruned {
        outcome.local_was_updated = true;
    }

    outcome
}

/// Finds `partition_id`'s slot in a clock's own payload-parallel index.
/// Datatypes use this to fetch the value to copy when `merge` reports a
/// `RemoteNewer`/`RemoteOnly` event, since the event's `index` is the
/// insertion point in the *local* clock, not a slot in `remote`.
#[must_use]
pub fn remote_slot(remote_clock: &ClusterClock, partition_id: Uuid) -> usize {
    remote_clock
        .binary_search(partition_id)
        .expect("partition_id must be present in the clock that reported it")
}

fn handle_local_only(
    local: &ClusterClock,
    index: usize,
    ignore_ts: u64,
    outcome: &mut MergeOutcome,
    update_cb: &mut impl FnMut(MergeEvent),
) {
    let entry = local.partition_clock[index];
    update_cb(MergeEvent::LocalOnly { index });
    if entry.unix_timestamp > ignore_ts {
        outcome.remote_is_stale = true;
    }
}

/// Returns whether `remote_entry` was inserted into `local`. The caller must
/// only advance its local-side cursor when this returns `true` -- the
/// `RemotePruned` case consumes a remote entry without touching `local` at
/// all, so the index sitting at `index` still needs to be visited next.
fn handle_remote_only(
    local: &mut ClusterClock,
    index: usize,
    remote_entry: PartitionClock,
    local_was_consistent: bool,
    prune_ts: u64,
    outcome: &mut MergeOutcome,
    update_cb: &mut impl FnMut(MergeEvent),
) -> bool {
    if local_was_consistent && remote_entry.unix_timestamp <= prune_ts {
        update_cb(MergeEvent::RemotePruned);
        return false;
    }
    local.partition_clock.insert(index, remote_entry);
    update_cb(MergeEvent::RemoteOnly { index, partition_id: remote_entry.partition_id });
    outcome.local_was_updated = true;
    true
}
