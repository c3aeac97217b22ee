//! Persister: a layered stack of [`HashRing`]s presenting a single
//! key/value store. Layer 0 is the root -- the only layer new writes land
//! in -- and later layers are progressively more compacted, holding data
//! that has aged out of the root's space budget; `add_layer` always
//! extends this leaf side. Compaction always moves a live element from
//! `layers[i]` to `layers[i + 1]`, never backward.
//!
//! A `get`/`drop_key` checks layers root-first (layer 0, then 1, ...) and
//! acts on the first hit, since the root always holds the newest copy of a
//! key still being written to. `put` merges against whatever copy already
//! exists (wherever it is) through a caller-supplied `merge_fn`, then
//! writes the merged record into the root -- never a raw overwrite. An
//! iteration ticket table tracks which consumers are mid-walk over a layer
//! so compaction can tell whether that layer is safe to reclaim from.
//!
//! Grounded on the original `persistence::persister`'s `on_put`/`on_get`/
//! `on_drop`/`top_down_compaction`/`on_bottom_up_compaction`/
//! `inner_compaction`/`leaf_compaction` functions.

use std::collections::HashMap;

use super::hash_ring::HashRing;
use super::record::PersistedRecord;
use crate::digest::content_hash;

/// Default ceiling on how much of a persister's total allocated capacity a
/// single compaction pass may move in one call, so compaction yields back
/// to request processing instead of blocking it indefinitely.
pub const DEFAULT_MAX_COMPACTION_FACTOR: f64 = 0.5;

/// A single live iteration over a persister, so compaction can tell which
/// layer indices are unsafe to reclaim while a consumer still references
/// offsets within them.
#[derive(Debug, Clone, Copy)]
pub struct IterationTicket {
    pub layer_index: usize,
    pub cursor: u64,
}

pub struct Persister {
    /// Layer 0 is the root and sole write target; later layers are
    /// progressively more compacted (the leaf is `layers.last()`).
    layers: Vec<HashRing>,
    region_size: u64,
    index_size: u32,
    next_ticket_id: u64,
    open_tickets: HashMap<u64, IterationTicket>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Outcome of [`Persister::put`].
#[derive(Debug)]
pub enum PutResult {
    /// The record was written (merged into an existing copy, or adopted
    /// fresh); carries the content hash of the bytes now on disk, for the
    /// caller to update a digest with.
    Written { content_hash: u128 },
    /// `merge_fn` reported the existing local record wasn't updated by the
    /// remote one (the conditional-write-mismatch case, §8 Scenario 2);
    /// nothing was written.
    Unchanged,
    /// The root layer has no room. The caller should run
    /// [`Persister::top_down_compaction`] (or [`Persister::add_layer`] if
    /// compaction can't free enough) and retry.
    NoRoom,
}

impl Persister {
    #[must_use]
    pub fn new(region_size: u64, index_size: u32) -> Self {
        Self {
            layers: vec![HashRing::new(region_size, index_size)],
            region_size,
            index_size,
            next_ticket_id: 0,
            open_tickets: HashMap::new(),
        }
    }

    /// Finds which layer currently holds a live copy of `key`, searching
    /// root-first (layer 0 always shadows any older copy still awaiting
    /// compaction).
    fn find_live(&self, key: &[u8]) -> Option<usize> {
        self.layers.iter().position(|layer| {
            let locate = layer.locate_key(key);
            locate.element_head.is_some_and(|head| !layer.head_is_dead_at(head))
        })
    }

    /// Looks up `key`, checking layers root-first and returning the first
    /// live hit.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Element> {
        let layer_ind = self.find_live(key)?;
        let layer = &self.layers[layer_ind];
        let head = layer.locate_key(key).element_head?;
        let (key, value) = layer.element_at(head)?;
        Some(Element { key, value })
    }

    /// Writes `key`, merging against any existing record rather than
    /// unconditionally overwriting (§4.2). If a live copy of `key` exists
    /// anywhere in the stack, it is decoded and passed to `merge_fn` along
    /// with `remote_record`; `merge_fn` returns whether the local record
    /// was updated (mirrors the original's `merge_func_t`). If it wasn't,
    /// the put is aborted and nothing is written. Otherwise the (possibly
    /// merged) record is encoded and written into the root layer, and any
    /// older copy is retired.
    pub fn put(
        &mut self,
        key: &[u8],
        remote_record: &PersistedRecord,
        mut merge_fn: impl FnMut(&mut PersistedRecord, &PersistedRecord) -> bool,
    ) -> PutResult {
        let existing_layer = self.find_live(key);

        let local_record = match existing_layer {
            Some(layer_ind) => {
                let layer = &self.layers[layer_ind];
                let head = layer.locate_key(key).element_head.expect("find_live located this key");
                let (_, value) = layer.element_at(head).expect("located element must exist");
                let mut local = PersistedRecord::decode(&value).expect("stored record must decode");
                if !merge_fn(&mut local, remote_record) {
                    return PutResult::Unchanged;
                }
                local
            }
            None => remote_record.clone(),
        };

        let encoded = local_record.encode().expect("record encoding cannot fail");
        let content_hash = content_hash(key, &encoded);

        if let Some(layer_ind) = existing_layer {
            let layer = &mut self.layers[layer_ind];
            let locate = layer.locate_key(key);
            if let Some(head) = locate.element_head {
                layer.mark_dead(head);
                layer.unlink_from_chain(locate);
            }
        }

        let root = &mut self.layers[0];
        let root_locate = root.locate_key(key);
        match root.allocate_element(key, &encoded) {
            Some(new_head) => {
                root.link_into_chain(root_locate, new_head);
                PutResult::Written { content_hash }
            }
            None => PutResult::NoRoom,
        }
    }

    /// Adds a fresh, empty leaf layer, extending the compacted/cold end of
    /// the stack. The write target (the root, `layers[0]`) never moves.
    pub fn add_layer(&mut self) {
        self.layers.push(HashRing::new(self.region_size, self.index_size));
    }

    /// Drops `key`, if a live copy exists, after giving `commit_fn` a
    /// chance to inspect the record and veto the drop (a conditional
    /// delete). Searches root-first, matching `get`'s precedence; only the
    /// newest live copy is offered to `commit_fn`, older copies are left
    /// for compaction to clean up once the newest is dead.
    ///
    /// Returns `true` if a live copy existed and `commit_fn` approved the
    /// drop.
    pub fn drop_key(&mut self, key: &[u8], commit_fn: impl FnOnce(&PersistedRecord) -> bool) -> bool {
        let Some(layer_ind) = self.find_live(key) else { return false };
        let layer = &self.layers[layer_ind];
        let locate = layer.locate_key(key);
        let head = locate.element_head.expect("find_live located this key");
        let (_, value) = layer.element_at(head).expect("located element must exist");
        let record = PersistedRecord::decode(&value).expect("stored record must decode");
        if !commit_fn(&record) {
            return false;
        }
        let layer = &mut self.layers[layer_ind];
        layer.mark_dead(head);
        layer.unlink_from_chain(locate);
        true
    }

    /// Opens an iteration over the root layer and returns a ticket id the
    /// caller must pass to [`Self::iterate_next`] and eventually let expire
    /// (by not calling it again) so compaction can proceed.
    pub fn iterate_begin(&mut self) -> u64 {
        let id = self.next_ticket_id;
        self.next_ticket_id += 1;
        self.open_tickets.insert(id, IterationTicket { layer_index: 0, cursor: self.layers[0].begin_offset() });
        id
    }

    /// Advances the iteration identified by `ticket`, returning the next
    /// live element or `None` once the layer is exhausted (at which point
    /// the ticket is retired).
    pub fn iterate_next(&mut self, ticket: u64) -> Option<Element> {
        let state = *self.open_tickets.get(&ticket)?;
        let layer = self.layers.get(state.layer_index)?;
        let mut cursor = state.cursor;
        loop {
            if cursor >= layer.end_offset() {
                self.open_tickets.remove(&ticket);
                return None;
            }
            if let Some((key, value)) = layer.element_at(cursor) {
                let next_cursor = layer.next_offset(cursor);
                self.open_tickets.insert(ticket, IterationTicket { layer_index: state.layer_index, cursor: next_cursor });
                if layer.head_is_dead_at(cursor) {
                    cursor = next_cursor;
                    continue;
                }
                return Some(Element { key, value });
            }
            self.open_tickets.remove(&ticket);
            return None;
        }
    }

    /// Whether any open ticket still references `layer_index`.
    fn layer_is_iterated(&self, layer_index: usize) -> bool {
        self.open_tickets.values().any(|t| t.layer_index == layer_index)
    }

    /// Relocates or reclaims the head element of `layers[layer_ind]` into
    /// `layers[layer_ind + 1]`, mirroring the original's `inner_compaction`.
    /// Returns the number of bytes processed, or `0` if the layer is empty,
    /// under active iteration, or the next layer has no room (compaction
    /// must retry later).
    fn compact_layer_head(&mut self, layer_ind: usize) -> u64 {
        if self.layer_is_iterated(layer_ind) {
            return 0;
        }
        let Some(head) = self.layers[layer_ind].head_offset() else { return 0 };
        if self.layers[layer_ind].head_is_dead_at(head) {
            self.layers[layer_ind].reclaim_head();
            return 1;
        }

        let (key, value) = self.layers[layer_ind].element_at(head).expect("head must exist");
        let moved_bytes = key.len() as u64 + value.len() as u64;

        let Some(new_head) = self.layers[layer_ind + 1].allocate_element(&key, &value) else { return 0 };
        let next_locate = self.layers[layer_ind + 1].locate_key(&key);
        self.layers[layer_ind + 1].link_into_chain(next_locate, new_head);

        let old_locate = self.layers[layer_ind].locate_key(&key);
        self.layers[layer_ind].unlink_from_chain(old_locate);
        self.layers[layer_ind].mark_dead(head);
        self.layers[layer_ind].reclaim_head();

        moved_bytes
    }

    /// Compacts the leaf (last) layer's head: reclaims it outright if dead,
    /// otherwise asks `upkeep` whether to keep it. `upkeep` mirrors the
    /// original's `record_upkeep_callback_t` -- `true` keeps the record
    /// (rotated to the layer's own tail, freeing its old physical slot),
    /// `false` drops it. Returns `0` if the leaf is empty or under active
    /// iteration.
    fn compact_leaf_head(&mut self, upkeep: &mut impl FnMut(&[u8]) -> bool) -> u64 {
        let leaf_ind = self.layers.len() - 1;
        if self.layer_is_iterated(leaf_ind) {
            return 0;
        }
        let leaf = &mut self.layers[leaf_ind];
        let Some(head) = leaf.head_offset() else { return 0 };
        if leaf.head_is_dead_at(head) {
            leaf.reclaim_head();
            return 1;
        }

        let (key, value) = leaf.element_at(head).expect("head must exist");
        let moved_bytes = key.len() as u64 + value.len() as u64;
        if upkeep(&key) {
            leaf.rotate_head();
        } else {
            leaf.mark_dead(head);
            leaf.reclaim_head();
        }
        moved_bytes
    }

    /// Write-triggered compaction (§4.2): called when `put` reports
    /// [`PutResult::NoRoom`], so the root has somewhere to spill an
    /// existing element before retrying. Walks layers root-to-leaf,
    /// compacting the first one whose head yields space; falls back to
    /// compacting the leaf layer itself if every inner layer's head is
    /// empty or blocked. Returns the number of bytes processed (`0` if
    /// nothing could be compacted at all).
    pub fn top_down_compaction(&mut self, mut upkeep: impl FnMut(&[u8]) -> bool) -> u64 {
        for layer_ind in 0..self.layers.len().saturating_sub(1) {
            let moved = self.compact_layer_head(layer_ind);
            if moved > 0 {
                return moved;
            }
        }
        self.compact_leaf_head(&mut upkeep)
    }

    /// Idle/background compaction (§4.2): called periodically (not on the
    /// write path) to keep every layer's dead space bounded. Compacts the
    /// leaf layer first (freeing room for inner layers to spill into), then
    /// walks inner layers leaf-to-root, each up to `max_compaction_factor`
    /// of the persister's region size.
    ///
    /// Returns the number of elements relocated or reclaimed.
    pub fn bottom_up_compaction(&mut self, max_compaction_factor: f64, mut upkeep: impl FnMut(&[u8]) -> bool) -> usize {
        if self.layers.len() < 2 {
            return 0;
        }
        let budget = (self.region_size as f64 * max_compaction_factor) as u64;
        let mut relocated = 0usize;
        let mut moved_bytes = 0u64;

        while moved_bytes < budget {
            let moved = self.compact_leaf_head(&mut upkeep);
            if moved == 0 {
                break;
            }
            moved_bytes += moved;
            relocated += 1;
        }

        for layer_ind in (0..self.layers.len() - 1).rev() {
            moved_bytes = 0;
            while moved_bytes < budget {
                let moved = self.compact_layer_head(layer_ind);
                if moved == 0 {
                    break;
                }
                moved_bytes += moved;
                relocated += 1;
            }
        }

        relocated
    }

    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}
