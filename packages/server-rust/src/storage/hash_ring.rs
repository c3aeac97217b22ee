//! `HashRing`: one ring-shaped byte region (backed by heap memory or a
//! memory-mapped file) holding a chain of [`Packet`]s, plus a hash-chained
//! index for point lookup.
//!
//! Grounded on the original implementation's split between
//! `heap_hash_ring`/`mapped_hash_ring`, generalized here behind a
//! [`RingBacking`] trait so the allocation/reclamation/lookup algorithms are
//! backing-agnostic.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crc32fast::Hasher as Crc32;

use super::packet::{
    Packet, BULKHEAD_SIZE, HEADER_LENGTH, MAX_PACKET_BYTE_LENGTH, MIN_PACKET_BYTE_LENGTH, NO_CHAIN_NEXT,
};

/// Where a `HashRing`'s packet storage physically lives.
pub trait RingBacking: Send {
    fn region_size(&self) -> u64;
}

/// An owned, heap-backed ring region. Used for layer 0 (hot) and for
/// tests.
#[derive(Debug, Default)]
pub struct HeapBacking {
    pub region_size: u64,
}

impl RingBacking for HeapBacking {
    fn region_size(&self) -> u64 {
        self.region_size
    }
}

/// A memory-mapped, file-backed ring region. Persisted layers use this so
/// that process restart does not lose compacted data. The actual
/// `memmap2::MmapMut` lives behind this marker type in the on-disk
/// persister wiring; `HashRing` itself only needs `region_size` to reason
/// about wrap/bulkhead math, so the map handle is owned by the caller that
/// constructs the ring (see `persister::Layer`).
#[derive(Debug)]
pub struct MappedBacking {
    pub region_size: u64,
}

impl RingBacking for MappedBacking {
    fn region_size(&self) -> u64 {
        self.region_size
    }
}

/// Result of a successful lookup or insertion-point probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateResult {
    pub index_slot: u32,
    /// Offset of the chain member immediately preceding `element_head`, or
    /// `None` if `element_head` is the slot's chain head.
    pub previous_chained_head: Option<u64>,
    /// Offset of the element's head packet, if the key was found.
    pub element_head: Option<u64>,
}

/// Persistence state recorded in the ring file header, mirroring the
/// on-disk states from §6: `NEW` on first create, `ACTIVE` while open,
/// `FROZEN` on clean close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PersistenceState {
    New,
    Active,
    Frozen,
}

/// An ordered, append-only ring of packets over one backing region, plus a
/// hash-chained index of `index_size` slots mapping key hashes to chain
/// heads.
pub struct HashRing {
    pub persistence_state: PersistenceState,
    region_size: u64,
    index_size: u32,
    /// Byte offset (within the conceptual packet stream, ignoring the
    /// header/index prefix) of the first live packet.
    pub begin: u64,
    /// Byte offset one past the last live packet.
    pub end: u64,
    pub is_wrapped: bool,
    /// `index_size` slots, each the offset of a hash-chain head or `u64::MAX`
    /// for empty.
    index: Vec<u64>,
    packets: Vec<(u64, Packet)>,
}

/// Empty-index-slot / end-of-collision-chain sentinel. Shares its value
/// with [`NO_CHAIN_NEXT`] (a packet's own `hash_chain_next` is widened to
/// `u64` when read) so an index slot and a terminal chain head compare
/// equal under the same walk in `locate_key`.
const EMPTY_SLOT: u64 = NO_CHAIN_NEXT as u64;

impl HashRing {
    #[must_use]
    pub fn new(region_size: u64, index_size: u32) -> Self {
        Self {
            persistence_state: PersistenceState::New,
            region_size,
            index_size,
            begin: 0,
            end: 0,
            is_wrapped: false,
            index: vec![EMPTY_SLOT; index_size as usize],
            packets: vec![],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.is_wrapped && self.begin == self.end
    }

    fn live_bytes(&self) -> u64 {
        if self.is_empty() {
            0
        } else if self.begin < self.end {
            self.end - self.begin
        } else {
            self.region_size - self.begin + self.end
        }
    }

    fn free_bytes(&self) -> u64 {
        self.region_size - self.live_bytes()
    }

    fn bulkhead_allows(&self, offset: u64, length: u64) -> bool {
        let bulkhead_start = offset / BULKHEAD_SIZE;
        let last_byte = offset + length - 1;
        let bulkhead_end = last_byte / BULKHEAD_SIZE;
        bulkhead_start == bulkhead_end
    }

    /// If a packet header couldn't fit before the next bulkhead boundary
    /// starting at `cursor`, elongates up to that boundary (or a further
    /// one, if the gap is itself smaller than a packet header) with a dead
    /// filler packet, so the real packet that follows starts exactly on a
    /// boundary and therefore can never straddle one. Returns the
    /// (possibly advanced) cursor a real packet may now start at, or
    /// `None` if there isn't room for the filler.
    fn align_for_bulkhead(&self, cursor: u64, scratch: &mut Vec<(u64, Packet)>) -> Option<u64> {
        let mut boundary = next_bulkhead_boundary(cursor);
        if boundary - cursor >= MIN_PACKET_BYTE_LENGTH as u64 {
            return Some(cursor);
        }
        while boundary - cursor < MIN_PACKET_BYTE_LENGTH as u64 {
            boundary = next_bulkhead_boundary(boundary);
        }
        let filler_len = boundary - cursor;
        if !self.fits_without_overwrite(cursor, filler_len) {
            return None;
        }
        let mut filler = Packet::new((filler_len - HEADER_LENGTH as u64) as u32);
        filler.meta.is_dead = true;
        filler.meta.completes_sequence = true;
        filler.seal(0);
        scratch.push((cursor, filler));
        Some(boundary % self.region_size)
    }

    /// Finds the packet stored at `offset`, if any.
    fn packet_at(&self, offset: u64) -> Option<&Packet> {
        self.packets.iter().find(|(o, _)| *o == offset).map(|(_, p)| p)
    }

    fn packet_at_mut(&mut self, offset: u64) -> Option<&mut Packet> {
        self.packets.iter_mut().find(|(o, _)| *o == offset).map(|(_, p)| p)
    }

    /// Allocates a chain of packets at the ring tail sufficient to hold
    /// `key.len() + value.len()` bytes. A packet that would otherwise
    /// straddle a bulkhead boundary is shrunk to end exactly at the
    /// boundary, spilling the remainder into further packets in the chain;
    /// when a packet header itself can't fit before the boundary, a dead
    /// filler packet elongates the chain up to the boundary first (§4.1d).
    /// Nothing is committed to the ring unless the whole chain fits.
    /// Returns the offset of the chain's head packet, or `None` if there
    /// isn't room in one contiguous walk from `end`.
    pub fn allocate_element(&mut self, key: &[u8], value: &[u8]) -> Option<u64> {
        let mut body = Vec::with_capacity(key.len() + value.len());
        body.extend_from_slice(key);
        body.extend_from_slice(value);

        let mut cursor = self.end;
        let mut scratch: Vec<(u64, Packet)> = vec![];
        let mut offsets = vec![];
        let mut consumed = 0usize;
        let mut key_remaining = key.len();

        loop {
            cursor = self.align_for_bulkhead(cursor, &mut scratch)?;

            let boundary = next_bulkhead_boundary(cursor);
            let max_len_here = (boundary - cursor).min(MAX_PACKET_BYTE_LENGTH as u64);
            let take = (max_len_here - HEADER_LENGTH as u64).min((body.len() - consumed) as u64) as usize;
            let packet_len = HEADER_LENGTH as u64 + take as u64;

            if !self.fits_without_overwrite(cursor, packet_len) {
                return None;
            }

            debug_assert!(self.bulkhead_allows(cursor, packet_len), "allocate_element must never straddle a bulkhead");

            let key_take = key_remaining.min(take);
            key_remaining -= key_take;
            let mut packet = Packet::new(take as u32);
            packet.set_key(&body[consumed..consumed + key_take]);
            packet.set_value(&body[consumed + key_take..consumed + take]);
            packet.meta.continues_sequence = !offsets.is_empty();
            consumed += take;
            packet.meta.completes_sequence = consumed == body.len();

            offsets.push(cursor);
            scratch.push((cursor, packet));
            cursor = (cursor + packet_len) % self.region_size;

            if consumed == body.len() {
                break;
            }
        }

        for window in offsets.windows(2) {
            if let [prev, next] = *window {
                if let Some((_, p)) = scratch.iter_mut().find(|(o, _)| *o == prev) {
                    p.meta.next_in_element = next as u32;
                }
            }
        }

        self.packets.append(&mut scratch);
        self.seal_chain(&offsets);

        self.end = cursor;
        if self.begin == self.end {
            self.is_wrapped = true;
        }

        Some(offsets[0])
    }

    fn fits_without_overwrite(&self, cursor: u64, length: u64) -> bool {
        if self.is_empty() {
            return length <= self.region_size;
        }
        if self.begin < self.end || !self.is_wrapped {
            // tail write may wrap; ensure it doesn't cross begin
            let end_after = cursor + length;
            if end_after <= self.region_size {
                true
            } else {
                (end_after % self.region_size) <= self.begin
            }
        } else {
            cursor + length <= self.begin
        }
    }

    fn seal_chain(&mut self, offsets: &[u64]) {
        let mut running = Crc32::new();
        let checksums: Vec<u32> = offsets
            .iter()
            .map(|&off| {
                self.packet_at(off).unwrap().fold_content_checksum(&mut running);
                running.clone().finalize()
            })
            .collect();
        for (&off, snapshot) in offsets.iter().zip(checksums) {
            if let Some(p) = self.packet_at_mut(off) {
                p.seal(snapshot);
            }
        }
    }

    /// Marks every packet of the chain headed at `head_offset` dead.
    pub fn mark_dead(&mut self, head_offset: u64) {
        let mut cursor = Some(head_offset);
        let mut visited = vec![];
        while let Some(off) = cursor {
            visited.push(off);
            let packet = self.packet_at(off).expect("chain offset must exist");
            let next = packet.meta.next_in_element;
            let completes = packet.meta.completes_sequence;
            cursor = if completes { None } else { Some(u64::from(next)) };
        }
        for off in &visited {
            if let Some(p) = self.packet_at_mut(*off) {
                p.meta.is_dead = true;
            }
        }
    }

    /// Reclaims the head element, provided it is fully dead. Advances
    /// `begin` past it, atomically crossing the wrap point if needed.
    ///
    /// # Panics
    /// Panics if the head packet is not dead (reclamation precondition).
    pub fn reclaim_head(&mut self) {
        assert!(!self.is_empty(), "cannot reclaim from an empty ring");
        let head_offset = self.begin;
        let head = self.packet_at(head_offset).expect("head packet must exist").clone();
        assert!(head.meta.is_dead, "reclaim_head requires a dead head packet");

        let mut cursor = head_offset;
        loop {
            let packet = self.packet_at(cursor).expect("chain offset must exist").clone();
            let packet_len = HEADER_LENGTH as u64 + u64::from(packet.capacity());
            self.packets.retain(|(o, _)| *o != cursor);
            let next_cursor = (cursor + packet_len) % self.region_size;
            if packet.meta.completes_sequence {
                self.begin = next_cursor;
                break;
            }
            cursor = next_cursor;
        }

        if self.begin == self.end {
            self.is_wrapped = false;
        }
    }

    /// Copies the live element at the current head to the tail of the
    /// ring, re-links the index to the new copy, then reclaims the old
    /// head. Used to retire the head's physical storage (so it can be
    /// reclaimed) without losing a still-live element.
    ///
    /// # Panics
    /// Panics if the ring is empty or the head is already dead -- there is
    /// nothing live to rotate.
    pub fn rotate_head(&mut self) -> Option<u64> {
        assert!(!self.is_empty(), "cannot rotate an empty ring");
        let head_offset = self.begin;
        assert!(!self.head_is_dead_at(head_offset), "rotate_head requires a live head");

        let (key, value) = self.element_at(head_offset).expect("head packet must exist");

        let new_head = self.allocate_element(&key, &value)?;

        let old_locate = self.locate_key(&key);
        self.unlink_from_chain(old_locate);
        let new_locate = self.locate_key(&key);
        self.link_into_chain(new_locate, new_head);

        self.mark_dead(head_offset);
        self.reclaim_head();
        Some(new_head)
    }

    /// Hashes `key` to an index slot and walks the hash chain from that
    /// slot, gathering key bytes across packet boundaries to compare
    /// byte-for-byte against `key`.
    #[must_use]
    pub fn locate_key(&self, key: &[u8]) -> LocateResult {
        let slot = index_slot_for(key, self.index_size);
        let mut previous = None;
        let mut cursor = self.index[slot as usize];

        while cursor != EMPTY_SLOT {
            let element_key = self.gather_element_key(cursor);
            if element_key == key {
                return LocateResult { index_slot: slot, previous_chained_head: previous, element_head: Some(cursor) };
            }
            previous = Some(cursor);
            let head = self.packet_at(cursor).expect("chain offset must exist");
            cursor = u64::from(head.meta.hash_chain_next);
        }

        LocateResult { index_slot: slot, previous_chained_head: previous, element_head: None }
    }

    /// Gathers an element's full key across however many packets its chain
    /// spans, stitching the per-packet key fragments together.
    #[must_use]
    pub fn gather_element_key(&self, head_offset: u64) -> Vec<u8> {
        let mut key = vec![];
        let mut cursor = head_offset;
        loop {
            let packet = self.packet_at(cursor).expect("chain offset must exist");
            key.extend_from_slice(packet.key());
            // Key bytes only ever occupy the front of the chain; once a
            // packet carries value bytes (or is the last of the chain),
            // the key is fully gathered.
            if !packet.value().is_empty() || packet.meta.completes_sequence {
                break;
            }
            cursor = u64::from(packet.meta.next_in_element);
        }
        key
    }

    /// Gathers an element's full value across its packet chain.
    #[must_use]
    pub fn gather_element_value(&self, head_offset: u64) -> Vec<u8> {
        let mut value = vec![];
        let mut cursor = head_offset;
        loop {
            let packet = self.packet_at(cursor).expect("chain offset must exist");
            value.extend_from_slice(packet.value());
            if packet.meta.completes_sequence {
                break;
            }
            cursor = u64::from(packet.meta.next_in_element);
        }
        value
    }

    /// Inserts `head_offset` into the hash chain at `index_slot`, wiring it
    /// either as the new chain head (updating the index slot) or after
    /// `previous_chained_head`.
    pub fn link_into_chain(&mut self, locate: LocateResult, head_offset: u64) {
        match locate.previous_chained_head {
            None => self.index[locate.index_slot as usize] = head_offset,
            Some(prev) => {
                if let Some(p) = self.packet_at_mut(prev) {
                    p.meta.hash_chain_next = head_offset as u32;
                }
            }
        }
    }

    /// Removes `head_offset` from the hash chain at `index_slot` (the
    /// packets themselves are separately marked dead and later reclaimed).
    pub fn unlink_from_chain(&mut self, locate: LocateResult) {
        let head_offset = locate.element_head.expect("unlink requires an existing element");
        let next = self.packet_at(head_offset).map(|p| u64::from(p.meta.hash_chain_next)).unwrap_or(EMPTY_SLOT);
        match locate.previous_chained_head {
            None => self.index[locate.index_slot as usize] = next,
            Some(prev) => {
                if let Some(p) = self.packet_at_mut(prev) {
                    p.meta.hash_chain_next = next as u32;
                }
            }
        }
    }

    #[must_use]
    pub fn head_offset(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.begin)
        }
    }

    #[must_use]
    pub fn head_is_dead(&self) -> bool {
        self.head_offset().is_some_and(|off| self.packet_at(off).is_some_and(|p| p.meta.is_dead))
    }

    #[must_use]
    pub fn begin_offset(&self) -> u64 {
        self.begin
    }

    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.end
    }

    /// Whether the chain headed at `offset` is dead. `offset` must name an
    /// existing packet (a chain head reached by iteration or lookup).
    #[must_use]
    pub fn head_is_dead_at(&self, offset: u64) -> bool {
        self.packet_at(offset).is_some_and(|p| p.meta.is_dead)
    }

    /// Gathers the key/value pair of the element headed at `offset`, or
    /// `None` if no packet is stored there. Verifies the chain's checksum
    /// first, per the storage integrity policy (§7): this is the read path
    /// `Persister::get` and `iterate_next` funnel through.
    #[must_use]
    pub fn element_at(&self, offset: u64) -> Option<(Vec<u8>, Vec<u8>)> {
        self.packet_at(offset)?;
        self.verify_chain_integrity(offset);
        Some((self.gather_element_key(offset), self.gather_element_value(offset)))
    }

    /// Recomputes every packet's stored checksum across the chain headed at
    /// `head_offset`, exactly as `seal_chain` computed them when written.
    ///
    /// # Panics
    /// Panics on a mismatch -- a torn write is fatal to the process per the
    /// storage integrity policy (§7), not a recoverable error.
    fn verify_chain_integrity(&self, head_offset: u64) {
        let mut running = Crc32::new();
        let mut cursor = head_offset;
        loop {
            let packet = self.packet_at(cursor).expect("chain offset must exist");
            packet.fold_content_checksum(&mut running);
            let snapshot = running.clone().finalize();
            assert!(packet.check_integrity(snapshot), "packet at offset {cursor} failed its integrity check");
            if packet.meta.completes_sequence {
                break;
            }
            cursor = u64::from(packet.meta.next_in_element);
        }
    }

    /// Returns the offset immediately following the full packet chain
    /// headed at `offset`, for walking a ring element-by-element.
    #[must_use]
    pub fn next_offset(&self, offset: u64) -> u64 {
        let mut cursor = offset;
        loop {
            let Some(packet) = self.packet_at(cursor) else { return cursor };
            let packet_len = HEADER_LENGTH as u64 + u64::from(packet.capacity());
            let next = (cursor + packet_len) % self.region_size;
            if packet.meta.completes_sequence {
                return next;
            }
            cursor = next;
        }
    }
}

fn index_slot_for(key: &[u8], index_size: u32) -> u32 {
    if index_size == 0 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % u64::from(index_size)) as u32
}

/// The offset one past the end of the bulkhead region containing `offset`.
fn next_bulkhead_boundary(offset: u64) -> u64 {
    (offset / BULKHEAD_SIZE + 1) * BULKHEAD_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_locate_round_trips() {
        let mut ring = HashRing::new(1 << 16, 17);
        let head = ring.allocate_element(b"foo", b"bar").expect("room for a small element");
        ring.link_into_chain(ring.locate_key(b"foo"), head);

        let located = ring.locate_key(b"foo");
        assert_eq!(located.element_head, Some(head));
        assert_eq!(ring.gather_element_value(head), b"bar");
    }

    #[test]
    fn locate_missing_key_returns_none() {
        let ring = HashRing::new(1 << 16, 17);
        assert_eq!(ring.locate_key(b"absent").element_head, None);
    }

    #[test]
    fn reclaim_head_advances_begin_past_dead_element() {
        let mut ring = HashRing::new(1 << 16, 17);
        let head = ring.allocate_element(b"k", b"v").unwrap();
        ring.mark_dead(head);
        assert!(ring.head_is_dead());
        ring.reclaim_head();
        assert!(ring.is_empty());
    }

    #[test]
    fn allocate_shrinks_packet_to_fit_before_bulkhead_boundary() {
        let mut ring = HashRing::new(BULKHEAD_SIZE * 3, 17);
        ring.end = BULKHEAD_SIZE - 20; // room for a header plus 4 content bytes before the boundary
        let head = ring.allocate_element(b"abcdefgh", b"").expect("room across the boundary");
        assert_eq!(ring.gather_element_key(head), b"abcdefgh");
    }

    #[test]
    fn allocate_elongates_with_filler_when_no_room_for_a_header_before_boundary() {
        let mut ring = HashRing::new(BULKHEAD_SIZE * 3, 17);
        ring.end = BULKHEAD_SIZE - 5; // too little room even for one packet header
        let head = ring.allocate_element(b"k", b"v").expect("room after elongating past the boundary");
        assert!(head >= BULKHEAD_SIZE, "real packet should start at or after the boundary, got {head}");
        assert_eq!(ring.gather_element_value(head), b"v");
    }

    #[test]
    fn multi_packet_element_survives_a_hash_chain_collision() {
        // Force every key into index slot 0, so the second insert must
        // walk the collision chain past the first.
        let mut ring = HashRing::new(BULKHEAD_SIZE * 3, 1);
        ring.end = BULKHEAD_SIZE - 20; // "abcdefgh" splits across the boundary into two packets
        let head_a = ring.allocate_element(b"abcdefgh", b"").expect("room across the boundary");
        ring.link_into_chain(ring.locate_key(b"abcdefgh"), head_a);

        let head_b = ring.allocate_element(b"short", b"v").expect("room for the second element");
        ring.link_into_chain(ring.locate_key(b"short"), head_b);

        // The multi-packet element's own intra-chain link must survive
        // linking a colliding second element into the hash chain.
        assert_eq!(ring.gather_element_key(head_a), b"abcdefgh");
        let located_a = ring.locate_key(b"abcdefgh");
        assert_eq!(located_a.element_head, Some(head_a));

        // The second element must be reachable by walking past the first
        // via the (separate) collision-chain pointer.
        let located_b = ring.locate_key(b"short");
        assert_eq!(located_b.element_head, Some(head_b));
        assert_eq!(ring.gather_element_value(head_b), b"v");
    }

    #[test]
    fn rotate_head_preserves_value_and_frees_old_head() {
        let mut ring = HashRing::new(1 << 16, 17);
        let head = ring.allocate_element(b"k", b"v").unwrap();
        ring.link_into_chain(ring.locate_key(b"k"), head);

        let new_head = ring.rotate_head().expect("room to rotate");
        assert_ne!(new_head, head);
        let located = ring.locate_key(b"k");
        assert_eq!(located.element_head, Some(new_head));
        assert_eq!(ring.gather_element_value(new_head), b"v");
    }

    #[test]
    fn allocate_fails_when_region_is_full() {
        let mut ring = HashRing::new(64, 4);
        let mut allocated = 0;
        while ring.allocate_element(b"key", &vec![0u8; 20]).is_some() {
            allocated += 1;
            assert!(allocated < 100, "allocation should have failed by now");
        }
    }
}
