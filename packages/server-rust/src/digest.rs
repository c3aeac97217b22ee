//! Digest: a Bloom filter over `(key, content-hash)` pairs for one local
//! partition, backed by a memory-mapped file so its state survives process
//! restart. Used to short-circuit replication RPCs when both sides already
//! agree on a record's content (§4.9).
//!
//! Grounded on the original `digest`/`local_digest` pair: a properties
//! struct (seed, byte length, owning partition) plus a raw memory-mapped
//! filter file. `memmap2` is the idiomatic choice already present in the
//! retrieval pack for exactly this kind of mapped-file use.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use uuid::Uuid;

use samoa_core::messages::DigestProperties;

/// Number of bit positions set per added entry (standard double-hashing
/// Bloom filter scheme: `h_i(x) = h1(x) + i * h2(x)`).
const HASH_COUNT: u32 = 7;

/// A Bloom filter over 128-bit content hashes, backed by a byte slice the
/// caller owns (either a `Vec<u8>` in memory or a memory map).
pub struct Digest<S> {
    pub properties: DigestProperties,
    storage: S,
}

pub trait FilterStorage: AsRef<[u8]> + AsMut<[u8]> {}
impl<T: AsRef<[u8]> + AsMut<[u8]>> FilterStorage for T {}

impl<S: FilterStorage> Digest<S> {
    pub fn new(properties: DigestProperties, storage: S) -> Self {
        assert_eq!(storage.as_ref().len(), properties.byte_length as usize);
        Self { properties, storage }
    }

    fn bit_positions(&self, checksum: u128) -> impl Iterator<Item = usize> + '_ {
        let bit_count = self.storage.as_ref().len() as u64 * 8;
        let h1 = (checksum as u64) ^ self.properties.seed;
        let h2 = ((checksum >> 64) as u64) ^ self.properties.seed.rotate_left(17);
        (0..HASH_COUNT).map(move |i| (h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % bit_count.max(1)) as usize)
    }

    /// Adds the content hash of `(key, serialized record)` to the filter.
    pub fn add(&mut self, checksum: u128) {
        let positions: Vec<usize> = self.bit_positions(checksum).collect();
        for bit in positions {
            let byte = bit / 8;
            let mask = 1u8 << (bit % 8);
            self.storage.as_mut()[byte] |= mask;
        }
    }

    /// Tests whether `checksum` may already be known to this partition. A
    /// `false` is certain; a `true` may be a false positive.
    #[must_use]
    pub fn test(&self, checksum: u128) -> bool {
        self.bit_positions(checksum).all(|bit| {
            let byte = bit / 8;
            let mask = 1u8 << (bit % 8);
            self.storage.as_ref()[byte] & mask != 0
        })
    }
}

/// Computes the 128-bit content hash of a `(key, serialized record)` pair
/// added to and tested against a digest.
#[must_use]
pub fn content_hash(key: &[u8], serialized_record: &[u8]) -> u128 {
    // SipHash-backed DefaultHasher only gives 64 bits; fold two independent
    // 64-bit hashes (over the key and over the record) into 128 bits so the
    // false-positive math in `bit_positions` has real entropy in both
    // halves.
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut key_hasher = DefaultHasher::new();
    key.hash(&mut key_hasher);
    let key_hash = key_hasher.finish();

    let mut record_hasher = DefaultHasher::new();
    serialized_record.hash(&mut record_hasher);
    key_hash.hash(&mut record_hasher);
    let record_hash = record_hasher.finish();

    (u128::from(key_hash) << 64) | u128::from(record_hash)
}

/// An in-memory digest, used for tests and for a freshly rotated
/// (empty) filter before it's installed on disk.
pub type HeapDigest = Digest<Vec<u8>>;

#[must_use]
pub fn new_heap_digest(partition_uuid: Uuid, byte_length: u32, seed: u64) -> HeapDigest {
    let properties = DigestProperties { seed, byte_length, partition_uuid };
    Digest::new(properties, vec![0u8; byte_length as usize])
}

/// A digest backed by a memory-mapped file, exclusively locked on open so
/// concurrent processes cannot share it (§5). The lock is held for as long
/// as `file` stays open -- it is released by the OS the moment every
/// descriptor for this open file description closes, so `file` must live
/// alongside the mapping rather than being dropped once mapped.
pub struct MappedDigestFile {
    // Held only to keep the advisory lock alive for the mapping's lifetime;
    // never read directly.
    #[allow(dead_code)]
    file: File,
    map: MmapMut,
}

impl AsRef<[u8]> for MappedDigestFile {
    fn as_ref(&self) -> &[u8] {
        &self.map
    }
}

impl AsMut<[u8]> for MappedDigestFile {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

/// Opens (creating if absent) `path` as a `byte_length`-byte memory-mapped
/// digest filter file, taking an OS advisory exclusive lock on it first
/// (§5: "concurrent processes must not share a digest file").
///
/// # Errors
/// Returns an error if the file cannot be created, sized, or mapped, or if
/// another process already holds the lock.
pub fn open_mapped_digest(
    path: &Path,
    properties: DigestProperties,
) -> io::Result<Digest<MappedDigestFile>> {
    let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
    file.try_lock_exclusive()?;
    file.set_len(u64::from(properties.byte_length))?;
    let map = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(Digest::new(properties, MappedDigestFile { file, map }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_digest() -> HeapDigest {
        new_heap_digest(Uuid::from_bytes([1; 16]), 4096, 0xABCD)
    }

    #[test]
    fn added_entry_tests_present() {
        let mut digest = test_digest();
        let checksum = content_hash(b"foo", b"bar");
        assert!(!digest.test(checksum));
        digest.add(checksum);
        assert!(digest.test(checksum));
    }

    #[test]
    fn distinct_content_hashes_rarely_collide() {
        let a = content_hash(b"foo", b"bar");
        let b = content_hash(b"foo", b"baz");
        assert_ne!(a, b);
    }

    #[test]
    fn digest_short_circuits_when_both_sides_agree() {
        let mut local = test_digest();
        let checksum = content_hash(b"k", b"v1");
        local.add(checksum);

        // Peer has gossiped a digest that already contains this checksum:
        // replication of the same value should be suppressed.
        assert!(local.test(checksum));
    }

    #[test]
    fn mapped_digest_file_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.bin");
        let properties = DigestProperties { seed: 0x1234, byte_length: 1024, partition_uuid: Uuid::from_bytes([3; 16]) };
        let checksum = content_hash(b"k", b"v1");

        {
            let mut digest = open_mapped_digest(&path, properties.clone()).expect("open for write");
            digest.add(checksum);
        } // lock released on drop

        let digest = open_mapped_digest(&path, properties).expect("reopen after close");
        assert!(digest.test(checksum));
    }

    #[test]
    fn mapped_digest_file_rejects_a_second_concurrent_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.bin");
        let properties = DigestProperties { seed: 1, byte_length: 256, partition_uuid: Uuid::from_bytes([4; 16]) };

        let _held_open = open_mapped_digest(&path, properties.clone()).expect("first open takes the lock");
        let second = open_mapped_digest(&path, properties);
        assert!(second.is_err(), "a second process must not be able to share the digest file");
    }
}
