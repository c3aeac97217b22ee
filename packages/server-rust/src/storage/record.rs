//! `PersistedRecord`: the payload a [`super::persister::Persister`] stores
//! under a key -- a `ClusterClock` paired with a datatype-specific value and
//! an optional expiry. Grounded on the original `persistence::record`
//! wrapper, which ties every stored blob to its clock so merges never lose
//! causal history.

use samoa_core::{Blob, ClusterClock, Counter};
use serde::{Deserialize, Serialize};

/// The datatype-specific payload carried alongside a record's clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Blob(Blob),
    Counter(Counter),
}

impl Payload {
    #[must_use]
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Payload::Blob(blob) => Some(blob),
            Payload::Counter(_) => None,
        }
    }

    #[must_use]
    pub fn as_counter(&self) -> Option<&Counter> {
        match self {
            Payload::Counter(counter) => Some(counter),
            Payload::Blob(_) => None,
        }
    }
}

/// A single stored record: causal clock, datatype payload, and an optional
/// expiry timestamp (unix seconds) past which the record is tombstoned on
/// next read or compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub cluster_clock: ClusterClock,
    pub payload: Payload,
    pub expire_timestamp: Option<u64>,
}

impl PersistedRecord {
    #[must_use]
    pub fn new_blob(cluster_clock: ClusterClock, blob: Blob) -> Self {
        Self { cluster_clock, payload: Payload::Blob(blob), expire_timestamp: None }
    }

    #[must_use]
    pub fn new_counter(cluster_clock: ClusterClock, counter: Counter) -> Self {
        Self { cluster_clock, payload: Payload::Counter(counter), expire_timestamp: None }
    }

    #[must_use]
    pub fn is_expired(&self, now_unix_seconds: u64) -> bool {
        self.expire_timestamp.is_some_and(|expiry| expiry <= now_unix_seconds)
    }

    /// Checks the per-datatype slot-count invariant: every live partition
    /// clock entry has a corresponding value slot and vice versa.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let clock_slots = self.cluster_clock.partition_clock.len();
        match &self.payload {
            Payload::Blob(blob) => blob.blob_value.len() == clock_slots,
            Payload::Counter(counter) => counter.counter_value.len() == clock_slots,
        }
    }

    /// Serializes this record for storage in a packet body.
    ///
    /// # Errors
    /// Returns an error if msgpack encoding fails (it does not, for any
    /// value this type can hold, but the fallible signature is kept so
    /// callers don't need to special-case this type against others).
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserializes a record previously written by [`Self::encode`].
    ///
    /// # Errors
    /// Returns an error if `bytes` is not a valid encoding of this type.
    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samoa_core::context::test_support::{FixedClock, SequentialIdentitySource};
    use samoa_core::{ClusterClock as Clock, Context};

    fn context() -> Context {
        Context::new(Box::new(FixedClock::new(1_000)), Box::new(SequentialIdentitySource::default()))
    }

    #[test]
    fn blob_record_round_trips_through_encoding() {
        let ctx = context();
        let mut clock = Clock::new();
        let mut blob = Blob::new();
        let author = ctx.identity.new_uuid();
        blob.update(&mut clock, author, b"hello".to_vec(), ctx.now());
        let record = PersistedRecord::new_blob(clock, blob);

        let encoded = record.encode().expect("encode");
        let decoded = PersistedRecord::decode(&encoded).expect("decode");
        assert_eq!(decoded.payload.as_blob().unwrap().value().next(), Some(b"hello".as_slice()));
    }

    #[test]
    fn expiry_is_only_reached_once_now_passes_it() {
        let mut record = PersistedRecord::new_blob(Clock::new(), Blob::new());
        record.expire_timestamp = Some(1_500);
        assert!(!record.is_expired(1_000));
        assert!(record.is_expired(1_500));
        assert!(record.is_expired(2_000));
    }

    #[test]
    fn fresh_record_is_consistent() {
        let record = PersistedRecord::new_counter(Clock::new(), Counter::new());
        assert!(record.is_consistent());
    }
}
