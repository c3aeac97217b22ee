//! The rolling-hash, append-only storage engine: a ring of [`Packet`]s per
//! layer ([`hash_ring`]), a layered [`Persister`] that compacts the oldest
//! layer forward, and the [`record::PersistedRecord`] shape stored under
//! each key.

pub mod hash_ring;
pub mod packet;
pub mod persister;
pub mod record;

pub use hash_ring::HashRing;
pub use packet::{Packet, PacketMeta};
pub use persister::{Element, Persister, PutResult};
pub use record::{Payload, PersistedRecord};
