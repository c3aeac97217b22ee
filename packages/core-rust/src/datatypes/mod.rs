//! The two concrete datatypes that ride on top of [`crate::clock::ClusterClock`].
//!
//! Both follow the same shape: a `Vec` entry parallels each clock slot, plus
//! a "consistent" aggregate that absorbs whatever gets pruned out of the
//! clock. Both expose `update`/`prune`/`merge`/`value` with the same
//! signatures so request handling can be generic over datatype where it
//! matters (see `samoa-server`'s replication pipeline).

pub mod blob;
pub mod counter;

pub use blob::Blob;
pub use counter::Counter;
