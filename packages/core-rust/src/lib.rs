//! Samoa core -- the causal data model shared by every storage node:
//!
//! - **Hash** ([`hash`]): stable ring-position hashing.
//! - **Clock** ([`clock`]): `ClusterClock`, the callback-parameterized
//!   tick/prune/merge algebra.
//! - **Datatypes** ([`datatypes`]): `Blob` and `Counter`, built atop the
//!   clock algebra.
//! - **Routing** ([`routing`]): `Partition`, `Table`, `ClusterState` shapes
//!   and the read-only ring walk.
//! - **Messages** ([`messages`]): the request/response vocabulary (data
//!   shapes only; framing is out of scope).
//! - **Context** ([`context`]): explicit wall-clock and identity sources,
//!   replacing the process globals of the original implementation.

pub mod clock;
pub mod context;
pub mod datatypes;
pub mod hash;
pub mod messages;
pub mod routing;

pub use clock::{ClusterClock, PartitionClock};
pub use context::Context;
pub use datatypes::{Blob, Counter};
pub use hash::ring_position;
pub use messages::{RequestType, SamoaRequest, SamoaResponse};
pub use routing::{ClusterState, DataType, Partition, PeerServer, RouteState, Table};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        let _ = ring_position(b"x");
        let _ = ClusterClock::new();
        let _ = Blob::new();
        let _ = Counter::new();
    }
}
