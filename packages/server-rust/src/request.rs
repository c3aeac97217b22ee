//! The request state machine (§4.6): each incoming request loads state in a
//! fixed order -- client/IO context, the target `Table`, the ring `Route`,
//! a `Replication` plan, and finally the local `Record` -- stopping at the
//! first stage that fails with a [`StateException`]. Grounded on the
//! original request pipeline's staged `state::*` loaders, expressed here as
//! a linear async function per the Design Notes rather than a callback
//! chain.

use samoa_core::routing::{peers_match_derived, route, RouteState, Table};
use uuid::Uuid;

use crate::error::StateException;
use crate::storage::PersistedRecord;

/// Identifies the requesting client/connection context. Framing and
/// transport are out of scope; this carries only what downstream request
/// logic needs.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub request_id: Uuid,
    pub remote_addr: String,
}

/// A fully loaded request, ready for the operation-specific handler
/// (get/set/replicate/...) to act on.
pub struct LoadedRequest<'a> {
    pub client: ClientContext,
    pub table: &'a Table,
    pub route: RouteState,
    pub requested_quorum: u32,
    pub record: Option<PersistedRecord>,
}

/// Looks up the table named `table_name` in `tables`, or fails with
/// `NotFound`.
///
/// # Errors
/// Returns [`StateException::NotFound`] if no table with that name exists.
pub fn load_table<'a>(tables: &'a [Table], table_name: &str) -> Result<&'a Table, StateException> {
    tables
        .iter()
        .find(|t| t.name == table_name && !t.dropped)
        .ok_or_else(|| StateException::NotFound(format!("no table named {table_name}")))
}

/// Walks the ring for `key` within `table`, failing with `Internal` if the
/// table's ring is empty (a misconfigured or not-yet-bootstrapped table).
///
/// # Errors
/// Returns [`StateException::Internal`] if the table has no partitions.
pub fn load_route(table: &Table, key: &[u8]) -> Result<RouteState, StateException> {
    if table.ring.is_empty() {
        return Err(StateException::Internal(format!("table {} has no partitions", table.name)));
    }
    Ok(route(table, key))
}

/// Validates an explicit peer-partition-uuid list against the route the
/// ring derives for this key, when the request carries one. Requests that
/// omit an explicit peer list (the common case) skip this stage entirely.
///
/// # Errors
/// Returns [`StateException::Conflict`] if `explicit_peer_uuids` disagrees
/// with the derived route.
pub fn load_peer_consistency(
    route: &RouteState,
    explicit_peer_uuids: Option<&[Uuid]>,
) -> Result<(), StateException> {
    if let Some(explicit) = explicit_peer_uuids {
        if !peers_match_derived(route, explicit) {
            return Err(StateException::Conflict(
                "explicit peer set disagrees with the ring-derived route".to_string(),
            ));
        }
    }
    Ok(())
}

/// Validates a requested replication quorum against the table's replication
/// factor, per the invariant `quorum <= R`. Per §6, `requested_quorum == 0`
/// means "all" and resolves to the table's replication factor rather than
/// being rejected.
///
/// # Errors
/// Returns [`StateException::BadRequest`] if `requested_quorum` exceeds the
/// table's replication factor.
pub fn load_replication_quorum(table: &Table, requested_quorum: u32) -> Result<u32, StateException> {
    let quorum = if requested_quorum == 0 { table.replication_factor } else { requested_quorum };
    if quorum > table.replication_factor {
        return Err(StateException::BadRequest(format!(
            "requested quorum {requested_quorum} is not in [0, {}]",
            table.replication_factor
        )));
    }
    Ok(quorum)
}

/// Loads the local `Record` for a route's primary partition through
/// `fetch`, a closure abstracting over the persister lookup so this
/// function stays storage-agnostic.
///
/// # Errors
/// Returns [`StateException::Internal`] if the route has no primary
/// (the local server does not own any replica for this key).
pub fn load_record(
    route: &RouteState,
    local_server_uuid: Uuid,
    fetch: impl FnOnce(&[u8]) -> Option<PersistedRecord>,
    key: &[u8],
) -> Result<Option<PersistedRecord>, StateException> {
    if route.primary(local_server_uuid).is_none() {
        return Err(StateException::Internal("local server does not own a replica for this key".to_string()));
    }
    Ok(fetch(key))
}

/// Runs the full five-stage load in order, stopping at the first failure.
///
/// # Errors
/// Returns whichever stage's [`StateException`] first fails.
pub fn load_request<'a>(
    client: ClientContext,
    tables: &'a [Table],
    table_name: &str,
    key: &[u8],
    local_server_uuid: Uuid,
    requested_quorum: u32,
    explicit_peer_uuids: Option<&[Uuid]>,
    fetch: impl FnOnce(&[u8]) -> Option<PersistedRecord>,
) -> Result<LoadedRequest<'a>, StateException> {
    let table = load_table(tables, table_name)?;
    let route = load_route(table, key)?;
    load_peer_consistency(&route, explicit_peer_uuids)?;
    let requested_quorum = load_replication_quorum(table, requested_quorum)?;
    let record = load_record(&route, local_server_uuid, fetch, key)?;
    Ok(LoadedRequest { client, table, route, requested_quorum, record })
}

#[cfg(test)]
mod tests {
    use super::*;
    use samoa_core::routing::{DataType, Partition};

    fn partition(uuid: Uuid, server: Uuid, position: u64) -> Partition {
        Partition {
            uuid,
            server_uuid: server,
            ring_position: position,
            range_begin: 0,
            range_end: 0,
            consistent_range_begin: 0,
            consistent_range_end: 0,
            lamport_ts: 0,
            is_tracked: true,
            dropped: false,
        }
    }

    fn table(name: &str, server: Uuid) -> Table {
        Table {
            uuid: Uuid::from_bytes([9; 16]),
            name: name.to_string(),
            data_type: DataType::Blob,
            replication_factor: 2,
            consistency_horizon_secs: 60,
            ring: vec![partition(Uuid::from_bytes([1; 16]), server, 100)],
            lamport_ts: 0,
            dropped: false,
        }
    }

    #[test]
    fn missing_table_is_not_found() {
        let err = load_table(&[], "widgets").unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn quorum_above_replication_factor_is_bad_request() {
        let server = Uuid::from_bytes([2; 16]);
        let table = table("widgets", server);
        let err = load_replication_quorum(&table, 5).unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn zero_quorum_resolves_to_replication_factor() {
        let server = Uuid::from_bytes([2; 16]);
        let table = table("widgets", server);
        let quorum = load_replication_quorum(&table, 0).expect("0 means all");
        assert_eq!(quorum, table.replication_factor);
    }

    #[test]
    fn full_load_succeeds_for_owned_key() {
        let server = Uuid::from_bytes([2; 16]);
        let tables = vec![table("widgets", server)];
        let client = ClientContext { request_id: Uuid::from_bytes([3; 16]), remote_addr: "127.0.0.1:1".into() };

        let loaded = load_request(client, &tables, "widgets", b"k", server, 1, None, |_| None)
            .expect("request should load");
        assert_eq!(loaded.requested_quorum, 1);
        assert!(loaded.record.is_none());
    }

    #[test]
    fn load_fails_when_local_server_owns_no_replica() {
        let owner = Uuid::from_bytes([2; 16]);
        let local = Uuid::from_bytes([4; 16]);
        let tables = vec![table("widgets", owner)];
        let client = ClientContext { request_id: Uuid::from_bytes([3; 16]), remote_addr: "127.0.0.1:1".into() };

        let err = load_request(client, &tables, "widgets", b"k", local, 1, None, |_| None).unwrap_err();
        assert_eq!(err.code(), 500);
    }

    #[test]
    fn mismatched_explicit_peer_set_is_conflict() {
        let server = Uuid::from_bytes([2; 16]);
        let tables = vec![table("widgets", server)];
        let client = ClientContext { request_id: Uuid::from_bytes([3; 16]), remote_addr: "127.0.0.1:1".into() };

        let bogus_peer = Uuid::from_bytes([0xEE; 16]);
        let err = load_request(client, &tables, "widgets", b"k", server, 1, Some(&[bogus_peer]), |_| None)
            .unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[test]
    fn matching_explicit_peer_set_passes() {
        let server = Uuid::from_bytes([2; 16]);
        let tables = vec![table("widgets", server)];
        let client = ClientContext { request_id: Uuid::from_bytes([3; 16]), remote_addr: "127.0.0.1:1".into() };

        let route = load_route(&tables[0], b"k").unwrap();
        let derived: Vec<Uuid> = route.replicas.iter().map(|p| p.uuid).collect();

        let loaded = load_request(client, &tables, "widgets", b"k", server, 1, Some(&derived), |_| None)
            .expect("matching peer set should load");
        assert_eq!(loaded.requested_quorum, 1);
    }
}
