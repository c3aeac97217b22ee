//! Request/response vocabulary exchanged between peers and (nominally)
//! between client and server.
//!
//! Actual framing (the 2-byte big-endian length prefix, then a serialized
//! message, then raw data blocks) is out of scope here -- these are the
//! message bodies, serialized with `rmp-serde` the way the rest of the
//! workspace serializes its wire types. Data-block payloads (the
//! serialized record for a write, or a digest filter's raw bytes) are
//! modeled as `Vec<u8>` fields rather than separately-framed blocks, since
//! the framing layer itself is out of scope.

use uuid::Uuid;

use crate::clock::ClusterClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RequestType {
    Ping,
    Shutdown,
    ClusterState,
    GetBlob,
    SetBlob,
    Replicate,
    CounterValue,
    UpdateCounter,
    DigestSync,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SamoaRequest {
    pub request_id: u64,
    pub request_type: RequestType,
    pub table_uuid: Option<Uuid>,
    pub table_name: Option<String>,
    pub key: Vec<u8>,
    pub partition_uuid: Option<Uuid>,
    pub peer_partition_uuid: Vec<Uuid>,
    pub requested_quorum: u32,
    pub cluster_clock: Option<ClusterClock>,
    pub counter_update: Option<i64>,
    pub digest_properties: Option<DigestProperties>,
    /// Serialized record / filter payload, when the request carries one
    /// (writes, `REPLICATE`, `DIGEST_SYNC`).
    pub data_block: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SamoaResponse {
    pub request_id: u64,
    pub success: bool,
    pub replication_success: u32,
    pub replication_failure: u32,
    pub counter_value: Option<i64>,
    pub cluster_clock: Option<ClusterClock>,
    pub data_block: Option<Vec<u8>>,
    pub error: Option<ErrorResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}

/// `DIGEST_SYNC` metadata describing a Bloom filter's shape so the
/// receiving peer can interpret the accompanying filter bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DigestProperties {
    pub seed: u64,
    pub byte_length: u32,
    pub partition_uuid: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T>(value: &T) -> T
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let bytes = rmp_serde::to_vec_named(value).expect("serialize");
        rmp_serde::from_slice(&bytes).expect("deserialize")
    }

    #[test]
    fn request_round_trips() {
        let request = SamoaRequest {
            request_id: 7,
            request_type: RequestType::SetBlob,
            table_uuid: Some(Uuid::from_bytes([1; 16])),
            table_name: None,
            key: b"foo".to_vec(),
            partition_uuid: None,
            peer_partition_uuid: vec![Uuid::from_bytes([2; 16])],
            requested_quorum: 2,
            cluster_clock: Some(ClusterClock::new()),
            counter_update: None,
            digest_properties: None,
            data_block: Some(b"bar".to_vec()),
        };
        assert_eq!(round_trip(&request), request);
    }

    #[test]
    fn response_round_trips() {
        let response = SamoaResponse {
            request_id: 7,
            success: true,
            replication_success: 2,
            replication_failure: 0,
            counter_value: Some(10),
            cluster_clock: None,
            data_block: None,
            error: None,
        };
        assert_eq!(round_trip(&response), response);
    }

    #[test]
    fn error_response_round_trips() {
        let error = ErrorResponse { code: 409, message: "peer set mismatch".to_string() };
        assert_eq!(round_trip(&error), error);
    }

    #[test]
    fn digest_properties_round_trips() {
        let props = DigestProperties { seed: 42, byte_length: 4096, partition_uuid: Uuid::from_bytes([3; 16]) };
        assert_eq!(round_trip(&props), props);
    }
}
