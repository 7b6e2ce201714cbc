//! Internal shard-to-shard wire types.
//!
//! Requests are encoded with postcard and framed with a length prefix.
//! Every outbound request in one fan-out batch is transmitted at the same
//! frame length: the serialized payload plus a per-shard padding count
//! computed against the longest payload in the batch, so an observer of the
//! internal links cannot infer per-shard key-count skew. Padding bytes are
//! zeros after the payload; decoding ignores trailing bytes.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ErrorCode;
use crate::error::LookupError;

/// First byte of every framed request, selecting the message that follows.
pub mod request_kind {
    /// [`InternalLookupRequest`](super::InternalLookupRequest) follows.
    pub const LOOKUP: u8 = 0;
    /// [`InternalRunQueryRequest`](super::InternalRunQueryRequest) follows.
    pub const RUN_QUERY: u8 = 1;
    /// [`InternalRunQueryRequest`](super::InternalRunQueryRequest) follows;
    /// evaluated over uint32 sets.
    pub const RUN_SET_QUERY_INT: u8 = 2;
}

/// Request-scoped logging context carried through the fan-out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogContext {
    /// Generation id of the originating public request.
    pub generation_id: String,
    /// Adtech-provided debug id, if any.
    pub adtech_debug_id: String,
}

/// Consent state for verbose debug logging, propagated with each request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsentedDebugConfig {
    /// Whether the client consented to debug logging.
    pub is_consented: bool,
    /// Opaque consent token.
    pub token: String,
}

/// A lookup request sent to one shard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InternalLookupRequest {
    /// Keys owned by the target shard.
    pub keys: Vec<String>,
    /// When true, the shard resolves set-valued entries instead of scalars.
    pub lookup_sets: bool,
    /// Logging context of the originating request.
    pub log_context: LogContext,
    /// Debug consent of the originating request.
    pub consented_debug_config: ConsentedDebugConfig,
}

/// Status attached to a single key when its lookup did not produce a value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupStatus {
    /// Error kind.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl LookupStatus {
    /// Status for a key absent from the shard that owns it.
    pub fn not_found() -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: "Key not found".to_string(),
        }
    }

    /// Status for every key of a shard whose lookup failed.
    pub fn lookup_failed() -> Self {
        Self {
            code: ErrorCode::Internal,
            message: "Data lookup failed".to_string(),
        }
    }
}

/// The outcome of looking up one key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SingleLookupResult {
    /// A scalar value.
    Value(String),
    /// A string-set value.
    KeysetValues(Vec<String>),
    /// A uint32-set value.
    UintsetValues(Vec<u32>),
    /// No value; carries the per-key status.
    Status(LookupStatus),
}

/// Response from one shard: one result per requested key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InternalLookupResponse {
    /// Per-key lookup results.
    pub kv_pairs: HashMap<String, SingleLookupResult>,
}

/// A set-algebra query forwarded to the query engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InternalRunQueryRequest {
    /// The infix query text.
    pub query: String,
}

/// Result of a string set-algebra query: the flattened element list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InternalRunQueryResponse {
    /// Elements of the resulting set, in no particular order.
    pub elements: Vec<String>,
}

/// Result of a uint32 set-algebra query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InternalRunSetQueryIntResponse {
    /// Elements of the resulting set, in no particular order.
    pub elements: Vec<u32>,
}

/// Serialize a wire message with postcard.
pub fn serialize<T: Serialize>(message: &T) -> Result<Vec<u8>, LookupError> {
    postcard::to_allocvec(message)
        .map_err(|err| LookupError::internal(format!("request serialization failed: {err}")))
}

/// Deserialize a wire message, ignoring trailing padding bytes.
pub fn deserialize<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, LookupError> {
    postcard::take_from_bytes(bytes)
        .map(|(message, _rest)| message)
        .map_err(|err| LookupError::internal(format!("request deserialization failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(keys: &[&str]) -> InternalLookupRequest {
        InternalLookupRequest {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            lookup_sets: false,
            log_context: LogContext::default(),
            consented_debug_config: ConsentedDebugConfig::default(),
        }
    }

    #[test]
    fn roundtrip_survives_trailing_padding() {
        let original = request(&["key1", "key2"]);
        let mut bytes = serialize(&original).unwrap();
        bytes.extend(std::iter::repeat(0u8).take(37));

        let decoded: InternalLookupRequest = deserialize(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn longer_key_lists_serialize_longer() {
        let short = serialize(&request(&["a"])).unwrap();
        let long = serialize(&request(&["a", "bb", "ccc"])).unwrap();
        assert!(long.len() > short.len());
    }

    #[test]
    fn response_roundtrip() {
        let mut response = InternalLookupResponse::default();
        response
            .kv_pairs
            .insert("key1".into(), SingleLookupResult::Value("value1".into()));
        response
            .kv_pairs
            .insert("key2".into(), SingleLookupResult::Status(LookupStatus::not_found()));
        response
            .kv_pairs
            .insert("key3".into(), SingleLookupResult::UintsetValues(vec![1, 2, 3]));

        let bytes = serialize(&response).unwrap();
        let decoded: InternalLookupResponse = deserialize(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = deserialize::<InternalLookupResponse>(&[0xff, 0xff, 0xff, 0xff, 0xff]);
        assert!(err.is_err());
    }
}
