//! Key/value lookup: the trait seam, the local cache facade, the remote
//! client, and the sharded fan-out.
//!
//! [`Lookup`] is the one interface callers (the UDF layer) see. It has two
//! implementations: [`LocalLookup`], a thin read facade over the in-process
//! cache, and [`ShardedLookup`], which fans a batch out across all shards and
//! merges the results. Single-shard deployments use [`LocalLookup`] directly;
//! [`ShardedLookup`] refuses to be built for fewer than two shards.

pub mod local;
pub mod remote;
pub mod server;
pub mod sharded;
pub mod wire;

pub(crate) mod codec;

use async_trait::async_trait;

use crate::error::LookupError;
pub use local::LocalLookup;
pub use remote::RemoteLookupClient;
pub use remote::RemoteLookupClientImpl;
pub use server::InternalLookupServer;
pub use sharded::ShardedLookup;
pub use wire::ConsentedDebugConfig;
pub use wire::InternalLookupRequest;
pub use wire::InternalLookupResponse;
pub use wire::InternalRunQueryRequest;
pub use wire::InternalRunQueryResponse;
pub use wire::InternalRunSetQueryIntResponse;
pub use wire::LogContext;
pub use wire::LookupStatus;
pub use wire::SingleLookupResult;

/// Per-request context carried through every lookup and propagated across
/// shard boundaries.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Logging context of the originating public request.
    pub log_context: LogContext,
    /// Debug-logging consent of the originating public request.
    pub consented_debug_config: ConsentedDebugConfig,
}

/// Read-side lookup operations.
///
/// Implementations never mutate the underlying data and must be safe for
/// concurrent calls from many request workers.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// Look up scalar values for `keys`. Every requested key appears in the
    /// response, absent ones with a `NotFound` status.
    async fn get_key_values(
        &self,
        context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError>;

    /// Look up string-set values for `keys`.
    async fn get_key_value_set(
        &self,
        context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError>;

    /// Look up uint32-set values for `keys`.
    async fn get_uint32_value_set(
        &self,
        context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError>;

    /// Evaluate a set-algebra query over string key-sets.
    async fn run_query(
        &self,
        context: &RequestContext,
        query: String,
    ) -> Result<InternalRunQueryResponse, LookupError>;

    /// Evaluate a set-algebra query over uint32 key-sets.
    async fn run_set_query_int(
        &self,
        context: &RequestContext,
        query: String,
    ) -> Result<InternalRunSetQueryIntResponse, LookupError>;
}
