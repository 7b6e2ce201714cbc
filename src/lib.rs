//! larch: an in-memory, horizontally sharded key/value serving tier.
//!
//! Clients submit key batches or set-algebra queries over named key-sets;
//! lookups fan out across shards with per-shard request padding so link
//! traffic does not reveal key placement, and results are merged with
//! per-shard failure isolation. All data lives in memory, fed by
//! logical-time ordered mutation streams, so any instance can be rebuilt by
//! replaying its inputs.
//!
//! # Architecture
//!
//! ```text
//! request worker (UDF layer, external)
//!        |
//!   ShardedLookup ---- KeySharder (key -> shard placement)
//!    |         |
//!    |         +-- ShardManager -> RemoteLookupClient -> other shards
//!    |
//!   LocalLookup -> KeyValueCache (striped, logical-time versioned)
//!                       ^
//!   DataOrchestrator ---+   (delta files, realtime messages, GC)
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod lookup;
pub mod metrics;
pub mod query;
pub mod sharding;
pub mod time;
pub mod util;

pub use cache::KeyValueCache;
pub use config::ServerConfig;
pub use data::DataOrchestrator;
pub use data::DeltaRecord;
pub use error::ErrorCode;
pub use error::LookupError;
pub use lookup::InternalLookupServer;
pub use lookup::LocalLookup;
pub use lookup::Lookup;
pub use lookup::RemoteLookupClient;
pub use lookup::RemoteLookupClientImpl;
pub use lookup::RequestContext;
pub use lookup::ShardedLookup;
pub use metrics::LookupMetrics;
pub use sharding::KeySharder;
pub use sharding::ShardManager;
pub use util::RateLimiter;
