//! Deterministic key-to-shard assignment.

use regex::Regex;
use xxhash_rust::xxh64::xxh64;

use crate::error::LookupError;

/// The shard assignment for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingResult {
    /// Shard index in `[0, num_shards)`.
    pub shard_num: u32,
    /// The portion of the key the hash was computed over.
    pub sharding_key: String,
}

/// Maps keys to shards with a process-stable seeded hash.
///
/// All instances of one deployment must be constructed with the same seed
/// (and the same regex, if any) so that they agree on key placement.
///
/// When a sharding regex is configured and matches a key, the hash covers the
/// first capture group instead of the whole key. This lets co-queried keys
/// (e.g. keys sharing an embedded owner id) land on the same shard.
#[derive(Debug, Clone)]
pub struct KeySharder {
    sharding_key_regex: Option<Regex>,
    seed: u64,
}

impl KeySharder {
    /// Create a sharder that hashes whole keys.
    pub fn new(seed: u64) -> Self {
        Self { sharding_key_regex: None, seed }
    }

    /// Create a sharder that extracts the sharding key with `pattern`.
    ///
    /// The pattern is compiled once, here.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::InvalidArgument`] if the pattern does not
    /// compile.
    pub fn with_regex(seed: u64, pattern: &str) -> Result<Self, LookupError> {
        let regex = Regex::new(pattern).map_err(|err| {
            LookupError::invalid_argument(format!("invalid sharding key regex: {err}"))
        })?;
        Ok(Self { sharding_key_regex: Some(regex), seed })
    }

    /// Compute the shard for `key` among `num_shards` shards.
    ///
    /// Deterministic: depends only on the key and this sharder's
    /// configuration.
    pub fn shard_num_for_key(&self, key: &str, num_shards: u32) -> ShardingResult {
        let sharding_key = self.sharding_key(key);
        let shard_num = (xxh64(sharding_key.as_bytes(), self.seed) % u64::from(num_shards.max(1))) as u32;
        ShardingResult {
            shard_num,
            sharding_key: sharding_key.to_string(),
        }
    }

    fn sharding_key<'a>(&self, key: &'a str) -> &'a str {
        if let Some(regex) = &self.sharding_key_regex {
            if let Some(captures) = regex.captures(key) {
                if let Some(group) = captures.get(1) {
                    return group.as_str();
                }
            }
        }
        key
    }
}
