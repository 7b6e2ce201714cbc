//! Server configuration.
//!
//! Configuration is loaded from `LARCH_*` environment variables with
//! sensible defaults; the binary layers CLI flags on top. All values are
//! validated before the server starts.

use std::time::Duration;

use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration value failed to parse or validate.
    #[error("invalid configuration for {key}: '{value}' ({reason})")]
    InvalidValue {
        /// The configuration key.
        key: String,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Total number of shards in the deployment. Must be at least 1.
    pub num_shards: u32,
    /// The shard this server owns, in `[0, num_shards)`.
    pub current_shard_num: u32,
    /// Seed of the placement hash. Identical on every instance of a
    /// deployment.
    pub hashing_seed: u64,
    /// Whether to extract the sharding key with `sharding_key_regex`.
    pub use_sharding_key_regex: bool,
    /// Optional regex whose first capture group is hashed instead of the
    /// whole key.
    pub sharding_key_regex: Option<String>,
    /// Concurrency of the delta-file loader.
    pub data_loading_num_threads: usize,
    /// Number of realtime ingestion workers.
    pub realtime_updater_num_threads: usize,
    /// Cadence of the fallback delta-directory poll, in seconds. The GC loop
    /// shares this cadence.
    pub backup_poll_frequency_secs: u64,
    /// Logical-time margin subtracted from the GC cutoff.
    pub gc_safety_margin: i64,
    /// Per-batch lookup deadline, in milliseconds.
    pub lookup_deadline_millis: u64,
    /// Listen address of the internal shard-to-shard lookup server.
    pub internal_listen_addr: String,
    /// Internal lookup addresses of all shards, indexed by shard number.
    /// Empty when discovery is wired externally.
    pub shard_addresses: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_shards: 1,
            current_shard_num: 0,
            hashing_seed: 0,
            use_sharding_key_regex: false,
            sharding_key_regex: None,
            data_loading_num_threads: 2,
            realtime_updater_num_threads: 2,
            backup_poll_frequency_secs: 300,
            gc_safety_margin: 1000,
            lookup_deadline_millis: 1000,
            internal_listen_addr: "0.0.0.0:50100".to_string(),
            shard_addresses: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `LARCH_*` environment variables, falling back
    /// to defaults, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            num_shards: env_parse("LARCH_NUM_SHARDS", defaults.num_shards)?,
            current_shard_num: env_parse("LARCH_CURRENT_SHARD_NUM", defaults.current_shard_num)?,
            hashing_seed: env_parse("LARCH_HASHING_SEED", defaults.hashing_seed)?,
            use_sharding_key_regex: env_parse(
                "LARCH_USE_SHARDING_KEY_REGEX",
                defaults.use_sharding_key_regex,
            )?,
            sharding_key_regex: std::env::var("LARCH_SHARDING_KEY_REGEX").ok(),
            data_loading_num_threads: env_parse(
                "LARCH_DATA_LOADING_NUM_THREADS",
                defaults.data_loading_num_threads,
            )?,
            realtime_updater_num_threads: env_parse(
                "LARCH_REALTIME_UPDATER_NUM_THREADS",
                defaults.realtime_updater_num_threads,
            )?,
            backup_poll_frequency_secs: env_parse(
                "LARCH_BACKUP_POLL_FREQUENCY_SECS",
                defaults.backup_poll_frequency_secs,
            )?,
            gc_safety_margin: env_parse("LARCH_GC_SAFETY_MARGIN", defaults.gc_safety_margin)?,
            lookup_deadline_millis: env_parse(
                "LARCH_LOOKUP_DEADLINE_MILLIS",
                defaults.lookup_deadline_millis,
            )?,
            internal_listen_addr: std::env::var("LARCH_INTERNAL_LISTEN_ADDR")
                .unwrap_or(defaults.internal_listen_addr),
            shard_addresses: std::env::var("LARCH_SHARD_ADDRESSES")
                .map(|joined| {
                    joined
                        .split(',')
                        .map(str::trim)
                        .filter(|addr| !addr.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.shard_addresses),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_shards == 0 {
            return Err(ConfigError::InvalidValue {
                key: "num_shards".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.current_shard_num >= self.num_shards {
            return Err(ConfigError::InvalidValue {
                key: "current_shard_num".to_string(),
                value: self.current_shard_num.to_string(),
                reason: format!("must be below num_shards ({})", self.num_shards),
            });
        }
        if !self.shard_addresses.is_empty() && self.shard_addresses.len() != self.num_shards as usize
        {
            return Err(ConfigError::InvalidValue {
                key: "shard_addresses".to_string(),
                value: self.shard_addresses.join(","),
                reason: format!("expected one address per shard ({})", self.num_shards),
            });
        }
        if self.use_sharding_key_regex && self.sharding_key_regex.is_none() {
            return Err(ConfigError::InvalidValue {
                key: "sharding_key_regex".to_string(),
                value: String::new(),
                reason: "use-sharding-key-regex is set but no regex was given".to_string(),
            });
        }
        Ok(())
    }

    /// The per-batch lookup deadline as a [`Duration`].
    pub fn lookup_deadline(&self) -> Duration {
        Duration::from_millis(self.lookup_deadline_millis)
    }

    /// The delta poll and GC cadence as a [`Duration`].
    pub fn backup_poll_frequency(&self) -> Duration {
        Duration::from_secs(self.backup_poll_frequency_secs)
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|err: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: err.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lookup_deadline(), Duration::from_millis(1000));
        assert_eq!(config.backup_poll_frequency(), Duration::from_secs(300));
    }

    #[test]
    fn zero_shards_is_rejected() {
        let config = ServerConfig { num_shards: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn shard_num_must_be_in_range() {
        let config = ServerConfig {
            num_shards: 2,
            current_shard_num: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn shard_addresses_must_match_shard_count() {
        let config = ServerConfig {
            num_shards: 3,
            shard_addresses: vec!["a:1".into(), "b:2".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn regex_flag_requires_pattern() {
        let config = ServerConfig {
            use_sharding_key_regex: true,
            sharding_key_regex: None,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
