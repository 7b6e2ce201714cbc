//! Lightweight atomic counters for data-plane observability.
//!
//! No exporter is wired here; callers read a [`MetricsSnapshot`] and forward
//! it to whatever telemetry surface the deployment uses.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Process-wide counters shared by the lookup and ingestion paths.
///
/// All counters are monotonic and relaxed: they feed dashboards, not control
/// flow.
#[derive(Debug, Default)]
pub struct LookupMetrics {
    /// Queries rejected by the parser.
    query_parse_failures: AtomicU64,
    /// Identifiers referenced by a query with no materialized key-set.
    missing_key_sets: AtomicU64,
    /// Per-shard lookup requests that failed and were isolated.
    shard_lookup_failures: AtomicU64,
    /// Fan-outs aborted because a shard had no registered client.
    missing_shard_clients: AtomicU64,
    /// Duplicate keys observed while collecting key-sets across shards.
    key_collisions: AtomicU64,
    /// Ingested records dropped because they belong to another shard.
    records_dropped_wrong_shard: AtomicU64,
    /// Ingested records dropped as malformed.
    records_dropped_invalid: AtomicU64,
}

impl LookupMetrics {
    /// Create a zeroed metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr_query_parse_failures(&self) {
        self.query_parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_missing_key_sets(&self) {
        self.missing_key_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_shard_lookup_failures(&self) {
        self.shard_lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_missing_shard_clients(&self) {
        self.missing_shard_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_key_collisions(&self) {
        self.key_collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_records_dropped_wrong_shard(&self) {
        self.records_dropped_wrong_shard.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_records_dropped_invalid(&self) {
        self.records_dropped_invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            query_parse_failures: self.query_parse_failures.load(Ordering::Relaxed),
            missing_key_sets: self.missing_key_sets.load(Ordering::Relaxed),
            shard_lookup_failures: self.shard_lookup_failures.load(Ordering::Relaxed),
            missing_shard_clients: self.missing_shard_clients.load(Ordering::Relaxed),
            key_collisions: self.key_collisions.load(Ordering::Relaxed),
            records_dropped_wrong_shard: self.records_dropped_wrong_shard.load(Ordering::Relaxed),
            records_dropped_invalid: self.records_dropped_invalid.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Queries rejected by the parser.
    pub query_parse_failures: u64,
    /// Identifiers referenced by a query with no materialized key-set.
    pub missing_key_sets: u64,
    /// Per-shard lookup requests that failed and were isolated.
    pub shard_lookup_failures: u64,
    /// Fan-outs aborted because a shard had no registered client.
    pub missing_shard_clients: u64,
    /// Duplicate keys observed while collecting key-sets across shards.
    pub key_collisions: u64,
    /// Ingested records dropped because they belong to another shard.
    pub records_dropped_wrong_shard: u64,
    /// Ingested records dropped as malformed.
    pub records_dropped_invalid: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = LookupMetrics::new();
        metrics.incr_query_parse_failures();
        metrics.incr_query_parse_failures();
        metrics.incr_shard_lookup_failures();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.query_parse_failures, 2);
        assert_eq!(snapshot.shard_lookup_failures, 1);
        assert_eq!(snapshot.missing_key_sets, 0);
    }
}
