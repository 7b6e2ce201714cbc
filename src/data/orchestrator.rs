//! Ingestion coordinator: applies delta and realtime records to the cache
//! and drives tombstone GC.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::cache::KeyValueCache;
use crate::data::realtime::RealtimeWatermarks;
use crate::data::record::DeltaRecord;
use crate::data::record::MutationType;
use crate::data::record::RecordValue;
use crate::error::LookupError;
use crate::metrics::LookupMetrics;
use crate::sharding::KeySharder;
use crate::util::RateLimiter;

/// Counters for one batch of applied records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Records that updated a value or set.
    pub updated: u64,
    /// Records that deleted a value or removed set elements.
    pub deleted: u64,
    /// Records dropped because their key belongs to another shard.
    pub dropped_wrong_shard: u64,
    /// Records dropped as malformed.
    pub dropped_invalid: u64,
}

impl LoadStats {
    fn merge(&mut self, other: LoadStats) {
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.dropped_wrong_shard += other.dropped_wrong_shard;
        self.dropped_invalid += other.dropped_invalid;
    }
}

/// Outcome of applying one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyOutcome {
    Updated,
    Deleted,
    DroppedWrongShard,
}

/// Coordinates ingestion from delta files and realtime messages.
///
/// Records are applied in whatever order the sources deliver them; the
/// cache's logical-time rule makes replay and reordering safe, so no global
/// ordering barrier is needed. The coordinator also owns the GC cadence:
/// tombstones are reclaimed up to the oldest logical time that might still
/// be queued in a realtime worker, minus a safety margin.
pub struct DataOrchestrator {
    cache: Arc<KeyValueCache>,
    key_sharder: KeySharder,
    num_shards: u32,
    current_shard_num: u32,
    metrics: Arc<LookupMetrics>,
    watermarks: Arc<RealtimeWatermarks>,
    max_applied_logical_time: AtomicI64,
    loaded_files: Mutex<HashSet<PathBuf>>,
}

impl DataOrchestrator {
    /// Create a coordinator for this server's shard.
    pub fn new(
        cache: Arc<KeyValueCache>,
        key_sharder: KeySharder,
        num_shards: u32,
        current_shard_num: u32,
        realtime_num_workers: usize,
        metrics: Arc<LookupMetrics>,
    ) -> Self {
        Self {
            cache,
            key_sharder,
            num_shards,
            current_shard_num,
            metrics,
            watermarks: Arc::new(RealtimeWatermarks::new(realtime_num_workers)),
            max_applied_logical_time: AtomicI64::new(0),
            loaded_files: Mutex::new(HashSet::new()),
        }
    }

    /// The watermark registry shared with realtime workers.
    pub fn watermarks(&self) -> Arc<RealtimeWatermarks> {
        Arc::clone(&self.watermarks)
    }

    /// The highest logical time applied so far.
    pub fn max_applied_logical_time(&self) -> i64 {
        self.max_applied_logical_time.load(Ordering::SeqCst)
    }

    /// Apply one record.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::InvalidArgument`] for a malformed record. The
    /// cache is left untouched; the caller decides whether to continue the
    /// stream.
    fn apply_record(&self, record: &DeltaRecord) -> Result<ApplyOutcome, LookupError> {
        if record.key.is_empty() {
            return Err(LookupError::invalid_argument("record has an empty key"));
        }
        if record.logical_commit_time < 0 {
            return Err(LookupError::invalid_argument(format!(
                "record for key '{}' has negative logical commit time {}",
                record.key, record.logical_commit_time
            )));
        }
        if self.num_shards > 1 {
            let sharding_result =
                self.key_sharder.shard_num_for_key(&record.key, self.num_shards);
            if sharding_result.shard_num != self.current_shard_num {
                debug!(
                    key = %record.key,
                    shard = sharding_result.shard_num,
                    current_shard = self.current_shard_num,
                    "record belongs to another shard"
                );
                return Ok(ApplyOutcome::DroppedWrongShard);
            }
        }

        let time = record.logical_commit_time;
        let outcome = match (record.mutation_type, &record.value) {
            (MutationType::Update, RecordValue::String(value)) => {
                self.cache.update_key_value(&record.key, value, time);
                ApplyOutcome::Updated
            }
            (MutationType::Update, RecordValue::StringSet(values)) => {
                self.cache.update_key_value_set(&record.key, values, time);
                ApplyOutcome::Updated
            }
            (MutationType::Update, RecordValue::UintSet(values)) => {
                self.cache.update_uint32_value_set(&record.key, values, time);
                ApplyOutcome::Updated
            }
            (MutationType::Delete, RecordValue::String(_)) => {
                self.cache.delete_key(&record.key, time);
                ApplyOutcome::Deleted
            }
            (MutationType::Delete, RecordValue::StringSet(values)) => {
                self.cache.delete_values_in_set(&record.key, values, time);
                ApplyOutcome::Deleted
            }
            (MutationType::Delete, RecordValue::UintSet(values)) => {
                self.cache.delete_uint32_values_in_set(&record.key, values, time);
                ApplyOutcome::Deleted
            }
        };
        self.max_applied_logical_time.fetch_max(time, Ordering::SeqCst);
        Ok(outcome)
    }

    /// Apply a batch of records, isolating per-record failures.
    pub fn load_batch<I>(&self, records: I) -> LoadStats
    where
        I: IntoIterator<Item = DeltaRecord>,
    {
        let mut stats = LoadStats::default();
        for record in records {
            match self.apply_record(&record) {
                Ok(ApplyOutcome::Updated) => stats.updated += 1,
                Ok(ApplyOutcome::Deleted) => stats.deleted += 1,
                Ok(ApplyOutcome::DroppedWrongShard) => {
                    stats.dropped_wrong_shard += 1;
                    self.metrics.incr_records_dropped_wrong_shard();
                }
                Err(err) => {
                    stats.dropped_invalid += 1;
                    self.metrics.incr_records_dropped_invalid();
                    error!(key = %record.key, error = %err, "dropping invalid record");
                }
            }
        }
        stats
    }

    /// Load one delta file: newline-delimited JSON, one record per line.
    pub async fn load_delta_file(&self, path: &Path) -> Result<LoadStats, LookupError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|err| {
            LookupError::internal(format!("reading {} failed: {err}", path.display()))
        })?;
        let mut stats = LoadStats::default();
        for (line_number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeltaRecord>(line) {
                Ok(record) => stats.merge(self.load_batch([record])),
                Err(err) => {
                    stats.dropped_invalid += 1;
                    self.metrics.incr_records_dropped_invalid();
                    error!(
                        file = %path.display(),
                        line = line_number + 1,
                        error = %err,
                        "dropping undecodable record"
                    );
                }
            }
        }
        info!(file = %path.display(), ?stats, "delta file applied");
        Ok(stats)
    }

    /// Load every not-yet-seen delta file in `dir` (files ordered by name),
    /// spread across `num_threads` workers. Files are independent because
    /// application is idempotent and ordered per key by logical time.
    pub async fn load_delta_dir(
        self: &Arc<Self>,
        dir: &Path,
        num_threads: usize,
    ) -> Result<LoadStats, LookupError> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|err| {
            LookupError::internal(format!("listing {} failed: {err}", dir.display()))
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|err| {
            LookupError::internal(format!("listing {} failed: {err}", dir.display()))
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl")
                && !self.loaded_files.lock().contains(&path)
            {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            return Ok(LoadStats::default());
        }

        let mut handles = Vec::new();
        for chunk in paths.chunks(paths.len().div_ceil(num_threads.max(1))) {
            let orchestrator = Arc::clone(self);
            let chunk: Vec<PathBuf> = chunk.to_vec();
            handles.push(tokio::spawn(async move {
                let mut stats = LoadStats::default();
                for path in chunk {
                    match orchestrator.load_delta_file(&path).await {
                        Ok(file_stats) => {
                            stats.merge(file_stats);
                            orchestrator.loaded_files.lock().insert(path);
                        }
                        Err(err) => {
                            error!(file = %path.display(), error = %err, "delta file load failed");
                        }
                    }
                }
                stats
            }));
        }
        let mut stats = LoadStats::default();
        for handle in handles {
            match handle.await {
                Ok(chunk_stats) => stats.merge(chunk_stats),
                Err(err) => {
                    error!(error = %err, "delta loader task failed");
                }
            }
        }
        Ok(stats)
    }

    /// Poll `dir` for new delta files every `period`. This is the fallback
    /// path for deployments without change notifications.
    pub async fn poll_delta_dir(self: Arc<Self>, dir: PathBuf, period: Duration, num_threads: usize) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.load_delta_dir(&dir, num_threads).await {
                warn!(dir = %dir.display(), error = %err, "delta poll failed");
            }
        }
    }

    /// Spawn realtime workers, one per receiver. Each worker publishes its
    /// watermark before applying a record so GC never overtakes it.
    pub fn spawn_realtime_workers(
        self: &Arc<Self>,
        receivers: Vec<mpsc::Receiver<DeltaRecord>>,
        limiter: Option<Arc<RateLimiter>>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        receivers
            .into_iter()
            .enumerate()
            .map(|(slot, receiver)| {
                let orchestrator = Arc::clone(self);
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    realtime_worker(orchestrator, slot, receiver, limiter).await;
                })
            })
            .collect()
    }

    /// The GC cutoff: the oldest logical time that may still be pending in a
    /// realtime queue (or the newest applied time when all queues are
    /// drained), minus `safety_margin`.
    pub fn gc_cutoff(&self, safety_margin: i64) -> i64 {
        let base = self
            .watermarks
            .min_pending()
            .unwrap_or_else(|| self.max_applied_logical_time());
        base.saturating_sub(safety_margin)
    }

    /// Run tombstone GC every `period`.
    pub async fn run_gc(self: Arc<Self>, period: Duration, safety_margin: i64) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cutoff = self.gc_cutoff(safety_margin);
            if cutoff > 0 {
                debug!(cutoff, "removing deleted keys");
                self.cache.remove_deleted_keys(cutoff);
            }
        }
    }
}

async fn realtime_worker(
    orchestrator: Arc<DataOrchestrator>,
    slot: usize,
    mut receiver: mpsc::Receiver<DeltaRecord>,
    limiter: Option<Arc<RateLimiter>>,
) {
    while let Some(record) = receiver.recv().await {
        orchestrator.watermarks.set(slot, record.logical_commit_time);
        if let Some(limiter) = &limiter {
            limiter.acquire().await;
        }
        let stats = orchestrator.load_batch([record]);
        if stats.dropped_invalid > 0 {
            warn!(slot, "realtime record dropped as invalid");
        }
        orchestrator.watermarks.clear(slot);
    }
    debug!(slot, "realtime worker channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator(num_shards: u32, current_shard_num: u32) -> Arc<DataOrchestrator> {
        Arc::new(DataOrchestrator::new(
            Arc::new(KeyValueCache::new()),
            KeySharder::new(0),
            num_shards,
            current_shard_num,
            2,
            Arc::new(LookupMetrics::new()),
        ))
    }

    #[test]
    fn applies_updates_and_deletes() {
        let orchestrator = orchestrator(1, 0);
        let stats = orchestrator.load_batch(vec![
            DeltaRecord::update("k", "v1", 5),
            DeltaRecord::update("k", "v0", 3),
            DeltaRecord::update("k", "v2", 10),
            DeltaRecord::delete("gone", 2),
        ]);
        assert_eq!(stats.updated, 3);
        assert_eq!(stats.deleted, 1);

        let kv_pairs = orchestrator.cache.get_key_values(&["k".to_string()]);
        assert_eq!(kv_pairs["k"], "v2");
        assert_eq!(orchestrator.max_applied_logical_time(), 10);
    }

    #[test]
    fn drops_records_for_other_shards() {
        let sharder = KeySharder::new(0);
        let num_shards = 4;
        // Find one key owned by shard 0 and one that is not.
        let mut owned = None;
        let mut foreign = None;
        for i in 0..1000 {
            let key = format!("key{i}");
            let shard = sharder.shard_num_for_key(&key, num_shards).shard_num;
            if shard == 0 && owned.is_none() {
                owned = Some(key);
            } else if shard != 0 && foreign.is_none() {
                foreign = Some(key);
            }
            if owned.is_some() && foreign.is_some() {
                break;
            }
        }
        let owned = owned.expect("no key for shard 0");
        let foreign = foreign.expect("no foreign key");

        let orchestrator = orchestrator(num_shards, 0);
        let stats = orchestrator.load_batch(vec![
            DeltaRecord::update(owned.clone(), "v", 1),
            DeltaRecord::update(foreign.clone(), "v", 1),
        ]);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.dropped_wrong_shard, 1);
        assert!(orchestrator.cache.get_key_values(&[foreign]).is_empty());
        assert_eq!(orchestrator.cache.get_key_values(&[owned.clone()])[&owned], "v");
    }

    #[test]
    fn malformed_records_are_counted_not_fatal() {
        let orchestrator = orchestrator(1, 0);
        let stats = orchestrator.load_batch(vec![
            DeltaRecord::update("", "v", 1),
            DeltaRecord::update("ok", "v", -3),
            DeltaRecord::update("good", "v", 2),
        ]);
        assert_eq!(stats.dropped_invalid, 2);
        assert_eq!(stats.updated, 1);
    }

    #[test]
    fn replaying_a_stream_is_idempotent() {
        let records = vec![
            DeltaRecord::update("a", "1", 1),
            DeltaRecord::update("b", "2", 2),
            DeltaRecord::delete("a", 3),
            DeltaRecord::update("a", "4", 4),
        ];
        let orchestrator = orchestrator(1, 0);
        orchestrator.load_batch(records.clone());
        let first = orchestrator.cache.get_key_values(&["a".to_string(), "b".to_string()]);
        orchestrator.load_batch(records);
        let second = orchestrator.cache.get_key_values(&["a".to_string(), "b".to_string()]);
        assert_eq!(first, second);
        assert_eq!(first["a"], "4");
    }

    #[test]
    fn gc_cutoff_respects_watermarks() {
        let orchestrator = orchestrator(1, 0);
        orchestrator.load_batch(vec![DeltaRecord::update("k", "v", 100)]);
        assert_eq!(orchestrator.gc_cutoff(10), 90);

        orchestrator.watermarks.set(0, 50);
        assert_eq!(orchestrator.gc_cutoff(10), 40);

        orchestrator.watermarks.clear(0);
        assert_eq!(orchestrator.gc_cutoff(10), 90);
    }

    #[tokio::test]
    async fn realtime_workers_apply_records() {
        let orchestrator = orchestrator(1, 0);
        let (sender, receiver) = mpsc::channel(16);
        let handles = orchestrator.spawn_realtime_workers(vec![receiver], None);

        sender.send(DeltaRecord::update("rt", "v", 7)).await.unwrap();
        drop(sender);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(orchestrator.cache.get_key_values(&["rt".to_string()])["rt"], "v");
    }

    #[tokio::test]
    async fn loads_delta_files_from_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("DELTA_0000000001.jsonl");
        let records = [
            serde_json::to_string(&DeltaRecord::update("k1", "v1", 1)).unwrap(),
            serde_json::to_string(&DeltaRecord::update("k2", "v2", 2)).unwrap(),
        ];
        tokio::fs::write(&file, records.join("\n")).await.expect("write");

        let orchestrator = orchestrator(1, 0);
        let stats = orchestrator.load_delta_dir(dir.path(), 2).await.expect("load");
        assert_eq!(stats.updated, 2);

        // A second scan skips the already-loaded file.
        let stats = orchestrator.load_delta_dir(dir.path(), 2).await.expect("load");
        assert_eq!(stats, LoadStats::default());
    }
}
