//! Low-watermark tracking for realtime ingestion workers.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

/// Sentinel meaning "this worker has nothing queued".
const IDLE: i64 = i64::MAX;

/// Per-worker low watermarks over the realtime queues.
///
/// Each realtime worker publishes the logical time of the record it is
/// currently holding; the GC loop uses the minimum across workers as the
/// newest logical time that may still be in flight, and never reclaims
/// tombstones at or beyond it.
#[derive(Debug)]
pub struct RealtimeWatermarks {
    slots: Vec<AtomicI64>,
}

impl RealtimeWatermarks {
    /// Create watermarks for `num_workers` workers, all idle.
    pub fn new(num_workers: usize) -> Self {
        let slots = (0..num_workers.max(1)).map(|_| AtomicI64::new(IDLE)).collect();
        Self { slots }
    }

    /// Publish the logical time worker `slot` is about to apply.
    pub fn set(&self, slot: usize, logical_time: i64) {
        if let Some(cell) = self.slots.get(slot) {
            cell.store(logical_time, Ordering::SeqCst);
        }
    }

    /// Mark worker `slot` as idle.
    pub fn clear(&self, slot: usize) {
        if let Some(cell) = self.slots.get(slot) {
            cell.store(IDLE, Ordering::SeqCst);
        }
    }

    /// The smallest logical time any worker still holds, if any is busy.
    pub fn min_pending(&self) -> Option<i64> {
        let min = self.slots.iter().map(|cell| cell.load(Ordering::SeqCst)).min().unwrap_or(IDLE);
        if min == IDLE { None } else { Some(min) }
    }
}
