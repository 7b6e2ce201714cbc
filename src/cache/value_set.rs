//! Per-element logical-time bookkeeping for set-valued cache entries.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::hash::Hash;

/// Metadata tracked for every element ever observed in a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValueMetadata {
    logical_time: i64,
    is_deleted: bool,
}

/// A set whose elements each carry their own logical time.
///
/// Supports out-of-order mutations: removing `{1, 2}` at time 5 and then
/// adding `{1, 2}` at time 3 leaves the set empty, because per element the
/// mutation with the highest logical time wins. Removed elements are retained
/// as per-element tombstones until [`ValueSet::cleanup`] passes their time.
#[derive(Debug, Clone, Default)]
pub(crate) struct ValueSet<T> {
    values_metadata: HashMap<T, ValueMetadata>,
    // Removal times in sorted order, for efficient cleanup sweeps.
    deleted_values: BTreeMap<i64, HashSet<T>>,
}

impl<T: Clone + Eq + Hash> ValueSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            values_metadata: HashMap::new(),
            deleted_values: BTreeMap::new(),
        }
    }

    /// Add `values` at `logical_time`. Elements already carrying the same or
    /// a greater logical time are left untouched.
    pub(crate) fn add(&mut self, values: &[T], logical_time: i64) {
        self.add_or_remove(values, logical_time, false);
    }

    /// Mark `values` as removed at `logical_time`. Elements already carrying
    /// the same or a greater logical time are left untouched.
    pub(crate) fn remove(&mut self, values: &[T], logical_time: i64) {
        self.add_or_remove(values, logical_time, true);
    }

    fn add_or_remove(&mut self, values: &[T], logical_time: i64, is_deleted: bool) {
        for value in values {
            if let Some(existing) = self.values_metadata.get(value).copied() {
                if existing.logical_time >= logical_time {
                    continue;
                }
                if existing.is_deleted {
                    self.unindex_deleted(existing.logical_time, value);
                }
            }
            if is_deleted {
                self.deleted_values.entry(logical_time).or_default().insert(value.clone());
            }
            self.values_metadata
                .insert(value.clone(), ValueMetadata { logical_time, is_deleted });
        }
    }

    /// The current membership: every element whose latest mutation was an
    /// add.
    pub(crate) fn values(&self) -> HashSet<T> {
        self.values_metadata
            .iter()
            .filter(|(_, meta)| !meta.is_deleted)
            .map(|(value, _)| value.clone())
            .collect()
    }

    /// Whether the set has any live elements.
    pub(crate) fn has_values(&self) -> bool {
        self.values_metadata.values().any(|meta| !meta.is_deleted)
    }

    /// Whether the set tracks no elements at all, live or tombstoned.
    pub(crate) fn is_empty(&self) -> bool {
        self.values_metadata.is_empty()
    }

    /// Reclaim tombstoned elements with `logical_time <= cutoff`.
    pub(crate) fn cleanup(&mut self, cutoff_logical_time: i64) {
        loop {
            match self.deleted_values.first_key_value() {
                Some((&time, _)) if time <= cutoff_logical_time => {
                    if let Some((_, values)) = self.deleted_values.pop_first() {
                        for value in values {
                            let still_deleted = self
                                .values_metadata
                                .get(&value)
                                .is_some_and(|meta| meta.is_deleted && meta.logical_time <= cutoff_logical_time);
                            if still_deleted {
                                self.values_metadata.remove(&value);
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn unindex_deleted(&mut self, logical_time: i64, value: &T) {
        if let Some(values) = self.deleted_values.get_mut(&logical_time) {
            values.remove(value);
            if values.is_empty() {
                self.deleted_values.remove(&logical_time);
            }
        }
    }
}
