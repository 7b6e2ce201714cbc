//! Striped in-memory key/value store with logical-time versioning.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::warn;
use xxhash_rust::xxh64::xxh64;

use crate::cache::value_set::ValueSet;

/// Default stripe count. Sized for lock contention across request workers,
/// unrelated to the distribution shard count.
const DEFAULT_STRIPE_COUNT: usize = 16;

/// A scalar entry. `value == None` is a tombstone retained (together with its
/// deletion time) until GC passes it, so late-arriving older updates cannot
/// resurrect a deleted key.
#[derive(Debug, Clone)]
struct ScalarEntry {
    value: Option<String>,
    last_logical_time: i64,
}

#[derive(Debug, Default)]
struct Stripe {
    scalars: HashMap<String, ScalarEntry>,
    string_sets: HashMap<String, ValueSet<String>>,
    uint32_sets: HashMap<String, ValueSet<u32>>,
    // Scalar tombstones indexed by deletion time for the GC sweep.
    deleted_nodes: BTreeMap<i64, HashSet<String>>,
    // Highest cutoff ever passed to remove_deleted_keys. Mutations at or
    // below this time are rejected on arrival.
    max_cleanup_logical_time: i64,
}

/// Concurrent in-memory store of key→value and key→set entries.
///
/// Keys are partitioned over `stripe_count` stripes by hash; each stripe is a
/// reader/writer lock over its dictionaries, so point reads take a shared
/// lock and mutations an exclusive lock on one stripe only. There is no
/// global lock.
///
/// Scalar, string-set, and uint32-set entries live in disjoint namespaces:
/// reading one kind never observes another.
///
/// Every mutation carries an externally assigned logical time. For a given
/// key (or set element) the mutation with the highest logical time wins;
/// older mutations arriving later are silent no-ops, which makes replaying a
/// delta stream idempotent.
#[derive(Debug)]
pub struct KeyValueCache {
    stripes: Vec<RwLock<Stripe>>,
}

impl Default for KeyValueCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueCache {
    /// Create a cache with the default stripe count.
    pub fn new() -> Self {
        Self::with_stripe_count(DEFAULT_STRIPE_COUNT)
    }

    /// Create a cache with `stripe_count` stripes, rounded up to a power of
    /// two (minimum 1).
    pub fn with_stripe_count(stripe_count: usize) -> Self {
        let count = stripe_count.max(1).next_power_of_two();
        let stripes = (0..count).map(|_| RwLock::new(Stripe::default())).collect();
        Self { stripes }
    }

    fn stripe_for(&self, key: &str) -> &RwLock<Stripe> {
        let index = xxh64(key.as_bytes(), 0) as usize & (self.stripes.len() - 1);
        &self.stripes[index]
    }

    /// Look up scalar values. Absent and tombstoned keys are omitted.
    pub fn get_key_values(&self, keys: &[String]) -> HashMap<String, String> {
        let mut kv_pairs = HashMap::new();
        for key in keys {
            let stripe = self.stripe_for(key).read();
            if let Some(entry) = stripe.scalars.get(key) {
                if let Some(value) = &entry.value {
                    kv_pairs.insert(key.clone(), value.clone());
                }
            }
        }
        kv_pairs
    }

    /// Look up string-set values. Keys with no live elements are omitted.
    pub fn get_key_value_set(&self, keys: &[String]) -> HashMap<String, HashSet<String>> {
        let mut key_sets = HashMap::new();
        for key in keys {
            let stripe = self.stripe_for(key).read();
            if let Some(set) = stripe.string_sets.get(key) {
                if set.has_values() {
                    key_sets.insert(key.clone(), set.values());
                }
            }
        }
        key_sets
    }

    /// Look up uint32-set values. Keys with no live elements are omitted.
    pub fn get_uint32_value_set(&self, keys: &[String]) -> HashMap<String, HashSet<u32>> {
        let mut key_sets = HashMap::new();
        for key in keys {
            let stripe = self.stripe_for(key).read();
            if let Some(set) = stripe.uint32_sets.get(key) {
                if set.has_values() {
                    key_sets.insert(key.clone(), set.values());
                }
            }
        }
        key_sets
    }

    /// Insert or update a scalar. Applied iff `logical_time` is strictly
    /// newer than the stored entry and newer than the GC cutoff.
    pub fn update_key_value(&self, key: &str, value: &str, logical_time: i64) {
        let mut stripe = self.stripe_for(key).write();
        if logical_time <= stripe.max_cleanup_logical_time {
            return;
        }
        let mut superseded_tombstone_time = None;
        if let Some(entry) = stripe.scalars.get(key) {
            if entry.last_logical_time >= logical_time {
                return;
            }
            if entry.value.is_none() {
                superseded_tombstone_time = Some(entry.last_logical_time);
            }
        }
        // Superseding a tombstone: drop its GC index entry.
        if let Some(tombstone_time) = superseded_tombstone_time {
            unindex_deleted_node(&mut stripe, tombstone_time, key);
        }
        stripe.scalars.insert(
            key.to_string(),
            ScalarEntry {
                value: Some(value.to_string()),
                last_logical_time: logical_time,
            },
        );
    }

    /// Write a scalar tombstone iff `logical_time` is strictly newer than the
    /// stored entry. A delete for a never-seen key still records a tombstone
    /// so an older update arriving later stays invisible.
    pub fn delete_key(&self, key: &str, logical_time: i64) {
        let mut stripe = self.stripe_for(key).write();
        if logical_time <= stripe.max_cleanup_logical_time {
            return;
        }
        let mut superseded_tombstone_time = None;
        if let Some(entry) = stripe.scalars.get(key) {
            if entry.last_logical_time >= logical_time {
                return;
            }
            if entry.value.is_none() {
                superseded_tombstone_time = Some(entry.last_logical_time);
            }
        }
        if let Some(tombstone_time) = superseded_tombstone_time {
            unindex_deleted_node(&mut stripe, tombstone_time, key);
        }
        stripe.scalars.insert(
            key.to_string(),
            ScalarEntry { value: None, last_logical_time: logical_time },
        );
        stripe.deleted_nodes.entry(logical_time).or_default().insert(key.to_string());
    }

    /// Add elements to a string set, element-wise last-writer-wins.
    pub fn update_key_value_set(&self, key: &str, values: &[String], logical_time: i64) {
        let mut stripe = self.stripe_for(key).write();
        if logical_time <= stripe.max_cleanup_logical_time {
            return;
        }
        stripe
            .string_sets
            .entry(key.to_string())
            .or_insert_with(ValueSet::new)
            .add(values, logical_time);
    }

    /// Mark elements of a string set as removed, element-wise
    /// last-writer-wins.
    pub fn delete_values_in_set(&self, key: &str, values: &[String], logical_time: i64) {
        let mut stripe = self.stripe_for(key).write();
        if logical_time <= stripe.max_cleanup_logical_time {
            return;
        }
        stripe
            .string_sets
            .entry(key.to_string())
            .or_insert_with(ValueSet::new)
            .remove(values, logical_time);
    }

    /// Add elements to a uint32 set, element-wise last-writer-wins.
    pub fn update_uint32_value_set(&self, key: &str, values: &[u32], logical_time: i64) {
        let mut stripe = self.stripe_for(key).write();
        if logical_time <= stripe.max_cleanup_logical_time {
            return;
        }
        stripe
            .uint32_sets
            .entry(key.to_string())
            .or_insert_with(ValueSet::new)
            .add(values, logical_time);
    }

    /// Mark elements of a uint32 set as removed, element-wise
    /// last-writer-wins.
    pub fn delete_uint32_values_in_set(&self, key: &str, values: &[u32], logical_time: i64) {
        let mut stripe = self.stripe_for(key).write();
        if logical_time <= stripe.max_cleanup_logical_time {
            return;
        }
        stripe
            .uint32_sets
            .entry(key.to_string())
            .or_insert_with(ValueSet::new)
            .remove(values, logical_time);
    }

    /// Physically reclaim tombstones with `logical_time <= cutoff` across all
    /// namespaces, and raise the floor below which mutations are rejected.
    pub fn remove_deleted_keys(&self, cutoff_logical_time: i64) {
        for stripe_lock in &self.stripes {
            let mut stripe = stripe_lock.write();
            loop {
                match stripe.deleted_nodes.first_key_value() {
                    Some((&time, _)) if time <= cutoff_logical_time => {
                        if let Some((_, keys)) = stripe.deleted_nodes.pop_first() {
                            for key in keys {
                                let reclaimable = stripe.scalars.get(&key).is_some_and(|entry| {
                                    entry.value.is_none()
                                        && entry.last_logical_time <= cutoff_logical_time
                                });
                                if reclaimable {
                                    stripe.scalars.remove(&key);
                                } else {
                                    // The index should always agree with the
                                    // entry; log if it ever does not.
                                    warn!(key = %key, "stale tombstone index entry during cleanup");
                                }
                            }
                        }
                    }
                    _ => break,
                }
            }
            stripe.string_sets.retain(|_, set| {
                set.cleanup(cutoff_logical_time);
                !set.is_empty()
            });
            stripe.uint32_sets.retain(|_, set| {
                set.cleanup(cutoff_logical_time);
                !set.is_empty()
            });
            stripe.max_cleanup_logical_time =
                stripe.max_cleanup_logical_time.max(cutoff_logical_time);
        }
    }
}

fn unindex_deleted_node(stripe: &mut Stripe, logical_time: i64, key: &str) {
    if let Some(keys) = stripe.deleted_nodes.get_mut(&logical_time) {
        keys.remove(key);
        if keys.is_empty() {
            stripe.deleted_nodes.remove(&logical_time);
        }
    }
}
