//! Read facade over the in-process cache.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::KeyValueCache;
use crate::error::LookupError;
use crate::lookup::Lookup;
use crate::lookup::RequestContext;
use crate::lookup::wire::InternalLookupResponse;
use crate::lookup::wire::InternalRunQueryResponse;
use crate::lookup::wire::InternalRunSetQueryIntResponse;
use crate::lookup::wire::LookupStatus;
use crate::lookup::wire::SingleLookupResult;
use crate::metrics::LookupMetrics;
use crate::query::ast;
use crate::query::parse_query;

/// The own-shard lookup backend: reads the local [`KeyValueCache`], never
/// mutates, and answers set-algebra queries against local key-sets.
pub struct LocalLookup {
    cache: Arc<KeyValueCache>,
    metrics: Arc<LookupMetrics>,
}

impl LocalLookup {
    /// Create a facade over `cache`.
    pub fn new(cache: Arc<KeyValueCache>, metrics: Arc<LookupMetrics>) -> Self {
        Self { cache, metrics }
    }
}

#[async_trait]
impl Lookup for LocalLookup {
    async fn get_key_values(
        &self,
        _context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError> {
        let mut response = InternalLookupResponse::default();
        if keys.is_empty() {
            return Ok(response);
        }
        let unique: HashSet<String> = keys.into_iter().collect();
        let key_list: Vec<String> = unique.iter().cloned().collect();
        let mut kv_pairs = self.cache.get_key_values(&key_list);
        for key in unique {
            let result = match kv_pairs.remove(&key) {
                Some(value) => SingleLookupResult::Value(value),
                None => SingleLookupResult::Status(LookupStatus::not_found()),
            };
            response.kv_pairs.insert(key, result);
        }
        Ok(response)
    }

    async fn get_key_value_set(
        &self,
        _context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError> {
        let mut response = InternalLookupResponse::default();
        if keys.is_empty() {
            return Ok(response);
        }
        let unique: HashSet<String> = keys.into_iter().collect();
        let key_list: Vec<String> = unique.iter().cloned().collect();
        let mut key_sets = self.cache.get_key_value_set(&key_list);
        for key in unique {
            let result = match key_sets.remove(&key) {
                Some(values) => SingleLookupResult::KeysetValues(values.into_iter().collect()),
                None => SingleLookupResult::Status(LookupStatus::not_found()),
            };
            response.kv_pairs.insert(key, result);
        }
        Ok(response)
    }

    async fn get_uint32_value_set(
        &self,
        _context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError> {
        let mut response = InternalLookupResponse::default();
        if keys.is_empty() {
            return Ok(response);
        }
        let unique: HashSet<String> = keys.into_iter().collect();
        let key_list: Vec<String> = unique.iter().cloned().collect();
        let mut key_sets = self.cache.get_uint32_value_set(&key_list);
        for key in unique {
            let result = match key_sets.remove(&key) {
                Some(values) => SingleLookupResult::UintsetValues(values.into_iter().collect()),
                None => SingleLookupResult::Status(LookupStatus::not_found()),
            };
            response.kv_pairs.insert(key, result);
        }
        Ok(response)
    }

    async fn run_query(
        &self,
        _context: &RequestContext,
        query: String,
    ) -> Result<InternalRunQueryResponse, LookupError> {
        let mut response = InternalRunQueryResponse::default();
        if query.is_empty() {
            return Ok(response);
        }
        let node = match parse_query(&query) {
            Ok(Some(node)) => node,
            Ok(None) => return Ok(response),
            Err(err) => {
                self.metrics.incr_query_parse_failures();
                return Err(err);
            }
        };
        let referenced: Vec<String> = node.keys().into_iter().map(String::from).collect();
        let key_sets = self.cache.get_key_value_set(&referenced);
        let result = ast::eval(&node, |key| {
            key_sets.get(key).cloned().unwrap_or_else(|| {
                debug!(key = %key, "key-set missing during query evaluation");
                self.metrics.incr_missing_key_sets();
                HashSet::new()
            })
        });
        response.elements = result.into_iter().collect();
        Ok(response)
    }

    async fn run_set_query_int(
        &self,
        _context: &RequestContext,
        query: String,
    ) -> Result<InternalRunSetQueryIntResponse, LookupError> {
        let mut response = InternalRunSetQueryIntResponse::default();
        if query.is_empty() {
            return Ok(response);
        }
        let node = match parse_query(&query) {
            Ok(Some(node)) => node,
            Ok(None) => return Ok(response),
            Err(err) => {
                self.metrics.incr_query_parse_failures();
                return Err(err);
            }
        };
        let referenced: Vec<String> = node.keys().into_iter().map(String::from).collect();
        let key_sets = self.cache.get_uint32_value_set(&referenced);
        let result = ast::eval(&node, |key| {
            key_sets.get(key).cloned().unwrap_or_else(|| {
                self.metrics.incr_missing_key_sets();
                HashSet::new()
            })
        });
        response.elements = result.into_iter().collect();
        Ok(response)
    }
}
