//! Sharded lookup fan-out.
//!
//! Every batch is bucketed by shard, serialized once per shard, padded so all
//! outbound requests carry the same byte length, and dispatched concurrently:
//! the own-shard bucket goes to [`LocalLookup`](crate::lookup::LocalLookup)
//! on a worker task, every other bucket to that shard's
//! [`RemoteLookupClient`]. Per-shard failures are isolated: the affected keys
//! are reported as `Internal` while the rest of the batch is still served.
//!
//! Requests are issued to *every* shard on every batch, empty buckets
//! included, so link-level traffic does not reveal which shards own the
//! requested keys.

use std::collections::HashMap;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;

use crate::error::LookupError;
use crate::lookup::Lookup;
use crate::lookup::RequestContext;
use crate::lookup::wire;
use crate::lookup::wire::InternalLookupRequest;
use crate::lookup::wire::InternalLookupResponse;
use crate::lookup::wire::InternalRunQueryResponse;
use crate::lookup::wire::InternalRunSetQueryIntResponse;
use crate::lookup::wire::LookupStatus;
use crate::lookup::wire::SingleLookupResult;
use crate::metrics::LookupMetrics;
use crate::query::ast;
use crate::query::parse_query;
use crate::sharding::KeySharder;
use crate::sharding::ShardManager;

/// One shard's slice of a fan-out batch.
struct ShardLookupInput {
    /// Keys assigned to this shard.
    keys: Vec<String>,
    /// The serialized wire request for `keys`.
    serialized_request: Vec<u8>,
    /// How many bytes the remote client must add so all requests of this
    /// batch have equal wire length.
    padding: usize,
}

/// Which result variant the local branch of a fan-out should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocalResultKind {
    Value,
    KeysetValues,
    UintsetValues,
}

/// A set element type the fan-out can collect across shards.
pub(crate) trait SetElement: Clone + Eq + Hash + Send + Sync + 'static {
    /// The local lookup variant used for this element type.
    const RESULT_KIND: LocalResultKind;

    /// Extract the matching set variant from a per-key result.
    fn extract(result: SingleLookupResult) -> Option<Vec<Self>>
    where
        Self: Sized;

    /// Wrap a materialized set back into a per-key result.
    fn wrap(values: HashSet<Self>) -> SingleLookupResult
    where
        Self: Sized;
}

impl SetElement for String {
    const RESULT_KIND: LocalResultKind = LocalResultKind::KeysetValues;

    fn extract(result: SingleLookupResult) -> Option<Vec<Self>> {
        match result {
            SingleLookupResult::KeysetValues(values) => Some(values),
            _ => None,
        }
    }

    fn wrap(values: HashSet<Self>) -> SingleLookupResult {
        SingleLookupResult::KeysetValues(values.into_iter().collect())
    }
}

impl SetElement for u32 {
    const RESULT_KIND: LocalResultKind = LocalResultKind::UintsetValues;

    fn extract(result: SingleLookupResult) -> Option<Vec<Self>> {
        match result {
            SingleLookupResult::UintsetValues(values) => Some(values),
            _ => None,
        }
    }

    fn wrap(values: HashSet<Self>) -> SingleLookupResult {
        SingleLookupResult::UintsetValues(values.into_iter().collect())
    }
}

/// Fans key batches out across all shards and merges the responses.
pub struct ShardedLookup {
    local_lookup: Arc<dyn Lookup>,
    num_shards: u32,
    current_shard_num: u32,
    shard_manager: Arc<ShardManager>,
    key_sharder: KeySharder,
    deadline: Duration,
    metrics: Arc<LookupMetrics>,
}

impl ShardedLookup {
    /// Create a sharded lookup.
    ///
    /// # Arguments
    ///
    /// * `local_lookup` - backend for the own-shard bucket
    /// * `num_shards` - total shard count, must be greater than 1
    /// * `current_shard_num` - the shard this server owns
    /// * `deadline` - per-batch budget applied at entry of every operation
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::InvalidArgument`] when `num_shards <= 1`
    /// (single-shard deployments call [`LocalLookup`](crate::lookup::LocalLookup)
    /// directly) or when `current_shard_num` is out of range.
    pub fn new(
        local_lookup: Arc<dyn Lookup>,
        num_shards: u32,
        current_shard_num: u32,
        shard_manager: Arc<ShardManager>,
        key_sharder: KeySharder,
        deadline: Duration,
        metrics: Arc<LookupMetrics>,
    ) -> Result<Self, LookupError> {
        if num_shards <= 1 {
            return Err(LookupError::invalid_argument(
                "num_shards for a sharded lookup must be > 1",
            ));
        }
        if current_shard_num >= num_shards {
            return Err(LookupError::invalid_argument(format!(
                "current_shard_num {current_shard_num} >= num_shards {num_shards}"
            )));
        }
        Ok(Self {
            local_lookup,
            num_shards,
            current_shard_num,
            shard_manager,
            key_sharder,
            deadline,
            metrics,
        })
    }

    /// Partition `keys` into one bucket per shard.
    fn bucket_keys(&self, keys: &HashSet<String>) -> Vec<Vec<String>> {
        let mut buckets: Vec<Vec<String>> = (0..self.num_shards).map(|_| Vec::new()).collect();
        for key in keys {
            let sharding_result = self.key_sharder.shard_num_for_key(key, self.num_shards);
            debug!(
                key = %key,
                shard = sharding_result.shard_num,
                sharding_key = %sharding_result.sharding_key,
                "bucketed key"
            );
            buckets[sharding_result.shard_num as usize].push(key.clone());
        }
        buckets
    }

    /// Bucket, serialize, and pad a batch. Every bucket is serialized, empty
    /// ones included, and `padding` is computed against the longest
    /// serialized request of the batch.
    fn shard_keys(
        &self,
        keys: &HashSet<String>,
        lookup_sets: bool,
        context: &RequestContext,
    ) -> Result<Vec<ShardLookupInput>, LookupError> {
        let mut inputs: Vec<ShardLookupInput> = self
            .bucket_keys(keys)
            .into_iter()
            .map(|bucket_keys| {
                let request = InternalLookupRequest {
                    keys: bucket_keys.clone(),
                    lookup_sets,
                    log_context: context.log_context.clone(),
                    consented_debug_config: context.consented_debug_config.clone(),
                };
                Ok(ShardLookupInput {
                    keys: bucket_keys,
                    serialized_request: wire::serialize(&request)?,
                    padding: 0,
                })
            })
            .collect::<Result<_, LookupError>>()?;

        let max_length = inputs.iter().map(|input| input.serialized_request.len()).max().unwrap_or(0);
        for input in &mut inputs {
            input.padding = max_length - input.serialized_request.len();
        }
        Ok(inputs)
    }

    /// Start one lookup task per shard.
    ///
    /// A missing remote client fails the whole batch before anything is
    /// sent.
    fn dispatch(
        &self,
        inputs: &[ShardLookupInput],
        kind: LocalResultKind,
        context: &RequestContext,
    ) -> Result<Vec<JoinHandle<Result<InternalLookupResponse, LookupError>>>, LookupError> {
        let mut handles = Vec::with_capacity(inputs.len());
        for (shard_num, input) in inputs.iter().enumerate() {
            let shard_num = shard_num as u32;
            if shard_num == self.current_shard_num {
                let local = Arc::clone(&self.local_lookup);
                let keys = input.keys.clone();
                let context = context.clone();
                handles.push(tokio::spawn(async move {
                    local_response(local, kind, &context, keys).await
                }));
            } else {
                let Some(client) = self.shard_manager.get(shard_num) else {
                    self.metrics.incr_missing_shard_clients();
                    return Err(LookupError::internal("Internal lookup client is unavailable."));
                };
                let serialized_request = input.serialized_request.clone();
                let padding = input.padding;
                handles.push(tokio::spawn(async move {
                    client.get_values(&serialized_request, padding).await
                }));
            }
        }
        Ok(handles)
    }

    /// Await every shard task under the batch deadline.
    ///
    /// On expiry, in-flight tasks are aborted and their results discarded.
    async fn await_all(
        &self,
        handles: Vec<JoinHandle<Result<InternalLookupResponse, LookupError>>>,
    ) -> Result<Vec<Result<InternalLookupResponse, LookupError>>, LookupError> {
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(self.deadline, join_all(handles)).await {
            Ok(joined) => Ok(joined
                .into_iter()
                .map(|joined_result| match joined_result {
                    Ok(shard_result) => shard_result,
                    Err(join_error) => {
                        Err(LookupError::internal(format!("shard task failed: {join_error}")))
                    }
                })
                .collect()),
            Err(_) => {
                for handle in abort_handles {
                    handle.abort();
                }
                Err(LookupError::DeadlineExceeded {
                    duration_ms: self.deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Scalar fan-out: merge per-shard responses, isolating failed shards to
    /// their own keys.
    async fn process_sharded_keys(
        &self,
        context: &RequestContext,
        keys: HashSet<String>,
    ) -> Result<InternalLookupResponse, LookupError> {
        let mut response = InternalLookupResponse::default();
        if keys.is_empty() {
            return Ok(response);
        }
        let inputs = self.shard_keys(&keys, false, context)?;
        let handles = self.dispatch(&inputs, LocalResultKind::Value, context)?;
        let results = self.await_all(handles).await?;
        for (input, result) in inputs.iter().zip(results) {
            match result {
                Ok(shard_response) => {
                    update_response(&input.keys, shard_response, &mut response);
                }
                Err(err) => {
                    self.metrics.incr_shard_lookup_failures();
                    error!(error = %err, key_count = input.keys.len(), "sharded lookup failed");
                    set_request_failed(&input.keys, &mut response);
                }
            }
        }
        Ok(response)
    }

    /// Materialize the key-sets for `keys` across all shards.
    ///
    /// Unlike the scalar path, a failed shard fails the whole call: a query
    /// evaluated over partially materialized sets would be silently wrong.
    async fn get_sharded_key_value_set<T: SetElement>(
        &self,
        context: &RequestContext,
        keys: &HashSet<String>,
    ) -> Result<HashMap<String, HashSet<T>>, LookupError> {
        let inputs = self.shard_keys(keys, true, context)?;
        let handles = self.dispatch(&inputs, T::RESULT_KIND, context)?;
        let results = self.await_all(handles).await?;
        let mut key_sets: HashMap<String, HashSet<T>> = HashMap::new();
        for result in results {
            let shard_response = result.inspect_err(|_| self.metrics.incr_shard_lookup_failures())?;
            self.collect_key_sets(&mut key_sets, shard_response);
        }
        Ok(key_sets)
    }

    fn collect_key_sets<T: SetElement>(
        &self,
        key_sets: &mut HashMap<String, HashSet<T>>,
        response: InternalLookupResponse,
    ) {
        for (key, result) in response.kv_pairs {
            let Some(values) = T::extract(result) else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            let value_set: HashSet<T> = values.into_iter().collect();
            if key_sets.insert(key.clone(), value_set).is_some() {
                // Each key lives on exactly one shard, so two shards
                // answering for it indicates divergent placement.
                self.metrics.incr_key_collisions();
                error!(key = %key, "key collision while collecting key-sets from shards");
            }
        }
    }

    /// Set fan-out shared by the string and uint32 entry points.
    async fn get_key_value_sets<T: SetElement>(
        &self,
        context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError> {
        let mut response = InternalLookupResponse::default();
        let unique: HashSet<String> = keys.into_iter().collect();
        if unique.is_empty() {
            return Ok(response);
        }
        let mut key_sets = self.get_sharded_key_value_set::<T>(context, &unique).await?;
        for key in unique {
            let result = match key_sets.remove(&key) {
                Some(values) => T::wrap(values),
                None => SingleLookupResult::Status(LookupStatus::not_found()),
            };
            response.kv_pairs.insert(key, result);
        }
        Ok(response)
    }
}

#[async_trait]
impl Lookup for ShardedLookup {
    async fn get_key_values(
        &self,
        context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError> {
        let unique: HashSet<String> = keys.into_iter().collect();
        self.process_sharded_keys(context, unique).await
    }

    async fn get_key_value_set(
        &self,
        context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError> {
        self.get_key_value_sets::<String>(context, keys).await
    }

    async fn get_uint32_value_set(
        &self,
        context: &RequestContext,
        keys: Vec<String>,
    ) -> Result<InternalLookupResponse, LookupError> {
        self.get_key_value_sets::<u32>(context, keys).await
    }

    async fn run_query(
        &self,
        context: &RequestContext,
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
        let referenced: HashSet<String> = node.keys().into_iter().map(String::from).collect();
        let key_sets = self.get_sharded_key_value_set::<String>(context, &referenced).await?;
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
        _query: String,
    ) -> Result<InternalRunSetQueryIntResponse, LookupError> {
        // Reserved in the internal interface; answers empty until uint32
        // sets can be queried across shards.
        Ok(InternalRunSetQueryIntResponse::default())
    }
}

async fn local_response(
    local: Arc<dyn Lookup>,
    kind: LocalResultKind,
    context: &RequestContext,
    keys: Vec<String>,
) -> Result<InternalLookupResponse, LookupError> {
    if keys.is_empty() {
        return Ok(InternalLookupResponse::default());
    }
    match kind {
        LocalResultKind::Value => local.get_key_values(context, keys).await,
        LocalResultKind::KeysetValues => local.get_key_value_set(context, keys).await,
        LocalResultKind::UintsetValues => local.get_uint32_value_set(context, keys).await,
    }
}

/// Merge one successful shard response, tagging keys the shard omitted as
/// `NotFound`.
fn update_response(
    key_list: &[String],
    mut shard_response: InternalLookupResponse,
    response: &mut InternalLookupResponse,
) {
    for key in key_list {
        let result = match shard_response.kv_pairs.remove(key) {
            Some(result) => result,
            None => SingleLookupResult::Status(LookupStatus::not_found()),
        };
        response.kv_pairs.insert(key.clone(), result);
    }
}

/// Mark every key of a failed shard as an isolated internal failure.
fn set_request_failed(key_list: &[String], response: &mut InternalLookupResponse) {
    for key in key_list {
        response
            .kv_pairs
            .insert(key.clone(), SingleLookupResult::Status(LookupStatus::lookup_failed()));
    }
}
