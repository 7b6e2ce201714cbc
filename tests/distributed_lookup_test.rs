//! Two-node end-to-end: a sharded lookup on node 0 resolving keys from its
//! own cache and from node 1 over the real internal protocol.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use larch::DataOrchestrator;
use larch::DeltaRecord;
use larch::InternalLookupServer;
use larch::KeySharder;
use larch::KeyValueCache;
use larch::LocalLookup;
use larch::Lookup;
use larch::LookupMetrics;
use larch::RemoteLookupClientImpl;
use larch::RequestContext;
use larch::ShardManager;
use larch::ShardedLookup;
use larch::lookup::wire::SingleLookupResult;

const NUM_SHARDS: u32 = 2;

fn find_seed(layout: &[(&str, u32)]) -> u64 {
    (0..5_000_000u64)
        .find(|seed| {
            let sharder = KeySharder::new(*seed);
            layout
                .iter()
                .all(|(key, shard)| sharder.shard_num_for_key(key, NUM_SHARDS).shard_num == *shard)
        })
        .expect("no seed satisfies the requested shard layout")
}

fn node(seed: u64, shard_num: u32) -> (Arc<KeyValueCache>, Arc<dyn Lookup>, Arc<DataOrchestrator>) {
    let cache = Arc::new(KeyValueCache::new());
    let metrics = Arc::new(LookupMetrics::new());
    let local_lookup: Arc<dyn Lookup> =
        Arc::new(LocalLookup::new(Arc::clone(&cache), Arc::clone(&metrics)));
    let orchestrator = Arc::new(DataOrchestrator::new(
        Arc::clone(&cache),
        KeySharder::new(seed),
        NUM_SHARDS,
        shard_num,
        1,
        metrics,
    ));
    (cache, local_lookup, orchestrator)
}

#[tokio::test]
async fn sharded_lookup_across_real_nodes() {
    let seed = find_seed(&[("key4", 0), ("key1", 1), ("segments_a", 0), ("segments_b", 1)]);

    // Node 1: owns key1 and segments_b, serves the internal protocol.
    let (_cache1, local1, orchestrator1) = node(seed, 1);
    orchestrator1.load_batch(vec![
        DeltaRecord::update("key1", "value1", 1),
        DeltaRecord::update("key4", "ignored", 1), // wrong shard, dropped
        DeltaRecord {
            key: "segments_b".into(),
            value: larch::data::RecordValue::StringSet(vec!["y".into(), "z".into()]),
            logical_commit_time: 1,
            mutation_type: larch::data::MutationType::Update,
        },
    ]);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    tokio::spawn(InternalLookupServer::new(local1).serve(listener));

    // Node 0: owns key4 and segments_a, fans out to node 1.
    let (_cache0, local0, orchestrator0) = node(seed, 0);
    orchestrator0.load_batch(vec![
        DeltaRecord::update("key4", "value4", 1),
        DeltaRecord {
            key: "segments_a".into(),
            value: larch::data::RecordValue::StringSet(vec!["x".into(), "y".into()]),
            logical_commit_time: 1,
            mutation_type: larch::data::MutationType::Update,
        },
    ]);
    let shard_manager = Arc::new(ShardManager::new(NUM_SHARDS));
    shard_manager.insert(1, Arc::new(RemoteLookupClientImpl::new(addr)));
    let metrics = Arc::new(LookupMetrics::new());
    let sharded = ShardedLookup::new(
        local0,
        NUM_SHARDS,
        0,
        shard_manager,
        KeySharder::new(seed),
        Duration::from_secs(5),
        metrics,
    )
    .expect("sharded lookup");

    // Scalar batch: one local hit, one remote hit, nothing missing.
    let context = RequestContext::default();
    let response = sharded
        .get_key_values(&context, vec!["key1".into(), "key4".into()])
        .await
        .expect("fan-out");
    assert_eq!(response.kv_pairs["key4"], SingleLookupResult::Value("value4".into()));
    assert_eq!(response.kv_pairs["key1"], SingleLookupResult::Value("value1".into()));

    // Query composing a local key-set with a remote one.
    let response = sharded
        .run_query(&context, "segments_a & segments_b".to_string())
        .await
        .expect("query");
    let got: HashSet<&str> = response.elements.iter().map(String::as_str).collect();
    assert_eq!(got, ["y"].into_iter().collect());

    let response = sharded
        .run_query(&context, "segments_a | segments_b".to_string())
        .await
        .expect("query");
    let got: HashSet<&str> = response.elements.iter().map(String::as_str).collect();
    assert_eq!(got, ["x", "y", "z"].into_iter().collect());
}
