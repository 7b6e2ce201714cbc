//! larch node binary: data-plane server for one shard.
//!
//! Serves the internal shard-to-shard lookup protocol over the in-memory
//! cache, ingests delta files from a local directory (the fallback polling
//! path), and runs tombstone GC. The UDF front door is a separate concern
//! and talks to this process through the internal protocol.
//!
//! Configuration comes from `LARCH_*` environment variables; CLI flags
//! override them.
//!
//! # Usage
//!
//! ```bash
//! # Single-shard node with a local delta directory
//! larch-node --delta-dir ./deltas
//!
//! # Shard 1 of 4
//! larch-node --num-shards 4 --current-shard-num 1 \
//!     --internal-listen-addr 0.0.0.0:50101 \
//!     --shard-addresses host0:50100,host1:50101,host2:50102,host3:50103
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use larch::DataOrchestrator;
use larch::InternalLookupServer;
use larch::KeySharder;
use larch::KeyValueCache;
use larch::LocalLookup;
use larch::Lookup;
use larch::LookupMetrics;
use larch::RemoteLookupClientImpl;
use larch::ServerConfig;
use larch::ShardManager;
use larch::ShardedLookup;

#[derive(Debug, Parser)]
#[command(name = "larch-node", about = "Sharded in-memory key/value serving node")]
struct Args {
    /// Total number of shards in the deployment.
    #[arg(long)]
    num_shards: Option<u32>,

    /// The shard this node owns.
    #[arg(long)]
    current_shard_num: Option<u32>,

    /// Seed of the placement hash; identical across the deployment.
    #[arg(long)]
    hashing_seed: Option<u64>,

    /// Listen address for the internal lookup server.
    #[arg(long)]
    internal_listen_addr: Option<String>,

    /// Comma-separated internal addresses of all shards, by shard number.
    #[arg(long, value_delimiter = ',')]
    shard_addresses: Option<Vec<String>>,

    /// Directory of newline-delimited JSON delta files.
    #[arg(long)]
    delta_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load().context("loading configuration")?;
    if let Some(num_shards) = args.num_shards {
        config.num_shards = num_shards;
    }
    if let Some(current_shard_num) = args.current_shard_num {
        config.current_shard_num = current_shard_num;
    }
    if let Some(hashing_seed) = args.hashing_seed {
        config.hashing_seed = hashing_seed;
    }
    if let Some(addr) = args.internal_listen_addr {
        config.internal_listen_addr = addr;
    }
    if let Some(addresses) = args.shard_addresses {
        config.shard_addresses = addresses;
    }
    config.validate().context("validating configuration")?;
    info!(?config, "starting larch node");

    let cache = Arc::new(KeyValueCache::new());
    let metrics = Arc::new(LookupMetrics::new());
    let key_sharder = match (config.use_sharding_key_regex, &config.sharding_key_regex) {
        (true, Some(pattern)) => KeySharder::with_regex(config.hashing_seed, pattern)
            .context("compiling sharding key regex")?,
        _ => KeySharder::new(config.hashing_seed),
    };
    let local_lookup: Arc<dyn Lookup> =
        Arc::new(LocalLookup::new(Arc::clone(&cache), Arc::clone(&metrics)));

    // Remote clients for every other shard, when addresses are configured
    // statically. A discovery loop may replace them at runtime.
    let shard_manager = Arc::new(ShardManager::new(config.num_shards));
    for (shard_num, address) in config.shard_addresses.iter().enumerate() {
        if shard_num as u32 != config.current_shard_num {
            shard_manager
                .insert(shard_num as u32, Arc::new(RemoteLookupClientImpl::new(address.clone())));
        }
    }

    // Fail fast on shard wiring the UDF layer would trip over later: the
    // fan-out refuses nonsensical shard configurations at construction.
    if config.num_shards > 1 {
        ShardedLookup::new(
            Arc::clone(&local_lookup),
            config.num_shards,
            config.current_shard_num,
            Arc::clone(&shard_manager),
            key_sharder.clone(),
            config.lookup_deadline(),
            Arc::clone(&metrics),
        )
        .context("building sharded lookup")?;
    }

    let orchestrator = Arc::new(DataOrchestrator::new(
        Arc::clone(&cache),
        key_sharder,
        config.num_shards,
        config.current_shard_num,
        config.realtime_updater_num_threads,
        Arc::clone(&metrics),
    ));
    if let Some(delta_dir) = args.delta_dir {
        let stats = orchestrator
            .load_delta_dir(&delta_dir, config.data_loading_num_threads)
            .await
            .context("initial delta load")?;
        info!(?stats, "initial delta load complete");
        tokio::spawn(Arc::clone(&orchestrator).poll_delta_dir(
            delta_dir,
            config.backup_poll_frequency(),
            config.data_loading_num_threads,
        ));
    }
    tokio::spawn(
        Arc::clone(&orchestrator).run_gc(config.backup_poll_frequency(), config.gc_safety_margin),
    );

    let listener = TcpListener::bind(&config.internal_listen_addr)
        .await
        .with_context(|| format!("binding {}", config.internal_listen_addr))?;
    let server = InternalLookupServer::new(local_lookup);
    tokio::select! {
        result = server.serve(listener) => {
            result.context("internal lookup server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
