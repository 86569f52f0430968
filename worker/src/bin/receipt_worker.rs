//! Receipt worker service binary.
//!
//! Pops transaction hashes from a Redis-backed work queue, fetches each
//! receipt over JSON-RPC, and runs it through the configured preloader
//! hook chain.
//!
//! ```bash
//! cargo run --bin receipt-worker -- --config config/settings.json
//! ```
//!
//! Or via environment variable:
//!
//! ```bash
//! RECEIPT_WORKER_CONFIG_PATH=config/settings.json cargo run --bin receipt-worker
//! ```

use anyhow::Result;
use chain_clients_evm::EvmRpcClient;
use clap::Parser;
use receipt_worker::config::{EventFiltersConfig, PreloaderConfig, Settings};
use receipt_worker::hook_manager::HookManager;
use receipt_worker::hooks::HookContext;
use receipt_worker::kv_store::{KvStorePool, KvStore};
use receipt_worker::processor::TxProcessor;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "receipt-worker")]
#[command(about = "Transaction-receipt processing worker")]
struct Args {
    /// Path to the worker's settings file (default: config/settings.json or
    /// RECEIPT_WORKER_CONFIG_PATH env var).
    #[arg(short, long)]
    config: Option<String>,

    /// Path to preloaders.json (default: config/preloaders.json).
    #[arg(long, default_value = "config/preloaders.json")]
    preloaders: String,

    /// Path to the event filter config (default: config/event_filters.json,
    /// overridable by EVENT_FILTER_CONFIG_PATH).
    #[arg(long, default_value = "config/event_filters.json")]
    event_filters: String,
}

fn resolve_settings_path(arg: Option<String>) -> String {
    if let Some(path) = arg {
        return path;
    }
    std::env::var("RECEIPT_WORKER_CONFIG_PATH").unwrap_or_else(|_| "config/settings.json".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    let settings_path = resolve_settings_path(args.config);
    info!(path = %settings_path, "loading settings");
    let settings = Settings::load(&settings_path)?;

    info!(
        namespace = %settings.namespace,
        rpc_url = %settings.rpc.url,
        queue_key = %settings.processor.redis_queue_key,
        "receipt worker starting"
    );

    let preloaders = PreloaderConfig::load(&args.preloaders)?;
    let event_filters = EventFiltersConfig::load(&args.event_filters)?;

    let rpc = Arc::new(EvmRpcClient::new(&settings.rpc)?);
    let kv: Arc<tokio::sync::Mutex<KvStore>> = KvStorePool::get(&settings.redis).await?;

    let ctx = HookContext { kv: kv.clone() };
    let hooks = HookManager::load_hooks(
        &preloaders,
        &ctx,
        rpc.clone(),
        &event_filters,
        settings.pool_detector.clone(),
        settings.redis.data_retention.clone(),
    )?;

    let processor = Arc::new(TxProcessor::new(&settings, rpc, kv.clone(), hooks));
    processor.init_hooks().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn(processor.clone().run(shutdown_rx));

    signal::ctrl_c().await?;
    info!("received shutdown signal, draining in-flight workers");
    let _ = shutdown_tx.send(true);
    let _ = run_handle.await;

    KvStorePool::close().await;
    info!("receipt worker stopped");
    Ok(())
}
