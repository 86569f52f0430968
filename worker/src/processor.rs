//! TxProcessor — the core queue-consumer loop.
//!
//! Blocking pop from the work queue, per-hash concurrent workers,
//! retry-with-cap, 10%-sampled staleness recovery, and KV reconnection on
//! transport error.

use crate::config::{RedisConfig, Settings};
use crate::error::WorkerError;
use crate::hooks::PreloaderHook;
use crate::kv_store::{KvStore, KvStorePool};
use chain_clients_evm::EvmRpcClient;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{error, info, warn};

/// Maximum number of *additional* attempts after the first fetch failure
/// (three attempts total before giving up).
const MAX_RETRY_ATTEMPTS: u8 = 2;

/// Sampling rate for the staleness probe.
const STALENESS_SAMPLE_RATE: f64 = 0.1;

/// Blocks considered "too far behind" before the staleness recovery fires.
const STALENESS_BLOCK_THRESHOLD: u64 = 100;

/// Bounded retry table: a cap on `retry_counts` growth. Eviction is FIFO
/// by first-seen hash rather than strict recency — a deliberate
/// simplification noted in DESIGN.md.
struct RetryTable {
    counts: HashMap<String, u8>,
    order: VecDeque<String>,
    max_tracked: usize,
}

impl RetryTable {
    fn new(max_tracked: usize) -> Self {
        Self {
            counts: HashMap::new(),
            order: VecDeque::new(),
            max_tracked,
        }
    }

    fn increment(&mut self, hash: &str) -> u8 {
        if !self.counts.contains_key(hash) {
            if self.counts.len() >= self.max_tracked {
                if let Some(oldest) = self.order.pop_front() {
                    self.counts.remove(&oldest);
                }
            }
            self.order.push_back(hash.to_string());
        }
        let counter = self.counts.entry(hash.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}

pub struct TxProcessor {
    queue_key: String,
    block_timeout: u64,
    namespace: String,
    redis_config: RedisConfig,
    rpc: Arc<EvmRpcClient>,
    kv: Arc<Mutex<KvStore>>,
    hooks: Vec<Box<dyn PreloaderHook>>,
    retry_counts: Mutex<RetryTable>,
    workers: Arc<Semaphore>,
    worker_capacity: u32,
}

impl TxProcessor {
    pub fn new(
        settings: &Settings,
        rpc: Arc<EvmRpcClient>,
        kv: Arc<Mutex<KvStore>>,
        hooks: Vec<Box<dyn PreloaderHook>>,
    ) -> Self {
        Self {
            queue_key: format!("{}:{}", settings.processor.redis_queue_key, settings.namespace),
            block_timeout: settings.processor.redis_block_timeout,
            namespace: settings.namespace.clone(),
            redis_config: settings.redis.clone(),
            rpc,
            kv,
            hooks,
            retry_counts: Mutex::new(RetryTable::new(settings.processor.max_tracked_hashes)),
            workers: Arc::new(Semaphore::new(settings.processor.max_concurrent_workers)),
            worker_capacity: settings.processor.max_concurrent_workers as u32,
        }
    }

    /// Runs `init()` on every hook that defines one; missing `init` is
    /// non-fatal (the trait's default no-op).
    pub async fn init_hooks(&self) -> Result<(), WorkerError> {
        for hook in &self.hooks {
            hook.init().await?;
        }
        Ok(())
    }

    /// Runs the consumer loop until `shutdown` reports `true`. Returns once
    /// every in-flight worker permit has been released.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(queue_key = %self.queue_key, "starting transaction processor");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let pop_future = async {
                let mut kv = self.kv.lock().await;
                kv.brpop(&self.queue_key, self.block_timeout).await
            };

            let popped = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                result = pop_future => result,
            };

            match popped {
                Ok(Some((_key, hash))) => {
                    let processor = self.clone();
                    let permit = match self.workers.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    tokio::spawn(async move {
                        processor.process_transaction(hash).await;
                        drop(permit);
                    });
                }
                Ok(None) => continue,
                Err(WorkerError::Transport(err)) => {
                    warn!(error = %err, "key-value transport error, reconnecting");
                    self.reconnect_kv().await;
                }
                Err(err) => {
                    error!(error = %err, "unexpected error in consumer loop, backing off");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }

        let _ = self.workers.acquire_many(self.worker_capacity).await;
        info!("transaction processor shut down");
    }

    async fn reconnect_kv(&self) {
        KvStorePool::close().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let mut kv = self.kv.lock().await;
        match kv.reconnect(&self.redis_config).await {
            Ok(()) => info!("key-value store reconnected"),
            Err(err) => error!(error = %err, "key-value store reconnect failed"),
        }
    }

    async fn process_transaction(&self, hash: String) {
        let receipt = match self.rpc.get_transaction_receipt(&hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => return,
            Err(err) => {
                self.handle_fetch_failure(&hash, err).await;
                return;
            }
        };

        if rand::thread_rng().gen_bool(STALENESS_SAMPLE_RATE) {
            if self.is_stale(&receipt).await {
                warn!(tx_hash = %hash, "receipt is stale, purging work queue");
                if let Err(err) = self.kv.lock().await.delete(&self.queue_key).await {
                    error!(error = %err, "failed to purge queue after staleness signal");
                }
                return;
            }
        }

        for hook in &self.hooks {
            if let Err(err) = hook.process_receipt(&hash, &receipt, &self.namespace).await {
                warn!(tx_hash = %hash, hook = hook.name(), error = %err, "hook failed, continuing");
            }
        }
    }

    async fn is_stale(&self, receipt: &chain_clients_evm::TransactionReceipt) -> bool {
        let receipt_block = match chain_clients_common::parse_hex_u64(&receipt.block_number) {
            Ok(value) => value,
            Err(_) => return false,
        };
        match self.rpc.get_block_number().await {
            Ok(current_block) => current_block.saturating_sub(receipt_block) > STALENESS_BLOCK_THRESHOLD,
            Err(_) => false,
        }
    }

    async fn handle_fetch_failure(&self, hash: &str, err: anyhow::Error) {
        let attempt = self.retry_counts.lock().await.increment(hash);
        if attempt <= MAX_RETRY_ATTEMPTS {
            warn!(tx_hash = hash, attempt, error = %err, "fetch failed, re-queueing");
            if let Err(push_err) = self.kv.lock().await.lpush(&self.queue_key, hash).await {
                error!(tx_hash = hash, error = %push_err, "failed to re-queue transaction");
            }
        } else {
            error!(tx_hash = hash, attempt, error = %err, "fetch failed, giving up after max retries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_table_caps_third_failure() {
        let mut table = RetryTable::new(100);
        assert_eq!(table.increment("0xabc"), 1);
        assert_eq!(table.increment("0xabc"), 2);
        assert_eq!(table.increment("0xabc"), 3);
        assert!(3 > MAX_RETRY_ATTEMPTS);
    }

    #[test]
    fn retry_table_evicts_oldest_when_full() {
        let mut table = RetryTable::new(2);
        table.increment("0x1");
        table.increment("0x2");
        table.increment("0x3");
        assert!(!table.counts.contains_key("0x1"));
        assert!(table.counts.contains_key("0x2"));
        assert!(table.counts.contains_key("0x3"));
    }
}
