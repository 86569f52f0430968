//! Receipt dumper hook.
//!
//! Whole-receipt persistence under a per-block hash, keyed by transaction
//! hash, idempotent on replay. The cleanup sweep deletes hash keys once
//! their block falls outside the configured retention window, running at
//! most once every `max(10, max_blocks / 10)` blocks.

use super::{HookContext, PreloaderHook};
use crate::config::RedisDataRetentionConfig;
use crate::error::WorkerError;
use crate::kv_store::KvStore;
use async_trait::async_trait;
use chain_clients_common::parse_hex_u64;
use chain_clients_evm::TransactionReceipt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct ReceiptDumper {
    kv: Arc<Mutex<KvStore>>,
    retention: RedisDataRetentionConfig,
    cleanup_interval: u64,
    last_cleanup_block: Mutex<Option<u64>>,
}

impl ReceiptDumper {
    pub fn new(ctx: &HookContext, retention: RedisDataRetentionConfig) -> Self {
        let cleanup_interval = std::cmp::max(10, retention.max_blocks / 10);
        Self {
            kv: ctx.kv.clone(),
            retention,
            cleanup_interval,
            last_cleanup_block: Mutex::new(None),
        }
    }

    fn hash_key(namespace: &str, block_number: u64) -> String {
        format!("block_tx_htable:{}:{}", namespace, block_number)
    }

    /// Deletes hash keys for blocks that just aged past the retention
    /// window, run at most once every `cleanup_interval` blocks.
    async fn maybe_cleanup(&self, namespace: &str, block_number: u64) -> Result<(), WorkerError> {
        let mut last = self.last_cleanup_block.lock().await;
        let due = match *last {
            None => true,
            Some(previous) => block_number >= previous + self.cleanup_interval,
        };
        if !due {
            return Ok(());
        }

        let new_cutoff = block_number.saturating_sub(self.retention.max_blocks);
        let previous_cutoff = last
            .map(|previous| previous.saturating_sub(self.retention.max_blocks))
            .unwrap_or(0);

        if new_cutoff > previous_cutoff {
            let mut kv = self.kv.lock().await;
            for stale_block in previous_cutoff..new_cutoff {
                kv.delete(&Self::hash_key(namespace, stale_block)).await?;
            }
        }

        *last = Some(block_number);
        Ok(())
    }
}

#[async_trait]
impl PreloaderHook for ReceiptDumper {
    fn name(&self) -> &str {
        "receipt_dumper"
    }

    async fn process_receipt(
        &self,
        tx_hash: &str,
        receipt: &TransactionReceipt,
        namespace: &str,
    ) -> Result<(), WorkerError> {
        let block_number = parse_hex_u64(&receipt.block_number)
            .map_err(|e| WorkerError::HookFailure {
                hook: self.name().to_string(),
                hash: tx_hash.to_string(),
                source: e.into(),
            })?;

        let key = Self::hash_key(namespace, block_number);
        // `TransactionReceipt`/`Log` flatten every field the node returns
        // into `extra`, so this reproduces the whole, original document.
        let receipt_json = serde_json::to_string(receipt).map_err(|e| WorkerError::HookFailure {
            hook: self.name().to_string(),
            hash: tx_hash.to_string(),
            source: e.into(),
        })?;

        {
            let mut kv = self.kv.lock().await;
            kv.hset(&key, tx_hash, &receipt_json).await?;
            kv.expire(&key, self.retention.ttl_seconds).await?;
        }
        info!(tx_hash, block_number, "added receipt to key-value store");

        self.maybe_cleanup(namespace, block_number).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retention(max_blocks: u64) -> RedisDataRetentionConfig {
        RedisDataRetentionConfig {
            max_blocks,
            ttl_seconds: 3600,
        }
    }

    #[test]
    fn cleanup_interval_is_at_least_ten() {
        let r = retention(50);
        assert_eq!(std::cmp::max(10, r.max_blocks / 10), 10);
        let r = retention(1000);
        assert_eq!(std::cmp::max(10, r.max_blocks / 10), 100);
    }

    #[test]
    fn hash_key_format_matches_schema() {
        assert_eq!(
            ReceiptDumper::hash_key("ns", 16),
            "block_tx_htable:ns:16"
        );
    }
}
