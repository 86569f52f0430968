//! Event filter hook.
//!
//! Per-log topic matching against a startup-loaded ABI set, gated by a
//! pluggable address predicate, decoded and written into per-address
//! sorted indexes scored by `(block, log_index)`.

use super::{HookContext, PreloaderHook};
use crate::abi::{self, ProcessedFilterData};
use crate::config::{load_target_addresses, EventFilterDefinition};
use crate::error::WorkerError;
use crate::kv_store::KvStore;
use crate::pool_detector::PoolDetector;
use async_trait::async_trait;
use chain_clients_common::{normalize_address, normalize_hex, parse_hex_u64};
use chain_clients_evm::TransactionReceipt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Pluggable predicate deciding whether a log's contract address is in
/// scope for a filter. The shipped default is the pool detector; a
/// static allow-list remains available.
#[async_trait]
pub trait AddressGate: Send + Sync {
    async fn accepts(&self, address: &str) -> bool;
}

pub struct PoolDetectorGate {
    detector: Arc<PoolDetector>,
}

impl PoolDetectorGate {
    pub fn new(detector: Arc<PoolDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl AddressGate for PoolDetectorGate {
    async fn accepts(&self, address: &str) -> bool {
        self.detector.is_uniswap_v3_pool(address).await
    }
}

pub struct StaticAllowListGate {
    addresses: HashSet<String>,
}

impl StaticAllowListGate {
    pub fn from_config_file(path: &str) -> Result<Self, WorkerError> {
        Ok(Self {
            addresses: load_target_addresses(path)?,
        })
    }
}

#[async_trait]
impl AddressGate for StaticAllowListGate {
    async fn accepts(&self, address: &str) -> bool {
        self.addresses.contains(&normalize_address(address))
    }
}

struct LoadedFilter {
    data: ProcessedFilterData,
    gate: Box<dyn AddressGate>,
}

pub struct EventFilter {
    kv: Arc<Mutex<KvStore>>,
    filters: Vec<LoadedFilter>,
}

impl EventFilter {
    /// Implements `_prepare_filters`: load every filter's ABI once, keep
    /// only filters with at least one matched topic, and attach each
    /// filter's configured gate.
    pub fn new(
        ctx: &HookContext,
        definitions: &[EventFilterDefinition],
        default_gate: impl Fn() -> Box<dyn AddressGate>,
    ) -> Result<Self, WorkerError> {
        let processed = abi::prepare_filters(definitions)?;

        let mut filters = Vec::new();
        for def in definitions {
            let Some(data) = processed.get(&def.filter_name) else {
                continue;
            };
            let gate: Box<dyn AddressGate> = match &def.address_source {
                Some(source) => Box::new(StaticAllowListGate::from_config_file(&source.config_file)?),
                None => default_gate(),
            };
            filters.push(LoadedFilter {
                data: data.clone(),
                gate,
            });
        }

        Ok(Self {
            kv: ctx.kv.clone(),
            filters,
        })
    }
}

#[async_trait]
impl PreloaderHook for EventFilter {
    fn name(&self) -> &str {
        "event_filter"
    }

    async fn process_receipt(
        &self,
        tx_hash: &str,
        receipt: &TransactionReceipt,
        namespace: &str,
    ) -> Result<(), WorkerError> {
        if receipt.logs.is_empty() {
            return Ok(());
        }

        let block_number = match parse_hex_u64(&receipt.block_number) {
            Ok(value) => value,
            Err(_) => return Ok(()),
        };
        let tx_index = match parse_hex_u64(&receipt.transaction_index) {
            Ok(value) => value,
            Err(_) => return Ok(()),
        };

        let mut batch: HashMap<String, HashMap<String, f64>> = HashMap::new();

        for log in &receipt.logs {
            let Some(topic0) = log.topics.first() else {
                continue;
            };
            let Some(log_index_hex) = &log.log_index else {
                continue;
            };
            let log_index = match parse_hex_u64(log_index_hex) {
                Ok(value) => value,
                Err(_) => continue,
            };
            let address = log.address.to_lowercase();
            let topic0 = normalize_hex(topic0);

            for filter in &self.filters {
                if !filter.gate.accepts(&address).await {
                    continue;
                }
                let Some(event_detail) = filter.data.events_by_topic.get(&topic0) else {
                    continue;
                };

                let args = match abi::decode_log(&event_detail.event, &log.topics, &decode_hex_data(&log.data)) {
                    Ok(args) => args,
                    Err(err) => {
                        warn!(tx_hash, %topic0, error = %err, "failed to decode log, skipping");
                        continue;
                    }
                };

                let score = (block_number * 1_000_000 + log_index) as f64;
                let redis_key = filter
                    .data
                    .redis_key_pattern
                    .replace("{namespace}", namespace)
                    .replace("{address}", &log.address);

                let member = serde_json::json!({
                    "eventName": event_detail.name,
                    "filterName": filter.data.filter_name,
                    "txHash": tx_hash,
                    "blockNumber": block_number,
                    "txIndex": tx_index,
                    "logIndex": log_index,
                    "address": log.address,
                    "topics": log.topics.iter().map(|t| normalize_hex(t)).collect::<Vec<_>>(),
                    "data": log.data,
                    "args": args,
                    "_score": score,
                });

                batch
                    .entry(redis_key)
                    .or_default()
                    .insert(member.to_string(), score);
            }
        }

        if !batch.is_empty() {
            debug!(tx_hash, keys = batch.len(), "writing matched events to sorted sets");
            self.kv.lock().await.zadd_pipeline(&batch).await?;
        }

        Ok(())
    }
}

fn decode_hex_data(data: &str) -> Vec<u8> {
    let trimmed = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(trimmed).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_data_handles_empty_payload() {
        assert_eq!(decode_hex_data("0x"), Vec::<u8>::new());
    }

    #[test]
    fn decode_hex_data_strips_prefix() {
        assert_eq!(decode_hex_data("0x0102"), vec![0x01, 0x02]);
    }
}
