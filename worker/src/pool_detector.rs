//! UniswapV3 pool detector.
//!
//! A 9-selector bytecode coverage heuristic backed by a persistent verdict
//! cache, with fee-tier and tick-spacing validation against the pool's own
//! view-call metadata.

use crate::config::PoolDetectorConfig;
use crate::kv_store::KvStore;
use chain_clients_common::normalize_address;
use chain_clients_evm::EvmRpcClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 4-byte selectors characteristic of a UniswapV3Pool's public interface.
/// At least 6 of these 9 must appear in the deployed bytecode.
const FUNCTION_SELECTORS: [&str; 9] = [
    "ddca3f43", // fee()
    "3850c7bd", // slot0()
    "c45a0155", // factory()
    "0dfe1681", // token0()
    "d21220a7", // token1()
    "1a686502", // liquidity()
    "d0c93a7c", // tickSpacing()
    "f3058399", // feeGrowthGlobal0X128()
    "46141319", // feeGrowthGlobal1X128()
];

const MIN_SELECTOR_MATCHES: usize = 6;

const WETH_ADDRESS: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

const VALID_FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];

fn canonical_tick_spacing(fee: u32) -> Option<i32> {
    match fee {
        100 => Some(1),
        500 => Some(10),
        3000 => Some(60),
        10000 => Some(200),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TokenMetadata {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PoolMetadata {
    pub address: String,
    pub token0: TokenMetadata,
    pub token1: TokenMetadata,
    pub fee: u32,
    pub tick_spacing: i32,
    pub factory: String,
}

pub struct PoolDetector {
    rpc: Arc<EvmRpcClient>,
    kv: Arc<Mutex<KvStore>>,
    config: PoolDetectorConfig,
}

impl PoolDetector {
    pub fn new(rpc: Arc<EvmRpcClient>, kv: Arc<Mutex<KvStore>>, config: PoolDetectorConfig) -> Self {
        Self { rpc, kv, config }
    }

    /// Runs the short-circuit verification pipeline. Any failure anywhere
    /// in the pipeline yields `false`, cached.
    pub async fn is_uniswap_v3_pool(&self, address: &str) -> bool {
        let address = normalize_address(address);
        let cache_key = format!("uniswap_v3_pool_check:{}", address);

        if let Ok(Some(cached)) = self.kv.lock().await.get(&cache_key).await {
            if let Ok(verdict) = serde_json::from_str::<bool>(&cached) {
                return verdict;
            }
        }

        let verdict = self.detect_uncached(&address).await;
        let _ = self
            .kv
            .lock()
            .await
            .set(&cache_key, &serde_json::to_string(&verdict).unwrap(), Some(3600))
            .await;
        verdict
    }

    async fn detect_uncached(&self, address: &str) -> bool {
        let code = match self.rpc.get_code(address).await {
            Ok(code) => code,
            Err(err) => {
                warn!(address, error = %err, "failed to fetch bytecode for pool detection");
                return false;
            }
        };
        if code.is_empty() {
            return false;
        }

        let bytecode_hex = hex::encode(&code);
        let matches = FUNCTION_SELECTORS
            .iter()
            .filter(|selector| bytecode_hex.contains(*selector))
            .count();
        if matches < MIN_SELECTOR_MATCHES {
            debug!(address, matches, "insufficient selector coverage for pool candidate");
            return false;
        }

        let metadata = match self.get_pool_metadata(address).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return false,
            Err(err) => {
                warn!(address, error = %err, "failed to fetch pool metadata");
                return false;
            }
        };

        if !VALID_FEE_TIERS.contains(&metadata.fee) {
            return false;
        }
        if canonical_tick_spacing(metadata.fee) != Some(metadata.tick_spacing) {
            return false;
        }

        if self.config.require_weth_pair {
            let weth = WETH_ADDRESS;
            if metadata.token0.address != weth && metadata.token1.address != weth {
                return false;
            }
        }

        true
    }

    /// Fetches pool + token metadata via view calls, caching both the pool
    /// document (1h TTL) and each token's ERC-20 metadata (24h TTL).
    pub async fn get_pool_metadata(&self, address: &str) -> anyhow::Result<Option<PoolMetadata>> {
        let address = normalize_address(address);
        let cache_key = format!("pool_metadata:{}", address);
        if let Ok(Some(cached)) = self.kv.lock().await.get(&cache_key).await {
            if let Ok(metadata) = serde_json::from_str::<PoolMetadata>(&cached) {
                return Ok(Some(metadata));
            }
        }

        let token0_addr = match self.call_address(&address, "0dfe1681").await {
            Ok(Some(addr)) => addr,
            _ => return Ok(None),
        };
        let token1_addr = match self.call_address(&address, "d21220a7").await {
            Ok(Some(addr)) => addr,
            _ => return Ok(None),
        };
        let factory_addr = match self.call_address(&address, "c45a0155").await {
            Ok(Some(addr)) => addr,
            _ => return Ok(None),
        };
        let fee = match self.call_u32(&address, "ddca3f43").await {
            Ok(Some(fee)) => fee,
            _ => return Ok(None),
        };
        let tick_spacing = match self.call_i32(&address, "d0c93a7c").await {
            Ok(Some(tick_spacing)) => tick_spacing,
            _ => return Ok(None),
        };

        let token0 = match self.get_erc20_metadata(&token0_addr).await? {
            Some(metadata) => metadata,
            None => return Ok(None),
        };
        let token1 = match self.get_erc20_metadata(&token1_addr).await? {
            Some(metadata) => metadata,
            None => return Ok(None),
        };

        let metadata = PoolMetadata {
            address: address.clone(),
            token0,
            token1,
            fee,
            tick_spacing,
            factory: factory_addr,
        };

        let _ = self
            .kv
            .lock()
            .await
            .set(&cache_key, &serde_json::to_string(&metadata)?, Some(3600))
            .await;

        Ok(Some(metadata))
    }

    /// Per-token ERC-20 metadata, with per-field fallback; a fully failed
    /// lookup fails the overall pool verdict.
    async fn get_erc20_metadata(&self, address: &str) -> anyhow::Result<Option<TokenMetadata>> {
        let cache_key = format!("erc20_metadata:{}", address);
        if let Ok(Some(cached)) = self.kv.lock().await.get(&cache_key).await {
            if let Ok(metadata) = serde_json::from_str::<TokenMetadata>(&cached) {
                return Ok(Some(metadata));
            }
        }

        let name_result = self.call_string(address, "06fdde03").await;
        let symbol_result = self.call_string(address, "95d89b41").await;
        let decimals_result = self.call_u8(address, "313ce567").await;

        let all_failed =
            name_result.is_err() && symbol_result.is_err() && decimals_result.is_err();
        if all_failed {
            return Ok(None);
        }

        let name = name_result
            .ok()
            .flatten()
            .unwrap_or_else(|| "Unknown Token".to_string());
        let symbol = symbol_result
            .ok()
            .flatten()
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let decimals = decimals_result.ok().flatten().unwrap_or(18);

        let metadata = TokenMetadata {
            address: address.to_string(),
            name,
            symbol,
            decimals,
        };
        let _ = self
            .kv
            .lock()
            .await
            .set(&cache_key, &serde_json::to_string(&metadata)?, Some(86_400))
            .await;
        Ok(Some(metadata))
    }

    async fn call_address(&self, to: &str, selector: &str) -> anyhow::Result<Option<String>> {
        let calldata = hex::decode(selector)?;
        let result = self.rpc.call(to, &calldata).await?;
        if result.len() < 32 {
            return Ok(None);
        }
        Ok(Some(normalize_address(&hex::encode(&result[12..32]))))
    }

    async fn call_u32(&self, to: &str, selector: &str) -> anyhow::Result<Option<u32>> {
        let calldata = hex::decode(selector)?;
        let result = self.rpc.call(to, &calldata).await?;
        if result.len() < 32 {
            return Ok(None);
        }
        Ok(Some(u32::from_be_bytes(result[28..32].try_into()?)))
    }

    async fn call_i32(&self, to: &str, selector: &str) -> anyhow::Result<Option<i32>> {
        let calldata = hex::decode(selector)?;
        let result = self.rpc.call(to, &calldata).await?;
        if result.len() < 32 {
            return Ok(None);
        }
        Ok(Some(i32::from_be_bytes(result[28..32].try_into()?)))
    }

    async fn call_u8(&self, to: &str, selector: &str) -> anyhow::Result<Option<u8>> {
        let calldata = hex::decode(selector)?;
        let result = self.rpc.call(to, &calldata).await?;
        if result.len() < 32 {
            return Ok(None);
        }
        Ok(Some(result[31]))
    }

    /// Decodes a `string` return value from an ABI-encoded call: a 32-byte
    /// offset, a 32-byte length, then the UTF-8 payload padded to 32 bytes.
    async fn call_string(&self, to: &str, selector: &str) -> anyhow::Result<Option<String>> {
        let calldata = hex::decode(selector)?;
        let result = self.rpc.call(to, &calldata).await?;
        if result.len() < 64 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(result[60..64].try_into()?) as usize;
        if result.len() < 64 + len {
            return Ok(None);
        }
        Ok(String::from_utf8(result[64..64 + len].to_vec()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_tick_spacing_matches_fee_tiers() {
        assert_eq!(canonical_tick_spacing(100), Some(1));
        assert_eq!(canonical_tick_spacing(500), Some(10));
        assert_eq!(canonical_tick_spacing(3000), Some(60));
        assert_eq!(canonical_tick_spacing(10000), Some(200));
        assert_eq!(canonical_tick_spacing(42), None);
    }

    #[test]
    fn function_selectors_cover_nine_entries() {
        assert_eq!(FUNCTION_SELECTORS.len(), 9);
        assert_eq!(MIN_SELECTOR_MATCHES, 6);
    }

    #[test]
    fn valid_fee_tiers_are_the_four_canonical_values() {
        assert_eq!(VALID_FEE_TIERS, [100, 500, 3000, 10000]);
    }
}
