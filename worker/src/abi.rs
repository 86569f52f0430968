//! ABI loading, event-topic computation, and log decoding.
//!
//! Loads each ABI file once, computes every event's canonical topic, and
//! keeps only the ones the filter configuration asks for. Uses `ethabi`,
//! the ecosystem's standard ABI codec.

use crate::config::EventFilterDefinition;
use crate::error::WorkerError;
use chain_clients_common::normalize_hex;
use ethabi::{Contract, Event, RawLog, Token};
use ethereum_types::H256;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use tracing::warn;

#[derive(Clone)]
pub struct ProcessedEventDetail {
    pub name: String,
    pub event: Event,
}

#[derive(Clone)]
pub struct ProcessedFilterData {
    pub filter_name: String,
    pub events_by_topic: HashMap<String, ProcessedEventDetail>,
    pub redis_key_pattern: String,
}

fn load_abi(path: &str) -> Result<Contract, WorkerError> {
    let file = File::open(path)
        .map_err(|e| WorkerError::Configuration(format!("ABI file '{}' not found: {}", path, e)))?;
    Contract::load(BufReader::new(file))
        .map_err(|e| WorkerError::Configuration(format!("error decoding ABI file '{}': {}", path, e)))
}

/// Builds the `{filter_name → ProcessedFilterData}` map, loading each ABI
/// file once even if multiple filters share it. A filter whose configured
/// topics match zero ABI events is skipped with a warning, not fatal;
/// a missing or malformed ABI file is fatal for that filter's startup.
pub fn prepare_filters(
    filters: &[EventFilterDefinition],
) -> Result<HashMap<String, ProcessedFilterData>, WorkerError> {
    let mut loaded_abis: HashMap<String, Contract> = HashMap::new();
    let mut processed = HashMap::new();

    for filter_def in filters {
        if !loaded_abis.contains_key(&filter_def.abi_path) {
            let contract = load_abi(&filter_def.abi_path)?;
            loaded_abis.insert(filter_def.abi_path.clone(), contract);
        }
        let contract = loaded_abis.get(&filter_def.abi_path).unwrap();

        let configured_topics: std::collections::HashSet<String> = filter_def
            .event_topics
            .iter()
            .map(|t| normalize_hex(t))
            .collect();

        let mut events_by_topic = HashMap::new();
        for event in contract.events.values().flatten() {
            let topic = format!("0x{:x}", event.signature());
            if configured_topics.contains(&topic) {
                events_by_topic.insert(
                    topic,
                    ProcessedEventDetail {
                        name: event.name.clone(),
                        event: event.clone(),
                    },
                );
            }
        }

        let missing: Vec<&String> = configured_topics
            .iter()
            .filter(|t| !events_by_topic.contains_key(*t))
            .collect();
        for topic in missing {
            warn!(
                filter = %filter_def.filter_name,
                topic,
                "configured topic not found in ABI"
            );
        }

        if events_by_topic.is_empty() {
            warn!(
                filter = %filter_def.filter_name,
                "no configured topics matched any ABI event, skipping filter"
            );
            continue;
        }

        processed.insert(
            filter_def.filter_name.clone(),
            ProcessedFilterData {
                filter_name: filter_def.filter_name.clone(),
                events_by_topic,
                redis_key_pattern: filter_def.redis_key_pattern.clone(),
            },
        );
    }

    Ok(processed)
}

/// Decodes a log's indexed and non-indexed parameters into a
/// `{name → value}` JSON object.
pub fn decode_log(
    event: &Event,
    topics: &[String],
    data: &[u8],
) -> anyhow::Result<serde_json::Value> {
    let parsed_topics = topics
        .iter()
        .map(|t| {
            let trimmed = t.strip_prefix("0x").unwrap_or(t);
            let bytes = hex::decode(trimmed)?;
            Ok(H256::from_slice(&bytes))
        })
        .collect::<anyhow::Result<Vec<H256>>>()?;

    let raw_log = RawLog {
        topics: parsed_topics,
        data: data.to_vec(),
    };
    let decoded = event.parse_log(raw_log)?;

    let mut map = serde_json::Map::new();
    for param in decoded.params {
        map.insert(param.name, token_to_json(&param.value));
    }
    Ok(serde_json::Value::Object(map))
}

fn token_to_json(token: &Token) -> serde_json::Value {
    match token {
        Token::Address(addr) => serde_json::Value::String(format!("0x{:x}", addr)),
        Token::FixedBytes(bytes) | Token::Bytes(bytes) => {
            serde_json::Value::String(format!("0x{}", hex::encode(bytes)))
        }
        Token::Int(value) | Token::Uint(value) => serde_json::Value::String(value.to_string()),
        Token::Bool(value) => serde_json::Value::Bool(*value),
        Token::String(value) => serde_json::Value::String(value.clone()),
        Token::FixedArray(tokens) | Token::Array(tokens) => {
            serde_json::Value::Array(tokens.iter().map(token_to_json).collect())
        }
        Token::Tuple(tokens) => {
            serde_json::Value::Array(tokens.iter().map(token_to_json).collect())
        }
    }
}

/// Computes an event's canonical topic hash directly from its ABI entry,
/// without going through a loaded `Contract` — used by tests that check
/// against known reference hashes.
pub fn event_topic(event: &Event) -> String {
    format!("0x{:x}", event.signature())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_test_contract() -> Contract {
        let abi_json = serde_json::json!([
            {
                "type": "event",
                "name": "Swap",
                "anonymous": false,
                "inputs": [
                    {"name": "sender", "type": "address", "indexed": true},
                    {"name": "recipient", "type": "address", "indexed": true},
                    {"name": "amount0", "type": "int256", "indexed": false},
                    {"name": "amount1", "type": "int256", "indexed": false},
                    {"name": "sqrtPriceX96", "type": "uint160", "indexed": false},
                    {"name": "liquidity", "type": "uint128", "indexed": false},
                    {"name": "tick", "type": "int24", "indexed": false}
                ]
            },
            {
                "type": "event",
                "name": "Transfer",
                "anonymous": false,
                "inputs": [
                    {"name": "from", "type": "address", "indexed": true},
                    {"name": "to", "type": "address", "indexed": true},
                    {"name": "value", "type": "uint256", "indexed": false}
                ]
            }
        ]);
        ethabi::Contract::load(abi_json.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn swap_event_topic_matches_reference_hash() {
        let contract = load_test_contract();
        let swap = &contract.events["Swap"][0];
        assert_eq!(
            event_topic(swap),
            "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67"
        );
    }

    #[test]
    fn transfer_event_topic_matches_reference_hash() {
        let contract = load_test_contract();
        let transfer = &contract.events["Transfer"][0];
        assert_eq!(
            event_topic(transfer),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }
}
