//! Configuration models and loaders.
//!
//! One model per JSON file, loaded fatally (missing file or malformed
//! JSON aborts startup).

use crate::error::WorkerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisDataRetentionConfig {
    pub max_blocks: u64,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u8,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub cluster_mode: bool,
    pub data_retention: RedisDataRetentionConfig,
}

impl RedisConfig {
    /// Builds the connection URL from the configured host/port/db/password/ssl.
    pub fn connection_url(&self) -> String {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        let auth = match &self.password {
            Some(password) => format!(":{}@", password),
            None => String::new(),
        };
        format!(
            "{}://{}{}:{}/{}",
            scheme, auth, self.host, self.port, self.db
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LogsConfig {
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_true")]
    pub write_to_files: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "INFO".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_queue_key")]
    pub redis_queue_key: String,
    /// 0 means block forever on `brpop`.
    #[serde(default)]
    pub redis_block_timeout: u64,
    /// Bounded worker count.
    #[serde(default = "default_max_workers")]
    pub max_concurrent_workers: usize,
    /// Bounded retry-table size, capping `retry_counts` growth.
    #[serde(default = "default_max_tracked_hashes")]
    pub max_tracked_hashes: usize,
}

fn default_queue_key() -> String {
    "pending_transactions".to_string()
}

fn default_max_workers() -> usize {
    64
}

fn default_max_tracked_hashes() -> usize {
    100_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolDetectorConfig {
    /// Kept behind a flag since this heuristic is a narrowing assumption,
    /// not an invariant of the pool interface; default on.
    #[serde(default = "default_true")]
    pub require_weth_pair: bool,
}

impl Default for PoolDetectorConfig {
    fn default() -> Self {
        Self {
            require_weth_pair: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub namespace: String,
    pub rpc: chain_clients_evm::RpcConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub pool_detector: PoolDetectorConfig,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, WorkerError> {
        if !Path::new(path).exists() {
            return Err(WorkerError::Configuration(format!(
                "settings file not found at {}",
                path
            )));
        }
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .map_err(|e| WorkerError::Configuration(format!("error loading settings: {}", e)))?;
        builder
            .try_deserialize()
            .map_err(|e| WorkerError::Configuration(format!("error decoding settings: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreloaderEntry {
    pub task_type: String,
    pub module: String,
    pub class_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreloaderConfig {
    pub preloaders: Vec<PreloaderEntry>,
}

impl PreloaderConfig {
    pub fn load(path: &str) -> Result<Self, WorkerError> {
        if !Path::new(path).exists() {
            return Err(WorkerError::Configuration(format!(
                "preloader config file not found at {}",
                path
            )));
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Configuration(format!("error reading {}: {}", path, e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| WorkerError::Configuration(format!("error decoding {}: {}", path, e)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddressSource {
    pub config_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventFilterDefinition {
    pub filter_name: String,
    pub abi_path: String,
    pub event_topics: Vec<String>,
    #[serde(default)]
    pub address_source: Option<AddressSource>,
    pub redis_key_pattern: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventFiltersConfig {
    pub filters: Vec<EventFilterDefinition>,
}

impl EventFiltersConfig {
    /// `EVENT_FILTER_CONFIG_PATH` overrides `path` when set.
    pub fn load(path: &str) -> Result<Self, WorkerError> {
        let resolved =
            std::env::var("EVENT_FILTER_CONFIG_PATH").unwrap_or_else(|_| path.to_string());
        if !Path::new(&resolved).exists() {
            return Err(WorkerError::Configuration(format!(
                "event filter config file not found at {}",
                resolved
            )));
        }
        let contents = std::fs::read_to_string(&resolved)
            .map_err(|e| WorkerError::Configuration(format!("error reading {}: {}", resolved, e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| WorkerError::Configuration(format!("error decoding {}: {}", resolved, e)))
    }
}

/// Loads the union of all `projects` addresses from an addresses file,
/// lowercased.
pub fn load_target_addresses(path: &str) -> Result<HashSet<String>, WorkerError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| WorkerError::Configuration(format!("error reading {}: {}", path, e)))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| WorkerError::Configuration(format!("error decoding {}: {}", path, e)))?;

    let mut addresses = HashSet::new();
    if let Some(entries) = value.get("config").and_then(|v| v.as_array()) {
        for entry in entries {
            if let Some(projects) = entry.get("projects").and_then(|v| v.as_array()) {
                for project in projects {
                    if let Some(addr) = project.as_str() {
                        addresses.insert(addr.to_lowercase());
                    }
                }
            }
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_connection_url_without_password() {
        let cfg = RedisConfig {
            host: "localhost".into(),
            port: 6379,
            db: 0,
            password: None,
            ssl: false,
            cluster_mode: false,
            data_retention: RedisDataRetentionConfig {
                max_blocks: 1000,
                ttl_seconds: 3600,
            },
        };
        assert_eq!(cfg.connection_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn redis_connection_url_with_password_and_ssl() {
        let cfg = RedisConfig {
            host: "redis.internal".into(),
            port: 6380,
            db: 2,
            password: Some("hunter2".into()),
            ssl: true,
            cluster_mode: false,
            data_retention: RedisDataRetentionConfig {
                max_blocks: 1000,
                ttl_seconds: 3600,
            },
        };
        assert_eq!(
            cfg.connection_url(),
            "rediss://:hunter2@redis.internal:6380/2"
        );
    }

    #[test]
    fn load_target_addresses_unions_all_projects() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("addresses.json");
        std::fs::write(
            &file_path,
            serde_json::json!({
                "config": [
                    {"projects": ["0xAAA", "0xBBB"]},
                    {"projects": ["0xbbb", "0xCCC"]}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let addresses = load_target_addresses(file_path.to_str().unwrap()).unwrap();
        assert_eq!(addresses.len(), 3);
        assert!(addresses.contains("0xaaa"));
        assert!(addresses.contains("0xbbb"));
        assert!(addresses.contains("0xccc"));
    }

    #[test]
    fn settings_load_fails_fatally_on_missing_file() {
        let result = Settings::load("/nonexistent/settings.json");
        assert!(result.is_err());
    }
}
