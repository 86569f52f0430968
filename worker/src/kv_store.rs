//! Key-value store facade.
//!
//! Wraps `redis`'s async `ConnectionManager` behind a process-wide
//! singleton, lazily and exclusively constructed, verified with a `PING` at
//! construction time.

use crate::config::RedisConfig;
use crate::error::WorkerError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct KvStore {
    manager: ConnectionManager,
}

impl KvStore {
    async fn connect(cfg: &RedisConfig) -> Result<Self, WorkerError> {
        let url = cfg.connection_url();
        info!(host = %cfg.host, port = cfg.port, db = cfg.db, "connecting to key-value store");

        let client = redis::Client::open(url.as_str())
            .map_err(|e| WorkerError::Configuration(format!("invalid redis url: {}", e)))?;
        let mut manager = client
            .get_connection_manager()
            .await
            .map_err(|e| WorkerError::Configuration(format!("failed to connect to redis: {}", e)))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| WorkerError::Configuration(format!("redis PING failed: {}", e)))?;

        info!("key-value store connection established");
        Ok(Self { manager })
    }

    /// Rebuilds the underlying connection in place, so every holder of
    /// this `KvStore`'s `Arc` observes the reconnected client without
    /// needing a fresh `Arc` handed back to them.
    pub async fn reconnect(&mut self, cfg: &RedisConfig) -> Result<(), WorkerError> {
        let fresh = Self::connect(cfg).await?;
        self.manager = fresh.manager;
        Ok(())
    }

    pub async fn set(&mut self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), WorkerError> {
        let result = match ttl {
            Some(seconds) => self.manager.set_ex(key, value, seconds).await,
            None => self.manager.set(key, value).await,
        };
        result.map_err(|e| WorkerError::Transport(e.into()))
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<String>, WorkerError> {
        self.manager
            .get(key)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))
    }

    pub async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), WorkerError> {
        self.manager
            .hset(key, field, value)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))
    }

    pub async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, WorkerError> {
        self.manager
            .hget(key, field)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))
    }

    pub async fn lpush(&mut self, key: &str, value: &str) -> Result<(), WorkerError> {
        self.manager
            .lpush(key, value)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))
    }

    /// Blocking right-pop. `timeout_secs == 0` blocks forever.
    pub async fn brpop(
        &mut self,
        key: &str,
        timeout_secs: u64,
    ) -> Result<Option<(String, String)>, WorkerError> {
        let result: Option<(String, String)> = self
            .manager
            .brpop(key, timeout_secs as f64)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))?;
        Ok(result)
    }

    pub async fn zadd(&mut self, key: &str, members: &HashMap<String, f64>) -> Result<(), WorkerError> {
        if members.is_empty() {
            return Ok(());
        }
        let pairs: Vec<(f64, &str)> = members.iter().map(|(m, s)| (*s, m.as_str())).collect();
        self.manager
            .zadd_multiple(key, &pairs)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))
    }

    pub async fn delete(&mut self, key: &str) -> Result<(), WorkerError> {
        self.manager
            .del(key)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))
    }

    pub async fn expire(&mut self, key: &str, ttl_secs: u64) -> Result<(), WorkerError> {
        self.manager
            .expire(key, ttl_secs as i64)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))
    }

    /// Executes every `zadd` call accumulated in `batch` through a single
    /// non-transactional pipeline: per-key atomicity is not required
    /// across keys.
    pub async fn zadd_pipeline(
        &mut self,
        batch: &HashMap<String, HashMap<String, f64>>,
    ) -> Result<(), WorkerError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipeline = redis::pipe();
        for (key, members) in batch {
            if members.is_empty() {
                continue;
            }
            let pairs: Vec<(f64, &str)> = members.iter().map(|(m, s)| (*s, m.as_str())).collect();
            pipeline.zadd_multiple(key, &pairs);
        }
        pipeline
            .query_async::<_, ()>(&mut self.manager)
            .await
            .map_err(|e| WorkerError::Transport(e.into()))
    }
}

/// Process-wide, lazily and exclusively constructed `KvStore` handle.
///
/// A class-level singleton with double-checked locking; `close()` drops the
/// connection so a subsequent `get()` rebuilds it, used by the processor's
/// reconnection logic.
pub struct KvStorePool;

static POOL: tokio::sync::Mutex<Option<Arc<tokio::sync::Mutex<KvStore>>>> =
    tokio::sync::Mutex::const_new(None);

impl KvStorePool {
    pub async fn get(cfg: &RedisConfig) -> Result<Arc<tokio::sync::Mutex<KvStore>>, WorkerError> {
        let mut guard = POOL.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let store = Arc::new(tokio::sync::Mutex::new(KvStore::connect(cfg).await?));
        *guard = Some(store.clone());
        Ok(store)
    }

    pub async fn close() {
        let mut guard = POOL.lock().await;
        if guard.is_some() {
            info!("closing key-value store connection pool");
        }
        *guard = None;
    }
}
