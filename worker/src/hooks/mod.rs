//! Preloader hook abstraction and the shipped hooks.
//!
//! Each hook is an object with an optional `init` and a required
//! `process_receipt`, run in configured order against every fetched receipt.

pub mod event_filter;
pub mod receipt_dumper;

use crate::error::WorkerError;
use crate::kv_store::KvStore;
use async_trait::async_trait;
use chain_clients_evm::TransactionReceipt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared construction context every hook factory receives. Namespace is
/// not carried here: it arrives per-call with the receipt via
/// `process_receipt(hash, receipt, namespace)`, rather than being baked
/// into hook construction.
pub struct HookContext {
    pub kv: Arc<Mutex<KvStore>>,
}

#[async_trait]
pub trait PreloaderHook: Send + Sync {
    /// Hook identifier used in logs; not necessarily the configured name.
    fn name(&self) -> &str;

    /// Optional one-time setup. A hook that has nothing to do here simply
    /// keeps the default no-op — missing `init` is non-fatal.
    async fn init(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn process_receipt(
        &self,
        tx_hash: &str,
        receipt: &TransactionReceipt,
        namespace: &str,
    ) -> Result<(), WorkerError>;
}
