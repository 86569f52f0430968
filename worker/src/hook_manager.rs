//! Hook manager.
//!
//! Resolves each configured `{module, class_name}` entry to a hook
//! instance, in order, failing startup on the first unresolvable or
//! unconstructible entry. Dynamic module loading has no static-language
//! equivalent, so names resolve through a build-time registry instead.

use crate::config::{EventFiltersConfig, PoolDetectorConfig, PreloaderConfig, RedisDataRetentionConfig};
use crate::error::WorkerError;
use crate::hooks::event_filter::{EventFilter, PoolDetectorGate};
use crate::hooks::receipt_dumper::ReceiptDumper;
use crate::hooks::{HookContext, PreloaderHook};
use crate::pool_detector::PoolDetector;
use chain_clients_evm::EvmRpcClient;
use std::sync::Arc;

/// Identifies a hook by the `{module, class_name}` pair configured in
/// `preloaders.json`, the closest static equivalent of a fully-qualified
/// import path.
fn registry_key(module: &str, class_name: &str) -> String {
    format!("{}.{}", module, class_name)
}

pub struct HookManager;

impl HookManager {
    /// Resolves every configured preloader entry into a constructed hook,
    /// preserving configuration order. Unknown `{module, class_name}`
    /// pairs and per-hook construction failures are both fatal.
    pub fn load_hooks(
        preloaders: &PreloaderConfig,
        ctx: &HookContext,
        rpc: Arc<EvmRpcClient>,
        event_filters: &EventFiltersConfig,
        pool_detector_config: PoolDetectorConfig,
        receipt_retention: RedisDataRetentionConfig,
    ) -> Result<Vec<Box<dyn PreloaderHook>>, WorkerError> {
        let pool_detector = Arc::new(PoolDetector::new(rpc, ctx.kv.clone(), pool_detector_config));

        let mut hooks: Vec<Box<dyn PreloaderHook>> = Vec::new();
        for entry in &preloaders.preloaders {
            let key = registry_key(&entry.module, &entry.class_name);
            let hook: Box<dyn PreloaderHook> = match key.as_str() {
                "utils.preloaders.receipt_dumper.ReceiptDumper" => {
                    Box::new(ReceiptDumper::new(ctx, receipt_retention.clone()))
                }
                "utils.preloaders.event_filter.EventFilter" => {
                    let detector = pool_detector.clone();
                    Box::new(EventFilter::new(ctx, &event_filters.filters, move || {
                        Box::new(PoolDetectorGate::new(detector.clone()))
                    })?)
                }
                _ => {
                    return Err(WorkerError::Configuration(format!(
                        "unknown preloader '{}' (module='{}', class_name='{}')",
                        key, entry.module, entry.class_name
                    )))
                }
            };
            hooks.push(hook);
        }
        Ok(hooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_key_joins_module_and_class() {
        assert_eq!(
            registry_key("utils.preloaders.receipt_dumper", "ReceiptDumper"),
            "utils.preloaders.receipt_dumper.ReceiptDumper"
        );
    }
}
