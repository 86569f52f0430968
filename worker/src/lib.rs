//! Transaction-receipt processing worker: queue consumer, JSON-RPC fetch,
//! and a configurable preloader hook pipeline.

pub mod abi;
pub mod config;
pub mod error;
pub mod hook_manager;
pub mod hooks;
pub mod kv_store;
pub mod pool_detector;
pub mod processor;
