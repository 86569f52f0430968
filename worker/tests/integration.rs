//! End-to-end scenarios against a live Redis and a mocked RPC endpoint.
//!
//! Uses the same `wiremock`-based style as `chain-clients-evm`'s own test
//! module. They need a reachable Redis (`REDIS_TEST_HOST`, default
//! `127.0.0.1`, db 15) and are `#[ignore]`d by default so a plain
//! `cargo test` run never depends on external services.

use chain_clients_evm::{EvmRpcClient, RpcConfig};
use receipt_worker::config::{RedisConfig, RedisDataRetentionConfig};
use receipt_worker::hooks::receipt_dumper::ReceiptDumper;
use receipt_worker::hooks::HookContext;
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn redis_config() -> RedisConfig {
    RedisConfig {
        host: std::env::var("REDIS_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: 6379,
        db: 15,
        password: None,
        ssl: false,
        cluster_mode: false,
        data_retention: RedisDataRetentionConfig {
            max_blocks: 100_000,
            ttl_seconds: 3600,
        },
    }
}

#[tokio::test]
#[ignore = "requires a reachable Redis instance"]
async fn happy_path_receipt_dumper_writes_hash_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "result": {
                "blockNumber": "0x10",
                "transactionIndex": "0x0",
                "logs": []
            },
            "id": 1
        })))
        .mount(&server)
        .await;

    let rpc = EvmRpcClient::new(&RpcConfig {
        url: server.uri(),
        retry: 1,
        request_time_out: 5,
    })
    .unwrap();

    let kv = receipt_worker::kv_store::KvStorePool::get(&redis_config())
        .await
        .expect("redis must be reachable for this test");
    let ctx = HookContext { kv: kv.clone() };
    let dumper = ReceiptDumper::new(
        &ctx,
        RedisDataRetentionConfig {
            max_blocks: 100_000,
            ttl_seconds: 3600,
        },
    );

    let receipt = rpc
        .get_transaction_receipt("0xabc")
        .await
        .unwrap()
        .unwrap();

    use receipt_worker::hooks::PreloaderHook;
    dumper
        .process_receipt("0xabc", &receipt, "ns")
        .await
        .unwrap();

    let stored = kv.lock().await.hget("block_tx_htable:ns:16", "0xabc").await.unwrap();
    assert!(stored.is_some());

    kv.lock().await.delete("block_tx_htable:ns:16").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a reachable Redis instance"]
async fn pool_gate_rejects_address_with_no_code() {
    use receipt_worker::config::PoolDetectorConfig;
    use receipt_worker::pool_detector::PoolDetector;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "result": "0x",
            "id": 1
        })))
        .mount(&server)
        .await;

    let rpc = Arc::new(
        EvmRpcClient::new(&RpcConfig {
            url: server.uri(),
            retry: 0,
            request_time_out: 5,
        })
        .unwrap(),
    );
    let kv = receipt_worker::kv_store::KvStorePool::get(&redis_config())
        .await
        .expect("redis must be reachable for this test");

    let detector = PoolDetector::new(rpc, kv.clone(), PoolDetectorConfig::default());
    let address = "0x000000000000000000000000000000deadbeef";
    let result = detector.is_uniswap_v3_pool(address).await;
    assert!(!result);

    let cached = kv
        .lock()
        .await
        .get(&format!("uniswap_v3_pool_check:{}", address))
        .await
        .unwrap();
    assert_eq!(cached, Some("false".to_string()));

    kv.lock()
        .await
        .delete(&format!("uniswap_v3_pool_check:{}", address))
        .await
        .unwrap();
}
