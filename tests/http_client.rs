//! HTTP binding against a mocked JSON-RPC endpoint.

use futures_util::StreamExt;
use num_bigint::BigUint;
use serde_json::json;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chain_watcher::connectors::{
    ChainClient, ClientError, Connector, HttpChainClient, HttpClientConfig, RpcConnector,
};
use chain_watcher::events::Address;
use chain_watcher::supervisor::{StopReason, SupervisorState, WatcherConfig, WatcherSupervisor};

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result,
    }))
}

async fn node() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_blockNumber" })))
        .respond_with(rpc_result(json!("0x1b4")))
        .mount(&server)
        .await;
    server
}

fn fast_polling() -> HttpClientConfig {
    HttpClientConfig {
        poll_interval: Duration::from_millis(20),
        max_consecutive_failures: 2,
        request_timeout: Duration::from_secs(2),
    }
}

fn address() -> Address {
    "0x00000000000000000000000000000000deadbeef".parse().unwrap()
}

#[tokio::test]
async fn test_balance_at_queries_the_given_height() {
    let server = node().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_getBalance",
            "params": ["0x00000000000000000000000000000000deadbeef", "0x64"],
        })))
        .respond_with(rpc_result(json!("0xde0b6b3a7640000")))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpChainClient::connect(&Url::parse(&server.uri()).unwrap(), fast_polling())
        .await
        .unwrap();
    let balance = client
        .balance_at(&address(), &BigUint::from(100u32))
        .await
        .unwrap();

    assert_eq!(balance, BigUint::from(1_000_000_000_000_000_000u64));
}

#[tokio::test]
async fn test_balance_rpc_error_is_reported() {
    let server = node().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBalance" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": { "code": -32000, "message": "header not found" },
        })))
        .mount(&server)
        .await;

    let client = HttpChainClient::connect(&Url::parse(&server.uri()).unwrap(), fast_polling())
        .await
        .unwrap();
    let err = client
        .balance_at(&address(), &BigUint::from(1u32))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClientError::Rpc {
            code: -32000,
            message: "header not found".to_string()
        }
    );
}

#[tokio::test]
async fn test_connect_fails_when_endpoint_is_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result =
        HttpChainClient::connect(&Url::parse(&server.uri()).unwrap(), fast_polling()).await;

    assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_polling_emits_each_new_block_once() {
    let server = node().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBlockByNumber" })))
        .respond_with(rpc_result(json!({
            "number": "0x1b4",
            "hash": "0xaaaa",
            "difficulty": "0x4ea3f27bc",
            "miner": "0xbb7b8287f3f0a933474a79eae42cbca977791171",
            "parentHash": "0xe99e022112df268087ea7eafaf4790497fd21dbeeb6bd7a1721df161a6657a54",
            "timestamp": "0x55ba467c",
            "nonce": "0x689056015818adbe",
            "transactions": [],
        })))
        .mount(&server)
        .await;

    let client = HttpChainClient::connect(&Url::parse(&server.uri()).unwrap(), fast_polling())
        .await
        .unwrap();
    let mut headers = client.subscribe_headers().await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), headers.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.number.as_deref(), Some("0x1b4"));
    assert_eq!(first.timestamp.as_deref(), Some("0x55ba467c"));

    // Same hash on every later poll: nothing more is emitted.
    let again = tokio::time::timeout(Duration::from_millis(200), headers.next()).await;
    assert!(again.is_err());

    client.close().await;
    let ended = tokio::time::timeout(Duration::from_secs(2), headers.next())
        .await
        .unwrap();
    assert!(ended.is_none());
}

#[tokio::test]
async fn test_repeated_poll_failures_end_the_subscription() {
    let server = node().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBlockByNumber" })))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = HttpChainClient::connect(&Url::parse(&server.uri()).unwrap(), fast_polling())
        .await
        .unwrap();
    let mut headers = client.subscribe_headers().await.unwrap();

    let item = tokio::time::timeout(Duration::from_secs(2), headers.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(item, Err(ClientError::SubscriptionFailed(_))));
}

#[tokio::test]
async fn test_undecodable_blocks_do_not_end_the_subscription() {
    let server = node().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBlockByNumber" })))
        .respond_with(rpc_result(json!("garbage")))
        .mount(&server)
        .await;

    let client = HttpChainClient::connect(&Url::parse(&server.uri()).unwrap(), fast_polling())
        .await
        .unwrap();
    let mut headers = client.subscribe_headers().await.unwrap();

    // Ten polls against a limit of two: still no item, still open.
    let item = tokio::time::timeout(Duration::from_millis(200), headers.next()).await;
    assert!(item.is_err());

    client.close().await;
}

#[tokio::test]
async fn test_malformed_latest_block_keeps_the_session_running() {
    let server = node().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBlockByNumber" })))
        .respond_with(rpc_result(json!({
            "number": "0x1b4",
            "hash": "0xbbbb",
            "difficulty": "0x4ea3f27bc",
            "miner": "0xbb7b8287f3f0a933474a79eae42cbca977791171",
            "parentHash": "0xe99e022112df268087ea7eafaf4790497fd21dbeeb6bd7a1721df161a6657a54",
            "timestamp": ["x"],
        })))
        .mount(&server)
        .await;

    let config = WatcherConfig {
        http: fast_polling(),
        ..WatcherConfig::new(server.uri())
    };
    let (sink, mut records) = tokio::sync::mpsc::unbounded_channel();
    let supervisor = WatcherSupervisor::new(config, sink);
    let stop = supervisor.shutdown_token();
    let state = supervisor.state();
    let run = tokio::spawn(supervisor.run());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*state.borrow(), SupervisorState::Running);
    assert!(records.try_recv().is_err());

    stop.cancel();
    let reason = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, StopReason::External);
}

#[tokio::test]
async fn test_connector_picks_http_binding() {
    let server = node().await;
    let connector = RpcConnector::new(fast_polling());

    let client = connector
        .connect(&Url::parse(&server.uri()).unwrap())
        .await
        .unwrap();

    assert!(client.endpoint().starts_with("http://127.0.0.1"));
    client.close().await;
}
