//! HTTP JSON-RPC binding.
//!
//! Plain HTTP has no push channel, so the header "subscription" is emulated
//! by polling `eth_getBlockByNumber("latest")` and emitting a header each
//! time the latest block hash changes. Blocks mined between two polls are
//! not backfilled.

use async_trait::async_trait;
use num_bigint::BigUint;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::events::{Address, RawHeader};
use crate::utils::{format_quantity, parse_quantity};

use super::rpc::{JsonRpcRequest, JsonRpcResponse};
use super::{ChainClient, ClientError, HeaderStream};

/// Configuration for the HTTP binding.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// How often to poll for the latest block.
    pub poll_interval: Duration,
    /// Consecutive failed polls that end the header subscription.
    pub max_consecutive_failures: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_consecutive_failures: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Cheap-to-clone request half, shared with polling tasks.
#[derive(Clone)]
struct RpcHttp {
    client: Client,
    endpoint: String,
    next_id: Arc<AtomicU64>,
}

impl RpcHttp {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&JsonRpcRequest::new(id, method, params))
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Rpc {
                code: i64::from(status),
                message,
            });
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        body.into_result()
    }
}

/// HTTP client for a node's JSON-RPC endpoint.
pub struct HttpChainClient {
    rpc: RpcHttp,
    config: HttpClientConfig,
    shutdown: CancellationToken,
}

impl HttpChainClient {
    /// Builds the client and checks the endpoint with `eth_blockNumber`.
    pub async fn connect(endpoint: &Url, config: HttpClientConfig) -> Result<Self, ClientError> {
        info!("Connecting to HTTP endpoint: {}", endpoint);

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        let rpc = RpcHttp {
            client,
            endpoint: endpoint.to_string(),
            next_id: Arc::new(AtomicU64::new(1)),
        };

        // Fail fast on a dead endpoint
        let head = rpc
            .call("eth_blockNumber", json!([]))
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        info!("HTTP endpoint reachable, head block {}", head);

        Ok(Self {
            rpc,
            config,
            shutdown: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn endpoint(&self) -> &str {
        &self.rpc.endpoint
    }

    async fn subscribe_headers(&self) -> Result<HeaderStream, ClientError> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Closed);
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(poll_latest(
            self.rpc.clone(),
            self.config.clone(),
            self.shutdown.child_token(),
            tx,
        ));

        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    async fn balance_at(
        &self,
        address: &Address,
        height: &BigUint,
    ) -> Result<BigUint, ClientError> {
        let result = self
            .rpc
            .call(
                "eth_getBalance",
                json!([format!("{address:#x}"), format_quantity(height)]),
            )
            .await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ClientError::Decode(format!("balance is not a string: {result}")))?;
        parse_quantity(raw).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn close(&self) {
        self.shutdown.cancel();
        debug!("HTTP client closed: {}", self.rpc.endpoint);
    }
}

impl Drop for HttpChainClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for HttpChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChainClient")
            .field("endpoint", &self.rpc.endpoint)
            .field("poll_interval", &self.config.poll_interval)
            .finish()
    }
}

/// Polls the latest block until cancelled, the subscriber goes away, or too
/// many consecutive polls fail.
async fn poll_latest(
    rpc: RpcHttp,
    config: HttpClientConfig,
    shutdown: CancellationToken,
    tx: mpsc::Sender<Result<RawHeader, ClientError>>,
) {
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_hash: Option<String> = None;
    let mut consecutive_failures = 0u32;

    loop {
        // Wait for the next tick
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tx.closed() => break,
            _ = ticker.tick() => {}
        }

        let latest = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tx.closed() => break,
            result = rpc.call("eth_getBlockByNumber", json!(["latest", false])) => result,
        };

        // Only transport and RPC failures count toward the failure limit.
        let value = match latest {
            Ok(Value::Null) => {
                consecutive_failures = 0;
                debug!("Node has no latest block yet");
                continue;
            }
            Ok(value) => {
                consecutive_failures = 0;
                value
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    "Failed to poll latest block (attempt {}): {}",
                    consecutive_failures, e
                );

                if consecutive_failures >= config.max_consecutive_failures {
                    let _ = tx
                        .send(Err(ClientError::SubscriptionFailed(format!(
                            "latest block poll failed {} times consecutively: {}",
                            consecutive_failures, e
                        ))))
                        .await;
                    break;
                }
                continue;
            }
        };

        // Same head as last poll
        let hash = value.get("hash").and_then(Value::as_str).map(str::to_string);
        if hash.is_some() && hash == last_hash {
            continue;
        }
        last_hash = hash;

        // A block that is not a header object is skipped once; malformed
        // fields inside one are left to the translator.
        let header = match serde_json::from_value::<RawHeader>(value) {
            Ok(header) => header,
            Err(e) => {
                warn!("Skipping undecodable latest block {:?}: {}", last_hash, e);
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = tx.send(Ok(header)) => sent,
        };
        if sent.is_err() {
            break;
        }
    }

    debug!("Latest-block polling stopped for {}", rpc.endpoint);
}
