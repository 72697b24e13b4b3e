//! Connectors to a blockchain node.
//!
//! [`ChainClient`] is the only capability the watchers rely on: a header
//! subscription and a balance query. Transport bindings implement it and a
//! [`Connector`] turns a validated endpoint into a live client.

mod http;
mod rpc;
pub mod websocket;

pub use http::{HttpChainClient, HttpClientConfig};
pub use websocket::WsChainClient;

use async_trait::async_trait;
use futures_util::Stream;
use num_bigint::BigUint;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::events::{Address, RawHeader};

/// Headers pushed by the node, in arrival order.
///
/// Dropping the stream releases the subscription.
pub type HeaderStream = Pin<Box<dyn Stream<Item = Result<RawHeader, ClientError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    #[error("RPC error ({code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Client closed")]
    Closed,
}

/// Abstract connection to a blockchain node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Endpoint this client talks to, for logging.
    fn endpoint(&self) -> &str;

    /// Opens a subscription to new block headers.
    async fn subscribe_headers(&self) -> Result<HeaderStream, ClientError>;

    /// Queries the balance of `address` as of block `height`.
    async fn balance_at(&self, address: &Address, height: &BigUint)
        -> Result<BigUint, ClientError>;

    /// Releases the underlying connection. Open subscriptions end.
    async fn close(&self);
}

/// Establishes a [`ChainClient`] for an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Arc<dyn ChainClient>, ClientError>;
}

/// Picks the transport binding from the endpoint scheme.
#[derive(Debug, Clone, Default)]
pub struct RpcConnector {
    http: HttpClientConfig,
}

impl RpcConnector {
    pub fn new(http: HttpClientConfig) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Connector for RpcConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Arc<dyn ChainClient>, ClientError> {
        match endpoint.scheme() {
            "ws" | "wss" => Ok(Arc::new(WsChainClient::connect(endpoint).await?)),
            "http" | "https" => Ok(Arc::new(
                HttpChainClient::connect(endpoint, self.http.clone()).await?,
            )),
            other => Err(ClientError::ConnectionFailed(format!(
                "unsupported scheme: {other}"
            ))),
        }
    }
}
