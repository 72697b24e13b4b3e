//! WebSocket JSON-RPC binding.
//!
//! A background task owns the socket. Callers talk to it through a command
//! channel; responses are matched by request id and `eth_subscription`
//! notifications are routed to their subscriber. The task exclusively owns
//! its pending and subscription maps, so no locking is needed.
//!
//! There is no reconnection: when the socket fails every pending request
//! and open subscription receives the error and the task exits.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use num_bigint::BigUint;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::events::{Address, RawHeader};
use crate::utils::{format_quantity, parse_quantity};

use super::rpc::{JsonRpcRequest, JsonRpcResponse, SubscriptionNotification};
use super::{ChainClient, ClientError, HeaderStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type HeaderItem = Result<RawHeader, ClientError>;
type HeaderReceiver = mpsc::UnboundedReceiver<HeaderItem>;

enum Command {
    Call {
        method: &'static str,
        params: Value,
        reply: oneshot::Sender<Result<Value, ClientError>>,
    },
    SubscribeHeaders {
        reply: oneshot::Sender<Result<HeaderReceiver, ClientError>>,
    },
    Close,
}

enum Pending {
    Call(oneshot::Sender<Result<Value, ClientError>>),
    Subscribe(oneshot::Sender<Result<HeaderReceiver, ClientError>>),
    Unsubscribe,
}

impl Pending {
    fn fail(self, err: ClientError) {
        match self {
            Pending::Call(reply) => {
                let _ = reply.send(Err(err));
            }
            Pending::Subscribe(reply) => {
                let _ = reply.send(Err(err));
            }
            Pending::Unsubscribe => {}
        }
    }
}

/// WebSocket client for a node's JSON-RPC endpoint.
pub struct WsChainClient {
    endpoint: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl WsChainClient {
    /// Opens the socket and starts the connection task.
    pub async fn connect(endpoint: &Url) -> Result<Self, ClientError> {
        info!("Connecting to WebSocket: {}", endpoint);

        let (socket, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket connected: {}", endpoint);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(ConnectionTask::new(socket).run(cmd_rx));

        Ok(Self {
            endpoint: endpoint.to_string(),
            cmd_tx,
        })
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Call {
                method,
                params,
                reply,
            })
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }
}

impl Drop for WsChainClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

#[async_trait]
impl ChainClient for WsChainClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn subscribe_headers(&self) -> Result<HeaderStream, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SubscribeHeaders { reply })
            .map_err(|_| ClientError::Closed)?;
        let headers = rx.await.map_err(|_| ClientError::Closed)??;

        Ok(Box::pin(futures_util::stream::unfold(
            headers,
            |mut headers| async move { headers.recv().await.map(|item| (item, headers)) },
        )))
    }

    async fn balance_at(
        &self,
        address: &Address,
        height: &BigUint,
    ) -> Result<BigUint, ClientError> {
        let result = self
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
        let _ = self.cmd_tx.send(Command::Close);
    }
}

impl std::fmt::Debug for WsChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsChainClient")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.cmd_tx.is_closed())
            .finish()
    }
}

/// Owns the socket for the lifetime of the connection.
struct ConnectionTask {
    sink: SplitSink<Socket, Message>,
    stream: SplitStream<Socket>,
    next_id: u64,
    pending: HashMap<u64, Pending>,
    subscriptions: HashMap<String, mpsc::UnboundedSender<HeaderItem>>,
}

impl ConnectionTask {
    fn new(socket: Socket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink,
            stream,
            next_id: 1,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let failure = loop {
            tokio::select! {
                // Requests from client handles
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Command::Close) => {
                        let _ = self.sink.send(Message::Close(None)).await;
                        break None;
                    }
                    Some(Command::Call { method, params, reply }) => {
                        if let Err(e) = self.send_request(method, params, Pending::Call(reply)).await {
                            break Some(e);
                        }
                    }
                    Some(Command::SubscribeHeaders { reply }) => {
                        let pending = Pending::Subscribe(reply);
                        if let Err(e) = self.send_request("eth_subscribe", json!(["newHeads"]), pending).await {
                            break Some(e);
                        }
                    }
                },

                // Frames from the node
                msg = self.stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.handle_text(&text).await {
                            break Some(e);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = self.sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "Unknown".to_string());
                        info!("WebSocket closed by server: {}", reason);
                        break Some(ClientError::SubscriptionClosed(reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break Some(ClientError::Transport(e.to_string()));
                    }
                    None => break Some(ClientError::SubscriptionClosed("Stream ended".to_string())),
                },
            }
        };

        // Nobody waits forever on a dead socket
        let err = failure.unwrap_or(ClientError::Closed);
        for (_, pending) in self.pending.drain() {
            pending.fail(err.clone());
        }
        for (_, subscriber) in self.subscriptions.drain() {
            let _ = subscriber.send(Err(err.clone()));
        }
        debug!("WebSocket connection task stopped");
    }

    async fn send_request(
        &mut self,
        method: &str,
        params: Value,
        pending: Pending,
    ) -> Result<(), ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let text = match serde_json::to_string(&JsonRpcRequest::new(id, method, params)) {
            Ok(text) => text,
            Err(e) => {
                pending.fail(ClientError::Decode(e.to_string()));
                return Ok(());
            }
        };

        debug!("Sending {} (id {})", method, id);
        self.pending.insert(id, pending);
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn handle_text(&mut self, text: &str) -> Result<(), ClientError> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!("Non-JSON message received: {} ({})", text, e);
                return Ok(());
            }
        };

        if value.get("method").and_then(Value::as_str) == Some("eth_subscription") {
            return self.handle_notification(value).await;
        }

        let response: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(e) => {
                debug!("Unrecognized message: {}", e);
                return Ok(());
            }
        };
        // Everything else is a reply to one of our requests
        let Some(pending) = response.id.and_then(|id| self.pending.remove(&id)) else {
            debug!("Response for unknown request id {:?}", response.id);
            return Ok(());
        };

        match pending {
            Pending::Call(reply) => {
                let _ = reply.send(response.into_result());
            }
            Pending::Subscribe(reply) => {
                let subscribed = response.into_result().and_then(|result| {
                    result.as_str().map(str::to_string).ok_or_else(|| {
                        ClientError::SubscriptionFailed(format!("unexpected subscription id: {result}"))
                    })
                });
                match subscribed {
                    Ok(subscription_id) => {
                        info!("Subscribed to new headers (ID: {})", subscription_id);
                        let (tx, rx) = mpsc::unbounded_channel();
                        self.subscriptions.insert(subscription_id, tx);
                        let _ = reply.send(Ok(rx));
                    }
                    Err(e) => {
                        warn!("Header subscription rejected: {}", e);
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Pending::Unsubscribe => {}
        }

        Ok(())
    }

    async fn handle_notification(&mut self, value: Value) -> Result<(), ClientError> {
        let notification: SubscriptionNotification = match serde_json::from_value(value) {
            Ok(n) => n,
            Err(e) => {
                warn!("Malformed subscription notification: {}", e);
                return Ok(());
            }
        };
        let subscription_id = notification.params.subscription;

        let header: RawHeader = match serde_json::from_value(notification.params.result) {
            Ok(header) => header,
            Err(e) => {
                warn!("Undecodable header on subscription {}: {}", subscription_id, e);
                return Ok(());
            }
        };

        let delivered = match self.subscriptions.get(&subscription_id) {
            Some(subscriber) => subscriber.send(Ok(header)).is_ok(),
            None => {
                debug!("Notification for unknown subscription {}", subscription_id);
                return Ok(());
            }
        };

        if !delivered {
            // Subscriber dropped its stream: release the subscription on the node.
            self.subscriptions.remove(&subscription_id);
            debug!("Unsubscribing {}", subscription_id);
            self.send_request(
                "eth_unsubscribe",
                json!([subscription_id]),
                Pending::Unsubscribe,
            )
            .await?;
        }

        Ok(())
    }
}
