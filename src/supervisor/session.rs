//! The supervising run loop.
//!
//! The supervisor owns the connection. Watchers get a shared handle for
//! their queries but never close it; they report failure through their
//! task result and the supervisor decides to drain.

use futures_util::future::OptionFuture;
use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::connectors::{ChainClient, ClientError, Connector, RpcConnector};
use crate::events::{
    translate_balance, translate_header, Address, BalanceSample, EventRecord, RawHeader,
};
use crate::watchers::{BalancePoller, HeaderWatcher};

use super::{StopReason, SupervisorState, WatcherConfig};

/// Drives one watcher instance from connection to shutdown.
pub struct WatcherSupervisor<C = RpcConnector> {
    config: WatcherConfig,
    connector: C,
    sink: mpsc::UnboundedSender<EventRecord>,
    shutdown: CancellationToken,
    state_tx: watch::Sender<SupervisorState>,
}

impl WatcherSupervisor<RpcConnector> {
    /// Creates a supervisor that picks the transport from the endpoint scheme.
    pub fn new(config: WatcherConfig, sink: mpsc::UnboundedSender<EventRecord>) -> Self {
        let connector = RpcConnector::new(config.http.clone());
        Self::with_connector(config, connector, sink)
    }
}

impl<C: Connector> WatcherSupervisor<C> {
    /// Creates a supervisor with a custom connector.
    pub fn with_connector(
        config: WatcherConfig,
        connector: C,
        sink: mpsc::UnboundedSender<EventRecord>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Idle);
        Self {
            config,
            connector,
            sink,
            shutdown: CancellationToken::new(),
            state_tx,
        }
    }

    /// Token that stops the watcher when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Subscribes to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Runs the watcher to completion and reports why it stopped.
    pub async fn run(self) -> StopReason {
        info!("[{}] WatcherSupervisor starting", self.config.namespace);
        self.set_state(SupervisorState::Connecting);

        // Reject bad input before touching the network
        let validated = match self.config.validate() {
            Ok(validated) => validated,
            Err(e) => {
                error!("[{}] Invalid configuration: {}", self.config.namespace, e);
                return self.stopped(StopReason::InvalidInput(e));
            }
        };

        let client = match self.connect(&validated.endpoint).await {
            Ok(client) => client,
            Err(reason) => return self.stopped(reason),
        };

        info!("[{}] Connected to {}", self.config.namespace, client.endpoint());
        self.set_state(SupervisorState::Running);

        // Watchers run under a child token: a fatal error cancels them
        // without touching the caller's token.
        let mut session = Session::start(
            client,
            validated.address,
            &self.config,
            self.shutdown.child_token(),
        );
        let reason = self.drive(&mut session).await;

        info!("[{}] Draining: {}", self.config.namespace, reason);
        self.set_state(SupervisorState::Draining);
        session.drain(&self.config.namespace, self.config.shutdown_grace).await;

        self.stopped(reason)
    }

    async fn connect(&self, endpoint: &Url) -> Result<Arc<dyn ChainClient>, StopReason> {
        let timeout = self.config.connect_timeout;
        info!("[{}] Connecting to {}", self.config.namespace, endpoint);

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(StopReason::External),
            attempt = tokio::time::timeout(timeout, self.connector.connect(endpoint)) => match attempt {
                Ok(Ok(client)) => Ok(client),
                Ok(Err(e)) => {
                    error!("[{}] Failed to connect: {}", self.config.namespace, e);
                    Err(StopReason::Connection(e))
                }
                Err(_) => {
                    error!("[{}] Connection attempt timed out after {:?}", self.config.namespace, timeout);
                    Err(StopReason::Connection(ClientError::ConnectTimeout(timeout)))
                }
            },
        }
    }

    /// Multiplexes watcher output until a stop condition.
    async fn drive(&self, session: &mut Session) -> StopReason {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("[{}] Stop requested", self.config.namespace);
                    return StopReason::External;
                }

                Some(joined) = OptionFuture::from(session.header_task.as_mut()) => {
                    session.header_task = None;
                    return match joined {
                        Ok(Err(e)) => {
                            error!("[{}] Subscription error: {}", self.config.namespace, e);
                            StopReason::Subscription(e)
                        }
                        Ok(Ok(())) => {
                            error!("[{}] Header watcher stopped unexpectedly", self.config.namespace);
                            StopReason::TaskFailed("header watcher stopped".to_string())
                        }
                        Err(e) => {
                            error!("[{}] Header watcher task failed: {}", self.config.namespace, e);
                            StopReason::TaskFailed(e.to_string())
                        }
                    };
                }

                Some(joined) = OptionFuture::from(session.poller_task.as_mut()) => {
                    session.poller_task = None;
                    let reason = match joined {
                        Ok(()) => "balance poller stopped".to_string(),
                        Err(e) => e.to_string(),
                    };
                    error!("[{}] Balance poller task failed: {}", self.config.namespace, reason);
                    return StopReason::TaskFailed(reason);
                }

                // Hand the last block's height to the poller. While this waits
                // on a full channel no new header is taken, but the task
                // branches above stay live.
                Some(sent) = OptionFuture::from(
                    session
                        .height_tx
                        .as_ref()
                        .zip(session.pending_height.clone())
                        .map(|(tx, height)| tx.send(height)),
                ) => {
                    session.pending_height = None;
                    if sent.is_err() {
                        debug!("[{}] Balance poller no longer accepts heights", self.config.namespace);
                    }
                }

                Some(Some(sample)) = OptionFuture::from(session.sample_rx.as_mut().map(|rx| rx.recv())) => {
                    if let Some(reason) = self.on_sample(session, sample) {
                        return reason;
                    }
                }

                Some(raw) = session.header_rx.recv(), if session.pending_height.is_none() => {
                    if let Some(reason) = self.on_header(session, raw) {
                        return reason;
                    }
                }
            }
        }
    }

    /// Translates and forwards a header, and queues its height for the poller.
    fn on_header(&self, session: &mut Session, raw: RawHeader) -> Option<StopReason> {
        let event = match translate_header(&raw) {
            Ok(event) => event,
            Err(e) => {
                session.translation_errors += 1;
                warn!("[{}] Dropping malformed header: {}", self.config.namespace, e);
                return None;
            }
        };

        if self.sink.send(event.to_record(&self.config.namespace)).is_err() {
            error!("[{}] Event sink closed", self.config.namespace);
            return Some(StopReason::SinkClosed);
        }
        session.blocks_forwarded += 1;

        // The height follows its NewBlock record, never precedes it.
        if session.height_tx.is_some() {
            session.pending_height = event.height().cloned();
        }

        None
    }

    fn on_sample(&self, session: &mut Session, sample: BalanceSample) -> Option<StopReason> {
        let address = session.address?;
        let record = translate_balance(&address, &sample).to_record(&self.config.namespace);

        if self.sink.send(record).is_err() {
            error!("[{}] Event sink closed", self.config.namespace);
            return Some(StopReason::SinkClosed);
        }
        session.balance_events += 1;
        None
    }

    fn set_state(&self, state: SupervisorState) {
        debug!("[{}] State -> {:?}", self.config.namespace, state);
        self.state_tx.send_replace(state);
    }

    fn stopped(&self, reason: StopReason) -> StopReason {
        if reason.is_ok() {
            info!("[{}] WatcherSupervisor stopped", self.config.namespace);
        } else {
            error!("[{}] WatcherSupervisor stopped: {}", self.config.namespace, reason);
        }
        self.set_state(SupervisorState::Stopped(reason.clone()));
        reason
    }
}

impl<C> std::fmt::Debug for WatcherSupervisor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherSupervisor")
            .field("namespace", &self.config.namespace)
            .field("url", &self.config.url)
            .field("state", &*self.state_tx.borrow())
            .finish()
    }
}

/// Runtime state of one connected watcher.
struct Session {
    client: Arc<dyn ChainClient>,
    cancel: CancellationToken,
    address: Option<Address>,
    header_rx: mpsc::Receiver<RawHeader>,
    header_task: Option<JoinHandle<Result<(), ClientError>>>,
    height_tx: Option<mpsc::Sender<BigUint>>,
    /// Height of the last forwarded block, not yet accepted by the poller.
    pending_height: Option<BigUint>,
    sample_rx: Option<mpsc::UnboundedReceiver<BalanceSample>>,
    poller_task: Option<JoinHandle<()>>,
    blocks_forwarded: u64,
    balance_events: u64,
    translation_errors: u64,
}

impl Session {
    /// Spawns the header watcher and, with an address, the balance poller.
    fn start(
        client: Arc<dyn ChainClient>,
        address: Option<Address>,
        config: &WatcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        // Header watcher always runs
        let (header_tx, header_rx) = mpsc::channel(config.header_buffer.max(1));
        let watcher = HeaderWatcher::new(client.clone(), header_tx, cancel.clone());
        let header_task = tokio::spawn(watcher.run());

        // Balance poller only with an address
        let (height_tx, sample_rx, poller_task) = match address {
            Some(address) => {
                let (height_tx, height_rx) = mpsc::channel(config.height_buffer.max(1));
                let (sample_tx, sample_rx) = mpsc::unbounded_channel();
                let poller = BalancePoller::new(client.clone(), address);
                let task = tokio::spawn(poller.run(height_rx, sample_tx, cancel.clone()));
                (Some(height_tx), Some(sample_rx), Some(task))
            }
            None => (None, None, None),
        };

        Self {
            client,
            cancel,
            address,
            header_rx,
            header_task: Some(header_task),
            height_tx,
            pending_height: None,
            sample_rx,
            poller_task,
            blocks_forwarded: 0,
            balance_events: 0,
            translation_errors: 0,
        }
    }

    /// Cancels the sub-tasks, waits up to `grace` for them, then closes the
    /// connection.
    async fn drain(mut self, namespace: &str, grace: Duration) {
        // Stop accepting anything from the watchers
        self.cancel.cancel();
        self.header_rx.close();
        self.height_tx = None;
        self.pending_height = None;

        let header_task = self.header_task.take();
        let poller_task = self.poller_task.take();
        let aborts: Vec<AbortHandle> = header_task
            .iter()
            .map(JoinHandle::abort_handle)
            .chain(poller_task.iter().map(JoinHandle::abort_handle))
            .collect();

        let stopped = async {
            if let Some(task) = header_task {
                let _ = task.await;
            }
            if let Some(task) = poller_task {
                let _ = task.await;
            }
        };

        if tokio::time::timeout(grace, stopped).await.is_err() {
            warn!(
                "[{}] Watchers did not stop within {:?}, aborting",
                namespace, grace
            );
            for abort in aborts {
                abort.abort();
            }
        }

        // Only the supervisor closes the connection
        self.client.close().await;
        info!(
            "[{}] Connection released ({} blocks, {} balance events, {} malformed headers)",
            namespace, self.blocks_forwarded, self.balance_events, self.translation_errors
        );
    }
}
