//! Header watcher: owns the header subscription for one session.
//!
//! Headers are forwarded in arrival order with no reordering or
//! deduplication; duplicates and reorgs pass through verbatim. A
//! subscription error ends the watcher and is returned to the supervisor,
//! which decides what happens next. No retry happens here.

use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connectors::{ChainClient, ClientError};
use crate::events::RawHeader;

/// Forwards headers from the client's subscription to the supervisor.
pub struct HeaderWatcher {
    client: Arc<dyn ChainClient>,
    header_tx: mpsc::Sender<RawHeader>,
    cancel: CancellationToken,
    forwarded: u64,
}

impl HeaderWatcher {
    /// Creates a header watcher.
    ///
    /// `header_tx` should be bounded. While it is full, headers that keep
    /// arriving are held in order until there is room.
    pub fn new(
        client: Arc<dyn ChainClient>,
        header_tx: mpsc::Sender<RawHeader>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            header_tx,
            cancel,
            forwarded: 0,
        }
    }

    /// Runs until cancelled or until the subscription fails.
    ///
    /// Returns `Ok(())` on cancellation (or when the supervisor stops
    /// listening) and the subscription error otherwise. The subscription is
    /// released on every exit path by dropping the stream.
    pub async fn run(mut self) -> Result<(), ClientError> {
        info!("HeaderWatcher starting on {}", self.client.endpoint());

        let mut headers = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            subscribed = self.client.subscribe_headers() => match subscribed {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Header subscription failed: {}", e);
                    return Err(e);
                }
            },
        };

        // Headers read while the supervisor is backpressured wait here, so
        // a subscription error behind them is still seen right away.
        let mut backlog: VecDeque<RawHeader> = VecDeque::new();

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),

                permit = self.header_tx.reserve(), if !backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(header) = backlog.pop_front() {
                            permit.send(header);
                            self.forwarded += 1;
                        }
                    }
                    Err(_) => {
                        debug!("Header receiver dropped, stopping");
                        break Ok(());
                    }
                },

                next = headers.next() => match next {
                    Some(Ok(header)) => backlog.push_back(header),
                    Some(Err(e)) => {
                        error!(
                            "Header subscription error ({} header(s) not forwarded): {}",
                            backlog.len(),
                            e
                        );
                        break Err(e);
                    }
                    None => {
                        error!("Header subscription ended unexpectedly");
                        break Err(ClientError::SubscriptionClosed("Stream ended".to_string()));
                    }
                },
            }
        };

        drop(headers);
        info!("HeaderWatcher stopped after {} header(s)", self.forwarded);
        result
    }
}

impl std::fmt::Debug for HeaderWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderWatcher")
            .field("endpoint", &self.client.endpoint())
            .field("forwarded", &self.forwarded)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
