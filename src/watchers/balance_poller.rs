//! Balance poller: queries the watched address once per observed height.
//!
//! The last known balance starts at zero and is owned by the poller alone.
//! It is updated after every successful query; a sample is emitted only
//! when the new balance is strictly greater. Failed queries are logged and
//! skipped, never escalated.

use num_bigint::BigUint;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connectors::ChainClient;
use crate::events::{Address, BalanceSample};

/// Polls the balance of one address, driven by incoming block heights.
pub struct BalancePoller {
    client: Arc<dyn ChainClient>,
    address: Address,
    last_known: BigUint,
    failed_queries: u64,
}

impl BalancePoller {
    pub fn new(client: Arc<dyn ChainClient>, address: Address) -> Self {
        Self {
            client,
            address,
            last_known: BigUint::default(),
            failed_queries: 0,
        }
    }

    /// Returns the address being watched.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns the most recently observed balance.
    pub fn last_known(&self) -> &BigUint {
        &self.last_known
    }

    /// Records a successful observation.
    ///
    /// Returns a sample only if `balance` is strictly greater than the
    /// previous observation. The last known value is updated either way.
    pub fn observe(&mut self, height: BigUint, balance: BigUint) -> Option<BalanceSample> {
        let increased = balance > self.last_known;
        self.last_known = balance;

        increased.then(|| BalanceSample {
            height,
            balance: self.last_known.clone(),
        })
    }

    /// Runs until cancelled or until the height channel closes.
    ///
    /// Heights are processed one at a time in arrival order. Both waiting
    /// for a height and an in-flight query are abandoned on cancellation.
    pub async fn run(
        mut self,
        mut heights: mpsc::Receiver<BigUint>,
        samples: mpsc::UnboundedSender<BalanceSample>,
        cancel: CancellationToken,
    ) {
        info!("BalancePoller watching {}", self.address);

        loop {
            let height = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = heights.recv() => match next {
                    Some(height) => height,
                    None => break,
                },
            };

            let queried = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                queried = self.client.balance_at(&self.address, &height) => queried,
            };

            let balance = match queried {
                Ok(balance) => balance,
                Err(e) => {
                    self.failed_queries += 1;
                    warn!(
                        "Balance query for {} at height {} failed: {}",
                        self.address, height, e
                    );
                    continue;
                }
            };

            debug!("Balance of {} at height {}: {}", self.address, height, balance);

            if let Some(sample) = self.observe(height, balance) {
                info!(
                    "Balance of {} increased to {} at height {}",
                    self.address, sample.balance, sample.height
                );
                if samples.send(sample).is_err() {
                    debug!("Sample receiver dropped, stopping");
                    break;
                }
            }
        }

        info!(
            "BalancePoller stopped ({} failed queries)",
            self.failed_queries
        );
    }
}

impl std::fmt::Debug for BalancePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancePoller")
            .field("address", &self.address)
            .field("last_known", &self.last_known)
            .field("failed_queries", &self.failed_queries)
            .finish()
    }
}
