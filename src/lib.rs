//! Chain watcher.
//!
//! Watches a blockchain node for new block headers, and optionally for
//! balance increases on one address, and turns what it sees into normalized
//! event records for a host event queue.
//!
//! # Architecture
//!
//! - **Connectors**: [`connectors::ChainClient`] is the only view of the node,
//!   with WebSocket and HTTP bindings behind it
//! - **Watchers**: the header watcher and balance poller each run as their own
//!   task and talk to the supervisor through channels
//! - **Events**: raw node data is translated into typed
//!   [`events::ChainEvent`]s before anything reaches the sink
//! - **Supervisor**: owns the connection and the lifecycle, and stops the
//!   whole session on the first fatal error or an external stop
//!
//! # Usage
//!
//! ```no_run
//! use chain_watcher::supervisor::{WatcherConfig, WatcherSupervisor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (sink, mut records) = tokio::sync::mpsc::unbounded_channel();
//!     let config = WatcherConfig::new("wss://node.example/ws")
//!         .with_address("0x00000000000000000000000000000000deadbeef");
//!
//!     let supervisor = WatcherSupervisor::new(config, sink);
//!     let stop = supervisor.shutdown_token();
//!     let watcher = tokio::spawn(supervisor.run());
//!
//!     while let Some(record) = records.recv().await {
//!         println!("{} {:?}", record.name, record.fields);
//!     }
//!
//!     stop.cancel();
//!     let _ = watcher.await;
//! }
//! ```

pub mod connectors;
pub mod events;
pub mod supervisor;
pub mod utils;
pub mod watchers;

// Re-export commonly used types
pub use connectors::{ChainClient, ClientError, Connector, RpcConnector};
pub use events::{ChainEvent, EventRecord};
pub use supervisor::{StopReason, SupervisorState, WatcherConfig, WatcherSupervisor};
