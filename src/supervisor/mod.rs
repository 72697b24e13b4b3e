//! Supervisor for one watcher instance.
//!
//! Lifecycle: `Idle -> Connecting -> Running -> Draining -> Stopped`.
//! Invalid input and connection failures go straight from `Connecting` to
//! `Stopped`. Every exit path releases the node connection.

mod config;
mod session;

pub use config::{ConfigError, ValidatedConfig, WatcherConfig};
pub use session::WatcherSupervisor;

use thiserror::Error;

use crate::connectors::ClientError;

/// Why a watcher reached `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StopReason {
    #[error("stopped on request")]
    External,

    #[error("invalid input: {0}")]
    InvalidInput(#[from] ConfigError),

    #[error("connection error: {0}")]
    Connection(ClientError),

    #[error("subscription error: {0}")]
    Subscription(ClientError),

    #[error("event sink closed")]
    SinkClosed,

    #[error("watcher task failed: {0}")]
    TaskFailed(String),
}

impl StopReason {
    /// True for an orderly stop requested from outside.
    pub fn is_ok(&self) -> bool {
        matches!(self, StopReason::External)
    }
}

/// Observable lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Running,
    Draining,
    Stopped(StopReason),
}

impl SupervisorState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, SupervisorState::Stopped(_))
    }
}
