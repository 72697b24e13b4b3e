//! Watcher subsystems for one chain session.
//!
//! Each watcher runs as its own task, talks to the supervisor only through
//! channels, and stops as soon as the session is cancelled.

mod balance_poller;
mod header_watcher;

pub use balance_poller::BalancePoller;
pub use header_watcher::HeaderWatcher;
