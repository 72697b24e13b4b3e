//! Event layer for the chain watcher.
//!
//! Raw header and balance data is translated into typed [`ChainEvent`]s and
//! encoded as [`EventRecord`]s before reaching the host sink. Raw node data
//! never reaches the sink directly.

mod chain_events;
pub mod translator;

pub use chain_events::{
    vocabulary,
    Address,
    BalanceSample,
    ChainEvent,
    EventDescriptor,
    EventField,
    EventRecord,
    FieldDescriptor,
    RawHeader,
    BALANCE_INCREASED,
    NEW_BLOCK,
    NEW_TRANSACTION,
};
pub use translator::{translate_balance, translate_header, TranslationError};
