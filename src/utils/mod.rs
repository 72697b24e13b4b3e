//! Shared helpers: logging setup and the JSON-RPC quantity codec.

pub mod quantity;
mod telemetry;

pub use quantity::{format_quantity, parse_quantity, QuantityError};
pub use telemetry::{init_from_env, init_telemetry, init_telemetry_json};
