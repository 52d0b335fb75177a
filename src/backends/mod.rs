//! Backend implementations.
//!
//! Every adapter module always compiles. The network clients behind them are
//! gated by the `aws` and `httpjson` features; a backend whose client is not
//! compiled in fails on its first fetch with an `InvalidConfig` error.

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub mod aws;
pub mod httpjson;

use crate::registry::ProviderRegistry;

/// Registers every network backend with `registry`.
pub fn register_all(registry: &ProviderRegistry) {
    aws::register(registry);
    httpjson::register(registry);
}
