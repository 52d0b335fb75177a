//! Secretref - resolve secret references into values.
//!
//! A secret reference is a URI naming a backend, a location inside it and
//! optional parameters:
//!
//! ```text
//! ssm://app/prod/db?region=eu-west-1&recursive=true
//! awssecrets://prod/api-key?version_stage=AWSPREVIOUS
//! awskms://AQICAHh...?context={tenant: acme}
//! httpjson://api.example.com/v1/servers#/servers/*[1]/ip
//! ```
//!
//! Secretref parses the reference, picks the backend, constructs the backend
//! provider once per distinct configuration, and fetches either a single
//! value or a nested mapping. Hierarchical stores (SSM Parameter Store) are
//! reassembled from their flat path listing into a tree.
//!
//! # Features
//!
//! - **Lazy**: providers are cheap to build; SDK and HTTP clients are created
//!   on the first fetch
//! - **Shared**: references with the same effective configuration use one
//!   provider instance, even under concurrent resolution
//! - **Async/Await**: built on tokio, nothing is spawned behind your back
//! - **Error Context**: every error keeps its kind, backend failures add the
//!   backend and location
//!
//! # Quick Start
//!
//! ```no_run
//! use secretref::{default_registry, Resolver, SharedConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> secretref::Result<()> {
//!     let registry = default_registry(SharedConfig::from_env());
//!     let resolver = Resolver::new(Arc::new(registry));
//!
//!     let password = resolver.resolve_scalar("ssm://app/prod/db/password").await?;
//!     let settings = resolver
//!         .resolve_mapping("ssm://app/prod?recursive=true")
//!         .await?;
//!
//!     println!("{} settings, password has {} chars", settings.len(), password.len());
//!     Ok(())
//! }
//! ```
//!
//! # Supported Backends
//!
//! | Backend | Tag | Feature Flag | Mapping shape |
//! |---------|-----|--------------|---------------|
//! | AWS SSM Parameter Store | `ssm` | `aws` | flat entries |
//! | AWS Secrets Manager | `awssecrets` | `aws` | document / meta keys |
//! | AWS KMS | `awskms` | `aws` | document |
//! | HTTP JSON | `httpjson` | `httpjson` (default) | document |
//!
//! The `mock` feature adds [`backends::mock::MockProvider`] for tests. It is
//! not part of [`default_registry`]; register a shared instance under your
//! own tag.
//!
//! # Feature Flags
//!
//! ```toml
//! [dependencies]
//! secretref = { version = "0.1", features = ["aws"] }
//! ```
//!
//! Or use `full` to enable all backends.

pub mod assembler;
pub mod backends;
pub mod config;
pub mod error;
pub mod provider;
pub mod query;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod validation;

pub use config::{ProviderConfig, SharedConfig};
pub use error::{ErrorKind, Result, SecretRefError};
pub use provider::{FlatEntry, MappingResult, NestedMapping, Provider};
pub use reference::Reference;
pub use registry::ProviderRegistry;
pub use resolver::Resolver;

/// Creates a registry with every compiled backend registered.
///
/// The registry starts empty of providers; each one is built on the first
/// reference that needs it.
pub fn default_registry(shared: SharedConfig) -> ProviderRegistry {
    let registry = ProviderRegistry::new(shared);
    backends::register_all(&registry);
    registry
}
