//! Provider trait definition for backend integrations.
//!
//! This module defines the [`Provider`] trait every backend adapter must
//! satisfy: a scalar fetch and a mapping fetch. Mapping fetches declare their
//! shape through [`MappingResult`], so callers never have to guess whether a
//! result still needs hierarchical assembly.

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A nested mapping: string keys to scalars or further mappings.
///
/// Keys keep insertion order.
pub type NestedMapping = serde_json::Map<String, Value>;

/// One `(path, value)` pair returned by a hierarchical listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    /// Absolute path of the entry, e.g. `/app/prod/db/password`
    pub path: String,
    /// Raw value stored at the path
    pub value: String,
}

impl FlatEntry {
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Shape of a mapping fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingResult {
    /// Already structured by the adapter (e.g. a decoded YAML payload).
    Document(NestedMapping),
    /// Flat path-prefixed entries that still need assembly under the
    /// requested location.
    Entries(Vec<FlatEntry>),
}

/// Provider represents one configured backend adapter.
///
/// All implementations must be `Send + Sync`; a single instance is shared by
/// every reference with the same backend and effective configuration.
///
/// # Implementations
///
/// - **Hierarchical**: SSM Parameter Store (flat entries)
/// - **Document**: AWS Secrets Manager, AWS KMS, HTTP JSON
/// - **Testing**: Mock provider with error injection
///
/// # Laziness
///
/// Constructing a provider must not perform network I/O. Network clients
/// are created on the first call to either fetch method and reused for the
/// lifetime of the provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the backend tag (e.g. "ssm", "awssecrets").
    fn name(&self) -> &str;

    /// Returns the single raw value at `location`.
    ///
    /// # Errors
    ///
    /// - [`SecretRefError::NotFound`](crate::SecretRefError::NotFound):
    ///   location does not exist
    /// - [`SecretRefError::AccessDenied`](crate::SecretRefError::AccessDenied):
    ///   the backend refused the request
    /// - [`SecretRefError::BackendUnavailable`](crate::SecretRefError::BackendUnavailable):
    ///   transport or connectivity failure
    async fn fetch_scalar(&self, location: &str) -> Result<String>;

    /// Returns the mapping rooted at `location`.
    ///
    /// Repeated calls with the same location return the same result whether
    /// or not the adapter answered from an internal cache.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_scalar`](Self::fetch_scalar), plus decode errors for
    /// payloads that are not mappings.
    async fn fetch_mapping(&self, location: &str) -> Result<MappingResult>;
}

/// Decodes a YAML (or JSON) payload into a mapping.
///
/// # Errors
///
/// Returns [`SecretRefError::Yaml`](crate::SecretRefError::Yaml) when the
/// payload is not valid YAML or its top level is not a mapping.
///
/// ```
/// use secretref::provider::decode_mapping;
///
/// let m = decode_mapping("user: admin\nport: 5432\n").unwrap();
/// assert_eq!(m["user"], "admin");
/// assert!(decode_mapping("just a string").is_err());
/// ```
pub fn decode_mapping(text: &str) -> Result<NestedMapping> {
    Ok(serde_yaml::from_str(text)?)
}
