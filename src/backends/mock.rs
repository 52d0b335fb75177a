//! Mock provider for testing.
//!
//! This provider keeps every value in memory and supports error injection,
//! so code that resolves references can be tested without any backend.

use crate::provider::{decode_mapping, FlatEntry, MappingResult, Provider};
use crate::{ErrorKind, Result, SecretRefError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

/// In-memory provider.
///
/// Locations are plain keys. A mapping fetch returns every key below the
/// location as flat entries, or decodes the value stored at the location
/// itself when nothing lives below it.
///
/// The default registry has no `mock` tag: a fresh store per configuration
/// could never be filled. Register a shared instance under a tag of your
/// own instead, e.g. `BackendSpec::new("mem", move |_| Ok(store.clone()))`.
///
/// # Example
///
/// ```
/// use secretref::backends::mock::MockProvider;
/// use secretref::{ErrorKind, Provider};
///
/// #[tokio::main]
/// async fn main() -> secretref::Result<()> {
///     let mock = MockProvider::new();
///     mock.set("app/db/password", "hunter2").await;
///
///     assert_eq!(mock.fetch_scalar("app/db/password").await?, "hunter2");
///
///     mock.fail_with(ErrorKind::AccessDenied);
///     assert!(mock.fetch_scalar("app/db/password").await.is_err());
///
///     Ok(())
/// }
/// ```
pub struct MockProvider {
    values: Arc<RwLock<BTreeMap<String, String>>>,
    failure: Mutex<Option<ErrorKind>>,
    scalar_calls: AtomicUsize,
    mapping_calls: AtomicUsize,
}

impl MockProvider {
    /// Creates a mock provider with empty storage.
    pub fn new() -> Self {
        Self {
            values: Arc::new(RwLock::new(BTreeMap::new())),
            failure: Mutex::new(None),
            scalar_calls: AtomicUsize::new(0),
            mapping_calls: AtomicUsize::new(0),
        }
    }

    /// Stores a value. Useful for setting up fixtures.
    pub async fn set(&self, location: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().await;
        values.insert(location.into(), value.into());
    }

    /// Removes a value.
    pub async fn remove(&self, location: &str) -> Option<String> {
        let mut values = self.values.write().await;
        values.remove(location)
    }

    /// Makes every following fetch fail with an error of `kind`.
    pub fn fail_with(&self, kind: ErrorKind) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    /// Clears injected failures.
    pub fn recover(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of `fetch_scalar` calls so far.
    pub fn scalar_calls(&self) -> usize {
        self.scalar_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_mapping` calls so far.
    pub fn mapping_calls(&self) -> usize {
        self.mapping_calls.load(Ordering::SeqCst)
    }

    fn injected(&self, location: &str) -> Result<()> {
        let failure = *self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(kind) = failure else {
            return Ok(());
        };

        let message = format!("injected failure for {location}");
        Err(match kind {
            ErrorKind::NotFound => SecretRefError::NotFound(location.to_string()),
            ErrorKind::AccessDenied => SecretRefError::AccessDenied(message),
            ErrorKind::InvalidConfig => SecretRefError::invalid_config("mock", message),
            ErrorKind::MalformedReference => SecretRefError::malformed(location, message),
            ErrorKind::UnknownBackend => SecretRefError::UnknownBackend(message),
            _ => SecretRefError::BackendUnavailable(message),
        })
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn is_below(key: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    key.strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1)
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_scalar(&self, location: &str) -> Result<String> {
        self.scalar_calls.fetch_add(1, Ordering::SeqCst);
        self.injected(location)?;

        let values = self.values.read().await;
        values
            .get(location)
            .cloned()
            .ok_or_else(|| SecretRefError::NotFound(location.to_string()))
    }

    async fn fetch_mapping(&self, location: &str) -> Result<MappingResult> {
        self.mapping_calls.fetch_add(1, Ordering::SeqCst);
        self.injected(location)?;

        let values = self.values.read().await;
        let entries: Vec<FlatEntry> = values
            .iter()
            .filter(|(key, _)| is_below(key, location))
            .map(|(key, value)| FlatEntry::new(key.as_str(), value.as_str()))
            .collect();

        if !entries.is_empty() {
            return Ok(MappingResult::Entries(entries));
        }

        match values.get(location) {
            Some(text) => Ok(MappingResult::Document(decode_mapping(text)?)),
            None => Err(SecretRefError::NotFound(location.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_set_and_fetch() {
        let mock = MockProvider::new();
        mock.set("key", "value").await;

        assert_eq!(mock.fetch_scalar("key").await.unwrap(), "value");
        assert_eq!(mock.scalar_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_missing_is_not_found() {
        let mock = MockProvider::new();
        let err = mock.fetch_scalar("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_mock_remove() {
        let mock = MockProvider::new();
        mock.set("key", "value").await;
        assert_eq!(mock.remove("key").await.as_deref(), Some("value"));
        assert!(mock.fetch_scalar("key").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_mapping_lists_entries_below_location() {
        let mock = MockProvider::new();
        mock.set("/app/a", "A").await;
        mock.set("/app/b/c", "C").await;
        mock.set("/apple", "no").await;

        let result = mock.fetch_mapping("/app").await.unwrap();
        assert_eq!(
            result,
            MappingResult::Entries(vec![
                FlatEntry::new("/app/a", "A"),
                FlatEntry::new("/app/b/c", "C"),
            ])
        );
        assert_eq!(mock.mapping_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_mapping_decodes_document() {
        let mock = MockProvider::new();
        mock.set("creds", "user: admin\n").await;

        match mock.fetch_mapping("creds").await.unwrap() {
            MappingResult::Document(doc) => {
                assert_eq!(serde_json::Value::Object(doc), json!({"user": "admin"}))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_injection() {
        let mock = MockProvider::new();
        mock.set("key", "value").await;

        mock.fail_with(ErrorKind::BackendUnavailable);
        let err = mock.fetch_scalar("key").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert_eq!(
            mock.fetch_mapping("key").await.unwrap_err().kind(),
            ErrorKind::BackendUnavailable
        );

        mock.recover();
        assert_eq!(mock.fetch_scalar("key").await.unwrap(), "value");
    }
}
