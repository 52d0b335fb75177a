//! Resolution façade: reference string in, value out.

use crate::assembler::assemble;
use crate::provider::{MappingResult, NestedMapping};
use crate::registry::ProviderRegistry;
use crate::{Reference, Result, SecretRefError};
use std::sync::Arc;
use tracing::debug;

/// Resolves references against a [`ProviderRegistry`].
///
/// Cloning is cheap; clones share the registry and therefore the provider
/// instances and their document caches.
///
/// # Example
///
/// ```
/// use secretref::backends::mock::MockProvider;
/// use secretref::registry::BackendSpec;
/// use secretref::{Provider, ProviderRegistry, Resolver, SharedConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> secretref::Result<()> {
///     let store = Arc::new(MockProvider::new());
///     store.set("/app/db/user", "admin").await;
///     store.set("/app/db/password", "hunter2").await;
///
///     let registry = ProviderRegistry::new(SharedConfig::new());
///     let shared = Arc::clone(&store);
///     registry.register(BackendSpec::new("memory", move |_cfg| {
///         Ok(Arc::clone(&shared) as Arc<dyn Provider>)
///     }));
///
///     let resolver = Resolver::new(Arc::new(registry));
///     assert_eq!(resolver.resolve_scalar("memory:///app/db/user").await?, "admin");
///
///     let db = resolver.resolve_mapping("memory:///app/db").await?;
///     assert_eq!(db["password"], "hunter2");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<ProviderRegistry>,
}

impl Resolver {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Resolves a reference string to its raw value.
    ///
    /// # Errors
    ///
    /// Parse and configuration errors are returned unchanged. Errors from the
    /// backend call are wrapped in
    /// [`SecretRefError::BackendOperation`]; use
    /// [`SecretRefError::kind`] to inspect the original kind.
    pub async fn resolve_scalar(&self, uri: &str) -> Result<String> {
        let reference = Reference::parse(uri)?;
        self.scalar(&reference).await
    }

    /// Resolves a reference string to a nested mapping.
    ///
    /// Flat listings are assembled under the reference location.
    pub async fn resolve_mapping(&self, uri: &str) -> Result<NestedMapping> {
        let reference = Reference::parse(uri)?;
        self.mapping(&reference).await
    }

    /// Resolves several references one after another. Each entry succeeds
    /// or fails on its own.
    pub async fn resolve_scalars(&self, uris: &[&str]) -> Vec<Result<String>> {
        let mut results = Vec::with_capacity(uris.len());
        for uri in uris {
            results.push(self.resolve_scalar(uri).await);
        }
        results
    }

    /// Resolves a parsed reference to its raw value.
    pub async fn scalar(&self, reference: &Reference) -> Result<String> {
        let (provider, target) = self.provider_for(reference)?;

        let value = provider.fetch_scalar(&target).await.map_err(|e| {
            SecretRefError::backend_op(reference.backend(), "fetch_scalar", &target, e)
        })?;

        debug!(backend = reference.backend(), location = %target, "resolved scalar");
        Ok(value)
    }

    /// Resolves a parsed reference to a nested mapping.
    pub async fn mapping(&self, reference: &Reference) -> Result<NestedMapping> {
        let (provider, target) = self.provider_for(reference)?;

        let result = provider.fetch_mapping(&target).await.map_err(|e| {
            SecretRefError::backend_op(reference.backend(), "fetch_mapping", &target, e)
        })?;

        let mapping = match result {
            MappingResult::Document(document) => document,
            MappingResult::Entries(entries) => assemble(reference.location(), &entries)?,
        };

        debug!(
            backend = reference.backend(),
            location = %target,
            keys = mapping.len(),
            "resolved mapping"
        );
        Ok(mapping)
    }

    fn provider_for(
        &self,
        reference: &Reference,
    ) -> Result<(Arc<dyn crate::Provider>, String)> {
        let spec = self.registry.spec(reference.backend())?;
        let config = self.registry.config_for(reference)?;
        let provider = self.registry.resolve(&config)?;
        Ok((provider, spec.target(reference)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockProvider;
    use crate::registry::BackendSpec;
    use crate::{ErrorKind, Provider, SharedConfig};
    use serde_json::{json, Value};

    async fn resolver_with(store: Arc<MockProvider>) -> Resolver {
        let registry = ProviderRegistry::new(SharedConfig::new());
        registry.register(
            BackendSpec::new("mem", move |_cfg| Ok(Arc::clone(&store) as Arc<dyn Provider>))
                .with_options(&["region"]),
        );
        Resolver::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_resolve_scalar() {
        let store = Arc::new(MockProvider::new());
        store.set("a/b", "value").await;
        let resolver = resolver_with(store).await;

        assert_eq!(resolver.resolve_scalar("mem://a/b").await.unwrap(), "value");
        assert_eq!(resolver.resolve_scalar("ref+mem://a/b?region=x").await.unwrap(), "value");
    }

    #[tokio::test]
    async fn test_missing_value_is_an_error_not_empty() {
        let resolver = resolver_with(Arc::new(MockProvider::new())).await;
        let err = resolver.resolve_scalar("mem://nope").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(err, SecretRefError::BackendOperation { .. }));
        assert!(err.to_string().contains("mem"));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_parse_errors_are_not_wrapped() {
        let resolver = resolver_with(Arc::new(MockProvider::new())).await;
        let err = resolver.resolve_scalar("mem:/broken").await.unwrap_err();
        assert!(matches!(err, SecretRefError::MalformedReference { .. }));

        let err = resolver.resolve_scalar("vault://x").await.unwrap_err();
        assert!(matches!(err, SecretRefError::UnknownBackend(_)));
    }

    #[tokio::test]
    async fn test_resolve_mapping_assembles_entries() {
        let store = Arc::new(MockProvider::new());
        for (k, v) in [
            ("/foo/bar", "BAR"),
            ("/foo/bar/a", "A"),
            ("/foo/bar/b", "B"),
            ("/foo/baz", "BAZ"),
        ] {
            store.set(k, v).await;
        }
        let resolver = resolver_with(store).await;

        let mapping = resolver.resolve_mapping("mem:///foo").await.unwrap();
        assert_eq!(
            Value::Object(mapping),
            json!({"bar": {"a": "A", "b": "B"}, "baz": "BAZ"})
        );
    }

    #[tokio::test]
    async fn test_resolve_mapping_passes_documents_through() {
        let store = Arc::new(MockProvider::new());
        store.set("creds", "{user: admin, port: 5432}").await;
        let resolver = resolver_with(store).await;

        let mapping = resolver.resolve_mapping("mem://creds").await.unwrap();
        assert_eq!(Value::Object(mapping), json!({"user": "admin", "port": 5432}));
    }

    #[tokio::test]
    async fn test_batch_failures_are_independent() {
        let store = Arc::new(MockProvider::new());
        store.set("one", "1").await;
        store.set("two", "2").await;
        let resolver = resolver_with(store).await;

        let results = resolver
            .resolve_scalars(&["mem://one", "mem://missing", "bogus", "mem://two"])
            .await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_deref().unwrap(), "1");
        assert!(results[1].as_ref().unwrap_err().is_not_found());
        assert_eq!(
            results[2].as_ref().unwrap_err().kind(),
            ErrorKind::MalformedReference
        );
        assert_eq!(results[3].as_deref().unwrap(), "2");
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_values_are_not_logged() {
        let store = Arc::new(MockProvider::new());
        store.set("token", "s3cr3t-value").await;
        let resolver = resolver_with(store).await;

        resolver.resolve_scalar("mem://token").await.unwrap();

        assert!(logs_contain("resolved scalar"));
        assert!(!logs_contain("s3cr3t-value"));
    }
}
