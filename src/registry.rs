//! Provider registration and instance caching.
//!
//! A [`ProviderRegistry`] maps backend tags to constructors and memoizes the
//! providers it builds. Providers are keyed by their *effective*
//! configuration: shared options and backend defaults are applied and
//! undeclared options are dropped before the lookup. Two references that
//! spell the same configuration differently therefore share one provider.
//!
//! The registry is an ordinary value owned by the application. Tests build
//! a fresh one instead of touching process-global state.

use crate::{Provider, ProviderConfig, Reference, Result, SecretRefError, SharedConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Constructor for a provider. Must not perform network I/O.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Fills backend defaults into a config and validates it.
pub type Normalizer = fn(&mut ProviderConfig) -> Result<()>;

/// How the adapter expects its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSyntax {
    /// Bare path or key. Undeclared parameters and fragments are ignored.
    Path,
    /// Remote address. Undeclared parameters stay in the location as a query
    /// string and the extraction fragment is appended.
    Url,
}

/// Registration of one backend.
#[derive(Clone)]
pub struct BackendSpec {
    tag: String,
    options: &'static [&'static str],
    syntax: LocationSyntax,
    normalize: Normalizer,
    factory: ProviderFactory,
}

fn no_defaults(_: &mut ProviderConfig) -> Result<()> {
    Ok(())
}

impl BackendSpec {
    /// Creates a registration with no declared options.
    ///
    /// # Example
    ///
    /// ```
    /// use secretref::backends::mock::MockProvider;
    /// use secretref::registry::{BackendSpec, ProviderRegistry};
    /// use secretref::SharedConfig;
    /// use std::sync::Arc;
    ///
    /// let registry = ProviderRegistry::new(SharedConfig::new());
    /// registry.register(
    ///     BackendSpec::new("memory", |_cfg| Ok(Arc::new(MockProvider::new())))
    ///         .with_options(&["namespace"]),
    /// );
    ///
    /// assert!(registry.is_registered("memory"));
    /// ```
    pub fn new<F>(tag: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        Self {
            tag: tag.into(),
            options: &[],
            syntax: LocationSyntax::Path,
            normalize: no_defaults,
            factory: Arc::new(factory),
        }
    }

    /// Declares the option keys this backend reads.
    pub fn with_options(mut self, options: &'static [&'static str]) -> Self {
        self.options = options;
        self
    }

    /// Sets the location syntax.
    pub fn with_syntax(mut self, syntax: LocationSyntax) -> Self {
        self.syntax = syntax;
        self
    }

    /// Sets the defaults/validation hook run before the cache lookup.
    pub fn with_normalizer(mut self, normalize: Normalizer) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn syntax(&self) -> LocationSyntax {
        self.syntax
    }

    /// True when `key` is one of the declared options.
    pub fn accepts(&self, key: &str) -> bool {
        self.options.contains(&key)
    }

    /// Location string handed to the adapter for `reference`.
    pub fn target(&self, reference: &Reference) -> String {
        match self.syntax {
            LocationSyntax::Path => reference.location().to_string(),
            LocationSyntax::Url => reference.render_target(|key| !self.accepts(key)),
        }
    }
}

impl fmt::Debug for BackendSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSpec")
            .field("tag", &self.tag)
            .field("options", &self.options)
            .field("syntax", &self.syntax)
            .finish()
    }
}

/// Registry of backend constructors with memoized provider instances.
pub struct ProviderRegistry {
    shared: SharedConfig,
    specs: RwLock<HashMap<String, BackendSpec>>,
    instances: Mutex<HashMap<ProviderConfig, Arc<dyn Provider>>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("backends", &self.registered_backends())
            .field("instances", &self.instance_count())
            .field("shared", &self.shared)
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new(shared: SharedConfig) -> Self {
        Self {
            shared,
            specs: RwLock::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a backend. A later registration for the same tag replaces
    /// the earlier one; already constructed providers are kept.
    pub fn register(&self, spec: BackendSpec) {
        debug!(backend = %spec.tag, "registering backend");
        let mut specs = self.specs.write().unwrap_or_else(PoisonError::into_inner);
        specs.insert(spec.tag.clone(), spec);
    }

    pub fn is_registered(&self, backend: &str) -> bool {
        let specs = self.specs.read().unwrap_or_else(PoisonError::into_inner);
        specs.contains_key(backend)
    }

    /// Registered backend tags, sorted.
    pub fn registered_backends(&self) -> Vec<String> {
        let specs = self.specs.read().unwrap_or_else(PoisonError::into_inner);
        let mut tags: Vec<String> = specs.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Number of providers constructed so far.
    pub fn instance_count(&self) -> usize {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Looks up the registration for a backend tag.
    ///
    /// # Errors
    ///
    /// Returns [`SecretRefError::UnknownBackend`] if the tag is not registered.
    pub fn spec(&self, backend: &str) -> Result<BackendSpec> {
        let specs = self.specs.read().unwrap_or_else(PoisonError::into_inner);
        specs
            .get(backend)
            .cloned()
            .ok_or_else(|| SecretRefError::UnknownBackend(backend.to_string()))
    }

    /// Builds the provider configuration a reference asks for.
    ///
    /// Only declared options are taken from the reference. For path-style
    /// backends other parameters are ignored with a warning; for URL-style
    /// backends they belong to the location.
    pub fn config_for(&self, reference: &Reference) -> Result<ProviderConfig> {
        let spec = self.spec(reference.backend())?;
        let mut config = ProviderConfig::new(reference.backend());

        for (key, value) in reference.parameters() {
            if spec.accepts(key) {
                config.options.insert(key.clone(), value.clone());
            } else if spec.syntax == LocationSyntax::Path {
                warn!(backend = %spec.tag, parameter = %key, "ignoring unknown reference parameter");
            }
        }

        Ok(config)
    }

    /// Applies shared options and backend defaults, and drops undeclared
    /// options. The result is the cache key.
    ///
    /// # Errors
    ///
    /// - [`SecretRefError::UnknownBackend`]: tag not registered
    /// - [`SecretRefError::InvalidConfig`]: the backend rejected an option
    pub fn effective_config(&self, config: &ProviderConfig) -> Result<ProviderConfig> {
        let spec = self.spec(&config.backend)?;
        Self::effective_with(&spec, &self.shared, config)
    }

    fn effective_with(
        spec: &BackendSpec,
        shared: &SharedConfig,
        config: &ProviderConfig,
    ) -> Result<ProviderConfig> {
        let mut effective = ProviderConfig::new(spec.tag.clone());

        for key in spec.options {
            if let Some(value) = config.string(key) {
                effective.options.insert(key.to_string(), value.to_string());
            } else if let Some(value) = shared.get_option(key) {
                effective.options.insert(key.to_string(), value.to_string());
            }
        }

        (spec.normalize)(&mut effective)?;
        Ok(effective)
    }

    /// Returns the provider for a configuration, constructing it on first use.
    ///
    /// Concurrent callers asking for the same effective configuration get the
    /// same instance; the constructor runs once. Failed constructions are not
    /// cached, so a corrected configuration can be retried.
    ///
    /// # Errors
    ///
    /// - [`SecretRefError::UnknownBackend`]: tag not registered
    /// - [`SecretRefError::InvalidConfig`]: normalizer or constructor
    ///   rejected the configuration
    pub fn resolve(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        let spec = self.spec(&config.backend)?;
        let effective = Self::effective_with(&spec, &self.shared, config)?;

        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(provider) = instances.get(&effective) {
            debug!(backend = %effective.backend, "reusing cached provider");
            return Ok(Arc::clone(provider));
        }

        let provider = (spec.factory)(&effective)?;
        info!(
            backend = %effective.backend,
            options = ?effective.options.keys().collect::<Vec<_>>(),
            "constructed provider"
        );
        instances.insert(effective, Arc::clone(&provider));

        Ok(provider)
    }
}
