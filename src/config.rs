//! Configuration types for provider construction.

use crate::{Result, SecretRefError};
use std::collections::BTreeMap;

/// Resolved configuration handed to a provider constructor.
///
/// A read-only view of string options keyed by name. The options are kept
/// sorted, so two configs with the same backend and options compare and hash
/// equal no matter what order the reference listed them in; the registry
/// uses this equality as the cache fingerprint.
///
/// ```
/// use secretref::ProviderConfig;
///
/// let config = ProviderConfig::new("ssm")
///     .with_option("region", "us-west-2")
///     .with_option("recursive", "true");
///
/// assert_eq!(config.string("region"), Some("us-west-2"));
/// assert_eq!(config.string_or("profile", "default"), "default");
/// assert!(config.flag("recursive"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderConfig {
    /// Backend tag
    pub backend: String,

    /// Backend-specific options
    pub options: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Creates an empty configuration for the specified backend.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            options: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) an option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Sets an option only when it is not present yet.
    pub fn set_default(&mut self, key: &str, value: impl Into<String>) {
        self.options
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }

    /// Gets an option value. Absence is not an error at this layer.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Gets an option value, falling back to `default`.
    pub fn string_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.string(key).unwrap_or(default)
    }

    /// True when the option is exactly `"true"`.
    pub fn flag(&self, key: &str) -> bool {
        self.string(key) == Some("true")
    }

    /// Checks that a boolean option, when present, is `"true"` or `"false"`.
    ///
    /// # Errors
    ///
    /// Returns [`SecretRefError::InvalidConfig`] for any other value.
    pub fn require_flag(&self, key: &str) -> Result<()> {
        match self.string(key) {
            None | Some("true") | Some("false") => Ok(()),
            Some(other) => Err(SecretRefError::invalid_config(
                self.backend.clone(),
                format!("{key} must be \"true\" or \"false\", got {other:?}"),
            )),
        }
    }
}

/// Ambient options shared by every provider.
///
/// Shared options apply only to backends that declare the key, and an
/// explicit reference parameter always overrides them.
///
/// ```
/// use secretref::SharedConfig;
///
/// let shared = SharedConfig::new()
///     .with_option("region", "eu-central-1")
///     .with_option("profile", "ops");
///
/// assert_eq!(shared.get_option("region"), Some("eu-central-1"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedConfig {
    options: BTreeMap<String, String>,
}

/// Environment variables read by [`SharedConfig::from_env`], in precedence
/// order per option.
const ENV_OPTIONS: &[(&str, &[&str])] = &[
    ("region", &["AWS_REGION", "AWS_DEFAULT_REGION"]),
    ("profile", &["AWS_PROFILE"]),
    ("role_arn", &["SECRETREF_AWS_ROLE_ARN"]),
    ("endpoint", &["SECRETREF_AWS_ENDPOINT"]),
];

impl SharedConfig {
    /// Creates an empty shared configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads shared options from the process environment.
    ///
    /// - `region`: `AWS_REGION`, then `AWS_DEFAULT_REGION`
    /// - `profile`: `AWS_PROFILE`
    /// - `role_arn`: `SECRETREF_AWS_ROLE_ARN`
    /// - `endpoint`: `SECRETREF_AWS_ENDPOINT` (LocalStack and similar)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut shared = Self::new();
        for (key, vars) in ENV_OPTIONS {
            if let Some(value) = vars
                .iter()
                .filter_map(|var| lookup(var))
                .find(|value| !value.is_empty())
            {
                shared.options.insert((*key).to_string(), value);
            }
        }
        shared
    }

    /// Adds a shared option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Gets a shared option value.
    pub fn get_option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashMap;
    use std::hash::{Hash, Hasher};

    fn hash_of(config: &ProviderConfig) -> u64 {
        let mut hasher = DefaultHasher::new();
        config.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_config_builder() {
        let config = ProviderConfig::new("awssecrets")
            .with_option("region", "us-west-2")
            .with_option("version_stage", "AWSCURRENT");

        assert_eq!(config.backend, "awssecrets");
        assert_eq!(config.string("region"), Some("us-west-2"));
        assert_eq!(config.string("missing"), None);
        assert!(!config.flag("version_stage"));
    }

    #[test]
    fn test_option_order_does_not_affect_identity() {
        let a = ProviderConfig::new("ssm")
            .with_option("region", "us-east-1")
            .with_option("recursive", "true");
        let b = ProviderConfig::new("ssm")
            .with_option("recursive", "true")
            .with_option("region", "us-east-1");

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_set_default_keeps_explicit_value() {
        let mut config = ProviderConfig::new("ssm").with_option("region", "eu-west-1");
        config.set_default("region", "us-east-1");
        config.set_default("recursive", "false");

        assert_eq!(config.string("region"), Some("eu-west-1"));
        assert_eq!(config.string("recursive"), Some("false"));
    }

    #[test]
    fn test_shared_config_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("AWS_REGION", ""),
            ("AWS_DEFAULT_REGION", "ap-south-1"),
            ("AWS_PROFILE", "ops"),
        ]
        .into_iter()
        .collect();

        let shared = SharedConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(shared.get_option("region"), Some("ap-south-1"));
        assert_eq!(shared.get_option("profile"), Some("ops"));
        assert_eq!(shared.get_option("role_arn"), None);
    }

    #[test]
    fn test_require_flag() {
        let config = ProviderConfig::new("ssm")
            .with_option("recursive", "true")
            .with_option("decrypt", "yes");

        assert!(config.require_flag("recursive").is_ok());
        assert!(config.require_flag("missing").is_ok());
        let err = config.require_flag("decrypt").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidConfig);
    }
}
