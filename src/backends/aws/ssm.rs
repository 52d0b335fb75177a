//! AWS SSM Parameter Store backend.
//!
//! Locations are parameter names. A leading `/` is added when missing, so
//! `ssm://app/db` and `ssm:///app/db` read the same parameter. Mapping
//! fetches list the subtree with `GetParametersByPath` and hand the flat
//! entries to the assembler.

use super::session::{self, AwsSession};
use crate::provider::{FlatEntry, MappingResult, Provider};
use crate::registry::{BackendSpec, ProviderRegistry};
use crate::{ProviderConfig, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Options read by the `ssm` backend.
pub const OPTIONS: &[&str] = &[
    "region",
    "profile",
    "role_arn",
    "endpoint",
    "recursive",
    "decrypt",
];

/// Client operations the SSM adapter needs.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Reads one parameter value.
    async fn get_parameter(&self, name: &str, decrypt: bool) -> Result<String>;

    /// Lists every parameter below `path`, following pagination.
    async fn get_parameters_by_path(
        &self,
        path: &str,
        recursive: bool,
        decrypt: bool,
    ) -> Result<Vec<FlatEntry>>;
}

fn normalize(config: &mut ProviderConfig) -> Result<()> {
    session::normalize(config)?;
    config.set_default("recursive", "false");
    config.set_default("decrypt", "true");
    config.require_flag("recursive")?;
    config.require_flag("decrypt")
}

/// Parameter name for a location: always rooted at `/`.
fn parameter_name(location: &str) -> String {
    format!("/{}", location.trim_start_matches('/'))
}

/// SSM Parameter Store provider.
pub struct SsmProvider {
    session: AwsSession,
    recursive: bool,
    decrypt: bool,
    client: OnceCell<Arc<dyn ParameterStore>>,
}

impl SsmProvider {
    /// Creates a provider from a normalized configuration. No client is
    /// created until the first fetch.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            session: AwsSession::from_config(config),
            recursive: config.flag("recursive"),
            decrypt: config.string_or("decrypt", "true") == "true",
            client: OnceCell::new(),
        }
    }

    /// Creates a provider with a ready client.
    pub fn with_client(config: &ProviderConfig, client: Arc<dyn ParameterStore>) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
            ..Self::new(config)
        }
    }

    pub fn session(&self) -> &AwsSession {
        &self.session
    }

    async fn client(&self) -> Result<&Arc<dyn ParameterStore>> {
        self.client.get_or_try_init(|| connect(&self.session)).await
    }
}

#[cfg(feature = "aws")]
async fn connect(session: &AwsSession) -> Result<Arc<dyn ParameterStore>> {
    debug!(region = session.region(), "creating SSM client");
    let config = session.load().await;
    Ok(Arc::new(SdkParameterStore {
        client: aws_sdk_ssm::Client::new(&config),
    }))
}

#[cfg(not(feature = "aws"))]
async fn connect(_session: &AwsSession) -> Result<Arc<dyn ParameterStore>> {
    Err(super::feature_disabled("ssm"))
}

#[async_trait]
impl Provider for SsmProvider {
    fn name(&self) -> &str {
        "ssm"
    }

    async fn fetch_scalar(&self, location: &str) -> Result<String> {
        let name = parameter_name(location);
        let client = self.client().await?;
        let value = client.get_parameter(&name, self.decrypt).await?;
        debug!(parameter = %name, "read parameter");
        Ok(value)
    }

    async fn fetch_mapping(&self, location: &str) -> Result<MappingResult> {
        let path = parameter_name(location);
        let client = self.client().await?;
        let entries = client
            .get_parameters_by_path(&path, self.recursive, self.decrypt)
            .await?;
        debug!(path = %path, entries = entries.len(), recursive = self.recursive, "listed parameters");
        Ok(MappingResult::Entries(entries))
    }
}

#[cfg(feature = "aws")]
struct SdkParameterStore {
    client: aws_sdk_ssm::Client,
}

#[cfg(feature = "aws")]
#[async_trait]
impl ParameterStore for SdkParameterStore {
    async fn get_parameter(&self, name: &str, decrypt: bool) -> Result<String> {
        let response = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(decrypt)
            .send()
            .await
            .map_err(|e| super::sdk_error(e, name))?;

        response
            .parameter()
            .and_then(|p| p.value())
            .map(str::to_string)
            .ok_or_else(|| crate::SecretRefError::NotFound(name.to_string()))
    }

    async fn get_parameters_by_path(
        &self,
        path: &str,
        recursive: bool,
        decrypt: bool,
    ) -> Result<Vec<FlatEntry>> {
        let mut entries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get_parameters_by_path()
                .path(path)
                .recursive(recursive)
                .with_decryption(decrypt);

            if let Some(token) = next_token {
                request = request.next_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| super::sdk_error(e, path))?;

            for parameter in response.parameters() {
                if let (Some(name), Some(value)) = (parameter.name(), parameter.value()) {
                    entries.push(FlatEntry::new(name, value));
                }
            }

            // Check for more results
            next_token = response.next_token().map(|s| s.to_string());
            if next_token.is_none() {
                break;
            }
        }

        Ok(entries)
    }
}

/// Registers the `ssm` backend.
pub fn register(registry: &ProviderRegistry) {
    registry.register(
        BackendSpec::new("ssm", |cfg| Ok(Arc::new(SsmProvider::new(cfg)) as Arc<dyn Provider>))
            .with_options(OPTIONS)
            .with_normalizer(normalize),
    );
}
