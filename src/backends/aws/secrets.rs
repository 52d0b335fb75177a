//! AWS Secrets Manager backend.
//!
//! Scalar fetches return the secret string (or the binary payload as
//! UTF-8). Mapping fetches decode the secret as YAML/JSON; secrets that do
//! not decode are expanded through a `<name>/meta` document listing child
//! secrets.

use super::session::{self, AwsSession};
use crate::assembler::{expand_meta_keys, DEFAULT_META_FIELD};
use crate::provider::{MappingResult, Provider};
use crate::registry::{BackendSpec, ProviderRegistry};
use crate::{ProviderConfig, Result, SecretRefError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Options read by the `awssecrets` backend.
pub const OPTIONS: &[&str] = &[
    "region",
    "profile",
    "role_arn",
    "endpoint",
    "version_stage",
    "version_id",
    "meta_field",
];

/// Which version of a secret to read. Both unset means `AWSCURRENT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretVersion {
    pub stage: Option<String>,
    pub id: Option<String>,
}

/// Client operations the Secrets Manager adapter needs.
#[async_trait]
pub trait SecretsManager: Send + Sync {
    /// Reads a secret value as text.
    async fn get_secret_value(&self, secret_id: &str, version: &SecretVersion) -> Result<String>;
}

fn normalize(config: &mut ProviderConfig) -> Result<()> {
    session::normalize(config)?;
    if config.string("meta_field").is_some_and(str::is_empty) {
        return Err(SecretRefError::invalid_config(
            config.backend.clone(),
            "meta_field must not be empty",
        ));
    }
    Ok(())
}

/// AWS Secrets Manager provider.
pub struct SecretsManagerProvider {
    session: AwsSession,
    version: SecretVersion,
    meta_field: String,
    client: OnceCell<Arc<dyn SecretsManager>>,
}

impl SecretsManagerProvider {
    /// Creates a provider from a normalized configuration. No client is
    /// created until the first fetch.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            session: AwsSession::from_config(config),
            version: SecretVersion {
                stage: config.string("version_stage").map(str::to_string),
                id: config.string("version_id").map(str::to_string),
            },
            meta_field: config
                .string_or("meta_field", DEFAULT_META_FIELD)
                .to_string(),
            client: OnceCell::new(),
        }
    }

    /// Creates a provider with a ready client.
    pub fn with_client(config: &ProviderConfig, client: Arc<dyn SecretsManager>) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
            ..Self::new(config)
        }
    }

    pub fn version(&self) -> &SecretVersion {
        &self.version
    }

    async fn client(&self) -> Result<&Arc<dyn SecretsManager>> {
        self.client.get_or_try_init(|| connect(&self.session)).await
    }
}

#[cfg(feature = "aws")]
async fn connect(session: &AwsSession) -> Result<Arc<dyn SecretsManager>> {
    debug!(region = session.region(), "creating Secrets Manager client");
    let config = session.load().await;
    Ok(Arc::new(SdkSecretsManager {
        client: aws_sdk_secretsmanager::Client::new(&config),
    }))
}

#[cfg(not(feature = "aws"))]
async fn connect(_session: &AwsSession) -> Result<Arc<dyn SecretsManager>> {
    Err(super::feature_disabled("awssecrets"))
}

#[async_trait]
impl Provider for SecretsManagerProvider {
    fn name(&self) -> &str {
        "awssecrets"
    }

    async fn fetch_scalar(&self, location: &str) -> Result<String> {
        let client = self.client().await?;
        let value = client.get_secret_value(location, &self.version).await?;
        debug!(secret = location, "retrieved secret");
        Ok(value)
    }

    async fn fetch_mapping(&self, location: &str) -> Result<MappingResult> {
        let mapping = expand_meta_keys(self, location, &self.meta_field).await?;
        Ok(MappingResult::Document(mapping))
    }
}

#[cfg(feature = "aws")]
struct SdkSecretsManager {
    client: aws_sdk_secretsmanager::Client,
}

#[cfg(feature = "aws")]
#[async_trait]
impl SecretsManager for SdkSecretsManager {
    async fn get_secret_value(&self, secret_id: &str, version: &SecretVersion) -> Result<String> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .set_version_stage(version.stage.clone())
            .set_version_id(version.id.clone())
            .send()
            .await
            .map_err(|e| super::sdk_error(e, secret_id))?;

        if let Some(text) = response.secret_string() {
            return Ok(text.to_string());
        }

        let binary = response.secret_binary().ok_or_else(|| {
            SecretRefError::Other(anyhow::anyhow!(
                "secret {secret_id} has neither a string nor a binary value"
            ))
        })?;

        String::from_utf8(binary.as_ref().to_vec()).map_err(|e| {
            SecretRefError::Other(anyhow::anyhow!(
                "binary secret {secret_id} is not UTF-8: {e}"
            ))
        })
    }
}

/// Registers the `awssecrets` backend.
pub fn register(registry: &ProviderRegistry) {
    registry.register(
        BackendSpec::new("awssecrets", |cfg| {
            Ok(Arc::new(SecretsManagerProvider::new(cfg)) as Arc<dyn Provider>)
        })
        .with_options(OPTIONS)
        .with_normalizer(normalize),
    );
}
