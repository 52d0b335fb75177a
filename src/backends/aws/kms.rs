//! AWS KMS backend.
//!
//! The location is the ciphertext itself, URL-safe base64 encoded. Scalar
//! fetches decrypt it and return the plaintext; mapping fetches decode the
//! plaintext as YAML/JSON.
//!
//! ```text
//! awskms://AQICAHh...?key=alias/app&context={tenant: acme}
//! ```

use super::session::{self, AwsSession};
use crate::provider::{decode_mapping, MappingResult, Provider};
use crate::registry::{BackendSpec, ProviderRegistry};
use crate::{ProviderConfig, Result, SecretRefError};
use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Options read by the `awskms` backend.
pub const OPTIONS: &[&str] = &[
    "region",
    "profile",
    "role_arn",
    "endpoint",
    "key",
    "alg",
    "context",
];

/// Parameters of one `Decrypt` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptRequest {
    pub ciphertext: Vec<u8>,
    pub key_id: Option<String>,
    pub algorithm: Option<String>,
    pub context: BTreeMap<String, String>,
}

/// Client operations the KMS adapter needs.
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Decrypts a ciphertext blob and returns the plaintext bytes.
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Vec<u8>>;
}

fn parse_context(config: &ProviderConfig) -> Result<BTreeMap<String, String>> {
    match config.string("context") {
        None | Some("") => Ok(BTreeMap::new()),
        Some(text) => serde_yaml::from_str(text).map_err(|e| {
            SecretRefError::invalid_config(
                config.backend.clone(),
                format!("context must be a mapping of strings: {e}"),
            )
        }),
    }
}

fn normalize(config: &mut ProviderConfig) -> Result<()> {
    session::normalize(config)?;
    parse_context(config).map(|_| ())
}

fn decode_ciphertext(location: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(location)
        .or_else(|_| URL_SAFE_NO_PAD.decode(location))
        .map_err(|e| {
            SecretRefError::malformed(location, format!("ciphertext is not URL-safe base64: {e}"))
        })
}

/// AWS KMS provider.
pub struct KmsProvider {
    session: AwsSession,
    key_id: Option<String>,
    algorithm: Option<String>,
    context: BTreeMap<String, String>,
    client: OnceCell<Arc<dyn KeyManagement>>,
}

impl KmsProvider {
    /// Creates a provider from a normalized configuration. No client is
    /// created until the first fetch.
    ///
    /// # Errors
    ///
    /// Returns [`SecretRefError::InvalidConfig`] if `context` is not a YAML
    /// mapping of strings.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            session: AwsSession::from_config(config),
            key_id: config.string("key").map(str::to_string),
            algorithm: config.string("alg").map(str::to_string),
            context: parse_context(config)?,
            client: OnceCell::new(),
        })
    }

    /// Creates a provider with a ready client.
    pub fn with_client(config: &ProviderConfig, client: Arc<dyn KeyManagement>) -> Result<Self> {
        Ok(Self {
            client: OnceCell::new_with(Some(client)),
            ..Self::new(config)?
        })
    }

    async fn client(&self) -> Result<&Arc<dyn KeyManagement>> {
        self.client.get_or_try_init(|| connect(&self.session)).await
    }
}

#[cfg(feature = "aws")]
async fn connect(session: &AwsSession) -> Result<Arc<dyn KeyManagement>> {
    debug!(region = session.region(), "creating KMS client");
    let config = session.load().await;
    Ok(Arc::new(SdkKeyManagement {
        client: aws_sdk_kms::Client::new(&config),
    }))
}

#[cfg(not(feature = "aws"))]
async fn connect(_session: &AwsSession) -> Result<Arc<dyn KeyManagement>> {
    Err(super::feature_disabled("awskms"))
}

#[async_trait]
impl Provider for KmsProvider {
    fn name(&self) -> &str {
        "awskms"
    }

    async fn fetch_scalar(&self, location: &str) -> Result<String> {
        let request = DecryptRequest {
            ciphertext: decode_ciphertext(location)?,
            key_id: self.key_id.clone(),
            algorithm: self.algorithm.clone(),
            context: self.context.clone(),
        };

        let client = self.client().await?;
        let plaintext = client.decrypt(&request).await?;
        debug!(bytes = plaintext.len(), "decrypted ciphertext");

        String::from_utf8(plaintext).map_err(|e| {
            SecretRefError::Other(anyhow::anyhow!("decrypted plaintext is not UTF-8: {e}"))
        })
    }

    async fn fetch_mapping(&self, location: &str) -> Result<MappingResult> {
        let text = self.fetch_scalar(location).await?;
        Ok(MappingResult::Document(decode_mapping(&text)?))
    }
}

#[cfg(feature = "aws")]
struct SdkKeyManagement {
    client: aws_sdk_kms::Client,
}

#[cfg(feature = "aws")]
#[async_trait]
impl KeyManagement for SdkKeyManagement {
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Vec<u8>> {
        use aws_sdk_kms::primitives::Blob;
        use aws_sdk_kms::types::EncryptionAlgorithmSpec;

        let context = (!request.context.is_empty()).then(|| {
            request
                .context
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });

        let response = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(request.ciphertext.clone()))
            .set_key_id(request.key_id.clone())
            .set_encryption_algorithm(request.algorithm.as_deref().map(EncryptionAlgorithmSpec::from))
            .set_encryption_context(context)
            .send()
            .await
            .map_err(|e| super::sdk_error(e, "ciphertext"))?;

        response
            .plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| SecretRefError::Other(anyhow::anyhow!("KMS returned no plaintext")))
    }
}

/// Registers the `awskms` backend.
pub fn register(registry: &ProviderRegistry) {
    registry.register(
        BackendSpec::new("awskms", |cfg| {
            Ok(Arc::new(KmsProvider::new(cfg)?) as Arc<dyn Provider>)
        })
        .with_options(OPTIONS)
        .with_normalizer(normalize),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// "Decrypts" by returning the ciphertext unchanged.
    #[derive(Default)]
    struct EchoKms {
        requests: Mutex<Vec<DecryptRequest>>,
    }

    #[async_trait]
    impl KeyManagement for EchoKms {
        async fn decrypt(&self, request: &DecryptRequest) -> Result<Vec<u8>> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(request.ciphertext.clone())
        }
    }

    fn encode(plaintext: &str) -> String {
        URL_SAFE.encode(plaintext)
    }

    #[tokio::test]
    async fn test_decrypt_scalar_with_options() {
        let kms = Arc::new(EchoKms::default());
        let config = ProviderConfig::new("awskms")
            .with_option("key", "alias/app")
            .with_option("alg", "SYMMETRIC_DEFAULT")
            .with_option("context", "{tenant: acme, env: prod}");
        let provider = KmsProvider::with_client(&config, kms.clone()).unwrap();

        assert_eq!(provider.fetch_scalar(&encode("s3cr3t")).await.unwrap(), "s3cr3t");

        let requests = kms.requests.lock().unwrap();
        assert_eq!(requests[0].key_id.as_deref(), Some("alias/app"));
        assert_eq!(requests[0].algorithm.as_deref(), Some("SYMMETRIC_DEFAULT"));
        assert_eq!(requests[0].context.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(requests[0].context.len(), 2);
    }

    #[tokio::test]
    async fn test_unpadded_ciphertext_is_accepted() {
        let provider =
            KmsProvider::with_client(&ProviderConfig::new("awskms"), Arc::new(EchoKms::default()))
                .unwrap();
        let unpadded = URL_SAFE_NO_PAD.encode("ab");
        assert_eq!(provider.fetch_scalar(&unpadded).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_decrypt_mapping() {
        let provider =
            KmsProvider::with_client(&ProviderConfig::new("awskms"), Arc::new(EchoKms::default()))
                .unwrap();

        let MappingResult::Document(doc) = provider
            .fetch_mapping(&encode("user: admin\npass: x\n"))
            .await
            .unwrap()
        else {
            panic!("expected a document");
        };
        assert_eq!(Value::Object(doc), json!({"user": "admin", "pass": "x"}));
    }

    #[tokio::test]
    async fn test_invalid_base64_is_malformed() {
        let kms = Arc::new(EchoKms::default());
        let provider = KmsProvider::with_client(&ProviderConfig::new("awskms"), kms.clone()).unwrap();

        let err = provider.fetch_scalar("not base64!").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedReference);
        assert!(kms.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_context_rejected() {
        let mut config = ProviderConfig::new("awskms").with_option("context", "[a, b]");
        assert_eq!(normalize(&mut config).unwrap_err().kind(), ErrorKind::InvalidConfig);
        assert!(KmsProvider::new(&config).is_err());
    }
}
