//! HTTP JSON document backend.
//!
//! The location is a URL without its scheme; the extraction fragment picks
//! a value out of the fetched document:
//!
//! ```text
//! httpjson://api.example.com/v1/servers#/servers/*[1]/ip
//! httpjson://localhost:8080/config.json?insecure=true#/database/port
//! ```
//!
//! Documents are fetched once per URL and kept for the lifetime of the
//! provider. Concurrent lookups of an uncached URL share one request and
//! its outcome; a failed request is forgotten once its waiters have it.
//!
//! # Options
//!
//! - `insecure`: `true` uses `http` instead of `https`
//! - `floatAsInt`: `true` renders numbers without their fractional part
//!
//! Any other query parameter is part of the document URL.

use crate::provider::{MappingResult, NestedMapping, Provider};
use crate::query::Extraction;
use crate::registry::{BackendSpec, LocationSyntax, ProviderRegistry};
use crate::{ProviderConfig, Result, SecretRefError};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

/// Options read by the `httpjson` backend.
pub const OPTIONS: &[&str] = &["insecure", "floatAsInt"];

/// Fetches and decodes a JSON document.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value>;
}

fn normalize(config: &mut ProviderConfig) -> Result<()> {
    config.set_default("insecure", "false");
    config.set_default("floatAsInt", "false");
    config.require_flag("insecure")?;
    config.require_flag("floatAsInt")
}

/// A location split into document URL and extraction.
#[derive(Debug)]
struct Target {
    url: String,
    extraction: Option<Extraction>,
}

/// In-flight or finished fetch of one document.
type DocumentSlot = Shared<BoxFuture<'static, std::result::Result<Arc<Value>, Arc<SecretRefError>>>>;

/// HTTP JSON provider.
pub struct HttpJsonProvider {
    protocol: &'static str,
    float_as_int: bool,
    fetcher: OnceCell<Arc<dyn DocumentFetcher>>,
    documents: Mutex<HashMap<String, DocumentSlot>>,
}

impl HttpJsonProvider {
    /// Creates a provider from a normalized configuration. The HTTP client
    /// is built on the first fetch.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            protocol: if config.flag("insecure") { "http" } else { "https" },
            float_as_int: config.flag("floatAsInt"),
            fetcher: OnceCell::new(),
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a provider with a ready fetcher.
    pub fn with_fetcher(config: &ProviderConfig, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self {
            fetcher: OnceCell::new_with(Some(fetcher)),
            ..Self::new(config)
        }
    }

    /// Number of documents held in the cache.
    pub fn cached_documents(&self) -> usize {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| matches!(slot.peek(), Some(Ok(_))))
            .count()
    }

    fn target(&self, location: &str) -> Result<Target> {
        let (address, extraction) = match location.split_once("#/") {
            Some((address, expression)) => (address, Some(Extraction::compile(expression)?)),
            None => (location, None),
        };

        if address.starts_with('/') {
            return Err(SecretRefError::malformed(location, "no host in URL"));
        }

        let full = format!("{}://{}", self.protocol, address);
        let url = url::Url::parse(&full)
            .map_err(|e| SecretRefError::malformed(location, format!("invalid URL {full}: {e}")))?;

        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(SecretRefError::malformed(location, "no host in URL")),
        }

        Ok(Target {
            url: url.to_string(),
            extraction,
        })
    }

    async fn fetcher(&self) -> Result<&Arc<dyn DocumentFetcher>> {
        self.fetcher.get_or_try_init(connect).await
    }

    /// Returns the document at `url`, fetching it at most once.
    ///
    /// Callers that arrive while a fetch is in flight wait for it and get
    /// its result, success or failure. Failed slots are removed so the next
    /// lookup starts a new request.
    async fn document(&self, url: &str) -> Result<Arc<Value>> {
        let fetcher = Arc::clone(self.fetcher().await?);

        let slot = {
            let mut documents = self
                .documents
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            documents
                .entry(url.to_string())
                .or_insert_with(|| {
                    let url = url.to_string();
                    async move {
                        let document = fetcher.fetch(&url).await.map_err(Arc::new)?;
                        debug!(url = %url, "fetched JSON document");
                        Ok::<_, Arc<SecretRefError>>(Arc::new(document))
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };

        match slot.clone().await {
            Ok(document) => Ok(document),
            Err(err) => {
                let mut documents = self
                    .documents
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if documents.get(url).is_some_and(|current| current.ptr_eq(&slot)) {
                    documents.remove(url);
                }
                Err(SecretRefError::Shared(err))
            }
        }
    }

    fn render_scalar(&self, value: &Value) -> Result<String> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => {
                return Err(SecretRefError::Other(anyhow::anyhow!(
                    "expected a scalar, found {value}"
                )))
            }
        };

        if !self.float_as_int {
            return Ok(text);
        }

        let number: f64 = text.parse().map_err(|_| {
            SecretRefError::Other(anyhow::anyhow!(
                "unable to convert possible float to int for value: {text}"
            ))
        })?;
        Ok(format!("{number:.0}"))
    }

    fn render(&self, value: &Value, target: &Target) -> Result<String> {
        let granular = || {
            SecretRefError::Other(anyhow::anyhow!(
                "location {} has child nodes at {}, please use a more granular query",
                target.extraction.as_ref().map(Extraction::as_str).unwrap_or(""),
                target.url
            ))
        };

        match value {
            Value::Object(_) => Err(granular()),
            Value::Array(items) => {
                if items.iter().any(|item| item.is_object() || item.is_array()) {
                    return Err(granular());
                }
                let parts = items
                    .iter()
                    .map(|item| self.render_scalar(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(parts.join(","))
            }
            Value::Null => Err(SecretRefError::NotFound(format!(
                "null value in {}",
                target.url
            ))),
            scalar => self.render_scalar(scalar),
        }
    }
}

#[cfg(feature = "httpjson")]
async fn connect() -> Result<Arc<dyn DocumentFetcher>> {
    Ok(Arc::new(HttpFetcher::new()?))
}

#[cfg(not(feature = "httpjson"))]
async fn connect() -> Result<Arc<dyn DocumentFetcher>> {
    Err(SecretRefError::invalid_config(
        "httpjson",
        "this build does not include HTTP support; enable the `httpjson` feature",
    ))
}

#[async_trait]
impl Provider for HttpJsonProvider {
    fn name(&self) -> &str {
        "httpjson"
    }

    async fn fetch_scalar(&self, location: &str) -> Result<String> {
        let target = self.target(location)?;
        let extraction = target.extraction.as_ref().ok_or_else(|| {
            SecretRefError::malformed(location, "no extraction expression (#/...) in reference")
        })?;

        let document = self.document(&target.url).await?;
        let value = extraction.first(&document).ok_or_else(|| {
            SecretRefError::NotFound(format!("{} in {}", extraction, target.url))
        })?;

        self.render(value, &target)
    }

    async fn fetch_mapping(&self, location: &str) -> Result<MappingResult> {
        let target = self.target(location)?;
        let document = self.document(&target.url).await?;

        let selected = match &target.extraction {
            Some(extraction) => extraction.first(&document).ok_or_else(|| {
                SecretRefError::NotFound(format!("{} in {}", extraction, target.url))
            })?,
            None => document.as_ref(),
        };

        match selected {
            Value::Object(map) => Ok(MappingResult::Document(NestedMapping::clone(map))),
            other => Err(SecretRefError::Other(anyhow::anyhow!(
                "expected a JSON object at {}, found {other}",
                target.url
            ))),
        }
    }
}

/// Fetches documents with `reqwest`.
#[cfg(feature = "httpjson")]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "httpjson")]
impl HttpFetcher {
    /// Builds the HTTP client. No request is made.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SecretRefError::invalid_config("httpjson", format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "httpjson")]
#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Value> {
        use reqwest::StatusCode;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SecretRefError::BackendUnavailable(format!("GET {url}: {e}")))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Err(SecretRefError::NotFound(url.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SecretRefError::AccessDenied(format!("GET {url}: {status}")))
            }
            s if !s.is_success() => {
                return Err(SecretRefError::BackendUnavailable(format!("GET {url}: {status}")))
            }
            _ => {}
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SecretRefError::BackendUnavailable(format!("GET {url}: {e}")))?;

        Ok(serde_json::from_slice(&body)?)
    }
}

/// Registers the `httpjson` backend.
pub fn register(registry: &ProviderRegistry) {
    registry.register(
        BackendSpec::new("httpjson", |cfg| {
            Ok(Arc::new(HttpJsonProvider::new(cfg)) as Arc<dyn Provider>)
        })
        .with_options(OPTIONS)
        .with_syntax(LocationSyntax::Url)
        .with_normalizer(normalize),
    );
}
