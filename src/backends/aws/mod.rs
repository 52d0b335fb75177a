//! AWS backends: SSM Parameter Store, Secrets Manager and KMS.
//!
//! All three share one set of session options (`region`, `profile`,
//! `role_arn`, `endpoint`) and build their SDK clients from an
//! [`AwsSession`] on first use.
//!
//! # Requirements
//!
//! - The `aws` feature. Without it the adapters still parse and cache, but
//!   the first fetch fails with an `InvalidConfig` error.
//! - AWS credentials configured via:
//!   - Environment variables (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`)
//!   - Shared credentials file (`~/.aws/credentials`), optionally a named `profile`
//!   - IAM instance role (for EC2/ECS)
//!
//! # Example
//!
//! ```no_run
//! use secretref::{default_registry, Resolver, SharedConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> secretref::Result<()> {
//!     let resolver = Resolver::new(Arc::new(default_registry(SharedConfig::from_env())));
//!
//!     let password = resolver
//!         .resolve_scalar("awssecrets://prod/db/password?region=us-west-2")
//!         .await?;
//!     let app = resolver
//!         .resolve_mapping("ssm://app/prod?recursive=true")
//!         .await?;
//!
//!     println!("{} keys, password is {} chars", app.len(), password.len());
//!     Ok(())
//! }
//! ```

pub mod kms;
pub mod secrets;
pub mod session;
pub mod ssm;

pub use kms::KmsProvider;
pub use secrets::SecretsManagerProvider;
pub use session::AwsSession;
pub use ssm::SsmProvider;

use crate::registry::ProviderRegistry;
use crate::SecretRefError;

/// Maps an AWS error code to an error kind.
///
/// Unknown codes and transport failures (no code at all) are treated as the
/// backend being unavailable.
#[cfg_attr(not(feature = "aws"), allow(dead_code))]
pub(crate) fn classify(code: Option<&str>, location: &str, message: String) -> SecretRefError {
    match code {
        Some("ResourceNotFoundException") | Some("ParameterNotFound") | Some("NotFoundException") => {
            SecretRefError::NotFound(location.to_string())
        }
        Some("AccessDeniedException") | Some("AccessDenied") | Some("UnrecognizedClientException") => {
            SecretRefError::AccessDenied(message)
        }
        _ => SecretRefError::BackendUnavailable(message),
    }
}

/// Converts an SDK call failure into a [`SecretRefError`].
#[cfg(feature = "aws")]
pub(crate) fn sdk_error<E, R>(
    err: aws_sdk_ssm::error::SdkError<E, R>,
    location: &str,
) -> SecretRefError
where
    E: aws_sdk_ssm::error::ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    use aws_sdk_ssm::error::{DisplayErrorContext, ProvideErrorMetadata};

    let code = err.code().map(str::to_string);
    let message = DisplayErrorContext(&err).to_string();
    classify(code.as_deref(), location, message)
}

/// Error returned by the adapters when the SDK is not compiled in.
#[cfg_attr(feature = "aws", allow(dead_code))]
pub(crate) fn feature_disabled(backend: &str) -> SecretRefError {
    SecretRefError::invalid_config(
        backend,
        "this build does not include AWS support; enable the `aws` feature",
    )
}

/// Registers `ssm`, `awssecrets` and `awskms`.
pub fn register(registry: &ProviderRegistry) {
    ssm::register(registry);
    secrets::register(registry);
    kms::register(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_classify_codes() {
        let cases = [
            (Some("ResourceNotFoundException"), ErrorKind::NotFound),
            (Some("ParameterNotFound"), ErrorKind::NotFound),
            (Some("AccessDeniedException"), ErrorKind::AccessDenied),
            (Some("AccessDenied"), ErrorKind::AccessDenied),
            (Some("ThrottlingException"), ErrorKind::BackendUnavailable),
            (None, ErrorKind::BackendUnavailable),
        ];

        for (code, kind) in cases {
            let err = classify(code, "/app/key", "boom".to_string());
            assert_eq!(err.kind(), kind, "{code:?}");
        }
    }

    #[test]
    fn test_not_found_names_location() {
        let err = classify(Some("ParameterNotFound"), "/app/key", "x".to_string());
        assert!(err.to_string().contains("/app/key"));
    }

    #[test]
    fn test_register_all_aws_backends() {
        let registry = ProviderRegistry::new(crate::SharedConfig::new());
        register(&registry);
        assert_eq!(
            registry.registered_backends(),
            vec!["awskms", "awssecrets", "ssm"]
        );
    }
}
