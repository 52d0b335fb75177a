//! Shared AWS session settings.

use crate::{ProviderConfig, Result, SecretRefError};

/// Region used when neither the reference nor the shared config names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Fills the default region and validates the session options.
///
/// # Errors
///
/// Returns [`SecretRefError::InvalidConfig`] when `endpoint` is not a URL or
/// `role_arn` is not an ARN.
pub fn normalize(config: &mut ProviderConfig) -> Result<()> {
    config.set_default("region", DEFAULT_REGION);

    if config.string("region").is_some_and(str::is_empty) {
        return Err(SecretRefError::invalid_config(
            config.backend.clone(),
            "region must not be empty",
        ));
    }

    if let Some(endpoint) = config.string("endpoint") {
        url::Url::parse(endpoint).map_err(|e| {
            SecretRefError::invalid_config(
                config.backend.clone(),
                format!("invalid endpoint {endpoint:?}: {e}"),
            )
        })?;
    }

    if let Some(role_arn) = config.string("role_arn") {
        if !role_arn.starts_with("arn:") {
            return Err(SecretRefError::invalid_config(
                config.backend.clone(),
                format!("role_arn {role_arn:?} is not an ARN"),
            ));
        }
    }

    Ok(())
}

/// Where and as whom AWS clients connect.
///
/// AWS credentials are managed by the SDK and refreshed automatically; the
/// session only selects region, profile, an optional role to assume and an
/// optional endpoint override (LocalStack).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSession {
    region: String,
    profile: Option<String>,
    role_arn: Option<String>,
    endpoint: Option<String>,
}

impl AwsSession {
    /// Reads the session options from a normalized configuration.
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            region: config.string_or("region", DEFAULT_REGION).to_string(),
            profile: config.string("profile").map(str::to_string),
            role_arn: config.string("role_arn").map(str::to_string),
            endpoint: config.string("endpoint").map(str::to_string),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn role_arn(&self) -> Option<&str> {
        self.role_arn.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    #[cfg(feature = "aws")]
    fn loader(&self) -> aws_config::ConfigLoader {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()));

        if let Some(ref profile) = self.profile {
            loader = loader.profile_name(profile);
        }

        // Custom endpoint (LocalStack testing)
        if let Some(ref endpoint) = self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        loader
    }

    /// Loads the SDK configuration, assuming `role_arn` when set.
    #[cfg(feature = "aws")]
    pub async fn load(&self) -> aws_config::SdkConfig {
        let base = self.loader().load().await;

        let Some(ref role_arn) = self.role_arn else {
            return base;
        };

        tracing::debug!(role_arn = %role_arn, region = %self.region, "assuming role");
        let provider = aws_config::sts::AssumeRoleProvider::builder(role_arn)
            .session_name("secretref")
            .configure(&base)
            .build()
            .await;

        self.loader().credentials_provider(provider).load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_normalize_defaults_region() {
        let mut config = ProviderConfig::new("ssm");
        normalize(&mut config).unwrap();
        assert_eq!(config.string("region"), Some(DEFAULT_REGION));
    }

    #[test]
    fn test_normalize_keeps_explicit_region() {
        let mut config = ProviderConfig::new("ssm").with_option("region", "eu-west-1");
        normalize(&mut config).unwrap();
        assert_eq!(config.string("region"), Some("eu-west-1"));
    }

    #[test]
    fn test_normalize_rejects_bad_values() {
        for (key, value) in [
            ("endpoint", "not a url"),
            ("role_arn", "admin"),
            ("region", ""),
        ] {
            let mut config = ProviderConfig::new("awssecrets").with_option(key, value);
            let err = normalize(&mut config).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig, "{key}={value}");
        }
    }

    #[test]
    fn test_session_from_config() {
        let config = ProviderConfig::new("awskms")
            .with_option("region", "ap-south-1")
            .with_option("profile", "ops")
            .with_option("endpoint", "http://localhost:4566");
        let session = AwsSession::from_config(&config);

        assert_eq!(session.region(), "ap-south-1");
        assert_eq!(session.profile(), Some("ops"));
        assert_eq!(session.endpoint(), Some("http://localhost:4566"));
        assert_eq!(session.role_arn(), None);
    }
}
