//! Error types for reference resolution.

use thiserror::Error;

/// Result type alias using [`SecretRefError`].
pub type Result<T> = std::result::Result<T, SecretRefError>;

/// Errors that can occur while parsing, constructing providers, fetching or
/// assembling values.
///
/// All errors implement `std::error::Error` and can be chained with `source()`.
/// Use [`SecretRefError::kind`] to classify an error regardless of the
/// context it was wrapped in.
#[derive(Debug, Error)]
pub enum SecretRefError {
    /// Reference string could not be parsed.
    #[error("malformed reference {reference:?}: {reason}")]
    MalformedReference {
        /// The offending reference (or location) text
        reference: String,
        /// What was wrong with it
        reason: String,
    },

    /// No constructor is registered for the backend tag.
    #[error("unknown backend: {0} (is the backend compiled in and registered?)")]
    UnknownBackend(String),

    /// Provider configuration was rejected.
    #[error("invalid configuration for backend {backend}: {message}")]
    InvalidConfig {
        /// Backend tag
        backend: String,
        /// Validation failure
        message: String,
    },

    /// The backend reports that the location does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend refused access to the location.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Transport or connectivity failure talking to the backend.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Meta document exists but lacks the child-key field.
    #[error("metadata at {location} has no {field:?} field")]
    MissingMetadata {
        /// Location of the meta document
        location: String,
        /// Field that was expected
        field: String,
    },

    /// Meta document's child-key field is not a sequence of strings.
    #[error("invalid metadata at {location}: {message}")]
    InvalidMetadata {
        /// Location of the meta document
        location: String,
        /// What was wrong with the field
        message: String,
    },

    /// Flat entries could not be assembled into a single tree.
    #[error("cannot assemble {path}: {message}")]
    AssemblyConflict {
        /// Entry path that caused the conflict
        path: String,
        /// Description of the conflict
        message: String,
    },

    /// Adapter call failed, with backend context.
    #[error("{backend}: {operation} {location}: {source}")]
    BackendOperation {
        /// Backend tag
        backend: String,
        /// Operation name (fetch_scalar, fetch_mapping)
        operation: String,
        /// Location passed to the adapter
        location: String,
        /// Underlying error
        #[source]
        source: Box<SecretRefError>,
    },

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML decoding error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// One failure delivered to every caller that waited on the same
    /// operation.
    #[error(transparent)]
    Shared(std::sync::Arc<SecretRefError>),

    /// Other error (catch-all).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Classification of a [`SecretRefError`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedReference,
    UnknownBackend,
    InvalidConfig,
    NotFound,
    AccessDenied,
    BackendUnavailable,
    MissingMetadata,
    InvalidMetadata,
    AssemblyConflict,
    Decode,
    Other,
}

impl SecretRefError {
    /// Creates a backend operation error with context.
    ///
    /// This wraps an underlying error with information about which backend,
    /// operation, and location caused the failure. The wrapped error's
    /// [`kind`](Self::kind) is preserved.
    ///
    /// # Example
    ///
    /// ```
    /// use secretref::{ErrorKind, SecretRefError};
    ///
    /// let err = SecretRefError::NotFound("/app/db".to_string());
    /// let wrapped = SecretRefError::backend_op("ssm", "fetch_scalar", "/app/db", err);
    ///
    /// assert_eq!(
    ///     wrapped.to_string(),
    ///     "ssm: fetch_scalar /app/db: not found: /app/db"
    /// );
    /// assert_eq!(wrapped.kind(), ErrorKind::NotFound);
    /// ```
    pub fn backend_op(
        backend: impl Into<String>,
        operation: impl Into<String>,
        location: impl Into<String>,
        err: SecretRefError,
    ) -> Self {
        Self::BackendOperation {
            backend: backend.into(),
            operation: operation.into(),
            location: location.into(),
            source: Box::new(err),
        }
    }

    pub fn malformed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Returns the kind of this error, looking through backend context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedReference { .. } => ErrorKind::MalformedReference,
            Self::UnknownBackend(_) => ErrorKind::UnknownBackend,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::MissingMetadata { .. } => ErrorKind::MissingMetadata,
            Self::InvalidMetadata { .. } => ErrorKind::InvalidMetadata,
            Self::AssemblyConflict { .. } => ErrorKind::AssemblyConflict,
            Self::BackendOperation { source, .. } => source.kind(),
            Self::Shared(inner) => inner.kind(),
            Self::Json(_) | Self::Yaml(_) => ErrorKind::Decode,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// True when the backend reported that the location does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = SecretRefError::NotFound("/app/db".to_string());
        assert_eq!(err.to_string(), "not found: /app/db");

        let err = SecretRefError::malformed("ssm:/x", "missing \"://\"");
        assert!(err.to_string().contains("ssm:/x"));
    }

    #[test]
    fn test_backend_operation_error() {
        let inner = SecretRefError::AccessDenied("prod/key".to_string());
        let err = SecretRefError::backend_op("awssecrets", "fetch_scalar", "prod/key", inner);

        let error_string = err.to_string();
        assert!(error_string.contains("awssecrets"));
        assert!(error_string.contains("fetch_scalar"));
        assert!(error_string.contains("prod/key"));
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[test]
    fn test_error_source_chain() {
        let inner = SecretRefError::BackendUnavailable("timeout".to_string());
        let outer = SecretRefError::backend_op("ssm", "fetch_mapping", "/foo", inner);

        assert!(outer.source().is_some());
        assert!(!outer.is_not_found());
    }

    #[test]
    fn test_decode_errors_share_kind() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let yaml = serde_yaml::from_str::<serde_yaml::Value>("a: [").unwrap_err();

        assert_eq!(SecretRefError::from(json).kind(), ErrorKind::Decode);
        assert_eq!(SecretRefError::from(yaml).kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_shared_error_keeps_kind_and_message() {
        let inner = std::sync::Arc::new(SecretRefError::NotFound("doc.json".to_string()));
        let first = SecretRefError::Shared(inner.clone());
        let second = SecretRefError::Shared(inner);

        assert_eq!(first.kind(), ErrorKind::NotFound);
        assert_eq!(second.to_string(), "not found: doc.json");
    }
}
