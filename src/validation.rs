//! Input validation for reference components.

use crate::{Result, SecretRefError};

/// Maximum allowed length for a reference location.
const MAX_LOCATION_LENGTH: usize = 4096;

/// Validates a backend tag.
///
/// Tags start with an ASCII letter and continue with ASCII letters, digits,
/// `-` or `_`.
///
/// # Example
///
/// ```
/// use secretref::validation::validate_backend_tag;
///
/// assert!(validate_backend_tag("awssecrets").is_ok());
/// assert!(validate_backend_tag("tfstate-s3").is_ok());
///
/// assert!(validate_backend_tag("").is_err());
/// assert!(validate_backend_tag("3ssm").is_err());
/// assert!(validate_backend_tag("ss m").is_err());
/// ```
pub fn validate_backend_tag(tag: &str) -> Result<()> {
    let mut chars = tag.chars();
    match chars.next() {
        None => return Err(SecretRefError::malformed(tag, "backend tag is empty")),
        Some(c) if !c.is_ascii_alphabetic() => {
            return Err(SecretRefError::malformed(
                tag,
                "backend tag must start with a letter",
            ))
        }
        Some(_) => {}
    }

    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_')) {
        return Err(SecretRefError::malformed(
            tag,
            "backend tag may only contain letters, digits, '-' and '_'",
        ));
    }

    Ok(())
}

/// Validates a location.
///
/// Rejects empty locations, locations over 4096 bytes, null bytes and
/// control characters.
///
/// # Example
///
/// ```
/// use secretref::validation::validate_location;
///
/// assert!(validate_location("/app/prod/db").is_ok());
/// assert!(validate_location("api.example.com/v1/config.json").is_ok());
///
/// assert!(validate_location("").is_err());
/// assert!(validate_location("a\0b").is_err());
/// ```
pub fn validate_location(location: &str) -> Result<()> {
    if location.is_empty() {
        return Err(SecretRefError::malformed(location, "location is empty"));
    }

    if location.len() > MAX_LOCATION_LENGTH {
        return Err(SecretRefError::malformed(
            truncated(location),
            format!(
                "location exceeds maximum length of {} bytes",
                MAX_LOCATION_LENGTH
            ),
        ));
    }

    if location.contains('\0') {
        return Err(SecretRefError::malformed(
            location,
            "location contains null byte",
        ));
    }

    if location.chars().any(char::is_control) {
        return Err(SecretRefError::malformed(
            location,
            "location contains control characters",
        ));
    }

    Ok(())
}

fn truncated(location: &str) -> String {
    let end = location
        .char_indices()
        .nth(64)
        .map(|(i, _)| i)
        .unwrap_or(location.len());
    format!("{}...", &location[..end])
}
