//! Secret reference parsing.
//!
//! A reference names a backend, a location meaningful to that backend, and
//! optional parameters:
//!
//! ```text
//! [ref+]<backend>://<location>[?<key>=<value>&...][#/<extraction-expression>]
//! ```
//!
//! Parsing never performs I/O. Extraction expressions are compiled here so a
//! broken expression is reported before any backend is contacted.

use crate::query::Extraction;
use crate::validation::{validate_backend_tag, validate_location};
use crate::{Result, SecretRefError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

/// Optional prefix marking a string as a reference inside larger documents.
pub const REFERENCE_PREFIX: &str = "ref+";

/// A parsed secret reference.
///
/// # Example
///
/// ```
/// use secretref::Reference;
///
/// let reference: Reference = "ref+ssm://app/prod?region=eu-west-1&recursive=true"
///     .parse()
///     .unwrap();
///
/// assert_eq!(reference.backend(), "ssm");
/// assert_eq!(reference.location(), "app/prod");
/// assert_eq!(reference.parameter("region"), Some("eu-west-1"));
/// assert_eq!(
///     reference.to_string(),
///     "ssm://app/prod?recursive=true&region=eu-west-1"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    backend: String,
    location: String,
    parameters: BTreeMap<String, String>,
    extraction: Option<Extraction>,
}

impl Reference {
    /// Parses a reference string.
    ///
    /// # Errors
    ///
    /// Returns [`SecretRefError::MalformedReference`] when:
    /// - the `<backend>://` separator is missing or the tag is invalid
    /// - the location is empty or contains control characters
    /// - a fragment does not start with `#/`
    /// - the extraction expression does not compile
    pub fn parse(input: &str) -> Result<Self> {
        let body = input.strip_prefix(REFERENCE_PREFIX).unwrap_or(input);

        let (backend, rest) = body.split_once("://").ok_or_else(|| {
            SecretRefError::malformed(input, "expected <backend>://<location>")
        })?;
        validate_backend_tag(backend)
            .map_err(|_| SecretRefError::malformed(input, "invalid backend tag"))?;

        let (rest, extraction) = match rest.split_once('#') {
            Some((rest, fragment)) => {
                let expression = fragment.strip_prefix('/').ok_or_else(|| {
                    SecretRefError::malformed(input, "fragment must start with \"#/\"")
                })?;
                (rest, Some(Extraction::compile(expression)?))
            }
            None => (rest, None),
        };

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        validate_location(location)?;

        let mut parameters = BTreeMap::new();
        if let Some(query) = query {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                if key.is_empty() {
                    return Err(SecretRefError::malformed(
                        input,
                        "query parameter with empty name",
                    ));
                }
                parameters.insert(key.into_owned(), value.into_owned());
            }
        }

        Ok(Self {
            backend: backend.to_string(),
            location: location.to_string(),
            parameters,
            extraction,
        })
    }

    /// Backend tag, e.g. `"ssm"`.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Location within the backend, without parameters or fragment.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// All parameters, sorted by name.
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Gets a single parameter.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Compiled extraction expression, if the reference carries one.
    pub fn extraction(&self) -> Option<&Extraction> {
        self.extraction.as_ref()
    }

    /// Renders the location followed by the parameters accepted by `keep`
    /// and the extraction fragment.
    ///
    /// Document-style backends receive this form so that parameters which
    /// are part of the remote address survive resolution.
    pub fn render_target(&self, keep: impl Fn(&str) -> bool) -> String {
        let mut target = self.location.clone();

        let kept: Vec<(&String, &String)> =
            self.parameters.iter().filter(|(k, _)| keep(k.as_str())).collect();
        if !kept.is_empty() {
            target.push('?');
            target.push_str(
                &form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(kept)
                    .finish(),
            );
        }

        if let Some(extraction) = &self.extraction {
            target.push_str("#/");
            target.push_str(extraction.as_str());
        }

        target
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.backend, self.render_target(|_| true))
    }
}

impl FromStr for Reference {
    type Err = SecretRefError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Reference {
    type Error = SecretRefError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_parse_plain() {
        let r = Reference::parse("awssecrets://prod/db-password").unwrap();
        assert_eq!(r.backend(), "awssecrets");
        assert_eq!(r.location(), "prod/db-password");
        assert!(r.parameters().is_empty());
        assert!(r.extraction().is_none());
    }

    #[test]
    fn test_parse_parameters_are_decoded() {
        let r = Reference::parse("awskms://abc?context=%7Bapp%3A+web%7D&alg=SYMMETRIC_DEFAULT")
            .unwrap();
        assert_eq!(r.parameter("context"), Some("{app: web}"));
        assert_eq!(r.parameter("alg"), Some("SYMMETRIC_DEFAULT"));
    }

    #[test]
    fn test_duplicate_parameter_last_wins() {
        let r = Reference::parse("ssm://foo?region=a&region=b").unwrap();
        assert_eq!(r.parameter("region"), Some("b"));
    }

    #[test]
    fn test_parse_extraction() {
        let r = Reference::parse("httpjson://api.example.com/v1/info?format=json#///*[1]/ip")
            .unwrap();
        assert_eq!(r.location(), "api.example.com/v1/info");
        assert_eq!(r.parameter("format"), Some("json"));
        assert_eq!(r.extraction().map(|e| e.as_str()), Some("//*[1]/ip"));
    }

    #[test]
    fn test_malformed_references() {
        for input in [
            "",
            "ssm",
            "ssm:/foo",
            "://foo",
            "9ssm://foo",
            "ssm://",
            "ssm://?region=x",
            "httpjson://host/doc#a/b",
            "httpjson://host/doc#/a//",
            "ssm://foo?=x",
        ] {
            let err = Reference::parse(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedReference, "{input:?}");
        }
    }

    #[test]
    fn test_reparse_is_idempotent() {
        for input in [
            "ssm://foo/bar?recursive=true&region=us-east-1",
            "ref+awssecrets://prod/key?version_stage=AWSPREVIOUS",
            "httpjson://example.com/doc.json?insecure=true&q=a+b%26c#/a/*[2]",
            "awskms://AQICAHh-abc_def==",
        ] {
            let first = Reference::parse(input).unwrap();
            let second = Reference::parse(&first.to_string()).unwrap();
            assert_eq!(first, second, "{input}");
            assert_eq!(first.to_string(), second.to_string());
        }
    }

    #[test]
    fn test_render_target_filters_parameters() {
        let r = Reference::parse("httpjson://example.com/doc?insecure=true&page=2#/a").unwrap();
        assert_eq!(
            r.render_target(|k| k != "insecure"),
            "example.com/doc?page=2#/a"
        );
        assert_eq!(r.render_target(|_| false), "example.com/doc#/a");
    }

    #[test]
    fn test_serde_uses_string_form() {
        let r: Reference = serde_json::from_str("\"ssm://foo?recursive=true\"").unwrap();
        assert_eq!(r.location(), "foo");
        assert_eq!(
            serde_json::to_string(&r).unwrap(),
            "\"ssm://foo?recursive=true\""
        );
        assert!(serde_json::from_str::<Reference>("\"nope\"").is_err());
    }
}
