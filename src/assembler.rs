//! Hierarchical assembly of flat path listings into nested mappings.
//!
//! Backends such as SSM Parameter Store list a subtree as flat
//! `(path, value)` pairs. [`assemble`] rebuilds the tree below a root
//! location. Backends without native listing use [`expand_meta_keys`], which
//! reads the list of children from a `<root>/meta` document instead.
//!
//! # Conflict policy
//!
//! A path can hold a value and also be the parent of other paths. A mapping
//! cannot represent both, so the scalar is dropped and the children are
//! kept. Two entries with the same path and different values are rejected
//! with [`SecretRefError::AssemblyConflict`]; identical duplicates are
//! accepted.

use crate::provider::{decode_mapping, FlatEntry, NestedMapping, Provider};
use crate::{Result, SecretRefError};
use serde_json::Value;
use tracing::debug;

/// Field of a meta document listing child-key suffixes.
///
/// An opaque string kept for compatibility with existing meta documents.
pub const DEFAULT_META_FIELD: &str = "github.com/nateschererforks/vals";

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Builds the nested mapping below `root` from flat entries.
///
/// Paths are compared segment-wise, so `foo`, `/foo` and `/foo/` all name
/// the same root.
///
/// # Errors
///
/// - [`SecretRefError::NotFound`]: no entries, or only a value at the root itself
/// - [`SecretRefError::AssemblyConflict`]: an entry lies outside `root`, or
///   one path carries two different values
///
/// # Example
///
/// ```
/// use secretref::assembler::assemble;
/// use secretref::FlatEntry;
/// use serde_json::json;
///
/// let entries = vec![
///     FlatEntry::new("/foo/bar", "BAR"),
///     FlatEntry::new("/foo/bar/a", "A"),
///     FlatEntry::new("/foo/baz", "BAZ"),
/// ];
///
/// let tree = assemble("/foo", &entries).unwrap();
/// assert_eq!(json!(tree), json!({"bar": {"a": "A"}, "baz": "BAZ"}));
/// ```
pub fn assemble(root: &str, entries: &[FlatEntry]) -> Result<NestedMapping> {
    if entries.is_empty() {
        return Err(SecretRefError::NotFound(format!("no entries under {root}")));
    }

    let root_segments = segments(root);

    let mut sorted: Vec<&FlatEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut tree = NestedMapping::new();
    for entry in sorted {
        let path_segments = segments(&entry.path);
        let relative = path_segments
            .strip_prefix(root_segments.as_slice())
            .ok_or_else(|| SecretRefError::AssemblyConflict {
                path: entry.path.clone(),
                message: format!("entry is outside of root {root}"),
            })?;

        if relative.is_empty() {
            debug!(root, "dropping value stored at the root location itself");
            continue;
        }

        insert(&mut tree, relative, entry)?;
    }

    if tree.is_empty() {
        return Err(SecretRefError::NotFound(format!(
            "no entries below {root}"
        )));
    }

    Ok(tree)
}

fn insert(tree: &mut NestedMapping, relative: &[&str], entry: &FlatEntry) -> Result<()> {
    let Some((leaf, parents)) = relative.split_last() else {
        return Ok(());
    };

    let mut node = tree;
    for segment in parents {
        let slot = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(NestedMapping::new()));
        if !slot.is_object() {
            debug!(path = %entry.path, segment, "children replace scalar value");
            *slot = Value::Object(NestedMapping::new());
        }
        let Value::Object(children) = slot else {
            unreachable!("slot was just made a mapping");
        };
        node = children;
    }

    match node.get(*leaf) {
        Some(Value::Object(_)) => {
            debug!(path = %entry.path, "scalar value dropped in favour of children");
        }
        Some(Value::String(existing)) if *existing != entry.value => {
            return Err(SecretRefError::AssemblyConflict {
                path: entry.path.clone(),
                message: "path listed twice with different values".to_string(),
            });
        }
        _ => {
            node.insert(leaf.to_string(), Value::String(entry.value.clone()));
        }
    }

    Ok(())
}

/// Builds a mapping for backends without hierarchical listing.
///
/// 1. The value at `root` is fetched and decoded; if it is a mapping it is
///    returned as-is.
/// 2. Otherwise (undecodable, or not found) `<root>/meta` is fetched and
///    decoded, and `field` must hold a sequence of child-key suffixes.
/// 3. Each `<root>/<suffix>` is fetched into a one-level mapping.
///
/// # Errors
///
/// - [`SecretRefError::MissingMetadata`]: the meta document lacks `field`
/// - [`SecretRefError::InvalidMetadata`]: the meta document is not a mapping,
///   or `field` is not a sequence of strings
/// - Any error from the provider other than a not-found at `root`
pub async fn expand_meta_keys<P>(provider: &P, root: &str, field: &str) -> Result<NestedMapping>
where
    P: Provider + ?Sized,
{
    match provider.fetch_scalar(root).await {
        Ok(text) => match decode_mapping(&text) {
            Ok(mapping) => return Ok(mapping),
            Err(err) => debug!(root, error = %err, "value is not a mapping, reading meta keys"),
        },
        Err(err) if err.is_not_found() => {
            debug!(root, "no value at root, reading meta keys");
        }
        Err(err) => return Err(err),
    }

    let base = root.trim_end_matches('/');
    let meta_location = format!("{base}/meta");
    let meta_text = provider.fetch_scalar(&meta_location).await?;
    let meta = decode_mapping(&meta_text).map_err(|err| SecretRefError::InvalidMetadata {
        location: meta_location.clone(),
        message: format!("meta document is not a mapping: {err}"),
    })?;

    let suffixes = child_suffixes(&meta, &meta_location, field)?;

    let mut result = NestedMapping::new();
    for suffix in suffixes {
        let key = suffix.trim_start_matches('/');
        let value = provider.fetch_scalar(&format!("{base}/{key}")).await?;
        result.insert(key.to_string(), Value::String(value));
    }

    debug!(root, keys = result.len(), "expanded meta keys");
    Ok(result)
}

fn child_suffixes<'a>(meta: &'a NestedMapping, location: &str, field: &str) -> Result<Vec<&'a str>> {
    let invalid = |message: String| SecretRefError::InvalidMetadata {
        location: location.to_string(),
        message,
    };

    match meta.get(field) {
        None => Err(SecretRefError::MissingMetadata {
            location: location.to_string(),
            field: field.to_string(),
        }),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| invalid(format!("{field:?} contains a non-string entry: {item}")))
            })
            .collect(),
        Some(other) => Err(invalid(format!(
            "{field:?} must be a sequence of strings, got {}",
            kind_of(other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
