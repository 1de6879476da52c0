//! Schema reference locations
//!
//! A schema reference can be a local file path, a remote URL, or a named
//! in-memory buffer (virtual document). Relative references are resolved
//! against the base path of the referencing document, folding `../` prefixes.

use std::path::{Path, PathBuf};
use url::Url;

/// A schema reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaLocation {
    /// File system path
    Path(PathBuf),
    /// Remote URL (http/https)
    Url(String),
    /// Named in-memory document
    Virtual(String),
}

impl SchemaLocation {
    /// Create a location from a string reference, resolving relative paths
    /// against `base` (the directory of the referencing document)
    pub fn from_reference(reference: &str, base: Option<&str>) -> Self {
        if is_remote(reference) {
            return SchemaLocation::Url(reference.to_string());
        }
        if let Some(base) = base {
            if is_remote(base) {
                // Relative reference inside a remote document
                if let Ok(joined) = Url::parse(base).and_then(|b| b.join(reference)) {
                    return SchemaLocation::Url(joined.to_string());
                }
            }
            if !reference.starts_with('/') {
                return SchemaLocation::Path(resolve_relative(Path::new(base), reference));
            }
        }
        SchemaLocation::Path(PathBuf::from(reference))
    }

    /// The location as a display/cache key string
    pub fn as_str(&self) -> String {
        match self {
            SchemaLocation::Path(p) => p.to_string_lossy().to_string(),
            SchemaLocation::Url(u) => u.clone(),
            SchemaLocation::Virtual(name) => name.clone(),
        }
    }

    /// Check if this is a remote location
    pub fn is_remote(&self) -> bool {
        matches!(self, SchemaLocation::Url(_))
    }

    /// Base string for resolving references found inside this document
    pub fn base(&self) -> Option<String> {
        match self {
            SchemaLocation::Path(p) => p.parent().map(|d| d.to_string_lossy().to_string()),
            SchemaLocation::Url(u) => Some(u.clone()),
            SchemaLocation::Virtual(_) => None,
        }
    }
}

/// Check whether a reference points at a remote resource
pub fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Resolve `reference` against `base_dir`, folding leading `../` components
///
/// `a/b` + `../c` becomes `a/c`.
fn resolve_relative(base_dir: &Path, reference: &str) -> PathBuf {
    let mut base = base_dir.to_path_buf();
    let mut rest = reference;
    while let Some(stripped) = rest.strip_prefix("../") {
        if !base.pop() {
            break;
        }
        rest = stripped;
    }
    base.join(rest)
}
