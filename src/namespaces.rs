//! XML namespace handling
//!
//! Qualified names, prefix tables for rule sets, and the URI-to-prefix map
//! the model builder accumulates while walking schema documents. Generated
//! table and column names use that map whenever disambiguation is needed.

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Qualified name (QName) - combination of namespace and local name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace URI (None for no namespace)
    pub namespace: Option<String>,
    /// Local name
    pub local_name: String,
}

impl QName {
    /// Create a new QName
    pub fn new(namespace: Option<impl Into<String>>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(|s| s.into()),
            local_name: local_name.into(),
        }
    }

    /// Create a QName without a namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local_name: local_name.into(),
        }
    }

    /// Create a QName with a namespace
    pub fn namespaced(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local_name: local_name.into(),
        }
    }

    /// Clark notation: `{namespace}local`
    pub fn clark(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{}}}{}", ns, self.local_name),
            None => self.local_name.clone(),
        }
    }
}

/// Prefix table declared alongside a rule set
///
/// Maps prefixes to namespace URIs. Redeclaring a prefix to a different URI
/// is rejected; redeclaring it to the same URI is a no-op.
#[derive(Debug, Clone, Default)]
pub struct PrefixTable {
    prefixes: IndexMap<String, String>,
}

impl PrefixTable {
    /// Create an empty prefix table
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a prefix
    pub fn declare(&mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Result<()> {
        let prefix = prefix.into();
        let uri = uri.into();
        if let Some(existing) = self.prefixes.get(&prefix) {
            if *existing != uri {
                return Err(Error::PrefixAlreadyMapped {
                    prefix,
                    existing: existing.clone(),
                    attempted: uri,
                });
            }
            return Ok(());
        }
        self.prefixes.insert(prefix, uri);
        Ok(())
    }

    /// URI bound to a prefix
    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(|s| s.as_str())
    }

    /// Whether the table declares anything
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

/// URI-to-prefix map built while walking schema documents
///
/// The first prefix observed for a URI wins; URIs that only ever appear with
/// the default (empty) prefix get a generated `ns<N>` prefix so every
/// namespace has a usable identifier for disambiguation.
#[derive(Debug, Clone, Default)]
pub struct UriPrefixMap {
    by_uri: IndexMap<String, String>,
}

impl UriPrefixMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a URI with a preferred prefix
    pub fn register(&mut self, uri: &str, preferred_prefix: Option<&str>) {
        if self.by_uri.contains_key(uri) {
            // Upgrade a generated prefix to a declared one.
            if let Some(p) = preferred_prefix {
                let current = self.by_uri.get(uri).unwrap();
                if current.starts_with("ns") && current[2..].parse::<usize>().is_ok() {
                    let p = p.to_string();
                    if !self.by_uri.values().any(|v| *v == p) {
                        self.by_uri.insert(uri.to_string(), p);
                    }
                }
            }
            return;
        }
        let prefix = match preferred_prefix {
            Some(p) if !p.is_empty() && !self.by_uri.values().any(|v| v == p) => p.to_string(),
            _ => format!("ns{}", self.by_uri.len() + 1),
        };
        self.by_uri.insert(uri.to_string(), prefix);
    }

    /// Prefix for a URI
    pub fn prefix(&self, uri: &str) -> Option<&str> {
        self.by_uri.get(uri).map(|s| s.as_str())
    }

    /// Iterate over (uri, prefix) pairs in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_uri.iter().map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Build the prefixed form of a name: `prefix:local`, or `local` when the
    /// URI is unknown or absent
    pub fn qualify(&self, uri: Option<&str>, local: &str) -> String {
        match uri.and_then(|u| self.prefix(u)) {
            Some(prefix) => format!("{}:{}", prefix, local),
            None => local.to_string(),
        }
    }
}
