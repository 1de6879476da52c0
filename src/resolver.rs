//! Schema resolution and on-disk caching
//!
//! Resolves schema references (local paths, virtual documents, remote URLs)
//! to document text. Remote resolution is delegated to a [`SchemaFetcher`]
//! and gated by the `allow_remote_schema_download` switch; successfully
//! fetched documents are persisted in the configured cache directory under a
//! laundered file name so later opens skip the network entirely.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::locations::SchemaLocation;
use crate::names::launder_url;

/// Retrieves remote schema documents
///
/// The crate ships no HTTP client; callers that need real network access
/// implement this trait. The default [`NoFetcher`] treats every URL as
/// unreachable.
pub trait SchemaFetcher {
    /// Fetch the document at `url`
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>>;
}

/// Fetcher that refuses every request
#[derive(Debug, Default)]
pub struct NoFetcher;

impl SchemaFetcher for NoFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>> {
        Err(Error::SchemaNotFound(url.to_string()))
    }
}

/// Resolver for schema references, with per-open memoization
pub struct Resolver {
    allow_remote: bool,
    cache_directory: Option<PathBuf>,
    refresh_cache: bool,
    fetcher: Box<dyn SchemaFetcher>,
    virtual_documents: HashMap<String, String>,
    memoized: HashMap<String, Rc<str>>,
    refreshed: HashSet<String>,
}

impl Resolver {
    /// Create a resolver
    pub fn new(
        allow_remote: bool,
        cache_directory: Option<PathBuf>,
        refresh_cache: bool,
    ) -> Self {
        Self {
            allow_remote,
            cache_directory,
            refresh_cache,
            fetcher: Box::new(NoFetcher),
            virtual_documents: HashMap::new(),
            memoized: HashMap::new(),
            refreshed: HashSet::new(),
        }
    }

    /// Install a fetcher for remote references
    pub fn with_fetcher(mut self, fetcher: Box<dyn SchemaFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Register a named in-memory document
    pub fn add_virtual_document(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.virtual_documents.insert(name.into(), content.into());
    }

    /// Resolve a location to document text
    ///
    /// Results are memoized by location within this resolver, so a schema
    /// graph referencing the same document through several imports reads it
    /// once per open.
    pub fn resolve(&mut self, location: &SchemaLocation) -> Result<Rc<str>> {
        let key = location.as_str();
        if let Some(text) = self.memoized.get(&key) {
            return Ok(Rc::clone(text));
        }

        let text: Rc<str> = match location {
            SchemaLocation::Virtual(name) => self
                .virtual_documents
                .get(name)
                .cloned()
                .map(Rc::from)
                .ok_or_else(|| Error::SchemaNotFound(name.clone()))?,
            SchemaLocation::Path(path) => {
                // Registered virtual documents shadow the filesystem, so
                // schemaLocation references can point at in-memory buffers.
                if let Some(text) = self.virtual_documents.get(path.to_string_lossy().as_ref()) {
                    Rc::from(text.clone())
                } else {
                    tracing::debug!(path = %path.display(), "resolving local schema");
                    Rc::from(
                        fs::read_to_string(path)
                            .map_err(|_| Error::SchemaNotFound(path.to_string_lossy().to_string()))?,
                    )
                }
            }
            SchemaLocation::Url(url) => self.resolve_remote(url)?,
        };

        self.memoized.insert(key, Rc::clone(&text));
        Ok(text)
    }

    fn resolve_remote(&mut self, url: &str) -> Result<Rc<str>> {
        let cached = self
            .cache_directory
            .as_ref()
            .map(|dir| dir.join(launder_url(url)));

        if self.refresh_cache && !self.refreshed.contains(url) {
            // Forced re-fetch: no fallback to a stale cache entry.
            let text = self.fetch(url)?;
            self.refreshed.insert(url.to_string());
            if let Some(path) = &cached {
                self.store_in_cache(path, &text)?;
            }
            return Ok(text);
        }

        if let Some(path) = &cached {
            if let Ok(text) = fs::read_to_string(path) {
                tracing::debug!(url, cache = %path.display(), "using cached schema");
                return Ok(Rc::from(text));
            }
        }

        let text = self.fetch(url)?;
        if let Some(path) = &cached {
            self.store_in_cache(path, &text)?;
        }
        Ok(text)
    }

    fn fetch(&mut self, url: &str) -> Result<Rc<str>> {
        if !self.allow_remote {
            return Err(Error::SchemaNotFound(url.to_string()));
        }
        tracing::debug!(url, "fetching remote schema");
        let bytes = self.fetcher.fetch(url)?;
        Ok(Rc::from(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn store_in_cache(&self, path: &PathBuf, text: &str) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Write through a temp file so a partial download never becomes a
        // cache entry.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        tracing::debug!(cache = %path.display(), "stored schema in cache");
        Ok(())
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("allow_remote", &self.allow_remote)
            .field("cache_directory", &self.cache_directory)
            .field("refresh_cache", &self.refresh_cache)
            .field("virtual_documents", &self.virtual_documents.len())
            .field("memoized", &self.memoized.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc as StdRc;
    use tempfile::{NamedTempFile, TempDir};

    /// Fetcher serving a fixed body and counting invocations
    struct CountingFetcher {
        body: Option<String>,
        count: StdRc<RefCell<usize>>,
    }

    impl SchemaFetcher for CountingFetcher {
        fn fetch(&mut self, url: &str) -> Result<Vec<u8>> {
            *self.count.borrow_mut() += 1;
            match &self.body {
                Some(body) => Ok(body.clone().into_bytes()),
                None => Err(Error::SchemaNotFound(url.to_string())),
            }
        }
    }

    fn counting(body: Option<&str>) -> (CountingFetcher, StdRc<RefCell<usize>>) {
        let count = StdRc::new(RefCell::new(0));
        (
            CountingFetcher {
                body: body.map(|s| s.to_string()),
                count: StdRc::clone(&count),
            },
            count,
        )
    }

    #[test]
    fn test_resolve_local_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "<xs:schema/>").unwrap();

        let mut resolver = Resolver::new(true, None, false);
        let text = resolver
            .resolve(&SchemaLocation::Path(file.path().to_path_buf()))
            .unwrap();
        assert!(text.contains("<xs:schema/>"));
    }

    #[test]
    fn test_resolve_missing_file() {
        let mut resolver = Resolver::new(true, None, false);
        let err = resolver
            .resolve(&SchemaLocation::Path(PathBuf::from("/nonexistent/x.xsd")))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound(_)));
    }

    #[test]
    fn test_resolve_virtual() {
        let mut resolver = Resolver::new(true, None, false);
        resolver.add_virtual_document("mem:a.xsd", "<xs:schema/>");
        let text = resolver
            .resolve(&SchemaLocation::Virtual("mem:a.xsd".to_string()))
            .unwrap();
        assert_eq!(&*text, "<xs:schema/>");

        let err = resolver
            .resolve(&SchemaLocation::Virtual("mem:missing.xsd".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound(_)));
    }

    #[test]
    fn test_remote_disabled() {
        let (fetcher, count) = counting(Some("<xs:schema/>"));
        let mut resolver = Resolver::new(false, None, false).with_fetcher(Box::new(fetcher));
        let err = resolver
            .resolve(&SchemaLocation::Url("http://example.com/a.xsd".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound(_)));
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_cache_population_and_reuse() {
        let dir = TempDir::new().unwrap();
        let url = "http://example.com/a.xsd";

        let (fetcher, count) = counting(Some("<xs:schema/>"));
        let mut resolver = Resolver::new(true, Some(dir.path().to_path_buf()), false)
            .with_fetcher(Box::new(fetcher));
        resolver
            .resolve(&SchemaLocation::Url(url.to_string()))
            .unwrap();
        assert_eq!(*count.borrow(), 1);
        assert!(dir.path().join(launder_url(url)).exists());

        // Second resolver (second open): cache hit, no fetch.
        let (fetcher, count) = counting(None);
        let mut resolver = Resolver::new(true, Some(dir.path().to_path_buf()), false)
            .with_fetcher(Box::new(fetcher));
        let text = resolver
            .resolve(&SchemaLocation::Url(url.to_string()))
            .unwrap();
        assert_eq!(&*text, "<xs:schema/>");
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_refresh_cache_refetches() {
        let dir = TempDir::new().unwrap();
        let url = "http://example.com/a.xsd";
        fs::write(dir.path().join(launder_url(url)), "<xs:schema version='old'/>").unwrap();

        let (fetcher, count) = counting(Some("<xs:schema version='new'/>"));
        let mut resolver = Resolver::new(true, Some(dir.path().to_path_buf()), true)
            .with_fetcher(Box::new(fetcher));
        let text = resolver
            .resolve(&SchemaLocation::Url(url.to_string()))
            .unwrap();
        assert!(text.contains("new"));
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_refresh_cache_no_stale_fallback() {
        let dir = TempDir::new().unwrap();
        let url = "http://example.com/a.xsd";
        fs::write(dir.path().join(launder_url(url)), "<xs:schema version='old'/>").unwrap();

        // Fetcher fails: the stale entry must NOT be served.
        let (fetcher, _count) = counting(None);
        let mut resolver = Resolver::new(true, Some(dir.path().to_path_buf()), true)
            .with_fetcher(Box::new(fetcher));
        let err = resolver
            .resolve(&SchemaLocation::Url(url.to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound(_)));
    }

    #[test]
    fn test_deleted_cache_entry_refetches() {
        let dir = TempDir::new().unwrap();
        let url = "http://example.com/a.xsd";

        let (fetcher, count) = counting(Some("<xs:schema/>"));
        let mut resolver = Resolver::new(true, Some(dir.path().to_path_buf()), false)
            .with_fetcher(Box::new(fetcher));
        resolver
            .resolve(&SchemaLocation::Url(url.to_string()))
            .unwrap();
        assert_eq!(*count.borrow(), 1);

        fs::remove_file(dir.path().join(launder_url(url))).unwrap();

        let (fetcher, count) = counting(Some("<xs:schema/>"));
        let mut resolver = Resolver::new(true, Some(dir.path().to_path_buf()), false)
            .with_fetcher(Box::new(fetcher));
        resolver
            .resolve(&SchemaLocation::Url(url.to_string()))
            .unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_memoization_within_open() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "<xs:schema/>").unwrap();
        let loc = SchemaLocation::Path(file.path().to_path_buf());

        let mut resolver = Resolver::new(true, None, false);
        let a = resolver.resolve(&loc).unwrap();
        let b = resolver.resolve(&loc).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }
}
