//! # xmltab
//!
//! Schema-driven mapping of XML instance documents to relational tables.
//!
//! Given an XML Schema (XSD), `xmltab` derives a relational schema — one
//! table per complex type worth instantiating, one column per attribute or
//! simple element — and then stream-parses conforming instance documents
//! into rows of those tables. No document-type-specific code is involved:
//! the schema drives everything, including nested child tables, junction
//! tables for substitution groups, link fields for ID/IDREF and
//! `xlink:href` references, and GML geometry columns.
//!
//! ## Example
//!
//! ```rust,ignore
//! use xmltab::dataset::{Dataset, DatasetSource};
//! use xmltab::config::Configuration;
//! use xmltab::diagnostics::CollectingSink;
//!
//! let sink = CollectingSink::shared();
//! let ds = Dataset::open(
//!     DatasetSource::from_instance_path("data/features.xml"),
//!     Configuration::default(),
//!     sink.clone(),
//! )?;
//! for layer in ds.layers() {
//!     for feature in ds.layer_features(&layer.name)? {
//!         println!("{}: {:?}", feature.pkid, feature.values());
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;
pub mod limits;

// Utilities
pub mod diagnostics;
pub mod names;
pub mod namespaces;

// Resource loading
pub mod locations;
pub mod resolver;

// Pattern matching and configuration
pub mod config;
pub mod xpath;

// Relational model and values
pub mod geometry;
pub mod model;
pub mod value;

// Instance mapping
pub mod reader;
pub mod validation;

// Dataset assembly
pub mod dataset;

// Re-exports for convenience
pub use error::{Error, Result};

/// Version of the xmltab library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// XSD namespace
pub const XS_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// XML Schema instance namespace
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// XMLNS namespace
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// XLink namespace
pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

/// GML namespace (GML 2 / 3.1)
pub const GML_NAMESPACE: &str = "http://www.opengis.net/gml";

/// GML 3.2 namespace
pub const GML32_NAMESPACE: &str = "http://www.opengis.net/gml/3.2";

/// Returns true if the URI is one of the GML namespaces.
pub fn is_gml_namespace(uri: &str) -> bool {
    uri == GML_NAMESPACE || uri == GML32_NAMESPACE || uri.starts_with("http://www.opengis.net/gml/")
}
