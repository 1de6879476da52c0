//! Effective configuration
//!
//! Combines built-in defaults, an optional declarative XML configuration
//! document, and per-open key/value overrides into one immutable snapshot
//! consumed by the model builder and the instance mapper. The snapshot is
//! valid for the lifetime of one open operation and never persisted.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::geometry::SwapCoordinates;
use crate::limits::Limits;
use crate::xpath::XPathRuleSet;

/// The merged behavior toggles for one open operation
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Repeated simple elements become array fields instead of child tables
    pub use_arrays: bool,
    /// Emit a raw-XML shadow field next to each geometry field
    pub include_geometry_xml: bool,
    /// Expose the XPath reflection tables as regular output tables
    pub expose_metadata_layers: bool,
    /// Axis-order policy for geometry extraction
    pub swap_coordinates: SwapCoordinates,
    /// Run schema validation while opening
    pub validate: bool,
    /// Escalate validation diagnostics into an open failure
    pub fail_if_validation_error: bool,
    /// Allow resolving remote schema references
    pub allow_remote_schema_download: bool,
    /// Cache directory for resolved remote schemas (unset: no caching)
    pub schema_cache_directory: Option<PathBuf>,
    /// Force re-fetch of remote schemas regardless of cache contents
    pub refresh_cache: bool,
    /// Instantiate every global element as a top-level table, not only the
    /// ones substitutable for an abstract feature head
    pub instantiate_all_top_level: bool,
    /// Field exclusion rules
    pub ignored_xpaths: XPathRuleSet,
    /// Resource limits
    pub limits: Limits,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            use_arrays: true,
            include_geometry_xml: false,
            expose_metadata_layers: false,
            swap_coordinates: SwapCoordinates::Auto,
            validate: false,
            fail_if_validation_error: false,
            allow_remote_schema_download: true,
            schema_cache_directory: None,
            refresh_cache: false,
            instantiate_all_top_level: false,
            ignored_xpaths: XPathRuleSet::new(),
            limits: Limits::default(),
        }
    }
}

impl Configuration {
    /// Defaults, then the declarative document (if any), then the overrides
    pub fn merge(document: Option<&str>, overrides: &[(String, String)]) -> Result<Self> {
        let mut config = match document {
            Some(text) => Self::from_document(text)?,
            None => Self::default(),
        };
        config.apply_overrides(overrides)?;
        Ok(config)
    }

    /// Parse a declarative `<Configuration>` document
    pub fn from_document(text: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(text)
            .map_err(|e| Error::ConfigurationInvalid(format!("cannot parse configuration: {}", e)))?;
        let root = doc.root_element();
        if root.tag_name().name() != "Configuration" {
            return Err(Error::ConfigurationInvalid(format!(
                "expected a Configuration document, got '{}'",
                root.tag_name().name()
            )));
        }

        let mut config = Self::default();

        if let Some(v) = element_text(&root, &["AllowRemoteSchemaDownload"]) {
            config.allow_remote_schema_download = parse_bool(&v)?;
        }
        if let Some(v) = element_text(&root, &["SchemaCache", "Directory"]) {
            if !v.is_empty() {
                config.schema_cache_directory = Some(PathBuf::from(v));
            }
        }
        if let Some(v) = element_text(&root, &["Validation", "enabled"]) {
            config.validate = parse_bool(&v)?;
        }
        if let Some(v) = element_text(&root, &["Validation", "FailIfError"]) {
            config.fail_if_validation_error = parse_bool(&v)?;
        }
        if let Some(v) = element_text(&root, &["ExposeMetadataLayers"]) {
            config.expose_metadata_layers = parse_bool(&v)?;
        }
        if let Some(v) = element_text(&root, &["LayerBuildingRules", "UseArrays"]) {
            config.use_arrays = parse_bool(&v)?;
        }
        if let Some(v) = element_text(&root, &["LayerBuildingRules", "SwapCoordinates"]) {
            config.swap_coordinates = parse_swap(&v)?;
        }
        if let Some(v) = element_text(&root, &["LayerBuildingRules", "GML", "IncludeGeometryXML"]) {
            config.include_geometry_xml = parse_bool(&v)?;
        }
        if let Some(v) =
            element_text(&root, &["LayerBuildingRules", "GML", "InstantiateGMLFeaturesOnly"])
        {
            config.instantiate_all_top_level = !parse_bool(&v)?;
        }

        if let Some(ignored) = find_element(&root, &["IgnoredXPaths"]) {
            if let Some(v) = element_text(&ignored, &["WarnIfIgnoredXPathFoundInDocInstance"]) {
                config.ignored_xpaths.default_warn = parse_bool(&v)?;
            }
            if let Some(namespaces) = find_element(&ignored, &["Namespaces"]) {
                for ns in namespaces
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == "Namespace")
                {
                    let prefix = ns.attribute("prefix").unwrap_or_default();
                    let uri = ns.attribute("uri").unwrap_or_default();
                    if !prefix.is_empty() && !uri.is_empty() {
                        config.ignored_xpaths.declare_prefix(prefix, uri)?;
                    }
                }
            }
            for xpath in ignored
                .children()
                .filter(|n| n.is_element() && n.tag_name().name() == "XPath")
            {
                let pattern = xpath.text().unwrap_or_default().trim().to_string();
                let warn = match xpath.attribute("warnIfIgnoredXPathFoundInDocInstance") {
                    Some(v) => Some(parse_bool(v)?),
                    None => None,
                };
                config.ignored_xpaths.add_rule(&pattern, warn)?;
            }
        }

        Ok(config)
    }

    /// Apply per-open key/value overrides on top of the current state
    ///
    /// Unknown keys are logged and skipped; unparsable values are a
    /// configuration error.
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<()> {
        for (key, value) in overrides {
            match key.to_ascii_uppercase().as_str() {
                "USE_ARRAYS" => self.use_arrays = parse_bool(value)?,
                "INCLUDE_GEOMETRY_XML" => self.include_geometry_xml = parse_bool(value)?,
                "EXPOSE_METADATA_LAYERS" => self.expose_metadata_layers = parse_bool(value)?,
                "SWAP_COORDINATES" => self.swap_coordinates = parse_swap(value)?,
                "VALIDATE" => self.validate = parse_bool(value)?,
                "FAIL_IF_VALIDATION_ERROR" => self.fail_if_validation_error = parse_bool(value)?,
                "ALLOW_REMOTE_SCHEMA_DOWNLOAD" => {
                    self.allow_remote_schema_download = parse_bool(value)?
                }
                "SCHEMA_CACHE_DIRECTORY" => {
                    self.schema_cache_directory = Some(PathBuf::from(value))
                }
                "REFRESH_CACHE" => self.refresh_cache = parse_bool(value)?,
                "INSTANTIATE_ALL_TOP_LEVEL" => self.instantiate_all_top_level = parse_bool(value)?,
                other => {
                    tracing::warn!(key = other, "ignoring unknown configuration key");
                }
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_uppercase().as_str() {
        "TRUE" | "YES" | "ON" | "1" => Ok(true),
        "FALSE" | "NO" | "OFF" | "0" => Ok(false),
        other => Err(Error::ConfigurationInvalid(format!(
            "'{}' is not a valid boolean",
            other
        ))),
    }
}

fn parse_swap(value: &str) -> Result<SwapCoordinates> {
    match value.to_ascii_uppercase().as_str() {
        "AUTO" => Ok(SwapCoordinates::Auto),
        "TRUE" | "YES" | "ON" | "1" => Ok(SwapCoordinates::Yes),
        "FALSE" | "NO" | "OFF" | "0" => Ok(SwapCoordinates::No),
        other => Err(Error::ConfigurationInvalid(format!(
            "'{}' is not a valid coordinate swap policy",
            other
        ))),
    }
}

fn find_element<'a>(root: &roxmltree::Node<'a, 'a>, path: &[&str]) -> Option<roxmltree::Node<'a, 'a>> {
    let mut node = *root;
    for name in path {
        node = node
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == *name)?;
    }
    Some(node)
}

fn element_text(root: &roxmltree::Node, path: &[&str]) -> Option<String> {
    find_element(root, path).map(|n| n.text().unwrap_or_default().trim().to_string())
}
