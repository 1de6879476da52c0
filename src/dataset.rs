//! The open operation and the resulting dataset
//!
//! Ties the resolver, model builder, validation adapter, and instance mapper
//! together: one [`Dataset::open`] call derives the relational schema and
//! exposes its tables. Reading features streams the instance document anew
//! for each pass (forward-only, restartable by re-opening).

use std::path::{Path, PathBuf};
use std::rc::Rc;

use quick_xml::events::Event;
use quick_xml::name::{Namespace, QName, ResolveResult};
use quick_xml::reader::NsReader;

use crate::config::Configuration;
use crate::diagnostics::SharedSink;
use crate::error::{Error, Result};
use crate::locations::SchemaLocation;
use crate::model::builder::build_model;
use crate::model::{
    ClassCategory, ClassId, Feature, SchemaModel, FIELDS_METADATA_LAYER, LAYERS_METADATA_LAYER,
};
use crate::reader::{InstanceReader, InstanceSource};
use crate::resolver::Resolver;
use crate::validation;
use crate::value::Value;
use crate::XSI_NAMESPACE;

/// Sentinel class handle for synthesized metadata rows
pub const METADATA_CLASS: ClassId = ClassId(usize::MAX);

/// What to open: an instance document, explicit schemas, or both
#[derive(Debug, Clone, Default)]
pub struct DatasetSource {
    /// The instance document, if any
    pub instance: Option<InstanceSource>,
    /// Explicit schema references (schema-only mode when no instance)
    pub schemas: Vec<SchemaLocation>,
}

impl DatasetSource {
    /// Open an instance document on disk
    pub fn from_instance_path(path: impl Into<PathBuf>) -> Self {
        Self {
            instance: Some(InstanceSource::Path(path.into())),
            schemas: Vec::new(),
        }
    }

    /// Open an in-memory instance document
    pub fn from_instance_memory(text: impl Into<String>) -> Self {
        Self {
            instance: Some(InstanceSource::Memory(text.into())),
            schemas: Vec::new(),
        }
    }

    /// Schema-only mode
    pub fn schema_only(location: SchemaLocation) -> Self {
        Self {
            instance: None,
            schemas: vec![location],
        }
    }

    /// Add an explicit schema reference
    pub fn with_schema(mut self, location: SchemaLocation) -> Self {
        self.schemas.push(location);
        self
    }
}

/// Kind of an output table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// A table derived from the schema
    Class,
    /// The fields reflection table
    FieldsMetadata,
    /// The layers reflection table
    LayersMetadata,
}

/// One output table
#[derive(Debug, Clone)]
pub struct Layer {
    /// Table name
    pub name: String,
    /// Backing class, for `LayerKind::Class`
    pub class: Option<ClassId>,
    /// Table kind
    pub kind: LayerKind,
}

/// An opened dataset
pub struct Dataset {
    model: Rc<SchemaModel>,
    config: Configuration,
    instance: Option<InstanceSource>,
    sink: SharedSink,
}

impl Dataset {
    /// Open a dataset with a resolver derived from the configuration
    pub fn open(source: DatasetSource, config: Configuration, sink: SharedSink) -> Result<Self> {
        let resolver = Resolver::new(
            config.allow_remote_schema_download,
            config.schema_cache_directory.clone(),
            config.refresh_cache,
        );
        Self::open_with_resolver(source, config, resolver, sink)
    }

    /// Open a dataset with a caller-provided resolver (custom fetcher,
    /// virtual documents)
    pub fn open_with_resolver(
        source: DatasetSource,
        config: Configuration,
        mut resolver: Resolver,
        sink: SharedSink,
    ) -> Result<Self> {
        let mut schemas = source.schemas.clone();
        if schemas.is_empty() {
            let instance = source.instance.as_ref().ok_or_else(|| {
                Error::ConfigurationInvalid(
                    "XSD must be provided when no XML data file is passed".to_string(),
                )
            })?;
            schemas = schema_locations_of(instance)?;
            if schemas.is_empty() {
                return Err(Error::ConfigurationInvalid(
                    "No schema locations found when analyzing data file: \
                     XSD must be provided"
                        .to_string(),
                ));
            }
        }

        let model = Rc::new(build_model(&schemas, &mut resolver, &config)?);
        tracing::debug!(classes = model.len(), "schema model built");

        if config.validate {
            if let Some(instance) = &source.instance {
                let errors = validation::validate(&model, &config, instance, &sink)?;
                validation::escalate(errors, config.fail_if_validation_error)?;
            }
            // Schema-only validation is a legal no-op.
        }

        Ok(Self {
            model,
            config,
            instance: source.instance,
            sink,
        })
    }

    /// The built model
    pub fn model(&self) -> &SchemaModel {
        &self.model
    }

    /// The effective configuration of this open
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Output tables, metadata tables included when exposed
    pub fn layers(&self) -> Vec<Layer> {
        let mut layers: Vec<Layer> = self
            .model
            .classes()
            .map(|(id, class)| Layer {
                name: class.name.clone(),
                class: Some(id),
                kind: LayerKind::Class,
            })
            .collect();
        if self.config.expose_metadata_layers {
            layers.push(Layer {
                name: FIELDS_METADATA_LAYER.to_string(),
                class: None,
                kind: LayerKind::FieldsMetadata,
            });
            layers.push(Layer {
                name: LAYERS_METADATA_LAYER.to_string(),
                class: None,
                kind: LayerKind::LayersMetadata,
            });
        }
        layers
    }

    /// Find a layer by name
    pub fn layer(&self, name: &str) -> Option<Layer> {
        self.layers().into_iter().find(|l| l.name == name)
    }

    /// A fresh streaming reader over the instance document
    pub fn reader(&self) -> Result<InstanceReader> {
        let instance = self.instance.as_ref().ok_or_else(|| {
            Error::ConfigurationInvalid("no instance document to read".to_string())
        })?;
        InstanceReader::new(
            Rc::clone(&self.model),
            &self.config,
            instance,
            Rc::clone(&self.sink),
        )
    }

    /// Materialize all features of one table
    ///
    /// Metadata tables are synthesized from the model; class tables stream
    /// the instance document. A schema-only dataset has empty class tables.
    pub fn layer_features(&self, name: &str) -> Result<Vec<Feature>> {
        match self.layer(name) {
            Some(Layer {
                kind: LayerKind::FieldsMetadata,
                ..
            }) => Ok(self.fields_metadata_features()),
            Some(Layer {
                kind: LayerKind::LayersMetadata,
                ..
            }) => Ok(self.layers_metadata_features()),
            Some(Layer {
                class: Some(class_id),
                ..
            }) => {
                if self.instance.is_none() {
                    return Ok(Vec::new());
                }
                let mut reader = self.reader()?;
                let mut features = Vec::new();
                while let Some(feature) = reader.next_feature()? {
                    if feature.class == class_id {
                        features.push(feature);
                    }
                }
                Ok(features)
            }
            _ => Err(Error::ConfigurationInvalid(format!(
                "no layer named '{}'",
                name
            ))),
        }
    }

    fn fields_metadata_features(&self) -> Vec<Feature> {
        self.model
            .fields_metadata()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let mut feature = Feature::new(METADATA_CLASS);
                feature.pkid = format!("{}_{}", FIELDS_METADATA_LAYER, i + 1);
                feature.set("layer_name", Value::String(row.layer_name));
                feature.set("field_name", Value::String(row.field_name));
                feature.set("field_xpath", Value::String(row.field_xpath));
                feature.set("field_type", Value::String(row.field_type));
                feature.set("field_category", Value::String(row.field_category));
                feature
            })
            .collect()
    }

    fn layers_metadata_features(&self) -> Vec<Feature> {
        self.model
            .layers_metadata()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let mut feature = Feature::new(METADATA_CLASS);
                feature.pkid = format!("{}_{}", LAYERS_METADATA_LAYER, i + 1);
                feature.set("layer_name", Value::String(row.layer_name));
                feature.set("layer_xpath", Value::String(row.layer_xpath));
                feature.set("layer_category", Value::String(row.layer_category));
                feature
            })
            .collect()
    }

    /// Tables that hold rows contained by the given table (containment)
    pub fn child_layers(&self, parent: ClassId) -> Vec<ClassId> {
        self.model
            .classes()
            .filter(|(_, class)| {
                class.category == ClassCategory::Nested && class.parent == Some(parent)
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// Read `xsi:schemaLocation` pairs from the instance document's root element
fn schema_locations_of(instance: &InstanceSource) -> Result<Vec<SchemaLocation>> {
    let base = match instance {
        InstanceSource::Path(path) => Path::new(path)
            .parent()
            .map(|d| d.to_string_lossy().to_string()),
        InstanceSource::Memory(_) => None,
    };

    let stream = instance.open()?;
    let mut xml = NsReader::from_reader(stream);
    let mut buf = Vec::new();
    // (raw key bytes, value) pairs of the root element's attributes
    let root_attrs: Vec<(Vec<u8>, String)> = loop {
        let attrs = match xml.read_resolved_event_into(&mut buf) {
            Err(e) => return Err(Error::MalformedDocument(e.to_string())),
            Ok((_, Event::Start(ref start))) | Ok((_, Event::Empty(ref start))) => {
                Some(
                    start
                        .attributes()
                        .flatten()
                        .map(|a| {
                            (
                                a.key.as_ref().to_vec(),
                                String::from_utf8_lossy(&a.value).into_owned(),
                            )
                        })
                        .collect(),
                )
            }
            Ok((_, Event::Eof)) => {
                return Err(Error::MalformedDocument(
                    "document has no root element".to_string(),
                ))
            }
            Ok(_) => None,
        };
        if let Some(attrs) = attrs {
            break attrs;
        }
        buf.clear();
    };

    let mut locations = Vec::new();
    for (key, value) in &root_attrs {
        let (attr_ns, attr_local) = xml.resolve_attribute(QName(key));
        let is_xsi = matches!(
            attr_ns,
            ResolveResult::Bound(Namespace(uri)) if uri == XSI_NAMESPACE.as_bytes()
        );
        if !is_xsi {
            continue;
        }
        match attr_local.as_ref() {
            b"schemaLocation" => {
                // Whitespace-separated (namespace, location) pairs.
                let tokens: Vec<&str> = value.split_whitespace().collect();
                for pair in tokens.chunks(2) {
                    if let [_, location] = pair {
                        locations.push(SchemaLocation::from_reference(location, base.as_deref()));
                    }
                }
            }
            b"noNamespaceSchemaLocation" => {
                locations.push(SchemaLocation::from_reference(value, base.as_deref()));
            }
            _ => {}
        }
    }
    Ok(locations)
}
