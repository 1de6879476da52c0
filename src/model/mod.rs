//! The derived relational model
//!
//! One [`SchemaClass`] per derived table, held in an arena addressed by
//! [`ClassId`] so the inherently cyclic schema graph needs no ownership
//! cycles. Classes are immutable once the builder finishes. Assembled rows
//! are [`Feature`]s.

pub mod builder;

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::geometry::GeometryKind;
use crate::namespaces::{QName, UriPrefixMap};
use crate::value::{FieldType, Value};

/// Name of the generated primary key column
pub const PKID_FIELD: &str = "ogr_pkid";

/// Name of the containment foreign key column on child tables
pub const PARENT_PKID_FIELD: &str = "parent_ogr_pkid";

/// Name of the parent key column on junction tables
pub const JUNCTION_PARENT_FIELD: &str = "parent_pkid";

/// Name of the child key column on junction tables
pub const JUNCTION_CHILD_FIELD: &str = "child_pkid";

/// Name of the fields reflection table
pub const FIELDS_METADATA_LAYER: &str = "_ogr_fields_metadata";

/// Name of the layers reflection table
pub const LAYERS_METADATA_LAYER: &str = "_ogr_layers_metadata";

/// Stable handle of a class within its [`SchemaModel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub usize);

/// What kind of table a class is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassCategory {
    /// Feature table for a top-level element
    TopLevel,
    /// Child table for repeated nested content, linked via containment
    Nested,
    /// Junction table between a parent table and an independently
    /// identified child table
    Junction,
}

impl ClassCategory {
    /// Short lowercase name used in metadata rows
    pub fn name(&self) -> &'static str {
        match self {
            ClassCategory::TopLevel => "top_level",
            ClassCategory::Nested => "nested",
            ClassCategory::Junction => "junction",
        }
    }
}

/// How a field materializes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    /// Instantiated as a column
    Regular,
    /// Not instantiated; the matching element is stored in a child table
    /// that references back to this table
    PathToChildElement,
    /// Column storing the pkid of a row in another table
    PathToChildElementWithLink,
    /// Not instantiated; occurrences create junction-table rows
    PathToChildElementWithJunction,
}

/// Maximum occurrence count of a particle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurs {
    /// A finite bound
    Bounded(u32),
    /// `maxOccurs="unbounded"`
    Unbounded,
}

impl Occurs {
    /// Whether more than one occurrence is allowed
    pub fn is_repeated(&self) -> bool {
        match self {
            Occurs::Bounded(n) => *n > 1,
            Occurs::Unbounded => true,
        }
    }
}

/// Geometry-specific attributes of a field
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryInfo {
    /// Geometry kind, `Unknown` when several kinds are possible at the XPath
    pub kind: GeometryKind,
    /// Declared coordinate reference system, when determinable
    pub srs: Option<String>,
}

/// One scalar, array, geometry, or relationship-bearing column
#[derive(Debug, Clone)]
pub struct Field {
    /// Column name, unique within the class
    pub name: String,
    /// Exact XPath of the originating XSD attribute/element, unique within
    /// the class
    pub xpath: String,
    /// Declared type
    pub field_type: FieldType,
    /// How the field materializes
    pub category: FieldCategory,
    /// Array-valued (repeated simple content folded into one column)
    pub array: bool,
    /// Minimum number of occurrences
    pub min_occurs: u32,
    /// Maximum number of occurrences
    pub max_occurs: Occurs,
    /// Declared non-nullable (`use="required"` / `minOccurs >= 1`)
    pub not_nullable: bool,
    /// Represents an ID/IDREF or `xlink:href` relationship
    pub is_link: bool,
    /// Excluded by an ignore rule; never materialized
    pub ignored: bool,
    /// Value of a `fixed=""` attribute
    pub fixed_value: Option<String>,
    /// Value of a `default=""` attribute
    pub default_value: Option<String>,
    /// Geometry attributes for geometry-valued fields
    pub geometry: Option<GeometryInfo>,
    /// XPath of the related class for link/junction/child fields
    pub related_class_xpath: Option<String>,
    /// XPath of the abstract head element, for junction fields
    pub abstract_element_xpath: Option<String>,
}

impl Field {
    /// Create a regular field
    pub fn new(name: impl Into<String>, xpath: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            xpath: xpath.into(),
            field_type,
            category: FieldCategory::Regular,
            array: false,
            min_occurs: 0,
            max_occurs: Occurs::Bounded(1),
            not_nullable: false,
            is_link: false,
            ignored: false,
            fixed_value: None,
            default_value: None,
            geometry: None,
            related_class_xpath: None,
            abstract_element_xpath: None,
        }
    }

    /// Whether the field produces a column
    pub fn is_materialized(&self) -> bool {
        !self.ignored
            && matches!(
                self.category,
                FieldCategory::Regular | FieldCategory::PathToChildElementWithLink
            )
    }
}

/// One derived table
#[derive(Debug, Clone)]
pub struct SchemaClass {
    /// Disambiguated table name
    pub name: String,
    /// Qualified name of the originating element
    pub qname: QName,
    /// XPath of the class's element (prefixed segments)
    pub xpath: String,
    /// Table kind
    pub category: ClassCategory,
    /// Ordered fields
    pub fields: Vec<Field>,
    /// Containment parent, for nested classes
    pub parent: Option<ClassId>,
    /// XPath of the parent table's element, for junction tables
    pub parent_xpath: Option<String>,
    /// XPath of the child table's element, for junction tables
    pub child_xpath: Option<String>,
    /// Index of the field holding the document-provided identifier, if any
    pub id_field: Option<usize>,
}

impl SchemaClass {
    /// Create a class with no fields
    pub fn new(
        name: impl Into<String>,
        qname: QName,
        xpath: impl Into<String>,
        category: ClassCategory,
    ) -> Self {
        Self {
            name: name.into(),
            qname,
            xpath: xpath.into(),
            category,
            fields: Vec::new(),
            parent: None,
            parent_xpath: None,
            child_xpath: None,
            id_field: None,
        }
    }

    /// Find a field by its exact XPath
    pub fn field_by_xpath(&self, xpath: &str) -> Option<(usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.xpath == xpath)
    }

    /// Find a field by name
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The materialized fields, in declaration order
    pub fn columns(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_materialized())
    }
}

/// One row of metadata in the fields reflection table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMetadataRow {
    /// Owning table name
    pub layer_name: String,
    /// Column name
    pub field_name: String,
    /// Exact source XPath
    pub field_xpath: String,
    /// Declared type name
    pub field_type: String,
    /// Field category name
    pub field_category: String,
}

/// One row of metadata in the layers reflection table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerMetadataRow {
    /// Table name
    pub layer_name: String,
    /// XPath of the table's element
    pub layer_xpath: String,
    /// Table category name
    pub layer_category: String,
}

/// The immutable arena of derived classes
#[derive(Debug, Default)]
pub struct SchemaModel {
    classes: Vec<SchemaClass>,
    /// URI→prefix map discovered while walking the schema graph
    pub prefixes: UriPrefixMap,
    by_xpath: HashMap<String, ClassId>,
    by_name: HashMap<String, ClassId>,
}

impl SchemaModel {
    /// Assemble the arena; called once by the builder
    pub fn new(classes: Vec<SchemaClass>, prefixes: UriPrefixMap) -> Self {
        let mut by_xpath = HashMap::new();
        let mut by_name = HashMap::new();
        for (i, class) in classes.iter().enumerate() {
            by_xpath.insert(class.xpath.clone(), ClassId(i));
            by_name.insert(class.name.clone(), ClassId(i));
        }
        Self {
            classes,
            prefixes,
            by_xpath,
            by_name,
        }
    }

    /// Class by handle
    pub fn class(&self, id: ClassId) -> &SchemaClass {
        &self.classes[id.0]
    }

    /// All classes in creation order
    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &SchemaClass)> {
        self.classes.iter().enumerate().map(|(i, c)| (ClassId(i), c))
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the model is empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class whose element XPath equals `xpath`
    pub fn class_by_xpath(&self, xpath: &str) -> Option<ClassId> {
        self.by_xpath.get(xpath).copied()
    }

    /// Class by table name
    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// Set a class's containment parent (builder fix-up once every class
    /// has a handle)
    pub(crate) fn set_parent(&mut self, class_idx: usize, parent: ClassId) {
        self.classes[class_idx].parent = Some(parent);
    }

    /// Rows of the fields reflection table
    pub fn fields_metadata(&self) -> Vec<FieldMetadataRow> {
        let mut rows = Vec::new();
        for class in &self.classes {
            for field in &class.fields {
                if field.ignored {
                    continue;
                }
                rows.push(FieldMetadataRow {
                    layer_name: class.name.clone(),
                    field_name: field.name.clone(),
                    field_xpath: field.xpath.clone(),
                    field_type: field.field_type.name().to_string(),
                    field_category: match field.category {
                        FieldCategory::Regular => "regular",
                        FieldCategory::PathToChildElement => "path_to_child_element",
                        FieldCategory::PathToChildElementWithLink => "path_to_child_element_with_link",
                        FieldCategory::PathToChildElementWithJunction => {
                            "path_to_child_element_with_junction_table"
                        }
                    }
                    .to_string(),
                });
            }
        }
        rows
    }

    /// Rows of the layers reflection table
    pub fn layers_metadata(&self) -> Vec<LayerMetadataRow> {
        self.classes
            .iter()
            .map(|class| LayerMetadataRow {
                layer_name: class.name.clone(),
                layer_xpath: class.xpath.clone(),
                layer_category: class.category.name().to_string(),
            })
            .collect()
    }
}

/// One assembled row
#[derive(Debug, Clone)]
pub struct Feature {
    /// Generated primary key, stable and unique per table
    pub pkid: String,
    /// The table this row belongs to
    pub class: ClassId,
    values: IndexMap<String, Value>,
}

impl Feature {
    /// Create an empty feature for a class
    pub fn new(class: ClassId) -> Self {
        Self {
            pkid: String::new(),
            class,
            values: IndexMap::new(),
        }
    }

    /// Set a field value (last write wins)
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.values.insert(field.into(), value);
    }

    /// Value of a field, if set
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Mutable value of a field, if set
    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.values.get_mut(field)
    }

    /// Whether a field has a value
    pub fn is_set(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// All set values, in insertion order
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Text content of a field, when textual
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> SchemaModel {
        let mut prefixes = UriPrefixMap::new();
        prefixes.register("http://myns", Some("myns"));

        let mut class = SchemaClass::new(
            "main_elt",
            QName::namespaced("http://myns", "main_elt"),
            "myns:main_elt",
            ClassCategory::TopLevel,
        );
        class.fields.push(Field::new(
            "foo",
            "myns:main_elt/myns:foo",
            FieldType::String,
        ));
        let mut ignored = Field::new("string", "myns:main_elt/myns:string", FieldType::String);
        ignored.ignored = true;
        class.fields.push(ignored);

        SchemaModel::new(vec![class], prefixes)
    }

    #[test]
    fn test_lookup() {
        let model = sample_model();
        let id = model.class_by_xpath("myns:main_elt").unwrap();
        assert_eq!(model.class(id).name, "main_elt");
        assert_eq!(model.class_by_name("main_elt"), Some(id));
        let (idx, field) = model.class(id).field_by_xpath("myns:main_elt/myns:foo").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(field.name, "foo");
    }

    #[test]
    fn test_fields_metadata_excludes_ignored() {
        let model = sample_model();
        let rows = model.fields_metadata();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field_xpath, "myns:main_elt/myns:foo");
        assert_eq!(rows[0].field_type, "string");
    }

    #[test]
    fn test_feature_values() {
        let mut feature = Feature::new(ClassId(0));
        feature.set("foo", Value::String("foo_first".to_string()));
        feature.set("foo", Value::String("foo_again".to_string()));
        assert_eq!(feature.get_str("foo"), Some("foo_again"));
        assert!(!feature.is_set("bar"));
    }

    #[test]
    fn test_occurs() {
        assert!(!Occurs::Bounded(1).is_repeated());
        assert!(Occurs::Bounded(2).is_repeated());
        assert!(Occurs::Unbounded.is_repeated());
    }
}
