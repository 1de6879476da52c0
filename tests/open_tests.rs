//! Opening behavior: schema discovery, schema-only mode, fatal open errors

mod common;

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use xmltab::config::Configuration;
use xmltab::dataset::{Dataset, DatasetSource};
use xmltab::diagnostics::CollectingSink;
use xmltab::locations::SchemaLocation;
use xmltab::Error;

const SIMPLE_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:myns="http://myns"
           targetNamespace="http://myns"
           elementFormDefault="qualified" attributeFormDefault="unqualified">
<xs:element name="main_elt" type="xs:string"/>
</xs:schema>"#;

#[test]
fn open_with_neither_instance_nor_schema_fails() {
    let err = Dataset::open(
        DatasetSource::default(),
        Configuration::default(),
        CollectingSink::shared(),
    )
    .err().unwrap();
    match err {
        Error::ConfigurationInvalid(msg) => {
            assert!(msg.contains("XSD must be provided when no XML data file is passed"))
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn open_schema_only() {
    let dir = TempDir::new().unwrap();
    let xsd = dir.path().join("main.xsd");
    fs::write(&xsd, SIMPLE_XSD).unwrap();

    let dataset = Dataset::open(
        DatasetSource::schema_only(SchemaLocation::Path(xsd)),
        Configuration::default(),
        CollectingSink::shared(),
    )
    .unwrap();
    assert_eq!(dataset.layers().len(), 1);
    assert_eq!(dataset.layers()[0].name, "main_elt");
    // No instance: tables exist but are empty.
    assert!(dataset.layer_features("main_elt").unwrap().is_empty());
}

#[test]
fn open_xsd_which_is_not_a_schema() {
    let dir = TempDir::new().unwrap();
    let not_a_schema = dir.path().join("instance.xml");
    fs::write(&not_a_schema, "<myns:main_elt xmlns:myns='http://myns'/>").unwrap();

    let err = Dataset::open(
        DatasetSource::schema_only(SchemaLocation::Path(not_a_schema)),
        Configuration::default(),
        CollectingSink::shared(),
    )
    .err().unwrap();
    match err {
        Error::SchemaInvalid(msg) => {
            assert!(msg.contains("invalid content in 'schema' element"))
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn open_nonexistent_xsd() {
    let err = Dataset::open(
        DatasetSource::schema_only(SchemaLocation::Path("/nonexistent/i_dont_exist.xsd".into())),
        Configuration::default(),
        CollectingSink::shared(),
    )
    .err().unwrap();
    match err {
        Error::SchemaNotFound(reference) => {
            assert_eq!(reference, "/nonexistent/i_dont_exist.xsd")
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn open_nonexistent_instance() {
    let err = Dataset::open(
        DatasetSource::from_instance_path("/nonexistent/i_dont_exist.xml"),
        Configuration::default(),
        CollectingSink::shared(),
    )
    .err().unwrap();
    assert!(format!("{}", err).contains("Cannot open /nonexistent/i_dont_exist.xml"));
}

#[test]
fn open_instance_without_schema_location() {
    let err = Dataset::open(
        DatasetSource::from_instance_memory(r#"<MYNS:main_elt xmlns:MYNS="http://myns"/>"#),
        Configuration::default(),
        CollectingSink::shared(),
    )
    .err().unwrap();
    match err {
        Error::ConfigurationInvalid(msg) => {
            assert!(msg.contains("No schema locations found"))
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn open_resolves_schema_location_relative_to_instance() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("main.xsd"), SIMPLE_XSD).unwrap();
    let instance = dir.path().join("instance.xml");
    fs::write(
        &instance,
        r#"<myns:main_elt xmlns:myns="http://myns"
             xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
             xsi:schemaLocation="http://myns main.xsd">hello</myns:main_elt>"#,
    )
    .unwrap();

    let dataset = Dataset::open(
        DatasetSource::from_instance_path(&instance),
        Configuration::default(),
        CollectingSink::shared(),
    )
    .unwrap();
    assert_eq!(dataset.layers().len(), 1);

    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].get_str("value"), Some("hello"));
}

#[test]
fn opening_twice_yields_identical_layer_sets() {
    let dir = TempDir::new().unwrap();
    let xsd = dir.path().join("main.xsd");
    fs::write(&xsd, SIMPLE_XSD).unwrap();

    let layers_of = || {
        let ds = Dataset::open(
            DatasetSource::schema_only(SchemaLocation::Path(xsd.clone())),
            Configuration::default(),
            CollectingSink::shared(),
        )
        .unwrap();
        ds.layers().into_iter().map(|l| l.name).collect::<Vec<_>>()
    };
    assert_eq!(layers_of(), layers_of());
}

#[test]
fn metadata_layers_exposed_when_configured() {
    let sink = CollectingSink::shared();
    let mut config = Configuration::default();
    config.expose_metadata_layers = true;
    let dataset = common::open_memory(
        &common::main_elt_schema(
            r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>"#,
        ),
        &common::main_elt_instance("<myns:foo>x</myns:foo>"),
        config,
        sink,
    )
    .unwrap();

    let names: Vec<String> = dataset.layers().into_iter().map(|l| l.name).collect();
    assert!(names.contains(&"_ogr_fields_metadata".to_string()));
    assert!(names.contains(&"_ogr_layers_metadata".to_string()));

    let rows = dataset.layer_features("_ogr_fields_metadata").unwrap();
    let foo = rows
        .iter()
        .find(|r| r.get_str("field_name") == Some("foo"))
        .expect("foo row");
    assert_eq!(foo.get_str("field_xpath"), Some("myns:main_elt/myns:foo"));
    assert_eq!(foo.get_str("layer_name"), Some("main_elt"));

    let layer_rows = dataset.layer_features("_ogr_layers_metadata").unwrap();
    assert_eq!(layer_rows.len(), 1);
    assert_eq!(layer_rows[0].get_str("layer_category"), Some("top_level"));
}

#[test]
fn metadata_layers_hidden_by_default() {
    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(
        &common::main_elt_schema(
            r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>"#,
        ),
        &common::main_elt_instance(""),
        sink,
    );
    assert!(dataset.layer("_ogr_fields_metadata").is_none());
    // The reflection rows are still derivable from the model itself.
    assert!(!dataset.model().fields_metadata().is_empty());
}
