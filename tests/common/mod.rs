//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use xmltab::config::Configuration;
use xmltab::dataset::{Dataset, DatasetSource};
use xmltab::diagnostics::CollectingSink;
use xmltab::locations::SchemaLocation;
use xmltab::resolver::Resolver;
use xmltab::Result;

/// Open an in-memory instance against an in-memory schema
pub fn open_memory(
    schema: &str,
    instance: &str,
    config: Configuration,
    sink: Rc<RefCell<CollectingSink>>,
) -> Result<Dataset> {
    let mut resolver = Resolver::new(true, None, false);
    resolver.add_virtual_document("mem:schema.xsd", schema);
    Dataset::open_with_resolver(
        DatasetSource::from_instance_memory(instance)
            .with_schema(SchemaLocation::Virtual("mem:schema.xsd".to_string())),
        config,
        resolver,
        sink,
    )
}

/// `open_memory` with defaults, panicking on failure
pub fn open_memory_ok(
    schema: &str,
    instance: &str,
    sink: Rc<RefCell<CollectingSink>>,
) -> Dataset {
    open_memory(schema, instance, Configuration::default(), sink).unwrap()
}

/// A small schema with a single `main_elt` element in `http://myns`
pub fn main_elt_schema(content: &str) -> String {
    format!(
        r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:myns="http://myns"
           targetNamespace="http://myns"
           elementFormDefault="qualified" attributeFormDefault="unqualified">
<xs:element name="main_elt">
  <xs:complexType>
    <xs:sequence>
{}
    </xs:sequence>
  </xs:complexType>
</xs:element>
</xs:schema>"#,
        content
    )
}

/// An instance document rooted at `myns:main_elt`
pub fn main_elt_instance(content: &str) -> String {
    format!(
        r#"<myns:main_elt xmlns:myns="http://myns">{}</myns:main_elt>"#,
        content
    )
}
