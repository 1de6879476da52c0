//! Instance mapping: scalar fields, duplicates, arrays, child tables,
//! unexpected content, malformed documents

mod common;

use pretty_assertions::assert_eq;

use xmltab::config::Configuration;
use xmltab::diagnostics::{CollectingSink, DiagnosticKind};
use xmltab::model::PARENT_PKID_FIELD;
use xmltab::value::Value;
use xmltab::Error;

#[test]
fn scalar_and_attribute_fields() {
    let schema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:myns="http://myns" targetNamespace="http://myns"
           elementFormDefault="qualified" attributeFormDefault="unqualified">
<xs:element name="main_elt">
  <xs:complexType>
    <xs:sequence>
        <xs:element name="name" type="xs:string" minOccurs="0"/>
        <xs:element name="count" type="xs:int" minOccurs="0"/>
        <xs:element name="ratio" type="xs:double" minOccurs="0"/>
        <xs:element name="flag" type="xs:boolean" minOccurs="0"/>
    </xs:sequence>
    <xs:attribute name="attr" type="xs:string"/>
  </xs:complexType>
</xs:element>
</xs:schema>"#;
    let instance = r#"<myns:main_elt xmlns:myns="http://myns" attr="hello">
        <myns:name>first</myns:name>
        <myns:count>42</myns:count>
        <myns:ratio>1.5</myns:ratio>
        <myns:flag>true</myns:flag>
    </myns:main_elt>"#;

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(schema, instance, sink.clone());
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features.len(), 1);
    let f = &features[0];
    assert_eq!(f.get_str("attr"), Some("hello"));
    assert_eq!(f.get_str("name"), Some("first"));
    assert_eq!(f.get("count"), Some(&Value::Int(42)));
    assert_eq!(f.get("ratio"), Some(&Value::Double(1.5)));
    assert_eq!(f.get("flag"), Some(&Value::Boolean(true)));
    assert_eq!(f.pkid, "main_elt_1");
    assert!(sink.borrow().diagnostics().is_empty());
}

#[test]
fn duplicate_non_array_field_keeps_the_last_value() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>"#,
    );
    let instance = common::main_elt_instance(
        "<myns:foo>foo_first</myns:foo><myns:foo>foo_again</myns:foo>",
    );

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, &instance, sink.clone());
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features.len(), 1);
    // Somewhat arbitrary, but the observed contract: the latest one wins.
    assert_eq!(features[0].get_str("foo"), Some("foo_again"));

    let sink = sink.borrow();
    assert_eq!(sink.count_of(DiagnosticKind::DuplicateNonArrayField), 1);
    let diag = sink.first_of(DiagnosticKind::DuplicateNonArrayField).unwrap();
    assert_eq!(diag.xpath.as_deref(), Some("myns:main_elt/myns:foo"));
}

#[test]
fn duplicate_non_array_field_with_interleaved_sibling() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>
           <xs:element name="bar" type="xs:string" minOccurs="0"/>"#,
    );
    let instance = common::main_elt_instance(
        "<myns:foo>foo_first</myns:foo><myns:bar>bar</myns:bar><myns:foo>foo_again</myns:foo>",
    );

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, &instance, sink.clone());
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].get_str("foo"), Some("foo_again"));
    assert_eq!(features[0].get_str("bar"), Some("bar"));
    assert_eq!(
        sink.borrow().count_of(DiagnosticKind::DuplicateNonArrayField),
        1
    );
}

#[test]
fn repeated_simple_elements_become_arrays() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="tag" type="xs:string" maxOccurs="unbounded"/>
           <xs:element name="num" type="xs:int" maxOccurs="unbounded"/>"#,
    );
    let instance = common::main_elt_instance(
        "<myns:tag>a</myns:tag><myns:tag>b</myns:tag><myns:num>1</myns:num><myns:num>2</myns:num>",
    );

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, &instance, sink.clone());
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(
        features[0].get("tag"),
        Some(&Value::StringList(vec!["a".to_string(), "b".to_string()]))
    );
    assert_eq!(features[0].get("num"), Some(&Value::IntList(vec![1, 2])));
    assert!(sink.borrow().diagnostics().is_empty());
}

#[test]
fn repeated_simple_elements_without_arrays_become_child_rows() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="tag" type="xs:string" maxOccurs="unbounded"/>"#,
    );
    let instance =
        common::main_elt_instance("<myns:tag>a</myns:tag><myns:tag>b</myns:tag>");

    let sink = CollectingSink::shared();
    let mut config = Configuration::default();
    config.use_arrays = false;
    let dataset = common::open_memory(&schema, &instance, config, sink).unwrap();

    let parents = dataset.layer_features("main_elt").unwrap();
    assert_eq!(parents.len(), 1);
    let children = dataset.layer_features("main_elt_tag").unwrap();
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(
            child.get_str(PARENT_PKID_FIELD),
            Some(parents[0].pkid.as_str())
        );
    }
    assert_eq!(children[0].get_str("value"), Some("a"));
    assert_eq!(children[1].get_str("value"), Some("b"));
}

#[test]
fn repeated_compound_elements_become_child_rows() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="entry" maxOccurs="unbounded">
             <xs:complexType>
               <xs:sequence>
                 <xs:element name="key" type="xs:string"/>
                 <xs:element name="value" type="xs:string"/>
               </xs:sequence>
             </xs:complexType>
           </xs:element>"#,
    );
    let instance = common::main_elt_instance(
        "<myns:entry><myns:key>k1</myns:key><myns:value>v1</myns:value></myns:entry>\
         <myns:entry><myns:key>k2</myns:key><myns:value>v2</myns:value></myns:entry>",
    );

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, &instance, sink);
    let rows = dataset.layer_features("main_elt_entry").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_str("key"), Some("k1"));
    assert_eq!(rows[1].get_str("value"), Some("v2"));
    // Containment rows carry the parent key and derive their pkid from it.
    assert_eq!(rows[0].get_str(PARENT_PKID_FIELD), Some("main_elt_1"));
    assert_eq!(rows[0].pkid, "main_elt_1_entry_1");
}

#[test]
fn flattened_compound_child() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="address" minOccurs="0">
             <xs:complexType>
               <xs:sequence>
                 <xs:element name="city" type="xs:string"/>
               </xs:sequence>
               <xs:attribute name="kind" type="xs:string"/>
             </xs:complexType>
           </xs:element>"#,
    );
    let instance = common::main_elt_instance(
        r#"<myns:address kind="home"><myns:city>Paris</myns:city></myns:address>"#,
    );

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, &instance, sink);
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features[0].get_str("address_city"), Some("Paris"));
    assert_eq!(features[0].get_str("address_kind"), Some("home"));
}

#[test]
fn unexpected_element_is_skipped_with_a_diagnostic() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>"#,
    );
    let instance = common::main_elt_instance(
        "<myns:foo>ok</myns:foo><myns:mystery><myns:inner>x</myns:inner></myns:mystery>",
    );

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, &instance, sink.clone());
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].get_str("foo"), Some("ok"));

    let sink = sink.borrow();
    assert_eq!(sink.count_of(DiagnosticKind::UnexpectedElement), 1);
    let diag = sink.first_of(DiagnosticKind::UnexpectedElement).unwrap();
    assert!(diag.message.contains("myns:main_elt/myns:mystery"));
}

#[test]
fn malformed_document_is_fatal_on_first_read() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>"#,
    );
    // Root tag never closed.
    let instance = r#"<myns:main_elt xmlns:myns="http://myns">"#;

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, instance, sink);
    let err = dataset.layer_features("main_elt").unwrap_err();
    match err {
        Error::MalformedDocument(msg) => {
            assert!(msg.contains("input ended before all started tags were ended"))
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn mismatched_tags_are_fatal() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>"#,
    );
    let instance =
        r#"<myns:main_elt xmlns:myns="http://myns"><myns:foo>x</myns:bar></myns:main_elt>"#;

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, instance, sink);
    assert!(matches!(
        dataset.layer_features("main_elt").unwrap_err(),
        Error::MalformedDocument(_)
    ));
}

#[test]
fn reading_is_lazy_and_restartable() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>"#,
    );
    let instance = common::main_elt_instance("<myns:foo>x</myns:foo>");

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, &instance, sink);

    // Stop after the first feature: legal termination.
    let mut reader = dataset.reader().unwrap();
    assert!(reader.next_feature().unwrap().is_some());
    drop(reader);

    // A fresh reader restarts from the beginning.
    let mut reader = dataset.reader().unwrap();
    let feature = reader.next_feature().unwrap().unwrap();
    assert_eq!(feature.get_str("foo"), Some("x"));
    assert!(reader.next_feature().unwrap().is_none());
}

#[test]
fn empty_feature_element_yields_an_empty_row() {
    let schema = common::main_elt_schema(
        r#"<xs:element name="foo" type="xs:string" minOccurs="0"/>"#,
    );
    let instance = r#"<myns:main_elt xmlns:myns="http://myns"/>"#;

    let sink = CollectingSink::shared();
    let dataset = common::open_memory_ok(&schema, instance, sink);
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features.len(), 1);
    assert!(features[0].get("foo").is_none());
}
