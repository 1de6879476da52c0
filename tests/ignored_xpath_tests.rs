//! Exclusion rules: model-level removal, instance warnings, rule-set errors

mod common;

use pretty_assertions::assert_eq;

use xmltab::config::Configuration;
use xmltab::diagnostics::{CollectingSink, DiagnosticKind};
use xmltab::Error;

fn string_schema() -> String {
    common::main_elt_schema(
        r#"<xs:element name="string" type="xs:string" minOccurs="0"/>
           <xs:element name="kept" type="xs:string" minOccurs="0"/>"#,
    )
}

fn ignoring_config(pattern: &str, warn: bool) -> Configuration {
    let mut config = Configuration::default();
    config
        .ignored_xpaths
        .declare_prefix("myns", "http://myns")
        .unwrap();
    config.ignored_xpaths.add_rule(pattern, Some(warn)).unwrap();
    config
}

#[test]
fn ignored_field_is_removed_from_the_model() {
    let sink = CollectingSink::shared();
    let dataset = common::open_memory(
        &string_schema(),
        &common::main_elt_instance("<myns:string>content</myns:string>"),
        ignoring_config("//myns:string", false),
        sink.clone(),
    )
    .unwrap();

    // The field never materializes, even though the document has content.
    let rows = dataset.model().fields_metadata();
    assert!(rows.iter().all(|r| r.field_name != "string"));
    assert!(rows.iter().any(|r| r.field_name == "kept"));

    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features.len(), 1);
    assert!(features[0].get("string").is_none());
    // Without the warn flag, reading past the content stays silent.
    assert_eq!(
        sink.borrow()
            .count_of(DiagnosticKind::IgnoredXPathMatchedInInstance),
        0
    );
    assert_eq!(sink.borrow().count_of(DiagnosticKind::UnexpectedElement), 0);
}

#[test]
fn warn_flag_reports_each_matching_occurrence_once() {
    let sink = CollectingSink::shared();
    let dataset = common::open_memory(
        &string_schema(),
        &common::main_elt_instance(
            "<myns:kept>yes</myns:kept><myns:string>content</myns:string>",
        ),
        ignoring_config("//myns:string", true),
        sink.clone(),
    )
    .unwrap();

    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features[0].get_str("kept"), Some("yes"));

    let sink = sink.borrow();
    assert_eq!(
        sink.count_of(DiagnosticKind::IgnoredXPathMatchedInInstance),
        1
    );
    let diag = sink
        .first_of(DiagnosticKind::IgnoredXPathMatchedInInstance)
        .unwrap();
    assert_eq!(diag.xpath.as_deref(), Some("myns:main_elt/myns:string"));
}

#[test]
fn rule_for_namespace_absent_from_schema_never_fires() {
    let mut config = Configuration::default();
    config
        .ignored_xpaths
        .declare_prefix("gone", "http://not_in_this_schema")
        .unwrap();
    config.ignored_xpaths.add_rule("//gone:string", Some(true)).unwrap();

    let sink = CollectingSink::shared();
    let dataset = common::open_memory(
        &string_schema(),
        &common::main_elt_instance("<myns:string>content</myns:string>"),
        config,
        sink.clone(),
    )
    .unwrap();

    // No match at model-build time is not an error, the field stays.
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features[0].get_str("string"), Some("content"));
    assert_eq!(
        sink.borrow()
            .count_of(DiagnosticKind::IgnoredXPathMatchedInInstance),
        0
    );
}

#[test]
fn undeclared_prefix_is_a_syntax_error() {
    let mut config = Configuration::default();
    let err = config
        .ignored_xpaths
        .add_rule("//undeclared:string", None)
        .unwrap_err();
    assert!(matches!(err, Error::XPathSyntax { .. }));
    assert!(format!("{}", err).contains("//undeclared:string"));
}

#[test]
fn predicate_syntax_is_rejected() {
    let mut config = Configuration::default();
    config
        .ignored_xpaths
        .declare_prefix("myns", "http://myns")
        .unwrap();
    for pattern in ["foo[1]", "foo[@bar='baz']", "@", ":", ""] {
        let err = config.ignored_xpaths.add_rule(pattern, None).unwrap_err();
        assert!(
            matches!(err, Error::XPathSyntax { .. }),
            "pattern {:?} should be rejected",
            pattern
        );
    }
}

#[test]
fn conflicting_prefix_declarations_are_rejected() {
    let mut config = Configuration::default();
    config
        .ignored_xpaths
        .declare_prefix("myns", "http://myns")
        .unwrap();
    let err = config
        .ignored_xpaths
        .declare_prefix("myns", "http://other")
        .unwrap_err();
    match err {
        Error::PrefixAlreadyMapped {
            prefix,
            existing,
            attempted,
        } => {
            assert_eq!(prefix, "myns");
            assert_eq!(existing, "http://myns");
            assert_eq!(attempted, "http://other");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn attribute_rule_removes_attribute_column() {
    let schema = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:myns="http://myns" targetNamespace="http://myns"
           elementFormDefault="qualified" attributeFormDefault="unqualified">
<xs:element name="main_elt">
  <xs:complexType>
    <xs:sequence>
        <xs:element name="foo" type="xs:string" minOccurs="0"/>
    </xs:sequence>
    <xs:attribute name="attr" type="xs:string"/>
  </xs:complexType>
</xs:element>
</xs:schema>"#;

    let mut config = Configuration::default();
    config
        .ignored_xpaths
        .declare_prefix("myns", "http://myns")
        .unwrap();
    config
        .ignored_xpaths
        .add_rule("//myns:main_elt/@attr", None)
        .unwrap();

    let sink = CollectingSink::shared();
    let dataset = common::open_memory(
        schema,
        r#"<myns:main_elt xmlns:myns="http://myns" attr="x"><myns:foo>f</myns:foo></myns:main_elt>"#,
        config,
        sink,
    )
    .unwrap();

    let features = dataset.layer_features("main_elt").unwrap();
    assert!(features[0].get("attr").is_none());
    assert_eq!(features[0].get_str("foo"), Some("f"));
}
