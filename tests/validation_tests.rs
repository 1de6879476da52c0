//! Validation adapter: non-fatal reporting, fail-on-error, schema-only no-op

mod common;

use pretty_assertions::assert_eq;

use xmltab::config::Configuration;
use xmltab::dataset::{Dataset, DatasetSource};
use xmltab::diagnostics::{CollectingSink, DiagnosticKind};
use xmltab::locations::SchemaLocation;
use xmltab::resolver::Resolver;
use xmltab::Error;

fn typed_schema() -> String {
    common::main_elt_schema(
        r#"<xs:element name="name" type="xs:string"/>
           <xs:element name="count" type="xs:int" minOccurs="0"/>"#,
    )
}

fn validating_config(fail: bool) -> Configuration {
    let mut config = Configuration::default();
    config.validate = true;
    config.fail_if_validation_error = fail;
    config
}

#[test]
fn validation_disabled_by_default() {
    let sink = CollectingSink::shared();
    // 'name' is required but missing; with validation off nothing is said.
    let dataset = common::open_memory_ok(
        &typed_schema(),
        &common::main_elt_instance("<myns:count>1</myns:count>"),
        sink.clone(),
    );
    assert_eq!(dataset.layer_features("main_elt").unwrap().len(), 1);
    assert_eq!(sink.borrow().count_of(DiagnosticKind::ValidationError), 0);
}

#[test]
fn validation_reports_but_does_not_block() {
    let sink = CollectingSink::shared();
    let dataset = common::open_memory(
        &typed_schema(),
        &common::main_elt_instance("<myns:count>not_a_number</myns:count>"),
        validating_config(false),
        sink.clone(),
    )
    .unwrap();

    // Two violations: required 'name' missing, 'count' not an int.
    assert_eq!(sink.borrow().count_of(DiagnosticKind::ValidationError), 2);

    // Opening succeeded and mapping proceeds unaffected.
    let features = dataset.layer_features("main_elt").unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].get_str("count"), Some("not_a_number"));
}

#[test]
fn validation_diagnostics_are_deterministic() {
    let run = || {
        let sink = CollectingSink::shared();
        common::open_memory(
            &typed_schema(),
            &common::main_elt_instance("<myns:count>not_a_number</myns:count>"),
            validating_config(false),
            sink.clone(),
        )
        .unwrap();
        let messages = sink.borrow()
            .diagnostics()
            .iter()
            .map(|d| d.message.clone())
            .collect::<Vec<_>>();
        messages
    };
    assert_eq!(run(), run());
}

#[test]
fn fail_if_error_aborts_the_open() {
    let sink = CollectingSink::shared();
    let err = common::open_memory(
        &typed_schema(),
        &common::main_elt_instance("<myns:count>not_a_number</myns:count>"),
        validating_config(true),
        sink,
    )
    .err().unwrap();
    match err {
        Error::ValidationFailed { count, first } => {
            assert_eq!(count, 2);
            assert!(!first.is_empty());
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn fail_if_error_with_a_valid_document_opens() {
    let sink = CollectingSink::shared();
    let dataset = common::open_memory(
        &typed_schema(),
        &common::main_elt_instance("<myns:name>ok</myns:name><myns:count>3</myns:count>"),
        validating_config(true),
        sink.clone(),
    )
    .unwrap();
    assert_eq!(dataset.layer_features("main_elt").unwrap().len(), 1);
    assert_eq!(sink.borrow().count_of(DiagnosticKind::ValidationError), 0);
}

#[test]
fn schema_only_validation_is_a_no_op() {
    let mut resolver = Resolver::new(true, None, false);
    resolver.add_virtual_document("mem:schema.xsd", &typed_schema());
    let dataset = Dataset::open_with_resolver(
        DatasetSource::schema_only(SchemaLocation::Virtual("mem:schema.xsd".to_string())),
        validating_config(true),
        resolver,
        CollectingSink::shared(),
    )
    .unwrap();
    assert_eq!(dataset.layers().len(), 1);
}
