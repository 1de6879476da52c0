//! Validation Adapter
//!
//! Structural validation of an instance document against the built model:
//! missing required fields and values that do not conform to their declared
//! simple type. Disabled by default; when enabled, every violation is routed
//! through the diagnostic sink, and `fail_if_validation_error` escalates the
//! collected violations into a fatal [`Error::ValidationFailed`] at open
//! time.

use std::rc::Rc;

use crate::config::Configuration;
use crate::diagnostics::{Diagnostic, DiagnosticKind, SharedSink};
use crate::error::{Error, Result};
use crate::model::{FieldCategory, SchemaModel};
use crate::reader::{InstanceReader, InstanceSource};
use crate::value::{FieldType, Value};

/// Run validation over one instance document
///
/// Returns the collected violation texts (also delivered to the sink as
/// `ValidationError` diagnostics). Unexpected-element conditions surface
/// through the mapping pass itself as `UnexpectedElement` diagnostics.
pub fn validate(
    model: &Rc<SchemaModel>,
    config: &Configuration,
    source: &InstanceSource,
    sink: &SharedSink,
) -> Result<Vec<String>> {
    let mut reader = InstanceReader::new(Rc::clone(model), config, source, Rc::clone(sink))?;
    let mut errors = Vec::new();

    while let Some(feature) = reader.next_feature()? {
        let class = model.class(feature.class);
        for field in &class.fields {
            if field.ignored || field.category != FieldCategory::Regular {
                continue;
            }
            match feature.get(&field.name) {
                None => {
                    if field.not_nullable
                        && field.fixed_value.is_none()
                        && field.default_value.is_none()
                    {
                        errors.push(format!(
                            "missing required content '{}' in '{}'",
                            field.xpath, class.name
                        ));
                    }
                }
                // The mapper falls back to raw text when a value does not
                // parse under the declared type; a string where a typed
                // value belongs is therefore a violation.
                Some(Value::String(_)) if is_strictly_typed(field.field_type) => {
                    errors.push(format!(
                        "value of '{}' is not a valid {}",
                        field.xpath,
                        field.field_type.name()
                    ));
                }
                _ => {}
            }
        }
    }

    for message in &errors {
        sink.borrow_mut().report(Diagnostic::new(
            DiagnosticKind::ValidationError,
            message.clone(),
        ));
    }
    Ok(errors)
}

/// Escalate validation results per configuration
pub fn escalate(errors: Vec<String>, fail_if_error: bool) -> Result<()> {
    if fail_if_error && !errors.is_empty() {
        return Err(Error::ValidationFailed {
            count: errors.len(),
            first: errors.into_iter().next().unwrap_or_default(),
        });
    }
    Ok(())
}

/// Whether falling back to raw text indicates a violation for this type
fn is_strictly_typed(field_type: FieldType) -> bool {
    matches!(
        field_type,
        FieldType::Boolean
            | FieldType::Short
            | FieldType::Int32
            | FieldType::Int64
            | FieldType::Float
            | FieldType::Double
            | FieldType::Date
            | FieldType::Time
            | FieldType::DateTime
            | FieldType::Base64Binary
            | FieldType::HexBinary
    )
}
