//! Error types for xmltab
//!
//! This module defines all fatal error types used throughout the library.
//! Non-fatal conditions are never errors here: they flow through the
//! diagnostic sink (see [`crate::diagnostics`]) so that mapping can continue
//! row by row.

use thiserror::Error;

/// Result type alias using xmltab Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for xmltab operations
///
/// All variants abort the operation that raised them. Schema/structural
/// problems abort dataset opening entirely; `MalformedDocument` is the only
/// instance-level fatal error, raised lazily by the reader once the document
/// can no longer be trusted.
#[derive(Error, Debug)]
pub enum Error {
    /// A schema reference could not be resolved to a byte stream
    #[error("cannot resolve {0}")]
    SchemaNotFound(String),

    /// A resolved schema document is not a valid XSD
    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    /// An exclusion pattern does not belong to the supported XPath subset
    #[error("XPath syntax '{pattern}' not supported: {reason}")]
    XPathSyntax {
        /// The offending pattern
        pattern: String,
        /// What was wrong with it
        reason: String,
    },

    /// A namespace prefix was declared twice with different URIs
    #[error("prefix '{prefix}' already mapped to {existing}, cannot map it to {attempted}")]
    PrefixAlreadyMapped {
        /// The redeclared prefix
        prefix: String,
        /// URI the prefix is already bound to
        existing: String,
        /// URI of the rejected redeclaration
        attempted: String,
    },

    /// Malformed declarative configuration, or an unusable open request
    #[error("configuration error: {0}")]
    ConfigurationInvalid(String),

    /// The instance document is not well-formed XML
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Validation was requested with fail-on-error and the document violated
    /// the schema
    #[error("validation failed with {count} error(s): {first}")]
    ValidationFailed {
        /// Number of validation errors collected
        count: usize,
        /// Text of the first error
        first: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML parsing error outside the instance-mapping path
    #[error("XML error: {0}")]
    Xml(String),

    /// URL parsing error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Limit exceeded error
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

impl Error {
    /// Build an `XPathSyntax` error for a pattern
    pub fn xpath_syntax(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::XPathSyntax {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_not_found_display() {
        let err = Error::SchemaNotFound("/tmp/i_dont_exist.xsd".to_string());
        assert_eq!(format!("{}", err), "cannot resolve /tmp/i_dont_exist.xsd");
    }

    #[test]
    fn test_xpath_syntax_display() {
        let err = Error::xpath_syntax("foo[1]", "predicates are not supported");
        let msg = format!("{}", err);
        assert!(msg.contains("foo[1]"));
        assert!(msg.contains("predicates"));
    }

    #[test]
    fn test_prefix_already_mapped_display() {
        let err = Error::PrefixAlreadyMapped {
            prefix: "myns".to_string(),
            existing: "http://a".to_string(),
            attempted: "http://b".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("myns"));
        assert!(msg.contains("http://a"));
        assert!(msg.contains("http://b"));
    }

    #[test]
    fn test_validation_failed_display() {
        let err = Error::ValidationFailed {
            count: 3,
            first: "missing required element 'name'".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 error(s)"));
        assert!(msg.contains("missing required element"));
    }
}
