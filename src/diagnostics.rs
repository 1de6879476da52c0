//! Non-fatal diagnostics and the pluggable sink
//!
//! Instance-level problems (unexpected elements, duplicate values, unresolved
//! links, ...) are recovered locally and surfaced as [`Diagnostic`]s through a
//! single [`DiagnosticSink`], so a caller can collect, log, or escalate them
//! uniformly. No component reads or writes ambient error state.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Kind of a non-fatal diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// An element present in the document is neither modeled nor excluded
    UnexpectedElement,
    /// A non-array field occurred more than once; the last value won
    DuplicateNonArrayField,
    /// Content matching an exclusion rule with its warn flag set was read
    IgnoredXPathMatchedInInstance,
    /// A link field referenced an identifier absent from the document
    LinkUnresolved,
    /// A geometry could not be brought into the field's reference system
    ReprojectionFailed,
    /// A schema-validation violation (only when validation is enabled)
    ValidationError,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnexpectedElement => "UnexpectedElement",
            Self::DuplicateNonArrayField => "DuplicateNonArrayField",
            Self::IgnoredXPathMatchedInInstance => "IgnoredXPathMatchedInInstance",
            Self::LinkUnresolved => "LinkUnresolved",
            Self::ReprojectionFailed => "ReprojectionFailed",
            Self::ValidationError => "ValidationError",
        };
        write!(f, "{}", s)
    }
}

/// One non-fatal diagnostic
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// What happened
    pub kind: DiagnosticKind,
    /// Human-readable text including the offending identifier
    pub message: String,
    /// XPath of the offending content, when applicable
    pub xpath: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic without an XPath
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            xpath: None,
        }
    }

    /// Create a diagnostic attached to an XPath
    pub fn at(kind: DiagnosticKind, xpath: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            xpath: Some(xpath.into()),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Receiver of non-fatal diagnostics
pub trait DiagnosticSink {
    /// Deliver one diagnostic
    fn report(&mut self, diagnostic: Diagnostic);
}

/// A sink shared between the dataset, its reader, and the caller
pub type SharedSink = Rc<RefCell<dyn DiagnosticSink>>;

/// Sink that stores every diagnostic for later inspection
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Vec<Diagnostic>,
}

impl CollectingSink {
    /// Create a new empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty sink behind a shared handle
    pub fn shared() -> Rc<RefCell<CollectingSink>> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// All collected diagnostics, in delivery order
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of diagnostics of the given kind
    pub fn count_of(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }

    /// First diagnostic of the given kind, if any
    pub fn first_of(&self, kind: DiagnosticKind) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.kind == kind)
    }

    /// Drop all collected diagnostics
    pub fn clear(&mut self) {
        self.diagnostics.clear();
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(kind = %diagnostic.kind, "{}", diagnostic.message);
        self.diagnostics.push(diagnostic);
    }
}

/// Sink that discards everything (diagnostics are still logged)
#[derive(Debug, Default)]
pub struct NullSink;

impl NullSink {
    /// Create a discarding sink behind a shared handle
    pub fn shared() -> Rc<RefCell<NullSink>> {
        Rc::new(RefCell::new(NullSink))
    }
}

impl DiagnosticSink for NullSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(kind = %diagnostic.kind, "{}", diagnostic.message);
    }
}
