//! Restricted XPath pattern engine
//!
//! Parses and matches the XPath subset used by field exclusion rules:
//! element and attribute steps, namespace-prefixed or unprefixed names, and
//! the `//` descendant-or-self segment. Predicates, indices, axes, and
//! wildcards are not supported and are rejected at parse time.

pub mod matcher;

pub use matcher::{MatchedRule, XPathMatcher};

use crate::error::{Error, Result};
use crate::names::is_valid_ncname;
use crate::namespaces::PrefixTable;

/// One step of a parsed pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternStep {
    /// Attribute step (`@name`)
    pub attribute: bool,
    /// Namespace prefix, to be resolved through the rule set's prefix table
    pub prefix: Option<String>,
    /// Local name
    pub name: String,
    /// Whether this step was preceded by `//` (may match at any depth)
    pub descend: bool,
}

/// A parsed exclusion pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPathPattern {
    /// The pattern as written
    pub raw: String,
    /// Whether the pattern is anchored at the document root (single leading `/`)
    pub anchored: bool,
    /// Parsed steps
    pub steps: Vec<PatternStep>,
}

impl XPathPattern {
    /// Parse a pattern, rejecting anything outside the supported subset
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::xpath_syntax(pattern, "empty pattern"));
        }
        if pattern.contains('[') || pattern.contains(']') {
            return Err(Error::xpath_syntax(pattern, "predicates are not supported"));
        }

        let (anchored, mut rest) = if let Some(r) = pattern.strip_prefix("//") {
            (false, r)
        } else if let Some(r) = pattern.strip_prefix('/') {
            (true, r)
        } else {
            (false, pattern)
        };
        let mut leading_descend = pattern.starts_with("//");

        if rest.is_empty() {
            return Err(Error::xpath_syntax(pattern, "no steps"));
        }
        if rest.ends_with('/') {
            return Err(Error::xpath_syntax(pattern, "trailing '/'"));
        }

        let mut steps = Vec::new();
        loop {
            let (segment, remainder, descend_next) = match rest.find('/') {
                Some(pos) => {
                    let seg = &rest[..pos];
                    let after = &rest[pos + 1..];
                    if let Some(after) = after.strip_prefix('/') {
                        (seg, after, true)
                    } else {
                        (seg, after, false)
                    }
                }
                None => (rest, "", false),
            };

            let mut step = Self::parse_step(pattern, segment)?;
            step.descend = leading_descend;
            steps.push(step);
            leading_descend = descend_next;

            if remainder.is_empty() {
                break;
            }
            rest = remainder;
        }

        Ok(Self {
            raw: pattern.to_string(),
            anchored,
            steps,
        })
    }

    fn parse_step(pattern: &str, segment: &str) -> Result<PatternStep> {
        if segment.is_empty() {
            return Err(Error::xpath_syntax(pattern, "empty step"));
        }
        let (attribute, name_part) = match segment.strip_prefix('@') {
            Some(rest) => (true, rest),
            None => (false, segment),
        };
        if name_part.is_empty() {
            return Err(Error::xpath_syntax(pattern, "bare '@'"));
        }
        let (prefix, local) = match name_part.split_once(':') {
            Some((p, l)) => {
                if p.is_empty() || l.is_empty() {
                    return Err(Error::xpath_syntax(pattern, "bare ':'"));
                }
                (Some(p.to_string()), l.to_string())
            }
            None => (None, name_part.to_string()),
        };
        if let Some(p) = &prefix {
            if !is_valid_ncname(p) {
                return Err(Error::xpath_syntax(pattern, format!("invalid prefix '{}'", p)));
            }
        }
        if !is_valid_ncname(&local) {
            return Err(Error::xpath_syntax(pattern, format!("invalid name '{}'", local)));
        }
        Ok(PatternStep {
            attribute,
            prefix,
            name: local,
            descend: false,
        })
    }
}

/// One exclusion rule: a pattern plus its warn flag
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    /// The parsed pattern
    pub pattern: XPathPattern,
    /// Emit a diagnostic when matching content is encountered in an instance
    pub warn: bool,
}

/// An ordered set of exclusion rules with its own prefix table
#[derive(Debug, Clone, Default)]
pub struct XPathRuleSet {
    /// Prefix table declared alongside the rules
    pub prefixes: PrefixTable,
    rules: Vec<IgnoreRule>,
    /// Default for the per-rule warn flag
    pub default_warn: bool,
}

impl XPathRuleSet {
    /// Create an empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a prefix for use in patterns
    pub fn declare_prefix(&mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Result<()> {
        self.prefixes.declare(prefix, uri)
    }

    /// Parse and add a rule; `warn` defaults to the set-level flag
    ///
    /// A prefix used in the pattern but absent from the rule set's own table
    /// is a syntax error. (A declared prefix whose namespace is absent from
    /// the schema is fine: the rule just never matches.)
    pub fn add_rule(&mut self, pattern: &str, warn: Option<bool>) -> Result<()> {
        let parsed = XPathPattern::parse(pattern)?;
        for step in &parsed.steps {
            if let Some(prefix) = &step.prefix {
                if self.prefixes.uri(prefix).is_none() {
                    return Err(Error::xpath_syntax(
                        pattern,
                        format!("prefix '{}' is not declared", prefix),
                    ));
                }
            }
        }
        self.rules.push(IgnoreRule {
            pattern: parsed,
            warn: warn.unwrap_or(self.default_warn),
        });
        Ok(())
    }

    /// The rules, in declaration order
    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// Whether the set contains any rule
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let p = XPathPattern::parse("myns:main_elt/myns:foo").unwrap();
        assert!(!p.anchored);
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.steps[0].prefix.as_deref(), Some("myns"));
        assert_eq!(p.steps[1].name, "foo");
    }

    #[test]
    fn test_parse_descendant() {
        let p = XPathPattern::parse("//myns:string").unwrap();
        assert!(!p.anchored);
        assert!(p.steps[0].descend);

        let p = XPathPattern::parse("a//b").unwrap();
        assert!(!p.steps[0].descend);
        assert!(p.steps[1].descend);
    }

    #[test]
    fn test_parse_anchored() {
        let p = XPathPattern::parse("/main_elt/foo").unwrap();
        assert!(p.anchored);
    }

    #[test]
    fn test_parse_attribute() {
        let p = XPathPattern::parse("main_elt/@attr").unwrap();
        assert!(p.steps[1].attribute);
        assert_eq!(p.steps[1].name, "attr");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            XPathPattern::parse("").unwrap_err(),
            Error::XPathSyntax { .. }
        ));
        assert!(XPathPattern::parse("@").is_err());
        assert!(XPathPattern::parse(":").is_err());
        assert!(XPathPattern::parse("a:").is_err());
        assert!(XPathPattern::parse(":b").is_err());
        assert!(XPathPattern::parse("foo[1]").is_err());
        assert!(XPathPattern::parse("foo[@bar='baz']").is_err());
        assert!(XPathPattern::parse("a/").is_err());
        assert!(XPathPattern::parse("a b").is_err());
    }

    #[test]
    fn test_rule_set_undeclared_prefix() {
        let mut set = XPathRuleSet::new();
        let err = set.add_rule("//myns:string", None).unwrap_err();
        assert!(matches!(err, Error::XPathSyntax { .. }));
    }

    #[test]
    fn test_rule_set_warn_default() {
        let mut set = XPathRuleSet::new();
        set.default_warn = true;
        set.declare_prefix("myns", "http://myns").unwrap();
        set.add_rule("//myns:string", None).unwrap();
        set.add_rule("//myns:other", Some(false)).unwrap();
        assert!(set.rules()[0].warn);
        assert!(!set.rules()[1].warn);
    }

    #[test]
    fn test_rule_set_prefix_conflict() {
        let mut set = XPathRuleSet::new();
        set.declare_prefix("myns", "http://myns").unwrap();
        let err = set.declare_prefix("myns", "http://other").unwrap_err();
        assert!(matches!(err, Error::PrefixAlreadyMapped { .. }));
    }
}
