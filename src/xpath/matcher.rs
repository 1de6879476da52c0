//! Matching compiled rule sets against instance XPaths
//!
//! Rules are written with the rule set's own prefixes; instance XPaths use
//! the prefixes discovered in the schema. Compilation translates each step
//! through prefix → URI → schema prefix. A rule whose namespace does not
//! occur in the schema at all compiles to a never-matching entry rather than
//! an error: overly specific rules are allowed to simply never fire.

use crate::namespaces::UriPrefixMap;

use super::XPathRuleSet;

/// A rule that matched an instance XPath
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedRule<'a> {
    /// The pattern as written in the rule set
    pub raw: &'a str,
    /// The rule's warn flag
    pub warn: bool,
    /// Index of the rule within the set
    pub index: usize,
}

#[derive(Debug, Clone)]
struct CompiledStep {
    /// Rendered segment in schema-prefix form, e.g. `myns:foo` or `@myns:attr`
    segment: String,
    descend: bool,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    raw: String,
    warn: bool,
    anchored: bool,
    /// None when a step's namespace is absent from the schema
    steps: Option<Vec<CompiledStep>>,
}

/// A rule set compiled against one schema's prefix map
#[derive(Debug, Clone, Default)]
pub struct XPathMatcher {
    rules: Vec<CompiledRule>,
}

impl XPathMatcher {
    /// Compile a rule set against the schema's URI→prefix map
    pub fn compile(rule_set: &XPathRuleSet, schema_prefixes: &UriPrefixMap) -> Self {
        let rules = rule_set
            .rules()
            .iter()
            .map(|rule| {
                let mut steps = Vec::with_capacity(rule.pattern.steps.len());
                let mut resolvable = true;
                for step in &rule.pattern.steps {
                    let prefix = match &step.prefix {
                        Some(rule_prefix) => {
                            // add_rule guarantees the prefix is declared
                            let uri = rule_set.prefixes.uri(rule_prefix).unwrap_or_default();
                            match schema_prefixes.prefix(uri) {
                                Some(p) => Some(p.to_string()),
                                None => {
                                    resolvable = false;
                                    break;
                                }
                            }
                        }
                        None => None,
                    };
                    let mut segment = String::new();
                    if step.attribute {
                        segment.push('@');
                    }
                    if let Some(p) = &prefix {
                        segment.push_str(p);
                        segment.push(':');
                    }
                    segment.push_str(&step.name);
                    steps.push(CompiledStep {
                        segment,
                        descend: step.descend,
                    });
                }
                CompiledRule {
                    raw: rule.pattern.raw.clone(),
                    warn: rule.warn,
                    anchored: rule.pattern.anchored,
                    steps: resolvable.then_some(steps),
                }
            })
            .collect();
        Self { rules }
    }

    /// Whether no rule can ever match
    pub fn is_empty(&self) -> bool {
        self.rules.iter().all(|r| r.steps.is_none()) || self.rules.is_empty()
    }

    /// Match an instance XPath (schema-prefixed segments joined by `/`)
    /// against the rules, returning the first match
    pub fn matches(&self, xpath: &str) -> Option<MatchedRule<'_>> {
        let segments: Vec<&str> = xpath.split('/').collect();
        for (index, rule) in self.rules.iter().enumerate() {
            if let Some(steps) = &rule.steps {
                if matches_rule(&segments, rule.anchored, steps) {
                    return Some(MatchedRule {
                        raw: &rule.raw,
                        warn: rule.warn,
                        index,
                    });
                }
            }
        }
        None
    }
}

/// Segment-by-segment match with suffix anchoring: once the first step has
/// matched, the remaining steps must match consecutive segments (unless a
/// `//` step floats again), and the pattern must reach the end of the XPath.
fn matches_rule(segments: &[&str], anchored: bool, steps: &[CompiledStep]) -> bool {
    let mut i = 0;
    let mut r = 0;
    let mut locked = anchored;

    while i < segments.len() && r < steps.len() {
        if steps[r].descend {
            locked = false;
        }
        if segments[i] == steps[r].segment {
            i += 1;
            r += 1;
            locked = true;
        } else {
            if locked {
                return false;
            }
            i += 1;
        }
    }

    r == steps.len() && (!locked || i == segments.len())
}
