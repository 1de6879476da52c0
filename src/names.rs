//! XML name validation and identifier laundering
//!
//! This module validates XML names and NCNames and turns arbitrary XML local
//! names / URL fragments into identifiers safe to use as table, column, and
//! cache-file names.

use once_cell::sync::Lazy;
use regex::Regex;

static NCNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-\.]*$").unwrap());

/// Check if a string is a valid NCName (non-colonized name)
pub fn is_valid_ncname(name: &str) -> bool {
    !name.contains(':') && NCNAME.is_match(name)
}

/// Check if a string is a valid QName (qualified name)
pub fn is_valid_qname(name: &str) -> bool {
    if let Some((prefix, local)) = name.split_once(':') {
        is_valid_ncname(prefix) && is_valid_ncname(local)
    } else {
        is_valid_ncname(name)
    }
}

/// Split a QName into prefix and local name
pub fn split_qname(qname: &str) -> (Option<&str>, &str) {
    if let Some((prefix, local)) = qname.split_once(':') {
        (Some(prefix), local)
    } else {
        (None, qname)
    }
}

/// Turn an XML local name into an identifier usable as a table or column name
///
/// Dots and dashes (legal in NCNames) are mapped to underscores so that the
/// result stays within the `[A-Za-z0-9_]` set most storage backends accept.
pub fn launder_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        out.insert(0, '_');
    }
    out
}

/// Turn a URL into a file name usable as a cache entry
///
/// The scheme is stripped and every byte outside `[A-Za-z0-9.]` becomes an
/// underscore, so distinct URLs map to distinct, filesystem-safe names.
pub fn launder_url(url: &str) -> String {
    let stripped = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    stripped
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_ncname() {
        assert!(is_valid_ncname("element"));
        assert!(is_valid_ncname("my-element"));
        assert!(is_valid_ncname("_element"));
        assert!(is_valid_ncname("element123"));

        assert!(!is_valid_ncname(""));
        assert!(!is_valid_ncname("123element"));
        assert!(!is_valid_ncname("a:b"));
    }

    #[test]
    fn test_is_valid_qname() {
        assert!(is_valid_qname("myns:element"));
        assert!(is_valid_qname("element"));
        assert!(!is_valid_qname(":element"));
        assert!(!is_valid_qname("myns:"));
        assert!(!is_valid_qname("a:b:c"));
    }

    #[test]
    fn test_split_qname() {
        assert_eq!(split_qname("myns:elt"), (Some("myns"), "elt"));
        assert_eq!(split_qname("elt"), (None, "elt"));
    }

    #[test]
    fn test_launder_name() {
        assert_eq!(launder_name("main_elt"), "main_elt");
        assert_eq!(launder_name("my-element.v2"), "my_element_v2");
        assert_eq!(launder_name("2d"), "_2d");
    }

    #[test]
    fn test_launder_url() {
        assert_eq!(
            launder_url("http://example.com/schemas/main.xsd"),
            "example.com_schemas_main.xsd"
        );
        assert_eq!(
            launder_url("https://example.com/a?b=c"),
            "example.com_a_b_c"
        );
    }
}
