//! Exclusive XML Canonicalization 1.0 (without comments).
//!
//! Implements `http://www.w3.org/2001/10/xml-exc-c14n#` over an
//! [`XmlElement`] sub-tree in two passes:
//!
//! 1. The sub-tree is rendered with exactly the namespace declarations the
//!    exclusive algorithm emits: namespaces visibly utilized by an element or
//!    its attributes, plus those in the `InclusiveNamespaces` prefix list, each
//!    at most once along an output ancestor chain.
//! 2. That document is passed through [`xml_canonicalization::Canonicalizer`],
//!    which produces the canonical serialization (sorted declarations and
//!    attributes, start/end tag pairs, canonical escaping).
//!
//! Once every element declares only what it renders, canonical XML of the
//! rendered document equals the exclusive canonical form of the sub-tree.

use std::collections::BTreeMap;

use xml_canonicalization::Canonicalizer;

use super::{NamespaceScope, XmlElement, XmlNode};
use crate::StsResult;
use crate::error::StsError;

/// Canonicalizes `element` as the apex of a document subset.
///
/// `scope` carries the namespace bindings inherited from the element's
/// ancestors in the original document; `inclusive_prefixes` is the
/// `InclusiveNamespaces PrefixList` (`#default` names the default namespace).
///
/// # Errors
///
/// Returns a protocol error if the canonicalizer rejects the rendered sub-tree.
pub fn canonicalize(
    element: &XmlElement,
    scope: &NamespaceScope,
    inclusive_prefixes: &[String],
) -> StsResult<String> {
    let rendered = render_exclusive(element, scope, inclusive_prefixes);

    let mut output = Vec::new();
    Canonicalizer::read_from_str(&rendered)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| StsError::protocol(format!("XML canonicalization failed: {e}")))?;

    String::from_utf8(output)
        .map_err(|e| StsError::protocol(format!("Canonical XML is not UTF-8: {e}")))
}

/// Renders `element` carrying only the namespace declarations of its
/// exclusive canonical form.
fn render_exclusive(
    element: &XmlElement,
    scope: &NamespaceScope,
    inclusive_prefixes: &[String],
) -> String {
    let inclusive: Vec<&str> = inclusive_prefixes
        .iter()
        .map(|p| if p == "#default" { "" } else { p.as_str() })
        .collect();
    let mut out = String::new();
    write_element(&mut out, element, scope, &BTreeMap::new(), &inclusive);
    out
}

fn write_element(
    out: &mut String,
    element: &XmlElement,
    parent_scope: &NamespaceScope,
    rendered: &BTreeMap<String, String>,
    inclusive: &[&str],
) {
    let scope = parent_scope.enter(element);

    // Prefixes this element needs, keyed "" for the default namespace.
    let mut utilized: BTreeMap<&str, &str> = BTreeMap::new();
    let element_prefix = element.prefix.as_deref().unwrap_or("");
    utilized.insert(
        element_prefix,
        scope.resolve(element.prefix.as_deref()).unwrap_or(""),
    );
    for attr in &element.attributes {
        if let Some(prefix) = attr.prefix.as_deref()
            && prefix != "xml"
        {
            utilized.insert(prefix, scope.resolve(Some(prefix)).unwrap_or(""));
        }
    }
    for prefix in inclusive {
        if let Some(uri) = scope.resolve((!prefix.is_empty()).then_some(*prefix)) {
            utilized.insert(prefix, uri);
        }
    }

    let mut now_rendered = rendered.clone();
    let mut declarations = Vec::new();
    for (prefix, uri) in utilized {
        if prefix == "xml" {
            continue;
        }
        let previous = rendered.get(prefix).map_or("", String::as_str);
        if previous == uri {
            continue;
        }
        declarations.push((prefix, uri));
        now_rendered.insert(prefix.to_string(), uri.to_string());
    }

    let qname = element.qname();
    out.push('<');
    out.push_str(&qname);
    for (prefix, uri) in declarations {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attr(uri));
        out.push('"');
    }
    for attr in &element.attributes {
        out.push(' ');
        out.push_str(&attr.qname());
        out.push_str("=\"");
        out.push_str(&escape_attr(&attr.value));
        out.push('"');
    }
    out.push('>');

    for node in &element.children {
        match node {
            XmlNode::Element(child) => {
                write_element(out, child, &scope, &now_rendered, inclusive);
            }
            XmlNode::Text(text) => out.push_str(&escape_text(text)),
        }
    }

    out.push_str("</");
    out.push_str(&qname);
    out.push('>');
}

/// Escapes character data for canonical output.
#[must_use]
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
    out
}

/// Escapes an attribute value for canonical output.
#[must_use]
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
    out
}
