//! Owned XML tree used by the SAML and WS-Trust code.
//!
//! Signing and verifying assertions needs more than a read-only parse: the
//! signer inserts a `Signature` element into a built assertion, the verifier
//! removes it again (enveloped-signature transform) and both canonicalize
//! sub-trees whose namespace declarations live on ancestors. [`XmlElement`]
//! keeps the prefixes, namespace declarations and attribute order of the input
//! so that [`c14n`] can produce exclusive canonical form from it.
//!
//! Comments and processing instructions are dropped on parse; document type
//! declarations are rejected.

pub mod c14n;

use std::borrow::Cow;
use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

use crate::StsResult;
use crate::error::StsError;

pub use c14n::canonicalize;

/// The namespace permanently bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

// ============================================================================
// Tree Types
// ============================================================================

/// A node in an element's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// A child element.
    Element(XmlElement),
    /// Character data (already unescaped).
    Text(String),
}

/// A namespace declaration (`xmlns` or `xmlns:prefix`) on an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    /// Declared prefix; `None` for the default namespace.
    pub prefix: Option<String>,
    /// Namespace URI; empty undeclares the default namespace.
    pub uri: String,
}

/// A non-namespace attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Attribute prefix, if qualified.
    pub prefix: Option<String>,
    /// Local name.
    pub name: String,
    /// Unescaped value.
    pub value: String,
}

impl XmlAttribute {
    /// Returns the qualified name as written.
    #[must_use]
    pub fn qname(&self) -> String {
        qualified(self.prefix.as_deref(), &self.name)
    }
}

/// An XML element with its namespace context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Element prefix, if qualified.
    pub prefix: Option<String>,
    /// Local name.
    pub name: String,
    /// Resolved namespace URI, if any.
    pub namespace: Option<String>,
    /// Namespace declarations made on this element.
    pub namespace_decls: Vec<NamespaceDecl>,
    /// Attributes in document order.
    pub attributes: Vec<XmlAttribute>,
    /// Child nodes in document order.
    pub children: Vec<XmlNode>,
}

/// In-scope namespace bindings, keyed by prefix (`""` for the default namespace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceScope {
    bindings: BTreeMap<String, String>,
}

impl Default for NamespaceScope {
    fn default() -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert("xml".to_string(), XML_NAMESPACE.to_string());
        Self { bindings }
    }
}

impl NamespaceScope {
    /// Resolves a prefix (`None` for the default namespace).
    ///
    /// An empty default namespace resolves to `None`.
    #[must_use]
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.bindings
            .get(prefix.unwrap_or(""))
            .map(String::as_str)
            .filter(|uri| !uri.is_empty())
    }

    /// Returns a new scope with the element's own declarations applied.
    #[must_use]
    pub fn enter(&self, element: &XmlElement) -> Self {
        if element.namespace_decls.is_empty() {
            return self.clone();
        }
        let mut scope = self.clone();
        for decl in &element.namespace_decls {
            scope.bindings.insert(
                decl.prefix.clone().unwrap_or_default(),
                decl.uri.clone(),
            );
        }
        scope
    }

    /// Iterates over `(prefix, uri)` pairs; the default namespace has prefix `""`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }
}

// ============================================================================
// Construction
// ============================================================================

impl XmlElement {
    /// Creates an element from a qualified name and its namespace URI.
    ///
    /// A prefixed name (`saml:Issuer`) expects the prefix to be declared on
    /// this element or an ancestor. An unprefixed name with a non-empty
    /// namespace declares that namespace as the default on this element.
    #[must_use]
    pub fn new(qname: &str, namespace: &str) -> Self {
        let (prefix, name) = split_qname(qname);
        let mut element = Self {
            prefix: prefix.map(String::from),
            name: name.to_string(),
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            namespace_decls: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        };
        if prefix.is_none() && !namespace.is_empty() {
            element.namespace_decls.push(NamespaceDecl {
                prefix: None,
                uri: namespace.to_string(),
            });
        }
        element
    }

    /// Declares a prefixed namespace on this element.
    #[must_use]
    pub fn with_ns(mut self, prefix: &str, uri: &str) -> Self {
        self.namespace_decls.push(NamespaceDecl {
            prefix: Some(prefix.to_string()),
            uri: uri.to_string(),
        });
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attr(mut self, qname: &str, value: impl Into<String>) -> Self {
        self.set_attr(qname, value);
        self
    }

    /// Adds a child element.
    #[must_use]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Adds text content.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Sets an attribute, replacing an existing one with the same name.
    pub fn set_attr(&mut self, qname: &str, value: impl Into<String>) {
        let (prefix, name) = split_qname(qname);
        let value = value.into();
        if let Some(existing) = self
            .attributes
            .iter_mut()
            .find(|a| a.prefix.as_deref() == prefix && a.name == name)
        {
            existing.value = value;
            return;
        }
        self.attributes.push(XmlAttribute {
            prefix: prefix.map(String::from),
            name: name.to_string(),
            value,
        });
    }

    /// Appends a child element.
    pub fn push_child(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// Inserts a child element right after the first child element matching
    /// `namespace`/`name`. Returns `false` if no such child exists.
    pub fn insert_child_after(&mut self, namespace: &str, name: &str, child: XmlElement) -> bool {
        let position = self.children.iter().position(
            |node| matches!(node, XmlNode::Element(e) if e.is(namespace, name)),
        );
        match position {
            Some(index) => {
                self.children.insert(index + 1, XmlNode::Element(child));
                true
            }
            None => false,
        }
    }

    /// Removes all child elements matching `namespace`/`name`.
    pub fn remove_children(&mut self, namespace: &str, name: &str) {
        self.children
            .retain(|node| !matches!(node, XmlNode::Element(e) if e.is(namespace, name)));
    }
}

// ============================================================================
// Queries
// ============================================================================

impl XmlElement {
    /// Returns the qualified name as written.
    #[must_use]
    pub fn qname(&self) -> String {
        qualified(self.prefix.as_deref(), &self.name)
    }

    /// Returns `true` if this element has the given namespace and local name.
    #[must_use]
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref().unwrap_or("") == namespace
    }

    /// Returns the value of an unqualified attribute.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.prefix.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Iterates over child elements.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Returns the first child element with the given namespace and name.
    #[must_use]
    pub fn child(&self, namespace: &str, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.is(namespace, name))
    }

    /// Iterates over child elements with the given namespace and name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> {
        self.elements().filter(move |e| e.is(namespace, name))
    }

    /// Finds the first descendant-or-self element in document order.
    #[must_use]
    pub fn find(&self, namespace: &str, name: &str) -> Option<&XmlElement> {
        if self.is(namespace, name) {
            return Some(self);
        }
        self.elements().find_map(|e| e.find(namespace, name))
    }

    /// Like [`find`](Self::find), but also returns the namespace scope the
    /// found element sits in (its ancestors' bindings).
    #[must_use]
    pub fn find_with_scope(
        &self,
        namespace: &str,
        name: &str,
        scope: &NamespaceScope,
    ) -> Option<(&XmlElement, NamespaceScope)> {
        if self.is(namespace, name) {
            return Some((self, scope.clone()));
        }
        let inner = scope.enter(self);
        self.elements()
            .find_map(|e| e.find_with_scope(namespace, name, &inner))
    }

    /// Concatenated text of the direct text children.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Text content with surrounding whitespace removed.
    #[must_use]
    pub fn trimmed_text(&self) -> String {
        self.text().trim().to_string()
    }

    /// Returns a copy that carries every binding inherited from `scope` that
    /// it does not redeclare itself, so it can be serialized stand-alone.
    ///
    /// Exclusive canonical form only renders visibly used namespaces, so the
    /// extra declarations do not change digests.
    #[must_use]
    pub fn detached(&self, scope: &NamespaceScope) -> XmlElement {
        let mut element = self.clone();
        for (prefix, uri) in scope.iter() {
            if prefix == "xml" || (prefix.is_empty() && uri.is_empty()) {
                continue;
            }
            let key = (!prefix.is_empty()).then_some(prefix);
            if element
                .namespace_decls
                .iter()
                .any(|d| d.prefix.as_deref() == key)
            {
                continue;
            }
            element.namespace_decls.push(NamespaceDecl {
                prefix: key.map(String::from),
                uri: uri.to_string(),
            });
        }
        element
    }
}

// ============================================================================
// Serialization
// ============================================================================

impl XmlElement {
    /// Serializes the element without an XML declaration.
    #[must_use]
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.qname());
        for decl in &self.namespace_decls {
            match &decl.prefix {
                Some(p) => {
                    out.push_str(" xmlns:");
                    out.push_str(p);
                }
                None => out.push_str(" xmlns"),
            }
            out.push_str("=\"");
            out.push_str(&c14n::escape_attr(&decl.uri));
            out.push('"');
        }
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.qname());
            out.push_str("=\"");
            out.push_str(&c14n::escape_attr(&attr.value));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                XmlNode::Element(e) => e.write_to(out),
                XmlNode::Text(t) => out.push_str(&c14n::escape_text(t)),
            }
        }
        out.push_str("</");
        out.push_str(&self.qname());
        out.push('>');
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses a document and returns its root element.
///
/// # Errors
///
/// Returns a protocol error for malformed XML, unbound prefixes, DTDs or
/// content outside the root element.
pub fn parse(xml: &str) -> StsResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    let base = NamespaceScope::default();
    let mut stack: Vec<(XmlElement, NamespaceScope)> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(&reader, e.to_string()))?;
        match event {
            Event::Start(start) => {
                let parent_scope = stack.last().map_or(&base, |(_, s)| s);
                let (element, scope) = start_element(&start, parent_scope)?;
                stack.push((element, scope));
            }
            Event::Empty(start) => {
                let parent_scope = stack.last().map_or(&base, |(_, s)| s);
                let (element, _) = start_element(&start, parent_scope)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let (element, _) = stack
                    .pop()
                    .ok_or_else(|| StsError::protocol("Unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let raw = std::str::from_utf8(&text)
                    .map_err(|e| StsError::protocol(format!("Invalid UTF-8 in text: {e}")))?;
                let normalized = normalize_newlines(raw);
                let value = unescape(&normalized)
                    .map_err(|e| StsError::protocol(format!("Invalid character data: {e}")))?;
                push_text(&mut stack, value.into_owned())?;
            }
            Event::CData(data) => {
                let value = String::from_utf8(data.into_inner().into_owned())
                    .map_err(|e| StsError::protocol(format!("Invalid UTF-8 in CDATA: {e}")))?;
                push_text(&mut stack, normalize_newlines(&value).into_owned())?;
            }
            Event::DocType(_) => {
                return Err(StsError::protocol("Document type declarations are not allowed"));
            }
            Event::Eof => break,
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(StsError::protocol("Unexpected end of document"));
    }
    root.ok_or_else(|| StsError::protocol("Document has no root element"))
}

fn start_element(
    start: &BytesStart<'_>,
    parent_scope: &NamespaceScope,
) -> StsResult<(XmlElement, NamespaceScope)> {
    let qname = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| StsError::protocol(format!("Invalid UTF-8 in element name: {e}")))?
        .to_string();
    let (prefix, name) = split_qname(&qname);

    let mut namespace_decls = Vec::new();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| StsError::protocol(format!("Malformed attribute: {e}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| StsError::protocol(format!("Invalid UTF-8 in attribute name: {e}")))?;
        let raw = std::str::from_utf8(&attr.value)
            .map_err(|e| StsError::protocol(format!("Invalid UTF-8 in attribute value: {e}")))?;
        let value = unescape(&normalize_attribute_whitespace(raw))
            .map_err(|e| StsError::protocol(format!("Invalid attribute value: {e}")))?
            .into_owned();

        if key == "xmlns" {
            namespace_decls.push(NamespaceDecl {
                prefix: None,
                uri: value,
            });
        } else if let Some(declared) = key.strip_prefix("xmlns:") {
            namespace_decls.push(NamespaceDecl {
                prefix: Some(declared.to_string()),
                uri: value,
            });
        } else {
            let (attr_prefix, attr_name) = split_qname(key);
            attributes.push(XmlAttribute {
                prefix: attr_prefix.map(String::from),
                name: attr_name.to_string(),
                value,
            });
        }
    }

    let mut element = XmlElement {
        prefix: prefix.map(String::from),
        name: name.to_string(),
        namespace: None,
        namespace_decls,
        attributes,
        children: Vec::new(),
    };
    let scope = parent_scope.enter(&element);

    element.namespace = scope.resolve(prefix).map(String::from);
    if prefix.is_some() && element.namespace.is_none() {
        return Err(StsError::protocol(format!(
            "Unbound namespace prefix in element '{qname}'"
        )));
    }
    for attr in &element.attributes {
        if let Some(p) = attr.prefix.as_deref()
            && scope.resolve(Some(p)).is_none()
        {
            return Err(StsError::protocol(format!(
                "Unbound namespace prefix in attribute '{}'",
                attr.qname()
            )));
        }
    }

    Ok((element, scope))
}

fn attach(
    stack: &mut [(XmlElement, NamespaceScope)],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> StsResult<()> {
    if let Some((parent, _)) = stack.last_mut() {
        parent.children.push(XmlNode::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(StsError::protocol("Document has more than one root element"));
    }
    *root = Some(element);
    Ok(())
}

fn push_text(stack: &mut [(XmlElement, NamespaceScope)], text: String) -> StsResult<()> {
    match stack.last_mut() {
        Some((parent, _)) => {
            if let Some(XmlNode::Text(previous)) = parent.children.last_mut() {
                previous.push_str(&text);
            } else {
                parent.children.push(XmlNode::Text(text));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(StsError::protocol("Text content outside the root element")),
    }
}

fn malformed(reader: &Reader<&[u8]>, message: String) -> StsError {
    StsError::protocol(format!(
        "Malformed XML at byte {}: {message}",
        reader.buffer_position()
    ))
}

/// Line-end handling from XML 1.0 section 2.11.
fn normalize_newlines(raw: &str) -> Cow<'_, str> {
    if raw.contains('\r') {
        Cow::Owned(raw.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

/// Attribute-value normalization for literal whitespace (XML 1.0 section 3.3.3).
fn normalize_attribute_whitespace(raw: &str) -> Cow<'_, str> {
    let normalized = normalize_newlines(raw);
    if normalized.contains(['\t', '\n']) {
        Cow::Owned(normalized.replace(['\t', '\n'], " "))
    } else {
        normalized
    }
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, qname),
    }
}

fn qualified(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) => format!("{p}:{name}"),
        None => name.to_string(),
    }
}
