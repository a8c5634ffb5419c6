//! Owned, mutable SVG element tree.
//!
//! `roxmltree` gives a read-only view of a document, but preparing an
//! accessory means deleting `<style>` blocks and rewriting `class`
//! attributes, and composing means grafting subtrees from several documents
//! into one. This module copies a parsed document into plain owned nodes
//! that can be edited freely and written back out as XML.

use roxmltree::{Document, ParsingOptions};

/// The SVG namespace URI.
pub const SVG_NS: &str = "http://www.w3.org/2000/svg";

/// Bound to the `xml` prefix implicitly; never declared.
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

// ============================================================================
// Node Types
// ============================================================================

/// A node in an SVG tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

/// A namespace declared on an element (`xmlns` or `xmlns:prefix`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    /// `None` for the default namespace.
    pub prefix: Option<String>,
    pub uri: String,
}

/// An attribute with its qualified name as written (`class`, `xlink:href`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// An element with its qualified name, attributes, and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub namespaces: Vec<NamespaceDecl>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    /// Creates an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style variant of [`set_attribute`](Self::set_attribute).
    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Parses an XML document and returns its root element.
    pub fn parse(text: &str) -> Result<Self, roxmltree::Error> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(text, options)?;
        Ok(convert_element(doc.root_element()))
    }

    /// The name without any namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name
            .split_once(':')
            .map_or(self.name.as_str(), |(_, local)| local)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Sets an attribute, replacing its value in place if already present.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|attr| attr.name == name) {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Declares a namespace unless a declaration for the same prefix exists.
    pub fn declare_namespace(&mut self, decl: NamespaceDecl) {
        if !self.namespaces.iter().any(|ns| ns.prefix == decl.prefix) {
            self.namespaces.push(decl);
        }
    }

    /// Iterates over child elements, skipping text and comments.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        collect_text(self, &mut text);
        text
    }

    /// Calls `f` on this element and every descendant element, parents first.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        f(self);
        for child in &mut self.children {
            if let Node::Element(element) = child {
                element.visit_mut(f);
            }
        }
    }

    /// Calls `f` on this element and every descendant element, parents first.
    pub fn visit(&self, f: &mut impl FnMut(&Element)) {
        f(self);
        for element in self.child_elements() {
            element.visit(f);
        }
    }

    /// Removes every descendant element with the given local name and
    /// returns the removed elements in document order.
    pub fn take_descendants(&mut self, local_name: &str) -> Vec<Element> {
        let mut taken = Vec::new();
        take_matching(self, local_name, &mut taken);
        taken
    }

    /// Drops whitespace-only text nodes and comments from the whole subtree.
    pub fn strip_insignificant(&mut self) {
        self.children.retain(|node| match node {
            Node::Text(text) => !text.trim().is_empty(),
            Node::Comment(_) => false,
            Node::Element(_) => true,
        });
        for child in &mut self.children {
            if let Node::Element(element) = child {
                element.strip_insignificant();
            }
        }
    }

    /// Serializes the element and its subtree to an XML string.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for ns in &self.namespaces {
            match &ns.prefix {
                Some(prefix) => {
                    out.push_str(" xmlns:");
                    out.push_str(prefix);
                }
                None => out.push_str(" xmlns"),
            }
            out.push_str("=\"");
            escape_into(&ns.uri, true, out);
            out.push('"');
        }
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name);
            out.push_str("=\"");
            escape_into(&attr.value, true, out);
            out.push('"');
        }

        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }

        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(element) => element.write_xml(out),
                Node::Text(text) => escape_into(text, false, out),
                Node::Comment(text) => {
                    out.push_str("<!--");
                    out.push_str(text);
                    out.push_str("-->");
                }
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn convert_element(node: roxmltree::Node<'_, '_>) -> Element {
    let mut element = Element::new(qualified_name(
        node,
        node.tag_name().namespace(),
        node.tag_name().name(),
    ));

    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|parent| parent.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    for ns in node.namespaces() {
        if ns.uri() != XML_NS && !inherited.contains(&(ns.name(), ns.uri())) {
            element.namespaces.push(NamespaceDecl {
                prefix: ns.name().map(str::to_string),
                uri: ns.uri().to_string(),
            });
        }
    }

    for attr in node.attributes() {
        element.attributes.push(Attribute {
            name: qualified_name(node, attr.namespace(), attr.name()),
            value: attr.value().to_string(),
        });
    }

    for child in node.children() {
        if child.is_element() {
            element.children.push(Node::Element(convert_element(child)));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                element.children.push(Node::Text(text.to_string()));
            }
        } else if child.is_comment() {
            if let Some(text) = child.text() {
                element.children.push(Node::Comment(text.to_string()));
            }
        }
    }

    element
}

fn qualified_name(node: roxmltree::Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    match namespace.and_then(|uri| node.lookup_prefix(uri)) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => collect_text(element, out),
            Node::Comment(_) => {}
        }
    }
}

fn take_matching(element: &mut Element, local_name: &str, taken: &mut Vec<Element>) {
    let children = std::mem::take(&mut element.children);
    for child in children {
        match child {
            Node::Element(child) if child.local_name() == local_name => taken.push(child),
            Node::Element(mut child) => {
                take_matching(&mut child, local_name, taken);
                element.children.push(Node::Element(child));
            }
            other => element.children.push(other),
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\n' if attribute => out.push_str("&#10;"),
            '\t' if attribute => out.push_str("&#9;"),
            _ => out.push(ch),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HAT: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" viewBox="0 0 10 10">
  <!-- brim -->
  <style>.brim { fill: red }</style>
  <g><path class="brim" d="M0 0h10"/><use xlink:href="#a"/></g>
</svg>"##;

    #[test]
    fn parses_names_namespaces_and_attributes() {
        let root = Element::parse(HAT).unwrap();

        assert_eq!(root.name, "svg");
        assert_eq!(root.attribute("viewBox"), Some("0 0 10 10"));
        assert_eq!(
            root.namespaces,
            vec![
                NamespaceDecl {
                    prefix: None,
                    uri: SVG_NS.into()
                },
                NamespaceDecl {
                    prefix: Some("xlink".into()),
                    uri: "http://www.w3.org/1999/xlink".into()
                },
            ]
        );

        let mut hrefs = Vec::new();
        root.visit(&mut |element| {
            if let Some(href) = element.attribute("xlink:href") {
                hrefs.push(href.to_string());
            }
        });
        assert_eq!(hrefs, vec!["#a"]);
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(Element::parse("<svg><g></svg>").is_err());
    }

    #[test]
    fn take_descendants_removes_style_blocks() {
        let mut root = Element::parse(HAT).unwrap();
        let styles = root.take_descendants("style");

        assert_eq!(styles.len(), 1);
        assert_eq!(styles[0].text_content(), ".brim { fill: red }");
        assert!(!root.to_xml().contains("<style"));
    }

    #[test]
    fn strip_insignificant_drops_whitespace_and_comments() {
        let mut root = Element::parse(HAT).unwrap();
        root.strip_insignificant();

        let xml = root.to_xml();
        assert!(!xml.contains("<!--"));
        assert!(!xml.contains("\n"));
        assert!(xml.contains("<style>.brim { fill: red }</style>"));
    }

    #[test]
    fn xml_round_trip_is_lossless() {
        let mut root = Element::parse(HAT).unwrap();
        root.set_attribute("data-note", "a \"quoted\" <value> & more");
        root.strip_insignificant();

        let reparsed = Element::parse(&root.to_xml()).unwrap();
        assert_eq!(reparsed, root);
    }

    #[test]
    fn set_attribute_replaces_in_place() {
        let mut element = Element::new("g")
            .with_attribute("id", "a")
            .with_attribute("class", "x");
        element.set_attribute("id", "b");

        assert_eq!(element.to_xml(), r#"<g id="b" class="x"/>"#);
    }
}
