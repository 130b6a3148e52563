//! XPath evaluation over XML values.

use super::variant::format_double;

use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
use sxd_document::parser;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{evaluate_xpath, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XPathError {
    #[error("cannot parse xml value: {0}")]
    Xml(String),
    #[error("cannot parse xpath: {0}")]
    Expression(String),
    #[error("invalid numeric value")]
    NotFinite,
}

/// Evaluate `expression` against the XML `text` and stringify the result.
///
/// Node sets are serialized in document order and concatenated; an empty
/// node set yields an empty string.
pub fn evaluate(text: &str, expression: &str) -> Result<String, XPathError> {
    let package = parser::parse(text).map_err(|e| XPathError::Xml(e.to_string()))?;
    let document = package.as_document();

    let value =
        evaluate_xpath(&document, expression).map_err(|e| XPathError::Expression(e.to_string()))?;

    match value {
        Value::Nodeset(nodes) => {
            let mut out = String::new();
            for node in nodes.document_order() {
                dump_node(node, &mut out);
            }
            Ok(out)
        }
        Value::String(s) => Ok(s),
        Value::Boolean(b) => Ok(if b { "1" } else { "0" }.to_string()),
        Value::Number(n) => {
            if !n.is_finite() {
                return Err(XPathError::NotFinite);
            }
            Ok(format_double(n))
        }
    }
}

fn dump_node(node: Node<'_>, out: &mut String) {
    match node {
        Node::Root(root) => {
            for child in root.children() {
                match child {
                    ChildOfRoot::Element(e) => dump_element(e, out),
                    ChildOfRoot::Comment(c) => push_comment(c.text(), out),
                    ChildOfRoot::ProcessingInstruction(pi) => {
                        push_pi(pi.target(), pi.value(), out)
                    }
                }
            }
        }
        Node::Element(e) => dump_element(e, out),
        Node::Attribute(a) => {
            out.push_str(&qualified(a.preferred_prefix(), a.name().local_part()));
            out.push_str("=\"");
            push_escaped(a.value(), true, out);
            out.push('"');
        }
        Node::Text(t) => push_escaped(t.text(), false, out),
        Node::Comment(c) => push_comment(c.text(), out),
        Node::ProcessingInstruction(pi) => push_pi(pi.target(), pi.value(), out),
        Node::Namespace(ns) => out.push_str(ns.uri()),
    }
}

fn dump_element(element: Element<'_>, out: &mut String) {
    let name = qualified(element.preferred_prefix(), element.name().local_part());

    out.push('<');
    out.push_str(&name);
    for attribute in element.attributes() {
        out.push(' ');
        out.push_str(&qualified(
            attribute.preferred_prefix(),
            attribute.name().local_part(),
        ));
        out.push_str("=\"");
        push_escaped(attribute.value(), true, out);
        out.push('"');
    }

    let children = element.children();
    if children.is_empty() {
        out.push_str("/>");
        return;
    }

    out.push('>');
    for child in children {
        match child {
            ChildOfElement::Element(e) => dump_element(e, out),
            ChildOfElement::Text(t) => push_escaped(t.text(), false, out),
            ChildOfElement::Comment(c) => push_comment(c.text(), out),
            ChildOfElement::ProcessingInstruction(pi) => push_pi(pi.target(), pi.value(), out),
        }
    }
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) => format!("{}:{}", p, local),
        None => local.to_string(),
    }
}

fn push_comment(text: &str, out: &mut String) {
    out.push_str("<!--");
    out.push_str(text);
    out.push_str("-->");
}

fn push_pi(target: &str, value: Option<&str>, out: &mut String) {
    out.push_str("<?");
    out.push_str(target);
    if let Some(v) = value {
        out.push(' ');
        out.push_str(v);
    }
    out.push_str("?>");
}

fn push_escaped(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
