// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! XML plumbing: a quick-xml event reader feeding an owned element tree,
//! and the byte emitter used for replies, notifications and startup
//! persistence.

use quick_xml::{events::Event, name::ResolveResult, reader::NsReader};

use crate::{
    datastore::value::{NodeRef, ValueNode, ValueTree},
    error::{ErrorKind, RpcError},
    yang::typedef::ScalarValue,
};

/// An owned XML element with resolved namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    /// Resolved namespace URI; empty when unbound.
    pub namespace: String,
    /// Attributes by local name (namespace prefixes stripped).
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }
}

fn malformed(msg: impl Into<String>) -> RpcError {
    RpcError::rpc(ErrorKind::MalformedMessage).with_message(msg)
}

/// Parses one XML document into an element tree.
pub fn parse_element(bytes: &[u8]) -> Result<XmlElement, RpcError> {
    let mut reader = NsReader::from_reader(bytes);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| malformed(format!("xml parse error: {e}")))?;
        match event {
            Event::Start(ref start) => {
                stack.push(read_start(&reader, start)?);
            },
            Event::Empty(ref start) => {
                let elem = read_start(&reader, start)?;
                if stack.is_empty() {
                    // A single self-closed element is a whole document.
                    return Ok(elem);
                }
                push_child(&mut stack, elem)?;
            },
            Event::Text(t) => {
                let txt = t
                    .unescape()
                    .map_err(|e| malformed(format!("bad text content: {e}")))?;
                // Indentation between elements is not content.
                if !txt.trim().is_empty()
                    && let Some(top) = stack.last_mut()
                {
                    top.text.push_str(txt.trim());
                }
            },
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(t.as_ref()));
                }
            },
            Event::End(_) => {
                let done = stack
                    .pop()
                    .ok_or_else(|| malformed("unbalanced end tag"))?;
                if stack.is_empty() {
                    return Ok(done);
                }
                push_child(&mut stack, done)?;
            },
            Event::Eof => {
                return Err(malformed("truncated document"));
            },
            // Declarations, comments and PIs are skipped.
            _ => {},
        }
        buf.clear();
    }
}

fn push_child(stack: &mut [XmlElement], elem: XmlElement) -> Result<(), RpcError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(elem);
            Ok(())
        },
        None => Err(malformed("element outside the document root")),
    }
}

fn read_start(
    reader: &NsReader<&[u8]>,
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<XmlElement, RpcError> {
    let (ns, local) = reader.resolve_element(start.name());
    let name = String::from_utf8_lossy(local.as_ref()).into_owned();
    let namespace = match ns {
        ResolveResult::Bound(n) => String::from_utf8_lossy(n.as_ref()).into_owned(),
        _ => String::new(),
    };

    let mut elem = XmlElement::new(name);
    elem.namespace = namespace;
    for attr in start.attributes() {
        let attr = attr.map_err(|e| malformed(format!("bad attribute: {e}")))?;
        let key = attr.key;
        // xmlns declarations are consumed by the namespace resolver.
        if key.as_ref() == b"xmlns" || key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let local = key.local_name();
        let value = attr
            .unescape_value()
            .map_err(|e| malformed(format!("bad attribute value: {e}")))?;
        elem.attrs.push((
            String::from_utf8_lossy(local.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok(elem)
}

fn escape_into(out: &mut Vec<u8>, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            '"' => out.extend_from_slice(b"&quot;"),
            '\'' => out.extend_from_slice(b"&apos;"),
            _ => {
                let mut b = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut b).as_bytes());
            },
        }
    }
}

/// Serializes an element tree back to bytes.
pub fn emit_element(elem: &XmlElement) -> Vec<u8> {
    let mut out = Vec::new();
    emit_into(&mut out, elem);
    out
}

fn emit_into(out: &mut Vec<u8>, elem: &XmlElement) {
    out.push(b'<');
    out.extend_from_slice(elem.name.as_bytes());
    if !elem.namespace.is_empty() {
        out.extend_from_slice(b" xmlns=\"");
        escape_into(out, &elem.namespace);
        out.push(b'"');
    }
    for (k, v) in &elem.attrs {
        out.push(b' ');
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(b"=\"");
        escape_into(out, v);
        out.push(b'"');
    }
    if elem.children.is_empty() && elem.text.is_empty() {
        out.extend_from_slice(b"/>");
        return;
    }
    out.push(b'>');
    escape_into(out, &elem.text);
    for c in &elem.children {
        emit_into(out, c);
    }
    out.extend_from_slice(b"</");
    out.extend_from_slice(elem.name.as_bytes());
    out.push(b'>');
}

/// Converts a value subtree into an element tree for emission.
pub fn value_subtree_to_element(tree: &ValueTree, node: NodeRef) -> XmlElement {
    let vn = tree.get(node);
    let mut elem = XmlElement::new(vn.name.clone());
    if let Some(text) = tree.canonical_value(node) {
        elem.text = text;
    }
    for child in tree.children(node) {
        elem.children.push(value_subtree_to_element(tree, child));
    }
    elem
}

/// Serializes a whole value tree (startup persistence).
pub fn emit_value_tree(tree: &ValueTree) -> Vec<u8> {
    emit_element(&value_subtree_to_element(tree, tree.root()))
}

/// Parses a persisted value tree back. Payloads come back as text scalars;
/// typed payloads reappear when the content is validated against the
/// schema on load.
pub fn parse_value_tree(bytes: &[u8]) -> Result<ValueTree, RpcError> {
    let root_elem = parse_element(bytes)?;
    let mut tree = ValueTree::with_root(root_elem.name.clone());
    let root = tree.root();
    for child in &root_elem.children {
        element_into_tree(&mut tree, root, child);
    }
    Ok(tree)
}

fn element_into_tree(tree: &mut ValueTree, parent: NodeRef, elem: &XmlElement) {
    let mut node = ValueNode::new(elem.name.clone());
    if elem.children.is_empty() && !elem.text.is_empty() {
        node.payload = Some(ScalarValue::Text(elem.text.trim().to_string()));
    }
    for (k, v) in &elem.attrs {
        node.attrs.insert(k.clone(), v.clone());
    }
    let r = tree.append_child(parent, node);
    for child in &elem.children {
        element_into_tree(tree, r, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_config() {
        let doc = br#"<config xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <foo xmlns="uri:x"><bar>7</bar></foo></config>"#;
        let elem = parse_element(doc).expect("parse");
        assert_eq!(elem.name, "config");
        assert_eq!(elem.namespace, "urn:ietf:params:xml:ns:netconf:base:1.0");
        let foo = elem.child("foo").expect("foo");
        assert_eq!(foo.namespace, "uri:x");
        assert_eq!(foo.child_text("bar"), Some("7"));
    }

    #[test]
    fn prefixed_operation_attribute_is_local() {
        let doc = br#"<config xmlns="u" xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
            <item nc:operation="delete"/></config>"#;
        let elem = parse_element(doc).expect("parse");
        assert_eq!(elem.children[0].attr("operation"), Some("delete"));
    }

    #[test]
    fn rejects_truncated_document() {
        let err = parse_element(b"<a><b></b>").expect_err("truncated");
        assert_eq!(err.kind, ErrorKind::MalformedMessage);
    }

    #[test]
    fn emit_escapes_text() {
        let mut e = XmlElement::new("v");
        e.text = "a<b&c".into();
        assert_eq!(emit_element(&e), b"<v>a&lt;b&amp;c</v>".to_vec());
    }

    #[test]
    fn value_tree_roundtrip() {
        let doc = b"<data><system><hostname>nc1</hostname></system></data>";
        let tree = parse_value_tree(doc).expect("parse");
        let out = emit_value_tree(&tree);
        assert_eq!(out, doc.to_vec());
    }
}
