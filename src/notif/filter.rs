// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::{
    datastore::value::{NodeRef, ValueTree},
    xml::XmlElement,
    xpath,
};

/// A compiled subscription filter.
#[derive(Debug, Clone)]
pub enum NotifFilter {
    /// Structural subtree filter (RFC 6241 §6).
    Subtree(XmlElement),
    /// XPath filter evaluated with the event as the context node.
    Xpath(xpath::Path),
}

impl NotifFilter {
    /// True when the event payload passes the filter.
    pub fn matches(&self, payload: &ValueTree) -> bool {
        match self {
            Self::Subtree(filter) => {
                if filter.children.is_empty() {
                    // An empty filter selects nothing at all.
                    return false;
                }
                filter
                    .children
                    .iter()
                    .any(|sel| subtree_match(sel, payload, payload.root()))
            },
            Self::Xpath(path) => !path.eval(payload, payload.root()).is_empty(),
        }
    }
}

/// A filter node matches a payload node iff the names agree, any content
/// text agrees, and every filter child matches some payload child.
fn subtree_match(filter: &XmlElement, tree: &ValueTree, node: NodeRef) -> bool {
    if filter.name != tree.name(node) {
        return false;
    }
    let content = filter.text.trim();
    if !content.is_empty()
        && tree.canonical_value(node).as_deref() != Some(content)
    {
        return false;
    }
    filter.children.iter().all(|fc| {
        tree.children(node)
            .any(|child| subtree_match(fc, tree, child))
    })
}
