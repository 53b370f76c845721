// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::{
    datastore::{store::DatastoreName, value::{NodeRef, ValueTree}},
    error::{ErrorKind, RpcError},
    handlers::{HandlerReply, HandlerResult},
    server::state::ServerState,
    xml::{self, XmlElement},
    xpath,
    yang::schema::SchemaContext,
};

/// Extracts the datastore name from a `<source>` / `<target>` container.
pub(crate) fn named_store(
    op: &XmlElement,
    container: &str,
) -> Result<DatastoreName, RpcError> {
    let holder = op.child(container).ok_or_else(|| {
        RpcError::protocol(ErrorKind::MissingElement)
            .with_message(format!("missing <{container}>"))
    })?;
    let inner = holder.children.first().ok_or_else(|| {
        RpcError::protocol(ErrorKind::MissingElement)
            .with_message(format!("empty <{container}>"))
    })?;
    DatastoreName::parse(&inner.name).ok_or_else(|| {
        RpcError::protocol(ErrorKind::InvalidValue)
            .with_message(format!("unknown datastore '{}'", inner.name))
    })
}

fn store_tree<'a>(
    state: &'a ServerState,
    name: DatastoreName,
) -> Result<&'a ValueTree, RpcError> {
    state
        .stores
        .get(name)
        .map(|s| &s.tree)
        .ok_or_else(|| {
            RpcError::protocol(ErrorKind::InvalidValue)
                .with_message(format!("datastore '{name}' is not configured"))
        })
}

/// `<get>`: running config plus state data, virtual leaves read through.
pub fn get(state: &mut ServerState, _sid: u64, op: &XmlElement) -> HandlerResult {
    let tree = &state.stores.running.tree;
    let mut data = emit_children(&state.schema, tree, tree.root(), false);
    data = apply_filter(op, tree, data)?;
    Ok(HandlerReply::Data(data))
}

/// `<get-config>`: configuration only; state subtrees are omitted.
pub fn get_config(state: &mut ServerState, _sid: u64, op: &XmlElement) -> HandlerResult {
    let source = named_store(op, "source")?;
    let tree = store_tree(state, source)?;
    let mut data = emit_children(&state.schema, tree, tree.root(), true);
    data = apply_filter(op, tree, data)?;
    Ok(HandlerReply::Data(data))
}

fn apply_filter(
    op: &XmlElement,
    tree: &ValueTree,
    data: Vec<XmlElement>,
) -> Result<Vec<XmlElement>, RpcError> {
    let Some(filter) = op.child("filter") else {
        return Ok(data);
    };
    match filter.attr("type").unwrap_or("subtree") {
        "subtree" => Ok(filter_children(&data, &filter.children)),
        "xpath" => {
            let select = filter.attr("select").ok_or_else(|| {
                RpcError::protocol(ErrorKind::MissingAttribute)
                    .with_message("xpath filter requires a select attribute")
            })?;
            let path = xpath::Path::compile(select).map_err(|e| {
                RpcError::protocol(ErrorKind::InvalidValue)
                    .with_message(format!("bad select expression: {e}"))
            })?;
            let hits = path.eval(tree, tree.root());
            Ok(hits
                .into_iter()
                .map(|n| xml::value_subtree_to_element(tree, n))
                .collect())
        },
        other => Err(RpcError::protocol(ErrorKind::BadAttribute)
            .with_message(format!("unknown filter type '{other}'"))),
    }
}

/// Emits the children of `node`, skipping state data when `config_only`.
fn emit_children(
    schema: &SchemaContext,
    tree: &ValueTree,
    node: NodeRef,
    config_only: bool,
) -> Vec<XmlElement> {
    tree.children(node)
        .filter_map(|c| emit_subtree(schema, tree, c, config_only))
        .collect()
}

fn emit_subtree(
    schema: &SchemaContext,
    tree: &ValueTree,
    node: NodeRef,
    config_only: bool,
) -> Option<XmlElement> {
    let vn = tree.get(node);
    if config_only {
        if vn.is_virtual() {
            return None;
        }
        if let Some(snode) = vn.schema
            && !schema.node(snode).config
        {
            return None;
        }
    }
    let mut elem = XmlElement::new(vn.name.clone());
    if let Some(snode) = vn.schema
        && vn.parent == Some(tree.root())
    {
        elem.namespace = schema.module(snode.module).namespace.clone();
    }
    if let Some(text) = tree.canonical_value(node) {
        elem.text = text;
    }
    elem.children = emit_children(schema, tree, node, config_only);
    Some(elem)
}

/// RFC 6241 §6 subtree filtering over emitted elements.
///
/// Selector nodes (no content) pull whole subtrees; content-match nodes
/// act as predicates and ride along in the output.
fn filter_children(data: &[XmlElement], selectors: &[XmlElement]) -> Vec<XmlElement> {
    if selectors.is_empty() {
        return data.to_vec();
    }
    let mut out = Vec::new();
    for d in data {
        for f in selectors.iter().filter(|f| f.name == d.name) {
            if let Some(kept) = filter_one(d, f) {
                out.push(kept);
                break;
            }
        }
    }
    out
}

fn filter_one(d: &XmlElement, f: &XmlElement) -> Option<XmlElement> {
    // A leaf selector with content is an exact-match predicate on itself.
    if f.children.is_empty() {
        let want = f.text.trim();
        if !want.is_empty() && d.text.trim() != want {
            return None;
        }
        return Some(d.clone());
    }

    let (matches, selections): (Vec<&XmlElement>, Vec<&XmlElement>) = f
        .children
        .iter()
        .partition(|c| c.children.is_empty() && !c.text.trim().is_empty());

    // Every content-match must hold on this node.
    for cm in &matches {
        let hit = d
            .children
            .iter()
            .any(|dc| dc.name == cm.name && dc.text.trim() == cm.text.trim());
        if !hit {
            return None;
        }
    }

    if selections.is_empty() {
        // Predicate-only filter selects the whole entry.
        return Some(d.clone());
    }

    let selections: Vec<XmlElement> = selections.into_iter().cloned().collect();
    let kept = filter_children(&d.children, &selections);
    if kept.is_empty() {
        return None;
    }
    let mut out = d.clone();
    out.children = Vec::new();
    // Content-match leaves are part of the response (list keys).
    for cm in &matches {
        if let Some(leaf) = d.children.iter().find(|dc| dc.name == cm.name) {
            out.children.push(leaf.clone());
        }
    }
    out.children.extend(kept);
    Some(out)
}
