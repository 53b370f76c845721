// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `<lock>` / `<unlock>` plus RFC 5717 partial locks.

use crate::{
    error::{ErrorKind, RpcError},
    handlers::{HandlerReply, HandlerResult, get::named_store},
    server::state::ServerState,
    xml::XmlElement,
    xpath,
};

pub fn lock(state: &mut ServerState, sid: u64, op: &XmlElement) -> HandlerResult {
    let target = named_store(op, "target")?;
    state.locks.lock_global(target, sid)?;
    Ok(HandlerReply::Ok)
}

pub fn unlock(state: &mut ServerState, sid: u64, op: &XmlElement) -> HandlerResult {
    let target = named_store(op, "target")?;
    state.locks.unlock_global(target, sid)?;
    Ok(HandlerReply::Ok)
}

/// `<partial-lock>`: selects a node-set in running and locks it.
pub fn partial_lock(state: &mut ServerState, sid: u64, op: &XmlElement) -> HandlerResult {
    if !state.cfg.protocol.partial_lock {
        return Err(RpcError::protocol(ErrorKind::OperationNotSupported)
            .with_message("partial-lock is not enabled"));
    }
    let selects: Vec<&str> = op
        .children
        .iter()
        .filter(|c| c.name == "select")
        .map(|c| c.text.trim())
        .collect();
    if selects.is_empty() {
        return Err(RpcError::protocol(ErrorKind::MissingElement)
            .with_message("partial-lock requires at least one <select>"));
    }

    let tree = &state.stores.running.tree;
    let mut locked_paths = Vec::new();
    for select in selects {
        let path = xpath::Path::compile(select).map_err(|e| {
            RpcError::protocol(ErrorKind::InvalidValue)
                .with_message(format!("bad select expression: {e}"))
        })?;
        for node in path.eval(tree, tree.root()) {
            locked_paths.push(tree.instance_path(node));
        }
    }
    if locked_paths.is_empty() {
        return Err(RpcError::new(ErrorKind::OperationFailed)
            .with_app_tag("no-matches")
            .with_message("select matched no nodes"));
    }

    let lock_id = state.locks.lock_partial(
        crate::datastore::store::DatastoreName::Running,
        sid,
        locked_paths.clone(),
    )?;

    let mut children = Vec::new();
    let mut id_elem = XmlElement::new("lock-id");
    id_elem.text = lock_id.to_string();
    children.push(id_elem);
    for p in locked_paths {
        let mut n = XmlElement::new("locked-node");
        n.text = p;
        children.push(n);
    }
    Ok(HandlerReply::Elems(children))
}

pub fn partial_unlock(state: &mut ServerState, sid: u64, op: &XmlElement) -> HandlerResult {
    let lock_id: u32 = op
        .child_text("lock-id")
        .ok_or_else(|| {
            RpcError::protocol(ErrorKind::MissingElement).with_message("missing <lock-id>")
        })?
        .parse()
        .map_err(|_| {
            RpcError::protocol(ErrorKind::InvalidValue).with_message("bad lock-id")
        })?;
    state.locks.unlock_partial(
        crate::datastore::store::DatastoreName::Running,
        sid,
        lock_id,
    )?;
    Ok(HandlerReply::Ok)
}
