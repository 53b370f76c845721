// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Datastore-mutating operations: `edit-config`, `copy-config`,
//! `delete-config`, `validate`, `commit`, `discard-changes`.

use chrono::{Duration, Utc};
use tracing::info;

use crate::{
    cfg::cli::resolve_file_url,
    datastore::{
        store::{DatastoreName, persist_startup},
        value::{NodeRef, ValueTree},
    },
    error::{ErrorKind, RpcError},
    handlers::{HandlerReply, HandlerResult, get::named_store},
    notif::event::sys_config_change,
    server::state::ServerState,
    txn::{
        engine::{EditContext, TxnState, run_edit},
        plan::{DefaultOperation, EditPlan, ErrorOption, TestOption},
    },
    xml::{self, XmlElement},
    yang::schema::SchemaContext,
};

fn op_not_supported(msg: &str) -> RpcError {
    RpcError::protocol(ErrorKind::OperationNotSupported).with_message(msg)
}

/// The writable target for this profile: candidate when the candidate
/// family is configured, running otherwise. Startup is always reachable
/// when it exists.
fn check_writable(state: &ServerState, target: DatastoreName) -> Result<(), RpcError> {
    match target {
        DatastoreName::Running if state.cfg.datastores.family.is_candidate() => Err(
            op_not_supported("running is not directly writable; edit candidate and commit"),
        ),
        DatastoreName::Candidate if !state.cfg.datastores.family.is_candidate() => {
            Err(op_not_supported("no candidate datastore is configured"))
        },
        DatastoreName::Startup if !state.cfg.datastores.with_startup => {
            Err(op_not_supported("no startup datastore is configured"))
        },
        _ => Ok(()),
    }
}

fn persist_if_startup(state: &ServerState, target: DatastoreName) {
    if target != DatastoreName::Startup {
        return;
    }
    if let (Some(store), Some(path)) = (
        state.stores.get(DatastoreName::Startup),
        state.cfg.datastores.startup_path.as_ref(),
    ) && let Err(e) = persist_startup(store, path)
    {
        tracing::error!(error = %e, "failed to persist startup datastore");
    }
}

/// `<edit-config>`.
pub fn edit_config(
    state: &mut ServerState,
    sid: u64,
    message_id: &str,
    op: &XmlElement,
) -> HandlerResult {
    let target = named_store(op, "target")?;
    check_writable(state, target)?;
    state.locks.check_edit_allowed(target, sid, "/")?;

    let default_op = match op.child_text("default-operation") {
        Some(raw) => DefaultOperation::parse(raw).ok_or_else(|| {
            RpcError::protocol(ErrorKind::InvalidValue)
                .with_message(format!("bad default-operation '{raw}'"))
        })?,
        None => DefaultOperation::default(),
    };
    let test_option = match op.child_text("test-option") {
        Some(raw) => TestOption::parse(raw).ok_or_else(|| {
            RpcError::protocol(ErrorKind::InvalidValue)
                .with_message(format!("bad test-option '{raw}'"))
        })?,
        None => TestOption::default(),
    };
    let error_option = match op.child_text("error-option") {
        Some(raw) => ErrorOption::parse(raw).ok_or_else(|| {
            RpcError::protocol(ErrorKind::InvalidValue)
                .with_message(format!("bad error-option '{raw}'"))
        })?,
        None => ErrorOption::default(),
    };

    let config = op.child("config").ok_or_else(|| {
        RpcError::protocol(ErrorKind::MissingElement).with_message("missing <config>")
    })?;

    let plan = EditPlan::from_config(
        &state.schema,
        config,
        target,
        default_op,
        test_option,
        error_option,
    )?;

    let user = state
        .session(sid)
        .map(|m| m.user.clone())
        .unwrap_or_default();
    let ectx = EditContext {
        session_id: sid,
        user: &user,
        message_id,
    };

    let schema = &state.schema;
    let registry = &mut state.registry;
    let store = state
        .stores
        .get_mut(target)
        .ok_or_else(|| op_not_supported("datastore is not configured"))?;

    let outcome = run_edit(schema, registry, store, &plan, ectx);

    if outcome.state == TxnState::Committed && outcome.changed {
        // The change event goes out only after commit callbacks returned.
        if target == DatastoreName::Running {
            state
                .notif
                .queue(sys_config_change(&user, sid, target.as_str()));
        }
        persist_if_startup(state, target);
    }

    if outcome.errors.is_empty() {
        Ok(HandlerReply::Ok)
    } else {
        Ok(HandlerReply::Errors(outcome.errors))
    }
}

/// Resolves a `<source>`/`<target>` that may be a store, inline config,
/// or a file url.
enum ConfigEndpoint {
    Store(DatastoreName),
    Inline(XmlElement),
    Url(String),
}

fn endpoint(op: &XmlElement, container: &str) -> Result<ConfigEndpoint, RpcError> {
    let holder = op.child(container).ok_or_else(|| {
        RpcError::protocol(ErrorKind::MissingElement)
            .with_message(format!("missing <{container}>"))
    })?;
    let inner = holder.children.first().ok_or_else(|| {
        RpcError::protocol(ErrorKind::MissingElement)
            .with_message(format!("empty <{container}>"))
    })?;
    match inner.name.as_str() {
        "config" => Ok(ConfigEndpoint::Inline(inner.clone())),
        "url" => Ok(ConfigEndpoint::Url(inner.text.trim().to_string())),
        name => DatastoreName::parse(name)
            .map(ConfigEndpoint::Store)
            .ok_or_else(|| {
                RpcError::protocol(ErrorKind::InvalidValue)
                    .with_message(format!("unknown source '{name}'"))
            }),
    }
}

/// `<copy-config>`: replaces the entire target with the source content.
pub fn copy_config(state: &mut ServerState, sid: u64, op: &XmlElement) -> HandlerResult {
    let source = endpoint(op, "source")?;
    let target = endpoint(op, "target")?;

    let source_tree: ValueTree = match &source {
        ConfigEndpoint::Store(name) => {
            state
                .stores
                .get(*name)
                .ok_or_else(|| op_not_supported("source datastore is not configured"))?
                .tree
                .clone()
        },
        ConfigEndpoint::Inline(config) => {
            let mut tree = ValueTree::with_root("data");
            let root = tree.root();
            for child in &config.children {
                graft_element(&mut tree, root, child);
            }
            tree
        },
        ConfigEndpoint::Url(url) => {
            let path = resolve_file_url(&state.cfg.datastores.data_dir, url)
                .map_err(|e| {
                    RpcError::protocol(ErrorKind::InvalidValue).with_message(e.to_string())
                })?;
            let bytes = std::fs::read(&path).map_err(|e| {
                RpcError::new(ErrorKind::OperationFailed)
                    .with_message(format!("cannot read {}: {e}", path.display()))
            })?;
            xml::parse_value_tree(&bytes)?
        },
    };

    match target {
        ConfigEndpoint::Store(name) => {
            state.locks.check_edit_allowed(name, sid, "/")?;
            let user = state
                .session(sid)
                .map(|m| m.user.clone())
                .unwrap_or_default();
            let store = state
                .stores
                .get_mut(name)
                .ok_or_else(|| op_not_supported("target datastore is not configured"))?;
            store.install_root(source_tree);
            if name == DatastoreName::Running {
                state.ensure_state_nodes();
                state.notif.queue(sys_config_change(&user, sid, name.as_str()));
            }
            persist_if_startup(state, name);
            Ok(HandlerReply::Ok)
        },
        ConfigEndpoint::Url(url) => {
            let path = resolve_file_url(&state.cfg.datastores.data_dir, &url)
                .map_err(|e| {
                    RpcError::protocol(ErrorKind::InvalidValue).with_message(e.to_string())
                })?;
            let bytes = xml::emit_value_tree(&source_tree);
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            std::fs::write(&path, bytes).map_err(|e| {
                RpcError::new(ErrorKind::OperationFailed)
                    .with_message(format!("cannot write {}: {e}", path.display()))
            })?;
            Ok(HandlerReply::Ok)
        },
        ConfigEndpoint::Inline(_) => Err(RpcError::protocol(ErrorKind::InvalidValue)
            .with_message("inline config is not a copy target")),
    }
}

fn graft_element(tree: &mut ValueTree, parent: NodeRef, elem: &XmlElement) {
    let mut node = crate::datastore::value::ValueNode::new(elem.name.clone());
    if elem.children.is_empty() && !elem.text.trim().is_empty() {
        node.payload = Some(crate::yang::typedef::ScalarValue::Text(
            elem.text.trim().to_string(),
        ));
    }
    let r = tree.append_child(parent, node);
    for c in &elem.children {
        graft_element(tree, r, c);
    }
}

/// `<delete-config>`: only startup (and file urls) may be deleted.
pub fn delete_config(state: &mut ServerState, sid: u64, op: &XmlElement) -> HandlerResult {
    match endpoint(op, "target")? {
        ConfigEndpoint::Store(DatastoreName::Startup) => {
            state
                .locks
                .check_edit_allowed(DatastoreName::Startup, sid, "/")?;
            let store = state
                .stores
                .get_mut(DatastoreName::Startup)
                .ok_or_else(|| op_not_supported("no startup datastore is configured"))?;
            store.install_root(ValueTree::with_root("data"));
            persist_if_startup(state, DatastoreName::Startup);
            Ok(HandlerReply::Ok)
        },
        ConfigEndpoint::Store(other) => Err(RpcError::protocol(ErrorKind::InvalidValue)
            .with_message(format!("cannot delete the {other} datastore"))),
        ConfigEndpoint::Url(url) => {
            let path = resolve_file_url(&state.cfg.datastores.data_dir, &url)
                .map_err(|e| {
                    RpcError::protocol(ErrorKind::InvalidValue).with_message(e.to_string())
                })?;
            std::fs::remove_file(&path).map_err(|e| {
                RpcError::new(ErrorKind::OperationFailed)
                    .with_message(format!("cannot delete {}: {e}", path.display()))
            })?;
            Ok(HandlerReply::Ok)
        },
        ConfigEndpoint::Inline(_) => Err(RpcError::protocol(ErrorKind::InvalidValue)
            .with_message("inline config is not a delete target")),
    }
}

/// `<validate>`: checks a source tree against the schema without touching
/// any datastore.
pub fn validate(state: &mut ServerState, _sid: u64, op: &XmlElement) -> HandlerResult {
    if !state.cfg.protocol.validate {
        return Err(op_not_supported("validate is not enabled"));
    }
    let tree: ValueTree = match endpoint(op, "source")? {
        ConfigEndpoint::Store(name) => {
            state
                .stores
                .get(name)
                .ok_or_else(|| op_not_supported("source datastore is not configured"))?
                .tree
                .clone()
        },
        ConfigEndpoint::Inline(config) => {
            let mut tree = ValueTree::with_root("data");
            let root = tree.root();
            for child in &config.children {
                graft_element(&mut tree, root, child);
            }
            tree
        },
        ConfigEndpoint::Url(url) => {
            let path = resolve_file_url(&state.cfg.datastores.data_dir, &url)
                .map_err(|e| {
                    RpcError::protocol(ErrorKind::InvalidValue).with_message(e.to_string())
                })?;
            let bytes = std::fs::read(&path).map_err(|e| {
                RpcError::new(ErrorKind::OperationFailed)
                    .with_message(format!("cannot read {}: {e}", path.display()))
            })?;
            xml::parse_value_tree(&bytes)?
        },
    };

    let errors = validate_tree(&state.schema, &tree);
    if errors.is_empty() {
        Ok(HandlerReply::Ok)
    } else {
        Ok(HandlerReply::Errors(errors))
    }
}

/// Structural + type validation of a whole value tree.
pub fn validate_tree(schema: &SchemaContext, tree: &ValueTree) -> Vec<RpcError> {
    let mut errors = Vec::new();
    for child in tree.children(tree.root()) {
        let name = tree.name(child).to_string();
        match schema.find_top(None, &name) {
            Some(snode) => validate_subtree(schema, tree, child, snode, &mut errors),
            None => errors.push(
                RpcError::protocol(ErrorKind::UnknownElement)
                    .with_message(format!("unknown element '{name}'")),
            ),
        }
    }
    errors
}

fn validate_subtree(
    schema: &SchemaContext,
    tree: &ValueTree,
    node: NodeRef,
    snode_id: crate::yang::schema::NodeId,
    errors: &mut Vec<RpcError>,
) {
    let snode = schema.node(snode_id);
    let path = tree.instance_path(node);

    if snode.is_leafy() {
        if let (Some(tid), Some(text)) = (snode.typedef, tree.canonical_value(node))
            && let Err(e) = schema.typedef(tid).parse_value(schema, &text)
        {
            errors.push(e.with_path(path));
        }
        return;
    }

    // Mandatory children must be present on containers and list entries.
    for child_id in &snode.children {
        let child = schema.node(*child_id);
        if child.mandatory
            && child.default.is_none()
            && tree.find_child(node, &child.name).is_none()
        {
            errors.push(
                RpcError::protocol(ErrorKind::MissingElement)
                    .with_path(path.clone())
                    .with_message(format!("mandatory node '{}' is missing", child.name)),
            );
        }
    }

    for child in tree.children(node) {
        let name = tree.name(child).to_string();
        match schema.find_child(snode_id, &name) {
            Some(cid) => validate_subtree(schema, tree, child, cid, errors),
            None => errors.push(
                RpcError::protocol(ErrorKind::UnknownElement)
                    .with_path(path.clone())
                    .with_message(format!("unknown element '{name}'")),
            ),
        }
    }

}

/// `<commit>`: installs candidate into running. A `<confirmed/>` commit
/// arms a revert timer that a follow-up plain commit disarms.
pub fn commit(state: &mut ServerState, sid: u64, op: &XmlElement) -> HandlerResult {
    let confirmed = op.has_child("confirmed");
    let timeout = op
        .child_text("confirm-timeout")
        .and_then(|t| t.parse::<i64>().ok());
    commit_with(state, sid, confirmed, timeout)
}

fn commit_with(
    state: &mut ServerState,
    sid: u64,
    confirmed: bool,
    timeout_secs: Option<i64>,
) -> HandlerResult {
    if !state.cfg.datastores.family.is_candidate() {
        return Err(op_not_supported("no candidate datastore is configured"));
    }
    state
        .locks
        .check_edit_allowed(DatastoreName::Running, sid, "/")?;

    let user = state
        .session(sid)
        .map(|m| m.user.clone())
        .unwrap_or_default();

    let candidate_tree = state
        .stores
        .candidate
        .as_ref()
        .ok_or_else(|| op_not_supported("no candidate datastore is configured"))?
        .tree
        .clone();

    if confirmed {
        let timeout = timeout_secs.unwrap_or(600);
        state.confirmed_commit = Some(crate::server::state::ConfirmedCommit {
            previous: state.stores.running.tree.clone(),
            deadline: Utc::now() + Duration::seconds(timeout),
        });
        info!(timeout, "confirmed commit armed");
    } else {
        state.confirmed_commit = None;
    }

    state.stores.running.install_root(candidate_tree);
    state.ensure_state_nodes();
    state
        .notif
        .queue(sys_config_change(&user, sid, DatastoreName::Running.as_str()));
    Ok(HandlerReply::Ok)
}

/// `<discard-changes>`: resets candidate back to running.
pub fn discard_changes(state: &mut ServerState, _sid: u64) -> HandlerResult {
    if !state.cfg.datastores.family.is_candidate() {
        return Err(op_not_supported("no candidate datastore is configured"));
    }
    let running = state.stores.running.tree.clone();
    let candidate = state
        .stores
        .candidate
        .as_mut()
        .ok_or_else(|| op_not_supported("no candidate datastore is configured"))?;
    candidate.install_root(running);
    Ok(HandlerReply::Ok)
}
