// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Protocol operation handlers and the RPC dispatcher.
//!
//! The dispatcher parses one inbound frame, routes `<hello>` and `<rpc>`
//! and builds the `<rpc-reply>`. Handlers are synchronous and see only
//! [`ServerState`]; the event loop owns all transport concerns.

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::{
    error::{ErrorKind, RpcError},
    server::{
        cap::{self, BASE_NS},
        session::TermReason,
        state::ServerState,
    },
    xml::{self, XmlElement},
};

/// Datastore and transaction operations.
pub mod edit;
/// `get` / `get-config` retrieval and subtree filtering.
pub mod get;
/// Global and partial locks.
pub mod lock;
/// `get-schema` (RFC 6022).
pub mod schema_ops;
/// `close-session` and `kill-session`.
pub mod session_ops;
/// `create-subscription` (RFC 5277).
pub mod subscription;

/// Side effects the event loop must perform after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcAction {
    None,
    /// Valid hello received; switch framing if base:1.1 was agreed.
    HelloDone { base11: bool },
    /// Reply sent, then terminate this session.
    CloseSelf,
    /// Terminate another session.
    KillSession(u64),
    /// Terminate this session without a reply.
    KillSelf(TermReason),
}

/// One dispatch result: an optional wire reply plus a side effect.
#[derive(Debug)]
pub struct DispatchResult {
    pub reply: Option<Vec<u8>>,
    pub action: RpcAction,
}

impl DispatchResult {
    fn reply(bytes: Vec<u8>) -> Self {
        Self {
            reply: Some(bytes),
            action: RpcAction::None,
        }
    }

    fn action(action: RpcAction) -> Self {
        Self {
            reply: None,
            action,
        }
    }
}

/// What a handler produced on success.
pub enum HandlerReply {
    Ok,
    Data(Vec<XmlElement>),
    /// Reply children emitted verbatim (get-schema, partial-lock).
    Elems(Vec<XmlElement>),
    /// `<ok/>` plus a loop side effect.
    OkThen(RpcAction),
    /// Errors that still form a normal reply (edit-config partial modes).
    Errors(Vec<RpcError>),
}

pub(crate) type HandlerResult = Result<HandlerReply, RpcError>;

/// Routes one inbound frame for `sid`.
pub fn dispatch_frame(state: &mut ServerState, sid: u64, frame: &[u8]) -> DispatchResult {
    let elem = match xml::parse_element(frame) {
        Ok(e) => e,
        Err(err) => {
            warn!(sid, "unparseable frame");
            if !state.session(sid).is_some_and(|m| m.hello_done) {
                return DispatchResult::action(RpcAction::KillSelf(TermReason::BadHello));
            }
            if let Some(meta) = state.session_mut(sid) {
                meta.in_bad_rpcs += 1;
            }
            return DispatchResult::reply(build_reply(None, HandlerReply::Errors(vec![err])));
        },
    };

    let hello_done = state.session(sid).is_some_and(|m| m.hello_done);

    match elem.name.as_str() {
        "hello" if !hello_done => handle_hello(state, sid, &elem),
        "hello" => {
            // A second hello is a protocol violation.
            DispatchResult::action(RpcAction::KillSelf(TermReason::BadHello))
        },
        "rpc" if hello_done => handle_rpc(state, sid, &elem),
        _ => DispatchResult::action(RpcAction::KillSelf(TermReason::BadHello)),
    }
}

fn handle_hello(state: &mut ServerState, sid: u64, hello: &XmlElement) -> DispatchResult {
    let peer_caps = cap::peer_capabilities(hello);
    let peer_10 = peer_caps
        .iter()
        .any(|c| c == "urn:ietf:params:netconf:base:1.0");
    let peer_11 = cap::peer_supports_base11(&peer_caps);
    if !peer_10 && !peer_11 {
        return DispatchResult::action(RpcAction::KillSelf(TermReason::BadHello));
    }

    let we_11 = state
        .cfg
        .protocol
        .base_versions
        .contains(&crate::cfg::enums::BaseVersion::Base11);
    let base11 = peer_11 && we_11;

    if let Some(meta) = state.session_mut(sid) {
        meta.hello_done = true;
        meta.base11 = base11;
    }
    debug!(sid, base11, "hello complete");
    DispatchResult::action(RpcAction::HelloDone { base11 })
}

fn handle_rpc(state: &mut ServerState, sid: u64, rpc: &XmlElement) -> DispatchResult {
    let message_id = rpc.attr("message-id").map(str::to_string);
    if message_id.is_none() {
        let err = RpcError::rpc(ErrorKind::MissingAttribute)
            .with_message("rpc requires a message-id attribute");
        return DispatchResult::reply(build_reply(None, HandlerReply::Errors(vec![err])));
    }

    let Some(op) = rpc.children.first() else {
        let err = RpcError::rpc(ErrorKind::MissingElement).with_message("empty rpc");
        return DispatchResult::reply(build_reply(
            message_id.as_deref(),
            HandlerReply::Errors(vec![err]),
        ));
    };

    state.stats.total_rpcs.fetch_add(1, Ordering::Relaxed);
    if let Some(meta) = state.session_mut(sid) {
        meta.in_rpcs += 1;
    }

    // Access control is an allow/deny oracle.
    let user = state
        .session(sid)
        .map(|m| m.user.clone())
        .unwrap_or_default();
    if !state.access.allow(&user, &op.name) {
        let err = RpcError::protocol(ErrorKind::AccessDenied)
            .with_message(format!("operation '{}' denied", op.name));
        return finish(state, sid, message_id.as_deref(), Err(err));
    }

    let mid = message_id.clone().unwrap_or_default();
    let result = route(state, sid, &mid, op);
    finish(state, sid, message_id.as_deref(), result)
}

fn route(
    state: &mut ServerState,
    sid: u64,
    message_id: &str,
    op: &XmlElement,
) -> HandlerResult {
    match op.name.as_str() {
        "get" => get::get(state, sid, op),
        "get-config" => get::get_config(state, sid, op),
        "edit-config" => edit::edit_config(state, sid, message_id, op),
        "copy-config" => edit::copy_config(state, sid, op),
        "delete-config" => edit::delete_config(state, sid, op),
        "validate" => edit::validate(state, sid, op),
        "commit" => edit::commit(state, sid, op),
        "discard-changes" => edit::discard_changes(state, sid),
        "lock" => lock::lock(state, sid, op),
        "unlock" => lock::unlock(state, sid, op),
        "partial-lock" => lock::partial_lock(state, sid, op),
        "partial-unlock" => lock::partial_unlock(state, sid, op),
        "close-session" => session_ops::close_session(),
        "kill-session" => session_ops::kill_session(state, sid, op),
        "create-subscription" => subscription::create_subscription(state, sid, op),
        "get-schema" => schema_ops::get_schema(state, op),
        // Everything else goes to registrant-provided handlers; the
        // set-log-level extension is installed there at init.
        other => match state.registry.invoke_rpc(other, op) {
            Some(Ok(children)) if children.is_empty() => Ok(HandlerReply::Ok),
            Some(Ok(children)) => Ok(HandlerReply::Elems(children)),
            Some(Err(e)) => Err(e),
            None => Err(RpcError::protocol(ErrorKind::OperationNotSupported)
                .with_message(format!("unknown operation '{other}'"))),
        },
    }
}

fn finish(
    state: &mut ServerState,
    sid: u64,
    message_id: Option<&str>,
    result: HandlerResult,
) -> DispatchResult {
    match result {
        Ok(HandlerReply::OkThen(action)) => DispatchResult {
            reply: Some(build_reply(message_id, HandlerReply::Ok)),
            action,
        },
        Ok(reply) => {
            if let HandlerReply::Errors(errs) = &reply
                && let Some(meta) = state.session_mut(sid)
            {
                meta.out_rpc_errors += errs.len() as u64;
            }
            DispatchResult::reply(build_reply(message_id, reply))
        },
        Err(err) => {
            if let Some(meta) = state.session_mut(sid) {
                meta.out_rpc_errors += 1;
            }
            DispatchResult::reply(build_reply(
                message_id,
                HandlerReply::Errors(vec![err]),
            ))
        },
    }
}

/// Builds one `<rpc-reply>` document.
pub fn build_reply(message_id: Option<&str>, reply: HandlerReply) -> Vec<u8> {
    let mut root = XmlElement::new("rpc-reply");
    root.namespace = BASE_NS.to_string();
    if let Some(mid) = message_id {
        root.attrs.push(("message-id".to_string(), mid.to_string()));
    }

    match reply {
        HandlerReply::Ok | HandlerReply::OkThen(_) => {
            root.children.push(XmlElement::new("ok"));
        },
        HandlerReply::Data(children) => {
            let mut data = XmlElement::new("data");
            data.children = children;
            root.children.push(data);
        },
        HandlerReply::Elems(children) => {
            root.children.extend(children);
        },
        HandlerReply::Errors(errors) => {
            for e in &errors {
                root.children.push(error_element(e));
            }
        },
    }
    xml::emit_element(&root)
}

/// Renders one `<rpc-error>`.
fn error_element(e: &RpcError) -> XmlElement {
    let mut err = XmlElement::new("rpc-error");

    let mut t = XmlElement::new("error-type");
    t.text = e.layer.to_string();
    err.children.push(t);

    let mut tag = XmlElement::new("error-tag");
    tag.text = e.kind.tag().to_string();
    err.children.push(tag);

    let mut sev = XmlElement::new("error-severity");
    sev.text = e.severity.to_string();
    err.children.push(sev);

    if let Some(app_tag) = &e.app_tag {
        let mut x = XmlElement::new("error-app-tag");
        x.text = app_tag.clone();
        err.children.push(x);
    }
    if let Some(path) = &e.path {
        let mut x = XmlElement::new("error-path");
        x.text = path.clone();
        err.children.push(x);
    }
    if let Some(msg) = &e.message {
        let mut x = XmlElement::new("error-message");
        x.text = msg.clone();
        err.children.push(x);
    }
    if !e.info.is_empty() {
        let mut info = XmlElement::new("error-info");
        for i in &e.info {
            let mut x = XmlElement::new(i.name.clone());
            x.text = i.value.clone();
            info.children.push(x);
        }
        err.children.push(info);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reply_carries_taxonomy_fields() {
        let e = RpcError::protocol(ErrorKind::LockDenied)
            .with_message("locked")
            .with_info("session-id", "3");
        let bytes = build_reply(Some("7"), HandlerReply::Errors(vec![e]));
        let reply = xml::parse_element(&bytes).expect("parse");
        assert_eq!(reply.attr("message-id"), Some("7"));
        let err = reply.child("rpc-error").expect("error");
        assert_eq!(err.child_text("error-tag"), Some("lock-denied"));
        assert_eq!(err.child_text("error-type"), Some("protocol"));
        let info = err.child("error-info").expect("info");
        assert_eq!(info.child_text("session-id"), Some("3"));
    }

    #[test]
    fn ok_reply_shape() {
        let bytes = build_reply(Some("1"), HandlerReply::Ok);
        let reply = xml::parse_element(&bytes).expect("parse");
        assert!(reply.has_child("ok"));
    }
}
