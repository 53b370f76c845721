// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session lifecycle operations.

use crate::{
    error::{ErrorKind, RpcError},
    handlers::{HandlerReply, HandlerResult, RpcAction},
    server::state::ServerState,
    xml::XmlElement,
};

/// `<close-session>`: reply first, then tear down.
pub fn close_session() -> HandlerResult {
    Ok(HandlerReply::OkThen(RpcAction::CloseSelf))
}

/// `<kill-session>`: terminates another session.
pub fn kill_session(state: &mut ServerState, sid: u64, op: &XmlElement) -> HandlerResult {
    let target: u64 = op
        .child_text("session-id")
        .ok_or_else(|| {
            RpcError::protocol(ErrorKind::MissingElement)
                .with_message("missing <session-id>")
        })?
        .parse()
        .map_err(|_| {
            RpcError::protocol(ErrorKind::InvalidValue).with_message("bad session-id")
        })?;

    if target == sid {
        return Err(RpcError::protocol(ErrorKind::InvalidValue)
            .with_message("a session cannot kill itself"));
    }
    if state.session(target).is_none() {
        return Err(RpcError::protocol(ErrorKind::InvalidValue)
            .with_message(format!("no session with id {target}")));
    }
    Ok(HandlerReply::OkThen(RpcAction::KillSession(target)))
}
