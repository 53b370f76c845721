// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `<get-schema>` (RFC 6022): serves module source text.

use crate::{
    error::{ErrorKind, RpcError},
    handlers::{HandlerReply, HandlerResult},
    server::state::ServerState,
    xml::XmlElement,
};

const MONITORING_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";

pub fn get_schema(state: &mut ServerState, op: &XmlElement) -> HandlerResult {
    let identifier = op.child_text("identifier").ok_or_else(|| {
        RpcError::protocol(ErrorKind::MissingElement).with_message("missing <identifier>")
    })?;
    let version = op.child_text("version").filter(|v| !v.is_empty());
    if let Some(format) = op.child_text("format")
        && !format.is_empty()
        && format != "yang"
    {
        return Err(RpcError::protocol(ErrorKind::InvalidValue)
            .with_message(format!("unsupported schema format '{format}'")));
    }

    let module = state
        .schema
        .find_module(identifier)
        .map(|(_, m)| m)
        .ok_or_else(|| {
            RpcError::protocol(ErrorKind::InvalidValue)
                .with_message(format!("unknown module '{identifier}'"))
        })?;
    if let Some(rev) = version
        && rev != module.revision
    {
        return Err(RpcError::protocol(ErrorKind::InvalidValue).with_message(format!(
            "module '{identifier}' has revision {}, not {rev}",
            module.revision
        )));
    }

    let mut data = XmlElement::new("data");
    data.namespace = MONITORING_NS.to_string();
    data.text = module.source.clone();
    Ok(HandlerReply::Elems(vec![data]))
}
