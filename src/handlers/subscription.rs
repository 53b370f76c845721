// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `<create-subscription>` (RFC 5277) parameter validation.

use chrono::{DateTime, Utc};

use crate::{
    error::{ErrorKind, RpcError},
    handlers::{HandlerReply, HandlerResult},
    notif::{filter::NotifFilter, subscription::Subscription},
    server::state::ServerState,
    xml::XmlElement,
    xpath,
};

fn parse_time(raw: &str) -> Result<DateTime<Utc>, RpcError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            RpcError::protocol(ErrorKind::InvalidValue)
                .with_message(format!("malformed timestamp '{raw}'"))
        })
}

pub fn create_subscription(
    state: &mut ServerState,
    sid: u64,
    op: &XmlElement,
) -> HandlerResult {
    if !state.cfg.protocol.notifications {
        return Err(RpcError::protocol(ErrorKind::OperationNotSupported)
            .with_message("notifications are not enabled"));
    }

    // Only the NETCONF stream exists.
    if let Some(stream) = op.child_text("stream")
        && stream != "NETCONF"
    {
        return Err(RpcError::protocol(ErrorKind::InvalidValue)
            .with_app_tag("not-found")
            .with_message(format!("unknown stream '{stream}'")));
    }

    let now = Utc::now();
    let start_time = op.child_text("startTime").map(parse_time).transpose()?;
    let stop_time = op.child_text("stopTime").map(parse_time).transpose()?;

    if let Some(t0) = start_time
        && t0 > now
    {
        return Err(RpcError::protocol(ErrorKind::BadElement)
            .with_message("startTime is in the future"));
    }
    match (start_time, stop_time) {
        (None, Some(_)) => {
            return Err(RpcError::protocol(ErrorKind::MissingElement)
                .with_message("stopTime requires startTime"));
        },
        (Some(t0), Some(t1)) if t1 < t0 => {
            return Err(RpcError::protocol(ErrorKind::BadElement)
                .with_message("stopTime precedes startTime"));
        },
        _ => {},
    }

    let filter = match op.child("filter") {
        None => None,
        Some(f) => Some(match f.attr("type").unwrap_or("subtree") {
            "subtree" => NotifFilter::Subtree(f.clone()),
            "xpath" => {
                let select = f.attr("select").ok_or_else(|| {
                    RpcError::protocol(ErrorKind::MissingAttribute)
                        .with_message("xpath filter requires a select attribute")
                })?;
                NotifFilter::Xpath(xpath::Path::compile(select).map_err(|e| {
                    RpcError::protocol(ErrorKind::InvalidValue)
                        .with_message(format!("bad select expression: {e}"))
                })?)
            },
            other => {
                return Err(RpcError::protocol(ErrorKind::BadAttribute)
                    .with_message(format!("unknown filter type '{other}'")));
            },
        }),
    };

    state
        .notif
        .subscribe(Subscription::new(sid, filter, start_time, stop_time))?;
    Ok(HandlerReply::Ok)
}
