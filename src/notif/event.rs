// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    datastore::value::{ValueNode, ValueTree},
    yang::{schema::NodeId, typedef::ScalarValue},
};

/// One recorded notification.
#[derive(Debug, Clone)]
pub struct ReplayEvent {
    /// Globally monotonic message id.
    pub msg_id: u64,
    /// Capture instant, also the wire `eventTime`.
    pub timestamp: DateTime<Utc>,
    /// Schema node of the event type, when the module is loaded.
    pub schema: Option<NodeId>,
    /// Event element name, e.g. `sysConfigChange`.
    pub name: String,
    /// Owned payload subtree; the root node carries the event name.
    pub payload: ValueTree,
}

impl ReplayEvent {
    /// Builds an event whose payload is a flat set of leaves.
    pub fn with_leaves(name: &str, leaves: &[(&str, String)]) -> Self {
        let mut payload = ValueTree::with_root(name);
        let root = payload.root();
        for (leaf, value) in leaves {
            payload.append_child(
                root,
                ValueNode::leaf(*leaf, ScalarValue::Text(value.clone())),
            );
        }
        Self {
            msg_id: 0,
            timestamp: Utc::now(),
            schema: None,
            name: name.to_string(),
            payload,
        }
    }
}

/// Standard system events, shaped after the server's own YANG module.
pub fn sys_startup() -> ReplayEvent {
    ReplayEvent::with_leaves("sysStartup", &[])
}

pub fn sys_session_start(session_id: u64, user: &str, host: &str) -> ReplayEvent {
    ReplayEvent::with_leaves(
        "sysSessionStart",
        &[
            ("userName", user.to_string()),
            ("sessionId", session_id.to_string()),
            ("remoteHost", host.to_string()),
        ],
    )
}

pub fn sys_session_end(
    session_id: u64,
    user: &str,
    reason: &str,
    killed_by: Option<u64>,
) -> ReplayEvent {
    let mut leaves = vec![
        ("userName", user.to_string()),
        ("sessionId", session_id.to_string()),
        ("terminationReason", reason.to_string()),
    ];
    if let Some(k) = killed_by {
        leaves.push(("killedBy", k.to_string()));
    }
    ReplayEvent::with_leaves("sysSessionEnd", &leaves)
}

pub fn sys_config_change(user: &str, session_id: u64, target: &str) -> ReplayEvent {
    ReplayEvent::with_leaves(
        "sysConfigChange",
        &[
            ("userName", user.to_string()),
            ("sessionId", session_id.to_string()),
            ("target", target.to_string()),
        ],
    )
}

/// The bounded replay FIFO.
///
/// Size 0 disables retention: events stay only until every then-active
/// subscription has seen them, then the loop sweeps them out. Positions are
/// message ids, never indices, so retention-driven deletion cannot leave a
/// dangling cursor behind.
#[derive(Debug, Default)]
pub struct EventLog {
    events: VecDeque<ReplayEvent>,
    max: usize,
    next_msg_id: u64,
}

impl EventLog {
    pub fn new(max: usize) -> Self {
        Self {
            events: VecDeque::new(),
            max,
            next_msg_id: 1,
        }
    }

    pub fn retention_disabled(&self) -> bool {
        self.max == 0
    }

    fn allocate_id(&mut self) -> u64 {
        if self.next_msg_id == u64::MAX {
            // Fresh allocation cycle; subscribers tolerate the reset.
            warn!("notification message-id wrapped, starting a new cycle");
            self.next_msg_id = 1;
        }
        let id = self.next_msg_id;
        self.next_msg_id += 1;
        id
    }

    /// Records an event, assigning its message id. With retention enabled
    /// the oldest entry falls out once the FIFO is full.
    pub fn record(&mut self, mut event: ReplayEvent) -> u64 {
        let id = self.allocate_id();
        event.msg_id = id;
        if self.max > 0 {
            while self.events.len() >= self.max {
                self.events.pop_front();
            }
        }
        self.events.push_back(event);
        id
    }

    /// First event with an id strictly above `after`.
    pub fn next_after(&self, after: u64) -> Option<&ReplayEvent> {
        // Ids are increasing within the deque; a wrap starts a new deque
        // in practice because old entries age out long before reuse.
        self.events.iter().find(|e| e.msg_id > after)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplayEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn oldest_id(&self) -> Option<u64> {
        self.events.front().map(|e| e.msg_id)
    }

    pub fn newest_id(&self) -> Option<u64> {
        self.events.back().map(|e| e.msg_id)
    }

    /// Drops everything every active subscription has already seen; used
    /// only when retention is disabled.
    pub fn sweep_delivered(&mut self, min_delivered: u64) {
        while let Some(front) = self.events.front() {
            if front.msg_id <= min_delivered {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_monotonic() {
        let mut log = EventLog::new(10);
        let a = log.record(ReplayEvent::with_leaves("e", &[]));
        let b = log.record(ReplayEvent::with_leaves("e", &[]));
        let c = log.record(ReplayEvent::with_leaves("e", &[]));
        assert!(a < b && b < c);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut log = EventLog::new(2);
        let a = log.record(ReplayEvent::with_leaves("e", &[]));
        let b = log.record(ReplayEvent::with_leaves("e", &[]));
        let c = log.record(ReplayEvent::with_leaves("e", &[]));
        assert_eq!(log.len(), 2);
        assert_eq!(log.oldest_id(), Some(b));
        // A cursor parked on the evicted entry reseats by id.
        assert_eq!(log.next_after(a).map(|e| e.msg_id), Some(b));
        assert_eq!(log.next_after(b).map(|e| e.msg_id), Some(c));
    }

    #[test]
    fn sweep_respects_min_delivered() {
        let mut log = EventLog::new(0);
        let a = log.record(ReplayEvent::with_leaves("e", &[]));
        let b = log.record(ReplayEvent::with_leaves("e", &[]));
        log.sweep_delivered(a);
        assert_eq!(log.oldest_id(), Some(b));
    }
}
