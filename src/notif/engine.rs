// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fairness-bounded notification delivery.
//!
//! The event loop calls [`NotifEngine::deliver_burst`] once per tick and
//! between ready-queue drains. Each burst runs rounds of at most one send
//! per subscription until the global `max-burst` cap is hit or a round
//! stays quiet, so one chatty subscriber cannot starve the rest.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    error::{ErrorKind, RpcError},
    notif::{
        event::{EventLog, ReplayEvent},
        subscription::{SubState, Subscription},
    },
    xml::{self, XmlElement},
};

pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// The notification subsystem facade.
pub struct NotifEngine {
    log: EventLog,
    subs: Vec<Subscription>,
}

impl NotifEngine {
    pub fn new(eventlog_size: usize) -> Self {
        Self {
            log: EventLog::new(eventlog_size),
            subs: Vec::new(),
        }
    }

    /// Installs a subscription. At most one per session.
    pub fn subscribe(&mut self, mut sub: Subscription) -> Result<(), RpcError> {
        if self.subs.iter().any(|s| s.session_id == sub.session_id && s.active()) {
            return Err(RpcError::protocol(ErrorKind::InUse)
                .with_message("session already has a subscription"));
        }
        sub.activate(Utc::now());
        if sub.state == SubState::Live {
            // Without replay the cursor starts after existing content.
            sub.last_delivered = self.log.newest_id().unwrap_or(0);
        }
        debug!(session = sub.session_id, state = ?sub.state, "subscription created");
        self.subs.push(sub);
        Ok(())
    }

    /// Drops the subscription owned by a dying session.
    pub fn remove_session(&mut self, session_id: u64) {
        self.subs.retain(|s| s.session_id != session_id);
    }

    /// Sessions holding a subscription are exempt from idle-timeout.
    pub fn has_subscription(&self, session_id: u64) -> bool {
        self.subs
            .iter()
            .any(|s| s.session_id == session_id && s.active())
    }

    /// Queues an event for delivery and replay.
    pub fn queue(&mut self, event: ReplayEvent) -> u64 {
        self.log.record(event)
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Runs one delivery burst. `sink` receives `(session_id, bytes)` for
    /// every outbound message. Returns the number of sends.
    pub fn deliver_burst(
        &mut self,
        now: DateTime<Utc>,
        max_burst: u32,
        sink: &mut dyn FnMut(u64, Vec<u8>),
    ) -> u32 {
        let mut total = 0u32;
        'burst: loop {
            let mut sent_this_round = 0u32;
            for i in 0..self.subs.len() {
                if max_burst != 0 && total >= max_burst {
                    break 'burst;
                }
                if let Some(bytes) = send_one(&mut self.subs[i], &self.log, now) {
                    sink(self.subs[i].session_id, bytes);
                    sent_this_round += 1;
                    total += 1;
                }
            }
            if sent_this_round == 0 {
                break;
            }
        }

        self.subs.retain(|s| s.active());

        if self.log.retention_disabled() {
            // Transient mode: drop whatever every subscriber has seen.
            let min_delivered = self
                .subs
                .iter()
                .map(|s| s.last_delivered)
                .min()
                .unwrap_or(u64::MAX);
            self.log.sweep_delivered(min_delivered);
        }
        total
    }
}

/// Attempts one send for one subscription; advances its state machine.
fn send_one(
    sub: &mut Subscription,
    log: &EventLog,
    now: DateTime<Utc>,
) -> Option<Vec<u8>> {
    match sub.state {
        SubState::Init => {
            sub.activate(now);
            send_one(sub, log, now)
        },
        SubState::Replay => {
            loop {
                let Some(event) = log.next_after(sub.last_delivered) else {
                    // Log exhausted: the replay part is over.
                    sub.finish_replay(now);
                    return Some(wrap_simple("replayComplete", now));
                };
                if let Some(t0) = sub.start_time
                    && event.timestamp < t0
                {
                    sub.last_delivered = event.msg_id;
                    continue;
                }
                if let Some(t1) = sub.stop_time
                    && event.timestamp > t1
                {
                    // Stop boundary sits inside the log.
                    sub.finish_replay(now);
                    return Some(wrap_simple("replayComplete", now));
                }
                sub.last_delivered = event.msg_id;
                if passes_filter(sub, event) {
                    return Some(wrap_event(event));
                }
            }
        },
        SubState::Timed => {
            if sub.complete_pending || sub.stop_reached(now) {
                sub.state = SubState::Shutdown;
                return Some(wrap_simple("notificationComplete", now));
            }
            loop {
                let event = log.next_after(sub.last_delivered)?;
                if let Some(t1) = sub.stop_time
                    && event.timestamp > t1
                {
                    sub.state = SubState::Shutdown;
                    return Some(wrap_simple("notificationComplete", now));
                }
                sub.last_delivered = event.msg_id;
                if passes_filter(sub, event) {
                    return Some(wrap_event(event));
                }
            }
        },
        SubState::Live => loop {
            let event = log.next_after(sub.last_delivered)?;
            sub.last_delivered = event.msg_id;
            if passes_filter(sub, event) {
                return Some(wrap_event(event));
            }
        },
        SubState::Shutdown => None,
    }
}

fn passes_filter(sub: &Subscription, event: &ReplayEvent) -> bool {
    match &sub.filter {
        Some(f) => f.matches(&event.payload),
        None => true,
    }
}

/// Wraps a payload into the RFC 5277 `<notification>` envelope.
fn wrap_event(event: &ReplayEvent) -> Vec<u8> {
    let mut elem = XmlElement::new("notification");
    elem.namespace = NOTIFICATION_NS.to_string();
    let mut time = XmlElement::new("eventTime");
    time.text = event.timestamp.to_rfc3339();
    elem.children.push(time);
    elem.children
        .push(xml::value_subtree_to_element(&event.payload, event.payload.root()));
    xml::emit_element(&elem)
}

fn wrap_simple(name: &str, now: DateTime<Utc>) -> Vec<u8> {
    let mut elem = XmlElement::new("notification");
    elem.namespace = NOTIFICATION_NS.to_string();
    let mut time = XmlElement::new("eventTime");
    time.text = now.to_rfc3339();
    elem.children.push(time);
    elem.children.push(XmlElement::new(name));
    xml::emit_element(&elem)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::notif::event::sys_config_change;

    fn collect(engine: &mut NotifEngine, now: DateTime<Utc>, burst: u32) -> Vec<String> {
        let mut out = Vec::new();
        engine.deliver_burst(now, burst, &mut |_, bytes| {
            out.push(String::from_utf8_lossy(&bytes).into_owned());
        });
        out
    }

    #[test]
    fn replay_window_then_complete_markers() {
        // Events at t=1s and t=3s, subscription window [0s, 2s].
        let base = Utc::now() - Duration::seconds(10);
        let mut engine = NotifEngine::new(100);

        let mut e1 = sys_config_change("admin", 1, "running");
        e1.timestamp = base + Duration::seconds(1);
        let mut e2 = sys_config_change("admin", 1, "running");
        e2.timestamp = base + Duration::seconds(3);
        engine.queue(e1);
        engine.queue(e2);

        let mut sub = Subscription::new(
            7,
            None,
            Some(base),
            Some(base + Duration::seconds(2)),
        );
        sub.activate(Utc::now());
        engine.subs.push(sub);

        let now = Utc::now();
        let msgs = collect(&mut engine, now, 0);
        assert_eq!(msgs.len(), 3, "event, replayComplete, notificationComplete");
        assert!(msgs[0].contains("sysConfigChange"));
        assert!(msgs[1].contains("replayComplete"));
        assert!(msgs[2].contains("notificationComplete"));

        // The subscription is gone; nothing further arrives.
        assert!(collect(&mut engine, now, 0).is_empty());
        assert!(!engine.has_subscription(7));
    }

    #[test]
    fn max_burst_caps_one_tick() {
        let mut engine = NotifEngine::new(100);
        for _ in 0..50 {
            engine.queue(sys_config_change("admin", 1, "running"));
        }
        engine
            .subscribe(Subscription::new(9, None, None, None))
            .expect("subscribe");
        // A live subscription starts after existing log content.
        engine.subs[0].last_delivered = 0;

        let msgs = collect(&mut engine, Utc::now(), 10);
        assert_eq!(msgs.len(), 10);

        let msgs = collect(&mut engine, Utc::now(), 10);
        assert_eq!(msgs.len(), 10, "next tick drains the next slice");
    }

    #[test]
    fn second_subscription_per_session_is_in_use() {
        let mut engine = NotifEngine::new(10);
        engine
            .subscribe(Subscription::new(3, None, None, None))
            .expect("first");
        let err = engine
            .subscribe(Subscription::new(3, None, None, None))
            .expect_err("second");
        assert_eq!(err.kind, ErrorKind::InUse);
    }

    #[test]
    fn delivery_order_follows_message_ids() {
        let mut engine = NotifEngine::new(100);
        engine
            .subscribe(Subscription::new(4, None, None, None))
            .expect("subscribe");
        for _ in 0..5 {
            engine.queue(sys_config_change("admin", 1, "running"));
        }
        let mut ids = Vec::new();
        engine.deliver_burst(Utc::now(), 0, &mut |_, _| {});
        // The cursor itself is the order witness.
        ids.push(engine.subs[0].last_delivered);
        assert_eq!(ids[0], engine.log().newest_id().expect("events exist"));
    }

    #[test]
    fn transient_log_sweeps_after_delivery() {
        let mut engine = NotifEngine::new(0);
        engine
            .subscribe(Subscription::new(5, None, None, None))
            .expect("subscribe");
        engine.queue(sys_config_change("admin", 1, "running"));
        assert_eq!(engine.log().len(), 1);
        collect(&mut engine, Utc::now(), 0);
        assert!(engine.log().is_empty(), "delivered events are discarded");
    }

    #[test]
    fn fairness_interleaves_subscriptions() {
        let mut engine = NotifEngine::new(100);
        engine
            .subscribe(Subscription::new(1, None, None, None))
            .expect("sub 1");
        engine
            .subscribe(Subscription::new(2, None, None, None))
            .expect("sub 2");
        for _ in 0..10 {
            engine.queue(sys_config_change("admin", 1, "running"));
        }
        let mut order = Vec::new();
        engine.deliver_burst(Utc::now(), 4, &mut |sid, _| order.push(sid));
        // Rounds alternate sessions instead of draining one first.
        assert_eq!(order, [1, 2, 1, 2]);
    }
}
