// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{DateTime, Utc};

use crate::notif::filter::NotifFilter;

/// Subscription lifecycle states (RFC 5277 semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    /// Created, not yet classified.
    Init,
    /// Draining the replay log from `startTime`.
    Replay,
    /// Live delivery bounded by a future `stopTime`.
    Timed,
    /// Unbounded live delivery.
    Live,
    /// Completed; the engine removes it on the next sweep.
    Shutdown,
}

/// One per-session subscription record.
#[derive(Debug)]
pub struct Subscription {
    pub session_id: u64,
    /// Only the `NETCONF` stream exists.
    pub stream: String,
    pub filter: Option<NotifFilter>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub state: SubState,
    /// Message id of the last delivered event. Retention-driven deletion
    /// of log entries reseats by id, never by position.
    pub last_delivered: u64,
    /// Set once `<replayComplete>` went out.
    pub replay_done: bool,
    /// Set once `<notificationComplete>` is owed to the client.
    pub complete_pending: bool,
}

impl Subscription {
    pub fn new(
        session_id: u64,
        filter: Option<NotifFilter>,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            session_id,
            stream: "NETCONF".to_string(),
            filter,
            start_time,
            stop_time,
            state: SubState::Init,
            last_delivered: 0,
            replay_done: false,
            complete_pending: false,
        }
    }

    /// Classifies a fresh subscription: replay when `startTime` is in the
    /// past, live otherwise.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.state = match self.start_time {
            Some(t0) if t0 <= now => SubState::Replay,
            _ => SubState::Live,
        };
    }

    /// Transition after the replay log is exhausted.
    pub fn finish_replay(&mut self, now: DateTime<Utc>) {
        self.replay_done = true;
        self.state = match self.stop_time {
            None => SubState::Live,
            Some(t1) if t1 <= now => {
                self.complete_pending = true;
                SubState::Timed
            },
            Some(_) => SubState::Timed,
        };
    }

    /// True when `stopTime` has passed and completion is owed.
    pub fn stop_reached(&self, now: DateTime<Utc>) -> bool {
        matches!(self.stop_time, Some(t1) if t1 <= now)
    }

    /// Would `timestamp` fall inside this subscription's time window?
    pub fn in_window(&self, timestamp: DateTime<Utc>) -> bool {
        if let Some(t0) = self.start_time
            && timestamp < t0
        {
            return false;
        }
        if let Some(t1) = self.stop_time
            && timestamp > t1
        {
            return false;
        }
        true
    }

    pub fn active(&self) -> bool {
        self.state != SubState::Shutdown
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn activation_picks_replay_or_live() {
        let now = Utc::now();

        let mut s = Subscription::new(1, None, Some(now - Duration::seconds(10)), None);
        s.activate(now);
        assert_eq!(s.state, SubState::Replay);

        let mut s = Subscription::new(1, None, None, None);
        s.activate(now);
        assert_eq!(s.state, SubState::Live);
    }

    #[test]
    fn replay_end_routes_by_stop_time() {
        let now = Utc::now();

        let mut s = Subscription::new(1, None, Some(now - Duration::seconds(10)), None);
        s.finish_replay(now);
        assert_eq!(s.state, SubState::Live);

        let mut s = Subscription::new(
            1,
            None,
            Some(now - Duration::seconds(10)),
            Some(now - Duration::seconds(5)),
        );
        s.finish_replay(now);
        assert_eq!(s.state, SubState::Timed);
        assert!(s.complete_pending);

        let mut s = Subscription::new(
            1,
            None,
            Some(now - Duration::seconds(10)),
            Some(now + Duration::seconds(60)),
        );
        s.finish_replay(now);
        assert_eq!(s.state, SubState::Timed);
        assert!(!s.complete_pending);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = Utc::now();
        let s = Subscription::new(
            1,
            None,
            Some(now),
            Some(now + Duration::seconds(2)),
        );
        assert!(s.in_window(now));
        assert!(s.in_window(now + Duration::seconds(2)));
        assert!(!s.in_window(now - Duration::seconds(1)));
        assert!(!s.in_window(now + Duration::seconds(3)));
    }
}
