// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Interval timer callbacks fired from the event-loop tick path.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::server::state::ServerState;

pub type TimerCallback = Box<dyn FnMut(&mut ServerState) + Send>;

struct TimerEntry {
    id: u32,
    interval: Duration,
    periodic: bool,
    next_due: Instant,
    cb: TimerCallback,
}

/// The timer table. Lives beside the event loop; callbacks get the full
/// server state and must not block.
#[derive(Default)]
pub struct TimerSet {
    timers: Vec<TimerEntry>,
    next_id: u32,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a timer; one-shot timers remove themselves after firing.
    pub fn create(
        &mut self,
        interval: Duration,
        periodic: bool,
        cb: TimerCallback,
    ) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.timers.push(TimerEntry {
            id,
            interval,
            periodic,
            next_due: Instant::now() + interval,
            cb,
        });
        debug!(id, ?interval, periodic, "timer created");
        id
    }

    pub fn cancel(&mut self, id: u32) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        before != self.timers.len()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Fires every due timer. Runs on the loop task.
    pub fn fire_due(&mut self, now: Instant, state: &mut ServerState) {
        let mut expired = Vec::new();
        for t in &mut self.timers {
            if t.next_due <= now {
                (t.cb)(state);
                if t.periodic {
                    t.next_due = now + t.interval;
                } else {
                    expired.push(t.id);
                }
            }
        }
        self.timers.retain(|t| !expired.contains(&t.id));
    }
}
