// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer scheduling for a runtime loop.
//!
//! Timers are named by [`TimerId`]; cancellation is synchronous. The
//! loop polls `fired_timers` after waiting out `next_deadline`.

use dvm_core::event::Event;
use dvm_core::timer::TimerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Timer {
    fires_at: Instant,
    /// Periodic timers re-arm themselves on fire.
    period: Option<Duration>,
}

/// Manages timers for one runtime loop.
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: HashMap<TimerId, Timer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer; re-arming an existing id resets it.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration, now: Instant) {
        self.timers.insert(id, Timer { fires_at: now + duration, period: None });
    }

    /// Arm a periodic timer that re-fires every `period`.
    pub fn set_periodic(&mut self, id: TimerId, period: Duration, now: Instant) {
        self.timers.insert(id, Timer { fires_at: now + period, period: Some(period) });
    }

    pub fn cancel_timer(&mut self, id: &TimerId) {
        self.timers.remove(id);
    }

    pub fn is_armed(&self, id: &TimerId) -> bool {
        self.timers.contains_key(id)
    }

    /// Collect timers that are due, re-arming periodic ones.
    pub fn fired_timers(&mut self, now: Instant) -> Vec<Event> {
        let mut fired: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, t)| t.fires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        fired.sort();

        let mut events = Vec::with_capacity(fired.len());
        for id in fired {
            if let Some(timer) = self.timers.get_mut(&id) {
                match timer.period {
                    Some(period) => timer.fires_at = now + period,
                    None => {
                        self.timers.remove(&id);
                    }
                }
            }
            events.push(Event::TimerFired { id });
        }
        events
    }

    /// Earliest pending fire time, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.fires_at).min()
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
