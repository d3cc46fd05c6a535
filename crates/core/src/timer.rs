// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer identifiers.
//!
//! A timer is named by what it guards, so cancellation by name is
//! possible from any handler that can see the owning job.

use crate::id::Nspace;
use serde::{Deserialize, Serialize};

/// Identifier of a scheduled timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(String);

impl TimerId {
    /// Startup failure timer: armed when the launch message is sent,
    /// cancelled when the job reaches RUNNING.
    pub fn startup(nspace: &Nspace) -> Self {
        TimerKind::Startup(nspace.clone()).to_timer_id()
    }

    /// Execution timer: armed at RUNNING when a job timeout is set.
    pub fn execution(nspace: &Nspace) -> Self {
        TimerKind::Execution(nspace.clone()).to_timer_id()
    }

    /// Stack-trace-wait timer: armed when stack traces are requested.
    pub fn stack_trace(nspace: &Nspace) -> Self {
        TimerKind::StackTrace(nspace.clone()).to_timer_id()
    }

    /// Heartbeat tick for the per-daemon failure detector.
    pub fn heartbeat_tick() -> Self {
        TimerKind::HeartbeatTick.to_timer_id()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse this timer ID into a typed `TimerKind`.
    pub fn kind(&self) -> Option<TimerKind> {
        TimerKind::parse(&self.0)
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed representation of a timer ID for type-safe routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    Startup(Nspace),
    Execution(Nspace),
    StackTrace(Nspace),
    HeartbeatTick,
}

impl TimerKind {
    /// Parse a timer ID string. Returns `None` for unknown formats.
    pub fn parse(id: &str) -> Option<TimerKind> {
        if id == "hb-tick" {
            return Some(TimerKind::HeartbeatTick);
        }
        if let Some(rest) = id.strip_prefix("startup:") {
            return Some(TimerKind::Startup(Nspace::from_string(rest)));
        }
        if let Some(rest) = id.strip_prefix("execution:") {
            return Some(TimerKind::Execution(Nspace::from_string(rest)));
        }
        if let Some(rest) = id.strip_prefix("trace:") {
            return Some(TimerKind::StackTrace(Nspace::from_string(rest)));
        }
        None
    }

    /// Format this kind back into its canonical `TimerId`.
    pub fn to_timer_id(&self) -> TimerId {
        match self {
            TimerKind::Startup(ns) => TimerId(format!("startup:{ns}")),
            TimerKind::Execution(ns) => TimerId(format!("execution:{ns}")),
            TimerKind::StackTrace(ns) => TimerId(format!("trace:{ns}")),
            TimerKind::HeartbeatTick => TimerId("hb-tick".to_string()),
        }
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
