// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ring-based failure detector.
//!
//! Daemons with ranks `1..=N-1` form a logical ring (the head node is
//! outside it). Each daemon expects heartbeats from `hb_observing` and
//! sends them to `hb_observer`. Missing heartbeats beyond the timeout
//! suspect the observed daemon; the ring then repairs itself inward.

use dvm_core::id::{Rank, INVALID_RANK};
use std::time::{Duration, Instant};

/// What the detector wants done after a tick or message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorAction {
    /// Send a heartbeat to this rank.
    SendHeartbeat(Rank),
    /// Ask this rank to become our new heartbeat target.
    SendRequest(Rank),
    /// The observed daemon is now suspected failed.
    Suspect(Rank),
}

pub struct FailureDetector {
    me: Rank,
    /// Ring modulus: daemon count excluding the head node.
    ndmns: u32,
    pub hb_observing: Rank,
    pub hb_observer: Rank,
    hb_period: Duration,
    hb_timeout: Duration,
    /// Last heartbeat send; `None` until the first send.
    sstamp: Option<Instant>,
    /// Last heartbeat receipt (future-dated at start for slack).
    rstamp: Option<Instant>,
    /// Ranks this daemon considers dead.
    failed: Vec<Rank>,
    active: bool,
}

impl FailureDetector {
    /// A detector that never runs (rank 0, or single-daemon fabrics).
    pub fn disabled(me: Rank) -> Self {
        Self {
            me,
            ndmns: 0,
            hb_observing: INVALID_RANK,
            hb_observer: INVALID_RANK,
            hb_period: Duration::MAX,
            hb_timeout: Duration::MAX,
            sstamp: None,
            rstamp: None,
            failed: Vec::new(),
            active: false,
        }
    }

    /// Initial ring assignment for a daemon inside the ring.
    pub fn enable(
        me: Rank,
        num_daemons: u32,
        hb_period: Duration,
        hb_timeout: Duration,
        now: Instant,
    ) -> Self {
        let ndmns = num_daemons.saturating_sub(1);
        if me == 0 || ndmns < 2 {
            return Self::disabled(me);
        }
        let hb_observing = if me == 1 { ndmns } else { me - 1 };
        let hb_observer = (ndmns + me) % ndmns + 1;
        Self {
            me,
            ndmns,
            hb_observing,
            hb_observer,
            hb_period,
            hb_timeout,
            sstamp: None,
            // Slack for the rest of the fabric to come up.
            rstamp: Some(now + Duration::from_secs(ndmns as u64)),
            failed: Vec::new(),
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Tick cadence for the caller's periodic timer.
    pub fn tick_interval(&self) -> Duration {
        self.hb_period / 10
    }

    pub fn is_alive(&self, rank: Rank) -> bool {
        !self.failed.contains(&rank)
    }

    /// Record a failure observed elsewhere (propagation intake).
    /// Returns false when it was already known.
    pub fn mark_failed(&mut self, rank: Rank) -> bool {
        if self.failed.contains(&rank) {
            return false;
        }
        self.failed.push(rank);
        true
    }

    /// Periodic check: send our heartbeat, suspect the silent.
    pub fn tick(&mut self, now: Instant) -> Vec<DetectorAction> {
        if !self.active {
            return vec![];
        }
        let mut actions = Vec::new();

        let due = match self.sstamp {
            None => true,
            Some(last) => now.duration_since(last) >= self.hb_period,
        };
        if due {
            if let Some(last) = self.sstamp {
                if now.duration_since(last) >= self.hb_period * 2 {
                    tracing::warn!(
                        me = self.me,
                        late_ms = now.duration_since(last).as_millis() as u64,
                        "missed my own heartbeat deadline, peers may suspect me"
                    );
                }
            }
            self.sstamp = Some(now);
            actions.push(DetectorAction::SendHeartbeat(self.hb_observer));
        }

        let Some(rstamp) = self.rstamp else { return actions };
        let silent_for = now.checked_duration_since(rstamp).unwrap_or(Duration::ZERO);
        if silent_for > self.hb_timeout && self.is_alive(self.hb_observing) {
            tracing::warn!(
                me = self.me,
                observed = self.hb_observing,
                "heartbeat delay, daemon suspected failed"
            );
            let suspect = self.hb_observing;
            self.failed.push(suspect);
            actions.push(DetectorAction::Suspect(suspect));
            // Advance the receive stamp one timeout so the walk does
            // not immediately re-trigger.
            self.rstamp = Some(rstamp + self.hb_timeout);
            actions.extend(self.repair_ring(now));
        }
        actions
    }

    /// Walk the ring inward to the next live rank and ask it to become
    /// our observed target.
    fn repair_ring(&mut self, now: Instant) -> Vec<DetectorAction> {
        let ndmns = self.ndmns;
        let wrap = |v: u32| if v == 0 { ndmns } else { v };

        let mut vpid = wrap((ndmns + self.hb_observing) % ndmns);
        while vpid != self.me {
            if self.is_alive(vpid) {
                tracing::debug!(me = self.me, target = vpid, "ring repair");
                self.hb_observing = vpid;
                self.rstamp = Some(now + self.hb_timeout);
                return vec![DetectorAction::SendRequest(vpid)];
            }
            vpid = wrap((ndmns + vpid - 1) % ndmns);
        }
        // Everyone else is gone; no point monitoring ourselves.
        tracing::info!(me = self.me, "last daemon standing, detector idle");
        self.hb_observing = INVALID_RANK;
        self.hb_observer = INVALID_RANK;
        self.rstamp = None;
        self.active = false;
        vec![]
    }

    /// Propagated failures may kill the daemon we are watching; repair
    /// the ring without waiting for our own timeout.
    pub fn repair_if_observing(&mut self, rank: Rank, now: Instant) -> Vec<DetectorAction> {
        if self.active && self.hb_observing == rank {
            return self.repair_ring(now);
        }
        vec![]
    }

    /// A heartbeat arrived carrying `from`'s rank.
    pub fn on_heartbeat(&mut self, from: Rank, now: Instant) -> Vec<DetectorAction> {
        if from == self.me {
            // Quit signal: the payload carries our own rank.
            tracing::debug!(me = self.me, "quiesce heartbeat, stopping detector");
            self.hb_observing = INVALID_RANK;
            self.hb_observer = INVALID_RANK;
            self.rstamp = None;
            self.active = false;
            return vec![];
        }
        if !self.active {
            return vec![];
        }
        if from != self.hb_observing {
            tracing::debug!(
                me = self.me,
                from,
                observing = self.hb_observing,
                "heartbeat from a rank I am not monitoring"
            );
            return vec![];
        }
        if let Some(rstamp) = self.rstamp {
            let late = now.checked_duration_since(rstamp).unwrap_or(Duration::ZERO);
            if late > self.hb_timeout {
                tracing::debug!(me = self.me, from, "heartbeat arrived past the deadline");
            }
        }
        self.rstamp = Some(now);
        vec![]
    }

    /// A ring-repair request: `from` wants us as its heartbeat target.
    ///
    /// Accept only when `from` is closer in ring order than the current
    /// observer; never forward.
    pub fn on_request(&mut self, from: Rank, now: Instant) -> Vec<DetectorAction> {
        if !self.active || self.ndmns == 0 {
            return vec![];
        }
        let rr = (self.ndmns - self.me + from) % self.ndmns;
        let ro = if self.hb_observer == INVALID_RANK {
            u32::MAX
        } else {
            (self.ndmns - self.me + self.hb_observer) % self.ndmns
        };
        if rr < ro {
            return vec![];
        }
        self.hb_observer = from;
        self.sstamp = Some(now);
        vec![DetectorAction::SendHeartbeat(from)]
    }

    /// Final heartbeat on shutdown: tells our observer to stop
    /// expecting us. The payload rank equals the receiver's own, which
    /// it reads as a quit signal.
    pub fn quiesce(&mut self) -> Option<Rank> {
        if !self.active || self.hb_observer == INVALID_RANK {
            return None;
        }
        let observer = self.hb_observer;
        self.active = false;
        self.hb_observer = INVALID_RANK;
        self.hb_observing = INVALID_RANK;
        self.rstamp = None;
        Some(observer)
    }
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
