// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events consumed by the runtime loops.
//!
//! Everything that happens — an inbound message, a timer firing, a
//! state activation — enters the system as an `Event` on the owner's
//! queue and is handled to completion before the next one is looked at.

use crate::id::{Nspace, ProcName, Rank};
use crate::job::JobState;
use crate::proc::ProcState;
use crate::timer::TimerId;
use serde::{Deserialize, Serialize};

/// Key/value-server event codes surfaced to registered handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyCode {
    /// A proxied spawn finished launching.
    LaunchComplete,
    /// A job (tool child) terminated.
    JobTerminated,
    /// A process aborted; drives the failure detector intake.
    ProcAborted,
}

crate::simple_display! {
    NotifyCode {
        LaunchComplete => "launch_complete",
        JobTerminated => "job_terminated",
        ProcAborted => "proc_aborted",
    }
}

/// One unit of work for a runtime loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Inbound RML message, already reassembled by the transport.
    RmlMessage { sender: ProcName, tag: u16, payload: Vec<u8> },

    /// Activated job-state transition. Activation enqueues; the
    /// dispatcher runs it on a later loop iteration.
    JobStateActivate { nspace: Nspace, state: JobState },

    /// Activated proc-state transition.
    ProcStateActivate { proc: ProcName, state: ProcState },

    /// A scheduler timer fired.
    TimerFired { id: TimerId },

    /// Preposition pass finished for a job.
    FilesPositioned { nspace: Nspace, ok: bool },

    /// A locally spawned proc came up (daemon side).
    LocalProcStarted { proc: ProcName, pid: u32 },

    /// A locally spawned proc exited (daemon side).
    LocalProcExited { proc: ProcName, exit_code: i32 },

    /// The launch adapter failed to start a daemon.
    DaemonSpawnFailed { rank: Rank, reason: String },

    /// A key/value-server event was delivered to this process.
    KvNotify { code: NotifyCode, affected: ProcName },

    /// Orderly loop shutdown.
    Shutdown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RmlMessage { .. } => "rml:message",
            Event::JobStateActivate { .. } => "job:activate",
            Event::ProcStateActivate { .. } => "proc:activate",
            Event::TimerFired { .. } => "timer:fired",
            Event::FilesPositioned { .. } => "files:positioned",
            Event::LocalProcStarted { .. } => "local:started",
            Event::LocalProcExited { .. } => "local:exited",
            Event::DaemonSpawnFailed { .. } => "daemon:spawn_failed",
            Event::KvNotify { .. } => "kv:notify",
            Event::Shutdown => "system:shutdown",
        }
    }

    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::RmlMessage { sender, tag, payload } => {
                format!("{t} from={sender} tag={tag} len={}", payload.len())
            }
            Event::JobStateActivate { nspace, state } => format!("{t} {nspace} -> {state}"),
            Event::ProcStateActivate { proc, state } => format!("{t} {proc} -> {state}"),
            Event::TimerFired { id } => format!("{t} {id}"),
            Event::FilesPositioned { nspace, ok } => format!("{t} {nspace} ok={ok}"),
            Event::LocalProcStarted { proc, pid } => format!("{t} {proc} pid={pid}"),
            Event::LocalProcExited { proc, exit_code } => {
                format!("{t} {proc} exit={exit_code}")
            }
            Event::DaemonSpawnFailed { rank, reason } => format!("{t} rank={rank} {reason}"),
            Event::KvNotify { code, affected } => format!("{t} {code} {affected}"),
            Event::Shutdown => t.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
