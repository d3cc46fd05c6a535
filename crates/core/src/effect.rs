// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effects: side effects handlers ask the runtime to perform.
//!
//! Handlers never touch the transport or the scheduler directly; they
//! return effects and the executor performs them in order. This keeps
//! every transition testable as plain data in → data out.

use crate::id::{Nspace, ProcName, Rank};
use crate::job::JobState;
use crate::launch::{LaunchSpec, Placement};
use crate::proc::ProcState;
use crate::timer::TimerId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Instructions for spawning one daemon on a remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSpec {
    pub rank: Rank,
    pub node: String,
    /// Fully assembled daemon command line.
    pub argv: Vec<String>,
}

/// Effects executed by the runtime's executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// Non-blocking tagged send to one peer.
    Send { dst: ProcName, tag: u16, payload: Vec<u8> },

    /// Broadcast to every daemon on a tag.
    Xcast { tag: u16, payload: Vec<u8> },

    /// Queue a job-state activation back onto the event loop.
    ActivateJob { nspace: Nspace, state: JobState },

    /// Queue a proc-state activation back onto the event loop.
    ActivateProc { proc: ProcName, state: ProcState },

    SetTimer {
        id: TimerId,
        #[serde(with = "duration_serde")]
        duration: Duration,
    },

    CancelTimer { id: TimerId },

    /// Launch daemons on the named nodes (head node only).
    SpawnDaemons { specs: Vec<DaemonSpec> },

    /// Start this daemon's share of a job (daemon only).
    LaunchLocals { spec: LaunchSpec, local: Vec<Placement> },

    /// Kill local procs; an empty list means all of them.
    KillLocals { procs: Vec<ProcName> },

    /// Deliver a signal to every local proc of a job.
    SignalLocals { nspace: Nspace, signal: i32 },

    /// Run `gstack` over the alive local procs of a job and reply.
    CollectStackTraces { nspace: Nspace },

    /// Remove the session subtree for a job.
    CleanupSession { nspace: Nspace },

    /// Preposition the listed files; completion arrives as
    /// [`crate::event::Event::FilesPositioned`].
    PositionFiles { nspace: Nspace, files: Vec<PathBuf> },
}

impl Effect {
    /// Effect name for log spans.
    pub fn name(&self) -> &'static str {
        match self {
            Effect::Send { .. } => "send",
            Effect::Xcast { .. } => "xcast",
            Effect::ActivateJob { .. } => "activate_job",
            Effect::ActivateProc { .. } => "activate_proc",
            Effect::SetTimer { .. } => "set_timer",
            Effect::CancelTimer { .. } => "cancel_timer",
            Effect::SpawnDaemons { .. } => "spawn_daemons",
            Effect::LaunchLocals { .. } => "launch_locals",
            Effect::KillLocals { .. } => "kill_locals",
            Effect::SignalLocals { .. } => "signal_locals",
            Effect::CollectStackTraces { .. } => "collect_stack_traces",
            Effect::CleanupSession { .. } => "cleanup_session",
            Effect::PositionFiles { .. } => "position_files",
        }
    }

    /// Key-value pairs for structured logging.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Effect::Send { dst, tag, payload } => vec![
                ("dst", dst.to_string()),
                ("tag", tag.to_string()),
                ("len", payload.len().to_string()),
            ],
            Effect::Xcast { tag, payload } => {
                vec![("tag", tag.to_string()), ("len", payload.len().to_string())]
            }
            Effect::ActivateJob { nspace, state } => {
                vec![("nspace", nspace.to_string()), ("state", state.to_string())]
            }
            Effect::ActivateProc { proc, state } => {
                vec![("proc", proc.to_string()), ("state", state.to_string())]
            }
            Effect::SetTimer { id, duration } => vec![
                ("timer", id.to_string()),
                ("duration_ms", duration.as_millis().to_string()),
            ],
            Effect::CancelTimer { id } => vec![("timer", id.to_string())],
            Effect::SpawnDaemons { specs } => vec![("count", specs.len().to_string())],
            Effect::LaunchLocals { spec, local } => vec![
                ("nspace", spec.nspace.to_string()),
                ("count", local.len().to_string()),
            ],
            Effect::KillLocals { procs } => vec![("count", procs.len().to_string())],
            Effect::SignalLocals { nspace, signal } => {
                vec![("nspace", nspace.to_string()), ("signal", signal.to_string())]
            }
            Effect::CollectStackTraces { nspace } => vec![("nspace", nspace.to_string())],
            Effect::CleanupSession { nspace } => vec![("nspace", nspace.to_string())],
            Effect::PositionFiles { nspace, files } => {
                vec![("nspace", nspace.to_string()), ("count", files.len().to_string())]
            }
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        duration.as_millis().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
#[path = "effect_tests.rs"]
mod tests;
