// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proc: one running copy of an app.

use crate::attr::Attributes;
use crate::id::ProcName;
use crate::node::NodeIndex;
use crate::id::Rank;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one application process.
///
/// Ordered: a proc state only moves forward except on failure paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcState {
    /// Mapped but not yet started.
    Init,
    Running,
    /// Registered with the key/value server.
    Registered,
    Terminated,
    /// Killed by signal.
    AbortedBySig,
    FailedToStart,
}

impl ProcState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcState::Terminated | ProcState::AbortedBySig | ProcState::FailedToStart
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ProcState::AbortedBySig | ProcState::FailedToStart)
    }
}

crate::simple_display! {
    ProcState {
        Init => "init",
        Running => "running",
        Registered => "registered",
        Terminated => "terminated",
        AbortedBySig => "aborted_by_sig",
        FailedToStart => "failed_to_start",
    }
}

/// One application process (or one daemon, in the daemon job).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proc {
    pub name: ProcName,
    /// Which app within the job this proc runs.
    pub app_idx: u32,
    /// Node hosting this proc. Handle-valued: lookup only, never a
    /// lifetime anchor.
    pub node: Option<NodeIndex>,
    /// Rank of the daemon acting as this proc's local agent.
    pub daemon: Option<Rank>,
    pub pid: Option<u32>,
    pub exit_code: i32,
    pub state: ProcState,
    pub alive: bool,
    pub attributes: Attributes,
}

impl Proc {
    pub fn new(name: ProcName) -> Self {
        Self {
            name,
            app_idx: 0,
            node: None,
            daemon: None,
            pid: None,
            exit_code: 0,
            state: ProcState::Init,
            alive: false,
            attributes: Attributes::new(),
        }
    }
}
