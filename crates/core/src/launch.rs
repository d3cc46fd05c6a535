// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launch payload: what the head node broadcasts so each daemon can
//! start its share of a job.

use crate::app::App;
use crate::id::{Nspace, Rank};
use serde::{Deserialize, Serialize};

/// One proc's placement: which rank runs which app under which daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub rank: Rank,
    pub app_idx: u32,
    /// Daemon (by rank in the daemon job) hosting this proc.
    pub daemon: Rank,
}

/// Per-job launch data carried in the `ADD_LOCAL_PROCS` broadcast.
///
/// Every daemon receives the whole spec and filters the placements down
/// to its own rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub nspace: Nspace,
    pub apps: Vec<App>,
    pub placements: Vec<Placement>,
}

impl LaunchSpec {
    /// Placements belonging to the given daemon.
    pub fn local_to(&self, daemon: Rank) -> Vec<Placement> {
        self.placements.iter().copied().filter(|p| p.daemon == daemon).collect()
    }
}
