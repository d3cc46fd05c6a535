// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job: one submission, its apps, procs, map, and state machine position.

use crate::app::App;
use crate::attr::Attributes;
use crate::id::{Nspace, ProcName, Rank};
use crate::node::NodeIndex;
use crate::proc::{Proc, ProcState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position of a job in the launch state machine.
///
/// The derive order is the machine order: states only move forward,
/// except failure paths which jump to a terminal error state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Init,
    InitComplete,
    Allocate,
    AllocationComplete,
    LaunchDaemons,
    DaemonsLaunched,
    DaemonsReported,
    VmReady,
    Map,
    MapComplete,
    SystemPrep,
    LaunchApps,
    Running,
    Registered,
    Terminated,
    // Terminal failure/exit states, reachable from anywhere.
    NeverLaunched,
    FailedToStart,
    FilesPosnFailed,
    ForcedExit,
    Aborted,
    AllJobsComplete,
    /// Daemon-side: this daemon (and its fabric) is shutting down.
    DaemonsTerminated,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        *self >= JobState::Terminated
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            JobState::NeverLaunched
                | JobState::FailedToStart
                | JobState::FilesPosnFailed
                | JobState::ForcedExit
                | JobState::Aborted
        )
    }
}

crate::simple_display! {
    JobState {
        Init => "init",
        InitComplete => "init_complete",
        Allocate => "allocate",
        AllocationComplete => "allocation_complete",
        LaunchDaemons => "launch_daemons",
        DaemonsLaunched => "daemons_launched",
        DaemonsReported => "daemons_reported",
        VmReady => "vm_ready",
        Map => "map",
        MapComplete => "map_complete",
        SystemPrep => "system_prep",
        LaunchApps => "launch_apps",
        Running => "running",
        Registered => "registered",
        Terminated => "terminated",
        NeverLaunched => "never_launched",
        FailedToStart => "failed_to_start",
        FilesPosnFailed => "files_posn_failed",
        ForcedExit => "forced_exit",
        Aborted => "aborted",
        AllJobsComplete => "all_jobs_complete",
        DaemonsTerminated => "daemons_terminated",
    }
}

/// Job flags. Plain bools; the suspended bit is a flag here rather than
/// a state-machine position so state ordering stays total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    pub recoverable: bool,
    /// Job is a tool (no app procs of its own).
    pub tool: bool,
    pub do_not_launch: bool,
    /// Map/daemon set changed since last wire image.
    pub updated: bool,
    pub aborted: bool,
    /// This job's launch added daemons to the VM.
    pub launched_daemons: bool,
    pub suspended: bool,
}

/// Nodes assigned to a job, plus daemon-launch accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMap {
    /// Handle-valued: the registry owns the nodes.
    pub nodes: Vec<NodeIndex>,
    /// Daemons to be launched this round; recomputed per VM pass.
    pub num_new_daemons: u32,
}

impl JobMap {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, node: NodeIndex) -> bool {
        self.nodes.contains(&node)
    }
}

/// One job: created on submission, owned by the registry, destroyed on
/// cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub nspace: Nspace,
    pub apps: Vec<App>,
    /// Rank-indexed, sparse.
    pub procs: BTreeMap<Rank, Proc>,
    pub map: Option<JobMap>,
    pub state: JobState,
    pub exit_code: i32,
    pub num_procs: u32,
    pub num_launched: u32,
    pub num_reported: u32,
    pub num_terminated: u32,
    /// Daemons heard from during app launch (progress reporting).
    pub num_daemons_reported: u32,
    pub total_slots_alloc: u32,
    /// Submitter's identity; `None` for jobs the head node originates.
    pub originator: Option<ProcName>,
    pub flags: JobFlags,
    pub attributes: Attributes,
    /// Child jobs spawned through this one.
    pub children: Vec<Nspace>,
}

impl Job {
    pub fn new(nspace: Nspace) -> Self {
        Self {
            nspace,
            apps: Vec::new(),
            procs: BTreeMap::new(),
            map: None,
            state: JobState::Init,
            exit_code: 0,
            num_procs: 0,
            num_launched: 0,
            num_reported: 0,
            num_terminated: 0,
            num_daemons_reported: 0,
            total_slots_alloc: 0,
            originator: None,
            flags: JobFlags::default(),
            attributes: Attributes::new(),
            children: Vec::new(),
        }
    }

    pub fn add_app(&mut self, mut app: App) {
        app.idx = self.apps.len() as u32;
        self.apps.push(app);
    }

    /// Total requested proc count across all apps.
    pub fn requested_procs(&self) -> u32 {
        self.apps.iter().map(|a| a.num_procs).sum()
    }

    pub fn proc(&self, rank: Rank) -> Option<&Proc> {
        self.procs.get(&rank)
    }

    pub fn proc_mut(&mut self, rank: Rank) -> Option<&mut Proc> {
        self.procs.get_mut(&rank)
    }

    /// Insert a proc, keeping `num_procs` in step.
    pub fn insert_proc(&mut self, proc: Proc) {
        self.procs.insert(proc.name.rank, proc);
        self.num_procs = self.procs.len() as u32;
    }

    /// Next unused rank in this job.
    pub fn next_rank(&self) -> Rank {
        self.procs.keys().next_back().map(|r| r + 1).unwrap_or(0)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Re-derive the rollup counters from proc states.
    ///
    /// Invariant: num_terminated <= num_launched <= num_procs and
    /// num_reported <= num_procs at every event-loop instant.
    pub fn refresh_counters(&mut self) {
        self.num_procs = self.procs.len() as u32;
        self.num_launched =
            self.procs.values().filter(|p| p.state >= ProcState::Running).count() as u32;
        self.num_reported =
            self.procs.values().filter(|p| p.state >= ProcState::Registered).count() as u32;
        self.num_terminated =
            self.procs.values().filter(|p| p.state.is_terminal()).count() as u32;
    }

    /// True when every proc has reached at least the given state.
    pub fn all_procs_at_least(&self, state: ProcState) -> bool {
        self.num_procs > 0 && self.procs.values().all(|p| p.state >= state)
    }

    /// True when every proc is in a terminal state.
    pub fn all_procs_terminated(&self) -> bool {
        self.num_procs > 0 && self.procs.values().all(|p| p.state.is_terminal())
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            nspace: Nspace = Nspace::from_string("dvm-test"),
        }
        set {
            apps: Vec<App> = Vec::new(),
            procs: BTreeMap<Rank, Proc> = BTreeMap::new(),
            state: JobState = JobState::Init,
            exit_code: i32 = 0,
            num_procs: u32 = 0,
            num_launched: u32 = 0,
            num_reported: u32 = 0,
            num_terminated: u32 = 0,
            num_daemons_reported: u32 = 0,
            total_slots_alloc: u32 = 0,
            flags: JobFlags = JobFlags::default(),
            attributes: Attributes = Attributes::new(),
            children: Vec<Nspace> = Vec::new(),
        }
        option {
            map: JobMap = None,
            originator: ProcName = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
