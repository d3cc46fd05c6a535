// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job state machine.
//!
//! One dispatcher handles every activated transition. A transition
//! never performs follow-on transitions inline: it returns the next
//! activation as an effect, so each handler observes the store exactly
//! as the previous one left it.

use crate::error::EngineError;
use crate::runtime::HeadRuntime;
use dvm_core::attr::{AttrKey, Value};
use dvm_core::clock::Clock;
use dvm_core::effect::Effect;
use dvm_core::exit_code;
use dvm_core::id::{Nspace, ProcName, INVALID_RANK};
use dvm_core::job::JobState;
use dvm_core::launch::{LaunchSpec, Placement};
use dvm_core::node::NodeState;
use dvm_core::proc::ProcState;
use dvm_core::timer::TimerId;
use dvm_wire::{maybe_compress, tag, DaemonCmd, DataBuffer, LaunchMsg};
use std::time::Duration;

/// Restart budget applied when an app declares no recovery policy.
const DEFAULT_MAX_RESTARTS: i32 = 0;

impl<C: Clock> HeadRuntime<C> {
    /// Dispatch one activated job-state transition.
    pub(crate) fn activate_job_state(
        &mut self,
        nspace: &Nspace,
        target: JobState,
    ) -> Result<Vec<Effect>, EngineError> {
        let Some(job) = self.registry.job(nspace) else {
            // The job may already have been cleaned up; failure
            // activations against it are then moot.
            tracing::debug!(%nspace, state = %target, "activation for unknown job");
            return Ok(vec![]);
        };
        let prior = job.state;
        tracing::info!(%nspace, from = %prior, to = %target, "job state");

        match target {
            JobState::Init => self.setup_job(nspace, prior),
            JobState::InitComplete => {
                self.registry.require_job_mut(nspace)?.state = target;
                Ok(vec![Effect::ActivateJob {
                    nspace: nspace.clone(),
                    state: JobState::Allocate,
                }])
            }
            JobState::Allocate => self.allocate(nspace),
            JobState::AllocationComplete => {
                let job = self.registry.require_job_mut(nspace)?;
                job.state = target;
                let next = if job.flags.do_not_launch {
                    // Still map so the user can see where procs would
                    // have gone.
                    JobState::DaemonsReported
                } else {
                    JobState::LaunchDaemons
                };
                Ok(vec![Effect::ActivateJob { nspace: nspace.clone(), state: next }])
            }
            JobState::LaunchDaemons => {
                self.registry.require_job_mut(nspace)?.state = target;
                let mut effects = self.setup_virtual_machine(nspace)?;
                // The startup window covers daemon bring-up as well as
                // the app launch: a dropped callback must still fail
                // the job in bounded time.
                let job = self.registry.require_job_mut(nspace)?;
                if job.flags.launched_daemons {
                    if let Some(secs) = job.attributes.get_i32(AttrKey::StartupTimeout) {
                        if secs > 0 && !job.attributes.contains(AttrKey::FailureTimerEvent) {
                            let id = TimerId::startup(nspace);
                            job.attributes.set_local(
                                AttrKey::FailureTimerEvent,
                                Value::Timer(id.clone()),
                            );
                            effects.push(Effect::SetTimer {
                                id,
                                duration: Duration::from_secs(secs as u64),
                            });
                        }
                    }
                }
                Ok(effects)
            }
            JobState::DaemonsLaunched => {
                // Do not advance: wait for the daemons to report in.
                self.registry.require_job_mut(nspace)?.state = target;
                Ok(vec![])
            }
            JobState::DaemonsReported => self.daemons_reported(nspace),
            JobState::VmReady => self.vm_ready(nspace),
            JobState::Map => match self.map_job(nspace) {
                Ok(()) => {
                    self.registry.require_job_mut(nspace)?.state = target;
                    Ok(vec![Effect::ActivateJob {
                        nspace: nspace.clone(),
                        state: JobState::MapComplete,
                    }])
                }
                Err(e) => {
                    tracing::error!(%nspace, error = %e, "mapping failed");
                    Ok(vec![Effect::ActivateJob {
                        nspace: nspace.clone(),
                        state: JobState::ForcedExit,
                    }])
                }
            },
            JobState::MapComplete => {
                self.registry.require_job_mut(nspace)?.state = target;
                Ok(vec![Effect::ActivateJob {
                    nspace: nspace.clone(),
                    state: JobState::SystemPrep,
                }])
            }
            JobState::SystemPrep => self.complete_setup(nspace, prior),
            JobState::LaunchApps => self.launch_apps(nspace, prior),
            JobState::Running => self.post_launch(nspace, prior),
            JobState::Registered => {
                if prior != JobState::Running {
                    tracing::warn!(%nspace, %prior, "registered out of order");
                    return Ok(vec![Effect::ActivateJob {
                        nspace: nspace.clone(),
                        state: JobState::ForcedExit,
                    }]);
                }
                self.registry.require_job_mut(nspace)?.state = target;
                Ok(vec![])
            }
            JobState::Terminated => self.job_terminated(nspace),
            JobState::AllJobsComplete => {
                self.registry.require_job_mut(nspace)?.state = target;
                Ok(vec![])
            }
            JobState::NeverLaunched
            | JobState::FailedToStart
            | JobState::FilesPosnFailed
            | JobState::ForcedExit
            | JobState::Aborted => self.job_failed(nspace, target),
            JobState::DaemonsTerminated => {
                // Daemon-side lifecycle state; nothing to drive here.
                Ok(vec![])
            }
        }
    }

    /// INIT: fill in defaults and move along.
    fn setup_job(
        &mut self,
        nspace: &Nspace,
        prior: JobState,
    ) -> Result<Vec<Effect>, EngineError> {
        if prior != JobState::Init {
            return Ok(vec![Effect::ActivateJob {
                nspace: nspace.clone(),
                state: JobState::NeverLaunched,
            }]);
        }
        let job = self.registry.require_job_mut(nspace)?;
        for app in &mut job.apps {
            if !app.attributes.flag(AttrKey::RecoveryDefined) {
                app.max_restarts = DEFAULT_MAX_RESTARTS;
            }
        }
        Ok(vec![Effect::ActivateJob {
            nspace: nspace.clone(),
            state: JobState::InitComplete,
        }])
    }

    /// ALLOCATE: populate the node pool from the allocation plus any
    /// per-app host constraints.
    fn allocate(&mut self, nspace: &Nspace) -> Result<Vec<Effect>, EngineError> {
        let allocation = self.config.allocation.clone();
        for host in &allocation {
            let idx = self.registry.ensure_node(&host.name);
            if let Some(node) = self.registry.node_mut(idx) {
                if node.state == NodeState::Unknown {
                    node.state = NodeState::Up;
                }
                if let Some(slots) = host.slots {
                    node.slots = slots;
                    node.slots_given = true;
                }
            }
        }

        // dash-host / hostfile hosts named by the apps must exist in
        // the pool before the VM builder filters them.
        let job = self.registry.require_job(nspace)?;
        let mut named: Vec<String> = Vec::new();
        for app in &job.apps {
            if let Some(hosts) = app.attributes.get_string(AttrKey::DashHost) {
                named.extend(hosts.split(',').map(|s| s.trim().to_string()));
            }
            if let Some(hosts) = app.attributes.get_string(AttrKey::Hostfile) {
                named.extend(hosts.split(',').map(|s| s.trim().to_string()));
            }
        }
        for name in named {
            if name.is_empty() {
                continue;
            }
            let idx = self.registry.ensure_node(&name);
            if let Some(node) = self.registry.node_mut(idx) {
                if node.state == NodeState::Unknown {
                    node.state = NodeState::Up;
                }
            }
        }

        self.registry.require_job_mut(nspace)?.state = JobState::Allocate;
        Ok(vec![Effect::ActivateJob {
            nspace: nspace.clone(),
            state: JobState::AllocationComplete,
        }])
    }

    /// DAEMONS_REPORTED: apply the slots policy, fix the total
    /// allocation, and declare the VM ready.
    fn daemons_reported(&mut self, nspace: &Nspace) -> Result<Vec<Effect>, EngineError> {
        let is_dvm = nspace == self.registry.dvm_nspace();

        // When not launching, assume every node shares our topology.
        if is_dvm && self.registry.require_job(nspace)?.flags.do_not_launch {
            let indices: Vec<_> = self.registry.nodes().map(|(i, _)| i).collect();
            for idx in indices {
                if let Some(node) = self.registry.node_mut(idx) {
                    if node.topology.is_none() {
                        node.topology = Some(dvm_core::topology::TopoIndex(0));
                    }
                    node.state = NodeState::Up;
                }
            }
        }

        let mut total_slots = 0u32;
        if !self.config.managed_allocation {
            let policy = self.config.set_slots.clone();
            if let Some(policy) = policy.filter(|p| p != "none") {
                let indices: Vec<_> = self.registry.nodes().map(|(i, _)| i).collect();
                for idx in indices {
                    let topo_sig = self
                        .registry
                        .node(idx)
                        .and_then(|n| n.topology)
                        .and_then(|t| self.registry.topology(t))
                        .map(|t| t.signature.clone());
                    if let Some(node) = self.registry.node_mut(idx) {
                        if !node.slots_given {
                            crate::vm::set_slots(node, &policy, topo_sig.as_deref());
                        }
                        total_slots += node.slots;
                    }
                }
            } else {
                total_slots = self.registry.nodes().map(|(_, n)| n.slots).sum();
            }
        } else {
            total_slots = self.registry.nodes().map(|(_, n)| n.slots).sum();
        }

        let job = self.registry.require_job_mut(nspace)?;
        job.total_slots_alloc = total_slots;
        job.state = JobState::DaemonsReported;
        Ok(vec![Effect::ActivateJob { nspace: nspace.clone(), state: JobState::VmReady }])
    }

    /// VM_READY: preposition files, or go straight to mapping.
    fn vm_ready(&mut self, nspace: &Nspace) -> Result<Vec<Effect>, EngineError> {
        let job = self.registry.require_job_mut(nspace)?;
        job.state = JobState::VmReady;
        if nspace == self.registry.dvm_nspace() {
            // A standing DVM has nothing to map or launch.
            tracing::info!("virtual machine ready");
            return Ok(vec![]);
        }
        let job = self.registry.require_job(nspace)?;
        let files: Vec<_> =
            job.apps.iter().flat_map(|a| a.preposition.iter().cloned()).collect();
        if files.is_empty() {
            return Ok(vec![Effect::ActivateJob {
                nspace: nspace.clone(),
                state: JobState::Map,
            }]);
        }
        Ok(vec![Effect::PositionFiles { nspace: nspace.clone(), files }])
    }

    /// Preposition outcome from the executor.
    pub(crate) fn files_positioned(
        &mut self,
        nspace: &Nspace,
        ok: bool,
    ) -> Result<Vec<Effect>, EngineError> {
        let state = if ok { JobState::Map } else { JobState::FilesPosnFailed };
        Ok(vec![Effect::ActivateJob { nspace: nspace.clone(), state }])
    }

    /// SYSTEM_PREP: resolve coprocessor→host affinities, then release
    /// the table.
    fn complete_setup(
        &mut self,
        nspace: &Nspace,
        prior: JobState,
    ) -> Result<Vec<Effect>, EngineError> {
        if prior != JobState::MapComplete {
            return Ok(vec![Effect::ActivateJob {
                nspace: nspace.clone(),
                state: JobState::NeverLaunched,
            }]);
        }
        if self.registry.coprocessors_detected {
            let indices: Vec<_> = self.registry.nodes().map(|(i, _)| i).collect();
            for idx in indices {
                let serial = self
                    .registry
                    .node(idx)
                    .and_then(|n| n.attributes.get_string(AttrKey::SerialNumber))
                    .map(str::to_string);
                let Some(serial) = serial else { continue };
                let host = self.registry.coprocessors.get(&hash_str(&serial)).copied();
                match host {
                    Some(rank) => {
                        if let Some(node) = self.registry.node_mut(idx) {
                            node.attributes.set_local(AttrKey::HostId, Value::Rank(rank));
                        }
                    }
                    None => {
                        tracing::error!(%serial, "coprocessor host not found");
                        break;
                    }
                }
            }
        }
        // Done with the coprocessor table.
        self.registry.coprocessors.clear();

        self.registry.require_job_mut(nspace)?.state = JobState::SystemPrep;
        Ok(vec![Effect::ActivateJob {
            nspace: nspace.clone(),
            state: JobState::LaunchApps,
        }])
    }

    /// LAUNCH_APPS: build and broadcast the launch message, then arm
    /// the startup timer.
    fn launch_apps(
        &mut self,
        nspace: &Nspace,
        prior: JobState,
    ) -> Result<Vec<Effect>, EngineError> {
        if prior != JobState::SystemPrep {
            return Ok(vec![Effect::ActivateJob {
                nspace: nspace.clone(),
                state: JobState::NeverLaunched,
            }]);
        }
        let job = self.registry.require_job_mut(nspace)?;
        job.state = JobState::LaunchApps;

        let cmd = if job.attributes.flag(AttrKey::FixedDvm) {
            DaemonCmd::DvmAddProcs
        } else {
            DaemonCmd::AddLocalProcs
        };
        let spec = LaunchSpec {
            nspace: nspace.clone(),
            apps: job.apps.clone(),
            placements: job
                .procs
                .values()
                .map(|p| Placement {
                    rank: p.name.rank,
                    app_idx: p.app_idx,
                    daemon: p.daemon.unwrap_or(INVALID_RANK),
                })
                .collect(),
        };
        let mut buf = DataBuffer::new();
        LaunchMsg { cmd, spec }.pack(&mut buf);
        let payload = buf.into_vec();

        if job.flags.do_not_launch {
            let (compressed, blob) = maybe_compress(&payload);
            if compressed {
                tracing::info!(
                    raw = payload.len(),
                    compressed = blob.len(),
                    "launch message size"
                );
            } else {
                tracing::info!(raw = payload.len(), "launch message size");
            }
            return Ok(vec![Effect::ActivateJob {
                nspace: nspace.clone(),
                state: JobState::AllJobsComplete,
            }]);
        }

        // We count ourselves as reported, for launch progress only.
        job.num_daemons_reported += 1;

        let mut effects = vec![Effect::Xcast { tag: tag::DAEMON, payload }];
        if let Some(secs) = job.attributes.get_i32(AttrKey::StartupTimeout) {
            if secs > 0 && !job.attributes.contains(AttrKey::FailureTimerEvent) {
                let id = TimerId::startup(nspace);
                job.attributes
                    .set_local(AttrKey::FailureTimerEvent, Value::Timer(id.clone()));
                effects.push(Effect::SetTimer {
                    id,
                    duration: Duration::from_secs(secs as u64),
                });
            }
        }
        Ok(effects)
    }

    /// RUNNING: cancel the startup timer, answer the requestor, arm the
    /// execution timer.
    fn post_launch(
        &mut self,
        nspace: &Nspace,
        prior: JobState,
    ) -> Result<Vec<Effect>, EngineError> {
        let mut effects = Vec::new();
        let job = self.registry.require_job_mut(nspace)?;

        // The timer attribute comes off on every path out of here.
        if let Some(Value::Timer(id)) = job.attributes.remove(AttrKey::FailureTimerEvent) {
            effects.push(Effect::CancelTimer { id });
        }

        if prior != JobState::LaunchApps {
            // Failure paths already own this job.
            return Ok(effects);
        }
        job.state = JobState::Running;

        if let Some(secs) = job.attributes.get_i32(AttrKey::JobTimeout) {
            if secs > 0 {
                let id = TimerId::execution(nspace);
                job.attributes.set_local(AttrKey::TimeoutEvent, Value::Timer(id.clone()));
                effects.push(Effect::SetTimer {
                    id,
                    duration: Duration::from_secs(secs as u64),
                });
            }
        }

        effects.extend(self.spawn_response(nspace, exit_code::OK)?);
        Ok(effects)
    }

    /// TERMINATED: final bookkeeping for a normally finished job.
    fn job_terminated(&mut self, nspace: &Nspace) -> Result<Vec<Effect>, EngineError> {
        let mut effects = Vec::new();
        let job = self.registry.require_job_mut(nspace)?;
        job.state = JobState::Terminated;
        for key in [AttrKey::TimeoutEvent, AttrKey::TraceTimeoutEvent] {
            if let Some(Value::Timer(id)) = job.attributes.remove(key) {
                effects.push(Effect::CancelTimer { id });
            }
        }
        tracing::info!(%nspace, exit_code = job.exit_code, "job complete");
        Ok(effects)
    }

    /// Terminal failure states: set the exit code, stop timers, answer
    /// the requestor, and put down anything already launched.
    fn job_failed(
        &mut self,
        nspace: &Nspace,
        state: JobState,
    ) -> Result<Vec<Effect>, EngineError> {
        let mut effects = Vec::new();
        let job = self.registry.require_job_mut(nspace)?;
        job.state = state;
        job.flags.aborted = true;
        if job.exit_code == 0 {
            job.exit_code = match state {
                JobState::FailedToStart | JobState::NeverLaunched => {
                    exit_code::FAILED_TO_START
                }
                _ => exit_code::ERROR,
            };
        }
        for key in
            [AttrKey::FailureTimerEvent, AttrKey::TimeoutEvent, AttrKey::TraceTimeoutEvent]
        {
            if let Some(Value::Timer(id)) = job.attributes.remove(key) {
                effects.push(Effect::CancelTimer { id });
            }
        }

        let status = job.exit_code;
        let launched = job.num_launched > 0;
        let procs: Vec<ProcName> = job.procs.values().map(|p| p.name.clone()).collect();

        effects.extend(self.spawn_response(nspace, status)?);

        if launched {
            let mut buf = DataBuffer::new();
            DaemonCmd::KillLocalProcs.pack(&mut buf);
            for proc in &procs {
                buf.pack_proc(proc);
            }
            effects.push(Effect::Xcast { tag: tag::DAEMON, payload: buf.into_vec() });
        }
        Ok(effects)
    }

    /// Deliver the spawn response to the originator, at most once.
    pub(crate) fn spawn_response(
        &mut self,
        nspace: &Nspace,
        status: i32,
    ) -> Result<Vec<Effect>, EngineError> {
        let job = self.registry.require_job_mut(nspace)?;
        let Some(originator) = job.originator.clone() else {
            // Head-originated job: nobody is waiting on the wire.
            return Ok(vec![]);
        };
        if job.attributes.flag(AttrKey::SpawnNotified) {
            return Ok(vec![]);
        }

        // A proxied DVM job also gets a launch-complete event aimed at
        // the proxy, which is not listening on our wire.
        if job.attributes.flag(AttrKey::DvmJob) {
            if let Some(proxy) = job.attributes.get_proc(AttrKey::LaunchProxy).cloned() {
                self.kv.notify_event(dvm_core::event::NotifyCode::LaunchComplete, proxy);
            } else {
                tracing::error!(%nspace, "dvm job without a launch proxy");
            }
        }

        let job = self.registry.require_job_mut(nspace)?;
        let room = job.attributes.get_i32(AttrKey::RoomNum);
        let mut buf = DataBuffer::new();
        dvm_wire::SpawnResponse { status, nspace: nspace.clone(), room }.pack(&mut buf);
        job.attributes.set_flag(AttrKey::SpawnNotified);

        Ok(vec![Effect::Send {
            dst: originator,
            tag: tag::LAUNCH_RESP,
            payload: buf.into_vec(),
        }])
    }

    /// Dispatch one activated proc-state transition and roll the job
    /// state forward when quorums are reached.
    pub(crate) fn activate_proc_state(
        &mut self,
        proc: &ProcName,
        state: ProcState,
    ) -> Result<Vec<Effect>, EngineError> {
        let is_daemon = proc.nspace == *self.registry.dvm_nspace();
        let Some(job) = self.registry.job_mut(&proc.nspace) else {
            tracing::debug!(%proc, "proc activation for unknown job");
            return Ok(vec![]);
        };
        let Some(entry) = job.proc_mut(proc.rank) else {
            tracing::error!(%proc, "unknown rank in proc activation");
            return Ok(vec![Effect::ActivateJob {
                nspace: proc.nspace.clone(),
                state: JobState::ForcedExit,
            }]);
        };

        // States only move forward; stale reports are dropped.
        if state <= entry.state && !state.is_error() {
            return Ok(vec![]);
        }
        entry.state = state;
        entry.alive = state == ProcState::Running || state == ProcState::Registered;

        if is_daemon {
            // The callback collector owns the daemon job's counters.
            return self.daemon_proc_state(proc, state);
        }
        job.refresh_counters();

        let job = self.registry.require_job(&proc.nspace)?;
        let mut effects = Vec::new();
        match state {
            ProcState::Running => {
                if job.state == JobState::LaunchApps
                    && job.all_procs_at_least(ProcState::Running)
                {
                    effects.push(Effect::ActivateJob {
                        nspace: proc.nspace.clone(),
                        state: JobState::Running,
                    });
                }
            }
            ProcState::Registered => {
                if job.state == JobState::Running
                    && job.all_procs_at_least(ProcState::Registered)
                {
                    effects.push(Effect::ActivateJob {
                        nspace: proc.nspace.clone(),
                        state: JobState::Registered,
                    });
                }
            }
            ProcState::Terminated | ProcState::AbortedBySig | ProcState::FailedToStart => {
                if job.all_procs_terminated() {
                    let recoverable = job.flags.recoverable;
                    let bad_code = job.procs.values().find(|p| p.state.is_error()).map(|p| {
                        if p.exit_code != 0 {
                            p.exit_code
                        } else {
                            exit_code::ABORTED_BY_SIG
                        }
                    });
                    match bad_code {
                        Some(code) if !recoverable => {
                            let job = self.registry.require_job_mut(&proc.nspace)?;
                            if job.exit_code == 0 {
                                job.exit_code = code;
                            }
                            effects.push(Effect::ActivateJob {
                                nspace: proc.nspace.clone(),
                                state: JobState::Aborted,
                            });
                        }
                        _ => effects.push(Effect::ActivateJob {
                            nspace: proc.nspace.clone(),
                            state: JobState::Terminated,
                        }),
                    }
                }
            }
            ProcState::Init => {}
        }
        Ok(effects)
    }

    /// State changes of the daemons themselves.
    fn daemon_proc_state(
        &mut self,
        proc: &ProcName,
        state: ProcState,
    ) -> Result<Vec<Effect>, EngineError> {
        match state {
            ProcState::FailedToStart => {
                self.prted_failed_launch = true;
                self.mark_daemon_node(proc.rank, NodeState::Down);
                Ok(vec![Effect::ActivateJob {
                    nspace: proc.nspace.clone(),
                    state: JobState::FailedToStart,
                }])
            }
            ProcState::AbortedBySig | ProcState::Terminated => {
                self.mark_daemon_node(proc.rank, NodeState::Down);
                Ok(vec![])
            }
            _ => Ok(vec![]),
        }
    }

    fn mark_daemon_node(&mut self, rank: dvm_core::id::Rank, state: NodeState) {
        if let Some(idx) = self.registry.node_of_daemon(rank) {
            if let Some(node) = self.registry.node_mut(idx) {
                node.state = state;
            }
        }
    }

    /// Launcher-level daemon failure (could not even exec it).
    pub(crate) fn daemon_spawn_failed(
        &mut self,
        rank: dvm_core::id::Rank,
        reason: &str,
    ) -> Result<Vec<Effect>, EngineError> {
        tracing::error!(rank, reason, "daemon spawn failed");
        let nspace = self.registry.dvm_nspace().clone();
        if let Some(daemon) = self.registry.daemon_job_mut().proc_mut(rank) {
            daemon.state = ProcState::FailedToStart;
            daemon.exit_code = exit_code::FAILED_TO_START;
        }
        self.prted_failed_launch = true;
        self.mark_daemon_node(rank, NodeState::Down);
        Ok(vec![Effect::ActivateJob { nspace, state: JobState::FailedToStart }])
    }
}

/// Stable string hash for coprocessor serial numbers (djb2).
pub(crate) fn hash_str(s: &str) -> u32 {
    let mut h: u32 = 5381;
    for b in s.bytes() {
        h = h.wrapping_mul(33).wrapping_add(b as u32);
    }
    h
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
