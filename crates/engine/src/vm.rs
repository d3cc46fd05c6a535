// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Virtual-machine construction and proc mapping.
//!
//! From the requested apps plus the node pool, compute which nodes need
//! a daemon, assign contiguous daemon ranks, and emit the spawn
//! instructions. Mapping then places app procs onto the VM's nodes.

use crate::error::EngineError;
use crate::runtime::HeadRuntime;
use dvm_core::attr::AttrKey;
use dvm_core::clock::Clock;
use dvm_core::effect::Effect;
use dvm_core::id::{Nspace, ProcName, Rank};
use dvm_core::job::{JobMap, JobState};
use dvm_core::node::{Node, NodeIndex, NodeState};
use dvm_core::proc::{Proc, ProcState};

/// Counts summarized in a topology signature, e.g. `2N:1S:8C:16H:x86_64:le`.
/// Sockets are optional: some platforms never report them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SigCounts {
    pub numas: Option<u32>,
    pub sockets: Option<u32>,
    pub cores: Option<u32>,
    pub hwthreads: Option<u32>,
}

pub(crate) fn sig_counts(sig: &str) -> SigCounts {
    let mut counts = SigCounts::default();
    for token in sig.split(':') {
        let Some(last) = token.chars().last() else { continue };
        let Ok(n) = token[..token.len().saturating_sub(1)].parse::<u32>() else {
            continue;
        };
        match last {
            'N' => counts.numas = Some(n),
            'S' => counts.sockets = Some(n),
            'C' => counts.cores = Some(n),
            'H' => counts.hwthreads = Some(n),
            _ => {}
        }
    }
    counts
}

/// Apply the slots policy to one node.
///
/// Policy is `cores`, `sockets`, `numas`, `hwthreads`, or an integer;
/// sockets fall back to numas when unreported.
pub(crate) fn set_slots(node: &mut Node, policy: &str, topo_sig: Option<&str>) {
    let counts = topo_sig.map(sig_counts).unwrap_or_default();
    let slots = match policy {
        "cores" => counts.cores,
        "sockets" => counts.sockets.or(counts.numas),
        "numas" => counts.numas,
        "hwthreads" => counts.hwthreads,
        other => other.parse::<u32>().ok(),
    };
    if let Some(slots) = slots {
        node.slots = slots.max(1);
        node.slots_given = true;
    }
}

impl<C: Clock> HeadRuntime<C> {
    /// States never regress: later VM passes against a standing DVM
    /// leave the daemon job wherever it already got to.
    pub(crate) fn mark_daemons_reported(&mut self) {
        let daemons = self.registry.daemon_job_mut();
        if daemons.state < JobState::DaemonsReported {
            daemons.state = JobState::DaemonsReported;
        }
    }

    /// Compute the node set that must host a daemon and emit the spawn
    /// instructions for the new ones.
    pub(crate) fn setup_virtual_machine(
        &mut self,
        nspace: &Nspace,
    ) -> Result<Vec<Effect>, EngineError> {
        tracing::debug!(%nspace, "setting up the virtual machine");
        let job = self.registry.require_job(nspace)?;
        let fixed_dvm = job.attributes.flag(AttrKey::FixedDvm);
        let dynamic = job.originator.is_some() && !fixed_dvm;
        let no_vm = job.attributes.flag(AttrKey::NoVm)
            || self.registry.daemon_job().attributes.flag(AttrKey::NoVm);
        let multi_sim = job.attributes.flag(AttrKey::MultiDaemonSim);

        // A fixed DVM stands as is.
        if fixed_dvm {
            self.mark_daemons_reported();
            if let Some(map) = self.registry.daemon_job_mut().map.as_mut() {
                map.num_new_daemons = 0;
            }
            return Ok(vec![Effect::ActivateJob {
                nspace: nspace.clone(),
                state: JobState::DaemonsReported,
            }]);
        }

        // Make sure the daemon map exists and contains us.
        {
            let daemons = self.registry.daemon_job_mut();
            let map = daemons.map.get_or_insert_with(JobMap::default);
            if !map.contains(NodeIndex(0)) {
                map.nodes.push(NodeIndex(0));
            }
            map.num_new_daemons = 0;
        }

        let candidates: Vec<NodeIndex> = if dynamic {
            // Dynamic spawns only grow the VM through explicitly added
            // nodes.
            let mut added = Vec::new();
            for (idx, node) in self.registry.nodes() {
                if idx == NodeIndex(0) {
                    continue;
                }
                if node.state == NodeState::Added {
                    added.push(idx);
                }
            }
            for idx in &added {
                if let Some(node) = self.registry.node_mut(*idx) {
                    node.state = NodeState::Up;
                }
            }
            if added.is_empty() {
                tracing::debug!(%nspace, "no new daemons required");
                self.mark_daemons_reported();
                self.registry.daemon_job_mut().flags.updated = false;
                return Ok(vec![Effect::ActivateJob {
                    nspace: nspace.clone(),
                    state: JobState::DaemonsReported,
                }]);
            }
            added
        } else if no_vm || multi_sim {
            // Include exactly the nodes already hosting procs (or, in a
            // multi-daemon simulation, everything usable).
            let mut picked = Vec::new();
            let indices: Vec<_> = self.registry.nodes().map(|(i, _)| i).skip(1).collect();
            for idx in indices {
                let Some(node) = self.registry.node_mut(idx) else { continue };
                match node.state {
                    NodeState::DoNotUse => {
                        // One-shot exclusion: reset for the next pass.
                        node.state = NodeState::Up;
                        continue;
                    }
                    NodeState::Down | NodeState::NotIncluded => continue,
                    _ => {}
                }
                if node.num_procs > 0 || multi_sim {
                    picked.push(idx);
                }
            }
            if picked.is_empty() && !multi_sim {
                let head_procs =
                    self.registry.node(NodeIndex(0)).map(|n| n.num_procs).unwrap_or(0);
                if head_procs > 0 {
                    self.mark_daemons_reported();
                    return Ok(vec![Effect::ActivateJob {
                        nspace: nspace.clone(),
                        state: JobState::DaemonsReported,
                    }]);
                }
                return Ok(vec![Effect::ActivateJob {
                    nspace: nspace.clone(),
                    state: JobState::ForcedExit,
                }]);
            }
            picked
        } else {
            self.gather_candidates(nspace)?
        };

        // Filter the survivors and cap the VM size.
        let mut survivors: Vec<NodeIndex> = Vec::new();
        for idx in candidates {
            if idx == NodeIndex(0) && !self.config.hnp_is_allocated {
                continue;
            }
            let Some(node) = self.registry.node_mut(idx) else { continue };
            match node.state {
                NodeState::DoNotUse => {
                    node.state = NodeState::Up;
                    continue;
                }
                NodeState::Down | NodeState::NotIncluded => continue,
                _ => {}
            }
            survivors.push(idx);
        }
        if let Some(cap) = self.config.max_vm_size {
            survivors.truncate(cap);
        }

        if survivors.is_empty() {
            // Only the head node remains; nothing to launch.
            self.mark_daemons_reported();
            return Ok(vec![Effect::ActivateJob {
                nspace: nspace.clone(),
                state: JobState::DaemonsReported,
            }]);
        }

        // Create a daemon for every survivor not already hosting one.
        let mut new_daemons: Vec<(Rank, String)> = Vec::new();
        let dvm_nspace = self.registry.dvm_nspace().clone();
        for idx in survivors {
            let already = self.registry.node(idx).and_then(|n| n.daemon);
            if already.is_some() {
                continue;
            }
            let rank = self.registry.daemon_job().next_rank();
            let mut daemon = Proc::new(ProcName::new(dvm_nspace.clone(), rank));
            daemon.node = Some(idx);
            daemon.state = ProcState::Init;
            self.registry.daemon_job_mut().insert_proc(daemon);
            let name = match self.registry.node_mut(idx) {
                Some(node) => {
                    node.daemon = Some(rank);
                    node.name.clone()
                }
                None => continue,
            };
            let map = self.registry.daemon_job_mut().map.get_or_insert_with(JobMap::default);
            if !map.contains(idx) {
                map.nodes.push(idx);
            }
            new_daemons.push((rank, name));
        }

        let num_new = new_daemons.len() as u32;
        {
            let daemons = self.registry.daemon_job_mut();
            if let Some(map) = daemons.map.as_mut() {
                map.num_new_daemons = num_new;
            }
            if num_new > 0 {
                daemons.flags.updated = true;
            }
        }

        if num_new == 0 {
            // Everybody already has a daemon.
            self.mark_daemons_reported();
            return Ok(vec![Effect::ActivateJob {
                nspace: nspace.clone(),
                state: JobState::DaemonsReported,
            }]);
        }

        self.registry.require_job_mut(nspace)?.flags.launched_daemons = true;
        let num_daemons = self.registry.daemon_job().num_procs;
        let specs = crate::spawn::build_daemon_specs(
            &self.config,
            &dvm_nspace,
            num_daemons,
            &new_daemons,
        );
        tracing::info!(new = num_new, total = num_daemons, "launching daemons");
        Ok(vec![
            Effect::SpawnDaemons { specs },
            Effect::ActivateJob { nspace: nspace.clone(), state: JobState::DaemonsLaunched },
        ])
    }

    /// Candidate nodes for a regular launch: the union of dash-host and
    /// hostfile constraints, falling back to the default hostfile, then
    /// to the whole pool.
    fn gather_candidates(&mut self, nspace: &Nspace) -> Result<Vec<NodeIndex>, EngineError> {
        let job = self.registry.require_job(nspace)?;
        let mut names: Vec<String> = Vec::new();
        if let Some(file_hosts) = job.attributes.get_string(AttrKey::HostFile) {
            names.extend(file_hosts.split(',').map(|s| s.trim().to_string()));
        } else {
            let mut default_used = false;
            let mut wants_default = false;
            for app in &job.apps {
                if let Some(hosts) = app.attributes.get_string(AttrKey::DashHost) {
                    names.extend(hosts.split(',').map(|s| s.trim().to_string()));
                } else if let Some(hosts) = app.attributes.get_string(AttrKey::Hostfile) {
                    names.extend(hosts.split(',').map(|s| s.trim().to_string()));
                } else if !self.config.default_hostfile.is_empty() {
                    if !default_used {
                        wants_default = true;
                        default_used = true;
                    }
                } else {
                    // No constraint at all: the whole pool qualifies.
                    return Ok(self.registry.nodes().map(|(i, _)| i).collect());
                }
            }
            if wants_default {
                names.extend(self.config.default_hostfile.iter().map(|h| h.name.clone()));
            }
        }

        let mut out = Vec::new();
        for name in names {
            if name.is_empty() {
                continue;
            }
            match self.registry.find_node(&name) {
                Some(idx) => {
                    if !out.contains(&idx) {
                        out.push(idx);
                    }
                }
                None => tracing::warn!(host = %name, "requested host not in the pool"),
            }
        }
        if out.is_empty() {
            return Ok(self.registry.nodes().map(|(i, _)| i).collect());
        }
        Ok(out)
    }

    /// Map a job's procs onto the VM.
    ///
    /// Round-robin by free slots, then oversubscribe cyclically. The
    /// real placement policy is a seam for an external mapper.
    pub(crate) fn map_job(&mut self, nspace: &Nspace) -> Result<(), EngineError> {
        let vm_nodes: Vec<NodeIndex> = {
            let daemons = self.registry.daemon_job();
            match daemons.map.as_ref() {
                Some(map) if !map.nodes.is_empty() => map
                    .nodes
                    .iter()
                    .copied()
                    .filter(|idx| {
                        self.registry.node(*idx).map(|n| n.usable()).unwrap_or(false)
                    })
                    .collect(),
                _ => vec![NodeIndex(0)],
            }
        };
        if vm_nodes.is_empty() {
            return Err(EngineError::NoNodes);
        }

        let job = self.registry.require_job(nspace)?;
        let apps: Vec<(u32, u32)> = job.apps.iter().map(|a| (a.idx, a.num_procs)).collect();
        let mut rank = job.next_rank();

        let mut placements: Vec<(Rank, u32, NodeIndex)> = Vec::new();
        let mut cursor = 0usize;
        for (app_idx, np) in apps {
            for _ in 0..np {
                // Prefer a node with a free slot; otherwise plain
                // round-robin (oversubscribed).
                let mut chosen = None;
                for probe in 0..vm_nodes.len() {
                    let idx = vm_nodes[(cursor + probe) % vm_nodes.len()];
                    let free = self
                        .registry
                        .node(idx)
                        .map(|n| n.slots_free() > 0)
                        .unwrap_or(false);
                    if free {
                        chosen = Some((idx, (cursor + probe) % vm_nodes.len()));
                        break;
                    }
                }
                let (idx, pos) = chosen
                    .unwrap_or_else(|| (vm_nodes[cursor % vm_nodes.len()], cursor % vm_nodes.len()));
                cursor = pos + 1;
                placements.push((rank, app_idx, idx));
                if let Some(node) = self.registry.node_mut(idx) {
                    node.slots_inuse += 1;
                    node.num_procs += 1;
                }
                rank += 1;
            }
        }

        let mut map = JobMap::default();
        for (_, _, idx) in &placements {
            if !map.contains(*idx) {
                map.nodes.push(*idx);
            }
        }

        for (rank, app_idx, idx) in &placements {
            let daemon = self.registry.node(*idx).and_then(|n| n.daemon);
            let name = ProcName::new(nspace.clone(), *rank);
            if let Some(node) = self.registry.node_mut(*idx) {
                node.procs.push(name.clone());
            }
            let mut proc = Proc::new(name);
            proc.app_idx = *app_idx;
            proc.node = Some(*idx);
            proc.daemon = daemon;
            self.registry.require_job_mut(nspace)?.insert_proc(proc);
        }
        let job = self.registry.require_job_mut(nspace)?;
        job.map = Some(map);
        tracing::info!(%nspace, procs = job.num_procs, "mapping complete");
        Ok(())
    }
}

#[cfg(test)]
#[path = "vm_tests.rs"]
mod tests;
