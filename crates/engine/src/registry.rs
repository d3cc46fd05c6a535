// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job, node, and topology catalog.
//!
//! Strong ownership lives in exactly one table per entity kind; every
//! cross-reference (node↔daemon, proc↔node, node↔topology) is an index
//! or rank, never an owned pointer.

use crate::error::EngineError;
use dvm_core::id::{Nspace, ProcName, Rank, HNP_RANK};
use dvm_core::job::{Job, JobState};
use dvm_core::node::{Node, NodeIndex, NodeState};
use dvm_core::proc::{Proc, ProcState};
use dvm_core::topology::{TopoIndex, Topology};
use std::collections::HashMap;

/// The head node's catalog of everything it coordinates.
pub struct Registry {
    /// The daemon job's nspace, which is also the head's own.
    dvm_nspace: Nspace,
    jobs: HashMap<Nspace, Job>,
    nodes: Vec<Node>,
    topologies: Vec<Topology>,
    /// serial-number hash → rank of the hosting daemon.
    pub coprocessors: HashMap<u32, Rank>,
    pub coprocessors_detected: bool,
    /// Latched once two distinct signatures have been seen.
    pub hetero_nodes: bool,
    /// First compute-node signature observed.
    pub base_compute_sig: Option<String>,
}

impl Registry {
    /// Seed the catalog: node 0 is the head's node, topology 0 the
    /// head's own, and the daemon job holds the head as rank 0.
    pub fn new(dvm_nspace: Nspace, head_node: &str, topology: Topology) -> Self {
        let mut node = Node::new(head_node);
        node.state = NodeState::Up;
        node.topology = Some(TopoIndex(0));
        node.daemon = Some(HNP_RANK);
        node.daemon_launched = true;

        let mut daemon_job = Job::new(dvm_nspace.clone());
        daemon_job.state = JobState::DaemonsLaunched;
        let mut head = Proc::new(ProcName::new(dvm_nspace.clone(), HNP_RANK));
        head.node = Some(NodeIndex(0));
        head.state = ProcState::Running;
        head.alive = true;
        daemon_job.insert_proc(head);
        daemon_job.num_reported = 1;

        let mut jobs = HashMap::new();
        jobs.insert(dvm_nspace.clone(), daemon_job);

        Self {
            dvm_nspace,
            jobs,
            nodes: vec![node],
            topologies: vec![topology],
            coprocessors: HashMap::new(),
            coprocessors_detected: false,
            hetero_nodes: false,
            base_compute_sig: None,
        }
    }

    pub fn dvm_nspace(&self) -> &Nspace {
        &self.dvm_nspace
    }

    // --- jobs ---

    pub fn job(&self, nspace: &Nspace) -> Option<&Job> {
        self.jobs.get(nspace)
    }

    pub fn job_mut(&mut self, nspace: &Nspace) -> Option<&mut Job> {
        self.jobs.get_mut(nspace)
    }

    pub fn require_job(&self, nspace: &Nspace) -> Result<&Job, EngineError> {
        self.job(nspace).ok_or_else(|| EngineError::JobNotFound(nspace.clone()))
    }

    pub fn require_job_mut(&mut self, nspace: &Nspace) -> Result<&mut Job, EngineError> {
        self.jobs
            .get_mut(nspace)
            .ok_or_else(|| EngineError::JobNotFound(nspace.clone()))
    }

    pub fn insert_job(&mut self, job: Job) {
        self.jobs.insert(job.nspace.clone(), job);
    }

    /// Drop a job from the catalog entirely (cleanup).
    pub fn remove_job(&mut self, nspace: &Nspace) -> Option<Job> {
        self.jobs.remove(nspace)
    }

    pub fn daemon_job(&self) -> &Job {
        // Seeded in new() and never removed.
        match self.jobs.get(&self.dvm_nspace) {
            Some(job) => job,
            None => unreachable!("daemon job seeded at construction"),
        }
    }

    pub fn daemon_job_mut(&mut self) -> &mut Job {
        match self.jobs.get_mut(&self.dvm_nspace) {
            Some(job) => job,
            None => unreachable!("daemon job seeded at construction"),
        }
    }

    /// Application jobs (everything except the daemon job).
    pub fn app_jobs(&self) -> impl Iterator<Item = &Job> {
        let dvm = self.dvm_nspace.clone();
        self.jobs.values().filter(move |j| j.nspace != dvm)
    }

    pub fn app_nspaces(&self) -> Vec<Nspace> {
        self.app_jobs().map(|j| j.nspace.clone()).collect()
    }

    // --- nodes ---

    pub fn node(&self, idx: NodeIndex) -> Option<&Node> {
        self.nodes.get(idx.0)
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> Option<&mut Node> {
        self.nodes.get_mut(idx.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn find_node(&self, name: &str) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.answers_to(name)).map(NodeIndex)
    }

    /// Find or create a node entry for the given host.
    pub fn ensure_node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.find_node(name) {
            return idx;
        }
        self.nodes.push(Node::new(name));
        NodeIndex(self.nodes.len() - 1)
    }

    /// Node hosting the given daemon rank.
    pub fn node_of_daemon(&self, rank: Rank) -> Option<NodeIndex> {
        self.daemon_job()
            .proc(rank)
            .and_then(|d| d.node)
    }

    // --- topologies ---

    pub fn topology(&self, idx: TopoIndex) -> Option<&Topology> {
        self.topologies.get(idx.0)
    }

    pub fn topology_mut(&mut self, idx: TopoIndex) -> Option<&mut Topology> {
        self.topologies.get_mut(idx.0)
    }

    /// The head's own topology entry.
    pub fn my_topology(&self) -> &Topology {
        match self.topologies.first() {
            Some(topo) => topo,
            None => unreachable!("head topology seeded at construction"),
        }
    }

    pub fn find_topology(&self, sig: &str) -> Option<TopoIndex> {
        self.topologies.iter().position(|t| t.signature == sig).map(TopoIndex)
    }

    /// Deduplicating insert: an existing signature returns its entry.
    pub fn add_topology(&mut self, topo: Topology) -> TopoIndex {
        if let Some(idx) = self.find_topology(&topo.signature) {
            return idx;
        }
        self.topologies.push(topo);
        TopoIndex(self.topologies.len() - 1)
    }

    pub fn num_topologies(&self) -> usize {
        self.topologies.len()
    }

    // --- invariants ---

    /// Registry-wide self-check used by the scenario tests.
    pub fn check_invariants(&self) -> Result<(), String> {
        for job in self.jobs.values() {
            if job.num_reported > job.num_procs {
                return Err(format!(
                    "{}: num_reported {} > num_procs {}",
                    job.nspace, job.num_reported, job.num_procs
                ));
            }
            if job.num_terminated > job.num_launched && job.nspace != self.dvm_nspace {
                return Err(format!(
                    "{}: num_terminated {} > num_launched {}",
                    job.nspace, job.num_terminated, job.num_launched
                ));
            }
            if job.num_launched > job.num_procs {
                return Err(format!(
                    "{}: num_launched {} > num_procs {}",
                    job.nspace, job.num_launched, job.num_procs
                ));
            }
        }
        // Node ↔ daemon back-references are mutual.
        let daemons = self.daemon_job();
        for (idx, node) in self.nodes() {
            if let Some(rank) = node.daemon {
                let daemon = daemons
                    .proc(rank)
                    .ok_or_else(|| format!("{}: daemon {} missing", node.name, rank))?;
                if daemon.node != Some(idx) {
                    return Err(format!(
                        "{}: daemon {} points at {:?}",
                        node.name, rank, daemon.node
                    ));
                }
            }
        }
        // Topology dedup: signatures are unique in the table.
        for (i, a) in self.topologies.iter().enumerate() {
            for b in self.topologies.iter().skip(i + 1) {
                if a.signature == b.signature {
                    return Err(format!("duplicate topology signature {}", a.signature));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
