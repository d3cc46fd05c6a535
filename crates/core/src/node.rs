// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node: one machine in the pool.

use crate::attr::Attributes;
use crate::id::{ProcName, Rank};
use crate::topology::TopoIndex;
use serde::{Deserialize, Serialize};

/// Stable handle into the registry's node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(pub usize);

impl std::fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Availability state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Unknown,
    Up,
    Down,
    /// Excluded from the current allocation.
    NotIncluded,
    /// Excluded from the current mapping pass only.
    DoNotUse,
    /// Added after the DVM came up; eligible for dynamic spawns.
    Added,
}

crate::simple_display! {
    NodeState {
        Unknown => "unknown",
        Up => "up",
        Down => "down",
        NotIncluded => "not_included",
        DoNotUse => "do_not_use",
        Added => "added",
    }
}

/// One machine in the pool. Lives for the duration of the head-node
/// process; the pool never shrinks, nodes only change state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Canonical name (domain part stripped unless FQDN is in use).
    pub name: String,
    /// Alias list; the canonical name is always first.
    pub aliases: Vec<String>,
    /// Shared topology entry, deduplicated by signature.
    pub topology: Option<TopoIndex>,
    /// Slot capacity.
    pub slots: u32,
    pub slots_inuse: u32,
    /// Procs currently mapped to this node.
    pub num_procs: u32,
    pub state: NodeState,
    /// Daemon hosted on this node, by rank. Mutual with `Proc::node`.
    pub daemon: Option<Rank>,
    pub daemon_launched: bool,
    /// Slot count was explicitly given (policy applied or user-set).
    pub slots_given: bool,
    /// Procs resident on this node.
    pub procs: Vec<ProcName>,
    pub attributes: Attributes,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            aliases: vec![name.clone()],
            name,
            topology: None,
            slots: 1,
            slots_inuse: 0,
            num_procs: 0,
            state: NodeState::Unknown,
            daemon: None,
            daemon_launched: false,
            slots_given: false,
            procs: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    /// True if this node answers to the given name or alias.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    /// Slots still available for mapping.
    pub fn slots_free(&self) -> u32 {
        self.slots.saturating_sub(self.slots_inuse)
    }

    /// Usable for VM construction (not down/excluded).
    pub fn usable(&self) -> bool {
        !matches!(
            self.state,
            NodeState::Down | NodeState::NotIncluded | NodeState::DoNotUse
        )
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
