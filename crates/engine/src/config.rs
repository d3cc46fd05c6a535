// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Head-node configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One host in an allocation, as handed over by whichever parser or
/// resource manager produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    /// Explicit slot count; `None` means "apply the slots policy".
    pub slots: Option<u32>,
}

impl HostSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), slots: None }
    }

    pub fn with_slots(name: impl Into<String>, slots: u32) -> Self {
        Self { name: name.into(), slots: Some(slots) }
    }
}

/// Configuration for the head-node runtime.
#[derive(Debug, Clone)]
pub struct HeadConfig {
    /// Canonical name of the node the head runs on.
    pub node_name: String,
    /// The head's own topology signature and descriptor.
    pub topo_sig: String,
    pub topo_payload: Vec<u8>,

    /// Hosts handed to us by the resource manager (managed) or parsed
    /// from hostfiles (unmanaged).
    pub allocation: Vec<HostSpec>,
    pub managed_allocation: bool,
    /// Fallback hosts when neither dash-host nor a per-app hostfile is
    /// given; consumed at most once per VM pass.
    pub default_hostfile: Vec<HostSpec>,

    /// Slots policy for unmanaged allocations:
    /// `cores`, `sockets`, `numas`, `hwthreads`, or an integer.
    /// `none` disables the policy.
    pub set_slots: Option<String>,
    /// Keep domain parts of reported hostnames.
    pub fqdn: bool,
    /// The head node may host application procs.
    pub hnp_is_allocated: bool,
    pub max_vm_size: Option<usize>,

    /// Command used to start daemons; the word `dvmd` marks where
    /// daemon arguments are substituted.
    pub launch_agent: String,
    /// Contact URI daemons phone home to.
    pub head_uri: String,

    /// How long to wait for stack-trace replies before giving up.
    pub stack_trace_wait_timeout: Duration,

    /// The DVM outlives individual jobs.
    pub persistent: bool,

    // Debug flags forwarded to daemons.
    pub debug: bool,
    pub debug_daemons: bool,
    pub debug_daemons_file: bool,
    pub leave_session_attached: bool,
    pub test_suicide: bool,
    /// Extra `--prtemca <name> <value>` parameters to forward.
    pub prtemca: Vec<(String, String)>,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".to_string(),
            topo_sig: "1N:1S:2C:4H:x86_64:le".to_string(),
            topo_payload: Vec::new(),
            allocation: Vec::new(),
            managed_allocation: false,
            default_hostfile: Vec::new(),
            set_slots: None,
            fqdn: false,
            hnp_is_allocated: true,
            max_vm_size: None,
            launch_agent: "dvmd".to_string(),
            head_uri: String::new(),
            stack_trace_wait_timeout: Duration::from_secs(30),
            persistent: false,
            debug: false,
            debug_daemons: false,
            debug_daemons_file: false,
            leave_session_attached: false,
            test_suicide: false,
            prtemca: Vec::new(),
        }
    }
}
