// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-daemon configuration.

use dvm_core::id::{Nspace, ProcName, Rank};
use std::path::PathBuf;
use std::time::Duration;

/// Everything a daemon needs to know at start-up; the launch command
/// line and environment fill this in.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// The DVM's nspace (`ess_base_nspace`).
    pub nspace: Nspace,
    /// Our rank in the daemon job (`ess_base_vpid`).
    pub rank: Rank,
    /// Total daemon count including the head (`ess_base_num_procs`).
    pub num_daemons: u32,

    /// Canonical hostname as this node knows itself.
    pub hostname: String,
    /// Extra names this node answers to.
    pub aliases: Vec<String>,

    pub topo_sig: String,
    pub topo_payload: Vec<u8>,
    /// Serial numbers of coprocessors hosted here, comma-joined.
    pub coprocessors: Option<String>,
    /// Our own serial number when this node is a coprocessor.
    pub own_serial: Option<String>,
    /// Hardware inventory blob for the head's KV server.
    pub inventory: Option<Vec<u8>>,
    /// Wireup blob stored into the head's modex.
    pub modex: Option<Vec<u8>>,

    /// Heartbeat send interval.
    pub hb_period: Duration,
    /// Missed-heartbeat threshold.
    pub hb_timeout: Duration,

    /// Root of the session directory tree.
    pub session_root: PathBuf,

    pub debug_daemons: bool,
    /// Abort right after start-up (failure-path testing).
    pub test_suicide: bool,
}

impl DaemonConfig {
    pub fn me(&self) -> ProcName {
        ProcName::new(self.nspace.clone(), self.rank)
    }

    pub fn head(&self) -> ProcName {
        ProcName::new(self.nspace.clone(), dvm_core::id::HNP_RANK)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            nspace: Nspace::from_string("dvm-unset"),
            rank: 0,
            num_daemons: 1,
            hostname: "localhost".to_string(),
            aliases: Vec::new(),
            topo_sig: "1N:1S:2C:4H:x86_64:le".to_string(),
            topo_payload: Vec::new(),
            coprocessors: None,
            own_serial: None,
            inventory: None,
            modex: None,
            hb_period: Duration::from_secs(5),
            hb_timeout: Duration::from_secs(10),
            session_root: std::env::temp_dir().join("dvm-sessions"),
            debug_daemons: false,
            test_suicide: false,
        }
    }
}
