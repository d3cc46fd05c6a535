// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon command-line assembly.
//!
//! The launch agent is split on whitespace; the word `dvmd` marks the
//! substitution point for daemon arguments. All runtime options travel
//! as `--prtemca <name> <value>` so the daemon can cross-check them
//! against its environment for duplicates.

use crate::config::HeadConfig;
use dvm_core::effect::DaemonSpec;
use dvm_core::id::{Nspace, Rank};

/// Placeholder replaced per-daemon with its assigned rank.
const VPID_TEMPLATE: &str = "<template>";

/// Split the launch agent and locate the daemon word.
///
/// Location 0 means the agent is a single word (the daemon itself).
pub fn setup_daemon_cmd(launch_agent: &str) -> (Vec<String>, usize) {
    let mut loc = 0;
    let mut argv = Vec::new();
    for (i, word) in launch_agent.split_whitespace().enumerate() {
        if word == "dvmd" || word.ends_with("/dvmd") {
            loc = i;
        }
        argv.push(word.to_string());
    }
    (argv, loc)
}

fn push_mca(argv: &mut Vec<String>, name: &str, value: &str) {
    argv.push("--prtemca".to_string());
    argv.push(name.to_string());
    argv.push(value.to_string());
}

/// Append the arguments every daemon needs. Returns the index of the
/// rank placeholder.
pub fn append_basic_args(
    argv: &mut Vec<String>,
    config: &HeadConfig,
    dvm_nspace: &Nspace,
    num_daemons: u32,
) -> usize {
    if config.debug {
        argv.push("--debug".to_string());
    }
    if config.debug_daemons {
        argv.push("--debug-daemons".to_string());
    }
    if config.debug_daemons_file {
        argv.push("--debug-daemons-file".to_string());
    }
    if config.leave_session_attached {
        argv.push("--leave-session-attached".to_string());
    }
    if config.test_suicide {
        argv.push("--test-suicide".to_string());
    }

    push_mca(argv, "ess_base_nspace", dvm_nspace.as_str());

    argv.push("--prtemca".to_string());
    argv.push("ess_base_vpid".to_string());
    let vpid_index = argv.len();
    argv.push(VPID_TEMPLATE.to_string());

    push_mca(argv, "ess_base_num_procs", &num_daemons.to_string());
    push_mca(argv, "dvm_hnp_uri", &config.head_uri);

    // Pass along user-supplied MCA params, purging anything that can't
    // survive a shell hop and ignoring duplicates.
    for (name, value) in &config.prtemca {
        if value.contains(' ') {
            continue;
        }
        // The daemon only opens a launcher module when explicitly told
        // to; never forward launcher directives.
        if name == "plm" {
            continue;
        }
        if argv.iter().any(|a| a == name) {
            continue;
        }
        push_mca(argv, name, value);
    }

    vpid_index
}

/// Assemble one spec per new daemon, substituting its rank for the
/// placeholder.
pub fn build_daemon_specs(
    config: &HeadConfig,
    dvm_nspace: &Nspace,
    num_daemons: u32,
    new_daemons: &[(Rank, String)],
) -> Vec<DaemonSpec> {
    let (mut argv, _loc) = setup_daemon_cmd(&config.launch_agent);
    let vpid_index = append_basic_args(&mut argv, config, dvm_nspace, num_daemons);

    new_daemons
        .iter()
        .map(|(rank, node)| {
            let mut argv = argv.clone();
            argv[vpid_index] = rank.to_string();
            DaemonSpec { rank: *rank, node: node.clone(), argv }
        })
        .collect()
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
