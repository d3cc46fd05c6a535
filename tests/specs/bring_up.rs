// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: 3-daemon bring-up.
//!
//! Allocation of [hA, hB, hC], one app with np=6. The head assigns
//! daemon ranks {0→hA, 1→hB, 2→hC}; mapping places 2 procs per node;
//! the job terminates with exit code 0.

use super::prelude::*;
use dvm_core::job::JobState;
use dvm_core::proc::ProcState;

#[tokio::test]
async fn three_daemon_bring_up() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(3, &tmp);
    let ns = run_job(&mut fabric, one_app(6));

    // Daemon ranks follow the allocation order.
    let daemons = fabric.head.registry.daemon_job();
    assert_eq!(daemons.num_procs, 3);
    for (rank, host) in [(0u32, "hA"), (1, "hB"), (2, "hC")] {
        let node_idx = fabric.head.registry.node_of_daemon(rank).unwrap();
        assert_eq!(fabric.head.registry.node(node_idx).unwrap().name, host);
    }

    // Mapping: 2 procs per node, all running.
    assert_eq!(fabric.job_state(&ns), JobState::Running);
    let job = fabric.head.registry.job(&ns).unwrap();
    assert_eq!(job.num_procs, 6);
    assert_eq!(job.num_launched, 6);
    for (_, node) in fabric.head.registry.nodes() {
        assert_eq!(node.num_procs, 2);
    }
    for (rank, sim) in fabric.sims() {
        assert_eq!(sim.running_count(), 2, "daemon {rank} should host 2 procs");
    }
    assert_procs_at_least(&fabric, &ns, ProcState::Running);
    fabric.head.registry.check_invariants().unwrap();

    // Everything exits cleanly.
    finish_job(&mut fabric, &ns);
    assert_eq!(fabric.job_state(&ns), JobState::Terminated);
    let job = fabric.head.registry.job(&ns).unwrap();
    assert_eq!(job.exit_code, 0);
    assert_eq!(job.num_terminated, 6);
    fabric.head.registry.check_invariants().unwrap();
}

#[tokio::test]
async fn second_job_reuses_the_standing_vm() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(3, &tmp);
    let first = run_job(&mut fabric, one_app(3));
    finish_job(&mut fabric, &first);
    let daemons_before = fabric.head.registry.daemon_job().num_procs;

    let second = run_job(&mut fabric, one_app(3));
    assert_eq!(fabric.job_state(&second), JobState::Running);
    assert_eq!(fabric.head.registry.daemon_job().num_procs, daemons_before);
    finish_job(&mut fabric, &second);
    assert_eq!(fabric.job_state(&second), JobState::Terminated);
}

#[tokio::test]
async fn head_only_fabric_needs_no_daemons() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(1, &tmp);
    let ns = run_job(&mut fabric, one_app(2));
    assert_eq!(fabric.job_state(&ns), JobState::Running);
    assert!(fabric.daemons.is_empty());
    assert_eq!(fabric.head_sim.running_count(), 2);
    finish_job(&mut fabric, &ns);
    assert_eq!(fabric.job_state(&ns), JobState::Terminated);
}
