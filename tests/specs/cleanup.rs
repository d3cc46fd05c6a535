// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: cleanup.
//!
//! After a job completes, `DVM_CLEANUP_JOB_CMD` reaches every daemon:
//! slot accounting is restored, the per-job session subtree vanishes,
//! and the job is gone from the head's catalog.

use super::prelude::*;
use dvm_core::job::JobState;

#[tokio::test]
async fn cleanup_restores_every_daemon_to_its_pre_job_state() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(3, &tmp);
    let ns = run_job(&mut fabric, one_app(6));
    assert_eq!(fabric.job_state(&ns), JobState::Running);

    // Each ring daemon holds slots and a session subtree for the job.
    for rank in [1u32, 2] {
        let node = fabric.daemon(rank);
        assert_eq!(node.rt.my_node_snapshot().slots_inuse, 2);
        assert_eq!(node.rt.my_node_snapshot().num_procs, 2);
        assert!(node.rt.session_job_dir(&ns).exists());
    }

    finish_job(&mut fabric, &ns);
    assert_eq!(fabric.job_state(&ns), JobState::Terminated);

    fabric.head.cleanup_job(&ns).unwrap();
    fabric.step_all();

    for rank in [1u32, 2] {
        let node = fabric.daemon(rank);
        assert_eq!(node.rt.my_node_snapshot().slots_inuse, 0);
        assert_eq!(node.rt.my_node_snapshot().num_procs, 0);
        assert!(!node.rt.session_job_dir(&ns).exists());
        assert_eq!(node.rt.kv().client_count(), 0);
    }

    // A subsequent lookup for the job or its procs is not-found.
    assert!(fabric.head.registry.job(&ns).is_none());

    // A second cleanup broadcast is safely ignored everywhere.
    fabric.head.cleanup_job(&ns).unwrap();
    fabric.step_all();
}
