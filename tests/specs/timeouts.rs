// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: startup timeout.
//!
//! With `startup_timeout=1s` and one daemon callback deliberately
//! dropped, the job fails to start with exit code TIMEOUT and the
//! originator never sees a success response.

use super::prelude::*;
use dvm_core::attr::AttrKey;
use dvm_core::exit_code;
use dvm_core::job::JobState;
use dvm_engine::JobSubmit;
use std::time::Duration;

#[tokio::test]
async fn dropped_callback_times_the_launch_out() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(3, &tmp);
    // Daemon 2 comes up but never phones home.
    fabric.holdback = Some(2);

    let ns = fabric.submit(JobSubmit { startup_timeout_secs: Some(1), ..one_app(6) });

    // The quorum is stuck at 2 of 3; the job is gated on callbacks.
    assert_eq!(fabric.job_state(&ns), JobState::DaemonsLaunched);
    assert_eq!(fabric.head.registry.daemon_job().num_reported, 2);

    fabric.run_for(Duration::from_secs(3), Duration::from_millis(250));

    assert_eq!(fabric.job_state(&ns), JobState::FailedToStart);
    let job = fabric.head.registry.job(&ns).unwrap();
    assert_eq!(job.exit_code, exit_code::TIMEOUT);
    // The timer attribute is gone on the failure path too.
    assert!(!job.attributes.contains(AttrKey::FailureTimerEvent));
    // Nothing was mapped, so nothing ever launched.
    assert_eq!(job.num_launched, 0);
    fabric.head.registry.check_invariants().unwrap();
}

#[tokio::test]
async fn healthy_launches_cancel_the_startup_window() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(3, &tmp);
    let ns = fabric.submit(JobSubmit { startup_timeout_secs: Some(1), ..one_app(3) });
    assert_eq!(fabric.job_state(&ns), JobState::Running);

    // Long after the window, the job is still healthy.
    fabric.run_for(Duration::from_secs(5), Duration::from_millis(500));
    assert_eq!(fabric.job_state(&ns), JobState::Running);
    assert!(!fabric
        .head
        .registry
        .job(&ns)
        .unwrap()
        .attributes
        .contains(AttrKey::FailureTimerEvent));
}

#[tokio::test]
async fn execution_timeout_kills_a_running_job() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(2, &tmp);
    let ns = fabric.submit(JobSubmit { timeout_secs: Some(2), ..one_app(2) });
    assert_eq!(fabric.job_state(&ns), JobState::Running);

    fabric.run_for(Duration::from_secs(4), Duration::from_millis(500));

    // The kill broadcast took every proc down; TIMEOUT survives as the
    // job's exit code.
    let job = fabric.head.registry.job(&ns).unwrap();
    assert_eq!(job.exit_code, exit_code::TIMEOUT);
    assert!(job.is_terminal());
    for (_, sim) in fabric.sims() {
        assert_eq!(sim.running_count(), 0);
    }
}
