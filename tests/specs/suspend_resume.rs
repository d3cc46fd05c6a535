// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: suspend/resume.
//!
//! `SIGNAL_LOCAL_PROCS(J, TSTP)` then `(J, CONT)`: the job's suspended
//! flag toggles, and the children receive STOP (not TSTP) followed by
//! CONT.

use super::prelude::*;
use dvm_core::job::JobState;
use nix::sys::signal::Signal;

#[tokio::test]
async fn tstp_then_cont_toggles_suspension() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(2, &tmp);
    let ns = run_job(&mut fabric, one_app(2));
    assert_eq!(fabric.job_state(&ns), JobState::Running);

    fabric.head.signal_job(&ns, Signal::SIGTSTP as i32).unwrap();
    fabric.step_all();

    // Every daemon hosting a proc of J marked it suspended and
    // delivered STOP, never TSTP.
    assert!(fabric.daemon(1).rt.job_suspended(&ns).unwrap());
    let delivered = fabric.daemon(1).sim.delivered_signals();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1, Signal::SIGSTOP as i32);
    let head_side = fabric.head_sim.delivered_signals();
    assert!(head_side.iter().all(|(_, sig)| *sig == Signal::SIGSTOP as i32));

    fabric.head.signal_job(&ns, Signal::SIGCONT as i32).unwrap();
    fabric.step_all();

    assert!(!fabric.daemon(1).rt.job_suspended(&ns).unwrap());
    let delivered = fabric.daemon(1).sim.delivered_signals();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].1, Signal::SIGCONT as i32);
}

#[tokio::test]
async fn signals_only_reach_the_named_job() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(2, &tmp);
    let first = run_job(&mut fabric, one_app(2));
    let second = run_job(&mut fabric, one_app(2));

    fabric.head.signal_job(&first, Signal::SIGTSTP as i32).unwrap();
    fabric.step_all();

    let signalled: Vec<_> = fabric
        .daemon(1)
        .sim
        .delivered_signals()
        .into_iter()
        .map(|(proc, _)| proc.nspace)
        .collect();
    assert!(signalled.iter().all(|ns| *ns == first));
    assert!(fabric.daemon(1).rt.job_suspended(&first).unwrap());
    assert_eq!(fabric.daemon(1).rt.job_suspended(&second), Some(false));
}
