// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fabric builders for the scenario specs.

use dvm_core::id::{Nspace, ProcName};
use dvm_core::proc::ProcState;
use dvm_daemon::{FabricHost, LocalFabric};
use dvm_engine::{AppSubmit, JobSubmit};
use std::time::Duration;

pub const SIG: &str = "1N:1S:2C:4H:x86_64:le";
pub const HB_PERIOD: Duration = Duration::from_millis(500);
pub const HB_TIMEOUT: Duration = Duration::from_secs(2);

/// Fabric of `n` homogeneous hosts named hA, hB, …; hA is the head.
pub fn fabric(n: usize, tmp: &tempfile::TempDir) -> LocalFabric {
    let hosts = (0..n)
        .map(|i| FabricHost::new(&format!("h{}", (b'A' + i as u8) as char), SIG))
        .collect();
    LocalFabric::new(hosts, tmp.path(), HB_PERIOD, HB_TIMEOUT)
}

pub fn one_app(np: u32) -> JobSubmit {
    JobSubmit {
        apps: vec![AppSubmit { argv: vec!["a.out".into()], np, ..AppSubmit::default() }],
        ..JobSubmit::default()
    }
}

/// Drive a submitted job to RUNNING by letting the sims start.
pub fn run_job(fabric: &mut LocalFabric, submit: JobSubmit) -> Nspace {
    let ns = fabric.submit(submit);
    fabric.step_all();
    ns
}

/// Finish every proc of a job with exit code 0.
pub fn finish_job(fabric: &mut LocalFabric, ns: &Nspace) {
    let ranks: Vec<u32> = fabric
        .head
        .registry
        .job(ns)
        .expect("job")
        .procs
        .keys()
        .copied()
        .collect();
    for rank in ranks {
        fabric.complete_proc(&ProcName::new(ns.clone(), rank), 0);
    }
}

/// Assert that every proc of a job has at least reached `state`.
pub fn assert_procs_at_least(fabric: &LocalFabric, ns: &Nspace, state: ProcState) {
    let job = fabric.head.registry.job(ns).expect("job");
    for proc in job.procs.values() {
        assert!(
            proc.state >= state,
            "proc {} is {} (wanted at least {})",
            proc.name,
            proc.state,
            state
        );
    }
}
