// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests.

use crate::config::{HeadConfig, HostSpec};
use crate::runtime::HeadRuntime;
use dvm_adapters::{DaemonLauncher, LocalRouter, MemKvStore};
use dvm_core::clock::FakeClock;
use dvm_core::effect::DaemonSpec;
use dvm_core::event::Event;
use dvm_core::id::{Nspace, ProcName, Rank};
use dvm_wire::{tag, DaemonReport, DataBuffer};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) const TEST_NSPACE: &str = "dvm-testfabric00000000x";
pub(crate) const TEST_SIG: &str = "1N:1S:2C:4H:x86_64:le";

/// Launcher that records specs instead of starting anything.
#[derive(Clone, Default)]
pub(crate) struct RecordingLauncher {
    pub specs: Arc<Mutex<Vec<DaemonSpec>>>,
}

impl DaemonLauncher for RecordingLauncher {
    fn spawn(&self, specs: Vec<DaemonSpec>, _event_tx: mpsc::UnboundedSender<Event>) {
        self.specs.lock().extend(specs);
    }
}

pub(crate) struct TestHead {
    pub rt: HeadRuntime<FakeClock>,
    pub rx: mpsc::UnboundedReceiver<Event>,
    pub router: LocalRouter,
    pub clock: FakeClock,
    pub launcher: RecordingLauncher,
    /// Events the head runtime did not want (daemon-side traffic).
    pub passed_over: Vec<Event>,
}

pub(crate) fn dvm_nspace() -> Nspace {
    Nspace::from_string(TEST_NSPACE)
}

pub(crate) fn daemon_name(rank: Rank) -> ProcName {
    ProcName::new(dvm_nspace(), rank)
}

/// Build a head runtime wired to a fresh in-process router.
pub(crate) fn head_with_config(config: HeadConfig) -> TestHead {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = LocalRouter::new();
    let endpoint = router.register(daemon_name(0), tx.clone());
    let clock = FakeClock::new();
    let launcher = RecordingLauncher::default();
    let rt = HeadRuntime::with_nspace(
        dvm_nspace(),
        config,
        clock.clone(),
        Arc::new(endpoint),
        Arc::new(launcher.clone()),
        MemKvStore::new(),
        tx,
    );
    TestHead { rt, rx, router, clock, launcher, passed_over: Vec::new() }
}

pub(crate) fn head() -> TestHead {
    head_with_config(HeadConfig {
        node_name: "hA".to_string(),
        topo_sig: TEST_SIG.to_string(),
        topo_payload: vec![0xAA],
        ..HeadConfig::default()
    })
}

/// Head with hB/hC allocated alongside the head node.
pub(crate) fn head_with_three_nodes() -> TestHead {
    head_with_config(HeadConfig {
        node_name: "hA".to_string(),
        topo_sig: TEST_SIG.to_string(),
        topo_payload: vec![0xAA],
        allocation: vec![HostSpec::new("hB"), HostSpec::new("hC")],
        ..HeadConfig::default()
    })
}

impl TestHead {
    /// Drain the event queue, stepping the runtime until quiescent.
    pub fn drive(&mut self) {
        while let Ok(ev) = self.rx.try_recv() {
            if self.rt.wants(&ev) {
                self.rt.step(ev).expect("head step failed");
            } else {
                self.passed_over.push(ev);
            }
        }
    }

    /// Fire due timers, then drive.
    pub fn drive_timers(&mut self) {
        let fired = self.rt.fire_due_timers();
        for ev in fired {
            self.rt.step(ev).expect("timer step failed");
        }
        self.drive();
    }

    /// Inject a daemon's "I am up" report as an inbound RML message.
    pub fn report_daemon_up(&mut self, rank: Rank, nodename: &str, sig: &str) {
        let report = DaemonReport {
            daemon: daemon_name(rank),
            modex: Some(vec![rank as u8]),
            nodename: nodename.to_string(),
            aliases: vec![],
            topo_sig: sig.to_string(),
            topo: if rank == 1 {
                Some(dvm_wire::InlineTopo { compressed: false, payload: vec![0xBB] })
            } else {
                None
            },
            inventory: None,
        };
        let mut buf = DataBuffer::new();
        report.pack(&mut buf);
        self.inject(rank, tag::PRTED_CALLBACK, buf.into_vec());
    }

    /// Inject an arbitrary inbound message from a daemon.
    pub fn inject(&mut self, rank: Rank, t: u16, payload: Vec<u8>) {
        self.rt
            .step(Event::RmlMessage { sender: daemon_name(rank), tag: t, payload })
            .expect("inject failed");
        self.drive();
    }

    /// Current state of a job, for assertions.
    pub fn job_state(&self, nspace: &Nspace) -> dvm_core::job::JobState {
        self.rt.registry.job(nspace).expect("job missing").state
    }
}
