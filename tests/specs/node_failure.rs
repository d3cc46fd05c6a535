// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: mid-run node failure.
//!
//! 4-daemon ring {1,2,3,4} with hb_period=0.5s, hb_timeout=2s. Daemon
//! 2 dies at t≈10s; daemon 3 detects it within the timeout, repairs
//! the ring toward daemon 1, and the failure is propagated to every
//! surviving daemon exactly once.

use super::prelude::*;
use dvm_core::event::{Event, NotifyCode};
use dvm_core::id::ProcName;
use dvm_core::node::NodeState;
use dvm_core::proc::ProcState;
use std::time::Duration;
use tokio::sync::mpsc;

const STEP: Duration = Duration::from_millis(250);

fn drain_aborted(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<ProcName> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        if let Event::KvNotify { code: NotifyCode::ProcAborted, affected } = ev {
            out.push(affected);
        }
    }
    out
}

#[tokio::test]
async fn daemon_failure_is_detected_and_propagated_once() {
    let tmp = tempfile::tempdir().unwrap();
    // 5 hosts: head + ring daemons {1,2,3,4}.
    let mut fabric = fabric(5, &tmp);
    let ns = run_job(&mut fabric, one_app(4));

    // Probes on every ring daemon's KV server.
    let mut probes = Vec::new();
    for rank in 1..=4u32 {
        let (tx, rx) = mpsc::unbounded_channel();
        fabric
            .daemon(rank)
            .rt
            .kv()
            .register_event_handler(NotifyCode::ProcAborted, tx);
        probes.push((rank, rx));
    }

    // A healthy ring for ten seconds.
    fabric.run_for(Duration::from_secs(10), STEP);
    for (_, rx) in probes.iter_mut() {
        assert!(drain_aborted(rx).is_empty(), "healthy ring reported a failure");
    }
    assert_eq!(fabric.daemon(3).rt.detector().hb_observing, 2);

    // Daemon 2 dies abruptly.
    fabric.kill_daemon(2);
    fabric.run_for(Duration::from_secs(4), STEP);

    // Daemon 3 noticed and now watches daemon 1.
    assert_eq!(fabric.daemon(3).rt.detector().hb_observing, 1);
    assert!(!fabric.daemon(3).rt.detector().is_alive(2));

    // Exactly one abort notification per surviving daemon.
    for (rank, rx) in probes.iter_mut() {
        if *rank == 2 {
            continue;
        }
        let aborted = drain_aborted(rx);
        assert_eq!(
            aborted.len(),
            1,
            "daemon {rank} expected exactly one failure event, got {aborted:?}"
        );
        assert_eq!(aborted[0].rank, 2);
    }

    // The head marked the daemon dead and its node down.
    let daemons = fabric.head.registry.daemon_job();
    assert_eq!(daemons.proc(2).unwrap().state, ProcState::AbortedBySig);
    let idx = fabric.head.registry.node_of_daemon(2).unwrap();
    assert_eq!(fabric.head.registry.node(idx).unwrap().state, NodeState::Down);

    // Ring closure among survivors: 1 sends to 3, who watches 1.
    fabric.run_for(Duration::from_secs(4), STEP);
    assert_eq!(fabric.daemon(1).rt.detector().hb_observer, 3);
    for rank in [1u32, 3, 4] {
        assert!(fabric.daemon(rank).rt.detector().is_active());
    }
    // No further suspicions once the ring is whole again.
    for (rank, rx) in probes.iter_mut() {
        if *rank != 2 {
            assert!(drain_aborted(rx).is_empty(), "daemon {rank} saw a late failure");
        }
    }
    let _ = ns;
}
