// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::submit::{AppSubmit, JobSubmit};
use crate::test_helpers::*;
use dvm_core::attr::AttrKey;
use dvm_core::job::JobState;
use dvm_core::node::NodeState;
use dvm_core::proc::ProcState;
use dvm_wire::{tag, DaemonFailed, DaemonReport, DataBuffer, InlineTopo, TopologyReport};

const SIG_B: &str = "2N:1S:8C:16H:x86_64:le";
const SIG_C: &str = "4N:2S:32C:64H:aarch64:le";

fn one_app(np: u32) -> JobSubmit {
    JobSubmit {
        apps: vec![AppSubmit { argv: vec!["a.out".into()], np, ..AppSubmit::default() }],
        ..JobSubmit::default()
    }
}

fn launch_two(head: &mut TestHead) -> dvm_core::id::Nspace {
    let ns = head.rt.submit(one_app(4)).unwrap();
    head.drive();
    assert_eq!(head.job_state(&ns), JobState::DaemonsLaunched);
    ns
}

#[test]
fn callback_marks_daemon_running_and_node_up() {
    let mut head = head_with_three_nodes();
    let _ns = launch_two(&mut head);

    head.report_daemon_up(1, "hB", TEST_SIG);
    let daemons = head.rt.registry.daemon_job();
    let daemon = daemons.proc(1).unwrap();
    assert_eq!(daemon.state, ProcState::Running);
    assert!(daemon.alive);
    let idx = head.rt.registry.node_of_daemon(1).unwrap();
    let node = head.rt.registry.node(idx).unwrap();
    assert_eq!(node.state, NodeState::Up);
    assert!(node.daemon_launched);
}

#[test]
fn aliases_resolve_back_to_the_allocated_name() {
    let mut head = head_with_three_nodes();
    let _ns = launch_two(&mut head);

    // The daemon reports a different canonical name plus aliases.
    let report = DaemonReport {
        daemon: daemon_name(1),
        modex: None,
        nodename: "hB.cluster.local".to_string(),
        aliases: vec!["10.0.0.2".to_string()],
        topo_sig: TEST_SIG.to_string(),
        topo: Some(InlineTopo { compressed: false, payload: vec![] }),
        inventory: None,
    };
    let mut buf = DataBuffer::new();
    report.pack(&mut buf);
    head.inject(1, tag::PRTED_CALLBACK, buf.into_vec());

    let idx = head.rt.registry.node_of_daemon(1).unwrap();
    let node = head.rt.registry.node(idx).unwrap();
    // FQDN not in use: domain stripped before recording.
    assert!(node.answers_to("hB"));
    assert!(node.answers_to("10.0.0.2"));
    let alias_attr = node.attributes.get_string(AttrKey::NodeAlias).unwrap();
    assert!(alias_attr.starts_with("hB,"));
    assert!(alias_attr.contains("10.0.0.2"));
}

#[test]
fn heterogeneous_signatures_latch_and_defer_topology() {
    let mut head = head_with_three_nodes();
    let ns = launch_two(&mut head);

    // Rank 1 ships a new signature inline: recorded immediately.
    let report = DaemonReport {
        daemon: daemon_name(1),
        modex: None,
        nodename: "hB".into(),
        aliases: vec![],
        topo_sig: SIG_B.to_string(),
        topo: Some(InlineTopo { compressed: false, payload: vec![0xB0] }),
        inventory: None,
    };
    let mut buf = DataBuffer::new();
    report.pack(&mut buf);
    head.inject(1, tag::PRTED_CALLBACK, buf.into_vec());

    assert!(head.rt.registry.hetero_nodes);
    assert_eq!(head.rt.registry.num_topologies(), 2);

    // Rank 2 reports yet another signature with no payload: it must be
    // asked for its topology and not count toward quorum yet.
    head.report_daemon_up(2, "hC", SIG_C);
    assert_eq!(head.rt.registry.num_topologies(), 3);
    assert_eq!(head.job_state(&ns), JobState::DaemonsLaunched);
    let pending = head.rt.registry.find_topology(SIG_C).unwrap();
    assert!(!head.rt.registry.topology(pending).unwrap().has_payload());

    // The deferred reply lands: payload recorded, quorum complete.
    let reply = TopologyReport {
        sig: SIG_C.to_string(),
        payload: vec![0xC0, 0xC1],
        coprocessors: Some("SN100,SN101".into()),
        own_serial: None,
    };
    let mut buf = DataBuffer::new();
    reply.pack(&mut buf);
    head.inject(2, tag::TOPOLOGY_REPORT, buf.into_vec());

    assert!(head.rt.registry.topology(pending).unwrap().has_payload());
    assert!(head.rt.registry.coprocessors_detected);
    assert_eq!(head.rt.registry.coprocessors.len(), 2);
    assert_eq!(head.job_state(&ns), JobState::LaunchApps);
    // Hetero stays latched.
    assert!(head.rt.registry.hetero_nodes);
    head.rt.registry.check_invariants().unwrap();
}

#[test]
fn unknown_daemon_rank_fails_the_dvm() {
    let mut head = head_with_three_nodes();
    let _ns = launch_two(&mut head);

    head.report_daemon_up(7, "hX", TEST_SIG);
    assert_eq!(head.rt.registry.daemon_job().state, JobState::FailedToStart);
}

#[test]
fn malformed_callback_fails_the_dvm() {
    let mut head = head_with_three_nodes();
    let _ns = launch_two(&mut head);

    head.inject(1, tag::PRTED_CALLBACK, vec![0xFF, 0x00, 0x01]);
    assert_eq!(head.rt.registry.daemon_job().state, JobState::FailedToStart);
}

#[test]
fn remote_launch_failure_fails_the_dvm() {
    let mut head = head_with_three_nodes();
    let _ns = launch_two(&mut head);

    let mut buf = DataBuffer::new();
    DaemonFailed { rank: 2, exit_code: 127 }.pack(&mut buf);
    head.inject(1, tag::REPORT_REMOTE_LAUNCH, buf.into_vec());

    let daemons = head.rt.registry.daemon_job();
    assert_eq!(daemons.proc(2).unwrap().state, ProcState::FailedToStart);
    assert_eq!(daemons.proc(2).unwrap().exit_code, 127);
    assert_eq!(daemons.state, JobState::FailedToStart);
    let idx = head.rt.registry.node_of_daemon(2).unwrap();
    assert_eq!(head.rt.registry.node(idx).unwrap().state, NodeState::Down);
}

#[test]
fn inventory_is_delivered_to_the_kv_store() {
    let mut head = head_with_three_nodes();
    let _ns = launch_two(&mut head);

    let report = DaemonReport {
        daemon: daemon_name(1),
        modex: None,
        nodename: "hB".into(),
        aliases: vec![],
        topo_sig: TEST_SIG.to_string(),
        topo: Some(InlineTopo { compressed: false, payload: vec![] }),
        inventory: Some(vec![1, 2, 3]),
    };
    let mut buf = DataBuffer::new();
    report.pack(&mut buf);
    head.inject(1, tag::PRTED_CALLBACK, buf.into_vec());
    assert_eq!(head.rt.kv().inventory_count(), 1);
}

#[test]
fn modex_blobs_are_stored_for_later_lookup() {
    let mut head = head_with_three_nodes();
    let _ns = launch_two(&mut head);
    head.report_daemon_up(1, "hB", TEST_SIG);
    assert_eq!(head.rt.kv().lookup_modex(&daemon_name(1)), Some(vec![1]));
}
