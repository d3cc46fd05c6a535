// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: heterogeneous topology.
//!
//! Two nodes return different signature strings: the hetero flag
//! latches, the second node is asked for its full topology, and the
//! registry ends up with distinct deduplicated entries.

use super::prelude::*;
use dvm_core::job::JobState;
use dvm_daemon::{FabricHost, LocalFabric};

const SIG_B: &str = "2N:1S:8C:16H:x86_64:le";
const SIG_C: &str = "4N:2S:32C:64H:aarch64:le";

fn hetero_fabric(tmp: &tempfile::TempDir) -> LocalFabric {
    LocalFabric::new(
        vec![
            FabricHost::new("hA", SIG),
            FabricHost::new("hB", SIG_B),
            FabricHost::new("hC", SIG_C),
        ],
        tmp.path(),
        HB_PERIOD,
        HB_TIMEOUT,
    )
}

#[tokio::test]
async fn distinct_signatures_latch_hetero_and_deduplicate() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = hetero_fabric(&tmp);
    let ns = run_job(&mut fabric, one_app(3));

    // Bring-up completed even though hC had to be asked for its
    // topology in a second round trip.
    assert_eq!(fabric.job_state(&ns), JobState::Running);
    assert!(fabric.head.registry.hetero_nodes);

    // Three distinct signatures, each recorded once, all with
    // payloads.
    assert_eq!(fabric.head.registry.num_topologies(), 3);
    for sig in [SIG, SIG_B, SIG_C] {
        let idx = fabric.head.registry.find_topology(sig).unwrap();
        assert!(fabric.head.registry.topology(idx).unwrap().has_payload(), "{sig}");
    }

    // Both compute nodes point at their own entries.
    let b = fabric.head.registry.node_of_daemon(1).unwrap();
    let c = fabric.head.registry.node_of_daemon(2).unwrap();
    let b_topo = fabric.head.registry.node(b).unwrap().topology.unwrap();
    let c_topo = fabric.head.registry.node(c).unwrap().topology.unwrap();
    assert_ne!(b_topo, c_topo);
    fabric.head.registry.check_invariants().unwrap();
}

#[tokio::test]
async fn homogeneous_fabrics_share_one_entry_and_stay_non_hetero() {
    let tmp = tempfile::tempdir().unwrap();
    let mut fabric = fabric(3, &tmp);
    let ns = run_job(&mut fabric, one_app(3));
    assert_eq!(fabric.job_state(&ns), JobState::Running);

    assert!(!fabric.head.registry.hetero_nodes);
    assert_eq!(fabric.head.registry.num_topologies(), 1);
    // Topology deduplication: both compute nodes share the entry.
    let b = fabric.head.registry.node_of_daemon(1).unwrap();
    let c = fabric.head.registry.node_of_daemon(2).unwrap();
    assert_eq!(
        fabric.head.registry.node(b).unwrap().topology,
        fabric.head.registry.node(c).unwrap().topology,
    );
}
