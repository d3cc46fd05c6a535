// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound reports: the "I am up" callback and the topology reply.

use crate::config::DaemonConfig;
use dvm_wire::{maybe_compress, DaemonReport, DataBuffer, InlineTopo, TopologyReport};

/// Build the start-up callback for this daemon.
///
/// Rank 1 always ships its topology inline so a homogeneous fabric
/// needs no follow-up round trips.
pub(crate) fn startup_report(config: &DaemonConfig) -> Vec<u8> {
    let topo = if config.rank == 1 {
        let (compressed, payload) = maybe_compress(&config.topo_payload);
        Some(InlineTopo { compressed, payload })
    } else {
        None
    };
    let report = DaemonReport {
        daemon: config.me(),
        modex: config.modex.clone(),
        nodename: config.hostname.clone(),
        aliases: config.aliases.clone(),
        topo_sig: config.topo_sig.clone(),
        topo,
        inventory: config.inventory.clone(),
    };
    let mut buf = DataBuffer::new();
    report.pack(&mut buf);
    buf.into_vec()
}

/// Build the deferred topology reply (`REPORT_TOPOLOGY_CMD`).
pub(crate) fn topology_report(config: &DaemonConfig) -> Vec<u8> {
    let report = TopologyReport {
        sig: config.topo_sig.clone(),
        payload: config.topo_payload.clone(),
        coprocessors: config.coprocessors.clone(),
        own_serial: config.own_serial.clone(),
    };
    let mut buf = DataBuffer::new();
    report.pack(&mut buf);
    buf.into_vec()
}
