// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon callback collection.
//!
//! Persistent receiver on tag `PRTED_CALLBACK`: every daemon reports in
//! once it is up, and the job machinery is gated on full quorum. A
//! report whose topology signature is new *and* unshipped defers its
//! count until the topology reply arrives on `TOPOLOGY_REPORT`.

use crate::error::EngineError;
use crate::runtime::HeadRuntime;
use crate::state::hash_str;
use dvm_core::attr::{AttrKey, Value};
use dvm_core::clock::Clock;
use dvm_core::effect::Effect;
use dvm_core::id::ProcName;
use dvm_core::job::JobState;
use dvm_core::node::NodeState;
use dvm_core::proc::ProcState;
use dvm_core::topology::Topology;
use dvm_wire::{
    tag, DaemonCmd, DaemonFailed, DataBuffer, DaemonReport, ModexResponse, StackTraceReply,
    TopologyReport, WireError,
};

impl<C: Clock> HeadRuntime<C> {
    /// Consume one callback buffer; it may carry several reports.
    pub(crate) fn daemon_callback(
        &mut self,
        sender: &ProcName,
        payload: Vec<u8>,
    ) -> Result<Vec<Effect>, EngineError> {
        let mut buf = DataBuffer::from_vec(payload);
        let mut effects = Vec::new();
        loop {
            let report = match DaemonReport::unpack(&mut buf) {
                Ok(report) => report,
                // The final unpack returning end-of-buffer is not an
                // error: the buffer is simply exhausted.
                Err(WireError::EndOfBuffer) => break,
                Err(e) => {
                    tracing::error!(%sender, error = %e, "malformed daemon report");
                    return Ok(self.fail_daemon_launch(&mut effects));
                }
            };
            let daemon = report.daemon.clone();
            match self.process_daemon_report(report, &mut effects) {
                Ok(true) => {
                    self.registry.daemon_job_mut().num_reported += 1;
                    let daemons = self.registry.daemon_job();
                    tracing::info!(
                        %daemon,
                        reported = daemons.num_reported,
                        expected = daemons.num_procs,
                        "daemon reported in"
                    );
                    effects.extend(self.check_daemon_quorum());
                }
                Ok(false) => {
                    // Counted when the topology reply lands.
                    tracing::info!(%daemon, "daemon pending topology report");
                }
                Err(e) => {
                    tracing::error!(%daemon, error = %e, "daemon report failed");
                    return Ok(self.fail_daemon_launch(&mut effects));
                }
            }
        }
        Ok(effects)
    }

    fn fail_daemon_launch(&mut self, effects: &mut Vec<Effect>) -> Vec<Effect> {
        self.prted_failed_launch = true;
        effects.push(Effect::ActivateJob {
            nspace: self.registry.dvm_nspace().clone(),
            state: JobState::FailedToStart,
        });
        std::mem::take(effects)
    }

    /// Returns whether this daemon counts toward quorum now.
    fn process_daemon_report(
        &mut self,
        report: DaemonReport,
        effects: &mut Vec<Effect>,
    ) -> Result<bool, EngineError> {
        let rank = report.daemon.rank;
        let dname = report.daemon.clone();

        let node_idx = {
            let daemons = self.registry.daemon_job_mut();
            let Some(daemon) = daemons.proc_mut(rank) else {
                return Err(EngineError::ProcNotFound(dname));
            };
            daemon.state = ProcState::Running;
            daemon.alive = true;
            daemon.node
        };
        let node_idx = node_idx
            .ok_or_else(|| EngineError::NodeNotFound(format!("daemon {rank} unbound")))?;

        // Stash their wireup blob, answering anyone already waiting.
        if let Some(blob) = report.modex {
            for pending in self.kv.store_modex(dname.clone(), blob.clone()) {
                let mut out = DataBuffer::new();
                ModexResponse { status: 0, room: pending.room, payload: blob.clone() }
                    .pack(&mut out);
                effects.push(Effect::Send {
                    dst: pending.requestor,
                    tag: tag::DIRECT_MODEX_RESP,
                    payload: out.into_vec(),
                });
            }
        }

        let mut nodename = report.nodename;
        if !self.config.fqdn {
            if let Some(dot) = nodename.find('.') {
                nodename.truncate(dot);
            }
        }

        {
            let node = self
                .registry
                .node_mut(node_idx)
                .ok_or_else(|| EngineError::NodeNotFound(nodename.clone()))?;
            node.daemon_launched = true;
            node.state = NodeState::Up;

            // The reported name may differ from what the allocation
            // called this host; keep both resolvable.
            let mut aliases = vec![nodename.clone()];
            for alias in &report.aliases {
                if !aliases.contains(alias) {
                    aliases.push(alias.clone());
                }
            }
            if !node.aliases.contains(&nodename) {
                node.aliases.push(nodename.clone());
            }
            for alias in &report.aliases {
                if !node.aliases.contains(alias) {
                    node.aliases.push(alias.clone());
                }
            }
            if !report.aliases.is_empty() {
                node.attributes
                    .set_local(AttrKey::NodeAlias, Value::String(aliases.join(",")));
            }
        }

        let sig = report.topo_sig;
        tracing::debug!(%dname, node = %nodename, sig = %sig, "topology signature received");

        // Latch heterogeneity: once set it never clears.
        let my_sig = self.registry.my_topology().signature.clone();
        match self.registry.base_compute_sig.clone() {
            None => {
                self.registry.base_compute_sig = Some(sig.clone());
                if self.config.hnp_is_allocated && sig != my_sig {
                    self.registry.hetero_nodes = true;
                }
            }
            Some(base) if !self.registry.hetero_nodes => {
                if sig != base || (self.config.hnp_is_allocated && sig != my_sig) {
                    self.registry.hetero_nodes = true;
                }
            }
            Some(_) => {}
        }

        // Rank 1 ships its topology inline; it is redundant when the
        // signature matches our own.
        let mut shipped: Option<Vec<u8>> = None;
        if let Some(inline) = report.topo {
            if sig != my_sig {
                shipped = Some(inline.data()?);
            }
        }

        if let Some(blob) = report.inventory {
            self.kv.deliver_inventory(dname.clone(), blob);
        }

        let counted = match self.registry.find_topology(&sig) {
            Some(tidx) => {
                tracing::debug!(sig = %sig, "topology already recorded");
                if let Some(payload) = shipped {
                    if let Some(topo) = self.registry.topology_mut(tidx) {
                        if !topo.has_payload() {
                            topo.payload = Some(payload);
                        }
                    }
                }
                if let Some(node) = self.registry.node_mut(node_idx) {
                    node.topology = Some(tidx);
                }
                true
            }
            None => {
                let have_payload = shipped.is_some();
                let topo = match shipped {
                    Some(payload) => Topology::with_payload(sig.clone(), payload),
                    None => Topology::new(sig.clone()),
                };
                let tidx = self.registry.add_topology(topo);
                if let Some(node) = self.registry.node_mut(node_idx) {
                    node.topology = Some(tidx);
                }
                if !have_payload {
                    // Ask the daemon for the full topology; it counts
                    // as reported when the reply arrives.
                    tracing::debug!(%dname, sig = %sig, "requesting topology");
                    let mut out = DataBuffer::new();
                    DaemonCmd::ReportTopology.pack(&mut out);
                    effects.push(Effect::Send {
                        dst: dname,
                        tag: tag::DAEMON,
                        payload: out.into_vec(),
                    });
                }
                have_payload
            }
        };
        Ok(counted)
    }

    /// On full quorum, advance every gated job.
    fn check_daemon_quorum(&mut self) -> Vec<Effect> {
        let daemons = self.registry.daemon_job();
        if daemons.num_reported != daemons.num_procs {
            return vec![];
        }
        self.mark_daemons_reported();

        let mut effects = Vec::new();
        let mut pure_dvm = true;
        for job in self.registry.app_jobs() {
            if job.flags.tool {
                continue;
            }
            pure_dvm = false;
            if job.state == JobState::DaemonsLaunched {
                effects.push(Effect::ActivateJob {
                    nspace: job.nspace.clone(),
                    state: JobState::DaemonsReported,
                });
            }
        }
        if pure_dvm {
            effects.push(Effect::ActivateJob {
                nspace: self.registry.dvm_nspace().clone(),
                state: JobState::DaemonsReported,
            });
        }
        effects
    }

    /// Deferred topology reply (tag `TOPOLOGY_REPORT`).
    pub(crate) fn daemon_topology(
        &mut self,
        sender: &ProcName,
        payload: Vec<u8>,
    ) -> Result<Vec<Effect>, EngineError> {
        tracing::debug!(%sender, "topology report received");
        let mut effects = Vec::new();

        let mut buf = DataBuffer::from_vec(payload);
        let report = match TopologyReport::unpack(&mut buf) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(%sender, error = %e, "malformed topology report");
                return Ok(self.fail_daemon_launch(&mut effects));
            }
        };

        if self.registry.daemon_job().proc(sender.rank).is_none() {
            tracing::error!(%sender, "topology report from unknown daemon");
            return Ok(self.fail_daemon_launch(&mut effects));
        }

        // The signature entry was created when the callback arrived; a
        // missing one means the fabric is confused.
        let Some(tidx) = self.registry.find_topology(&report.sig) else {
            tracing::error!(sig = %report.sig, "topology reply without a prior entry");
            return Ok(self.fail_daemon_launch(&mut effects));
        };
        if let Some(topo) = self.registry.topology_mut(tidx) {
            topo.payload = Some(report.payload);
        }

        if let Some(serials) = report.coprocessors {
            for serial in serials.split(',').filter(|s| !s.is_empty()) {
                self.registry.coprocessors.insert(hash_str(serial), sender.rank);
            }
            self.registry.coprocessors_detected = true;
        }
        if let Some(serial) = report.own_serial {
            if let Some(idx) = self.registry.node_of_daemon(sender.rank) {
                if let Some(node) = self.registry.node_mut(idx) {
                    if node.attributes.contains(AttrKey::SerialNumber) {
                        // A coprocessor cannot host another coprocessor.
                        tracing::error!(%sender, "nested coprocessor report");
                        return Ok(self.fail_daemon_launch(&mut effects));
                    }
                    node.attributes.set_local(AttrKey::SerialNumber, Value::String(serial));
                }
            }
            self.registry.coprocessors_detected = true;
        }

        self.registry.daemon_job_mut().num_reported += 1;
        effects.extend(self.check_daemon_quorum());
        Ok(effects)
    }

    /// Daemon-launch failure report (tag `REPORT_REMOTE_LAUNCH`).
    pub(crate) fn daemon_failed(
        &mut self,
        sender: &ProcName,
        payload: Vec<u8>,
    ) -> Result<Vec<Effect>, EngineError> {
        let mut buf = DataBuffer::from_vec(payload);
        let failed = DaemonFailed::unpack(&mut buf)?;
        tracing::error!(rank = failed.rank, exit = failed.exit_code, %sender, "daemon failed");

        let nspace = self.registry.dvm_nspace().clone();
        if let Some(daemon) = self.registry.daemon_job_mut().proc_mut(failed.rank) {
            daemon.exit_code = failed.exit_code;
        }
        Ok(vec![Effect::ActivateProc {
            proc: ProcName::new(nspace, failed.rank),
            state: ProcState::FailedToStart,
        }])
    }

    /// Per-daemon stack-trace replies (tag `STACK_TRACE`).
    pub(crate) fn stack_trace_recv(
        &mut self,
        sender: &ProcName,
        payload: Vec<u8>,
    ) -> Result<Vec<Effect>, EngineError> {
        let mut buf = DataBuffer::from_vec(payload);
        let reply = StackTraceReply::unpack(&mut buf)?;
        tracing::debug!(%sender, blobs = reply.blobs.len(), "stack trace received");

        for blob in &reply.blobs {
            eprintln!(
                "STACK TRACE FOR PROC {} ({}, PID {})",
                blob.proc, blob.hostname, blob.pid
            );
            for line in &blob.lines {
                eprintln!("\t{line}");
            }
            eprintln!();
        }

        self.ntraces += 1;
        if self.ntraces < self.registry.daemon_job().num_procs {
            return Ok(vec![]);
        }
        self.ntraces = 0;

        // Everyone answered: stop waiting and put the job down.
        let mut effects = Vec::new();
        let nspace = reply.nspace;
        if let Some(job) = self.registry.job_mut(&nspace) {
            if let Some(Value::Timer(id)) = job.attributes.remove(AttrKey::TraceTimeoutEvent) {
                effects.push(Effect::CancelTimer { id });
            }
        }
        effects.extend(self.terminate_job_procs(&nspace));
        Ok(effects)
    }

    /// Order every daemon to kill a job's procs.
    pub(crate) fn terminate_job_procs(&mut self, nspace: &dvm_core::id::Nspace) -> Vec<Effect> {
        let Some(job) = self.registry.job(nspace) else { return vec![] };
        let mut buf = DataBuffer::new();
        DaemonCmd::KillLocalProcs.pack(&mut buf);
        for proc in job.procs.values() {
            buf.pack_proc(&proc.name);
        }
        vec![Effect::Xcast { tag: tag::DAEMON, payload: buf.into_vec() }]
    }
}

#[cfg(test)]
#[path = "callback_tests.rs"]
mod tests;
