// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Head-node command dispatch (tag `DAEMON`).

use crate::report;
use crate::runtime::DaemonRuntime;
use crate::error::DaemonError;
use dvm_core::clock::Clock;
use dvm_core::effect::Effect;
use dvm_core::event::NotifyCode;
use dvm_core::id::{Nspace, ProcName};
use dvm_wire::{
    tag, AbortProcs, DaemonCmd, DataBuffer, LaunchMsg, SignalJob, WireError,
};
use nix::sys::signal::Signal;

impl<C: Clock> DaemonRuntime<C> {
    /// Decode and dispatch one daemon command.
    pub(crate) fn daemon_cmd(
        &mut self,
        sender: &ProcName,
        payload: Vec<u8>,
    ) -> Result<Vec<Effect>, DaemonError> {
        let mut buf = DataBuffer::from_vec(payload);
        let cmd = DaemonCmd::unpack(&mut buf)?;
        if self.config.debug_daemons {
            tracing::info!(me = %self.me, %cmd, %sender, "processing command");
        }
        match cmd {
            DaemonCmd::Null => Ok(vec![]),
            DaemonCmd::KillLocalProcs => self.cmd_kill_local(&mut buf),
            DaemonCmd::SignalLocalProcs => self.cmd_signal_local(&mut buf),
            DaemonCmd::AddLocalProcs | DaemonCmd::DvmAddProcs => self.cmd_add_local(&mut buf),
            DaemonCmd::AbortProcsCalled => self.cmd_abort_procs(&mut buf),
            DaemonCmd::Exit => self.cmd_exit(false),
            DaemonCmd::HaltVm => self.cmd_exit(true),
            DaemonCmd::DvmCleanupJob => self.cmd_cleanup_job(&mut buf),
            DaemonCmd::ReportTopology => self.cmd_report_topology(sender),
            DaemonCmd::GetStackTraces => self.cmd_get_stack_traces(&mut buf),
        }
    }

    /// Empty list means "kill everything local".
    fn cmd_kill_local(&mut self, buf: &mut DataBuffer) -> Result<Vec<Effect>, DaemonError> {
        let mut procs = Vec::new();
        loop {
            match buf.unpack_proc() {
                Ok(proc) => procs.push(proc),
                Err(WireError::EndOfBuffer) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(vec![Effect::KillLocals { procs }])
    }

    /// TSTP is translated to STOP so the child actually suspends; the
    /// job's suspended flag tracks the pair.
    fn cmd_signal_local(&mut self, buf: &mut DataBuffer) -> Result<Vec<Effect>, DaemonError> {
        let msg = SignalJob::unpack(buf)?;
        let mut signal = msg.signal;
        if signal == Signal::SIGTSTP as i32 {
            if self.config.debug_daemons {
                tracing::info!(me = %self.me, "converted SIGTSTP to SIGSTOP before delivering");
            }
            signal = Signal::SIGSTOP as i32;
            if let Some(job) = self.local_jobs.get_mut(&msg.nspace) {
                job.suspended = true;
            }
        } else if signal == Signal::SIGCONT as i32 {
            if let Some(job) = self.local_jobs.get_mut(&msg.nspace) {
                job.suspended = false;
            }
        }
        Ok(vec![Effect::SignalLocals { nspace: msg.nspace, signal }])
    }

    fn cmd_add_local(&mut self, buf: &mut DataBuffer) -> Result<Vec<Effect>, DaemonError> {
        let spec = LaunchMsg::unpack_spec(buf)?;
        let local = spec.local_to(self.me.rank);
        tracing::info!(
            me = %self.me,
            nspace = %spec.nspace,
            local = local.len(),
            "launching local procs"
        );
        Ok(vec![Effect::LaunchLocals { spec, local }])
    }

    /// Dedupe against previously ordered terminations so repeated
    /// abort reports do not re-kill.
    fn cmd_abort_procs(&mut self, buf: &mut DataBuffer) -> Result<Vec<Effect>, DaemonError> {
        let msg = AbortProcs::unpack(buf)?;
        let total = msg.procs.len();
        let fresh = self.dedupe_terminations(msg.procs);
        if fresh.is_empty() {
            tracing::debug!(me = %self.me, total, "no new procs to terminate");
            return Ok(vec![]);
        }
        tracing::info!(me = %self.me, new = fresh.len(), total, "terminating requested procs");
        Ok(vec![Effect::KillLocals { procs: fresh }])
    }

    /// EXIT and HALT_VM: kill everything local and leave once the
    /// children are gone. HALT_VM additionally flags abnormal
    /// termination and wakes any tool jobs waiting on children.
    fn cmd_exit(&mut self, abnormal: bool) -> Result<Vec<Effect>, DaemonError> {
        if abnormal {
            self.abnormal_term_ordered = true;
            // Only tool jobs with child jobs need waking: the tool is
            // waiting on the child's termination, not its own.
            let children: Vec<Nspace> = self
                .local_jobs
                .values()
                .filter(|job| job.tool && !job.children.is_empty())
                .flat_map(|job| job.children.iter().cloned())
                .collect();
            for child in children {
                self.kv.notify_event(
                    NotifyCode::JobTerminated,
                    ProcName::new(child, dvm_core::id::INVALID_RANK),
                );
            }
        }
        self.term_ordered = true;

        let alive = self.local_procs.values().any(|p| p.alive);
        if !alive {
            if self.config.debug_daemons {
                tracing::info!(me = %self.me, "all routes and children gone, exiting");
            }
            return Ok(self.shutdown_now());
        }
        // Defer: the exit completes when the last child reports.
        Ok(vec![Effect::KillLocals { procs: vec![] }])
    }

    /// Release everything a finished job held on this node.
    fn cmd_cleanup_job(&mut self, buf: &mut DataBuffer) -> Result<Vec<Effect>, DaemonError> {
        let nspace = buf.unpack_nspace()?;
        let Some(_job) = self.local_jobs.remove(&nspace) else {
            // Already cleaned up, or never ours: safely ignored.
            return Ok(vec![]);
        };
        tracing::info!(me = %self.me, %nspace, "cleaning up job");

        let mine: Vec<ProcName> = self
            .local_procs
            .keys()
            .filter(|p| p.nspace == nspace)
            .cloned()
            .collect();
        for proc in &mine {
            self.local_procs.remove(proc);
            self.my_node.slots_inuse = self.my_node.slots_inuse.saturating_sub(1);
            self.my_node.num_procs = self.my_node.num_procs.saturating_sub(1);
            self.my_node.procs.retain(|p| p != proc);
            self.kv.deregister_client(proc);
        }
        self.kv.deregister_nspace(&nspace);

        Ok(vec![Effect::CleanupSession { nspace }])
    }

    fn cmd_report_topology(&mut self, sender: &ProcName) -> Result<Vec<Effect>, DaemonError> {
        Ok(vec![Effect::Send {
            dst: sender.clone(),
            tag: tag::TOPOLOGY_REPORT,
            payload: report::topology_report(&self.config),
        }])
    }

    fn cmd_get_stack_traces(&mut self, buf: &mut DataBuffer) -> Result<Vec<Effect>, DaemonError> {
        let nspace = buf.unpack_nspace()?;
        Ok(vec![Effect::CollectStackTraces { nspace }])
    }
}
