// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job timers: startup, execution, stack-trace wait.
//!
//! Each armed timer lives as an attribute on its job; every
//! cancellation path removes the attribute along with the timer.

use crate::error::EngineError;
use crate::runtime::HeadRuntime;
use dvm_core::attr::{AttrKey, Value};
use dvm_core::clock::Clock;
use dvm_core::effect::Effect;
use dvm_core::exit_code;
use dvm_core::id::Nspace;
use dvm_core::job::JobState;
use dvm_core::timer::{TimerId, TimerKind};
use dvm_wire::{tag, DaemonCmd, DataBuffer};

impl<C: Clock> HeadRuntime<C> {
    /// Route a fired timer.
    pub(crate) fn timer_fired(&mut self, id: &TimerId) -> Result<Vec<Effect>, EngineError> {
        match id.kind() {
            Some(TimerKind::Startup(nspace)) => self.startup_timeout(&nspace),
            Some(TimerKind::Execution(nspace)) => self.execution_timeout(&nspace),
            Some(TimerKind::StackTrace(nspace)) => self.stack_trace_timeout(&nspace),
            _ => {
                tracing::warn!(timer = %id, "unroutable timer on head");
                Ok(vec![])
            }
        }
    }

    /// The launch never completed in time.
    fn startup_timeout(&mut self, nspace: &Nspace) -> Result<Vec<Effect>, EngineError> {
        let Some(job) = self.registry.job_mut(nspace) else { return Ok(vec![]) };
        tracing::error!(%nspace, "startup timeout");
        job.exit_code = exit_code::TIMEOUT;
        // The timer fired: it is gone from the scheduler, but the
        // attribute still has to come off.
        job.attributes.remove(AttrKey::FailureTimerEvent);
        Ok(vec![Effect::ActivateJob {
            nspace: nspace.clone(),
            state: JobState::FailedToStart,
        }])
    }

    /// The job exceeded its execution time limit.
    fn execution_timeout(&mut self, nspace: &Nspace) -> Result<Vec<Effect>, EngineError> {
        let Some(job) = self.registry.job_mut(nspace) else { return Ok(vec![]) };
        let timeout = job.attributes.get_i32(AttrKey::JobTimeout).unwrap_or(-1);
        tracing::error!(%nspace, timeout_secs = timeout, "job timed out");
        job.exit_code = exit_code::TIMEOUT;
        job.attributes.remove(AttrKey::TimeoutEvent);

        if job.attributes.flag(AttrKey::JobReportState) {
            self.report_job_state(nspace);
        }

        let job = self.registry.require_job(nspace)?;
        if job.attributes.flag(AttrKey::JobStacktraces) {
            eprintln!("Waiting for stack traces (this may take a few moments)...");
            let mut buf = DataBuffer::new();
            DaemonCmd::GetStackTraces.pack(&mut buf);
            buf.pack_nspace(nspace);
            let mut effects =
                vec![Effect::Xcast { tag: tag::DAEMON, payload: buf.into_vec() }];

            let wait = self.config.stack_trace_wait_timeout;
            if !wait.is_zero() {
                let id = TimerId::stack_trace(nspace);
                let job = self.registry.require_job_mut(nspace)?;
                job.attributes
                    .set_local(AttrKey::TraceTimeoutEvent, Value::Timer(id.clone()));
                effects.push(Effect::SetTimer { id, duration: wait });
            }
            return Ok(effects);
        }

        Ok(self.terminate_job_procs(nspace))
    }

    /// Not everyone answered the stack-trace request in time; stop
    /// waiting and put the job down anyway.
    fn stack_trace_timeout(&mut self, nspace: &Nspace) -> Result<Vec<Effect>, EngineError> {
        self.ntraces = 0;
        if let Some(job) = self.registry.job_mut(nspace) {
            job.attributes.remove(AttrKey::TraceTimeoutEvent);
        }
        Ok(self.terminate_job_procs(nspace))
    }

    /// Human-facing summary of a timed-out job.
    fn report_job_state(&self, nspace: &Nspace) {
        let Some(job) = self.registry.job(nspace) else { return };
        eprintln!("DATA FOR JOB: {nspace}");
        eprintln!(
            "\tNum apps: {}\tNum procs: {}\tJobState: {}\tAbort: {}",
            job.apps.len(),
            job.num_procs,
            job.state,
            if job.flags.aborted { "True" } else { "False" }
        );
        eprintln!(
            "\tNum launched: {}\tNum reported: {}\tNum terminated: {}",
            job.num_launched, job.num_reported, job.num_terminated
        );
        eprintln!("\n\tProcs:");
        for proc in job.procs.values() {
            let node = proc
                .node
                .and_then(|idx| self.registry.node(idx))
                .map(|n| n.name.as_str())
                .unwrap_or("UNKNOWN");
            eprintln!(
                "\t\tRank: {}\tNode: {}\tPID: {}\tState: {}\tExitCode {}",
                proc.name.rank,
                node,
                proc.pid.unwrap_or(0),
                proc.state,
                proc.exit_code
            );
        }
        eprintln!();
    }
}

#[cfg(test)]
#[path = "timeouts_tests.rs"]
mod tests;
