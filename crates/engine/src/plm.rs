// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PLM receive: process-lifecycle messages from the daemons.

use crate::error::EngineError;
use crate::runtime::HeadRuntime;
use crate::submit::JobSubmit;
use dvm_core::attr::{AttrKey, Value};
use dvm_core::clock::Clock;
use dvm_core::effect::Effect;
use dvm_core::id::{Nspace, ProcName};
use dvm_core::job::JobState;
use dvm_core::proc::ProcState;
use dvm_wire::{tag, DataBuffer, PlmCmd, RegisteredMsg, SpawnResponse, UpdateProcState};

impl<C: Clock> HeadRuntime<C> {
    /// Persistent receiver on tag `PLM`.
    pub(crate) fn plm_recv(
        &mut self,
        sender: &ProcName,
        payload: Vec<u8>,
    ) -> Result<Vec<Effect>, EngineError> {
        let mut buf = DataBuffer::from_vec(payload);
        let cmd = PlmCmd::unpack(&mut buf)?;
        tracing::debug!(%sender, %cmd, "plm command");
        match cmd {
            PlmCmd::UpdateProcState => self.update_proc_state(&mut buf),
            PlmCmd::Registered => self.procs_registered(&mut buf),
            PlmCmd::AllocJobid => self.alloc_jobid(sender, &mut buf),
            PlmCmd::LaunchJob => self.launch_job(sender, &mut buf),
        }
    }

    /// Per-daemon proc-state rollups. Never update the proc before
    /// activating its state machine: the transition may compare against
    /// the prior state.
    fn update_proc_state(
        &mut self,
        buf: &mut DataBuffer,
    ) -> Result<Vec<Effect>, EngineError> {
        let mut effects = Vec::new();
        for section in UpdateProcState::unpack_all(buf)? {
            let nspace = section.nspace;
            let mut daemon_running = false;
            for update in section.updates {
                tracing::debug!(
                    %nspace,
                    rank = update.rank,
                    state = %update.state,
                    exit = update.exit_code,
                    "proc state update"
                );
                if update.state == ProcState::Running {
                    daemon_running = true;
                }
                let Some(job) = self.registry.job_mut(&nspace) else {
                    tracing::warn!(%nspace, "state update for unknown job");
                    break;
                };
                let Some(proc) = job.proc_mut(update.rank) else {
                    tracing::error!(%nspace, rank = update.rank, "state update for unknown rank");
                    effects.push(Effect::ActivateJob {
                        nspace: nspace.clone(),
                        state: JobState::ForcedExit,
                    });
                    break;
                };
                proc.pid = Some(update.pid);
                proc.exit_code = update.exit_code;
                effects.push(Effect::ActivateProc {
                    proc: ProcName::new(nspace.clone(), update.rank),
                    state: update.state,
                });
            }
            // Launch-progress accounting: one daemon heard from.
            if daemon_running {
                if let Some(job) = self.registry.job_mut(&nspace) {
                    job.num_daemons_reported += 1;
                }
            }
        }
        Ok(effects)
    }

    fn procs_registered(&mut self, buf: &mut DataBuffer) -> Result<Vec<Effect>, EngineError> {
        let msg = RegisteredMsg::unpack(buf)?;
        Ok(msg
            .ranks
            .into_iter()
            .map(|rank| Effect::ActivateProc {
                proc: ProcName::new(msg.nspace.clone(), rank),
                state: ProcState::Registered,
            })
            .collect())
    }

    /// Hand out a fresh nspace without launching anything.
    fn alloc_jobid(
        &mut self,
        sender: &ProcName,
        buf: &mut DataBuffer,
    ) -> Result<Vec<Effect>, EngineError> {
        let room = buf.unpack_i32()?;
        let nspace = Nspace::generate();
        let mut job = dvm_core::job::Job::new(nspace.clone());
        job.originator = Some(sender.clone());
        job.attributes.set_local(AttrKey::RoomNum, Value::I32(room));
        self.registry.insert_job(job);

        let mut out = DataBuffer::new();
        SpawnResponse { status: 0, nspace, room: Some(room) }.pack(&mut out);
        Ok(vec![Effect::Send {
            dst: sender.clone(),
            tag: tag::LAUNCH_RESP,
            payload: out.into_vec(),
        }])
    }

    /// Proxied spawn request: a JSON submission on the wire.
    fn launch_job(
        &mut self,
        sender: &ProcName,
        buf: &mut DataBuffer,
    ) -> Result<Vec<Effect>, EngineError> {
        let bytes = buf.unpack_bytes()?;
        let submit: JobSubmit = match serde_json::from_slice(&bytes) {
            Ok(submit) => submit,
            Err(e) => {
                tracing::error!(%sender, error = %e, "unparseable launch request");
                return self.launch_refused(sender, None);
            }
        };
        let room = submit.room;

        let nspace = Nspace::generate();
        let mut job = submit.into_job(nspace.clone());
        job.originator = Some(sender.clone());
        // Remember the spawner chain for proxied tools.
        if let Some(proxy) = job.attributes.get_proc(AttrKey::LaunchProxy).cloned() {
            if let Some(parent) = self.registry.job_mut(&proxy.nspace) {
                parent.children.push(nspace.clone());
                // A child inherits its parent's prefix so further
                // daemon launches find the right binaries.
                let inherited = parent
                    .apps
                    .first()
                    .and_then(|a| a.attributes.get_string(AttrKey::PrefixDir))
                    .map(str::to_string);
                if let Some(prefix) = inherited {
                    if let Some(app) = job.apps.first_mut() {
                        if !app.attributes.contains(AttrKey::PrefixDir) {
                            app.attributes.set_global(
                                AttrKey::PrefixDir,
                                Value::String(prefix),
                            );
                        }
                    }
                }
            }
        }
        if job.apps.is_empty() {
            return self.launch_refused(sender, room);
        }
        self.registry.insert_job(job);
        tracing::info!(%nspace, %sender, "proxied spawn accepted");
        Ok(vec![Effect::ActivateJob { nspace, state: JobState::Init }])
    }

    fn launch_refused(
        &mut self,
        sender: &ProcName,
        room: Option<i32>,
    ) -> Result<Vec<Effect>, EngineError> {
        let mut out = DataBuffer::new();
        SpawnResponse { status: -1, nspace: Nspace::from_string(""), room }.pack(&mut out);
        Ok(vec![Effect::Send {
            dst: sender.clone(),
            tag: tag::LAUNCH_RESP,
            payload: out.into_vec(),
        }])
    }
}

#[cfg(test)]
#[path = "plm_tests.rs"]
mod tests;
