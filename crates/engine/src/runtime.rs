// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The head-node runtime.
//!
//! One sequential event loop: handlers consume an [`Event`], mutate the
//! registry, and return [`Effect`]s; `execute` performs them. Feedback
//! (state activations, produced events) goes back through the event
//! queue so every handler observes a consistent store.

use crate::config::HeadConfig;
use crate::error::EngineError;
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::submit::JobSubmit;
use dvm_adapters::{DaemonLauncher, MemKvStore, RmlTransport};
use dvm_core::clock::Clock;
use dvm_core::effect::Effect;
use dvm_core::event::Event;
use dvm_core::id::{Nspace, ProcName, HNP_RANK};
use dvm_core::job::JobState;
use dvm_core::timer::TimerKind;
use dvm_core::topology::Topology;
use dvm_wire::{tag, DataBuffer, DaemonCmd};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct HeadRuntime<C: Clock> {
    pub(crate) me: ProcName,
    pub(crate) config: HeadConfig,
    pub registry: Registry,
    pub(crate) scheduler: Scheduler,
    pub(crate) kv: MemKvStore,
    pub(crate) transport: Arc<dyn RmlTransport>,
    pub(crate) launcher: Arc<dyn DaemonLauncher>,
    pub(crate) event_tx: mpsc::UnboundedSender<Event>,
    pub(crate) clock: C,
    /// Stack-trace replies received for the current collection round.
    pub(crate) ntraces: u32,
    /// A DVM start-up attempt failed; set once, checked on teardown.
    pub(crate) prted_failed_launch: bool,
}

impl<C: Clock> HeadRuntime<C> {
    pub fn new(
        config: HeadConfig,
        clock: C,
        transport: Arc<dyn RmlTransport>,
        launcher: Arc<dyn DaemonLauncher>,
        kv: MemKvStore,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let dvm_nspace = Nspace::generate();
        Self::with_nspace(dvm_nspace, config, clock, transport, launcher, kv, event_tx)
    }

    /// Construct with a caller-chosen nspace (tests, fixed fabrics).
    pub fn with_nspace(
        dvm_nspace: Nspace,
        config: HeadConfig,
        clock: C,
        transport: Arc<dyn RmlTransport>,
        launcher: Arc<dyn DaemonLauncher>,
        kv: MemKvStore,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let topology =
            Topology::with_payload(config.topo_sig.clone(), config.topo_payload.clone());
        let registry = Registry::new(dvm_nspace.clone(), &config.node_name, topology);
        Self {
            me: ProcName::new(dvm_nspace, HNP_RANK),
            config,
            registry,
            scheduler: Scheduler::new(),
            kv,
            transport,
            launcher,
            event_tx,
            clock,
            ntraces: 0,
            prted_failed_launch: false,
        }
    }

    pub fn me(&self) -> &ProcName {
        &self.me
    }

    pub fn dvm_nspace(&self) -> &Nspace {
        self.registry.dvm_nspace()
    }

    pub fn kv(&self) -> &MemKvStore {
        &self.kv
    }

    /// Submit a job: catalog it and activate INIT.
    pub fn submit(&mut self, submit: JobSubmit) -> Result<Nspace, EngineError> {
        if submit.apps.is_empty() {
            return Err(EngineError::InvalidSubmission("no apps".to_string()));
        }
        if submit.apps.iter().any(|a| a.argv.is_empty()) {
            return Err(EngineError::InvalidSubmission("app without argv".to_string()));
        }
        let nspace = Nspace::generate();
        let job = submit.into_job(nspace.clone());
        self.registry.insert_job(job);
        self.push_event(Event::JobStateActivate {
            nspace: nspace.clone(),
            state: JobState::Init,
        });
        Ok(nspace)
    }

    pub(crate) fn push_event(&self, event: Event) {
        if self.event_tx.send(event).is_err() {
            tracing::warn!("event loop gone, dropping event");
        }
    }

    /// True when this runtime is the consumer for the event. The head
    /// process shares its queue with a resident daemon runtime.
    pub fn wants(&self, event: &Event) -> bool {
        match event {
            Event::RmlMessage { tag: t, .. } => matches!(
                *t,
                tag::PRTED_CALLBACK
                    | tag::TOPOLOGY_REPORT
                    | tag::REPORT_REMOTE_LAUNCH
                    | tag::PLM
                    | tag::STACK_TRACE
                    | tag::LAUNCH_RESP
            ),
            Event::JobStateActivate { .. }
            | Event::ProcStateActivate { .. }
            | Event::FilesPositioned { .. }
            | Event::DaemonSpawnFailed { .. } => true,
            Event::TimerFired { id } => matches!(
                id.kind(),
                Some(TimerKind::Startup(_))
                    | Some(TimerKind::Execution(_))
                    | Some(TimerKind::StackTrace(_))
            ),
            _ => false,
        }
    }

    /// Handle one event; returns the effects to execute.
    pub fn handle_event(&mut self, event: Event) -> Result<Vec<Effect>, EngineError> {
        tracing::debug!("head: {}", event.log_summary());
        match event {
            Event::RmlMessage { sender, tag: t, payload } => match t {
                tag::PRTED_CALLBACK => self.daemon_callback(&sender, payload),
                tag::TOPOLOGY_REPORT => self.daemon_topology(&sender, payload),
                tag::REPORT_REMOTE_LAUNCH => self.daemon_failed(&sender, payload),
                tag::PLM => self.plm_recv(&sender, payload),
                tag::STACK_TRACE => self.stack_trace_recv(&sender, payload),
                tag::LAUNCH_RESP => {
                    // Head-originated jobs have no remote requestor; a
                    // response landing here is informational.
                    tracing::debug!(%sender, "launch response received");
                    Ok(vec![])
                }
                other => {
                    tracing::warn!(tag = other, %sender, "unexpected tag on head");
                    Ok(vec![])
                }
            },
            Event::JobStateActivate { nspace, state } => self.activate_job_state(&nspace, state),
            Event::ProcStateActivate { proc, state } => self.activate_proc_state(&proc, state),
            Event::TimerFired { id } => self.timer_fired(&id),
            Event::FilesPositioned { nspace, ok } => self.files_positioned(&nspace, ok),
            Event::DaemonSpawnFailed { rank, reason } => self.daemon_spawn_failed(rank, &reason),
            Event::Shutdown => Ok(vec![]),
            other => {
                tracing::debug!("head ignoring {}", other.name());
                Ok(vec![])
            }
        }
    }

    /// Execute effects in order. Transport failures abort the affected
    /// job through the state machine rather than tearing the loop down.
    pub fn execute(&mut self, effects: Vec<Effect>) -> Result<(), EngineError> {
        for effect in effects {
            let info: String = effect
                .fields()
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            tracing::debug!("head effect={} {}", effect.name(), info);
            match effect {
                Effect::Send { dst, tag: t, payload } => {
                    if let Err(e) = self.transport.send_nb(&dst, t, payload) {
                        tracing::error!(%dst, tag = t, error = %e, "send failed");
                    }
                }
                Effect::Xcast { tag: t, payload } => {
                    self.transport.xcast(t, payload)?;
                }
                Effect::ActivateJob { nspace, state } => {
                    self.push_event(Event::JobStateActivate { nspace, state });
                }
                Effect::ActivateProc { proc, state } => {
                    self.push_event(Event::ProcStateActivate { proc, state });
                }
                Effect::SetTimer { id, duration } => {
                    self.scheduler.set_timer(id, duration, self.clock.now());
                }
                Effect::CancelTimer { id } => {
                    self.scheduler.cancel_timer(&id);
                }
                Effect::SpawnDaemons { specs } => {
                    self.launcher.spawn(specs, self.event_tx.clone());
                }
                Effect::PositionFiles { nspace, files } => {
                    self.position_files(nspace, files);
                }
                other => {
                    tracing::warn!("head cannot execute {}", other.name());
                }
            }
        }
        Ok(())
    }

    /// Handle + execute in one step.
    pub fn step(&mut self, event: Event) -> Result<(), EngineError> {
        let effects = self.handle_event(event)?;
        self.execute(effects)
    }

    /// Collect due timers as events.
    pub fn fire_due_timers(&mut self) -> Vec<Event> {
        self.scheduler.fired_timers(self.clock.now())
    }

    pub fn next_deadline(&self) -> Option<std::time::Instant> {
        self.scheduler.next_deadline()
    }

    /// All files must already sit where the daemons expect them; the
    /// seam only verifies presence and reports back.
    fn position_files(&self, nspace: Nspace, files: Vec<std::path::PathBuf>) {
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut ok = true;
            for file in &files {
                if tokio::fs::metadata(file).await.is_err() {
                    tracing::error!(file = %file.display(), "preposition source missing");
                    ok = false;
                    break;
                }
            }
            let _ = event_tx.send(Event::FilesPositioned { nspace, ok });
        });
    }

    /// Broadcast a cleanup command for a finished job and drop it from
    /// the catalog.
    pub fn cleanup_job(&mut self, nspace: &Nspace) -> Result<(), EngineError> {
        let mut buf = DataBuffer::new();
        DaemonCmd::DvmCleanupJob.pack(&mut buf);
        buf.pack_nspace(nspace);
        self.transport.xcast(tag::DAEMON, buf.into_vec())?;
        self.registry.remove_job(nspace);
        Ok(())
    }

    /// Order the whole VM down (orderly teardown).
    pub fn halt_vm(&mut self) -> Result<(), EngineError> {
        // Tools wait on their child jobs, not on us; hand them the
        // terminated event before the fabric disappears.
        let tool_children: Vec<Nspace> = self
            .registry
            .app_jobs()
            .filter(|j| j.flags.tool)
            .flat_map(|j| j.children.iter().cloned())
            .collect();
        for child in tool_children {
            self.kv.notify_event(
                dvm_core::event::NotifyCode::JobTerminated,
                ProcName::new(child, dvm_core::id::INVALID_RANK),
            );
        }

        let mut buf = DataBuffer::new();
        let cmd = if self.prted_failed_launch { DaemonCmd::HaltVm } else { DaemonCmd::Exit };
        cmd.pack(&mut buf);
        self.transport.xcast(tag::DAEMON, buf.into_vec())?;
        Ok(())
    }

    /// Deliver a signal to every proc of a job, fabric-wide.
    pub fn signal_job(&mut self, nspace: &Nspace, signal: i32) -> Result<(), EngineError> {
        let mut buf = DataBuffer::new();
        DaemonCmd::SignalLocalProcs.pack(&mut buf);
        dvm_wire::SignalJob { nspace: nspace.clone(), signal }.pack(&mut buf);
        self.transport.xcast(tag::DAEMON, buf.into_vec())?;
        Ok(())
    }
}
