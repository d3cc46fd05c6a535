// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-daemon runtime.
//!
//! Mirrors the head's loop discipline: one event at a time, handlers
//! return effects, the executor performs them. The daemon's slice of
//! the world is its local procs, its node accounting, and the ring.

use crate::config::DaemonConfig;
use crate::detector::{DetectorAction, FailureDetector};
use crate::error::DaemonError;
use crate::locals::LocalProcAdapter;
use crate::report;
use crate::session::SessionDir;
use dvm_adapters::{MemKvStore, ModexDisposition, RmlTransport};
use dvm_core::clock::Clock;
use dvm_core::effect::Effect;
use dvm_core::event::{Event, NotifyCode};
use dvm_core::exit_code;
use dvm_core::id::{Nspace, ProcName, Rank};
use dvm_core::launch::{LaunchSpec, Placement};
use dvm_core::node::Node;
use dvm_core::proc::ProcState;
use dvm_core::timer::{TimerId, TimerKind};
use dvm_engine::Scheduler;
use dvm_wire::{
    tag, DataBuffer, Heartbeat, HeartbeatRequest, ModexRequest, ModexResponse, ProcUpdate,
    StackTraceBlob, StackTraceReply, UpdateProcState,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One locally hosted application process.
#[derive(Debug, Clone)]
pub(crate) struct LocalProc {
    pub pid: Option<u32>,
    pub state: ProcState,
    pub alive: bool,
}

/// A job as this daemon sees it.
pub(crate) struct LocalJob {
    // NOTE(recovery): retained so restart policies can respawn from it
    #[allow(dead_code)]
    pub spec: LaunchSpec,
    pub suspended: bool,
    /// Tool jobs wait on child jobs instead of hosting procs; only
    /// they need the terminated event at halt. A job arriving through
    /// a launch message is never one.
    pub tool: bool,
    pub children: Vec<Nspace>,
}

pub struct DaemonRuntime<C: Clock> {
    pub(crate) me: ProcName,
    pub(crate) config: DaemonConfig,
    pub(crate) scheduler: Scheduler,
    pub(crate) detector: FailureDetector,
    pub(crate) kv: MemKvStore,
    pub(crate) transport: Arc<dyn RmlTransport>,
    pub(crate) locals: Arc<dyn LocalProcAdapter>,
    pub(crate) local_procs: HashMap<ProcName, LocalProc>,
    pub(crate) local_jobs: HashMap<Nspace, LocalJob>,
    /// Bookkeeping for our own node: slots and proc counts that
    /// cleanup must restore.
    pub(crate) my_node: Node,
    pub(crate) session: SessionDir,
    pub(crate) event_tx: mpsc::UnboundedSender<Event>,
    pub(crate) clock: C,
    /// Procs already ordered to terminate (abort dedupe).
    prev_ordered_to_terminate: HashSet<ProcName>,
    /// Daemon failures already propagated or delivered here.
    pub(crate) seen_failures: HashSet<Rank>,
    pub(crate) term_ordered: bool,
    pub(crate) abnormal_term_ordered: bool,
    done: bool,
}

impl<C: Clock> DaemonRuntime<C> {
    pub fn new(
        config: DaemonConfig,
        clock: C,
        transport: Arc<dyn RmlTransport>,
        locals: Arc<dyn LocalProcAdapter>,
        kv: MemKvStore,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<Self, DaemonError> {
        let session = SessionDir::create(&config.session_root, &config.nspace, config.rank)?;
        let detector = if config.rank == 0 {
            FailureDetector::disabled(0)
        } else {
            FailureDetector::enable(
                config.rank,
                config.num_daemons,
                config.hb_period,
                config.hb_timeout,
                clock.now(),
            )
        };
        let my_node = Node::new(config.hostname.clone());
        Ok(Self {
            me: config.me(),
            config,
            scheduler: Scheduler::new(),
            detector,
            kv,
            transport,
            locals,
            local_procs: HashMap::new(),
            local_jobs: HashMap::new(),
            my_node,
            session,
            event_tx,
            clock,
            prev_ordered_to_terminate: HashSet::new(),
            seen_failures: HashSet::new(),
            term_ordered: false,
            abnormal_term_ordered: false,
            done: false,
        })
    }

    pub fn me(&self) -> &ProcName {
        &self.me
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn detector(&self) -> &FailureDetector {
        &self.detector
    }

    pub fn kv(&self) -> &MemKvStore {
        &self.kv
    }

    /// Snapshot of our node's accounting, for tests and status output.
    pub fn my_node_snapshot(&self) -> &Node {
        &self.my_node
    }

    /// Where a job's session subtree lives on this daemon.
    pub fn session_job_dir(&self, nspace: &Nspace) -> std::path::PathBuf {
        self.session.job_dir(nspace)
    }

    /// Suspended flag of a locally known job.
    pub fn job_suspended(&self, nspace: &Nspace) -> Option<bool> {
        self.local_jobs.get(nspace).map(|j| j.suspended)
    }

    /// Phone home and start the heartbeat ring.
    pub fn startup(&mut self) -> Result<(), DaemonError> {
        // The failure-event intake runs through the KV server.
        self.kv
            .register_event_handler(NotifyCode::ProcAborted, self.event_tx.clone());

        if self.config.rank != 0 {
            let payload = report::startup_report(&self.config);
            self.transport
                .send_nb(&self.config.head(), tag::PRTED_CALLBACK, payload)?;
        }
        if self.detector.is_active() {
            self.scheduler.set_periodic(
                TimerId::heartbeat_tick(),
                self.detector.tick_interval(),
                self.clock.now(),
            );
        }
        if self.config.test_suicide {
            tracing::warn!("test suicide requested, aborting after startup");
            self.done = true;
        }
        Ok(())
    }

    /// True when this runtime consumes the event.
    pub fn wants(&self, event: &Event) -> bool {
        match event {
            Event::RmlMessage { tag: t, .. } => matches!(
                *t,
                tag::DAEMON
                    | tag::HEARTBEAT
                    | tag::HEARTBEAT_REQUEST
                    | tag::FAILURE_NOTICE
                    | tag::DIRECT_MODEX
                    | tag::DIRECT_MODEX_RESP
            ),
            Event::TimerFired { id } => matches!(id.kind(), Some(TimerKind::HeartbeatTick)),
            Event::LocalProcStarted { .. }
            | Event::LocalProcExited { .. }
            | Event::KvNotify { .. }
            | Event::Shutdown => true,
            _ => false,
        }
    }

    pub fn handle_event(&mut self, event: Event) -> Result<Vec<Effect>, DaemonError> {
        tracing::debug!(me = %self.me, "daemon: {}", event.log_summary());
        match event {
            Event::RmlMessage { sender, tag: t, payload } => match t {
                tag::DAEMON => self.daemon_cmd(&sender, payload),
                tag::HEARTBEAT => self.heartbeat_recv(payload),
                tag::HEARTBEAT_REQUEST => self.heartbeat_request_recv(payload),
                tag::FAILURE_NOTICE => self.failure_notice_recv(payload),
                tag::DIRECT_MODEX => self.modex_request(&sender, payload),
                tag::DIRECT_MODEX_RESP => self.modex_response(payload),
                other => {
                    tracing::warn!(tag = other, "unexpected tag on daemon");
                    Ok(vec![])
                }
            },
            Event::TimerFired { id } => {
                if matches!(id.kind(), Some(TimerKind::HeartbeatTick)) {
                    let actions = self.detector_tick();
                    Ok(self.detector_actions(actions))
                } else {
                    Ok(vec![])
                }
            }
            Event::LocalProcStarted { proc, pid } => self.local_started(&proc, pid),
            Event::LocalProcExited { proc, exit_code } => self.local_exited(&proc, exit_code),
            Event::KvNotify { code, affected } => self.kv_notify(code, &affected),
            Event::Shutdown => {
                self.finalize();
                Ok(vec![])
            }
            other => {
                tracing::debug!("daemon ignoring {}", other.name());
                Ok(vec![])
            }
        }
    }

    /// Execute effects in order.
    pub fn execute(&mut self, effects: Vec<Effect>) -> Result<(), DaemonError> {
        for effect in effects {
            tracing::debug!(me = %self.me, "daemon effect={}", effect.name());
            match effect {
                Effect::Send { dst, tag: t, payload } => {
                    if let Err(e) = self.transport.send_nb(&dst, t, payload) {
                        tracing::error!(%dst, tag = t, error = %e, "send failed");
                    }
                }
                Effect::SetTimer { id, duration } => {
                    self.scheduler.set_timer(id, duration, self.clock.now());
                }
                Effect::CancelTimer { id } => self.scheduler.cancel_timer(&id),
                Effect::LaunchLocals { spec, local } => self.launch_locals(spec, local)?,
                Effect::KillLocals { procs } => self.kill_locals(&procs),
                Effect::SignalLocals { nspace, signal } => self.signal_locals(&nspace, signal),
                Effect::CollectStackTraces { nspace } => self.collect_stack_traces(&nspace),
                Effect::CleanupSession { nspace } => {
                    self.session.cleanup_job(&nspace)?;
                }
                other => {
                    tracing::warn!("daemon cannot execute {}", other.name());
                }
            }
        }
        Ok(())
    }

    pub fn step(&mut self, event: Event) -> Result<(), DaemonError> {
        let effects = self.handle_event(event)?;
        self.execute(effects)
    }

    pub fn fire_due_timers(&mut self) -> Vec<Event> {
        self.scheduler.fired_timers(self.clock.now())
    }

    pub fn next_deadline(&self) -> Option<std::time::Instant> {
        self.scheduler.next_deadline()
    }

    // --- local proc management ---

    fn launch_locals(
        &mut self,
        spec: LaunchSpec,
        local: Vec<Placement>,
    ) -> Result<(), DaemonError> {
        self.session.create_job_dir(&spec.nspace)?;
        for placement in local {
            let proc = ProcName::new(spec.nspace.clone(), placement.rank);
            let Some(app) = spec.apps.get(placement.app_idx as usize) else {
                tracing::error!(%proc, app = placement.app_idx, "placement names a missing app");
                continue;
            };
            self.local_procs.insert(
                proc.clone(),
                LocalProc { pid: None, state: ProcState::Init, alive: false },
            );
            self.my_node.slots_inuse += 1;
            self.my_node.num_procs += 1;
            self.my_node.procs.push(proc.clone());
            self.kv.register_client(proc.clone());
            self.locals.spawn(proc, app, self.event_tx.clone());
        }
        self.local_jobs.insert(
            spec.nspace.clone(),
            LocalJob { spec, suspended: false, tool: false, children: Vec::new() },
        );
        Ok(())
    }

    fn kill_locals(&mut self, procs: &[ProcName]) {
        let targets: Vec<ProcName> = if procs.is_empty() {
            self.local_procs
                .iter()
                .filter(|(_, p)| p.alive)
                .map(|(name, _)| name.clone())
                .collect()
        } else {
            procs
                .iter()
                .filter(|p| self.local_procs.get(p).map(|lp| lp.alive).unwrap_or(false))
                .cloned()
                .collect()
        };
        for proc in targets {
            self.locals.kill(&proc, self.event_tx.clone());
        }
    }

    fn signal_locals(&mut self, nspace: &Nspace, signal: i32) {
        for (name, proc) in &self.local_procs {
            if name.nspace != *nspace || !proc.alive {
                continue;
            }
            if let Some(pid) = proc.pid {
                self.locals.signal(name, pid, signal);
            }
        }
    }

    fn local_started(&mut self, proc: &ProcName, pid: u32) -> Result<Vec<Effect>, DaemonError> {
        let Some(entry) = self.local_procs.get_mut(proc) else {
            tracing::warn!(%proc, "start report for unknown local proc");
            return Ok(vec![]);
        };
        entry.pid = Some(pid);
        entry.state = ProcState::Running;
        entry.alive = true;
        Ok(vec![self.proc_update(
            &proc.nspace,
            vec![ProcUpdate { rank: proc.rank, pid, state: ProcState::Running, exit_code: 0 }],
        )])
    }

    fn local_exited(
        &mut self,
        proc: &ProcName,
        exit_code: i32,
    ) -> Result<Vec<Effect>, DaemonError> {
        let Some(entry) = self.local_procs.get_mut(proc) else {
            return Ok(vec![]);
        };
        entry.alive = false;
        entry.state = if exit_code > 128 {
            ProcState::AbortedBySig
        } else {
            ProcState::Terminated
        };
        let state = entry.state;
        let pid = entry.pid.unwrap_or(0);
        let mut effects = vec![self.proc_update(
            &proc.nspace,
            vec![ProcUpdate { rank: proc.rank, pid, state, exit_code }],
        )];

        // Deferred exit: we were told to go once the children did.
        if self.term_ordered && self.local_procs.values().all(|p| !p.alive) {
            tracing::info!(me = %self.me, "all local children gone, exiting");
            effects.extend(self.shutdown_now());
        }
        Ok(effects)
    }

    fn proc_update(&self, nspace: &Nspace, updates: Vec<ProcUpdate>) -> Effect {
        let mut buf = DataBuffer::new();
        dvm_wire::PlmCmd::UpdateProcState.pack(&mut buf);
        UpdateProcState { nspace: nspace.clone(), updates }.pack(&mut buf);
        Effect::Send {
            dst: self.config.head(),
            tag: tag::PLM,
            payload: buf.into_vec(),
        }
    }

    // --- abort dedupe (ABORT_PROCS_CALLED) ---

    /// Filter an abort list down to the net-new procs.
    pub(crate) fn dedupe_terminations(&mut self, procs: Vec<ProcName>) -> Vec<ProcName> {
        let mut fresh = Vec::new();
        for proc in procs {
            if self.prev_ordered_to_terminate.insert(proc.clone()) {
                fresh.push(proc);
            }
        }
        fresh
    }

    // --- stack traces ---

    fn collect_stack_traces(&mut self, nspace: &Nspace) {
        let targets: Vec<(ProcName, String, u32)> = self
            .local_procs
            .iter()
            .filter(|(name, p)| name.nspace == *nspace && p.alive)
            .map(|(name, p)| (name.clone(), self.config.hostname.clone(), p.pid.unwrap_or(0)))
            .collect();
        let ns = nspace.clone();
        let head = self.config.head();
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let mut blobs = Vec::new();
            for (proc, hostname, pid) in targets {
                let lines = match dvm_adapters::run_gstack(pid).await {
                    Ok(lines) => lines,
                    Err(dvm_adapters::GstackError::NotFound) => vec![format!(
                        "Failed to find \"gstack\" on {hostname} to obtain stack traces"
                    )],
                    Err(dvm_adapters::GstackError::Failed(_)) => vec![format!(
                        "Failed to run \"gstack\" on {hostname} to obtain stack traces"
                    )],
                };
                blobs.push(StackTraceBlob { proc, hostname, pid, lines });
            }
            let mut buf = DataBuffer::new();
            StackTraceReply { nspace: ns, blobs }.pack(&mut buf);
            if let Err(e) = transport.send_nb(&head, tag::STACK_TRACE, buf.into_vec()) {
                tracing::error!(error = %e, "stack trace reply failed");
            }
        });
    }

    // --- heartbeat ring ---

    fn detector_tick(&mut self) -> Vec<DetectorAction> {
        self.detector.tick(self.clock.now())
    }

    fn heartbeat_recv(&mut self, payload: Vec<u8>) -> Result<Vec<Effect>, DaemonError> {
        let hb = Heartbeat::unpack(&mut DataBuffer::from_vec(payload))?;
        let actions = self.detector.on_heartbeat(hb.from.rank, self.clock.now());
        Ok(self.detector_actions(actions))
    }

    /// Ring-repair request handler. Errors are logged, never returned:
    /// nothing meaningful can be done with them here.
    fn heartbeat_request_recv(&mut self, payload: Vec<u8>) -> Result<Vec<Effect>, DaemonError> {
        let req = match HeartbeatRequest::unpack(&mut DataBuffer::from_vec(payload)) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(error = %e, "malformed heartbeat request");
                return Ok(vec![]);
            }
        };
        let actions = self.detector.on_request(req.from.rank, self.clock.now());
        Ok(self.detector_actions(actions))
    }

    /// Turn detector outcomes into wire traffic and failure handling.
    fn detector_actions(&mut self, actions: Vec<DetectorAction>) -> Vec<Effect> {
        let mut effects = Vec::new();
        for action in actions {
            match action {
                DetectorAction::SendHeartbeat(to) => {
                    let mut buf = DataBuffer::new();
                    Heartbeat { from: self.me.clone() }.pack(&mut buf);
                    effects.push(Effect::Send {
                        dst: ProcName::daemon(&self.config.nspace, to),
                        tag: tag::HEARTBEAT,
                        payload: buf.into_vec(),
                    });
                }
                DetectorAction::SendRequest(to) => {
                    let mut buf = DataBuffer::new();
                    HeartbeatRequest { from: self.me.clone() }.pack(&mut buf);
                    effects.push(Effect::Send {
                        dst: ProcName::daemon(&self.config.nspace, to),
                        tag: tag::HEARTBEAT_REQUEST,
                        payload: buf.into_vec(),
                    });
                }
                DetectorAction::Suspect(rank) => {
                    effects.extend(self.propagate_failure(rank));
                }
            }
        }
        effects
    }

    /// First-hand failure detection: tell the head, tell the fabric,
    /// raise the local event.
    fn propagate_failure(&mut self, rank: Rank) -> Vec<Effect> {
        if !self.seen_failures.insert(rank) {
            return vec![];
        }
        tracing::warn!(me = %self.me, failed = rank, "propagating daemon failure");
        let mut effects = Vec::new();

        // Head: the daemon died by signal as far as anyone knows.
        effects.push(self.proc_update(
            &self.config.nspace.clone(),
            vec![ProcUpdate {
                rank,
                pid: 0,
                state: ProcState::AbortedBySig,
                exit_code: exit_code::ABORTED_BY_SIG,
            }],
        ));

        // Fabric: one notice to every other daemon in the ring.
        let mut buf = DataBuffer::new();
        buf.pack_rank(rank);
        let notice = buf.into_vec();
        for peer in 1..self.config.num_daemons {
            if peer == self.me.rank || peer == rank || !self.detector.is_alive(peer) {
                continue;
            }
            effects.push(Effect::Send {
                dst: ProcName::daemon(&self.config.nspace, peer),
                tag: tag::FAILURE_NOTICE,
                payload: notice.clone(),
            });
        }

        // Local observers (the errmgr intake path).
        self.kv.notify_event(
            NotifyCode::ProcAborted,
            ProcName::daemon(&self.config.nspace, rank),
        );
        effects
    }

    /// Second-hand failure: mark, deliver locally, never re-forward.
    fn failure_notice_recv(&mut self, payload: Vec<u8>) -> Result<Vec<Effect>, DaemonError> {
        let rank = DataBuffer::from_vec(payload).unpack_rank()?;
        if !self.seen_failures.insert(rank) {
            return Ok(vec![]);
        }
        tracing::info!(me = %self.me, failed = rank, "daemon failure propagated to us");
        self.detector.mark_failed(rank);
        let repairs = self.detector.repair_if_observing(rank, self.clock.now());
        self.kv.notify_event(
            NotifyCode::ProcAborted,
            ProcName::daemon(&self.config.nspace, rank),
        );
        Ok(self.detector_actions(repairs))
    }

    /// KV event intake: a proc we host aborted elsewhere in the
    /// fabric's view; update its state toward the head.
    fn kv_notify(
        &mut self,
        code: NotifyCode,
        affected: &ProcName,
    ) -> Result<Vec<Effect>, DaemonError> {
        if code != NotifyCode::ProcAborted {
            return Ok(vec![]);
        }
        let Some(entry) = self.local_procs.get_mut(affected) else {
            return Ok(vec![]);
        };
        if !entry.alive {
            return Ok(vec![]);
        }
        entry.alive = false;
        entry.state = ProcState::AbortedBySig;
        let pid = entry.pid.unwrap_or(0);
        Ok(vec![self.proc_update(
            &affected.nspace,
            vec![ProcUpdate {
                rank: affected.rank,
                pid,
                state: ProcState::AbortedBySig,
                exit_code: exit_code::ABORTED_BY_SIG,
            }],
        )])
    }

    // --- direct modex ---

    fn modex_request(
        &mut self,
        sender: &ProcName,
        payload: Vec<u8>,
    ) -> Result<Vec<Effect>, DaemonError> {
        let req = ModexRequest::unpack(&mut DataBuffer::from_vec(payload))?;
        match self.kv.request_modex(&req.target, sender.clone(), req.room) {
            ModexDisposition::Ready(blob) => {
                let mut buf = DataBuffer::new();
                ModexResponse { status: 0, room: req.room, payload: blob }.pack(&mut buf);
                Ok(vec![Effect::Send {
                    dst: sender.clone(),
                    tag: tag::DIRECT_MODEX_RESP,
                    payload: buf.into_vec(),
                }])
            }
            ModexDisposition::Parked => {
                // Not ready: answered when the data arrives.
                tracing::debug!(target = %req.target, "modex request parked");
                Ok(vec![])
            }
        }
    }

    fn modex_response(&mut self, payload: Vec<u8>) -> Result<Vec<Effect>, DaemonError> {
        let resp = ModexResponse::unpack(&mut DataBuffer::from_vec(payload))?;
        tracing::debug!(room = resp.room, status = resp.status, "modex response");
        Ok(vec![])
    }

    /// A proc's modex data arrived (e.g. via a relayed store): answer
    /// anyone parked on it.
    pub(crate) fn store_modex(&mut self, proc: ProcName, blob: Vec<u8>) -> Vec<Effect> {
        self.kv
            .store_modex(proc, blob.clone())
            .into_iter()
            .map(|pending| {
                let mut buf = DataBuffer::new();
                ModexResponse { status: 0, room: pending.room, payload: blob.clone() }
                    .pack(&mut buf);
                Effect::Send {
                    dst: pending.requestor,
                    tag: tag::DIRECT_MODEX_RESP,
                    payload: buf.into_vec(),
                }
            })
            .collect()
    }

    // --- teardown ---

    /// Orderly exit once nothing local is alive.
    pub(crate) fn shutdown_now(&mut self) -> Vec<Effect> {
        if self.abnormal_term_ordered {
            tracing::warn!(me = %self.me, "going down on abnormal termination");
        }
        let mut effects = Vec::new();
        if let Some(observer) = self.detector.quiesce() {
            let mut buf = DataBuffer::new();
            // The payload carries the receiver's own rank: quit signal.
            Heartbeat { from: ProcName::daemon(&self.config.nspace, observer) }.pack(&mut buf);
            effects.push(Effect::Send {
                dst: ProcName::daemon(&self.config.nspace, observer),
                tag: tag::HEARTBEAT,
                payload: buf.into_vec(),
            });
        }
        self.scheduler.cancel_timer(&TimerId::heartbeat_tick());
        if let Err(e) = self.session.cleanup_all() {
            tracing::warn!(error = %e, "session cleanup failed");
        }
        self.done = true;
        effects
    }

    fn finalize(&mut self) {
        let effects = self.shutdown_now();
        if let Err(e) = self.execute(effects) {
            tracing::warn!(error = %e, "finalize effects failed");
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
