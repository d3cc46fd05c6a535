// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process composition.
//!
//! The head process is both coordinator and daemon: a [`HeadNode`]
//! couples a [`HeadRuntime`] with a resident rank-0 [`DaemonRuntime`]
//! on one event queue. [`LocalFabric`] builds a whole in-process DVM
//! (head plus N daemons over the in-memory router) for the single-host
//! fabric and the scenario tests.

use crate::runtime::DaemonRuntime;
use dvm_core::clock::Clock;
use dvm_core::event::Event;
use dvm_engine::HeadRuntime;
use tokio::sync::mpsc;

/// The head process: coordinator plus resident daemon, one queue.
pub struct HeadNode<C: Clock> {
    pub head: HeadRuntime<C>,
    pub daemon: DaemonRuntime<C>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl<C: Clock> HeadNode<C> {
    pub fn new(
        head: HeadRuntime<C>,
        daemon: DaemonRuntime<C>,
        rx: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        Self { head, daemon, rx }
    }

    /// Offer one event to whichever runtime consumes it.
    pub fn route(&mut self, event: Event) {
        if self.head.wants(&event) {
            if let Err(e) = self.head.step(event) {
                tracing::error!(error = %e, "head handler failed");
            }
        } else if self.daemon.wants(&event) {
            if let Err(e) = self.daemon.step(event) {
                tracing::error!(error = %e, "resident daemon handler failed");
            }
        } else {
            tracing::debug!("unrouted event: {}", event.name());
        }
    }

    /// Process events for up to `max_wait`, returning after one event
    /// or a timer pass. Lets a caller interleave its own checks.
    pub async fn run_one(&mut self, max_wait: std::time::Duration) {
        let deadline = match (self.head.next_deadline(), self.daemon.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let now = std::time::Instant::now();
        let wait = deadline
            .map(|when| when.saturating_duration_since(now))
            .unwrap_or(max_wait)
            .min(max_wait);
        tokio::select! {
            ev = self.rx.recv() => {
                if let Some(ev) = ev {
                    self.route(ev);
                }
            }
            _ = tokio::time::sleep(wait) => {
                for ev in self.head.fire_due_timers() {
                    self.route(ev);
                }
                for ev in self.daemon.fire_due_timers() {
                    self.route(ev);
                }
            }
        }
        // Drain whatever the handlers queued back synchronously.
        while let Ok(ev) = self.rx.try_recv() {
            self.route(ev);
        }
    }

    /// Drive until the resident daemon finishes or the deadline hits.
    pub async fn run_until_done(&mut self, max_wait: std::time::Duration) {
        let deadline = std::time::Instant::now() + max_wait;
        while !self.daemon.is_done() && std::time::Instant::now() < deadline {
            self.run_one(std::time::Duration::from_millis(50)).await;
        }
    }

    /// Drive both runtimes until shutdown.
    pub async fn run(&mut self) {
        loop {
            if self.daemon.is_done() {
                return;
            }
            let deadline = match (self.head.next_deadline(), self.daemon.next_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let event = match deadline {
                Some(when) => {
                    let now = std::time::Instant::now();
                    let wait = when.saturating_duration_since(now);
                    tokio::select! {
                        ev = self.rx.recv() => ev,
                        _ = tokio::time::sleep(wait) => {
                            for ev in self.head.fire_due_timers() {
                                self.route(ev);
                            }
                            for ev in self.daemon.fire_due_timers() {
                                self.route(ev);
                            }
                            continue;
                        }
                    }
                }
                None => self.rx.recv().await,
            };
            match event {
                Some(Event::Shutdown) => {
                    self.route(Event::Shutdown);
                    return;
                }
                Some(ev) => self.route(ev),
                None => return,
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use test_fabric::{FabricHost, LocalFabric};

// Harness code: failing loudly beats propagating setup errors.
#[cfg(any(test, feature = "test-support"))]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod test_fabric {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::locals::SimProcs;
    use dvm_adapters::{DaemonLauncher, LocalRouter, MemKvStore};
    use dvm_core::clock::FakeClock;
    use dvm_core::effect::DaemonSpec;
    use dvm_core::id::{Nspace, ProcName, Rank};
    use dvm_engine::{HeadConfig, HostSpec, JobSubmit};
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    /// One host in the simulated fabric.
    #[derive(Debug, Clone)]
    pub struct FabricHost {
        pub name: String,
        pub topo_sig: String,
        pub topo_payload: Vec<u8>,
    }

    impl FabricHost {
        pub fn new(name: &str, sig: &str) -> Self {
            Self {
                name: name.to_string(),
                topo_sig: sig.to_string(),
                topo_payload: vec![0xEE],
            }
        }
    }

    /// Launcher that parks specs for the fabric to materialize as
    /// in-process daemon runtimes.
    #[derive(Clone, Default)]
    struct FabricLauncher {
        pending: Arc<Mutex<Vec<DaemonSpec>>>,
    }

    impl DaemonLauncher for FabricLauncher {
        fn spawn(&self, specs: Vec<DaemonSpec>, _event_tx: mpsc::UnboundedSender<Event>) {
            self.pending.lock().extend(specs);
        }
    }

    pub struct DaemonNode {
        pub rt: DaemonRuntime<FakeClock>,
        rx: mpsc::UnboundedReceiver<Event>,
        pub sim: SimProcs,
        pub alive: bool,
    }

    /// A whole DVM in one process, stepped deterministically.
    pub struct LocalFabric {
        pub router: LocalRouter,
        pub clock: FakeClock,
        pub nspace: Nspace,
        pub head: HeadRuntime<FakeClock>,
        pub head_daemon: DaemonRuntime<FakeClock>,
        pub head_sim: SimProcs,
        head_rx: mpsc::UnboundedReceiver<Event>,
        pub daemons: Vec<DaemonNode>,
        hosts: Vec<FabricHost>,
        pending: Arc<Mutex<Vec<DaemonSpec>>>,
        session_root: PathBuf,
        hb_period: Duration,
        hb_timeout: Duration,
        /// A daemon that comes up but never phones home (failure-path
        /// scenarios).
        pub holdback: Option<Rank>,
    }

    impl LocalFabric {
        /// Build a fabric: `hosts[0]` is the head's own node.
        pub fn new(
            hosts: Vec<FabricHost>,
            session_root: &Path,
            hb_period: Duration,
            hb_timeout: Duration,
        ) -> Self {
            let nspace = Nspace::generate();
            let clock = FakeClock::new();
            let router = LocalRouter::new();
            let (tx, head_rx) = mpsc::unbounded_channel();
            let me = ProcName::new(nspace.clone(), 0);
            let endpoint = router.register(me, tx.clone());

            let head_host = hosts.first().cloned().unwrap_or(FabricHost::new(
                "hA",
                "1N:1S:2C:4H:x86_64:le",
            ));
            let config = HeadConfig {
                node_name: head_host.name.clone(),
                topo_sig: head_host.topo_sig.clone(),
                topo_payload: head_host.topo_payload.clone(),
                allocation: hosts.iter().skip(1).map(|h| HostSpec::new(&h.name)).collect(),
                ..HeadConfig::default()
            };

            let launcher = FabricLauncher::default();
            let pending = Arc::clone(&launcher.pending);
            let head = HeadRuntime::with_nspace(
                nspace.clone(),
                config,
                clock.clone(),
                Arc::new(endpoint.clone()),
                Arc::new(launcher),
                MemKvStore::new(),
                tx.clone(),
            );

            let head_sim = SimProcs::new();
            let daemon_cfg = DaemonConfig {
                nspace: nspace.clone(),
                rank: 0,
                num_daemons: 1,
                hostname: head_host.name.clone(),
                topo_sig: head_host.topo_sig.clone(),
                topo_payload: head_host.topo_payload,
                hb_period,
                hb_timeout,
                session_root: session_root.to_path_buf(),
                ..DaemonConfig::default()
            };
            let mut head_daemon = DaemonRuntime::new(
                daemon_cfg,
                clock.clone(),
                Arc::new(endpoint),
                Arc::new(head_sim.clone()),
                MemKvStore::new(),
                tx,
            )
            .expect("head daemon construction");
            head_daemon.startup().expect("head daemon startup");

            Self {
                router,
                clock,
                nspace,
                head,
                head_daemon,
                head_sim,
                head_rx,
                daemons: Vec::new(),
                hosts,
                pending,
                session_root: session_root.to_path_buf(),
                hb_period,
                hb_timeout,
                holdback: None,
            }
        }

        /// Step everything until no queue makes progress.
        pub fn step_all(&mut self) {
            loop {
                let mut progressed = false;

                while let Ok(ev) = self.head_rx.try_recv() {
                    progressed = true;
                    if self.head.wants(&ev) {
                        self.head.step(ev).expect("head step");
                    } else if self.head_daemon.wants(&ev) {
                        self.head_daemon.step(ev).expect("head daemon step");
                    }
                }

                for node in self.daemons.iter_mut().filter(|n| n.alive) {
                    while let Ok(ev) = node.rx.try_recv() {
                        progressed = true;
                        if node.rt.wants(&ev) {
                            node.rt.step(ev).expect("daemon step");
                        }
                    }
                }

                let specs: Vec<DaemonSpec> = self.pending.lock().drain(..).collect();
                for spec in specs {
                    progressed = true;
                    self.materialize_daemon(spec);
                }

                if !progressed {
                    return;
                }
            }
        }

        fn materialize_daemon(&mut self, spec: DaemonSpec) {
            let host = self
                .hosts
                .iter()
                .find(|h| h.name == spec.node)
                .cloned()
                .unwrap_or_else(|| FabricHost::new(&spec.node, "1N:1S:2C:4H:x86_64:le"));
            let num_daemons = self.head.registry.daemon_job().num_procs;
            let (tx, rx) = mpsc::unbounded_channel();
            let me = ProcName::new(self.nspace.clone(), spec.rank);
            let endpoint = self.router.register(me, tx.clone());
            let sim = SimProcs::new();
            let config = DaemonConfig {
                nspace: self.nspace.clone(),
                rank: spec.rank,
                num_daemons,
                hostname: host.name.clone(),
                topo_sig: host.topo_sig.clone(),
                topo_payload: host.topo_payload.clone(),
                hb_period: self.hb_period,
                hb_timeout: self.hb_timeout,
                session_root: self.session_root.clone(),
                ..DaemonConfig::default()
            };
            let mut rt = DaemonRuntime::new(
                config,
                self.clock.clone(),
                Arc::new(endpoint),
                Arc::new(sim.clone()),
                MemKvStore::new(),
                tx,
            )
            .expect("daemon construction");
            if self.holdback != Some(spec.rank) {
                rt.startup().expect("daemon startup");
            }
            self.daemons.push(DaemonNode { rt, rx, sim, alive: true });
        }

        /// Advance time and let every timer fire.
        pub fn tick(&mut self, dt: Duration) {
            self.clock.advance(dt);
            for ev in self.head.fire_due_timers() {
                self.head.step(ev).expect("head timer");
            }
            for ev in self.head_daemon.fire_due_timers() {
                self.head_daemon.step(ev).expect("head daemon timer");
            }
            let mut fired: Vec<(usize, Vec<Event>)> = Vec::new();
            for (i, node) in self.daemons.iter_mut().enumerate() {
                if node.alive {
                    fired.push((i, node.rt.fire_due_timers()));
                }
            }
            for (i, events) in fired {
                for ev in events {
                    self.daemons[i].rt.step(ev).expect("daemon timer");
                }
            }
            self.step_all();
        }

        /// Advance in small steps so periodic timers interleave
        /// naturally.
        pub fn run_for(&mut self, total: Duration, step: Duration) {
            let mut elapsed = Duration::ZERO;
            while elapsed < total {
                self.tick(step);
                elapsed += step;
            }
        }

        /// Submit a job and drive the fabric quiet.
        pub fn submit(&mut self, submit: JobSubmit) -> Nspace {
            let ns = self.head.submit(submit).expect("submit");
            self.step_all();
            ns
        }

        /// Kill a daemon abruptly: it stops stepping and its endpoint
        /// vanishes from the router.
        pub fn kill_daemon(&mut self, rank: Rank) {
            self.router.remove(&ProcName::new(self.nspace.clone(), rank));
            if let Some(node) = self.daemons.iter_mut().find(|n| n.rt.me().rank == rank) {
                node.alive = false;
            }
        }

        pub fn daemon(&self, rank: Rank) -> &DaemonNode {
            self.daemons
                .iter()
                .find(|n| n.rt.me().rank == rank)
                .unwrap_or_else(|| panic!("no daemon with rank {rank}"))
        }

        /// Every sim adapter in the fabric, head first.
        pub fn sims(&self) -> Vec<(Rank, SimProcs)> {
            let mut out = vec![(0, self.head_sim.clone())];
            for node in &self.daemons {
                out.push((node.rt.me().rank, node.sim.clone()));
            }
            out
        }

        /// Let a running proc exit normally, wherever it lives.
        pub fn complete_proc(&mut self, proc: &ProcName, exit_code: i32) {
            let mut emitters: Vec<(SimProcs, mpsc::UnboundedSender<Event>)> = Vec::new();
            if self.head_sim.pid_of(proc).is_some() {
                emitters.push((self.head_sim.clone(), self.head_daemon_tx()));
            }
            for node in &self.daemons {
                if node.sim.pid_of(proc).is_some() {
                    emitters.push((node.sim.clone(), node.rt_tx()));
                }
            }
            for (sim, tx) in emitters {
                sim.complete(proc, exit_code, &tx);
            }
            self.step_all();
        }

        fn head_daemon_tx(&self) -> mpsc::UnboundedSender<Event> {
            self.head_daemon.event_tx.clone()
        }

        /// Current state of a job on the head.
        pub fn job_state(&self, nspace: &Nspace) -> dvm_core::job::JobState {
            self.head.registry.job(nspace).expect("job missing").state
        }
    }

    impl DaemonNode {
        fn rt_tx(&self) -> mpsc::UnboundedSender<Event> {
            self.rt.event_tx.clone()
        }
    }
}
