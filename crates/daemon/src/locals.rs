// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local process management seam.
//!
//! The daemon starts, signals, and kills application processes through
//! this adapter. `ExecProcs` forks real children; `SimProcs` fakes
//! them for in-process fabrics and tests.

use dvm_core::app::App;
use dvm_core::event::Event;
use dvm_core::id::ProcName;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Starts and controls local application processes. Lifecycle results
/// come back as [`Event::LocalProcStarted`] / [`Event::LocalProcExited`].
pub trait LocalProcAdapter: Send + Sync {
    fn spawn(&self, proc: ProcName, app: &App, event_tx: mpsc::UnboundedSender<Event>);

    /// Deliver a signal to one proc by pid.
    fn signal(&self, proc: &ProcName, pid: u32, signal: i32);

    /// Kill one proc; the exit surfaces as a `LocalProcExited`.
    fn kill(&self, proc: &ProcName, event_tx: mpsc::UnboundedSender<Event>);
}

/// Real fork/exec adapter.
#[derive(Clone, Default)]
pub struct ExecProcs {
    children: Arc<Mutex<HashMap<ProcName, tokio::process::Child>>>,
}

impl ExecProcs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalProcAdapter for ExecProcs {
    fn spawn(&self, proc: ProcName, app: &App, event_tx: mpsc::UnboundedSender<Event>) {
        let Some((exe, args)) = app.argv.split_first() else {
            let _ = event_tx.send(Event::LocalProcExited { proc, exit_code: 127 });
            return;
        };
        let mut cmd = tokio::process::Command::new(exe);
        cmd.args(args).envs(app.env.iter().cloned());
        if app.cwd.as_os_str().len() > 0 {
            cmd.current_dir(&app.cwd);
        }
        match cmd.spawn() {
            Ok(child) => {
                let pid = child.id().unwrap_or(0);
                self.children.lock().insert(proc.clone(), child);
                let _ = event_tx.send(Event::LocalProcStarted { proc: proc.clone(), pid });

                // Reap in the background; completion lands on the loop.
                let children = Arc::clone(&self.children);
                tokio::spawn(async move {
                    loop {
                        let done = {
                            let mut guard = children.lock();
                            match guard.get_mut(&proc) {
                                Some(child) => match child.try_wait() {
                                    Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
                                    Ok(None) => None,
                                    Err(_) => Some(-1),
                                },
                                None => return,
                            }
                        };
                        if let Some(exit_code) = done {
                            children.lock().remove(&proc);
                            let _ = event_tx
                                .send(Event::LocalProcExited { proc, exit_code });
                            return;
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                });
            }
            Err(e) => {
                tracing::error!(%proc, error = %e, "local spawn failed");
                let _ = event_tx.send(Event::LocalProcExited { proc, exit_code: 127 });
            }
        }
    }

    fn signal(&self, proc: &ProcName, pid: u32, signal: i32) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let Ok(sig) = Signal::try_from(signal) else {
            tracing::warn!(%proc, signal, "unknown signal");
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
            tracing::warn!(%proc, pid, signal, error = %e, "signal delivery failed");
        }
    }

    fn kill(&self, proc: &ProcName, _event_tx: mpsc::UnboundedSender<Event>) {
        let mut guard = self.children.lock();
        if let Some(child) = guard.get_mut(proc) {
            if let Err(e) = child.start_kill() {
                tracing::warn!(%proc, error = %e, "kill failed");
            }
            // The reaper task reports the exit.
        }
    }
}

/// Simulated procs: no real children, deterministic pids, exits only
/// when killed or completed by the test harness.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct SimProcs {
    inner: Arc<Mutex<SimInner>>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
struct SimInner {
    next_pid: u32,
    running: HashMap<ProcName, u32>,
    signals: Vec<(ProcName, i32)>,
}

#[cfg(any(test, feature = "test-support"))]
impl SimProcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pid_of(&self, proc: &ProcName) -> Option<u32> {
        self.inner.lock().running.get(proc).copied()
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running.len()
    }

    /// Signals delivered so far, in order.
    pub fn delivered_signals(&self) -> Vec<(ProcName, i32)> {
        self.inner.lock().signals.clone()
    }

    /// Complete a proc normally, as if it exited on its own.
    pub fn complete(
        &self,
        proc: &ProcName,
        exit_code: i32,
        event_tx: &mpsc::UnboundedSender<Event>,
    ) {
        if self.inner.lock().running.remove(proc).is_some() {
            let _ = event_tx
                .send(Event::LocalProcExited { proc: proc.clone(), exit_code });
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl LocalProcAdapter for SimProcs {
    fn spawn(&self, proc: ProcName, _app: &App, event_tx: mpsc::UnboundedSender<Event>) {
        let pid = {
            let mut inner = self.inner.lock();
            inner.next_pid += 1;
            let pid = 1000 + inner.next_pid;
            inner.running.insert(proc.clone(), pid);
            pid
        };
        let _ = event_tx.send(Event::LocalProcStarted { proc, pid });
    }

    fn signal(&self, proc: &ProcName, _pid: u32, signal: i32) {
        self.inner.lock().signals.push((proc.clone(), signal));
    }

    fn kill(&self, proc: &ProcName, event_tx: mpsc::UnboundedSender<Event>) {
        if self.inner.lock().running.remove(proc).is_some() {
            // 128 + SIGKILL, as a real child would report.
            let _ = event_tx.send(Event::LocalProcExited {
                proc: proc.clone(),
                exit_code: 137,
            });
        }
    }
}
