// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon launcher seam.
//!
//! The head node hands fully assembled daemon command lines to a
//! launcher; how they reach the target node (fork/exec, a managed
//! allocator, an in-process fabric in tests) is the launcher's concern.

use dvm_core::effect::DaemonSpec;
use dvm_core::event::Event;
use tokio::sync::mpsc;

/// Starts daemons from assembled specs. Failures are reported back as
/// [`Event::DaemonSpawnFailed`] rather than surfaced to the caller.
pub trait DaemonLauncher: Send + Sync {
    fn spawn(&self, specs: Vec<DaemonSpec>, event_tx: mpsc::UnboundedSender<Event>);
}

/// Fork/exec launcher: runs each spec's argv as a local child process.
/// Suitable for single-host fabrics; remote placement belongs to an
/// external allocator.
#[derive(Clone, Default)]
pub struct ExecLauncher;

impl DaemonLauncher for ExecLauncher {
    fn spawn(&self, specs: Vec<DaemonSpec>, event_tx: mpsc::UnboundedSender<Event>) {
        for spec in specs {
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                let Some((exe, args)) = spec.argv.split_first() else {
                    let _ = event_tx.send(Event::DaemonSpawnFailed {
                        rank: spec.rank,
                        reason: "empty daemon command".to_string(),
                    });
                    return;
                };
                match tokio::process::Command::new(exe).args(args).spawn() {
                    Ok(mut child) => {
                        tracing::info!(rank = spec.rank, node = %spec.node, "daemon spawned");
                        match child.wait().await {
                            Ok(status) if !status.success() => {
                                let _ = event_tx.send(Event::DaemonSpawnFailed {
                                    rank: spec.rank,
                                    reason: format!("daemon exited with {status}"),
                                });
                            }
                            Ok(_) => {}
                            Err(e) => {
                                let _ = event_tx.send(Event::DaemonSpawnFailed {
                                    rank: spec.rank,
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                    Err(e) => {
                        let _ = event_tx.send(Event::DaemonSpawnFailed {
                            rank: spec.rank,
                            reason: e.to_string(),
                        });
                    }
                }
            });
        }
    }
}
