// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DVM launcher (dvm)
//!
//! Brings up a head node (coordinator plus resident daemon), builds
//! the virtual machine across the requested hosts, runs one job to
//! completion, and tears the fabric down.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use anyhow::Context;
use clap::Parser;
use dvm_adapters::{ExecLauncher, MemKvStore, TcpHub};
use dvm_core::clock::SystemClock;
use dvm_core::id::{Nspace, ProcName, HNP_RANK};
use dvm_daemon::{DaemonConfig, DaemonRuntime, ExecProcs, HeadNode};
use dvm_engine::{AppSubmit, HeadConfig, HeadRuntime, HostSpec, JobSubmit};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Launch a parallel application on a DVM.
#[derive(Parser, Debug)]
#[command(name = "dvm", version, about)]
struct Args {
    /// Number of processes to start.
    #[arg(short = 'n', long, default_value_t = 1)]
    np: u32,

    /// Comma-separated host list.
    #[arg(long)]
    host: Option<String>,

    /// Hostfile: one host per line, optional `slots=N` suffix.
    #[arg(long)]
    hostfile: Option<PathBuf>,

    /// Execution time limit in seconds.
    #[arg(long)]
    timeout: Option<i32>,

    /// Launch-to-running time limit in seconds.
    #[arg(long)]
    startup_timeout: Option<i32>,

    /// Print a per-proc summary if the job times out.
    #[arg(long)]
    report_state: bool,

    /// Collect per-daemon stack traces if the job times out.
    #[arg(long)]
    get_stack_traces: bool,

    /// Slots policy: cores, sockets, numas, hwthreads, or an integer.
    #[arg(long)]
    set_slots: Option<String>,

    /// Cap on the number of nodes in the VM.
    #[arg(long)]
    max_vm_size: Option<usize>,

    /// Command used to start remote daemons; the word `dvmd` marks the
    /// substitution point.
    #[arg(long, default_value = "dvmd")]
    launch_agent: String,

    /// Address the head node listens on.
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// Session directory root.
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Map and report without launching anything.
    #[arg(long)]
    do_not_launch: bool,

    #[arg(long)]
    debug_daemons: bool,

    /// Runtime parameters forwarded to daemons.
    #[arg(long = "prtemca", num_args = 2, value_names = ["NAME", "VALUE"])]
    prtemca: Vec<String>,

    /// The application and its arguments.
    #[arg(trailing_var_arg = true, required = true)]
    argv: Vec<String>,
}

fn parse_hostfile(path: &PathBuf) -> anyhow::Result<Vec<HostSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading hostfile {}", path.display()))?;
    let mut hosts = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else { continue };
        let slots = parts
            .find_map(|p| p.strip_prefix("slots=").map(str::to_string))
            .and_then(|s| s.parse().ok());
        hosts.push(HostSpec { name: name.to_string(), slots });
    }
    Ok(hosts)
}

fn local_topology() -> (String, Vec<u8>) {
    let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let endian = if cfg!(target_endian = "little") { "le" } else { "be" };
    let sig = format!(
        "1N:{threads}C:{threads}H:{}:{endian}",
        std::env::consts::ARCH
    );
    (sig.clone(), sig.into_bytes())
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Drive the head node until the job reaches a terminal state.
async fn run_job(node: &mut HeadNode<SystemClock>, nspace: &Nspace) -> i32 {
    loop {
        let done = node
            .head
            .registry
            .job(nspace)
            .map(|job| job.is_terminal())
            .unwrap_or(true);
        if done {
            return node
                .head
                .registry
                .job(nspace)
                .map(|job| job.exit_code)
                .unwrap_or(0);
        }
        node.run_one(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(if args.debug_daemons { "debug" } else { "warn" })
        });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut allocation = Vec::new();
    if let Some(path) = &args.hostfile {
        allocation.extend(parse_hostfile(path)?);
    }

    let (topo_sig, topo_payload) = local_topology();
    let node_name = hostname();
    let session_root = args
        .session_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("dvm-sessions"));

    let (tx, rx) = mpsc::unbounded_channel();
    let dvm_nspace = Nspace::generate();
    let me = ProcName::new(dvm_nspace.clone(), HNP_RANK);
    let (hub, addr) = TcpHub::bind(me, args.bind, tx.clone())
        .await
        .context("binding the head node")?;
    tracing::info!(%addr, "head node listening");

    let config = HeadConfig {
        node_name: node_name.clone(),
        topo_sig: topo_sig.clone(),
        topo_payload: topo_payload.clone(),
        allocation,
        managed_allocation: false,
        default_hostfile: Vec::new(),
        set_slots: args.set_slots.clone(),
        max_vm_size: args.max_vm_size,
        launch_agent: args.launch_agent.clone(),
        head_uri: format!("tcp://{addr}"),
        prtemca: args
            .prtemca
            .chunks_exact(2)
            .map(|c| (c[0].clone(), c[1].clone()))
            .collect(),
        debug_daemons: args.debug_daemons,
        ..HeadConfig::default()
    };

    let mut head = HeadRuntime::with_nspace(
        dvm_nspace.clone(),
        config,
        SystemClock,
        Arc::new(hub.clone()),
        Arc::new(ExecLauncher),
        MemKvStore::new(),
        tx.clone(),
    );

    let daemon_config = DaemonConfig {
        nspace: dvm_nspace,
        rank: HNP_RANK,
        num_daemons: 1,
        hostname: node_name,
        topo_sig,
        topo_payload,
        session_root,
        debug_daemons: args.debug_daemons,
        ..DaemonConfig::default()
    };
    let mut daemon = DaemonRuntime::new(
        daemon_config,
        SystemClock,
        Arc::new(hub),
        Arc::new(ExecProcs::new()),
        MemKvStore::new(),
        tx,
    )?;
    daemon.startup()?;

    let submit = JobSubmit {
        apps: vec![AppSubmit {
            argv: args.argv.clone(),
            np: args.np,
            cwd: std::env::current_dir().unwrap_or_default(),
            dash_host: args.host.clone(),
            ..AppSubmit::default()
        }],
        timeout_secs: args.timeout,
        startup_timeout_secs: args.startup_timeout,
        report_state_on_timeout: args.report_state,
        stacktraces_on_timeout: args.get_stack_traces,
        do_not_launch: args.do_not_launch,
        ..JobSubmit::default()
    };
    let nspace = head.submit(submit)?;

    let mut node = HeadNode::new(head, daemon, rx);
    let exit_code = run_job(&mut node, &nspace).await;

    // Release the fabric's hold on the finished job, then take the VM
    // down.
    if let Err(e) = node.head.cleanup_job(&nspace) {
        tracing::warn!(error = %e, "cleanup broadcast failed");
    }
    if let Err(e) = node.head.halt_vm() {
        tracing::warn!(error = %e, "halt broadcast failed");
    }
    node.run_until_done(Duration::from_secs(5)).await;

    std::process::exit(exit_code);
}
