// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DVM daemon (dvmd)
//!
//! One per participating node. Launched by the head node's launch
//! agent, phones home on start-up, hosts application procs, and runs
//! the heartbeat ring.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use anyhow::{bail, Context};
use clap::Parser;
use dvm_adapters::{MemKvStore, TcpLink};
use dvm_core::clock::SystemClock;
use dvm_core::event::Event;
use dvm_core::id::{Nspace, ProcName};
use dvm_daemon::{DaemonConfig, DaemonRuntime, ExecProcs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// DVM daemon. Not meant to be invoked by hand: the head node
/// assembles this command line.
#[derive(Parser, Debug)]
#[command(name = "dvmd", version, disable_help_subcommand = true)]
struct Args {
    /// Runtime parameters, passed as repeated `--prtemca <name> <value>`.
    #[arg(long = "prtemca", num_args = 2, value_names = ["NAME", "VALUE"])]
    prtemca: Vec<String>,

    #[arg(long)]
    debug: bool,

    #[arg(long)]
    debug_daemons: bool,

    #[arg(long)]
    debug_daemons_file: bool,

    #[arg(long)]
    leave_session_attached: bool,

    /// Abort right after start-up (failure-path testing).
    #[arg(long)]
    test_suicide: bool,
}

fn mca_params(raw: &[String]) -> Vec<(String, String)> {
    raw.chunks_exact(2).map(|c| (c[0].clone(), c[1].clone())).collect()
}

fn local_topology() -> (String, Vec<u8>) {
    let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let endian = if cfg!(target_endian = "little") { "le" } else { "be" };
    let sig = format!(
        "1N:{threads}C:{threads}H:{}:{endian}",
        std::env::consts::ARCH
    );
    // The descriptor itself is opaque to the runtime; the signature is
    // all the head interprets.
    (sig.clone(), sig.into_bytes())
}

fn build_config(args: &Args) -> anyhow::Result<(DaemonConfig, String)> {
    let params = mca_params(&args.prtemca);
    let get = |name: &str| params.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone());

    let nspace = get("ess_base_nspace").context("missing ess_base_nspace")?;
    let rank: u32 = get("ess_base_vpid")
        .context("missing ess_base_vpid")?
        .parse()
        .context("bad ess_base_vpid")?;
    let num_daemons: u32 = get("ess_base_num_procs")
        .context("missing ess_base_num_procs")?
        .parse()
        .context("bad ess_base_num_procs")?;
    let head_uri = get("dvm_hnp_uri").context("missing dvm_hnp_uri")?;

    let hb_period = get("errmgr_heartbeat_period")
        .and_then(|v| v.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::from_secs(5));
    let hb_timeout = get("errmgr_heartbeat_timeout")
        .and_then(|v| v.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::from_secs(10));
    let session_root = get("session_dir_base")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("dvm-sessions"));

    let hostname = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let (topo_sig, topo_payload) = local_topology();

    Ok((
        DaemonConfig {
            nspace: Nspace::from_string(nspace),
            rank,
            num_daemons,
            hostname,
            aliases: Vec::new(),
            topo_sig,
            topo_payload,
            coprocessors: None,
            own_serial: None,
            inventory: None,
            modex: None,
            hb_period,
            hb_timeout,
            session_root,
            debug_daemons: args.debug_daemons,
            test_suicide: args.test_suicide,
        },
        head_uri,
    ))
}

fn init_logging(args: &Args, config: &DaemonConfig) -> anyhow::Result<()> {
    let filter = if args.debug || args.debug_daemons {
        "debug"
    } else {
        "info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if args.debug_daemons_file {
        let dir = config.session_root.join("logs");
        std::fs::create_dir_all(&dir)?;
        let appender =
            tracing_appender::rolling::never(dir, format!("dvmd-{}.log", config.rank));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(appender)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
    Ok(())
}

async fn daemon_loop(
    mut rt: DaemonRuntime<SystemClock>,
    mut rx: mpsc::UnboundedReceiver<Event>,
) {
    loop {
        if rt.is_done() {
            return;
        }
        let event = match rt.next_deadline() {
            Some(when) => {
                let wait = when.saturating_duration_since(std::time::Instant::now());
                tokio::select! {
                    ev = rx.recv() => ev,
                    _ = tokio::time::sleep(wait) => {
                        for ev in rt.fire_due_timers() {
                            if let Err(e) = rt.step(ev) {
                                tracing::error!(error = %e, "timer handling failed");
                            }
                        }
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };
        match event {
            Some(ev) => {
                if rt.wants(&ev) {
                    if let Err(e) = rt.step(ev) {
                        tracing::error!(error = %e, "event handling failed");
                    }
                } else {
                    tracing::debug!("dropping unrouted event: {}", ev.name());
                }
            }
            None => return,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, head_uri) = build_config(&args)?;
    init_logging(&args, &config)?;

    tracing::info!(
        rank = config.rank,
        num_daemons = config.num_daemons,
        head = %head_uri,
        "dvmd starting"
    );

    let addr = head_uri
        .strip_prefix("tcp://")
        .unwrap_or(&head_uri)
        .parse()
        .with_context(|| format!("bad head uri: {head_uri}"))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let me = config.me();
    let head = config.head();
    let link = TcpLink::connect(addr, me, head, tx.clone())
        .await
        .context("connecting to the head node")?;

    let mut rt = DaemonRuntime::new(
        config,
        SystemClock,
        Arc::new(link),
        Arc::new(ExecProcs::new()),
        MemKvStore::new(),
        tx.clone(),
    )?;
    rt.startup()?;

    if args.test_suicide {
        bail!("test suicide");
    }

    // Forward SIGTERM into an orderly shutdown.
    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        if let Ok(mut term) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            term.recv().await;
            let _ = shutdown_tx.send(Event::Shutdown);
        }
    });

    daemon_loop(rt, rx).await;
    tracing::info!("dvmd exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mca_params_pair_up() {
        let raw = vec![
            "ess_base_nspace".to_string(),
            "dvm-x".to_string(),
            "ess_base_vpid".to_string(),
            "3".to_string(),
        ];
        let params = mca_params(&raw);
        assert_eq!(params.len(), 2);
        assert_eq!(params[1], ("ess_base_vpid".to_string(), "3".to_string()));
    }

    #[test]
    fn config_requires_identity_params() {
        let args = Args {
            prtemca: vec!["ess_base_nspace".into(), "dvm-x".into()],
            debug: false,
            debug_daemons: false,
            debug_daemons_file: false,
            leave_session_attached: false,
            test_suicide: false,
        };
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn config_parses_a_full_command_line() {
        let args = Args::parse_from([
            "dvmd",
            "--debug-daemons",
            "--prtemca", "ess_base_nspace", "dvm-abc",
            "--prtemca", "ess_base_vpid", "2",
            "--prtemca", "ess_base_num_procs", "4",
            "--prtemca", "dvm_hnp_uri", "tcp://127.0.0.1:7000",
            "--prtemca", "errmgr_heartbeat_period", "0.5",
        ]);
        let (config, uri) = build_config(&args).unwrap();
        assert_eq!(config.rank, 2);
        assert_eq!(config.num_daemons, 4);
        assert_eq!(config.hb_period, Duration::from_millis(500));
        assert_eq!(uri, "tcp://127.0.0.1:7000");
        assert!(config.debug_daemons);
    }

    #[test]
    fn local_topology_signature_is_well_formed() {
        let (sig, payload) = local_topology();
        assert!(sig.starts_with("1N:"));
        assert!(sig.ends_with(":le") || sig.ends_with(":be"));
        assert!(!payload.is_empty());
    }
}
