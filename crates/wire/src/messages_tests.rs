// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dvm_core::attr::Value;

fn dvm_ns() -> Nspace {
    Nspace::from_string("dvm-head000000000000000")
}

fn sample_app() -> App {
    let mut app = App::new(0, vec!["a.out".into(), "--verbose".into()], 6);
    app.env.push(("OMP_NUM_THREADS".into(), "2".into()));
    app.cwd = PathBuf::from("/home/user/run");
    app.max_restarts = 3;
    app.attributes.set(
        AttrKey::PrefixDir,
        AttrScope::Global,
        Value::String("/opt/dvm".into()),
    );
    // Local attributes must not survive the wire.
    app.attributes.set(AttrKey::RoomNum, AttrScope::Local, Value::I32(7));
    app
}

#[test]
fn launch_msg_round_trips_and_drops_local_attrs() {
    let spec = LaunchSpec {
        nspace: Nspace::from_string("dvm-job"),
        apps: vec![sample_app()],
        placements: vec![
            Placement { rank: 0, app_idx: 0, daemon: 1 },
            Placement { rank: 1, app_idx: 0, daemon: 2 },
        ],
    };
    let msg = LaunchMsg { cmd: DaemonCmd::AddLocalProcs, spec: spec.clone() };
    let mut buf = DataBuffer::new();
    msg.pack(&mut buf);

    assert_eq!(DaemonCmd::unpack(&mut buf).unwrap(), DaemonCmd::AddLocalProcs);
    let decoded = LaunchMsg::unpack_spec(&mut buf).unwrap();
    assert_eq!(decoded.nspace, spec.nspace);
    assert_eq!(decoded.placements, spec.placements);
    assert_eq!(decoded.apps[0].argv, spec.apps[0].argv);
    assert_eq!(
        decoded.apps[0].attributes.get_string(AttrKey::PrefixDir),
        Some("/opt/dvm")
    );
    assert!(!decoded.apps[0].attributes.contains(AttrKey::RoomNum));
}

#[test]
fn daemon_report_round_trips_for_rank_one_with_topology() {
    let report = DaemonReport {
        daemon: ProcName::new(dvm_ns(), 1),
        modex: Some(vec![9, 8, 7]),
        nodename: "hB".into(),
        aliases: vec!["10.0.0.2".into()],
        topo_sig: "2N:8C:16H:x86_64:le".into(),
        topo: Some(InlineTopo { compressed: false, payload: vec![1, 2, 3] }),
        inventory: Some(vec![5]),
    };
    let mut buf = DataBuffer::new();
    report.pack(&mut buf);
    let decoded = DaemonReport::unpack(&mut buf).unwrap();
    assert_eq!(decoded, report);
    assert!(buf.is_exhausted());
}

#[test]
fn daemon_report_for_other_ranks_skips_topology() {
    let report = DaemonReport {
        daemon: ProcName::new(dvm_ns(), 2),
        modex: None,
        nodename: "hC".into(),
        aliases: vec![],
        topo_sig: "sig".into(),
        topo: None,
        inventory: None,
    };
    let mut buf = DataBuffer::new();
    report.pack(&mut buf);
    let decoded = DaemonReport::unpack(&mut buf).unwrap();
    assert_eq!(decoded, report);
}

#[test]
fn multiple_reports_decode_until_end_of_buffer() {
    let mut buf = DataBuffer::new();
    for rank in [2u32, 3] {
        DaemonReport {
            daemon: ProcName::new(dvm_ns(), rank),
            modex: None,
            nodename: format!("h{rank}"),
            aliases: vec![],
            topo_sig: "sig".into(),
            topo: None,
            inventory: None,
        }
        .pack(&mut buf);
    }
    let mut seen = vec![];
    loop {
        match DaemonReport::unpack(&mut buf) {
            Ok(r) => seen.push(r.daemon.rank),
            Err(WireError::EndOfBuffer) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(seen, vec![2, 3]);
}

#[test]
fn topology_report_compression_is_transparent() {
    let report = TopologyReport {
        sig: "sig-a".into(),
        payload: vec![42u8; 8 * 1024],
        coprocessors: Some("SN123,SN456".into()),
        own_serial: None,
    };
    let mut buf = DataBuffer::new();
    report.pack(&mut buf);
    // Payload is large and repetitive, so the flag must be set.
    let mut probe = DataBuffer::from_vec(buf.as_slice().to_vec());
    assert!(probe.unpack_bool().unwrap());
    let decoded = TopologyReport::unpack(&mut buf).unwrap();
    assert_eq!(decoded, report);
}

#[test]
fn update_proc_state_handles_multiple_jobs() {
    let mut buf = DataBuffer::new();
    UpdateProcState {
        nspace: Nspace::from_string("dvm-j1"),
        updates: vec![
            ProcUpdate { rank: 0, pid: 100, state: ProcState::Running, exit_code: 0 },
            ProcUpdate { rank: 1, pid: 101, state: ProcState::Terminated, exit_code: 0 },
        ],
    }
    .pack(&mut buf);
    UpdateProcState {
        nspace: Nspace::from_string("dvm-j2"),
        updates: vec![ProcUpdate {
            rank: 4,
            pid: 200,
            state: ProcState::AbortedBySig,
            exit_code: 137,
        }],
    }
    .pack(&mut buf);

    let all = UpdateProcState::unpack_all(&mut buf).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].updates.len(), 2);
    assert_eq!(all[1].nspace, "dvm-j2");
    assert_eq!(all[1].updates[0].state, ProcState::AbortedBySig);
}

#[test]
fn spawn_response_room_is_optional() {
    let with_room = SpawnResponse {
        status: 0,
        nspace: Nspace::from_string("dvm-j"),
        room: Some(12),
    };
    let mut buf = DataBuffer::new();
    with_room.pack(&mut buf);
    assert_eq!(SpawnResponse::unpack(&mut buf).unwrap(), with_room);

    let without = SpawnResponse { status: -1, nspace: Nspace::from_string("dvm-j"), room: None };
    let mut buf = DataBuffer::new();
    without.pack(&mut buf);
    assert_eq!(SpawnResponse::unpack(&mut buf).unwrap(), without);
}

#[test]
fn stack_trace_reply_round_trips() {
    let reply = StackTraceReply {
        nspace: Nspace::from_string("dvm-j"),
        blobs: vec![
            StackTraceBlob {
                proc: ProcName::new(Nspace::from_string("dvm-j"), 0),
                hostname: "hA".into(),
                pid: 4242,
                lines: vec!["#0 main ()".into(), "#1 _start ()".into()],
            },
            StackTraceBlob {
                proc: ProcName::new(Nspace::from_string("dvm-j"), 1),
                hostname: "hB".into(),
                pid: 4243,
                lines: vec!["Failed to find \"gstack\" on hB to obtain stack traces".into()],
            },
        ],
    };
    let mut buf = DataBuffer::new();
    reply.pack(&mut buf);
    assert_eq!(StackTraceReply::unpack(&mut buf).unwrap(), reply);
}

#[test]
fn heartbeat_and_request_round_trip() {
    let hb = Heartbeat { from: ProcName::new(dvm_ns(), 3) };
    let mut buf = DataBuffer::new();
    hb.pack(&mut buf);
    assert_eq!(Heartbeat::unpack(&mut buf).unwrap(), hb);

    let req = HeartbeatRequest { from: ProcName::new(dvm_ns(), 4) };
    let mut buf = DataBuffer::new();
    req.pack(&mut buf);
    assert_eq!(HeartbeatRequest::unpack(&mut buf).unwrap(), req);
}

#[test]
fn proc_state_wire_codes_are_stable() {
    for (state, code) in [
        (ProcState::Init, 0),
        (ProcState::Running, 1),
        (ProcState::Registered, 2),
        (ProcState::Terminated, 3),
        (ProcState::AbortedBySig, 4),
        (ProcState::FailedToStart, 5),
    ] {
        assert_eq!(proc_state_to_wire(state), code);
        assert_eq!(proc_state_from_wire(code).unwrap(), state);
    }
    assert!(proc_state_from_wire(99).is_err());
}

#[test]
fn modex_messages_round_trip() {
    let req = ModexRequest { target: ProcName::new(Nspace::from_string("dvm-j"), 5), room: 3 };
    let mut buf = DataBuffer::new();
    req.pack(&mut buf);
    assert_eq!(ModexRequest::unpack(&mut buf).unwrap(), req);

    let resp = ModexResponse { status: 0, room: 3, payload: vec![1, 2] };
    let mut buf = DataBuffer::new();
    resp.pack(&mut buf);
    assert_eq!(ModexResponse::unpack(&mut buf).unwrap(), resp);
}

#[test]
fn registered_msg_collects_trailing_ranks() {
    let msg = RegisteredMsg { nspace: Nspace::from_string("dvm-j"), ranks: vec![0, 1, 2] };
    let mut buf = DataBuffer::new();
    msg.pack(&mut buf);
    assert_eq!(RegisteredMsg::unpack(&mut buf).unwrap(), msg);
}

#[test]
fn abort_procs_round_trips() {
    let msg = AbortProcs {
        procs: vec![
            ProcName::new(Nspace::from_string("dvm-j"), 0),
            ProcName::new(Nspace::from_string("dvm-j"), 2),
        ],
    };
    let mut buf = DataBuffer::new();
    msg.pack(&mut buf);
    assert_eq!(AbortProcs::unpack(&mut buf).unwrap(), msg);
}

#[test]
fn signal_job_round_trips() {
    let msg = SignalJob { nspace: Nspace::from_string("dvm-j"), signal: 19 };
    let mut buf = DataBuffer::new();
    msg.pack(&mut buf);
    assert_eq!(SignalJob::unpack(&mut buf).unwrap(), msg);
}

#[test]
fn daemon_failed_round_trips() {
    let msg = DaemonFailed { rank: 3, exit_code: 1 };
    let mut buf = DataBuffer::new();
    msg.pack(&mut buf);
    assert_eq!(DaemonFailed::unpack(&mut buf).unwrap(), msg);
}
