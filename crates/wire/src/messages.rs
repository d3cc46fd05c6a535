// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed message encodings.
//!
//! Each struct mirrors the pack order of the handler that consumes it,
//! so a message can be decoded field-by-field by the receiving side
//! without any out-of-band framing beyond the RML tag.

use crate::buffer::{DataBuffer, WireError};
use crate::cmds::DaemonCmd;
use dvm_core::app::App;
use dvm_core::attr::{AttrKey, AttrScope, Attributes};
use dvm_core::id::{Nspace, ProcName, Rank, INVALID_RANK};
use dvm_core::launch::{LaunchSpec, Placement};
use dvm_core::proc::ProcState;
use std::path::PathBuf;

/// Wire encoding of [`ProcState`]. Stable constants.
pub fn proc_state_to_wire(state: ProcState) -> u32 {
    match state {
        ProcState::Init => 0,
        ProcState::Running => 1,
        ProcState::Registered => 2,
        ProcState::Terminated => 3,
        ProcState::AbortedBySig => 4,
        ProcState::FailedToStart => 5,
    }
}

pub fn proc_state_from_wire(v: u32) -> Result<ProcState, WireError> {
    Ok(match v {
        0 => ProcState::Init,
        1 => ProcState::Running,
        2 => ProcState::Registered,
        3 => ProcState::Terminated,
        4 => ProcState::AbortedBySig,
        5 => ProcState::FailedToStart,
        other => return Err(WireError::BadEnum { what: "proc state", value: other }),
    })
}

fn pack_string_list(buf: &mut DataBuffer, items: &[String]) {
    buf.pack_u32(items.len() as u32);
    for s in items {
        buf.pack_string(s);
    }
}

fn unpack_string_list(buf: &mut DataBuffer) -> Result<Vec<String>, WireError> {
    let n = buf.unpack_u32()? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(buf.unpack_string()?);
    }
    Ok(out)
}

fn pack_global_attrs(buf: &mut DataBuffer, attrs: &Attributes) {
    let globals: Vec<_> = attrs.globals().collect();
    buf.pack_u32(globals.len() as u32);
    for (key, value) in globals {
        buf.pack_string(&key.to_string());
        buf.pack_value(value);
    }
}

fn unpack_global_attrs(buf: &mut DataBuffer) -> Result<Attributes, WireError> {
    let n = buf.unpack_u32()? as usize;
    let mut attrs = Attributes::new();
    for _ in 0..n {
        let key_str = buf.unpack_string()?;
        let value = buf.unpack_value()?;
        let key = AttrKey::parse(&key_str)
            .ok_or(WireError::BadEnum { what: "attr key", value: 0 })?;
        attrs.set(key, AttrScope::Global, value);
    }
    Ok(attrs)
}

fn pack_app(buf: &mut DataBuffer, app: &App) {
    buf.pack_u32(app.idx);
    pack_string_list(buf, &app.argv);
    buf.pack_u32(app.env.len() as u32);
    for (k, v) in &app.env {
        buf.pack_string(k);
        buf.pack_string(v);
    }
    buf.pack_string(&app.cwd.to_string_lossy());
    buf.pack_u32(app.num_procs);
    buf.pack_i32(app.max_restarts);
    let pre: Vec<String> =
        app.preposition.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    pack_string_list(buf, &pre);
    pack_global_attrs(buf, &app.attributes);
}

fn unpack_app(buf: &mut DataBuffer) -> Result<App, WireError> {
    let idx = buf.unpack_u32()?;
    let argv = unpack_string_list(buf)?;
    let nenv = buf.unpack_u32()? as usize;
    let mut env = Vec::with_capacity(nenv);
    for _ in 0..nenv {
        let k = buf.unpack_string()?;
        let v = buf.unpack_string()?;
        env.push((k, v));
    }
    let cwd = PathBuf::from(buf.unpack_string()?);
    let num_procs = buf.unpack_u32()?;
    let max_restarts = buf.unpack_i32()?;
    let preposition = unpack_string_list(buf)?.into_iter().map(PathBuf::from).collect();
    let attributes = unpack_global_attrs(buf)?;
    Ok(App { idx, argv, env, cwd, num_procs, max_restarts, preposition, attributes })
}

fn pack_launch_spec(buf: &mut DataBuffer, spec: &LaunchSpec) {
    buf.pack_nspace(&spec.nspace);
    buf.pack_u32(spec.apps.len() as u32);
    for app in &spec.apps {
        pack_app(buf, app);
    }
    buf.pack_u32(spec.placements.len() as u32);
    for p in &spec.placements {
        buf.pack_rank(p.rank);
        buf.pack_u32(p.app_idx);
        buf.pack_rank(p.daemon);
    }
}

fn unpack_launch_spec(buf: &mut DataBuffer) -> Result<LaunchSpec, WireError> {
    let nspace = buf.unpack_nspace()?;
    let napps = buf.unpack_u32()? as usize;
    let mut apps = Vec::with_capacity(napps);
    for _ in 0..napps {
        apps.push(unpack_app(buf)?);
    }
    let nplace = buf.unpack_u32()? as usize;
    let mut placements = Vec::with_capacity(nplace);
    for _ in 0..nplace {
        let rank = buf.unpack_rank()?;
        let app_idx = buf.unpack_u32()?;
        let daemon = buf.unpack_rank()?;
        placements.push(Placement { rank, app_idx, daemon });
    }
    Ok(LaunchSpec { nspace, apps, placements })
}

/// The `ADD_LOCAL_PROCS` / `DVM_ADD_PROCS` broadcast: command byte then
/// the per-app launch data.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchMsg {
    pub cmd: DaemonCmd,
    pub spec: LaunchSpec,
}

impl LaunchMsg {
    pub fn pack(&self, buf: &mut DataBuffer) {
        self.cmd.pack(buf);
        pack_launch_spec(buf, &self.spec);
    }

    /// Decode the payload after the command byte was consumed by the
    /// dispatcher.
    pub fn unpack_spec(buf: &mut DataBuffer) -> Result<LaunchSpec, WireError> {
        unpack_launch_spec(buf)
    }
}

/// Rank-1's inline topology payload inside a daemon report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineTopo {
    pub compressed: bool,
    pub payload: Vec<u8>,
}

impl InlineTopo {
    /// Decompressed topology bytes, honoring the explicit flag only.
    pub fn data(&self) -> Result<Vec<u8>, WireError> {
        if self.compressed {
            crate::compress::decompress(&self.payload)
        } else {
            Ok(self.payload.clone())
        }
    }
}

/// One daemon's "I am up" report (tag `PRTED_CALLBACK`).
///
/// A single message may carry several reports back to back; decode in a
/// loop until [`WireError::EndOfBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonReport {
    pub daemon: ProcName,
    /// Key/value blob for the head's modex store.
    pub modex: Option<Vec<u8>>,
    pub nodename: String,
    /// Extra aliases; the receiver prepends the nodename itself.
    pub aliases: Vec<String>,
    pub topo_sig: String,
    /// Only rank 1 ships its topology inline.
    pub topo: Option<InlineTopo>,
    pub inventory: Option<Vec<u8>>,
}

impl DaemonReport {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_proc(&self.daemon);
        match &self.modex {
            Some(blob) => {
                buf.pack_i32(1);
                buf.pack_bytes(blob);
            }
            None => buf.pack_i32(0),
        }
        buf.pack_string(&self.nodename);
        buf.pack_u8(self.aliases.len() as u8);
        for alias in &self.aliases {
            buf.pack_string(alias);
        }
        buf.pack_string(&self.topo_sig);
        if self.daemon.rank == 1 {
            let topo = self.topo.clone().unwrap_or(InlineTopo {
                compressed: false,
                payload: Vec::new(),
            });
            buf.pack_bool(topo.compressed);
            buf.pack_bytes(&topo.payload);
        }
        match &self.inventory {
            Some(blob) => {
                buf.pack_i8(1);
                buf.pack_bytes(blob);
            }
            None => buf.pack_i8(0),
        }
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        let daemon = buf.unpack_proc()?;
        let modex = match buf.unpack_i32()? {
            0 => None,
            _ => Some(buf.unpack_bytes()?),
        };
        let nodename = buf.unpack_string()?;
        let naliases = buf.unpack_u8()? as usize;
        let mut aliases = Vec::with_capacity(naliases);
        for _ in 0..naliases {
            aliases.push(buf.unpack_string()?);
        }
        let topo_sig = buf.unpack_string()?;
        let topo = if daemon.rank == 1 {
            let compressed = buf.unpack_bool()?;
            let payload = buf.unpack_bytes()?;
            Some(InlineTopo { compressed, payload })
        } else {
            None
        };
        let inventory = match buf.unpack_i8()? {
            1 => Some(buf.unpack_bytes()?),
            _ => None,
        };
        Ok(Self { daemon, modex, nodename, aliases, topo_sig, topo, inventory })
    }
}

/// Decoded contents of a deferred topology reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyReport {
    pub sig: String,
    pub payload: Vec<u8>,
    /// Serial numbers of coprocessors hosted by this node, comma-joined.
    pub coprocessors: Option<String>,
    /// Serial number of this node itself, when it is a coprocessor.
    pub own_serial: Option<String>,
}

impl TopologyReport {
    /// Pack as `[compressed flag][byte object]`, compressing the inner
    /// buffer when beneficial.
    pub fn pack(&self, buf: &mut DataBuffer) {
        let mut inner = DataBuffer::new();
        inner.pack_string(&self.sig);
        inner.pack_bytes(&self.payload);
        pack_opt_string(&mut inner, self.coprocessors.as_deref());
        pack_opt_string(&mut inner, self.own_serial.as_deref());
        let (compressed, bytes) = crate::compress::maybe_compress(inner.as_slice());
        buf.pack_bool(compressed);
        buf.pack_bytes(&bytes);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        let compressed = buf.unpack_bool()?;
        let bytes = buf.unpack_bytes()?;
        let data = if compressed { crate::compress::decompress(&bytes)? } else { bytes };
        let mut inner = DataBuffer::from_vec(data);
        let sig = inner.unpack_string()?;
        let payload = inner.unpack_bytes()?;
        let coprocessors = unpack_opt_string(&mut inner)?;
        let own_serial = unpack_opt_string(&mut inner)?;
        Ok(Self { sig, payload, coprocessors, own_serial })
    }
}

fn pack_opt_string(buf: &mut DataBuffer, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.pack_bool(true);
            buf.pack_string(s);
        }
        None => buf.pack_bool(false),
    }
}

fn unpack_opt_string(buf: &mut DataBuffer) -> Result<Option<String>, WireError> {
    if buf.unpack_bool()? {
        Ok(Some(buf.unpack_string()?))
    } else {
        Ok(None)
    }
}

/// Ring heartbeat (tag `HEARTBEAT`): just the sender's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub from: ProcName,
}

impl Heartbeat {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_proc(&self.from);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        Ok(Self { from: buf.unpack_proc()? })
    }
}

/// Ring-repair request (tag `HEARTBEAT_REQUEST`): the new observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub from: ProcName,
}

impl HeartbeatRequest {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_proc(&self.from);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        Ok(Self { from: buf.unpack_proc()? })
    }
}

/// One proc's state change inside an [`UpdateProcState`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcUpdate {
    pub rank: Rank,
    pub pid: u32,
    pub state: ProcState,
    pub exit_code: i32,
}

/// Per-daemon proc state rollup (tag `PLM`, after the command byte).
///
/// The per-job proc list ends with an [`INVALID_RANK`] sentinel; several
/// jobs may follow each other in one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateProcState {
    pub nspace: Nspace,
    pub updates: Vec<ProcUpdate>,
}

impl UpdateProcState {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_nspace(&self.nspace);
        for u in &self.updates {
            buf.pack_rank(u.rank);
            buf.pack_u32(u.pid);
            buf.pack_u32(proc_state_to_wire(u.state));
            buf.pack_i32(u.exit_code);
        }
        buf.pack_rank(INVALID_RANK);
    }

    /// Decode every job section until the buffer is exhausted.
    pub fn unpack_all(buf: &mut DataBuffer) -> Result<Vec<UpdateProcState>, WireError> {
        let mut out = Vec::new();
        loop {
            let nspace = match buf.unpack_nspace() {
                Ok(ns) => ns,
                Err(WireError::EndOfBuffer) => return Ok(out),
                Err(e) => return Err(e),
            };
            let mut updates = Vec::new();
            loop {
                let rank = buf.unpack_rank()?;
                if rank == INVALID_RANK {
                    break;
                }
                let pid = buf.unpack_u32()?;
                let state = proc_state_from_wire(buf.unpack_u32()?)?;
                let exit_code = buf.unpack_i32()?;
                updates.push(ProcUpdate { rank, pid, state, exit_code });
            }
            out.push(UpdateProcState { nspace, updates });
        }
    }
}

/// Registration report (tag `PLM`, after the command byte).
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredMsg {
    pub nspace: Nspace,
    pub ranks: Vec<Rank>,
}

impl RegisteredMsg {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_nspace(&self.nspace);
        for r in &self.ranks {
            buf.pack_rank(*r);
        }
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        let nspace = buf.unpack_nspace()?;
        let mut ranks = Vec::new();
        loop {
            match buf.unpack_rank() {
                Ok(r) => ranks.push(r),
                Err(WireError::EndOfBuffer) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Self { nspace, ranks })
    }
}

/// Spawn / jobid-allocation response (tag `LAUNCH_RESP`).
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnResponse {
    pub status: i32,
    pub nspace: Nspace,
    /// Reply-routing slot echoed from the request, when one was given.
    pub room: Option<i32>,
}

impl SpawnResponse {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_i32(self.status);
        buf.pack_nspace(&self.nspace);
        if let Some(room) = self.room {
            buf.pack_i32(room);
        }
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        let status = buf.unpack_i32()?;
        let nspace = buf.unpack_nspace()?;
        let room = match buf.unpack_i32() {
            Ok(r) => Some(r),
            Err(WireError::EndOfBuffer) => None,
            Err(e) => return Err(e),
        };
        Ok(Self { status, nspace, room })
    }
}

/// Daemon-launch failure report (tag `REPORT_REMOTE_LAUNCH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonFailed {
    pub rank: Rank,
    pub exit_code: i32,
}

impl DaemonFailed {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_rank(self.rank);
        buf.pack_i32(self.exit_code);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        Ok(Self { rank: buf.unpack_rank()?, exit_code: buf.unpack_i32()? })
    }
}

/// Net-new termination requests (`ABORT_PROCS_CALLED` payload).
#[derive(Debug, Clone, PartialEq)]
pub struct AbortProcs {
    pub procs: Vec<ProcName>,
}

impl AbortProcs {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_i32(self.procs.len() as i32);
        for p in &self.procs {
            buf.pack_proc(p);
        }
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        let n = buf.unpack_i32()?.max(0) as usize;
        let mut procs = Vec::with_capacity(n);
        for _ in 0..n {
            procs.push(buf.unpack_proc()?);
        }
        Ok(Self { procs })
    }
}

/// `SIGNAL_LOCAL_PROCS` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalJob {
    pub nspace: Nspace,
    pub signal: i32,
}

impl SignalJob {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_nspace(&self.nspace);
        buf.pack_i32(self.signal);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        Ok(Self { nspace: buf.unpack_nspace()?, signal: buf.unpack_i32()? })
    }
}

/// One proc's stack trace inside a [`StackTraceReply`].
#[derive(Debug, Clone, PartialEq)]
pub struct StackTraceBlob {
    pub proc: ProcName,
    pub hostname: String,
    pub pid: u32,
    /// Output lines; a single error line when `gstack` was unavailable.
    pub lines: Vec<String>,
}

impl StackTraceBlob {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut inner = DataBuffer::new();
        inner.pack_proc(&self.proc);
        inner.pack_string(&self.hostname);
        inner.pack_u32(self.pid);
        for line in &self.lines {
            inner.pack_string(line);
        }
        inner.into_vec()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, WireError> {
        let mut inner = DataBuffer::from_vec(bytes);
        let proc = inner.unpack_proc()?;
        let hostname = inner.unpack_string()?;
        let pid = inner.unpack_u32()?;
        let mut lines = Vec::new();
        loop {
            match inner.unpack_string() {
                Ok(line) => lines.push(line),
                Err(WireError::EndOfBuffer) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Self { proc, hostname, pid, lines })
    }
}

/// Per-daemon stack-trace reply (tag `STACK_TRACE`).
#[derive(Debug, Clone, PartialEq)]
pub struct StackTraceReply {
    pub nspace: Nspace,
    pub blobs: Vec<StackTraceBlob>,
}

impl StackTraceReply {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_nspace(&self.nspace);
        for blob in &self.blobs {
            buf.pack_bytes(&blob.to_bytes());
        }
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        let nspace = buf.unpack_nspace()?;
        let mut blobs = Vec::new();
        loop {
            match buf.unpack_bytes() {
                Ok(bytes) => blobs.push(StackTraceBlob::from_bytes(bytes)?),
                Err(WireError::EndOfBuffer) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Self { nspace, blobs })
    }
}

/// Direct modex request (tag `DIRECT_MODEX`).
#[derive(Debug, Clone, PartialEq)]
pub struct ModexRequest {
    pub target: ProcName,
    pub room: i32,
}

impl ModexRequest {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_proc(&self.target);
        buf.pack_i32(self.room);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        Ok(Self { target: buf.unpack_proc()?, room: buf.unpack_i32()? })
    }
}

/// Direct modex response (tag `DIRECT_MODEX_RESP`).
#[derive(Debug, Clone, PartialEq)]
pub struct ModexResponse {
    pub status: i32,
    pub room: i32,
    pub payload: Vec<u8>,
}

impl ModexResponse {
    pub fn pack(&self, buf: &mut DataBuffer) {
        buf.pack_i32(self.status);
        buf.pack_i32(self.room);
        buf.pack_bytes(&self.payload);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        Ok(Self {
            status: buf.unpack_i32()?,
            room: buf.unpack_i32()?,
            payload: buf.unpack_bytes()?,
        })
    }
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
