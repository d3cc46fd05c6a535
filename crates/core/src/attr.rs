// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed attributes carried on jobs, apps, procs, and nodes.
//!
//! One tagged [`Value`] union with a single serialization contract; the
//! wire codec packs it by discriminator. A [`AttrScope::Local`] attribute
//! never leaves the process; [`AttrScope::Global`] attributes are
//! included in wire images of their owner.

use crate::id::{ProcName, Rank};
use crate::timer::TimerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An environment variable triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envar {
    pub name: String,
    pub value: String,
    pub separator: char,
}

/// Tagged attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Byte(u8),
    String(String),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Size(u64),
    Pid(u32),
    Timeval { sec: i64, usec: i64 },
    Bytes(Vec<u8>),
    Envar(Envar),
    Proc(ProcName),
    Rank(Rank),
    /// Handle to a scheduled timer. Local-only: timers never travel.
    Timer(TimerId),
}

impl Value {
    /// Stable discriminator byte used by the wire codec.
    pub fn type_byte(&self) -> u8 {
        match self {
            Value::Bool(_) => 1,
            Value::Byte(_) => 2,
            Value::String(_) => 3,
            Value::I8(_) => 4,
            Value::I16(_) => 5,
            Value::I32(_) => 6,
            Value::I64(_) => 7,
            Value::U8(_) => 8,
            Value::U16(_) => 9,
            Value::U32(_) => 10,
            Value::U64(_) => 11,
            Value::F64(_) => 12,
            Value::Size(_) => 13,
            Value::Pid(_) => 14,
            Value::Timeval { .. } => 15,
            Value::Bytes(_) => 16,
            Value::Envar(_) => 17,
            Value::Proc(_) => 18,
            Value::Rank(_) => 19,
            Value::Timer(_) => 20,
        }
    }
}

/// Whether an attribute is propagated in wire images of its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrScope {
    /// Never leaves this process.
    Local,
    /// Included when the owner is packed for the wire.
    Global,
}

/// Attribute keys.
///
/// The set is closed: every consumer matches on the key it owns, so an
/// enum (rather than free-form strings) keeps lookups typo-proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrKey {
    // --- job keys ---
    /// Map/launch but do not actually start anything.
    DoNotLaunch,
    /// Job runs against a standing DVM; the VM is not modified.
    FixedDvm,
    /// Do not build a VM; include only nodes already hosting procs.
    NoVm,
    /// Multi-daemon simulation: every usable node joins the VM.
    MultiDaemonSim,
    /// Spawn response already delivered to the originator.
    SpawnNotified,
    /// Reply-routing slot for the spawn request.
    RoomNum,
    /// Execution time limit, seconds.
    JobTimeout,
    /// Launch-to-running time limit, seconds.
    StartupTimeout,
    /// Print a per-proc state summary when the job times out.
    JobReportState,
    /// Collect per-daemon stack traces when the job times out.
    JobStacktraces,
    /// Armed startup failure timer.
    FailureTimerEvent,
    /// Armed execution timer.
    TimeoutEvent,
    /// Armed stack-trace-wait timer.
    TraceTimeoutEvent,
    /// Tool that proxied this spawn and wants the launch-complete event.
    LaunchProxy,
    /// This round of VM construction launched new daemons.
    LaunchedDaemons,
    /// Job was submitted on behalf of a DVM/tool proxy.
    DvmJob,
    /// Rank/sequence file naming the candidate hosts.
    HostFile,

    // --- app keys ---
    PrefixDir,
    Hostfile,
    DashHost,
    PsetName,
    MaxRestarts,
    RecoveryDefined,
    Preposition,

    // --- node keys ---
    /// Comma-joined alias list, nodename first.
    NodeAlias,
    /// Coprocessor serial number of this node.
    SerialNumber,
    /// Rank of the daemon hosting this coprocessor.
    HostId,
}

crate::simple_display! {
    AttrKey {
        DoNotLaunch => "do_not_launch",
        FixedDvm => "fixed_dvm",
        NoVm => "no_vm",
        MultiDaemonSim => "multi_daemon_sim",
        SpawnNotified => "spawn_notified",
        RoomNum => "room_num",
        JobTimeout => "job_timeout",
        StartupTimeout => "startup_timeout",
        JobReportState => "job_report_state",
        JobStacktraces => "job_stacktraces",
        FailureTimerEvent => "failure_timer_event",
        TimeoutEvent => "timeout_event",
        TraceTimeoutEvent => "trace_timeout_event",
        LaunchProxy => "launch_proxy",
        LaunchedDaemons => "launched_daemons",
        DvmJob => "dvm_job",
        HostFile => "host_file",
        PrefixDir => "prefix_dir",
        Hostfile => "hostfile",
        DashHost => "dash_host",
        PsetName => "pset_name",
        MaxRestarts => "max_restarts",
        RecoveryDefined => "recovery_defined",
        Preposition => "preposition",
        NodeAlias => "node_alias",
        SerialNumber => "serial_number",
        HostId => "host_id",
    }
}

impl AttrKey {
    /// Inverse of `Display`; used by the wire codec.
    pub fn parse(s: &str) -> Option<AttrKey> {
        Some(match s {
            "do_not_launch" => AttrKey::DoNotLaunch,
            "fixed_dvm" => AttrKey::FixedDvm,
            "no_vm" => AttrKey::NoVm,
            "multi_daemon_sim" => AttrKey::MultiDaemonSim,
            "spawn_notified" => AttrKey::SpawnNotified,
            "room_num" => AttrKey::RoomNum,
            "job_timeout" => AttrKey::JobTimeout,
            "startup_timeout" => AttrKey::StartupTimeout,
            "job_report_state" => AttrKey::JobReportState,
            "job_stacktraces" => AttrKey::JobStacktraces,
            "failure_timer_event" => AttrKey::FailureTimerEvent,
            "timeout_event" => AttrKey::TimeoutEvent,
            "trace_timeout_event" => AttrKey::TraceTimeoutEvent,
            "launch_proxy" => AttrKey::LaunchProxy,
            "launched_daemons" => AttrKey::LaunchedDaemons,
            "dvm_job" => AttrKey::DvmJob,
            "host_file" => AttrKey::HostFile,
            "prefix_dir" => AttrKey::PrefixDir,
            "hostfile" => AttrKey::Hostfile,
            "dash_host" => AttrKey::DashHost,
            "pset_name" => AttrKey::PsetName,
            "max_restarts" => AttrKey::MaxRestarts,
            "recovery_defined" => AttrKey::RecoveryDefined,
            "preposition" => AttrKey::Preposition,
            "node_alias" => AttrKey::NodeAlias,
            "serial_number" => AttrKey::SerialNumber,
            "host_id" => AttrKey::HostId,
            _ => return None,
        })
    }
}

/// One stored attribute: value plus propagation scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: Value,
    pub scope: AttrScope,
}

/// Attribute map carried by every catalog entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    entries: BTreeMap<AttrKey, Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: AttrKey, scope: AttrScope, value: Value) {
        self.entries.insert(key, Attribute { value, scope });
    }

    pub fn set_local(&mut self, key: AttrKey, value: Value) {
        self.set(key, AttrScope::Local, value);
    }

    pub fn set_global(&mut self, key: AttrKey, value: Value) {
        self.set(key, AttrScope::Global, value);
    }

    /// Set a bare boolean flag (LOCAL, true).
    pub fn set_flag(&mut self, key: AttrKey) {
        self.set_local(key, Value::Bool(true));
    }

    pub fn get(&self, key: AttrKey) -> Option<&Value> {
        self.entries.get(&key).map(|a| &a.value)
    }

    pub fn contains(&self, key: AttrKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Remove and return an attribute. Timer attributes must be removed
    /// through here on every cancellation path.
    pub fn remove(&mut self, key: AttrKey) -> Option<Value> {
        self.entries.remove(&key).map(|a| a.value)
    }

    /// True when the key is present as `Bool(true)`.
    pub fn flag(&self, key: AttrKey) -> bool {
        matches!(self.get(key), Some(Value::Bool(true)))
    }

    pub fn get_string(&self, key: AttrKey) -> Option<&str> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: AttrKey) -> Option<i32> {
        match self.get(key) {
            Some(Value::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_proc(&self, key: AttrKey) -> Option<&ProcName> {
        match self.get(key) {
            Some(Value::Proc(p)) => Some(p),
            _ => None,
        }
    }

    pub fn get_rank(&self, key: AttrKey) -> Option<Rank> {
        match self.get(key) {
            Some(Value::Rank(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn get_timer(&self, key: AttrKey) -> Option<&TimerId> {
        match self.get(key) {
            Some(Value::Timer(t)) => Some(t),
            _ => None,
        }
    }

    /// Iterate the GLOBAL attributes for wire packing.
    pub fn globals(&self) -> impl Iterator<Item = (AttrKey, &Value)> {
        self.entries
            .iter()
            .filter(|(_, a)| a.scope == AttrScope::Global)
            .map(|(k, a)| (*k, &a.value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "attr_tests.rs"]
mod tests;
