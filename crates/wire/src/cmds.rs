// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command bytes for the daemon and PLM receive surfaces.

use crate::buffer::{DataBuffer, WireError};

/// Commands decoded by the per-daemon dispatcher (tag `DAEMON`).
///
/// Stable wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DaemonCmd {
    Null = 0,
    KillLocalProcs = 1,
    SignalLocalProcs = 2,
    AddLocalProcs = 3,
    DvmAddProcs = 4,
    AbortProcsCalled = 5,
    Exit = 6,
    HaltVm = 7,
    DvmCleanupJob = 8,
    ReportTopology = 9,
    GetStackTraces = 10,
}

impl DaemonCmd {
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        Ok(match b {
            0 => DaemonCmd::Null,
            1 => DaemonCmd::KillLocalProcs,
            2 => DaemonCmd::SignalLocalProcs,
            3 => DaemonCmd::AddLocalProcs,
            4 => DaemonCmd::DvmAddProcs,
            5 => DaemonCmd::AbortProcsCalled,
            6 => DaemonCmd::Exit,
            7 => DaemonCmd::HaltVm,
            8 => DaemonCmd::DvmCleanupJob,
            9 => DaemonCmd::ReportTopology,
            10 => DaemonCmd::GetStackTraces,
            other => {
                return Err(WireError::BadEnum { what: "daemon command", value: other as u32 })
            }
        })
    }

    pub fn pack(self, buf: &mut DataBuffer) {
        buf.pack_u8(self as u8);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        Self::from_byte(buf.unpack_u8()?)
    }
}

dvm_core::simple_display! {
    DaemonCmd {
        Null => "null",
        KillLocalProcs => "kill_local_procs",
        SignalLocalProcs => "signal_local_procs",
        AddLocalProcs => "add_local_procs",
        DvmAddProcs => "dvm_add_procs",
        AbortProcsCalled => "abort_procs_called",
        Exit => "exit",
        HaltVm => "halt_vm",
        DvmCleanupJob => "dvm_cleanup_job",
        ReportTopology => "report_topology",
        GetStackTraces => "get_stack_traces",
    }
}

/// Commands decoded by the head node's PLM receiver (tag `PLM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlmCmd {
    AllocJobid = 1,
    LaunchJob = 2,
    UpdateProcState = 3,
    Registered = 4,
}

impl PlmCmd {
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        Ok(match b {
            1 => PlmCmd::AllocJobid,
            2 => PlmCmd::LaunchJob,
            3 => PlmCmd::UpdateProcState,
            4 => PlmCmd::Registered,
            other => {
                return Err(WireError::BadEnum { what: "plm command", value: other as u32 })
            }
        })
    }

    pub fn pack(self, buf: &mut DataBuffer) {
        buf.pack_u8(self as u8);
    }

    pub fn unpack(buf: &mut DataBuffer) -> Result<Self, WireError> {
        Self::from_byte(buf.unpack_u8()?)
    }
}

dvm_core::simple_display! {
    PlmCmd {
        AllocJobid => "alloc_jobid",
        LaunchJob => "launch_job",
        UpdateProcState => "update_proc_state",
        Registered => "registered",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        kill = { DaemonCmd::KillLocalProcs },
        signal = { DaemonCmd::SignalLocalProcs },
        add = { DaemonCmd::AddLocalProcs },
        dvm_add = { DaemonCmd::DvmAddProcs },
        abort = { DaemonCmd::AbortProcsCalled },
        exit = { DaemonCmd::Exit },
        halt = { DaemonCmd::HaltVm },
        cleanup = { DaemonCmd::DvmCleanupJob },
        topo = { DaemonCmd::ReportTopology },
        traces = { DaemonCmd::GetStackTraces },
    )]
    fn daemon_cmds_round_trip(cmd: DaemonCmd) {
        let mut buf = DataBuffer::new();
        cmd.pack(&mut buf);
        assert_eq!(DaemonCmd::unpack(&mut buf).unwrap(), cmd);
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        assert!(DaemonCmd::from_byte(200).is_err());
        assert!(PlmCmd::from_byte(0).is_err());
    }
}
