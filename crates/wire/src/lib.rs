// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dvm-wire: binary wire format for the reliable-messaging layer.
//!
//! Every value is packed as a one-byte type tag followed by its
//! payload; unpacking verifies the tag. Reading past the end of a
//! buffer is a distinct error so iterating decoders can treat clean
//! exhaustion as end-of-input.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod buffer;
mod cmds;
mod compress;
mod framing;
mod messages;
mod tags;

pub use buffer::{DataBuffer, WireError};
pub use cmds::{DaemonCmd, PlmCmd};
pub use compress::{decompress, maybe_compress};
pub use framing::{read_frame, write_frame, Frame, MAX_FRAME_SIZE};
pub use messages::{
    proc_state_from_wire, proc_state_to_wire, AbortProcs, DaemonFailed, DaemonReport,
    Heartbeat, HeartbeatRequest, InlineTopo, LaunchMsg, ModexRequest, ModexResponse,
    ProcUpdate, RegisteredMsg, SignalJob, SpawnResponse, StackTraceBlob, StackTraceReply,
    TopologyReport, UpdateProcState,
};
pub use tags::tag;

#[cfg(test)]
mod property_tests;
