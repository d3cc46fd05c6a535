// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon error types.

use dvm_adapters::TransportError;
use dvm_core::id::Nspace;
use dvm_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("unknown local job: {0}")]
    UnknownJob(Nspace),

    #[error("session error: {0}")]
    Session(#[from] std::io::Error),
}
