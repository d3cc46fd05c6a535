// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error types.

use dvm_adapters::TransportError;
use dvm_core::id::{Nspace, ProcName};
use dvm_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job not found: {0}")]
    JobNotFound(Nspace),

    #[error("proc not found: {0}")]
    ProcNotFound(ProcName),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("no usable nodes for the virtual machine")]
    NoNodes,

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),
}
