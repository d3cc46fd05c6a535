// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topology: opaque per-node hardware descriptor plus its signature.

use serde::{Deserialize, Serialize};

/// Stable handle into the registry's topology table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopoIndex(pub usize);

/// One deduplicated topology entry.
///
/// Two nodes with identical signatures share one entry. The descriptor
/// itself is opaque to the runtime; only the signature is interpreted
/// (for dedup and the hetero check). Created on first sight of a
/// signature, lives for the duration of the head-node process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Stable digest string, e.g. `"2N:16C:32H:x86_64:le"`.
    pub signature: String,
    /// Opaque topology descriptor; `None` until some daemon ships it.
    pub payload: Option<Vec<u8>>,
}

impl Topology {
    pub fn new(signature: impl Into<String>) -> Self {
        Self { signature: signature.into(), payload: None }
    }

    pub fn with_payload(signature: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { signature: signature.into(), payload: Some(payload) }
    }

    /// A topology is pending until its descriptor arrives.
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}
