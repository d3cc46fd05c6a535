// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! App: one executable within a job.

use crate::attr::Attributes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One executable with its own argv/env/working-dir inside a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Index of this app within its job.
    pub idx: u32,
    /// argv[0] is the executable.
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    /// Requested process count.
    pub num_procs: u32,
    /// Restart budget applied when no recovery policy was declared.
    pub max_restarts: i32,
    /// Files to preposition before launch.
    pub preposition: Vec<PathBuf>,
    pub attributes: Attributes,
}

impl App {
    pub fn new(idx: u32, argv: Vec<String>, num_procs: u32) -> Self {
        Self { idx, argv, num_procs, ..Self::default() }
    }

    pub fn executable(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}
