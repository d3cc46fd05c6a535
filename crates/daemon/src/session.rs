// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session directory tree.
//!
//! Layout: `<root>/<dvm-nspace>/<job-nspace>/...`. Per-job subtrees are
//! created when local procs launch and removed on cleanup; nothing
//! durable lives outside the session.

use dvm_core::id::Nspace;
use std::fs::File;
use std::path::{Path, PathBuf};

pub struct SessionDir {
    base: PathBuf,
    // NOTE(lifetime): held to keep the advisory lock; released on drop
    #[allow(dead_code)]
    lock_file: Option<File>,
}

impl SessionDir {
    /// Create the session root for this DVM instance and take the
    /// advisory lock so concurrent daemons cannot collide.
    pub fn create(root: &Path, dvm_nspace: &Nspace, rank: u32) -> std::io::Result<Self> {
        let base = root.join(dvm_nspace.as_str());
        std::fs::create_dir_all(&base)?;

        let lock_path = base.join(format!("dvmd-{rank}.lock"));
        let lock_file = File::create(&lock_path)?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("another daemon holds {}", lock_path.display()),
            )
        })?;

        Ok(Self { base, lock_file: Some(lock_file) })
    }

    /// Path of one job's subtree.
    pub fn job_dir(&self, nspace: &Nspace) -> PathBuf {
        self.base.join(nspace.as_str())
    }

    pub fn create_job_dir(&self, nspace: &Nspace) -> std::io::Result<PathBuf> {
        let dir = self.job_dir(nspace);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove a job's subtree. Missing directories are fine: cleanup
    /// must be idempotent.
    pub fn cleanup_job(&self, nspace: &Nspace) -> std::io::Result<()> {
        let dir = self.job_dir(nspace);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Tear down the whole session tree at finalize.
    pub fn cleanup_all(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.base) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
