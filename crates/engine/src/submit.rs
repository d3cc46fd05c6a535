// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job submission DTO.
//!
//! Submissions arrive either through the head runtime's API (the `dvm`
//! launcher) or as a JSON payload on the PLM tag (proxied spawns).

use dvm_core::app::App;
use dvm_core::attr::{AttrKey, Value};
use dvm_core::id::{Nspace, ProcName};
use dvm_core::job::Job;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One app within a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSubmit {
    pub argv: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub cwd: PathBuf,
    pub np: u32,
    /// Comma-separated host list constraining this app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash_host: Option<String>,
    /// Hosts parsed out of a per-app hostfile by the caller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostfile_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pset_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preposition: Vec<PathBuf>,
}

/// A complete job submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSubmit {
    pub apps: Vec<AppSubmit>,
    /// Reply-routing slot for the spawn response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_timeout_secs: Option<i32>,
    #[serde(default)]
    pub report_state_on_timeout: bool,
    #[serde(default)]
    pub stacktraces_on_timeout: bool,
    #[serde(default)]
    pub recoverable: bool,
    #[serde(default)]
    pub tool: bool,
    #[serde(default)]
    pub fixed_dvm: bool,
    #[serde(default)]
    pub do_not_launch: bool,
    /// Submitted on behalf of a DVM/tool proxy.
    #[serde(default)]
    pub dvm_job: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_proxy: Option<ProcName>,
}

impl JobSubmit {
    /// Materialize a [`Job`] in INIT state.
    pub fn into_job(self, nspace: Nspace) -> Job {
        let mut job = Job::new(nspace);
        job.flags.recoverable = self.recoverable;
        job.flags.tool = self.tool;
        job.flags.do_not_launch = self.do_not_launch;

        if self.fixed_dvm {
            job.attributes.set_flag(AttrKey::FixedDvm);
        }
        if self.do_not_launch {
            job.attributes.set_flag(AttrKey::DoNotLaunch);
        }
        if self.dvm_job {
            job.attributes.set_flag(AttrKey::DvmJob);
        }
        if self.report_state_on_timeout {
            job.attributes.set_flag(AttrKey::JobReportState);
        }
        if self.stacktraces_on_timeout {
            job.attributes.set_flag(AttrKey::JobStacktraces);
        }
        if let Some(room) = self.room {
            job.attributes.set_local(AttrKey::RoomNum, Value::I32(room));
        }
        if let Some(secs) = self.timeout_secs {
            job.attributes.set_local(AttrKey::JobTimeout, Value::I32(secs));
        }
        if let Some(secs) = self.startup_timeout_secs {
            job.attributes.set_local(AttrKey::StartupTimeout, Value::I32(secs));
        }
        if let Some(proxy) = self.launch_proxy {
            job.attributes.set_local(AttrKey::LaunchProxy, Value::Proc(proxy));
        }

        for submit in self.apps {
            let mut app = App::new(0, submit.argv, submit.np);
            app.env = submit.env;
            app.cwd = submit.cwd;
            app.preposition = submit.preposition;
            if let Some(n) = submit.max_restarts {
                app.max_restarts = n;
                app.attributes.set_flag(AttrKey::RecoveryDefined);
            }
            if let Some(hosts) = submit.dash_host {
                app.attributes.set_global(AttrKey::DashHost, Value::String(hosts));
            }
            if !submit.hostfile_hosts.is_empty() {
                app.attributes.set_global(
                    AttrKey::Hostfile,
                    Value::String(submit.hostfile_hosts.join(",")),
                );
            }
            if let Some(prefix) = submit.prefix_dir {
                app.attributes.set_global(AttrKey::PrefixDir, Value::String(prefix));
            }
            if let Some(pset) = submit.pset_name {
                app.attributes.set_global(AttrKey::PsetName, Value::String(pset));
            }
            job.add_app(app);
        }
        job
    }
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
