// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Child process management with Zombie Process Protection.
//!
//! Build steps and fuzz harnesses are bound to the orchestrator: they are
//! killed when their owner is dropped, and on Linux when the orchestrator
//! itself dies.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

pub struct SupervisedProcess {
    child: Child,
    pid: Option<u32>,
}

impl SupervisedProcess {
    /// Spawns `program` in `cwd` with stdout and stderr appended to `log_path`.
    pub fn spawn(
        program: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: &Path,
        log_path: &Path,
    ) -> io::Result<Self> {
        debug!(
            "SupervisedProcess: spawning '{}' with args {:?}",
            program.display(),
            args
        );

        let log = OpenOptions::new().create(true).append(true).open(log_path)?;
        let log_err = log.try_clone()?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);

        // ------------------------------------------------------------------
        // LINUX: PR_SET_PDEATHSIG
        // ------------------------------------------------------------------
        #[cfg(target_os = "linux")]
        // SAFETY: prctl is async-signal-safe and touches no memory shared with
        // the parent. PR_SET_PDEATHSIG with SIGKILL makes the kernel kill the
        // child when the orchestrator dies.
        unsafe {
            command.pre_exec(|| {
                let ret = libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
                if ret != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn()?;
        let pid = child.id();
        debug!(pid = ?pid, "SupervisedProcess: started");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Asks the process to stop, then kills it once `grace` has passed.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        self.send_terminate();
        if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
            return Some(status);
        }

        warn!(pid = ?self.pid, "Process ignored termination request, killing");
        if let Err(e) = self.child.kill().await {
            warn!(pid = ?self.pid, error = %e, "Failed to kill process");
        }
        self.child.try_wait().ok().flatten()
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn send_terminate(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM not delivered");
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn send_terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Exit code and terminating signal of a finished process.
pub fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}
