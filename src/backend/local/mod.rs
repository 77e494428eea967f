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

//! Local execution backend.
//!
//! Builds (or reuses a build of) a fuzz target in a local OSS-Fuzz checkout
//! and runs it as a bounded child process. Each job gets its own output
//! directory under the jobs root:
//!
//! ```text
//! <jobs_dir>/<job id>/
//!     build.log      build step output, when a build was needed
//!     fuzz.log       harness stdout and stderr
//!     crashes/       libFuzzer artifact prefix
//!     summary.json   written once the run has ended
//! ```

pub mod output;
pub mod process;
pub mod run;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use self::run::{RunPhase, RunPlan};
use super::ExecutionBackend;
use crate::config::Config;
use crate::core::constants::{layout, timing};
use crate::core::errors::{OrchestratorError, Result};
use crate::core::models::{BackendKind, JobId, JobSpec, JobStatus};
use crate::core::raw::RawOutput;
use crate::external::catalog::{self, CheckoutCatalog, ProjectCatalog};

const BACKEND_NAME: &str = "local";

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub jobs_dir: PathBuf,
    pub kill_grace: Duration,
    pub build_timeout: Duration,
    pub helper_cmd: Vec<String>,
}

impl LocalSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jobs_dir: config.jobs_dir.clone(),
            kill_grace: config.kill_grace,
            build_timeout: config.build_timeout,
            helper_cmd: config.helper_cmd.clone(),
        }
    }
}

pub struct LocalBackend {
    catalog: Arc<CheckoutCatalog>,
    settings: LocalSettings,
}

/// Per-job run control: the phase feed of the background run and the means
/// to stop it.
pub struct LocalJob {
    id: JobId,
    output_dir: PathBuf,
    phase: watch::Receiver<RunPhase>,
    control: Mutex<RunControl>,
}

struct RunControl {
    cancel_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    cancel_requested: bool,
}

impl LocalJob {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }
}

impl LocalBackend {
    pub fn new(catalog: Arc<CheckoutCatalog>, settings: LocalSettings) -> Self {
        Self { catalog, settings }
    }

    pub fn catalog(&self) -> &Arc<CheckoutCatalog> {
        &self.catalog
    }

    async fn create_output_dir(&self, job_id: JobId) -> Result<PathBuf> {
        let output_dir = std::path::absolute(self.settings.jobs_dir.join(job_id.to_string()))
            .map_err(|e| OrchestratorError::backend_unavailable(BACKEND_NAME, e))?;
        if tokio::fs::try_exists(&output_dir).await.unwrap_or(false) {
            return Err(OrchestratorError::backend_unavailable(
                BACKEND_NAME,
                format!("output directory {} already exists", output_dir.display()),
            ));
        }
        tokio::fs::create_dir_all(output_dir.join(layout::CRASHES_DIR))
            .await
            .map_err(|e| {
                OrchestratorError::backend_unavailable(
                    BACKEND_NAME,
                    format!("cannot create {}: {}", output_dir.display(), e),
                )
            })?;
        Ok(output_dir)
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    type Handle = LocalJob;

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn submit(&self, job_id: JobId, spec: &JobSpec) -> Result<LocalJob> {
        let project = spec.project();
        let target = spec.fuzz_target();

        let (details, prebuilt) = {
            let (project, target) = (project.to_string(), target.to_string());
            catalog::lookup_blocking(&self.catalog, move |c| {
                Ok((c.project_details(&project)?, c.prebuilt_target(&project, &target)))
            })
            .await?
        };
        let details = details.ok_or_else(|| {
            OrchestratorError::Validation(format!(
                "project '{}' not found in {}",
                project,
                self.catalog.root().display()
            ))
        })?;
        if prebuilt.is_none() && !details.accepts_target(target) {
            return Err(OrchestratorError::Validation(format!(
                "fuzz target '{}' is not built by project '{}' (known: {})",
                target,
                project,
                details.targets.join(", ")
            )));
        }

        let output_dir = self.create_output_dir(job_id).await?;
        let plan = RunPlan {
            job_id,
            spec: spec.clone(),
            catalog: self.catalog.clone(),
            prebuilt,
            output_dir: output_dir.clone(),
            kill_grace: self.settings.kill_grace,
            build_timeout: self.settings.build_timeout,
            helper_cmd: self.settings.helper_cmd.clone(),
        };

        let (phase_tx, phase_rx) = watch::channel(RunPhase::Running);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(run::drive(plan, cancel_rx, phase_tx));

        info!(
            job_id = %job_id,
            project = %project,
            target = %target,
            output_dir = %output_dir.display(),
            "Local job started"
        );

        Ok(LocalJob {
            id: job_id,
            output_dir,
            phase: phase_rx,
            control: Mutex::new(RunControl {
                cancel_tx: Some(cancel_tx),
                task: Some(task),
                cancel_requested: false,
            }),
        })
    }

    async fn poll(&self, job: &LocalJob) -> Result<JobStatus> {
        Ok(job.phase().status())
    }

    async fn fetch(&self, job: &LocalJob) -> Result<RawOutput> {
        if !job.phase().is_finished() {
            let cancel_requested = job.control.lock().await.cancel_requested;
            if !cancel_requested {
                return Err(OrchestratorError::ResultsUnavailable(format!(
                    "local job {} is still running",
                    job.id
                )));
            }

            let bound = self
                .settings
                .kill_grace
                .saturating_add(Duration::from_millis(timing::WIND_DOWN_MARGIN_MS));
            let mut phase = job.phase.clone();
            let wound_down = tokio::time::timeout(bound, phase.wait_for(RunPhase::is_finished))
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
            if !wound_down {
                return Err(OrchestratorError::ResultsUnavailable(format!(
                    "cancelled job {} did not wind down within {:?}",
                    job.id, bound
                )));
            }
        }

        let raw = output::collect(&job.output_dir).await?;
        Ok(RawOutput::Local(raw))
    }

    async fn cancel(&self, job: &LocalJob) -> Result<bool> {
        if job.phase().is_finished() {
            return Ok(false);
        }
        let mut control = job.control.lock().await;
        let Some(cancel_tx) = control.cancel_tx.take() else {
            return Ok(false);
        };
        if cancel_tx.send(()).is_err() {
            debug!(job_id = %job.id, "Run ended before cancellation arrived");
            return Ok(false);
        }
        control.cancel_requested = true;
        info!(job_id = %job.id, "Cancellation requested");
        Ok(true)
    }

    async fn release(&self, job: &LocalJob) {
        let mut control = job.control.lock().await;
        // The run is terminal here; a cancelled run may still be writing its
        // summary, so its task is detached rather than aborted.
        control.cancel_tx.take();
        if let Some(task) = control.task.take() {
            debug!(job_id = %job.id, finished = task.is_finished(), "Detaching run task");
        }
        debug!(job_id = %job.id, "Released local job");
    }
}
