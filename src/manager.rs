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

//! Job Lifecycle Manager.
//!
//! Owns the handle to status mapping and drives every job through
//! `PENDING -> RUNNING -> {COMPLETED | FAILED | TIMED_OUT | CANCELLED}`,
//! whichever backend runs it.
//!
//! Status rules:
//! - Transitions are monotonic and terminal statuses absorb.
//! - Every job is reported `RUNNING` at least once. A terminal status seen by
//!   the poll that moves a job out of `PENDING` is held for the next poll.
//! - The backend's `release` runs exactly once, on the first terminal
//!   observation.
//! - A caller wait timeout never records a status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::local::{LocalBackend, LocalSettings};
use crate::backend::remote::RemoteBackend;
use crate::backend::{selector, Backend, BackendHandle, ExecutionBackend};
use crate::config::{Config, PollBackoff};
use crate::core::errors::{OrchestratorError, Result};
use crate::core::models::{
    BackendKind, BackendPreference, ExecutionResult, JobHandle, JobId, JobSpec, JobStatus,
};
use crate::external::catalog::{self, CheckoutCatalog, ProjectCatalog};
use crate::external::credentials::{CredentialsProvider, EnvCredentials};
use crate::external::storage::HttpStorage;
use crate::normalizer;

/// Caller-side bound for `wait_for_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    After(Duration),
    /// Wait for as long as the job takes. Never implied.
    Infinite,
}

struct JobSlot {
    backend: Backend,
    handle: BackendHandle,
    state: Mutex<SlotState>,
}

struct SlotState {
    status: JobStatus,
    /// Terminal status observed while leaving `PENDING`, reported next poll.
    held_terminal: Option<JobStatus>,
    released: bool,
}

pub struct JobManager {
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,
    local: Option<Arc<LocalBackend>>,
    remote: Option<Arc<RemoteBackend>>,
    catalog: Option<Arc<dyn ProjectCatalog>>,
    credentials: Arc<dyn CredentialsProvider>,
    default_backend: BackendPreference,
    backoff: PollBackoff,
}

impl JobManager {
    /// A manager with no backends configured. Add them with `with_local` and
    /// `with_remote`.
    pub fn new(credentials: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            local: None,
            remote: None,
            catalog: None,
            credentials,
            default_backend: BackendPreference::Auto,
            backoff: PollBackoff::default(),
        }
    }

    /// Wires backends from configuration: local when a checkout is known,
    /// remote when a service URL is set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials: Arc<dyn CredentialsProvider> = Arc::new(EnvCredentials);
        let mut manager = Self::new(credentials.clone())
            .with_backoff(config.poll)
            .with_default_backend(config.default_backend);

        if let Some(dir) = &config.oss_fuzz_dir {
            let catalog = Arc::new(CheckoutCatalog::new(dir));
            manager = manager.with_catalog(catalog.clone()).with_local(Arc::new(
                LocalBackend::new(catalog, LocalSettings::from_config(config)),
            ));
        }
        if let Some(url) = &config.remote_url {
            let storage = Arc::new(HttpStorage::new(
                config.remote_timeout,
                Some(credentials.clone()),
            )?);
            manager = manager.with_remote(Arc::new(RemoteBackend::new(
                url.as_str(),
                config.remote_timeout,
                credentials,
                storage,
            )?));
        }
        Ok(manager)
    }

    pub fn with_local(mut self, backend: Arc<LocalBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn with_remote(mut self, backend: Arc<RemoteBackend>) -> Self {
        self.remote = Some(backend);
        self
    }

    /// Catalog consulted before any backend is called.
    pub fn with_catalog(mut self, catalog: Arc<dyn ProjectCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Preference applied to specs that ask for `Auto`.
    pub fn with_default_backend(mut self, preference: BackendPreference) -> Self {
        self.default_backend = preference;
        self
    }

    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn backend_for(&self, kind: BackendKind) -> Result<Backend> {
        match kind {
            BackendKind::Local => self.local.clone().map(Backend::Local).ok_or_else(|| {
                OrchestratorError::Configuration(
                    "local backend selected but no OSS-Fuzz checkout is configured".to_string(),
                )
            }),
            BackendKind::Remote => self.remote.clone().map(Backend::Remote).ok_or_else(|| {
                OrchestratorError::Configuration(
                    "remote backend selected but no service URL is configured".to_string(),
                )
            }),
        }
    }

    async fn slot(&self, handle: &JobHandle) -> Result<Arc<JobSlot>> {
        self.jobs
            .read()
            .await
            .get(&handle.id())
            .cloned()
            .ok_or(OrchestratorError::UnknownJob(handle.id()))
    }

    pub async fn submit_job(&self, spec: JobSpec) -> Result<JobHandle> {
        if let Some(catalog) = &self.catalog {
            let project = spec.project().to_string();
            let details =
                catalog::lookup_blocking(catalog, move |c| c.project_details(&project)).await?;
            if details.is_none() {
                return Err(OrchestratorError::Validation(format!(
                    "unknown project '{}'",
                    spec.project()
                )));
            }
        }

        let requested = match spec.backend() {
            BackendPreference::Auto => self.default_backend,
            explicit => explicit,
        };
        let kind = selector::select(requested, self.credentials.has_remote_credentials())?;
        let backend = self.backend_for(kind)?;

        let job_id = JobId::new();
        let handle = backend.submit(job_id, &spec).await?;
        let slot = Arc::new(JobSlot {
            backend,
            handle,
            state: Mutex::new(SlotState {
                status: JobStatus::Pending,
                held_terminal: None,
                released: false,
            }),
        });
        self.jobs.write().await.insert(job_id, slot);

        info!(
            job_id = %job_id,
            backend = %kind,
            project = %spec.project(),
            target = %spec.fuzz_target(),
            duration_secs = spec.duration_secs(),
            "Job submitted"
        );
        Ok(JobHandle::new(job_id))
    }

    pub async fn poll_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        let slot = self.slot(handle).await?;
        let mut state = slot.state.lock().await;
        Self::refresh(handle.id(), &slot, &mut state).await
    }

    async fn refresh(id: JobId, slot: &JobSlot, state: &mut SlotState) -> Result<JobStatus> {
        if state.status.is_terminal() {
            return Ok(state.status);
        }
        if let Some(held) = state.held_terminal.take() {
            Self::settle(id, slot, state, held).await;
            return Ok(held);
        }

        let observed = slot.backend.poll(&slot.handle).await?;
        debug!(job_id = %id, recorded = %state.status, observed = %observed, "Polled job");

        match (state.status, observed) {
            (JobStatus::Pending, JobStatus::Pending) => {}
            (JobStatus::Pending, observed) => {
                state.status = JobStatus::Running;
                info!(job_id = %id, "Job running");
                if observed.is_terminal() {
                    state.held_terminal = Some(observed);
                }
            }
            (JobStatus::Running, observed) if observed.is_terminal() => {
                Self::settle(id, slot, state, observed).await;
            }
            // Backends never move a job backwards.
            _ => {}
        }
        Ok(state.status)
    }

    async fn settle(id: JobId, slot: &JobSlot, state: &mut SlotState, terminal: JobStatus) {
        state.status = terminal;
        state.held_terminal = None;
        info!(job_id = %id, status = %terminal, "Job finished");
        if !state.released {
            state.released = true;
            slot.backend.release(&slot.handle).await;
        }
    }

    /// Polls with capped exponential backoff until the job is terminal or
    /// `timeout` expires, then returns the job's results. On expiry the job
    /// is asked to stop, its recorded status is left untouched and
    /// `WaitTimeout` is returned.
    pub async fn wait_for_completion(
        &self,
        handle: &JobHandle,
        timeout: WaitTimeout,
    ) -> Result<ExecutionResult> {
        let slot = self.slot(handle).await?;
        let started = Instant::now();
        // A bound past the clock's range never expires.
        let deadline = match timeout {
            WaitTimeout::After(limit) => started.checked_add(limit),
            WaitTimeout::Infinite => None,
        };
        let mut delay = self.backoff.initial;

        loop {
            let status = {
                let mut state = slot.state.lock().await;
                Self::refresh(handle.id(), &slot, &mut state).await?
            };
            if status.is_terminal() {
                return self.get_results(handle).await;
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let waited = now - started;
                        warn!(job_id = %handle.id(), waited = ?waited, "Wait timed out, cancelling job");
                        if let Err(e) = slot.backend.cancel(&slot.handle).await {
                            warn!(job_id = %handle.id(), error = %e, "Best-effort cancel failed");
                        }
                        return Err(OrchestratorError::WaitTimeout {
                            job: handle.id(),
                            waited,
                        });
                    }
                    delay.min(deadline - now)
                }
                None => delay,
            };
            tokio::time::sleep(pause).await;
            delay = self.backoff.next(delay);
        }
    }

    pub async fn get_results(&self, handle: &JobHandle) -> Result<ExecutionResult> {
        let slot = self.slot(handle).await?;
        let status = slot.state.lock().await.status;
        if !status.is_terminal() {
            return Err(OrchestratorError::JobNotFinished {
                job: handle.id(),
                status,
            });
        }

        let raw = slot.backend.fetch(&slot.handle).await?.settled(status);
        let mut result = normalizer::normalize(slot.backend.kind(), raw)?;
        if result.status != status {
            debug!(
                job_id = %handle.id(),
                reported = %result.status,
                recorded = %status,
                "Backend output disagrees with recorded status"
            );
            result.status = status;
        }
        Ok(result)
    }

    /// `false` when the job is already terminal; nothing changes then.
    pub async fn cancel_job(&self, handle: &JobHandle) -> Result<bool> {
        let slot = self.slot(handle).await?;
        let mut state = slot.state.lock().await;
        if state.status.is_terminal() {
            return Ok(false);
        }

        let cancelled = slot.backend.cancel(&slot.handle).await?;
        if cancelled {
            Self::settle(handle.id(), &slot, &mut state, JobStatus::Cancelled).await;
        }
        Ok(cancelled)
    }

    /// Forgets a terminal job. Its handle is unknown afterwards.
    pub async fn acknowledge(&self, handle: &JobHandle) -> Result<()> {
        let slot = self.slot(handle).await?;
        let status = slot.state.lock().await.status;
        if !status.is_terminal() {
            return Err(OrchestratorError::JobNotFinished {
                job: handle.id(),
                status,
            });
        }
        // Terminal statuses never change, so the check holds without the slot lock.
        self.jobs.write().await.remove(&handle.id());
        debug!(job_id = %handle.id(), "Job acknowledged");
        Ok(())
    }

    /// Recorded status of every tracked job, ordered by id.
    pub async fn tracked_jobs(&self) -> Vec<(JobHandle, JobStatus)> {
        let slots: Vec<(JobId, Arc<JobSlot>)> = self
            .jobs
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut jobs = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            jobs.push((JobHandle::new(id), slot.state.lock().await.status));
        }
        jobs.sort_by_key(|(handle, _)| handle.id());
        jobs
    }
}
