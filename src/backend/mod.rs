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

//! Execution backends.
//!
//! `ExecutionBackend` is the capability every backend provides. `Backend`
//! holds the variant chosen for a job and forwards calls with a static enum
//! match, pairing each backend with its own per-job handle type.

pub mod local;
pub mod remote;
pub mod selector;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

use crate::core::errors::{OrchestratorError, Result};
use crate::core::models::{BackendKind, JobId, JobSpec, JobStatus};
use crate::core::raw::RawOutput;
use self::local::{LocalBackend, LocalJob};
use self::remote::{RemoteBackend, RemoteJob};

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend-owned per-job state.
    type Handle: Send + Sync;

    fn kind(&self) -> BackendKind;

    /// Starts the job and returns without waiting for it.
    async fn submit(&self, job_id: JobId, spec: &JobSpec) -> Result<Self::Handle>;

    /// Non-blocking status check.
    async fn poll(&self, handle: &Self::Handle) -> Result<JobStatus>;

    /// Raw output of a terminal job.
    async fn fetch(&self, handle: &Self::Handle) -> Result<RawOutput>;

    /// `true` only when a live job was told to stop.
    async fn cancel(&self, handle: &Self::Handle) -> Result<bool>;

    /// Frees execution resources. Called once per job.
    async fn release(&self, handle: &Self::Handle);
}

#[derive(Clone)]
pub enum Backend {
    Local(Arc<LocalBackend>),
    Remote(Arc<RemoteBackend>),
}

pub enum BackendHandle {
    Local(LocalJob),
    Remote(RemoteJob),
}

impl BackendHandle {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::Remote(_) => BackendKind::Remote,
        }
    }
}

impl Backend {
    fn mismatch(&self, handle: &BackendHandle) -> OrchestratorError {
        error!(backend = %self.kind(), handle = %handle.kind(), "Job handle routed to the wrong backend");
        OrchestratorError::backend_unavailable(
            self.kind().to_string(),
            format!("handle belongs to the {} backend", handle.kind()),
        )
    }
}

#[async_trait]
impl ExecutionBackend for Backend {
    type Handle = BackendHandle;

    fn kind(&self) -> BackendKind {
        match self {
            Self::Local(b) => b.kind(),
            Self::Remote(b) => b.kind(),
        }
    }

    async fn submit(&self, job_id: JobId, spec: &JobSpec) -> Result<BackendHandle> {
        match self {
            Self::Local(b) => b.submit(job_id, spec).await.map(BackendHandle::Local),
            Self::Remote(b) => b.submit(job_id, spec).await.map(BackendHandle::Remote),
        }
    }

    async fn poll(&self, handle: &BackendHandle) -> Result<JobStatus> {
        match (self, handle) {
            (Self::Local(b), BackendHandle::Local(h)) => b.poll(h).await,
            (Self::Remote(b), BackendHandle::Remote(h)) => b.poll(h).await,
            _ => Err(self.mismatch(handle)),
        }
    }

    async fn fetch(&self, handle: &BackendHandle) -> Result<RawOutput> {
        match (self, handle) {
            (Self::Local(b), BackendHandle::Local(h)) => b.fetch(h).await,
            (Self::Remote(b), BackendHandle::Remote(h)) => b.fetch(h).await,
            _ => Err(self.mismatch(handle)),
        }
    }

    async fn cancel(&self, handle: &BackendHandle) -> Result<bool> {
        match (self, handle) {
            (Self::Local(b), BackendHandle::Local(h)) => b.cancel(h).await,
            (Self::Remote(b), BackendHandle::Remote(h)) => b.cancel(h).await,
            _ => Err(self.mismatch(handle)),
        }
    }

    async fn release(&self, handle: &BackendHandle) {
        match (self, handle) {
            (Self::Local(b), BackendHandle::Local(h)) => b.release(h).await,
            (Self::Remote(b), BackendHandle::Remote(h)) => b.release(h).await,
            _ => {
                self.mismatch(handle);
            }
        }
    }
}
