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

//! Background run of one local job: optional build step, bounded harness
//! execution, summary.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use super::output::{self, RunOutcome};
use super::process::SupervisedProcess;
use crate::core::constants::{engine, layout};
use crate::core::models::{JobId, JobSpec, JobStatus};
use crate::core::raw::RunSummary;
use crate::external::catalog::CheckoutCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Building,
    Running,
    Finished(JobStatus),
}

impl RunPhase {
    pub fn status(self) -> JobStatus {
        match self {
            RunPhase::Building | RunPhase::Running => JobStatus::Running,
            RunPhase::Finished(status) => status,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RunPhase::Finished(_))
    }
}

pub struct RunPlan {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub catalog: Arc<CheckoutCatalog>,
    pub prebuilt: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub kill_grace: Duration,
    pub build_timeout: Duration,
    pub helper_cmd: Vec<String>,
}

impl RunPlan {
    pub fn harness_args(&self) -> Vec<String> {
        let options = self.spec.options();
        let crashes_dir = self.output_dir.join(layout::CRASHES_DIR);
        let mut args = vec![
            format!("{}{}", engine::FLAG_MAX_TOTAL_TIME, self.spec.duration_secs()),
            format!("{}{}/", engine::FLAG_ARTIFACT_PREFIX, crashes_dir.display()),
        ];
        if let Some(mb) = options.max_memory_mb {
            args.push(format!("{}{}", engine::FLAG_RSS_LIMIT_MB, mb));
        }
        args.extend(options.extra_args.iter().cloned());
        if let Some(corpus) = &options.corpus_dir {
            args.push(corpus.display().to_string());
        }
        args
    }

    pub fn build_args(&self) -> Vec<String> {
        let options = self.spec.options();
        let mut args: Vec<String> = self.helper_cmd.iter().skip(1).cloned().collect();
        args.extend([
            "build_fuzzers".to_string(),
            "--sanitizer".to_string(),
            options.sanitizer.clone(),
            "--architecture".to_string(),
            options.architecture.clone(),
            "--engine".to_string(),
            engine::ENGINE_NAME.to_string(),
            self.spec.project().to_string(),
        ]);
        args
    }
}

/// Drives the job to completion. `summary.json` is always written before the
/// terminal phase is published.
pub async fn drive(
    plan: RunPlan,
    mut cancel_rx: oneshot::Receiver<()>,
    phase: watch::Sender<RunPhase>,
) {
    let started_at = Utc::now();
    let clock = Instant::now();

    let outcome = execute(&plan, &mut cancel_rx, &phase).await;
    let elapsed = clock.elapsed();
    // Late cancellations must see the run as gone.
    drop(cancel_rx);

    let facts = output::read_log_facts(&plan.output_dir).await;
    let artifacts = output::scan_artifacts(&plan.output_dir)
        .await
        .unwrap_or_else(|e| {
            warn!(job_id = %plan.job_id, error = %e, "Failed to scan crash artifacts");
            Vec::new()
        });
    let (status, diagnostic, exit_code, signal) =
        output::classify(&outcome, &facts, &artifacts, plan.spec.duration_secs());

    match &diagnostic {
        None => info!(job_id = %plan.job_id, elapsed = ?elapsed, "Local run completed"),
        Some(d) => warn!(
            job_id = %plan.job_id,
            status = %status,
            kind = ?d.kind,
            "Local run ended: {}",
            d.message
        ),
    }

    let summary = RunSummary {
        job_id: plan.job_id,
        project: plan.spec.project().to_string(),
        fuzz_target: plan.spec.fuzz_target().to_string(),
        status,
        exit_code,
        signal,
        executions: facts.executions,
        elapsed_secs: elapsed.as_secs_f64(),
        started_at,
        finished_at: Utc::now(),
        diagnostic,
    };
    if let Err(e) = output::write_summary(&plan.output_dir, &summary).await {
        error!(job_id = %plan.job_id, error = %e, "Failed to write run summary");
    }

    phase.send_replace(RunPhase::Finished(status));
}

async fn execute(
    plan: &RunPlan,
    cancel_rx: &mut oneshot::Receiver<()>,
    phase: &watch::Sender<RunPhase>,
) -> RunOutcome {
    let binary = match &plan.prebuilt {
        Some(path) => {
            debug!(job_id = %plan.job_id, binary = %path.display(), "Reusing prebuilt fuzz target");
            path.clone()
        }
        None => {
            phase.send_replace(RunPhase::Building);
            // Dropping the build future kills the helper.
            tokio::select! {
                built = build(plan) => match built {
                    Ok(path) => path,
                    Err(outcome) => return outcome,
                },
                _ = &mut *cancel_rx => return RunOutcome::Cancelled,
            }
        }
    };

    if let Some(corpus) = &plan.spec.options().corpus_dir {
        if let Err(e) = tokio::fs::create_dir_all(corpus).await {
            return RunOutcome::SetupFailed(format!(
                "cannot create corpus directory {}: {}",
                corpus.display(),
                e
            ));
        }
    }

    phase.send_replace(RunPhase::Running);
    let log_path = plan.output_dir.join(layout::FUZZ_LOG);
    let mut process = match SupervisedProcess::spawn(
        &binary,
        &plan.harness_args(),
        &plan.spec.options().env,
        &plan.output_dir,
        &log_path,
    ) {
        Ok(process) => process,
        Err(e) => {
            return RunOutcome::SetupFailed(format!(
                "failed to launch {}: {}",
                binary.display(),
                e
            ))
        }
    };
    info!(
        job_id = %plan.job_id,
        pid = ?process.pid(),
        target = %plan.spec.fuzz_target(),
        "Harness started"
    );

    let hard_bound = plan.spec.duration().saturating_add(plan.kill_grace);
    tokio::select! {
        status = process.wait() => match status {
            Ok(status) => RunOutcome::Exited(status),
            Err(e) => RunOutcome::SetupFailed(format!("lost track of harness: {}", e)),
        },
        _ = tokio::time::sleep(hard_bound) => {
            warn!(job_id = %plan.job_id, bound = ?hard_bound, "Harness overran its bound, terminating");
            process.terminate(plan.kill_grace).await;
            RunOutcome::TimedOut
        }
        _ = &mut *cancel_rx => {
            info!(job_id = %plan.job_id, "Terminating harness on request");
            process.terminate(plan.kill_grace).await;
            RunOutcome::Cancelled
        }
    }
}

async fn build(plan: &RunPlan) -> Result<PathBuf, RunOutcome> {
    let Some(program) = plan.helper_cmd.first() else {
        return Err(RunOutcome::SetupFailed("empty build helper command".to_string()));
    };
    let log_path = plan.output_dir.join(layout::BUILD_LOG);
    info!(
        job_id = %plan.job_id,
        project = %plan.spec.project(),
        sanitizer = %plan.spec.options().sanitizer,
        "Building fuzz targets"
    );

    let mut process = SupervisedProcess::spawn(
        Path::new(program),
        &plan.build_args(),
        &BTreeMap::new(),
        plan.catalog.root(),
        &log_path,
    )
    .map_err(|e| {
        RunOutcome::BuildFailed(format!("failed to start build helper '{}': {}", program, e))
    })?;

    let status = match tokio::time::timeout(plan.build_timeout, process.wait()).await {
        Ok(waited) => {
            waited.map_err(|e| RunOutcome::BuildFailed(format!("build helper lost: {}", e)))?
        }
        Err(_) => {
            warn!(
                job_id = %plan.job_id,
                bound = ?plan.build_timeout,
                "Build step overran its bound, terminating"
            );
            process.terminate(plan.kill_grace).await;
            return Err(RunOutcome::BuildFailed(format!(
                "build_fuzzers did not finish within {:?}, see {}",
                plan.build_timeout,
                log_path.display()
            )));
        }
    };
    if !status.success() {
        return Err(RunOutcome::BuildFailed(format!(
            "build_fuzzers failed ({}), see {}",
            status,
            log_path.display()
        )));
    }

    plan.catalog
        .prebuilt_target(plan.spec.project(), plan.spec.fuzz_target())
        .ok_or_else(|| {
            RunOutcome::BuildFailed(format!(
                "build finished but {} was not produced in {}",
                plan.spec.fuzz_target(),
                plan.catalog.build_out_dir(plan.spec.project()).display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::EngineOptions;

    fn plan(options: EngineOptions) -> RunPlan {
        let spec = JobSpec::new("curl", "curl_fuzzer", Duration::from_secs(30))
            .unwrap()
            .with_options(options)
            .unwrap();
        RunPlan {
            job_id: JobId::new(),
            spec,
            catalog: Arc::new(CheckoutCatalog::new("/src/oss-fuzz")),
            prebuilt: None,
            output_dir: PathBuf::from("/tmp/jobs/abc"),
            kill_grace: Duration::from_secs(5),
            build_timeout: Duration::from_secs(600),
            helper_cmd: vec!["python3".to_string(), "infra/helper.py".to_string()],
        }
    }

    #[test]
    fn test_harness_args_order() {
        let plan = plan(EngineOptions {
            max_memory_mb: Some(2048),
            extra_args: vec!["-dict=curl.dict".to_string()],
            corpus_dir: Some(PathBuf::from("/corpus")),
            ..EngineOptions::default()
        });
        assert_eq!(
            plan.harness_args(),
            vec![
                "-max_total_time=30",
                "-artifact_prefix=/tmp/jobs/abc/crashes/",
                "-rss_limit_mb=2048",
                "-dict=curl.dict",
                "/corpus",
            ]
        );
    }

    #[test]
    fn test_build_args_follow_helper_prefix() {
        let plan = plan(EngineOptions {
            sanitizer: "undefined".to_string(),
            ..EngineOptions::default()
        });
        assert_eq!(
            plan.build_args(),
            vec![
                "infra/helper.py",
                "build_fuzzers",
                "--sanitizer",
                "undefined",
                "--architecture",
                "x86_64",
                "--engine",
                "libfuzzer",
                "curl",
            ]
        );
    }

    #[test]
    fn test_phase_status() {
        assert_eq!(RunPhase::Building.status(), JobStatus::Running);
        assert_eq!(
            RunPhase::Finished(JobStatus::Failed).status(),
            JobStatus::Failed
        );
        assert!(!RunPhase::Running.is_finished());
    }
}
