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

//! Per-job output directory: fuzz log facts, crash artifacts, `summary.json`.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::LazyLock;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use super::process::exit_parts;
use crate::core::constants::{engine, layout, limits};
use crate::core::errors::{OrchestratorError, Result};
use crate::core::models::{Diagnostic, DiagnosticKind, JobStatus};
use crate::core::raw::{CrashArtifact, LocalRawOutput, RunSummary};

static STAT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#(\d+)\s").expect("static pattern"));
static DONE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Done (\d+) runs in").expect("static pattern"));
static SANITIZER_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SUMMARY:\s+\w+:\s+([A-Za-z-]+(?: signal)?)").expect("static pattern")
});
static SHA1_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("static pattern"));

/// How the background run ended, before classification.
#[derive(Debug)]
pub enum RunOutcome {
    BuildFailed(String),
    SetupFailed(String),
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Facts scraped from the tail of `fuzz.log`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogFacts {
    pub executions: Option<u64>,
    pub sanitizer_summary: Option<String>,
    pub error_reported: bool,
}

impl LogFacts {
    pub fn parse(log: &str) -> Self {
        let stats = STAT_LINE
            .captures_iter(log)
            .filter_map(|c| c[1].parse::<u64>().ok());
        let done = DONE_LINE
            .captures_iter(log)
            .filter_map(|c| c[1].parse::<u64>().ok());
        let executions = stats.chain(done).max();

        let sanitizer_summary = SANITIZER_SUMMARY
            .captures_iter(log)
            .last()
            .map(|c| c[1].replace(' ', "-"));

        let error_reported = log
            .lines()
            .any(|line| line.contains("==ERROR: ") || line.contains("ERROR: libFuzzer:"));

        Self {
            executions,
            sanitizer_summary,
            error_reported,
        }
    }
}

pub async fn read_log_facts(output_dir: &Path) -> LogFacts {
    let path = output_dir.join(layout::FUZZ_LOG);
    match read_tail(&path, limits::MAX_LOG_TAIL_BYTES).await {
        Ok(tail) => LogFacts::parse(&tail),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No fuzz log to parse");
            LogFacts::default()
        }
    }
}

async fn read_tail(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    if len > max_bytes {
        file.seek(SeekFrom::Start(len - max_bytes)).await?;
    }
    let mut buf = Vec::with_capacity(len.min(max_bytes) as usize);
    file.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Reproducers under `crashes/`, oldest first.
pub async fn scan_artifacts(output_dir: &Path) -> std::io::Result<Vec<CrashArtifact>> {
    let crashes_dir = output_dir.join(layout::CRASHES_DIR);
    let mut entries = match tokio::fs::read_dir(&crashes_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(std::time::UNIX_EPOCH);
        found.push((modified, entry.path()));
    }
    found.sort();

    let mut artifacts = Vec::with_capacity(found.len());
    for (_, path) in found {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let (kind, suffix) = split_artifact_name(&name);
        let dedup_hash = match suffix {
            Some(hash) => hash.to_string(),
            None => hash_file(&path).await?,
        };
        artifacts.push(CrashArtifact {
            path,
            kind: kind.to_string(),
            dedup_hash,
        });
    }
    Ok(artifacts)
}

/// Splits `crash-<sha1>` into its kind and hash. Unrecognised names keep the
/// generic `crash` kind and no hash.
fn split_artifact_name(name: &str) -> (&str, Option<&str>) {
    for kind in engine::ARTIFACT_KINDS {
        if let Some(rest) = name.strip_prefix(kind).and_then(|r| r.strip_prefix('-')) {
            let hash = SHA1_HEX.is_match(rest).then_some(rest);
            return (kind, hash);
        }
    }
    ("crash", None)
}

async fn hash_file(path: &Path) -> std::io::Result<String> {
    let data = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Terminal status, diagnostic, exit code and signal for a finished run.
pub fn classify(
    outcome: &RunOutcome,
    facts: &LogFacts,
    artifacts: &[CrashArtifact],
    duration_secs: u64,
) -> (JobStatus, Option<Diagnostic>, Option<i32>, Option<i32>) {
    match outcome {
        RunOutcome::BuildFailed(msg) => (
            JobStatus::Failed,
            Some(Diagnostic::new(DiagnosticKind::BuildFailure, msg.clone())),
            None,
            None,
        ),
        RunOutcome::SetupFailed(msg) => (
            JobStatus::Failed,
            Some(Diagnostic::new(DiagnosticKind::SetupFailure, msg.clone())),
            None,
            None,
        ),
        RunOutcome::TimedOut => (
            JobStatus::TimedOut,
            Some(Diagnostic::new(
                DiagnosticKind::TimedOut,
                format!(
                    "harness exceeded its {}s bound and was terminated",
                    duration_secs
                ),
            )),
            None,
            None,
        ),
        RunOutcome::Cancelled => (
            JobStatus::Cancelled,
            Some(Diagnostic::new(
                DiagnosticKind::Cancelled,
                "run cancelled on request",
            )),
            None,
            None,
        ),
        RunOutcome::Exited(status) => {
            let (code, signal) = exit_parts(status);
            if status.success() {
                return (JobStatus::Completed, None, code, signal);
            }
            let crashed = !artifacts.is_empty() || facts.error_reported || signal.is_some();
            let diagnostic = if crashed {
                let what = match (&facts.sanitizer_summary, signal) {
                    (Some(summary), _) => summary.clone(),
                    (None, Some(sig)) => format!("signal {}", sig),
                    (None, None) => format!("{} crash artifact(s)", artifacts.len()),
                };
                Diagnostic::new(
                    DiagnosticKind::HarnessCrash,
                    format!("harness crashed: {}", what),
                )
            } else {
                Diagnostic::new(
                    DiagnosticKind::NonZeroExit,
                    format!("harness exited with code {}", code.unwrap_or(-1)),
                )
            };
            (JobStatus::Failed, Some(diagnostic), code, signal)
        }
    }
}

pub async fn write_summary(output_dir: &Path, summary: &RunSummary) -> std::io::Result<()> {
    let data = serde_json::to_vec_pretty(summary)?;
    let path = output_dir.join(layout::SUMMARY_FILE);
    let tmp = output_dir.join(format!("{}.tmp", layout::SUMMARY_FILE));
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, &path).await
}

pub async fn read_summary(output_dir: &Path) -> Result<RunSummary> {
    let path = output_dir.join(layout::SUMMARY_FILE);
    let data = tokio::fs::read(&path).await.map_err(|e| {
        OrchestratorError::ResultsUnavailable(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&data).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Corrupt run summary");
        OrchestratorError::ResultsUnavailable(format!("corrupt {}: {}", path.display(), e))
    })
}

/// Everything `fetch` hands to the normalizer for a finished local job.
pub async fn collect(output_dir: &Path) -> Result<LocalRawOutput> {
    let summary = read_summary(output_dir).await?;
    let artifacts = scan_artifacts(output_dir).await.map_err(|e| {
        OrchestratorError::ResultsUnavailable(format!(
            "cannot read crash artifacts in {}: {}",
            output_dir.display(),
            e
        ))
    })?;
    let facts = read_log_facts(output_dir).await;
    Ok(LocalRawOutput {
        output_dir: output_dir.to_path_buf(),
        summary,
        artifacts,
        sanitizer_summary: facts.sanitizer_summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRASH_LOG: &str = "\
INFO: Seed: 1234
#2\tINITED cov: 10 ft: 11 corp: 1/1b exec/s: 0 rss: 30Mb
#1024\tpulse  cov: 40 ft: 60 corp: 5/20b exec/s: 512 rss: 31Mb
==42==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x602000000011
SUMMARY: AddressSanitizer: heap-buffer-overflow /src/curl/lib/url.c:12 in parse_url
MS: 1 ChangeByte-; base unit: 0000
";

    #[test]
    fn test_log_facts_from_crash_log() {
        let facts = LogFacts::parse(CRASH_LOG);
        assert_eq!(facts.executions, Some(1024));
        assert_eq!(facts.sanitizer_summary.as_deref(), Some("heap-buffer-overflow"));
        assert!(facts.error_reported);
    }

    #[test]
    fn test_log_facts_done_line_and_deadly_signal() {
        let facts = LogFacts::parse("#10 pulse\nSUMMARY: libFuzzer: deadly signal\nDone 5000 runs in 3 second(s)\n");
        assert_eq!(facts.executions, Some(5000));
        assert_eq!(facts.sanitizer_summary.as_deref(), Some("deadly-signal"));
    }

    #[test]
    fn test_log_facts_absent_counts_stay_none() {
        let facts = LogFacts::parse("INFO: Running with entropic power schedule\n");
        assert_eq!(facts, LogFacts::default());
    }

    #[test]
    fn test_split_artifact_name() {
        let sha = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        let name = format!("slow-unit-{}", sha);
        assert_eq!(split_artifact_name(&name), ("slow-unit", Some(sha)));
        assert_eq!(split_artifact_name("leak-xyz"), ("leak", None));
        assert_eq!(split_artifact_name("reproducer.bin"), ("crash", None));
    }

    #[tokio::test]
    async fn test_scan_artifacts_hashes_unnamed_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let crashes = dir.path().join(layout::CRASHES_DIR);
        std::fs::create_dir(&crashes).unwrap();
        std::fs::write(crashes.join("input.bin"), b"boom").unwrap();

        let artifacts = scan_artifacts(dir.path()).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, "crash");
        assert_eq!(artifacts[0].dedup_hash, hex::encode(Sha256::digest(b"boom")));
    }

    #[tokio::test]
    async fn test_scan_artifacts_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_artifacts(dir.path()).await.unwrap().is_empty());
    }

    #[test]
    fn test_classify_fixed_outcomes() {
        let facts = LogFacts::default();
        let (status, diag, _, _) =
            classify(&RunOutcome::BuildFailed("exit 1".into()), &facts, &[], 5);
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(diag.unwrap().kind, DiagnosticKind::BuildFailure);

        let (status, diag, _, _) = classify(&RunOutcome::TimedOut, &facts, &[], 5);
        assert_eq!(status, JobStatus::TimedOut);
        assert_eq!(diag.unwrap().kind, DiagnosticKind::TimedOut);

        let (status, _, _, _) = classify(&RunOutcome::Cancelled, &facts, &[], 5);
        assert_eq!(status, JobStatus::Cancelled);
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn test_classify_exit_statuses() {
        use std::os::unix::process::ExitStatusExt;

        let clean = ExitStatus::from_raw(0);
        let (status, diag, code, _) =
            classify(&RunOutcome::Exited(clean), &LogFacts::default(), &[], 5);
        assert_eq!(status, JobStatus::Completed);
        assert!(diag.is_none());
        assert_eq!(code, Some(0));

        let exit_one = ExitStatus::from_raw(1 << 8);
        let (status, diag, _, _) =
            classify(&RunOutcome::Exited(exit_one), &LogFacts::default(), &[], 5);
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(diag.unwrap().kind, DiagnosticKind::NonZeroExit);

        let (_, diag, _, _) =
            classify(&RunOutcome::Exited(exit_one), &LogFacts::parse(CRASH_LOG), &[], 5);
        let diag = diag.unwrap();
        assert_eq!(diag.kind, DiagnosticKind::HarnessCrash);
        assert!(diag.message.contains("heap-buffer-overflow"));

        let segv = ExitStatus::from_raw(libc::SIGSEGV);
        let (status, diag, code, signal) =
            classify(&RunOutcome::Exited(segv), &LogFacts::default(), &[], 5);
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(diag.unwrap().kind, DiagnosticKind::HarnessCrash);
        assert_eq!(code, None);
        assert_eq!(signal, Some(libc::SIGSEGV));
    }
}
