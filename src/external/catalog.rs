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

//! Project metadata read from a local OSS-Fuzz checkout.
//!
//! Fuzz targets are discovered from the project's `build.sh` and from any
//! prebuilt binaries under `build/out/<project>/`. When neither yields a
//! target the conventional `<project>_fuzzer` name is reported and flagged
//! as inferred.

use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::core::constants::checkout;
use crate::core::errors::{OrchestratorError, Result};

static OUT_TARGET: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"-o\s+"?\$\{?OUT\}?/([\w-]+)"#).expect("static pattern")
});
static COPY_TARGET: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"^\s*cp\s+\S+\s+"?\$\{?OUT\}?/([\w-]+)"?\s*$"#).expect("static pattern")
});
static GO_TARGET: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"compile_go_fuzzer\s+\S+\s+\S+\s+([\w-]+)").expect("static pattern")
});

/// Metadata reader consulted before a job is submitted.
pub trait ProjectCatalog: Send + Sync {
    /// `Ok(None)` when the project does not exist.
    fn project_details(&self, name: &str) -> Result<Option<ProjectDetails>>;
}

/// Runs `lookup` against the catalog on the blocking pool. Checkouts are read
/// with `std::fs`.
pub async fn lookup_blocking<C, T, F>(catalog: &Arc<C>, lookup: F) -> Result<T>
where
    C: ProjectCatalog + ?Sized + 'static,
    T: Send + 'static,
    F: FnOnce(&C) -> Result<T> + Send + 'static,
{
    let catalog = catalog.clone();
    tokio::task::spawn_blocking(move || lookup(&catalog))
        .await
        .map_err(|e| OrchestratorError::backend_unavailable("catalog", e))?
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDetails {
    pub name: String,
    pub path: PathBuf,
    pub language: Option<String>,
    pub main_repo: Option<String>,
    pub sanitizers: Vec<String>,
    pub fuzzing_engines: Vec<String>,
    pub architectures: Vec<String>,
    pub maintainers: Vec<String>,
    pub has_dockerfile: bool,
    pub has_build_script: bool,
    pub targets: Vec<String>,
    /// True when `targets` holds only the naming-convention fallback.
    pub targets_inferred: bool,
}

impl ProjectDetails {
    /// Whether `target` can be built or run for this project.
    pub fn accepts_target(&self, target: &str) -> bool {
        self.targets_inferred || self.targets.iter().any(|t| t == target)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProjectYaml {
    language: Option<String>,
    main_repo: Option<String>,
    #[serde(default)]
    sanitizers: Value,
    #[serde(default)]
    fuzzing_engines: Value,
    #[serde(default)]
    architectures: Value,
    #[serde(default)]
    auto_ccs: Value,
}

pub struct CheckoutCatalog {
    root: PathBuf,
}

impl CheckoutCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.root.join(checkout::PROJECTS_DIR).join(name)
    }

    /// Output directory of `helper.py build_fuzzers` for the project.
    pub fn build_out_dir(&self, project: &str) -> PathBuf {
        self.root.join(checkout::BUILD_OUT_DIR).join(project)
    }

    /// Path of an already-built fuzz target binary, if present.
    pub fn prebuilt_target(&self, project: &str, target: &str) -> Option<PathBuf> {
        let path = self.build_out_dir(project).join(target);
        is_executable(&path).then_some(path)
    }

    pub fn list_projects(&self) -> Result<Vec<String>> {
        let projects_dir = self.root.join(checkout::PROJECTS_DIR);
        let entries = fs::read_dir(&projects_dir).map_err(|e| {
            OrchestratorError::Configuration(format!(
                "cannot read {}: {}",
                projects_dir.display(),
                e
            ))
        })?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    fn read_project_yaml(&self, dir: &Path, name: &str) -> ProjectYaml {
        let path = dir.join(checkout::PROJECT_YAML);
        let Ok(content) = fs::read_to_string(&path) else {
            debug!(project = %name, "no project.yaml");
            return ProjectYaml::default();
        };
        serde_yaml_ng::from_str(&content).unwrap_or_else(|e| {
            warn!(project = %name, error = %e, "Failed to parse project.yaml");
            ProjectYaml::default()
        })
    }

    fn discover_targets(&self, dir: &Path, name: &str) -> Vec<String> {
        let mut targets = Vec::new();
        if let Ok(script) = fs::read_to_string(dir.join(checkout::BUILD_SCRIPT)) {
            for target in targets_from_build_script(&script) {
                push_unique(&mut targets, target);
            }
        }
        if let Ok(entries) = fs::read_dir(self.build_out_dir(name)) {
            let mut prebuilt: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_none() && is_executable(path))
                .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
                .collect();
            prebuilt.sort();
            for target in prebuilt {
                push_unique(&mut targets, target);
            }
        }
        targets
    }
}

impl ProjectCatalog for CheckoutCatalog {
    fn project_details(&self, name: &str) -> Result<Option<ProjectDetails>> {
        let dir = self.project_dir(name);
        if !dir.is_dir() {
            return Ok(None);
        }

        let yaml = self.read_project_yaml(&dir, name);
        let mut targets = self.discover_targets(&dir, name);
        let targets_inferred = targets.is_empty();
        if targets_inferred {
            targets.push(format!("{}{}", name, checkout::FALLBACK_TARGET_SUFFIX));
        }

        Ok(Some(ProjectDetails {
            name: name.to_string(),
            has_dockerfile: dir.join(checkout::DOCKERFILE).is_file(),
            has_build_script: dir.join(checkout::BUILD_SCRIPT).is_file(),
            path: dir,
            language: yaml.language,
            main_repo: yaml.main_repo,
            sanitizers: yaml_names(&yaml.sanitizers),
            fuzzing_engines: yaml_names(&yaml.fuzzing_engines),
            architectures: yaml_names(&yaml.architectures),
            maintainers: yaml_names(&yaml.auto_ccs),
            targets,
            targets_inferred,
        }))
    }
}

/// Target names a build script writes into `$OUT`, in order of appearance.
pub fn targets_from_build_script(script: &str) -> Vec<String> {
    let mut targets = Vec::new();
    for line in script.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.contains("LIB_FUZZING_ENGINE") {
            for cap in OUT_TARGET.captures_iter(line) {
                push_unique(&mut targets, cap[1].to_string());
            }
        }
        if let Some(cap) = COPY_TARGET.captures(line) {
            push_unique(&mut targets, cap[1].to_string());
        }
        if let Some(cap) = GO_TARGET.captures(line) {
            push_unique(&mut targets, cap[1].to_string());
        }
    }
    targets
}

/// Flattens YAML entries that are either plain names or single-key maps
/// (`- memory: {experimental: true}`), or a lone string.
fn yaml_names(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Sequence(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Mapping(map) => map
                    .iter()
                    .next()
                    .and_then(|(k, _)| k.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn push_unique(targets: &mut Vec<String>, target: String) {
    if !targets.contains(&target) {
        targets.push(target);
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
