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

// Command line driver for ossfuzz-jobs
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use ossfuzz_jobs::external::catalog::{CheckoutCatalog, ProjectCatalog};
use ossfuzz_jobs::{
    BackendPreference, Config, EngineOptions, JobManager, JobSpec, JobStatus, OrchestratorError,
    WaitTimeout,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a fuzz job, wait for it and print its result as JSON
    Run(RunArgs),
    /// Print OSS-Fuzz project metadata, or list projects when no name is given
    Project {
        name: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// OSS-Fuzz project name (e.g. "curl")
    project: String,

    /// Fuzz target built by the project (e.g. "curl_fuzzer")
    target: String,

    /// Duration bound in seconds
    #[arg(short, long, default_value_t = 60)]
    duration: u64,

    /// auto, local or remote
    #[arg(short, long)]
    backend: Option<BackendPreference>,

    #[arg(long, default_value = "address")]
    sanitizer: String,

    #[arg(long, default_value = "x86_64")]
    architecture: String,

    /// Corpus directory passed to the harness
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// RSS limit for the harness in MB
    #[arg(long)]
    max_memory_mb: Option<u64>,

    /// Harness environment, KEY=VALUE
    #[arg(long = "env", value_parser = parse_key_val)]
    env: Vec<(String, String)>,

    /// Seconds to wait for the job, or "infinite"
    #[arg(long, value_parser = parse_wait_timeout)]
    wait_timeout: WaitTimeout,

    /// Extra engine arguments
    #[arg(last = true)]
    engine_args: Vec<String>,
}

fn parse_wait_timeout(s: &str) -> Result<WaitTimeout, String> {
    if s.eq_ignore_ascii_case("infinite") {
        return Ok(WaitTimeout::Infinite);
    }
    s.parse::<u64>()
        .map(|secs| WaitTimeout::After(Duration::from_secs(secs)))
        .map_err(|_| format!("expected seconds or 'infinite', got '{}'", s))
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    install_panic_hook();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to init tracing: {}", e);
    }

    let result = match cli.command {
        Command::Run(args) => run(&config, args).await,
        Command::Project { name } => project(&config, name.as_deref()),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<OrchestratorError>()
                .map(OrchestratorError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(config: &Config, args: RunArgs) -> anyhow::Result<i32> {
    let options = EngineOptions {
        sanitizer: args.sanitizer,
        architecture: args.architecture,
        corpus_dir: args.corpus,
        max_memory_mb: args.max_memory_mb,
        env: args.env.into_iter().collect::<BTreeMap<_, _>>(),
        extra_args: args.engine_args,
    };
    let spec = JobSpec::new(args.project, args.target, Duration::from_secs(args.duration))?
        .with_backend(args.backend.unwrap_or(config.default_backend))
        .with_options(options)?;

    let manager = JobManager::from_config(config)?;
    let handle = manager.submit_job(spec).await?;
    info!(job_id = %handle, "Waiting for job");

    let result = tokio::select! {
        result = manager.wait_for_completion(&handle, args.wait_timeout) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %handle, "Interrupted, cancelling job");
            manager.cancel_job(&handle).await?;
            let wind_down = WaitTimeout::After(config.kill_grace.saturating_mul(2));
            manager.wait_for_completion(&handle, wind_down).await?
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );
    Ok(if result.status == JobStatus::Completed { 0 } else { 1 })
}

fn project(config: &Config, name: Option<&str>) -> anyhow::Result<i32> {
    let dir = config.oss_fuzz_dir.as_ref().ok_or_else(|| {
        OrchestratorError::Configuration(
            "no OSS-Fuzz checkout found; set OSS_FUZZ_DIR".to_string(),
        )
    })?;
    let catalog = CheckoutCatalog::new(dir);

    match name {
        Some(name) => {
            let details = catalog.project_details(name)?.ok_or_else(|| {
                OrchestratorError::Validation(format!("unknown project '{}'", name))
            })?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        None => {
            for project in catalog.list_projects()? {
                println!("{}", project);
            }
        }
    }
    Ok(0)
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC: {} at {}", message, location);
    }));
}

fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("ossfuzz_jobs=info,warn"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
