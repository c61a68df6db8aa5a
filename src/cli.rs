use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{HarnessBuilder, HarnessConfig};
use crate::matrix::{parse_versions, CompatibilityMatrix};
use crate::scenario::{ScenarioResult, ScenarioRunner};
use crate::sdk::{ReferenceSdk, SdkFactory};
use crate::snapshot::{parse_file_name, SnapshotCodec};

#[derive(Parser, Debug)]
#[command(
    name = "tkeycompat",
    version,
    about = "Capture and replay threshold-key metadata snapshots across SDK versions",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Snapshot root (overrides MOCKS_DIR)
    #[arg(long, global = true)]
    mocks_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Run every scenario on a fresh store and save snapshots.
    Capture {
        /// Version tag of the snapshots (overrides TKEY_VERSION)
        #[arg(long)]
        version: Option<String>,
        /// Only these scenarios (repeatable)
        #[arg(long = "scenario")]
        scenarios: Vec<String>,
    },
    /// Replay all matching snapshots of the listed versions.
    Replay {
        /// Versions file (overrides VERSIONS_FILE)
        #[arg(long)]
        versions_file: Option<PathBuf>,
        /// Comma-separated versions instead of the versions file
        #[arg(long)]
        versions: Option<String>,
    },
    /// Show which snapshot is replayed by which scenario.
    Plan {
        #[arg(long)]
        versions_file: Option<PathBuf>,
        #[arg(long)]
        versions: Option<String>,
    },
    /// Print the contents of a snapshot file.
    Inspect {
        path: PathBuf,
        /// Print full records instead of a summary
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// List registered scenarios and their replay cases.
    Scenarios,
    /// Capture when BUILD_MOCKS is set, replay otherwise.
    Run,
}

/// Returns Ok(false) when the run completed but some scenario case failed.
pub fn run() -> Result<bool> {
    let cli = Cli::parse();
    let mut builder = HarnessBuilder::new();
    if let Some(dir) = cli.mocks_dir {
        builder = builder.mocks_dir(dir);
    }
    let cfg = builder.build();

    match cli.cmd {
        Cmd::Capture { version, scenarios } => {
            let version = version.or_else(|| cfg.sdk_version.clone());
            let cfg = cfg.with_sdk_version(version);
            cmd_capture(&cfg, &scenarios)
        }
        Cmd::Replay {
            versions_file,
            versions,
        } => {
            let m = matrix_for(&cfg, versions_file, versions)?;
            cmd_replay(&cfg, &m)
        }
        Cmd::Plan {
            versions_file,
            versions,
        } => {
            let m = matrix_for(&cfg, versions_file, versions)?;
            cmd_plan(&cfg, &m)?;
            Ok(true)
        }
        Cmd::Inspect { path, full } => {
            cmd_inspect(&path, full)?;
            Ok(true)
        }
        Cmd::Scenarios => {
            cmd_scenarios(&cfg)?;
            Ok(true)
        }
        Cmd::Run => {
            info!("{}", cfg);
            if cfg.build_mocks {
                cmd_capture(&cfg, &[])
            } else {
                let m = matrix_for(&cfg, None, None)?;
                cmd_replay(&cfg, &m)
            }
        }
    }
}

fn runner_for(cfg: &HarnessConfig) -> Result<ScenarioRunner> {
    cfg.validate()?;
    let factory: Arc<dyn SdkFactory> = match &cfg.sdk_version {
        Some(v) => Arc::new(ReferenceSdk::with_version(v.clone())),
        None => Arc::new(ReferenceSdk::new()),
    };
    Ok(ScenarioRunner::new(factory, cfg.service_provider()?))
}

fn matrix_for(
    cfg: &HarnessConfig,
    versions_file: Option<PathBuf>,
    versions: Option<String>,
) -> Result<CompatibilityMatrix> {
    match versions {
        Some(list) => Ok(CompatibilityMatrix::new(
            SnapshotCodec::new(&cfg.mocks_dir),
            parse_versions(&list),
        )),
        None => {
            let file = versions_file.unwrap_or_else(|| cfg.versions_file.clone());
            CompatibilityMatrix::from_files(&cfg.mocks_dir, &file)
        }
    }
}

fn print_results(results: &[ScenarioResult]) -> bool {
    for r in results {
        println!("{}", r);
    }
    results.iter().all(|r| r.outcome.passed())
}

pub fn cmd_capture(cfg: &HarnessConfig, only: &[String]) -> Result<bool> {
    let runner = runner_for(cfg)?;
    let codec = SnapshotCodec::new(&cfg.mocks_dir);
    let results = if only.is_empty() {
        runner.capture_all(&codec)?
    } else {
        let mut out = Vec::new();
        for name in only {
            let s = runner
                .find(name)
                .with_context(|| format!("unknown scenario '{}'", name))?;
            out.push(runner.capture(s, &codec)?);
        }
        out
    };
    Ok(print_results(&results))
}

pub fn cmd_replay(cfg: &HarnessConfig, matrix: &CompatibilityMatrix) -> Result<bool> {
    let runner = runner_for(cfg)?;
    let report = matrix.run(&runner)?;
    let ok = print_results(&report.results);
    for s in &report.skipped {
        println!("skip {} (matches: {:?})", s.file.display(), s.matches);
    }
    println!(
        "{} passed, {} failed, {} snapshot(s) skipped",
        report.passed(),
        report.failed(),
        report.skipped.len()
    );
    Ok(ok)
}

pub fn cmd_plan(cfg: &HarnessConfig, matrix: &CompatibilityMatrix) -> Result<()> {
    let runner = runner_for(cfg)?;
    let plan = matrix.plan(&runner.names())?;
    println!("versions: {}", matrix.versions().join(", "));
    for item in &plan.scheduled {
        let cases = runner
            .find(&item.scenario)
            .map(|s| s.replay.len())
            .unwrap_or(0);
        println!(
            "  {:<10} {:<30} <- {} ({} case(s))",
            item.version,
            item.scenario,
            item.file.display(),
            cases
        );
    }
    for s in &plan.skipped {
        println!("  skipped {} (matches: {:?})", s.file.display(), s.matches);
    }
    Ok(())
}

pub fn cmd_inspect(path: &Path, full: bool) -> Result<()> {
    let snap = SnapshotCodec::load(path)?;
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match parse_file_name(base) {
        Some((version, title)) => println!("snapshot {} (version {}, title {})", base, version, title),
        None => println!("snapshot {}", path.display()),
    }
    println!("  dataMap    = {} record(s)", snap.data_map.len());
    for (id, rec) in &snap.data_map {
        if full {
            println!("    {} = {}", id, rec);
        } else {
            println!("    {} ({} bytes)", id, rec.len());
        }
    }
    println!("  localStore = {} entries", snap.local_store.len());
    for (k, v) in &snap.local_store {
        if full {
            println!("    {} = {}", k, v);
        } else {
            println!("    {}", k);
        }
    }
    Ok(())
}

pub fn cmd_scenarios(cfg: &HarnessConfig) -> Result<()> {
    let runner = runner_for(cfg)?;
    println!("sdk version {}", runner.version());
    for s in runner.scenarios() {
        println!("  {}", s.name);
        for c in &s.replay {
            println!("    - {}", c.name);
        }
    }
    Ok(())
}
