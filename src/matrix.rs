//! matrix — which snapshots get replayed by which scenario.
//!
//! For every version listed in the versions file, every `*.json` file of
//! `<mocks>/<version>/` is matched against the registered scenario names by
//! case-sensitive substring of the file's basename. A file matching exactly
//! one scenario is scheduled; zero or several matches are skipped (logged at
//! debug level). Discovery I/O errors abort the whole run.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scenario::{ScenarioResult, ScenarioRunner};
use crate::snapshot::{SnapshotCodec, SNAPSHOT_EXT};

/// Comma-separated version list; entries trimmed, empty entries ignored.
pub fn parse_versions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn read_versions(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read versions file {}", path.display()))?;
    Ok(parse_versions(&raw))
}

/// Registered names contained in `basename`.
pub fn match_scenarios<'a>(basename: &str, names: &[&'a str]) -> Vec<&'a str> {
    names
        .iter()
        .copied()
        .filter(|n| basename.contains(n))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledReplay {
    pub version: String,
    pub scenario: String,
    pub file: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedSnapshot {
    pub file: PathBuf,
    pub matches: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub scheduled: Vec<ScheduledReplay>,
    pub skipped: Vec<SkippedSnapshot>,
}

#[derive(Debug, Default)]
pub struct MatrixReport {
    pub results: Vec<ScenarioResult>,
    pub skipped: Vec<SkippedSnapshot>,
}

impl MatrixReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

#[derive(Clone, Debug)]
pub struct CompatibilityMatrix {
    codec: SnapshotCodec,
    versions: Vec<String>,
}

impl CompatibilityMatrix {
    pub fn new(codec: SnapshotCodec, versions: Vec<String>) -> Self {
        Self { codec, versions }
    }

    /// Versions from `versions_file`, snapshots under `mocks_dir`.
    pub fn from_files(mocks_dir: &Path, versions_file: &Path) -> Result<Self> {
        Ok(Self::new(
            SnapshotCodec::new(mocks_dir),
            read_versions(versions_file)?,
        ))
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// Snapshot files of one version directory, sorted by name.
    fn list_version(&self, version: &str) -> Result<Vec<PathBuf>> {
        let dir = self.codec.version_dir(version);
        let rd = fs::read_dir(&dir)
            .with_context(|| format!("read snapshot dir {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in rd {
            let entry = entry.with_context(|| format!("read snapshot dir {}", dir.display()))?;
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXT) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn plan(&self, names: &[&str]) -> Result<Plan> {
        let mut plan = Plan::default();
        for version in &self.versions {
            for file in self.list_version(version)? {
                let base = file
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let matches = match_scenarios(&base, names);
                if matches.len() == 1 {
                    plan.scheduled.push(ScheduledReplay {
                        version: version.clone(),
                        scenario: matches[0].to_string(),
                        file,
                    });
                } else {
                    debug!(
                        "skip {}: matches {} scenario(s) {:?}",
                        base,
                        matches.len(),
                        matches
                    );
                    plan.skipped.push(SkippedSnapshot {
                        file,
                        matches: matches.iter().map(|m| m.to_string()).collect(),
                    });
                }
            }
        }
        Ok(plan)
    }

    /// Replay every scheduled snapshot. Failed cases are reported, not raised;
    /// discovery and snapshot errors are raised.
    pub fn run(&self, runner: &ScenarioRunner) -> Result<MatrixReport> {
        let plan = self.plan(&runner.names())?;
        let mut report = MatrixReport {
            skipped: plan.skipped,
            ..MatrixReport::default()
        };
        for item in &plan.scheduled {
            let scenario = runner
                .find(&item.scenario)
                .with_context(|| format!("scenario {} is not registered", item.scenario))?;
            let results = runner
                .replay_file(scenario, &item.file)
                .with_context(|| format!("replay {}", item.file.display()))?;
            report.results.extend(results);
        }
        info!(
            "matrix: {} version(s), {} snapshot(s), {} case(s) passed, {} failed, {} skipped",
            self.versions.len(),
            plan.scheduled.len(),
            report.passed(),
            report.failed(),
            report.skipped.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_trimmed() {
        assert_eq!(
            parse_versions(" 3.4.0, 3.5.0,,\n"),
            vec!["3.4.0".to_string(), "3.5.0".to_string()]
        );
        assert!(parse_versions("").is_empty());
    }

    #[test]
    fn substring_match_is_case_sensitive() {
        let names = ["tkey-core", "seedphrase"];
        assert_eq!(match_scenarios("1.0|tkey-core.json", &names), vec!["tkey-core"]);
        assert!(match_scenarios("1.0|TKEY-CORE.json", &names).is_empty());
        assert_eq!(
            match_scenarios("1.0|tkey-core-seedphrase.json", &names).len(),
            2
        );
    }
}
