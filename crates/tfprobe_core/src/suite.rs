//! Suites of scenarios, run serially or in parallel.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelSignal;
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{Scenario, ScenarioReport, ScenarioRunner, ScenarioStatus};

/// A registered scenario.
#[derive(Debug, Clone)]
pub struct SuiteEntry {
    pub name: String,
    pub parallel: bool,
    pub scenario: Scenario,
}

/// Totals across a suite run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    /// Scenarios whose destroy failed
    pub cleanup_failures: usize,
}

/// Result of running a suite.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: SuiteSummary,
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.summary.passed == self.summary.total
    }

    pub fn has_cleanup_failures(&self) -> bool {
        self.summary.cleanup_failures > 0
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

/// An ordered set of named scenarios.
///
/// Serial scenarios run one at a time in registration order, then the
/// parallel ones run concurrently. A failing scenario never stops the others.
#[derive(Debug, Clone)]
pub struct ScenarioSuite {
    name: String,
    entries: Vec<SuiteEntry>,
}

impl ScenarioSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a scenario. Names must be unique within the suite.
    ///
    /// Terraform keeps local state in the module directory, so two parallel
    /// scenarios may not share one. Serial scenarios may reuse any directory.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        parallel: bool,
        mut scenario: Scenario,
    ) -> HarnessResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(HarnessError::Configuration(
                "scenario name must not be empty".to_string(),
            ));
        }
        if self.entries.iter().any(|e| e.name == name) {
            return Err(HarnessError::Configuration(format!(
                "duplicate scenario name '{}'",
                name
            )));
        }
        if parallel {
            let dir = module_key(&scenario.module_dir);
            if let Some(other) = self
                .entries
                .iter()
                .find(|e| e.parallel && module_key(&e.scenario.module_dir) == dir)
            {
                return Err(HarnessError::Configuration(format!(
                    "parallel scenarios '{}' and '{}' share module directory {:?}; \
                     give each its own copy or run one of them serially",
                    other.name, name, scenario.module_dir
                )));
            }
        }
        scenario.name = name.clone();
        self.entries.push(SuiteEntry {
            name,
            parallel,
            scenario,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[SuiteEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&SuiteEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the named scenarios.
    pub fn retain(&mut self, names: &[String]) -> HarnessResult<()> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        for name in &wanted {
            if self.get(name).is_none() {
                return Err(HarnessError::Configuration(format!(
                    "unknown scenario '{}'",
                    name
                )));
            }
        }
        self.entries.retain(|e| wanted.contains(e.name.as_str()));
        Ok(())
    }

    /// Drop every resource check, e.g. when nothing is really provisioned.
    pub fn without_checks(mut self) -> Self {
        for entry in &mut self.entries {
            entry.scenario.checks.clear();
        }
        self
    }

    /// Run every scenario and collect the reports in registration order.
    pub async fn run(&self, runner: &ScenarioRunner, cancel: CancelSignal) -> SuiteReport {
        let started_at = Utc::now();
        info!(suite = %self.name, scenarios = self.entries.len(), "Running suite");

        let mut reports: Vec<Option<ScenarioReport>> = vec![None; self.entries.len()];

        for (index, entry) in self.entries.iter().enumerate() {
            if entry.parallel {
                continue;
            }
            reports[index] = Some(runner.run(&entry.scenario, cancel.clone()).await);
        }

        let parallel: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.parallel)
            .map(|(index, _)| index)
            .collect();
        let finished = join_all(
            parallel
                .iter()
                .map(|&index| runner.run(&self.entries[index].scenario, cancel.clone())),
        )
        .await;
        for (index, report) in parallel.into_iter().zip(finished) {
            reports[index] = Some(report);
        }

        let scenarios: Vec<ScenarioReport> = reports.into_iter().flatten().collect();
        let summary = summarize(&scenarios);
        if summary.cleanup_failures > 0 {
            warn!(
                count = summary.cleanup_failures,
                "Some scenarios could not be cleaned up"
            );
        }
        info!(
            suite = %self.name,
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            "Suite finished"
        );

        SuiteReport {
            name: self.name.clone(),
            started_at,
            finished_at: Utc::now(),
            summary,
            scenarios,
        }
    }
}

/// Directories compare by their canonical form when they exist.
fn module_key(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

fn summarize(scenarios: &[ScenarioReport]) -> SuiteSummary {
    let mut summary = SuiteSummary {
        total: scenarios.len(),
        ..Default::default()
    };
    for report in scenarios {
        match report.status {
            ScenarioStatus::Passed => summary.passed += 1,
            ScenarioStatus::Failed => summary.failed += 1,
            ScenarioStatus::Errored => summary.errored += 1,
        }
        if report.cleanup_failure.is_some() {
            summary.cleanup_failures += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_duplicates() {
        let mut suite = ScenarioSuite::new("s");
        suite.register("a", false, Scenario::new("x", "m")).unwrap();
        assert!(suite.register("a", true, Scenario::new("y", "m")).is_err());
        assert!(suite.register(" ", true, Scenario::new("y", "m")).is_err());
        assert_eq!(suite.len(), 1);
        assert_eq!(suite.get("a").unwrap().scenario.name, "a");
    }

    #[test]
    fn test_parallel_scenarios_need_their_own_module_dir() {
        let mut suite = ScenarioSuite::new("s");
        suite.register("a", true, Scenario::new("a", "modules/simple")).unwrap();
        suite.register("b", true, Scenario::new("b", "modules/queue")).unwrap();
        suite.register("c", false, Scenario::new("c", "modules/simple")).unwrap();

        let err = suite
            .register("d", true, Scenario::new("d", "modules/simple"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(ref m) if m.contains("'a' and 'd'")));
        assert_eq!(suite.len(), 3);
    }

    #[test]
    fn test_shared_dir_detected_through_relative_segments() {
        let root = tempfile::tempdir().unwrap();
        let module = root.path().join("simple");
        std::fs::create_dir_all(root.path().join("other")).unwrap();
        std::fs::create_dir_all(&module).unwrap();

        let mut suite = ScenarioSuite::new("s");
        suite.register("a", true, Scenario::new("a", &module)).unwrap();
        let aliased = root.path().join("other").join("..").join("simple");
        assert!(suite.register("b", true, Scenario::new("b", aliased)).is_err());
    }

    #[test]
    fn test_retain_filters_and_validates() {
        let mut suite = ScenarioSuite::new("s");
        suite.register("a", false, Scenario::new("a", "m")).unwrap();
        suite.register("b", true, Scenario::new("b", "m")).unwrap();

        assert!(suite.clone().retain(&["missing".to_string()]).is_err());
        suite.retain(&["b".to_string()]).unwrap();
        assert_eq!(suite.len(), 1);
        assert!(suite.get("b").is_some());
    }
}
