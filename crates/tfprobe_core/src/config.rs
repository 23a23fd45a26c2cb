//! Suite files: scenarios declared in YAML.
//!
//! ```yaml
//! name: storage
//! region: us-east-1
//! scenarios:
//!   - name: simple-bucket
//!     parallel: true
//!     prefix: terratest-s3
//!     module_dir: modules/simple
//!     identifier_variable: bucket_name
//!     variables:
//!       tags: { Name: "${run_id}" }
//!     retry: default
//!     timeout_secs: 900
//!     checks:
//!       - kind: s3-bucket
//!         output: bucket_name
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::identifier::RunIdentifier;
use crate::retry::{Backoff, RetryPolicy, RetryRule, DEFAULT_MAX_ATTEMPTS};
use crate::scenario::{ResourceCheck, Scenario};
use crate::suite::ScenarioSuite;

/// Top-level suite document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteFile {
    pub name: String,
    /// Default region for scenarios that set none
    #[serde(default)]
    pub region: Option<String>,
    /// Default identifier prefix
    #[serde(default)]
    pub prefix: Option<String>,
    /// Environment shared by every scenario; scenario entries win
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub scenarios: Vec<ScenarioConfig>,
}

/// One scenario entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Relative paths resolve against the suite file's directory
    #[serde(default)]
    pub module_dir: Option<PathBuf>,
    #[serde(default)]
    pub identifier_variable: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub var_files: Vec<PathBuf>,
    #[serde(default)]
    pub backend_config: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub checks: Vec<ResourceCheck>,
}

/// Retry settings: a preset name or explicit rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetryConfig {
    Preset(RetryPreset),
    Rules {
        rules: Vec<RetryRuleConfig>,
        /// Append the well-known transient errors after the explicit rules
        #[serde(default)]
        include_defaults: bool,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::Preset(RetryPreset::Default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPreset {
    /// The well-known transient Terraform errors
    Default,
    /// Never retry
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRuleConfig {
    pub pattern: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub delay_secs: f64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub max_delay_secs: Option<f64>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_multiplier() -> f64 {
    1.0
}

impl RetryConfig {
    pub fn to_policy(&self) -> HarnessResult<RetryPolicy> {
        match self {
            RetryConfig::Preset(RetryPreset::Default) => Ok(RetryPolicy::default_retryable_errors()),
            RetryConfig::Preset(RetryPreset::None) => Ok(RetryPolicy::none()),
            RetryConfig::Rules {
                rules,
                include_defaults,
            } => {
                let mut policy = RetryPolicy::none();
                for rule in rules {
                    policy = policy.with_rule(rule.to_rule()?);
                }
                if *include_defaults {
                    for rule in RetryPolicy::default_retryable_errors().rules() {
                        policy = policy.with_rule(rule.clone());
                    }
                }
                Ok(policy)
            }
        }
    }
}

impl RetryRuleConfig {
    fn to_rule(&self) -> HarnessResult<RetryRule> {
        let delay = seconds(self.delay_secs, "delay_secs")?;
        let max = match self.max_delay_secs {
            Some(max) => seconds(max, "max_delay_secs")?,
            None => delay.max(Duration::from_secs(300)),
        };
        let backoff = if self.multiplier == 1.0 {
            Backoff::constant(delay)
        } else {
            Backoff::exponential(delay, self.multiplier, max)?
        };
        RetryRule::new(&self.pattern, self.description.clone(), self.max_attempts, backoff)
    }
}

fn seconds(value: f64, field: &str) -> HarnessResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        HarnessError::Configuration(format!(
            "{} must be a non-negative number of seconds, got {}",
            field, value
        ))
    })
}

/// Values supplied by the calling environment that win over the file.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOverrides {
    pub region: Option<String>,
    pub prefix: Option<String>,
    pub module_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Pin the identifier, e.g. to clean up an earlier run
    pub identifier: Option<RunIdentifier>,
}

impl SuiteFile {
    /// Load a suite file from YAML.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> HarnessResult<Self> {
        let suite: SuiteFile = serde_yaml::from_str(content)?;
        if suite.scenarios.is_empty() {
            return Err(HarnessError::Configuration(format!(
                "suite '{}' declares no scenarios",
                suite.name
            )));
        }
        Ok(suite)
    }

    /// Build the runnable suite. Relative module paths resolve against `base_dir`.
    pub fn into_suite(
        self,
        base_dir: &Path,
        overrides: &ScenarioOverrides,
    ) -> HarnessResult<ScenarioSuite> {
        let mut suite = ScenarioSuite::new(&self.name);
        for config in &self.scenarios {
            let scenario = self.scenario(config, base_dir, overrides)?;
            suite.register(&config.name, config.parallel, scenario)?;
        }
        Ok(suite)
    }

    fn scenario(
        &self,
        config: &ScenarioConfig,
        base_dir: &Path,
        overrides: &ScenarioOverrides,
    ) -> HarnessResult<Scenario> {
        let module_dir = match (&overrides.module_dir, &config.module_dir) {
            (Some(dir), _) => dir.clone(),
            (None, Some(dir)) if dir.is_relative() => base_dir.join(dir),
            (None, Some(dir)) => dir.clone(),
            (None, None) => {
                return Err(HarnessError::Configuration(format!(
                    "scenario '{}' has no module_dir",
                    config.name
                )))
            }
        };

        let mut scenario = Scenario::new(&config.name, module_dir)
            .with_retry_policy(config.retry.to_policy()?);

        if let Some(prefix) = first(&overrides.prefix, &config.prefix, &self.prefix) {
            scenario = scenario.with_prefix(prefix);
        }
        if let Some(region) = first(&overrides.region, &config.region, &self.region) {
            scenario = scenario.with_region(region);
        }
        if let Some(name) = &config.identifier_variable {
            scenario = scenario.with_identifier_variable(name);
        }
        for (name, value) in &config.variables {
            scenario = scenario.with_var(name, value.clone());
        }
        for path in &config.var_files {
            let path = if path.is_relative() {
                base_dir.join(path)
            } else {
                path.clone()
            };
            scenario = scenario.with_var_file(path);
        }
        for (key, value) in &config.backend_config {
            scenario = scenario.with_backend_config(key, value);
        }
        for (key, value) in self.env.iter().chain(&config.env) {
            scenario = scenario.with_env(key, value);
        }
        if let Some(secs) = config.command_timeout_secs {
            scenario = scenario.with_command_timeout(Duration::from_secs(secs));
        }
        match (overrides.timeout, config.timeout_secs) {
            (Some(timeout), _) => scenario = scenario.with_timeout(timeout),
            (None, Some(secs)) => scenario = scenario.with_timeout(Duration::from_secs(secs)),
            (None, None) => {}
        }
        for check in &config.checks {
            scenario = scenario.with_check(check.clone());
        }
        if let Some(id) = &overrides.identifier {
            scenario = scenario.with_identifier(id.clone());
        }

        Ok(scenario)
    }
}

fn first<'a>(
    a: &'a Option<String>,
    b: &'a Option<String>,
    c: &'a Option<String>,
) -> Option<&'a str> {
    a.as_deref().or(b.as_deref()).or(c.as_deref())
}
