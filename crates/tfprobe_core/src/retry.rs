//! Retry policy for transient tool failures.
//!
//! A policy is an ordered list of rules. When a tool command fails, its
//! output is matched against each rule in turn; the first match decides
//! whether the command is retried and how long to wait. A failure no rule
//! matches is fatal on the first attempt.

use std::future::Future;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use tfprobe_runner::ToolResult;

use crate::cancel::CancelSignal;
use crate::error::{HarnessError, HarnessResult, Phase};

/// Default attempts for the well-known transient errors.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default wait between attempts for the well-known transient errors.
pub const DEFAULT_TIME_BETWEEN_RETRIES: Duration = Duration::from_secs(5);

/// Known transient Terraform failures and why they are retried.
const DEFAULT_RETRYABLE_ERRORS: &[(&str, &str)] = &[
    (
        ".*read: connection reset by peer.*",
        "Failed to reach helm charts repository.",
    ),
    (".*transport is closing.*", "Failed to reach Kubernetes API."),
    (
        ".*unable to verify signature.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*unable to verify checksum.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*no provider exists with the given name.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*registry service is unreachable.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*Error installing provider.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*Failed to query available provider packages.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*timeout while waiting for plugin to start.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*timed out waiting for server handshake.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        "could not query provider registry for",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*Provider produced inconsistent result after apply.*",
        "Provider eventual consistency error.",
    ),
];

/// Wait schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    /// Same wait before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self {
            initial: delay,
            multiplier: 1.0,
            max: delay,
        }
    }

    /// `initial * multiplier^(retry - 1)`, capped at `max`.
    pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> HarnessResult<Self> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(HarnessError::Configuration(format!(
                "backoff multiplier must be >= 1.0, got {}",
                multiplier
            )));
        }
        Ok(Self {
            initial,
            multiplier,
            max: max.max(initial),
        })
    }

    /// No wait at all.
    pub fn none() -> Self {
        Self::constant(Duration::ZERO)
    }

    /// Wait before retry number `retry` (1 = first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

/// One retry rule: a failure pattern with its attempt budget and backoff.
#[derive(Debug, Clone)]
pub struct RetryRule {
    pattern: Regex,
    description: String,
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryRule {
    pub fn new(
        pattern: &str,
        description: impl Into<String>,
        max_attempts: u32,
        backoff: Backoff,
    ) -> HarnessResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            HarnessError::Configuration(format!("invalid retry pattern '{}': {}", pattern, e))
        })?;
        if max_attempts == 0 {
            return Err(HarnessError::Configuration(format!(
                "retry rule '{}' must allow at least one attempt",
                pattern
            )));
        }
        Ok(Self {
            pattern,
            description: description.into(),
            max_attempts,
            backoff,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn matches(&self, failure: &str) -> bool {
        self.pattern.is_match(failure)
    }
}

/// Ordered retry rules. The empty policy never retries.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    rules: Vec<RetryRule>,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(rules: Vec<RetryRule>) -> Self {
        Self { rules }
    }

    /// Append a rule; earlier rules take precedence.
    pub fn with_rule(mut self, rule: RetryRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The well-known transient Terraform errors, 3 attempts, 5s apart.
    pub fn default_retryable_errors() -> Self {
        Self::with_default_errors(
            DEFAULT_MAX_ATTEMPTS,
            Backoff::constant(DEFAULT_TIME_BETWEEN_RETRIES),
        )
    }

    /// The well-known transient Terraform errors with a custom budget.
    pub fn with_default_errors(max_attempts: u32, backoff: Backoff) -> Self {
        let rules = DEFAULT_RETRYABLE_ERRORS
            .iter()
            .filter_map(|(pattern, description)| {
                RetryRule::new(pattern, *description, max_attempts.max(1), backoff).ok()
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule matching the failure text, if any.
    pub fn classify(&self, failure: &str) -> Option<&RetryRule> {
        self.rules.iter().find(|rule| rule.matches(failure))
    }
}

/// A value together with how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `operation` under `policy`.
///
/// `operation` receives the 1-based attempt number. Exhaustion or an
/// unmatched failure yields [`HarnessError::Provisioning`] carrying the
/// last underlying failure.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    phase: Phase,
    operation: F,
) -> HarnessResult<Retried<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ToolResult<T>>,
{
    run_with_retry_until(policy, phase, &CancelSignal::never(), operation).await
}

/// Like [`run_with_retry`], but no new attempt starts once `stop` trips.
///
/// An attempt already running is never interrupted; a failure seen after
/// `stop` trips is returned as final.
pub async fn run_with_retry_until<T, F, Fut>(
    policy: &RetryPolicy,
    phase: Phase,
    stop: &CancelSignal,
    mut operation: F,
) -> HarnessResult<Retried<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ToolResult<T>>,
{
    let mut attempt = 1;
    loop {
        let err = match operation(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(err) => err,
        };

        match policy.classify(&err.failure_text()) {
            Some(rule) if attempt < rule.max_attempts() && !stop.is_cancelled() => {
                let delay = rule.backoff().delay_for(attempt);
                warn!(
                    %phase,
                    attempt,
                    max_attempts = rule.max_attempts(),
                    "{} Retrying in {:?}",
                    rule.description(),
                    delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => attempt += 1,
                    _ = stop.cancelled() => {
                        warn!(%phase, attempt, "Stop requested, not retrying");
                        return Err(HarnessError::Provisioning {
                            phase,
                            attempts: attempt,
                            source: err,
                        });
                    }
                }
            }
            Some(rule) => {
                warn!(
                    %phase,
                    attempt,
                    "Giving up: retryable error persisted ({})",
                    rule.description()
                );
                return Err(HarnessError::Provisioning {
                    phase,
                    attempts: attempt,
                    source: err,
                });
            }
            None => {
                debug!(%phase, attempt, "Failure matches no retry rule");
                return Err(HarnessError::Provisioning {
                    phase,
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}
