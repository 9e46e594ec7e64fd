//! Distributed lock data model

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Default key expiry when the caller does not specify one
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60);
/// Default total time budget for retrying acquisition
pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);
/// Default delay between acquisition attempts
pub const DEFAULT_RETRY: Duration = Duration::from_millis(500);
/// Default fraction of the expiry reserved for clock drift between instances
pub const DEFAULT_CLOCK_DRIFT_FACTOR: f64 = 0.01;
/// Fixed drift allowance added on top of the proportional part
pub const CLOCK_DRIFT_FLOOR: Duration = Duration::from_millis(2);
/// Share of the expiry a single instance may take to answer, when no explicit
/// per-instance timeout is configured
pub const INSTANCE_TIMEOUT_DIVISOR: u32 = 10;
/// Lower bound for the derived per-instance timeout
pub const MIN_INSTANCE_TIMEOUT: Duration = Duration::from_millis(1);
/// Separator between the instance-name prefix and the resource
pub const RESOURCE_SEPARATOR: char = '-';

/// Outcome of a single acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    /// A quorum holds the token and validity time remains
    Acquired,
    /// No majority agreed on anything during the round
    Unlocked,
    /// A majority already holds another holder's token
    Conflicted,
    /// A quorum acknowledged but the round consumed the validity window
    Expired,
    /// Fewer than a quorum of instances were reachable
    NoQuorum,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Acquired => "acquired",
            LockStatus::Unlocked => "unlocked",
            LockStatus::Conflicted => "conflicted",
            LockStatus::Expired => "expired",
            LockStatus::NoQuorum => "no_quorum",
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason an acquisition failed; every non-acquired `LockStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockFailure {
    Unlocked,
    Conflicted,
    Expired,
    NoQuorum,
}

impl LockFailure {
    pub fn as_str(&self) -> &'static str {
        LockStatus::from(*self).as_str()
    }
}

impl fmt::Display for LockFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LockFailure> for LockStatus {
    fn from(failure: LockFailure) -> Self {
        match failure {
            LockFailure::Unlocked => LockStatus::Unlocked,
            LockFailure::Conflicted => LockStatus::Conflicted,
            LockFailure::Expired => LockStatus::Expired,
            LockFailure::NoQuorum => LockStatus::NoQuorum,
        }
    }
}

/// Raised when a status with no failure counterpart is converted
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lock status '{0}' is not a failure")]
pub struct NotAFailure(pub LockStatus);

impl TryFrom<LockStatus> for LockFailure {
    type Error = NotAFailure;

    fn try_from(status: LockStatus) -> Result<Self, Self::Error> {
        match status {
            LockStatus::Acquired => Err(NotAFailure(status)),
            LockStatus::Unlocked => Ok(LockFailure::Unlocked),
            LockStatus::Conflicted => Ok(LockFailure::Conflicted),
            LockStatus::Expired => Ok(LockFailure::Expired),
            LockStatus::NoQuorum => Ok(LockFailure::NoQuorum),
        }
    }
}

/// Result of one instance's set-if-absent during a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceResult {
    Acquired,
    Conflicted,
    Error,
}

/// Per-instance tally of a round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    /// Instances that stored our token
    pub acquired: usize,
    /// Instances that already held another value
    pub conflicted: usize,
    /// Instances that failed or were unreachable
    pub errored: usize,
}

impl InstanceSummary {
    pub fn from_results(results: &[InstanceResult]) -> Self {
        results
            .iter()
            .fold(Self::default(), |mut summary, result| {
                match result {
                    InstanceResult::Acquired => summary.acquired += 1,
                    InstanceResult::Conflicted => summary.conflicted += 1,
                    InstanceResult::Error => summary.errored += 1,
                }
                summary
            })
    }

    pub fn total(&self) -> usize {
        self.acquired + self.conflicted + self.errored
    }

    /// Instances that answered, whatever the answer
    pub fn reachable(&self) -> usize {
        self.acquired + self.conflicted
    }

    /// Classify the round.
    ///
    /// `validity_remaining` is whether any validity time is left after the
    /// round latency and drift allowance. Returns `None` when the lock is held.
    pub fn failure(&self, quorum: usize, validity_remaining: bool) -> Option<LockFailure> {
        if self.acquired >= quorum {
            if validity_remaining {
                return None;
            }
            return Some(LockFailure::Expired);
        }
        if self.conflicted >= quorum {
            return Some(LockFailure::Conflicted);
        }
        if self.reachable() < quorum {
            return Some(LockFailure::NoQuorum);
        }
        Some(LockFailure::Unlocked)
    }

    /// Status of the round, see [`InstanceSummary::failure`]
    pub fn status(&self, quorum: usize, validity_remaining: bool) -> LockStatus {
        self.failure(quorum, validity_remaining)
            .map(LockStatus::from)
            .unwrap_or(LockStatus::Acquired)
    }
}

/// Strict majority of `instances`
pub fn quorum(instances: usize) -> usize {
    instances / 2 + 1
}

/// Drift allowance subtracted from the validity window
pub fn clock_drift(expiry: Duration, factor: f64) -> Duration {
    expiry.mul_f64(factor) + CLOCK_DRIFT_FLOOR
}

/// Lock defaults shared by every acquisition made through one factory
#[derive(Debug, Clone, PartialEq)]
pub struct LockSettings {
    /// Prefix joined to every resource name (e.g. "orders" -> "orders-R")
    pub instance_name: Option<String>,
    pub default_expiry: Duration,
    pub default_wait: Duration,
    pub default_retry: Duration,
    /// Fraction of the expiry reserved for clock drift
    pub clock_drift_factor: f64,
    /// Longest a single instance may take to answer; derived from the expiry
    /// when unset
    pub instance_timeout: Option<Duration>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            instance_name: None,
            default_expiry: DEFAULT_EXPIRY,
            default_wait: DEFAULT_WAIT,
            default_retry: DEFAULT_RETRY,
            clock_drift_factor: DEFAULT_CLOCK_DRIFT_FACTOR,
            instance_timeout: None,
        }
    }
}

impl LockSettings {
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    /// Check the settings for values the protocol cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.default_expiry.is_zero() {
            return Err("lock expiry must be greater than zero".to_string());
        }
        if self.default_retry.is_zero() {
            return Err("lock retry interval must be greater than zero".to_string());
        }
        if self.instance_timeout.is_some_and(|t| t.is_zero()) {
            return Err("instance timeout must be greater than zero".to_string());
        }
        if !(0.0..1.0).contains(&self.clock_drift_factor) {
            return Err(format!(
                "clock drift factor must be in [0, 1), got {}",
                self.clock_drift_factor
            ));
        }
        Ok(())
    }

    /// Time limit for one instance call during a lock with `expiry`.
    ///
    /// An instance that has not answered by then counts as a non-ack.
    pub fn instance_timeout(&self, expiry: Duration) -> Duration {
        self.instance_timeout
            .unwrap_or_else(|| (expiry / INSTANCE_TIMEOUT_DIVISOR).max(MIN_INSTANCE_TIMEOUT))
    }

    /// Full store key for `resource`
    pub fn resource_key(&self, resource: &str) -> String {
        match self.instance_name.as_deref() {
            Some(prefix) => format!("{}{}{}", prefix, RESOURCE_SEPARATOR, resource),
            None => resource.to_string(),
        }
    }
}

/// Per-call acquisition options; unset durations fall back to `LockSettings`
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Key expiry; should exceed the expected critical-section duration
    pub expiry: Option<Duration>,
    /// Total time budget for retrying
    pub wait: Option<Duration>,
    /// Delay between attempts
    pub retry: Option<Duration>,
    /// Signal that aborts acquisition when cancelled
    pub cancellation: Option<CancellationToken>,
}

impl AcquireOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}
