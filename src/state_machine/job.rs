use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::state::JobState;

/// The terminal result recorded for a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded { artifact_location: String },
    Failed { reason: String, retryable: bool },
    TimedOut,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Succeeded { artifact_location } => write!(f, "succeeded: {artifact_location}"),
            JobOutcome::Failed { reason, .. } => write!(f, "failed: {reason}"),
            JobOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

/// A [`JobOutcome`] bound to the work item it concludes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub work_item_key: String,
    pub outcome: JobOutcome,
    pub concluded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(work_item_key: impl Into<String>, outcome: JobOutcome, concluded_at: DateTime<Utc>) -> Self {
        Self {
            work_item_key: work_item_key.into(),
            outcome,
            concluded_at,
        }
    }
}

/// Submission retry policy: exponential backoff with jitter, capped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total submission attempts per work item, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the delay added or removed at random (0.0 disables jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay after a failed attempt using exponential backoff.
    /// delay = min(base_delay_ms * 2^(attempt - 1), max_delay_ms)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay_ms)
    }

    pub fn jittered_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        apply_jitter(
            Duration::from_millis(self.delay_for_attempt(attempt)),
            self.jitter,
            rng,
        )
    }
}

/// Longest deadline a job may be given: one week.
pub const MAX_DEADLINE_SECS: u64 = 7 * 24 * 60 * 60;

/// Polling policy for a submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_initial_interval_secs")]
    pub initial_interval_secs: u64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    /// Growth factor applied per completed poll. 1.0 gives a fixed interval.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Maximum time a job may stay non-terminal, measured from `submitted_at`.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_initial_interval_secs() -> u64 {
    5
}

fn default_max_interval_secs() -> u64 {
    60
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_deadline_secs() -> u64 {
    600
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: default_initial_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl PollConfig {
    /// The configured deadline, capped at [`MAX_DEADLINE_SECS`].
    pub fn deadline(&self) -> TimeDelta {
        TimeDelta::seconds(self.deadline_secs.min(MAX_DEADLINE_SECS) as i64)
    }

    /// Interval to wait before poll number `polls_done + 1`, without jitter.
    pub fn interval_for_poll(&self, polls_done: u32) -> Duration {
        let initial = self.initial_interval_secs as f64;
        let max = self.max_interval_secs.max(self.initial_interval_secs) as f64;
        let grown = initial * self.multiplier.max(1.0).powi(polls_done.min(64) as i32);
        Duration::from_secs_f64(grown.min(max))
    }

    pub fn jittered_interval(&self, polls_done: u32, rng: &mut impl Rng) -> Duration {
        apply_jitter(self.interval_for_poll(polls_done), self.jitter, rng)
    }
}

fn apply_jitter(base: Duration, jitter: f64, rng: &mut impl Rng) -> Duration {
    if jitter <= 0.0 || base.is_zero() {
        return base;
    }
    let jitter = jitter.min(1.0);
    base.mul_f64(1.0 + rng.gen_range(-jitter..=jitter))
}

/// A live reference to one remote render job.
///
/// Everything the poller needs to resume after a restart lives in these
/// fields; nothing is kept in process-local timers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub work_item_key: String,
    pub status_endpoint: String,
    /// Where the render writes its output, used when the remote does not
    /// report an artifact location of its own.
    pub output_location: String,
    pub submitted_at: DateTime<Utc>,
    /// Submission attempt (1-based) that produced this handle.
    pub attempt: u32,
    pub state: JobState,
    pub polls: u32,
    pub transient_failures: u32,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub conclusion: Option<OutcomeRecord>,
}

impl JobHandle {
    pub fn new(
        work_item_key: impl Into<String>,
        status_endpoint: impl Into<String>,
        output_location: impl Into<String>,
        submitted_at: DateTime<Utc>,
        attempt: u32,
    ) -> Self {
        Self {
            work_item_key: work_item_key.into(),
            status_endpoint: status_endpoint.into(),
            output_location: output_location.into(),
            submitted_at,
            attempt,
            state: JobState::Submitted,
            polls: 0,
            transient_failures: 0,
            last_polled_at: None,
            conclusion: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn deadline_at(&self, deadline: TimeDelta) -> DateTime<Utc> {
        self.submitted_at + deadline
    }
}
