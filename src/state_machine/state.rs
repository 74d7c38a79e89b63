use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::job::{JobHandle, JobOutcome, OutcomeRecord};
use crate::render::RemoteStatus;

/// States of a tracked render job.
///
/// Each job flows through: SUBMITTED → RUNNING → SUCCEEDED | FAILED,
/// or is forced to TIMED_OUT once its deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Submitted => write!(f, "SUBMITTED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Succeeded => write!(f, "SUCCEEDED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// What a single poll cycle saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Status(RemoteStatus),
    /// Network error, 5xx or rate limiting. Never changes state.
    TransientError(String),
    /// The remote rejected the status request outright (4xx).
    PermanentError(String),
}

/// The result of feeding one observation to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The job is still in flight.
    Advanced(JobState),
    /// A transient poll failure; the handle's state is untouched.
    Unchanged { reason: String },
    /// The job reached a terminal state.
    Concluded(OutcomeRecord),
    /// The handle was already terminal; nothing was applied.
    Ignored,
}

/// How a remote status string is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Succeeded,
    Failed,
    Pending,
    Unknown(String),
}

const PENDING_STATES: &[&str] = &["not_started", "queued", "pending", "running", "in_progress"];

impl RemoteState {
    pub fn classify(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "succeeded" => RemoteState::Succeeded,
            "failed" => RemoteState::Failed,
            s if PENDING_STATES.contains(&s) => RemoteState::Pending,
            _ => RemoteState::Unknown(raw.to_string()),
        }
    }
}

/// Drives a [`JobHandle`] through the poll state machine.
pub struct StateMachine;

impl StateMachine {
    /// Force `TimedOut` if the handle's deadline has passed at `now`.
    ///
    /// The conclusion is stamped at `submitted_at + deadline`, not at `now`,
    /// so a late caller reports the same outcome as a punctual one.
    pub fn check_deadline(
        handle: &mut JobHandle,
        now: DateTime<Utc>,
        deadline: TimeDelta,
    ) -> Option<OutcomeRecord> {
        if handle.is_terminal() {
            return None;
        }
        let deadline_at = handle.deadline_at(deadline);
        if now < deadline_at {
            return None;
        }
        let record = OutcomeRecord::new(&handle.work_item_key, JobOutcome::TimedOut, deadline_at);
        handle.state = JobState::TimedOut;
        handle.conclusion = Some(record.clone());
        Some(record)
    }

    /// Apply one poll observation made at `now`.
    ///
    /// - A terminal handle ignores everything.
    /// - Past the deadline the handle times out and the observation is dropped.
    /// - `succeeded` / `failed` conclude the job; any other status keeps it
    ///   `Running` (unrecognized strings are logged).
    /// - Transient errors only bump the failure counter.
    pub fn observe(
        handle: &mut JobHandle,
        now: DateTime<Utc>,
        observation: Observation,
        deadline: TimeDelta,
    ) -> Transition {
        if handle.is_terminal() {
            return Transition::Ignored;
        }
        if let Some(record) = Self::check_deadline(handle, now, deadline) {
            return Transition::Concluded(record);
        }

        handle.polls += 1;
        handle.last_polled_at = Some(now);

        let outcome = match observation {
            Observation::TransientError(reason) => {
                handle.transient_failures += 1;
                return Transition::Unchanged { reason };
            }
            Observation::PermanentError(reason) => JobOutcome::Failed {
                reason,
                retryable: false,
            },
            Observation::Status(status) => match RemoteState::classify(&status.state) {
                RemoteState::Succeeded => JobOutcome::Succeeded {
                    artifact_location: status
                        .artifact_location
                        .unwrap_or_else(|| handle.output_location.clone()),
                },
                RemoteState::Failed => JobOutcome::Failed {
                    reason: status
                        .error
                        .unwrap_or_else(|| "render job reported failure".to_string()),
                    retryable: false,
                },
                RemoteState::Pending => {
                    handle.state = JobState::Running;
                    return Transition::Advanced(JobState::Running);
                }
                RemoteState::Unknown(raw) => {
                    warn!(
                        key = %handle.work_item_key,
                        status = %raw,
                        "unrecognized render job status, treating as running"
                    );
                    handle.state = JobState::Running;
                    return Transition::Advanced(JobState::Running);
                }
            },
        };

        handle.state = match outcome {
            JobOutcome::Succeeded { .. } => JobState::Succeeded,
            _ => JobState::Failed,
        };
        let record = OutcomeRecord::new(&handle.work_item_key, outcome, now);
        handle.conclusion = Some(record.clone());
        Transition::Concluded(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE_SECS: i64 = 600;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn deadline() -> TimeDelta {
        TimeDelta::seconds(DEADLINE_SECS)
    }

    fn make_handle() -> JobHandle {
        JobHandle::new("SKU-1", "https://render/status/1", "s3://out/generated/SKU-1_poster.pdf", t0(), 1)
    }

    fn status(state: &str) -> Observation {
        Observation::Status(RemoteStatus {
            state: state.into(),
            artifact_location: None,
            error: None,
        })
    }

    #[test]
    fn running_running_succeeded_concludes_at_last_poll() {
        let mut handle = make_handle();

        let t = StateMachine::observe(&mut handle, at(5), status("running"), deadline());
        assert_eq!(t, Transition::Advanced(JobState::Running));
        let t = StateMachine::observe(&mut handle, at(10), status("running"), deadline());
        assert_eq!(t, Transition::Advanced(JobState::Running));
        let t = StateMachine::observe(&mut handle, at(15), status("succeeded"), deadline());

        let expected = OutcomeRecord::new(
            "SKU-1",
            JobOutcome::Succeeded {
                artifact_location: "s3://out/generated/SKU-1_poster.pdf".into(),
            },
            at(15),
        );
        assert_eq!(t, Transition::Concluded(expected.clone()));
        assert_eq!(handle.state, JobState::Succeeded);
        assert_eq!(handle.polls, 3);
        assert_eq!(handle.conclusion, Some(expected));
    }

    #[test]
    fn late_success_is_ignored_after_deadline() {
        let mut handle = make_handle();

        StateMachine::observe(&mut handle, at(5), status("running"), deadline());
        StateMachine::observe(&mut handle, at(10), status("running"), deadline());
        let t = StateMachine::observe(&mut handle, at(650), status("succeeded"), deadline());

        assert_eq!(
            t,
            Transition::Concluded(OutcomeRecord::new("SKU-1", JobOutcome::TimedOut, at(600)))
        );
        assert_eq!(handle.state, JobState::TimedOut);
        // The late response is not counted as a poll.
        assert_eq!(handle.polls, 2);
    }

    #[test]
    fn deadline_boundary_is_inclusive() {
        let mut handle = make_handle();
        assert!(StateMachine::check_deadline(&mut handle, at(599), deadline()).is_none());
        let record = StateMachine::check_deadline(&mut handle, at(600), deadline()).unwrap();
        assert_eq!(record.outcome, JobOutcome::TimedOut);
        assert_eq!(record.concluded_at, at(600));
    }

    #[test]
    fn terminal_handle_ignores_further_observations() {
        let mut handle = make_handle();
        StateMachine::observe(&mut handle, at(5), status("failed"), deadline());
        assert_eq!(handle.state, JobState::Failed);

        let t = StateMachine::observe(&mut handle, at(10), status("succeeded"), deadline());
        assert_eq!(t, Transition::Ignored);
        assert_eq!(handle.state, JobState::Failed);
        assert!(StateMachine::check_deadline(&mut handle, at(900), deadline()).is_none());
    }

    #[test]
    fn transient_error_keeps_state() {
        let mut handle = make_handle();
        let t = StateMachine::observe(
            &mut handle,
            at(5),
            Observation::TransientError("503 Service Unavailable".into()),
            deadline(),
        );
        assert_eq!(
            t,
            Transition::Unchanged {
                reason: "503 Service Unavailable".into()
            }
        );
        assert_eq!(handle.state, JobState::Submitted);
        assert_eq!(handle.transient_failures, 1);
        assert_eq!(handle.last_polled_at, Some(at(5)));
    }

    #[test]
    fn permanent_error_fails_without_retry() {
        let mut handle = make_handle();
        let t = StateMachine::observe(
            &mut handle,
            at(5),
            Observation::PermanentError("404 job not found".into()),
            deadline(),
        );
        match t {
            Transition::Concluded(record) => assert_eq!(
                record.outcome,
                JobOutcome::Failed {
                    reason: "404 job not found".into(),
                    retryable: false
                }
            ),
            other => panic!("expected Concluded, got {other:?}"),
        }
        assert_eq!(handle.state, JobState::Failed);
    }

    #[test]
    fn unknown_status_is_treated_as_running() {
        let mut handle = make_handle();
        let t = StateMachine::observe(&mut handle, at(5), status("warming_up"), deadline());
        assert_eq!(t, Transition::Advanced(JobState::Running));
        assert_eq!(handle.state, JobState::Running);
    }

    #[test]
    fn remote_artifact_and_error_are_preferred() {
        let mut ok = make_handle();
        let t = StateMachine::observe(
            &mut ok,
            at(5),
            Observation::Status(RemoteStatus {
                state: "SUCCEEDED".into(),
                artifact_location: Some("https://cdn/poster.pdf".into()),
                error: None,
            }),
            deadline(),
        );
        assert!(matches!(
            t,
            Transition::Concluded(OutcomeRecord {
                outcome: JobOutcome::Succeeded { ref artifact_location },
                ..
            }) if artifact_location == "https://cdn/poster.pdf"
        ));

        let mut bad = make_handle();
        let t = StateMachine::observe(
            &mut bad,
            at(5),
            Observation::Status(RemoteStatus {
                state: "failed".into(),
                artifact_location: None,
                error: Some("font not embedded".into()),
            }),
            deadline(),
        );
        assert!(matches!(
            t,
            Transition::Concluded(OutcomeRecord {
                outcome: JobOutcome::Failed { ref reason, retryable: false },
                ..
            }) if reason == "font not embedded"
        ));
    }

    #[test]
    fn classify_remote_states() {
        assert_eq!(RemoteState::classify("succeeded"), RemoteState::Succeeded);
        assert_eq!(RemoteState::classify(" Failed "), RemoteState::Failed);
        assert_eq!(RemoteState::classify("not_started"), RemoteState::Pending);
        assert_eq!(RemoteState::classify("queued"), RemoteState::Pending);
        assert_eq!(
            RemoteState::classify("paused"),
            RemoteState::Unknown("paused".into())
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(JobState::Submitted.to_string(), "SUBMITTED");
        assert_eq!(JobState::Running.to_string(), "RUNNING");
        assert_eq!(JobState::Succeeded.to_string(), "SUCCEEDED");
        assert_eq!(JobState::Failed.to_string(), "FAILED");
        assert_eq!(JobState::TimedOut.to_string(), "TIMED_OUT");
    }
}
