//! Poll loop for a single submitted render job.
//!
//! The loop keeps no timers of its own. Every wait is derived from the
//! handle (`submitted_at`, `last_polled_at`, `polls`) and the clock, so a
//! handle loaded back from the run ledger picks up exactly where it stopped.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::render::RenderApi;
use crate::state_machine::{
    JobHandle, Observation, OutcomeRecord, PollConfig, StateMachine, Transition,
};

pub struct JobPoller<'a, R, C> {
    render: &'a R,
    clock: &'a C,
    config: &'a PollConfig,
}

impl<'a, R: RenderApi, C: Clock> JobPoller<'a, R, C> {
    pub fn new(render: &'a R, clock: &'a C, config: &'a PollConfig) -> Self {
        Self {
            render,
            clock,
            config,
        }
    }

    /// Poll `handle` until it concludes, calling `persist` after every change.
    pub async fn drive(
        &self,
        handle: &mut JobHandle,
        mut persist: impl FnMut(&JobHandle),
    ) -> OutcomeRecord {
        let deadline = self.config.deadline();

        loop {
            if let Some(record) = &handle.conclusion {
                return record.clone();
            }
            if let Some(record) = StateMachine::check_deadline(handle, self.clock.now(), deadline) {
                warn!(
                    key = %handle.work_item_key,
                    polls = handle.polls,
                    deadline_secs = self.config.deadline_secs,
                    "render job timed out"
                );
                persist(handle);
                return record;
            }

            let wait = self.next_wait(handle, deadline);
            debug!(key = %handle.work_item_key, wait_ms = wait.as_millis() as u64, "waiting before next poll");
            self.clock.sleep(wait).await;

            // Waking at the deadline must not cost another request.
            if self.clock.now() >= handle.deadline_at(deadline) {
                continue;
            }

            let observation = match self.render.get_status(&handle.status_endpoint).await {
                Ok(status) => Observation::Status(status),
                Err(e) if e.is_retryable() => Observation::TransientError(e.to_string()),
                Err(e) => Observation::PermanentError(e.to_string()),
            };

            match StateMachine::observe(handle, self.clock.now(), observation, deadline) {
                Transition::Advanced(state) => {
                    debug!(key = %handle.work_item_key, state = %state, polls = handle.polls, "render job in progress");
                }
                Transition::Unchanged { reason } => {
                    warn!(
                        key = %handle.work_item_key,
                        failures = handle.transient_failures,
                        error = %reason,
                        "transient error while polling render job"
                    );
                }
                Transition::Concluded(record) => {
                    info!(key = %handle.work_item_key, outcome = %record.outcome, polls = handle.polls, "render job concluded");
                }
                Transition::Ignored => {}
            }
            persist(handle);
        }
    }

    /// Time until the next poll is due, never past the deadline.
    fn next_wait(&self, handle: &JobHandle, deadline: TimeDelta) -> Duration {
        let deadline_at = handle.deadline_at(deadline);
        let anchor = handle.last_polled_at.unwrap_or(handle.submitted_at);
        let interval = self
            .config
            .jittered_interval(handle.polls, &mut rand::thread_rng());
        let due: DateTime<Utc> = TimeDelta::from_std(interval)
            .ok()
            .and_then(|delta| anchor.checked_add_signed(delta))
            .unwrap_or(deadline_at)
            .min(deadline_at);
        (due - self.clock.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;

    use crate::clock::ManualClock;
    use crate::render::{RemoteStatus, RenderError};
    use crate::state_machine::{JobOutcome, JobState};

    type Step = (Duration, Result<RemoteStatus, RenderError>);

    /// Replays scripted status responses, optionally taking time to answer.
    /// Once the script runs out every poll reports `running`.
    struct ScriptedRender<'a> {
        clock: &'a ManualClock,
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl<'a> ScriptedRender<'a> {
        fn new(clock: &'a ManualClock, steps: Vec<Step>) -> Self {
            Self {
                clock,
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RenderApi for ScriptedRender<'_> {
        async fn submit_job(&self, _: &str, _: &str, _: &Value) -> Result<String, RenderError> {
            Err(RenderError::MissingStatusUrl)
        }

        async fn get_status(&self, _: &str) -> Result<RemoteStatus, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some((latency, response)) => {
                    self.clock.advance(latency);
                    response
                }
                None => Ok(status("running")),
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn status(state: &str) -> RemoteStatus {
        RemoteStatus {
            state: state.into(),
            artifact_location: None,
            error: None,
        }
    }

    fn fixed_config() -> PollConfig {
        PollConfig {
            initial_interval_secs: 5,
            max_interval_secs: 5,
            multiplier: 1.0,
            jitter: 0.0,
            deadline_secs: 600,
        }
    }

    fn handle() -> JobHandle {
        JobHandle::new("SKU-1", "https://render/status/1", "s3://out/generated/SKU-1_poster.pdf", t0(), 1)
    }

    fn instant(response: Result<RemoteStatus, RenderError>) -> Step {
        (Duration::ZERO, response)
    }

    #[tokio::test]
    async fn succeeds_on_third_poll() {
        let clock = ManualClock::new(t0());
        let render = ScriptedRender::new(
            &clock,
            vec![
                instant(Ok(status("running"))),
                instant(Ok(status("running"))),
                instant(Ok(status("succeeded"))),
            ],
        );
        let config = fixed_config();
        let mut handle = handle();
        let mut persisted = Vec::new();

        let record = JobPoller::new(&render, &clock, &config)
            .drive(&mut handle, |h| persisted.push(h.last_polled_at))
            .await;

        assert_eq!(
            record.outcome,
            JobOutcome::Succeeded {
                artifact_location: "s3://out/generated/SKU-1_poster.pdf".into()
            }
        );
        assert_eq!(record.concluded_at, at(15));
        assert_eq!(persisted, vec![Some(at(5)), Some(at(10)), Some(at(15))]);
        assert_eq!(handle.state, JobState::Succeeded);
        assert_eq!(render.calls(), 3);
    }

    #[tokio::test]
    async fn late_response_past_deadline_times_out_at_deadline() {
        let clock = ManualClock::new(t0());
        let render = ScriptedRender::new(
            &clock,
            vec![
                instant(Ok(status("running"))),
                instant(Ok(status("running"))),
                // Issued at t=15, answered at t=650.
                (Duration::from_secs(635), Ok(status("succeeded"))),
            ],
        );
        let config = fixed_config();
        let mut handle = handle();

        let record = JobPoller::new(&render, &clock, &config)
            .drive(&mut handle, |_| {})
            .await;

        assert_eq!(record.outcome, JobOutcome::TimedOut);
        assert_eq!(record.concluded_at, at(600));
        assert_eq!(handle.state, JobState::TimedOut);
        assert_eq!(handle.polls, 2);
    }

    #[tokio::test]
    async fn never_terminal_job_times_out() {
        let clock = ManualClock::new(t0());
        let render = ScriptedRender::new(&clock, Vec::new());
        let config = fixed_config();
        let mut handle = handle();

        let record = JobPoller::new(&render, &clock, &config)
            .drive(&mut handle, |_| {})
            .await;

        assert_eq!(record.outcome, JobOutcome::TimedOut);
        assert_eq!(record.concluded_at, at(600));
        // Polls at 5, 10, ..., 595; the wake-up at 600 issues no request.
        assert_eq!(render.calls(), 119);
        assert_eq!(clock.now(), at(600));
    }

    #[tokio::test]
    async fn transient_errors_do_not_change_state() {
        let clock = ManualClock::new(t0());
        let render = ScriptedRender::new(
            &clock,
            vec![
                instant(Err(RenderError::Server {
                    status: 503,
                    message: "unavailable".into(),
                })),
                instant(Err(RenderError::RateLimited { retry_after_ms: 1000 })),
                instant(Ok(RemoteStatus {
                    state: "succeeded".into(),
                    artifact_location: Some("s3://elsewhere/SKU-1.pdf".into()),
                    error: None,
                })),
            ],
        );
        let config = fixed_config();
        let mut handle = handle();

        let record = JobPoller::new(&render, &clock, &config)
            .drive(&mut handle, |_| {})
            .await;

        assert_eq!(
            record.outcome,
            JobOutcome::Succeeded {
                artifact_location: "s3://elsewhere/SKU-1.pdf".into()
            }
        );
        assert_eq!(handle.transient_failures, 2);
        assert_eq!(handle.polls, 3);
    }

    #[tokio::test]
    async fn permanent_poll_error_fails_the_job() {
        let clock = ManualClock::new(t0());
        let render = ScriptedRender::new(
            &clock,
            vec![instant(Err(RenderError::ApiError {
                status: 404,
                message: "job not found".into(),
            }))],
        );
        let config = fixed_config();
        let mut handle = handle();

        let record = JobPoller::new(&render, &clock, &config)
            .drive(&mut handle, |_| {})
            .await;

        match record.outcome {
            JobOutcome::Failed { reason, retryable } => {
                assert!(reason.contains("404"));
                assert!(!retryable);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(record.concluded_at, at(5));
    }

    #[tokio::test]
    async fn resumed_handle_past_deadline_is_not_polled() {
        let clock = ManualClock::new(at(700));
        let render = ScriptedRender::new(&clock, Vec::new());
        let config = fixed_config();
        let mut handle = handle();
        handle.state = JobState::Running;
        handle.polls = 4;
        handle.last_polled_at = Some(at(20));
        let mut persists = 0;

        let record = JobPoller::new(&render, &clock, &config)
            .drive(&mut handle, |_| persists += 1)
            .await;

        assert_eq!(record.outcome, JobOutcome::TimedOut);
        assert_eq!(record.concluded_at, at(600));
        assert_eq!(render.calls(), 0);
        assert_eq!(persists, 1);
    }

    #[tokio::test]
    async fn resumed_handle_continues_from_last_poll() {
        let clock = ManualClock::new(at(12));
        let render = ScriptedRender::new(&clock, vec![instant(Ok(status("succeeded")))]);
        let config = fixed_config();
        let mut handle = handle();
        handle.state = JobState::Running;
        handle.polls = 2;
        handle.last_polled_at = Some(at(10));

        let record = JobPoller::new(&render, &clock, &config)
            .drive(&mut handle, |_| {})
            .await;

        // Due at 15 (last poll + interval), not at 12 + 5.
        assert_eq!(record.concluded_at, at(15));
        assert_eq!(handle.polls, 3);
    }

    #[tokio::test]
    async fn concluded_handle_returns_its_record() {
        let clock = ManualClock::new(t0());
        let render = ScriptedRender::new(&clock, Vec::new());
        let config = fixed_config();
        let mut handle = handle();
        let done = OutcomeRecord::new("SKU-1", JobOutcome::TimedOut, at(600));
        handle.state = JobState::TimedOut;
        handle.conclusion = Some(done.clone());

        let record = JobPoller::new(&render, &clock, &config)
            .drive(&mut handle, |_| {})
            .await;
        assert_eq!(record, done);
        assert_eq!(render.calls(), 0);
    }
}
