mod job;
mod state;

pub use job::{JobHandle, JobOutcome, MAX_DEADLINE_SECS, OutcomeRecord, PollConfig, RetryConfig};
pub use state::{JobState, Observation, RemoteState, StateMachine, Transition};
