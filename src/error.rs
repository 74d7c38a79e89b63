use thiserror::Error;

use crate::ledger::LedgerError;
use crate::secrets::SecretError;
use crate::sheets::SheetError;

/// Run-level errors. Anything surfacing here aborts the stage that raised it.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Sheet error: {0}")]
    Sheet(#[from] SheetError),

    #[error("Run ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Incomplete(#[from] IncompleteRunError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A single submission attempt that did not produce a job handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionError {
    pub cause: String,
    pub retryable: bool,
}

impl SubmissionError {
    pub fn retryable(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            retryable: true,
        }
    }

    pub fn permanent(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.retryable { "retryable" } else { "permanent" };
        write!(f, "submission failed ({kind}): {}", self.cause)
    }
}

impl std::error::Error for SubmissionError {}

/// `finalize()` was called while some submitted keys still lack an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("run is incomplete: {} work item(s) without an outcome ({})", .missing.len(), .missing.join(", "))]
pub struct IncompleteRunError {
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("outcome recorded for unknown work item: {0}")]
    UnknownKey(String),
}
