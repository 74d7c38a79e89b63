//! Run-level fold of job outcomes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AggregateError, IncompleteRunError};
use crate::state_machine::{JobOutcome, OutcomeRecord};

/// The fold of all outcomes plus the rejected-row count for one run.
///
/// A key appears in at most one of `succeeded` and `failed`. Timed-out jobs
/// are reported as failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAggregate {
    pub spreadsheet_id: String,
    pub succeeded: BTreeMap<String, String>,
    pub failed: BTreeMap<String, String>,
    pub invalid_count: usize,
}

impl RunAggregate {
    pub fn contains(&self, key: &str) -> bool {
        self.succeeded.contains_key(key) || self.failed.contains_key(key)
    }

    pub fn recorded(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Collects outcomes for a fixed set of submitted keys.
///
/// `record` is safe to call concurrently and idempotent per key.
#[derive(Debug)]
pub struct RunAggregator {
    expected: BTreeSet<String>,
    inner: Mutex<RunAggregate>,
}

impl RunAggregator {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        keys: impl IntoIterator<Item = String>,
        invalid_count: usize,
    ) -> Self {
        Self {
            expected: keys.into_iter().collect(),
            inner: Mutex::new(RunAggregate {
                spreadsheet_id: spreadsheet_id.into(),
                invalid_count,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunAggregate> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge one outcome. Re-recording a key leaves the aggregate unchanged.
    pub fn record(&self, record: &OutcomeRecord) -> Result<RunAggregate, AggregateError> {
        let key = &record.work_item_key;
        if !self.expected.contains(key) {
            return Err(AggregateError::UnknownKey(key.clone()));
        }

        let mut aggregate = self.lock();
        if aggregate.contains(key) {
            debug!(key = %key, "outcome already recorded, ignoring duplicate");
            return Ok(aggregate.clone());
        }
        match &record.outcome {
            JobOutcome::Succeeded { artifact_location } => {
                aggregate
                    .succeeded
                    .insert(key.clone(), artifact_location.clone());
            }
            JobOutcome::Failed { reason, .. } => {
                aggregate.failed.insert(key.clone(), reason.clone());
            }
            JobOutcome::TimedOut => {
                aggregate.failed.insert(key.clone(), record.outcome.to_string());
            }
        }
        Ok(aggregate.clone())
    }

    /// The complete aggregate, or the keys still missing an outcome.
    pub fn finalize(&self) -> Result<RunAggregate, IncompleteRunError> {
        let aggregate = self.lock();
        let missing: Vec<String> = self
            .expected
            .iter()
            .filter(|k| !aggregate.contains(k))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(IncompleteRunError { missing });
        }
        Ok(aggregate.clone())
    }
}
