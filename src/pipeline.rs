//! The three run stages: intake, render and report.
//!
//! Each stage is a discrete step whose input and output serialize to JSON,
//! so a workflow engine (or the CLI) can run them separately and retry any
//! one of them. The render stage is resumable through the [`RunLedger`].

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregate::{RunAggregate, RunAggregator};
use crate::clock::Clock;
use crate::config::{ForgeConfig, SheetConfig};
use crate::error::ForgeError;
use crate::gate::{self, RawRecord, WorkItem};
use crate::ledger::RunLedger;
use crate::notify::Notifier;
use crate::poller::JobPoller;
use crate::render::RenderApi;
use crate::report::NotificationPayload;
use crate::schema::SchemaValidator;
use crate::sheets::{SheetError, SheetReader};
use crate::state_machine::{JobOutcome, OutcomeRecord};
use crate::storage::UrlPresigner;
use crate::submitter::JobSubmitter;

pub use crate::report::compile_report;

/// Output of the intake stage and input of the render stage.
///
/// `run_id` is minted per gate step and names the run ledger, so tracking
/// the same output again resumes while a fresh gate step starts a new run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOutput {
    pub run_id: String,
    pub spreadsheet_id: String,
    pub valid_work_items: Vec<WorkItem>,
    pub invalid_count: usize,
}

/// Reads the sheet and gates every row.
pub struct IntakeStage<'a, S, V, C> {
    sheets: &'a S,
    schema: &'a V,
    clock: &'a C,
    config: &'a SheetConfig,
}

impl<'a, S, V, C> IntakeStage<'a, S, V, C>
where
    S: SheetReader,
    V: SchemaValidator,
    C: Clock,
{
    pub fn new(sheets: &'a S, schema: &'a V, clock: &'a C, config: &'a SheetConfig) -> Self {
        Self {
            sheets,
            schema,
            clock,
            config,
        }
    }

    pub async fn gate_and_validate(&self, sheet_id: &str) -> Result<GateOutput, ForgeError> {
        let records = self.read_with_retry(sheet_id).await?;
        let total = records.len();
        let result = gate::gate_rows(records, self.schema, &self.config.rules);
        let run_id = Uuid::new_v4().to_string();
        info!(
            sheet_id,
            run_id = %run_id,
            rows = total,
            valid = result.valid.len(),
            invalid = result.invalid_count(),
            "sheet gated"
        );
        Ok(GateOutput {
            run_id,
            spreadsheet_id: sheet_id.to_string(),
            invalid_count: result.invalid_count(),
            valid_work_items: result.valid,
        })
    }

    async fn read_with_retry(&self, sheet_id: &str) -> Result<Vec<RawRecord>, SheetError> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.sheets.read_rows(sheet_id, &self.config.range).await {
                Ok(records) => return Ok(records),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = retry.jittered_delay(attempt, &mut rand::thread_rng());
                    warn!(
                        sheet_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying sheet read"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Submits every work item once and tracks it to a terminal outcome.
pub struct RenderStage<'a, R, P, C> {
    render: &'a R,
    presigner: &'a P,
    clock: &'a C,
    config: &'a ForgeConfig,
}

impl<'a, R, P, C> RenderStage<'a, R, P, C>
where
    R: RenderApi,
    P: UrlPresigner,
    C: Clock,
{
    pub fn new(render: &'a R, presigner: &'a P, clock: &'a C, config: &'a ForgeConfig) -> Self {
        Self {
            render,
            presigner,
            clock,
            config,
        }
    }

    /// Track all items with at most `run.concurrency` in flight and fold
    /// their outcomes. `on_outcome` sees each outcome as it lands.
    pub async fn submit_and_track_jobs(
        &self,
        gate: &GateOutput,
        ledger: &RunLedger,
        mut on_outcome: impl FnMut(&OutcomeRecord),
    ) -> Result<RunAggregate, ForgeError> {
        let mut seen = HashSet::new();
        let items: Vec<&WorkItem> = gate
            .valid_work_items
            .iter()
            .filter(|item| {
                let fresh = seen.insert(item.key.as_str());
                if !fresh {
                    warn!(key = %item.key, "duplicate work item ignored");
                }
                fresh
            })
            .collect();

        let aggregator = RunAggregator::new(
            &gate.spreadsheet_id,
            items.iter().map(|item| item.key.clone()),
            gate.invalid_count,
        );
        info!(
            sheet_id = %gate.spreadsheet_id,
            run_id = %gate.run_id,
            items = items.len(),
            concurrency = self.config.run.concurrency,
            "tracking render jobs"
        );

        let mut outcomes = stream::iter(items.into_iter().map(|item| self.track_item(item, ledger)))
            .buffer_unordered(self.config.run.concurrency.max(1));
        while let Some(record) = outcomes.next().await {
            aggregator.record(&record)?;
            on_outcome(&record);
        }

        Ok(aggregator.finalize()?)
    }

    async fn track_item(&self, item: &WorkItem, ledger: &RunLedger) -> OutcomeRecord {
        if let Some(record) = ledger.outcome(&item.key) {
            info!(key = %item.key, outcome = %record.outcome, "outcome already in ledger");
            return record;
        }

        let mut handle = match ledger.handle(&item.key) {
            Some(handle) => {
                info!(key = %item.key, polls = handle.polls, "resuming tracked render job");
                handle
            }
            None => {
                match ledger.claim_submission(&item.key) {
                    Ok(true) => {}
                    Ok(false) => {
                        // Claimed by an earlier run that never recorded a handle.
                        // The remote may hold a job for it, so it is not sent again.
                        warn!(key = %item.key, "submission interrupted earlier, not resubmitting");
                        return self.conclude(
                            ledger,
                            &item.key,
                            JobOutcome::Failed {
                                reason: "submission interrupted before a job handle was recorded".into(),
                                retryable: true,
                            },
                        );
                    }
                    Err(e) => {
                        error!(key = %item.key, error = %e, "cannot record submission claim");
                        return self.conclude(
                            ledger,
                            &item.key,
                            JobOutcome::Failed {
                                reason: format!("cannot record submission claim: {e}"),
                                retryable: true,
                            },
                        );
                    }
                }

                let submitter = JobSubmitter::new(
                    self.render,
                    self.presigner,
                    self.clock,
                    &self.config.storage,
                    &self.config.submit,
                );
                match submitter.submit_with_retry(item).await {
                    Ok(handle) => {
                        if let Err(e) = ledger.put_handle(&handle) {
                            error!(key = %item.key, error = %e, "failed to persist job handle");
                        }
                        handle
                    }
                    Err(e) => {
                        return self.conclude(
                            ledger,
                            &item.key,
                            JobOutcome::Failed {
                                reason: e.cause,
                                retryable: e.retryable,
                            },
                        );
                    }
                }
            }
        };

        let poller = JobPoller::new(self.render, self.clock, &self.config.poll);
        let record = poller
            .drive(&mut handle, |h| {
                if let Err(e) = ledger.put_handle(h) {
                    warn!(key = %h.work_item_key, error = %e, "failed to persist job handle");
                }
            })
            .await;
        self.store_outcome(ledger, record)
    }

    fn conclude(&self, ledger: &RunLedger, key: &str, outcome: JobOutcome) -> OutcomeRecord {
        self.store_outcome(ledger, OutcomeRecord::new(key, outcome, self.clock.now()))
    }

    fn store_outcome(&self, ledger: &RunLedger, record: OutcomeRecord) -> OutcomeRecord {
        if let Err(e) = ledger.put_outcome(&record) {
            warn!(key = %record.work_item_key, error = %e, "failed to persist outcome");
        }
        record
    }
}

/// Send the report. A delivery failure is logged and never fails the run.
pub async fn deliver_report(notifier: &impl Notifier, payload: &NotificationPayload) -> bool {
    match notifier.send(payload).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to deliver run report");
            false
        }
    }
}
