//! Starts render jobs for validated work items.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::error::SubmissionError;
use crate::gate::WorkItem;
use crate::render::RenderApi;
use crate::state_machine::{JobHandle, RetryConfig};
use crate::storage::{HttpMethod, UrlPresigner};

pub struct JobSubmitter<'a, R, P, C> {
    render: &'a R,
    presigner: &'a P,
    clock: &'a C,
    storage: &'a StorageConfig,
    retry: &'a RetryConfig,
}

impl<'a, R: RenderApi, P: UrlPresigner, C: Clock> JobSubmitter<'a, R, P, C> {
    pub fn new(
        render: &'a R,
        presigner: &'a P,
        clock: &'a C,
        storage: &'a StorageConfig,
        retry: &'a RetryConfig,
    ) -> Self {
        Self {
            render,
            presigner,
            clock,
            storage,
            retry,
        }
    }

    /// One submission attempt: presign both URLs, then a single remote call.
    pub async fn submit(&self, item: &WorkItem, attempt: u32) -> Result<JobHandle, SubmissionError> {
        let expiry = Duration::from_secs(self.storage.url_expiry_secs);
        let output_key = self.storage.output_key(&item.key);

        let template_url = self
            .presigner
            .create_url(&self.storage.assets_bucket, &self.storage.template_key, expiry, HttpMethod::Get)
            .map_err(|e| SubmissionError::permanent(format!("presigning template URL: {e}")))?;
        let output_url = self
            .presigner
            .create_url(&self.storage.outputs_bucket, &output_key, expiry, HttpMethod::Put)
            .map_err(|e| SubmissionError::permanent(format!("presigning output URL: {e}")))?;

        let data = Value::Object(item.payload.clone());
        let status_url = self
            .render
            .submit_job(&template_url, &output_url, &data)
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    SubmissionError::retryable(e.to_string())
                } else {
                    SubmissionError::permanent(e.to_string())
                }
            })?;

        info!(key = %item.key, attempt, status_url = %status_url, "render job submitted");
        Ok(JobHandle::new(
            &item.key,
            status_url,
            format!("s3://{}/{output_key}", self.storage.outputs_bucket),
            self.clock.now(),
            attempt,
        ))
    }

    /// Submit with backoff between retryable failures, up to `max_attempts`.
    pub async fn submit_with_retry(&self, item: &WorkItem) -> Result<JobHandle, SubmissionError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.submit(item, attempt).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.retryable && attempt < max_attempts => {
                    let delay = self.retry.jittered_delay(attempt, &mut rand::thread_rng());
                    warn!(
                        key = %item.key,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e.cause,
                        "retrying submission"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(key = %item.key, attempt, error = %e, "submission abandoned");
                    return Err(e);
                }
            }
        }
    }
}
