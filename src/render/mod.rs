pub mod client;
pub mod error;
pub mod types;

use std::future::Future;

use serde_json::Value;

pub use client::RenderClient;
pub use error::RenderError;
pub use types::{RemoteStatus, RenderCredentials};

/// The remote design-rendering service.
///
/// `submit_job` starts an asynchronous rendition and returns the opaque
/// status locator; `get_status` reads the job's current state. The remote
/// does no deduplication of its own.
pub trait RenderApi {
    fn submit_job(
        &self,
        input_url: &str,
        output_url: &str,
        data: &Value,
    ) -> impl Future<Output = Result<String, RenderError>>;

    fn get_status(&self, status_url: &str) -> impl Future<Output = Result<RemoteStatus, RenderError>>;
}
