//! Delivery of the run report to a chat webhook.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::info;

use crate::report::NotificationPayload;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub trait Notifier {
    fn send(&self, payload: &NotificationPayload) -> impl Future<Output = Result<(), NotifyError>>;
}

/// Posts `{"text": ...}` to a Slack incoming webhook.
pub struct SlackNotifier {
    http: Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, NotifyError> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }
}

impl Notifier for SlackNotifier {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let response = self.http.post(&self.webhook_url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        info!("run report delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_payload_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/T000/B000/xyz"))
            .and(body_json(json!({"text": "3 posters generated"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(format!("{}/services/T000/B000/xyz", server.uri())).unwrap();
        notifier
            .send(&NotificationPayload {
                text: "3 posters generated".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(server.uri()).unwrap();
        let err = notifier
            .send(&NotificationPayload { text: "x".into() })
            .await
            .unwrap_err();
        match err {
            NotifyError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no_service");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
