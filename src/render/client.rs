use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::RenderApi;
use super::error::RenderError;
use super::types::{
    RemoteStatus, RenderCredentials, RenditionRequest, StatusResponse, SubmitResponse,
    TokenResponse,
};

pub const IMS_URL: &str = "https://ims-na1.adobelogin.com/ims/token/v3";
pub const API_BASE_URL: &str = "https://indesign.adobe.io";
pub const API_SCOPE: &str = "openid,AdobeID,indesign_services,creative_cloud,creative_sdk";

pub struct RenderClient {
    credentials: RenderCredentials,
    client: Client,
    ims_url: String,
    api_base_url: String,
    scope: String,
    /// Held across a token request so concurrent callers share one refresh.
    token: Mutex<Option<String>>,
}

impl RenderClient {
    pub fn new(credentials: RenderCredentials) -> Result<Self, RenderError> {
        Self::with_endpoints(
            credentials,
            IMS_URL.to_string(),
            API_BASE_URL.to_string(),
            API_SCOPE.to_string(),
        )
    }

    /// Create a client pointing at custom endpoints (useful for testing).
    pub fn with_endpoints(
        credentials: RenderCredentials,
        ims_url: String,
        api_base_url: String,
        scope: String,
    ) -> Result<Self, RenderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            credentials,
            client,
            ims_url,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            scope,
            token: Mutex::new(None),
        })
    }

    async fn authenticate(&self) -> Result<String, RenderError> {
        info!("requesting render API access token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let response = self.client.post(&self.ims_url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(match status.as_u16() {
                429 => RenderError::RateLimited {
                    retry_after_ms: 1000,
                },
                s if s >= 500 => RenderError::Server { status: s, message },
                s => RenderError::AuthRejected { status: s, message },
            });
        }

        let body = response.json::<TokenResponse>().await?;
        Ok(body.access_token)
    }

    async fn access_token(&self) -> Result<String, RenderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Replaces `rejected` with a fresh token, unless another caller already did.
    async fn refresh_token(&self, rejected: &str) -> Result<String, RenderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token != rejected
        {
            return Ok(token.clone());
        }
        *cached = None;
        let token = self.authenticate().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    fn authorized(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header("x-api-key", &self.credentials.client_id)
    }

    /// Sends a request with the cached token, re-authenticating once on 401.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, RenderError>
    where
        F: Fn() -> RequestBuilder,
    {
        let token = self.access_token().await?;
        let response = self.authorized(build(), &token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        debug!("render API rejected access token, re-authenticating");
        let token = self.refresh_token(&token).await?;
        let response = self.authorized(build(), &token).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, RenderError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000);
        return Err(RenderError::RateLimited {
            retry_after_ms: retry_after,
        });
    }

    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(RenderError::from_status(status.as_u16(), message));
    }

    Ok(response)
}

impl RenderApi for RenderClient {
    async fn submit_job(
        &self,
        input_url: &str,
        output_url: &str,
        data: &Value,
    ) -> Result<String, RenderError> {
        let endpoint = format!("{}/v1/jobs/rendition", self.api_base_url);
        let body = RenditionRequest::new(input_url, output_url, data);

        let response = self
            .send_authorized(|| self.client.post(&endpoint).json(&body))
            .await?;
        let parsed = response.json::<SubmitResponse>().await?;
        let status_url = parsed
            .status_url()
            .ok_or(RenderError::MissingStatusUrl)?
            .to_string();
        debug!(status_url = %status_url, "rendition job accepted");
        Ok(status_url)
    }

    async fn get_status(&self, status_url: &str) -> Result<RemoteStatus, RenderError> {
        let response = self
            .send_authorized(|| self.client.get(status_url))
            .await?;
        let body = response.json::<StatusResponse>().await?;
        Ok(RemoteStatus::from(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> RenderCredentials {
        RenderCredentials {
            client_id: "client-123".into(),
            client_secret: "secret".into(),
        }
    }

    async fn client_for(server: &MockServer) -> RenderClient {
        RenderClient::with_endpoints(
            credentials(),
            format!("{}/ims/token", server.uri()),
            server.uri(),
            API_SCOPE.into(),
        )
        .unwrap()
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/ims/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-1"})),
            )
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn submit_job_returns_status_url() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/jobs/rendition"))
            .and(header("authorization", "Bearer tok-1"))
            .and(header("x-api-key", "client-123"))
            .and(body_partial_json(json!({"data": {"json": {"sku": "A"}}})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "_links": {"self": {"href": format!("{}/v1/jobs/7", server.uri())}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let url = client
            .submit_job("https://in", "https://out", &json!({"sku": "A"}))
            .await
            .unwrap();
        assert_eq!(url, format!("{}/v1/jobs/7", server.uri()));
    }

    #[tokio::test]
    async fn token_is_cached_across_calls() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/jobs/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let url = format!("{}/v1/jobs/7", server.uri());
        assert_eq!(client.get_status(&url).await.unwrap().state, "running");
        assert_eq!(client.get_status(&url).await.unwrap().state, "running");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_token_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ims/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok-1"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/jobs/7"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .expect(8)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let url = format!("{}/v1/jobs/7", server.uri());
        let results = futures::future::join_all((0..8).map(|_| client.get_status(&url))).await;
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn reauthenticates_once_on_unauthorized() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/v1/jobs/7"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/jobs/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "succeeded"})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let status = client
            .get_status(&format!("{}/v1/jobs/7", server.uri()))
            .await
            .unwrap();
        assert_eq!(status.state, "succeeded");
    }

    #[tokio::test]
    async fn missing_status_url_is_permanent() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/jobs/rendition"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"jobId": "7"})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .submit_job("https://in", "https://out", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingStatusUrl));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_errors_are_retryable_and_client_errors_are_not() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/jobs/busy"))
            .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/jobs/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such job"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/jobs/slow"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let busy = client
            .get_status(&format!("{}/v1/jobs/busy", server.uri()))
            .await
            .unwrap_err();
        assert!(busy.is_retryable());

        let gone = client
            .get_status(&format!("{}/v1/jobs/gone", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(gone, RenderError::ApiError { status: 404, .. }));
        assert!(!gone.is_retryable());

        let slow = client
            .get_status(&format!("{}/v1/jobs/slow", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(slow, RenderError::RateLimited { retry_after_ms: 3000 }));
    }

    #[tokio::test]
    async fn rejected_credentials_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ims/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .get_status(&format!("{}/v1/jobs/7", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::AuthRejected { status: 400, .. }));
        assert!(!err.is_retryable());
    }
}
