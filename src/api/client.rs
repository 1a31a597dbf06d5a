//! Bearer-authenticated HTTP client for the generation backend.
//!
//! Everything the engine needs from the backend goes through the
//! [`GenerationApi`] trait so tests can substitute scripted
//! implementations without a server.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::api::models::{GenerationRequest, InputType, ProcessStateRow, StartResponse};
use crate::errors::ApiError;

/// HTTP surface consumed by the channel manager and the engine.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// One full-state read of a process. Never a poll loop.
    async fn fetch_process(&self, process_id: &str) -> Result<ProcessStateRow, ApiError>;

    /// Submit a user decision (`{response_type, payload}`).
    async fn submit_user_input(
        &self,
        process_id: &str,
        response_type: InputType,
        payload: Value,
    ) -> Result<(), ApiError>;

    async fn pause(&self, process_id: &str) -> Result<bool, ApiError>;

    async fn resume(&self, process_id: &str) -> Result<bool, ApiError>;

    async fn cancel(&self, process_id: &str) -> Result<bool, ApiError>;

    /// Kick off a new generation; the returned process id is what the
    /// caller watches next.
    async fn start_generation(
        &self,
        request: &GenerationRequest,
    ) -> Result<StartResponse, ApiError>;
}

/// Boolean result shape of the control endpoints.
#[derive(Debug, Deserialize)]
struct ControlResponse {
    #[serde(default)]
    success: bool,
}

/// `reqwest`-backed [`GenerationApi`] implementation.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, endpoint)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .header("X-Request-Id", Uuid::new_v4().to_string())
    }

    /// Send a request and map transport/status failures into [`ApiError`].
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|source| ApiError::RequestFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn json_body<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T, ApiError> {
        response
            .json()
            .await
            .map_err(|source| ApiError::DecodeFailed {
                endpoint: endpoint.to_string(),
                source,
            })
    }

    async fn control(&self, method: reqwest::Method, path: &str) -> Result<bool, ApiError> {
        let endpoint = self.endpoint(path);
        let response = self.send(self.request(method, &endpoint), &endpoint).await?;
        let result: ControlResponse = self.json_body(response, &endpoint).await?;
        Ok(result.success)
    }
}

#[async_trait]
impl GenerationApi for ApiClient {
    async fn fetch_process(&self, process_id: &str) -> Result<ProcessStateRow, ApiError> {
        if process_id.is_empty() {
            return Err(ApiError::MissingProcessId);
        }
        let endpoint = self.endpoint(&format!("/api/processes/{process_id}"));
        let response = self
            .send(self.request(reqwest::Method::GET, &endpoint), &endpoint)
            .await?;
        let row: ProcessStateRow = self.json_body(response, &endpoint).await?;
        debug!(process_id, status = ?row.state.status, "fetched process state");
        Ok(row)
    }

    async fn submit_user_input(
        &self,
        process_id: &str,
        response_type: InputType,
        payload: Value,
    ) -> Result<(), ApiError> {
        let endpoint = self.endpoint(&format!("/api/processes/{process_id}/user-input"));
        let body = json!({
            "response_type": response_type,
            "payload": payload,
        });
        self.send(
            self.request(reqwest::Method::POST, &endpoint).json(&body),
            &endpoint,
        )
        .await?;
        debug!(process_id, response_type = %response_type, "submitted user input");
        Ok(())
    }

    async fn pause(&self, process_id: &str) -> Result<bool, ApiError> {
        self.control(
            reqwest::Method::POST,
            &format!("/api/processes/{process_id}/pause"),
        )
        .await
    }

    async fn resume(&self, process_id: &str) -> Result<bool, ApiError> {
        self.control(
            reqwest::Method::POST,
            &format!("/api/processes/{process_id}/resume"),
        )
        .await
    }

    async fn cancel(&self, process_id: &str) -> Result<bool, ApiError> {
        self.control(
            reqwest::Method::DELETE,
            &format!("/api/processes/{process_id}"),
        )
        .await
    }

    async fn start_generation(
        &self,
        request: &GenerationRequest,
    ) -> Result<StartResponse, ApiError> {
        let endpoint = self.endpoint("/api/generation/start");
        let response = self
            .send(
                self.request(reqwest::Method::POST, &endpoint).json(request),
                &endpoint,
            )
            .await?;
        self.json_body(response, &endpoint).await
    }
}
