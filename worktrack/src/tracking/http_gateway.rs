// HTTP implementation of the task gateway
// Talks JSON to the project API; every failure is folded into GatewayError

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};

use super::gateway::{GatewayError, TaskGateway};
use super::models::{Task, TrackingSession};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartTrackingBody<'a> {
    task_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// Gateway backed by the remote project API
#[derive(Debug, Clone)]
pub struct HttpTaskGateway {
    base_url: String,
    client: Client,
}

impl HttpTaskGateway {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| GatewayError::Auth(format!("Invalid API token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::Unknown(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "gateway response");

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Unknown(format!("Unexpected response body: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

#[async_trait]
impl TaskGateway for HttpTaskGateway {
    #[instrument(name = "gateway_get_tasks", skip(self))]
    async fn get_tasks(&self) -> Result<Vec<Task>, GatewayError> {
        self.send(self.client.get(self.url("tasks"))).await
    }

    #[instrument(name = "gateway_start_tracking", skip(self))]
    async fn start_tracking(
        &self,
        task_id: &str,
        description: Option<&str>,
    ) -> Result<TrackingSession, GatewayError> {
        let body = StartTrackingBody {
            task_id,
            description,
        };
        self.send(
            self.client
                .post(self.url("time-tracking/start"))
                .json(&body),
        )
        .await
    }

    #[instrument(name = "gateway_stop_tracking", skip(self))]
    async fn stop_tracking(&self, session_id: &str) -> Result<TrackingSession, GatewayError> {
        let path = format!("time-tracking/{}/stop", session_id);
        self.send(self.client.post(self.url(&path))).await
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        GatewayError::Network(format!("Network error: {}", err))
    } else {
        GatewayError::Unknown(err.to_string())
    }
}

/// Map a non-success status (and its body, if any) onto the error taxonomy
fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let message = extract_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()))
    });

    match status {
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            GatewayError::Validation(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Auth(message),
        s if s.is_server_error() => GatewayError::Server {
            status: s.as_u16(),
            message,
        },
        _ => GatewayError::Unknown(message),
    }
}

/// Pull `message` or `error` out of a JSON error body
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|field| value.get(field).and_then(|v| v.as_str()))
        .map(str::to_string)
        .filter(|m| !m.trim().is_empty())
}
