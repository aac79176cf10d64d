use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{GatewayError, GatewayErrorCategory, RetryPolicy};
use reqwest::{Client, Method, Url};
use serde_json::Value;

use crate::transport::{BackendMethod, BackendRequest, BackendTransport};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
const API_KEY_HEADER: &str = "x-api-key";

/// Settings for reaching the poll backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendClientConfig {
    /// Base URL, for example `https://api.example.org/v1`.
    pub base_url: String,
    /// Optional key sent as `x-api-key`.
    pub api_key: Option<String>,
    /// Per-attempt timeout.
    pub request_timeout_ms: u64,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl BackendClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.retry_base_delay_ms,
            self.retry_max_delay_ms,
        )
    }
}

/// `reqwest`-backed transport speaking JSON to the backend.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &BackendClientConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url).map_err(|err| {
            GatewayError::new(
                GatewayErrorCategory::Config,
                "invalid_backend_url",
                format!("invalid backend url '{}': {err}", config.base_url),
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::new(
                GatewayErrorCategory::Config,
                "invalid_backend_url",
                format!("backend url '{}' cannot be a base", config.base_url),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| {
                GatewayError::new(
                    GatewayErrorCategory::Config,
                    "http_client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn url_for(&self, segments: &[String]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                GatewayError::new(
                    GatewayErrorCategory::Config,
                    "invalid_backend_url",
                    "backend url cannot be a base",
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn execute(&self, request: &BackendRequest) -> Result<Value, GatewayError> {
        let url = self.url_for(&request.segments)?;
        let mut builder = self.client.request(reqwest_method(request.method), url);
        if let Some(api_key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::backend_status(status.as_u16(), body));
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            GatewayError::new(
                GatewayErrorCategory::Serialization,
                "backend_decode_error",
                err.to_string(),
            )
        })
    }
}

fn reqwest_method(method: BackendMethod) -> Method {
    match method {
        BackendMethod::Get => Method::GET,
        BackendMethod::Post => Method::POST,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::new(
            GatewayErrorCategory::BackendUnavailable,
            "backend_timeout",
            err.to_string(),
        );
    }
    if let Some(status) = err.status() {
        return GatewayError::backend_status(status.as_u16(), err.to_string());
    }
    GatewayError::new(
        GatewayErrorCategory::Network,
        "backend_unavailable",
        err.to_string(),
    )
}
