use std::{sync::Arc, time::Duration};

use gateway_core::{GatewayError, PollRecord, RetryPolicy, VoteRecord};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    http::{BackendClientConfig, HttpTransport},
    transport::{BackendMethod, BackendRequest, BackendTransport},
};

/// Result of a backend call that never fails.
///
/// `NoResponse` covers timeouts, exhausted retries, non-2xx statuses and
/// undecodable bodies. Each of these has already been logged.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome<T> {
    Response(T),
    NoResponse,
}

impl<T> BackendOutcome<T> {
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Response(value) => Some(value),
            Self::NoResponse => None,
        }
    }
}

/// Identifier returned after storing a poll.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredPoll {
    #[serde(default)]
    pub poll_id: Value,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessedMarker {
    #[serde(default)]
    already_processed: bool,
}

/// Backend client applying a per-attempt timeout and bounded retries.
#[derive(Clone)]
pub struct BackendClient {
    transport: Arc<dyn BackendTransport>,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl BackendClient {
    pub fn new(
        transport: Arc<dyn BackendTransport>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            request_timeout,
            retry,
        }
    }

    /// Client using `transport` with the timing from `config`.
    pub fn with_config(transport: Arc<dyn BackendTransport>, config: &BackendClientConfig) -> Self {
        Self::new(transport, config.request_timeout(), config.retry_policy())
    }

    /// Client speaking HTTP to `config.base_url`.
    pub fn http(config: &BackendClientConfig) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::with_config(Arc::new(transport), config))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Call `method path` with an optional JSON body.
    pub async fn call(
        &self,
        method: BackendMethod,
        path: &str,
        body: Option<Value>,
    ) -> BackendOutcome<Value> {
        let mut request = BackendRequest::new(method, path);
        request.body = body;
        self.execute(request).await
    }

    pub async fn execute(&self, request: BackendRequest) -> BackendOutcome<Value> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let result =
                match tokio::time::timeout(self.request_timeout, self.transport.execute(&request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::backend_timeout(self.request_timeout)),
                };

            let err = match result {
                Ok(value) => return BackendOutcome::Response(value),
                Err(err) => err,
            };

            // Timeouts, network errors, 408/429 and 5xx are retried; any other
            // 4xx is final.
            if err.is_retryable() && self.retry.allows_retry_after(attempt) {
                let delay = self.retry.delay_after_attempt(attempt);
                debug!(
                    method = %request.method,
                    path = %request.path(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "backend call failed; retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            warn!(
                method = %request.method,
                path = %request.path(),
                attempts = attempt,
                max_attempts = self.retry.max_attempts(),
                error = %err,
                "backend call failed; continuing without response"
            );
            return BackendOutcome::NoResponse;
        }
    }

    /// `POST /polls`
    pub async fn store_poll(&self, record: &PollRecord) -> BackendOutcome<StoredPoll> {
        let Some(body) = encode_body(record, "/polls") else {
            return BackendOutcome::NoResponse;
        };
        let request =
            BackendRequest::from_segments(BackendMethod::Post, ["polls"]).with_body(body);
        self.execute_data(request).await
    }

    /// `GET /polls/{messageId}`
    pub async fn fetch_poll(&self, message_id: &str) -> BackendOutcome<PollRecord> {
        let request = BackendRequest::from_segments(BackendMethod::Get, ["polls", message_id]);
        self.execute_data(request).await
    }

    /// `GET /polls/votes/{messageId}/{voter}`
    pub async fn check_processed(&self, message_id: &str, voter: &str) -> BackendOutcome<bool> {
        let request = BackendRequest::from_segments(
            BackendMethod::Get,
            ["polls", "votes", message_id, voter],
        );
        match self.execute_data::<ProcessedMarker>(request).await {
            BackendOutcome::Response(marker) => BackendOutcome::Response(marker.already_processed),
            BackendOutcome::NoResponse => BackendOutcome::NoResponse,
        }
    }

    /// `POST /polls/votes`
    pub async fn record_vote(&self, vote: &VoteRecord) -> BackendOutcome<()> {
        let Some(body) = encode_body(vote, "/polls/votes") else {
            return BackendOutcome::NoResponse;
        };
        let request =
            BackendRequest::from_segments(BackendMethod::Post, ["polls", "votes"]).with_body(body);
        match self.execute(request).await {
            BackendOutcome::Response(_) => BackendOutcome::Response(()),
            BackendOutcome::NoResponse => BackendOutcome::NoResponse,
        }
    }

    async fn execute_data<T: DeserializeOwned>(&self, request: BackendRequest) -> BackendOutcome<T> {
        let path = request.path();
        let value = match self.execute(request).await {
            BackendOutcome::Response(value) => value,
            BackendOutcome::NoResponse => return BackendOutcome::NoResponse,
        };

        match serde_json::from_value::<Envelope<T>>(value) {
            Ok(envelope) => BackendOutcome::Response(envelope.data),
            Err(err) => {
                warn!(%path, error = %err, "backend response missing expected data");
                BackendOutcome::NoResponse
            }
        }
    }
}

fn encode_body<T: serde::Serialize>(value: &T, path: &str) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(body) => Some(body),
        Err(err) => {
            warn!(%path, error = %err, "failed to encode backend request body");
            None
        }
    }
}
