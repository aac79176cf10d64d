use std::{fmt::Display, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionState;

/// Broad error category used for caller-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GatewayErrorCategory {
    /// Session is not `Connected`.
    NotReady,
    /// Malformed request or poll configuration.
    Validation,
    /// Referenced local resource does not exist.
    NotFound,
    /// Backend did not answer in time. Never surfaced to callers.
    BackendUnavailable,
    /// Failure reported by the underlying chat-network client.
    UnderlyingClient,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the remote side.
    RateLimited,
    /// Serialization/deserialization failure.
    Serialization,
    /// Invalid configuration value.
    Config,
    /// Internal bug or closed runtime.
    Internal,
}

/// Stable gateway error payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct GatewayError {
    /// High-level error category.
    pub category: GatewayErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl GatewayError {
    /// Construct a new gateway error.
    pub fn new(
        category: GatewayErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Send attempted while the session is not connected.
    pub fn not_ready(current: SessionState) -> Self {
        Self::new(
            GatewayErrorCategory::NotReady,
            "not_ready",
            format!("session is not ready (state: {current})"),
        )
    }

    /// Poll options without a reply body.
    pub fn missing_response_messages(missing: &[u32]) -> Self {
        let ids = missing
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(
            GatewayErrorCategory::Validation,
            "missing_response_messages",
            format!("missing response messages for option ids: {ids}"),
        )
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCategory::Validation, code, message)
    }

    pub fn media_not_found(path: &Path) -> Self {
        Self::new(
            GatewayErrorCategory::NotFound,
            "media_not_found",
            format!("media file not found: {}", path.display()),
        )
    }

    /// Wrap a failure from the underlying chat-network client.
    pub fn client(operation: &str, err: impl Display) -> Self {
        Self::new(
            GatewayErrorCategory::UnderlyingClient,
            "client_error",
            format!("{operation} failed: {err}"),
        )
    }

    pub fn backend_timeout(timeout: Duration) -> Self {
        Self::new(
            GatewayErrorCategory::BackendUnavailable,
            "backend_timeout",
            format!("backend did not respond within {}ms", timeout.as_millis()),
        )
    }

    pub fn backend_status(status: u16, body: impl Into<String>) -> Self {
        Self::new(
            classify_http_status(status),
            "backend_http_status",
            format!("backend returned HTTP {status}: {}", body.into()),
        )
    }

    pub fn runtime_closed() -> Self {
        Self::new(
            GatewayErrorCategory::Internal,
            "runtime_closed",
            "session runtime is no longer running",
        )
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            GatewayErrorCategory::Network
                | GatewayErrorCategory::RateLimited
                | GatewayErrorCategory::BackendUnavailable
        )
    }
}

/// Map HTTP status codes to gateway error categories.
pub fn classify_http_status(status: u16) -> GatewayErrorCategory {
    match status {
        404 => GatewayErrorCategory::NotFound,
        408 | 429 => GatewayErrorCategory::RateLimited,
        400..=499 => GatewayErrorCategory::Validation,
        500..=599 => GatewayErrorCategory::Network,
        _ => GatewayErrorCategory::Internal,
    }
}
