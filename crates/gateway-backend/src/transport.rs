use std::fmt;

use async_trait::async_trait;
use gateway_core::GatewayError;
use serde_json::Value;

/// HTTP verbs used by the backend surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMethod {
    Get,
    Post,
}

impl BackendMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for BackendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend request. Path segments are kept unencoded; transports encode.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub method: BackendMethod,
    pub segments: Vec<String>,
    pub body: Option<Value>,
}

impl BackendRequest {
    /// Build a request from a `/`-separated path such as `/polls/votes`.
    pub fn new(method: BackendMethod, path: &str) -> Self {
        Self::from_segments(method, path.split('/').filter(|segment| !segment.is_empty()))
    }

    /// Build a request from raw segments, which may contain `/` or other
    /// reserved characters.
    pub fn from_segments<I, S>(method: BackendMethod, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Display path used in logs.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// One round trip to the backend, without retry or timeout policy.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Execute the request and return the decoded JSON body (`Null` when the
    /// body is empty). Non-2xx statuses are errors.
    async fn execute(&self, request: &BackendRequest) -> Result<Value, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_paths_into_segments() {
        let request = BackendRequest::new(BackendMethod::Get, "/polls/votes/m1/15550102030@c.us");
        assert_eq!(
            request.segments,
            vec!["polls", "votes", "m1", "15550102030@c.us"]
        );
        assert_eq!(request.path(), "/polls/votes/m1/15550102030@c.us");
    }

    #[test]
    fn keeps_reserved_characters_inside_segments() {
        let request = BackendRequest::from_segments(BackendMethod::Get, ["polls", "true_1/2"]);
        assert_eq!(request.segments.len(), 2);
        assert_eq!(request.segments[1], "true_1/2");
    }
}
