use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use gateway_core::{GatewayError, GatewayErrorCategory, PollRecord, VoteRecord};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::transport::{BackendMethod, BackendRequest, BackendTransport};

/// Backend operations recognised by [`InMemoryBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendRoute {
    StorePoll,
    FetchPoll,
    CheckProcessed,
    RecordVote,
    Unknown,
}

impl BackendRoute {
    pub fn of(request: &BackendRequest) -> Self {
        let segments: Vec<&str> = request.segments.iter().map(String::as_str).collect();
        match (request.method, segments.as_slice()) {
            (BackendMethod::Post, ["polls"]) => Self::StorePoll,
            (BackendMethod::Post, ["polls", "votes"]) => Self::RecordVote,
            (BackendMethod::Get, ["polls", "votes", _, _]) => Self::CheckProcessed,
            (BackendMethod::Get, ["polls", _]) => Self::FetchPoll,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    polls: HashMap<String, PollRecord>,
    processed: HashSet<(String, String)>,
    votes: Vec<VoteRecord>,
    failing: HashSet<BackendRoute>,
    calls: Vec<BackendRoute>,
}

/// Poll backend kept in process memory.
///
/// Serves the same routes as the remote service and supports failure
/// injection per route. Every attempt is appended to a call log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryBackend {
    /// Make every request to `route` fail with a retryable 503.
    pub fn set_failing(&self, route: BackendRoute, failing: bool) {
        let mut state = self.lock_state();
        if failing {
            state.failing.insert(route);
        } else {
            state.failing.remove(&route);
        }
    }

    /// Make every route fail.
    pub fn set_outage(&self, outage: bool) {
        for route in [
            BackendRoute::StorePoll,
            BackendRoute::FetchPoll,
            BackendRoute::CheckProcessed,
            BackendRoute::RecordVote,
        ] {
            self.set_failing(route, outage);
        }
    }

    pub fn insert_poll(&self, record: PollRecord) {
        self.lock_state()
            .polls
            .insert(record.message_id.clone(), record);
    }

    pub fn mark_processed(&self, message_id: &str, voter: &str) {
        self.lock_state()
            .processed
            .insert((message_id.to_owned(), voter.to_owned()));
    }

    pub fn poll(&self, message_id: &str) -> Option<PollRecord> {
        self.lock_state().polls.get(message_id).cloned()
    }

    pub fn votes(&self) -> Vec<VoteRecord> {
        self.lock_state().votes.clone()
    }

    pub fn calls(&self) -> Vec<BackendRoute> {
        self.lock_state().calls.clone()
    }

    pub fn calls_to(&self, route: BackendRoute) -> usize {
        self.lock_state()
            .calls
            .iter()
            .filter(|call| **call == route)
            .count()
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle(&self, route: BackendRoute, request: &BackendRequest) -> Result<Value, GatewayError> {
        let mut state = self.lock_state();
        state.calls.push(route);
        if state.failing.contains(&route) {
            return Err(GatewayError::backend_status(503, "injected failure"));
        }

        match route {
            BackendRoute::StorePoll => {
                let record: PollRecord = decode_body(request)?;
                state.polls.insert(record.message_id.clone(), record);
                Ok(json!({ "data": { "pollId": Uuid::new_v4().to_string() } }))
            }
            BackendRoute::FetchPoll => {
                let message_id = &request.segments[1];
                let record = state.polls.get(message_id).ok_or_else(|| {
                    GatewayError::backend_status(404, format!("poll {message_id} not found"))
                })?;
                Ok(json!({ "data": record }))
            }
            BackendRoute::CheckProcessed => {
                let key = (request.segments[2].clone(), request.segments[3].clone());
                let already_processed = state.processed.contains(&key);
                Ok(json!({ "data": { "alreadyProcessed": already_processed } }))
            }
            BackendRoute::RecordVote => {
                let vote: VoteRecord = decode_body(request)?;
                state
                    .processed
                    .insert((vote.message_id.clone(), vote.voter.clone()));
                state.votes.push(vote);
                Ok(json!({ "data": { "recorded": true } }))
            }
            BackendRoute::Unknown => Err(GatewayError::backend_status(
                404,
                format!("no route for {} {}", request.method, request.path()),
            )),
        }
    }
}

#[async_trait]
impl BackendTransport for InMemoryBackend {
    async fn execute(&self, request: &BackendRequest) -> Result<Value, GatewayError> {
        self.handle(BackendRoute::of(request), request)
    }
}

fn decode_body<T: DeserializeOwned>(request: &BackendRequest) -> Result<T, GatewayError> {
    let body = request.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|err| {
        GatewayError::new(
            GatewayErrorCategory::Validation,
            "invalid_request_body",
            err.to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gateway_core::{PollOption, RetryPolicy};

    use super::*;
    use crate::client::{BackendClient, BackendOutcome};

    fn client(backend: &InMemoryBackend) -> BackendClient {
        BackendClient::new(
            Arc::new(backend.clone()),
            Duration::from_secs(10),
            RetryPolicy::new(3, 0, 0),
        )
    }

    fn record() -> PollRecord {
        PollRecord {
            message_id: "true_1555@c.us_ABC".into(),
            poll_name: "Coffee?".into(),
            poll_options: vec![PollOption::new("Yes", 1), PollOption::new("No", 2)],
            webhook_url: Some("https://hooks.example.org/poll".into()),
            response_messages: [("1".to_owned(), "Great".to_owned())].into(),
        }
    }

    #[test]
    fn routes_requests_by_method_and_shape() {
        let route = |method, path| BackendRoute::of(&BackendRequest::new(method, path));
        assert_eq!(route(BackendMethod::Post, "/polls"), BackendRoute::StorePoll);
        assert_eq!(route(BackendMethod::Get, "/polls/m1"), BackendRoute::FetchPoll);
        assert_eq!(
            route(BackendMethod::Get, "/polls/votes/m1/v1"),
            BackendRoute::CheckProcessed
        );
        assert_eq!(route(BackendMethod::Post, "/polls/votes"), BackendRoute::RecordVote);
        assert_eq!(route(BackendMethod::Get, "/votes"), BackendRoute::Unknown);
        assert_eq!(route(BackendMethod::Post, "/polls/m1"), BackendRoute::Unknown);
    }

    #[tokio::test]
    async fn stores_and_fetches_polls() {
        let backend = InMemoryBackend::default();
        let client = client(&backend);

        assert!(client.store_poll(&record()).await.is_response());
        assert_eq!(
            client.fetch_poll("true_1555@c.us_ABC").await,
            BackendOutcome::Response(record())
        );
    }

    #[tokio::test]
    async fn recording_a_vote_marks_it_processed() {
        let backend = InMemoryBackend::default();
        let client = client(&backend);
        let vote = VoteRecord {
            message_id: "m1".into(),
            voter: "1555@c.us".into(),
            selected_option: "Yes".into(),
            selected_option_id: 1,
            timestamp: 1_700_000_000,
        };

        assert_eq!(
            client.check_processed("m1", "1555@c.us").await,
            BackendOutcome::Response(false)
        );
        assert!(client.record_vote(&vote).await.is_response());
        assert_eq!(
            client.check_processed("m1", "1555@c.us").await,
            BackendOutcome::Response(true)
        );
        assert_eq!(backend.votes(), vec![vote]);
    }

    #[tokio::test]
    async fn injected_failures_are_retried_then_abandoned() {
        let backend = InMemoryBackend::default();
        backend.set_failing(BackendRoute::FetchPoll, true);

        assert_eq!(
            client(&backend).fetch_poll("m1").await,
            BackendOutcome::NoResponse
        );
        assert_eq!(backend.calls_to(BackendRoute::FetchPoll), 3);
    }

    #[tokio::test]
    async fn unknown_polls_are_not_retried() {
        let backend = InMemoryBackend::default();
        assert_eq!(
            client(&backend).fetch_poll("missing").await,
            BackendOutcome::NoResponse
        );
        assert_eq!(backend.calls(), vec![BackendRoute::FetchPoll]);
    }
}
