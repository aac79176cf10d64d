//! In-process [`ChatClient`] that replays a scripted lifecycle.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::{ChatClient, ChatSummary, ClientError, ClientEvent, OutgoingContent, SentMessage};

/// Message accepted by the loopback client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackSend {
    pub to: String,
    pub content: OutgoingContent,
    pub id: String,
}

#[derive(Debug, Default)]
struct LoopbackState {
    startup: Vec<ClientEvent>,
    events: Option<mpsc::Sender<ClientEvent>>,
    fail_initialize: Option<String>,
    fail_destroy: Option<String>,
    fail_sends: Option<String>,
    fail_lookups: Option<String>,
    registered: HashSet<String>,
    chats: Vec<ChatSummary>,
    sent: Vec<LoopbackSend>,
    initialize_calls: usize,
    destroy_calls: usize,
}

/// Chat client that never leaves the process.
///
/// Each `initialize()` replays the startup script into the new event sender.
/// Later events can be injected with [`LoopbackChatClient::emit`].
#[derive(Debug, Clone, Default)]
pub struct LoopbackChatClient {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackChatClient {
    pub fn with_startup(startup: Vec<ClientEvent>) -> Self {
        let client = Self::default();
        client.lock_state().startup = startup;
        client
    }

    /// Client that authenticates and becomes ready on every start.
    pub fn ready_on_start() -> Self {
        Self::with_startup(vec![ClientEvent::Authenticated, ClientEvent::Ready])
    }

    pub fn set_fail_initialize(&self, error: Option<&str>) {
        self.lock_state().fail_initialize = error.map(str::to_owned);
    }

    pub fn set_fail_destroy(&self, error: Option<&str>) {
        self.lock_state().fail_destroy = error.map(str::to_owned);
    }

    pub fn set_fail_sends(&self, error: Option<&str>) {
        self.lock_state().fail_sends = error.map(str::to_owned);
    }

    pub fn set_fail_lookups(&self, error: Option<&str>) {
        self.lock_state().fail_lookups = error.map(str::to_owned);
    }

    pub fn register_number(&self, address: impl Into<String>) {
        self.lock_state().registered.insert(address.into());
    }

    pub fn add_chat(&self, chat: ChatSummary) {
        self.lock_state().chats.push(chat);
    }

    pub fn sent(&self) -> Vec<LoopbackSend> {
        self.lock_state().sent.clone()
    }

    pub fn initialize_calls(&self) -> usize {
        self.lock_state().initialize_calls
    }

    pub fn destroy_calls(&self) -> usize {
        self.lock_state().destroy_calls
    }

    /// Push an event into the most recent connection. Returns `false` when
    /// no connection was ever started or its receiver is gone.
    pub async fn emit(&self, event: ClientEvent) -> bool {
        let Some(events) = self.lock_state().events.clone() else {
            return false;
        };
        events.send(event).await.is_ok()
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopbackState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ChatClient for LoopbackChatClient {
    async fn initialize(&self, events: mpsc::Sender<ClientEvent>) -> Result<(), ClientError> {
        let startup = {
            let mut state = self.lock_state();
            state.initialize_calls += 1;
            if let Some(error) = &state.fail_initialize {
                return Err(ClientError::Failed(error.clone()));
            }
            state.events = Some(events.clone());
            state.startup.clone()
        };

        for event in startup {
            if events.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        let mut state = self.lock_state();
        state.destroy_calls += 1;
        match &state.fail_destroy {
            Some(error) => Err(ClientError::Failed(error.clone())),
            None => Ok(()),
        }
    }

    async fn send_message(
        &self,
        to: &str,
        content: OutgoingContent,
    ) -> Result<SentMessage, ClientError> {
        let mut state = self.lock_state();
        if state.events.is_none() {
            return Err(ClientError::NotInitialized);
        }
        if let Some(error) = &state.fail_sends {
            return Err(ClientError::Failed(error.clone()));
        }

        let id = format!("true_{to}_{}", Uuid::new_v4().simple());
        state.sent.push(LoopbackSend {
            to: to.to_owned(),
            content,
            id: id.clone(),
        });
        Ok(SentMessage {
            id,
            timestamp: unix_now(),
        })
    }

    async fn get_number_id(&self, address: &str) -> Result<Option<String>, ClientError> {
        let state = self.lock_state();
        if let Some(error) = &state.fail_lookups {
            return Err(ClientError::Failed(error.clone()));
        }
        Ok(state.registered.get(address).cloned())
    }

    async fn get_chats(&self) -> Result<Vec<ChatSummary>, ClientError> {
        let state = self.lock_state();
        if let Some(error) = &state.fail_lookups {
            return Err(ClientError::Failed(error.clone()));
        }
        Ok(state.chats.clone())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
