use std::path::PathBuf;

use async_trait::async_trait;
use gateway_core::{InboundMessage, VoteEvent};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure reported by the underlying chat-network client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("client is not initialized")]
    NotInitialized,
    #[error("{0}")]
    Failed(String),
}

/// Events emitted by the underlying client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Qr(String),
    Authenticated,
    AuthFailure(String),
    Ready,
    Disconnected(String),
    Message(InboundMessage),
    VoteUpdate(VoteEvent),
}

/// Where outbound media comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    LocalPath(PathBuf),
    Url(Url),
}

/// Content handed to [`ChatClient::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingContent {
    Text(String),
    Media {
        source: MediaSource,
        caption: Option<String>,
    },
    Poll {
        name: String,
        options: Vec<String>,
        allow_multiple_answers: bool,
    },
}

/// Acknowledgement returned by the client for a sent message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentMessage {
    /// Network message id.
    pub id: String,
    /// Send time in seconds since the Unix epoch.
    pub timestamp: u64,
}

/// Chat listed by [`ChatClient::get_chats`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    pub participant_count: usize,
}

/// Commands the gateway issues to the underlying chat-network client.
///
/// Implementations push lifecycle, message and vote events into the sender
/// given to [`ChatClient::initialize`] for as long as that connection lives.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn initialize(&self, events: mpsc::Sender<ClientEvent>) -> Result<(), ClientError>;

    async fn destroy(&self) -> Result<(), ClientError>;

    async fn send_message(
        &self,
        to: &str,
        content: OutgoingContent,
    ) -> Result<SentMessage, ClientError>;

    /// Registered network id for `address`, or `None` when unregistered.
    async fn get_number_id(&self, address: &str) -> Result<Option<String>, ClientError>;

    async fn get_chats(&self) -> Result<Vec<ChatSummary>, ClientError>;
}
