use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

const DEFAULT_INIT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Connectivity state of the single chat-network session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No live connection. Initial state.
    Disconnected,
    /// An initialization attempt is running.
    Connecting,
    /// The client produced pairing material that must be scanned.
    QrReady,
    /// Pairing succeeded; the client is still loading.
    Authenticated,
    /// The client is ready. Sends are permitted only here.
    Connected,
}

impl SessionState {
    /// Whether outbound sends are allowed in this state.
    pub fn can_send(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::QrReady => "QR_READY",
            Self::Authenticated => "AUTHENTICATED",
            Self::Connected => "CONNECTED",
        };
        f.write_str(label)
    }
}

/// Read-only view of the session handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Current session state.
    pub state: SessionState,
    /// Pairing payload, present only while `state == QrReady`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            qr: None,
        }
    }
}

/// Timing knobs for the session lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long one initialization attempt may run without `ready`.
    pub init_timeout_ms: u64,
    /// Delay between a `disconnected` event and the automatic reconnect.
    pub reconnect_delay_ms: u64,
    /// Also schedule a reconnect when an initialization attempt times out.
    ///
    /// Off by default: a timed-out attempt leaves the session `Disconnected`
    /// until `initialize()` or `reinitialize()` is called.
    pub reconnect_on_init_timeout: bool,
}

impl SessionConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            reconnect_on_init_timeout: false,
        }
    }
}

/// One selectable option of an outbound poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    /// Label shown to voters.
    pub option_name: String,
    /// Caller-assigned id, unique within one poll.
    pub local_id: u32,
}

impl PollOption {
    pub fn new(option_name: impl Into<String>, local_id: u32) -> Self {
        Self {
            option_name: option_name.into(),
            local_id,
        }
    }
}

/// Caller request to send an interactive poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    /// Recipient phone number in any format.
    pub to: String,
    /// Poll question.
    pub poll_name: String,
    /// Options in display order.
    pub options: Vec<PollOption>,
    /// Reply body per option id (as a decimal string).
    pub response_messages: BTreeMap<String, String>,
    /// Whether voters may pick more than one option.
    #[serde(default)]
    pub allow_multiple_answers: bool,
    /// Optional webhook stored alongside the poll.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Poll metadata held by the backend, keyed by the poll's message id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollRecord {
    pub message_id: String,
    pub poll_name: String,
    pub poll_options: Vec<PollOption>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub response_messages: BTreeMap<String, String>,
}

impl PollRecord {
    /// Id of the option whose name matches `selected` exactly.
    pub fn option_id_for(&self, selected: &str) -> Option<u32> {
        self.poll_options
            .iter()
            .find(|option| option.option_name == selected)
            .map(|option| option.local_id)
    }

    /// Configured reply for an option id.
    pub fn response_for(&self, option_id: u32) -> Option<&str> {
        self.response_messages
            .get(&option_id.to_string())
            .map(String::as_str)
            .filter(|body| !body.is_empty())
    }
}

/// Inbound notification that someone voted on a poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteEvent {
    /// Canonical address of the voter.
    pub voter: String,
    /// Message id of the poll being voted on.
    pub parent_message_id: String,
    /// Name of the selected option. Empty when the vote was withdrawn.
    pub selected_option_name: String,
    /// Interaction time in seconds since the Unix epoch.
    pub interaction_timestamp: u64,
}

/// Vote row written to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub message_id: String,
    pub voter: String,
    pub selected_option: String,
    pub selected_option_id: u32,
    pub timestamp: u64,
}

/// What the reconciliation pipeline did with one vote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Poll record could not be fetched; nothing was recorded or sent.
    PollUnavailable,
    /// Backend already processed this `(message, voter)` pair.
    AlreadyProcessed,
    /// Reply delivered to the voter.
    Replied {
        option_id: u32,
        /// Whether the backend accepted the vote record.
        recorded: bool,
    },
    /// No reply body exists for the resolved option.
    NoReplyConfigured { option_id: u32, recorded: bool },
    /// The reply send failed.
    ReplyFailed {
        option_id: u32,
        recorded: bool,
        error_code: String,
    },
}

/// Plain inbound chat message surfaced to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
    pub timestamp: u64,
}

/// Events broadcast to gateway subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Session state transition.
    StateChanged {
        state: SessionState,
        detail: Option<String>,
    },
    /// Inbound non-vote message.
    MessageReceived(InboundMessage),
    /// Vote event accepted for reconciliation.
    VoteReceived(VoteEvent),
    /// Reconciliation finished for one vote.
    VoteReconciled {
        message_id: String,
        voter: String,
        outcome: VoteOutcome,
    },
}
