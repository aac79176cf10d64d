//! Outbound messaging operations gated on session readiness.

use std::{collections::HashSet, path::Path, sync::Arc};

use gateway_backend::{BackendClient, BackendOutcome};
use gateway_core::{
    GatewayError, PollRecord, PollRequest, StatusSnapshot, ensure_ready, normalize_group_id,
    normalize_phone_number,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::{ChatClient, MediaSource, OutgoingContent, SentMessage};

const DEFAULT_OTP_EXPIRY_MINUTES: u32 = 5;

/// Facade tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacadeConfig {
    /// Expiry stated in OTP messages when the caller gives none.
    pub otp_expiry_minutes: u32,
    /// Webhook stored with polls that do not name one.
    pub default_webhook_url: Option<String>,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            otp_expiry_minutes: DEFAULT_OTP_EXPIRY_MINUTES,
            default_webhook_url: None,
        }
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub success: bool,
    pub message_id: String,
    pub to: String,
    pub timestamp: u64,
}

impl SendReceipt {
    fn from_sent(to: String, sent: SentMessage) -> Self {
        Self {
            success: true,
            message_id: sent.id,
            to,
            timestamp: sent.timestamp,
        }
    }
}

/// Result of a poll send.
///
/// `backend_stored == false` means the poll was delivered but its metadata
/// never reached the backend, so votes on it will not be answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollReceipt {
    pub success: bool,
    pub message_id: String,
    pub to: String,
    pub backend_stored: bool,
    pub poll_id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub participant_count: usize,
}

/// Send operations shared by callers and the vote pipeline.
pub struct MessagingFacade {
    client: Arc<dyn ChatClient>,
    status: watch::Receiver<StatusSnapshot>,
    backend: BackendClient,
    config: FacadeConfig,
}

impl MessagingFacade {
    pub fn new(
        client: Arc<dyn ChatClient>,
        status: watch::Receiver<StatusSnapshot>,
        backend: BackendClient,
        config: FacadeConfig,
    ) -> Self {
        Self {
            client,
            status,
            backend,
            config,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub async fn send_message(&self, to: &str, body: &str) -> Result<SendReceipt, GatewayError> {
        self.ensure_connected()?;
        let address = normalize_phone_number(to);
        self.deliver(address, OutgoingContent::Text(body.to_owned()))
            .await
    }

    /// Send a one-time passcode with an expiry note.
    pub async fn send_otp(
        &self,
        to: &str,
        otp: &str,
        expiry_minutes: Option<u32>,
    ) -> Result<SendReceipt, GatewayError> {
        let otp = otp.trim();
        if otp.is_empty() {
            return Err(GatewayError::validation("invalid_otp", "otp must not be empty"));
        }
        let minutes = expiry_minutes.unwrap_or(self.config.otp_expiry_minutes);
        if minutes == 0 {
            return Err(GatewayError::validation(
                "invalid_otp",
                "otp expiry must be at least one minute",
            ));
        }

        self.ensure_connected()?;
        let address = normalize_phone_number(to);
        self.deliver(address, OutgoingContent::Text(otp_message(otp, minutes)))
            .await
    }

    pub async fn send_media_file(
        &self,
        to: &str,
        path: &Path,
        caption: Option<String>,
    ) -> Result<SendReceipt, GatewayError> {
        self.ensure_connected()?;
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(GatewayError::media_not_found(path));
        }

        let address = normalize_phone_number(to);
        let content = OutgoingContent::Media {
            source: MediaSource::LocalPath(path.to_path_buf()),
            caption,
        };
        self.deliver(address, content).await
    }

    pub async fn send_media_url(
        &self,
        to: &str,
        url: &str,
        caption: Option<String>,
    ) -> Result<SendReceipt, GatewayError> {
        let url = parse_media_url(url)?;
        self.ensure_connected()?;

        let address = normalize_phone_number(to);
        let content = OutgoingContent::Media {
            source: MediaSource::Url(url),
            caption,
        };
        self.deliver(address, content).await
    }

    /// Send a poll, then store its metadata at the backend.
    ///
    /// A backend failure does not fail the call; it shows up as
    /// `backend_stored == false`.
    pub async fn send_poll(&self, request: PollRequest) -> Result<PollReceipt, GatewayError> {
        validate_poll(&request)?;
        self.ensure_connected()?;

        let address = normalize_phone_number(&request.to);
        let content = OutgoingContent::Poll {
            name: request.poll_name.clone(),
            options: request
                .options
                .iter()
                .map(|option| option.option_name.clone())
                .collect(),
            allow_multiple_answers: request.allow_multiple_answers,
        };
        let sent = self
            .client
            .send_message(&address, content)
            .await
            .map_err(|err| GatewayError::client("send poll", err))?;
        info!(to = %address, message_id = %sent.id, "poll sent");

        let record = PollRecord {
            message_id: sent.id.clone(),
            poll_name: request.poll_name,
            poll_options: request.options,
            webhook_url: request
                .webhook_url
                .or_else(|| self.config.default_webhook_url.clone()),
            response_messages: request.response_messages,
        };
        let (backend_stored, poll_id) = match self.backend.store_poll(&record).await {
            BackendOutcome::Response(stored) => (true, Some(stored.poll_id)),
            BackendOutcome::NoResponse => {
                warn!(
                    message_id = %sent.id,
                    "poll delivered but metadata was not stored; votes will go unanswered"
                );
                (false, None)
            }
        };

        Ok(PollReceipt {
            success: true,
            message_id: sent.id,
            to: address,
            backend_stored,
            poll_id,
        })
    }

    pub async fn send_group_message(
        &self,
        group_id: &str,
        body: &str,
    ) -> Result<SendReceipt, GatewayError> {
        self.ensure_connected()?;
        let address = normalize_group_id(group_id);
        self.deliver(address, OutgoingContent::Text(body.to_owned()))
            .await
    }

    pub async fn get_groups(&self) -> Result<Vec<GroupSummary>, GatewayError> {
        self.ensure_connected()?;
        let chats = self
            .client
            .get_chats()
            .await
            .map_err(|err| GatewayError::client("list chats", err))?;

        Ok(chats
            .into_iter()
            .filter(|chat| chat.is_group)
            .map(|chat| GroupSummary {
                id: chat.id,
                name: chat.name,
                participant_count: chat.participant_count,
            })
            .collect())
    }

    /// Whether `number` is a registered network identity. Never fails.
    pub async fn check_number_exists(&self, number: &str) -> bool {
        if let Err(err) = self.ensure_connected() {
            debug!(error = %err, "number check skipped");
            return false;
        }

        let address = normalize_phone_number(number);
        match self.client.get_number_id(&address).await {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!(%address, error = %err, "number lookup failed");
                false
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), GatewayError> {
        ensure_ready(&self.status.borrow())
    }

    async fn deliver(
        &self,
        address: String,
        content: OutgoingContent,
    ) -> Result<SendReceipt, GatewayError> {
        let sent = self
            .client
            .send_message(&address, content)
            .await
            .map_err(|err| GatewayError::client("send message", err))?;
        info!(to = %address, message_id = %sent.id, "message sent");
        Ok(SendReceipt::from_sent(address, sent))
    }
}

fn otp_message(otp: &str, minutes: u32) -> String {
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    format!("Your verification code is: {otp}\n\nThis code expires in {minutes} {unit}.")
}

fn parse_media_url(value: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(value).map_err(|err| {
        GatewayError::validation("invalid_media_url", format!("invalid media url '{value}': {err}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::validation(
            "invalid_media_url",
            format!("media url must be http(s): {value}"),
        ));
    }
    Ok(url)
}

fn validate_poll(request: &PollRequest) -> Result<(), GatewayError> {
    if request.poll_name.trim().is_empty() {
        return Err(GatewayError::validation("invalid_poll", "poll name is required"));
    }
    if request.options.len() < 2 {
        return Err(GatewayError::validation(
            "invalid_poll",
            "a poll needs at least two options",
        ));
    }

    let mut seen = HashSet::new();
    for option in &request.options {
        if option.option_name.trim().is_empty() {
            return Err(GatewayError::validation(
                "invalid_poll",
                format!("option {} has no name", option.local_id),
            ));
        }
        if !seen.insert(option.local_id) {
            return Err(GatewayError::validation(
                "invalid_poll",
                format!("duplicate option id {}", option.local_id),
            ));
        }
    }

    let missing: Vec<u32> = request
        .options
        .iter()
        .map(|option| option.local_id)
        .filter(|id| !request.response_messages.contains_key(&id.to_string()))
        .collect();
    if !missing.is_empty() {
        return Err(GatewayError::missing_response_messages(&missing));
    }
    Ok(())
}
