//! Core gateway contract shared by the backend client and the session runtime.
//!
//! This crate defines the session lifecycle model, poll/vote data types,
//! address normalization, retry policy, and the error/notification
//! abstractions. It performs no I/O.

/// Observer registry and broadcast event channel.
pub mod channel;
/// Stable gateway error types and HTTP classification helpers.
pub mod error;
/// Canonical chat address helpers.
pub mod normalization;
/// Bounded retry policy for backend calls.
pub mod retry;
/// Session lifecycle state machine.
pub mod state_machine;
/// Caller-facing types (session state, polls, votes, events).
pub mod types;

pub use channel::{EventStream, GatewayChannels, ObserverError, ObserverRegistry, StateObserver};
pub use error::{GatewayError, GatewayErrorCategory, classify_http_status};
pub use normalization::{CONTACT_SUFFIX, GROUP_SUFFIX, normalize_group_id, normalize_phone_number};
pub use retry::RetryPolicy;
pub use state_machine::{SessionEvent, SessionStateMachine, Transition, ensure_ready};
pub use types::{
    GatewayEvent, InboundMessage, PollOption, PollRecord, PollRequest, SessionConfig,
    SessionState, StatusSnapshot, VoteEvent, VoteOutcome, VoteRecord,
};
