//! Client for the remote poll backend.
//!
//! Every call goes through [`BackendClient`], which bounds each attempt with
//! a timeout, retries transient failures, and reports exhaustion as
//! [`BackendOutcome::NoResponse`] instead of an error.

mod client;
mod http;
mod memory;
mod transport;

pub use client::{BackendClient, BackendOutcome, StoredPoll};
pub use http::{BackendClientConfig, HttpTransport};
pub use memory::{BackendRoute, InMemoryBackend};
pub use transport::{BackendMethod, BackendRequest, BackendTransport};
