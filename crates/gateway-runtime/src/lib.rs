//! Messaging gateway runtime: session lifecycle, outbound facade and
//! poll-vote reconciliation on top of a [`ChatClient`].

mod client;
mod facade;
mod gateway;
mod loopback;
mod session;
mod votes;

pub use client::{
    ChatClient, ChatSummary, ClientError, ClientEvent, MediaSource, OutgoingContent, SentMessage,
};
pub use facade::{FacadeConfig, GroupSummary, MessagingFacade, PollReceipt, SendReceipt};
pub use gateway::{Gateway, GatewayOptions};
pub use loopback::{LoopbackChatClient, LoopbackSend};
pub use session::{SessionHandle, spawn_session};
pub use votes::{UNMATCHED_OPTION_ID, VotePipeline};
