//! Poll-vote reconciliation.
//!
//! Every vote runs fetch, dedupe check, option resolution, record and reply
//! in that order. Backend trouble degrades individual steps and never
//! surfaces as an error. The backend's processed marker is the only dedupe.

use std::sync::Arc;

use gateway_backend::{BackendClient, BackendOutcome};
use gateway_core::{GatewayChannels, GatewayEvent, VoteEvent, VoteOutcome, VoteRecord};
use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::facade::MessagingFacade;

/// Option id recorded when the selected name matches no poll option.
pub const UNMATCHED_OPTION_ID: u32 = 0;

#[derive(Clone)]
pub struct VotePipeline {
    backend: BackendClient,
    facade: Arc<MessagingFacade>,
    channels: GatewayChannels,
}

impl VotePipeline {
    pub fn new(
        backend: BackendClient,
        facade: Arc<MessagingFacade>,
        channels: GatewayChannels,
    ) -> Self {
        Self {
            backend,
            facade,
            channels,
        }
    }

    /// Reconcile one vote and publish the outcome.
    pub async fn reconcile(&self, vote: &VoteEvent) -> VoteOutcome {
        let outcome = self.reconcile_inner(vote).await;
        self.channels.emit(GatewayEvent::VoteReconciled {
            message_id: vote.parent_message_id.clone(),
            voter: vote.voter.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn reconcile_inner(&self, vote: &VoteEvent) -> VoteOutcome {
        let message_id = vote.parent_message_id.as_str();
        let voter = vote.voter.as_str();

        let Some(poll) = self.backend.fetch_poll(message_id).await.into_option() else {
            warn!(
                message_id,
                voter,
                selected_option = %vote.selected_option_name,
                interaction_timestamp = vote.interaction_timestamp,
                "poll record unavailable; vote dropped"
            );
            return VoteOutcome::PollUnavailable;
        };

        match self.backend.check_processed(message_id, voter).await {
            BackendOutcome::Response(true) => {
                info!(message_id, voter, "vote already processed");
                return VoteOutcome::AlreadyProcessed;
            }
            BackendOutcome::Response(false) => {}
            BackendOutcome::NoResponse => {
                warn!(message_id, voter, "processed check unavailable; continuing");
            }
        }

        let option_id = match poll.option_id_for(&vote.selected_option_name) {
            Some(id) => id,
            None => {
                warn!(
                    message_id,
                    voter,
                    selected_option = %vote.selected_option_name,
                    "selected option not in poll; using option id 0"
                );
                UNMATCHED_OPTION_ID
            }
        };

        let record = VoteRecord {
            message_id: message_id.to_owned(),
            voter: voter.to_owned(),
            selected_option: vote.selected_option_name.clone(),
            selected_option_id: option_id,
            timestamp: vote.interaction_timestamp,
        };
        let recorded = self.backend.record_vote(&record).await.is_response();
        if !recorded {
            warn!(message_id, voter, option_id, "vote not recorded; replying anyway");
        }

        let Some(reply) = poll.response_for(option_id) else {
            warn!(message_id, voter, option_id, "no reply configured for option");
            return VoteOutcome::NoReplyConfigured {
                option_id,
                recorded,
            };
        };

        match self.facade.send_message(voter, reply).await {
            Ok(receipt) => {
                info!(message_id, voter, option_id, reply_id = %receipt.message_id, "vote reply sent");
                VoteOutcome::Replied {
                    option_id,
                    recorded,
                }
            }
            Err(err) => {
                error!(message_id, voter, option_id, error = %err, "vote reply failed");
                VoteOutcome::ReplyFailed {
                    option_id,
                    recorded,
                    error_code: err.code,
                }
            }
        }
    }

    /// Consume votes until `votes` closes or `stop` fires, one task per vote.
    ///
    /// In-flight votes are awaited before the worker returns.
    pub fn spawn(
        self,
        mut votes: mpsc::UnboundedReceiver<VoteEvent>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let pipeline = Arc::new(self);
        tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    next = votes.recv() => {
                        let Some(vote) = next else { break };
                        let pipeline = Arc::clone(&pipeline);
                        in_flight.spawn(async move {
                            pipeline.reconcile(&vote).await;
                        });
                    }
                    Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(err) = finished {
                            error!(error = %err, "vote task aborted");
                        }
                    }
                }
            }

            debug!(pending = in_flight.len(), "vote worker draining");
            while let Some(finished) = in_flight.join_next().await {
                if let Err(err) = finished {
                    error!(error = %err, "vote task aborted");
                }
            }
        })
    }
}
