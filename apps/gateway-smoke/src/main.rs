mod config;
mod logging;

use std::{sync::Arc, time::Duration};

use gateway_backend::{BackendClient, InMemoryBackend};
use gateway_core::{
    GatewayError, GatewayEvent, PollOption, PollRequest, RetryPolicy, SessionState, VoteEvent,
};
use gateway_runtime::{ClientEvent, Gateway, LoopbackChatClient};
use tracing::{info, warn};

use crate::config::GatewayConfig;

const DEMO_RECIPIENT: &str = "15550102030";
const DEMO_VOTER: &str = "15559876543@c.us";

#[tokio::main]
async fn main() {
    logging::init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("Gateway smoke failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: GatewayConfig) -> Result<(), GatewayError> {
    let backend = match config.backend_client_config() {
        Some(backend_config) => {
            info!(base_url = %backend_config.base_url, "using HTTP backend");
            BackendClient::http(&backend_config)?
        }
        None => {
            info!("GATEWAY_BACKEND_URL not set; using in-memory backend");
            let defaults = RetryPolicy::default();
            BackendClient::new(
                Arc::new(InMemoryBackend::default()),
                Duration::from_millis(config.backend_timeout_ms),
                RetryPolicy::new(
                    config.backend_attempts,
                    defaults.base_delay_ms(),
                    defaults.max_delay_ms(),
                ),
            )
        }
    };

    let client = LoopbackChatClient::with_startup(vec![
        ClientEvent::Qr("loopback-pairing-code".to_owned()),
        ClientEvent::Authenticated,
        ClientEvent::Ready,
    ]);
    let gateway = Gateway::start(
        Arc::new(client.clone()),
        backend,
        config.gateway_options(),
    )
    .await?;

    let mut events = gateway.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                GatewayEvent::StateChanged { state, detail } => {
                    println!("state: {state} {}", detail.unwrap_or_default());
                }
                GatewayEvent::MessageReceived(message) => {
                    println!("message from {}: {}", message.from, message.body);
                }
                GatewayEvent::VoteReceived(vote) => {
                    println!("vote from {} on {}", vote.voter, vote.parent_message_id);
                }
                GatewayEvent::VoteReconciled { voter, outcome, .. } => {
                    println!("vote from {voter} reconciled: {outcome:?}");
                }
            }
        }
    });

    gateway
        .session()
        .wait_for_state(SessionState::Connected, config.session.init_timeout())
        .await?;
    run_demo(&gateway, &client).await;

    println!("Gateway running on the loopback client. Press Ctrl-C to stop.");
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for Ctrl-C; stopping now");
    }

    let result = gateway.shutdown().await;
    printer.abort();
    result
}

/// Send a poll and vote on it through the loopback client.
async fn run_demo(gateway: &Gateway, client: &LoopbackChatClient) {
    let request = PollRequest {
        to: DEMO_RECIPIENT.to_owned(),
        poll_name: "Smoke test: is the gateway up?".to_owned(),
        options: vec![PollOption::new("Yes", 1), PollOption::new("No", 2)],
        response_messages: [
            ("1".to_owned(), "Thanks, recorded.".to_owned()),
            ("2".to_owned(), "Sorry to hear that.".to_owned()),
        ]
        .into(),
        allow_multiple_answers: false,
        webhook_url: None,
    };

    let receipt = match gateway.facade().send_poll(request).await {
        Ok(receipt) => receipt,
        Err(err) => {
            warn!(error = %err, "demo poll failed");
            return;
        }
    };
    info!(
        message_id = %receipt.message_id,
        backend_stored = receipt.backend_stored,
        "demo poll sent"
    );

    let vote = VoteEvent {
        voter: DEMO_VOTER.to_owned(),
        parent_message_id: receipt.message_id,
        selected_option_name: "Yes".to_owned(),
        interaction_timestamp: 0,
    };
    if !client.emit(ClientEvent::VoteUpdate(vote)).await {
        warn!("loopback connection closed before the demo vote");
    }
}
