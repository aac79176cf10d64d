//! Session actor owning the lifecycle state machine and its timers.

use std::{sync::Arc, time::Duration};

use gateway_core::{
    EventStream, GatewayChannels, GatewayError, GatewayErrorCategory, GatewayEvent,
    SessionConfig, SessionEvent, SessionState, SessionStateMachine, StateObserver,
    StatusSnapshot, Transition, VoteEvent,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ChatClient, ClientError, ClientEvent};

const COMMAND_BUFFER: usize = 32;
const CLIENT_EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCommand {
    Initialize,
    Reinitialize,
    Disconnect,
}

struct SessionRequest {
    command: SessionCommand,
    reply: oneshot::Sender<()>,
}

/// Inputs produced by timers and client connections, tagged by attempt.
#[derive(Debug)]
enum SessionInput {
    Client { attempt: u64, event: ClientEvent },
    InitFinished {
        attempt: u64,
        result: Result<(), ClientError>,
    },
    InitTimeout { attempt: u64 },
    ReconnectDue,
}

#[derive(Debug)]
struct PendingTimer {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl PendingTimer {
    fn spawn(
        delay: Duration,
        input_tx: mpsc::UnboundedSender<SessionInput>,
        input: SessionInput,
    ) -> Self {
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = stop_child.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = input_tx.send(input);
                }
            }
        });
        Self { stop, task }
    }

    fn cancel(self) {
        self.stop.cancel();
        self.task.abort();
    }
}

/// Cloneable handle to the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionRequest>,
    status_rx: watch::Receiver<StatusSnapshot>,
    channels: GatewayChannels,
}

impl SessionHandle {
    /// Current status. Pure read.
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    pub fn channels(&self) -> &GatewayChannels {
        &self.channels
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    pub fn register_observer(&self, observer: Arc<dyn StateObserver>) {
        self.channels.observers().register(observer);
    }

    /// Start a new connection attempt.
    pub async fn initialize(&self) -> Result<(), GatewayError> {
        self.request(SessionCommand::Initialize).await
    }

    /// Destroy the current connection, then start a new attempt.
    pub async fn reinitialize(&self) -> Result<(), GatewayError> {
        self.request(SessionCommand::Reinitialize).await
    }

    /// Cancel timers, destroy the connection and stay `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), GatewayError> {
        self.request(SessionCommand::Disconnect).await
    }

    /// Wait until the session reaches `state`, or fail after `limit`.
    pub async fn wait_for_state(
        &self,
        state: SessionState,
        limit: Duration,
    ) -> Result<StatusSnapshot, GatewayError> {
        let mut status_rx = self.status_rx.clone();
        let waited = tokio::time::timeout(limit, status_rx.wait_for(|status| status.state == state))
            .await
            .map_err(|_| {
                GatewayError::new(
                    GatewayErrorCategory::NotReady,
                    "state_wait_timeout",
                    format!("session did not reach {state} within {}ms", limit.as_millis()),
                )
            })?;
        waited
            .map(|status| status.clone())
            .map_err(|_| GatewayError::runtime_closed())
    }

    async fn request(&self, command: SessionCommand) -> Result<(), GatewayError> {
        let (reply, done) = oneshot::channel();
        self.command_tx
            .send(SessionRequest { command, reply })
            .await
            .map_err(|_| GatewayError::runtime_closed())?;
        done.await.map_err(|_| GatewayError::runtime_closed())
    }
}

/// Spawn the session actor. Vote events are forwarded to `vote_tx`.
///
/// The actor stops, tearing down timers and the connection, once every
/// handle has been dropped.
pub fn spawn_session(
    client: Arc<dyn ChatClient>,
    config: SessionConfig,
    channels: GatewayChannels,
    vote_tx: mpsc::UnboundedSender<VoteEvent>,
) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());

    let runtime = SessionRuntime {
        client,
        config,
        machine: SessionStateMachine::default(),
        channels: channels.clone(),
        status_tx,
        input_tx,
        vote_tx,
        next_attempt: 0,
        current_attempt: None,
        init_timer: None,
        reconnect_timer: None,
    };
    tokio::spawn(runtime.run(command_rx, input_rx));

    SessionHandle {
        command_tx,
        status_rx,
        channels,
    }
}

struct SessionRuntime {
    client: Arc<dyn ChatClient>,
    config: SessionConfig,
    machine: SessionStateMachine,
    channels: GatewayChannels,
    status_tx: watch::Sender<StatusSnapshot>,
    input_tx: mpsc::UnboundedSender<SessionInput>,
    vote_tx: mpsc::UnboundedSender<VoteEvent>,
    next_attempt: u64,
    current_attempt: Option<u64>,
    init_timer: Option<PendingTimer>,
    reconnect_timer: Option<PendingTimer>,
}

impl SessionRuntime {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SessionRequest>,
        mut input_rx: mpsc::UnboundedReceiver<SessionInput>,
    ) {
        loop {
            tokio::select! {
                biased;
                request = command_rx.recv() => {
                    let Some(request) = request else { break };
                    self.handle_command(request.command).await;
                    let _ = request.reply.send(());
                }
                Some(input) = input_rx.recv() => self.handle_input(input),
            }
        }

        debug!("session handles dropped; tearing down");
        self.cancel_timers();
        if self.current_attempt.take().is_some() {
            self.destroy_client("shutdown").await;
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        debug!(?command, state = %self.machine.state(), "session command");
        match command {
            SessionCommand::Initialize => self.start_attempt(),
            SessionCommand::Reinitialize => {
                self.destroy_client("reinitialize").await;
                self.start_attempt();
            }
            SessionCommand::Disconnect => {
                self.cancel_timers();
                self.current_attempt = None;
                self.destroy_client("disconnect").await;
                let transition = self.machine.apply(SessionEvent::DisconnectRequested);
                self.commit(transition);
            }
        }
    }

    fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Client { attempt, event } => {
                if self.current_attempt != Some(attempt) {
                    debug!(attempt, ?event, "dropping event from superseded connection");
                    return;
                }
                self.handle_client_event(event);
            }
            SessionInput::InitFinished { attempt, result } => {
                if self.current_attempt != Some(attempt) {
                    return;
                }
                match result {
                    Ok(()) => debug!(attempt, "client initialize call returned"),
                    Err(err) => {
                        warn!(attempt, error = %err, "client failed to initialize");
                        self.cancel_init_timer();
                        let transition = self.machine.apply(SessionEvent::InitFailed {
                            error: err.to_string(),
                        });
                        self.commit(transition);
                    }
                }
            }
            SessionInput::InitTimeout { attempt } => {
                if self.current_attempt != Some(attempt) || self.init_timer.take().is_none() {
                    return;
                }
                warn!(
                    attempt,
                    timeout_ms = self.config.init_timeout_ms,
                    "session initialization timed out"
                );
                let transition = self.machine.apply(SessionEvent::InitTimedOut);
                self.commit(transition);
                if self.config.reconnect_on_init_timeout {
                    self.schedule_reconnect();
                }
            }
            SessionInput::ReconnectDue => {
                if self.reconnect_timer.take().is_none() {
                    return;
                }
                info!("reconnecting session");
                self.start_attempt();
            }
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Qr(payload) => {
                info!("pairing code received");
                let transition = self.machine.apply(SessionEvent::QrReceived { payload });
                self.commit(transition);
            }
            ClientEvent::Authenticated => {
                let transition = self.machine.apply(SessionEvent::Authenticated);
                self.commit(transition);
            }
            ClientEvent::AuthFailure(reason) => {
                self.cancel_init_timer();
                let transition = self.machine.apply(SessionEvent::AuthFailure { reason });
                self.commit(transition);
            }
            ClientEvent::Ready => {
                self.cancel_init_timer();
                let transition = self.machine.apply(SessionEvent::Ready);
                self.commit(transition);
            }
            ClientEvent::Disconnected(reason) => {
                self.cancel_init_timer();
                let transition = self.machine.apply(SessionEvent::Disconnected { reason });
                self.commit(transition);
                self.schedule_reconnect();
            }
            ClientEvent::Message(message) => {
                debug!(from = %message.from, "inbound message");
                self.channels.emit(GatewayEvent::MessageReceived(message));
            }
            ClientEvent::VoteUpdate(vote) => {
                debug!(
                    message_id = %vote.parent_message_id,
                    voter = %vote.voter,
                    "vote received"
                );
                self.channels.emit(GatewayEvent::VoteReceived(vote.clone()));
                if self.vote_tx.send(vote).is_err() {
                    warn!("vote pipeline is not running; vote dropped");
                }
            }
        }
    }

    fn start_attempt(&mut self) {
        self.cancel_timers();
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.current_attempt = Some(attempt);

        let transition = self.machine.apply(SessionEvent::InitializeStarted);
        self.commit(transition);

        self.init_timer = Some(PendingTimer::spawn(
            self.config.init_timeout(),
            self.input_tx.clone(),
            SessionInput::InitTimeout { attempt },
        ));

        let (event_tx, mut event_rx) = mpsc::channel(CLIENT_EVENT_BUFFER);
        let pump_tx = self.input_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if pump_tx.send(SessionInput::Client { attempt, event }).is_err() {
                    break;
                }
            }
        });

        let client = self.client.clone();
        let result_tx = self.input_tx.clone();
        tokio::spawn(async move {
            let result = client.initialize(event_tx).await;
            let _ = result_tx.send(SessionInput::InitFinished { attempt, result });
        });
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() {
            debug!("reconnect already scheduled");
            return;
        }
        info!(
            delay_ms = self.config.reconnect_delay_ms,
            "scheduling reconnect"
        );
        self.reconnect_timer = Some(PendingTimer::spawn(
            self.config.reconnect_delay(),
            self.input_tx.clone(),
            SessionInput::ReconnectDue,
        ));
    }

    async fn destroy_client(&self, reason: &str) {
        if let Err(err) = self.client.destroy().await {
            warn!(%reason, error = %err, "failed to destroy client connection; continuing");
        }
    }

    fn cancel_init_timer(&mut self) {
        if let Some(timer) = self.init_timer.take() {
            timer.cancel();
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_init_timer();
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn commit(&mut self, transition: Transition) {
        info!(
            from = %transition.from,
            to = %transition.to,
            detail = transition.detail.as_deref().unwrap_or(""),
            "session state changed"
        );
        self.status_tx.send_replace(self.machine.snapshot());
        self.channels
            .publish_state(transition.to, transition.detail);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use gateway_core::ObserverError;

    use super::*;
    use crate::loopback::LoopbackChatClient;

    const LONG: Duration = Duration::from_secs(600);

    struct Harness {
        client: LoopbackChatClient,
        handle: SessionHandle,
        events: EventStream,
        votes: mpsc::UnboundedReceiver<VoteEvent>,
    }

    fn harness(client: LoopbackChatClient, config: SessionConfig) -> Harness {
        let (vote_tx, votes) = mpsc::unbounded_channel();
        let handle = spawn_session(
            Arc::new(client.clone()),
            config,
            GatewayChannels::new(64),
            vote_tx,
        );
        let events = handle.subscribe();
        Harness {
            client,
            handle,
            events,
            votes,
        }
    }

    async fn next_state(
        events: &mut EventStream,
        limit: Duration,
    ) -> Option<(SessionState, Option<String>)> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let event = tokio::time::timeout_at(deadline, events.recv()).await.ok()?;
            if let Ok(GatewayEvent::StateChanged { state, detail }) = event {
                return Some((state, detail));
            }
        }
    }

    async fn expect_states(events: &mut EventStream, expected: &[SessionState]) {
        for state in expected {
            let (seen, _) = next_state(events, LONG)
                .await
                .unwrap_or_else(|| panic!("expected {state}"));
            assert_eq!(seen, *state);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_reaches_connected() {
        let mut h = harness(LoopbackChatClient::ready_on_start(), SessionConfig::default());
        assert_eq!(h.handle.status(), StatusSnapshot::default());

        h.handle.initialize().await.expect("initialize");
        expect_states(
            &mut h.events,
            &[
                SessionState::Connecting,
                SessionState::Authenticated,
                SessionState::Connected,
            ],
        )
        .await;
        assert_eq!(h.handle.status().state, SessionState::Connected);

        // the cancelled init timeout must never fire
        assert_eq!(next_state(&mut h.events, LONG).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn exposes_qr_payload_while_pairing() {
        let client = LoopbackChatClient::with_startup(vec![ClientEvent::Qr("2@pair".into())]);
        let mut h = harness(client, SessionConfig::default());

        h.handle.initialize().await.expect("initialize");
        expect_states(&mut h.events, &[SessionState::Connecting, SessionState::QrReady]).await;
        assert_eq!(h.handle.status().qr.as_deref(), Some("2@pair"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_disconnects_schedule_one_reconnect() {
        let mut h = harness(LoopbackChatClient::ready_on_start(), SessionConfig::default());
        h.handle.initialize().await.expect("initialize");
        h.handle
            .wait_for_state(SessionState::Connected, LONG)
            .await
            .expect("connected");
        expect_states(
            &mut h.events,
            &[
                SessionState::Connecting,
                SessionState::Authenticated,
                SessionState::Connected,
            ],
        )
        .await;

        let started = tokio::time::Instant::now();
        assert!(h.client.emit(ClientEvent::Disconnected("NAVIGATION".into())).await);
        assert!(h.client.emit(ClientEvent::Disconnected("CONFLICT".into())).await);

        let first = next_state(&mut h.events, LONG).await.expect("first disconnect");
        assert_eq!(first, (SessionState::Disconnected, Some("NAVIGATION".into())));
        let second = next_state(&mut h.events, LONG).await.expect("second disconnect");
        assert_eq!(second, (SessionState::Disconnected, Some("CONFLICT".into())));

        expect_states(
            &mut h.events,
            &[
                SessionState::Connecting,
                SessionState::Authenticated,
                SessionState::Connected,
            ],
        )
        .await;
        assert!(started.elapsed() >= Duration::from_secs(5));

        assert_eq!(next_state(&mut h.events, LONG).await, None);
        assert_eq!(h.client.initialize_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn init_timeout_disconnects_without_reconnecting() {
        let client = LoopbackChatClient::with_startup(vec![ClientEvent::Qr("qr".into())]);
        let mut h = harness(client, SessionConfig::default());

        h.handle.initialize().await.expect("initialize");
        expect_states(&mut h.events, &[SessionState::Connecting, SessionState::QrReady]).await;

        let started = tokio::time::Instant::now();
        let timed_out = next_state(&mut h.events, LONG).await.expect("timeout transition");
        assert_eq!(
            timed_out,
            (
                SessionState::Disconnected,
                Some("initialization timeout".into())
            )
        );
        assert!(started.elapsed() <= Duration::from_secs(60));

        assert_eq!(next_state(&mut h.events, LONG).await, None);
        assert_eq!(h.client.initialize_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn init_timeout_reconnects_when_enabled() {
        let client = LoopbackChatClient::with_startup(vec![ClientEvent::Qr("qr".into())]);
        let config = SessionConfig {
            reconnect_on_init_timeout: true,
            ..SessionConfig::default()
        };
        let mut h = harness(client, config);

        h.handle.initialize().await.expect("initialize");
        expect_states(
            &mut h.events,
            &[
                SessionState::Connecting,
                SessionState::QrReady,
                SessionState::Disconnected,
                SessionState::Connecting,
                SessionState::QrReady,
            ],
        )
        .await;
        assert_eq!(h.client.initialize_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_does_not_reconnect() {
        let client =
            LoopbackChatClient::with_startup(vec![ClientEvent::AuthFailure("bad creds".into())]);
        let mut h = harness(client, SessionConfig::default());

        h.handle.initialize().await.expect("initialize");
        expect_states(&mut h.events, &[SessionState::Connecting]).await;
        let failed = next_state(&mut h.events, LONG).await.expect("auth failure");
        assert_eq!(failed, (SessionState::Disconnected, Some("bad creds".into())));

        assert_eq!(next_state(&mut h.events, LONG).await, None);
        assert_eq!(h.client.initialize_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_failure_captures_error_and_cancels_timeout() {
        let client = LoopbackChatClient::default();
        client.set_fail_initialize(Some("browser crashed"));
        let mut h = harness(client, SessionConfig::default());

        h.handle.initialize().await.expect("initialize");
        expect_states(&mut h.events, &[SessionState::Connecting]).await;
        let failed = next_state(&mut h.events, LONG).await.expect("init failure");
        assert_eq!(
            failed,
            (SessionState::Disconnected, Some("browser crashed".into()))
        );

        assert_eq!(next_state(&mut h.events, LONG).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_timers_and_ignores_late_events() {
        let client = LoopbackChatClient::with_startup(vec![ClientEvent::Qr("qr".into())]);
        let mut h = harness(client, SessionConfig::default());

        h.handle.initialize().await.expect("initialize");
        expect_states(&mut h.events, &[SessionState::Connecting, SessionState::QrReady]).await;

        h.handle.disconnect().await.expect("disconnect");
        let stopped = next_state(&mut h.events, LONG).await.expect("disconnect transition");
        assert_eq!(
            stopped,
            (
                SessionState::Disconnected,
                Some("disconnect requested".into())
            )
        );
        assert_eq!(h.client.destroy_calls(), 1);

        assert!(h.client.emit(ClientEvent::Ready).await);
        assert_eq!(next_state(&mut h.events, LONG).await, None);
        assert_eq!(h.handle.status().state, SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reinitialize_tolerates_destroy_failure() {
        let h = harness(LoopbackChatClient::ready_on_start(), SessionConfig::default());
        h.client.set_fail_destroy(Some("page closed"));

        h.handle.initialize().await.expect("initialize");
        h.handle
            .wait_for_state(SessionState::Connected, LONG)
            .await
            .expect("connected");

        h.handle.reinitialize().await.expect("reinitialize");
        assert_eq!(h.handle.status().state, SessionState::Connecting);
        h.handle
            .wait_for_state(SessionState::Connected, LONG)
            .await
            .expect("connected again");

        assert_eq!(h.client.destroy_calls(), 1);
        assert_eq!(h.client.initialize_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_votes_to_pipeline() {
        let mut h = harness(LoopbackChatClient::ready_on_start(), SessionConfig::default());
        h.handle.initialize().await.expect("initialize");
        h.handle
            .wait_for_state(SessionState::Connected, LONG)
            .await
            .expect("connected");

        let vote = VoteEvent {
            voter: "1555@c.us".into(),
            parent_message_id: "m1".into(),
            selected_option_name: "Yes".into(),
            interaction_timestamp: 1_700_000_000,
        };
        assert!(h.client.emit(ClientEvent::VoteUpdate(vote.clone())).await);

        let forwarded = tokio::time::timeout(LONG, h.votes.recv())
            .await
            .expect("vote forwarded in time");
        assert_eq!(forwarded, Some(vote));
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_every_transition_in_order() {
        let mut h = harness(LoopbackChatClient::ready_on_start(), SessionConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        h.handle.register_observer(Arc::new(
            move |state: SessionState, _detail: Option<&str>| -> Result<(), ObserverError> {
                sink.lock().expect("observer log").push(state);
                Ok(())
            },
        ));

        h.handle.initialize().await.expect("initialize");
        // broadcast follows observer delivery, so the log is complete here
        expect_states(
            &mut h.events,
            &[
                SessionState::Connecting,
                SessionState::Authenticated,
                SessionState::Connected,
            ],
        )
        .await;

        assert_eq!(
            *seen.lock().expect("observer log"),
            vec![
                SessionState::Connecting,
                SessionState::Authenticated,
                SessionState::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_initialize_rearms_a_single_init_timeout() {
        let client = LoopbackChatClient::with_startup(vec![ClientEvent::Qr("qr".into())]);
        let mut h = harness(client, SessionConfig::default());

        h.handle.initialize().await.expect("initialize");
        expect_states(&mut h.events, &[SessionState::Connecting, SessionState::QrReady]).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        h.handle.initialize().await.expect("second initialize");
        let rearmed = tokio::time::Instant::now();
        expect_states(&mut h.events, &[SessionState::Connecting, SessionState::QrReady]).await;

        let timed_out = next_state(&mut h.events, LONG).await.expect("timeout transition");
        assert_eq!(
            timed_out,
            (
                SessionState::Disconnected,
                Some("initialization timeout".into())
            )
        );
        let waited = rearmed.elapsed();
        assert!(waited >= Duration::from_secs(59), "fired early: {waited:?}");
        assert!(waited <= Duration::from_secs(60), "fired late: {waited:?}");

        assert_eq!(next_state(&mut h.events, LONG).await, None);
        assert_eq!(h.client.initialize_calls(), 2);
    }

    async fn connect_then_drop(h: &mut Harness) {
        h.handle.initialize().await.expect("initialize");
        expect_states(
            &mut h.events,
            &[
                SessionState::Connecting,
                SessionState::Authenticated,
                SessionState::Connected,
            ],
        )
        .await;

        assert!(h.client.emit(ClientEvent::Disconnected("NAVIGATION".into())).await);
        let dropped = next_state(&mut h.events, LONG).await.expect("disconnect event");
        assert_eq!(dropped, (SessionState::Disconnected, Some("NAVIGATION".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let mut h = harness(LoopbackChatClient::ready_on_start(), SessionConfig::default());
        connect_then_drop(&mut h).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        h.handle.disconnect().await.expect("disconnect");
        let stopped = next_state(&mut h.events, LONG).await.expect("disconnect transition");
        assert_eq!(
            stopped,
            (
                SessionState::Disconnected,
                Some("disconnect requested".into())
            )
        );

        assert_eq!(next_state(&mut h.events, LONG).await, None);
        assert_eq!(h.client.initialize_calls(), 1);
        assert_eq!(h.handle.status().state, SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_supersedes_pending_reconnect() {
        let mut h = harness(LoopbackChatClient::ready_on_start(), SessionConfig::default());
        connect_then_drop(&mut h).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        h.handle.initialize().await.expect("manual initialize");
        expect_states(
            &mut h.events,
            &[
                SessionState::Connecting,
                SessionState::Authenticated,
                SessionState::Connected,
            ],
        )
        .await;

        assert_eq!(next_state(&mut h.events, LONG).await, None);
        assert_eq!(h.client.initialize_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handles_cancels_pending_reconnect() {
        let mut h = harness(LoopbackChatClient::ready_on_start(), SessionConfig::default());
        connect_then_drop(&mut h).await;

        let Harness { client, handle, .. } = h;
        drop(handle);
        tokio::time::sleep(LONG).await;

        assert_eq!(client.initialize_calls(), 1);
        assert_eq!(client.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn commands_fail_once_runtime_is_gone() {
        let (command_tx, command_rx) = mpsc::channel(1);
        drop(command_rx);
        let (_status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let handle = SessionHandle {
            command_tx,
            status_rx,
            channels: GatewayChannels::default(),
        };

        let err = handle.initialize().await.expect_err("closed runtime must fail");
        assert_eq!(err.code, "runtime_closed");
    }
}
