use std::sync::Arc;

use gateway_backend::BackendClient;
use gateway_core::{
    EventStream, GatewayChannels, GatewayError, SessionConfig, StateObserver, StatusSnapshot,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    client::ChatClient,
    facade::{FacadeConfig, MessagingFacade},
    session::{SessionHandle, spawn_session},
    votes::VotePipeline,
};

const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    pub session: SessionConfig,
    pub facade: FacadeConfig,
    /// Capacity of the broadcast event stream.
    pub event_buffer: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            facade: FacadeConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// One session, its facade and its vote worker, wired together.
pub struct Gateway {
    session: SessionHandle,
    facade: Arc<MessagingFacade>,
    vote_stop: CancellationToken,
    vote_worker: JoinHandle<()>,
}

impl Gateway {
    /// Spawn the session and vote worker, then start the first connection
    /// attempt.
    pub async fn start(
        client: Arc<dyn ChatClient>,
        backend: BackendClient,
        options: GatewayOptions,
    ) -> Result<Self, GatewayError> {
        let channels = GatewayChannels::new(options.event_buffer.max(1));
        let (vote_tx, vote_rx) = mpsc::unbounded_channel();
        let session = spawn_session(
            Arc::clone(&client),
            options.session,
            channels.clone(),
            vote_tx,
        );

        let facade = Arc::new(MessagingFacade::new(
            client,
            session.status_receiver(),
            backend.clone(),
            options.facade,
        ));
        let vote_stop = CancellationToken::new();
        let vote_worker =
            VotePipeline::new(backend, Arc::clone(&facade), channels).spawn(vote_rx, vote_stop.clone());

        let gateway = Self {
            session,
            facade,
            vote_stop,
            vote_worker,
        };
        gateway.session.initialize().await?;
        info!("gateway started");
        Ok(gateway)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn facade(&self) -> &MessagingFacade {
        &self.facade
    }

    pub fn status(&self) -> StatusSnapshot {
        self.session.status()
    }

    pub fn subscribe(&self) -> EventStream {
        self.session.subscribe()
    }

    pub fn register_observer(&self, observer: Arc<dyn StateObserver>) {
        self.session.register_observer(observer);
    }

    pub async fn reinitialize(&self) -> Result<(), GatewayError> {
        self.session.reinitialize().await
    }

    pub async fn disconnect(&self) -> Result<(), GatewayError> {
        self.session.disconnect().await
    }

    /// Disconnect, stop accepting votes and wait for in-flight ones.
    pub async fn shutdown(self) -> Result<(), GatewayError> {
        let Self {
            session,
            facade,
            vote_stop,
            vote_worker,
        } = self;

        let disconnected = session.disconnect().await;
        drop(session);
        vote_stop.cancel();
        if let Err(err) = vote_worker.await {
            warn!(error = %err, "vote worker ended abnormally");
        }
        drop(facade);

        info!("gateway stopped");
        disconnected
    }
}
