use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::types::{GatewayEvent, SessionState};

/// Broadcast event stream type used by gateway subscribers.
pub type EventStream = broadcast::Receiver<GatewayEvent>;

/// Error an observer may return; logged and otherwise ignored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("observer failed: {0}")]
pub struct ObserverError(pub String);

/// Synchronous receiver of session state changes.
pub trait StateObserver: Send + Sync {
    fn on_state_change(
        &self,
        state: SessionState,
        detail: Option<&str>,
    ) -> Result<(), ObserverError>;
}

impl<F> StateObserver for F
where
    F: Fn(SessionState, Option<&str>) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_state_change(
        &self,
        state: SessionState,
        detail: Option<&str>,
    ) -> Result<(), ObserverError> {
        self(state, detail)
    }
}

/// Ordered list of state observers.
///
/// Every observer runs on every notification, in registration order, even if
/// an earlier one returned an error or panicked.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Arc<RwLock<Vec<Arc<dyn StateObserver>>>>,
}

impl ObserverRegistry {
    pub fn register(&self, observer: Arc<dyn StateObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, state: SessionState, detail: Option<&str>) {
        for (index, observer) in self.snapshot().iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_state_change(state, detail))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(observer = index, %state, error = %err, "state observer failed");
                }
                Err(_) => {
                    warn!(observer = index, %state, "state observer panicked");
                }
            }
        }
    }

    // Cloned so observers may register further observers without deadlocking.
    fn snapshot(&self) -> Vec<Arc<dyn StateObserver>> {
        match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Event fan-out shared by the session runtime and the vote pipeline.
#[derive(Clone)]
pub struct GatewayChannels {
    event_tx: broadcast::Sender<GatewayEvent>,
    observers: ObserverRegistry,
}

impl GatewayChannels {
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self {
            event_tx,
            observers: ObserverRegistry::default(),
        }
    }

    /// Subscribe to emitted gateway events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Run state observers in order, then broadcast the change.
    pub fn publish_state(&self, state: SessionState, detail: Option<String>) {
        self.observers.notify(state, detail.as_deref());
        self.emit(GatewayEvent::StateChanged { state, detail });
    }
}

impl Default for GatewayChannels {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording_observer(
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn StateObserver> {
        Arc::new(
            move |state: SessionState, _detail: Option<&str>| -> Result<(), ObserverError> {
                log.lock().expect("log lock").push(format!("{name}:{state}"));
                Ok(())
            },
        )
    }

    #[test]
    fn notifies_observers_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::default();
        registry.register(recording_observer("a", log.clone()));
        registry.register(recording_observer("b", log.clone()));

        registry.notify(SessionState::Connecting, None);

        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["a:CONNECTING".to_owned(), "b:CONNECTING".to_owned()]
        );
    }

    #[test]
    fn failing_observers_do_not_skip_later_ones() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::default();
        registry.register(Arc::new(
            |_: SessionState, _: Option<&str>| -> Result<(), ObserverError> {
                Err(ObserverError("boom".into()))
            },
        ));
        registry.register(Arc::new(|_: SessionState, _: Option<&str>| -> Result<(), ObserverError> {
            panic!("observer bug")
        }));
        registry.register(recording_observer("last", log.clone()));

        registry.notify(SessionState::Disconnected, Some("LOGOUT"));

        assert_eq!(*log.lock().expect("log lock"), vec!["last:DISCONNECTED"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn passes_detail_to_observers() {
        let seen = Arc::new(Mutex::new(None));
        let registry = ObserverRegistry::default();
        let sink = seen.clone();
        registry.register(Arc::new(
            move |_: SessionState, detail: Option<&str>| -> Result<(), ObserverError> {
                *sink.lock().expect("detail lock") = detail.map(str::to_owned);
                Ok(())
            },
        ));

        registry.notify(SessionState::Disconnected, Some("initialization timeout"));
        assert_eq!(
            seen.lock().expect("detail lock").as_deref(),
            Some("initialization timeout")
        );
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let channels = GatewayChannels::new(16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels.publish_state(SessionState::QrReady, None);

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
        assert_eq!(
            event_a,
            GatewayEvent::StateChanged {
                state: SessionState::QrReady,
                detail: None,
            }
        );
    }
}
