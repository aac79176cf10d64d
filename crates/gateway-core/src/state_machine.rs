use crate::{
    error::GatewayError,
    types::{SessionState, StatusSnapshot},
};

/// Inputs that move the session between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new initialization attempt started.
    InitializeStarted,
    /// Client produced pairing material.
    QrReceived { payload: String },
    /// Client finished pairing.
    Authenticated,
    /// Client rejected the stored credentials.
    AuthFailure { reason: String },
    /// Client is ready to send.
    Ready,
    /// Client lost its connection.
    Disconnected { reason: String },
    /// Client startup call failed.
    InitFailed { error: String },
    /// Attempt produced no `Ready` before its deadline.
    InitTimedOut,
    /// Operator requested a disconnect.
    DisconnectRequested,
}

/// Record of one applied transition, used for notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    snapshot: StatusSnapshot,
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionState {
        self.snapshot.state
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.clone()
    }

    /// Fail with `NotReady` unless the session is `Connected`.
    pub fn ensure_ready(&self) -> Result<(), GatewayError> {
        ensure_ready(&self.snapshot)
    }

    pub fn apply(&mut self, event: SessionEvent) -> Transition {
        use SessionEvent::*;

        match event {
            InitializeStarted => self.transition(SessionState::Connecting, None, None),
            QrReceived { payload } => self.transition(SessionState::QrReady, Some(payload), None),
            Authenticated => self.transition(SessionState::Authenticated, None, None),
            AuthFailure { reason } => self.transition(SessionState::Disconnected, None, Some(reason)),
            Ready => self.transition(SessionState::Connected, None, None),
            Disconnected { reason } => {
                self.transition(SessionState::Disconnected, None, Some(reason))
            }
            InitFailed { error } => self.transition(SessionState::Disconnected, None, Some(error)),
            InitTimedOut => self.transition(
                SessionState::Disconnected,
                None,
                Some("initialization timeout".to_owned()),
            ),
            DisconnectRequested => self.transition(
                SessionState::Disconnected,
                None,
                Some("disconnect requested".to_owned()),
            ),
        }
    }

    fn transition(
        &mut self,
        next: SessionState,
        qr: Option<String>,
        detail: Option<String>,
    ) -> Transition {
        let from = self.snapshot.state;
        self.snapshot = StatusSnapshot { state: next, qr };
        Transition {
            from,
            to: next,
            detail,
        }
    }
}

/// Fail with `NotReady` unless the snapshot reports `Connected`.
pub fn ensure_ready(snapshot: &StatusSnapshot) -> Result<(), GatewayError> {
    if snapshot.state.can_send() {
        Ok(())
    } else {
        Err(GatewayError::not_ready(snapshot.state))
    }
}
