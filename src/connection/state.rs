//! Connection state machine.
//!
//! ```text
//! Idle ─► Preparing ─► Ready ◄─► Waiting ─► Failed
//!              │                    ▲
//!              └────────────────────┘
//! any ─► Cancelled            (Failed, Cancelled are terminal)
//! ```

use tokio::sync::watch;

use crate::transport::TransportError;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Default)]
pub enum ConnectionState {
    /// Created, not started.
    #[default]
    Idle,
    /// Start issued, transport establishing.
    Preparing,
    /// Sends and receives are valid.
    Ready,
    /// Transport reported a problem it may recover from.
    Waiting(TransportError),
    /// Terminal failure.
    Failed(TransportError),
    /// Terminal, stopped without error.
    Cancelled,
}

impl ConnectionState {
    /// Whether sends and receives are valid.
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Whether no further transitions can happen.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_) | ConnectionState::Cancelled)
    }

    /// Short name for log output.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Preparing => "preparing",
            ConnectionState::Ready => "ready",
            ConnectionState::Waiting(_) => "waiting",
            ConnectionState::Failed(_) => "failed",
            ConnectionState::Cancelled => "cancelled",
        }
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Failed(_) | Cancelled, _) => false,
            (_, Cancelled) => true,
            (Idle, Preparing) => true,
            (Preparing, Preparing | Ready | Waiting(_) | Failed(_)) => true,
            (Ready, Waiting(_) | Failed(_)) => true,
            (Waiting(_), Ready | Waiting(_) | Failed(_)) => true,
            _ => false,
        }
    }
}

/// Resolves once the watched state is terminal.
pub(crate) async fn wait_terminal(rx: &mut watch::Receiver<ConnectionState>) {
    loop {
        if rx.borrow_and_update().is_terminal() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
