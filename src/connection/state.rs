//! Connection lifecycle states and reconnection policy.
//!
//! ```text
//!  Disconnected ──► Connecting ──► Connected ◄──────────┐
//!        │              │            │   │              │
//!        │              │            │   └─► Reconnecting
//!        │              │            ▼          │   │
//!        │              │         Draining ◄────┘   │
//!        ▼              ▼            ▼              ▼
//!      Closed ◄──────────────────────┴──────────────┘
//! ```
//!
//! `Closed` is terminal. The current state is published through a
//! `tokio::sync::watch` channel so readers never block the loop.

// Rust guideline compliant 2026-02

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::ConnectOptions;
use crate::error::{ErrorCode, NatsError};

/// Overall connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected yet.
    #[default]
    Disconnected,
    /// Initial connection attempt in progress.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Socket lost; attempting to reconnect.
    Reconnecting,
    /// Letting in-flight requests finish before closing.
    Draining,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Closed, Connected, Connecting, Disconnected, Draining, Reconnecting};
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connected, Reconnecting)
            | (Reconnecting, Connected)
            | (Connected, Draining)
            | (Reconnecting, Draining) => true,
            _ => false,
        }
    }

    /// Whether this is the terminal state.
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }

    /// Error for operations that need a live, non-draining connection.
    pub fn check_accepts_requests(self) -> Result<(), NatsError> {
        match self {
            Self::Closed => Err(NatsError::for_code(ErrorCode::ConnectionClosed)),
            Self::Draining => Err(NatsError::for_code(ErrorCode::ConnectionDraining)),
            _ => Ok(()),
        }
    }

    /// Whether topology announcements are processed in this state.
    pub fn accepts_topology_updates(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Observable state holder enforcing legal transitions.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next` if legal. Returns whether the state changed.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut from = ConnectionState::Disconnected;
        let changed = self.tx.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            log::info!("[Connection] {} -> {}", from, next);
        } else if from != next {
            log::debug!("[Connection] Ignoring transition {} -> {}", from, next);
        }
        changed
    }
}

/// When and how often to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect at all.
    pub enabled: bool,
    /// Attempt cap, `None` for unlimited.
    pub max_attempts: Option<u64>,
    /// Wait between attempts.
    pub delay: Duration,
}

impl ReconnectPolicy {
    /// Policy described by connection options.
    pub fn from_options(options: &ConnectOptions) -> Self {
        Self {
            enabled: options.reconnect,
            max_attempts: options.reconnect_attempt_limit(),
            delay: options.reconnect_delay(),
        }
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows(&self, attempt: u64) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Wait before attempt number `attempt`. The first attempt runs
    /// immediately.
    pub fn delay_before(&self, attempt: u64) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}
