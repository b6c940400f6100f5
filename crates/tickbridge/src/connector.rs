//! Connector abstraction.
//!
//! A connector is one peer link attached to a [`Bridge`](crate::Bridge). It
//! knows nothing about identities; the [`IdentityService`](crate::IdentityService)
//! maps connectors to participants separately.

use crate::error::Result;
use crate::event::EventEnvelope;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

/// Identity-agnostic handle for a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectorId(Uuid);

impl ConnectorId {
    /// Generates a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil id. Never assigned to a live connector.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns `true` for [`ConnectorId::nil`].
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Underlying UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorState {
    /// Created, not yet linked to a peer.
    Connecting,
    /// Linked; events flow.
    Active,
    /// Stopped. Terminal.
    Closed,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One communication link attached to a bridge.
pub trait Connector: Send + Sync {
    /// Stable id of this link.
    fn id(&self) -> ConnectorId;

    /// Current lifecycle state.
    fn state(&self) -> ConnectorState;

    /// Sends an event to the peer.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConnectorClosed`](crate::BridgeError::ConnectorClosed)
    /// after [`stop`](Connector::stop),
    /// [`BridgeError::NotStarted`](crate::BridgeError::NotStarted) before the
    /// link is established.
    fn send(&self, event: EventEnvelope) -> Result<()>;

    /// Closes the link in both directions. Idempotent.
    fn stop(&self);
}

/// Atomic cell holding a [`ConnectorState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ConnectorState) -> Self {
        Self(AtomicU8::new(Self::encode(state)))
    }

    pub(crate) fn get(&self) -> ConnectorState {
        match self.0.load(Ordering::Acquire) {
            0 => ConnectorState::Connecting,
            1 => ConnectorState::Active,
            _ => ConnectorState::Closed,
        }
    }

    pub(crate) fn set(&self, state: ConnectorState) {
        self.0.store(Self::encode(state), Ordering::Release);
    }

    /// Moves to `Closed`. Returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(Self::encode(ConnectorState::Closed), Ordering::AcqRel)
            != Self::encode(ConnectorState::Closed)
    }

    fn encode(state: ConnectorState) -> u8 {
        match state {
            ConnectorState::Connecting => 0,
            ConnectorState::Active => 1,
            ConnectorState::Closed => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_id() {
        assert!(ConnectorId::nil().is_nil());
        assert!(!ConnectorId::new().is_nil());
        assert_ne!(ConnectorId::new(), ConnectorId::new());
    }

    #[test]
    fn state_cell_close_once() {
        let cell = StateCell::new(ConnectorState::Connecting);
        assert_eq!(cell.get(), ConnectorState::Connecting);
        cell.set(ConnectorState::Active);
        assert_eq!(cell.get(), ConnectorState::Active);
        assert!(cell.close());
        assert!(!cell.close());
        assert_eq!(cell.get(), ConnectorState::Closed);
    }
}
