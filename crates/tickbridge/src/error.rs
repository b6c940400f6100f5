//! Bridge error types.
//!
//! Only lifecycle errors ([`BridgeError::NotStarted`],
//! [`BridgeError::ConnectorClosed`]) are expected to reach the caller of
//! `send`/`connect`. Failures inside handlers never surface here; they are
//! isolated and logged by the dispatcher.

use crate::connector::ConnectorId;
use thiserror::Error;

/// Errors raised by the bridge, its connectors and the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// An argument failed validation (nil connector id, blank identity,
    /// malformed event field).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The bridge was torn down, or the connector was never started.
    #[error("bridge or connector not started")]
    NotStarted,

    /// The connector has been stopped.
    #[error("connector closed: {0}")]
    ConnectorClosed(ConnectorId),

    /// A module of the same type is already attached.
    #[error("module already attached: {0}")]
    ModuleExists(&'static str),

    /// An event could not be encoded or decoded by a transport.
    #[error("codec error: {0}")]
    Codec(String),
}

impl BridgeError {
    /// Shorthand for [`BridgeError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns `true` for errors caused by connector or bridge lifecycle.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::NotStarted | Self::ConnectorClosed(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_validation() {
        let err = BridgeError::validation("identity name is blank");
        assert_eq!(err.to_string(), "validation failed: identity name is blank");
    }

    #[test]
    fn lifecycle_classification() {
        assert!(BridgeError::NotStarted.is_lifecycle());
        assert!(BridgeError::ConnectorClosed(ConnectorId::new()).is_lifecycle());
        assert!(!BridgeError::Codec("bad frame".into()).is_lifecycle());
        assert!(!BridgeError::ModuleExists("HandlerModule").is_lifecycle());
    }
}
