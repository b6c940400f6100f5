//! Participant identities and the connector mapping.
//!
//! An [`Identity`] is a plain value. Processes record the value, not a
//! pointer into the mapping, so a participant that reconnects under the same
//! identity is recognised again without any rewiring.
//!
//! The [`IdentityService`] enforces the bidirectional invariant: at most one
//! identity per connector and at most one connector per identity.

use crate::bridge::{Bridge, WeakBridge};
use crate::connector::ConnectorId;
use crate::error::{BridgeError, Result};
use crate::event::Event;
use crate::handler::{Delivery, EventHandler};
use crate::module::Module;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A remote participant: a human player or an AI module.
///
/// Equality and hashing compare fields, so two independently built values
/// for the same player are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    /// Human player, by account name.
    Player {
        /// Account name.
        name: String,
    },
    /// AI participant, by module name.
    Ai {
        /// Module name.
        module: String,
    },
}

impl Identity {
    /// A player identity.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] if `name` is blank.
    pub fn player(name: impl Into<String>) -> Result<Self> {
        let identity = Self::Player { name: name.into() };
        identity.validate()?;
        Ok(identity)
    }

    /// An AI identity.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] if `module` is blank.
    pub fn ai(module: impl Into<String>) -> Result<Self> {
        let identity = Self::Ai {
            module: module.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// The name part, without the variant prefix.
    pub fn label(&self) -> &str {
        match self {
            Self::Player { name } => name,
            Self::Ai { module } => module,
        }
    }

    /// Returns `true` for [`Identity::Ai`].
    pub fn is_ai(&self) -> bool {
        matches!(self, Self::Ai { .. })
    }

    /// Rejects identities with a blank name.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] if the name is blank.
    pub fn validate(&self) -> Result<()> {
        if self.label().trim().is_empty() {
            return Err(BridgeError::validation("identity name is blank"));
        }
        Ok(())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player { name } => write!(f, "player:{name}"),
            Self::Ai { module } => write!(f, "ai:{module}"),
        }
    }
}

/// Bidirectional connector ↔ identity mapping.
///
/// Cheap to clone; clones share the mapping. Attach it to a bridge as a
/// module so a connector's identity is dropped when the connector leaves.
#[derive(Clone, Default)]
pub struct IdentityService {
    by_connector: Arc<DashMap<ConnectorId, Identity>>,
}

impl IdentityService {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity bound to `connector`. O(1).
    pub fn get_identity(&self, connector: ConnectorId) -> Option<Identity> {
        self.by_connector.get(&connector).map(|e| e.value().clone())
    }

    /// Connector bound to `identity`. Linear in the number of participants.
    pub fn get_connector(&self, identity: &Identity) -> Option<ConnectorId> {
        self.by_connector
            .iter()
            .find(|e| e.value() == identity)
            .map(|e| *e.key())
    }

    /// Binds `identity` to `connector`, replacing the connector's previous
    /// identity and releasing any other connector's claim on `identity`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] for the nil connector id or a blank
    /// identity.
    pub fn put_identity(&self, connector: ConnectorId, identity: Identity) -> Result<()> {
        if connector.is_nil() {
            return Err(BridgeError::validation("connector id is nil"));
        }
        identity.validate()?;

        let stale: Vec<ConnectorId> = self
            .by_connector
            .iter()
            .filter(|e| *e.key() != connector && e.value() == &identity)
            .map(|e| *e.key())
            .collect();
        for other in stale {
            tracing::debug!(connector = %other, %identity, "identity moved to another connector");
            self.by_connector.remove(&other);
        }

        if let Some(previous) = self.by_connector.insert(connector, identity.clone()) {
            if previous != identity {
                tracing::debug!(%connector, %previous, %identity, "identity replaced");
            }
        }
        Ok(())
    }

    /// Unbinds `connector`. Returns the identity it had.
    pub fn remove_identity(&self, connector: ConnectorId) -> Option<Identity> {
        self.by_connector.remove(&connector).map(|(_, identity)| identity)
    }

    /// Unbinds whichever connector holds `identity`. No-op if none does.
    pub fn remove_identity_value(&self, identity: &Identity) -> Option<ConnectorId> {
        let connector = self.get_connector(identity)?;
        self.by_connector.remove(&connector);
        Some(connector)
    }

    /// All current bindings.
    pub fn participants(&self) -> Vec<(ConnectorId, Identity)> {
        self.by_connector
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Number of bound connectors.
    pub fn len(&self) -> usize {
        self.by_connector.len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.by_connector.is_empty()
    }
}

impl fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityService")
            .field("participants", &self.len())
            .finish()
    }
}

impl Module for IdentityService {
    fn name(&self) -> &'static str {
        "IdentityService"
    }

    fn on_disconnect(&self, _bridge: &Bridge, connector: ConnectorId) {
        if let Some(identity) = self.remove_identity(connector) {
            tracing::debug!(%connector, %identity, "identity released on disconnect");
        }
    }
}

/// Handshake sent by a participant to bind its connector to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticate {
    identity: Identity,
}

impl Authenticate {
    /// Builds the handshake.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] if the identity is blank.
    pub fn new(identity: Identity) -> Result<Self> {
        identity.validate()?;
        Ok(Self { identity })
    }

    /// The claimed identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl Event for Authenticate {
    fn kind(&self) -> &'static str {
        "identity.authenticate"
    }

    crate::auto_serialize!();
}

/// Reply confirming a successful [`Authenticate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticated {
    /// The bound identity.
    pub identity: Identity,
}

impl Event for Authenticated {
    fn kind(&self) -> &'static str {
        "identity.authenticated"
    }

    crate::auto_serialize!();
}

/// Binds the source connector of an [`Authenticate`] to its identity and
/// replies with [`Authenticated`].
///
/// Credential checks belong to the transport; this handler trusts what
/// arrives.
pub struct AuthenticationHandler {
    identities: IdentityService,
    bridge: WeakBridge,
}

impl AuthenticationHandler {
    /// Handler writing into `identities` and replying through `bridge`.
    pub fn new(identities: IdentityService, bridge: &Bridge) -> Self {
        Self {
            identities,
            bridge: bridge.downgrade(),
        }
    }
}

impl EventHandler<Authenticate> for AuthenticationHandler {
    fn handle(&self, event: &Authenticate, delivery: &Delivery) -> anyhow::Result<()> {
        self.identities
            .put_identity(delivery.source, event.identity.clone())?;
        tracing::info!(connector = %delivery.source, identity = %event.identity, "participant authenticated");

        if let Some(bridge) = self.bridge.upgrade() {
            bridge.send_to(
                delivery.source,
                Authenticated {
                    identity: event.identity.clone(),
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str) -> Identity {
        Identity::player(name).unwrap()
    }

    #[test]
    fn value_equality() {
        assert_eq!(player("ann"), player("ann"));
        assert_ne!(player("ann"), Identity::ai("ann").unwrap());
        assert_eq!(player("ann").to_string(), "player:ann");
        assert_eq!(Identity::ai("crawler").unwrap().to_string(), "ai:crawler");
    }

    #[test]
    fn blank_identity_rejected() {
        assert!(matches!(Identity::player(" "), Err(BridgeError::Validation(_))));
        assert!(Authenticate::new(Identity::Ai { module: String::new() }).is_err());
    }

    #[test]
    fn put_rejects_nil_connector_and_blank_identity() {
        let svc = IdentityService::new();
        assert!(matches!(
            svc.put_identity(ConnectorId::nil(), player("a")),
            Err(BridgeError::Validation(_))
        ));
        let blank = Identity::Player { name: "".into() };
        assert!(matches!(
            svc.put_identity(ConnectorId::new(), blank),
            Err(BridgeError::Validation(_))
        ));
        assert!(svc.is_empty());
    }

    #[test]
    fn put_overwrites_and_keeps_one_connector_per_identity() {
        let svc = IdentityService::new();
        let (c1, c2) = (ConnectorId::new(), ConnectorId::new());

        svc.put_identity(c1, player("a")).unwrap();
        svc.put_identity(c1, player("b")).unwrap();
        assert_eq!(svc.get_identity(c1), Some(player("b")));
        assert_eq!(svc.get_connector(&player("a")), None);

        svc.put_identity(c2, player("b")).unwrap();
        assert_eq!(svc.get_identity(c1), None);
        assert_eq!(svc.get_connector(&player("b")), Some(c2));
        assert_eq!(svc.len(), 1);
    }

    #[test]
    fn remove_by_value() {
        let svc = IdentityService::new();
        let c = ConnectorId::new();
        svc.put_identity(c, player("a")).unwrap();

        assert_eq!(svc.remove_identity_value(&player("zzz")), None);
        assert_eq!(svc.remove_identity_value(&player("a")), Some(c));
        assert_eq!(svc.remove_identity(c), None);
    }

    #[test]
    fn random_puts_preserve_round_trip() {
        let svc = IdentityService::new();
        let connectors: Vec<ConnectorId> = (0..6).map(|_| ConnectorId::new()).collect();
        let names = ["a", "b", "c", "d"];
        let mut rng = fastrand::Rng::with_seed(7);

        for _ in 0..500 {
            let c = connectors[rng.usize(..connectors.len())];
            match rng.u8(..10) {
                0 => {
                    svc.remove_identity(c);
                }
                _ => svc.put_identity(c, player(names[rng.usize(..names.len())])).unwrap(),
            }

            for name in names {
                let id = player(name);
                if let Some(connector) = svc.get_connector(&id) {
                    assert_eq!(svc.get_identity(connector), Some(id));
                }
            }
            assert!(svc.len() <= names.len());
        }
    }

    #[test]
    fn serde_tagged_form() {
        let json = serde_json::to_value(player("ann")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "player", "name": "ann" }));
        let back: Identity = serde_json::from_value(json).unwrap();
        assert_eq!(back, player("ann"));
    }
}
