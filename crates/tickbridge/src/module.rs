//! Bridge modules.
//!
//! Modules extend a bridge with one capability each. A bridge holds at most
//! one module per concrete type and looks them up by type, so there is no
//! string-keyed service registry.

use crate::bridge::Bridge;
use crate::connector::ConnectorId;
use crate::event::EventEnvelope;
use crate::invocation::InvocationProvider;
use std::sync::Arc;

/// A capability attached to a [`Bridge`].
///
/// Every hook has an empty default so modules only implement what they use.
pub trait Module: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called once after the module is attached.
    fn on_attach(&self, _bridge: &Bridge) {}

    /// Called once after the module is removed or the bridge shuts down.
    fn on_detach(&self, _bridge: &Bridge) {}

    /// A connector joined the bridge.
    fn on_connect(&self, _bridge: &Bridge, _connector: ConnectorId) {}

    /// A connector left the routing table.
    fn on_disconnect(&self, _bridge: &Bridge, _connector: ConnectorId) {}

    /// An inbound event arrived through `source`.
    fn handle(&self, _bridge: &Bridge, _event: &EventEnvelope, _source: ConnectorId) {}
}

/// Makes [`Bridge::send`] asynchronous by routing through a provider.
///
/// Without this module `send` resolves routes and delivers on the caller's
/// stack. With it, routing happens whenever the provider runs the task.
pub struct InvocationModule {
    provider: Arc<dyn InvocationProvider>,
}

impl InvocationModule {
    /// Routes outbound sends through `provider`.
    pub fn new(provider: Arc<dyn InvocationProvider>) -> Self {
        Self { provider }
    }

    /// The configured provider.
    pub fn provider(&self) -> &Arc<dyn InvocationProvider> {
        &self.provider
    }
}

impl Module for InvocationModule {
    fn name(&self) -> &'static str {
        "InvocationModule"
    }
}
