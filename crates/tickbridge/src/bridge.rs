//! The bridge hub.
//!
//! ```text
//!             send()                         handle()
//! caller ──► Bridge ──► Connector ─ ─ ─ ► Connector ──► Bridge ──► Modules
//!             │  (InvocationModule may           (peer's provider
//!             │   defer routing)                  schedules delivery)
//! ```
//!
//! A [`Bridge`] is a cheap handle; clones share the same connectors and
//! modules. Connectors and modules hold a [`WeakBridge`] so the hub does not
//! keep itself alive.

use crate::config::{BridgeConfig, ConfigError};
use crate::connector::{Connector, ConnectorId};
use crate::error::{BridgeError, Result};
use crate::event::{Event, EventEnvelope};
use crate::module::{InvocationModule, Module};
use dashmap::DashMap;
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

struct ModuleSlot {
    module: Arc<dyn Module>,
    any: Arc<dyn Any + Send + Sync>,
}

struct BridgeInner {
    config: BridgeConfig,
    running: AtomicBool,
    connectors: DashMap<ConnectorId, Arc<dyn Connector>>,
    modules: DashMap<TypeId, ModuleSlot>,
}

/// Central hub owning connectors and modules.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

/// Non-owning reference to a [`Bridge`].
#[derive(Clone, Default)]
pub struct WeakBridge(Weak<BridgeInner>);

impl WeakBridge {
    /// Upgrades to a bridge handle if the bridge still exists.
    pub fn upgrade(&self) -> Option<Bridge> {
        self.0.upgrade().map(|inner| Bridge { inner })
    }
}

impl fmt::Debug for WeakBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakBridge")
    }
}

impl Bridge {
    /// Creates a running bridge with default settings.
    pub fn new() -> Self {
        Self::from_config(BridgeConfig::default())
    }

    /// Creates a running bridge named `name`. A blank name falls back to
    /// the default one.
    pub fn named(name: impl Into<String>) -> Self {
        let config = BridgeConfig::named(name);
        if config.validate().is_err() {
            return Self::new();
        }
        Self::from_config(config)
    }

    /// Creates a running bridge from `config`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `config` fails
    /// [`BridgeConfig::validate`].
    pub fn with_config(config: BridgeConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                config,
                running: AtomicBool::new(true),
                connectors: DashMap::new(),
                modules: DashMap::new(),
            }),
        }
    }

    /// Name from the config.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Settings this bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Returns `false` once [`shutdown`](Self::shutdown) has run.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// A non-owning handle.
    pub fn downgrade(&self) -> WeakBridge {
        WeakBridge(Arc::downgrade(&self.inner))
    }

    /// Returns `true` if both handles point at the same bridge.
    pub fn ptr_eq(&self, other: &Bridge) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BridgeError::NotStarted)
        }
    }

    // === Connectors ===

    /// Adds a connector to the routing table. Adding the same id twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotStarted`] on a torn-down bridge.
    pub fn connect(&self, connector: Arc<dyn Connector>) -> Result<()> {
        self.ensure_running()?;
        let id = connector.id();
        if self.inner.connectors.contains_key(&id) {
            return Ok(());
        }
        self.inner.connectors.insert(id, connector);
        tracing::debug!(bridge = %self.name(), connector = %id, "connector attached");

        for module in self.module_snapshot() {
            module.on_connect(self, id);
        }
        Ok(())
    }

    /// Removes a connector from the routing table and stops it.
    ///
    /// Events already past routing still complete. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotStarted`] on a torn-down bridge.
    pub fn disconnect(&self, id: ConnectorId) -> Result<()> {
        self.ensure_running()?;
        if let Some(connector) = self.detach(id) {
            connector.stop();
        }
        Ok(())
    }

    /// Removes `id` from the routing table without stopping it. Used by
    /// connectors tearing themselves down.
    pub(crate) fn detach(&self, id: ConnectorId) -> Option<Arc<dyn Connector>> {
        let (_, connector) = self.inner.connectors.remove(&id)?;
        tracing::debug!(bridge = %self.name(), connector = %id, "connector detached");

        for module in self.module_snapshot() {
            module.on_disconnect(self, id);
        }
        Some(connector)
    }

    /// Ids of all routed connectors, in no particular order.
    pub fn connectors(&self) -> Vec<ConnectorId> {
        self.inner.connectors.iter().map(|e| *e.key()).collect()
    }

    /// Looks up a connector by id.
    pub fn connector(&self, id: ConnectorId) -> Option<Arc<dyn Connector>> {
        self.inner.connectors.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Returns `true` if `id` is routed.
    pub fn contains(&self, id: ConnectorId) -> bool {
        self.inner.connectors.contains_key(&id)
    }

    /// Number of routed connectors.
    pub fn connector_count(&self) -> usize {
        self.inner.connectors.len()
    }

    // === Sending ===

    /// Sends `event` to every connector.
    ///
    /// With no connectors this is a silent no-op.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotStarted`] on a torn-down bridge.
    pub fn send<E: Event>(&self, event: E) -> Result<()> {
        self.send_envelope(EventEnvelope::new(event))
    }

    /// Sends an existing envelope to every connector.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotStarted`] on a torn-down bridge.
    pub fn send_envelope(&self, envelope: EventEnvelope) -> Result<()> {
        self.dispatch(envelope, None)
    }

    /// Sends `event` to one connector. Unknown ids are a silent no-op, so a
    /// reply to a participant that just left is harmless.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotStarted`] on a torn-down bridge.
    pub fn send_to<E: Event>(&self, connector: ConnectorId, event: E) -> Result<()> {
        self.dispatch(EventEnvelope::new(event), Some(connector))
    }

    fn dispatch(&self, envelope: EventEnvelope, target: Option<ConnectorId>) -> Result<()> {
        self.ensure_running()?;
        match self.module::<InvocationModule>() {
            Some(invocation) => {
                let bridge = self.clone();
                invocation
                    .provider()
                    .invoke(Box::new(move || bridge.route(envelope, target)));
            }
            None => self.route(envelope, target),
        }
        Ok(())
    }

    fn route(&self, envelope: EventEnvelope, target: Option<ConnectorId>) {
        let targets: SmallVec<[Arc<dyn Connector>; 4]> = match target {
            Some(id) => self.connector(id).into_iter().collect(),
            None => self
                .inner
                .connectors
                .iter()
                .map(|e| Arc::clone(e.value()))
                .collect(),
        };

        if targets.is_empty() {
            tracing::trace!(bridge = %self.name(), kind = envelope.kind(), "no route for event");
            return;
        }

        for connector in targets {
            if let Err(err) = connector.send(envelope.clone()) {
                // Lost a race with disconnect.
                tracing::debug!(
                    bridge = %self.name(),
                    connector = %connector.id(),
                    kind = envelope.kind(),
                    error = %err,
                    "delivery skipped"
                );
            }
        }
    }

    /// Entry point for inbound events. Connectors call this once the event
    /// has reached the receiving side; every module sees it.
    pub fn handle(&self, envelope: EventEnvelope, source: ConnectorId) {
        if !self.is_running() {
            tracing::debug!(bridge = %self.name(), kind = envelope.kind(), "bridge stopped, inbound event dropped");
            return;
        }
        tracing::trace!(bridge = %self.name(), connector = %source, kind = envelope.kind(), "inbound event");
        for module in self.module_snapshot() {
            module.handle(self, &envelope, source);
        }
    }

    // === Modules ===

    /// Attaches a module.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ModuleExists`] if a module of the same type is attached,
    /// [`BridgeError::NotStarted`] on a torn-down bridge.
    pub fn add_module<M: Module>(&self, module: M) -> Result<Arc<M>> {
        self.add_module_arc(Arc::new(module))
    }

    /// Attaches a shared module.
    ///
    /// # Errors
    ///
    /// See [`add_module`](Self::add_module).
    pub fn add_module_arc<M: Module>(&self, module: Arc<M>) -> Result<Arc<M>> {
        self.ensure_running()?;
        let name = module.name();
        {
            use dashmap::mapref::entry::Entry;
            match self.inner.modules.entry(TypeId::of::<M>()) {
                Entry::Occupied(_) => return Err(BridgeError::ModuleExists(name)),
                Entry::Vacant(slot) => {
                    slot.insert(ModuleSlot {
                        module: module.clone(),
                        any: module.clone(),
                    });
                }
            }
        }
        tracing::debug!(bridge = %self.name(), module = name, "module attached");
        module.on_attach(self);
        Ok(module)
    }

    /// Detaches the module of type `M`, if attached.
    pub fn remove_module<M: Module>(&self) -> Option<Arc<M>> {
        let (_, slot) = self.inner.modules.remove(&TypeId::of::<M>())?;
        slot.module.on_detach(self);
        tracing::debug!(bridge = %self.name(), module = slot.module.name(), "module detached");
        slot.any.downcast::<M>().ok()
    }

    /// The attached module of type `M`.
    pub fn module<M: Module>(&self) -> Option<Arc<M>> {
        let any = self
            .inner
            .modules
            .get(&TypeId::of::<M>())
            .map(|slot| Arc::clone(&slot.any))?;
        any.downcast::<M>().ok()
    }

    fn module_snapshot(&self) -> SmallVec<[Arc<dyn Module>; 4]> {
        self.inner
            .modules
            .iter()
            .map(|e| Arc::clone(&e.value().module))
            .collect()
    }

    // === Teardown ===

    /// Disconnects every connector and detaches every module. Afterwards all
    /// operations fail with [`BridgeError::NotStarted`]. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for id in self.connectors() {
            if let Some(connector) = self.detach(id) {
                connector.stop();
            }
        }
        let modules: Vec<TypeId> = self.inner.modules.iter().map(|e| *e.key()).collect();
        for key in modules {
            if let Some((_, slot)) = self.inner.modules.remove(&key) {
                slot.module.on_detach(self);
            }
        }
        tracing::debug!(bridge = %self.name(), "bridge shut down");
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.name())
            .field("running", &self.is_running())
            .field("connectors", &self.connector_count())
            .finish()
    }
}
