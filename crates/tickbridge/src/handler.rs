//! Handler module: predicate routing at the end of a channel.
//!
//! The [`HandlerModule`] owns one inbound [`Channel`]. Whatever survives the
//! channel reaches the handler table, which calls every handler whose
//! predicate accepts the event, in registration order. A failing handler is
//! logged and skipped; the rest still run.

use crate::bridge::Bridge;
use crate::channel::{Channel, Terminal};
use crate::connector::ConnectorId;
use crate::event::{Event, EventEnvelope};
use crate::identity::{Identity, IdentityService};
use crate::module::Module;
use crate::predicate::{of_type, Predicate};
use smallvec::SmallVec;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Routing facts handed to a handler along with the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Connector the event arrived on.
    pub source: ConnectorId,
    /// Identity bound to `source` when the event reached the handlers.
    pub sender: Option<Identity>,
}

/// Receives events accepted by its predicate.
pub trait Handler: Send + Sync {
    /// Handles one event. Errors are logged by the dispatcher.
    fn handle(&self, event: &EventEnvelope, delivery: &Delivery) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&EventEnvelope, &Delivery) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &EventEnvelope, delivery: &Delivery) -> anyhow::Result<()> {
        self(event, delivery)
    }
}

/// Handler for one concrete event type.
pub trait EventHandler<E: Event>: Send + Sync {
    /// Handles one event of type `E`.
    fn handle(&self, event: &E, delivery: &Delivery) -> anyhow::Result<()>;
}

struct Typed<E, H> {
    inner: H,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event, H: EventHandler<E>> Handler for Typed<E, H> {
    fn handle(&self, event: &EventEnvelope, delivery: &Delivery) -> anyhow::Result<()> {
        match event.downcast::<E>() {
            Some(typed) => self.inner.handle(typed, delivery),
            None => Ok(()),
        }
    }
}

/// Registration handle, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct Registration {
    id: HandlerId,
    predicate: Arc<dyn Predicate>,
    handler: Arc<dyn Handler>,
}

struct HandlerTable {
    entries: RwLock<Arc<Vec<Registration>>>,
    next_id: AtomicU64,
    identities: Option<IdentityService>,
    catch_panics: AtomicBool,
}

impl HandlerTable {
    fn snapshot(&self) -> Arc<Vec<Registration>> {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Terminal for HandlerTable {
    fn deliver(&self, event: EventEnvelope, source: ConnectorId) {
        let delivery = Delivery {
            source,
            sender: self
                .identities
                .as_ref()
                .and_then(|ids| ids.get_identity(source)),
        };
        let entries = self.snapshot();
        let matched: SmallVec<[&Registration; 4]> = entries
            .iter()
            .filter(|r| r.predicate.test(&event))
            .collect();

        if matched.is_empty() {
            tracing::trace!(kind = event.kind(), connector = %source, "no handler matched");
            return;
        }

        let catch_panics = self.catch_panics.load(Ordering::Relaxed);
        for registration in matched {
            let outcome = if catch_panics {
                catch_unwind(AssertUnwindSafe(|| {
                    registration.handler.handle(&event, &delivery)
                }))
            } else {
                Ok(registration.handler.handle(&event, &delivery))
            };

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(
                    handler = registration.id.0,
                    kind = event.kind(),
                    connector = %source,
                    error = %err,
                    "handler failed"
                ),
                Err(_) => tracing::error!(
                    handler = registration.id.0,
                    kind = event.kind(),
                    connector = %source,
                    "handler panicked"
                ),
            }
        }
    }
}

/// Module dispatching inbound events through a channel to handlers.
pub struct HandlerModule {
    channel: Channel,
    table: Arc<HandlerTable>,
}

impl HandlerModule {
    /// Handlers see `sender: None`.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Handlers see the sender identity resolved through `identities`.
    pub fn with_identities(identities: IdentityService) -> Self {
        Self::build(Some(identities))
    }

    fn build(identities: Option<IdentityService>) -> Self {
        Self {
            channel: Channel::new("inbound"),
            table: Arc::new(HandlerTable {
                entries: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
                identities,
                catch_panics: AtomicBool::new(true),
            }),
        }
    }

    /// The inbound channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Registers `handler` behind `predicate`.
    pub fn register<P, H>(&self, predicate: P, handler: H) -> HandlerId
    where
        P: Predicate + 'static,
        H: Handler + 'static,
    {
        let id = HandlerId(self.table.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Registration {
            id,
            predicate: Arc::new(predicate),
            handler: Arc::new(handler),
        };
        let mut guard = self
            .table
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Registration> = guard.iter().cloned().collect();
        next.push(registration);
        *guard = Arc::new(next);
        id
    }

    /// Registers a typed handler for events of type `E`.
    pub fn subscribe<E, H>(&self, handler: H) -> HandlerId
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        self.register(
            of_type::<E>(),
            Typed {
                inner: handler,
                _event: PhantomData,
            },
        )
    }

    /// Removes a registration. Returns `true` if it existed.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut guard = self
            .table
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        let next: Vec<Registration> = guard.iter().filter(|r| r.id != id).cloned().collect();
        let removed = next.len() < before;
        *guard = Arc::new(next);
        removed
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.table.snapshot().len()
    }

    /// Runs `event` through the channel and on to the handlers.
    pub fn dispatch(&self, event: EventEnvelope, source: ConnectorId) {
        let terminal: Arc<dyn Terminal> = self.table.clone();
        self.channel.dispatch(event, source, terminal);
    }
}

impl Default for HandlerModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for HandlerModule {
    fn name(&self) -> &'static str {
        "HandlerModule"
    }

    fn on_attach(&self, bridge: &Bridge) {
        self.table
            .catch_panics
            .store(bridge.config().catch_handler_panics, Ordering::Relaxed);
    }

    fn handle(&self, _bridge: &Bridge, event: &EventEnvelope, source: ConnectorId) {
        self.dispatch(event.clone(), source);
    }
}
