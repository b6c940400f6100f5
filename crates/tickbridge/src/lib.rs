//! # Tickbridge
//!
//! An event bridge connecting a tick-driven simulation server to its remote
//! participants: human clients and AI modules.
//!
//! ## Core Concepts
//!
//! - [`Event`] = an immutable message, wrapped in an [`EventEnvelope`]
//! - [`Connector`] = one peer link attached to a [`Bridge`]
//! - [`Module`] = a capability attached to a bridge (handlers, identities,
//!   deferred sending)
//! - [`InvocationProvider`] = where work runs; the only cross-thread hand-off
//!
//! The key principle: **world state is only touched on the tick thread**.
//! Events may arrive on any thread; a provider hop moves them onto the
//! simulation's queue before any handler mutates anything.
//!
//! ## Architecture
//!
//! ```text
//! Client bridge                                   Server bridge
//!     │ send()                                          ▲
//!     ▼                                                 │ handle()
//! LocalConnector / StreamConnector ───────────► paired connector
//!                                                       │
//!                                                       ▼
//!                                              HandlerModule.channel
//!                                                       │
//!                    ┌──────────────────────────────────┤
//!                    │ interceptors (priority order)    │
//!                    │   RequireIdentity ─► Halt        │
//!                    │   RedirectInterceptor ═══╗       │
//!                    └──────────────────────────╫───────┘
//!                                               ║ QueuedProvider (tick)
//!                                               ▼
//!                                   terminal: predicate fan-out
//!                                     ├─► Handler A (matches)
//!                                     └─► Handler C (matches)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Per-connector order** - events sent earlier on a connector arrive earlier
//! 2. **Disconnect is immediate** - routing stops at once; in-flight work completes
//! 3. **No route is not an error** - sending to nobody is a silent no-op
//! 4. **Handlers are isolated** - a failing handler never blocks the others
//! 5. **One identity per connector, one connector per identity**
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tickbridge::{Bridge, HandlerModule, LocalConnector, QueuedProvider, RedirectInterceptor};
//!
//! let server = Bridge::named("server");
//! let client = Bridge::named("client");
//! let tick_queue = Arc::new(QueuedProvider::new());
//!
//! let handlers = server.add_module(HandlerModule::new())?;
//! handlers.channel().add("tick", 0, RedirectInterceptor::new(tick_queue.clone()));
//! handlers.subscribe::<Chat, _>(ChatLog::default());
//!
//! LocalConnector::pair_sync(&client, &server)?;
//! client.send(Chat::new("hello"))?;
//!
//! // Once per simulation tick:
//! tick_queue.drain();
//! ```

// Core modules
mod bridge;
mod channel;
mod codec;
mod config;
mod connector;
mod error;
mod event;
mod event_macro;
mod handler;
mod identity;
mod invocation;
mod local;
mod module;
mod stream;

// Predicate combinators
pub mod predicate;


// Serde auto-serialization tests (test-only)
#[cfg(test)]
mod serde_auto_tests;

// Re-export event types
pub use event::{AsAny, Event, EventEnvelope};

// Re-export error types
pub use error::{BridgeError, Result};

// Re-export config types
pub use config::{from_json, BridgeConfig, ConfigError};

// Re-export bridge types
pub use bridge::{Bridge, WeakBridge};
pub use module::{InvocationModule, Module};

// Re-export connector types
pub use connector::{Connector, ConnectorId, ConnectorState};
pub use local::LocalConnector;
pub use stream::StreamConnector;
pub use codec::{EventCodec, Frame};

// Re-export dispatch types
pub use channel::{Channel, Flow, Interceptor, RedirectInterceptor, RequireIdentity, Terminal};
pub use handler::{Delivery, EventHandler, Handler, HandlerId, HandlerModule};
pub use predicate::{Predicate, PredicateExt};

// Re-export invocation types
pub use invocation::{InvocationProvider, QueuedProvider, Runnable, SyncProvider};

// Re-export identity types
pub use identity::{Authenticate, Authenticated, AuthenticationHandler, Identity, IdentityService};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
