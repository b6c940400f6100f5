//! Channels: ordered interceptor pipelines.
//!
//! A [`Channel`] holds interceptors sorted by priority (ascending, FIFO for
//! equal priorities). Dispatch walks an immutable snapshot of the stages;
//! each interceptor returns a [`Flow`] telling the executor what to do next.
//!
//! ```text
//! event ─► [guard p=-10] ─► [redirect p=0] ═╗   (tick thread)
//!                                           ╚═► [audit p=10] ─► terminal
//! ```
//!
//! Registering or removing an interceptor swaps the snapshot, so a dispatch
//! already in flight (including one parked on a provider) finishes with the
//! chain it started with.

use crate::connector::ConnectorId;
use crate::event::EventEnvelope;
use crate::identity::IdentityService;
use crate::invocation::InvocationProvider;
use crate::predicate::Predicate;
use std::sync::{Arc, PoisonError, RwLock};

/// Result of one interceptor stage.
pub enum Flow {
    /// Pass the (possibly replaced) event to the next stage.
    Continue(EventEnvelope),
    /// Stop here. Nothing downstream sees the event.
    Halt,
    /// Run the rest of the chain inside `provider`.
    Redirect {
        /// Event handed to the next stage.
        event: EventEnvelope,
        /// Where the remaining stages run.
        provider: Arc<dyn InvocationProvider>,
    },
}

/// A guard or transform in a channel.
pub trait Interceptor: Send + Sync {
    /// Inspects `event` from `source` and decides how dispatch proceeds.
    fn intercept(&self, event: EventEnvelope, source: ConnectorId) -> Flow;
}

impl<F> Interceptor for F
where
    F: Fn(EventEnvelope, ConnectorId) -> Flow + Send + Sync,
{
    fn intercept(&self, event: EventEnvelope, source: ConnectorId) -> Flow {
        self(event, source)
    }
}

/// Final stage of a channel.
pub trait Terminal: Send + Sync {
    /// Receives every event that made it through the chain.
    fn deliver(&self, event: EventEnvelope, source: ConnectorId);
}

#[derive(Clone)]
struct Stage {
    name: String,
    priority: i32,
    interceptor: Arc<dyn Interceptor>,
}

/// Named, ordered interceptor pipeline.
pub struct Channel {
    name: String,
    stages: RwLock<Arc<Vec<Stage>>>,
}

impl Channel {
    /// Creates an empty channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts an interceptor. Lower priorities run first; equal priorities
    /// keep registration order.
    pub fn add<I>(&self, name: impl Into<String>, priority: i32, interceptor: I)
    where
        I: Interceptor + 'static,
    {
        let stage = Stage {
            name: name.into(),
            priority,
            interceptor: Arc::new(interceptor),
        };
        let mut guard = self.stages.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Stage> = guard.iter().cloned().collect();
        let pos = next
            .iter()
            .position(|s| s.priority > priority)
            .unwrap_or(next.len());
        tracing::debug!(channel = %self.name, stage = %stage.name, priority, "interceptor added");
        next.insert(pos, stage);
        *guard = Arc::new(next);
    }

    /// Removes every interceptor registered under `name`. Returns `true` if
    /// any was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut guard = self.stages.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        let next: Vec<Stage> = guard.iter().filter(|s| s.name != name).cloned().collect();
        let removed = next.len() < before;
        *guard = Arc::new(next);
        removed
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<String> {
        self.snapshot().iter().map(|s| s.name.clone()).collect()
    }

    /// Number of interceptors.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if no interceptors are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Stage>> {
        Arc::clone(&self.stages.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Runs `event` through the chain, ending in `terminal` unless a stage
    /// halts.
    pub fn dispatch(&self, event: EventEnvelope, source: ConnectorId, terminal: Arc<dyn Terminal>) {
        run(self.snapshot(), 0, event, source, terminal);
    }
}

fn run(
    stages: Arc<Vec<Stage>>,
    start: usize,
    mut event: EventEnvelope,
    source: ConnectorId,
    terminal: Arc<dyn Terminal>,
) {
    for index in start..stages.len() {
        let stage = &stages[index];
        match stage.interceptor.intercept(event, source) {
            Flow::Continue(next) => event = next,
            Flow::Halt => {
                tracing::trace!(stage = %stage.name, connector = %source, "dispatch halted");
                return;
            }
            Flow::Redirect { event: next, provider } => {
                let rest = Arc::clone(&stages);
                provider.invoke(Box::new(move || run(rest, index + 1, next, source, terminal)));
                return;
            }
        }
    }
    terminal.deliver(event, source);
}

/// Moves the rest of the chain onto a provider, typically the simulation
/// tick queue.
pub struct RedirectInterceptor {
    provider: Arc<dyn InvocationProvider>,
}

impl RedirectInterceptor {
    /// Redirects onto `provider`.
    pub fn new(provider: Arc<dyn InvocationProvider>) -> Self {
        Self { provider }
    }
}

impl Interceptor for RedirectInterceptor {
    fn intercept(&self, event: EventEnvelope, _source: ConnectorId) -> Flow {
        Flow::Redirect {
            event,
            provider: Arc::clone(&self.provider),
        }
    }
}

/// Halts events from connectors without an identity, except those the
/// `allow` predicate accepts (the authentication handshake itself).
pub struct RequireIdentity {
    identities: IdentityService,
    allow: Box<dyn Predicate>,
}

impl RequireIdentity {
    /// Guards with `identities`, letting `allow` through unauthenticated.
    pub fn new<P: Predicate + 'static>(identities: IdentityService, allow: P) -> Self {
        Self {
            identities,
            allow: Box::new(allow),
        }
    }
}

impl Interceptor for RequireIdentity {
    fn intercept(&self, event: EventEnvelope, source: ConnectorId) -> Flow {
        if self.identities.get_identity(source).is_some() || self.allow.test(&event) {
            Flow::Continue(event)
        } else {
            tracing::debug!(connector = %source, kind = event.kind(), "unauthenticated event dropped");
            Flow::Halt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::invocation::QueuedProvider;
    use crate::predicate::of_type;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Word(String);
    impl Event for Word {}

    #[derive(Default)]
    struct Sink(Mutex<Vec<String>>);
    impl Terminal for Sink {
        fn deliver(&self, event: EventEnvelope, _source: ConnectorId) {
            if let Some(Word(w)) = event.downcast::<Word>() {
                self.0.lock().unwrap().push(w.clone());
            }
        }
    }

    fn words(sink: &Sink) -> Vec<String> {
        sink.0.lock().unwrap().clone()
    }

    fn suffix(tag: &'static str) -> impl Interceptor {
        move |event: EventEnvelope, _source: ConnectorId| {
            let next = event
                .downcast::<Word>()
                .map(|Word(w)| format!("{w}{tag}"))
                .unwrap_or_default();
            Flow::Continue(event.with_payload(Word(next)))
        }
    }

    #[test]
    fn empty_channel_goes_straight_to_terminal() {
        let channel = Channel::new("inbound");
        let sink = Arc::new(Sink::default());
        channel.dispatch(EventEnvelope::new(Word("hi".into())), ConnectorId::new(), sink.clone());
        assert_eq!(words(&sink), vec!["hi"]);
    }

    #[test]
    fn priority_then_registration_order() {
        let channel = Channel::new("inbound");
        channel.add("c", 10, suffix("c"));
        channel.add("a", -5, suffix("a"));
        channel.add("b1", 0, suffix("1"));
        channel.add("b2", 0, suffix("2"));
        assert_eq!(channel.stage_names(), vec!["a", "b1", "b2", "c"]);

        let sink = Arc::new(Sink::default());
        channel.dispatch(EventEnvelope::new(Word(">".into())), ConnectorId::new(), sink.clone());
        assert_eq!(words(&sink), vec![">a12c"]);
    }

    #[test]
    fn halt_suppresses_delivery() {
        let channel = Channel::new("inbound");
        channel.add("block", 0, |_e: EventEnvelope, _s: ConnectorId| Flow::Halt);
        channel.add("never", 1, suffix("!"));

        let sink = Arc::new(Sink::default());
        channel.dispatch(EventEnvelope::new(Word("x".into())), ConnectorId::new(), sink.clone());
        assert!(words(&sink).is_empty());

        assert!(channel.remove("block"));
        assert!(!channel.remove("block"));
        channel.dispatch(EventEnvelope::new(Word("x".into())), ConnectorId::new(), sink.clone());
        assert_eq!(words(&sink), vec!["x!"]);
    }

    #[test]
    fn redirect_resumes_after_the_redirecting_stage() {
        let queue = Arc::new(QueuedProvider::new());
        let channel = Channel::new("inbound");
        channel.add("before", -1, suffix("b"));
        channel.add("hop", 0, RedirectInterceptor::new(queue.clone()));
        channel.add("after", 1, suffix("a"));

        let sink = Arc::new(Sink::default());
        channel.dispatch(EventEnvelope::new(Word("".into())), ConnectorId::new(), sink.clone());
        assert!(words(&sink).is_empty());

        // Chain changes after the hop do not affect the parked dispatch.
        channel.remove("after");
        assert_eq!(queue.drain(), 1);
        assert_eq!(words(&sink), vec!["ba"]);
    }

    #[test]
    fn require_identity_lets_handshake_through() {
        #[derive(Debug)]
        struct Hello;
        impl Event for Hello {}

        let identities = IdentityService::new();
        let channel = Channel::new("inbound");
        channel.add("auth", 0, RequireIdentity::new(identities.clone(), of_type::<Hello>()));

        struct Count(Mutex<usize>);
        impl Terminal for Count {
            fn deliver(&self, _e: EventEnvelope, _s: ConnectorId) {
                *self.0.lock().unwrap() += 1;
            }
        }
        let count = Arc::new(Count(Mutex::new(0)));
        let stranger = ConnectorId::new();

        channel.dispatch(EventEnvelope::new(Word("x".into())), stranger, count.clone());
        channel.dispatch(EventEnvelope::new(Hello), stranger, count.clone());
        assert_eq!(*count.0.lock().unwrap(), 1);

        identities
            .put_identity(stranger, crate::Identity::player("eve").unwrap())
            .unwrap();
        channel.dispatch(EventEnvelope::new(Word("x".into())), stranger, count.clone());
        assert_eq!(*count.0.lock().unwrap(), 2);
    }
}
