//! Event predicates.
//!
//! A predicate is a pure test over an [`EventEnvelope`]. Handlers register
//! behind a predicate; the terminal stage of a channel only invokes the
//! handlers whose predicate accepts the event.

use crate::event::{Event, EventEnvelope};
use std::marker::PhantomData;

/// Pure boolean test over an event. Holds no persistent state.
pub trait Predicate: Send + Sync {
    /// Returns `true` if the event should be delivered.
    fn test(&self, event: &EventEnvelope) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&EventEnvelope) -> bool + Send + Sync,
{
    fn test(&self, event: &EventEnvelope) -> bool {
        self(event)
    }
}

/// Accepts every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyEvent;

impl Predicate for AnyEvent {
    fn test(&self, _event: &EventEnvelope) -> bool {
        true
    }
}

/// Accepts events whose payload is an `E`.
pub struct OfType<E>(PhantomData<fn() -> E>);

impl<E: Event> Predicate for OfType<E> {
    fn test(&self, event: &EventEnvelope) -> bool {
        event.is::<E>()
    }
}

/// Accepts events with the given kind name.
#[derive(Debug, Clone)]
pub struct OfKind(pub &'static str);

impl Predicate for OfKind {
    fn test(&self, event: &EventEnvelope) -> bool {
        event.kind() == self.0
    }
}

/// Both predicates must accept.
pub struct And<A, B>(A, B);

impl<A: Predicate, B: Predicate> Predicate for And<A, B> {
    fn test(&self, event: &EventEnvelope) -> bool {
        self.0.test(event) && self.1.test(event)
    }
}

/// Either predicate must accept.
pub struct Or<A, B>(A, B);

impl<A: Predicate, B: Predicate> Predicate for Or<A, B> {
    fn test(&self, event: &EventEnvelope) -> bool {
        self.0.test(event) || self.1.test(event)
    }
}

/// Inverts a predicate.
pub struct Not<A>(A);

impl<A: Predicate> Predicate for Not<A> {
    fn test(&self, event: &EventEnvelope) -> bool {
        !self.0.test(event)
    }
}

/// Combinators available on every sized predicate.
pub trait PredicateExt: Predicate + Sized {
    /// Accept only if `self` and `other` accept.
    fn and<B: Predicate>(self, other: B) -> And<Self, B> {
        And(self, other)
    }

    /// Accept if `self` or `other` accepts.
    fn or<B: Predicate>(self, other: B) -> Or<Self, B> {
        Or(self, other)
    }

    /// Accept what `self` rejects.
    fn not(self) -> Not<Self> {
        Not(self)
    }
}

impl<P: Predicate> PredicateExt for P {}

/// Predicate matching payloads of type `E`.
pub fn of_type<E: Event>() -> OfType<E> {
    OfType(PhantomData)
}

/// Predicate matching a kind name.
pub fn of_kind(kind: &'static str) -> OfKind {
    OfKind(kind)
}

/// Predicate matching everything.
pub fn any_event() -> AnyEvent {
    AnyEvent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Move(i32);
    impl Event for Move {}

    #[derive(Debug)]
    struct Quit;
    impl Event for Quit {
        fn kind(&self) -> &'static str {
            "quit"
        }
    }

    #[test]
    fn type_and_kind() {
        let mv = EventEnvelope::new(Move(1));
        let quit = EventEnvelope::new(Quit);

        assert!(of_type::<Move>().test(&mv));
        assert!(!of_type::<Move>().test(&quit));
        assert!(of_kind("quit").test(&quit));
        assert!(any_event().test(&mv));
    }

    #[test]
    fn composition() {
        let positive = |e: &EventEnvelope| e.downcast::<Move>().is_some_and(|m| m.0 > 0);
        let p = of_type::<Move>().and(positive);

        assert!(p.test(&EventEnvelope::new(Move(3))));
        assert!(!p.test(&EventEnvelope::new(Move(-3))));
        assert!(!p.test(&EventEnvelope::new(Quit)));

        let either = of_type::<Quit>().or(of_type::<Move>());
        assert!(either.test(&EventEnvelope::new(Quit)));

        let not_quit = of_type::<Quit>().not();
        assert!(not_quit.test(&EventEnvelope::new(Move(0))));
        assert!(!not_quit.test(&EventEnvelope::new(Quit)));
    }
}
