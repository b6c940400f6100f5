//! Events and the envelope they travel in.
//!
//! An event is an immutable value. The bridge never hands out mutable access
//! to a payload: every receiver sees the same `Arc<dyn Event>`, so sender and
//! receiver copies cannot diverge.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Upcast helper so trait objects can be downcast to their concrete type.
pub trait AsAny: Any {
    /// Returns `self` as [`Any`].
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A typed, immutable message routed through a bridge.
///
/// Implement with an empty block for in-process events, or override
/// [`to_json`](Event::to_json) (see [`auto_serialize!`](crate::auto_serialize))
/// for events that must cross a stream connector.
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Chat { text: String }
///
/// impl Event for Chat {
///     auto_serialize!();
/// }
/// ```
pub trait Event: AsAny + Debug + Send + Sync {
    /// Stable name of the event kind. Defaults to the Rust type name.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// JSON form of the event for transports that need one.
    fn to_json(&self) -> Option<serde_json::Value> {
        None
    }
}

/// An event plus routing metadata.
///
/// Cloning an envelope is cheap: the payload is shared.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    id: Uuid,
    sent_at: DateTime<Utc>,
    payload: Arc<dyn Event>,
}

impl EventEnvelope {
    /// Wraps an event in a fresh envelope.
    pub fn new<E: Event>(event: E) -> Self {
        Self::from_arc(Arc::new(event))
    }

    /// Wraps an already shared event.
    pub fn from_arc(payload: Arc<dyn Event>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sent_at: Utc::now(),
            payload,
        }
    }

    /// Envelope identifier, unique per `send`.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the envelope was created.
    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Kind name of the payload.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Shared payload.
    pub fn payload(&self) -> &Arc<dyn Event> {
        &self.payload
    }

    /// Returns `true` if the payload is an `E`.
    pub fn is<E: Event>(&self) -> bool {
        (*self.payload).as_any().is::<E>()
    }

    /// Borrow the payload as `E`, if it is one.
    pub fn downcast<E: Event>(&self) -> Option<&E> {
        (*self.payload).as_any().downcast_ref::<E>()
    }

    /// Replaces the payload, keeping the envelope id and timestamp.
    ///
    /// Interceptors use this to transform an event in flight.
    #[must_use]
    pub fn with_payload<E: Event>(self, event: E) -> Self {
        Self {
            payload: Arc::new(event),
            ..self
        }
    }
}

impl<E: Event> From<E> for EventEnvelope {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}
