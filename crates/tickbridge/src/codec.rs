//! JSON framing for events that leave the process.
//!
//! The [`EventCodec`] is an explicit registry from kind name to decoder.
//! Nothing is discovered at runtime: a transport can only decode the kinds
//! registered with it.

use crate::error::{BridgeError, Result};
use crate::event::{Event, EventEnvelope};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One encoded event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event kind, as returned by [`Event::kind`].
    pub kind: String,
    /// JSON body.
    pub payload: serde_json::Value,
}

type Decoder = Box<dyn Fn(serde_json::Value) -> Result<Arc<dyn Event>> + Send + Sync>;

/// Registry of decodable event kinds.
#[derive(Default)]
pub struct EventCodec {
    decoders: HashMap<&'static str, Decoder>,
}

impl EventCodec {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` under `kind`, which must equal what `E::kind()`
    /// returns.
    pub fn register<E>(mut self, kind: &'static str) -> Self
    where
        E: Event + DeserializeOwned,
    {
        self.decoders.insert(
            kind,
            Box::new(move |value| {
                let event: E = serde_json::from_value(value)
                    .map_err(|e| BridgeError::Codec(format!("{kind}: {e}")))?;
                Ok(Arc::new(event) as Arc<dyn Event>)
            }),
        );
        self
    }

    /// Returns `true` if `kind` can be decoded.
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Encodes an envelope.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Codec`] if the kind is unregistered or the event has no
    /// JSON form.
    pub fn encode(&self, envelope: &EventEnvelope) -> Result<Frame> {
        let kind = envelope.kind();
        if !self.contains(kind) {
            return Err(BridgeError::Codec(format!("unregistered kind `{kind}`")));
        }
        let payload = envelope
            .payload()
            .to_json()
            .ok_or_else(|| BridgeError::Codec(format!("`{kind}` has no JSON form")))?;
        Ok(Frame {
            kind: kind.to_string(),
            payload,
        })
    }

    /// Decodes a frame into a fresh envelope.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Codec`] for unknown kinds or malformed payloads.
    pub fn decode(&self, frame: Frame) -> Result<EventEnvelope> {
        let decoder = self
            .decoders
            .get(frame.kind.as_str())
            .ok_or_else(|| BridgeError::Codec(format!("unregistered kind `{}`", frame.kind)))?;
        decoder(frame.payload).map(EventEnvelope::from_arc)
    }
}

impl fmt::Debug for EventCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.decoders.keys().collect();
        kinds.sort();
        f.debug_struct("EventCodec").field("kinds", &kinds).finish()
    }
}
