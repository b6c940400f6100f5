//! Tests for automatic serde serialization of events.
//!
//! Events that cross a stream connector only need
//! `#[derive(Serialize, Deserialize)]` and the `auto_serialize!()` macro.

use crate::predicate::of_type;
use crate::{
    auto_serialize, Authenticate, Bridge, BridgeError, Connector, ConnectorState, Delivery, Event,
    EventCodec, EventEnvelope, Frame, HandlerModule, Identity, StreamConnector,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

// ============================================================================
// Test Events - Using ONLY serde derives, NO manual to_json()
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatLine {
    from: Uuid,
    text: String,
}

impl Event for ChatLine {
    fn kind(&self) -> &'static str {
        "chat.line"
    }

    auto_serialize!();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tick {
    number: u64,
}

impl Event for Tick {
    fn kind(&self) -> &'static str {
        "sim.tick"
    }

    auto_serialize!();
}

/// In-process only: no JSON form.
#[derive(Debug)]
struct LocalOnly;

impl Event for LocalOnly {
    fn kind(&self) -> &'static str {
        "local.only"
    }
}

fn codec() -> EventCodec {
    EventCodec::new()
        .register::<ChatLine>("chat.line")
        .register::<Tick>("sim.tick")
        .register::<Authenticate>("identity.authenticate")
}

// ============================================================================
// Codec
// ============================================================================

#[test]
fn auto_serialize_produces_json() {
    let line = ChatLine {
        from: Uuid::nil(),
        text: "hello".into(),
    };
    let json = line.to_json().unwrap();
    assert_eq!(json["text"], "hello");
    assert!(LocalOnly.to_json().is_none());
}

#[test]
fn codec_encodes_kind_and_payload() {
    let frame = codec().encode(&EventEnvelope::new(Tick { number: 9 })).unwrap();
    assert_eq!(frame.kind, "sim.tick");
    assert_eq!(frame.payload, serde_json::json!({ "number": 9 }));
}

#[test]
fn codec_decodes_into_fresh_envelope() {
    let codec = codec();
    let original = EventEnvelope::new(ChatLine {
        from: Uuid::new_v4(),
        text: "over the wire".into(),
    });
    let decoded = codec.decode(codec.encode(&original).unwrap()).unwrap();

    assert_eq!(decoded.kind(), "chat.line");
    assert_eq!(decoded.downcast::<ChatLine>(), original.downcast::<ChatLine>());
    assert_ne!(decoded.id(), original.id());
}

#[test]
fn codec_carries_tagged_identities() {
    let codec = codec();
    let auth = Authenticate::new(Identity::ai("crawler").unwrap()).unwrap();
    let frame = codec.encode(&EventEnvelope::new(auth.clone())).unwrap();
    assert_eq!(frame.payload["identity"]["type"], "ai");

    let decoded = codec.decode(frame).unwrap();
    assert_eq!(decoded.downcast::<Authenticate>(), Some(&auth));
}

#[test]
fn codec_rejects_unregistered_and_unserializable() {
    let codec = EventCodec::new().register::<Tick>("sim.tick");

    let err = codec
        .encode(&EventEnvelope::new(ChatLine {
            from: Uuid::nil(),
            text: String::new(),
        }))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Codec(_)));

    let codec = codec.register::<Tick>("local.only");
    assert!(matches!(
        codec.encode(&EventEnvelope::new(LocalOnly)),
        Err(BridgeError::Codec(_))
    ));

    let unknown = Frame {
        kind: "nope".into(),
        payload: serde_json::Value::Null,
    };
    assert!(matches!(codec.decode(unknown), Err(BridgeError::Codec(_))));

    let malformed = Frame {
        kind: "sim.tick".into(),
        payload: serde_json::json!({ "number": "nine" }),
    };
    assert!(matches!(codec.decode(malformed), Err(BridgeError::Codec(_))));
}

#[test]
fn codec_debug_lists_kinds() {
    let debug = format!("{:?}", codec());
    assert!(debug.contains("chat.line"));
    assert!(debug.contains("sim.tick"));
}

// ============================================================================
// Stream connector
// ============================================================================

fn forward_ticks(bridge: &Bridge) -> mpsc::UnboundedReceiver<u64> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handlers = bridge.add_module(HandlerModule::new()).unwrap();
    handlers.register(of_type::<Tick>(), move |event: &EventEnvelope, _: &Delivery| -> anyhow::Result<()> {
        if let Some(tick) = event.downcast::<Tick>() {
            tx.send(tick.number)?;
        }
        Ok(())
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<u64>) -> Option<u64> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

#[test]
fn stream_pair_requires_runtime() {
    let (l, r) = (Bridge::named("l"), Bridge::named("r"));
    assert!(matches!(
        StreamConnector::pair(&l, &r, Arc::new(codec())),
        Err(BridgeError::NotStarted)
    ));
}

#[tokio::test]
async fn stream_pair_delivers_in_order_both_ways() {
    let (client, server) = (Bridge::named("client"), Bridge::named("server"));
    let mut at_server = forward_ticks(&server);
    let mut at_client = forward_ticks(&client);

    StreamConnector::pair(&client, &server, Arc::new(codec())).unwrap();

    for number in 0..5 {
        client.send(Tick { number }).unwrap();
    }
    server.send(Tick { number: 100 }).unwrap();

    for expected in 0..5 {
        assert_eq!(next(&mut at_server).await, Some(expected));
    }
    assert_eq!(next(&mut at_client).await, Some(100));
}

#[tokio::test]
async fn stream_send_rejects_unencodable_event() {
    let (client, server) = (Bridge::named("client"), Bridge::named("server"));
    let (a, _b) = StreamConnector::pair(&client, &server, Arc::new(codec())).unwrap();

    assert!(matches!(
        a.send(EventEnvelope::new(LocalOnly)),
        Err(BridgeError::Codec(_))
    ));
}

#[tokio::test]
async fn stream_stop_closes_both_sides() {
    let (client, server) = (Bridge::named("client"), Bridge::named("server"));
    let mut at_server = forward_ticks(&server);
    let (a, b) = StreamConnector::pair(&client, &server, Arc::new(codec())).unwrap();

    client.disconnect(a.id()).unwrap();

    assert_eq!(a.state(), ConnectorState::Closed);
    assert_eq!(b.state(), ConnectorState::Closed);
    assert_eq!(client.connector_count(), 0);
    assert_eq!(server.connector_count(), 0);

    // No route: silently dropped.
    client.send(Tick { number: 1 }).unwrap();
    assert_eq!(next(&mut at_server).await, None);
}
