//! Local connector: two bridges in the same process.
//!
//! Each side holds the provider of the thread that must run its deliveries.
//! `send` on one side schedules `bridge.handle(event, peer_id)` on the other
//! side's provider, which is what keeps world mutation on the tick thread
//! even when events originate from UI or I/O threads.

use crate::bridge::{Bridge, WeakBridge};
use crate::connector::{Connector, ConnectorId, ConnectorState, StateCell};
use crate::error::{BridgeError, Result};
use crate::event::EventEnvelope;
use crate::invocation::{InvocationProvider, SyncProvider};
use std::sync::{Arc, Mutex, PoisonError};

/// One half of an in-process connector pair.
pub struct LocalConnector {
    id: ConnectorId,
    bridge: WeakBridge,
    provider: Arc<dyn InvocationProvider>,
    state: StateCell,
    peer: Mutex<Option<Arc<LocalConnector>>>,
}

impl std::fmt::Debug for LocalConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalConnector")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl LocalConnector {
    /// Creates an unlinked connector for `bridge`. Inbound deliveries run on
    /// `provider`.
    pub fn new(bridge: &Bridge, provider: Arc<dyn InvocationProvider>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectorId::new(),
            bridge: bridge.downgrade(),
            provider,
            state: StateCell::new(ConnectorState::Connecting),
            peer: Mutex::new(None),
        })
    }

    /// Creates an unlinked connector that delivers inline.
    pub fn synchronous(bridge: &Bridge) -> Arc<Self> {
        Self::new(bridge, Arc::new(SyncProvider))
    }

    /// Connects `left` and `right` with a fresh pair. Returns
    /// `(left_side, right_side)`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotStarted`] if either bridge is torn down.
    pub fn pair(
        left: &Bridge,
        right: &Bridge,
        left_provider: Arc<dyn InvocationProvider>,
        right_provider: Arc<dyn InvocationProvider>,
    ) -> Result<(Arc<Self>, Arc<Self>)> {
        let local = Self::new(left, left_provider);
        let remote = local.start(right, right_provider)?;
        Ok((local, remote))
    }

    /// Connects two bridges with inline delivery on both sides.
    ///
    /// # Errors
    ///
    /// See [`pair`](Self::pair).
    pub fn pair_sync(left: &Bridge, right: &Bridge) -> Result<(Arc<Self>, Arc<Self>)> {
        Self::pair(left, right, Arc::new(SyncProvider), Arc::new(SyncProvider))
    }

    /// Creates the reverse connector on `remote`, links both halves and
    /// attaches each to its bridge. Returns the reverse half.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConnectorClosed`] if this connector was stopped,
    /// [`BridgeError::NotStarted`] if either bridge is torn down.
    pub fn start(
        self: &Arc<Self>,
        remote: &Bridge,
        remote_provider: Arc<dyn InvocationProvider>,
    ) -> Result<Arc<Self>> {
        match self.state.get() {
            ConnectorState::Closed => return Err(BridgeError::ConnectorClosed(self.id)),
            ConnectorState::Active => {
                if let Some(peer) = self.peer() {
                    return Ok(peer);
                }
            }
            ConnectorState::Connecting => {}
        }

        let local = self.bridge.upgrade().ok_or(BridgeError::NotStarted)?;
        if !local.is_running() || !remote.is_running() {
            return Err(BridgeError::NotStarted);
        }

        let reverse = Self::new(remote, remote_provider);
        *lock(&reverse.peer) = Some(Arc::clone(self));
        *lock(&self.peer) = Some(Arc::clone(&reverse));
        self.state.set(ConnectorState::Active);
        reverse.state.set(ConnectorState::Active);

        let attached = local
            .connect(self.clone())
            .and_then(|()| remote.connect(reverse.clone()));
        if let Err(err) = attached {
            self.stop();
            return Err(err);
        }

        tracing::debug!(
            local = %local.name(),
            remote = %remote.name(),
            connector = %self.id,
            peer = %reverse.id,
            "local connector pair started"
        );
        Ok(reverse)
    }

    /// The paired reverse connector while linked.
    pub fn peer(&self) -> Option<Arc<LocalConnector>> {
        lock(&self.peer).clone()
    }

    /// Schedules delivery of an event sent by the peer.
    fn receive(&self, event: EventEnvelope) {
        let bridge = self.bridge.clone();
        let source = self.id;
        self.provider.invoke(Box::new(move || {
            if let Some(bridge) = bridge.upgrade() {
                bridge.handle(event, source);
            }
        }));
    }
}

impl Connector for LocalConnector {
    fn id(&self) -> ConnectorId {
        self.id
    }

    fn state(&self) -> ConnectorState {
        self.state.get()
    }

    fn send(&self, event: EventEnvelope) -> Result<()> {
        match self.state.get() {
            ConnectorState::Closed => return Err(BridgeError::ConnectorClosed(self.id)),
            ConnectorState::Connecting => return Err(BridgeError::NotStarted),
            ConnectorState::Active => {}
        }
        let peer = self.peer().ok_or(BridgeError::ConnectorClosed(self.id))?;
        peer.receive(event);
        Ok(())
    }

    fn stop(&self) {
        if !self.state.close() {
            return;
        }
        let peer = lock(&self.peer).take();
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.detach(self.id);
        }
        if let Some(peer) = peer {
            peer.stop();
        }
        tracing::debug!(connector = %self.id, "local connector stopped");
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::invocation::QueuedProvider;
    use crate::module::Module;

    #[derive(Debug)]
    struct Tick(u32);
    impl Event for Tick {}

    /// Module that records inbound ticks and their source.
    #[derive(Default)]
    struct Inbox(Mutex<Vec<(u32, ConnectorId)>>);
    impl Module for Inbox {
        fn handle(&self, _bridge: &Bridge, event: &EventEnvelope, source: ConnectorId) {
            if let Some(Tick(n)) = event.downcast::<Tick>() {
                self.0.lock().unwrap().push((*n, source));
            }
        }
    }

    #[test]
    fn pair_is_bidirectional() {
        let left = Bridge::named("left");
        let right = Bridge::named("right");
        let left_inbox = left.add_module(Inbox::default()).unwrap();
        let right_inbox = right.add_module(Inbox::default()).unwrap();

        let (l, r) = LocalConnector::pair_sync(&left, &right).unwrap();
        assert_eq!(l.state(), ConnectorState::Active);
        assert!(left.contains(l.id()));
        assert!(right.contains(r.id()));

        left.send(Tick(1)).unwrap();
        right.send(Tick(2)).unwrap();

        assert_eq!(*right_inbox.0.lock().unwrap(), vec![(1, r.id())]);
        assert_eq!(*left_inbox.0.lock().unwrap(), vec![(2, l.id())]);
    }

    #[test]
    fn queued_side_waits_for_drain() {
        let client = Bridge::named("client");
        let server = Bridge::named("server");
        let inbox = server.add_module(Inbox::default()).unwrap();
        let tick_queue = Arc::new(QueuedProvider::new());

        LocalConnector::pair(&client, &server, Arc::new(SyncProvider), tick_queue.clone())
            .unwrap();

        client.send(Tick(1)).unwrap();
        client.send(Tick(2)).unwrap();
        assert!(inbox.0.lock().unwrap().is_empty());

        tick_queue.drain();
        let got: Vec<u32> = inbox.0.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn stop_unlinks_both_sides() {
        let left = Bridge::new();
        let right = Bridge::new();
        let (l, r) = LocalConnector::pair_sync(&left, &right).unwrap();

        r.stop();
        assert_eq!(l.state(), ConnectorState::Closed);
        assert_eq!(r.state(), ConnectorState::Closed);
        assert!(l.peer().is_none() && r.peer().is_none());
        assert_eq!(left.connector_count(), 0);
        assert_eq!(right.connector_count(), 0);

        assert_eq!(
            l.send(EventEnvelope::new(Tick(9))),
            Err(BridgeError::ConnectorClosed(l.id()))
        );
        assert!(left.send(Tick(9)).is_ok());
    }

    #[test]
    fn unstarted_connector_rejects_send() {
        let bridge = Bridge::new();
        let c = LocalConnector::synchronous(&bridge);
        assert_eq!(
            c.send(EventEnvelope::new(Tick(0))),
            Err(BridgeError::NotStarted)
        );
    }

    #[test]
    fn start_on_torn_down_bridge_fails() {
        let left = Bridge::new();
        let right = Bridge::new();
        right.shutdown();
        let err = LocalConnector::pair_sync(&left, &right).unwrap_err();
        assert_eq!(err, BridgeError::NotStarted);
        assert_eq!(left.connector_count(), 0);
    }

    #[test]
    fn queued_delivery_survives_disconnect() {
        let client = Bridge::new();
        let server = Bridge::new();
        let inbox = server.add_module(Inbox::default()).unwrap();
        let queue = Arc::new(QueuedProvider::new());
        let (c, _) =
            LocalConnector::pair(&client, &server, Arc::new(SyncProvider), queue.clone()).unwrap();

        client.send(Tick(5)).unwrap();
        client.disconnect(c.id()).unwrap();
        assert_eq!(server.connector_count(), 0);

        queue.drain();
        assert_eq!(inbox.0.lock().unwrap().len(), 1);
    }
}
