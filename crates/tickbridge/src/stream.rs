//! Stream connector: a bridge link over an asynchronous transport.
//!
//! Events are encoded into [`Frame`]s, pushed through a tokio channel, and
//! decoded by a reader task on the far side, which calls
//! [`Bridge::handle`] from the runtime's worker thread. Anything that must
//! run on the simulation thread is moved there by the receiving channel (see
//! [`RedirectInterceptor`](crate::RedirectInterceptor)).
//!
//! ```text
//! Bridge A ─send─► StreamConnector a ─Frame─► reader task ─handle─► Bridge B
//! Bridge A ◄─handle─ reader task ◄─Frame─ StreamConnector b ◄─send─ Bridge B
//! ```

use crate::bridge::{Bridge, WeakBridge};
use crate::codec::{EventCodec, Frame};
use crate::connector::{Connector, ConnectorId, ConnectorState, StateCell};
use crate::error::{BridgeError, Result};
use crate::event::EventEnvelope;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// One end of a framed, asynchronous link.
pub struct StreamConnector {
    id: ConnectorId,
    bridge: WeakBridge,
    codec: Arc<EventCodec>,
    state: StateCell,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    peer: Mutex<Weak<StreamConnector>>,
}

impl StreamConnector {
    /// Links `left` and `right`, spawning one reader task per direction on
    /// the current tokio runtime. Returns `(left_side, right_side)`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotStarted`] if either bridge is torn down or no tokio
    /// runtime is running.
    pub fn pair(left: &Bridge, right: &Bridge, codec: Arc<EventCodec>) -> Result<(Arc<Self>, Arc<Self>)> {
        let runtime = Handle::try_current().map_err(|_| BridgeError::NotStarted)?;
        if !left.is_running() || !right.is_running() {
            return Err(BridgeError::NotStarted);
        }

        let (to_right, from_left) = mpsc::unbounded_channel();
        let (to_left, from_right) = mpsc::unbounded_channel();

        let a = Self::half(left, Arc::clone(&codec), to_right);
        let b = Self::half(right, Arc::clone(&codec), to_left);
        *lock(&a.peer) = Arc::downgrade(&b);
        *lock(&b.peer) = Arc::downgrade(&a);

        runtime.spawn(read_frames(from_right, left.downgrade(), a.id, Arc::clone(&codec)));
        runtime.spawn(read_frames(from_left, right.downgrade(), b.id, codec));

        a.state.set(ConnectorState::Active);
        b.state.set(ConnectorState::Active);
        let attached = left
            .connect(a.clone())
            .and_then(|()| right.connect(b.clone()));
        if let Err(err) = attached {
            a.stop();
            return Err(err);
        }

        tracing::debug!(
            left = %left.name(),
            right = %right.name(),
            connector = %a.id,
            peer = %b.id,
            "stream connector pair started"
        );
        Ok((a, b))
    }

    fn half(bridge: &Bridge, codec: Arc<EventCodec>, outbound: mpsc::UnboundedSender<Frame>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectorId::new(),
            bridge: bridge.downgrade(),
            codec,
            state: StateCell::new(ConnectorState::Connecting),
            outbound: Mutex::new(Some(outbound)),
            peer: Mutex::new(Weak::new()),
        })
    }
}

async fn read_frames(
    mut inbound: mpsc::UnboundedReceiver<Frame>,
    bridge: WeakBridge,
    source: ConnectorId,
    codec: Arc<EventCodec>,
) {
    while let Some(frame) = inbound.recv().await {
        let kind = frame.kind.clone();
        match codec.decode(frame) {
            Ok(envelope) => match bridge.upgrade() {
                Some(bridge) => bridge.handle(envelope, source),
                None => break,
            },
            Err(err) => {
                tracing::warn!(connector = %source, %kind, error = %err, "undecodable frame dropped");
            }
        }
    }
    tracing::debug!(connector = %source, "stream reader finished");
}

impl Connector for StreamConnector {
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
        let frame = self.codec.encode(&event).inspect_err(|err| {
            tracing::warn!(connector = %self.id, kind = event.kind(), error = %err, "event not encodable");
        })?;

        let outbound = lock(&self.outbound);
        let tx = outbound
            .as_ref()
            .ok_or(BridgeError::ConnectorClosed(self.id))?;
        tx.send(frame)
            .map_err(|_| BridgeError::ConnectorClosed(self.id))
    }

    fn stop(&self) {
        if !self.state.close() {
            return;
        }
        // Dropping the sender lets the peer's reader drain and finish.
        lock(&self.outbound).take();
        let peer = std::mem::take(&mut *lock(&self.peer));
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.detach(self.id);
        }
        if let Some(peer) = peer.upgrade() {
            peer.stop();
        }
        tracing::debug!(connector = %self.id, "stream connector stopped");
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
