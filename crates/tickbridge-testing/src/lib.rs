//! Testing utilities for tickbridge.
//!
//! - [`Recorder`]: an [`EventHandler`] that keeps every event it sees
//! - [`paired_bridges`]: a client and a server bridge joined by a local pair
//! - [`MemoryFileSystem`]: a [`FileSystem`] backed by a map
//!
//! ```ignore
//! let pair = paired_bridges()?;
//! let handlers = pair.server.add_module(HandlerModule::new())?;
//! let chats = Recorder::<Chat>::new();
//! handlers.subscribe::<Chat, _>(chats.clone());
//!
//! pair.client.send(Chat::new("hi"))?;
//! assert_eq!(chats.len(), 1);
//! ```

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tickbridge::{
    Bridge, Delivery, Event, EventHandler, InvocationProvider, LocalConnector, Result, SyncProvider,
};
use tickbridge_process::{FileSystem, ProgramImage};

/// Records every `E` it handles, with its delivery.
///
/// Clones share the recording.
pub struct Recorder<E> {
    seen: Arc<Mutex<Vec<(E, Delivery)>>>,
}

impl<E: Event + Clone> Recorder<E> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(E, Delivery)>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<E> {
        self.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    /// Recorded deliveries, oldest first.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.lock().iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn last(&self) -> Option<E> {
        self.lock().last().map(|(e, _)| e.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<E> Clone for Recorder<E> {
    fn clone(&self) -> Self {
        Self {
            seen: Arc::clone(&self.seen),
        }
    }
}

impl<E: Event + Clone> Default for Recorder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event + Clone> EventHandler<E> for Recorder<E> {
    fn handle(&self, event: &E, delivery: &Delivery) -> anyhow::Result<()> {
        self.lock().push((event.clone(), delivery.clone()));
        Ok(())
    }
}

/// A client bridge and a server bridge joined by a local connector pair.
pub struct Pair {
    pub client: Bridge,
    pub server: Bridge,
    /// Connector on the client bridge.
    pub client_side: Arc<LocalConnector>,
    /// Connector on the server bridge; the source id server handlers see.
    pub server_side: Arc<LocalConnector>,
}

/// Pairs two fresh bridges with inline delivery both ways.
///
/// # Errors
///
/// Only if a bridge is torn down, which fresh bridges never are.
pub fn paired_bridges() -> Result<Pair> {
    paired_bridges_with(Arc::new(SyncProvider))
}

/// Pairs two fresh bridges; server-side deliveries run on `server_provider`.
///
/// # Errors
///
/// See [`paired_bridges`].
pub fn paired_bridges_with(server_provider: Arc<dyn InvocationProvider>) -> Result<Pair> {
    let client = Bridge::named("client");
    let server = Bridge::named("server");
    let (client_side, server_side) =
        LocalConnector::pair(&client, &server, Arc::new(SyncProvider), server_provider)?;
    Ok(Pair {
        client,
        server,
        client_side,
        server_side,
    })
}

/// In-memory [`FileSystem`].
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: DashMap<String, ProgramImage>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a program at `path` run by the `executor` factory.
    #[must_use]
    pub fn with_program(self, path: &str, executor: &str) -> Self {
        self.insert(ProgramImage::new(path, executor));
        self
    }

    /// Stores `image` under its own path.
    pub fn insert(&self, image: ProgramImage) {
        self.files.insert(image.path.clone(), image);
    }

    pub fn remove(&self, path: &str) -> Option<ProgramImage> {
        self.files.remove(path).map(|(_, image)| image)
    }
}

impl FileSystem for MemoryFileSystem {
    fn resolve(&self, path: &str) -> Option<ProgramImage> {
        self.files.get(path).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickbridge::{Connector, HandlerModule, QueuedProvider};

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u8);
    impl Event for Ping {}

    #[test]
    fn recorder_captures_events_through_a_pair() {
        let pair = paired_bridges().unwrap();
        let handlers = pair.server.add_module(HandlerModule::new()).unwrap();
        let pings = Recorder::<Ping>::new();
        handlers.subscribe::<Ping, _>(pings.clone());

        pair.client.send(Ping(1)).unwrap();
        pair.client.send(Ping(2)).unwrap();

        assert_eq!(pings.events(), vec![Ping(1), Ping(2)]);
        assert_eq!(pings.deliveries()[0].source, pair.server_side.id());
        pings.clear();
        assert!(pings.is_empty());
    }

    #[test]
    fn queued_server_side_waits_for_drain() {
        let queue = Arc::new(QueuedProvider::new());
        let pair = paired_bridges_with(queue.clone()).unwrap();
        let handlers = pair.server.add_module(HandlerModule::new()).unwrap();
        let pings = Recorder::<Ping>::new();
        handlers.subscribe::<Ping, _>(pings.clone());

        pair.client.send(Ping(7)).unwrap();
        assert!(pings.is_empty());
        queue.drain();
        assert_eq!(pings.last(), Some(Ping(7)));
    }

    #[test]
    fn memory_file_system_resolves_inserted_programs() {
        let fs = MemoryFileSystem::new().with_program("/bin/idle", "idle");
        assert_eq!(fs.resolve("/bin/idle").map(|p| p.executor), Some("idle".to_string()));
        assert!(fs.resolve("/bin/none").is_none());
        assert!(fs.remove("/bin/idle").is_some());
        assert!(fs.resolve("/bin/idle").is_none());
    }
}
