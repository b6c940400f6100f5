//! Process commands and the handlers that apply them to the world.
//!
//! Both handlers expect to run on the simulation thread, i.e. behind a
//! [`RedirectInterceptor`](tickbridge::RedirectInterceptor) onto the tick
//! queue. They look the sender up fresh on every command: ownership is a
//! recorded [`Identity`] value, never a connector.

use crate::process::{InterruptOutcome, Pid};
use crate::program::{FileSystem, ProgramRegistry};
use crate::world::WorldHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tickbridge::{
    auto_serialize, Bridge, BridgeError, Delivery, Event, EventCodec, EventHandler, HandlerId,
    HandlerModule, Identity, WeakBridge,
};

/// Asks the server to interrupt one of the sender's processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptProcess {
    /// Target process on the sender's active computer.
    pub pid: Pid,
    /// Also interrupt every descendant.
    pub recursive: bool,
}

impl InterruptProcess {
    pub fn new(pid: Pid, recursive: bool) -> Self {
        Self { pid, recursive }
    }
}

impl Event for InterruptProcess {
    fn kind(&self) -> &'static str {
        "process.interrupt"
    }

    auto_serialize!();
}

/// Asks the server to launch a program beneath the sender's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchProgram {
    path: String,
}

impl LaunchProgram {
    /// # Errors
    ///
    /// [`BridgeError::Validation`] if `path` is blank.
    pub fn new(path: impl Into<String>) -> Result<Self, BridgeError> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(BridgeError::validation("program path is blank"));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Event for LaunchProgram {
    fn kind(&self) -> &'static str {
        "process.launch"
    }

    auto_serialize!();
}

/// Sent back to the launching participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLaunched {
    pub pid: Pid,
    pub path: String,
}

impl Event for ProcessLaunched {
    fn kind(&self) -> &'static str {
        "process.launched"
    }

    auto_serialize!();
}

fn sender<'a>(delivery: &'a Delivery, command: &str) -> Option<&'a Identity> {
    let sender = delivery.sender.as_ref();
    if sender.is_none() {
        tracing::warn!(connector = %delivery.source, command, "command from unauthenticated connector ignored");
    }
    sender
}

/// Applies [`InterruptProcess`] with the ownership check.
#[derive(Debug, Clone)]
pub struct InterruptHandler {
    world: WorldHandle,
}

impl InterruptHandler {
    pub fn new(world: WorldHandle) -> Self {
        Self { world }
    }
}

impl EventHandler<InterruptProcess> for InterruptHandler {
    fn handle(&self, event: &InterruptProcess, delivery: &Delivery) -> anyhow::Result<()> {
        let Some(requester) = sender(delivery, "interrupt") else {
            return Ok(());
        };
        let outcome = self
            .world
            .with(|w| w.interrupt_as(requester, event.pid, event.recursive));

        match outcome {
            InterruptOutcome::Applied(changed) => {
                tracing::info!(%requester, pid = %event.pid, recursive = event.recursive, ?changed, "interrupt applied");
            }
            InterruptOutcome::Denied => {
                tracing::warn!(%requester, pid = %event.pid, "interrupt denied");
            }
            InterruptOutcome::NotFound => {
                tracing::warn!(%requester, pid = %event.pid, "interrupt for unknown process");
            }
        }
        Ok(())
    }
}

/// Launches programs for authenticated participants and replies with
/// [`ProcessLaunched`].
pub struct LaunchHandler {
    world: WorldHandle,
    files: Arc<dyn FileSystem>,
    programs: Arc<ProgramRegistry>,
    bridge: WeakBridge,
}

impl LaunchHandler {
    /// Handler replying through `bridge`.
    pub fn new(
        world: WorldHandle,
        files: Arc<dyn FileSystem>,
        programs: Arc<ProgramRegistry>,
        bridge: &Bridge,
    ) -> Self {
        Self {
            world,
            files,
            programs,
            bridge: bridge.downgrade(),
        }
    }
}

impl EventHandler<LaunchProgram> for LaunchHandler {
    fn handle(&self, event: &LaunchProgram, delivery: &Delivery) -> anyhow::Result<()> {
        let Some(owner) = sender(delivery, "launch") else {
            return Ok(());
        };
        let Some(image) = self.files.resolve(&event.path) else {
            tracing::debug!(%owner, path = %event.path, "no program at path");
            return Ok(());
        };
        let Some(executor) = self.programs.instantiate(&image) else {
            tracing::debug!(%owner, path = %event.path, executor = %image.executor, "no executor registered");
            return Ok(());
        };

        let launched = self.world.with(|w| {
            let (computer, session) = w.session(owner)?;
            Some(w.spawn_child(computer, session, Some(owner.clone()), Some(image), Some(executor)))
        });
        let pid = match launched {
            Some(result) => result?,
            None => {
                tracing::warn!(%owner, path = %event.path, "launch from participant without a session");
                return Ok(());
            }
        };
        tracing::info!(%owner, %pid, path = %event.path, "program launched");

        if let Some(bridge) = self.bridge.upgrade() {
            bridge.send_to(
                delivery.source,
                ProcessLaunched {
                    pid,
                    path: event.path.clone(),
                },
            )?;
        }
        Ok(())
    }
}

/// Adds the process command and response kinds to `codec`.
pub fn register_events(codec: EventCodec) -> EventCodec {
    codec
        .register::<InterruptProcess>("process.interrupt")
        .register::<LaunchProgram>("process.launch")
        .register::<ProcessLaunched>("process.launched")
}

/// Subscribes both command handlers on `handlers`.
pub fn install(
    handlers: &HandlerModule,
    world: WorldHandle,
    files: Arc<dyn FileSystem>,
    programs: Arc<ProgramRegistry>,
    bridge: &Bridge,
) -> (HandlerId, HandlerId) {
    let interrupt = handlers.subscribe::<InterruptProcess, _>(InterruptHandler::new(world.clone()));
    let launch = handlers.subscribe::<LaunchProgram, _>(LaunchHandler::new(world, files, programs, bridge));
    (interrupt, launch)
}
