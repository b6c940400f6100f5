//! # Local Session Demo
//!
//! A client bridge and a server bridge in one process. The client
//! authenticates, launches two programs and interrupts one of them while
//! the simulation ticks on its own task.
//!
//! ```text
//! RUST_LOG=debug cargo run -p local-session-demo [-- config.json]
//! ```

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tickbridge::predicate::of_type;
use tickbridge::{
    Authenticate, Authenticated, AuthenticationHandler, Bridge, Delivery, EventEnvelope,
    EventHandler, HandlerModule, Identity, IdentityService, LocalConnector, RedirectInterceptor,
    RequireIdentity,
};
use tickbridge_process::{
    install, ComputerId, Executor, FileSystem, InterruptProcess, LaunchProgram, Pid,
    ProcessLaunched, ProgramImage, ProgramRegistry, Simulation, SimulationConfig, Step,
    TickContext, WorldHandle,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Programs
// ============================================================================

/// Stops by itself after a number of ticks.
struct Countdown {
    remaining: u32,
}

impl Executor for Countdown {
    fn update(&mut self, ctx: &TickContext) -> Step {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            tracing::info!(pid = %ctx.pid, tick = ctx.tick, "countdown finished");
            Step::Stop
        } else {
            Step::Continue
        }
    }
}

/// Runs until interrupted.
struct Daemon;

impl Executor for Daemon {
    fn update(&mut self, _ctx: &TickContext) -> Step {
        Step::Continue
    }

    fn on_interrupt(&mut self, ctx: &TickContext) {
        tracing::info!(pid = %ctx.pid, tick = ctx.tick, "daemon shutting down");
    }
}

/// A fixed set of files.
struct Disk(HashMap<String, ProgramImage>);

impl Disk {
    fn new(images: impl IntoIterator<Item = ProgramImage>) -> Self {
        Self(images.into_iter().map(|i| (i.path.clone(), i)).collect())
    }
}

impl FileSystem for Disk {
    fn resolve(&self, path: &str) -> Option<ProgramImage> {
        self.0.get(path).cloned()
    }
}

fn programs() -> ProgramRegistry {
    ProgramRegistry::new()
        .register("countdown", |image: &ProgramImage| Countdown {
            remaining: image
                .args
                .first()
                .and_then(|a| a.parse().ok())
                .unwrap_or(10),
        })
        .register("daemon", |_: &ProgramImage| Daemon)
}

// ============================================================================
// Server wiring
// ============================================================================

/// Starts the session of whoever just authenticated.
struct Login {
    world: WorldHandle,
    computer: ComputerId,
}

impl EventHandler<Authenticate> for Login {
    fn handle(&self, event: &Authenticate, _delivery: &Delivery) -> anyhow::Result<()> {
        self.world
            .with(|w| w.login(event.identity(), self.computer))?;
        Ok(())
    }
}

fn server(sim: &Simulation, home: ComputerId) -> Result<Bridge> {
    let bridge = Bridge::named("server");
    let identities = bridge.add_module(IdentityService::new())?;
    let handlers = bridge.add_module(HandlerModule::with_identities((*identities).clone()))?;

    handlers.channel().add(
        "require-identity",
        -10,
        RequireIdentity::new((*identities).clone(), of_type::<Authenticate>()),
    );
    handlers
        .channel()
        .add("tick", 0, RedirectInterceptor::new(sim.tick_queue()));

    handlers.subscribe::<Authenticate, _>(AuthenticationHandler::new((*identities).clone(), &bridge));
    handlers.subscribe::<Authenticate, _>(Login {
        world: sim.world().clone(),
        computer: home,
    });

    let disk = Disk::new([
        ProgramImage::new("/bin/countdown", "countdown").with_args(["5"]),
        ProgramImage::new("/bin/daemon", "daemon"),
    ]);
    install(
        &handlers,
        sim.world().clone(),
        Arc::new(disk),
        Arc::new(programs()),
        &bridge,
    );
    Ok(bridge)
}

// ============================================================================
// Main
// ============================================================================

fn load_config() -> Result<SimulationConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(SimulationConfig::from_json(&json)?)
        }
        None => Ok(SimulationConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let world = WorldHandle::new(config.build_world());
    let home = world.with(|w| w.add_computer("home"));
    let sim = Simulation::new(config, world.clone());
    let server = server(&sim, home)?;

    // Client side: report launches back to the driving task.
    let client = Bridge::named("client");
    let client_handlers = client.add_module(HandlerModule::new())?;
    let (launched_tx, mut launched) = mpsc::unbounded_channel::<ProcessLaunched>();
    client_handlers.register(of_type::<ProcessLaunched>(), move |event: &EventEnvelope, _: &Delivery| -> anyhow::Result<()> {
        if let Some(launch) = event.downcast::<ProcessLaunched>() {
            tracing::info!(pid = %launch.pid, path = %launch.path, "client saw launch");
            launched_tx.send(launch.clone())?;
        }
        Ok(())
    });
    let (authed_tx, mut authed) = mpsc::unbounded_channel::<Identity>();
    client_handlers.register(of_type::<Authenticated>(), move |event: &EventEnvelope, _: &Delivery| -> anyhow::Result<()> {
        if let Some(ok) = event.downcast::<Authenticated>() {
            authed_tx.send(ok.identity.clone())?;
        }
        Ok(())
    });
    LocalConnector::pair_sync(&client, &server)?;

    let driver = tokio::spawn(async move {
        let me = Identity::player("demo")?;
        client.send(Authenticate::new(me)?)?;
        // Commands are dropped until the handshake lands on a tick.
        let Some(identity) = authed.recv().await else {
            return Ok(());
        };
        tracing::info!(%identity, "client authenticated");

        client.send(LaunchProgram::new("/bin/countdown")?)?;
        client.send(LaunchProgram::new("/bin/daemon")?)?;
        client.send(LaunchProgram::new("/bin/missing")?)?;

        let mut daemon: Option<Pid> = None;
        while let Some(launch) = launched.recv().await {
            if launch.path == "/bin/daemon" {
                daemon = Some(launch.pid);
                break;
            }
        }
        if let Some(pid) = daemon {
            tokio::time::sleep(Duration::from_millis(300)).await;
            client.send(InterruptProcess::new(pid, false))?;
        }
        anyhow::Ok(())
    });

    let ticks = sim.run_until(tokio::time::sleep(Duration::from_secs(2))).await;
    driver.await??;

    world.with(|w| {
        tracing::info!(ticks, "final process table");
        if let Ok(processes) = w.processes(home) {
            for p in processes {
                tracing::info!(
                    pid = %p.pid(),
                    parent = ?p.parent(),
                    state = %p.state(),
                    owner = ?p.owner().map(ToString::to_string),
                    program = ?p.program().map(|i| i.path.as_str()),
                );
            }
        }
    });
    Ok(())
}
