//! The tick driver.
//!
//! One [`Simulation`] owns the tick queue. Each step drains the queue (which
//! runs every command handler redirected onto it), advances the world, and
//! sweeps stopped processes on a fixed cadence.

use crate::process::DEFAULT_MAX_PID;
use crate::world::{World, WorldHandle};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tickbridge::{ConfigError, QueuedProvider};

/// Tick driver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Wall-clock time between ticks in [`Simulation::run_until`].
    pub tick_interval_ms: u64,
    /// Sweep stopped processes every this many ticks.
    pub sweep_interval_ticks: u64,
    /// Highest pid a computer may allocate.
    pub max_pid: u32,
}

impl SimulationConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the document is malformed or a value is zero.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = tickbridge::from_json(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for zero values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |field: &'static str| ConfigError::Invalid {
            field,
            reason: "must be greater than zero".into(),
        };
        if self.tick_interval_ms == 0 {
            return Err(zero("tick_interval_ms"));
        }
        if self.sweep_interval_ticks == 0 {
            return Err(zero("sweep_interval_ticks"));
        }
        if self.max_pid == 0 {
            return Err(zero("max_pid"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// An empty world honouring `max_pid`.
    pub fn build_world(&self) -> World {
        World::with_max_pid(self.max_pid)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            sweep_interval_ticks: 20,
            max_pid: DEFAULT_MAX_PID,
        }
    }
}

/// What one [`Simulation::step`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Tick number just completed.
    pub tick: u64,
    /// Runnables drained from the tick queue.
    pub drained: usize,
    /// Processes removed by the sweep, if one ran.
    pub swept: usize,
}

/// Drives the world one tick at a time.
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    world: WorldHandle,
    tick_queue: Arc<QueuedProvider>,
}

impl Simulation {
    pub fn new(config: SimulationConfig, world: WorldHandle) -> Self {
        Self {
            config,
            world,
            tick_queue: Arc::new(QueuedProvider::new()),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldHandle {
        &self.world
    }

    /// The queue command handlers must be redirected onto.
    pub fn tick_queue(&self) -> Arc<QueuedProvider> {
        Arc::clone(&self.tick_queue)
    }

    /// Runs one tick.
    ///
    /// The world lock is not held while the queue drains; handlers take it
    /// themselves.
    pub fn step(&self) -> StepReport {
        let drained = self.tick_queue.drain();
        let sweep_every = self.config.sweep_interval_ticks.max(1);
        let (tick, swept) = self.world.with(|w| {
            w.tick();
            let tick = w.tick_count();
            let swept = if tick % sweep_every == 0 { w.sweep() } else { 0 };
            (tick, swept)
        });
        tracing::trace!(tick, drained, swept, "tick");
        StepReport { tick, drained, swept }
    }

    /// Steps on a fixed interval until `stop` completes. Returns the number
    /// of ticks run.
    pub async fn run_until<F>(&self, stop: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(stop);

        let mut ticks = 0;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = interval.tick() => {
                    self.step();
                    ticks += 1;
                }
            }
        }
        tracing::info!(ticks, "simulation stopped");
        ticks
    }
}
