//! # Tickbridge Process
//!
//! The process lifecycle state machine driven by a tickbridge bridge.
//!
//! ```text
//! client ── InterruptProcess / LaunchProgram ──► server bridge
//!                                                    │ HandlerModule channel
//!                                                    │ RedirectInterceptor
//!                                                    ▼
//!                                         Simulation::tick_queue
//!                                                    │ Simulation::step()
//!                                                    ▼
//!                         InterruptHandler / LaunchHandler ──► World
//!                                                               ├─ Computer ─ ProcessTree
//!                                                               └─ sessions (Identity → pid)
//! ```
//!
//! Authorization compares the sender's [`Identity`](tickbridge::Identity),
//! resolved fresh for every command, with the owner recorded on the
//! process at launch. A participant that reconnects under the same identity
//! keeps control of its processes.

mod error;
mod handlers;
mod process;
mod program;
mod sim;
mod snapshot;
mod world;

pub use error::{ProcessError, Result};
pub use handlers::{
    install, register_events, InterruptHandler, InterruptProcess, LaunchHandler, LaunchProgram,
    ProcessLaunched,
};
pub use process::{
    Executor, InterruptOutcome, Pid, Process, ProcessState, ProcessTree, Step, TickContext,
    DEFAULT_MAX_PID,
};
pub use program::{FileSystem, ProgramImage, ProgramRegistry};
pub use sim::{Simulation, SimulationConfig, StepReport};
pub use snapshot::ProcessRecord;
pub use world::{Computer, ComputerId, SessionShell, World, WorldHandle};
