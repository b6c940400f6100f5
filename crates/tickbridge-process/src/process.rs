//! Process tree and lifecycle state machine.
//!
//! ```text
//!            first tick              Step::Stop
//! Waiting ─────────────► Running ─────────────────► Stopped ──sweep──► (removed)
//!    │                      │                          ▲
//!    │  interrupt           │ interrupt                │ next tick (on_interrupt)
//!    └──────────────► Interrupted ─────────────────────┘
//! ```
//!
//! Every mutation happens on the simulation thread. The tree holds no locks
//! of its own; the world that owns it is behind a [`WorldHandle`](crate::WorldHandle).

use crate::error::{ProcessError, Result};
use crate::program::ProgramImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tickbridge::Identity;

/// Process identifier, unique within one computer's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Created, not yet ticked.
    Waiting,
    /// Ticked every simulation step.
    Running,
    /// Asked to stop; finishes on the next tick.
    Interrupted,
    /// Terminal. Removed by the next sweep once its children are gone.
    Stopped,
}

impl ProcessState {
    /// Returns `true` if the state machine allows `self -> to`.
    pub fn can_become(self, to: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, to),
            (Waiting, Running)
                | (Waiting, Interrupted)
                | (Running, Interrupted)
                | (Running, Stopped)
                | (Interrupted, Interrupted)
                | (Interrupted, Stopped)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What an executor wants after one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep running.
    Continue,
    /// Stop now.
    Stop,
}

/// Passed to executors on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    /// The process being ticked.
    pub pid: Pid,
    /// Simulation tick number.
    pub tick: u64,
}

/// The behaviour behind a process.
pub trait Executor: Send + 'static {
    /// One simulation step.
    fn update(&mut self, ctx: &TickContext) -> Step;

    /// Bookkeeping run once, on the tick that stops an interrupted process.
    fn on_interrupt(&mut self, _ctx: &TickContext) {}
}

impl<F> Executor for F
where
    F: FnMut(&TickContext) -> Step + Send + 'static,
{
    fn update(&mut self, ctx: &TickContext) -> Step {
        self(ctx)
    }
}

/// Result of an authorized interrupt request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Accepted. Lists the processes that became `Interrupted`.
    Applied(Vec<Pid>),
    /// The requester does not own the process. Nothing changed.
    Denied,
    /// No such process.
    NotFound,
}

/// One process entity.
pub struct Process {
    pub(crate) pid: Pid,
    pub(crate) parent: Option<Pid>,
    pub(crate) children: Vec<Pid>,
    pub(crate) state: ProcessState,
    pub(crate) owner: Option<Identity>,
    pub(crate) program: Option<ProgramImage>,
    pub(crate) executor: Option<Box<dyn Executor>>,
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        parent: Option<Pid>,
        owner: Option<Identity>,
        program: Option<ProgramImage>,
        executor: Option<Box<dyn Executor>>,
    ) -> Self {
        Self {
            pid,
            parent,
            children: Vec::new(),
            state: ProcessState::Waiting,
            owner,
            program,
            executor,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn children(&self) -> &[Pid] {
        &self.children
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Identity recorded at launch.
    pub fn owner(&self) -> Option<&Identity> {
        self.owner.as_ref()
    }

    /// Program the process was launched from.
    pub fn program(&self) -> Option<&ProgramImage> {
        self.program.as_ref()
    }

    /// Returns `true` until the process stops.
    pub fn is_alive(&self) -> bool {
        self.state != ProcessState::Stopped
    }

    /// Returns `true` if `identity` is the recorded owner.
    pub fn is_owned_by(&self, identity: &Identity) -> bool {
        self.owner.as_ref() == Some(identity)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("state", &self.state)
            .field("owner", &self.owner)
            .field("program", &self.program)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

/// Default pid ceiling.
pub const DEFAULT_MAX_PID: u32 = 4096;

/// The processes of one computer.
pub struct ProcessTree {
    pub(crate) processes: BTreeMap<Pid, Process>,
    pub(crate) max_pid: u32,
}

impl ProcessTree {
    /// An empty tree allocating pids `1..=max_pid`.
    pub fn new(max_pid: u32) -> Self {
        Self {
            processes: BTreeMap::new(),
            max_pid,
        }
    }

    pub fn max_pid(&self) -> u32 {
        self.max_pid
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Looks a process up by pid.
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    /// Every process, ordered by pid.
    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// Lowest pid not currently in the tree.
    fn allocate_pid(&self) -> Result<Pid> {
        let mut candidate = 1u32;
        for pid in self.processes.keys() {
            if pid.0 != candidate {
                break;
            }
            candidate += 1;
        }
        if candidate > self.max_pid {
            return Err(ProcessError::PidsExhausted(self.max_pid));
        }
        Ok(Pid(candidate))
    }

    /// Creates a process with no parent.
    ///
    /// # Errors
    ///
    /// [`ProcessError::PidsExhausted`] when the tree is full.
    pub fn create_root(
        &mut self,
        owner: Option<Identity>,
        program: Option<ProgramImage>,
        executor: Option<Box<dyn Executor>>,
    ) -> Result<Pid> {
        let pid = self.allocate_pid()?;
        self.processes
            .insert(pid, Process::new(pid, None, owner, program, executor));
        tracing::debug!(%pid, "root process created");
        Ok(pid)
    }

    /// Creates a child of `parent` with a freshly allocated pid.
    ///
    /// # Errors
    ///
    /// [`ProcessError::UnknownPid`] if `parent` is not in the tree,
    /// [`ProcessError::PidsExhausted`] when the tree is full.
    pub fn create_child(
        &mut self,
        parent: Pid,
        owner: Option<Identity>,
        program: Option<ProgramImage>,
        executor: Option<Box<dyn Executor>>,
    ) -> Result<Pid> {
        if !self.processes.contains_key(&parent) {
            return Err(ProcessError::UnknownPid(parent));
        }
        let pid = self.allocate_pid()?;
        self.processes
            .insert(pid, Process::new(pid, Some(parent), owner, program, executor));
        if let Some(p) = self.processes.get_mut(&parent) {
            p.children.push(pid);
        }
        tracing::debug!(%pid, %parent, "child process created");
        Ok(pid)
    }

    /// `pid` and all its transitive descendants, depth-first, parents first.
    ///
    /// # Errors
    ///
    /// [`ProcessError::UnknownPid`] if `pid` is not in the tree.
    pub fn subtree(&self, pid: Pid) -> Result<Vec<Pid>> {
        if !self.processes.contains_key(&pid) {
            return Err(ProcessError::UnknownPid(pid));
        }
        let mut out = Vec::new();
        let mut stack = vec![pid];
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(p) = self.processes.get(&next) {
                stack.extend(p.children.iter().rev().copied());
            }
        }
        Ok(out)
    }

    /// Moves `pid` to `to`.
    ///
    /// # Errors
    ///
    /// [`ProcessError::UnknownPid`], or
    /// [`ProcessError::InvalidTransition`] if the state machine forbids it.
    pub fn transition(&mut self, pid: Pid, to: ProcessState) -> Result<()> {
        let process = self
            .processes
            .get_mut(&pid)
            .ok_or(ProcessError::UnknownPid(pid))?;
        let from = process.state;
        if !from.can_become(to) {
            return Err(ProcessError::InvalidTransition { from, to });
        }
        process.state = to;
        if from != to {
            tracing::trace!(%pid, %from, %to, "process transition");
        }
        Ok(())
    }

    /// Interrupts `pid`, and with `recursive` every descendant too.
    ///
    /// Waiting and running processes become `Interrupted`. Already
    /// interrupted or stopped processes are left alone. Returns the pids
    /// that changed.
    ///
    /// # Errors
    ///
    /// [`ProcessError::UnknownPid`] if `pid` is not in the tree.
    pub fn interrupt(&mut self, pid: Pid, recursive: bool) -> Result<Vec<Pid>> {
        let targets = if recursive {
            self.subtree(pid)?
        } else if self.processes.contains_key(&pid) {
            vec![pid]
        } else {
            return Err(ProcessError::UnknownPid(pid));
        };

        let mut changed = Vec::new();
        for target in targets {
            if let Some(p) = self.processes.get_mut(&target) {
                if matches!(p.state, ProcessState::Waiting | ProcessState::Running) {
                    p.state = ProcessState::Interrupted;
                    changed.push(target);
                }
            }
        }
        tracing::debug!(%pid, recursive, count = changed.len(), "processes interrupted");
        Ok(changed)
    }

    /// Interrupts on behalf of `requester`, who must own `pid`.
    pub fn interrupt_as(&mut self, requester: &Identity, pid: Pid, recursive: bool) -> InterruptOutcome {
        let Some(process) = self.processes.get(&pid) else {
            return InterruptOutcome::NotFound;
        };
        if !process.is_owned_by(requester) {
            tracing::warn!(
                %pid,
                %requester,
                owner = ?process.owner,
                "interrupt denied: requester does not own process"
            );
            return InterruptOutcome::Denied;
        }
        match self.interrupt(pid, recursive) {
            Ok(changed) => InterruptOutcome::Applied(changed),
            Err(_) => InterruptOutcome::NotFound,
        }
    }

    /// Advances every process by one step, in pid order. Returns the pids
    /// that stopped during this tick.
    pub fn tick(&mut self, tick: u64) -> Vec<Pid> {
        let mut stopped = Vec::new();
        for process in self.processes.values_mut() {
            let ctx = TickContext {
                pid: process.pid,
                tick,
            };
            match process.state {
                ProcessState::Stopped => {}
                ProcessState::Interrupted => {
                    if let Some(executor) = process.executor.as_mut() {
                        executor.on_interrupt(&ctx);
                    }
                    process.state = ProcessState::Stopped;
                    stopped.push(process.pid);
                }
                ProcessState::Waiting | ProcessState::Running => {
                    process.state = ProcessState::Running;
                    let step = process
                        .executor
                        .as_mut()
                        .map_or(Step::Continue, |e| e.update(&ctx));
                    if step == Step::Stop {
                        process.state = ProcessState::Stopped;
                        stopped.push(process.pid);
                    }
                }
            }
        }
        stopped
    }

    /// Removes stopped processes whose children are all gone, leaves first.
    /// Returns the removed pids in removal order.
    pub fn sweep(&mut self) -> Vec<Pid> {
        let mut removed = Vec::new();
        loop {
            let leaves: Vec<Pid> = self
                .processes
                .values()
                .filter(|p| p.state == ProcessState::Stopped && p.children.is_empty())
                .map(|p| p.pid)
                .collect();
            if leaves.is_empty() {
                break;
            }
            for pid in leaves {
                let Some(process) = self.processes.remove(&pid) else {
                    continue;
                };
                if let Some(parent) = process.parent.and_then(|p| self.processes.get_mut(&p)) {
                    parent.children.retain(|c| *c != pid);
                }
                removed.push(pid);
            }
        }
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "stopped processes swept");
        }
        removed
    }
}

impl Default for ProcessTree {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PID)
    }
}

impl fmt::Debug for ProcessTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTree")
            .field("processes", &self.processes.len())
            .field("max_pid", &self.max_pid)
            .finish()
    }
}
