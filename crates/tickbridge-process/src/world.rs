//! The world: computers, their process trees, and participant sessions.

use crate::error::{ProcessError, Result};
use crate::process::{
    Executor, InterruptOutcome, Pid, Process, ProcessTree, Step, TickContext, DEFAULT_MAX_PID,
};
use crate::program::ProgramImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tickbridge::Identity;

/// Computer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputerId(pub u32);

impl fmt::Display for ComputerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "computer#{}", self.0)
    }
}

/// One computer and its processes.
#[derive(Debug)]
pub struct Computer {
    id: ComputerId,
    name: String,
    tree: ProcessTree,
}

impl Computer {
    pub fn id(&self) -> ComputerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree(&self) -> &ProcessTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ProcessTree {
        &mut self.tree
    }
}

/// Executor behind a session process. Runs until interrupted.
#[derive(Debug, Default)]
pub struct SessionShell;

impl Executor for SessionShell {
    fn update(&mut self, _ctx: &TickContext) -> Step {
        Step::Continue
    }
}

/// Simulation state touched only on the tick thread.
#[derive(Debug)]
pub struct World {
    computers: BTreeMap<ComputerId, Computer>,
    sessions: HashMap<Identity, (ComputerId, Pid)>,
    next_computer: u32,
    max_pid: u32,
    tick: u64,
}

impl World {
    pub fn new() -> Self {
        Self::with_max_pid(DEFAULT_MAX_PID)
    }

    /// A world whose computers allocate pids up to `max_pid`.
    pub fn with_max_pid(max_pid: u32) -> Self {
        Self {
            computers: BTreeMap::new(),
            sessions: HashMap::new(),
            next_computer: 1,
            max_pid,
            tick: 0,
        }
    }

    /// Ticks completed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    // === Computers ===

    /// Adds an empty computer.
    pub fn add_computer(&mut self, name: impl Into<String>) -> ComputerId {
        let id = ComputerId(self.next_computer);
        self.next_computer += 1;
        let name = name.into();
        tracing::debug!(computer = %id, %name, "computer added");
        self.computers.insert(
            id,
            Computer {
                id,
                name,
                tree: ProcessTree::new(self.max_pid),
            },
        );
        id
    }

    pub fn computer(&self, id: ComputerId) -> Option<&Computer> {
        self.computers.get(&id)
    }

    pub fn computer_mut(&mut self, id: ComputerId) -> Option<&mut Computer> {
        self.computers.get_mut(&id)
    }

    pub fn computers(&self) -> impl Iterator<Item = &Computer> {
        self.computers.values()
    }

    fn tree_mut(&mut self, id: ComputerId) -> Result<&mut ProcessTree> {
        self.computers
            .get_mut(&id)
            .map(|c| &mut c.tree)
            .ok_or(ProcessError::UnknownComputer(id))
    }

    /// Replaces a computer's process tree, e.g. after a snapshot restore.
    ///
    /// A session survives only if its pid still names a live process owned
    /// by the same identity.
    ///
    /// # Errors
    ///
    /// [`ProcessError::UnknownComputer`].
    pub fn replace_tree(&mut self, id: ComputerId, tree: ProcessTree) -> Result<()> {
        *self.tree_mut(id)? = tree;
        let computers = &self.computers;
        self.sessions.retain(|identity, &mut (computer, pid)| {
            computers
                .get(&computer)
                .and_then(|c| c.tree.get(pid))
                .is_some_and(|p| p.is_alive() && p.is_owned_by(identity))
        });
        Ok(())
    }

    // === Processes ===

    /// Every process on `computer`, ordered by pid.
    ///
    /// # Errors
    ///
    /// [`ProcessError::UnknownComputer`].
    pub fn processes(&self, computer: ComputerId) -> Result<Vec<&Process>> {
        let c = self
            .computers
            .get(&computer)
            .ok_or(ProcessError::UnknownComputer(computer))?;
        Ok(c.tree.processes().collect())
    }

    pub fn find_process(&self, computer: ComputerId, pid: Pid) -> Option<&Process> {
        self.computers.get(&computer)?.tree.get(pid)
    }

    /// Launches a process beneath `parent`.
    ///
    /// # Errors
    ///
    /// [`ProcessError::UnknownComputer`], [`ProcessError::UnknownPid`] or
    /// [`ProcessError::PidsExhausted`].
    pub fn spawn_child(
        &mut self,
        computer: ComputerId,
        parent: Pid,
        owner: Option<Identity>,
        program: Option<ProgramImage>,
        executor: Option<Box<dyn Executor>>,
    ) -> Result<Pid> {
        self.tree_mut(computer)?
            .create_child(parent, owner, program, executor)
    }

    /// Interrupts `pid` on the computer hosting `requester`'s session,
    /// provided `requester` owns it.
    pub fn interrupt_as(&mut self, requester: &Identity, pid: Pid, recursive: bool) -> InterruptOutcome {
        let Some(computer) = self.active_computer(requester) else {
            tracing::warn!(%requester, %pid, "interrupt from participant without a session");
            return InterruptOutcome::NotFound;
        };
        match self.tree_mut(computer) {
            Ok(tree) => tree.interrupt_as(requester, pid, recursive),
            Err(_) => InterruptOutcome::NotFound,
        }
    }

    // === Sessions ===

    /// Logs `identity` into `computer`, creating its session process.
    ///
    /// Logging in again while the session is alive returns the existing
    /// session pid, even if a different computer is named.
    ///
    /// # Errors
    ///
    /// [`ProcessError::UnknownComputer`] or [`ProcessError::PidsExhausted`].
    pub fn login(&mut self, identity: &Identity, computer: ComputerId) -> Result<Pid> {
        if let Some((_, pid)) = self.session(identity) {
            return Ok(pid);
        }
        let pid = self.tree_mut(computer)?.create_root(
            Some(identity.clone()),
            None,
            Some(Box::new(SessionShell)),
        )?;
        self.sessions.insert(identity.clone(), (computer, pid));
        tracing::info!(%identity, %computer, %pid, "session started");
        Ok(pid)
    }

    /// The live session of `identity`.
    pub fn session(&self, identity: &Identity) -> Option<(ComputerId, Pid)> {
        let (computer, pid) = *self.sessions.get(identity)?;
        let alive = self
            .find_process(computer, pid)
            .is_some_and(Process::is_alive);
        alive.then_some((computer, pid))
    }

    /// The computer hosting `identity`'s session.
    pub fn active_computer(&self, identity: &Identity) -> Option<ComputerId> {
        self.session(identity).map(|(computer, _)| computer)
    }

    // === Simulation ===

    /// Advances every computer by one tick.
    pub fn tick(&mut self) {
        self.tick += 1;
        for computer in self.computers.values_mut() {
            let stopped = computer.tree.tick(self.tick);
            for pid in stopped {
                tracing::debug!(computer = %computer.id, %pid, "process stopped");
            }
        }
    }

    /// Sweeps every computer and forgets sessions whose process is gone.
    /// Returns the number of removed processes.
    pub fn sweep(&mut self) -> usize {
        let removed: usize = self
            .computers
            .values_mut()
            .map(|c| c.tree.sweep().len())
            .sum();
        let computers = &self.computers;
        self.sessions.retain(|_, &mut (computer, pid)| {
            computers
                .get(&computer)
                .is_some_and(|c| c.tree.get(pid).is_some())
        });
        removed
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the [`World`].
///
/// The mutex is only taken on the simulation thread: by handlers running off
/// the tick queue and by [`Simulation::step`](crate::Simulation::step).
#[derive(Debug, Clone)]
pub struct WorldHandle(Arc<Mutex<World>>);

impl WorldHandle {
    pub fn new(world: World) -> Self {
        Self(Arc::new(Mutex::new(world)))
    }

    /// Runs `f` with exclusive access to the world.
    pub fn with<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        let mut world = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut world)
    }
}

impl Default for WorldHandle {
    fn default() -> Self {
        Self::new(World::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;
    use crate::program::ProgramRegistry;

    fn ann() -> Identity {
        Identity::player("ann").unwrap()
    }

    #[test]
    fn login_is_idempotent_per_identity_value() {
        let mut world = World::new();
        let home = world.add_computer("home");
        let other = world.add_computer("other");

        let first = world.login(&ann(), home).unwrap();
        assert_eq!(world.login(&ann(), other).unwrap(), first);
        assert_eq!(world.active_computer(&ann()), Some(home));
        assert_eq!(world.processes(other).unwrap().len(), 0);
    }

    #[test]
    fn login_to_unknown_computer_fails() {
        let mut world = World::new();
        assert_eq!(
            world.login(&ann(), ComputerId(9)),
            Err(ProcessError::UnknownComputer(ComputerId(9)))
        );
    }

    #[test]
    fn interrupted_session_is_forgotten_after_sweep() {
        let mut world = World::new();
        let home = world.add_computer("home");
        let session = world.login(&ann(), home).unwrap();
        world.tick();

        assert_eq!(
            world.interrupt_as(&ann(), session, true),
            InterruptOutcome::Applied(vec![session])
        );
        world.tick();
        assert_eq!(world.session(&ann()), None);
        assert_eq!(world.sweep(), 1);

        let again = world.login(&ann(), home).unwrap();
        assert_eq!(again, session);
        assert_eq!(
            world.find_process(home, again).unwrap().state(),
            ProcessState::Waiting
        );
    }

    #[test]
    fn replace_tree_keeps_only_sessions_still_owned() {
        let bob = Identity::player("bob").unwrap();
        let mut world = World::new();
        let home = world.add_computer("home");
        let ann_session = world.login(&ann(), home).unwrap();
        let bob_session = world.login(&bob, home).unwrap();

        // Same pids, but the owners are swapped.
        let mut swapped = ProcessTree::default();
        assert_eq!(swapped.create_root(Some(bob.clone()), None, None).unwrap(), ann_session);
        assert_eq!(swapped.create_root(Some(ann()), None, None).unwrap(), bob_session);
        world.replace_tree(home, swapped).unwrap();
        assert_eq!(world.session(&ann()), None);
        assert_eq!(world.session(&bob), None);

        // A fresh login does not reuse a pid held by someone else.
        let again = world.login(&ann(), home).unwrap();
        assert!(again != ann_session && again != bob_session);
        assert_eq!(world.find_process(home, again).unwrap().owner(), Some(&ann()));
    }

    #[test]
    fn replace_tree_keeps_a_restored_session() {
        let mut world = World::new();
        let home = world.add_computer("home");
        let session = world.login(&ann(), home).unwrap();
        let snapshot = world.computer(home).unwrap().tree().snapshot();

        let restored =
            ProcessTree::restore(snapshot, &ProgramRegistry::new(), DEFAULT_MAX_PID).unwrap();
        world.replace_tree(home, restored).unwrap();
        assert_eq!(world.session(&ann()), Some((home, session)));
        assert_eq!(
            world.replace_tree(ComputerId(9), ProcessTree::default()),
            Err(ProcessError::UnknownComputer(ComputerId(9)))
        );
    }

    #[test]
    fn interrupt_without_session_is_not_found() {
        let mut world = World::new();
        world.add_computer("home");
        assert_eq!(
            world.interrupt_as(&ann(), Pid(1), false),
            InterruptOutcome::NotFound
        );
    }

    #[test]
    fn handle_serializes_access() {
        let handle = WorldHandle::default();
        let home = handle.with(|w| w.add_computer("home"));
        let clone = handle.clone();
        let pid = clone.with(|w| w.login(&ann(), home)).unwrap();
        assert!(handle.with(|w| w.find_process(home, pid).is_some()));
    }
}
