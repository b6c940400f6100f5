//! Flat process records and the two-phase restore.
//!
//! Records carry no references, only pids. Restore first rebuilds every
//! process on its own, then links children to parents by pid, so record
//! order does not matter.

use crate::error::{ProcessError, Result};
use crate::process::{Pid, Process, ProcessState, ProcessTree};
use crate::program::{ProgramImage, ProgramRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tickbridge::Identity;

/// Persisted form of one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: Pid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Pid>,
    pub state: ProcessState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<ProgramImage>,
}

impl ProcessTree {
    /// Flat records for every process, ordered by pid.
    pub fn snapshot(&self) -> Vec<ProcessRecord> {
        self.processes
            .values()
            .map(|p| ProcessRecord {
                pid: p.pid,
                parent: p.parent,
                state: p.state,
                owner: p.owner.clone(),
                program: p.program.clone(),
            })
            .collect()
    }

    /// Rebuilds a tree from `records`.
    ///
    /// Executors are re-instantiated from each record's program through
    /// `registry`. A program whose executor is no longer registered restores
    /// as a process without behaviour.
    ///
    /// # Errors
    ///
    /// [`ProcessError::Link`] for duplicate pids, pids above `max_pid`,
    /// parents missing from the records, or parent links that loop.
    pub fn restore(records: Vec<ProcessRecord>, registry: &ProgramRegistry, max_pid: u32) -> Result<Self> {
        // Phase 1: every process on its own.
        let mut processes = BTreeMap::new();
        for record in records {
            if record.pid.0 == 0 || record.pid.0 > max_pid {
                return Err(ProcessError::Link(format!(
                    "pid {} outside 1..={max_pid}",
                    record.pid
                )));
            }
            let executor = record.program.as_ref().and_then(|image| {
                let executor = registry.instantiate(image);
                if executor.is_none() {
                    tracing::warn!(
                        pid = %record.pid,
                        executor = %image.executor,
                        "executor not registered, process restored without behaviour"
                    );
                }
                executor
            });
            let mut process = Process::new(record.pid, record.parent, record.owner, record.program, executor);
            process.state = record.state;
            if processes.insert(record.pid, process).is_some() {
                return Err(ProcessError::Link(format!("duplicate pid {}", record.pid)));
            }
        }

        // Phase 2: link children to parents.
        let links: Vec<(Pid, Pid)> = processes
            .values()
            .filter_map(|p: &Process| p.parent.map(|parent| (parent, p.pid)))
            .collect();
        for (parent, child) in links {
            if parent == child {
                return Err(ProcessError::Link(format!(
                    "process {child} names itself as parent"
                )));
            }
            let Some(p) = processes.get_mut(&parent) else {
                return Err(ProcessError::Link(format!(
                    "process {child} names missing parent {parent}"
                )));
            };
            p.children.push(child);
        }

        // Every parent chain must end at a root within `len` steps.
        for pid in processes.keys() {
            let mut current = *pid;
            let mut steps = 0;
            while let Some(parent) = processes.get(&current).and_then(|p| p.parent) {
                steps += 1;
                if steps > processes.len() {
                    return Err(ProcessError::Link(format!(
                        "parent chain of process {pid} never reaches a root"
                    )));
                }
                current = parent;
            }
        }

        tracing::debug!(count = processes.len(), "process tree restored");
        Ok(Self { processes, max_pid })
    }
}
