use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

use log::debug;
use spin::{Once, RwLock};

use crate::processes::{process::UserProcess, Pid};

/// Every process of one kernel instance, keyed by pid.
pub struct ProcessTable {
    // process counter must be thread-safe
    next_pid: AtomicU32,
    running: AtomicUsize,
    root: Once<Pid>,
    processes: RwLock<BTreeMap<Pid, Arc<UserProcess>>>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable {
            next_pid: AtomicU32::new(0),
            running: AtomicUsize::new(0),
            root: Once::new(),
            processes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn allocate_pid(&self) -> Pid {
        Pid(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    pub fn insert(&self, process: Arc<UserProcess>) {
        self.processes.write().insert(process.pid(), process);
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<UserProcess>> {
        self.processes.read().get(&pid).cloned()
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<UserProcess>> {
        self.processes.write().remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records `pid` as the root process. Only the first call has any effect.
    pub fn set_root(&self, pid: Pid) -> Pid {
        *self.root.call_once(|| pid)
    }

    pub fn root(&self) -> Option<Pid> {
        self.root.get().copied()
    }

    pub fn is_root(&self, pid: Pid) -> bool {
        self.root() == Some(pid)
    }

    /// A process got an execution context.
    pub fn mark_running(&self) -> usize {
        self.running.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A running process finished. Returns how many are still running.
    pub fn mark_finished(&self) -> usize {
        self.running.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Dumps the table at debug level.
    pub fn log_table(&self) {
        let table = self.processes.read();
        debug!("Process Table Contents:");
        if table.is_empty() {
            debug!("No processes found");
            return;
        }
        for (pid, process) in table.iter() {
            debug!(
                "PID {}: State: {:?}, Parent: {:?}, Pages: {}, Children: {:?}",
                pid,
                process.state(),
                process.parent(),
                process.page_count(),
                process.child_pids()
            );
        }
    }
}
